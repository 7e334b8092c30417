//! Remote filename policy
//!
//! The partner accepts exactly two filename shapes, both embedding a UTC
//! timestamp:
//!
//! | Kind | Pattern | Example |
//! |------|---------|---------|
//! | plain | `Notify-YYYYMMDDHHmm-rq.txt` | `Notify-201701011730-rq.txt` |
//! | archive | `NOTIFY.YYYYMMDDHHmmss.ZIP` | `NOTIFY.20170101173000.ZIP` |
//!
//! Casing and separators are part of the contract. Within one kind the names
//! sort chronologically, so "one minute later" is the collision bump.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use thiserror::Error;

const PLAIN_FORMAT: &str = "Notify-%Y%m%d%H%M-rq.txt";
const ARCHIVE_FORMAT: &str = "NOTIFY.%Y%m%d%H%M%S.ZIP";

/// Which of the two partner filename patterns applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Flat text file (job exports)
    Plain,
    /// Zip archive of letter PDFs
    Archive,
}

impl FileKind {
    fn format(self) -> &'static str {
        match self {
            FileKind::Plain => PLAIN_FORMAT,
            FileKind::Archive => ARCHIVE_FORMAT,
        }
    }

    /// Infer the kind from a filename's extension (case-insensitive)
    pub fn from_filename(name: &str) -> Option<FileKind> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(FileKind::Archive)
        } else if lower.ends_with(".txt") {
            Some(FileKind::Plain)
        } else {
            None
        }
    }
}

/// A filename that does not follow either partner pattern.
///
/// This is a data or programming error, never a transient fault.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("filename {0:?} has no recognised extension")]
    UnknownKind(String),

    #[error("filename {name:?} does not match the {kind:?} pattern")]
    PatternMismatch { name: String, kind: FileKind },
}

/// Format `now` with the kind's pattern
pub fn current_name(kind: FileKind, now: DateTime<Utc>) -> String {
    now.format(kind.format()).to_string()
}

/// The same filename one minute later
///
/// Fails loudly when `old_name` does not match the pattern its own extension
/// selects.
pub fn next_name(old_name: &str) -> Result<String, NamingError> {
    let kind = FileKind::from_filename(old_name)
        .ok_or_else(|| NamingError::UnknownKind(old_name.to_string()))?;
    let parsed = NaiveDateTime::parse_from_str(old_name, kind.format()).map_err(|_| {
        NamingError::PatternMismatch {
            name: old_name.to_string(),
            kind,
        }
    })?;
    let bumped = parsed.and_utc() + ChronoDuration::minutes(1);
    Ok(current_name(kind, bumped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_current_name_archive() {
        let name = current_name(FileKind::Archive, at(2017, 1, 1, 17, 30, 0));
        assert_eq!(name, "NOTIFY.20170101173000.ZIP");
    }

    #[test]
    fn test_current_name_plain_drops_seconds() {
        let name = current_name(FileKind::Plain, at(2017, 1, 1, 17, 30, 59));
        assert_eq!(name, "Notify-201701011730-rq.txt");
    }

    #[test]
    fn test_next_name_plain() {
        assert_eq!(
            next_name("Notify-201701011730-rq.txt").unwrap(),
            "Notify-201701011731-rq.txt"
        );
    }

    #[test]
    fn test_next_name_archive_keeps_seconds() {
        assert_eq!(
            next_name("NOTIFY.20170101173045.ZIP").unwrap(),
            "NOTIFY.20170101173145.ZIP"
        );
    }

    #[test]
    fn test_next_name_rolls_over_year() {
        assert_eq!(
            next_name("Notify-201612312359-rq.txt").unwrap(),
            "Notify-201701010000-rq.txt"
        );
        assert_eq!(
            next_name("NOTIFY.20161231235930.ZIP").unwrap(),
            "NOTIFY.20170101000030.ZIP"
        );
    }

    #[test]
    fn test_next_name_twice_is_two_minutes() {
        for name in ["Notify-201701011730-rq.txt", "NOTIFY.20170101173000.ZIP"] {
            let twice = next_name(&next_name(name).unwrap()).unwrap();
            let kind = FileKind::from_filename(name).unwrap();
            let original = NaiveDateTime::parse_from_str(name, kind.format()).unwrap();
            let bumped = NaiveDateTime::parse_from_str(&twice, kind.format()).unwrap();
            assert_eq!(bumped - original, ChronoDuration::minutes(2));
        }
    }

    #[test]
    fn test_names_sort_chronologically() {
        let earlier = current_name(FileKind::Archive, at(2017, 1, 1, 9, 59, 59));
        let later = current_name(FileKind::Archive, at(2017, 1, 1, 10, 0, 0));
        assert!(earlier < later);
    }

    #[test]
    fn test_next_name_rejects_unknown_extension() {
        assert_eq!(
            next_name("letters.pdf"),
            Err(NamingError::UnknownKind("letters.pdf".to_string()))
        );
    }

    #[test]
    fn test_next_name_rejects_wrong_pattern() {
        assert!(matches!(
            next_name("NOTIFY.2017.ZIP"),
            Err(NamingError::PatternMismatch {
                kind: FileKind::Archive,
                ..
            })
        ));
        // Casing is part of the pattern
        assert!(matches!(
            next_name("notify.20170101173000.zip"),
            Err(NamingError::PatternMismatch { .. })
        ));
        assert!(matches!(
            next_name("Notify-201701011730-rq-extra.txt"),
            Err(NamingError::PatternMismatch { .. })
        ));
    }
}
