//! Letter batches and delivery references

use super::DeliveryError;
use crate::archive::entry_name;

/// The source letters handled by one task invocation
///
/// Source keys look like
/// `2017-12-06/NOTIFY.ABCDEFG1234567890.D.2.C.C.20171206184702.PDF`: a folder
/// (the print date) followed by a dotted filename carrying the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LetterBatch {
    source_keys: Vec<String>,
    folder_key: String,
}

impl LetterBatch {
    /// Build a batch; the folder comes from the first key's leading segment
    pub fn new(source_keys: Vec<String>) -> Result<Self, DeliveryError> {
        let first = source_keys.first().ok_or(DeliveryError::EmptyBatch)?;
        let folder_key = first.split('/').next().unwrap_or(first).to_string();
        Ok(LetterBatch {
            source_keys,
            folder_key,
        })
    }

    pub fn source_keys(&self) -> &[String] {
        &self.source_keys
    }

    pub fn folder_key(&self) -> &str {
        &self.folder_key
    }

    /// `{folder}/zips_sent/{archive filename}.TXT`
    pub fn sent_marker_key(&self, archive_filename: &str) -> String {
        format!("{}/zips_sent/{}.TXT", self.folder_key, archive_filename)
    }

    /// `{folder}/{archive filename}`, where the side copy of the archive goes
    pub fn archive_copy_key(&self, archive_filename: &str) -> String {
        format!("{}/{}", self.folder_key, archive_filename)
    }

    /// One delivery reference per source key, in order
    pub fn references(&self) -> Vec<String> {
        self.source_keys.iter().map(|k| reference_from_key(k)).collect()
    }
}

/// Reference embedded in a source key
///
/// The second dot-separated token of the key's basename. A basename without a
/// dot is used whole so that every key still maps to some reference.
pub fn reference_from_key(source_key: &str) -> String {
    let name = entry_name(source_key);
    name.split('.').nth(1).unwrap_or(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_key() {
        let batch = LetterBatch::new(vec!["2017-01-01/TEST1.PDF".to_string()]).unwrap();
        assert_eq!(batch.folder_key(), "2017-01-01");
        assert_eq!(
            batch.sent_marker_key("NOTIFY.20170101173000.ZIP"),
            "2017-01-01/zips_sent/NOTIFY.20170101173000.ZIP.TXT"
        );
        assert_eq!(
            batch.archive_copy_key("NOTIFY.20170101173000.ZIP"),
            "2017-01-01/NOTIFY.20170101173000.ZIP"
        );
    }

    #[test]
    fn test_folder_from_first_key_only() {
        let batch = LetterBatch::new(vec![
            "2017-12-06/A.PDF".to_string(),
            "2017-12-07/B.PDF".to_string(),
        ])
        .unwrap();
        assert_eq!(batch.folder_key(), "2017-12-06");
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(matches!(LetterBatch::new(vec![]), Err(DeliveryError::EmptyBatch)));
    }

    #[test]
    fn test_reference_extraction() {
        assert_eq!(
            reference_from_key("2017-12-06/NOTIFY.ABCDEFG1234567890.D.2.C.C.20171206184702.PDF"),
            "ABCDEFG1234567890"
        );
        assert_eq!(reference_from_key("2017-01-01/TEST1.PDF"), "PDF");
        assert_eq!(reference_from_key("2017-01-01/NODOT"), "NODOT");
        // Dots in the folder do not leak into the reference
        assert_eq!(reference_from_key("v1.2/NOTIFY.REF9.PDF"), "REF9");
    }
}
