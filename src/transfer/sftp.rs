//! SFTP transfer client
//!
//! `ssh2` is blocking, so every call runs its whole session on the blocking
//! pool: connect, authenticate, resolve the drop directory, act, disconnect.
//! `SftpSession` disconnects on drop, which covers every exit path including
//! a panic in the directory logic.

use super::{
    place_in, inspect, upload_to, verify_in, Placement, PlacementError, RemoteDirectory,
    RemoteFileState, Transfer, TransferError, UploadOutcome,
};
use crate::config::SftpConfig;
use crate::observability::MetricsSink;
use bytes::Bytes;
use ssh2::{ErrorCode, Session, Sftp};
use std::future::Future;
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// libssh2 status for a missing path
const SFTP_NO_SUCH_FILE: i32 = 2;

const UPLOAD_TIME_METRIC: &str = "ftp-client.zip-upload-time";

/// One authenticated session with the drop directory selected
pub struct SftpSession {
    sftp: Sftp,
    session: Session,
    dir: PathBuf,
}

impl SftpSession {
    pub fn connect(config: &SftpConfig) -> Result<Self, TransferError> {
        let session_err = |stage: &str, e: &dyn std::fmt::Display| {
            TransferError::Session(format!("{} {}:{}: {}", stage, config.host, config.port, e))
        };

        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| session_err("resolve", &e))?
            .next()
            .ok_or_else(|| session_err("resolve", &"no addresses"))?;
        let tcp = TcpStream::connect_timeout(&addr, config.connect_timeout())
            .map_err(|e| session_err("connect", &e))?;

        let mut session = Session::new().map_err(|e| session_err("session", &e))?;
        session.set_timeout(config.connect_timeout().as_millis().min(u32::MAX as u128) as u32);
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| session_err("handshake", &e))?;
        session
            .userauth_password(&config.username, &config.password)
            .map_err(|e| session_err("auth", &e))?;

        let sftp = session.sftp().map_err(|e| session_err("sftp", &e))?;
        let home = sftp
            .realpath(Path::new("."))
            .map_err(|e| session_err("realpath", &e))?;
        let dir = home.join(&config.remote_dir);
        sftp.stat(&dir)
            .map_err(|e| session_err("chdir", &format!("{}: {}", dir.display(), e)))?;

        debug!(host = %config.host, dir = %dir.display(), "sftp session open");
        Ok(SftpSession { sftp, session, dir })
    }
}

impl Drop for SftpSession {
    fn drop(&mut self) {
        if let Err(e) = self.session.disconnect(None, "bye", None) {
            debug!(error = %e, "sftp disconnect failed");
        }
    }
}

impl RemoteDirectory for SftpSession {
    fn list(&self) -> io::Result<Vec<String>> {
        let entries = self.sftp.readdir(&self.dir)?;
        Ok(entries
            .into_iter()
            .filter_map(|(path, _)| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .collect())
    }

    fn size_of(&self, name: &str) -> io::Result<Option<u64>> {
        match self.sftp.lstat(&self.dir.join(name)) {
            Ok(stat) => Ok(Some(stat.size.unwrap_or(0))),
            Err(e) if e.code() == ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, name: &str, data: &[u8]) -> io::Result<()> {
        let mut file = self.sftp.create(&self.dir.join(name))?;
        file.write_all(data)?;
        file.flush()
    }
}

/// Production `Transfer` over SFTP
pub struct SftpTransfer {
    config: SftpConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl SftpTransfer {
    pub fn new(config: SftpConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        SftpTransfer { config, metrics }
    }

    /// Run `op` against a fresh session on the blocking pool
    async fn with_session<T, F>(&self, op: F) -> Result<T, TransferError>
    where
        T: Send + 'static,
        F: FnOnce(&SftpSession) -> Result<T, TransferError> + Send + 'static,
    {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let session = SftpSession::connect(&config)?;
            op(&session)
        })
        .await
        .map_err(|e| TransferError::Session(format!("sftp worker failed: {}", e)))?
    }
}

impl Transfer for SftpTransfer {
    fn inspect<'a>(
        &'a self,
        filename: &'a str,
        expected_size: u64,
    ) -> Pin<Box<dyn Future<Output = Result<RemoteFileState, TransferError>> + Send + 'a>> {
        let filename = filename.to_string();
        Box::pin(self.with_session(move |session| inspect(session, &filename, expected_size)))
    }

    fn upload<'a>(
        &'a self,
        payload: Bytes,
        filename: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<UploadOutcome, TransferError>> + Send + 'a>> {
        let name = filename.to_string();
        Box::pin(async move {
            let start = Instant::now();
            let result = self
                .with_session(move |session| upload_to(session, &payload, &name))
                .await;
            let elapsed = start.elapsed();
            self.metrics.timing(UPLOAD_TIME_METRIC, elapsed);
            info!(filename, elapsed_ms = elapsed.as_millis() as u64, ok = result.is_ok(), "sftp upload finished");
            result
        })
    }

    fn place<'a>(
        &'a self,
        payload: Bytes,
        filename: &'a str,
        fallback: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Placement, PlacementError>> + Send + 'a>> {
        let (name, fallback) = (filename.to_string(), fallback.to_string());
        Box::pin(async move {
            let start = Instant::now();
            let result = self
                .with_session(move |session| Ok(place_in(session, &payload, &name, &fallback)))
                .await
                .map_err(PlacementError::unplaced)
                .and_then(|placed| placed);
            let elapsed = start.elapsed();
            self.metrics.timing(UPLOAD_TIME_METRIC, elapsed);
            info!(filename, elapsed_ms = elapsed.as_millis() as u64, ok = result.is_ok(), "sftp upload finished");
            result
        })
    }

    fn verify<'a>(
        &'a self,
        filename: &'a str,
        expected_size: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send + 'a>> {
        let filename = filename.to_string();
        Box::pin(self.with_session(move |session| verify_in(session, &filename, expected_size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::RecordingMetrics;

    fn unreachable_config() -> SftpConfig {
        SftpConfig {
            // Reserved for documentation, never routable
            host: "192.0.2.1".to_string(),
            port: 22,
            username: "u".to_string(),
            password: "p".to_string(),
            connect_timeout_secs: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connect_failure_is_session_error() {
        let transfer = SftpTransfer::new(unreachable_config(), Arc::new(RecordingMetrics::new()));

        let err = transfer.verify("f.zip", 1).await.unwrap_err();

        assert!(matches!(err, TransferError::Session(_)));
    }

    #[tokio::test]
    async fn test_upload_failure_still_reports_timing() {
        let metrics = RecordingMetrics::new();
        let transfer = SftpTransfer::new(unreachable_config(), Arc::new(metrics.clone()));

        assert!(transfer.upload(Bytes::from_static(b"x"), "f.zip").await.is_err());

        assert_eq!(metrics.count(UPLOAD_TIME_METRIC), 1);
    }

    #[tokio::test]
    async fn test_place_connect_failure_has_no_name() {
        let transfer = SftpTransfer::new(unreachable_config(), Arc::new(RecordingMetrics::new()));

        let err = transfer
            .place(Bytes::from_static(b"x"), "a.txt", "b.txt")
            .await
            .unwrap_err();

        assert_eq!(err.filename, None);
        assert!(matches!(err.error, TransferError::Session(_)));
    }
}
