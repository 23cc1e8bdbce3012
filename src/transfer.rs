use std::io;
use thiserror::Error;

use crate::k8s::ConnectionFlags;
use crate::session::{SessionDescriptor, connection_args};

pub const DEFAULT_TX_RETRIES: u32 = 999;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{path}: no such file or directory")]
    MissingSource {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("transfer needs both a source and a destination")]
    Incomplete,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Self::Upload => "Upload",
            Self::Download => "Download",
        }
    }
}

/// A `kubectl cp` between the local disk and a pod, in either direction.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TransferRequest {
    pub from: String,
    pub to: String,
    pub direction: Direction,
    pub container: String,
    pub no_preserve: bool,
    pub retries: u32,
}

impl TransferRequest {
    /// Uploads need an existing local source. Only a missing file blocks
    /// the transfer; other stat failures are left to kubectl.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.from.trim().is_empty() || self.to.trim().is_empty() {
            return Err(TransferError::Incomplete);
        }
        if self.direction == Direction::Upload
            && let Err(source) = std::fs::metadata(&self.from)
            && source.kind() == io::ErrorKind::NotFound
        {
            return Err(TransferError::MissingSource {
                path: self.from.clone(),
                source,
            });
        }
        Ok(())
    }

    pub fn args(&self, flags: &ConnectionFlags) -> Vec<String> {
        let mut args = vec![
            "cp".to_string(),
            self.from.clone(),
            self.to.clone(),
            format!("--no-preserve={}", self.no_preserve),
            format!("--retries={}", self.retries),
        ];
        if !self.container.is_empty() {
            args.push(format!("-c={}", self.container));
        }
        args.extend(connection_args(flags));
        args
    }

    pub fn descriptor(&self, flags: &ConnectionFlags) -> SessionDescriptor {
        SessionDescriptor {
            args: self.args(flags),
            banner: None,
            clear: false,
            background: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_TX_RETRIES, Direction, TransferError, TransferRequest};
    use crate::k8s::ConnectionFlags;

    fn request(direction: Direction, from: &str, to: &str) -> TransferRequest {
        TransferRequest {
            from: from.to_string(),
            to: to.to_string(),
            direction,
            container: "app".to_string(),
            no_preserve: false,
            retries: DEFAULT_TX_RETRIES,
        }
    }

    #[test]
    fn args_carry_retries_and_container() {
        let args = request(Direction::Download, "ns/p:/var/log/app.log", "/tmp/app.log")
            .args(&ConnectionFlags::default());
        assert_eq!(
            args,
            vec![
                "cp",
                "ns/p:/var/log/app.log",
                "/tmp/app.log",
                "--no-preserve=false",
                "--retries=999",
                "-c=app"
            ]
        );
    }

    #[test]
    fn missing_upload_source_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.txt");
        let upload = request(Direction::Upload, &missing.to_string_lossy(), "ns/p:/tmp");
        let error = upload.validate().expect_err("missing source");
        assert!(matches!(error, TransferError::MissingSource { .. }));
        assert!(error.to_string().ends_with("no such file or directory"));
    }

    #[test]
    fn existing_upload_source_passes() {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        let upload = request(Direction::Upload, &file.path().to_string_lossy(), "ns/p:/tmp");
        assert!(upload.validate().is_ok());
    }

    #[test]
    fn downloads_skip_the_local_check() {
        let download = request(Direction::Download, "ns/p:/etc/hosts", "/nowhere/hosts");
        assert!(download.validate().is_ok());
        assert!(download.descriptor(&ConnectionFlags::default()).background);
    }

    #[test]
    fn blank_endpoints_are_incomplete() {
        let download = request(Direction::Download, "ns/p:/etc/hosts", " ");
        assert!(matches!(download.validate(), Err(TransferError::Incomplete)));
    }
}
