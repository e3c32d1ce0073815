use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::notify::Reporter;

use super::{ModelIdentity, INFERENCE_ALLOW_PATTERNS, MAX_WORKERS};

const ETAG_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum SdkError {
    /// The downloader does not accept part of the argument set.
    #[error("unsupported download arguments: {0}")]
    UnsupportedArguments(String),

    #[error("{0}")]
    Failed(String),
}

/// Arguments of an in-process snapshot download. Optional fields are left
/// out of the reduced, compatible argument set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    pub repo_id: String,
    pub local_dir: PathBuf,
    pub local_files_only: bool,
    pub token: Option<String>,
    /// Bound on per-file metadata lookups. `HubClient` lists the whole tree
    /// in one API call under its own request timeout instead.
    pub etag_timeout: Duration,
    pub max_workers: usize,
    pub allow_patterns: Vec<String>,
    pub resume_download: Option<bool>,
    pub local_dir_use_symlinks: Option<bool>,
}

impl SnapshotRequest {
    pub fn full(identity: &ModelIdentity, local_dir: &Path) -> Self {
        Self {
            repo_id: identity.repository_id.clone(),
            local_dir: local_dir.to_path_buf(),
            local_files_only: false,
            token: identity.access_token().map(str::to_string),
            etag_timeout: Duration::from_secs(ETAG_TIMEOUT_SECS),
            max_workers: MAX_WORKERS,
            allow_patterns: INFERENCE_ALLOW_PATTERNS
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            resume_download: Some(true),
            local_dir_use_symlinks: Some(false),
        }
    }

    pub fn compatible(&self) -> Self {
        Self {
            resume_download: None,
            local_dir_use_symlinks: None,
            ..self.clone()
        }
    }
}

pub trait SnapshotDownloader: Send + Sync {
    fn snapshot_download(&self, request: &SnapshotRequest) -> Result<PathBuf, SdkError>;
}

/// Retries once with the compatible argument set when the downloader
/// rejects the full one.
pub fn download_snapshot(
    sdk: &dyn SnapshotDownloader,
    identity: &ModelIdentity,
    target_dir: &Path,
    reporter: &Reporter,
) -> Result<PathBuf, SdkError> {
    reporter.info(
        &format!("Starting SDK fallback download to: {}", target_dir.display()),
        true,
    );

    let request = SnapshotRequest::full(identity, target_dir);
    match sdk.snapshot_download(&request) {
        Ok(path) => {
            reporter.info("SDK fallback download completed.", true);
            Ok(path)
        }
        Err(SdkError::UnsupportedArguments(details)) => {
            log::warn!("SDK rejected download arguments ({details}); retrying with compatible set");
            let path = sdk.snapshot_download(&request.compatible())?;
            reporter.info(
                "SDK fallback download completed with compatibility args.",
                true,
            );
            Ok(path)
        }
        Err(err) => Err(err),
    }
}
