//! Minimal blocking client for the model hub's HTTP API.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use super::patterns::IncludePatterns;
use super::plan::{RemoteFile, RemoteIndex};
use super::sdk::{SdkError, SnapshotDownloader, SnapshotRequest};

const REVISION: &str = "main";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("{url}: request failed: {message}")]
    Request { url: String, message: String },

    #[error("{url}: unexpected status {status}")]
    Status { url: String, status: StatusCode },

    #[error("{url}: server rejected resume request")]
    RangeNotSatisfiable { url: String },

    #[error("{url}: invalid response: {message}")]
    InvalidResponse { url: String, message: String },

    #[error("Incomplete download of {url}: expected {expected} bytes, got {actual}")]
    Incomplete {
        url: String,
        expected: u64,
        actual: u64,
    },

    #[error("HTTP client unavailable: {0}")]
    Client(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct HubClient {
    endpoint: String,
    client: Client,
}

impl HubClient {
    /// Weight downloads can run far longer than any fixed timeout, so only
    /// connecting and API calls are bounded.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, HubError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| HubError::Client(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_env() -> Result<Self, HubError> {
        Self::new(crate::settings::hub_endpoint())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn tree_url(&self, repo_id: &str) -> String {
        format!(
            "{}/api/models/{repo_id}/tree/{REVISION}?recursive=true",
            self.endpoint
        )
    }

    fn file_url(&self, repo_id: &str, path: &str) -> String {
        format!("{}/{repo_id}/resolve/{REVISION}/{path}", self.endpoint)
    }

    fn authorized(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        match token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    fn list_tree(&self, repo_id: &str, token: Option<&str>) -> Result<Vec<RemoteFile>, HubError> {
        let url = self.tree_url(repo_id);
        let request = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS));
        let response = Self::authorized(request, token)
            .send()
            .map_err(|e| HubError::Request {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HubError::Status { url, status });
        }

        let body = response.text().map_err(|e| HubError::Request {
            url: url.clone(),
            message: e.to_string(),
        })?;
        let entries: Vec<TreeEntry> =
            serde_json::from_str(&body).map_err(|e| HubError::InvalidResponse {
                url: url.clone(),
                message: e.to_string(),
            })?;

        Ok(entries
            .into_iter()
            .filter(|entry| entry.kind == "file")
            .map(|entry| RemoteFile {
                path: entry.path,
                size: entry.size.unwrap_or(0),
            })
            .collect())
    }

    /// Fetches one file through a `.download` temp file. With `resume`, an
    /// existing temp file is continued with a `Range` request.
    pub fn download_file(
        &self,
        repo_id: &str,
        path: &str,
        token: Option<&str>,
        dest: &Path,
        resume: bool,
    ) -> Result<(), HubError> {
        let url = self.file_url(repo_id, path);
        let tmp = dest.with_extension("download");

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let current_len = if resume && tmp.exists() {
            fs::metadata(&tmp).map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };

        let mut request = Self::authorized(self.client.get(&url), token);
        if current_len > 0 {
            request = request.header(RANGE, format!("bytes={current_len}-"));
        }

        let response = request.send().map_err(|e| HubError::Request {
            url: url.clone(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Err(HubError::RangeNotSatisfiable { url });
        }
        if !status.is_success() {
            return Err(HubError::Status { url, status });
        }

        let partial = status == StatusCode::PARTIAL_CONTENT;
        let body_len = content_length(&response);
        let total_size = if partial {
            current_len + body_len
        } else {
            body_len
        };

        let mut file = if partial {
            log::debug!("Resuming download of {path} from byte {current_len}");
            fs::OpenOptions::new().create(true).append(true).open(&tmp)?
        } else {
            if current_len > 0 {
                log::warn!(
                    "Server does not support resuming {path} (status {status}), restarting download."
                );
            }
            fs::File::create(&tmp)?
        };

        let mut downloaded = if partial { current_len } else { 0 };
        let mut buffer = [0; 8192];
        let mut reader = response;

        loop {
            let bytes_read = reader.read(&mut buffer).map_err(|e| HubError::Request {
                url: url.clone(),
                message: format!("read failed: {e}"),
            })?;

            if bytes_read == 0 {
                break;
            }

            file.write_all(&buffer[..bytes_read])?;
            downloaded += bytes_read as u64;
        }

        if total_size > 0 && downloaded != total_size {
            return Err(HubError::Incomplete {
                url,
                expected: total_size,
                actual: downloaded,
            });
        }

        fs::rename(&tmp, dest)?;
        Ok(())
    }
}

fn content_length(response: &Response) -> u64 {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .or_else(|| response.content_length())
        .unwrap_or(0)
}

impl RemoteIndex for HubClient {
    fn list_files(&self, repo_id: &str, token: Option<&str>) -> Result<Vec<RemoteFile>, HubError> {
        self.list_tree(repo_id, token)
    }
}

impl SnapshotDownloader for HubClient {
    fn snapshot_download(&self, request: &SnapshotRequest) -> Result<PathBuf, SdkError> {
        if request.local_files_only {
            return Ok(request.local_dir.clone());
        }

        let include = IncludePatterns::new(&request.allow_patterns);
        let files: Vec<RemoteFile> = self
            .list_tree(&request.repo_id, request.token.as_deref())
            .map_err(|e| SdkError::Failed(e.to_string()))?
            .into_iter()
            .filter(|file| include.matches(&file.path))
            .collect();

        fs::create_dir_all(&request.local_dir).map_err(|e| SdkError::Failed(e.to_string()))?;

        let resume = request.resume_download.unwrap_or(false);
        let workers = request.max_workers.max(1).min(files.len().max(1));
        let queue = Mutex::new(files.iter());

        let failures: Vec<HubError> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        let mut errors = Vec::new();
                        loop {
                            let next = match queue.lock() {
                                Ok(mut guard) => guard.next(),
                                Err(_) => None,
                            };
                            let Some(file) = next else { break };

                            let dest = request.local_dir.join(&file.path);
                            if dest.is_file()
                                && fs::metadata(&dest).map(|m| m.len()).ok() == Some(file.size)
                            {
                                continue;
                            }

                            if let Err(err) = self.download_file(
                                &request.repo_id,
                                &file.path,
                                request.token.as_deref(),
                                &dest,
                                resume,
                            ) {
                                errors.push(err);
                            }
                        }
                        errors
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        vec![HubError::Io(std::io::Error::other("download worker panicked"))]
                    })
                })
                .collect()
        });

        if let Some(rejected) = failures
            .iter()
            .find(|err| matches!(err, HubError::RangeNotSatisfiable { .. }))
        {
            return Err(SdkError::UnsupportedArguments(rejected.to_string()));
        }

        if !failures.is_empty() {
            let joined = failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n");
            return Err(SdkError::Failed(joined));
        }

        Ok(request.local_dir.clone())
    }
}

/// Stands in for the hub when no HTTP client could be built, so the CLI
/// chain still runs and the fallback reports why it could not.
#[derive(Debug, Clone)]
pub struct UnavailableHub {
    reason: String,
}

impl UnavailableHub {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl RemoteIndex for UnavailableHub {
    fn list_files(&self, _repo_id: &str, _token: Option<&str>) -> Result<Vec<RemoteFile>, HubError> {
        Err(HubError::Client(self.reason.clone()))
    }
}

impl SnapshotDownloader for UnavailableHub {
    fn snapshot_download(&self, _request: &SnapshotRequest) -> Result<PathBuf, SdkError> {
        Err(SdkError::Failed(
            HubError::Client(self.reason.clone()).to_string(),
        ))
    }
}
