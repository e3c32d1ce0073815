use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::notify::Reporter;

use super::hub::HubError;
use super::patterns::IncludePatterns;
use super::ModelIdentity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub path: String,
    pub size: u64,
}

/// Lists what a repository holds, for the dry run.
pub trait RemoteIndex: Send + Sync {
    fn list_files(&self, repo_id: &str, token: Option<&str>) -> Result<Vec<RemoteFile>, HubError>;
}

/// Expected byte size per relative path, for files that will be fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferPlan {
    files: BTreeMap<String, u64>,
}

impl TransferPlan {
    pub fn new(files: BTreeMap<String, u64>) -> Self {
        Self { files }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.values().sum()
    }

    pub fn get(&self, path: &str) -> Option<u64> {
        self.files.get(path).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.files.iter().map(|(path, size)| (path.as_str(), *size))
    }
}

impl FromIterator<(String, u64)> for TransferPlan {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Keeps included files that are not already present at full size.
pub fn build_plan(remote: &[RemoteFile], target_dir: &Path, include: &IncludePatterns) -> TransferPlan {
    remote
        .iter()
        .filter(|file| include.matches(&file.path))
        .filter(|file| {
            let local = target_dir.join(&file.path);
            let cached = fs::metadata(&local)
                .map(|m| m.is_file() && m.len() == file.size)
                .unwrap_or(false);
            !cached
        })
        .map(|file| (file.path.clone(), file.size))
        .collect()
}

/// Best effort: any failure is logged and yields `None`, and the download
/// goes ahead with elapsed-time reporting only.
pub fn plan_transfer(
    index: &dyn RemoteIndex,
    identity: &ModelIdentity,
    target_dir: &Path,
    reporter: &Reporter,
) -> Option<TransferPlan> {
    let remote = match index.list_files(&identity.repository_id, identity.access_token()) {
        Ok(remote) => remote,
        Err(err) => {
            reporter.warn(
                &format!("Could not compute download plan, progress will show elapsed time only: {err}"),
                false,
            );
            return None;
        }
    };

    let plan = build_plan(&remote, target_dir, &IncludePatterns::inference());
    if plan.is_empty() {
        reporter.info("All model files are already present locally.", false);
    } else {
        reporter.info(
            &format!(
                "Download plan: {} files, {} bytes",
                plan.len(),
                plan.total_bytes()
            ),
            false,
        );
    }
    Some(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(path: &str, size: u64) -> RemoteFile {
        RemoteFile {
            path: path.to_string(),
            size,
        }
    }

    #[test]
    fn plan_excludes_cached_and_unlisted_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("tokenizer.json"), b"short").unwrap();

        let files = vec![
            remote("config.json", 2),
            remote("tokenizer.json", 100),
            remote("model-00001-of-00001.safetensors", 4096),
            remote("README.md", 10),
        ];

        let plan = build_plan(&files, dir.path(), &IncludePatterns::inference());

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.get("tokenizer.json"), Some(100));
        assert_eq!(plan.get("model-00001-of-00001.safetensors"), Some(4096));
        assert_eq!(plan.get("config.json"), None);
        assert_eq!(plan.total_bytes(), 4196);
    }

    #[test]
    fn fully_cached_repository_gives_empty_plan() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), b"{}").unwrap();

        let plan = build_plan(&[remote("config.json", 2)], dir.path(), &IncludePatterns::inference());

        assert!(plan.is_empty());
    }
}
