pub mod cli;
pub mod convert;
pub mod format;
pub mod hub;
mod paths;
pub mod patterns;
pub mod plan;
pub mod sdk;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::notify::{Notify, Reporter};

pub use cli::{CommandRunner, Entrypoint, PollTimings, SystemRunner};
pub use convert::{Converter, Ct2Converter};
pub use format::{detect, ModelDirectoryState};
pub use hub::{HubClient, UnavailableHub};
pub use paths::{download_dir_name, ResolverState};
pub use plan::{RemoteIndex, TransferPlan};
pub use sdk::SnapshotDownloader;

/// Files fetched from the hub: configs, tokenizer artifacts and sharded
/// weights. Anything else in the repository is not needed for inference.
pub const INFERENCE_ALLOW_PATTERNS: &[&str] = &[
    "config.json",
    "generation_config.json",
    "preprocessor_config.json",
    "model.safetensors.index.json",
    "model-*.safetensors",
    "tokenizer.json",
    "tokenizer_config.json",
    "vocab.json",
    "merges.txt",
    "added_tokens.json",
    "normalizer.json",
];

const MAX_WORKERS: usize = 4;

/// What to fetch and where. Fixed for the duration of one acquisition.
#[derive(Clone, PartialEq, Eq)]
pub struct ModelIdentity {
    pub repository_id: String,
    pub cache_root: PathBuf,
    pub manual_path: Option<PathBuf>,
    access_token: Option<String>,
}

impl ModelIdentity {
    pub fn new(repository_id: impl Into<String>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            repository_id: repository_id.into(),
            cache_root: cache_root.into(),
            manual_path: None,
            access_token: None,
        }
    }

    pub fn with_manual_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.manual_path = Some(path.into());
        self
    }

    /// Blank tokens are treated as absent.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.access_token = if token.trim().is_empty() {
            None
        } else {
            Some(token)
        };
        self
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }
}

impl fmt::Debug for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelIdentity")
            .field("repository_id", &self.repository_id)
            .field("cache_root", &self.cache_root)
            .field("manual_path", &self.manual_path)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Entry point for getting a loadable model directory.
///
/// Every collaborator that touches the outside world (processes, the hub,
/// the converter, the UI) is injectable so hosts and tests can swap them.
pub struct ModelManager {
    identity: ModelIdentity,
    reporter: Reporter,
    runner: Arc<dyn CommandRunner>,
    entrypoints: Vec<Entrypoint>,
    index: Arc<dyn RemoteIndex>,
    sdk: Arc<dyn SnapshotDownloader>,
    converter: Arc<dyn Converter>,
    timings: PollTimings,
}

impl ModelManager {
    pub fn new(identity: ModelIdentity) -> Self {
        let (index, sdk): (Arc<dyn RemoteIndex>, Arc<dyn SnapshotDownloader>) =
            match HubClient::from_env() {
                Ok(hub) => {
                    let hub = Arc::new(hub);
                    (hub.clone(), hub)
                }
                Err(err) => {
                    log::error!("Hub client unavailable, only the CLI can download: {err}");
                    let hub = Arc::new(UnavailableHub::new(err.to_string()));
                    (hub.clone(), hub)
                }
            };
        Self {
            identity,
            reporter: Reporter::default(),
            runner: Arc::new(SystemRunner),
            entrypoints: cli::candidate_entrypoints(),
            index,
            sdk,
            converter: Arc::new(Ct2Converter::default()),
            timings: PollTimings::default(),
        }
    }

    pub fn with_notifier(mut self, hook: Arc<dyn Notify>) -> Self {
        self.reporter = Reporter::new(Some(hook));
        self
    }

    pub fn with_command_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_entrypoints(mut self, entrypoints: Vec<Entrypoint>) -> Self {
        self.entrypoints = cli::dedupe_entrypoints(entrypoints);
        self
    }

    pub fn with_remote_index(mut self, index: Arc<dyn RemoteIndex>) -> Self {
        self.index = index;
        self
    }

    pub fn with_snapshot_downloader(mut self, sdk: Arc<dyn SnapshotDownloader>) -> Self {
        self.sdk = sdk;
        self
    }

    pub fn with_converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_poll_timings(mut self, timings: PollTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn identity(&self) -> &ModelIdentity {
        &self.identity
    }

    pub fn entrypoints(&self) -> &[Entrypoint] {
        &self.entrypoints
    }

    /// Cache directory used when no manual path is configured.
    pub fn download_dir(&self) -> PathBuf {
        self.identity
            .cache_root
            .join(download_dir_name(&self.identity.repository_id))
    }
}
