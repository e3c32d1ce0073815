use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ModelError;

use super::format::detect;
use super::{cli, convert, plan, sdk, ModelManager};

/// Where the resolver is in handling one request. Logged only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    NoManualPath,
    ManualPathEmpty,
    ManualPathReady,
    CacheEmpty,
    CacheReady,
    Downloading,
    Converting,
    Ready,
    Failed,
}

enum Located {
    Ready(PathBuf),
    Missing(PathBuf),
}

/// Cache folder name for a repository id: `org/name` becomes `org--name`.
pub fn download_dir_name(repo_id: &str) -> String {
    repo_id.replace('/', "--")
}

impl ModelManager {
    /// Returns a directory the runtime can load, downloading and converting
    /// as needed. Blocks for as long as the download takes.
    pub fn ensure_model_available(&self) -> Result<PathBuf, ModelError> {
        let result = self.acquire();
        if let Err(err) = &result {
            self.transition(ResolverState::Failed);
            log::error!("Model acquisition failed: {err}");
        }
        result
    }

    /// Like [`ensure_model_available`](Self::ensure_model_available) but never
    /// downloads. Fails with `NotFound` naming the folder to populate.
    pub fn resolve_existing_model_path(&self) -> Result<PathBuf, ModelError> {
        match self.locate_existing()? {
            Located::Ready(dir) => self.normalize(&dir),
            Located::Missing(target) => Err(ModelError::NotFound(target)),
        }
    }

    fn acquire(&self) -> Result<PathBuf, ModelError> {
        let target = match self.locate_existing()? {
            Located::Ready(dir) => return self.normalize(&dir),
            Located::Missing(target) => target,
        };

        self.transition(ResolverState::Downloading);
        self.reporter.info(
            &format!("Model target directory: {}", target.display()),
            true,
        );

        let downloaded = self.download(&target)?;
        self.normalize(&downloaded)
    }

    fn locate_existing(&self) -> Result<Located, ModelError> {
        if let Some(manual) = &self.identity.manual_path {
            fs::create_dir_all(manual)?;
            if detect(manual).is_ready() {
                self.transition(ResolverState::ManualPathReady);
                self.reporter.info(
                    &format!("Using manual model path: {}", manual.display()),
                    true,
                );
                return Ok(Located::Ready(manual.clone()));
            }
            self.transition(ResolverState::ManualPathEmpty);
            return Ok(Located::Missing(manual.clone()));
        }

        self.transition(ResolverState::NoManualPath);
        let target = self.download_dir();
        fs::create_dir_all(&target)?;

        if detect(&target).is_ready() {
            self.transition(ResolverState::CacheReady);
            self.reporter.info(
                &format!("Using cached model: {}", target.display()),
                true,
            );
            return Ok(Located::Ready(target));
        }

        self.transition(ResolverState::CacheEmpty);
        Ok(Located::Missing(target))
    }

    fn download(&self, target: &Path) -> Result<PathBuf, ModelError> {
        let plan = plan::plan_transfer(self.index.as_ref(), &self.identity, target, &self.reporter);

        let cli_err = match cli::download_with_cli(
            &self.runner,
            &self.entrypoints,
            &self.identity,
            target,
            plan.as_ref(),
            self.timings,
            &self.reporter,
        ) {
            Ok(path) => return Ok(path),
            Err(err @ ModelError::AllStrategiesExhausted(_)) => err,
            Err(err) => return Err(err),
        };

        self.reporter.warn(
            &format!("huggingface-cli download failed. Falling back to SDK. Error: {cli_err}"),
            true,
        );

        sdk::download_snapshot(self.sdk.as_ref(), &self.identity, target, &self.reporter).map_err(
            |sdk_err| ModelError::DownloadFailed {
                cli: cli_err.to_string(),
                sdk: sdk_err.to_string(),
            },
        )
    }

    fn normalize(&self, dir: &Path) -> Result<PathBuf, ModelError> {
        if detect(dir).is_source() {
            self.transition(ResolverState::Converting);
        }
        let ready = convert::ensure_runtime_model_format(dir, self.converter.as_ref(), &self.reporter)?;
        self.transition(ResolverState::Ready);
        Ok(ready)
    }

    fn transition(&self, state: ResolverState) {
        log::debug!(
            "model resolver [{}]: {state:?}",
            self.identity.repository_id
        );
    }
}
