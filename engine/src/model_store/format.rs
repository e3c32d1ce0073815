use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use super::patterns::IncludePatterns;

/// Weights file of the native runtime; also the conversion completion marker.
pub const NATIVE_MARKER: &str = "model.bin";
pub const CONFIG_MANIFEST: &str = "config.json";
pub const SHARD_INDEX: &str = "model.safetensors.index.json";
pub const SHARD_PATTERN: &str = "model-*.safetensors";

static SHARD_FILES: LazyLock<IncludePatterns> =
    LazyLock::new(|| IncludePatterns::new(&[SHARD_PATTERN]));
pub const SINGLE_WEIGHTS: &str = "model.safetensors";
pub const NATIVE_SUBDIR: &str = "native";

// Bookkeeping the hub CLI leaves behind in a local dir.
const HUB_CACHE_DIR: &str = ".cache";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelDirectoryState {
    Empty,
    PartialDownload,
    CompleteSourceFormat,
    CompleteNativeFormat,
    IncompleteConversion,
}

impl ModelDirectoryState {
    /// Native, or convertible into native without fetching anything.
    pub fn is_ready(self) -> bool {
        matches!(
            self,
            Self::CompleteNativeFormat | Self::CompleteSourceFormat | Self::IncompleteConversion
        )
    }

    pub fn is_source(self) -> bool {
        matches!(self, Self::CompleteSourceFormat | Self::IncompleteConversion)
    }
}

/// Classifies `dir` from file presence alone. Never cached.
pub fn detect(dir: &Path) -> ModelDirectoryState {
    if is_native_model(dir) {
        return ModelDirectoryState::CompleteNativeFormat;
    }

    if looks_like_source_model(dir) {
        let native = dir.join(NATIVE_SUBDIR);
        if native.exists() && !is_native_model(&native) {
            return ModelDirectoryState::IncompleteConversion;
        }
        return ModelDirectoryState::CompleteSourceFormat;
    }

    if has_visible_entries(dir) {
        ModelDirectoryState::PartialDownload
    } else {
        ModelDirectoryState::Empty
    }
}

pub fn is_native_model(dir: &Path) -> bool {
    dir.join(NATIVE_MARKER).is_file()
}

/// What a finished CLI download must contain: the config plus the shard
/// index or at least one shard.
pub fn has_required_model_files(dir: &Path) -> bool {
    if !dir.join(CONFIG_MANIFEST).is_file() {
        return false;
    }
    dir.join(SHARD_INDEX).is_file() || has_shard_files(dir)
}

pub fn looks_like_source_model(dir: &Path) -> bool {
    has_required_model_files(dir)
        || (dir.join(CONFIG_MANIFEST).is_file() && dir.join(SINGLE_WEIGHTS).is_file())
}

fn has_shard_files(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };

    entries.filter_map(Result::ok).any(|entry| {
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        is_file && SHARD_FILES.matches(&entry.file_name().to_string_lossy())
    })
}

fn has_visible_entries(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };

    entries
        .filter_map(Result::ok)
        .any(|entry| entry.file_name() != HUB_CACHE_DIR)
}
