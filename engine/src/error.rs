use std::path::PathBuf;

use thiserror::Error;

use crate::settings::SettingsError;

/// Unified app errors.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Model: {0}")]
    Model(#[from] ModelError),

    #[error("Settings: {0}")]
    Settings(#[from] SettingsError),
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Failures of model acquisition and format normalization.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error(
        "Downloaded model is in Transformers format and must be converted before it can be loaded.\nMissing dependencies for conversion: {}\nInstall and retry: {install_hint}",
        .missing.join(", ")
    )]
    MissingDependency {
        missing: Vec<String>,
        install_hint: String,
    },

    #[error("Conversion finished but model.bin was not created in {}", .0.display())]
    ConversionIncomplete(PathBuf),

    #[error("Failed to convert model to native format. Details: {0}")]
    ConversionFailed(String),

    /// Soft failure of a single CLI entrypoint; the strategy chain moves on.
    #[error("{0}")]
    EntrypointUnavailable(String),

    #[error("{entrypoint} failed: {details}")]
    StrategyHardFailure { entrypoint: String, details: String },

    #[error("No compatible Hugging Face CLI entrypoint worked.\nDetails:\n{}", .0.join("\n"))]
    AllStrategiesExhausted(Vec<String>),

    #[error(
        "Model download failed with both the Hugging Face CLI and the SDK fallback.\nCLI error: {cli}\nSDK error: {sdk}"
    )]
    DownloadFailed { cli: String, sdk: String },

    #[error("No ready model found. Place a model in {} or enable downloading", .0.display())]
    NotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModelError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MissingDependency { .. } => {
                "The model needs a one-time conversion, but the conversion tools are not installed."
            }
            Self::ConversionIncomplete(_) | Self::ConversionFailed(_) => {
                "The speech model could not be converted. Check the log and the model folder."
            }
            Self::EntrypointUnavailable(_) | Self::AllStrategiesExhausted(_) => {
                "No download tool was available. Install the Hugging Face CLI and try again."
            }
            Self::StrategyHardFailure { .. } | Self::DownloadFailed { .. } => {
                "Could not download the speech model. Check your internet connection and try again."
            }
            Self::NotFound(_) => {
                "Speech model files are missing. Download the model or choose a model folder."
            }
            Self::Io(_) => {
                "The app could not read or write its local files. Check disk space and permissions."
            }
        }
    }
}

impl serde::Serialize for ModelError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_error_user_messages() {
        let errors = [
            ModelError::MissingDependency {
                missing: vec!["torch".to_string()],
                install_hint: "pip install torch".to_string(),
            },
            ModelError::ConversionIncomplete(PathBuf::from("/m/native")),
            ModelError::ConversionFailed("boom".to_string()),
            ModelError::EntrypointUnavailable("hf: not found".to_string()),
            ModelError::StrategyHardFailure {
                entrypoint: "hf".to_string(),
                details: "401".to_string(),
            },
            ModelError::AllStrategiesExhausted(vec![]),
            ModelError::DownloadFailed {
                cli: "a".to_string(),
                sdk: "b".to_string(),
            },
            ModelError::NotFound(PathBuf::from("/m")),
            ModelError::Io(std::io::Error::other("disk")),
        ];
        for err in &errors {
            assert!(!err.user_message().is_empty());
        }
    }

    #[test]
    fn not_found_names_the_folder() {
        let err = ModelError::NotFound(PathBuf::from("/models/syvai--hviske-v2"));
        assert!(err.to_string().contains("/models/syvai--hviske-v2"));
    }
}
