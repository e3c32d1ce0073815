use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::ModelError;
use crate::notify::Reporter;

use super::format::{detect, is_native_model, ModelDirectoryState, NATIVE_SUBDIR};

/// Auxiliary files shipped next to the converted weights so the runtime
/// can load the folder on its own.
pub const CONVERTER_COPY_FILES: &[&str] = &[
    "tokenizer.json",
    "tokenizer_config.json",
    "vocab.json",
    "merges.txt",
    "normalizer.json",
    "added_tokens.json",
    "preprocessor_config.json",
    "generation_config.json",
];

/// Converted weights are always stored in half precision.
pub const OUTPUT_QUANTIZATION: &str = "float16";

const CONVERTER_PROGRAM: &str = "ct2-transformers-converter";
const PYTHON_CANDIDATES: &[&str] = &["python3", "python"];
const CONVERSION_MODULES: &[&str] = &["transformers", "torch"];
const INSTALL_HINT: &str = "pip install ctranslate2 transformers torch";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub source: PathBuf,
    pub output: PathBuf,
    pub copy_files: Vec<String>,
    pub quantization: &'static str,
    pub load_as_float16: bool,
}

pub trait Converter: Send + Sync {
    /// Names of whatever the conversion needs but cannot find.
    fn missing_dependencies(&self) -> Vec<String>;

    fn install_hint(&self) -> String;

    fn convert(&self, job: &ConversionJob) -> Result<(), String>;
}

/// Converts with the CTranslate2 converter script.
#[derive(Debug, Clone)]
pub struct Ct2Converter {
    program: String,
}

impl Default for Ct2Converter {
    fn default() -> Self {
        Self {
            program: CONVERTER_PROGRAM.to_string(),
        }
    }
}

impl Ct2Converter {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Converter for Ct2Converter {
    fn missing_dependencies(&self) -> Vec<String> {
        let mut missing = Vec::new();

        if which::which(&self.program).is_err() {
            missing.push(format!("ctranslate2 ({})", self.program));
        }

        let python = PYTHON_CANDIDATES
            .iter()
            .find_map(|name| which::which(name).ok());

        match python {
            Some(python) => {
                for module in CONVERSION_MODULES {
                    let importable = Command::new(&python)
                        .arg("-c")
                        .arg(format!("import {module}"))
                        .output()
                        .map(|out| out.status.success())
                        .unwrap_or(false);
                    if !importable {
                        missing.push((*module).to_string());
                    }
                }
            }
            None => missing.push("python".to_string()),
        }

        missing
    }

    fn install_hint(&self) -> String {
        INSTALL_HINT.to_string()
    }

    fn convert(&self, job: &ConversionJob) -> Result<(), String> {
        let mut command = Command::new(&self.program);
        command
            .arg("--model")
            .arg(&job.source)
            .arg("--output_dir")
            .arg(&job.output)
            .arg("--quantization")
            .arg(job.quantization)
            .arg("--force");
        if job.load_as_float16 {
            command.arg("--load_as_float16");
        }
        if !job.copy_files.is_empty() {
            command.arg("--copy_files").args(&job.copy_files);
        }

        let output = command
            .output()
            .map_err(|e| format!("{}: {e}", self.program))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let details = if !stderr.is_empty() {
            stderr
        } else if !stdout.is_empty() {
            stdout
        } else {
            format!("{} exited with {}", self.program, output.status)
        };
        Err(details)
    }
}

/// Returns a directory the native runtime can load: `model_dir` itself when
/// already native, `model_dir/native` when it had to be converted, or the
/// untouched `model_dir` (with a warning) when it is unrecognized.
pub fn ensure_runtime_model_format(
    model_dir: &Path,
    converter: &dyn Converter,
    reporter: &Reporter,
) -> Result<PathBuf, ModelError> {
    let state = detect(model_dir);
    if state == ModelDirectoryState::CompleteNativeFormat {
        reporter.info(
            &format!("CTranslate2 model detected: {}", model_dir.display()),
            false,
        );
        return Ok(model_dir.to_path_buf());
    }

    if !state.is_source() {
        reporter.warn(
            &format!(
                "Model folder does not look like either CTranslate2 or Transformers Whisper: {}",
                model_dir.display()
            ),
            true,
        );
        return Ok(model_dir.to_path_buf());
    }

    let converted_dir = model_dir.join(NATIVE_SUBDIR);
    if is_native_model(&converted_dir) {
        reporter.info(
            &format!(
                "Using cached converted CTranslate2 model: {}",
                converted_dir.display()
            ),
            true,
        );
        return Ok(converted_dir);
    }

    let missing = converter.missing_dependencies();
    if !missing.is_empty() {
        return Err(ModelError::MissingDependency {
            missing,
            install_hint: converter.install_hint(),
        });
    }

    reporter.info(
        &format!(
            "Transformers model detected. Starting one-time conversion to CTranslate2 in: {}",
            converted_dir.display()
        ),
        true,
    );

    if converted_dir.exists() {
        reporter.warn(
            &format!(
                "Found existing incomplete conversion directory. Resetting: {}",
                converted_dir.display()
            ),
            true,
        );
        fs::remove_dir_all(&converted_dir)?;
    }
    fs::create_dir_all(&converted_dir)?;

    let job = ConversionJob {
        source: model_dir.to_path_buf(),
        output: converted_dir.clone(),
        copy_files: present_copy_files(model_dir),
        quantization: OUTPUT_QUANTIZATION,
        load_as_float16: true,
    };
    converter.convert(&job).map_err(ModelError::ConversionFailed)?;

    if !is_native_model(&converted_dir) {
        return Err(ModelError::ConversionIncomplete(converted_dir));
    }

    reporter.info(
        &format!(
            "CTranslate2 conversion completed successfully: {}",
            converted_dir.display()
        ),
        true,
    );
    Ok(converted_dir)
}

// The converter aborts on a listed file that does not exist.
fn present_copy_files(model_dir: &Path) -> Vec<String> {
    CONVERTER_COPY_FILES
        .iter()
        .filter(|name| model_dir.join(name).is_file())
        .map(|name| (*name).to_string())
        .collect()
}
