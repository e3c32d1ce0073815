//! Download through the external hub CLI, trying several ways of invoking it.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::download_progress::ProgressMonitor;
use crate::error::ModelError;
use crate::notify::Reporter;

use super::format::has_required_model_files;
use super::plan::TransferPlan;
use super::{ModelIdentity, INFERENCE_ALLOW_PATTERNS, MAX_WORKERS};

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// How often the waiting thread wakes, and how often it reports elapsed
/// time when there is no plan to measure against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTimings {
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for PollTimings {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

const REDACTED: &str = "***REDACTED***";
const HF_TRANSFER_ENV: &str = "HF_HUB_ENABLE_HF_TRANSFER";

const MISSING_ENTRYPOINT_PATTERNS: &[&str] = &[
    "no module named",
    "error while finding module specification",
    "is not recognized as an internal or external command",
    "not recognized as an internal or external command",
    "no such file or directory",
    "cannot find the file specified",
    "command not found",
];

/// A way of launching the CLI: program plus any leading arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entrypoint(Vec<String>);

impl Entrypoint {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn name(&self) -> String {
        self.0.join(" ")
    }
}

/// Bundled binaries next to the running executable come first, then bare
/// command names, then module invocations through the Python runtime.
pub fn candidate_entrypoints() -> Vec<Entrypoint> {
    let mut candidates = Vec::new();

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        for name in ["hf.exe", "hf", "huggingface-cli.exe", "huggingface-cli"] {
            candidates.push(Entrypoint::new([exe_dir.join(name).display().to_string()]));
        }
    }

    candidates.push(Entrypoint::new(["hf"]));
    candidates.push(Entrypoint::new(["huggingface-cli"]));

    for python in ["python3", "python"] {
        candidates.push(Entrypoint::new([python, "-m", "huggingface_hub.cli.hf"]));
        candidates.push(Entrypoint::new([
            python,
            "-m",
            "huggingface_hub.commands.huggingface_cli",
        ]));
    }

    dedupe_entrypoints(candidates)
}

/// Drops repeats, keeping the first occurrence in place.
pub fn dedupe_entrypoints(candidates: Vec<Entrypoint>) -> Vec<Entrypoint> {
    let mut seen = std::collections::HashSet::new();
    candidates
        .into_iter()
        .filter(|candidate| !candidate.0.is_empty() && seen.insert(candidate.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CliCommand {
    /// Value following `flag` in the argument list.
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

pub fn build_cli_command(entry: &Entrypoint, identity: &ModelIdentity, target_dir: &Path) -> CliCommand {
    let (program, leading) = match entry.parts().split_first() {
        Some((program, rest)) => (program.clone(), rest.to_vec()),
        None => (String::new(), Vec::new()),
    };

    let mut args = leading;
    args.extend([
        "download".to_string(),
        identity.repository_id.clone(),
        "--local-dir".to_string(),
        target_dir.display().to_string(),
        "--max-workers".to_string(),
        MAX_WORKERS.to_string(),
        "--include".to_string(),
    ]);
    args.extend(INFERENCE_ALLOW_PATTERNS.iter().map(|p| (*p).to_string()));

    if let Some(token) = identity.access_token() {
        args.push("--token".to_string());
        args.push(token.to_string());
    }

    let mut env = Vec::new();
    if std::env::var_os(HF_TRANSFER_ENV).is_none() {
        env.push((HF_TRANSFER_ENV.to_string(), "0".to_string()));
    }

    CliCommand { program, args, env }
}

pub fn format_command_for_log(command: &CliCommand, token: Option<&str>) -> String {
    std::iter::once(command.program.as_str())
        .chain(command.args.iter().map(String::as_str))
        .map(|part| match token {
            Some(token) if part == token => REDACTED,
            _ => part,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when CLI output says the entrypoint itself is missing rather than
/// the download having failed.
pub fn looks_like_missing_entrypoint(message: &str) -> bool {
    let lowered = message.to_lowercase();
    MISSING_ENTRYPOINT_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn details(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        if !stderr.is_empty() {
            stderr.to_string()
        } else if !stdout.is_empty() {
            stdout.to_string()
        } else {
            "No output.".to_string()
        }
    }

    fn code_label(&self) -> String {
        match self.code {
            Some(code) => code.to_string(),
            None => "none (terminated by signal)".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("{0}")]
    NotFound(String),

    #[error("failed to run: {0}")]
    Io(#[from] io::Error),

    #[error("download worker stopped without a result")]
    WorkerLost,
}

pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &CliCommand) -> Result<ProcessOutput, RunError>;
}

/// Runs commands as real child processes with captured output.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &CliCommand) -> Result<ProcessOutput, RunError> {
        let output = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .output()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => RunError::NotFound(err.to_string()),
                _ => RunError::Io(err),
            })?;

        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Tries each entrypoint in order. Soft failures move on to the next one;
/// a hard failure ends the chain. Returns `AllStrategiesExhausted` when every
/// candidate was unavailable.
///
/// One progress monitor spans the whole chain. Its final sample is emitted
/// once, after the attempt that decided the outcome.
pub(crate) fn download_with_cli(
    runner: &Arc<dyn CommandRunner>,
    entrypoints: &[Entrypoint],
    identity: &ModelIdentity,
    target_dir: &Path,
    plan: Option<&TransferPlan>,
    timings: PollTimings,
    reporter: &Reporter,
) -> Result<PathBuf, ModelError> {
    reporter.info("Starting Hugging Face CLI download...", true);

    let mut monitor = plan
        .map(|plan| ProgressMonitor::new(plan, target_dir, Instant::now()))
        .filter(|monitor| !monitor.is_inert());

    let session = Session {
        runner,
        identity,
        target_dir,
        timings,
        reporter,
    };

    let mut entrypoint_errors = Vec::new();
    for entry in entrypoints {
        match session.attempt(entry, monitor.as_mut()) {
            Err(ModelError::EntrypointUnavailable(message)) => {
                reporter.warn(&message, false);
                entrypoint_errors.push(message);
            }
            outcome => {
                if let Some(sample) = monitor.as_mut().and_then(|m| m.finish(Instant::now())) {
                    reporter.info(&sample.describe(), true);
                }
                return outcome;
            }
        }
    }

    Err(ModelError::AllStrategiesExhausted(entrypoint_errors))
}

struct Session<'a> {
    runner: &'a Arc<dyn CommandRunner>,
    identity: &'a ModelIdentity,
    target_dir: &'a Path,
    timings: PollTimings,
    reporter: &'a Reporter,
}

impl Session<'_> {
    fn attempt(
        &self,
        entry: &Entrypoint,
        monitor: Option<&mut ProgressMonitor<'_>>,
    ) -> Result<PathBuf, ModelError> {
        let (identity, target_dir, reporter) = (self.identity, self.target_dir, self.reporter);
        let name = entry.name();
        let command = build_cli_command(entry, identity, target_dir);

        reporter.info(&format!("Trying CLI entrypoint: {name}"), true);
        reporter.info(
            &format!(
                "CLI command: {}",
                format_command_for_log(&command, identity.access_token())
            ),
            false,
        );

        let output = match self.run_with_progress(&command, monitor) {
            Ok(output) => output,
            Err(RunError::NotFound(details)) => {
                return Err(ModelError::EntrypointUnavailable(format!(
                    "{name}: not found ({details})"
                )));
            }
            Err(err) => {
                return Err(ModelError::StrategyHardFailure {
                    entrypoint: name,
                    details: err.to_string(),
                });
            }
        };

        let stdout = output.stdout.trim();
        let stderr = output.stderr.trim();
        if !stdout.is_empty() {
            log::info!("CLI stdout:\n{stdout}");
        }
        if !stderr.is_empty() {
            log::warn!("CLI stderr:\n{stderr}");
        }
        reporter.info(
            &format!("{name} finished with return code {}", output.code_label()),
            true,
        );

        if output.success() {
            // A zero exit alone does not prove the files arrived.
            if !has_required_model_files(target_dir) {
                return Err(ModelError::StrategyHardFailure {
                    entrypoint: name,
                    details: "finished but required model files are missing.".to_string(),
                });
            }
            reporter.info(
                &format!("Required model files detected in: {}", target_dir.display()),
                true,
            );
            return Ok(target_dir.to_path_buf());
        }

        let details = output.details();
        if looks_like_missing_entrypoint(&details) {
            return Err(ModelError::EntrypointUnavailable(format!(
                "{name}: unavailable ({details})"
            )));
        }

        Err(ModelError::StrategyHardFailure {
            entrypoint: name,
            details,
        })
    }

    /// Runs `command` on a worker thread while this thread polls for completion,
    /// sampling progress (or emitting heartbeats without a plan) on every wake.
    fn run_with_progress(
        &self,
        command: &CliCommand,
        mut monitor: Option<&mut ProgressMonitor<'_>>,
    ) -> Result<ProcessOutput, RunError> {
        let reporter = self.reporter;
        let (tx, rx) = mpsc::channel();
        let worker_runner = Arc::clone(self.runner);
        let worker_command = command.clone();

        let worker = thread::Builder::new()
            .name("model-download".to_string())
            .spawn(move || {
                let _ = tx.send(worker_runner.run(&worker_command));
            })?;

        let started = Instant::now();
        let mut last_heartbeat = started;

        let result = loop {
            match rx.recv_timeout(self.timings.poll_interval) {
                Ok(result) => break result,
                Err(RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    match monitor.as_deref_mut() {
                        Some(monitor) => {
                            if let Some(sample) = monitor.poll(now) {
                                reporter.info(&sample.describe(), true);
                            }
                        }
                        None => {
                            if now.duration_since(last_heartbeat) >= self.timings.heartbeat_interval {
                                last_heartbeat = now;
                                reporter.info(
                                    &format!(
                                        "huggingface-cli still running... elapsed {}s",
                                        now.duration_since(started).as_secs()
                                    ),
                                    true,
                                );
                            }
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break Err(RunError::WorkerLost),
            }
        };

        if worker.join().is_err() {
            log::error!("Download worker panicked");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_entrypoint_messages_are_soft() {
        assert!(looks_like_missing_entrypoint(
            "/usr/bin/python3: No module named huggingface_hub.cli"
        ));
        assert!(looks_like_missing_entrypoint(
            "Error while finding module specification for 'huggingface_hub.cli.hf'"
        ));
        assert!(looks_like_missing_entrypoint(
            "'hf' is not recognized as an internal or external command"
        ));
        assert!(looks_like_missing_entrypoint("The system cannot find the file specified."));
        assert!(looks_like_missing_entrypoint("hf: No such file or directory"));
    }

    #[test]
    fn real_download_errors_are_hard() {
        assert!(!looks_like_missing_entrypoint("401 Client Error: Unauthorized"));
        assert!(!looks_like_missing_entrypoint("Repository Not Found for url"));
        assert!(!looks_like_missing_entrypoint("No output."));
    }

    #[test]
    fn details_prefer_stderr() {
        let output = ProcessOutput {
            code: Some(1),
            stdout: "out".to_string(),
            stderr: "  err \n".to_string(),
        };
        assert_eq!(output.details(), "err");
        assert_eq!(ProcessOutput::default().details(), "No output.");
    }
}
