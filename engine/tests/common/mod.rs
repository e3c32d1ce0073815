#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use sludre_lib::model_store::cli::{CliCommand, CommandRunner, ProcessOutput, RunError};
use sludre_lib::model_store::convert::{ConversionJob, Converter};
use sludre_lib::model_store::hub::HubError;
use sludre_lib::model_store::plan::{RemoteFile, RemoteIndex};
use sludre_lib::model_store::sdk::{SdkError, SnapshotDownloader, SnapshotRequest};
use sludre_lib::model_store::{Entrypoint, ModelIdentity, ModelManager, PollTimings};

pub const REPO_ID: &str = "syvai/hviske-v2";
pub const TOKEN: &str = "test-token";

pub fn write_source_model(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("config.json"), "{}").unwrap();
    fs::write(dir.join("model.safetensors.index.json"), "{}").unwrap();
}

pub fn write_native_model(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("model.bin"), b"ok").unwrap();
}

pub const SHARD_NAME: &str = "model-00001-of-00001.safetensors";
pub const SHARD_SIZE: usize = 1000;

/// What the fake CLI does on one invocation.
#[derive(Debug, Clone)]
pub enum Step {
    NotFound,
    Exit { code: i32, stderr: String },
    Download,
    ExitZeroWithoutFiles,
    /// Writes the config and half the shard, waits, then finishes the shard.
    Trickle { delay: Duration },
}

impl Step {
    pub fn exit(code: i32, stderr: &str) -> Self {
        Self::Exit {
            code,
            stderr: stderr.to_string(),
        }
    }
}

#[derive(Default)]
pub struct ScriptedRunner {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<CliCommand>>,
}

impl ScriptedRunner {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<CliCommand> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &CliCommand) -> Result<ProcessOutput, RunError> {
        self.calls.lock().unwrap().push(command.clone());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::NotFound);

        match step {
            Step::NotFound => Err(RunError::NotFound(format!(
                "{}: No such file or directory (os error 2)",
                command.program
            ))),
            Step::Exit { code, stderr } => Ok(ProcessOutput {
                code: Some(code),
                stdout: String::new(),
                stderr,
            }),
            Step::Download => {
                let target = PathBuf::from(command.arg_after("--local-dir").unwrap());
                write_source_model(&target);
                write_native_model(&target);
                Ok(ProcessOutput {
                    code: Some(0),
                    ..ProcessOutput::default()
                })
            }
            Step::ExitZeroWithoutFiles => Ok(ProcessOutput {
                code: Some(0),
                ..ProcessOutput::default()
            }),
            Step::Trickle { delay } => {
                let target = PathBuf::from(command.arg_after("--local-dir").unwrap());
                fs::create_dir_all(&target).unwrap();
                fs::write(target.join("config.json"), "{}").unwrap();
                fs::write(target.join(SHARD_NAME), vec![0u8; SHARD_SIZE / 2]).unwrap();
                thread::sleep(delay);
                fs::write(target.join(SHARD_NAME), vec![0u8; SHARD_SIZE]).unwrap();
                write_native_model(&target);
                Ok(ProcessOutput {
                    code: Some(0),
                    ..ProcessOutput::default()
                })
            }
        }
    }
}

pub struct OfflineIndex;

impl RemoteIndex for OfflineIndex {
    fn list_files(&self, repo_id: &str, _token: Option<&str>) -> Result<Vec<RemoteFile>, HubError> {
        Err(HubError::Request {
            url: format!("https://hub.invalid/api/models/{repo_id}"),
            message: "offline".to_string(),
        })
    }
}

/// Lists the config and a single shard, as the hub tree API would.
pub struct SizedIndex;

impl RemoteIndex for SizedIndex {
    fn list_files(&self, _repo_id: &str, _token: Option<&str>) -> Result<Vec<RemoteFile>, HubError> {
        Ok(vec![
            RemoteFile {
                path: "config.json".to_string(),
                size: 2,
            },
            RemoteFile {
                path: SHARD_NAME.to_string(),
                size: SHARD_SIZE as u64,
            },
            RemoteFile {
                path: "README.md".to_string(),
                size: 4096,
            },
        ])
    }
}

/// Succeeds by writing a native model into `local_dir`, unless scripted to
/// reject the full argument set first.
#[derive(Default)]
pub struct RecordingSdk {
    reject_full_arguments: bool,
    fail: bool,
    requests: Mutex<Vec<SnapshotRequest>>,
}

impl RecordingSdk {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting_full_arguments() -> Arc<Self> {
        Arc::new(Self {
            reject_full_arguments: true,
            ..Self::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn requests(&self) -> Vec<SnapshotRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl SnapshotDownloader for RecordingSdk {
    fn snapshot_download(&self, request: &SnapshotRequest) -> Result<PathBuf, SdkError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(SdkError::Failed("sdk offline".to_string()));
        }
        if self.reject_full_arguments && request.resume_download.is_some() {
            return Err(SdkError::UnsupportedArguments("resume_download".to_string()));
        }
        write_native_model(&request.local_dir);
        Ok(request.local_dir.clone())
    }
}

/// Writes the marker unless told not to; counts conversions.
#[derive(Default)]
pub struct FakeConverter {
    missing: Vec<String>,
    skip_marker: bool,
    jobs: Mutex<Vec<ConversionJob>>,
    stale_seen: Mutex<Vec<bool>>,
}

impl FakeConverter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn missing(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            missing: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        })
    }

    pub fn without_marker() -> Arc<Self> {
        Arc::new(Self {
            skip_marker: true,
            ..Self::default()
        })
    }

    pub fn jobs(&self) -> Vec<ConversionJob> {
        self.jobs.lock().unwrap().clone()
    }

    /// Per conversion: whether a leftover `stale.txt` was still in the output.
    pub fn stale_seen(&self) -> Vec<bool> {
        self.stale_seen.lock().unwrap().clone()
    }
}

impl Converter for FakeConverter {
    fn missing_dependencies(&self) -> Vec<String> {
        self.missing.clone()
    }

    fn install_hint(&self) -> String {
        "pip install ctranslate2 transformers torch".to_string()
    }

    fn convert(&self, job: &ConversionJob) -> Result<(), String> {
        self.jobs.lock().unwrap().push(job.clone());
        self.stale_seen
            .lock()
            .unwrap()
            .push(job.output.join("stale.txt").exists());
        fs::create_dir_all(&job.output).map_err(|e| e.to_string())?;
        if !self.skip_marker {
            fs::write(job.output.join("model.bin"), b"converted").map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct CollectingNotifier {
    lines: Mutex<Vec<String>>,
}

impl CollectingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl sludre_lib::Notify for CollectingNotifier {
    fn notify(&self, message: &str) {
        self.lines.lock().unwrap().push(message.to_string());
    }
}

pub fn test_entrypoints() -> Vec<Entrypoint> {
    vec![
        Entrypoint::new(["/opt/sludre/hf"]),
        Entrypoint::new(["hf"]),
        Entrypoint::new(["python3", "-m", "huggingface_hub.cli.hf"]),
    ]
}

pub struct Harness {
    pub runner: Arc<ScriptedRunner>,
    pub index: Arc<dyn RemoteIndex>,
    pub sdk: Arc<RecordingSdk>,
    pub converter: Arc<FakeConverter>,
    pub notifier: Arc<CollectingNotifier>,
    pub timings: PollTimings,
}

impl Harness {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            runner: ScriptedRunner::new(steps),
            index: Arc::new(OfflineIndex),
            sdk: RecordingSdk::new(),
            converter: FakeConverter::new(),
            notifier: CollectingNotifier::new(),
            timings: PollTimings::default(),
        }
    }

    pub fn with_index(mut self, index: Arc<dyn RemoteIndex>) -> Self {
        self.index = index;
        self
    }

    pub fn with_timings(mut self, poll_interval: Duration, heartbeat_interval: Duration) -> Self {
        self.timings = PollTimings {
            poll_interval,
            heartbeat_interval,
        };
        self
    }

    pub fn progress_lines(&self) -> Vec<String> {
        self.notifier
            .lines()
            .into_iter()
            .filter(|l| l.starts_with("Downloading model..."))
            .collect()
    }

    pub fn with_sdk(mut self, sdk: Arc<RecordingSdk>) -> Self {
        self.sdk = sdk;
        self
    }

    pub fn with_converter(mut self, converter: Arc<FakeConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn manager(&self, identity: ModelIdentity) -> ModelManager {
        ModelManager::new(identity)
            .with_command_runner(self.runner.clone())
            .with_entrypoints(test_entrypoints())
            .with_remote_index(self.index.clone())
            .with_snapshot_downloader(self.sdk.clone())
            .with_converter(self.converter.clone())
            .with_notifier(self.notifier.clone())
            .with_poll_timings(self.timings)
    }
}
