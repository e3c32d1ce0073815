//! Download progress estimated from file sizes on disk.
//!
//! The external download tool reports nothing while it runs, so the poller
//! compares what has landed in the target directory against the plan.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;

use crate::model_store::TransferPlan;

/// Emit at least this often, even without progress.
pub const MAX_EMIT_INTERVAL: Duration = Duration::from_secs(15);
/// Minimum gap between emissions driven by percent changes.
pub const MIN_EMIT_INTERVAL: Duration = Duration::from_secs(2);
pub const PERCENT_STEP: u8 = 5;

// Where the hub CLI keeps partial files inside a local dir.
const INCOMPLETE_DIR: &[&str] = &[".cache", "huggingface", "download"];
const INCOMPLETE_SUFFIX: &str = ".incomplete";

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ProgressSample {
    pub percent: u8,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub timestamp: SystemTime,
}

impl ProgressSample {
    pub fn describe(&self) -> String {
        format!(
            "Downloading model... {}% ({} / {})",
            self.percent,
            format_bytes(self.downloaded_bytes),
            format_bytes(self.total_bytes)
        )
    }
}

pub fn percent_of(downloaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (u128::from(downloaded) * 100) / u128::from(total);
    percent.min(100) as u8
}

/// Bytes on disk, clamped per file to the planned size, and the plan total.
pub fn measure(plan: &TransferPlan, target_dir: &Path) -> (u64, u64) {
    plan.iter().fold((0, 0), |(downloaded, total), (path, expected)| {
        let on_disk = on_disk_size(target_dir, path).min(expected);
        (downloaded + on_disk, total + expected)
    })
}

fn on_disk_size(target_dir: &Path, relative: &str) -> u64 {
    let finished = fs::metadata(target_dir.join(relative))
        .map(|m| m.len())
        .unwrap_or(0);
    finished.max(incomplete_size(target_dir, relative))
}

fn incomplete_size(target_dir: &Path, relative: &str) -> u64 {
    let rel = Path::new(relative);
    let Some(file_name) = rel.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return 0;
    };

    let mut dir = INCOMPLETE_DIR
        .iter()
        .fold(target_dir.to_path_buf(), |dir, part| dir.join(part));
    if let Some(parent) = rel.parent() {
        dir = dir.join(parent);
    }

    let Ok(entries) = fs::read_dir(&dir) else {
        return 0;
    };

    let prefix = format!("{file_name}.");
    entries
        .filter_map(Result::ok)
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(&prefix) && name.ends_with(INCOMPLETE_SUFFIX)
        })
        .filter_map(|entry| entry.metadata().ok().map(|m| m.len()))
        .max()
        .unwrap_or(0)
}

/// Remembers the last emitted percent and when it was emitted.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    percent: Option<u8>,
    last_emit: Instant,
}

impl ProgressThrottle {
    pub fn new(started: Instant) -> Self {
        Self {
            percent: None,
            last_emit: started,
        }
    }

    pub fn last_percent(&self) -> Option<u8> {
        self.percent
    }

    pub fn should_emit(&self, percent: u8, now: Instant) -> bool {
        let since = now.saturating_duration_since(self.last_emit);
        if since >= MAX_EMIT_INTERVAL {
            return true;
        }

        let advanced = match self.percent {
            Some(last) => percent >= last.saturating_add(PERCENT_STEP),
            None => true,
        };
        advanced && since >= MIN_EMIT_INTERVAL
    }

    pub fn should_emit_final(&self, percent: u8) -> bool {
        self.percent != Some(percent)
    }

    pub fn record(&mut self, percent: u8, now: Instant) {
        self.percent = Some(percent);
        self.last_emit = now;
    }
}

/// Samples the target directory against a plan. Inert for an empty plan.
#[derive(Debug)]
pub struct ProgressMonitor<'a> {
    plan: &'a TransferPlan,
    target_dir: &'a Path,
    throttle: ProgressThrottle,
}

impl<'a> ProgressMonitor<'a> {
    pub fn new(plan: &'a TransferPlan, target_dir: &'a Path, started: Instant) -> Self {
        Self {
            plan,
            target_dir,
            throttle: ProgressThrottle::new(started),
        }
    }

    pub fn is_inert(&self) -> bool {
        self.plan.total_bytes() == 0
    }

    pub fn sample(&self) -> ProgressSample {
        let (downloaded_bytes, total_bytes) = measure(self.plan, self.target_dir);
        ProgressSample {
            percent: percent_of(downloaded_bytes, total_bytes),
            downloaded_bytes,
            total_bytes,
            timestamp: SystemTime::now(),
        }
    }

    pub fn poll(&mut self, now: Instant) -> Option<ProgressSample> {
        if self.is_inert() {
            return None;
        }
        let sample = self.sample();
        if !self.throttle.should_emit(sample.percent, now) {
            return None;
        }
        self.throttle.record(sample.percent, now);
        Some(sample)
    }

    /// One last sample once the download has ended, unless it would repeat
    /// the previous one.
    pub fn finish(&mut self, now: Instant) -> Option<ProgressSample> {
        if self.is_inert() {
            return None;
        }
        let sample = self.sample();
        if !self.throttle.should_emit_final(sample.percent) {
            return None;
        }
        self.throttle.record(sample.percent, now);
        Some(sample)
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_floored_and_capped() {
        assert_eq!(percent_of(0, 0), 0);
        assert_eq!(percent_of(999, 1000), 99);
        assert_eq!(percent_of(1000, 1000), 100);
        assert_eq!(percent_of(2000, 1000), 100);
    }

    #[test]
    fn bytes_are_human_readable() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
