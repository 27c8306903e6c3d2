//! Decision telemetry.
//!
//! Every decision is appended to a JSON array on disk, one compact object per
//! line, so the file stays readable while the session is still writing it.
//! A log larger than the rotation threshold is renamed with a date suffix
//! when the recorder opens.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default rotation threshold: 5 MiB.
pub const ROTATE_BYTES: u64 = 5 * 1024 * 1024;

/// Buckets of the policy-probability histogram over `[0, 1]`.
pub const HISTOGRAM_BINS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("telemetry I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("telemetry JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One logged decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEntry {
    pub timestamp: DateTime<Utc>,
    pub fen: String,
    #[serde(rename = "move")]
    pub mv: String,
    pub rank: u32,
    pub eval_played: i32,
    pub eval_best: i32,
    pub cp_delta: i32,
    pub think_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_prob: Option<f64>,
}

/// Aggregate view of a set of entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub entries: usize,
    pub best_move_percent: f64,
    pub average_cp_delta: f64,
    pub rank_counts: BTreeMap<u32, usize>,
    pub average_policy_prob: f64,
    pub policy_histogram: [usize; HISTOGRAM_BINS],
    pub recent_think_times: Vec<u64>,
}

/// Percentage of entries that played the top-ranked move.
pub fn best_move_percent(entries: &[TelemetryEntry]) -> f64 {
    if entries.is_empty() {
        return 0.0;
    }
    let best = entries.iter().filter(|e| e.rank == 1).count();
    100.0 * best as f64 / entries.len() as f64
}

pub fn average_cp_delta(entries: &[TelemetryEntry]) -> f64 {
    if entries.is_empty() {
        return 0.0;
    }
    entries.iter().map(|e| e.cp_delta as f64).sum::<f64>() / entries.len() as f64
}

pub fn rank_counts(entries: &[TelemetryEntry]) -> BTreeMap<u32, usize> {
    let mut counts = BTreeMap::new();
    for e in entries {
        *counts.entry(e.rank).or_insert(0) += 1;
    }
    counts
}

/// Think times of the last `n` entries, oldest first.
pub fn recent_think_times(entries: &[TelemetryEntry], n: usize) -> Vec<u64> {
    let start = entries.len().saturating_sub(n);
    entries[start..].iter().map(|e| e.think_time_ms).collect()
}

/// Mean policy probability over entries that carry one.
pub fn average_policy_prob(entries: &[TelemetryEntry]) -> f64 {
    let probs: Vec<f64> = entries.iter().filter_map(|e| e.policy_prob).collect();
    if probs.is_empty() {
        return 0.0;
    }
    probs.iter().sum::<f64>() / probs.len() as f64
}

/// Counts of policy probabilities in five equal buckets; 1.0 lands in the last.
pub fn policy_histogram(entries: &[TelemetryEntry]) -> [usize; HISTOGRAM_BINS] {
    let mut bins = [0usize; HISTOGRAM_BINS];
    for p in entries.iter().filter_map(|e| e.policy_prob) {
        let idx = ((p.clamp(0.0, 1.0) * HISTOGRAM_BINS as f64) as usize).min(HISTOGRAM_BINS - 1);
        bins[idx] += 1;
    }
    bins
}

impl Summary {
    pub fn of(entries: &[TelemetryEntry], recent: usize) -> Summary {
        Summary {
            entries: entries.len(),
            best_move_percent: best_move_percent(entries),
            average_cp_delta: average_cp_delta(entries),
            rank_counts: rank_counts(entries),
            average_policy_prob: average_policy_prob(entries),
            policy_histogram: policy_histogram(entries),
            recent_think_times: recent_think_times(entries, recent),
        }
    }
}

/// Path a log is rotated to on `date`: `telemetry_log.json` becomes
/// `telemetry_log_20240131.json`.
pub fn rotated_path(path: &Path, date: NaiveDate) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "telemetry_log".to_string());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "json".to_string());
    path.with_file_name(format!("{}_{}.{}", stem, date.format("%Y%m%d"), ext))
}

/// Reads a log written by `TelemetryRecorder`, including one that is still
/// open or was never closed.
pub fn load_entries(path: &Path) -> Result<Vec<TelemetryEntry>, TelemetryError> {
    let text = fs::read_to_string(path)?;
    let body = text.trim().trim_end_matches(',');
    if body.is_empty() {
        return Ok(Vec::new());
    }
    if body.ends_with(']') {
        return Ok(serde_json::from_str(body)?);
    }
    Ok(serde_json::from_str(&format!("{}]", body))?)
}

/// Append-only decision log.
pub struct TelemetryRecorder {
    path: PathBuf,
    file: Option<File>,
    entries: Vec<TelemetryEntry>,
    first: bool,
}

impl TelemetryRecorder {
    /// Opens a fresh log at `path`, rotating an existing one larger than
    /// `rotate_bytes` first.
    pub fn open(path: impl Into<PathBuf>, rotate_bytes: u64) -> Result<Self, TelemetryError> {
        let path = path.into();
        if let Ok(meta) = fs::metadata(&path) {
            if meta.len() > rotate_bytes {
                let target = rotated_path(&path, Local::now().date_naive());
                fs::rename(&path, &target)?;
                info!("rotated telemetry log to {}", target.display());
            }
        }

        let mut recorder = TelemetryRecorder {
            path,
            file: None,
            entries: Vec::new(),
            first: true,
        };
        recorder.reopen()?;
        Ok(recorder)
    }

    fn reopen(&mut self) -> Result<(), TelemetryError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(b"[")?;
        file.flush()?;
        self.file = Some(file);
        self.first = true;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `entry` to memory and disk.
    pub fn log(&mut self, entry: TelemetryEntry) -> Result<(), TelemetryError> {
        let line = serde_json::to_string(&entry)?;
        self.entries.push(entry);
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        if !self.first {
            file.write_all(b",\n")?;
        } else {
            file.write_all(b"\n")?;
        }
        self.first = false;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Empties both the in-memory entries and the file.
    pub fn clear(&mut self) -> Result<(), TelemetryError> {
        self.file = None;
        self.entries.clear();
        self.reopen()
    }

    pub fn entries(&self) -> &[TelemetryEntry] {
        &self.entries
    }

    pub fn best_move_percent(&self) -> f64 {
        best_move_percent(&self.entries)
    }

    pub fn average_cp_delta(&self) -> f64 {
        average_cp_delta(&self.entries)
    }

    pub fn rank_counts(&self) -> BTreeMap<u32, usize> {
        rank_counts(&self.entries)
    }

    pub fn recent_think_times(&self, n: usize) -> Vec<u64> {
        recent_think_times(&self.entries, n)
    }

    pub fn average_policy_prob(&self) -> f64 {
        average_policy_prob(&self.entries)
    }

    pub fn policy_histogram(&self) -> [usize; HISTOGRAM_BINS] {
        policy_histogram(&self.entries)
    }

    pub fn summary(&self, recent: usize) -> Summary {
        Summary::of(&self.entries, recent)
    }
}

impl Drop for TelemetryRecorder {
    fn drop(&mut self) {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.write_all(b"\n]\n").and_then(|_| file.flush()) {
                warn!("failed to close telemetry log: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(rank: u32, cp_delta: i32, think: u64, policy: Option<f64>) -> TelemetryEntry {
        TelemetryEntry {
            timestamp: Utc::now(),
            fen: "8/8/8/8/8/8/8/8 w - - 0 1".to_string(),
            mv: "e2e4".to_string(),
            rank,
            eval_played: 30 - cp_delta,
            eval_best: 30,
            cp_delta,
            think_time_ms: think,
            policy_prob: policy,
        }
    }

    #[test]
    fn queries_over_entries() {
        let entries = vec![
            entry(1, 0, 100, Some(0.9)),
            entry(2, 40, 200, Some(0.1)),
            entry(1, 0, 300, Some(1.0)),
            entry(3, 80, 400, None),
        ];
        assert_eq!(best_move_percent(&entries), 50.0);
        assert_eq!(average_cp_delta(&entries), 30.0);
        assert_eq!(rank_counts(&entries), BTreeMap::from([(1, 2), (2, 1), (3, 1)]));
        assert_eq!(recent_think_times(&entries, 2), vec![300, 400]);
        assert_eq!(recent_think_times(&entries, 10).len(), 4);
        assert!((average_policy_prob(&entries) - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(policy_histogram(&entries), [1, 0, 0, 0, 2]);
    }

    #[test]
    fn empty_queries_are_zero() {
        assert_eq!(best_move_percent(&[]), 0.0);
        assert_eq!(average_cp_delta(&[]), 0.0);
        assert_eq!(average_policy_prob(&[]), 0.0);
        assert_eq!(policy_histogram(&[]), [0; 5]);
    }

    #[test]
    fn log_is_a_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry_log.json");
        {
            let mut rec = TelemetryRecorder::open(&path, ROTATE_BYTES).unwrap();
            rec.log(entry(1, 0, 120, Some(0.5))).unwrap();
            rec.log(entry(2, 15, 90, None)).unwrap();

            let partial = load_entries(&path).unwrap();
            assert_eq!(partial.len(), 2);
        }
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with('['));
        assert!(text.trim_end().ends_with(']'));
        assert!(text.contains("\"move\":\"e2e4\""));
        assert!(text.contains("\"cpDelta\":15"));
        let parsed: Vec<TelemetryEntry> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].policy_prob, None);
    }

    #[test]
    fn clear_truncates_memory_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry_log.json");
        let mut rec = TelemetryRecorder::open(&path, ROTATE_BYTES).unwrap();
        rec.log(entry(1, 0, 120, None)).unwrap();
        rec.clear().unwrap();
        assert!(rec.entries().is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "[");
        assert!(load_entries(&path).unwrap().is_empty());
    }

    #[test]
    fn oversized_log_is_rotated_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry_log.json");
        {
            let mut rec = TelemetryRecorder::open(&path, 256).unwrap();
            for i in 0..10 {
                rec.log(entry(1, 0, i, None)).unwrap();
            }
        }
        assert!(fs::metadata(&path).unwrap().len() > 256);

        let rec = TelemetryRecorder::open(&path, 256).unwrap();
        assert!(rec.entries().is_empty());
        drop(rec);

        let rotated: Vec<PathBuf> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p != &path)
            .collect();
        assert_eq!(rotated.len(), 1);
        assert_eq!(rotated[0], rotated_path(&path, Local::now().date_naive()));
        assert_eq!(load_entries(&rotated[0]).unwrap().len(), 10);
        assert!(load_entries(&path).unwrap().is_empty());
    }

    #[test]
    fn rotated_name_has_date_suffix() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(
            rotated_path(Path::new("/var/log/telemetry_log.json"), date),
            PathBuf::from("/var/log/telemetry_log_20240131.json")
        );
    }
}
