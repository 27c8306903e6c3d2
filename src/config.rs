//! Session configuration, stored as JSON.
//!
//! Every field has a default so a partial file only overrides what it names.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::board::Side;
use crate::decide::DecisionConfig;
use crate::execute::ExecutionConfig;
use crate::locate::{LocateConfig, Rect};
use crate::telemetry::ROTATE_BYTES;
use crate::worker::{RestartPolicy, WorkerSpec};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Launch and restart settings of one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub restart_on_crash: bool,
    pub restart_delay_ms: u64,
    pub max_consecutive_crashes: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let policy = RestartPolicy::default();
        WorkerConfig {
            program: PathBuf::new(),
            args: Vec::new(),
            restart_on_crash: policy.enabled,
            restart_delay_ms: policy.delay.as_millis() as u64,
            max_consecutive_crashes: policy.max_consecutive,
        }
    }
}

impl WorkerConfig {
    fn with_command(program: &str, args: &[&str]) -> Self {
        WorkerConfig {
            program: PathBuf::from(program),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..WorkerConfig::default()
        }
    }

    pub fn spec(&self) -> WorkerSpec {
        WorkerSpec {
            program: self.program.clone(),
            args: self.args.clone(),
        }
    }

    pub fn policy(&self) -> RestartPolicy {
        RestartPolicy {
            enabled: self.restart_on_crash,
            delay: Duration::from_millis(self.restart_delay_ms),
            max_consecutive: self.max_consecutive_crashes,
        }
    }
}

/// Screen capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub interval_ms: u64,
    /// Edge length of the frames handed to the vision worker.
    pub frame_size: u32,
    pub device_pixel_ratio: f64,
    /// Full-screen snapshot read on every capture.
    pub screen_path: PathBuf,
    /// Optional command (program and arguments) that refreshes `screen_path`.
    pub screenshot_command: Vec<String>,
    pub frame_path: PathBuf,
    /// Manually selected board region; detected at start when absent.
    pub region: Option<Rect>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            interval_ms: 1000,
            frame_size: 256,
            device_pixel_ratio: 1.0,
            screen_path: PathBuf::from("screen.png"),
            screenshot_command: Vec::new(),
            frame_path: PathBuf::from("board_frame.png"),
            region: None,
        }
    }
}

impl CaptureConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub path: PathBuf,
    pub rotate_bytes: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            path: PathBuf::from("telemetry_log.json"),
            rotate_bytes: ROTATE_BYTES,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vision: WorkerConfig,
    pub engine: WorkerConfig,
    pub decision: DecisionConfig,
    pub execution: ExecutionConfig,
    pub capture: CaptureConfig,
    pub locate: LocateConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            vision: WorkerConfig::with_command("python3", &["-u", "vision_worker.py"]),
            engine: WorkerConfig::with_command("stockfish", &[]),
            decision: DecisionConfig::default(),
            execution: ExecutionConfig::default(),
            capture: CaptureConfig::default(),
            locate: LocateConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
        match fs::read_to_string(path) {
            Ok(data) => Self::from_json(&data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_json(json: &str) -> Result<Config, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json + "\n")?;
        Ok(())
    }

    pub fn player(&self) -> Side {
        self.decision.player
    }
}
