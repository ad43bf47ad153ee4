//! Agent configuration: defaults, then an optional TOML file, then `GUARD__*`
//! environment overrides.
//!
//! The wordlist and sanction documents are separate JSON files so they can be
//! hot-reloaded from the admin surface; this file only says where they live.

use crate::error::GuardResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "GUARD_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/guard.toml";
const ENV_PREFIX: &str = "GUARD";

/// Capture and segmentation settings consumed by the audio layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Input device name; `None` means the system default.
    pub device: Option<String>,
    pub sample_rate: u32,
    /// Manual pre-gain, clamped to 0..=10.
    pub manual_gain: f32,
    pub target_rms_db: f32,
    /// WebRTC VAD aggressiveness (0-3).
    pub vad_mode: u8,
    pub silence_gap_ms: u64,
    pub phrase_limit_ms: u64,
    pub min_utterance_ms: u64,
    pub reconnect_base_secs: u64,
    pub reconnect_max_secs: u64,
    /// Transcription language hint passed to the STT service.
    pub language: Option<String>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 16000,
            manual_gain: 1.0,
            target_rms_db: -20.0,
            vad_mode: 2,
            silence_gap_ms: 800,
            phrase_limit_ms: 5000,
            min_utterance_ms: 200,
            reconnect_base_secs: 5,
            reconnect_max_secs: 30,
            language: None,
        }
    }
}

/// Enforcement surface settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    pub desktop_guard: bool,
    /// Directories watched by the desktop guard. Empty means the user and public desktops.
    pub watch_dirs: Vec<PathBuf>,
    pub settle_delay_ms: u64,
    pub reprimand_cooldown_ms: u64,
    /// Windows only: add a deny-create ACL on watched directories.
    pub apply_acl: bool,
    pub settings_lock: bool,
    pub intercept_keys: bool,
    /// Draw the full-screen lock window when a display is attached.
    pub lock_screen: bool,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            desktop_guard: true,
            watch_dirs: Vec::new(),
            settle_delay_ms: 500,
            reprimand_cooldown_ms: 2000,
            apply_acl: false,
            settings_lock: true,
            intercept_keys: true,
            lock_screen: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub machine_id: String,
    pub data_dir: PathBuf,
    pub wordlist_path: PathBuf,
    pub sanction_path: PathBuf,
    pub incident_log_path: PathBuf,
    pub state_db_path: PathBuf,
    pub persist_violations: bool,
    pub forgive_check_secs: u64,
    pub live_window_secs: u64,
    pub admin_bind: String,
    #[serde(default)]
    pub audio: AudioSettings,
    #[serde(default)]
    pub guard: GuardSettings,
}

fn default_machine_id() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "kiosk".to_string())
}

impl AgentConfig {
    /// Load from the path in `GUARD_CONFIG` (default `config/guard.toml`). A missing
    /// file is not an error.
    pub fn load() -> GuardResult<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Some(Path::new(&path)))
    }

    pub fn load_from(path: Option<&Path>) -> GuardResult<Self> {
        let builder = config::Config::builder()
            .set_default("machine_id", default_machine_id())?
            .set_default("data_dir", "./data")?
            .set_default("wordlist_path", "./data/wordlist.json")?
            .set_default("sanction_path", "./data/sanctions.json")?
            .set_default("incident_log_path", "./data/incidents.jsonl")?
            .set_default("state_db_path", "./data/guard_state")?
            .set_default("persist_violations", false)?
            .set_default("forgive_check_secs", 30_i64)?
            .set_default("live_window_secs", 60_i64)?
            .set_default("admin_bind", "127.0.0.1:8765")?;

        let builder = match path {
            Some(path) if path.exists() => builder.add_source(config::File::from(path)),
            _ => builder,
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(built.try_deserialize()?)
    }

    pub fn forgive_check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.forgive_check_secs.max(1))
    }

    pub fn live_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.live_window_secs.clamp(1, 86_400) as i64)
    }
}
