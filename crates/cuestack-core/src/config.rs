//! Engine configuration file support.
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/cuestack/config.toml`
//! - macOS: `~/Library/Application Support/cuestack/config.toml`
//! - Windows: `%APPDATA%\cuestack\config.toml`

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::cue_list::DEFAULT_CAPACITY;
use crate::error::{Error, Result};

/// Largest output channel count a cue list accepts.
pub const MAX_CHANNELS: usize = 64;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioSettings,
    pub scheduler: SchedulerSettings,
    pub osc: OscSettings,
    pub midi: MidiSettings,
    pub triggers: TriggerSettings,
}

const DEFAULT_CONFIG: &str = r#"# cuestack configuration file

[audio]
# Number of output channels mixed by the cue list
channels = 2

# Sample rate requested from the audio device
sample_rate = 44100

# Per-channel ring buffer size in samples
ring_capacity = 32768

# Output device name (substring match); the system default when unset
# output_device = "USB Audio"

[scheduler]
# Interval between cue pulses in milliseconds (1-100)
pulse_interval_ms = 1

[osc]
# Listen for OSC control messages
enabled = true

# Address and UDP port to bind
bind = "0.0.0.0"
port = 7400

# Address prefix in front of cue/... and list/... (must start and end with '/')
prefix = "/"

[midi]
# Device used by MIDI triggers that do not name one (substring match)
# default_device = "nanoKONTROL"

[triggers]
# Polling interval of time-of-day triggers in milliseconds
time_poll_ms = 250
"#;

impl EngineConfig {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(Error::Config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Using default configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the default config file location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "cuestack") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(Error::Config("Could not determine config directory".to_string()))
        }
    }

    /// Create a default config file with comments
    pub fn create_default_config_file() -> Result<PathBuf> {
        let path = Self::config_path()?;
        Self::write_default_config(&path)?;
        Ok(path)
    }

    /// Write the commented default configuration to `path`
    pub fn write_default_config(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG)?;
        Ok(())
    }

    /// Check value ranges. Returns one message per problem.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !(1..=MAX_CHANNELS).contains(&self.audio.channels) {
            problems.push(format!(
                "audio.channels must be 1-{}, got {}",
                MAX_CHANNELS, self.audio.channels
            ));
        }
        if self.audio.sample_rate == 0 {
            problems.push("audio.sample_rate must not be 0".to_string());
        }
        if self.audio.ring_capacity == 0 {
            problems.push("audio.ring_capacity must not be 0".to_string());
        }
        if !(1..=100).contains(&self.scheduler.pulse_interval_ms) {
            problems.push(format!(
                "scheduler.pulse_interval_ms must be 1-100, got {}",
                self.scheduler.pulse_interval_ms
            ));
        }
        if self.osc.port == 0 {
            problems.push("osc.port must not be 0".to_string());
        }
        if !(self.osc.prefix.starts_with('/') && self.osc.prefix.ends_with('/')) {
            problems.push(format!("osc.prefix must start and end with '/', got {:?}", self.osc.prefix));
        }
        if self.triggers.time_poll_ms == 0 {
            problems.push("triggers.time_poll_ms must not be 0".to_string());
        }
        problems
    }
}

/// Audio output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub channels: usize,
    pub sample_rate: u32,
    pub ring_capacity: usize,
    pub output_device: Option<String>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 44_100,
            ring_capacity: DEFAULT_CAPACITY,
            output_device: None,
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub pulse_interval_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { pulse_interval_ms: 1 }
    }
}

/// OSC control endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OscSettings {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
    pub prefix: String,
}

impl Default for OscSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0".to_string(),
            port: 7400,
            prefix: "/".to_string(),
        }
    }
}

impl OscSettings {
    /// `bind:port` socket address string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// MIDI settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiSettings {
    /// Device used by MIDI triggers that do not name one
    pub default_device: Option<String>,
}

/// Trigger settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    pub time_poll_ms: u64,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self { time_poll_ms: 250 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.audio.channels, 2);
        assert_eq!(config.audio.ring_capacity, 32_768);
        assert_eq!(config.scheduler.pulse_interval_ms, 1);
        assert_eq!(config.osc.bind_address(), "0.0.0.0:7400");
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_template_matches_defaults() {
        let parsed: EngineConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(parsed, EngineConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let parsed: EngineConfig = toml::from_str("[osc]\nport = 9000\n").unwrap();
        assert_eq!(parsed.osc.port, 9000);
        assert_eq!(parsed.osc.prefix, "/");
        assert_eq!(parsed.audio.channels, 2);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = EngineConfig::default();
        config.audio.channels = 8;
        config.midi.default_device = Some("nanoKONTROL".to_string());
        config.save_to(&path).unwrap();
        assert_eq!(EngineConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut config = EngineConfig::default();
        config.audio.channels = 0;
        config.scheduler.pulse_interval_ms = 500;
        config.osc.port = 0;
        config.osc.prefix = "cues".to_string();
        assert_eq!(config.validate().len(), 4);
    }
}
