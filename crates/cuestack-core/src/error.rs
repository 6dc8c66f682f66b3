//! Error types for cuestack.

use thiserror::Error;

use crate::cue::CueUid;
use crate::osc::OscError;

/// Result type alias for cuestack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur at the engine's I/O boundaries.
///
/// Cue control (play/pause/stop) and property writes keep a boolean
/// contract and log instead; only operations that touch files, sockets or
/// devices return this type.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// OSC encode/decode error
    #[error("OSC error: {0}")]
    Osc(#[from] OscError),

    /// MIDI backend error
    #[error("MIDI error: {0}")]
    Midi(String),

    /// Audio device error
    #[error("Audio error: {0}")]
    Audio(String),

    /// Malformed show document
    #[error("Show error: {0}")]
    Show(String),

    /// A UID that is not registered in the cue list
    #[error("Cue {0} not found")]
    CueNotFound(CueUid),
}
