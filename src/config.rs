//! Session configuration.
//!
//! A session lists the stems to mix together with their starting volume and
//! mute state, plus output settings. Sessions are stored as JSON:
//!
//! ```json
//! {
//!   "channels": 2,
//!   "control_rate_hz": 10.0,
//!   "stems": [
//!     { "id": "drums", "path": "drums.wav" },
//!     { "path": "bass.wav", "volume": 0.8 },
//!     { "path": "vox.wav", "muted": true }
//!   ]
//! }
//! ```

use crate::control::DEFAULT_CONTROL_RATE_HZ;
use crate::error::MixError;
use crate::stems::{StemStore, DEFAULT_CHANNELS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One stem entry in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemEntry {
    /// Stem id; defaults to the file name without extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Path to the encoded audio file.
    pub path: PathBuf,

    /// Starting volume (0.0 to 1.0).
    #[serde(default = "default_volume")]
    pub volume: f32,

    /// Whether the stem starts muted.
    #[serde(default)]
    pub muted: bool,
}

impl StemEntry {
    /// Creates an entry at full volume, unmuted.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            id: None,
            path: path.into(),
            volume: default_volume(),
            muted: false,
        }
    }

    /// The explicit id, or the file stem of the path.
    pub fn resolved_id(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => self
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string()),
        }
    }
}

/// A complete mixing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Output channel count.
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Output device name; the system default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    /// Fixed output block size in frames; the device default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_frames: Option<u32>,

    /// Rate at which hand-height frames are applied.
    #[serde(default = "default_control_rate")]
    pub control_rate_hz: f32,

    /// Stems in mixing order.
    pub stems: Vec<StemEntry>,
}

fn default_volume() -> f32 {
    1.0
}

fn default_channels() -> u16 {
    DEFAULT_CHANNELS
}

fn default_control_rate() -> f32 {
    DEFAULT_CONTROL_RATE_HZ
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            device: None,
            buffer_frames: None,
            control_rate_hz: default_control_rate(),
            stems: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Builds a session from a list of audio files.
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            stems: paths.into_iter().map(StemEntry::new).collect(),
            ..Self::default()
        }
    }

    /// Serializes the session to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parses a session from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Loads a session file.
    ///
    /// Relative stem paths are resolved against the file's directory.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read session file: {}", path.display()))?;
        let mut config = Self::from_json(&json)
            .with_context(|| format!("Failed to parse session file: {}", path.display()))?;

        if let Some(base) = path.parent() {
            for stem in &mut config.stems {
                if stem.path.is_relative() {
                    stem.path = base.join(&stem.path);
                }
            }
        }
        Ok(config)
    }

    /// Saves the session as JSON.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = self.to_json().context("Failed to serialize session")?;
        fs::write(path.as_ref(), json)
            .with_context(|| format!("Failed to write session file: {}", path.as_ref().display()))
    }

    /// Loads every stem, applies starting volumes and mutes, and seals.
    pub fn build_store(&self) -> Result<StemStore, MixError> {
        let mut store = StemStore::new(self.channels);
        for entry in &self.stems {
            let id = entry.resolved_id();
            store.load_file(id.as_str(), &entry.path)?;
            store.set_volume(&id, entry.volume)?;
            store.set_mute(&id, entry.muted)?;
        }
        store.seal()?;
        Ok(store)
    }
}
