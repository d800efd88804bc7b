use crate::error::{Result, ShowError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Tunables for loading and pacing a show. Every field has a default, so a
/// config file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShowConfig {
    /// Seconds a line without audio stays on screen.
    pub display_secs: f32,
    /// Seconds of quiet after an audio line finishes.
    pub inter_line_pause_secs: f32,
    /// Delay before the first segment is requested.
    pub startup_delay_secs: f32,
    /// Number of fixed actor spawn positions.
    pub spawn_slots: usize,
    /// Audio extensions in probe priority order (without the dot).
    pub audio_extensions: Vec<String>,
    pub metadata_file: String,
    pub audio_dir: String,
    /// Sort discovered segment folders by name instead of keeping listing order.
    pub sort_segments: bool,
    pub audio_poll_ms: u64,
}

impl Default for ShowConfig {
    fn default() -> Self {
        ShowConfig {
            display_secs: 2.0,
            inter_line_pause_secs: 0.5,
            startup_delay_secs: 0.5,
            spawn_slots: 4,
            audio_extensions: vec!["mp3".to_string(), "wav".to_string()],
            metadata_file: "metadata.json".to_string(),
            audio_dir: "audio".to_string(),
            sort_segments: false,
            audio_poll_ms: 20,
        }
    }
}

impl ShowConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| ShowError::invalid_path(path, format!("cannot read config: {}", e)))?;
        let config: ShowConfig = serde_json::from_str(&data)
            .map_err(|e| ShowError::invalid_path(path, format!("bad config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |reason: &str| Err(ShowError::invalid_path("<config>", reason));
        if !(self.display_secs >= 0.0) {
            return bad("display_secs must be >= 0");
        }
        if !(self.inter_line_pause_secs >= 0.0) {
            return bad("inter_line_pause_secs must be >= 0");
        }
        if !(self.startup_delay_secs >= 0.0) {
            return bad("startup_delay_secs must be >= 0");
        }
        if self.spawn_slots == 0 {
            return bad("spawn_slots must be at least 1");
        }
        if self.audio_extensions.is_empty() {
            return bad("audio_extensions must not be empty");
        }
        if self.audio_poll_ms == 0 {
            return bad("audio_poll_ms must be at least 1");
        }
        Ok(())
    }

    pub fn display_duration(&self) -> Duration {
        Duration::from_secs_f32(self.display_secs.max(0.0))
    }

    pub fn inter_line_pause(&self) -> Duration {
        Duration::from_secs_f32(self.inter_line_pause_secs.max(0.0))
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs_f32(self.startup_delay_secs.max(0.0))
    }

    pub fn audio_poll(&self) -> Duration {
        Duration::from_millis(self.audio_poll_ms.max(1))
    }
}
