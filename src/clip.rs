use crate::error::{Result, ShowError};
use lofty::file::AudioFile;
use rodio::{Decoder, Source};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A decoded, ready-to-play voice clip for one dialogue line.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub path: PathBuf,
    /// Lower-case file extension the clip was resolved with.
    pub format: String,
    pub duration: Duration,
}

impl AudioClip {
    pub fn new(path: impl Into<PathBuf>, duration: Duration) -> Self {
        let path = path.into();
        let format = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        AudioClip {
            path,
            format,
            duration,
        }
    }

    /// Format duration as MM:SS.
    pub fn duration_display(&self) -> String {
        let secs = self.duration.as_secs();
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}

/// Turns a candidate file into an `AudioClip`, or reports why it can't.
///
/// Implementations run on a blocking worker thread, never on the sequencing task.
pub trait ClipDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<AudioClip>;
}

/// Decodes with rodio to prove the file is playable, and reads its length with
/// lofty (falling back to whatever the decoder reports).
#[derive(Debug, Default, Clone, Copy)]
pub struct RodioDecoder;

impl ClipDecoder for RodioDecoder {
    fn decode(&self, path: &Path) -> Result<AudioClip> {
        let decode_err = |reason: String| ShowError::Decode {
            path: path.to_path_buf(),
            reason,
        };
        let file = File::open(path).map_err(|e| decode_err(format!("open: {}", e)))?;
        let source = Decoder::new(BufReader::new(file)).map_err(|e| decode_err(e.to_string()))?;

        let tagged = lofty::read_from_path(path)
            .ok()
            .map(|f| f.properties().duration())
            .filter(|d| !d.is_zero());
        let duration = tagged
            .or_else(|| source.total_duration())
            .unwrap_or(Duration::ZERO);

        Ok(AudioClip::new(path, duration))
    }
}
