//! Builds a playable `Segment` from a segment folder.
//!
//! ```text
//! <segment>/metadata.json
//! <segment>/audio/<n>_<character>.<ext>    n = 1-based line index
//! ```
//!
//! Script problems fail the whole segment. Audio problems never do: a line
//! whose clip is missing or undecodable is kept without audio.

use crate::bus::{NotificationBus, ShowEvent};
use crate::clip::{AudioClip, ClipDecoder, RodioDecoder};
use crate::config::ShowConfig;
use crate::error::{Result, ShowError};
use crate::segment::{DialogueLine, Segment, SegmentMetadata};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of one `load` call.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(Segment),
    Failed(ShowError),
    /// A newer load or an invalidation started before this one finished;
    /// its result was thrown away and nothing was published.
    Superseded,
}

/// Identifies one in-flight load.
#[derive(Debug, Clone)]
pub struct LoadTicket {
    generation: u64,
    cancel: CancellationToken,
}

impl LoadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Deterministic asset key for the `index`-th (1-based) line spoken by `speaker`.
pub fn asset_key(index: usize, speaker: &str) -> String {
    format!("{}_{}", index, speaker)
}

pub struct SegmentAssetLoader {
    metadata_file: String,
    audio_dir: String,
    extensions: Vec<String>,
    decoder: Arc<dyn ClipDecoder>,
    events: NotificationBus<ShowEvent>,
    generation: AtomicU64,
    in_flight: Mutex<Option<CancellationToken>>,
}

impl SegmentAssetLoader {
    pub fn new(config: &ShowConfig, events: NotificationBus<ShowEvent>) -> Self {
        Self::with_decoder(config, events, Arc::new(RodioDecoder))
    }

    pub fn with_decoder(
        config: &ShowConfig,
        events: NotificationBus<ShowEvent>,
        decoder: Arc<dyn ClipDecoder>,
    ) -> Self {
        SegmentAssetLoader {
            metadata_file: config.metadata_file.clone(),
            audio_dir: config.audio_dir.clone(),
            extensions: config
                .audio_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            decoder,
            events,
            generation: AtomicU64::new(0),
            in_flight: Mutex::new(None),
        }
    }

    /// Start a new load generation, cancelling whatever was in flight.
    pub fn begin(&self) -> LoadTicket {
        let cancel = CancellationToken::new();
        let generation = {
            let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(old) = slot.replace(cancel.clone()) {
                old.cancel();
            }
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        LoadTicket { generation, cancel }
    }

    /// Cancel the in-flight load, if any, so its result is discarded.
    pub fn invalidate(&self) {
        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.take() {
            old.cancel();
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        !ticket.cancel.is_cancelled() && self.generation.load(Ordering::SeqCst) == ticket.generation
    }

    /// Load the segment at `path`. Publishes `SegmentLoaded` or `SegmentFailed`
    /// unless the load was superseded.
    pub async fn load(&self, path: &Path) -> LoadOutcome {
        let ticket = self.begin();
        info!("loading segment from {}", path.display());
        let result = self.build_segment(path, ticket.token()).await;

        if !self.is_current(&ticket) {
            debug!("discarding stale load of {}", path.display());
            return LoadOutcome::Superseded;
        }
        self.finish(&ticket);

        match result {
            Ok(segment) => {
                info!(
                    "loaded segment '{}' ({}) with {} lines, {} voiced",
                    segment.name,
                    segment.title,
                    segment.remaining_line_count(),
                    segment.voiced_line_count()
                );
                self.events.publish(ShowEvent::SegmentLoaded {
                    name: segment.name.clone(),
                    title: segment.title.clone(),
                    lines: segment.remaining_line_count(),
                });
                LoadOutcome::Loaded(segment)
            }
            Err(ShowError::Cancelled) => LoadOutcome::Superseded,
            Err(e) => {
                error!("segment {} failed: {}", path.display(), e);
                self.events.publish(ShowEvent::SegmentFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
                LoadOutcome::Failed(e)
            }
        }
    }

    fn finish(&self, ticket: &LoadTicket) {
        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if self.generation.load(Ordering::SeqCst) == ticket.generation {
            *slot = None;
        }
    }

    async fn build_segment(&self, path: &Path, cancel: &CancellationToken) -> Result<Segment> {
        if !path.exists() {
            return Err(ShowError::SegmentNotFound(path.to_path_buf()));
        }
        if !path.is_dir() {
            return Err(ShowError::invalid_path(path, "segment is not a directory"));
        }

        let meta = SegmentMetadata::from_file(&path.join(&self.metadata_file))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ShowError::invalid_path(path, "segment path has no folder name"))?;
        debug!("'{}' has {} characters", meta.title, meta.characters.len());

        let mut segment = Segment::new(name, meta.title, meta.characters);
        let audio_dir = path.join(&self.audio_dir);

        for (i, script) in meta.dialogue.into_iter().enumerate() {
            let key = asset_key(i + 1, &script.character);
            let audio = self.resolve_audio(&audio_dir, &key, cancel).await?;
            let line = DialogueLine::new(script.character, script.line, audio);
            debug!("enqueued line {}: \"{}\"", key, line.preview());
            segment.push_line(line)?;

            // One line at a time; let the scheduler breathe between decodes.
            tokio::task::yield_now().await;
            if cancel.is_cancelled() {
                return Err(ShowError::Cancelled);
            }
        }
        Ok(segment)
    }

    /// Probe each extension in priority order; the first file that decodes wins.
    /// `Err` only on cancellation.
    async fn resolve_audio(
        &self,
        audio_dir: &Path,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<AudioClip>> {
        for ext in &self.extensions {
            let candidate: PathBuf = audio_dir.join(format!("{}.{}", key, ext));
            if !candidate.is_file() {
                continue;
            }
            let decoder = Arc::clone(&self.decoder);
            let probe = candidate.clone();
            let decode = tokio::task::spawn_blocking(move || decoder.decode(&probe));
            tokio::select! {
                _ = cancel.cancelled() => return Err(ShowError::Cancelled),
                joined = decode => match joined {
                    Ok(Ok(clip)) => {
                        debug!("loaded audio {} from {}", key, candidate.display());
                        return Ok(Some(clip));
                    }
                    Ok(Err(e)) => warn!("failed to load audio file: {}", e),
                    Err(e) => warn!("decode worker for {} died: {}", candidate.display(), e),
                },
            }
        }
        warn!("{}", ShowError::AssetMissing { key: key.to_string() });
        Ok(None)
    }
}
