//! `ShowRunner` owns the whole broadcast pipeline.
//!
//! ```text
//! SegmentDirectoryIndex → SegmentAssetLoader → PlaybackSequencer → NotificationBus
//!          ↑____________________ next segment ______________|
//! ```
//!
//! Everything runs on one task. Controls arrive through a `ShowHandle`
//! and are applied between (or by cancelling) suspension points, so no
//! state is ever touched from two places at once.

use crate::audio::AudioBackend;
use crate::bus::{NotificationBus, ShowEvent};
use crate::clip::ClipDecoder;
use crate::clock::PauseClock;
use crate::config::ShowConfig;
use crate::error::Result;
use crate::loader::{LoadOutcome, SegmentAssetLoader};
use crate::segment::Segment;
use crate::segment_index::SegmentDirectoryIndex;
use crate::sequencer::{PlaybackSequencer, SegmentOutcome, SequencerState};
use crate::state::StateStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

// ── Commands ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ShowCommand {
    SetBasePath(PathBuf),
    Stop,
    Pause(bool),
    Shutdown,
}

/// Cloneable, thread-safe control surface for a running show.
#[derive(Clone)]
pub struct ShowHandle {
    tx: mpsc::UnboundedSender<ShowCommand>,
}

impl ShowHandle {
    pub fn set_base_path(&self, path: impl Into<PathBuf>) {
        let _ = self.tx.send(ShowCommand::SetBasePath(path.into()));
    }

    pub fn stop(&self) {
        let _ = self.tx.send(ShowCommand::Stop);
    }

    pub fn pause(&self, paused: bool) {
        let _ = self.tx.send(ShowCommand::Pause(paused));
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(ShowCommand::Shutdown);
    }
}

enum Flow {
    Continue,
    Exit,
}

// ── Runner ──────────────────────────────────────────────────────────────────

pub struct ShowRunner {
    config: ShowConfig,
    index: SegmentDirectoryIndex,
    loader: SegmentAssetLoader,
    sequencer: PlaybackSequencer,
    clock: PauseClock,
    lines: NotificationBus<String>,
    events: NotificationBus<ShowEvent>,
    store: Option<StateStore>,
    exit_when_complete: bool,
    active: bool,
    tx: mpsc::UnboundedSender<ShowCommand>,
    rx: mpsc::UnboundedReceiver<ShowCommand>,
}

impl ShowRunner {
    pub fn new(config: ShowConfig, clock: PauseClock, backend: Box<dyn AudioBackend>) -> Self {
        let lines = NotificationBus::new();
        let events = NotificationBus::new();
        let index = if config.sort_segments {
            SegmentDirectoryIndex::sorted()
        } else {
            SegmentDirectoryIndex::new()
        };
        let loader = SegmentAssetLoader::new(&config, events.clone());
        let sequencer =
            PlaybackSequencer::new(&config, clock.clone(), backend, lines.clone(), events.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        ShowRunner {
            config,
            index,
            loader,
            sequencer,
            clock,
            lines,
            events,
            store: None,
            exit_when_complete: false,
            active: false,
            tx,
            rx,
        }
    }

    /// Swap the clip decoder (default: rodio).
    pub fn with_decoder(mut self, decoder: Arc<dyn ClipDecoder>) -> Self {
        self.loader = SegmentAssetLoader::with_decoder(&self.config, self.events.clone(), decoder);
        self
    }

    /// Remember accepted base paths in `store`, and resume from it on `run`.
    pub fn with_state(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Return from `run` once the backlog is exhausted instead of waiting for
    /// a new base path.
    pub fn exit_when_complete(mut self, exit: bool) -> Self {
        self.exit_when_complete = exit;
        self
    }

    pub fn handle(&self) -> ShowHandle {
        ShowHandle {
            tx: self.tx.clone(),
        }
    }

    /// Channel carrying the text of each line as it starts.
    pub fn lines(&self) -> NotificationBus<String> {
        self.lines.clone()
    }

    pub fn events(&self) -> NotificationBus<ShowEvent> {
        self.events.clone()
    }

    pub fn clock(&self) -> &PauseClock {
        &self.clock
    }

    pub fn sequencer_state(&self) -> SequencerState {
        self.sequencer.state()
    }

    pub fn pending_count(&self) -> usize {
        self.index.pending_count()
    }

    pub fn base_path(&self) -> Option<&Path> {
        self.index.base_path()
    }

    /// Accept a new base path: drop all in-flight work, rescan, persist.
    pub fn set_base_path(&mut self, path: &Path) -> Result<usize> {
        self.loader.invalidate();
        self.sequencer.reset();
        self.active = false;
        let count = self.index.set_base_path(path)?;
        if let Some(store) = self.store.as_mut() {
            if let Err(e) = store.remember_base_path(path) {
                warn!("could not remember base path: {}", e);
            }
        }
        self.active = true;
        Ok(count)
    }

    /// Drive the show until shut down (or until complete, if so configured).
    pub async fn run(&mut self) -> Result<()> {
        self.clock
            .sleep(self.config.startup_delay(), &CancellationToken::new())
            .await?;
        self.resume_from_state();
        if !self.active && self.exit_when_complete {
            warn!("no base path to play");
            return Ok(());
        }

        loop {
            if !self.active {
                if self.exit_when_complete && self.sequencer.state() == SequencerState::Completed {
                    return Ok(());
                }
                match self.rx.recv().await {
                    Some(cmd) => match self.apply(cmd) {
                        Flow::Continue => continue,
                        Flow::Exit => return Ok(()),
                    },
                    None => return Ok(()),
                }
            }

            self.sequencer.mark_idle();
            let Some(path) = self.index.dequeue_next() else {
                info!("show completed");
                self.sequencer.mark_completed();
                self.events.publish(ShowEvent::Completed);
                self.active = false;
                continue;
            };

            let (outcome, deferred) = self.load_with_controls(&path).await;
            let segment = match outcome {
                LoadOutcome::Loaded(segment) => Some(segment),
                // Fail forward to the next folder.
                LoadOutcome::Failed(_) => None,
                LoadOutcome::Superseded => None,
            };

            let deferred = match (segment, deferred.is_empty()) {
                (Some(segment), true) => self.play_with_controls(segment).await,
                _ => deferred,
            };

            for cmd in deferred {
                if let Flow::Exit = self.apply(cmd) {
                    return Ok(());
                }
            }
        }
    }

    fn resume_from_state(&mut self) {
        if self.index.base_path().is_some() || self.active {
            return;
        }
        let Some(last) = self
            .store
            .as_ref()
            .and_then(|s| s.last_base_path())
            .map(Path::to_path_buf)
        else {
            return;
        };
        info!("resuming from last base path {}", last.display());
        if let Err(e) = self.set_base_path(&last) {
            warn!("cannot resume from {}: {}", last.display(), e);
        }
    }

    /// Load `path` while still servicing pause. Disruptive commands invalidate
    /// the load and are handed back for the caller to apply.
    async fn load_with_controls(&mut self, path: &Path) -> (LoadOutcome, Vec<ShowCommand>) {
        let mut deferred = Vec::new();
        let load = self.loader.load(path);
        tokio::pin!(load);
        let outcome = loop {
            // Queued commands are applied before the work is polled again.
            tokio::select! {
                biased;
                Some(cmd) = self.rx.recv() => match cmd {
                    ShowCommand::Pause(p) => {
                        if self.clock.set_paused(p) {
                            self.events.publish(ShowEvent::Paused(p));
                        }
                    }
                    other => {
                        self.loader.invalidate();
                        deferred.push(other);
                    }
                },
                outcome = &mut load => break outcome,
            }
        };
        (outcome, deferred)
    }

    /// Play `segment` to the end unless a disruptive command cancels it.
    async fn play_with_controls(&mut self, segment: Segment) -> Vec<ShowCommand> {
        let mut deferred = Vec::new();
        let cancel = CancellationToken::new();
        let play = self.sequencer.play_segment(segment, &cancel);
        tokio::pin!(play);
        let outcome = loop {
            // Queued commands are applied before the work is polled again.
            tokio::select! {
                biased;
                Some(cmd) = self.rx.recv() => match cmd {
                    ShowCommand::Pause(p) => {
                        if self.clock.set_paused(p) {
                            info!("show {}", if p { "paused" } else { "resumed" });
                            self.events.publish(ShowEvent::Paused(p));
                        }
                    }
                    other => {
                        cancel.cancel();
                        deferred.push(other);
                    }
                },
                outcome = &mut play => break outcome,
            }
        };
        if let SegmentOutcome::Interrupted { lines_dropped, .. } = outcome {
            info!("playback interrupted, {} lines dropped", lines_dropped);
        }
        deferred
    }

    fn apply(&mut self, cmd: ShowCommand) -> Flow {
        match cmd {
            ShowCommand::SetBasePath(path) => {
                if let Err(e) = self.set_base_path(&path) {
                    error!("{}", e);
                }
                Flow::Continue
            }
            ShowCommand::Stop => {
                self.loader.invalidate();
                let was = self.sequencer.state();
                self.sequencer.reset();
                let dropped = self.index.pending_count();
                self.index.clear();
                self.active = false;
                info!("stopped while {}, {} pending segments dropped", was, dropped);
                self.events.publish(ShowEvent::Stopped);
                Flow::Continue
            }
            ShowCommand::Pause(p) => {
                if self.clock.set_paused(p) {
                    self.events.publish(ShowEvent::Paused(p));
                }
                Flow::Continue
            }
            ShowCommand::Shutdown => {
                self.loader.invalidate();
                self.sequencer.reset();
                Flow::Exit
            }
        }
    }
}

// ── Dry run ─────────────────────────────────────────────────────────────────

/// What `survey` found for one segment folder.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentSurvey {
    pub folder: String,
    pub title: Option<String>,
    pub lines: usize,
    pub voiced_lines: usize,
    pub error: Option<String>,
}

/// Load every segment under `base` without playing anything.
pub async fn survey(config: &ShowConfig, base: &Path) -> Result<Vec<SegmentSurvey>> {
    let mut index = if config.sort_segments {
        SegmentDirectoryIndex::sorted()
    } else {
        SegmentDirectoryIndex::new()
    };
    index.set_base_path(base)?;
    let loader = SegmentAssetLoader::new(config, NotificationBus::new());

    let mut report = Vec::new();
    while let Some(path) = index.dequeue_next() {
        let folder = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let entry = match loader.load(&path).await {
            LoadOutcome::Loaded(seg) => SegmentSurvey {
                folder,
                title: Some(seg.title.clone()),
                lines: seg.remaining_line_count(),
                voiced_lines: seg.voiced_line_count(),
                error: None,
            },
            LoadOutcome::Failed(e) => SegmentSurvey {
                folder,
                title: None,
                lines: 0,
                voiced_lines: 0,
                error: Some(e.to_string()),
            },
            LoadOutcome::Superseded => continue,
        };
        report.push(entry);
    }
    Ok(report)
}
