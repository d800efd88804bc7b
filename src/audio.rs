//! Voice playback for actors.
//!
//! The sequencer talks to an `AudioBackend`. `RodioBackend` owns the output
//! device on a dedicated thread (rodio's stream is not `Send`) and drives it
//! through a command channel; `TimedBackend` plays nothing and just tracks
//! clip length on the `PauseClock`, for headless runs and tests.

use crate::clip::AudioClip;
use crate::clock::PauseClock;
use crate::error::{Result, ShowError};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

pub trait AudioBackend: Send {
    /// Start `clip` on the voice bound to actor `slot`, replacing whatever it was playing.
    fn play(&mut self, slot: usize, clip: &AudioClip) -> Result<()>;

    /// True while the most recently started clip has audio left.
    fn is_playing(&self) -> bool;

    fn set_paused(&mut self, paused: bool);

    /// Silence every voice.
    fn stop(&mut self);

    /// Tear down every voice; the next `play` on a slot creates a fresh one.
    fn release_all(&mut self);
}

// ── Headless ────────────────────────────────────────────────────────────────

/// Device-free backend: a clip "plays" for its duration of active clock time.
pub struct TimedBackend {
    clock: PauseClock,
    ends_at: Option<Duration>,
    history: Arc<Mutex<Vec<(usize, PathBuf)>>>,
}

impl TimedBackend {
    pub fn new(clock: PauseClock) -> Self {
        TimedBackend {
            clock,
            ends_at: None,
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared log of `(slot, clip path)` for every clip started.
    pub fn history(&self) -> Arc<Mutex<Vec<(usize, PathBuf)>>> {
        self.history.clone()
    }
}

impl AudioBackend for TimedBackend {
    fn play(&mut self, slot: usize, clip: &AudioClip) -> Result<()> {
        self.ends_at = Some(self.clock.active_elapsed() + clip.duration);
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((slot, clip.path.clone()));
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.ends_at
            .is_some_and(|end| self.clock.active_elapsed() < end)
    }

    fn set_paused(&mut self, _paused: bool) {}

    fn stop(&mut self) {
        self.ends_at = None;
    }

    fn release_all(&mut self) {
        self.ends_at = None;
    }
}

// ── Device ──────────────────────────────────────────────────────────────────

enum AudioCmd {
    Play { slot: usize, path: PathBuf, seq: u64 },
    Stop,
    Pause,
    Resume,
    ReleaseAll,
    Shutdown,
}

/// Play sequence numbers shared between the backend and the audio thread.
///
/// The backend hands out a number per `play`; the audio thread records the
/// highest number whose clip has ended (or failed). A clip is playing while
/// its number is ahead of that mark, so a completion reported for an older
/// clip can never end the wait on a newer one.
#[derive(Clone, Default)]
struct Completion {
    done: Arc<AtomicU64>,
}

impl Completion {
    fn finish(&self, seq: u64) {
        self.done.fetch_max(seq, Ordering::SeqCst);
    }

    fn is_done(&self, seq: u64) -> bool {
        self.done.load(Ordering::SeqCst) >= seq
    }
}

/// Output device plus one sink per actor slot. Lives on the audio thread only.
struct Player {
    _stream: OutputStream,
    handle: OutputStreamHandle,
    voices: HashMap<usize, Sink>,
    /// Slot and sequence number of the clip started last.
    current: Option<(usize, u64)>,
    paused: bool,
}

impl Player {
    fn new() -> std::result::Result<Self, String> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| format!("Failed to open audio output: {}", e))?;
        Ok(Player {
            _stream: stream,
            handle,
            voices: HashMap::new(),
            current: None,
            paused: false,
        })
    }

    fn play(&mut self, slot: usize, path: &Path) -> std::result::Result<(), String> {
        let file = File::open(path)
            .map_err(|e| format!("Cannot open '{}': {}", path.display(), e))?;
        let source = Decoder::new(BufReader::new(file))
            .map_err(|e| format!("Cannot decode '{}': {}", path.display(), e))?;
        let sink = Sink::try_new(&self.handle)
            .map_err(|e| format!("Failed to create sink: {}", e))?;
        sink.append(source);
        if self.paused {
            sink.pause();
        }
        // Dropping the previous sink for this slot silences it.
        self.voices.insert(slot, sink);
        Ok(())
    }

    /// Report the current clip as done once its sink has drained.
    fn reap(&mut self, completion: &Completion) {
        let Some((slot, seq)) = self.current else {
            return;
        };
        if self.voices.get(&slot).is_none_or(|sink| sink.empty()) {
            completion.finish(seq);
            self.current = None;
        }
    }

    fn silence(&mut self, completion: &Completion) {
        self.voices.values().for_each(|s| s.stop());
        if let Some((_, seq)) = self.current.take() {
            completion.finish(seq);
        }
        self.paused = false;
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        for sink in self.voices.values() {
            if paused { sink.pause() } else { sink.play() }
        }
    }
}

/// Backend that plays through the default output device.
pub struct RodioBackend {
    tx: mpsc::Sender<AudioCmd>,
    completion: Completion,
    last_seq: u64,
    paused: bool,
}

impl RodioBackend {
    /// Open the default device on a new audio thread. Fails if no device can be opened.
    pub fn spawn() -> Result<Self> {
        let (tx, rx) = mpsc::channel::<AudioCmd>();
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();
        let completion = Completion::default();
        let thread_completion = completion.clone();

        std::thread::Builder::new()
            .name("audio-runtime".into())
            .spawn(move || match Player::new() {
                Ok(player) => {
                    let _ = ready_tx.send(Ok(()));
                    audio_thread_loop(player, rx, thread_completion);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| ShowError::Audio(format!("failed to spawn audio thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(RodioBackend {
                tx,
                completion,
                last_seq: 0,
                paused: false,
            }),
            Ok(Err(e)) => Err(ShowError::Audio(e)),
            Err(_) => Err(ShowError::Audio("audio thread exited during startup".into())),
        }
    }

    fn send(&self, cmd: AudioCmd) {
        let _ = self.tx.send(cmd);
    }

    /// Mark everything handed out so far as finished.
    fn forget_current(&mut self) {
        self.completion.finish(self.last_seq);
        self.paused = false;
    }
}

impl AudioBackend for RodioBackend {
    fn play(&mut self, slot: usize, clip: &AudioClip) -> Result<()> {
        self.last_seq += 1;
        let seq = self.last_seq;
        self.tx
            .send(AudioCmd::Play {
                slot,
                path: clip.path.clone(),
                seq,
            })
            .map_err(|_| {
                self.completion.finish(seq);
                ShowError::Audio("audio thread is gone".into())
            })
    }

    fn is_playing(&self) -> bool {
        !self.completion.is_done(self.last_seq)
    }

    fn set_paused(&mut self, paused: bool) {
        if paused == self.paused {
            return;
        }
        self.paused = paused;
        self.send(if paused { AudioCmd::Pause } else { AudioCmd::Resume });
    }

    fn stop(&mut self) {
        self.forget_current();
        self.send(AudioCmd::Stop);
    }

    fn release_all(&mut self) {
        self.forget_current();
        self.send(AudioCmd::ReleaseAll);
    }
}

impl Drop for RodioBackend {
    fn drop(&mut self) {
        self.send(AudioCmd::Shutdown);
    }
}

fn audio_thread_loop(mut player: Player, rx: mpsc::Receiver<AudioCmd>, completion: Completion) {
    loop {
        match rx.recv_timeout(Duration::from_millis(20)) {
            Ok(AudioCmd::Play { slot, path, seq }) => {
                // Whatever was current is superseded by this clip.
                if let Some((_, old)) = player.current.take() {
                    completion.finish(old);
                }
                match player.play(slot, &path) {
                    Ok(()) => {
                        player.current = Some((slot, seq));
                        debug!("voice {} playing {}", slot, path.display());
                    }
                    Err(e) => {
                        warn!("{}", e);
                        completion.finish(seq);
                    }
                }
            }
            Ok(AudioCmd::Stop) => player.silence(&completion),
            Ok(AudioCmd::Pause) => player.set_paused(true),
            Ok(AudioCmd::Resume) => player.set_paused(false),
            Ok(AudioCmd::ReleaseAll) => {
                player.silence(&completion);
                player.voices.clear();
            }
            Ok(AudioCmd::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                player.silence(&completion);
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        // Checked on every pass so a steady stream of commands can't starve it.
        player.reap(&completion);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<TimedBackend>();
        assert_send::<RodioBackend>();
    }

    #[tokio::test(start_paused = true)]
    async fn timed_backend_plays_for_clip_length() {
        let clock = PauseClock::new();
        let mut backend = TimedBackend::new(clock.clone());
        backend
            .play(1, &AudioClip::new("1_Emily.wav", Duration::from_secs(3)))
            .unwrap();
        assert!(backend.is_playing());
        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert!(backend.is_playing());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!backend.is_playing());
        assert_eq!(backend.history().lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_backend_freezes_while_paused() {
        let clock = PauseClock::new();
        let mut backend = TimedBackend::new(clock.clone());
        backend
            .play(0, &AudioClip::new("1_Emily.wav", Duration::from_secs(1)))
            .unwrap();
        clock.set_paused(true);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(backend.is_playing());
        clock.set_paused(false);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!backend.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_backend_stop_ends_playback() {
        let clock = PauseClock::new();
        let mut backend = TimedBackend::new(clock);
        backend
            .play(0, &AudioClip::new("x.wav", Duration::from_secs(10)))
            .unwrap();
        backend.stop();
        assert!(!backend.is_playing());
    }

    #[test]
    fn completion_of_an_older_clip_does_not_end_a_newer_one() {
        let completion = Completion::default();
        // Clip 1 ends on the audio thread just as clip 2 is handed out.
        completion.finish(1);
        assert!(completion.is_done(1));
        assert!(!completion.is_done(2));
        completion.finish(2);
        assert!(completion.is_done(2));
    }

    #[test]
    fn completion_mark_never_moves_backwards() {
        let completion = Completion::default();
        completion.finish(5);
        completion.finish(3);
        assert!(completion.is_done(5));
        assert!(!completion.is_done(6));
    }

    #[test]
    fn rodio_backend_spawns_or_fails_gracefully() {
        match RodioBackend::spawn() {
            Ok(backend) => assert!(!backend.is_playing()),
            Err(e) => assert!(matches!(e, ShowError::Audio(_))),
        }
    }
}
