use crate::audio::AudioBackend;
use crate::bus::{NotificationBus, ShowEvent};
use crate::clock::PauseClock;
use crate::config::ShowConfig;
use crate::error::{Result, ShowError};
use crate::segment::{DialogueLine, Segment};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Spawning,
    PlayingLine,
    WaitingOnAudio,
    AdvancingSegment,
    Completed,
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SequencerState::Idle => "idle",
            SequencerState::Spawning => "spawning",
            SequencerState::PlayingLine => "playing",
            SequencerState::WaitingOnAudio => "waiting-on-audio",
            SequencerState::AdvancingSegment => "advancing",
            SequencerState::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// A cast member placed at one of the fixed spawn positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub character: String,
    pub slot: usize,
}

/// How a call to `play_segment` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    Finished { lines_played: usize },
    /// Cancelled from outside; `lines_dropped` lines were never played.
    Interrupted { lines_played: usize, lines_dropped: usize },
}

/// Plays one segment at a time, line by line, keeping text and voice in step.
pub struct PlaybackSequencer {
    state: SequencerState,
    actors: Vec<Actor>,
    spawn_slots: usize,
    display: Duration,
    inter_line: Duration,
    poll: Duration,
    clock: PauseClock,
    backend: Box<dyn AudioBackend>,
    lines: NotificationBus<String>,
    events: NotificationBus<ShowEvent>,
}

impl PlaybackSequencer {
    pub fn new(
        config: &ShowConfig,
        clock: PauseClock,
        backend: Box<dyn AudioBackend>,
        lines: NotificationBus<String>,
        events: NotificationBus<ShowEvent>,
    ) -> Self {
        PlaybackSequencer {
            state: SequencerState::Idle,
            actors: Vec::new(),
            spawn_slots: config.spawn_slots.max(1),
            display: config.display_duration(),
            inter_line: config.inter_line_pause(),
            poll: config.audio_poll(),
            clock,
            backend,
            lines,
            events,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn actors(&self) -> &[Actor] {
        &self.actors
    }

    pub fn is_paused(&self) -> bool {
        self.clock.is_paused()
    }

    /// Play every line of `segment` in order. Returns early, dropping the
    /// unplayed lines, when `cancel` fires.
    pub async fn play_segment(
        &mut self,
        mut segment: Segment,
        cancel: &CancellationToken,
    ) -> SegmentOutcome {
        if cancel.is_cancelled() {
            return self.interrupt(&mut segment, 0, ShowError::Cancelled);
        }
        self.spawn(&segment);
        self.state = SequencerState::PlayingLine;
        info!("playing segment {}", segment.title);
        self.events.publish(ShowEvent::Title(segment.title.clone()));

        let mut played = 0;
        loop {
            if let Err(e) = self.clock.wait_unpaused(cancel).await {
                return self.interrupt(&mut segment, played, e);
            }
            let Some(line) = segment.next_line() else {
                break;
            };
            played += 1;
            if let Err(e) = self.play_line(line, cancel).await {
                return self.interrupt(&mut segment, played, e);
            }
        }

        self.state = SequencerState::AdvancingSegment;
        info!("finished playing segment {}", segment.name);
        self.events.publish(ShowEvent::SegmentFinished {
            name: segment.name.clone(),
        });
        SegmentOutcome::Finished {
            lines_played: played,
        }
    }

    async fn play_line(&mut self, line: DialogueLine, cancel: &CancellationToken) -> Result<()> {
        let DialogueLine { speaker, text, audio } = line;
        info!("{}: {}", speaker, text);
        let slot = self.slot_for(&speaker);
        self.lines.publish(text);

        let voiced = match (audio, slot) {
            (Some(clip), Some(slot)) => match self.backend.play(slot, &clip) {
                Ok(()) => true,
                Err(e) => {
                    warn!("cannot voice line for {}: {}", speaker, e);
                    false
                }
            },
            (Some(_), None) => {
                warn!("no actor bound for {}", speaker);
                false
            }
            (None, _) => false,
        };

        if voiced {
            self.state = SequencerState::WaitingOnAudio;
            self.wait_on_audio(cancel).await?;
            self.state = SequencerState::PlayingLine;
            self.clock.sleep(self.inter_line, cancel).await
        } else {
            self.clock.sleep(self.display, cancel).await
        }
    }

    /// Poll the backend until the clip ends, keeping device pause in step
    /// with the clock. Paused time is not polled.
    async fn wait_on_audio(&mut self, cancel: &CancellationToken) -> Result<()> {
        let mut pause = self.clock.subscribe();
        let mut device_paused = false;
        loop {
            let paused = *pause.borrow_and_update();
            if paused != device_paused {
                self.backend.set_paused(paused);
                device_paused = paused;
            }
            if !paused && !self.backend.is_playing() {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ShowError::Cancelled),
                _ = pause.changed() => {}
                _ = tokio::time::sleep(self.poll), if !paused => {}
            }
        }
    }

    /// Replace the previous cast with one actor per character, round-robin
    /// over the spawn slots.
    fn spawn(&mut self, segment: &Segment) {
        self.teardown();
        self.state = SequencerState::Spawning;
        self.actors = segment
            .characters
            .iter()
            .enumerate()
            .map(|(i, c)| Actor {
                character: c.clone(),
                slot: i % self.spawn_slots,
            })
            .collect();
    }

    fn slot_for(&self, character: &str) -> Option<usize> {
        self.actors
            .iter()
            .find(|a| a.character == character)
            .map(|a| a.slot)
    }

    fn interrupt(&mut self, segment: &mut Segment, played: usize, cause: ShowError) -> SegmentOutcome {
        let dropped = segment.drain();
        info!("segment {} interrupted ({}), dropped {} lines", segment.name, cause, dropped);
        self.reset();
        SegmentOutcome::Interrupted {
            lines_played: played,
            lines_dropped: dropped,
        }
    }

    /// Silence and remove every actor.
    pub fn teardown(&mut self) {
        self.backend.stop();
        self.backend.release_all();
        self.actors.clear();
    }

    /// Forced stop: tear down and go back to `Idle`.
    pub fn reset(&mut self) {
        self.teardown();
        self.state = SequencerState::Idle;
    }

    /// The backlog is empty; the show is over.
    pub fn mark_completed(&mut self) {
        self.state = SequencerState::Completed;
    }

    /// Waiting for the next segment to load.
    pub fn mark_idle(&mut self) {
        self.state = SequencerState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::TimedBackend;
    use crate::clip::AudioClip;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    struct Rig {
        seq: PlaybackSequencer,
        clock: PauseClock,
        texts: Arc<Mutex<Vec<String>>>,
        plays: Arc<Mutex<Vec<(usize, std::path::PathBuf)>>>,
    }

    fn rig(config: ShowConfig) -> Rig {
        let clock = PauseClock::new();
        let backend = TimedBackend::new(clock.clone());
        let plays = backend.history();
        let lines = NotificationBus::new();
        let texts = Arc::new(Mutex::new(Vec::new()));
        let sink = texts.clone();
        lines.subscribe(move |t: &String| sink.lock().unwrap().push(t.clone()));
        let seq = PlaybackSequencer::new(
            &config,
            clock.clone(),
            Box::new(backend),
            lines,
            NotificationBus::new(),
        );
        Rig { seq, clock, texts, plays }
    }

    fn clip(secs: f32) -> Option<AudioClip> {
        Some(AudioClip::new("line.wav", Duration::from_secs_f32(secs)))
    }

    fn segment(lines: Vec<(&str, &str, Option<AudioClip>)>) -> Segment {
        let mut seg = Segment::new("a", "Morning News", vec!["Emily".into(), "David".into()]);
        for (who, text, audio) in lines {
            seg.push_line(DialogueLine::new(who, text, audio)).unwrap();
        }
        seg
    }

    #[tokio::test(start_paused = true)]
    async fn voiced_then_silent_line_takes_five_and_a_half_seconds() {
        let mut r = rig(ShowConfig::default());
        let seg = segment(vec![("Emily", "Hello", clip(3.0)), ("David", "Bye", None)]);
        let start = Instant::now();
        let outcome = r.seq.play_segment(seg, &CancellationToken::new()).await;
        assert_eq!(outcome, SegmentOutcome::Finished { lines_played: 2 });
        assert_eq!(start.elapsed(), Duration::from_millis(5500));
        assert_eq!(*r.texts.lock().unwrap(), vec!["Hello", "Bye"]);
        assert_eq!(r.seq.state(), SequencerState::AdvancingSegment);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_delays_without_skipping() {
        let mut r = rig(ShowConfig::default());
        let seg = segment(vec![("Emily", "One", None), ("David", "Two", None)]);
        let clock = r.clock.clone();
        let texts = r.texts.clone();
        let start = Instant::now();
        let task = tokio::spawn(async move {
            r.seq.play_segment(seg, &CancellationToken::new()).await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        clock.set_paused(true);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(texts.lock().unwrap().len(), 1);
        clock.set_paused(false);

        let outcome = task.await.unwrap();
        assert_eq!(outcome, SegmentOutcome::Finished { lines_played: 2 });
        assert_eq!(start.elapsed(), Duration::from_secs(34));
        assert_eq!(*texts.lock().unwrap(), vec!["One", "Two"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_remaining_lines() {
        let mut r = rig(ShowConfig::default());
        let seg = segment(vec![
            ("Emily", "One", clip(10.0)),
            ("David", "Two", None),
            ("Emily", "Three", None),
        ]);
        let token = CancellationToken::new();
        let t2 = token.clone();
        let texts = r.texts.clone();
        let task = tokio::spawn(async move {
            let outcome = r.seq.play_segment(seg, &t2).await;
            (outcome, r.seq.state(), r.seq.actors().len())
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        let (outcome, state, actors) = task.await.unwrap();
        assert_eq!(
            outcome,
            SegmentOutcome::Interrupted { lines_played: 1, lines_dropped: 2 }
        );
        assert_eq!(state, SequencerState::Idle);
        assert_eq!(actors, 0);
        assert_eq!(*texts.lock().unwrap(), vec!["One"]);
    }

    #[tokio::test(start_paused = true)]
    async fn actors_take_slots_round_robin_and_voice_their_lines() {
        let mut cfg = ShowConfig::default();
        cfg.spawn_slots = 2;
        let mut r = rig(cfg);
        let mut seg = Segment::new("a", "T", vec!["A".into(), "B".into(), "C".into()]);
        seg.push_line(DialogueLine::new("C", "hi", clip(0.1))).unwrap();
        seg.push_line(DialogueLine::new("B", "yo", clip(0.1))).unwrap();
        r.seq.play_segment(seg, &CancellationToken::new()).await;

        let slots: Vec<usize> = r.seq.actors().iter().map(|a| a.slot).collect();
        assert_eq!(slots, vec![0, 1, 0]);
        let plays: Vec<usize> = r.plays.lock().unwrap().iter().map(|(s, _)| *s).collect();
        assert_eq!(plays, vec![0, 1]);
    }

    /// Wraps `TimedBackend`, recording pause forwarding and how many line
    /// texts had been published when each clip started.
    struct Spy {
        inner: TimedBackend,
        texts: Arc<Mutex<Vec<String>>>,
        texts_at_play: Arc<Mutex<Vec<usize>>>,
        pauses: Arc<Mutex<Vec<bool>>>,
    }

    impl AudioBackend for Spy {
        fn play(&mut self, slot: usize, clip: &AudioClip) -> Result<()> {
            let seen = self.texts.lock().unwrap().len();
            self.texts_at_play.lock().unwrap().push(seen);
            self.inner.play(slot, clip)
        }
        fn is_playing(&self) -> bool {
            self.inner.is_playing()
        }
        fn set_paused(&mut self, paused: bool) {
            self.pauses.lock().unwrap().push(paused);
        }
        fn stop(&mut self) {
            self.inner.stop()
        }
        fn release_all(&mut self) {
            self.inner.release_all()
        }
    }

    struct SpyRig {
        seq: PlaybackSequencer,
        clock: PauseClock,
        texts: Arc<Mutex<Vec<String>>>,
        texts_at_play: Arc<Mutex<Vec<usize>>>,
        pauses: Arc<Mutex<Vec<bool>>>,
    }

    fn spy_rig() -> SpyRig {
        let clock = PauseClock::new();
        let texts = Arc::new(Mutex::new(Vec::new()));
        let texts_at_play = Arc::new(Mutex::new(Vec::new()));
        let pauses = Arc::new(Mutex::new(Vec::new()));
        let spy = Spy {
            inner: TimedBackend::new(clock.clone()),
            texts: texts.clone(),
            texts_at_play: texts_at_play.clone(),
            pauses: pauses.clone(),
        };
        let lines = NotificationBus::new();
        let sink = texts.clone();
        lines.subscribe(move |t: &String| sink.lock().unwrap().push(t.clone()));
        let seq = PlaybackSequencer::new(
            &ShowConfig::default(),
            clock.clone(),
            Box::new(spy),
            lines,
            NotificationBus::new(),
        );
        SpyRig { seq, clock, texts, texts_at_play, pauses }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_plays_nothing() {
        let mut r = rig(ShowConfig::default());
        let seg = segment(vec![("Emily", "One", clip(1.0)), ("David", "Two", None)]);
        let token = CancellationToken::new();
        token.cancel();
        let outcome = r.seq.play_segment(seg, &token).await;
        assert_eq!(
            outcome,
            SegmentOutcome::Interrupted { lines_played: 0, lines_dropped: 2 }
        );
        assert!(r.texts.lock().unwrap().is_empty());
        assert!(r.plays.lock().unwrap().is_empty());
        assert_eq!(r.seq.state(), SequencerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn text_goes_out_before_the_clip_starts() {
        let mut r = spy_rig();
        let seg = segment(vec![("Emily", "One", clip(0.5)), ("David", "Two", clip(0.5))]);
        r.seq.play_segment(seg, &CancellationToken::new()).await;
        assert_eq!(*r.texts_at_play.lock().unwrap(), vec![1, 2]);
        assert_eq!(*r.texts.lock().unwrap(), vec!["One", "Two"]);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_while_waiting_on_audio_only_delays_the_line() {
        let mut r = spy_rig();
        let seg = segment(vec![("Emily", "Hello", clip(3.0))]);
        let clock = r.clock.clone();
        let pauses = r.pauses.clone();
        let start = Instant::now();
        let task = tokio::spawn(async move {
            let outcome = r.seq.play_segment(seg, &CancellationToken::new()).await;
            (outcome, r.texts.lock().unwrap().clone())
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        clock.set_paused(true);
        tokio::time::sleep(Duration::from_secs(10)).await;
        clock.set_paused(false);

        let (outcome, texts) = task.await.unwrap();
        assert_eq!(outcome, SegmentOutcome::Finished { lines_played: 1 });
        assert_eq!(start.elapsed(), Duration::from_millis(13_500));
        assert_eq!(texts, vec!["Hello"]);
        // Forwarded once per change, not once per poll.
        assert_eq!(*pauses.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn title_fires_once_per_segment() {
        let mut r = rig(ShowConfig::default());
        let events = r.seq.events.clone();
        let titles = Arc::new(Mutex::new(0usize));
        let t2 = titles.clone();
        events.subscribe(move |e| {
            if matches!(e, ShowEvent::Title(_)) {
                *t2.lock().unwrap() += 1;
            }
        });
        let seg = segment(vec![("Emily", "a", None), ("Emily", "b", None)]);
        r.seq.play_segment(seg, &CancellationToken::new()).await;
        assert_eq!(*titles.lock().unwrap(), 1);
    }
}
