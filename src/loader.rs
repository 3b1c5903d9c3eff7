//! Asynchronous character loading, one attempt at a time.
//!
//! Loaders run wherever they like (a worker thread, a future on the page's
//! executor) and talk back through a [`LoadReporter`]. Every message is stamped
//! with the attempt it belongs to; the [`LoadOrchestrator`] drops anything
//! that does not belong to the attempt currently in flight.

use crate::asset::{CharacterAsset, GpuError};
use crate::config::SceneConfig;
use crate::progress::{percent_of, ProgressTracker};
use crate::state::FailureReason;
use crate::timers::{TimerId, TimerKind, TimerQueue};
use std::fmt;
use std::sync::mpsc;
use web_time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadError {
    Fetch(String),
    Parse(String),
    Upload(GpuError),
    Surface(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(error) => write!(f, "fetching character failed: {error}"),
            Self::Parse(error) => write!(f, "decoding character failed: {error}"),
            Self::Upload(error) => write!(f, "uploading character failed: {error}"),
            Self::Surface(error) => write!(f, "recreating render surface failed: {error}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<GpuError> for LoadError {
    fn from(value: GpuError) -> Self {
        Self::Upload(value)
    }
}

#[derive(Debug)]
pub enum LoadMessage {
    Progress { loaded: u64, total: u64 },
    Finished(Result<CharacterAsset, LoadError>),
}

#[derive(Debug)]
pub struct LoadEvent {
    pub attempt: AttemptId,
    /// When the loader reported, not when the controller got around to it.
    pub sent_at: Instant,
    pub message: LoadMessage,
}

/// A loader's line back to the controller for a single attempt.
#[derive(Clone, Debug)]
pub struct LoadReporter {
    attempt: AttemptId,
    tx: mpsc::Sender<LoadEvent>,
}

impl LoadReporter {
    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// Byte-level progress. Returns false once nobody is listening.
    pub fn progress(&self, loaded: u64, total: u64) -> bool {
        self.send(Instant::now(), LoadMessage::Progress { loaded, total })
    }

    pub fn finish(&self, result: Result<CharacterAsset, LoadError>) -> bool {
        self.finish_at(Instant::now(), result)
    }

    /// Like [`LoadReporter::finish`], for loaders that know when the result
    /// actually became available.
    pub fn finish_at(&self, at: Instant, result: Result<CharacterAsset, LoadError>) -> bool {
        self.send(at, LoadMessage::Finished(result))
    }

    fn send(&self, sent_at: Instant, message: LoadMessage) -> bool {
        self.tx
            .send(LoadEvent {
                attempt: self.attempt,
                sent_at,
                message,
            })
            .is_ok()
    }
}

/// Starts fetching the character. Must return promptly; the actual work
/// reports back through `reporter`.
pub trait CharacterLoader {
    fn start(&mut self, reporter: LoadReporter);
}

#[derive(Debug)]
pub enum LoadOutcome {
    Progress(u8),
    SlowWarning,
    Loaded(CharacterAsset),
    Failed(FailureReason),
}

#[derive(Debug)]
struct ActiveAttempt {
    id: AttemptId,
    slow_timer: TimerId,
    timeout_timer: TimerId,
}

pub struct LoadOrchestrator {
    last_attempt: u64,
    active: Option<ActiveAttempt>,
    progress: ProgressTracker,
    slow: bool,
    tx: mpsc::Sender<LoadEvent>,
    rx: mpsc::Receiver<LoadEvent>,
}

impl Default for LoadOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadOrchestrator {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            last_attempt: 0,
            active: None,
            progress: ProgressTracker::default(),
            slow: false,
            tx,
            rx,
        }
    }

    pub fn current_attempt(&self) -> Option<AttemptId> {
        self.active.as_ref().map(|active| active.id)
    }

    pub fn last_attempt(&self) -> Option<AttemptId> {
        (self.last_attempt > 0).then_some(AttemptId(self.last_attempt))
    }

    pub fn is_slow(&self) -> bool {
        self.slow
    }

    pub fn percent(&self) -> u8 {
        self.progress.percent()
    }

    /// Starts a fresh attempt: previous attempt invalidated, progress back to
    /// 0, both deadline timers armed, loader kicked off.
    pub fn begin(
        &mut self,
        loader: &mut dyn CharacterLoader,
        timers: &mut TimerQueue,
        config: &SceneConfig,
        now: Instant,
    ) -> AttemptId {
        self.abandon(timers);
        self.last_attempt += 1;
        let id = AttemptId(self.last_attempt);
        self.progress.reset();
        self.slow = false;
        let slow_timer = timers.schedule(now, config.slow_loading_after, TimerKind::SlowLoading(id));
        let timeout_timer = timers.schedule(now, config.load_timeout, TimerKind::LoadTimeout(id));
        self.active = Some(ActiveAttempt {
            id,
            slow_timer,
            timeout_timer,
        });
        log::info!("character load attempt {id} started");
        loader.start(LoadReporter {
            attempt: id,
            tx: self.tx.clone(),
        });
        id
    }

    /// Invalidates the in-flight attempt, if any. Later messages for it are dropped.
    pub fn abandon(&mut self, timers: &mut TimerQueue) -> Option<AttemptId> {
        let active = self.active.take()?;
        timers.cancel(active.slow_timer);
        timers.cancel(active.timeout_timer);
        log::debug!("character load attempt {} abandoned", active.id);
        Some(active.id)
    }

    /// Everything loaders have sent since the last call, stale or not.
    pub fn drain(&mut self) -> Vec<LoadEvent> {
        self.rx.try_iter().collect()
    }

    pub fn accept(&mut self, event: LoadEvent, timers: &mut TimerQueue) -> Option<LoadOutcome> {
        if self.current_attempt() != Some(event.attempt) {
            log::debug!("dropping message from stale load attempt {}", event.attempt);
            return None;
        }
        match event.message {
            LoadMessage::Progress { loaded, total } => {
                let percent = percent_of(loaded, total)?;
                self.progress.advance(percent).map(LoadOutcome::Progress)
            }
            LoadMessage::Finished(Ok(asset)) => {
                self.settle(timers);
                Some(LoadOutcome::Loaded(asset))
            }
            LoadMessage::Finished(Err(error)) => {
                log::error!("character load attempt {} failed: {error}", event.attempt);
                self.settle(timers);
                Some(LoadOutcome::Failed(FailureReason::Load(error)))
            }
        }
    }

    /// Handles one of this orchestrator's own timers. Returns `None` for other
    /// kinds and for timers of attempts that are no longer current.
    pub fn on_timer(&mut self, kind: TimerKind, timers: &mut TimerQueue) -> Option<LoadOutcome> {
        match kind {
            TimerKind::SlowLoading(attempt) if self.current_attempt() == Some(attempt) => {
                log::warn!("character load attempt {attempt} is slow");
                self.slow = true;
                Some(LoadOutcome::SlowWarning)
            }
            TimerKind::LoadTimeout(attempt) if self.current_attempt() == Some(attempt) => {
                log::error!("character load attempt {attempt} timed out");
                self.settle(timers);
                Some(LoadOutcome::Failed(FailureReason::Timeout))
            }
            _ => None,
        }
    }

    /// Forces progress to 100. Returns `Some(100)` the first time per attempt.
    pub fn complete_progress(&mut self) -> Option<u8> {
        self.progress.complete()
    }

    fn settle(&mut self, timers: &mut TimerQueue) {
        if let Some(active) = self.active.take() {
            timers.cancel(active.slow_timer);
            timers.cancel(active.timeout_timer);
        }
    }
}
