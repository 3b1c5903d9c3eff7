use std::time::Duration;
use web_time::Instant;

/// Wall-clock delta between processed frames. Monotonic; never reset.
#[derive(Debug, Default)]
pub struct FrameClock {
    last: Option<Instant>,
}

impl FrameClock {
    /// Time since the previous call, zero on the first.
    pub fn delta(&mut self, now: Instant) -> Duration {
        let delta = self
            .last
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or(Duration::ZERO);
        self.last = Some(now);
        delta
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered,
    Throttled,
    Stopped,
}

/// Per-frame scheduling state. Once stopped, no further frame is processed
/// even if the host had one queued.
#[derive(Debug, Default)]
pub struct FrameLoop {
    running: bool,
    interval: Option<Duration>,
    last_processed: Option<Instant>,
    pub clock: FrameClock,
    rendered: u64,
}

impl FrameLoop {
    pub fn start(&mut self, interval: Option<Duration>) {
        self.running = true;
        self.interval = interval;
        self.last_processed = None;
        self.clock = FrameClock::default();
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn rendered_frames(&self) -> u64 {
        self.rendered
    }

    /// Decides whether the frame offered at `now` does any work.
    pub fn admit(&mut self, now: Instant) -> FrameOutcome {
        if !self.running {
            return FrameOutcome::Stopped;
        }
        if let (Some(interval), Some(last)) = (self.interval, self.last_processed) {
            if now.saturating_duration_since(last) < interval {
                return FrameOutcome::Throttled;
            }
        }
        self.last_processed = Some(now);
        self.rendered += 1;
        FrameOutcome::Rendered
    }
}
