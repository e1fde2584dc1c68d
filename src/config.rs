use std::time::Duration;

/// Per-peer timing knobs. Peers in the same game do not need identical
/// values; conditional writes reconcile whoever fires first.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Local countdown for each betting window.
    pub betting_window: Duration,
    /// Pause between a draw and the next step, long enough for every peer to
    /// show the reveal.
    pub settle_delay: Duration,
    /// Gap between revealed cards, for presentation layers that animate.
    pub reveal_pacing: Duration,
    /// Fresh-read backstop for missed change events.
    pub poll_interval: Duration,
    pub command_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            betting_window: Duration::from_secs(30),
            settle_delay: Duration::from_secs(8),
            reveal_pacing: Duration::from_millis(1500),
            poll_interval: Duration::from_secs(3),
            command_capacity: 32,
        }
    }
}

impl SessionConfig {
    pub fn with_betting_window(mut self, window: Duration) -> Self {
        self.betting_window = window;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
