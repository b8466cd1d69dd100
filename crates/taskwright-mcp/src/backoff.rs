//! Full-jitter exponential backoff for MCP reconnection (§4.3).

use std::time::Duration;

use rand::Rng;

pub struct Backoff {
    base_ms: u64,
    cap_ms: u64,
    current_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, cap_ms: u64) -> Self {
        Self {
            base_ms,
            cap_ms,
            current_ms: base_ms,
        }
    }

    /// Reset to the base delay — called once a connection becomes `ready`.
    pub fn reset(&mut self) {
        self.current_ms = self.base_ms;
    }

    /// Full jitter: a uniformly random delay in `[0, current_ms]`, then the
    /// ceiling doubles (capped) for the next call.
    pub fn next_delay(&mut self) -> Duration {
        let jittered = if self.current_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.current_ms)
        };
        self.current_ms = (self.current_ms * 2).min(self.cap_ms);
        Duration::from_millis(jittered)
    }
}
