//! Lifecycle tunables for [`Popen`](crate::Popen).

use std::time::Duration;

/// Polling cadence while waiting for a reap.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long the drop path gives SIGTERM before escalating.
const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);
/// How long the drop path waits for the SIGKILL reap.
const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(1);

/// Tunable intervals for waits and the drop-time cleanup escalation.
///
/// The defaults reproduce the standard discipline: 10ms reap polling,
/// a 5 second SIGTERM grace period, then SIGKILL with a bounded reap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopenConfig {
    /// Sleep between `wait4(WNOHANG)` probes inside [`Popen::wait`](crate::Popen::wait).
    pub poll_interval: Duration,
    /// Grace period after SIGTERM before the drop path sends SIGKILL.
    pub terminate_grace: Duration,
    /// Bound on the post-SIGKILL reap attempt in the drop path.
    pub kill_grace: Duration,
}

impl Default for PopenConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

impl PopenConfig {
    /// Replace zero intervals with the defaults. A zero poll interval would
    /// turn every wait into a spin loop.
    pub fn normalized(mut self) -> Self {
        if self.poll_interval.is_zero() {
            self.poll_interval = DEFAULT_POLL_INTERVAL;
        }
        if self.kill_grace.is_zero() {
            self.kill_grace = DEFAULT_KILL_GRACE;
        }
        self
    }
}
