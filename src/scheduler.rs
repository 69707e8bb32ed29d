//! Cycle scheduling
//!
//! Re-arms the reply loop after every cycle with a delay drawn uniformly
//! from the configured interval. The randomized cadence avoids a fixed
//! polling signature. The next timer is armed only after the current cycle
//! finishes, so at most one cycle runs at a time and there is no catch-up
//! of missed cycles.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::config::BotConfig;
use crate::cycle::{CycleOutcome, run_cycle};
use crate::gmail::MailProvider;

/// Scheduler phase
///
/// `Idle` while waiting for the timer, `Running` while a cycle is in
/// progress. Transitions happen only inside [`Scheduler::run_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Randomized-interval driver for the reply loop
pub struct Scheduler {
    delay_min_ms: u64,
    delay_max_ms: u64,
    state: SchedulerState,
}

impl Scheduler {
    /// Build a scheduler from the configured delay bounds
    pub fn new(config: &BotConfig) -> Self {
        Self {
            delay_min_ms: config.delay_min_ms,
            delay_max_ms: config.delay_max_ms,
            state: SchedulerState::Idle,
        }
    }

    /// Current phase
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Run one cycle and return the delay to wait before the next
    ///
    /// The cycle's outcome (including failure) never affects scheduling:
    /// a new delay is drawn either way.
    pub async fn run_once<P: MailProvider>(
        &mut self,
        provider: &P,
        config: &BotConfig,
    ) -> (CycleOutcome, Duration) {
        self.state = SchedulerState::Running;
        let outcome = run_cycle(provider, config).await;
        self.state = SchedulerState::Idle;

        let delay = self.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "next cycle armed");
        (outcome, delay)
    }

    /// Drive the loop forever: cycle, sleep, repeat
    ///
    /// The first cycle runs immediately; every later cycle waits out the
    /// drawn delay first.
    pub async fn run<P: MailProvider>(&mut self, provider: &P, config: &BotConfig) {
        loop {
            let (_, delay) = self.run_once(provider, config).await;
            tokio::time::sleep(delay).await;
        }
    }

    /// Draw the next delay uniformly from `[delay_min_ms, delay_max_ms]`
    fn next_delay(&self) -> Duration {
        let ms = rand::thread_rng().gen_range(self.delay_min_ms..=self.delay_max_ms);
        Duration::from_millis(ms)
    }
}
