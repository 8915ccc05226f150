//! # timer
//!
//! why: track the election and heartbeat deadlines the dispatch loop polls
//! relations: owned by agent.rs, configured through config.rs
//! what: Timers with deadline checks and randomized election re-arming

use crate::config::TimingConfig;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::Instant;

/// the two per-node deadline timers
///
/// deadlines are polled on the dispatch tick rather than waited on, so a
/// fire can never interleave with message handling. the election deadline
/// is re-drawn uniformly from the configured range on every re-arm; the
/// randomness is per-node, seeded from entropy at startup.
pub struct Timers {
    rng: SmallRng,
    election_range: (u64, u64),
    heartbeat_interval: Duration,
    election_deadline: Instant,
    heartbeat_deadline: Instant,
}

impl Timers {
    pub fn new(timing: &TimingConfig) -> Self {
        let mut timers = Self {
            rng: SmallRng::from_entropy(),
            election_range: (timing.election_timeout_min, timing.election_timeout_max),
            heartbeat_interval: timing.heartbeat_interval(),
            election_deadline: Instant::now(),
            heartbeat_deadline: Instant::now(),
        };
        timers.reset_election();
        timers.reset_heartbeat();
        timers
    }

    /// re-arm the election timer with a fresh random timeout
    pub fn reset_election(&mut self) {
        let (min, max) = self.election_range;
        let timeout = Duration::from_millis(self.rng.gen_range(min..=max));
        self.election_deadline = Instant::now() + timeout;
    }

    /// re-arm the heartbeat timer with its fixed interval
    pub fn reset_heartbeat(&mut self) {
        self.heartbeat_deadline = Instant::now() + self.heartbeat_interval;
    }

    pub fn election_due(&self) -> bool {
        Instant::now() >= self.election_deadline
    }

    pub fn heartbeat_due(&self) -> bool {
        Instant::now() >= self.heartbeat_deadline
    }
}
