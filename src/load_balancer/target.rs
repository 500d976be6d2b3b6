//! Load-balancer target abstraction.
//!
//! # Responsibilities
//! - Represent a single backend URL
//! - Track whether it is active and since when it has been inactive
//! - Decide whether an inactive target may receive a half-open probe

use std::time::{Duration, Instant};
use url::Url;

/// Health state of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Receives traffic in turn.
    Active,
    /// Failed a call at the given instant.
    Inactive { since: Instant },
}

/// Outcome of asking a target whether it may be tried now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Active, try it.
    Ready,
    /// Inactive past the timeout, try it once.
    Probe,
    /// Inactive within the timeout, skip it.
    Skip,
}

/// A single backend URL owned by a balancer.
#[derive(Debug, Clone)]
pub struct Target {
    /// Base URL requests are forwarded to.
    pub url: Url,
    /// Current health state.
    pub state: TargetState,
}

impl Target {
    /// Create a target; new targets start active.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            state: TargetState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == TargetState::Active
    }

    /// Whether the target may be called now, given the inactivity timeout.
    pub fn eligibility(&self, inactive_timeout: Duration) -> Eligibility {
        match self.state {
            TargetState::Active => Eligibility::Ready,
            TargetState::Inactive { since } if since.elapsed() >= inactive_timeout => {
                Eligibility::Probe
            }
            TargetState::Inactive { .. } => Eligibility::Skip,
        }
    }

    /// Claim the half-open probe: re-stamp the inactivity clock so that other
    /// callers keep skipping this target while the probe is in flight.
    pub fn begin_probe(&mut self) {
        if let TargetState::Inactive { since } = &mut self.state {
            *since = Instant::now();
        }
    }

    /// Report a successful call.
    pub fn mark_success(&mut self) {
        self.state = TargetState::Active;
    }

    /// Report a failed call; restarts the inactivity clock.
    pub fn mark_failure(&mut self) {
        self.state = TargetState::Inactive {
            since: Instant::now(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target::new(Url::parse("http://127.0.0.1:3000/").unwrap())
    }

    #[test]
    fn test_new_target_is_ready() {
        let t = target();
        assert!(t.is_active());
        assert_eq!(t.eligibility(Duration::from_secs(30)), Eligibility::Ready);
    }

    #[test]
    fn test_failure_then_probe_then_recovery() {
        let mut t = target();
        t.mark_failure();
        assert!(!t.is_active());
        assert_eq!(t.eligibility(Duration::from_secs(30)), Eligibility::Skip);
        assert_eq!(t.eligibility(Duration::ZERO), Eligibility::Probe);

        t.begin_probe();
        assert_eq!(t.eligibility(Duration::from_secs(30)), Eligibility::Skip);

        t.mark_success();
        assert_eq!(t.eligibility(Duration::from_secs(30)), Eligibility::Ready);
    }
}
