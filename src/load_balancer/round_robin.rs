//! Round-robin load balancing with failover.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::load_balancer::target::{Eligibility, Target};
use crate::observability::metrics;

/// Default time an inactive target is skipped before it gets a probe.
pub const DEFAULT_INACTIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors returned by the balancer.
#[derive(Debug, Error)]
pub enum LoadBalancerError {
    /// Every candidate was skipped or failed.
    #[error("all backends are down ({attempts} attempted)")]
    AllBackendsDown { attempts: usize },
}

/// Target list and cursor, always mutated together.
#[derive(Debug)]
struct Ring {
    targets: Vec<Target>,
    cursor: usize,
}

/// Round-robin selector over an ordered list of backend URLs.
///
/// The cursor advances on every attempt, successful or not. A target whose
/// call fails is skipped until `inactive_timeout` has passed, after which it
/// receives a single half-open probe.
#[derive(Debug)]
pub struct RoundRobinBalancer {
    ring: Mutex<Ring>,
    inactive_timeout: Duration,
}

impl RoundRobinBalancer {
    pub fn new(urls: Vec<Url>) -> Self {
        Self::with_timeout(urls, DEFAULT_INACTIVE_TIMEOUT)
    }

    pub fn with_timeout(urls: Vec<Url>, inactive_timeout: Duration) -> Self {
        Self {
            ring: Mutex::new(Ring {
                targets: urls.into_iter().map(Target::new).collect(),
                cursor: 0,
            }),
            inactive_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .targets
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn inactive_timeout(&self) -> Duration {
        self.inactive_timeout
    }

    /// Snapshot of the targets and their states.
    pub fn targets(&self) -> Vec<Target> {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .targets
            .clone()
    }

    /// Call `call` with successive targets until one succeeds.
    ///
    /// At most one full turn of the ring is attempted, starting from the
    /// position the cursor had when this call began. Other callers moving the
    /// cursor meanwhile do not change which targets this call visits. The
    /// lock is only held while picking a candidate and recording its outcome,
    /// never across `call`.
    pub async fn make_request<T, E, F, Fut>(&self, mut call: F) -> Result<T, LoadBalancerError>
    where
        F: FnMut(Url) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let candidates = self.len();
        let mut start = None;
        let mut attempts = 0;

        for step in 0..candidates {
            let Some((index, url)) = self.next_candidate(&mut start, step) else {
                continue;
            };
            attempts += 1;

            match call(url.clone()).await {
                Ok(value) => {
                    self.record_outcome(index, true);
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(backend = %url, error = %e, "Backend call failed, marking inactive");
                    self.record_outcome(index, false);
                }
            }
        }

        tracing::error!(attempts, candidates, "All backends are down");
        Err(LoadBalancerError::AllBackendsDown { attempts })
    }

    /// Return the target `step` places after this call's start, if it may be
    /// tried. The first step reserves the start from the shared cursor; every
    /// step advances the cursor by one.
    fn next_candidate(&self, start: &mut Option<usize>, step: usize) -> Option<(usize, Url)> {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        let len = ring.targets.len();
        if len == 0 {
            return None;
        }

        let first = *start.get_or_insert(ring.cursor);
        ring.cursor = (ring.cursor + 1) % len;
        let index = (first + step) % len;

        let target = &mut ring.targets[index];
        match target.eligibility(self.inactive_timeout) {
            Eligibility::Ready => Some((index, target.url.clone())),
            Eligibility::Probe => {
                tracing::info!(backend = %target.url, "Probing inactive backend");
                target.begin_probe();
                Some((index, target.url.clone()))
            }
            Eligibility::Skip => None,
        }
    }

    fn record_outcome(&self, index: usize, success: bool) {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(target) = ring.targets.get_mut(index) {
            let was_active = target.is_active();
            if success {
                target.mark_success();
            } else {
                target.mark_failure();
            }
            if was_active != success {
                tracing::info!(backend = %target.url, active = success, "Backend state changed");
            }
            metrics::record_backend_state(target.url.as_str(), success);
        }
    }
}
