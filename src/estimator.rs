//! Estimator interface and timeout-guarded client.
//!
//! Estimators are pluggable scoring helpers (congestion, time-sensitivity
//! risk) that may live behind a network hop. The arbiter never blocks on
//! them: the client runs calls on a dedicated worker thread and falls back
//! to the last known score for the zone — flagged as degraded — when a call
//! exceeds its budget.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EstimatorError;
use crate::group::GroupId;
use crate::resource::ZoneId;
use crate::time::TimeWindow;

/// Per-group scoring request. Fetched once per conflict group, never per
/// proposal, to keep estimator traffic linear in groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEstimateRequest {
    /// The conflict group being arbitrated.
    pub group: GroupId,

    /// Primary zone of the contention.
    pub zone: ZoneId,

    /// Envelope window of the contention.
    pub window: TimeWindow,

    /// Distinct resources contended.
    pub resource_count: usize,

    /// Proposals in the group.
    pub proposal_count: usize,

    /// Sum of requested claim durations, in minutes.
    pub total_requested_minutes: i64,
}

/// A scalar score pair with a confidence indicator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    /// Congestion score in [0, 1] for the zone/window.
    pub congestion: f32,

    /// Time-sensitivity risk in [0, 1].
    pub time_risk: f32,

    /// The estimator's confidence in its own scores, in [0, 1].
    pub confidence: f32,

    /// True when this estimate is a fallback, not a fresh score.
    pub degraded: bool,
}

impl Estimate {
    /// Neutral fallback used when no prior score exists for a zone.
    #[must_use]
    pub const fn neutral_degraded() -> Self {
        Self {
            congestion: 0.5,
            time_risk: 0.5,
            confidence: 0.0,
            degraded: true,
        }
    }

    /// Marks the estimate as a degraded fallback.
    #[must_use]
    pub const fn as_degraded(mut self) -> Self {
        self.degraded = true;
        self
    }
}

/// Call contract for pluggable scoring helpers.
pub trait Estimator: Send + Sync {
    /// Scores a conflict group against the current world state.
    ///
    /// # Errors
    ///
    /// Implementations may fail or block; the [`EstimatorClient`] converts
    /// both into a degraded fallback.
    fn estimate(&self, request: &GroupEstimateRequest) -> Result<Estimate, EstimatorError>;
}

/// An estimator returning a fixed score. Useful for tests and as a stand-in
/// when no scoring service is deployed.
#[derive(Debug, Clone)]
pub struct FixedEstimator {
    estimate: Estimate,
}

impl FixedEstimator {
    /// Creates a fixed estimator.
    #[must_use]
    pub const fn new(congestion: f32, time_risk: f32) -> Self {
        Self {
            estimate: Estimate {
                congestion,
                time_risk,
                confidence: 1.0,
                degraded: false,
            },
        }
    }
}

impl Default for FixedEstimator {
    fn default() -> Self {
        Self::new(0.2, 0.2)
    }
}

impl Estimator for FixedEstimator {
    fn estimate(&self, _request: &GroupEstimateRequest) -> Result<Estimate, EstimatorError> {
        Ok(self.estimate)
    }
}

struct EstimateJob {
    request: GroupEstimateRequest,
    reply: Sender<Result<Estimate, EstimatorError>>,
}

/// Timeout-guarded client around an [`Estimator`].
///
/// Runs the inner estimator on a dedicated worker thread; callers wait with
/// `recv_timeout` and never block past the configured budget. Completed
/// scores are cached per zone as the degraded fallback.
pub struct EstimatorClient {
    tx: Sender<EstimateJob>,
    timeout: Duration,
    queue_capacity: usize,
    last_known: RwLock<HashMap<ZoneId, Estimate>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EstimatorClient {
    /// Spawns the worker thread and returns the client.
    #[must_use]
    pub fn new(inner: Arc<dyn Estimator>, timeout: Duration, queue_capacity: usize) -> Self {
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx): (Sender<EstimateJob>, Receiver<EstimateJob>) = bounded(queue_capacity);

        let handle = thread::Builder::new()
            .name("warden-estimator".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    let result = inner.estimate(&job.request);
                    // The caller may have timed out and dropped its receiver.
                    let _ = job.reply.send(result);
                }
            })
            .expect("failed to spawn estimator worker");

        Self {
            tx,
            timeout,
            queue_capacity,
            last_known: RwLock::new(HashMap::new()),
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Fetches a score for a group, degrading instead of failing.
    ///
    /// Returns a fresh estimate when the inner call completes within the
    /// budget; otherwise the last known score for the zone (or a neutral
    /// default) flagged as degraded.
    pub fn fetch(&self, request: GroupEstimateRequest) -> Estimate {
        let zone = request.zone;
        let (reply_tx, reply_rx) = bounded(1);
        let job = EstimateJob {
            request,
            reply: reply_tx,
        };

        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                warn!(%zone, capacity = self.queue_capacity, "estimator queue unavailable, using degraded score");
                return self.degraded_for(zone);
            }
        }

        match reply_rx.recv_timeout(self.timeout) {
            Ok(Ok(estimate)) => {
                if let Ok(mut cache) = self.last_known.write() {
                    cache.insert(zone, estimate);
                }
                estimate
            }
            Ok(Err(err)) => {
                warn!(%zone, error = %err, "estimator call failed, using degraded score");
                self.degraded_for(zone)
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                warn!(%zone, timeout_ms = self.timeout.as_millis() as u64, "estimator call timed out, using degraded score");
                self.degraded_for(zone)
            }
        }
    }

    fn degraded_for(&self, zone: ZoneId) -> Estimate {
        self.last_known
            .read()
            .ok()
            .and_then(|cache| cache.get(&zone).copied())
            .map_or_else(Estimate::neutral_degraded, Estimate::as_degraded)
    }
}

impl Drop for EstimatorClient {
    fn drop(&mut self) {
        // Close the channel so the worker drains and exits, then join.
        let (closed_tx, _closed_rx) = bounded::<EstimateJob>(1);
        drop(std::mem::replace(&mut self.tx, closed_tx));
        if let Ok(mut guard) = self.worker.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(zone: ZoneId) -> GroupEstimateRequest {
        let now = chrono::Utc::now();
        GroupEstimateRequest {
            group: GroupId::new(),
            zone,
            window: TimeWindow::new(now, now + chrono::Duration::minutes(20)).unwrap(),
            resource_count: 1,
            proposal_count: 2,
            total_requested_minutes: 30,
        }
    }

    struct SlowEstimator {
        delay: Duration,
    }

    impl Estimator for SlowEstimator {
        fn estimate(&self, _request: &GroupEstimateRequest) -> Result<Estimate, EstimatorError> {
            thread::sleep(self.delay);
            Ok(Estimate {
                congestion: 0.9,
                time_risk: 0.1,
                confidence: 1.0,
                degraded: false,
            })
        }
    }

    struct FailingEstimator;

    impl Estimator for FailingEstimator {
        fn estimate(&self, _request: &GroupEstimateRequest) -> Result<Estimate, EstimatorError> {
            Err(EstimatorError::Failed {
                message: "upstream unavailable".to_string(),
            })
        }
    }

    #[test]
    fn fresh_estimate_within_budget() {
        let client = EstimatorClient::new(
            Arc::new(FixedEstimator::new(0.4, 0.3)),
            Duration::from_millis(500),
            8,
        );
        let estimate = client.fetch(request(ZoneId::new()));
        assert!(!estimate.degraded);
        assert!((estimate.congestion - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn timeout_falls_back_to_neutral_when_no_history() {
        let client = EstimatorClient::new(
            Arc::new(SlowEstimator {
                delay: Duration::from_millis(300),
            }),
            Duration::from_millis(20),
            8,
        );
        let estimate = client.fetch(request(ZoneId::new()));
        assert!(estimate.degraded);
        assert!((estimate.congestion - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn timeout_falls_back_to_last_known_for_zone() {
        struct FlakyEstimator {
            calls: Mutex<u32>,
        }
        impl Estimator for FlakyEstimator {
            fn estimate(&self, _request: &GroupEstimateRequest) -> Result<Estimate, EstimatorError> {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                if *calls == 1 {
                    Ok(Estimate {
                        congestion: 0.8,
                        time_risk: 0.6,
                        confidence: 1.0,
                        degraded: false,
                    })
                } else {
                    thread::sleep(Duration::from_millis(300));
                    Ok(Estimate::neutral_degraded())
                }
            }
        }

        let client = EstimatorClient::new(
            Arc::new(FlakyEstimator {
                calls: Mutex::new(0),
            }),
            Duration::from_millis(100),
            8,
        );

        let zone = ZoneId::new();
        let first = client.fetch(request(zone));
        assert!(!first.degraded);

        let second = client.fetch(request(zone));
        assert!(second.degraded);
        assert!((second.congestion - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn failure_degrades_instead_of_propagating() {
        let client = EstimatorClient::new(
            Arc::new(FailingEstimator),
            Duration::from_millis(100),
            8,
        );
        let estimate = client.fetch(request(ZoneId::new()));
        assert!(estimate.degraded);
    }

    #[test]
    fn drop_joins_worker() {
        let client = EstimatorClient::new(
            Arc::new(FixedEstimator::default()),
            Duration::from_millis(100),
            8,
        );
        drop(client);
    }
}
