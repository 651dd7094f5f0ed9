//! Arbiter configuration.
//!
//! Every threshold in the escalation and intake policies is configuration,
//! not contract. The defaults mirror the policy values the engine was
//! originally tuned with; deployments are expected to adjust them.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Tunable thresholds and timeouts for the arbiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbiterConfig {
    /// Maximum age of a proposal's world snapshot at intake, in seconds.
    pub staleness_bound_secs: i64,

    /// Resolutions below this confidence escalate to a human.
    pub confidence_threshold: f32,

    /// Proposals with risk above this threshold force escalation.
    pub risk_threshold: f32,

    /// Conflict groups larger than this escalate.
    pub complexity_threshold: usize,

    /// How long a decision request may stay unanswered before it is
    /// auto-resolved with the engine's lowest-risk disposition.
    pub decision_timeout_secs: i64,

    /// Budget for one estimator call before the degraded fallback is used.
    pub estimator_timeout_ms: u64,

    /// Queued estimator requests before callers degrade immediately.
    pub estimator_queue_capacity: usize,

    /// Cap on reschedule candidates examined per proposal.
    pub max_reschedule_candidates: usize,

    /// How many times a stale-write commit triggers re-detection before
    /// the group is parked with an internal error.
    pub max_commit_retries: u32,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            staleness_bound_secs: 30,
            confidence_threshold: 0.95,
            risk_threshold: 0.35,
            complexity_threshold: 3,
            decision_timeout_secs: 120,
            estimator_timeout_ms: 250,
            estimator_queue_capacity: 64,
            max_reschedule_candidates: 8,
            max_commit_retries: 3,
        }
    }
}

impl ArbiterConfig {
    /// Staleness bound as a chrono duration.
    #[must_use]
    pub fn staleness_bound(&self) -> Duration {
        Duration::seconds(self.staleness_bound_secs)
    }

    /// Decision timeout as a chrono duration.
    #[must_use]
    pub fn decision_timeout(&self) -> Duration {
        Duration::seconds(self.decision_timeout_secs)
    }

    /// Estimator timeout as a std duration.
    #[must_use]
    pub fn estimator_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.estimator_timeout_ms)
    }
}
