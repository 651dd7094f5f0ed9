//! Resolutions: the arbitration engine's decided dispositions.
//!
//! A resolution is versioned: re-arbitration after a stale write or a human
//! rejection produces the next version for the same conflict group.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::group::GroupId;
use crate::proposal::ProposalId;
use crate::time::TimeWindow;

/// Unique identifier for a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolutionId(Uuid);

impl ResolutionId {
    /// Creates a new random resolution ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ResolutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResolutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-proposal outcome of arbitration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "disposition")]
pub enum Disposition {
    /// Proceed in the requested window.
    Approve,

    /// Proceed in a later window.
    Reschedule {
        /// The assigned window.
        window: TimeWindow,
    },

    /// Do not proceed.
    Reject {
        /// Why the proposal was rejected.
        reason: String,
    },

    /// No safety-compliant disposition exists. Always escalates.
    Infeasible {
        /// Why nothing feasible remains.
        reason: String,
    },
}

impl Disposition {
    /// Ordering used by the priority-monotonicity property:
    /// reject < reschedule < approve.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Reject { .. } | Self::Infeasible { .. } => 0,
            Self::Reschedule { .. } => 1,
            Self::Approve => 2,
        }
    }

    /// Returns true if the proposal may proceed (possibly rescheduled).
    #[must_use]
    pub const fn proceeds(&self) -> bool {
        matches!(self, Self::Approve | Self::Reschedule { .. })
    }

    /// Returns true for the infeasible marker.
    #[must_use]
    pub const fn is_infeasible(&self) -> bool {
        matches!(self, Self::Infeasible { .. })
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::Reschedule { window } => {
                write!(f, "reschedule({} .. {})", window.start, window.end)
            }
            Self::Reject { reason } => write!(f, "reject({reason})"),
            Self::Infeasible { reason } => write!(f, "infeasible({reason})"),
        }
    }
}

/// Which policy rule decided a disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRule {
    /// Rule 1: hard safety constraints.
    Safety,
    /// Rule 2: priority / time-sensitivity.
    Priority,
    /// Rule 3: first-submitted-first-served tie-break.
    SubmissionOrder,
    /// Rule 4: global cost minimization across the group.
    GlobalCost,
    /// No conflict existed; approved directly.
    DirectApproval,
    /// A human decision replaced the engine's disposition.
    HumanDecision,
    /// A decision request timed out and auto-resolved.
    DecisionTimeout,
}

impl DecisionRule {
    /// Returns a short stable identifier suitable for rationale strings.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Safety => "safety",
            Self::Priority => "priority",
            Self::SubmissionOrder => "submission_order",
            Self::GlobalCost => "global_cost",
            Self::DirectApproval => "direct_approval",
            Self::HumanDecision => "human_decision",
            Self::DecisionTimeout => "decision_timeout",
        }
    }
}

impl fmt::Display for DecisionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One proposal's disposition with the rule that decided it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalDisposition {
    /// The proposal.
    pub proposal: ProposalId,

    /// The decided outcome.
    pub disposition: Disposition,

    /// The rule that decided it.
    pub rule: DecisionRule,

    /// Short human-readable note for the rationale string.
    pub note: String,
}

/// The output of arbitration for one conflict group (or one unconflicted
/// proposal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Unique identifier.
    pub id: ResolutionId,

    /// The conflict group this resolves, or `None` for a direct
    /// no-conflict approval.
    pub group: Option<GroupId>,

    /// Version, starting at 1. Re-arbitration bumps it.
    pub version: u32,

    /// Per-proposal dispositions.
    pub dispositions: Vec<ProposalDisposition>,

    /// Human-readable explanation, rule-attributed per proposal.
    pub rationale: String,

    /// `1 − ambiguity`: how decisive the policy outcome was.
    pub confidence: f32,

    /// Residual safety risk of the chosen dispositions.
    pub safety_risk: f32,

    /// Residual deadline risk of the chosen dispositions.
    pub deadline_risk: f32,

    /// True when a degraded estimator score was used.
    pub degraded_estimate: bool,

    /// True when this resolution came from a decision-request timeout.
    pub auto_timeout: bool,

    /// When the engine decided.
    pub decided_at: DateTime<Utc>,
}

impl Resolution {
    /// Looks up the disposition for a proposal.
    #[must_use]
    pub fn disposition_for(&self, id: ProposalId) -> Option<&ProposalDisposition> {
        self.dispositions.iter().find(|d| d.proposal == id)
    }

    /// Returns true if any member is infeasible.
    #[must_use]
    pub fn has_infeasible(&self) -> bool {
        self.dispositions
            .iter()
            .any(|d| d.disposition.is_infeasible())
    }

    /// Returns true if any member may proceed.
    #[must_use]
    pub fn any_proceeds(&self) -> bool {
        self.dispositions.iter().any(|d| d.disposition.proceeds())
    }

    /// The next version of this resolution with replaced dispositions.
    #[must_use]
    pub fn next_version(&self, dispositions: Vec<ProposalDisposition>, rationale: String) -> Self {
        Self {
            id: ResolutionId::new(),
            group: self.group,
            version: self.version + 1,
            dispositions,
            rationale,
            confidence: self.confidence,
            safety_risk: self.safety_risk,
            deadline_risk: self.deadline_risk,
            degraded_estimate: self.degraded_estimate,
            auto_timeout: false,
            decided_at: Utc::now(),
        }
    }
}
