//! Escalation gate and the human-review boundary.
//!
//! A deterministic predicate decides whether a resolution may auto-finalize
//! or must be reviewed. Escalation blocks only the conflicting proposals;
//! the rest of the system keeps processing. Every decision request carries
//! an explicit timeout after which it auto-resolves with the engine's
//! lowest-risk disposition, flagged for audit.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ArbiterConfig;
use crate::group::{ConflictGroup, GroupId};
use crate::intake::ActiveProposal;
use crate::proposal::{ProducerId, ProposalId};
use crate::resolution::{Disposition, Resolution};
use crate::time::TimeWindow;
use crate::world::Snapshot;

/// Unique identifier for a decision request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new random request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a resolution escalated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum EscalationReason {
    /// Confidence fell below the configured threshold.
    LowConfidence {
        /// The resolution's confidence.
        confidence: f32,
        /// The configured threshold.
        threshold: f32,
    },

    /// A member's risk score exceeds the safety threshold.
    RiskExceeded {
        /// The risky proposal.
        proposal: ProposalId,
        /// Its risk score.
        risk: f32,
        /// The configured threshold.
        threshold: f32,
    },

    /// The group is larger than the complexity threshold.
    GroupTooLarge {
        /// Member count.
        size: usize,
        /// The configured threshold.
        threshold: usize,
    },

    /// A member has no feasible safety-compliant disposition.
    InfeasibleMember {
        /// The infeasible proposal.
        proposal: ProposalId,
    },
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowConfidence {
                confidence,
                threshold,
            } => write!(f, "confidence {confidence:.2} below threshold {threshold:.2}"),
            Self::RiskExceeded {
                proposal, risk, ..
            } => write!(f, "proposal {proposal} risk {risk:.2} exceeds threshold"),
            Self::GroupTooLarge { size, threshold } => {
                write!(f, "group size {size} exceeds threshold {threshold}")
            }
            Self::InfeasibleMember { proposal } => {
                write!(f, "proposal {proposal} has no feasible disposition")
            }
        }
    }
}

/// Whether a resolution may auto-finalize.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationVerdict {
    /// Finalize immediately.
    AutoFinalize,
    /// Defer to a human, for these reasons.
    Escalate(Vec<EscalationReason>),
}

/// Per-proposal detail shown to the reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalSummary {
    /// The proposal.
    pub id: ProposalId,

    /// Submitting producer.
    pub producer: ProducerId,

    /// Producer kind tag.
    pub producer_kind: String,

    /// Requested window.
    pub window: TimeWindow,

    /// Priority.
    pub priority: u8,

    /// Risk score.
    pub risk: f32,

    /// Uncertainty score.
    pub uncertainty: f32,

    /// The producer's own rationale.
    pub rationale: String,
}

impl From<&ActiveProposal> for ProposalSummary {
    fn from(active: &ActiveProposal) -> Self {
        let p = &active.proposal;
        Self {
            id: p.id,
            producer: p.producer,
            producer_kind: p.producer_kind.clone(),
            window: p.window,
            priority: p.priority,
            risk: p.risk,
            uncertainty: p.uncertainty,
            rationale: p.rationale.clone(),
        }
    }
}

/// Which downstream commitments the recommendation protects or affects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactPreview {
    /// Committed claims overlapping the group window.
    pub committed_claims_in_window: usize,

    /// Members that proceed under the recommendation.
    pub protected_proposals: Vec<ProposalId>,

    /// Members that are rejected or infeasible under the recommendation.
    pub displaced_proposals: Vec<ProposalId>,

    /// Total reschedule delay across the group, in minutes.
    pub total_delay_minutes: i64,
}

/// The package handed to a human decision-maker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    /// Unique identifier.
    pub id: RequestId,

    /// The conflict group under review.
    pub group: GroupId,

    /// One-paragraph conflict summary.
    pub summary: String,

    /// Why the gate escalated.
    pub reasons: Vec<EscalationReason>,

    /// Per-proposal detail.
    pub proposals: Vec<ProposalSummary>,

    /// The engine's recommended resolution.
    pub recommendation: Resolution,

    /// Downstream impact of the recommendation.
    pub impact: ImpactPreview,

    /// When the request was created.
    pub requested_at: DateTime<Utc>,

    /// When the request times out and auto-resolves.
    pub expires_at: DateTime<Utc>,
}

/// A human decision on a [`DecisionRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum Decision {
    /// Commit the recommendation as proposed.
    Approve {
        /// Optional reviewer rationale.
        rationale: Option<String>,
    },

    /// Replace dispositions; the engine re-validates against hard safety
    /// constraints before committing.
    Modify {
        /// Replacement dispositions per proposal.
        dispositions: Vec<(ProposalId, Disposition)>,
        /// Optional reviewer rationale.
        rationale: Option<String>,
    },

    /// Discard the recommendation; members return to the active set.
    Reject {
        /// Optional reviewer rationale.
        rationale: Option<String>,
    },
}

/// A pending escalation: the request plus the state needed to act on the
/// eventual decision.
#[derive(Debug, Clone)]
pub struct PendingDecision {
    /// The request as shown to the reviewer.
    pub request: DecisionRequest,

    /// The group members, retained so a decision can be applied without
    /// re-reading the active set.
    pub members: Vec<ActiveProposal>,

    /// The snapshot the recommendation was arbitrated against. Commits on
    /// the decision path stay conditioned on it, so racing updates surface
    /// as stale writes.
    pub snapshot: Snapshot,
}

/// Receives decision requests on their way to the review surface.
pub trait EscalationSink: Send + Sync {
    /// Delivers a request. Must not block arbitration.
    fn submit(&self, request: &DecisionRequest);
}

/// Channel-backed escalation sink.
#[derive(Debug, Clone)]
pub struct ChannelEscalationSink {
    tx: Sender<DecisionRequest>,
}

impl ChannelEscalationSink {
    /// Creates a sink and the receiver end for the review surface.
    #[must_use]
    pub fn new() -> (Self, Receiver<DecisionRequest>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl EscalationSink for ChannelEscalationSink {
    fn submit(&self, request: &DecisionRequest) {
        // The receiver may be gone in tests; escalation state is tracked
        // by the gate regardless.
        let _ = self.tx.send(request.clone());
    }
}

/// A sink that drops requests. The gate still tracks pending state, so
/// timeouts keep working without a review surface attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEscalationSink;

impl EscalationSink for NullEscalationSink {
    fn submit(&self, _request: &DecisionRequest) {}
}

/// Decides escalation and tracks pending decision requests.
pub struct EscalationGate {
    config: ArbiterConfig,
    sink: Box<dyn EscalationSink>,
    pending: Mutex<HashMap<RequestId, PendingDecision>>,
    by_group: Mutex<HashMap<GroupId, RequestId>>,
}

impl EscalationGate {
    /// Creates a gate with the given sink.
    #[must_use]
    pub fn new(config: ArbiterConfig, sink: Box<dyn EscalationSink>) -> Self {
        Self {
            config,
            sink,
            pending: Mutex::new(HashMap::new()),
            by_group: Mutex::new(HashMap::new()),
        }
    }

    /// The deterministic escalation predicate.
    ///
    /// Escalates when confidence is below threshold, any member's risk
    /// exceeds the safety threshold, the group exceeds the complexity
    /// threshold, or any member is infeasible.
    #[must_use]
    pub fn evaluate(
        &self,
        resolution: &Resolution,
        members: &[ActiveProposal],
    ) -> EscalationVerdict {
        let mut reasons = Vec::new();

        if resolution.confidence < self.config.confidence_threshold {
            reasons.push(EscalationReason::LowConfidence {
                confidence: resolution.confidence,
                threshold: self.config.confidence_threshold,
            });
        }
        for member in members {
            if member.proposal.risk > self.config.risk_threshold {
                reasons.push(EscalationReason::RiskExceeded {
                    proposal: member.proposal.id,
                    risk: member.proposal.risk,
                    threshold: self.config.risk_threshold,
                });
            }
        }
        if members.len() > self.config.complexity_threshold {
            reasons.push(EscalationReason::GroupTooLarge {
                size: members.len(),
                threshold: self.config.complexity_threshold,
            });
        }
        for d in &resolution.dispositions {
            if d.disposition.is_infeasible() {
                reasons.push(EscalationReason::InfeasibleMember {
                    proposal: d.proposal,
                });
            }
        }

        if reasons.is_empty() {
            EscalationVerdict::AutoFinalize
        } else {
            EscalationVerdict::Escalate(reasons)
        }
    }

    /// Builds and registers a decision request for a group.
    ///
    /// At most one request is outstanding per group: a second escalation
    /// for the same group returns the existing request id.
    pub fn escalate(
        &self,
        group: &ConflictGroup,
        members: Vec<ActiveProposal>,
        resolution: Resolution,
        reasons: Vec<EscalationReason>,
        impact: ImpactPreview,
        snapshot: Snapshot,
        now: DateTime<Utc>,
    ) -> RequestId {
        if let Ok(by_group) = self.by_group.lock() {
            if let Some(existing) = by_group.get(&group.id) {
                warn!(group = %group.id, request = %existing, "escalation already outstanding for group");
                return *existing;
            }
        }

        let id = RequestId::new();
        let summary = format!(
            "{} conflict over {} resource(s) in window {} .. {}; {} proposal(s) involved: {}",
            group.kind,
            group.resources.len(),
            group.window.start,
            group.window.end,
            members.len(),
            reasons
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        );
        let request = DecisionRequest {
            id,
            group: group.id,
            summary,
            reasons,
            proposals: members.iter().map(ProposalSummary::from).collect(),
            recommendation: resolution,
            impact,
            requested_at: now,
            expires_at: now + self.config.decision_timeout(),
        };

        self.sink.submit(&request);
        info!(request = %id, group = %group.id, "decision request escalated");

        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(
                id,
                PendingDecision {
                    request,
                    members,
                    snapshot,
                },
            );
        }
        if let Ok(mut by_group) = self.by_group.lock() {
            by_group.insert(group.id, id);
        }
        id
    }

    /// Removes and returns a pending decision.
    pub fn take(&self, id: RequestId) -> Option<PendingDecision> {
        let pending = self.pending.lock().ok()?.remove(&id);
        if let Some(ref p) = pending {
            if let Ok(mut by_group) = self.by_group.lock() {
                by_group.remove(&p.request.group);
            }
        }
        pending
    }

    /// Re-registers a pending decision (e.g. after an unsafe modification
    /// was rejected back to the reviewer).
    pub fn restore(&self, pending: PendingDecision) {
        let id = pending.request.id;
        let group = pending.request.group;
        if let Ok(mut map) = self.pending.lock() {
            map.insert(id, pending);
        }
        if let Ok(mut by_group) = self.by_group.lock() {
            by_group.insert(group, id);
        }
    }

    /// Ids of requests whose timeout has passed at `now`.
    #[must_use]
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<RequestId> {
        self.pending
            .lock()
            .map(|pending| {
                pending
                    .values()
                    .filter(|p| p.request.expires_at <= now)
                    .map(|p| p.request.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Returns true if the group has an outstanding request.
    #[must_use]
    pub fn is_group_pending(&self, group: GroupId) -> bool {
        self.by_group
            .lock()
            .map(|m| m.contains_key(&group))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::ConflictKind;
    use crate::proposal::{Proposal, ResourceClaim};
    use crate::resolution::{DecisionRule, ProposalDisposition, ResolutionId};
    use crate::resource::{ResourceId, ZoneId};
    use chrono::Duration;
    use std::sync::Arc;

    fn active(risk: f32) -> ActiveProposal {
        let start = Utc::now() + Duration::minutes(5);
        let proposal = Proposal::builder()
            .producer(ProducerId::new(), "test")
            .claim(ResourceClaim::exclusive(ResourceId::new()))
            .window(TimeWindow::new(start, start + Duration::minutes(10)).unwrap())
            .priority(5)
            .risk(risk)
            .uncertainty(0.1)
            .rationale("test")
            .build()
            .unwrap();
        ActiveProposal {
            proposal: Arc::new(proposal),
            zones: vec![ZoneId::new()],
        }
    }

    fn resolution(confidence: f32, infeasible: bool) -> Resolution {
        let disposition = if infeasible {
            Disposition::Infeasible {
                reason: "locked".to_string(),
            }
        } else {
            Disposition::Approve
        };
        Resolution {
            id: ResolutionId::new(),
            group: Some(GroupId::new()),
            version: 1,
            dispositions: vec![ProposalDisposition {
                proposal: ProposalId::new(),
                disposition,
                rule: DecisionRule::Priority,
                note: String::new(),
            }],
            rationale: "r".to_string(),
            confidence,
            safety_risk: 0.1,
            deadline_risk: 0.0,
            degraded_estimate: false,
            auto_timeout: false,
            decided_at: Utc::now(),
        }
    }

    fn gate() -> EscalationGate {
        EscalationGate::new(ArbiterConfig::default(), Box::new(NullEscalationSink))
    }

    fn group_for(members: &[ActiveProposal]) -> ConflictGroup {
        let mut iter = members.iter().cloned();
        let first = iter.next().unwrap();
        match iter.next() {
            Some(second) => {
                let mut g = ConflictGroup::pair(first, second, ConflictKind::ResourceContention);
                for m in iter {
                    g.absorb(m);
                }
                g
            }
            None => ConflictGroup::single(first, ConflictKind::SafetyViolation),
        }
    }

    fn impact() -> ImpactPreview {
        ImpactPreview {
            committed_claims_in_window: 0,
            protected_proposals: Vec::new(),
            displaced_proposals: Vec::new(),
            total_delay_minutes: 0,
        }
    }

    #[test]
    fn test_high_confidence_auto_finalizes() {
        let members = vec![active(0.1), active(0.1)];
        let verdict = gate().evaluate(&resolution(0.97, false), &members);
        assert_eq!(verdict, EscalationVerdict::AutoFinalize);
    }

    #[test]
    fn test_low_confidence_escalates() {
        let members = vec![active(0.1)];
        let verdict = gate().evaluate(&resolution(0.92, false), &members);
        let EscalationVerdict::Escalate(reasons) = verdict else {
            panic!("expected escalation");
        };
        assert!(matches!(reasons[0], EscalationReason::LowConfidence { .. }));
    }

    #[test]
    fn test_risky_member_escalates() {
        let members = vec![active(0.8)];
        let verdict = gate().evaluate(&resolution(0.99, false), &members);
        let EscalationVerdict::Escalate(reasons) = verdict else {
            panic!("expected escalation");
        };
        assert!(matches!(reasons[0], EscalationReason::RiskExceeded { .. }));
    }

    #[test]
    fn test_large_group_escalates() {
        let members = vec![active(0.1), active(0.1), active(0.1), active(0.1)];
        let verdict = gate().evaluate(&resolution(0.99, false), &members);
        let EscalationVerdict::Escalate(reasons) = verdict else {
            panic!("expected escalation");
        };
        assert!(reasons
            .iter()
            .any(|r| matches!(r, EscalationReason::GroupTooLarge { .. })));
    }

    #[test]
    fn test_infeasible_always_escalates() {
        let members = vec![active(0.1)];
        let verdict = gate().evaluate(&resolution(1.0, true), &members);
        let EscalationVerdict::Escalate(reasons) = verdict else {
            panic!("expected escalation");
        };
        assert!(reasons
            .iter()
            .any(|r| matches!(r, EscalationReason::InfeasibleMember { .. })));
    }

    #[test]
    fn test_one_outstanding_request_per_group() {
        let gate = gate();
        let members = vec![active(0.1), active(0.1)];
        let group = group_for(&members);

        let first = gate.escalate(
            &group,
            members.clone(),
            resolution(0.5, false),
            Vec::new(),
            impact(),
            Snapshot::default(),
            Utc::now(),
        );
        let second = gate.escalate(
            &group,
            members,
            resolution(0.5, false),
            Vec::new(),
            impact(),
            Snapshot::default(),
            Utc::now(),
        );
        assert_eq!(first, second);
        assert_eq!(gate.pending_count(), 1);
    }

    #[test]
    fn test_take_clears_group_index() {
        let gate = gate();
        let members = vec![active(0.1), active(0.1)];
        let group = group_for(&members);
        let id = gate.escalate(
            &group,
            members,
            resolution(0.5, false),
            Vec::new(),
            impact(),
            Snapshot::default(),
            Utc::now(),
        );

        assert!(gate.is_group_pending(group.id));
        let pending = gate.take(id).unwrap();
        assert_eq!(pending.request.id, id);
        assert!(!gate.is_group_pending(group.id));
        assert!(gate.take(id).is_none());
    }

    #[test]
    fn test_expired_requests() {
        let gate = gate();
        let members = vec![active(0.1), active(0.1)];
        let group = group_for(&members);
        let now = Utc::now();
        let id = gate.escalate(
            &group,
            members,
            resolution(0.5, false),
            Vec::new(),
            impact(),
            Snapshot::default(),
            now,
        );

        assert!(gate.expired(now + Duration::seconds(1)).is_empty());
        let later = now + Duration::seconds(121);
        assert_eq!(gate.expired(later), vec![id]);
    }

    #[test]
    fn test_channel_sink_delivers() {
        let (sink, rx) = ChannelEscalationSink::new();
        let gate = EscalationGate::new(ArbiterConfig::default(), Box::new(sink));
        let members = vec![active(0.1), active(0.1)];
        let group = group_for(&members);
        let id = gate.escalate(
            &group,
            members,
            resolution(0.5, false),
            Vec::new(),
            impact(),
            Snapshot::default(),
            Utc::now(),
        );

        let request = rx.try_recv().unwrap();
        assert_eq!(request.id, id);
        assert_eq!(request.group, group.id);
    }

    #[test]
    fn test_restore_reinstates_pending() {
        let gate = gate();
        let members = vec![active(0.1), active(0.1)];
        let group = group_for(&members);
        let id = gate.escalate(
            &group,
            members,
            resolution(0.5, false),
            Vec::new(),
            impact(),
            Snapshot::default(),
            Utc::now(),
        );

        let pending = gate.take(id).unwrap();
        gate.restore(pending);
        assert_eq!(gate.pending_count(), 1);
        assert!(gate.is_group_pending(group.id));
    }
}
