//! Conflict groups: sets of proposals whose claims are jointly infeasible.
//!
//! Groups are first-class objects. The detector creates them, the
//! arbitration engine consumes them, and a proposal belongs to at most one
//! active group at a time — new conflicts merge groups rather than creating
//! overlapping ones.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::intake::ActiveProposal;
use crate::proposal::ProposalId;
use crate::resource::{ResourceId, ZoneId};
use crate::time::TimeWindow;

/// Unique identifier for a conflict group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(Uuid);

impl GroupId {
    /// Creates a new random group ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The nature of the joint infeasibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Proposals compete for the same resource or zone capacity.
    ResourceContention,

    /// A hard safety constraint is implicated.
    SafetyViolation,

    /// Resolving the contention jeopardizes a member's deadline.
    TimePriorityTradeoff,

    /// Merged groups of different kinds.
    MultiDimensional,
}

impl ConflictKind {
    /// Combines the kinds of two merging groups.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if self == other {
            self
        } else {
            Self::MultiDimensional
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceContention => write!(f, "resource_contention"),
            Self::SafetyViolation => write!(f, "safety_violation"),
            Self::TimePriorityTradeoff => write!(f, "time_priority_tradeoff"),
            Self::MultiDimensional => write!(f, "multi_dimensional"),
        }
    }
}

/// A set of proposals whose resource/time claims are jointly infeasible.
#[derive(Debug, Clone)]
pub struct ConflictGroup {
    /// Unique identifier.
    pub id: GroupId,

    /// Member proposals.
    pub members: Vec<ActiveProposal>,

    /// Zones the group touches (sorted, deduplicated).
    pub zones: Vec<ZoneId>,

    /// The contended resources (sorted, deduplicated).
    pub resources: Vec<ResourceId>,

    /// Envelope of the overlapping windows.
    pub window: TimeWindow,

    /// The nature of the conflict.
    pub kind: ConflictKind,

    /// Aggregated risk: the maximum member risk, so one dangerous member
    /// dominates the escalation predicate.
    pub risk: f32,

    /// When the group was formed.
    pub detected_at: DateTime<Utc>,
}

impl ConflictGroup {
    /// Creates a group from two conflicting proposals.
    #[must_use]
    pub fn pair(a: ActiveProposal, b: ActiveProposal, kind: ConflictKind) -> Self {
        let mut group = Self {
            id: GroupId::new(),
            window: a.proposal.window,
            members: Vec::new(),
            zones: Vec::new(),
            resources: Vec::new(),
            kind,
            risk: 0.0,
            detected_at: Utc::now(),
        };
        group.absorb(a);
        group.absorb(b);
        group
    }

    /// Creates a single-member group for a standalone safety violation.
    ///
    /// Contention groups always hold at least two proposals; the
    /// single-member form exists only to carry a proposal whose own claims
    /// violate a hard constraint through the escalation path.
    #[must_use]
    pub fn single(member: ActiveProposal, kind: ConflictKind) -> Self {
        let mut group = Self {
            id: GroupId::new(),
            window: member.proposal.window,
            members: Vec::new(),
            zones: Vec::new(),
            resources: Vec::new(),
            kind,
            risk: 0.0,
            detected_at: Utc::now(),
        };
        group.absorb(member);
        group
    }

    /// Adds a member, extending the window envelope, zones, resources,
    /// and aggregated risk.
    pub fn absorb(&mut self, member: ActiveProposal) {
        self.window = if self.members.is_empty() {
            member.proposal.window
        } else {
            self.window.envelope(&member.proposal.window)
        };
        self.risk = self.risk.max(member.proposal.risk);

        for zone in &member.zones {
            if !self.zones.contains(zone) {
                self.zones.push(*zone);
            }
        }
        for claim in &member.proposal.claims {
            if !self.resources.contains(&claim.resource) {
                self.resources.push(claim.resource);
            }
        }
        self.members.push(member);

        self.zones.sort_unstable();
        self.resources.sort_unstable();
    }

    /// Merges another group into this one. The other group's identity is
    /// discarded; its members, zones, and resources are absorbed.
    pub fn merge(&mut self, other: Self) {
        self.kind = self.kind.merge(other.kind);
        for member in other.members {
            self.absorb(member);
        }
    }

    /// Returns true if the group contains the proposal.
    #[must_use]
    pub fn contains(&self, id: ProposalId) -> bool {
        self.members.iter().any(|m| m.proposal.id == id)
    }

    /// Number of member proposals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The member proposal ids.
    #[must_use]
    pub fn member_ids(&self) -> Vec<ProposalId> {
        self.members.iter().map(|m| m.proposal.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::{Proposal, ProducerId, ResourceClaim};
    use crate::resource::ResourceId;
    use chrono::Duration;
    use std::sync::Arc;

    fn active(resource: ResourceId, zone: ZoneId, start_min: i64, risk: f32) -> ActiveProposal {
        let start = Utc::now() + Duration::minutes(start_min);
        let proposal = Proposal::builder()
            .producer(ProducerId::new(), "test")
            .claim(ResourceClaim::exclusive(resource))
            .window(TimeWindow::new(start, start + Duration::minutes(15)).unwrap())
            .priority(5)
            .risk(risk)
            .uncertainty(0.1)
            .rationale("test proposal")
            .build()
            .unwrap();
        ActiveProposal {
            proposal: Arc::new(proposal),
            zones: vec![zone],
        }
    }

    #[test]
    fn test_pair_aggregates_members() {
        let zone = ZoneId::new();
        let resource = ResourceId::new();
        let group = ConflictGroup::pair(
            active(resource, zone, 0, 0.2),
            active(resource, zone, 5, 0.6),
            ConflictKind::ResourceContention,
        );

        assert_eq!(group.len(), 2);
        assert_eq!(group.zones, vec![zone]);
        assert_eq!(group.resources, vec![resource]);
        assert!((group.risk - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn test_window_envelope_grows() {
        let zone = ZoneId::new();
        let resource = ResourceId::new();
        let a = active(resource, zone, 0, 0.1);
        let b = active(resource, zone, 10, 0.1);
        let expected = a.proposal.window.envelope(&b.proposal.window);
        let group = ConflictGroup::pair(a, b, ConflictKind::ResourceContention);
        assert_eq!(group.window, expected);
    }

    #[test]
    fn test_merge_mixes_kind() {
        let zone = ZoneId::new();
        let r1 = ResourceId::new();
        let r2 = ResourceId::new();
        let mut a = ConflictGroup::pair(
            active(r1, zone, 0, 0.1),
            active(r1, zone, 5, 0.1),
            ConflictKind::ResourceContention,
        );
        let b = ConflictGroup::pair(
            active(r2, zone, 0, 0.9),
            active(r2, zone, 5, 0.1),
            ConflictKind::SafetyViolation,
        );

        a.merge(b);
        assert_eq!(a.len(), 4);
        assert_eq!(a.kind, ConflictKind::MultiDimensional);
        assert!((a.risk - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_merge_same_kind_keeps_kind() {
        assert_eq!(
            ConflictKind::ResourceContention.merge(ConflictKind::ResourceContention),
            ConflictKind::ResourceContention
        );
    }

    #[test]
    fn test_contains() {
        let zone = ZoneId::new();
        let resource = ResourceId::new();
        let a = active(resource, zone, 0, 0.1);
        let id = a.proposal.id;
        let group = ConflictGroup::pair(
            a,
            active(resource, zone, 5, 0.1),
            ConflictKind::ResourceContention,
        );
        assert!(group.contains(id));
        assert!(!group.contains(ProposalId::new()));
    }

    #[test]
    fn test_single_member_group() {
        let zone = ZoneId::new();
        let resource = ResourceId::new();
        let group = ConflictGroup::single(
            active(resource, zone, 0, 0.4),
            ConflictKind::SafetyViolation,
        );
        assert_eq!(group.len(), 1);
        assert_eq!(group.kind, ConflictKind::SafetyViolation);
    }
}
