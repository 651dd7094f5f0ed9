//! Proposals: the immutable records producers submit to the arbiter.
//!
//! A proposal is created by a producer, read-only once submitted, superseded
//! when a newer proposal for the same intent arrives, and archived after
//! resolution. The arbiter knows nothing about a producer beyond its opaque
//! id and kind tag.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::resource::{ClaimKind, ResourceId};
use crate::time::TimeWindow;
use crate::world::Snapshot;

/// Unique identifier for a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(Uuid);

impl ProposalId {
    /// Creates a new random proposal ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a proposal ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ProposalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier for a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProducerId(Uuid);

impl ProducerId {
    /// Creates a new random producer ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProducerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One requested claim on one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceClaim {
    /// The claimed resource.
    pub resource: ResourceId,

    /// The kind of access requested.
    pub kind: ClaimKind,

    /// Weight this claim would place on the resource, if relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_kg: Option<f64>,
}

impl ResourceClaim {
    /// Creates a claim with no load weight.
    #[must_use]
    pub const fn new(resource: ResourceId, kind: ClaimKind) -> Self {
        Self {
            resource,
            kind,
            load_kg: None,
        }
    }

    /// Creates an exclusive claim.
    #[must_use]
    pub const fn exclusive(resource: ResourceId) -> Self {
        Self::new(resource, ClaimKind::Exclusive)
    }

    /// Sets the load weight.
    #[must_use]
    pub fn with_load(mut self, kg: f64) -> Self {
        self.load_kg = Some(kg);
        self
    }
}

/// A producer's requested claim on resources for a time window.
///
/// Proposals arrive over the wire, so intake re-validates every field even
/// though the builder already did; serde construction bypasses the builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// Unique identifier.
    pub id: ProposalId,

    /// The submitting producer.
    pub producer: ProducerId,

    /// Free-form producer kind tag (e.g. "replenishment", "slotting").
    pub producer_kind: String,

    /// The requested resource claims.
    pub claims: Vec<ResourceClaim>,

    /// The requested time window.
    pub window: TimeWindow,

    /// Latest completion the producer can tolerate; reschedules must not
    /// push the window past this instant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,

    /// Urgency on a 1..=10 scale (10 = critical).
    pub priority: u8,

    /// Producer-assessed risk in [0, 1].
    pub risk: f32,

    /// Producer-assessed uncertainty in [0, 1] (0 = certain).
    pub uncertainty: f32,

    /// Constraints the producer claims to have already checked.
    #[serde(default)]
    pub checked_constraints: Vec<String>,

    /// Natural-language rationale for the request.
    pub rationale: String,

    /// Resources the producer suspects it may conflict over.
    #[serde(default)]
    pub suspected_conflicts: Vec<ResourceId>,

    /// Alternative windows the producer would accept, tried first when
    /// rescheduling.
    #[serde(default)]
    pub alternatives: Vec<TimeWindow>,

    /// Data sources the producer consulted (audit trail only).
    #[serde(default)]
    pub data_sources: Vec<String>,

    /// The world snapshot the producer read while planning.
    pub snapshot: Snapshot,

    /// When intake accepted the proposal. Stamped by intake.
    pub submitted_at: DateTime<Utc>,
}

impl Proposal {
    /// Starts building a proposal.
    #[must_use]
    pub fn builder() -> ProposalBuilder {
        ProposalBuilder::default()
    }

    /// Validates field ranges and structural invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.claims.is_empty() {
            return Err(ValidationError::EmptyClaims);
        }
        if !(1..=10).contains(&self.priority) {
            return Err(ValidationError::PriorityOutOfRange {
                value: self.priority,
            });
        }
        if !(0.0..=1.0).contains(&self.risk) {
            return Err(ValidationError::RiskOutOfRange { value: self.risk });
        }
        if !(0.0..=1.0).contains(&self.uncertainty) {
            return Err(ValidationError::UncertaintyOutOfRange {
                value: self.uncertainty,
            });
        }
        if self.rationale.trim().is_empty() {
            return Err(ValidationError::EmptyRationale);
        }
        if let Some(deadline) = self.deadline {
            if deadline < self.window.end {
                return Err(ValidationError::DeadlineBeforeWindow {
                    deadline,
                    window_end: self.window.end,
                });
            }
        }
        Ok(())
    }

    /// The set of claimed resource ids, deduplicated and ordered.
    ///
    /// Two proposals from the same producer with equal resource sets are
    /// the same intent: the newer supersedes the older.
    #[must_use]
    pub fn resource_set(&self) -> BTreeSet<ResourceId> {
        self.claims.iter().map(|c| c.resource).collect()
    }

    /// Returns true if `other` is the same producer intent as `self`.
    #[must_use]
    pub fn same_intent(&self, other: &Self) -> bool {
        self.producer == other.producer && self.resource_set() == other.resource_set()
    }

    /// Minutes remaining between the window end and the deadline, if any.
    #[must_use]
    pub fn deadline_slack_minutes(&self) -> Option<i64> {
        self.deadline.map(|d| (d - self.window.end).num_minutes())
    }
}

/// Builder for [`Proposal`] with validation on `build`.
#[derive(Debug, Default)]
pub struct ProposalBuilder {
    producer: Option<ProducerId>,
    producer_kind: Option<String>,
    claims: Vec<ResourceClaim>,
    window: Option<TimeWindow>,
    deadline: Option<DateTime<Utc>>,
    priority: Option<u8>,
    risk: Option<f32>,
    uncertainty: Option<f32>,
    checked_constraints: Vec<String>,
    rationale: Option<String>,
    suspected_conflicts: Vec<ResourceId>,
    alternatives: Vec<TimeWindow>,
    data_sources: Vec<String>,
    snapshot: Option<Snapshot>,
}

impl ProposalBuilder {
    /// Sets the producer identity.
    #[must_use]
    pub fn producer(mut self, id: ProducerId, kind: impl Into<String>) -> Self {
        self.producer = Some(id);
        self.producer_kind = Some(kind.into());
        self
    }

    /// Adds one resource claim.
    #[must_use]
    pub fn claim(mut self, claim: ResourceClaim) -> Self {
        self.claims.push(claim);
        self
    }

    /// Sets the requested window.
    #[must_use]
    pub fn window(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Sets the deadline.
    #[must_use]
    pub fn deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the priority (1..=10).
    #[must_use]
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets the risk score.
    #[must_use]
    pub fn risk(mut self, risk: f32) -> Self {
        self.risk = Some(risk);
        self
    }

    /// Sets the uncertainty score.
    #[must_use]
    pub fn uncertainty(mut self, uncertainty: f32) -> Self {
        self.uncertainty = Some(uncertainty);
        self
    }

    /// Records a constraint the producer checked.
    #[must_use]
    pub fn checked_constraint(mut self, name: impl Into<String>) -> Self {
        self.checked_constraints.push(name.into());
        self
    }

    /// Sets the rationale.
    #[must_use]
    pub fn rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    /// Records a suspected conflict resource.
    #[must_use]
    pub fn suspected_conflict(mut self, resource: ResourceId) -> Self {
        self.suspected_conflicts.push(resource);
        self
    }

    /// Adds an acceptable alternative window.
    #[must_use]
    pub fn alternative(mut self, window: TimeWindow) -> Self {
        self.alternatives.push(window);
        self
    }

    /// Records a consulted data source.
    #[must_use]
    pub fn data_source(mut self, source: impl Into<String>) -> Self {
        self.data_sources.push(source.into());
        self
    }

    /// Sets the world snapshot the producer planned against.
    #[must_use]
    pub fn snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Builds and validates the proposal.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` if a required field is missing or a
    /// value is out of range.
    pub fn build(self) -> Result<Proposal, ValidationError> {
        let window = self.window.ok_or(ValidationError::MissingField {
            field: "window".to_string(),
        })?;
        let snapshot = self.snapshot.unwrap_or_default();
        let proposal = Proposal {
            id: ProposalId::new(),
            producer: self.producer.unwrap_or_default(),
            producer_kind: self.producer_kind.unwrap_or_else(|| "unknown".to_string()),
            claims: self.claims,
            window,
            deadline: self.deadline,
            priority: self.priority.unwrap_or(0),
            risk: self.risk.unwrap_or(-1.0),
            uncertainty: self.uncertainty.unwrap_or(-1.0),
            checked_constraints: self.checked_constraints,
            rationale: self.rationale.unwrap_or_default(),
            suspected_conflicts: self.suspected_conflicts,
            alternatives: self.alternatives,
            data_sources: self.data_sources,
            snapshot,
            submitted_at: Utc::now(),
        };
        proposal.validate()?;
        Ok(proposal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base_window() -> TimeWindow {
        let now = Utc::now();
        TimeWindow::new(now + Duration::minutes(5), now + Duration::minutes(20)).unwrap()
    }

    fn valid_builder() -> ProposalBuilder {
        Proposal::builder()
            .producer(ProducerId::new(), "replenishment")
            .claim(ResourceClaim::exclusive(ResourceId::new()))
            .window(base_window())
            .priority(7)
            .risk(0.3)
            .uncertainty(0.1)
            .rationale("replenish before projected stockout")
    }

    #[test]
    fn test_builder_builds_valid_proposal() {
        let p = valid_builder().build().unwrap();
        assert_eq!(p.priority, 7);
        assert_eq!(p.claims.len(), 1);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_missing_claims() {
        let err = Proposal::builder()
            .producer(ProducerId::new(), "x")
            .window(base_window())
            .priority(5)
            .risk(0.1)
            .uncertainty(0.1)
            .rationale("r")
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::EmptyClaims));
    }

    #[test]
    fn test_builder_rejects_priority_out_of_range() {
        let err = valid_builder().priority(11).build().unwrap_err();
        assert!(matches!(err, ValidationError::PriorityOutOfRange { value: 11 }));
    }

    #[test]
    fn test_builder_rejects_risk_out_of_range() {
        let err = valid_builder().risk(1.5).build().unwrap_err();
        assert!(matches!(err, ValidationError::RiskOutOfRange { .. }));
    }

    #[test]
    fn test_builder_rejects_missing_metadata() {
        // Omitting uncertainty entirely must fail, not default to valid.
        let err = Proposal::builder()
            .producer(ProducerId::new(), "x")
            .claim(ResourceClaim::exclusive(ResourceId::new()))
            .window(base_window())
            .priority(5)
            .risk(0.1)
            .rationale("r")
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::UncertaintyOutOfRange { .. }));
    }

    #[test]
    fn test_builder_rejects_deadline_before_window_end() {
        let w = base_window();
        let err = valid_builder()
            .deadline(w.end - Duration::minutes(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::DeadlineBeforeWindow { .. }));
    }

    #[test]
    fn test_same_intent_ignores_claim_order() {
        let producer = ProducerId::new();
        let (r1, r2) = (ResourceId::new(), ResourceId::new());
        let a = Proposal::builder()
            .producer(producer, "x")
            .claim(ResourceClaim::exclusive(r1))
            .claim(ResourceClaim::exclusive(r2))
            .window(base_window())
            .priority(5)
            .risk(0.1)
            .uncertainty(0.1)
            .rationale("a")
            .build()
            .unwrap();
        let b = Proposal::builder()
            .producer(producer, "x")
            .claim(ResourceClaim::exclusive(r2))
            .claim(ResourceClaim::exclusive(r1))
            .window(base_window())
            .priority(5)
            .risk(0.1)
            .uncertainty(0.1)
            .rationale("b")
            .build()
            .unwrap();
        assert!(a.same_intent(&b));
    }

    #[test]
    fn test_different_producer_not_same_intent() {
        let r = ResourceId::new();
        let a = valid_builder().claim(ResourceClaim::exclusive(r)).build().unwrap();
        let b = valid_builder().claim(ResourceClaim::exclusive(r)).build().unwrap();
        assert!(!a.same_intent(&b));
    }

    #[test]
    fn test_deadline_slack() {
        let w = base_window();
        let p = valid_builder()
            .deadline(w.end + Duration::minutes(30))
            .build()
            .unwrap();
        assert_eq!(p.deadline_slack_minutes(), Some(30));
    }

    #[test]
    fn test_serde_round_trip() {
        let p = valid_builder().build().unwrap();
        let json = serde_json::to_string(&p).unwrap();
        let back: Proposal = serde_json::from_str(&json).unwrap();
        assert_eq!(p.id, back.id);
        assert_eq!(p.claims, back.claims);
    }
}
