//! World model query interface.
//!
//! The world model is the shared relational store of resources, zones,
//! constraint facts, and committed claims. This module fixes the contract
//! the arbiter requires — snapshot-tagged reads and an optimistic,
//! per-zone-linearizable commit — not a storage technology.

mod memory;

pub use memory::InMemoryWorld;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constraint::ConstraintFact;
use crate::error::WorldError;
use crate::proposal::ProposalId;
use crate::resource::{ClaimKind, Resource, ResourceId, Zone, ZoneId};
use crate::time::TimeWindow;

/// A snapshot marker: the world version and when it was read.
///
/// Every read is tagged with a snapshot so the arbiter can detect staleness
/// at intake and racing updates at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Monotonic world version at read time.
    pub version: u64,

    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    /// Age of the snapshot relative to `now`, in whole seconds.
    #[must_use]
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.taken_at).num_seconds()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: 0,
            taken_at: Utc::now(),
        }
    }
}

/// Claim lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimState {
    /// Requested by a proposal, not yet committed.
    Proposed,
    /// Committed into the world schedule.
    Committed,
}

/// A claim on a resource for a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// The proposal this claim belongs to.
    pub proposal: ProposalId,

    /// The claimed resource.
    pub resource: ResourceId,

    /// The kind of access.
    pub kind: ClaimKind,

    /// The claimed window.
    pub window: TimeWindow,

    /// Weight placed on the resource, if relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_kg: Option<f64>,

    /// Lifecycle state.
    pub state: ClaimState,

    /// When the claim was committed, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed_at: Option<DateTime<Utc>>,
}

impl Claim {
    /// Creates a proposed (uncommitted) claim.
    #[must_use]
    pub const fn proposed(
        proposal: ProposalId,
        resource: ResourceId,
        kind: ClaimKind,
        window: TimeWindow,
        load_kg: Option<f64>,
    ) -> Self {
        Self {
            proposal,
            resource,
            kind,
            window,
            load_kg,
            state: ClaimState::Proposed,
            committed_at: None,
        }
    }
}

/// Read-mostly query interface over the world model, plus the single
/// optimistic write operation the arbiter needs.
///
/// Reads may occur concurrently from many callers. `commit` must be
/// linearizable per zone: two arbitration runs must never both believe the
/// same resource is free.
pub trait WorldModel: Send + Sync {
    /// Returns the current snapshot marker.
    fn snapshot(&self) -> Result<Snapshot, WorldError>;

    /// Fetches a resource by id.
    fn resource(&self, id: ResourceId) -> Result<Option<Resource>, WorldError>;

    /// Resolves a resource to its enclosing zone.
    fn zone_of(&self, id: ResourceId) -> Result<Option<ZoneId>, WorldError>;

    /// Fetches a zone by id.
    fn zone(&self, id: ZoneId) -> Result<Option<Zone>, WorldError>;

    /// Lists the resources grouped under a zone.
    fn resources_in_zone(&self, zone: ZoneId) -> Result<Vec<Resource>, WorldError>;

    /// Fetches every constraint fact in scope for a resource: facts on the
    /// resource itself, on its zone, and global facts.
    fn constraints_for(&self, resource: ResourceId) -> Result<Vec<ConstraintFact>, WorldError>;

    /// Lists committed claims touching a zone within a time window.
    fn committed_claims(
        &self,
        zone: ZoneId,
        window: &TimeWindow,
    ) -> Result<Vec<Claim>, WorldError>;

    /// Atomically commits a set of claims, conditioned on every touched
    /// zone being unchanged since the caller's snapshot.
    ///
    /// # Errors
    ///
    /// Returns `WorldError::StaleWrite` when a touched zone advanced past
    /// `snapshot.version`; the caller must re-run detection, not retry
    /// blindly.
    fn commit(&self, claims: Vec<Claim>, snapshot: &Snapshot) -> Result<Snapshot, WorldError>;
}
