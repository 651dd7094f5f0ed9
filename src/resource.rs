//! Resources, zones, and claim kinds.
//!
//! A resource is anything a proposal can claim constrained access to: a
//! physical space segment, a worker, a piece of equipment, a storage
//! location. Resources belong to exactly one zone, the grouping entity that
//! scopes conflict detection and locking.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique, stable resource identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(Uuid);

impl ResourceId {
    /// Creates a new random resource ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a resource ID from an existing UUID.
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

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ResourceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier for a zone (a group of resources under shared rules).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(Uuid);

impl ZoneId {
    /// Creates a new random zone ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a zone ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ZoneId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of resource types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A traversable segment of physical space (an aisle, a corridor).
    Segment,
    /// A loading/unloading door.
    DockDoor,
    /// A human worker.
    Worker,
    /// A powered vehicle (forklift, tugger).
    Vehicle,
    /// A storage or staging location.
    StorageLocation,
    /// Fixed equipment (conveyor, scale, wrapper).
    Equipment,
    /// A custom resource type.
    Custom(String),
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Segment => write!(f, "segment"),
            Self::DockDoor => write!(f, "dock_door"),
            Self::Worker => write!(f, "worker"),
            Self::Vehicle => write!(f, "vehicle"),
            Self::StorageLocation => write!(f, "storage_location"),
            Self::Equipment => write!(f, "equipment"),
            Self::Custom(name) => write!(f, "custom({name})"),
        }
    }
}

/// The kind of access a claim requests on a resource.
///
/// `Exclusive` excludes every concurrent claim. `Shared` coexists with other
/// shared claims up to the resource capacity. `Tagged` kinds coexist unless a
/// constraint fact declares the pair incompatible (e.g. a vehicle claim and a
/// walker claim in the same narrow segment).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    /// Excludes all other claims on the resource while held.
    Exclusive,
    /// Coexists with other shared claims up to capacity.
    Shared,
    /// Domain-specific kind checked against pair constraints.
    Tagged(String),
}

impl ClaimKind {
    /// Convenience constructor for a tagged kind.
    #[must_use]
    pub fn tagged(tag: impl Into<String>) -> Self {
        Self::Tagged(tag.into())
    }

    /// Returns true if either kind excludes the other unconditionally.
    #[must_use]
    pub const fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive)
    }
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exclusive => write!(f, "exclusive"),
            Self::Shared => write!(f, "shared"),
            Self::Tagged(tag) => write!(f, "tagged({tag})"),
        }
    }
}

/// A grouping entity that aggregates resources under shared rules.
///
/// Zones are the unit of conflict-detection scoping and of locking: groups
/// touching disjoint zones are arbitrated in parallel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    /// Unique identifier.
    pub id: ZoneId,

    /// Human-readable name (e.g. "Aisle A-12").
    pub name: String,
}

impl Zone {
    /// Creates a new zone.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ZoneId::new(),
            name: name.into(),
        }
    }
}

/// An entity a proposal can claim constrained access to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique identifier.
    pub id: ResourceId,

    /// Human-readable name (e.g. "Forklift 3", "Location A-12-08").
    pub name: String,

    /// Resource classification.
    pub kind: ResourceKind,

    /// The zone this resource belongs to.
    pub zone: ZoneId,

    /// Maximum number of concurrent non-exclusive claims.
    pub capacity: u32,

    /// Aggregate weight limit across concurrent claims, if any.
    pub weight_limit_kg: Option<f64>,
}

impl Resource {
    /// Creates a resource with capacity 1 (one claim at a time).
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ResourceKind, zone: ZoneId) -> Self {
        Self {
            id: ResourceId::new(),
            name: name.into(),
            kind,
            zone,
            capacity: 1,
            weight_limit_kg: None,
        }
    }

    /// Sets the concurrent-claim capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Sets the aggregate weight limit.
    #[must_use]
    pub fn with_weight_limit(mut self, max_kg: f64) -> Self {
        self.weight_limit_kg = Some(max_kg);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_unique() {
        assert_ne!(ResourceId::new(), ResourceId::new());
    }

    #[test]
    fn test_resource_defaults() {
        let zone = Zone::new("Aisle A-12");
        let r = Resource::new("Location A-12-08", ResourceKind::StorageLocation, zone.id);
        assert_eq!(r.capacity, 1);
        assert!(r.weight_limit_kg.is_none());
    }

    #[test]
    fn test_capacity_floor_is_one() {
        let zone = Zone::new("z");
        let r = Resource::new("r", ResourceKind::Segment, zone.id).with_capacity(0);
        assert_eq!(r.capacity, 1);
    }

    #[test]
    fn test_claim_kind_display() {
        assert_eq!(format!("{}", ClaimKind::Exclusive), "exclusive");
        assert_eq!(format!("{}", ClaimKind::tagged("forklift")), "tagged(forklift)");
    }

    #[test]
    fn test_resource_kind_serde() {
        let json = serde_json::to_string(&ResourceKind::DockDoor).unwrap();
        assert_eq!(json, "\"dock_door\"");
        let back: ResourceKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ResourceKind::DockDoor);
    }
}
