//! Constraint facts: the rules the world model attaches to resources,
//! zones, and claim-kind pairs.
//!
//! Constraints are queried, never invented by the arbiter. A `Hard`
//! constraint is a safety rule: it cannot be overridden by priority,
//! confidence, or human approval. `Soft` constraints are advisory and feed
//! risk scoring only.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resource::{ClaimKind, ResourceId, ZoneId};

/// Unique identifier for a constraint fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintId(Uuid);

impl ConstraintId {
    /// Creates a new random constraint ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConstraintId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a constraint applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintScope {
    /// A single resource.
    Resource(ResourceId),
    /// Every resource in a zone.
    Zone(ZoneId),
    /// All resources everywhere.
    Global,
}

/// The rule a constraint fact states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum ConstraintRule {
    /// At most `limit` concurrent claims within the scope.
    CapacityLimit {
        /// Maximum concurrent claims.
        limit: u32,
    },

    /// Claims of these two kinds may not overlap in time within the scope.
    IncompatiblePair {
        /// First claim kind.
        a: ClaimKind,
        /// Second claim kind.
        b: ClaimKind,
    },

    /// The scope accepts no claims at all (maintenance, incident lock).
    Locked {
        /// Why the scope is locked.
        reason: String,
    },

    /// Aggregate claimed weight must stay under the limit.
    WeightLimit {
        /// Maximum aggregate weight in kilograms.
        max_kg: f64,
    },
}

impl ConstraintRule {
    /// Returns a short stable identifier suitable for rationale strings.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CapacityLimit { .. } => "capacity_limit",
            Self::IncompatiblePair { .. } => "incompatible_pair",
            Self::Locked { .. } => "locked",
            Self::WeightLimit { .. } => "weight_limit",
        }
    }
}

/// Whether a constraint is a safety rule or advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Safety rule. No override path exists for violations.
    Hard,
    /// Advisory. Violations raise risk but do not force rejection.
    Soft,
}

/// A rule attached to a resource, a zone, or a kind pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintFact {
    /// Unique identifier.
    pub id: ConstraintId,

    /// Where the rule applies.
    pub scope: ConstraintScope,

    /// The rule itself.
    pub rule: ConstraintRule,

    /// Hard (safety) or soft (advisory).
    pub severity: Severity,

    /// Human-readable statement of the rule.
    pub description: String,
}

impl ConstraintFact {
    /// Creates a constraint fact.
    #[must_use]
    pub fn new(
        scope: ConstraintScope,
        rule: ConstraintRule,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: ConstraintId::new(),
            scope,
            rule,
            severity,
            description: description.into(),
        }
    }

    /// Creates a hard lock on a resource.
    #[must_use]
    pub fn lock_resource(resource: ResourceId, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let description = format!("resource locked: {reason}");
        Self::new(
            ConstraintScope::Resource(resource),
            ConstraintRule::Locked { reason },
            Severity::Hard,
            description,
        )
    }

    /// Creates a hard incompatible-pair rule for a zone.
    #[must_use]
    pub fn incompatible_in_zone(zone: ZoneId, a: ClaimKind, b: ClaimKind) -> Self {
        let description = format!("claims of kind {a} and {b} may not overlap in this zone");
        Self::new(
            ConstraintScope::Zone(zone),
            ConstraintRule::IncompatiblePair { a, b },
            Severity::Hard,
            description,
        )
    }

    /// Creates a concurrent-operation cap for a zone.
    #[must_use]
    pub fn zone_capacity(zone: ZoneId, limit: u32, severity: Severity) -> Self {
        let description = format!("at most {limit} concurrent operations in this zone");
        Self::new(
            ConstraintScope::Zone(zone),
            ConstraintRule::CapacityLimit { limit },
            severity,
            description,
        )
    }

    /// Creates a hard weight limit for a resource.
    #[must_use]
    pub fn weight_limit(resource: ResourceId, max_kg: f64) -> Self {
        let description = format!("aggregate claimed weight must stay under {max_kg} kg");
        Self::new(
            ConstraintScope::Resource(resource),
            ConstraintRule::WeightLimit { max_kg },
            Severity::Hard,
            description,
        )
    }

    /// Returns true if this is a hard safety constraint.
    #[must_use]
    pub const fn is_hard(&self) -> bool {
        matches!(self.severity, Severity::Hard)
    }

    /// Returns true if this fact forbids the given kind pair (either order).
    #[must_use]
    pub fn forbids_pair(&self, x: &ClaimKind, y: &ClaimKind) -> bool {
        match &self.rule {
            ConstraintRule::IncompatiblePair { a, b } => {
                (a == x && b == y) || (a == y && b == x)
            }
            _ => false,
        }
    }

    /// Returns the lock reason if this is a lock rule.
    #[must_use]
    pub fn lock_reason(&self) -> Option<&str> {
        match &self.rule {
            ConstraintRule::Locked { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Returns true if two claim kinds may not hold overlapping claims,
/// given the constraint facts in scope.
///
/// Exclusive claims conflict with everything. Tagged pairs conflict when a
/// hard or soft `IncompatiblePair` fact lists them; capacity is checked
/// separately because it depends on the number of claims, not the pair.
#[must_use]
pub fn kinds_incompatible(a: &ClaimKind, b: &ClaimKind, facts: &[ConstraintFact]) -> bool {
    if a.is_exclusive() || b.is_exclusive() {
        return true;
    }
    facts.iter().any(|f| f.forbids_pair(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_resource_is_hard() {
        let fact = ConstraintFact::lock_resource(ResourceId::new(), "spill cleanup");
        assert!(fact.is_hard());
        assert_eq!(fact.lock_reason(), Some("spill cleanup"));
        assert_eq!(fact.rule.name(), "locked");
    }

    #[test]
    fn test_forbids_pair_either_order() {
        let zone = ZoneId::new();
        let fact = ConstraintFact::incompatible_in_zone(
            zone,
            ClaimKind::tagged("forklift"),
            ClaimKind::tagged("walker"),
        );
        assert!(fact.forbids_pair(&ClaimKind::tagged("walker"), &ClaimKind::tagged("forklift")));
        assert!(fact.forbids_pair(&ClaimKind::tagged("forklift"), &ClaimKind::tagged("walker")));
        assert!(!fact.forbids_pair(&ClaimKind::tagged("walker"), &ClaimKind::tagged("walker")));
    }

    #[test]
    fn test_exclusive_always_incompatible() {
        assert!(kinds_incompatible(&ClaimKind::Exclusive, &ClaimKind::Shared, &[]));
        assert!(kinds_incompatible(
            &ClaimKind::tagged("x"),
            &ClaimKind::Exclusive,
            &[]
        ));
    }

    #[test]
    fn test_shared_compatible_without_facts() {
        assert!(!kinds_incompatible(&ClaimKind::Shared, &ClaimKind::Shared, &[]));
        assert!(!kinds_incompatible(
            &ClaimKind::tagged("a"),
            &ClaimKind::tagged("b"),
            &[]
        ));
    }

    #[test]
    fn test_tagged_pair_incompatible_with_fact() {
        let zone = ZoneId::new();
        let facts = vec![ConstraintFact::incompatible_in_zone(
            zone,
            ClaimKind::tagged("forklift"),
            ClaimKind::tagged("walker"),
        )];
        assert!(kinds_incompatible(
            &ClaimKind::tagged("forklift"),
            &ClaimKind::tagged("walker"),
            &facts
        ));
    }

    #[test]
    fn test_constraint_serde_round_trip() {
        let fact = ConstraintFact::weight_limit(ResourceId::new(), 450.0);
        let json = serde_json::to_string(&fact).unwrap();
        let back: ConstraintFact = serde_json::from_str(&json).unwrap();
        assert_eq!(fact, back);
    }
}
