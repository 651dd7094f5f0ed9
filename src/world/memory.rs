//! In-memory world model.
//!
//! Thread-safe reference implementation of [`WorldModel`], intended for
//! embedded usage and tests. Claims are indexed per zone so conflict
//! discovery stays scoped to the zones a proposal actually touches.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::Utc;

use crate::constraint::{ConstraintFact, ConstraintScope};
use crate::error::WorldError;
use crate::resource::{Resource, ResourceId, Zone, ZoneId};
use crate::time::TimeWindow;

use super::{Claim, ClaimState, Snapshot, WorldModel};

fn lock_err(context: &'static str) -> WorldError {
    WorldError::Backend {
        message: format!("poisoned lock: {context}"),
    }
}

#[derive(Debug, Default)]
struct WorldState {
    zones: HashMap<ZoneId, Zone>,
    resources: HashMap<ResourceId, Resource>,
    zone_members: HashMap<ZoneId, HashSet<ResourceId>>,
    resource_facts: HashMap<ResourceId, Vec<ConstraintFact>>,
    zone_facts: HashMap<ZoneId, Vec<ConstraintFact>>,
    global_facts: Vec<ConstraintFact>,
    claims_by_zone: HashMap<ZoneId, Vec<Claim>>,
    version: u64,
    zone_versions: HashMap<ZoneId, u64>,
}

impl WorldState {
    fn zone_of(&self, id: ResourceId) -> Option<ZoneId> {
        self.resources.get(&id).map(|r| r.zone)
    }
}

/// Thread-safe in-memory world model.
#[derive(Debug, Default)]
pub struct InMemoryWorld {
    state: RwLock<WorldState>,
}

impl InMemoryWorld {
    /// Creates an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a zone.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the lock is poisoned.
    pub fn add_zone(&self, zone: Zone) -> Result<(), WorldError> {
        let mut state = self.state.write().map_err(|_| lock_err("add_zone"))?;
        state.zone_members.entry(zone.id).or_default();
        state.zones.insert(zone.id, zone);
        Ok(())
    }

    /// Registers a resource under its zone.
    ///
    /// # Errors
    ///
    /// Returns `ZoneNotFound` if the resource references an unknown zone.
    pub fn add_resource(&self, resource: Resource) -> Result<(), WorldError> {
        let mut state = self.state.write().map_err(|_| lock_err("add_resource"))?;
        if !state.zones.contains_key(&resource.zone) {
            return Err(WorldError::ZoneNotFound { id: resource.zone });
        }
        state
            .zone_members
            .entry(resource.zone)
            .or_default()
            .insert(resource.id);
        state.resources.insert(resource.id, resource);
        Ok(())
    }

    /// Attaches a constraint fact at its declared scope.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound`/`ZoneNotFound` for dangling scopes.
    pub fn add_constraint(&self, fact: ConstraintFact) -> Result<(), WorldError> {
        let mut state = self.state.write().map_err(|_| lock_err("add_constraint"))?;
        // A new fact invalidates snapshots of the zones it touches, so an
        // in-flight commit planned before the fact lands as a stale write.
        state.version += 1;
        let version = state.version;
        match fact.scope {
            ConstraintScope::Resource(id) => {
                let Some(zone) = state.zone_of(id) else {
                    return Err(WorldError::ResourceNotFound { id });
                };
                state.zone_versions.insert(zone, version);
                state.resource_facts.entry(id).or_default().push(fact);
            }
            ConstraintScope::Zone(id) => {
                if !state.zones.contains_key(&id) {
                    return Err(WorldError::ZoneNotFound { id });
                }
                state.zone_versions.insert(id, version);
                state.zone_facts.entry(id).or_default().push(fact);
            }
            ConstraintScope::Global => {
                let zones: Vec<ZoneId> = state.zones.keys().copied().collect();
                for zone in zones {
                    state.zone_versions.insert(zone, version);
                }
                state.global_facts.push(fact);
            }
        }
        Ok(())
    }

    /// Removes every constraint attached to a resource (e.g. lifting a lock).
    ///
    /// # Errors
    ///
    /// Returns a backend error if the lock is poisoned.
    pub fn clear_resource_constraints(&self, id: ResourceId) -> Result<(), WorldError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("clear_resource_constraints"))?;
        state.resource_facts.remove(&id);
        state.version += 1;
        Ok(())
    }

    /// Total number of committed claims (test/inspection helper).
    ///
    /// # Errors
    ///
    /// Returns a backend error if the lock is poisoned.
    pub fn committed_claim_count(&self) -> Result<usize, WorldError> {
        let state = self.state.read().map_err(|_| lock_err("claim_count"))?;
        Ok(state.claims_by_zone.values().map(Vec::len).sum())
    }
}

impl WorldModel for InMemoryWorld {
    fn snapshot(&self) -> Result<Snapshot, WorldError> {
        let state = self.state.read().map_err(|_| lock_err("snapshot"))?;
        Ok(Snapshot {
            version: state.version,
            taken_at: Utc::now(),
        })
    }

    fn resource(&self, id: ResourceId) -> Result<Option<Resource>, WorldError> {
        let state = self.state.read().map_err(|_| lock_err("resource"))?;
        Ok(state.resources.get(&id).cloned())
    }

    fn zone_of(&self, id: ResourceId) -> Result<Option<ZoneId>, WorldError> {
        let state = self.state.read().map_err(|_| lock_err("zone_of"))?;
        Ok(state.zone_of(id))
    }

    fn zone(&self, id: ZoneId) -> Result<Option<Zone>, WorldError> {
        let state = self.state.read().map_err(|_| lock_err("zone"))?;
        Ok(state.zones.get(&id).cloned())
    }

    fn resources_in_zone(&self, zone: ZoneId) -> Result<Vec<Resource>, WorldError> {
        let state = self.state.read().map_err(|_| lock_err("resources_in_zone"))?;
        let Some(members) = state.zone_members.get(&zone) else {
            return Err(WorldError::ZoneNotFound { id: zone });
        };
        Ok(members
            .iter()
            .filter_map(|id| state.resources.get(id).cloned())
            .collect())
    }

    fn constraints_for(&self, resource: ResourceId) -> Result<Vec<ConstraintFact>, WorldError> {
        let state = self.state.read().map_err(|_| lock_err("constraints_for"))?;
        let Some(res) = state.resources.get(&resource) else {
            return Err(WorldError::ResourceNotFound { id: resource });
        };

        let mut facts = Vec::new();
        if let Some(rf) = state.resource_facts.get(&resource) {
            facts.extend(rf.iter().cloned());
        }
        if let Some(zf) = state.zone_facts.get(&res.zone) {
            facts.extend(zf.iter().cloned());
        }
        facts.extend(state.global_facts.iter().cloned());
        Ok(facts)
    }

    fn committed_claims(
        &self,
        zone: ZoneId,
        window: &TimeWindow,
    ) -> Result<Vec<Claim>, WorldError> {
        let state = self.state.read().map_err(|_| lock_err("committed_claims"))?;
        if !state.zones.contains_key(&zone) {
            return Err(WorldError::ZoneNotFound { id: zone });
        }
        Ok(state
            .claims_by_zone
            .get(&zone)
            .map(|claims| {
                claims
                    .iter()
                    .filter(|c| c.window.overlaps(window))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn commit(&self, claims: Vec<Claim>, snapshot: &Snapshot) -> Result<Snapshot, WorldError> {
        let mut state = self.state.write().map_err(|_| lock_err("commit"))?;

        // Resolve every claim to its zone before mutating anything.
        let mut zones = Vec::with_capacity(claims.len());
        for claim in &claims {
            let Some(zone) = state.zone_of(claim.resource) else {
                return Err(WorldError::ResourceNotFound {
                    id: claim.resource,
                });
            };
            zones.push(zone);
        }

        // Optimistic precondition: every touched zone must be unchanged
        // since the caller's snapshot.
        for zone in &zones {
            let actual = state.zone_versions.get(zone).copied().unwrap_or(0);
            if actual > snapshot.version {
                return Err(WorldError::StaleWrite {
                    zone: *zone,
                    snapshot: snapshot.version,
                    actual,
                });
            }
        }

        let now = Utc::now();
        state.version += 1;
        let version = state.version;
        for (mut claim, zone) in claims.into_iter().zip(zones) {
            claim.state = ClaimState::Committed;
            claim.committed_at = Some(now);
            state.claims_by_zone.entry(zone).or_default().push(claim);
            state.zone_versions.insert(zone, version);
        }

        Ok(Snapshot {
            version,
            taken_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::ConstraintFact;
    use crate::proposal::ProposalId;
    use crate::resource::{ClaimKind, ResourceKind};
    use chrono::{DateTime, Duration};

    fn at(minute: i64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + Duration::minutes(minute)
    }

    fn window(start: i64, end: i64) -> TimeWindow {
        TimeWindow::new(at(start), at(end)).unwrap()
    }

    fn world_with_resource() -> (InMemoryWorld, Zone, Resource) {
        let world = InMemoryWorld::new();
        let zone = Zone::new("Aisle A-12");
        world.add_zone(zone.clone()).unwrap();
        let resource = Resource::new("Segment A-12-1", ResourceKind::Segment, zone.id);
        world.add_resource(resource.clone()).unwrap();
        (world, zone, resource)
    }

    #[test]
    fn test_add_resource_unknown_zone() {
        let world = InMemoryWorld::new();
        let r = Resource::new("r", ResourceKind::Worker, ZoneId::new());
        let err = world.add_resource(r).unwrap_err();
        assert!(matches!(err, WorldError::ZoneNotFound { .. }));
    }

    #[test]
    fn test_zone_resolution() {
        let (world, zone, resource) = world_with_resource();
        assert_eq!(world.zone_of(resource.id).unwrap(), Some(zone.id));
        assert_eq!(world.zone_of(ResourceId::new()).unwrap(), None);
    }

    #[test]
    fn test_constraints_for_merges_scopes() {
        let (world, zone, resource) = world_with_resource();
        world
            .add_constraint(ConstraintFact::lock_resource(resource.id, "maintenance"))
            .unwrap();
        world
            .add_constraint(ConstraintFact::zone_capacity(
                zone.id,
                2,
                crate::constraint::Severity::Soft,
            ))
            .unwrap();

        let facts = world.constraints_for(resource.id).unwrap();
        assert_eq!(facts.len(), 2);
    }

    #[test]
    fn test_commit_advances_snapshot() {
        let (world, zone, resource) = world_with_resource();
        let snap = world.snapshot().unwrap();
        let claim = Claim::proposed(
            ProposalId::new(),
            resource.id,
            ClaimKind::Exclusive,
            window(0, 10),
            None,
        );

        let after = world.commit(vec![claim], &snap).unwrap();
        assert!(after.version > snap.version);

        let committed = world.committed_claims(zone.id, &window(0, 10)).unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].state, ClaimState::Committed);
        assert!(committed[0].committed_at.is_some());
    }

    #[test]
    fn test_commit_stale_write() {
        let (world, _zone, resource) = world_with_resource();
        let snap = world.snapshot().unwrap();

        // A racing commit advances the zone past our snapshot.
        let racing = Claim::proposed(
            ProposalId::new(),
            resource.id,
            ClaimKind::Shared,
            window(0, 10),
            None,
        );
        world.commit(vec![racing], &snap).unwrap();

        let late = Claim::proposed(
            ProposalId::new(),
            resource.id,
            ClaimKind::Exclusive,
            window(5, 15),
            None,
        );
        let err = world.commit(vec![late], &snap).unwrap_err();
        assert!(matches!(err, WorldError::StaleWrite { .. }));
    }

    #[test]
    fn test_commit_is_all_or_nothing() {
        let (world, _zone, resource) = world_with_resource();
        let snap = world.snapshot().unwrap();

        let good = Claim::proposed(
            ProposalId::new(),
            resource.id,
            ClaimKind::Shared,
            window(0, 10),
            None,
        );
        let dangling = Claim::proposed(
            ProposalId::new(),
            ResourceId::new(),
            ClaimKind::Shared,
            window(0, 10),
            None,
        );

        let err = world.commit(vec![good, dangling], &snap).unwrap_err();
        assert!(matches!(err, WorldError::ResourceNotFound { .. }));
        assert_eq!(world.committed_claim_count().unwrap(), 0);
    }

    #[test]
    fn test_committed_claims_scoped_to_window() {
        let (world, zone, resource) = world_with_resource();
        let snap = world.snapshot().unwrap();
        let claim = Claim::proposed(
            ProposalId::new(),
            resource.id,
            ClaimKind::Exclusive,
            window(0, 10),
            None,
        );
        world.commit(vec![claim], &snap).unwrap();

        assert_eq!(world.committed_claims(zone.id, &window(10, 20)).unwrap().len(), 0);
        assert_eq!(world.committed_claims(zone.id, &window(9, 20)).unwrap().len(), 1);
    }

    #[test]
    fn test_commits_in_disjoint_zones_do_not_interfere() {
        let world = InMemoryWorld::new();
        let zone_a = Zone::new("a");
        let zone_b = Zone::new("b");
        world.add_zone(zone_a.clone()).unwrap();
        world.add_zone(zone_b.clone()).unwrap();
        let ra = Resource::new("ra", ResourceKind::Segment, zone_a.id);
        let rb = Resource::new("rb", ResourceKind::Segment, zone_b.id);
        world.add_resource(ra.clone()).unwrap();
        world.add_resource(rb.clone()).unwrap();

        let snap = world.snapshot().unwrap();

        let claim_a = Claim::proposed(
            ProposalId::new(),
            ra.id,
            ClaimKind::Exclusive,
            window(0, 10),
            None,
        );
        world.commit(vec![claim_a], &snap).unwrap();

        // Zone B is untouched, so the old snapshot is still valid there.
        let claim_b = Claim::proposed(
            ProposalId::new(),
            rb.id,
            ClaimKind::Exclusive,
            window(0, 10),
            None,
        );
        world.commit(vec![claim_b], &snap).unwrap();
        assert_eq!(world.committed_claim_count().unwrap(), 2);
    }
}
