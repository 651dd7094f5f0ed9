//! Conflict detection over the active-proposal set.
//!
//! Two proposals intersect when they touch the same resource (or the same
//! zone under a zone-wide rule), their windows overlap, and the constraint
//! facts forbid concurrent claims of their kinds. Comparisons are scoped to
//! proposals active in the same zones, keeping discovery sub-linear in the
//! total proposal history.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::constraint::{kinds_incompatible, ConstraintFact, ConstraintRule, ConstraintScope};
use crate::error::{WardenResult, WorldError};
use crate::group::{ConflictGroup, ConflictKind};
use crate::intake::ActiveProposal;
use crate::resource::{Resource, ResourceId};
use crate::world::WorldModel;

/// Groups active proposals into conflict groups using world-model
/// relationships.
pub struct ConflictDetector {
    world: Arc<dyn WorldModel>,
}

/// Per-detection cache of resources and their in-scope constraint facts.
#[derive(Default)]
struct WorldCache {
    resources: HashMap<ResourceId, Resource>,
    facts: HashMap<ResourceId, Vec<ConstraintFact>>,
}

impl ConflictDetector {
    /// Creates a detector over the given world model.
    #[must_use]
    pub fn new(world: Arc<dyn WorldModel>) -> Self {
        Self { world }
    }

    fn resource(&self, cache: &mut WorldCache, id: ResourceId) -> WardenResult<Resource> {
        if let Some(resource) = cache.resources.get(&id) {
            return Ok(resource.clone());
        }
        let resource = self
            .world
            .resource(id)?
            .ok_or(WorldError::ResourceNotFound { id })?;
        cache.resources.insert(id, resource.clone());
        Ok(resource)
    }

    fn facts(&self, cache: &mut WorldCache, id: ResourceId) -> WardenResult<Vec<ConstraintFact>> {
        if let Some(facts) = cache.facts.get(&id) {
            return Ok(facts.clone());
        }
        let facts = self.world.constraints_for(id)?;
        cache.facts.insert(id, facts.clone());
        Ok(facts)
    }

    /// Determines whether two proposals intersect, and how.
    ///
    /// Only hard constraint facts forbid concurrency; soft facts feed risk
    /// scoring elsewhere.
    fn pair_basis(
        &self,
        cache: &mut WorldCache,
        a: &ActiveProposal,
        b: &ActiveProposal,
    ) -> WardenResult<Option<ConflictKind>> {
        if !a.proposal.window.overlaps(&b.proposal.window) {
            return Ok(None);
        }

        let mut contention = false;
        for ca in &a.proposal.claims {
            for cb in &b.proposal.claims {
                let ra = self.resource(cache, ca.resource)?;
                let rb = self.resource(cache, cb.resource)?;

                if ca.resource == cb.resource {
                    let facts = self.facts(cache, ca.resource)?;
                    let hard: Vec<ConstraintFact> =
                        facts.iter().filter(|f| f.is_hard()).cloned().collect();
                    if hard.iter().any(|f| f.forbids_pair(&ca.kind, &cb.kind)) {
                        return Ok(Some(ConflictKind::SafetyViolation));
                    }
                    if kinds_incompatible(&ca.kind, &cb.kind, &hard) || ra.capacity < 2 {
                        contention = true;
                    }
                } else if ra.zone == rb.zone {
                    let facts = self.facts(cache, ca.resource)?;
                    for fact in facts.iter().filter(|f| f.is_hard()) {
                        let ConstraintScope::Zone(zone) = fact.scope else {
                            continue;
                        };
                        if zone != ra.zone {
                            continue;
                        }
                        if fact.forbids_pair(&ca.kind, &cb.kind) {
                            return Ok(Some(ConflictKind::SafetyViolation));
                        }
                        if let ConstraintRule::CapacityLimit { limit } = fact.rule {
                            if limit < 2 {
                                contention = true;
                            }
                        }
                    }
                }
            }
        }

        if !contention {
            return Ok(None);
        }

        // Contention where the losing side cannot absorb the winner's
        // window without crossing its own deadline is a time/priority
        // tradeoff, not plain contention.
        let a_squeezed = a
            .proposal
            .deadline_slack_minutes()
            .is_some_and(|slack| slack < b.proposal.window.duration().num_minutes());
        let b_squeezed = b
            .proposal
            .deadline_slack_minutes()
            .is_some_and(|slack| slack < a.proposal.window.duration().num_minutes());
        if a_squeezed || b_squeezed {
            return Ok(Some(ConflictKind::TimePriorityTradeoff));
        }

        Ok(Some(ConflictKind::ResourceContention))
    }

    /// Groups a batch of eligible proposals into conflict groups.
    ///
    /// Returns the groups plus the proposals that conflict with nothing.
    /// A proposal lands in at most one group: conflicts spanning several
    /// existing groups merge them, and ambiguous membership favors the
    /// larger existing group.
    pub fn detect_batch(
        &self,
        proposals: &[ActiveProposal],
    ) -> WardenResult<(Vec<ConflictGroup>, Vec<ActiveProposal>)> {
        let mut cache = WorldCache::default();
        let mut groups: Vec<ConflictGroup> = Vec::new();
        let mut loose: Vec<ActiveProposal> = Vec::new();

        for candidate in proposals {
            // Which existing groups does the candidate intersect?
            let mut hits: Vec<(usize, ConflictKind)> = Vec::new();
            for (idx, group) in groups.iter().enumerate() {
                let mut basis: Option<ConflictKind> = None;
                for member in &group.members {
                    if let Some(kind) = self.pair_basis(&mut cache, candidate, member)? {
                        basis = Some(basis.map_or(kind, |k| k.merge(kind)));
                    }
                }
                if let Some(kind) = basis {
                    hits.push((idx, kind));
                }
            }

            // Which loose proposals does it intersect?
            let mut loose_hits: Vec<(usize, ConflictKind)> = Vec::new();
            for (idx, other) in loose.iter().enumerate() {
                if let Some(kind) = self.pair_basis(&mut cache, candidate, other)? {
                    loose_hits.push((idx, kind));
                }
            }

            if hits.is_empty() && loose_hits.is_empty() {
                loose.push(candidate.clone());
                continue;
            }

            let target = if hits.is_empty() {
                // New group seeded from the candidate and its first loose hit.
                let (first_idx, first_kind) = loose_hits[0];
                let seed = loose.remove(first_idx);
                let group = ConflictGroup::pair(seed, candidate.clone(), first_kind);
                groups.push(group);
                // Removal shifted indices past first_idx down by one.
                for hit in &mut loose_hits {
                    if hit.0 > first_idx {
                        hit.0 -= 1;
                    }
                }
                loose_hits.remove(0);
                groups.len() - 1
            } else {
                // Ambiguous membership favors the larger existing group.
                let target = hits
                    .iter()
                    .max_by_key(|(idx, _)| groups[*idx].len())
                    .map(|(idx, _)| *idx)
                    .ok_or_else(|| crate::error::WardenError::internal("empty hit set"))?;

                let mut kind = groups[target].kind;
                for (_, hit_kind) in &hits {
                    kind = kind.merge(*hit_kind);
                }
                groups[target].kind = kind;
                groups[target].absorb(candidate.clone());

                // Merge every other intersecting group into the target.
                let mut to_merge: Vec<usize> =
                    hits.iter().map(|(idx, _)| *idx).filter(|&i| i != target).collect();
                to_merge.sort_unstable_by(|x, y| y.cmp(x));
                let mut target = target;
                for idx in to_merge {
                    let absorbed = groups.remove(idx);
                    if idx < target {
                        target -= 1;
                    }
                    groups[target].merge(absorbed);
                }
                target
            };

            // Pull in any remaining loose proposals the candidate hit,
            // removing from the back so earlier indices stay valid.
            loose_hits.sort_unstable_by(|x, y| y.0.cmp(&x.0));
            for (idx, kind) in loose_hits {
                let member = loose.remove(idx);
                groups[target].kind = groups[target].kind.merge(kind);
                groups[target].absorb(member);
            }
        }

        if !groups.is_empty() {
            debug!(
                groups = groups.len(),
                loose = loose.len(),
                "conflict detection complete"
            );
        }
        Ok((groups, loose))
    }

}
