//! Proposal intake: validation, timestamping, and deduplication.
//!
//! The active-proposal set is the only mutable shared state besides the
//! world model. It is partitioned per zone so that conflict discovery and
//! locking stay scoped to the zones a proposal actually touches.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{IntakeError, ValidationError, WardenError, WardenResult};
use crate::proposal::{Proposal, ProposalId};
use crate::resource::ZoneId;
use crate::world::WorldModel;

/// A proposal accepted into the active set, with its resolved zones.
#[derive(Debug, Clone)]
pub struct ActiveProposal {
    /// The accepted proposal.
    pub proposal: Arc<Proposal>,

    /// Zones the proposal's claims resolve to (sorted, deduplicated).
    pub zones: Vec<ZoneId>,
}

/// Result of a successful intake.
#[derive(Debug, Clone)]
pub struct IntakeAccepted {
    /// The now-active proposal.
    pub active: ActiveProposal,

    /// An older proposal for the same intent this one superseded, if any.
    pub superseded: Option<ProposalId>,
}

/// Processing state of an active proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProposalStatus {
    /// Eligible for detection and arbitration.
    Active,
    /// Member of a conflict group awaiting a human decision.
    Blocked,
}

#[derive(Debug)]
struct Entry {
    active: ActiveProposal,
    status: ProposalStatus,
}

#[derive(Debug, Default)]
struct ActiveSet {
    by_id: HashMap<ProposalId, Entry>,
    by_zone: HashMap<ZoneId, HashSet<ProposalId>>,
}

impl ActiveSet {
    fn insert(&mut self, active: ActiveProposal) {
        let id = active.proposal.id;
        for zone in &active.zones {
            self.by_zone.entry(*zone).or_default().insert(id);
        }
        self.by_id.insert(
            id,
            Entry {
                active,
                status: ProposalStatus::Active,
            },
        );
    }

    fn remove(&mut self, id: ProposalId) -> Option<ActiveProposal> {
        let entry = self.by_id.remove(&id)?;
        for zone in &entry.active.zones {
            if let Some(members) = self.by_zone.get_mut(zone) {
                members.remove(&id);
                if members.is_empty() {
                    self.by_zone.remove(zone);
                }
            }
        }
        Some(entry.active)
    }
}

fn lock_err(context: &'static str) -> WardenError {
    WardenError::internal(format!("poisoned intake lock: {context}"))
}

/// Validates, timestamps, and deduplicates incoming proposals.
pub struct ProposalIntake {
    world: Arc<dyn WorldModel>,
    staleness_bound: chrono::Duration,
    state: RwLock<ActiveSet>,
}

impl ProposalIntake {
    /// Creates an intake over the given world model.
    #[must_use]
    pub fn new(world: Arc<dyn WorldModel>, staleness_bound: chrono::Duration) -> Self {
        Self {
            world,
            staleness_bound,
            state: RwLock::new(ActiveSet::default()),
        }
    }

    /// Validates and admits a proposal into the active set.
    ///
    /// Stamps `submitted_at`, resolves claims to zones, and supersedes an
    /// older active proposal from the same producer for the same intent.
    ///
    /// # Errors
    ///
    /// - `IntakeError::Malformed` for missing/out-of-range fields, an
    ///   already-elapsed window, or a claim on an unknown resource.
    /// - `IntakeError::Stale` when the proposal's world snapshot is older
    ///   than the staleness bound.
    /// - `IntakeError::Duplicate` when the same proposal id is already
    ///   active.
    pub fn accept(
        &self,
        mut proposal: Proposal,
        now: DateTime<Utc>,
    ) -> WardenResult<IntakeAccepted> {
        proposal.validate().map_err(IntakeError::Malformed)?;

        if proposal.window.has_elapsed(now) {
            return Err(IntakeError::Malformed(ValidationError::WindowElapsed {
                end: proposal.window.end,
            })
            .into());
        }

        let age_secs = proposal.snapshot.age_secs(now);
        if age_secs > self.staleness_bound.num_seconds() {
            return Err(IntakeError::Stale {
                age_secs,
                bound_secs: self.staleness_bound.num_seconds(),
            }
            .into());
        }

        // Resolve every claim to its zone before touching shared state.
        let mut zones: Vec<ZoneId> = Vec::new();
        for claim in &proposal.claims {
            match self.world.zone_of(claim.resource)? {
                Some(zone) => {
                    if !zones.contains(&zone) {
                        zones.push(zone);
                    }
                }
                None => {
                    return Err(IntakeError::Malformed(ValidationError::UnknownResource {
                        id: claim.resource,
                    })
                    .into());
                }
            }
        }
        zones.sort_unstable();

        let mut state = self.state.write().map_err(|_| lock_err("accept"))?;

        if state.by_id.contains_key(&proposal.id) {
            return Err(IntakeError::Duplicate {
                producer: proposal.producer,
                existing: proposal.id,
            }
            .into());
        }

        // Same producer, same resource intent: the newer proposal
        // supersedes, the old one becomes void.
        let incumbent = zones
            .iter()
            .filter_map(|zone| state.by_zone.get(zone))
            .flatten()
            .filter_map(|id| state.by_id.get(id))
            .find(|entry| entry.active.proposal.same_intent(&proposal))
            .map(|entry| entry.active.proposal.id);

        let superseded = match incumbent {
            Some(id) => {
                debug!(superseded = %id, producer = %proposal.producer, "superseding active proposal");
                state.remove(id);
                Some(id)
            }
            None => None,
        };

        proposal.submitted_at = now;
        let active = ActiveProposal {
            proposal: Arc::new(proposal),
            zones,
        };
        state.insert(active.clone());
        info!(proposal = %active.proposal.id, zones = active.zones.len(), "proposal accepted");

        Ok(IntakeAccepted { active, superseded })
    }

    /// Removes a proposal from the active set (resolved or voided).
    pub fn remove(&self, id: ProposalId) -> Option<ActiveProposal> {
        self.state.write().ok()?.remove(id)
    }

    /// Marks proposals as blocked on a pending human decision.
    pub fn mark_blocked(&self, ids: &[ProposalId]) {
        if let Ok(mut state) = self.state.write() {
            for id in ids {
                if let Some(entry) = state.by_id.get_mut(id) {
                    entry.status = ProposalStatus::Blocked;
                }
            }
        }
    }

    /// Returns blocked proposals to the eligible pool.
    pub fn reactivate(&self, ids: &[ProposalId]) {
        if let Ok(mut state) = self.state.write() {
            for id in ids {
                if let Some(entry) = state.by_id.get_mut(id) {
                    entry.status = ProposalStatus::Active;
                }
            }
        }
    }

    /// Eligible (non-blocked) active proposals registered in any of the
    /// given zones, excluding the listed ids.
    #[must_use]
    pub fn eligible_in_zones(
        &self,
        zones: &[ZoneId],
        exclude: &[ProposalId],
    ) -> Vec<ActiveProposal> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };

        let mut seen: HashSet<ProposalId> = exclude.iter().copied().collect();
        let mut result = Vec::new();
        for zone in zones {
            let Some(members) = state.by_zone.get(zone) else {
                continue;
            };
            for id in members {
                if !seen.insert(*id) {
                    continue;
                }
                if let Some(entry) = state.by_id.get(id) {
                    if entry.status == ProposalStatus::Active {
                        result.push(entry.active.clone());
                    }
                }
            }
        }
        // Deterministic processing order regardless of hash iteration.
        result.sort_by_key(|a| (a.proposal.submitted_at, a.proposal.id));
        result
    }

    /// Fetches an active proposal by id.
    #[must_use]
    pub fn get(&self, id: ProposalId) -> Option<ActiveProposal> {
        self.state
            .read()
            .ok()
            .and_then(|state| state.by_id.get(&id).map(|e| e.active.clone()))
    }

    /// Returns true if the proposal is active (any status).
    #[must_use]
    pub fn is_active(&self, id: ProposalId) -> bool {
        self.state
            .read()
            .map(|state| state.by_id.contains_key(&id))
            .unwrap_or(false)
    }

    /// Number of active proposals.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.read().map(|state| state.by_id.len()).unwrap_or(0)
    }

    /// Zones with at least one active proposal.
    #[must_use]
    pub fn active_zones(&self) -> Vec<ZoneId> {
        self.state
            .read()
            .map(|state| state.by_zone.keys().copied().collect())
            .unwrap_or_default()
    }
}
