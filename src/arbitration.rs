//! The arbitration engine.
//!
//! Applies the ordered policy to a conflict group: safety first, then
//! priority/time-sensitivity, then first-submitted-first-served, then
//! global cost minimization. Later rules only break ties left by earlier
//! ones. Every disposition is attributed to the rule that decided it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::config::ArbiterConfig;
use crate::constraint::{kinds_incompatible, ConstraintFact, ConstraintRule, ConstraintScope};
use crate::error::{EscalationError, WardenError, WardenResult, WorldError};
use crate::estimator::{Estimate, EstimatorClient, GroupEstimateRequest};
use crate::group::ConflictGroup;
use crate::intake::ActiveProposal;
use crate::proposal::{Proposal, ProposalId};
use crate::resolution::{
    DecisionRule, Disposition, ProposalDisposition, Resolution, ResolutionId,
};
use crate::resource::{ClaimKind, Resource, ResourceId, ZoneId};
use crate::time::TimeWindow;
use crate::world::{Snapshot, WorldModel};

/// Everything the finalizer needs from one arbitration run.
#[derive(Debug, Clone)]
pub struct ArbitrationOutput {
    /// The decided resolution.
    pub resolution: Resolution,

    /// The snapshot the engine read against; commits are conditioned on it.
    pub snapshot: Snapshot,

    /// The (possibly degraded) estimator score used.
    pub estimate: Estimate,
}

/// One occupied slot on the scheduling board.
#[derive(Debug, Clone)]
struct BoardEntry {
    proposal: ProposalId,
    kind: ClaimKind,
    window: TimeWindow,
    load_kg: Option<f64>,
}

/// In-flight schedule for the group being arbitrated: committed claims
/// plus the members already granted a window.
#[derive(Debug, Default)]
struct Board {
    by_resource: HashMap<ResourceId, Vec<BoardEntry>>,
    by_zone: HashMap<ZoneId, Vec<BoardEntry>>,
}

impl Board {
    fn occupy(
        &mut self,
        proposal: ProposalId,
        resource: ResourceId,
        zone: ZoneId,
        kind: ClaimKind,
        window: TimeWindow,
        load_kg: Option<f64>,
    ) {
        let entry = BoardEntry {
            proposal,
            kind,
            window,
            load_kg,
        };
        self.by_resource
            .entry(resource)
            .or_default()
            .push(entry.clone());
        self.by_zone.entry(zone).or_default().push(entry);
    }

    fn resource_entries(&self, resource: ResourceId) -> &[BoardEntry] {
        self.by_resource
            .get(&resource)
            .map_or(&[], Vec::as_slice)
    }

    fn zone_entries(&self, zone: ZoneId) -> &[BoardEntry] {
        self.by_zone.get(&zone).map_or(&[], Vec::as_slice)
    }
}

/// Per-run cache of resources and their in-scope constraint facts.
#[derive(Default)]
struct WorldCache {
    resources: HashMap<ResourceId, Resource>,
    facts: HashMap<ResourceId, Vec<ConstraintFact>>,
}

/// Applies the ordered arbitration policy to conflict groups.
pub struct ArbitrationEngine {
    world: Arc<dyn WorldModel>,
    estimator: Arc<EstimatorClient>,
    config: ArbiterConfig,
}

impl ArbitrationEngine {
    /// Creates an engine over the given world model and estimator client.
    #[must_use]
    pub fn new(
        world: Arc<dyn WorldModel>,
        estimator: Arc<EstimatorClient>,
        config: ArbiterConfig,
    ) -> Self {
        Self {
            world,
            estimator,
            config,
        }
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

    fn hard_facts(&self, cache: &mut WorldCache, id: ResourceId) -> WardenResult<Vec<ConstraintFact>> {
        if let Some(facts) = cache.facts.get(&id) {
            return Ok(facts.clone());
        }
        let facts: Vec<ConstraintFact> = self
            .world
            .constraints_for(id)?
            .into_iter()
            .filter(ConstraintFact::is_hard)
            .collect();
        cache.facts.insert(id, facts.clone());
        Ok(facts)
    }

    /// Window-independent hard violations: locks and single-claim weight
    /// excess. No reschedule can clear these.
    fn static_violation(
        &self,
        cache: &mut WorldCache,
        proposal: &Proposal,
    ) -> WardenResult<Option<String>> {
        for claim in &proposal.claims {
            let resource = self.resource(cache, claim.resource)?;
            for fact in self.hard_facts(cache, claim.resource)? {
                if let Some(reason) = fact.lock_reason() {
                    return Ok(Some(format!(
                        "resource '{}' is locked: {reason}",
                        resource.name
                    )));
                }
                if let ConstraintRule::WeightLimit { max_kg } = fact.rule {
                    if claim.load_kg.is_some_and(|load| load > max_kg) {
                        return Ok(Some(format!(
                            "claim load exceeds weight limit of {max_kg} kg on '{}'",
                            resource.name
                        )));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Proposals/claims blocking this proposal at the given window.
    ///
    /// Empty result means the window is free. Blockers include committed
    /// claims (foreign proposal ids) and group members already scheduled.
    fn blockers_at(
        &self,
        cache: &mut WorldCache,
        proposal: &Proposal,
        window: &TimeWindow,
        board: &Board,
    ) -> WardenResult<Vec<ProposalId>> {
        let mut blockers: Vec<ProposalId> = Vec::new();
        let mut push = |id: ProposalId| {
            if !blockers.contains(&id) {
                blockers.push(id);
            }
        };

        for claim in &proposal.claims {
            let resource = self.resource(cache, claim.resource)?;
            let facts = self.hard_facts(cache, claim.resource)?;

            // Same-resource checks: incompatibility, capacity, weight.
            let overlapping: Vec<&BoardEntry> = board
                .resource_entries(claim.resource)
                .iter()
                .filter(|e| e.proposal != proposal.id && e.window.overlaps(window))
                .collect();

            for entry in &overlapping {
                if kinds_incompatible(&claim.kind, &entry.kind, &facts) {
                    push(entry.proposal);
                }
            }
            if overlapping.len() + 1 > resource.capacity as usize {
                for entry in &overlapping {
                    push(entry.proposal);
                }
            }
            if let Some(limit) = resource.weight_limit_kg {
                let occupied: f64 = overlapping.iter().filter_map(|e| e.load_kg).sum();
                if occupied + claim.load_kg.unwrap_or(0.0) > limit {
                    for entry in &overlapping {
                        push(entry.proposal);
                    }
                }
            }

            // Zone-wide checks: pair rules and zone capacity.
            let zone_overlapping: Vec<&BoardEntry> = board
                .zone_entries(resource.zone)
                .iter()
                .filter(|e| e.proposal != proposal.id && e.window.overlaps(window))
                .collect();

            for fact in &facts {
                let ConstraintScope::Zone(zone) = fact.scope else {
                    continue;
                };
                if zone != resource.zone {
                    continue;
                }
                for entry in &zone_overlapping {
                    if fact.forbids_pair(&claim.kind, &entry.kind) {
                        push(entry.proposal);
                    }
                }
                if let ConstraintRule::CapacityLimit { limit } = fact.rule {
                    let distinct: std::collections::HashSet<ProposalId> =
                        zone_overlapping.iter().map(|e| e.proposal).collect();
                    if distinct.len() + 1 > limit as usize {
                        for entry in &zone_overlapping {
                            push(entry.proposal);
                        }
                    }
                }
            }
        }

        Ok(blockers)
    }

    /// Feasible reschedule windows, producer-preferred alternatives first,
    /// then the earliest free windows after the blocking claims.
    fn reschedule_candidates(
        &self,
        cache: &mut WorldCache,
        proposal: &Proposal,
        board: &Board,
        now: DateTime<Utc>,
    ) -> WardenResult<Vec<TimeWindow>> {
        let mut candidates: Vec<TimeWindow> = Vec::new();
        let fits_deadline =
            |w: &TimeWindow| proposal.deadline.map_or(true, |deadline| w.end <= deadline);

        for alt in &proposal.alternatives {
            if candidates.len() >= self.config.max_reschedule_candidates {
                break;
            }
            if alt.has_elapsed(now) || !fits_deadline(alt) {
                continue;
            }
            if self.blockers_at(cache, proposal, alt, board)?.is_empty() {
                candidates.push(*alt);
            }
        }

        // Candidate start times: the ends of every occupied window on the
        // proposal's resources and zones, after the requested start.
        let mut starts: Vec<DateTime<Utc>> = Vec::new();
        for claim in &proposal.claims {
            let resource = self.resource(cache, claim.resource)?;
            for entry in board
                .resource_entries(claim.resource)
                .iter()
                .chain(board.zone_entries(resource.zone).iter())
            {
                if entry.window.end > proposal.window.start && !starts.contains(&entry.window.end) {
                    starts.push(entry.window.end);
                }
            }
        }
        starts.sort_unstable();

        for start in starts {
            if candidates.len() >= self.config.max_reschedule_candidates {
                break;
            }
            let shifted = proposal.window.shifted_to(start);
            if shifted.has_elapsed(now) || !fits_deadline(&shifted) {
                continue;
            }
            if candidates.contains(&shifted) {
                continue;
            }
            if self.blockers_at(cache, proposal, &shifted, board)?.is_empty() {
                candidates.push(shifted);
            }
        }

        Ok(candidates)
    }

    /// Total-delay cost of a candidate window, weighted by congestion and
    /// by the delay it would induce on the group members not yet scheduled.
    fn candidate_cost(
        candidate: &TimeWindow,
        proposal: &Proposal,
        remaining: &[&ActiveProposal],
        congestion: f32,
    ) -> f64 {
        let own_delay = proposal.window.delay_until(candidate).max(0) as f64;
        let mut induced = 0.0;
        for other in remaining {
            let shares = other.proposal.claims.iter().any(|oc| {
                proposal.claims.iter().any(|c| c.resource == oc.resource)
            });
            if !shares {
                continue;
            }
            if let Some(overlap) = candidate.intersection(&other.proposal.window) {
                induced += overlap.duration().num_minutes() as f64;
            }
        }
        (own_delay + induced) * (1.0 + f64::from(congestion))
    }

    /// Occupies the board with a member's claims at the given window.
    fn schedule(
        &self,
        cache: &mut WorldCache,
        board: &mut Board,
        proposal: &Proposal,
        window: TimeWindow,
    ) -> WardenResult<()> {
        for claim in &proposal.claims {
            let resource = self.resource(cache, claim.resource)?;
            board.occupy(
                proposal.id,
                claim.resource,
                resource.zone,
                claim.kind.clone(),
                window,
                claim.load_kg,
            );
        }
        Ok(())
    }

    /// Loads committed claims for the group's zones over a wide horizon.
    fn load_board(
        &self,
        cache: &mut WorldCache,
        zones: &[ZoneId],
        horizon: &TimeWindow,
    ) -> WardenResult<Board> {
        let mut board = Board::default();
        for zone in zones {
            for claim in self.world.committed_claims(*zone, horizon)? {
                let resource = self.resource(cache, claim.resource)?;
                board.occupy(
                    claim.proposal,
                    claim.resource,
                    resource.zone,
                    claim.kind.clone(),
                    claim.window,
                    claim.load_kg,
                );
            }
        }
        Ok(board)
    }

    fn horizon_for(members: &[&ActiveProposal], window: &TimeWindow) -> TimeWindow {
        let mut end = window.end;
        let mut total = Duration::zero();
        for member in members {
            total = total + member.proposal.window.duration();
            if let Some(deadline) = member.proposal.deadline {
                end = end.max(deadline);
            }
            for alt in &member.proposal.alternatives {
                end = end.max(alt.end);
            }
        }
        TimeWindow {
            start: window.start,
            end: end + total + Duration::hours(8),
        }
    }

    /// Arbitrates one conflict group.
    ///
    /// # Errors
    ///
    /// Propagates world-model failures; estimator failures degrade instead.
    pub fn arbitrate_group(&self, group: &ConflictGroup) -> WardenResult<ArbitrationOutput> {
        let now = Utc::now();
        let snapshot = self.world.snapshot()?;
        let mut cache = WorldCache::default();

        // Rank: priority desc, then submission order, then id for stability.
        let mut ranked: Vec<&ActiveProposal> = group.members.iter().collect();
        ranked.sort_by(|a, b| {
            b.proposal
                .priority
                .cmp(&a.proposal.priority)
                .then(a.proposal.submitted_at.cmp(&b.proposal.submitted_at))
                .then(a.proposal.id.cmp(&b.proposal.id))
        });

        let horizon = Self::horizon_for(&ranked, &group.window);
        let mut board = self.load_board(&mut cache, &group.zones, &horizon)?;

        // One estimator fetch per group, never per proposal.
        let total_requested_minutes: i64 = ranked
            .iter()
            .map(|m| m.proposal.window.duration().num_minutes())
            .sum();
        let estimate = self.estimator.fetch(GroupEstimateRequest {
            group: group.id,
            zone: group.zones.first().copied().unwrap_or_default(),
            window: group.window,
            resource_count: group.resources.len(),
            proposal_count: group.members.len(),
            total_requested_minutes,
        });

        let priorities: HashMap<ProposalId, u8> = ranked
            .iter()
            .map(|m| (m.proposal.id, m.proposal.priority))
            .collect();

        let mut dispositions: Vec<ProposalDisposition> = Vec::new();
        let mut extra_candidates: usize = 0;
        let mut deadline_risk: f32 = 0.0;
        let mut any_rescheduled = false;

        for (idx, member) in ranked.iter().enumerate() {
            let proposal = &member.proposal;

            // Rule 1: safety. Locks and over-limit loads have no feasible
            // disposition at any window.
            if let Some(reason) = self.static_violation(&mut cache, proposal)? {
                dispositions.push(ProposalDisposition {
                    proposal: proposal.id,
                    disposition: Disposition::Infeasible {
                        reason: reason.clone(),
                    },
                    rule: DecisionRule::Safety,
                    note: reason,
                });
                continue;
            }

            let blockers = self.blockers_at(&mut cache, proposal, &proposal.window, &board)?;
            if blockers.is_empty() {
                // The window is free: the member wins it. Attribute the rule
                // that actually settled the contest.
                let contested_tie = ranked[idx + 1..].iter().any(|other| {
                    other.proposal.priority == proposal.priority
                        && other.proposal.window.overlaps(&proposal.window)
                });
                let (rule, note) = if group.len() == 1 {
                    (DecisionRule::Safety, "sole member, no safety violation".to_string())
                } else if contested_tie {
                    (
                        DecisionRule::SubmissionOrder,
                        "equal priority, submitted first".to_string(),
                    )
                } else {
                    (
                        DecisionRule::Priority,
                        format!("priority {} wins the contended window", proposal.priority),
                    )
                };
                dispositions.push(ProposalDisposition {
                    proposal: proposal.id,
                    disposition: Disposition::Approve,
                    rule,
                    note,
                });
                self.schedule(&mut cache, &mut board, proposal, proposal.window)?;
                continue;
            }

            // The member lost its requested window. Which rule beat it?
            let beaten_by_tie = blockers.iter().any(|id| {
                priorities
                    .get(id)
                    .is_some_and(|p| *p == proposal.priority)
            });
            let lost_rule = if beaten_by_tie {
                DecisionRule::SubmissionOrder
            } else {
                DecisionRule::Priority
            };

            // Rules 2-4: reschedule to the earliest feasible window; among
            // several, minimize total delay across the group.
            let candidates =
                self.reschedule_candidates(&mut cache, proposal, &board, now)?;
            match candidates.len() {
                0 => {
                    let reason = if proposal.deadline.is_some() {
                        "no free window before the deadline".to_string()
                    } else {
                        "no feasible reschedule window found".to_string()
                    };
                    dispositions.push(ProposalDisposition {
                        proposal: proposal.id,
                        disposition: Disposition::Infeasible {
                            reason: reason.clone(),
                        },
                        rule: lost_rule,
                        note: reason,
                    });
                }
                1 => {
                    let window = candidates[0];
                    let delay = proposal.window.delay_until(&window).max(0);
                    dispositions.push(ProposalDisposition {
                        proposal: proposal.id,
                        disposition: Disposition::Reschedule { window },
                        rule: lost_rule,
                        note: format!("moved {delay} min to the next free window"),
                    });
                    deadline_risk = deadline_risk.max(Self::slack_risk(proposal, &window));
                    any_rescheduled = true;
                    self.schedule(&mut cache, &mut board, proposal, window)?;
                }
                n => {
                    extra_candidates += n - 1;
                    let remaining = &ranked[idx + 1..];
                    let window = candidates
                        .iter()
                        .copied()
                        .min_by(|a, b| {
                            let ca =
                                Self::candidate_cost(a, proposal, remaining, estimate.congestion);
                            let cb =
                                Self::candidate_cost(b, proposal, remaining, estimate.congestion);
                            ca.partial_cmp(&cb)
                                .unwrap_or(std::cmp::Ordering::Equal)
                                .then(a.start.cmp(&b.start))
                        })
                        .unwrap_or(candidates[0]);
                    let delay = proposal.window.delay_until(&window).max(0);
                    dispositions.push(ProposalDisposition {
                        proposal: proposal.id,
                        disposition: Disposition::Reschedule { window },
                        rule: DecisionRule::GlobalCost,
                        note: format!(
                            "{n} feasible windows, chose minimum total delay ({delay} min)"
                        ),
                    });
                    deadline_risk = deadline_risk.max(Self::slack_risk(proposal, &window));
                    any_rescheduled = true;
                    self.schedule(&mut cache, &mut board, proposal, window)?;
                }
            }
        }

        // Ambiguity: how close the competing priorities were and how many
        // feasible reschedulings existed.
        let ambiguity = if group.len() < 2 {
            0.0
        } else {
            let closeness = {
                let gap = i32::from(ranked[0].proposal.priority)
                    - i32::from(ranked[1].proposal.priority);
                ((3 - gap).max(0) as f32) / 3.0
            };
            let spread = (extra_candidates.min(4) as f32) / 4.0;
            0.6 * closeness + 0.4 * spread
        };
        let mut confidence = (1.0 - ambiguity).clamp(0.0, 1.0);

        let safety_risk = dispositions
            .iter()
            .filter(|d| d.disposition.proceeds())
            .filter_map(|d| group.members.iter().find(|m| m.proposal.id == d.proposal))
            .map(|m| m.proposal.risk)
            .fold(0.0_f32, f32::max);
        if any_rescheduled {
            deadline_risk = deadline_risk.max(estimate.time_risk * 0.25);
        }

        let none_proceeds = !dispositions.iter().any(|d| d.disposition.proceeds());
        if none_proceeds {
            // Rejecting the violators left no feasible combination: the
            // whole group must escalate.
            confidence = 0.0;
        }

        let mut resolution = Resolution {
            id: ResolutionId::new(),
            group: Some(group.id),
            version: 1,
            dispositions,
            rationale: String::new(),
            confidence,
            safety_risk,
            deadline_risk,
            degraded_estimate: estimate.degraded,
            auto_timeout: false,
            decided_at: now,
        };
        resolution.rationale = Self::build_rationale(group, &resolution, none_proceeds);

        debug!(
            group = %group.id,
            confidence = resolution.confidence,
            members = group.len(),
            "group arbitrated"
        );

        Ok(ArbitrationOutput {
            resolution,
            snapshot,
            estimate,
        })
    }

    /// Arbitrates a proposal that conflicts with no other active proposal.
    ///
    /// The proposal may still lose to committed claims (a racing commit) or
    /// to a hard constraint on its own claims.
    pub fn arbitrate_single(&self, member: &ActiveProposal) -> WardenResult<ArbitrationOutput> {
        let now = Utc::now();
        let snapshot = self.world.snapshot()?;
        let mut cache = WorldCache::default();
        let proposal = &member.proposal;

        let horizon = Self::horizon_for(&[member], &proposal.window);
        let board = self.load_board(&mut cache, &member.zones, &horizon)?;

        let (disposition, rule, note) =
            if let Some(reason) = self.static_violation(&mut cache, proposal)? {
                (
                    Disposition::Infeasible {
                        reason: reason.clone(),
                    },
                    DecisionRule::Safety,
                    reason,
                )
            } else if self
                .blockers_at(&mut cache, proposal, &proposal.window, &board)?
                .is_empty()
            {
                (
                    Disposition::Approve,
                    DecisionRule::DirectApproval,
                    "no conflicting claims".to_string(),
                )
            } else {
                let candidates = self.reschedule_candidates(&mut cache, proposal, &board, now)?;
                match candidates.first() {
                    Some(window) => {
                        let delay = proposal.window.delay_until(window).max(0);
                        (
                            Disposition::Reschedule { window: *window },
                            DecisionRule::Priority,
                            format!(
                                "requested window already committed, moved {delay} min"
                            ),
                        )
                    }
                    None => (
                        Disposition::Infeasible {
                            reason: "committed claims leave no feasible window".to_string(),
                        },
                        DecisionRule::Priority,
                        "committed claims leave no feasible window".to_string(),
                    ),
                }
            };

        let proceeds = disposition.proceeds();
        let infeasible = disposition.is_infeasible();
        let deadline_risk = match &disposition {
            Disposition::Reschedule { window } => Self::slack_risk(proposal, window),
            _ => 0.0,
        };

        if infeasible {
            warn!(proposal = %proposal.id, "no feasible disposition for unconflicted proposal");
        }

        let resolution = Resolution {
            id: ResolutionId::new(),
            group: None,
            version: 1,
            dispositions: vec![ProposalDisposition {
                proposal: proposal.id,
                disposition,
                rule,
                note: note.clone(),
            }],
            rationale: format!("proposal {}: {note}", proposal.id),
            confidence: if infeasible { 0.0 } else { 1.0 },
            safety_risk: if proceeds { proposal.risk } else { 0.0 },
            deadline_risk,
            degraded_estimate: false,
            auto_timeout: false,
            decided_at: now,
        };

        Ok(ArbitrationOutput {
            resolution,
            snapshot,
            estimate: Estimate {
                congestion: 0.0,
                time_risk: 0.0,
                confidence: 1.0,
                degraded: false,
            },
        })
    }

    /// Re-validates human-modified dispositions against hard safety
    /// constraints and the committed schedule.
    ///
    /// # Errors
    ///
    /// Returns `EscalationError::UnsafeModification` when any proposed
    /// disposition would violate a hard constraint; the modification must
    /// go back to the reviewer, never be silently accepted.
    pub fn validate_human_dispositions(
        &self,
        members: &[ActiveProposal],
        dispositions: &[(ProposalId, Disposition)],
    ) -> WardenResult<()> {
        let mut cache = WorldCache::default();
        let zones: Vec<ZoneId> = {
            let mut zones: Vec<ZoneId> = members.iter().flat_map(|m| m.zones.clone()).collect();
            zones.sort_unstable();
            zones.dedup();
            zones
        };
        let member_refs: Vec<&ActiveProposal> = members.iter().collect();
        let envelope = members
            .iter()
            .map(|m| m.proposal.window)
            .reduce(|a, b| a.envelope(&b))
            .ok_or_else(|| WardenError::internal("empty member set"))?;
        let horizon = Self::horizon_for(&member_refs, &envelope);
        let mut board = self.load_board(&mut cache, &zones, &horizon)?;

        for (id, disposition) in dispositions {
            let window = match disposition {
                Disposition::Approve => None,
                Disposition::Reschedule { window } => Some(*window),
                Disposition::Reject { .. } | Disposition::Infeasible { .. } => continue,
            };
            let member = members
                .iter()
                .find(|m| m.proposal.id == *id)
                .ok_or_else(|| {
                    WardenError::internal(format!("disposition for unknown proposal {id}"))
                })?;
            let proposal = &member.proposal;
            let window = window.unwrap_or(proposal.window);

            if let Some(reason) = self.static_violation(&mut cache, proposal)? {
                return Err(EscalationError::UnsafeModification {
                    reason: format!("proposal {id}: {reason}"),
                }
                .into());
            }
            if let Some(deadline) = proposal.deadline {
                if window.end > deadline {
                    return Err(EscalationError::UnsafeModification {
                        reason: format!(
                            "proposal {id}: assigned window ends after the deadline"
                        ),
                    }
                    .into());
                }
            }
            let blockers = self.blockers_at(&mut cache, proposal, &window, &board)?;
            if !blockers.is_empty() {
                return Err(EscalationError::UnsafeModification {
                    reason: format!(
                        "proposal {id}: assigned window conflicts with {} other claim(s)",
                        blockers.len()
                    ),
                }
                .into());
            }
            self.schedule(&mut cache, &mut board, proposal, window)?;
        }

        Ok(())
    }

    fn slack_risk(proposal: &Proposal, window: &TimeWindow) -> f32 {
        let Some(deadline) = proposal.deadline else {
            return 0.0;
        };
        let delay = proposal.window.delay_until(window).max(0) as f32;
        if delay <= 0.0 {
            return 0.0;
        }
        let slack = (deadline - window.end).num_minutes().max(0) as f32;
        delay / (delay + slack)
    }

    fn build_rationale(group: &ConflictGroup, resolution: &Resolution, none_proceeds: bool) -> String {
        let mut lines = vec![format!(
            "conflict group {} ({}, {} proposals) over {} resource(s), window {} .. {}",
            group.id,
            group.kind,
            group.len(),
            group.resources.len(),
            group.window.start,
            group.window.end,
        )];
        for d in &resolution.dispositions {
            lines.push(format!(
                "  {}: {} [{}] {}",
                d.proposal, d.disposition, d.rule, d.note
            ));
        }
        if resolution.degraded_estimate {
            lines.push("  degraded estimate used".to_string());
        }
        if none_proceeds {
            lines.push("  no feasible combination remains; escalating".to_string());
        }
        lines.join("\n")
    }
}
