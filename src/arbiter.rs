//! The arbiter facade: wires intake, detection, arbitration, escalation,
//! and finalization behind per-zone locking.
//!
//! Groups touching disjoint zones are processed fully in parallel. A
//! submission acquires the locks of every involved zone for the duration of
//! detection + arbitration (+ auto-finalization), then releases them.
//! Pending escalations hold no zone locks.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::arbitration::{ArbitrationEngine, ArbitrationOutput};
use crate::audit::{AuditSink, HumanAction, HumanDecisionRecord};
use crate::config::ArbiterConfig;
use crate::detector::ConflictDetector;
use crate::error::{EscalationError, WardenError, WardenResult};
use crate::escalation::{
    Decision, EscalationGate, EscalationSink, EscalationVerdict, ImpactPreview, PendingDecision,
    RequestId,
};
use crate::estimator::{Estimator, EstimatorClient};
use crate::finalizer::{
    FinalDisposition, FinalizeOutcome, Outcome, OutcomeSink, ResolutionFinalizer,
};
use crate::group::{ConflictGroup, ConflictKind};
use crate::intake::{ActiveProposal, ProposalIntake};
use crate::proposal::{Proposal, ProposalId};
use crate::resolution::{
    DecisionRule, Disposition, ProposalDisposition, Resolution, ResolutionId,
};
use crate::resource::ZoneId;
use crate::world::WorldModel;

/// Outcome of one submission, from the submitting producer's view.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// The proposal's group (or the proposal alone) was finalized.
    Finalized {
        /// The committed resolution.
        resolution: Resolution,
    },

    /// The proposal's group escalated; the proposal is blocked until the
    /// decision request resolves.
    Escalated {
        /// The outstanding decision request.
        request: RequestId,
    },
}

/// Outcome of applying a human decision.
#[derive(Debug)]
pub enum DecisionApplied {
    /// The decision was committed.
    Finalized(Resolution),

    /// Members returned to the active set and were re-arbitrated.
    Reopened {
        /// Per-proposal outcomes of the re-run.
        outcomes: HashMap<ProposalId, SubmitOutcome>,
    },
}

/// Whether settling a unit of work completed or demands re-detection.
enum Settled {
    Done,
    Restart,
}

/// Per-zone lock registry.
///
/// `acquire` claims every requested zone atomically: a caller waits while
/// any of its zones is held and holds nothing in the meantime, so two
/// callers with overlapping zone sets cannot deadlock.
struct ZoneLockSet {
    held: Mutex<HashSet<ZoneId>>,
    cv: Condvar,
}

impl ZoneLockSet {
    fn new() -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            cv: Condvar::new(),
        }
    }

    fn acquire(&self, zones: &[ZoneId]) -> ZoneLockGuard<'_> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while zones.iter().any(|z| held.contains(z)) {
            held = self
                .cv
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        for zone in zones {
            held.insert(*zone);
        }
        drop(held);
        ZoneLockGuard {
            set: self,
            zones: zones.to_vec(),
        }
    }

    fn held_count(&self) -> usize {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Releases its zones exactly once, on drop.
struct ZoneLockGuard<'a> {
    set: &'a ZoneLockSet,
    zones: Vec<ZoneId>,
}

impl Drop for ZoneLockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .set
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for zone in &self.zones {
            held.remove(zone);
        }
        drop(held);
        self.set.cv.notify_all();
    }
}

/// The conflict detection and resolution engine.
pub struct Arbiter {
    config: ArbiterConfig,
    world: Arc<dyn WorldModel>,
    intake: ProposalIntake,
    detector: ConflictDetector,
    engine: ArbitrationEngine,
    gate: EscalationGate,
    finalizer: ResolutionFinalizer,
    outcomes: Arc<dyn OutcomeSink>,
    locks: ZoneLockSet,
}

impl Arbiter {
    /// Wires an arbiter from its collaborators.
    #[must_use]
    pub fn new(
        config: ArbiterConfig,
        world: Arc<dyn WorldModel>,
        estimator: Arc<dyn Estimator>,
        escalation_sink: Box<dyn EscalationSink>,
        outcome_sink: Arc<dyn OutcomeSink>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let estimator_client = Arc::new(EstimatorClient::new(
            estimator,
            config.estimator_timeout(),
            config.estimator_queue_capacity,
        ));
        let intake = ProposalIntake::new(Arc::clone(&world), config.staleness_bound());
        let detector = ConflictDetector::new(Arc::clone(&world));
        let engine = ArbitrationEngine::new(Arc::clone(&world), estimator_client, config.clone());
        let gate = EscalationGate::new(config.clone(), escalation_sink);
        let finalizer = ResolutionFinalizer::new(
            Arc::clone(&world),
            Arc::clone(&outcome_sink),
            audit,
        );
        Self {
            config,
            world,
            intake,
            detector,
            engine,
            gate,
            finalizer,
            outcomes: outcome_sink,
            locks: ZoneLockSet::new(),
        }
    }

    /// Admits a proposal without arbitrating. Useful when a producer
    /// submits a batch before asking for resolution.
    ///
    /// # Errors
    ///
    /// Intake-time rejections per the error taxonomy.
    pub fn enqueue(&self, proposal: Proposal) -> WardenResult<ProposalId> {
        let accepted = self.intake.accept(proposal, Utc::now())?;
        if let Some(superseded) = accepted.superseded {
            self.notify_superseded(superseded, &accepted.active);
        }
        Ok(accepted.active.proposal.id)
    }

    /// Submits a proposal and runs the pipeline for its zones.
    ///
    /// # Errors
    ///
    /// Intake-time rejections; internal errors when commit retries are
    /// exhausted.
    pub fn submit(&self, proposal: Proposal) -> WardenResult<SubmitOutcome> {
        let accepted = self.intake.accept(proposal, Utc::now())?;
        if let Some(superseded) = accepted.superseded {
            self.notify_superseded(superseded, &accepted.active);
        }
        let id = accepted.active.proposal.id;

        let zones = self.zone_closure(accepted.active.zones.clone());
        let guard = self.locks.acquire(&zones);
        let results = self.cycle_locked(&zones);
        drop(guard);

        results?.remove(&id).ok_or_else(|| {
            WardenError::internal(format!("submission {id} left no outcome"))
        })
    }

    /// Arbitrates everything currently eligible, across all zones with
    /// active proposals.
    ///
    /// # Errors
    ///
    /// Internal errors when commit retries are exhausted.
    pub fn resolve_pending(&self) -> WardenResult<HashMap<ProposalId, SubmitOutcome>> {
        let zones = self.zone_closure(self.intake.active_zones());
        if zones.is_empty() {
            return Ok(HashMap::new());
        }
        let guard = self.locks.acquire(&zones);
        let results = self.cycle_locked(&zones);
        drop(guard);
        results
    }

    /// Applies a human decision to an outstanding decision request.
    ///
    /// # Errors
    ///
    /// - `EscalationError::UnknownRequest` for an unknown or resolved id.
    /// - `EscalationError::UnsafeModification` when a modification violates
    ///   a hard safety constraint; the request stays pending and goes back
    ///   to the reviewer.
    pub fn apply_decision(
        &self,
        request: RequestId,
        decision: Decision,
    ) -> WardenResult<DecisionApplied> {
        let pending = self.gate.take(request).ok_or_else(|| {
            WardenError::Escalation(EscalationError::UnknownRequest {
                id: *request.as_uuid(),
            })
        })?;
        let member_ids: Vec<ProposalId> =
            pending.members.iter().map(|m| m.proposal.id).collect();
        let zones = self.member_zones(&pending.members);
        let guard = self.locks.acquire(&zones);
        let now = Utc::now();

        let applied = match decision {
            Decision::Approve { rationale } => {
                let human = HumanDecisionRecord {
                    action: HumanAction::Approved,
                    rationale,
                    decided_at: now,
                };
                self.commit_decision(
                    &pending,
                    pending.request.recommendation.clone(),
                    &member_ids,
                    human,
                )
            }
            Decision::Modify {
                dispositions,
                rationale,
            } => {
                if let Err(err) = self
                    .engine
                    .validate_human_dispositions(&pending.members, &dispositions)
                {
                    // Invalid alternatives go back to the reviewer; the
                    // request stays outstanding.
                    warn!(request = %request, error = %err, "unsafe modification rejected back to reviewer");
                    self.gate.restore(pending);
                    return Err(err);
                }

                let recommendation = &pending.request.recommendation;
                let mut revised: Vec<ProposalDisposition> = Vec::new();
                for d in &recommendation.dispositions {
                    match dispositions.iter().find(|(id, _)| *id == d.proposal) {
                        Some((_, disposition)) => revised.push(ProposalDisposition {
                            proposal: d.proposal,
                            disposition: disposition.clone(),
                            rule: DecisionRule::HumanDecision,
                            note: "reviewer modification".to_string(),
                        }),
                        None => revised.push(d.clone()),
                    }
                }
                let resolution = recommendation.next_version(
                    revised,
                    format!("{}\n  modified by reviewer", recommendation.rationale),
                );

                let human = HumanDecisionRecord {
                    action: HumanAction::Modified,
                    rationale,
                    decided_at: now,
                };
                // The modification was just validated against the current
                // world, so the commit conditions on a fresh snapshot.
                let snapshot = self.world.snapshot()?;
                let refreshed = PendingDecision {
                    snapshot,
                    ..pending
                };
                self.commit_decision(&refreshed, resolution, &member_ids, human)
            }
            Decision::Reject { .. } => {
                info!(request = %request, "recommendation rejected, members re-queued");
                self.intake.reactivate(&member_ids);
                let outcomes = self.cycle_locked(&zones)?;
                Ok(DecisionApplied::Reopened { outcomes })
            }
        };

        drop(guard);
        applied
    }

    /// Auto-resolves every decision request whose timeout has passed,
    /// using the engine's lowest-risk dispositions, flagged for audit.
    ///
    /// # Errors
    ///
    /// Internal errors when commit retries are exhausted.
    pub fn sweep_decision_timeouts(
        &self,
        now: DateTime<Utc>,
    ) -> WardenResult<Vec<(RequestId, Resolution)>> {
        let mut settled = Vec::new();
        for id in self.gate.expired(now) {
            let Some(pending) = self.gate.take(id) else {
                continue;
            };
            let member_ids: Vec<ProposalId> =
                pending.members.iter().map(|m| m.proposal.id).collect();
            let zones = self.member_zones(&pending.members);
            let guard = self.locks.acquire(&zones);

            let resolution = Self::timeout_resolution(&pending, now);
            warn!(request = %id, "decision request timed out, auto-resolving");

            match self
                .finalizer
                .finalize(&pending.members, &resolution, &pending.snapshot, None)?
            {
                FinalizeOutcome::Committed(_) => {
                    for member_id in &member_ids {
                        self.intake.remove(*member_id);
                    }
                    settled.push((id, resolution));
                }
                FinalizeOutcome::Redetect { zones: stale } => {
                    self.intake.reactivate(&member_ids);
                    let _ = self.cycle_locked(&stale)?;
                }
            }
            drop(guard);
        }
        Ok(settled)
    }

    /// Number of outstanding decision requests.
    #[must_use]
    pub fn pending_decisions(&self) -> usize {
        self.gate.pending_count()
    }

    /// Number of proposals in the active set.
    #[must_use]
    pub fn active_proposals(&self) -> usize {
        self.intake.active_count()
    }

    /// Number of zone locks currently held. Zero when the arbiter is idle.
    #[must_use]
    pub fn held_zone_locks(&self) -> usize {
        self.locks.held_count()
    }

    fn notify_superseded(&self, superseded: ProposalId, successor: &ActiveProposal) {
        self.outcomes.notify(Outcome {
            proposal: superseded,
            producer: successor.proposal.producer,
            disposition: FinalDisposition::Rejected {
                reason: "superseded by a newer proposal for the same intent".to_string(),
            },
            rationale: format!("superseded by {}", successor.proposal.id),
        });
    }

    /// Expands a zone set until it covers every zone reachable through
    /// active proposals, so a cycle never arbitrates a proposal whose
    /// zones it does not hold.
    fn zone_closure(&self, seed: Vec<ZoneId>) -> Vec<ZoneId> {
        let mut zones = seed;
        zones.sort_unstable();
        zones.dedup();
        loop {
            let mut grew = false;
            for active in self.intake.eligible_in_zones(&zones, &[]) {
                for zone in &active.zones {
                    if !zones.contains(zone) {
                        zones.push(*zone);
                        grew = true;
                    }
                }
            }
            if !grew {
                break;
            }
            zones.sort_unstable();
            zones.dedup();
        }
        zones
    }

    fn member_zones(&self, members: &[ActiveProposal]) -> Vec<ZoneId> {
        let mut zones: Vec<ZoneId> = members.iter().flat_map(|m| m.zones.clone()).collect();
        zones.sort_unstable();
        zones.dedup();
        zones
    }

    /// One detection + arbitration pass over the eligible proposals in the
    /// locked zones. Restarts on stale writes, bounded by configuration.
    fn cycle_locked(
        &self,
        zones: &[ZoneId],
    ) -> WardenResult<HashMap<ProposalId, SubmitOutcome>> {
        let mut results = HashMap::new();
        let mut attempts: u32 = 0;

        'outer: loop {
            let eligible: Vec<ActiveProposal> = self
                .intake
                .eligible_in_zones(zones, &[])
                .into_iter()
                .filter(|a| a.zones.iter().all(|z| zones.contains(z)))
                .collect();
            if eligible.is_empty() {
                break;
            }

            let (groups, loose) = self.detector.detect_batch(&eligible)?;

            for active in loose {
                let output = self.engine.arbitrate_single(&active)?;
                match self.settle(None, vec![active], output, &mut results)? {
                    Settled::Done => {}
                    Settled::Restart => {
                        attempts += 1;
                        if attempts > self.config.max_commit_retries {
                            return Err(WardenError::internal(
                                "commit retries exhausted during re-detection",
                            ));
                        }
                        continue 'outer;
                    }
                }
            }

            for group in groups {
                let members = group.members.clone();
                let output = self.engine.arbitrate_group(&group)?;
                match self.settle(Some(group), members, output, &mut results)? {
                    Settled::Done => {}
                    Settled::Restart => {
                        attempts += 1;
                        if attempts > self.config.max_commit_retries {
                            return Err(WardenError::internal(
                                "commit retries exhausted during re-detection",
                            ));
                        }
                        continue 'outer;
                    }
                }
            }

            break;
        }

        Ok(results)
    }

    /// Routes one arbitration output through the gate: auto-finalize or
    /// escalate, blocking only the group's own proposals.
    fn settle(
        &self,
        group: Option<ConflictGroup>,
        members: Vec<ActiveProposal>,
        output: ArbitrationOutput,
        results: &mut HashMap<ProposalId, SubmitOutcome>,
    ) -> WardenResult<Settled> {
        match self.gate.evaluate(&output.resolution, &members) {
            EscalationVerdict::AutoFinalize => {
                match self.finalizer.finalize(
                    &members,
                    &output.resolution,
                    &output.snapshot,
                    None,
                )? {
                    FinalizeOutcome::Committed(_) => {
                        for member in &members {
                            self.intake.remove(member.proposal.id);
                            results.insert(
                                member.proposal.id,
                                SubmitOutcome::Finalized {
                                    resolution: output.resolution.clone(),
                                },
                            );
                        }
                        Ok(Settled::Done)
                    }
                    FinalizeOutcome::Redetect { .. } => Ok(Settled::Restart),
                }
            }
            EscalationVerdict::Escalate(reasons) => {
                let group = group.unwrap_or_else(|| {
                    let kind = if output.resolution.has_infeasible() {
                        ConflictKind::SafetyViolation
                    } else {
                        ConflictKind::ResourceContention
                    };
                    ConflictGroup::single(members[0].clone(), kind)
                });
                let mut resolution = output.resolution;
                resolution.group = Some(group.id);
                let impact = self.impact_for(&group, &resolution)?;
                let request = self.gate.escalate(
                    &group,
                    members.clone(),
                    resolution,
                    reasons,
                    impact,
                    output.snapshot,
                    Utc::now(),
                );

                let ids: Vec<ProposalId> = members.iter().map(|m| m.proposal.id).collect();
                self.intake.mark_blocked(&ids);
                for id in ids {
                    results.insert(id, SubmitOutcome::Escalated { request });
                }
                Ok(Settled::Done)
            }
        }
    }

    /// Which downstream commitments the recommendation protects/affects.
    fn impact_for(
        &self,
        group: &ConflictGroup,
        resolution: &Resolution,
    ) -> WardenResult<ImpactPreview> {
        let mut committed = 0;
        for zone in &group.zones {
            committed += self.world.committed_claims(*zone, &group.window)?.len();
        }

        let mut protected = Vec::new();
        let mut displaced = Vec::new();
        let mut total_delay = 0;
        for member in &group.members {
            let Some(d) = resolution.disposition_for(member.proposal.id) else {
                continue;
            };
            match &d.disposition {
                Disposition::Approve => protected.push(member.proposal.id),
                Disposition::Reschedule { window } => {
                    protected.push(member.proposal.id);
                    total_delay += member.proposal.window.delay_until(window).max(0);
                }
                Disposition::Reject { .. } | Disposition::Infeasible { .. } => {
                    displaced.push(member.proposal.id);
                }
            }
        }

        Ok(ImpactPreview {
            committed_claims_in_window: committed,
            protected_proposals: protected,
            displaced_proposals: displaced,
            total_delay_minutes: total_delay,
        })
    }

    fn commit_decision(
        &self,
        pending: &PendingDecision,
        resolution: Resolution,
        member_ids: &[ProposalId],
        human: HumanDecisionRecord,
    ) -> WardenResult<DecisionApplied> {
        match self.finalizer.finalize(
            &pending.members,
            &resolution,
            &pending.snapshot,
            Some(human),
        )? {
            FinalizeOutcome::Committed(_) => {
                for id in member_ids {
                    self.intake.remove(*id);
                }
                Ok(DecisionApplied::Finalized(resolution))
            }
            FinalizeOutcome::Redetect { zones } => {
                // A racing update invalidated the decision's snapshot:
                // re-run detection instead of reporting a false success.
                self.intake.reactivate(member_ids);
                let outcomes = self.cycle_locked(&zones)?;
                Ok(DecisionApplied::Reopened { outcomes })
            }
        }
    }

    /// The engine's lowest-risk disposition set for a timed-out request:
    /// reschedules stand, infeasible members are rejected, and approvals
    /// are downgraded whenever the recommendation carried an infeasible
    /// member. A timeout never widens the approved set.
    fn timeout_resolution(pending: &PendingDecision, now: DateTime<Utc>) -> Resolution {
        let recommendation = &pending.request.recommendation;
        let has_infeasible = recommendation.has_infeasible();

        let dispositions = recommendation
            .dispositions
            .iter()
            .map(|d| match &d.disposition {
                Disposition::Infeasible { reason } => ProposalDisposition {
                    proposal: d.proposal,
                    disposition: Disposition::Reject {
                        reason: format!("decision timeout: {reason}"),
                    },
                    rule: DecisionRule::DecisionTimeout,
                    note: "auto-resolved after decision timeout".to_string(),
                },
                Disposition::Approve if has_infeasible => ProposalDisposition {
                    proposal: d.proposal,
                    disposition: Disposition::Reject {
                        reason: "decision timeout: conservative downgrade of approval"
                            .to_string(),
                    },
                    rule: DecisionRule::DecisionTimeout,
                    note: "auto-resolved after decision timeout".to_string(),
                },
                _ => d.clone(),
            })
            .collect();

        Resolution {
            id: ResolutionId::new(),
            group: recommendation.group,
            version: recommendation.version + 1,
            dispositions,
            rationale: format!(
                "{}\n  auto-resolved after decision timeout",
                recommendation.rationale
            ),
            confidence: recommendation.confidence,
            safety_risk: recommendation.safety_risk,
            deadline_risk: recommendation.deadline_risk,
            degraded_estimate: recommendation.degraded_estimate,
            auto_timeout: true,
            decided_at: now,
        }
    }
}
