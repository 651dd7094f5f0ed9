//! Resolution finalizer: commit, notify, audit.
//!
//! No disposition is reported final to a producer before the world-model
//! commit succeeds. A stale write surfaces as a re-detection signal rather
//! than a producer-visible failure.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{AuditDraft, AuditRecord, AuditSink, HumanDecisionRecord};
use crate::error::{WardenResult, WorldError};
use crate::intake::ActiveProposal;
use crate::proposal::{ProducerId, ProposalId};
use crate::resolution::{Disposition, Resolution};
use crate::resource::ZoneId;
use crate::time::TimeWindow;
use crate::world::{Claim, Snapshot, WorldModel};

/// The terminal disposition reported to a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum FinalDisposition {
    /// Proceed in the requested window.
    Approved,

    /// Proceed in the assigned window.
    Rescheduled {
        /// The assigned window.
        window: TimeWindow,
    },

    /// Do not proceed.
    Rejected {
        /// Why.
        reason: String,
    },
}

/// Asynchronous outcome notification to a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// The proposal this outcome concerns.
    pub proposal: ProposalId,

    /// The producer to notify.
    pub producer: ProducerId,

    /// The terminal disposition.
    pub disposition: FinalDisposition,

    /// Human-readable rationale.
    pub rationale: String,
}

/// Receives producer outcome notifications.
pub trait OutcomeSink: Send + Sync {
    /// Delivers one outcome. Must not block finalization.
    fn notify(&self, outcome: Outcome);
}

/// Channel-backed outcome sink.
#[derive(Debug, Clone)]
pub struct ChannelOutcomeSink {
    tx: Sender<Outcome>,
}

impl ChannelOutcomeSink {
    /// Creates a sink and the receiver end for producers.
    #[must_use]
    pub fn new() -> (Self, Receiver<Outcome>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl OutcomeSink for ChannelOutcomeSink {
    fn notify(&self, outcome: Outcome) {
        let _ = self.tx.send(outcome);
    }
}

/// An outcome sink that drops notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOutcomeSink;

impl OutcomeSink for NullOutcomeSink {
    fn notify(&self, _outcome: Outcome) {}
}

/// Result of a finalization attempt.
#[derive(Debug)]
pub enum FinalizeOutcome {
    /// Claims committed, producers notified, audit written.
    Committed(AuditRecord),

    /// A racing update invalidated the snapshot; the caller must re-run
    /// detection for these zones.
    Redetect {
        /// Zones whose state moved under us.
        zones: Vec<ZoneId>,
    },
}

/// Commits resolved dispositions and emits outcomes and audit records.
pub struct ResolutionFinalizer {
    world: Arc<dyn WorldModel>,
    outcomes: Arc<dyn OutcomeSink>,
    audit: Arc<dyn AuditSink>,
}

impl ResolutionFinalizer {
    /// Creates a finalizer.
    #[must_use]
    pub fn new(
        world: Arc<dyn WorldModel>,
        outcomes: Arc<dyn OutcomeSink>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            world,
            outcomes,
            audit,
        }
    }

    /// Builds the claims a resolution commits: approved members claim their
    /// requested window, rescheduled members the assigned one.
    fn claims_for(members: &[ActiveProposal], resolution: &Resolution) -> Vec<Claim> {
        let mut claims = Vec::new();
        for member in members {
            let Some(d) = resolution.disposition_for(member.proposal.id) else {
                continue;
            };
            let window = match &d.disposition {
                Disposition::Approve => member.proposal.window,
                Disposition::Reschedule { window } => *window,
                Disposition::Reject { .. } | Disposition::Infeasible { .. } => continue,
            };
            for claim in &member.proposal.claims {
                claims.push(Claim::proposed(
                    member.proposal.id,
                    claim.resource,
                    claim.kind.clone(),
                    window,
                    claim.load_kg,
                ));
            }
        }
        claims
    }

    /// Commits a resolution, then notifies producers and appends the audit
    /// record.
    ///
    /// # Errors
    ///
    /// Propagates non-retryable world errors. `StaleWrite` is not an error
    /// here: it returns [`FinalizeOutcome::Redetect`].
    pub fn finalize(
        &self,
        members: &[ActiveProposal],
        resolution: &Resolution,
        snapshot: &Snapshot,
        human: Option<HumanDecisionRecord>,
    ) -> WardenResult<FinalizeOutcome> {
        let claims = Self::claims_for(members, resolution);

        if !claims.is_empty() {
            match self.world.commit(claims, snapshot) {
                Ok(_) => {}
                Err(WorldError::StaleWrite { zone, .. }) => {
                    let mut zones: Vec<ZoneId> =
                        members.iter().flat_map(|m| m.zones.clone()).collect();
                    zones.push(zone);
                    zones.sort_unstable();
                    zones.dedup();
                    warn!(resolution = %resolution.id, "stale write on commit, re-running detection");
                    return Ok(FinalizeOutcome::Redetect { zones });
                }
                Err(err) => return Err(err.into()),
            }
        }

        // Commit succeeded: outcomes may now be reported as final.
        for member in members {
            let Some(d) = resolution.disposition_for(member.proposal.id) else {
                continue;
            };
            let disposition = match &d.disposition {
                Disposition::Approve => FinalDisposition::Approved,
                Disposition::Reschedule { window } => {
                    FinalDisposition::Rescheduled { window: *window }
                }
                Disposition::Reject { reason } => FinalDisposition::Rejected {
                    reason: reason.clone(),
                },
                Disposition::Infeasible { reason } => FinalDisposition::Rejected {
                    reason: reason.clone(),
                },
            };
            self.outcomes.notify(Outcome {
                proposal: member.proposal.id,
                producer: member.proposal.producer,
                disposition,
                rationale: format!("{} [{}]", d.note, d.rule),
            });
        }

        let record = self.audit.append(AuditDraft {
            resolution: resolution.id,
            group: resolution.group,
            version: resolution.version,
            proposals: members.iter().map(|m| m.proposal.id).collect(),
            dispositions: resolution.dispositions.clone(),
            rationale: resolution.rationale.clone(),
            confidence: resolution.confidence,
            degraded_estimate: resolution.degraded_estimate,
            auto_timeout: resolution.auto_timeout,
            human,
        })?;

        info!(
            resolution = %resolution.id,
            audit_seq = record.sequence,
            "resolution finalized"
        );
        Ok(FinalizeOutcome::Committed(record))
    }
}
