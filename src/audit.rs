//! Append-only audit log of finalized resolutions.
//!
//! Each record carries the blake3 digest of its predecessor, so a decision
//! trace can be reconstructed and tampering detected. Records hold enough
//! to replay a decision: inputs, the rule path, the outcome, and the human
//! decision if one was made.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{WardenError, WardenResult};
use crate::group::GroupId;
use crate::proposal::ProposalId;
use crate::resolution::{ProposalDisposition, ResolutionId};

/// The kind of human decision recorded, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanAction {
    /// The recommendation was approved as-is.
    Approved,
    /// The dispositions were modified and re-validated.
    Modified,
    /// The recommendation was rejected; members were re-queued.
    Rejected,
}

/// A human decision attached to an audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanDecisionRecord {
    /// What the reviewer did.
    pub action: HumanAction,

    /// Optional reviewer rationale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,

    /// When the decision arrived.
    pub decided_at: DateTime<Utc>,
}

/// The unsealed content of one audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditDraft {
    /// The finalized resolution.
    pub resolution: ResolutionId,

    /// The conflict group, or `None` for a direct approval.
    pub group: Option<GroupId>,

    /// Resolution version that was committed.
    pub version: u32,

    /// Member proposals.
    pub proposals: Vec<ProposalId>,

    /// Disposition and deciding rule per proposal.
    pub dispositions: Vec<ProposalDisposition>,

    /// The engine's rationale.
    pub rationale: String,

    /// Confidence at decision time.
    pub confidence: f32,

    /// Whether a degraded estimator score was used.
    pub degraded_estimate: bool,

    /// True when a decision-request timeout auto-resolved the group.
    /// Distinguishably logged so these can be audited separately.
    pub auto_timeout: bool,

    /// The human decision, if the resolution went through review.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human: Option<HumanDecisionRecord>,
}

/// A sealed, chain-linked audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the log, starting at 0.
    pub sequence: u64,

    /// The record content.
    #[serde(flatten)]
    pub draft: AuditDraft,

    /// When the record was appended.
    pub recorded_at: DateTime<Utc>,

    /// Hex digest of the previous record ("genesis" for the first).
    pub prev_digest: String,

    /// Hex blake3 digest of this record's content and predecessor.
    pub digest: String,
}

impl AuditRecord {
    fn seal(
        sequence: u64,
        draft: AuditDraft,
        recorded_at: DateTime<Utc>,
        prev_digest: String,
    ) -> WardenResult<Self> {
        let payload = serde_json::to_vec(&draft)
            .map_err(|e| WardenError::internal(format!("audit serialization failed: {e}")))?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(prev_digest.as_bytes());
        hasher.update(&sequence.to_le_bytes());
        hasher.update(&payload);
        let digest = hasher.finalize().to_hex().to_string();
        Ok(Self {
            sequence,
            draft,
            recorded_at,
            prev_digest,
            digest,
        })
    }

    /// Recomputes this record's digest from its content and predecessor.
    #[must_use]
    pub fn digest_valid(&self) -> bool {
        Self::seal(
            self.sequence,
            self.draft.clone(),
            self.recorded_at,
            self.prev_digest.clone(),
        )
        .map(|sealed| sealed.digest == self.digest)
        .unwrap_or(false)
    }
}

/// Append-only sink for audit records.
pub trait AuditSink: Send + Sync {
    /// Seals and appends a record, returning the sealed form.
    ///
    /// # Errors
    ///
    /// Returns an error when the record cannot be serialized or stored.
    fn append(&self, draft: AuditDraft) -> WardenResult<AuditRecord>;
}

/// In-memory, hash-chained audit log.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clones the full log.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Verifies every digest and chain link.
    #[must_use]
    pub fn verify_chain(&self) -> bool {
        let Ok(records) = self.records.lock() else {
            return false;
        };
        let mut prev = "genesis".to_string();
        for (idx, record) in records.iter().enumerate() {
            if record.sequence != idx as u64
                || record.prev_digest != prev
                || !record.digest_valid()
            {
                return false;
            }
            prev = record.digest.clone();
        }
        true
    }
}

impl AuditSink for InMemoryAuditLog {
    fn append(&self, draft: AuditDraft) -> WardenResult<AuditRecord> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| WardenError::internal("poisoned audit lock"))?;
        let prev_digest = records
            .last()
            .map_or_else(|| "genesis".to_string(), |r| r.digest.clone());
        let record = AuditRecord::seal(
            records.len() as u64,
            draft,
            Utc::now(),
            prev_digest,
        )?;
        records.push(record.clone());
        Ok(record)
    }
}
