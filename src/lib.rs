//! # Warden - Conflict Detection and Resolution Engine
//!
//! Warden receives concurrent resource-usage proposals from many
//! independent producers, detects when proposals cannot physically or
//! safely coexist, computes a resolution that satisfies safety and
//! priority rules, and optionally defers ambiguous cases to an external
//! decision-maker before finalizing.
//!
//! ## Core Concepts
//!
//! - **Proposal**: a producer's requested claim on resources for a window
//! - **Zone**: the grouping entity that scopes detection and locking
//! - **ConflictGroup**: a maximal set of jointly infeasible proposals
//! - **Resolution**: per-proposal dispositions with rule-attributed rationale
//! - **DecisionRequest**: the human-review path for ambiguous resolutions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use warden::{
//!     Arbiter, ArbiterConfig, ChannelEscalationSink, ChannelOutcomeSink,
//!     FixedEstimator, InMemoryAuditLog, InMemoryWorld, Proposal,
//!     ResourceClaim, TimeWindow,
//! };
//!
//! let world = Arc::new(InMemoryWorld::new());
//! let (escalations, review_rx) = ChannelEscalationSink::new();
//! let (outcomes, outcome_rx) = ChannelOutcomeSink::new();
//! let arbiter = Arbiter::new(
//!     ArbiterConfig::default(),
//!     world,
//!     Arc::new(FixedEstimator::default()),
//!     Box::new(escalations),
//!     Arc::new(outcomes),
//!     Arc::new(InMemoryAuditLog::new()),
//! );
//!
//! let outcome = arbiter.submit(proposal)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

// Core types
pub mod config;
pub mod constraint;
pub mod error;
pub mod group;
pub mod proposal;
pub mod resolution;
pub mod resource;
pub mod time;

// Interfaces to external collaborators
pub mod estimator;
pub mod world;

// The pipeline
pub mod arbiter;
pub mod arbitration;
pub mod audit;
pub mod detector;
pub mod escalation;
pub mod finalizer;
pub mod intake;
pub mod runtime;

// Re-export primary types at crate root for convenience
pub use arbiter::{Arbiter, DecisionApplied, SubmitOutcome};
pub use arbitration::{ArbitrationEngine, ArbitrationOutput};
pub use audit::{AuditDraft, AuditRecord, AuditSink, HumanAction, HumanDecisionRecord, InMemoryAuditLog};
pub use config::ArbiterConfig;
pub use constraint::{ConstraintFact, ConstraintId, ConstraintRule, ConstraintScope, Severity};
pub use detector::ConflictDetector;
pub use error::{
    EscalationError, EstimatorError, IntakeError, RuntimeError, ValidationError, WardenError,
    WardenResult, WorldError,
};
pub use escalation::{
    ChannelEscalationSink, Decision, DecisionRequest, EscalationGate, EscalationReason,
    EscalationSink, EscalationVerdict, ImpactPreview, NullEscalationSink, ProposalSummary,
    RequestId,
};
pub use estimator::{Estimate, Estimator, EstimatorClient, FixedEstimator, GroupEstimateRequest};
pub use finalizer::{
    ChannelOutcomeSink, FinalDisposition, FinalizeOutcome, NullOutcomeSink, Outcome, OutcomeSink,
    ResolutionFinalizer,
};
pub use group::{ConflictGroup, ConflictKind, GroupId};
pub use intake::{ActiveProposal, IntakeAccepted, ProposalIntake};
pub use proposal::{Proposal, ProposalBuilder, ProposalId, ProducerId, ResourceClaim};
pub use resolution::{
    DecisionRule, Disposition, ProposalDisposition, Resolution, ResolutionId,
};
pub use resource::{ClaimKind, Resource, ResourceId, ResourceKind, Zone, ZoneId};
pub use runtime::{ArbiterRuntime, ArbiterRuntimeConfig, SubmissionHandle};
pub use time::TimeWindow;
pub use world::{Claim, ClaimState, InMemoryWorld, Snapshot, WorldModel};
