//! Bounded worker-pool runtime for concurrent submissions.
//!
//! Proposals arrive concurrently from an unbounded number of producers.
//! The pool gives them a bounded queue and a fixed set of workers; the
//! per-zone locks inside the arbiter keep groups over disjoint zones fully
//! parallel while serializing work within a zone.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::arbiter::{Arbiter, SubmitOutcome};
use crate::error::{RuntimeError, WardenError, WardenResult};
use crate::proposal::Proposal;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct ArbiterRuntimeConfig {
    /// Number of submission workers.
    pub workers: usize,

    /// Maximum queued submissions before callers see backpressure.
    pub queue_capacity: usize,
}

impl Default for ArbiterRuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

struct Job {
    proposal: Proposal,
    reply: Sender<WardenResult<SubmitOutcome>>,
}

/// Handle returned by [`ArbiterRuntime::submit_async`].
pub struct SubmissionHandle {
    rx: Receiver<WardenResult<SubmitOutcome>>,
}

impl SubmissionHandle {
    /// Waits for the submission to resolve.
    ///
    /// # Errors
    ///
    /// `RuntimeError::Disconnected` if the worker died before replying.
    pub fn join(self) -> WardenResult<SubmitOutcome> {
        self.rx
            .recv()
            .map_err(|_| WardenError::Runtime(RuntimeError::Disconnected))?
    }

    /// Waits for the submission to resolve, with a timeout.
    ///
    /// # Errors
    ///
    /// `RuntimeError::Timeout` when the deadline passes first.
    pub fn join_timeout(self, timeout: Duration) -> WardenResult<SubmitOutcome> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            crossbeam_channel::RecvTimeoutError::Timeout => {
                WardenError::Runtime(RuntimeError::Timeout {
                    duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
                })
            }
            crossbeam_channel::RecvTimeoutError::Disconnected => {
                WardenError::Runtime(RuntimeError::Disconnected)
            }
        })?
    }
}

/// Worker-pool runtime over an [`Arbiter`].
pub struct ArbiterRuntime {
    arbiter: Arc<Arbiter>,
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl ArbiterRuntime {
    /// Starts the worker pool.
    #[must_use]
    pub fn new(arbiter: Arc<Arbiter>, config: ArbiterRuntimeConfig) -> Self {
        let workers = config.workers.max(1);
        let queue_capacity = config.queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let arbiter = Arc::clone(&arbiter);
            let handle = thread::Builder::new()
                .name(format!("warden-submit-{idx}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        let result = arbiter.submit(job.proposal);
                        let _ = job.reply.send(result);
                    }
                })
                .expect("failed to spawn warden submission worker");
            handles.push(handle);
        }

        Self {
            arbiter,
            tx: Some(tx),
            workers: handles,
            queue_capacity,
        }
    }

    /// Enqueues a submission without waiting for its outcome.
    ///
    /// # Errors
    ///
    /// `RuntimeError::QueueFull` under backpressure, `Disconnected` after
    /// shutdown.
    pub fn submit_async(&self, proposal: Proposal) -> WardenResult<SubmissionHandle> {
        let tx = self
            .tx
            .as_ref()
            .ok_or(WardenError::Runtime(RuntimeError::Disconnected))?;
        let (reply, rx) = bounded(1);
        match tx.try_send(Job { proposal, reply }) {
            Ok(()) => Ok(SubmissionHandle { rx }),
            Err(TrySendError::Full(_)) => Err(WardenError::Runtime(RuntimeError::QueueFull {
                capacity: self.queue_capacity,
            })),
            Err(TrySendError::Disconnected(_)) => {
                Err(WardenError::Runtime(RuntimeError::Disconnected))
            }
        }
    }

    /// Submits and waits for the outcome.
    ///
    /// # Errors
    ///
    /// Backpressure and intake-time errors per the taxonomy.
    pub fn submit(&self, proposal: Proposal) -> WardenResult<SubmitOutcome> {
        self.submit_async(proposal)?.join()
    }

    /// Returns a shared reference to the underlying arbiter.
    #[must_use]
    pub fn arbiter(&self) -> &Arc<Arbiter> {
        &self.arbiter
    }
}

impl Drop for ArbiterRuntime {
    fn drop(&mut self) {
        // Close the channel: workers drain queued jobs then exit.
        drop(self.tx.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::config::ArbiterConfig;
    use crate::escalation::NullEscalationSink;
    use crate::estimator::FixedEstimator;
    use crate::finalizer::NullOutcomeSink;
    use crate::proposal::{ProducerId, ResourceClaim};
    use crate::resource::{Resource, ResourceKind, Zone};
    use crate::time::TimeWindow;
    use crate::world::{InMemoryWorld, WorldModel};
    use chrono::{Duration as ChronoDuration, Utc};

    fn runtime() -> (ArbiterRuntime, Arc<InMemoryWorld>, Vec<Resource>) {
        let world = Arc::new(InMemoryWorld::new());
        let mut resources = Vec::new();
        for name in ["a", "b", "c", "d"] {
            let zone = Zone::new(format!("zone-{name}"));
            world.add_zone(zone.clone()).unwrap();
            let resource =
                Resource::new(format!("resource-{name}"), ResourceKind::Segment, zone.id);
            world.add_resource(resource.clone()).unwrap();
            resources.push(resource);
        }
        let arbiter = Arc::new(Arbiter::new(
            ArbiterConfig::default(),
            Arc::clone(&world) as Arc<dyn WorldModel>,
            Arc::new(FixedEstimator::default()),
            Box::new(NullEscalationSink),
            Arc::new(NullOutcomeSink),
            Arc::new(InMemoryAuditLog::new()),
        ));
        let runtime = ArbiterRuntime::new(arbiter, ArbiterRuntimeConfig::default());
        (runtime, world, resources)
    }

    fn proposal(world: &InMemoryWorld, resource: &Resource) -> Proposal {
        let now = Utc::now();
        Proposal::builder()
            .producer(ProducerId::new(), "test")
            .claim(ResourceClaim::exclusive(resource.id))
            .window(
                TimeWindow::new(
                    now + ChronoDuration::minutes(5),
                    now + ChronoDuration::minutes(20),
                )
                .unwrap(),
            )
            .priority(5)
            .risk(0.1)
            .uncertainty(0.1)
            .rationale("runtime test")
            .snapshot(world.snapshot().unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn disjoint_zones_resolve_in_parallel() {
        let (runtime, world, resources) = runtime();
        let handles: Vec<SubmissionHandle> = resources
            .iter()
            .map(|r| runtime.submit_async(proposal(&world, r)).unwrap())
            .collect();

        for handle in handles {
            let outcome = handle.join_timeout(Duration::from_secs(5)).unwrap();
            assert!(matches!(outcome, SubmitOutcome::Finalized { .. }));
        }
        assert_eq!(runtime.arbiter().held_zone_locks(), 0);
        assert_eq!(world.committed_claim_count().unwrap(), 4);
    }

    #[test]
    fn join_reports_disconnected_when_reply_sender_dropped() {
        let (_tx, rx) = bounded::<WardenResult<SubmitOutcome>>(1);
        drop(_tx);
        let handle = SubmissionHandle { rx };
        let err = handle.join().unwrap_err();
        assert!(matches!(
            err,
            WardenError::Runtime(RuntimeError::Disconnected)
        ));
    }

    #[test]
    fn drop_joins_workers() {
        let (runtime, _world, _resources) = runtime();
        drop(runtime);
    }
}
