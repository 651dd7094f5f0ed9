//! Property tests for the arbiter's core invariants: the committed
//! schedule never violates exclusivity, and priority is monotone within a
//! contention batch.

use std::sync::Arc;

use chrono::{Duration, Utc};
use proptest::prelude::*;

use warden::{
    Arbiter, ArbiterConfig, FixedEstimator, InMemoryAuditLog, InMemoryWorld, NullEscalationSink,
    NullOutcomeSink, Proposal, ProposalId, ProducerId, Resource, ResourceClaim, ResourceKind,
    SubmitOutcome, TimeWindow, WorldModel, Zone,
};

/// One generated proposal: (resource index, priority, start slot, duration
/// slots). Slots are 15-minute ticks on a coarse grid.
type Case = (usize, u8, i64, i64);

fn cases(resources: usize, len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<Case>> {
    prop::collection::vec(
        (0..resources, 1u8..=10, 0i64..8, 1i64..4),
        len,
    )
}

/// A config that never escalates, so every generated batch commits and the
/// committed schedule can be checked.
fn always_finalize_config() -> ArbiterConfig {
    ArbiterConfig {
        confidence_threshold: 0.0,
        risk_threshold: 1.0,
        complexity_threshold: 1000,
        ..ArbiterConfig::default()
    }
}

struct World {
    arbiter: Arbiter,
    world: Arc<InMemoryWorld>,
    zone: Zone,
    resources: Vec<Resource>,
}

fn world(resource_count: usize) -> World {
    let world = Arc::new(InMemoryWorld::new());
    let zone = Zone::new("zone");
    world.add_zone(zone.clone()).unwrap();
    let mut resources = Vec::new();
    for i in 0..resource_count {
        let resource = Resource::new(format!("r{i}"), ResourceKind::Segment, zone.id);
        world.add_resource(resource.clone()).unwrap();
        resources.push(resource);
    }
    let arbiter = Arbiter::new(
        always_finalize_config(),
        Arc::clone(&world) as Arc<dyn WorldModel>,
        Arc::new(FixedEstimator::default()),
        Box::new(NullEscalationSink),
        Arc::new(NullOutcomeSink),
        Arc::new(InMemoryAuditLog::new()),
    );
    World {
        arbiter,
        world,
        zone,
        resources,
    }
}

fn build(w: &World, case: Case) -> Proposal {
    let (resource_idx, priority, start_slot, duration_slots) = case;
    let base = Utc::now() + Duration::minutes(30);
    let start = base + Duration::minutes(start_slot * 15);
    Proposal::builder()
        .producer(ProducerId::new(), "generated")
        .claim(ResourceClaim::exclusive(w.resources[resource_idx].id))
        .window(TimeWindow::new(start, start + Duration::minutes(duration_slots * 15)).unwrap())
        .priority(priority)
        .risk(0.1)
        .uncertainty(0.1)
        .rationale("generated proposal")
        .snapshot(w.world.snapshot().unwrap())
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Safety invariant: no two committed claims on the same exclusive
    /// resource overlap in time, including claims committed across
    /// separate resolution cycles.
    #[test]
    fn committed_schedule_never_overlaps(first in cases(2, 2..6), second in cases(2, 1..4)) {
        let w = world(2);
        for case in first {
            w.arbiter.enqueue(build(&w, case)).unwrap();
        }
        w.arbiter.resolve_pending().unwrap();
        for case in second {
            w.arbiter.enqueue(build(&w, case)).unwrap();
        }
        w.arbiter.resolve_pending().unwrap();

        let horizon = TimeWindow::new(Utc::now(), Utc::now() + Duration::days(2)).unwrap();
        let claims = w.world.committed_claims(w.zone.id, &horizon).unwrap();
        for (i, a) in claims.iter().enumerate() {
            for b in &claims[i + 1..] {
                if a.resource == b.resource {
                    prop_assert!(
                        !a.window.overlaps(&b.window),
                        "claims {} and {} overlap on resource {}",
                        a.proposal,
                        b.proposal,
                        a.resource
                    );
                }
            }
        }
        prop_assert_eq!(w.arbiter.held_zone_locks(), 0);
    }

    /// Priority monotonicity: within one contention batch on a single
    /// resource, a strictly higher-priority proposal never receives a
    /// worse disposition (reject < reschedule < approve) than a
    /// lower-priority one in the same group.
    #[test]
    fn priority_never_loses_to_lower(batch in cases(1, 2..6)) {
        let w = world(1);
        let mut priorities: Vec<(ProposalId, u8)> = Vec::new();
        for case in batch {
            let priority = case.1;
            let id = w.arbiter.enqueue(build(&w, case)).unwrap();
            priorities.push((id, priority));
        }
        let outcomes = w.arbiter.resolve_pending().unwrap();

        for (id, _) in &priorities {
            let SubmitOutcome::Finalized { resolution } = &outcomes[id] else {
                prop_assert!(false, "unexpected escalation with always-finalize config");
                return Ok(());
            };
            // Compare members of the same resolution only.
            for a in &resolution.dispositions {
                for b in &resolution.dispositions {
                    let pa = priorities.iter().find(|(pid, _)| *pid == a.proposal);
                    let pb = priorities.iter().find(|(pid, _)| *pid == b.proposal);
                    if let (Some((_, pa)), Some((_, pb))) = (pa, pb) {
                        if pa > pb {
                            prop_assert!(
                                a.disposition.rank() >= b.disposition.rank(),
                                "priority {} got {:?} while priority {} got {:?}",
                                pa,
                                a.disposition,
                                pb,
                                b.disposition
                            );
                        }
                    }
                }
            }
        }

        prop_assert_eq!(w.arbiter.held_zone_locks(), 0);
    }

    /// Every proposal in a finalized batch receives exactly one
    /// disposition, and rescheduled windows preserve the requested
    /// duration.
    #[test]
    fn dispositions_are_complete_and_duration_preserving(batch in cases(2, 2..6)) {
        let w = world(2);
        let mut submitted: Vec<(ProposalId, Duration)> = Vec::new();
        for case in batch {
            let duration = Duration::minutes(case.3 * 15);
            let id = w.arbiter.enqueue(build(&w, case)).unwrap();
            submitted.push((id, duration));
        }
        let outcomes = w.arbiter.resolve_pending().unwrap();

        for (id, duration) in &submitted {
            let SubmitOutcome::Finalized { resolution } = &outcomes[id] else {
                prop_assert!(false, "unexpected escalation with always-finalize config");
                return Ok(());
            };
            let dispositions: Vec<_> = resolution
                .dispositions
                .iter()
                .filter(|d| d.proposal == *id)
                .collect();
            prop_assert_eq!(dispositions.len(), 1);
            if let warden::Disposition::Reschedule { window } = &dispositions[0].disposition {
                prop_assert_eq!(window.duration(), *duration);
            }
        }
    }
}
