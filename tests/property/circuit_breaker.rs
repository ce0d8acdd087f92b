// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for the Deployment Circuit Breaker
//!
//! A rolling deployment must never serve fewer tasks than were healthy
//! before it started, and must roll back exactly when failed launches reach
//! the threshold.

use proptest::prelude::*;

use webhook_topology::state_machine::deployment::{
    failure_threshold, Deployment, DeploymentEvent, DeploymentOutcome, DeploymentPhase,
    MAX_FAILURE_THRESHOLD, MIN_FAILURE_THRESHOLD,
};
use webhook_topology::state_machine::{StateInvariant, StateMachine};

fn event() -> impl Strategy<Value = DeploymentEvent> {
    prop_oneof![Just(DeploymentEvent::TaskHealthy), Just(DeploymentEvent::TaskFailed)]
}

proptest! {
    #[test]
    fn prop_threshold_bounded(desired in 0u32..10_000) {
        let threshold = failure_threshold(desired);
        prop_assert!(threshold >= MIN_FAILURE_THRESHOLD);
        prop_assert!(threshold <= MAX_FAILURE_THRESHOLD);
        prop_assert!(threshold >= desired.div_ceil(2).min(MAX_FAILURE_THRESHOLD));
    }

    /// Capacity never drops below the previous revision while rolling out
    #[test]
    fn prop_capacity_preserved(
        previous in 0u32..20,
        desired in 1u32..20,
        events in prop::collection::vec(event(), 0..60),
    ) {
        let (mut deployment, _) = Deployment::new(previous, desired)
            .transition(&DeploymentEvent::Start)
            .unwrap();

        for event in events {
            if deployment.is_terminal() {
                break;
            }
            let (next, _) = deployment.transition(&event).unwrap();
            deployment = next;
            prop_assert!(deployment.check_invariants().is_ok(), "{:?}", deployment);
            if !deployment.is_terminal() {
                prop_assert!(deployment.serving() >= previous);
            }
            if deployment.phase == DeploymentPhase::RolledBack {
                prop_assert_eq!(deployment.serving(), previous);
            }
        }
    }

    /// The breaker trips exactly at the threshold
    #[test]
    fn prop_rollback_exactly_at_threshold(
        previous in 0u32..10,
        desired in 1u32..10,
        failures in 0u32..10,
    ) {
        let mut events = vec![DeploymentEvent::Start];
        events.extend(std::iter::repeat(DeploymentEvent::TaskFailed).take(failures as usize));
        events.extend(std::iter::repeat(DeploymentEvent::TaskHealthy).take(desired as usize));

        let (deployment, outcome) = Deployment::new(previous, desired).run(events).unwrap();

        if failures >= failure_threshold(desired) {
            prop_assert_eq!(deployment.phase, DeploymentPhase::RolledBack);
            prop_assert_eq!(
                outcome,
                Some(DeploymentOutcome::RolledBack {
                    failures: failure_threshold(desired),
                    serving: previous,
                })
            );
        } else {
            prop_assert_eq!(deployment.phase, DeploymentPhase::Steady);
            prop_assert_eq!(outcome, Some(DeploymentOutcome::Completed { running: desired }));
        }
    }
}
