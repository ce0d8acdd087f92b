// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for Convergence
//!
//! Whatever parameter change is applied, the environment ends converged:
//! a follow-up plan is empty and a follow-up apply makes no provider
//! mutation.

use proptest::prelude::*;

use crate::fixtures::{self, Harness};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_apply_converges(
        desired_count in 1u32..=4,
        next_count in 1u32..=4,
        tag in "v[0-9]{1,3}",
    ) {
        let harness = Harness::new();
        let mut params = fixtures::dev();
        params.compute.desired_count = desired_count;
        let first = fixtures::composed(&params);

        params.compute.desired_count = next_count;
        params.compute.image_tag = tag;
        let second = fixtures::composed(&params);

        tokio_test::block_on(async {
            let report = harness.evaluator.apply(&first).await.unwrap();
            prop_assert!(report.is_success(), "{:?}", report.failed);
            prop_assert_eq!(harness.provider.running_tasks(&fixtures::service()).await, desired_count);

            let report = harness.evaluator.apply(&second).await.unwrap();
            prop_assert!(report.is_success(), "{:?}", report.failed);
            prop_assert_eq!(harness.provider.running_tasks(&fixtures::service()).await, next_count);

            let plan = harness.evaluator.plan(&second).await.unwrap();
            prop_assert!(!plan.has_changes(), "{}", plan.render_text());

            harness.provider.reset_operations().await;
            harness.evaluator.apply(&second).await.unwrap();
            prop_assert_eq!(harness.provider.mutation_count().await, 0);
            Ok(())
        })?;
    }
}
