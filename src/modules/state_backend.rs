// Copyright (c) 2025 - Cowboy AI, Inc.
//! State Backend Bootstrap
//!
//! The durable store for state records and the exclusive lock table. Both
//! must exist before any environment graph can be evaluated, so this graph
//! is applied on its own by `init`.

use super::ModuleContext;
use crate::domain::{ResourceKind, ValidationError};
use crate::errors::TopologyResult;
use crate::graph::{AttributeValue, ResourceGraph, ResourceNode};

pub const MODULE: &str = "state_backend";

/// Lock table partition key
pub const LOCK_KEY: &str = "LockID";

/// State backend input contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateBackendInput {
    pub bucket_name: String,
    pub lock_table_name: String,
}

/// State backend outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateBackendOutputs {
    pub bucket_arn: AttributeValue,
    pub lock_table_arn: AttributeValue,
}

/// Build the bootstrap graph
pub fn build(
    graph: &mut ResourceGraph,
    ctx: &ModuleContext,
    input: &StateBackendInput,
) -> TopologyResult<StateBackendOutputs> {
    let bucket_ok = (3..=63).contains(&input.bucket_name.len())
        && input
            .bucket_name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    if !bucket_ok {
        return Err(ValidationError::invalid("state_backend.bucket_name", "3-63 lowercase, digits, '-' or '.'").into());
    }
    if input.lock_table_name.is_empty() {
        return Err(ValidationError::invalid("state_backend.lock_table_name", "must not be empty").into());
    }

    let mut scope = graph.module(MODULE);

    let bucket = scope.add(
        ResourceNode::new(scope.address(ResourceKind::ObjectBucket, "state"))
            .attr("bucket", input.bucket_name.as_str())
            .attr("force_destroy", false)
            .attr("tags", ctx.tags(&input.bucket_name))
            .replace_on_change("bucket"),
    );
    scope.add(
        ResourceNode::new(scope.address(ResourceKind::BucketVersioning, "state"))
            .attr("bucket", bucket.output("id"))
            .attr("status", "Enabled"),
    );
    scope.add(
        ResourceNode::new(scope.address(ResourceKind::BucketEncryption, "state"))
            .attr("bucket", bucket.output("id"))
            .attr("sse_algorithm", "aws:kms"),
    );
    scope.add(
        ResourceNode::new(scope.address(ResourceKind::BucketPublicAccessBlock, "state"))
            .attr("bucket", bucket.output("id"))
            .attr("block_public_acls", true)
            .attr("block_public_policy", true)
            .attr("ignore_public_acls", true)
            .attr("restrict_public_buckets", true),
    );

    let table = scope.add(
        ResourceNode::new(scope.address(ResourceKind::LockTable, "locks"))
            .attr("name", input.lock_table_name.as_str())
            .attr("billing_mode", "PAY_PER_REQUEST")
            .attr("hash_key", LOCK_KEY)
            .attr(
                "attribute",
                AttributeValue::list([AttributeValue::map([
                    ("name", LOCK_KEY.into()),
                    ("type", "S".into()),
                ])]),
            )
            .attr("tags", ctx.tags(&input.lock_table_name))
            .replace_on_change("name")
            .replace_on_change("hash_key"),
    );

    let outputs = StateBackendOutputs {
        bucket_arn: bucket.output("arn"),
        lock_table_arn: table.output("arn"),
    };
    scope.output("bucket_arn", outputs.bucket_arn.clone());
    scope.output("lock_table_arn", outputs.lock_table_arn.clone());
    scope.finish()?;

    Ok(outputs)
}
