// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests Module
//!
//! This module contains property-based tests using proptest over
//! composition, the deployment state machine, and the evaluator.

mod circuit_breaker;
mod convergence;
mod network_layout;
