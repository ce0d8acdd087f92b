// Copyright (c) 2025 - Cowboy AI, Inc.
//! Composition
//!
//! Binds an environment parameter file to the module builders.

mod params;
mod root;

pub use params::{
    CacheParameters, ComputeParameters, EnvironmentParameters, IdentityParameters,
    IngressParameters, NetworkParameters, RegistryParameters, SecretParameters,
    StateBackendParameters,
};
pub use root::{
    compose, compose_bootstrap, feature_summary, Composition, CompositionOutputs, RootOutput,
    BOOTSTRAP_ENVIRONMENT,
};

#[cfg(test)]
pub(crate) use params::tests as fixtures;
