//! Bayesian estimation of multivariate Brownian-motion rate matrices.
//!
//! The crate fits one root vector and one evolutionary rate matrix per regime
//! to trait data observed at the tips of a phylogeny (or of a sample of
//! phylogenies) with regimes mapped onto branches, using Metropolis–Hastings
//! MCMC. The chain is streamed to disk in chunks.
//!
//! Layout
//! - `tree`: mapped phylogenies and the immutable traversal plans built from them.
//! - `likelihood`: pruning evaluator of the multivariate-normal tip likelihood.
//! - `covariance`: correlation/sd decomposition, Jacobians, inverse-Wishart.
//! - `proposal`: root and rate-matrix proposal strategies.
//! - `prior`: the prior capability and a standard implementation.
//! - `chain`: driver, chunk buffer, writer and reader of persisted chains.
//! - `simulate`: tip data drawn under the model.
//!
//! API Policy
//! - This crate is project-internal. There is no stable public API; prefer the
//!   curated surface in [`api`].

pub mod api;
pub mod chain;
pub mod config;
pub mod covariance;
pub mod error;
pub mod likelihood;
pub mod params;
pub mod prior;
pub mod proposal;
pub mod simulate;
pub mod tree;

/// Library version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use config::{McmcConfig, RootMode};
pub use error::{McmcError, Result};
pub use params::Params;

/// Common exports for quick imports in callers.
pub mod prelude {
    pub use crate::chain::{read_chain, Mcmc, Posterior, Run, RunDescriptor, Start};
    pub use crate::config::{McmcConfig, RootMode};
    pub use crate::error::{McmcError, Result};
    pub use crate::params::Params;
    pub use crate::prior::{Prior, RootPrior, SdPrior, StdPrior};
    pub use crate::tree::{Phylogeny, TraitData, TreeSample};
    pub use nalgebra::{DMatrix, DVector};
}
