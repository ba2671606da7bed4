//! Curated internal API (UNSTABLE).
//!
//! Important
//! - This is not a public API. It is a convenience surface for the CLI,
//!   benches and examples. Breaking changes are allowed and expected.

// Inputs
pub use crate::tree::{build_plans, coalescent_tree, Phylogeny, TraitData, TraversalPlan, TreeSample};
// Model
pub use crate::covariance::{decompose, log_jacobian, reassemble, Separation};
pub use crate::likelihood::log_likelihood;
pub use crate::params::Params;
pub use crate::prior::{Lkj, Prior, RootPrior, SdPrior, StdPrior};
pub use crate::simulate::{simulate_data, simulate_tips};
// Chains
pub use crate::chain::{read_chain, ChainFiles, Mcmc, Posterior, Run, RunDescriptor, Start};
pub use crate::config::{McmcConfig, RootMode};
pub use crate::error::{McmcError, Result};
