//! MCMC driver and chain persistence.
//!
//! Purpose
//! - Run a single Metropolis–Hastings chain over the root vector and the
//!   per-regime rate matrices, optionally integrating over a tree sample.
//! - Stream the chain to disk in chunks and reload it for summaries.
//!
//! Flow per generation
//! - Root block with probability `prop_root`, else a rate-matrix block.
//! - With several trees, a candidate tree is drawn uniformly and accepted
//!   together with the parameters.
//! - `ln α = target' − target + ln H`, where the target adds the likelihood,
//!   the priors and the `(R, σ) → Σ` Jacobians.
//!
//! Output files are described in `writer`. Generation 1 is the starting
//! state, recorded as accepted, so every file holds exactly `gen` lines.

mod buffer;
mod driver;
mod reader;
mod state;
mod writer;

pub use buffer::ChunkBuffer;
pub use driver::{Mcmc, Run, RunDescriptor, Start};
pub use reader::{read_chain, Posterior};
pub use state::{ChainState, Snapshot};
pub use writer::{ChainFiles, ChainWriter};

#[cfg(test)]
mod tests;
