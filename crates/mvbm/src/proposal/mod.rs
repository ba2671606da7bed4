//! Proposal samplers for the root vector and the rate matrices.
//!
//! Purpose
//! - Produce a candidate parameter set plus the log Hastings term from the
//!   current one. Strategies are closed enums fixed at setup; the driver
//!   evaluates likelihood and priors and applies the MH decision.
//!
//! Moves
//! - Root: sliding window, symmetric (log Hastings 0). One trait, every
//!   trait, or a joint normal step shaped by the tip-data correlation.
//! - Rate matrix: one regime chosen uniformly, then either a multiplicative
//!   window on the standard deviations or an inverse-Wishart draw centred on
//!   the current correlation, with the standard deviations kept.
//!
//! Log Hastings terms are stated in covariance space, the space in which the
//! driver evaluates the target (priors plus the `(R, σ) → Σ` Jacobian).

mod matrix;
mod root;

pub use matrix::MatrixProposal;
pub use root::RootProposal;

use crate::params::Params;

/// The parameter block a proposal perturbed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Block {
    Root,
    /// Standard deviations of the rate matrix of a regime (0-based).
    Sd(usize),
    /// Correlation structure of the rate matrix of a regime (0-based).
    Correlation(usize),
}

impl Block {
    /// Short label used in chain logs, regimes numbered from 1.
    pub fn label(&self) -> String {
        match *self {
            Self::Root => "root".to_string(),
            Self::Sd(r) => format!("sd.{}", r + 1),
            Self::Correlation(r) => format!("corr.{}", r + 1),
        }
    }

    pub fn regime(&self) -> Option<usize> {
        match *self {
            Self::Root => None,
            Self::Sd(r) | Self::Correlation(r) => Some(r),
        }
    }
}

/// Proposed parameters. `log_hastings = −∞` marks a degenerate draw that the
/// driver must reject.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub block: Block,
    pub params: Params,
    pub log_hastings: f64,
}
