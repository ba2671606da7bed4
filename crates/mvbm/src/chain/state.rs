//! Chain state with cached likelihood, priors and Jacobians.

use nalgebra::{DMatrix, DVector};

use crate::covariance::log_jacobian;
use crate::likelihood::log_likelihood;
use crate::params::Params;
use crate::prior::Prior;
use crate::proposal::{Block, Candidate};
use crate::tree::TraversalPlan;

/// Current parameters plus every term of the target density.
///
/// Invariant: the cached terms were computed from `params` on tree `tree`.
#[derive(Clone, Debug)]
pub struct ChainState {
    pub params: Params,
    pub log_lik: f64,
    pub log_prior_root: f64,
    pub log_prior_corr: f64,
    pub log_prior_sd: f64,
    /// `ln |∂(R, σ)/∂Σ|` per regime.
    pub jacobians: Vec<f64>,
    /// Index of the active tree in the sample.
    pub tree: usize,
}

impl ChainState {
    pub(crate) fn evaluate<P: Prior + ?Sized>(
        params: Params,
        tree: usize,
        data: &DMatrix<f64>,
        plan: &TraversalPlan,
        prior: &P,
    ) -> Self {
        let (log_prior_corr, log_prior_sd) = matrix_priors(&params, prior);
        Self {
            log_lik: log_likelihood(data, plan, &params.matrices, &params.root),
            log_prior_root: prior.log_root(&params.root),
            log_prior_corr,
            log_prior_sd,
            jacobians: params.matrices.iter().map(log_jacobian).collect(),
            params,
            tree,
        }
    }

    /// State for `candidate` evaluated on `tree`, recomputing only the terms
    /// its block can change (the likelihood always, since the tree may differ).
    pub(crate) fn with_candidate<P: Prior + ?Sized>(
        &self,
        candidate: Candidate,
        tree: usize,
        data: &DMatrix<f64>,
        plan: &TraversalPlan,
        prior: &P,
    ) -> Self {
        let params = candidate.params;
        let mut next = Self {
            log_lik: log_likelihood(data, plan, &params.matrices, &params.root),
            log_prior_root: self.log_prior_root,
            log_prior_corr: self.log_prior_corr,
            log_prior_sd: self.log_prior_sd,
            jacobians: self.jacobians.clone(),
            params,
            tree,
        };
        match candidate.block {
            Block::Root => next.log_prior_root = prior.log_root(&next.params.root),
            Block::Sd(r) | Block::Correlation(r) => {
                (next.log_prior_corr, next.log_prior_sd) = matrix_priors(&next.params, prior);
                next.jacobians[r] = log_jacobian(&next.params.matrices[r]);
            }
        }
        next
    }

    pub fn log_prior(&self) -> f64 {
        self.log_prior_root + self.log_prior_corr + self.log_prior_sd
    }

    /// Unnormalised log target on covariance space.
    pub fn log_posterior(&self) -> f64 {
        self.log_lik + self.log_prior() + self.jacobians.iter().sum::<f64>()
    }
}

fn matrix_priors<P: Prior + ?Sized>(params: &Params, prior: &P) -> (f64, f64) {
    let (corr, sd): (Vec<DMatrix<f64>>, Vec<DVector<f64>>) = params
        .separations()
        .into_iter()
        .map(|s| (s.correlation, s.sd))
        .unzip();
    (prior.log_correlations(&corr), prior.log_sds(&sd))
}

/// One generation as persisted.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// 1-based generation number.
    pub generation: usize,
    /// `None` for the starting state.
    pub block: Option<Block>,
    pub accepted: bool,
    pub log_lik: f64,
    pub tree: usize,
    pub root: DVector<f64>,
    pub matrices: Vec<DMatrix<f64>>,
}

impl Snapshot {
    pub(crate) fn of(
        state: &ChainState,
        generation: usize,
        block: Option<Block>,
        accepted: bool,
    ) -> Self {
        Self {
            generation,
            block,
            accepted,
            log_lik: state.log_lik,
            tree: state.tree,
            root: state.params.root.clone(),
            matrices: state.params.matrices.clone(),
        }
    }

    pub fn block_label(&self) -> String {
        self.block.map_or_else(|| "start".to_string(), |b| b.label())
    }
}
