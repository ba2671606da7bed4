//! Sliding-window proposals on the root vector.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::warn;

use super::{Block, Candidate};
use crate::config::RootMode;
use crate::covariance::{cholesky, column_correlation};
use crate::params::Params;

#[derive(Clone, Debug)]
pub enum RootProposal {
    /// One trait, chosen uniformly, shifted by `U(−w/2, w/2)`.
    PerTrait { width: f64 },
    /// Every trait shifted by its own `U(−w/2, w/2)` draw.
    Joint { width: f64 },
    /// `root' ~ N(root, w² C)`; `chol` is the lower factor of `C`.
    DataCorrelated { width: f64, chol: DMatrix<f64> },
}

impl RootProposal {
    /// `data` (tips × traits) is only read in `DataCorrelated` mode. When
    /// its correlation matrix is not positive-definite the identity is used.
    pub fn new(mode: RootMode, width: f64, data: &DMatrix<f64>) -> Self {
        match mode {
            RootMode::PerTrait => Self::PerTrait { width },
            RootMode::Joint => Self::Joint { width },
            RootMode::DataCorrelated => {
                let k = data.ncols();
                let chol = column_correlation(data)
                    .and_then(|c| cholesky(&c))
                    .map(|c| c.unpack())
                    .unwrap_or_else(|| {
                        warn!("tip-data correlation is not positive-definite; using identity");
                        DMatrix::identity(k, k)
                    });
                Self::DataCorrelated { width, chol }
            }
        }
    }

    pub fn width(&self) -> f64 {
        match *self {
            Self::PerTrait { width } | Self::Joint { width } => width,
            Self::DataCorrelated { width, .. } => width,
        }
    }

    pub fn propose<R: Rng + ?Sized>(&self, current: &Params, rng: &mut R) -> Candidate {
        let k = current.n_traits();
        let mut root = current.root.clone();
        match self {
            Self::PerTrait { width } => {
                let half = 0.5 * width;
                let i = rng.gen_range(0..k);
                root[i] += rng.gen_range(-half..half);
            }
            Self::Joint { width } => {
                let half = 0.5 * width;
                for x in root.iter_mut() {
                    *x += rng.gen_range(-half..half);
                }
            }
            Self::DataCorrelated { width, chol } => {
                let z = DVector::<f64>::from_fn(k, |_, _| rng.sample(StandardNormal));
                root += (chol * z) * *width;
            }
        }
        Candidate {
            block: Block::Root,
            params: Params::new(root, current.matrices.clone()),
            log_hastings: 0.0,
        }
    }
}
