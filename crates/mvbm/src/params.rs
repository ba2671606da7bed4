//! Model parameters: root vector plus one rate matrix per regime.

use nalgebra::{DMatrix, DVector};

use crate::covariance::{decompose, is_positive_definite, Separation};
use crate::error::{McmcError, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct Params {
    pub root: DVector<f64>,
    pub matrices: Vec<DMatrix<f64>>,
}

impl Params {
    pub fn new(root: DVector<f64>, matrices: Vec<DMatrix<f64>>) -> Self {
        Self { root, matrices }
    }

    #[inline]
    pub fn n_traits(&self) -> usize {
        self.root.len()
    }

    #[inline]
    pub fn n_regimes(&self) -> usize {
        self.matrices.len()
    }

    /// Correlation/sd components of every rate matrix.
    pub fn separations(&self) -> Vec<Separation> {
        self.matrices.iter().map(decompose).collect()
    }

    /// Checks sizes against `(k, p)` and that every matrix is SPD.
    pub fn validate(&self, n_traits: usize, n_regimes: usize) -> Result<()> {
        if self.root.len() != n_traits {
            return Err(McmcError::dimension(format!(
                "root has {} values, data has {n_traits} traits",
                self.root.len()
            )));
        }
        if !self.root.iter().all(|x| x.is_finite()) {
            return Err(McmcError::invalid_state("root vector has non-finite values"));
        }
        if self.matrices.len() != n_regimes {
            return Err(McmcError::dimension(format!(
                "{} rate matrices given for {n_regimes} regimes",
                self.matrices.len()
            )));
        }
        for (i, m) in self.matrices.iter().enumerate() {
            if m.nrows() != n_traits || m.ncols() != n_traits {
                return Err(McmcError::dimension(format!(
                    "rate matrix {} is {}x{}, expected {n_traits}x{n_traits}",
                    i + 1,
                    m.nrows(),
                    m.ncols()
                )));
            }
            if !is_positive_definite(m) {
                return Err(McmcError::invalid_state(format!(
                    "rate matrix {} is not symmetric positive-definite",
                    i + 1
                )));
            }
        }
        Ok(())
    }
}
