//! Rate-matrix proposals: sd window and inverse-Wishart correlation move.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

use super::{Block, Candidate};
use crate::covariance::{
    decompose, inverse_wishart_ln_pdf, log_jacobian, reassemble, sample_inverse_wishart,
};
use crate::error::{McmcError, Result};
use crate::params::Params;

#[derive(Clone, Debug)]
pub struct MatrixProposal {
    /// Window width on `ln σ`.
    pub w_sd: f64,
    /// Inverse-Wishart degrees of freedom; larger means smaller steps.
    pub v: f64,
    /// Probability of the sd move (else the correlation move).
    pub prop_sd: f64,
}

impl MatrixProposal {
    pub fn new(w_sd: f64, v: f64, prop_sd: f64, n_traits: usize) -> Result<Self> {
        if v <= (n_traits + 1) as f64 {
            return Err(McmcError::config(format!(
                "v must exceed k + 1 = {} (got {v})",
                n_traits + 1
            )));
        }
        Ok(Self { w_sd, v, prop_sd })
    }

    /// Picks a regime uniformly and perturbs one component of its matrix.
    pub fn propose<R: Rng + ?Sized>(&self, current: &Params, rng: &mut R) -> Candidate {
        let regime = rng.gen_range(0..current.n_regimes());
        if rng.gen::<f64>() < self.prop_sd {
            self.propose_sd(current, regime, rng)
        } else {
            self.propose_correlation(current, regime, rng)
        }
    }

    /// `ln σ'_i = ln σ_i + u_i`; the map `Σ ↦ D_u Σ D_u` scales the k(k+1)/2
    /// free entries with determinant `exp((k+1) Σ u_i)`.
    pub(crate) fn propose_sd<R: Rng + ?Sized>(
        &self,
        current: &Params,
        regime: usize,
        rng: &mut R,
    ) -> Candidate {
        let k = current.n_traits();
        let half = 0.5 * self.w_sd;
        let sep = decompose(&current.matrices[regime]);
        let u: Vec<f64> = (0..k).map(|_| rng.gen_range(-half..half)).collect();
        let sd = DVector::from_iterator(k, sep.sd.iter().zip(&u).map(|(s, d)| s * d.exp()));
        let mut params = current.clone();
        params.matrices[regime] = reassemble(&sep.correlation, &sd);
        Candidate {
            block: Block::Sd(regime),
            params,
            log_hastings: (k + 1) as f64 * u.iter().sum::<f64>(),
        }
    }

    /// Moves the correlation of one regime and keeps its standard deviations.
    ///
    /// A fresh auxiliary scale `s` (`ln s_i ~ N(0, 1)`) lifts the current
    /// correlation to `W = D_s R D_s`; then `W' ~ IW(v, (v − k − 1) W)` and
    /// `R' = cor(W')`. The law of `R'` given `R` does not depend on `s`, so
    /// the step is an inverse-Wishart draw centred on `R`. The log Hastings
    /// term is that of the move `(R, s) → (R', s')` on the target extended by
    /// the density of `s`, which leaves the target of `R` invariant.
    pub(crate) fn propose_correlation<R: Rng + ?Sized>(
        &self,
        current: &Params,
        regime: usize,
        rng: &mut R,
    ) -> Candidate {
        let k = current.n_traits();
        let scale = self.v - k as f64 - 1.0;
        let block = Block::Correlation(regime);
        let sep = decompose(&current.matrices[regime]);
        let aux = DVector::from_iterator(
            k,
            (0..k).map(|_| rng.sample::<f64, _>(StandardNormal).exp()),
        );
        let from = reassemble(&sep.correlation, &aux);
        let Some(to) = sample_inverse_wishart(rng, self.v, &(&from * scale)) else {
            return Candidate {
                block,
                params: current.clone(),
                log_hastings: f64::NEG_INFINITY,
            };
        };
        let moved = decompose(&to);
        let log_hastings = self.ln_density(&from, &to, scale)
            - self.ln_density(&to, &from, scale)
            + ln_aux_density(&moved.sd)
            - ln_aux_density(&aux)
            + log_jacobian(&to)
            - log_jacobian(&from);
        let mut params = current.clone();
        params.matrices[regime] = reassemble(&moved.correlation, &sep.sd);
        Candidate {
            block,
            params,
            log_hastings,
        }
    }

    /// `ln q(to | from)`.
    fn ln_density(&self, to: &DMatrix<f64>, from: &DMatrix<f64>, scale: f64) -> f64 {
        inverse_wishart_ln_pdf(to, self.v, &(from * scale))
    }
}

/// Unnormalised `ln` density of the auxiliary scale, `ln s_i ~ N(0, 1)`.
pub(crate) fn ln_aux_density(s: &DVector<f64>) -> f64 {
    s.iter()
        .map(|&x| {
            let z = x.ln();
            -0.5 * z * z - z
        })
        .sum()
}
