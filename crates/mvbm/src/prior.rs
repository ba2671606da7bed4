//! Prior bundle: the capability the driver evaluates, plus a standard one.
//!
//! The driver only sees the [`Prior`] trait: log-densities of the root
//! vector, of the list of correlation matrices and of the list of
//! standard-deviation vectors (one entry per regime), and a draw of a full
//! parameter set for chains started from the prior. Densities may be
//! unnormalised; constants cancel in the acceptance ratio.

use nalgebra::{DMatrix, DVector};
use rand::{Rng, RngCore};
use rand_distr::{Beta, Distribution, Exp, LogNormal, Normal};

use crate::covariance::{log_det, reassemble};
use crate::error::{McmcError, Result};
use crate::params::Params;

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

pub trait Prior {
    fn log_root(&self, root: &DVector<f64>) -> f64;
    fn log_correlations(&self, correlations: &[DMatrix<f64>]) -> f64;
    fn log_sds(&self, sds: &[DVector<f64>]) -> f64;
    /// Draw a starting parameter set.
    fn sample(&self, rng: &mut dyn RngCore) -> Params;
}

/// Per-trait root prior.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RootPrior {
    Uniform { min: f64, max: f64 },
    Normal { mean: f64, sd: f64 },
}

impl RootPrior {
    pub fn ln_pdf(&self, x: f64) -> f64 {
        match *self {
            Self::Uniform { min, max } => ln_uniform(x, min, max),
            Self::Normal { mean, sd } => {
                let z = (x - mean) / sd;
                -LN_SQRT_2PI - sd.ln() - 0.5 * z * z
            }
        }
    }

    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        match *self {
            Self::Uniform { min, max } => rng.gen_range(min..max),
            Self::Normal { mean, sd } => Normal::new(mean, sd)
                .map(|d| d.sample(rng))
                .unwrap_or(mean),
        }
    }

    fn validate(&self) -> Result<()> {
        let ok = match *self {
            Self::Uniform { min, max } => min.is_finite() && max.is_finite() && min < max,
            Self::Normal { mean, sd } => mean.is_finite() && sd.is_finite() && sd > 0.0,
        };
        if ok {
            Ok(())
        } else {
            Err(McmcError::config(format!("invalid root prior {self:?}")))
        }
    }
}

/// Per-trait prior on the standard deviation of a rate matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SdPrior {
    Uniform { min: f64, max: f64 },
    LogNormal { meanlog: f64, sdlog: f64 },
    Exponential { rate: f64 },
}

impl SdPrior {
    pub fn ln_pdf(&self, x: f64) -> f64 {
        if !(x > 0.0) {
            return f64::NEG_INFINITY;
        }
        match *self {
            Self::Uniform { min, max } => ln_uniform(x, min, max),
            Self::LogNormal { meanlog, sdlog } => {
                let z = (x.ln() - meanlog) / sdlog;
                -x.ln() - LN_SQRT_2PI - sdlog.ln() - 0.5 * z * z
            }
            Self::Exponential { rate } => rate.ln() - rate * x,
        }
    }

    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        match *self {
            Self::Uniform { min, max } => rng.gen_range(min..max),
            Self::LogNormal { meanlog, sdlog } => LogNormal::new(meanlog, sdlog)
                .map(|d| d.sample(rng))
                .unwrap_or_else(|_| meanlog.exp()),
            Self::Exponential { rate } => Exp::new(rate)
                .map(|d| d.sample(rng))
                .unwrap_or(1.0 / rate),
        }
    }

    fn validate(&self) -> Result<()> {
        let ok = match *self {
            Self::Uniform { min, max } => min >= 0.0 && max.is_finite() && min < max,
            Self::LogNormal { meanlog, sdlog } => {
                meanlog.is_finite() && sdlog.is_finite() && sdlog > 0.0
            }
            Self::Exponential { rate } => rate.is_finite() && rate > 0.0,
        };
        if ok {
            Ok(())
        } else {
            Err(McmcError::config(format!("invalid sd prior {self:?}")))
        }
    }
}

/// LKJ density on correlation matrices, `∝ |R|^(η − 1)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Lkj {
    pub eta: f64,
}

impl Lkj {
    /// Unnormalised; `−∞` off the set of valid correlation matrices.
    pub fn ln_pdf(&self, r: &DMatrix<f64>) -> f64 {
        if !(0..r.nrows()).all(|i| (r[(i, i)] - 1.0).abs() < 1e-9) {
            return f64::NEG_INFINITY;
        }
        match log_det(r) {
            Some(_) if self.eta == 1.0 => 0.0,
            Some(ld) => (self.eta - 1.0) * ld,
            None => f64::NEG_INFINITY,
        }
    }

    /// C-vine draw (Lewandowski, Kurowicka & Joe 2009).
    pub fn sample<R: Rng + ?Sized>(&self, k: usize, rng: &mut R) -> DMatrix<f64> {
        let mut partial = DMatrix::<f64>::zeros(k, k);
        let mut out = DMatrix::<f64>::identity(k, k);
        let mut beta = self.eta + 0.5 * (k as f64 - 1.0);
        for i in 0..k.saturating_sub(1) {
            beta -= 0.5;
            let dist = Beta::new(beta, beta).ok();
            for j in (i + 1)..k {
                let draw = dist.as_ref().map(|d| d.sample(rng)).unwrap_or(0.5);
                partial[(i, j)] = 2.0 * draw - 1.0;
                let mut p = partial[(i, j)];
                for l in (0..i).rev() {
                    p = p * ((1.0 - partial[(l, i)].powi(2)) * (1.0 - partial[(l, j)].powi(2))).sqrt()
                        + partial[(l, i)] * partial[(l, j)];
                }
                out[(i, j)] = p;
                out[(j, i)] = p;
            }
        }
        out
    }
}

/// Standard prior: independent per-trait root and sd priors (the sd priors
/// shared by every regime) and an LKJ prior on each correlation matrix.
#[derive(Clone, Debug)]
pub struct StdPrior {
    pub root: Vec<RootPrior>,
    pub sd: Vec<SdPrior>,
    pub corr: Lkj,
    pub n_regimes: usize,
}

impl StdPrior {
    pub fn new(root: Vec<RootPrior>, sd: Vec<SdPrior>, eta: f64, n_regimes: usize) -> Result<Self> {
        if root.is_empty() || root.len() != sd.len() {
            return Err(McmcError::config(format!(
                "prior covers {} root and {} sd traits",
                root.len(),
                sd.len()
            )));
        }
        if n_regimes == 0 {
            return Err(McmcError::config("prior needs at least one regime"));
        }
        if !(eta.is_finite() && eta > 0.0) {
            return Err(McmcError::config("LKJ eta must be finite and > 0"));
        }
        for p in &root {
            p.validate()?;
        }
        for p in &sd {
            p.validate()?;
        }
        Ok(Self {
            root,
            sd,
            corr: Lkj { eta },
            n_regimes,
        })
    }

    /// Uniform root and sd priors on the given ranges, flat LKJ.
    pub fn uniform(
        n_traits: usize,
        n_regimes: usize,
        root: (f64, f64),
        sd: (f64, f64),
    ) -> Result<Self> {
        Self::new(
            vec![RootPrior::Uniform { min: root.0, max: root.1 }; n_traits],
            vec![SdPrior::Uniform { min: sd.0, max: sd.1 }; n_traits],
            1.0,
            n_regimes,
        )
    }

    #[inline]
    pub fn n_traits(&self) -> usize {
        self.root.len()
    }
}

impl Prior for StdPrior {
    fn log_root(&self, root: &DVector<f64>) -> f64 {
        if root.len() != self.root.len() {
            return f64::NEG_INFINITY;
        }
        root.iter().zip(&self.root).map(|(&x, p)| p.ln_pdf(x)).sum()
    }

    fn log_correlations(&self, correlations: &[DMatrix<f64>]) -> f64 {
        if correlations.len() != self.n_regimes {
            return f64::NEG_INFINITY;
        }
        correlations.iter().map(|r| self.corr.ln_pdf(r)).sum()
    }

    fn log_sds(&self, sds: &[DVector<f64>]) -> f64 {
        if sds.len() != self.n_regimes || sds.iter().any(|s| s.len() != self.sd.len()) {
            return f64::NEG_INFINITY;
        }
        sds.iter()
            .map(|s| s.iter().zip(&self.sd).map(|(&x, p)| p.ln_pdf(x)).sum::<f64>())
            .sum()
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Params {
        let k = self.n_traits();
        let root = DVector::from_iterator(k, self.root.iter().map(|p| p.sample(rng)));
        let matrices = (0..self.n_regimes)
            .map(|_| {
                let sd = DVector::from_iterator(k, self.sd.iter().map(|p| p.sample(rng)));
                let corr = self.corr.sample(k, rng);
                reassemble(&corr, &sd)
            })
            .collect();
        Params::new(root, matrices)
    }
}

fn ln_uniform(x: f64, min: f64, max: f64) -> f64 {
    if (min..=max).contains(&x) {
        -(max - min).ln()
    } else {
        f64::NEG_INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::{decompose, is_positive_definite};
    use nalgebra::{dmatrix, dvector};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn scalar_densities_match_closed_forms() {
        let n = RootPrior::Normal { mean: 1.0, sd: 2.0 };
        let want = -0.5 * (2.0 * std::f64::consts::PI * 4.0).ln() - 0.5 * 0.25;
        assert!((n.ln_pdf(2.0) - want).abs() < 1e-12);

        let u = RootPrior::Uniform { min: -1.0, max: 3.0 };
        assert!((u.ln_pdf(0.0) + 4f64.ln()).abs() < 1e-12);
        assert_eq!(u.ln_pdf(5.0), f64::NEG_INFINITY);

        let e = SdPrior::Exponential { rate: 2.0 };
        assert!((e.ln_pdf(0.5) - (2f64.ln() - 1.0)).abs() < 1e-12);
        assert_eq!(e.ln_pdf(-0.5), f64::NEG_INFINITY);

        let ln = SdPrior::LogNormal { meanlog: 0.0, sdlog: 1.0 };
        let want = -(2.0 * std::f64::consts::PI).sqrt().ln();
        assert!((ln.ln_pdf(1.0) - want).abs() < 1e-12);
    }

    #[test]
    fn lkj_density_follows_determinant() {
        let r = dmatrix![1.0, 0.5; 0.5, 1.0];
        assert_eq!(Lkj { eta: 1.0 }.ln_pdf(&r), 0.0);
        let want = 1.0 * 0.75f64.ln();
        assert!((Lkj { eta: 2.0 }.ln_pdf(&r) - want).abs() < 1e-12);
        let not_corr = dmatrix![2.0, 0.5; 0.5, 1.0];
        assert_eq!(Lkj { eta: 2.0 }.ln_pdf(&not_corr), f64::NEG_INFINITY);
        let not_pd = dmatrix![1.0, 1.5; 1.5, 1.0];
        assert_eq!(Lkj { eta: 1.0 }.ln_pdf(&not_pd), f64::NEG_INFINITY);
    }

    #[test]
    fn lkj_samples_are_valid_correlations() {
        let mut rng = StdRng::seed_from_u64(11);
        let lkj = Lkj { eta: 1.5 };
        for k in 1..=5 {
            for _ in 0..50 {
                let r = lkj.sample(k, &mut rng);
                assert!(is_positive_definite(&r));
                for i in 0..k {
                    assert_eq!(r[(i, i)], 1.0);
                }
            }
        }
    }

    #[test]
    fn lkj_with_flat_eta_has_zero_mean_correlation() {
        let mut rng = StdRng::seed_from_u64(5);
        let lkj = Lkj { eta: 1.0 };
        let n = 4000;
        let mean: f64 = (0..n).map(|_| lkj.sample(3, &mut rng)[(0, 2)]).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.05);
    }

    #[test]
    fn std_prior_samples_lie_in_support() {
        let prior = StdPrior::uniform(3, 2, (-2.0, 2.0), (0.1, 3.0)).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let p = prior.sample(&mut rng);
            assert_eq!(p.n_traits(), 3);
            assert_eq!(p.n_regimes(), 2);
            assert!(prior.log_root(&p.root).is_finite());
            let seps: Vec<_> = p.matrices.iter().map(decompose).collect();
            let corr: Vec<_> = seps.iter().map(|s| s.correlation.clone()).collect();
            let sds: Vec<_> = seps.iter().map(|s| s.sd.clone()).collect();
            assert!(prior.log_correlations(&corr).is_finite());
            assert!(prior.log_sds(&sds).is_finite());
        }
    }

    #[test]
    fn std_prior_rejects_bad_settings() {
        assert!(StdPrior::uniform(2, 1, (1.0, -1.0), (0.1, 1.0)).is_err());
        assert!(StdPrior::uniform(2, 1, (-1.0, 1.0), (-0.1, 1.0)).is_err());
        assert!(StdPrior::new(
            vec![RootPrior::Normal { mean: 0.0, sd: 1.0 }],
            vec![SdPrior::Exponential { rate: 1.0 }],
            0.0,
            1
        )
        .is_err());
        assert!(StdPrior::new(vec![], vec![], 1.0, 1).is_err());
    }

    #[test]
    fn wrong_lengths_have_no_support() {
        let prior = StdPrior::uniform(2, 1, (-1.0, 1.0), (0.1, 1.0)).unwrap();
        assert_eq!(prior.log_root(&dvector![0.0]), f64::NEG_INFINITY);
        assert_eq!(prior.log_sds(&[]), f64::NEG_INFINITY);
    }
}
