//! Covariance decomposition utility.
//!
//! Purpose
//! - Split a rate matrix into its correlation and standard-deviation
//!   components (`Σ = D R D`, `D = diag(σ)`) and reassemble it.
//! - Provide the log-Jacobian that moves densities between the `(R, σ)`
//!   parameterisation used by priors and the covariance parameterisation used
//!   by the inverse-Wishart proposal.
//! - Host the inverse-Wishart density and sampler, and the SPD checks every
//!   other module relies on.
//!
//! Everything here is pure; randomness enters only through the caller's RNG.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn, SymmetricEigen};
use rand::Rng;
use rand_distr::{ChiSquared, Distribution, StandardNormal};
use statrs::function::gamma::ln_gamma;

/// Relative tolerance of the symmetry check.
pub(crate) const SYM_EPS: f64 = 1e-8;

/// QR sweeps allowed before the eigen solver gives up.
const EIGEN_MAX_ITER: usize = 1_000;

/// Correlation matrix and standard deviations of a covariance matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct Separation {
    pub correlation: DMatrix<f64>,
    pub sd: DVector<f64>,
}

/// Eigen decomposition of a symmetric matrix.
#[derive(Clone, Debug)]
pub struct Eigen {
    /// Columns are eigenvectors.
    pub vectors: DMatrix<f64>,
    pub values: DVector<f64>,
}

/// `Σ ↦ (R, σ)` with `σ_i = √Σ_ii` and `R = D⁻¹ Σ D⁻¹`.
///
/// The diagonal of `R` is set to exactly one.
pub fn decompose(sigma: &DMatrix<f64>) -> Separation {
    let sd = sigma.diagonal().map(f64::sqrt);
    let k = sd.len();
    let correlation = DMatrix::from_fn(k, k, |i, j| {
        if i == j {
            1.0
        } else {
            sigma[(i, j)] / (sd[i] * sd[j])
        }
    });
    Separation { correlation, sd }
}

/// `(R, σ) ↦ D R D`, symmetrised.
pub fn reassemble(correlation: &DMatrix<f64>, sd: &DVector<f64>) -> DMatrix<f64> {
    let k = sd.len();
    let mut sigma = DMatrix::from_fn(k, k, |i, j| correlation[(i, j)] * sd[i] * sd[j]);
    symmetrize(&mut sigma);
    sigma
}

/// Replace `m` with `(m + mᵀ) / 2`.
pub fn symmetrize(m: &mut DMatrix<f64>) {
    let k = m.nrows();
    for i in 0..k {
        for j in (i + 1)..k {
            let avg = 0.5 * (m[(i, j)] + m[(j, i)]);
            m[(i, j)] = avg;
            m[(j, i)] = avg;
        }
    }
}

/// Eigen decomposition of a symmetric matrix; `None` for non-square or
/// non-finite input, or when the solver does not converge.
pub fn eigen(sigma: &DMatrix<f64>) -> Option<Eigen> {
    if !sigma.is_square() || !sigma.iter().all(|x| x.is_finite()) {
        return None;
    }
    let e = SymmetricEigen::try_new(sigma.clone(), f64::EPSILON, EIGEN_MAX_ITER)?;
    Some(Eigen {
        vectors: e.eigenvectors,
        values: e.eigenvalues,
    })
}

/// `ln |Σ|` from the Cholesky factor; `None` unless `Σ` is SPD.
pub fn log_det(sigma: &DMatrix<f64>) -> Option<f64> {
    cholesky(sigma).map(|c| chol_ln_det(&c))
}

/// Square, finite, symmetric (relative `SYM_EPS`) and Cholesky-factorisable.
pub fn is_positive_definite(m: &DMatrix<f64>) -> bool {
    cholesky(m).is_some()
}

/// Cholesky factor of an SPD matrix, or `None` for anything else.
pub(crate) fn cholesky(m: &DMatrix<f64>) -> Option<Cholesky<f64, Dyn>> {
    if !m.is_square() || m.nrows() == 0 || !m.iter().all(|x| x.is_finite()) {
        return None;
    }
    let k = m.nrows();
    for i in 0..k {
        for j in (i + 1)..k {
            let (a, b) = (m[(i, j)], m[(j, i)]);
            if (a - b).abs() > SYM_EPS * a.abs().max(b.abs()).max(1.0) {
                return None;
            }
        }
    }
    Cholesky::new(m.clone())
}

/// `ln |∂(R, σ)/∂Σ| = −(k ln 2 + k Σ_i ln σ_i)`.
///
/// `Σ_ii = σ_i²` and `Σ_ij = σ_i σ_j R_ij`, so the forward map has determinant
/// `2^k ∏ σ_i^k`. Returns `−∞` when a variance is not positive.
pub fn log_jacobian(sigma: &DMatrix<f64>) -> f64 {
    let k = sigma.nrows() as f64;
    let diag = sigma.diagonal();
    if !diag.iter().all(|&d| d > 0.0 && d.is_finite()) {
        return f64::NEG_INFINITY;
    }
    let sum_ln_sd: f64 = diag.iter().map(|d| 0.5 * d.ln()).sum();
    -(k * std::f64::consts::LN_2 + k * sum_ln_sd)
}

/// `ln Γ_k(a)`.
pub fn ln_multivariate_gamma(k: usize, a: f64) -> f64 {
    let kf = k as f64;
    let mut acc = 0.25 * kf * (kf - 1.0) * std::f64::consts::PI.ln();
    for j in 0..k {
        acc += ln_gamma(a - 0.5 * j as f64);
    }
    acc
}

/// Log-density of `X ~ IW(ν, Ψ)` (mean `Ψ / (ν − k − 1)`).
///
/// Returns `−∞` if `X` or `Ψ` is not SPD or `ν <= k − 1`.
pub fn inverse_wishart_ln_pdf(x: &DMatrix<f64>, nu: f64, psi: &DMatrix<f64>) -> f64 {
    let k = x.nrows();
    let kf = k as f64;
    if psi.nrows() != k || nu <= kf - 1.0 {
        return f64::NEG_INFINITY;
    }
    let (Some(chol_x), Some(chol_psi)) = (cholesky(x), cholesky(psi)) else {
        return f64::NEG_INFINITY;
    };
    let ln_det_x = chol_ln_det(&chol_x);
    let ln_det_psi = chol_ln_det(&chol_psi);
    let tr = chol_x.solve(psi).trace();
    let out = 0.5 * nu * ln_det_psi
        - 0.5 * nu * kf * std::f64::consts::LN_2
        - ln_multivariate_gamma(k, 0.5 * nu)
        - 0.5 * (nu + kf + 1.0) * ln_det_x
        - 0.5 * tr;
    if out.is_finite() {
        out
    } else {
        f64::NEG_INFINITY
    }
}

/// Draw `X ~ IW(ν, Ψ)` by inverting a Bartlett-decomposed Wishart draw with
/// scale `Ψ⁻¹`. `None` if `Ψ` is not SPD, `ν <= k − 1`, or the draw is
/// numerically singular.
pub fn sample_inverse_wishart<R: Rng + ?Sized>(
    rng: &mut R,
    nu: f64,
    psi: &DMatrix<f64>,
) -> Option<DMatrix<f64>> {
    let k = psi.nrows();
    if nu <= k as f64 - 1.0 {
        return None;
    }
    let scale = cholesky(psi)?.inverse();
    let l = Cholesky::new(scale)?.unpack();
    let mut a = DMatrix::<f64>::zeros(k, k);
    for i in 0..k {
        let chi = ChiSquared::new(nu - i as f64).ok()?;
        a[(i, i)] = chi.sample(rng).sqrt();
        for j in 0..i {
            a[(i, j)] = StandardNormal.sample(rng);
        }
    }
    let la = &l * &a;
    let mut wishart = &la * la.transpose();
    symmetrize(&mut wishart);
    let mut x = Cholesky::new(wishart)?.inverse();
    symmetrize(&mut x);
    if is_positive_definite(&x) {
        Some(x)
    } else {
        None
    }
}

/// Pearson correlation between the columns of `data`; `None` when fewer than
/// two rows or a column is constant.
pub fn column_correlation(data: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = data.nrows();
    if n < 2 {
        return None;
    }
    let means = data.row_mean();
    let centered = DMatrix::from_fn(n, data.ncols(), |i, j| data[(i, j)] - means[j]);
    let cov = centered.transpose() * &centered / (n as f64 - 1.0);
    if !cov.diagonal().iter().all(|&v| v > 0.0 && v.is_finite()) {
        return None;
    }
    Some(decompose(&cov).correlation)
}

/// `ln |A|` from a Cholesky factor.
pub(crate) fn chol_ln_det(chol: &Cholesky<f64, Dyn>) -> f64 {
    2.0 * chol.l_dirty().diagonal().iter().map(|x| x.ln()).sum::<f64>()
}
