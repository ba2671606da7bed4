//! Reload a persisted chain for summaries.

use std::fs;
use std::path::Path;

use nalgebra::{DMatrix, DVector};

use super::driver::RunDescriptor;
use crate::error::{McmcError, Result};

/// Post-burn-in, thinned samples of one run.
#[derive(Clone, Debug)]
pub struct Posterior {
    /// 1-based generation of each retained sample.
    pub generations: Vec<usize>,
    pub log_lik: Vec<f64>,
    pub roots: Vec<DVector<f64>>,
    /// `matrices[r][s]`: rate matrix of regime `r` in sample `s`.
    pub matrices: Vec<Vec<DMatrix<f64>>>,
}

impl Posterior {
    pub fn len(&self) -> usize {
        self.log_lik.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_lik.is_empty()
    }

    pub fn mean_root(&self) -> Option<DVector<f64>> {
        let first = self.roots.first()?;
        let sum = self
            .roots
            .iter()
            .skip(1)
            .fold(first.clone(), |acc, r| acc + r);
        Some(sum / self.roots.len() as f64)
    }

    pub fn mean_matrix(&self, regime: usize) -> Option<DMatrix<f64>> {
        let samples = self.matrices.get(regime)?;
        let first = samples.first()?;
        let sum = samples.iter().skip(1).fold(first.clone(), |acc, m| acc + m);
        Some(sum / samples.len() as f64)
    }
}

/// Reads the files named by `run`, drops the first `burn` fraction of the
/// generations found and keeps every `thin`-th of the rest.
///
/// A run that stopped early (fewer lines than `run.generations`) is read as
/// far as it got, provided every file has the same number of lines.
pub fn read_chain(run: &RunDescriptor, burn: f64, thin: usize) -> Result<Posterior> {
    if !(0.0..1.0).contains(&burn) {
        return Err(McmcError::config("burn fraction must lie in [0, 1)"));
    }
    if thin == 0 {
        return Err(McmcError::config("thin must be >= 1"));
    }
    let k = run.n_traits;
    let files = &run.files;

    let log_lik: Vec<f64> = read_rows(&files.loglik, 1)?
        .into_iter()
        .map(|row| row[0])
        .collect();
    let n = log_lik.len();
    if n > run.generations {
        return Err(McmcError::parse(
            &files.loglik,
            run.generations + 1,
            format!("more lines than the {} generations run", run.generations),
        ));
    }
    let roots = read_rows(&files.root, k)?;
    let matrices = files
        .matrices
        .iter()
        .map(|p| read_rows(p, k * k))
        .collect::<Result<Vec<_>>>()?;
    let log_lines = read_lines(&files.log)?.len();

    for (path, len) in std::iter::once((&files.root, roots.len()))
        .chain(files.matrices.iter().zip(matrices.iter().map(Vec::len)))
        .chain(std::iter::once((&files.log, log_lines)))
    {
        if len != n {
            return Err(McmcError::parse(
                path,
                len.min(n) + 1,
                format!("{len} lines, expected {n} as in the log-likelihood file"),
            ));
        }
    }

    let start = (burn * n as f64).floor() as usize;
    let keep: Vec<usize> = (start..n).step_by(thin).collect();
    Ok(Posterior {
        generations: keep.iter().map(|&i| i + 1).collect(),
        log_lik: keep.iter().map(|&i| log_lik[i]).collect(),
        roots: keep
            .iter()
            .map(|&i| DVector::from_column_slice(&roots[i]))
            .collect(),
        matrices: matrices
            .iter()
            .map(|rows| {
                keep.iter()
                    .map(|&i| DMatrix::from_row_slice(k, k, &rows[i]))
                    .collect()
            })
            .collect(),
    })
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| McmcError::io(path, e))?;
    Ok(text.lines().map(str::to_owned).collect())
}

/// Parses `;`-separated rows of exactly `width` numbers.
fn read_rows(path: &Path, width: usize) -> Result<Vec<Vec<f64>>> {
    read_lines(path)?
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let row = line
                .split(';')
                .map(|v| v.trim().parse::<f64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| McmcError::parse(path, i + 1, e.to_string()))?;
            if row.len() != width {
                return Err(McmcError::parse(
                    path,
                    i + 1,
                    format!("{} values, expected {width}", row.len()),
                ));
            }
            Ok(row)
        })
        .collect()
}
