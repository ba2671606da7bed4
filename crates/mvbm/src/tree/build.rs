//! Random ultrametric trees for simulation studies and benchmarks.

use rand::Rng;
use rand_distr::{Distribution, Exp};

use super::types::Phylogeny;
use crate::error::{McmcError, Result};

/// Kingman-coalescent tree with `n_tips` tips labelled `t1..tn` and a single
/// regime. Internal nodes are numbered in merge order, so the root is the
/// last node.
pub fn coalescent_tree<R: Rng + ?Sized>(n_tips: usize, rng: &mut R) -> Result<Phylogeny> {
    if n_tips < 2 {
        return Err(McmcError::config("a coalescent tree needs at least two tips"));
    }
    let mut lineages: Vec<usize> = (0..n_tips).collect();
    let mut height = vec![0.0; 2 * n_tips - 1];
    let mut edges = Vec::with_capacity(2 * n_tips - 2);
    let mut lengths = Vec::with_capacity(2 * n_tips - 2);
    let mut t = 0.0;
    let mut next = n_tips;
    while lineages.len() > 1 {
        let m = lineages.len() as f64;
        let rate = 0.5 * m * (m - 1.0);
        let wait = Exp::new(rate).map_err(|e| McmcError::config(e.to_string()))?;
        t += wait.sample(rng);
        let a = lineages.swap_remove(rng.gen_range(0..lineages.len()));
        let b = lineages.swap_remove(rng.gen_range(0..lineages.len()));
        height[next] = t;
        for child in [a, b] {
            edges.push((next, child));
            lengths.push(t - height[child]);
        }
        lineages.push(next);
        next += 1;
    }
    let labels = (1..=n_tips).map(|i| format!("t{i}")).collect();
    Phylogeny::single_regime(edges, &lengths, labels)
}
