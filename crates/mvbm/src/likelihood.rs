//! Pruning evaluator of the multivariate Brownian-motion tip likelihood.
//!
//! Model
//! - Edge `e` adds a `N(0, V_e)` increment with `V_e = Σ_r t(e, r) R_r`.
//! - Each subtree is summarised by a Gaussian message `(m, S)`: the tip mean
//!   and variance that the subtree's data imply for the subtree root, given
//!   everything below has been integrated out.
//!
//! Recursion (postorder)
//! - A tip sends `(x_tip, V_e)`; an internal node sends its combined message
//!   with `V_e` of its own edge added to the variance.
//! - Merging `(m₁, S₁)` and `(m₂, S₂)` contributes `ln N(m₁ − m₂; 0, S₁ + S₂)`
//!   and yields mean `m₁ + S₁ (S₁+S₂)⁻¹ (m₂ − m₁)`, variance
//!   `S₁ − S₁ (S₁+S₂)⁻¹ S₁`. Polytomies merge sequentially.
//! - At the root the combined message contributes `ln N(m; root, S)`.
//!
//! The product of contributions is the joint tip density, so the result does
//! not depend on the order siblings are merged in.
//!
//! Numerical policy: any non-SPD rate matrix or failed factorisation yields
//! `f64::NEG_INFINITY`; the evaluator never panics on bad parameters.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use crate::covariance::{chol_ln_det, is_positive_definite, symmetrize};
use crate::tree::{NodeKind, TraversalPlan};

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Gaussian summary of a subtree.
#[derive(Clone, Debug)]
struct Message {
    mean: DVector<f64>,
    var: DMatrix<f64>,
}

/// Log-likelihood of `data` (tips × traits, rows as indexed by
/// `plan.tip_rows`) under the given rate matrices and root vector.
pub fn log_likelihood(
    data: &DMatrix<f64>,
    plan: &TraversalPlan,
    matrices: &[DMatrix<f64>],
    root: &DVector<f64>,
) -> f64 {
    let k = root.len();
    if matrices.len() != plan.n_regimes()
        || data.ncols() != k
        || !matrices
            .iter()
            .all(|m| m.nrows() == k && is_positive_definite(m))
    {
        return f64::NEG_INFINITY;
    }
    match prune(data, plan, matrices, root) {
        Some(ll) if ll.is_finite() => ll,
        _ => f64::NEG_INFINITY,
    }
}

fn prune(
    data: &DMatrix<f64>,
    plan: &TraversalPlan,
    matrices: &[DMatrix<f64>],
    root: &DVector<f64>,
) -> Option<f64> {
    let mut cache: Vec<Option<Message>> = vec![None; plan.n_nodes];
    let mut ll = 0.0;
    let tip = |e: usize| Message {
        mean: data.row(plan.tip_rows[plan.des[e]]).transpose(),
        var: plan.edge_variance(e, matrices),
    };
    let below = |e: usize, cache: &mut Vec<Option<Message>>| {
        cache[plan.des[e]].take().map(|mut m| {
            m.var += plan.edge_variance(e, matrices);
            m
        })
    };

    for node in &plan.nodes {
        let messages: Vec<Message> = match node.kind {
            NodeKind::Tips => node.child_edges.iter().map(|&e| tip(e)).collect(),
            NodeKind::Nodes => node
                .child_edges
                .iter()
                .map(|&e| below(e, &mut cache))
                .collect::<Option<_>>()?,
            NodeKind::Mixed => node
                .child_edges
                .iter()
                .map(|&e| {
                    if plan.des[e] < plan.n_tips {
                        Some(tip(e))
                    } else {
                        below(e, &mut cache)
                    }
                })
                .collect::<Option<_>>()?,
        };
        let mut iter = messages.into_iter();
        let mut acc = iter.next()?;
        for next in iter {
            let (contrib, merged) = merge(acc, next)?;
            ll += contrib;
            acc = merged;
        }
        cache[node.node] = Some(acc);
    }

    let at_root = cache[plan.root].take()?;
    let chol = Cholesky::new(at_root.var)?;
    ll += ln_normal_centered(&(at_root.mean - root), &chol);
    Some(ll)
}

/// Merge two sibling messages; returns the contrast contribution and the
/// combined message.
fn merge(a: Message, b: Message) -> Option<(f64, Message)> {
    let chol = Cholesky::new(&a.var + &b.var)?;
    let diff = &b.mean - &a.mean;
    let contrib = ln_normal_centered(&diff, &chol);
    let mean = &a.mean + &a.var * chol.solve(&diff);
    let mut var = &a.var - &a.var * chol.solve(&a.var);
    symmetrize(&mut var);
    Some((contrib, Message { mean, var }))
}

/// `ln N(d; 0, S)` with `S` given by its Cholesky factor.
fn ln_normal_centered(d: &DVector<f64>, chol: &Cholesky<f64, Dyn>) -> f64 {
    let k = d.len() as f64;
    let quad = d.dot(&chol.solve(d));
    -0.5 * (k * LN_2PI + chol_ln_det(chol) + quad)
}
