//! Traversal plans: the immutable per-tree artifact consumed by the
//! likelihood evaluator and the simulator.

use nalgebra::DMatrix;
use std::collections::HashMap;

use super::types::{Phylogeny, TraitData, TreeSample};
use crate::error::{McmcError, Result};

/// What an internal node's immediate children are.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Tips,
    Nodes,
    Mixed,
}

/// Internal node with its child edges (indices into the plan's postorder
/// edge arrays).
#[derive(Clone, Debug)]
pub struct PlanNode {
    pub node: usize,
    pub kind: NodeKind,
    pub child_edges: Vec<usize>,
}

/// Postorder view of one mapped tree.
///
/// Invariants:
/// - `anc[e] → des[e]` is edge `e` of the postorder; each edge appears after
///   every edge below it.
/// - `nodes` lists internal nodes children-first; the root is last.
/// - `lengths` has one row per postorder edge and one column per regime.
/// - `tip_rows[t]` is the data row holding tip `t`.
#[derive(Clone, Debug)]
pub struct TraversalPlan {
    pub n_tips: usize,
    pub n_nodes: usize,
    pub root: usize,
    pub anc: Vec<usize>,
    pub des: Vec<usize>,
    pub lengths: DMatrix<f64>,
    pub nodes: Vec<PlanNode>,
    pub tip_rows: Vec<usize>,
}

impl TraversalPlan {
    /// Plan whose tips are matched by label against the rows of `data`.
    pub fn build(tree: &Phylogeny, data: &TraitData) -> Result<Self> {
        let tip_rows = match_tips(&tree.tip_labels, &data.labels)?;
        let plan = Self::with_tip_rows(tree, tip_rows);
        if let Some(e) = (0..plan.des.len())
            .find(|&e| plan.des[e] < plan.n_tips && plan.lengths.row(e).sum() <= 0.0)
        {
            return Err(McmcError::config(format!(
                "terminal edge of tip {:?} has zero length",
                tree.tip_labels[plan.des[e]]
            )));
        }
        Ok(plan)
    }

    /// Plan with tip `t` mapped to row `t` (used for simulation).
    pub fn from_tree(tree: &Phylogeny) -> Self {
        Self::with_tip_rows(tree, (0..tree.n_tips()).collect())
    }

    fn with_tip_rows(tree: &Phylogeny, tip_rows: Vec<usize>) -> Self {
        let n_tips = tree.n_tips();
        let children = tree.child_edges();
        let order = postorder_edges(tree, &children);

        // Position of each original edge in the postorder arrays.
        let mut position = vec![0usize; tree.edges.len()];
        for (pos, &e) in order.iter().enumerate() {
            position[e] = pos;
        }
        let anc: Vec<usize> = order.iter().map(|&e| tree.edges[e].0).collect();
        let des: Vec<usize> = order.iter().map(|&e| tree.edges[e].1).collect();
        let lengths = DMatrix::from_fn(order.len(), tree.n_regimes(), |i, r| {
            tree.mapped[(order[i], r)]
        });

        // An internal node is complete once its last child edge is visited;
        // appending it then keeps `nodes` children-first.
        let mut nodes = Vec::with_capacity(tree.n_nodes() - n_tips);
        let mut remaining: Vec<usize> = children.iter().map(Vec::len).collect();
        for &e in &order {
            let parent = tree.edges[e].0;
            remaining[parent] -= 1;
            if remaining[parent] == 0 {
                let child_edges: Vec<usize> =
                    children[parent].iter().map(|&c| position[c]).collect();
                let n_tip_children = child_edges.iter().filter(|&&c| des[c] < n_tips).count();
                let kind = if n_tip_children == child_edges.len() {
                    NodeKind::Tips
                } else if n_tip_children == 0 {
                    NodeKind::Nodes
                } else {
                    NodeKind::Mixed
                };
                nodes.push(PlanNode {
                    node: parent,
                    kind,
                    child_edges,
                });
            }
        }

        Self {
            n_tips,
            n_nodes: tree.n_nodes(),
            root: tree.root(),
            anc,
            des,
            lengths,
            nodes,
            tip_rows,
        }
    }

    #[inline]
    pub fn n_regimes(&self) -> usize {
        self.lengths.ncols()
    }

    #[inline]
    pub fn n_edges(&self) -> usize {
        self.des.len()
    }

    /// `V_e = Σ_r t(e, r) · R_r`: regimes sharing an edge contribute in
    /// proportion to the length mapped to them.
    pub fn edge_variance(&self, e: usize, matrices: &[DMatrix<f64>]) -> DMatrix<f64> {
        let k = matrices[0].nrows();
        let mut v = DMatrix::<f64>::zeros(k, k);
        for (r, m) in matrices.iter().enumerate() {
            let t = self.lengths[(e, r)];
            if t > 0.0 {
                v += m * t;
            }
        }
        v
    }
}

/// One plan per tree of the sample, in sample order.
pub fn build_plans(sample: &TreeSample, data: &TraitData) -> Result<Vec<TraversalPlan>> {
    sample
        .iter()
        .enumerate()
        .map(|(i, t)| {
            TraversalPlan::build(t, data).map_err(|err| match err {
                McmcError::Config { reason } if sample.len() > 1 => {
                    McmcError::config(format!("tree {}: {reason}", i + 1))
                }
                other => other,
            })
        })
        .collect()
}

/// Iterative postorder over edges from the root.
fn postorder_edges(tree: &Phylogeny, children: &[Vec<usize>]) -> Vec<usize> {
    let mut order = Vec::with_capacity(tree.edges.len());
    // (node, edge into node, children expanded?)
    let mut stack: Vec<(usize, Option<usize>, bool)> = vec![(tree.root(), None, false)];
    while let Some((node, edge, expanded)) = stack.pop() {
        if expanded {
            if let Some(e) = edge {
                order.push(e);
            }
            continue;
        }
        stack.push((node, edge, true));
        for &c in children[node].iter().rev() {
            stack.push((tree.edges[c].1, Some(c), false));
        }
    }
    order
}

/// `tip_rows[t]` = data row of tree tip `t`; the label sets must coincide.
fn match_tips(tree_labels: &[String], data_labels: &[String]) -> Result<Vec<usize>> {
    let index: HashMap<&str, usize> = data_labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect();
    let missing: Vec<&str> = tree_labels
        .iter()
        .filter(|l| !index.contains_key(l.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(McmcError::config(format!(
            "tips without data: {}",
            preview(&missing)
        )));
    }
    if data_labels.len() != tree_labels.len() {
        let in_tree: std::collections::HashSet<&str> =
            tree_labels.iter().map(String::as_str).collect();
        let extra: Vec<&str> = data_labels
            .iter()
            .map(String::as_str)
            .filter(|l| !in_tree.contains(l))
            .collect();
        return Err(McmcError::config(format!(
            "data rows not in the tree: {}",
            preview(&extra)
        )));
    }
    Ok(tree_labels.iter().map(|l| index[l.as_str()]).collect())
}

fn preview(labels: &[&str]) -> String {
    const SHOWN: usize = 5;
    let mut s = labels
        .iter()
        .take(SHOWN)
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    if labels.len() > SHOWN {
        s.push_str(&format!(" (+{} more)", labels.len() - SHOWN));
    }
    s
}
