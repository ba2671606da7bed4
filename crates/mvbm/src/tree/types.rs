//! Mapped phylogenies, tree samples and tip data.
//!
//! Node convention: tips are `0..n_tips`, internal nodes `n_tips..n_nodes`,
//! with `n_nodes = n_edges + 1`. The root is whichever internal node has no
//! parent.

use nalgebra::{DMatrix, DVector};
use std::collections::HashSet;

use crate::error::{McmcError, Result};

/// Rooted tree whose edges carry a per-regime partition of their length.
///
/// Invariants (checked by [`Phylogeny::new`]):
/// - exactly one root, every other node has exactly one parent;
/// - every node is reachable from the root (so the edges form a tree);
/// - tips have no children, internal nodes have at least one;
/// - `mapped` is `n_edges × n_regimes`, finite and non-negative.
#[derive(Clone, Debug)]
pub struct Phylogeny {
    /// `(parent, child)` pairs.
    pub edges: Vec<(usize, usize)>,
    /// Length of each edge spent in each regime.
    pub mapped: DMatrix<f64>,
    pub tip_labels: Vec<String>,
    pub regimes: Vec<String>,
    root: usize,
}

impl Phylogeny {
    pub fn new(
        edges: Vec<(usize, usize)>,
        mapped: DMatrix<f64>,
        tip_labels: Vec<String>,
        regimes: Vec<String>,
    ) -> Result<Self> {
        let root = validate(&edges, &mapped, &tip_labels, &regimes)?;
        Ok(Self {
            edges,
            mapped,
            tip_labels,
            regimes,
            root,
        })
    }

    /// Tree with a single regime named `"1"`.
    pub fn single_regime(
        edges: Vec<(usize, usize)>,
        lengths: &[f64],
        tip_labels: Vec<String>,
    ) -> Result<Self> {
        let mapped = DMatrix::from_column_slice(lengths.len(), 1, lengths);
        Self::new(edges, mapped, tip_labels, vec!["1".to_string()])
    }

    #[inline]
    pub fn n_tips(&self) -> usize {
        self.tip_labels.len()
    }

    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.edges.len() + 1
    }

    #[inline]
    pub fn n_regimes(&self) -> usize {
        self.regimes.len()
    }

    #[inline]
    pub fn root(&self) -> usize {
        self.root
    }

    /// Total length of each edge.
    pub fn edge_lengths(&self) -> Vec<f64> {
        self.mapped.row_iter().map(|r| r.sum()).collect()
    }

    /// Child lists indexed by node; entries are edge indices.
    pub(crate) fn child_edges(&self) -> Vec<Vec<usize>> {
        let mut children = vec![Vec::new(); self.n_nodes()];
        for (e, &(parent, _)) in self.edges.iter().enumerate() {
            children[parent].push(e);
        }
        children
    }
}

fn validate(
    edges: &[(usize, usize)],
    mapped: &DMatrix<f64>,
    tip_labels: &[String],
    regimes: &[String],
) -> Result<usize> {
    let n_tips = tip_labels.len();
    if n_tips == 0 || edges.is_empty() {
        return Err(McmcError::config("tree needs at least one tip and one edge"));
    }
    if regimes.is_empty() {
        return Err(McmcError::config("tree needs at least one regime"));
    }
    if mapped.nrows() != edges.len() || mapped.ncols() != regimes.len() {
        return Err(McmcError::config(format!(
            "regime mapping is {}x{}, expected {} edges x {} regimes",
            mapped.nrows(),
            mapped.ncols(),
            edges.len(),
            regimes.len()
        )));
    }
    if !mapped.iter().all(|&t| t.is_finite() && t >= 0.0) {
        return Err(McmcError::config(
            "mapped edge lengths must be finite and non-negative",
        ));
    }
    let mut seen = HashSet::with_capacity(n_tips);
    for label in tip_labels {
        if !seen.insert(label.as_str()) {
            return Err(McmcError::config(format!("duplicate tip label {label:?}")));
        }
    }

    let n_nodes = edges.len() + 1;
    if n_tips >= n_nodes {
        return Err(McmcError::config(format!(
            "{n_tips} tips cannot hang from {} edges",
            edges.len()
        )));
    }
    let mut parent = vec![None; n_nodes];
    let mut n_children = vec![0usize; n_nodes];
    for &(p, c) in edges {
        if p >= n_nodes || c >= n_nodes {
            return Err(McmcError::config(format!(
                "edge ({p}, {c}) references a node outside 0..{n_nodes}"
            )));
        }
        if p < n_tips {
            return Err(McmcError::config(format!(
                "tip {:?} has a child",
                tip_labels[p]
            )));
        }
        if parent[c].replace(p).is_some() {
            return Err(McmcError::config(format!("node {c} has two parents")));
        }
        n_children[p] += 1;
    }
    let roots: Vec<usize> = (0..n_nodes).filter(|&n| parent[n].is_none()).collect();
    let root = match roots.as_slice() {
        [r] => *r,
        [] => return Err(McmcError::config("tree has no root (cycle)")),
        _ => {
            return Err(McmcError::config(format!(
                "tree has {} roots; expected one",
                roots.len()
            )))
        }
    };
    if let Some(n) = (n_tips..n_nodes).find(|&n| n_children[n] == 0) {
        return Err(McmcError::config(format!(
            "internal node {n} has no children"
        )));
    }

    // Reachability from the root rules out cycles detached from it.
    let mut children = vec![Vec::new(); n_nodes];
    for &(p, c) in edges {
        children[p].push(c);
    }
    let mut reached = vec![false; n_nodes];
    let mut stack = vec![root];
    while let Some(n) = stack.pop() {
        if std::mem::replace(&mut reached[n], true) {
            continue;
        }
        stack.extend(children[n].iter().copied());
    }
    if let Some(n) = reached.iter().position(|r| !r) {
        return Err(McmcError::config(format!(
            "node {n} is not connected to the root"
        )));
    }
    Ok(root)
}

/// Ordered, non-empty collection of trees sharing tips and regimes.
#[derive(Clone, Debug)]
pub struct TreeSample {
    trees: Vec<Phylogeny>,
}

impl TreeSample {
    pub fn new(trees: Vec<Phylogeny>) -> Result<Self> {
        let first = trees
            .first()
            .ok_or_else(|| McmcError::config("tree sample is empty"))?;
        let labels: HashSet<&str> = first.tip_labels.iter().map(String::as_str).collect();
        for (i, t) in trees.iter().enumerate().skip(1) {
            let other: HashSet<&str> = t.tip_labels.iter().map(String::as_str).collect();
            if other != labels {
                return Err(McmcError::config(format!(
                    "tree {} has different tip labels than tree 1",
                    i + 1
                )));
            }
            if t.regimes != first.regimes {
                return Err(McmcError::config(format!(
                    "tree {} maps different regimes than tree 1",
                    i + 1
                )));
            }
        }
        Ok(Self { trees })
    }

    pub fn single(tree: Phylogeny) -> Self {
        Self { trees: vec![tree] }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Phylogeny> {
        self.trees.get(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Phylogeny> {
        self.trees.iter()
    }

    pub fn regimes(&self) -> &[String] {
        &self.trees[0].regimes
    }

    pub fn n_regimes(&self) -> usize {
        self.trees[0].n_regimes()
    }
}

/// Tip trait values: one labelled row per tip, one column per trait.
#[derive(Clone, Debug)]
pub struct TraitData {
    pub labels: Vec<String>,
    pub traits: Vec<String>,
    pub values: DMatrix<f64>,
}

impl TraitData {
    pub fn new(labels: Vec<String>, traits: Vec<String>, values: DMatrix<f64>) -> Result<Self> {
        if values.nrows() != labels.len() || values.ncols() != traits.len() {
            return Err(McmcError::dimension(format!(
                "data matrix is {}x{}, labels give {} tips x {} traits",
                values.nrows(),
                values.ncols(),
                labels.len(),
                traits.len()
            )));
        }
        if traits.is_empty() {
            return Err(McmcError::config("data has no traits"));
        }
        if !values.iter().all(|x| x.is_finite()) {
            return Err(McmcError::config("data contain non-finite values"));
        }
        let mut seen = HashSet::with_capacity(labels.len());
        for label in &labels {
            if !seen.insert(label.as_str()) {
                return Err(McmcError::config(format!("duplicate data label {label:?}")));
            }
        }
        Ok(Self {
            labels,
            traits,
            values,
        })
    }

    #[inline]
    pub fn n_tips(&self) -> usize {
        self.values.nrows()
    }

    #[inline]
    pub fn n_traits(&self) -> usize {
        self.values.ncols()
    }

    pub fn row(&self, i: usize) -> DVector<f64> {
        self.values.row(i).transpose()
    }
}
