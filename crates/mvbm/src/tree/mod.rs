//! Tree traversal preprocessor.
//!
//! Purpose
//! - Hold mapped phylogenies (edge lists with per-regime length partitions),
//!   tree samples and tip data.
//! - Turn each tree into an immutable `TraversalPlan` (postorder edges,
//!   ancestor/descendant arrays, node kinds, regime-by-edge lengths) computed
//!   once at setup and shared by reference with every likelihood call.
//!
//! Tree parsing and regime painting happen upstream; this module only
//! validates what it is given.

mod build;
mod plan;
mod types;

pub use build::coalescent_tree;
pub use plan::{build_plans, NodeKind, PlanNode, TraversalPlan};
pub use types::{Phylogeny, TraitData, TreeSample};
