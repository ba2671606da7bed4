//! Tip data drawn exactly under the model.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::covariance::cholesky;
use crate::error::{McmcError, Result};
use crate::params::Params;
use crate::tree::{Phylogeny, TraitData, TraversalPlan};

/// Walks `plan` root-to-tips adding `N(0, V_e)` increments. Row `tip_rows[t]`
/// of the result holds tip `t`.
pub fn simulate_tips<R: Rng + ?Sized>(
    plan: &TraversalPlan,
    params: &Params,
    rng: &mut R,
) -> Result<DMatrix<f64>> {
    let k = params.n_traits();
    params.validate(k, plan.n_regimes())?;
    let mut values: Vec<Option<DVector<f64>>> = vec![None; plan.n_nodes];
    values[plan.root] = Some(params.root.clone());

    // Reversed postorder visits parents before children.
    for e in (0..plan.n_edges()).rev() {
        let parent = values[plan.anc[e]]
            .clone()
            .ok_or_else(|| McmcError::invalid_state(format!("node {} not reached", plan.anc[e])))?;
        let var = plan.edge_variance(e, &params.matrices);
        let value = if var.iter().all(|&x| x == 0.0) {
            parent
        } else {
            let l = cholesky(&var)
                .ok_or_else(|| McmcError::invalid_state("edge variance is not positive-definite"))?
                .unpack();
            let z = DVector::<f64>::from_fn(k, |_, _| rng.sample(StandardNormal));
            parent + l * z
        };
        values[plan.des[e]] = Some(value);
    }

    let mut out = DMatrix::<f64>::zeros(plan.n_tips, k);
    for t in 0..plan.n_tips {
        let v = values[t]
            .as_ref()
            .ok_or_else(|| McmcError::invalid_state(format!("tip {t} not reached")))?;
        out.set_row(plan.tip_rows[t], &v.transpose());
    }
    Ok(out)
}

/// Simulated [`TraitData`] labelled by the tree's tips, in tip order.
pub fn simulate_data<R: Rng + ?Sized>(
    tree: &Phylogeny,
    traits: Vec<String>,
    params: &Params,
    rng: &mut R,
) -> Result<TraitData> {
    if traits.len() != params.n_traits() {
        return Err(McmcError::dimension(format!(
            "{} trait names for {} traits",
            traits.len(),
            params.n_traits()
        )));
    }
    let plan = TraversalPlan::from_tree(tree);
    let values = simulate_tips(&plan, params, rng)?;
    TraitData::new(tree.tip_labels.clone(), traits, values)
}
