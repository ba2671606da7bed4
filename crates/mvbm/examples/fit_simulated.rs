//! Fit one chain to data simulated on a coalescent tree.
//!
//! Purpose
//! - Show the full path: tree, simulated tips, prior, chain, reload, summary.
//! - Give a quick sanity check that posterior means land near the truth.
//!
//! Run with `cargo run --release -p mvbm --example fit_simulated`.

use std::time::Instant;

use mvbm::api::{
    coalescent_tree, read_chain, simulate_data, Mcmc, McmcConfig, Params, Start, StdPrior,
    TreeSample,
};
use nalgebra::{dmatrix, dvector};
use rand::{rngs::StdRng, SeedableRng};

fn main() -> mvbm::Result<()> {
    let mut rng = StdRng::seed_from_u64(1);
    let tree = coalescent_tree(100, &mut rng)?;
    let truth = Params::new(
        dvector![1.0, 0.0, -1.0],
        vec![dmatrix![
            1.0, 0.4, 0.0;
            0.4, 0.8, -0.3;
            0.0, -0.3, 1.5
        ]],
    );
    let traits = ["a", "b", "c"].map(String::from).to_vec();
    let data = simulate_data(&tree, traits, &truth, &mut rng)?;

    let dir = std::env::temp_dir().join("mvbm-fit-simulated");
    let cfg = McmcConfig {
        gen: 20_000,
        chunk: 2_000,
        v: 120.0,
        w_sd: 0.3,
        seed: Some(3),
        dir,
        ..Default::default()
    };
    let prior = StdPrior::uniform(3, 1, (-10.0, 10.0), (0.01, 10.0))?;

    let start = Instant::now();
    let run = Mcmc::new(data, TreeSample::single(tree), prior, Start::FromPrior, cfg)?.run()?;
    let elapsed = start.elapsed().as_secs_f64();

    let post = read_chain(&run.descriptor, 0.25, 5)?;
    println!("run {} in {elapsed:.2}s", run.descriptor.id);
    println!("acceptance: {:.3}", run.descriptor.acceptance_ratio());
    if let (Some(root), Some(rate)) = (post.mean_root(), post.mean_matrix(0)) {
        println!("posterior mean root: {}", root.transpose());
        println!("posterior mean rate matrix:{rate}");
        println!("simulating rate matrix:{}", truth.matrices[0]);
    }
    Ok(())
}
