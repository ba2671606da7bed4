//! Driver, persistence and reader tests.

use std::fs;
use std::path::Path;

use nalgebra::{dmatrix, dvector, DMatrix};
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::*;
use crate::config::{McmcConfig, RootMode};
use crate::error::McmcError;
use crate::params::Params;
use crate::prior::StdPrior;
use crate::proposal::{Block, Candidate, MatrixProposal};
use crate::simulate::simulate_data;
use crate::tree::tests::{five_tip_data, five_tip_params, five_tip_tree, five_tip_tree_reordered};
use crate::tree::{coalescent_tree, TraversalPlan, TreeSample};

fn config(dir: &Path, gen: usize, chunk: usize) -> McmcConfig {
    McmcConfig {
        gen,
        chunk,
        dir: dir.to_path_buf(),
        seed: Some(42),
        v: 10.0,
        ..Default::default()
    }
}

fn prior() -> StdPrior {
    StdPrior::uniform(2, 2, (-10.0, 10.0), (0.01, 10.0)).unwrap()
}

fn chain(cfg: McmcConfig) -> Mcmc<StdPrior> {
    Mcmc::new(
        five_tip_data(),
        TreeSample::single(five_tip_tree()),
        prior(),
        Start::Given(five_tip_params()),
        cfg,
    )
    .unwrap()
}

fn line_count(path: &Path) -> usize {
    fs::read_to_string(path).unwrap().lines().count()
}

fn snapshot(generation: usize) -> Snapshot {
    Snapshot {
        generation,
        block: None,
        accepted: true,
        log_lik: 0.0,
        tree: 0,
        root: dvector![0.0],
        matrices: vec![DMatrix::identity(1, 1)],
    }
}

#[test]
fn chunk_buffer_retains_last_snapshot_after_reset() {
    let mut buf = ChunkBuffer::new(3);
    for g in 1..=3 {
        assert!(!buf.is_full());
        buf.push(snapshot(g));
    }
    assert!(buf.is_full());
    assert_eq!(buf.pending().len(), 3);
    buf.reset();
    assert_eq!(buf.len(), 1);
    assert!(buf.pending().is_empty());
    assert_eq!(buf.last().map(|s| s.generation), Some(3));
    for g in 4..=6 {
        buf.push(snapshot(g));
    }
    assert!(buf.is_full());
    let gens: Vec<usize> = buf.pending().iter().map(|s| s.generation).collect();
    assert_eq!(gens, vec![4, 5, 6]);
}

#[test]
fn chunk_buffer_does_not_reserve_its_capacity() {
    let mut buf = ChunkBuffer::new(usize::MAX);
    for g in 1..=4 {
        buf.push(snapshot(g));
    }
    assert!(!buf.is_full());
    assert_eq!(buf.pending().len(), 4);
}

#[test]
fn chunk_larger_than_run_writes_once() {
    let dir = tempfile::tempdir().unwrap();
    for chunk in [1_000_000_000, usize::MAX] {
        let run = chain(config(dir.path(), 5, chunk)).run().unwrap();
        assert_eq!(run.descriptor.chunk, chunk);
        for path in run.descriptor.files.all() {
            assert_eq!(line_count(path), 5, "{}", path.display());
        }
    }
}

#[test]
fn writer_removes_its_files_when_a_later_one_exists() {
    let dir = tempfile::tempdir().unwrap();
    let files = ChainFiles::new(dir.path(), "mcmc", "Taken12345", 2);
    fs::write(&files.matrices[1], "kept\n").unwrap();
    let err = ChainWriter::create(files.clone()).unwrap_err();
    assert!(matches!(err, McmcError::Io { ref path, .. } if *path == files.matrices[1]), "{err}");
    assert!(!files.loglik.exists());
    assert!(!files.root.exists());
    assert!(!files.matrices[0].exists());
    assert!(!files.log.exists());
    assert_eq!(fs::read_to_string(&files.matrices[1]).unwrap(), "kept\n");
}

#[test]
fn every_file_has_one_line_per_generation() {
    for (gen, chunk) in [(1, 1), (20, 1), (20, 3), (20, 7), (20, 20), (20, 50)] {
        let dir = tempfile::tempdir().unwrap();
        let run = chain(config(dir.path(), gen, chunk)).run().unwrap();
        let files = &run.descriptor.files;
        assert_eq!(files.matrices.len(), 2);
        for path in files.all() {
            assert_eq!(line_count(path), gen, "{} (chunk {chunk})", path.display());
        }
        let gens: Vec<usize> = fs::read_to_string(&files.log)
            .unwrap()
            .lines()
            .map(|l| l.split(';').next().unwrap().parse().unwrap())
            .collect();
        assert_eq!(gens, (1..=gen).collect::<Vec<_>>());
    }
}

#[test]
fn acceptance_record_starts_with_the_initial_state() {
    let dir = tempfile::tempdir().unwrap();
    let run = chain(config(dir.path(), 200, 64)).run().unwrap();
    let d = &run.descriptor;
    assert_eq!(d.accepted.len(), 200);
    assert_eq!(d.blocks.len(), 200);
    assert!(d.accepted[0]);
    assert_eq!(d.blocks[0], "start");
    assert!(d.active_trees.is_none());
    assert_eq!(d.id.len(), 10);
    assert!(d.id.chars().all(|c| c.is_ascii_alphanumeric()));
    let ratio = d.acceptance_ratio();
    assert!(ratio > 0.0 && ratio < 1.0, "acceptance {ratio}");
    assert!(d.blocks.iter().any(|b| b == "root"));
    assert!(d.blocks.iter().any(|b| b.starts_with("sd.")));
    assert!(d.blocks.iter().any(|b| b.starts_with("corr.")));
}

#[test]
fn non_positive_definite_candidate_is_always_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut mcmc = chain(config(dir.path(), 10, 10));
    let before = mcmc.state().params.clone();
    let mut params = before.clone();
    params.matrices[0] = dmatrix![1.0, 3.0; 3.0, 1.0];
    for _ in 0..100 {
        let candidate = Candidate {
            block: Block::Correlation(0),
            params: params.clone(),
            log_hastings: 50.0,
        };
        assert!(!mcmc.consider(candidate, 0));
    }
    assert_eq!(mcmc.state().params, before);

    let degenerate = Candidate {
        block: Block::Root,
        params: before.clone(),
        log_hastings: f64::NEG_INFINITY,
    };
    assert!(!mcmc.consider(degenerate, 0));
}

#[test]
fn candidate_outside_prior_support_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut mcmc = chain(config(dir.path(), 10, 10));
    let mut params = mcmc.state().params.clone();
    params.root[0] = 50.0;
    let candidate = Candidate {
        block: Block::Root,
        params,
        log_hastings: 0.0,
    };
    assert!(!mcmc.consider(candidate, 0));
}

#[test]
fn cached_terms_follow_accepted_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let data = five_tip_data();
    let mut mcmc = chain(config(dir.path(), 10, 10));
    for _ in 0..300 {
        mcmc.step();
    }
    let s = mcmc.state();
    let plan = TraversalPlan::build(&five_tip_tree(), &data).unwrap();
    let fresh = ChainState::evaluate(s.params.clone(), 0, &data.values, &plan, &prior());
    assert!((fresh.log_posterior() - s.log_posterior()).abs() < 1e-9);
    assert_eq!(fresh.jacobians, s.jacobians);
}

#[test]
fn reader_round_trips_persisted_chain() {
    let dir = tempfile::tempdir().unwrap();
    let run = chain(config(dir.path(), 30, 7)).run().unwrap();
    let post = read_chain(&run.descriptor, 0.0, 1).unwrap();
    assert_eq!(post.len(), 30);
    assert_eq!(post.generations.first(), Some(&1));
    assert_eq!(post.roots.last(), Some(&run.last.params.root));
    assert_eq!(post.log_lik.last(), Some(&run.last.log_lik));
    for r in 0..2 {
        assert_eq!(post.matrices[r].last(), Some(&run.last.params.matrices[r]));
        assert_eq!(post.matrices[r][0], five_tip_params().matrices[r]);
    }

    let thinned = read_chain(&run.descriptor, 0.5, 4).unwrap();
    assert_eq!(thinned.generations, vec![16, 20, 24, 28]);
    assert!(thinned.mean_root().is_some());
    assert!(thinned.mean_matrix(1).is_some());
    assert!(thinned.mean_matrix(2).is_none());
}

#[test]
fn reader_accepts_truncated_runs_but_not_ragged_files() {
    let dir = tempfile::tempdir().unwrap();
    let run = chain(config(dir.path(), 12, 5)).run().unwrap();
    let files = run.descriptor.files.clone();
    let drop_last_line = |p: &Path| {
        let text = fs::read_to_string(p).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        lines.pop();
        fs::write(p, lines.join("\n") + "\n").unwrap();
    };

    drop_last_line(&files.root);
    let err = read_chain(&run.descriptor, 0.0, 1).unwrap_err();
    assert!(matches!(err, McmcError::Parse { .. }), "{err}");

    for p in files.all() {
        if p != files.root.as_path() {
            drop_last_line(p);
        }
    }
    assert_eq!(read_chain(&run.descriptor, 0.0, 1).unwrap().len(), 11);

    fs::write(&files.loglik, "oops\n".repeat(11)).unwrap();
    let err = read_chain(&run.descriptor, 0.0, 1).unwrap_err();
    assert!(matches!(err, McmcError::Parse { line: 1, .. }), "{err}");
}

#[test]
fn seeded_chains_are_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let a = chain(config(dir.path(), 50, 8)).run().unwrap();
    let b = chain(config(dir.path(), 50, 8)).run().unwrap();
    assert_ne!(a.descriptor.id, b.descriptor.id);
    assert_eq!(a.descriptor.accepted, b.descriptor.accepted);
    assert_eq!(
        fs::read_to_string(&a.descriptor.files.loglik).unwrap(),
        fs::read_to_string(&b.descriptor.files.loglik).unwrap()
    );
}

#[test]
fn tree_sample_records_active_tree() {
    let dir = tempfile::tempdir().unwrap();
    let trees = TreeSample::new(vec![five_tip_tree(), five_tip_tree_reordered()]).unwrap();
    let cfg = McmcConfig {
        root_mode: RootMode::PerTrait,
        ..config(dir.path(), 100, 30)
    };
    let run = Mcmc::new(
        five_tip_data(),
        trees,
        prior(),
        Start::Given(five_tip_params()),
        cfg,
    )
    .unwrap()
    .run()
    .unwrap();
    let trees = run.descriptor.active_trees.as_ref().unwrap();
    assert_eq!(trees.len(), 100);
    assert_eq!(trees[0], 0);
    assert!(trees.iter().all(|&t| t < 2));
    assert!(trees.contains(&1));
    let log = fs::read_to_string(&run.descriptor.files.log).unwrap();
    let logged: Vec<usize> = log
        .lines()
        .map(|l| l.rsplit(';').next().unwrap().parse::<usize>().unwrap() - 1)
        .collect();
    assert_eq!(&logged, trees);
}

#[test]
fn setup_errors_are_classified() {
    let dir = tempfile::tempdir().unwrap();
    let new = |data, start, cfg| {
        Mcmc::new(data, TreeSample::single(five_tip_tree()), prior(), start, cfg)
    };

    let small_v = McmcConfig {
        v: 2.5,
        ..config(dir.path(), 10, 10)
    };
    let err = new(five_tip_data(), Start::Given(five_tip_params()), small_v).unwrap_err();
    assert!(matches!(err, McmcError::Config { .. }));

    let mut data = five_tip_data();
    data.labels[2] = "X".into();
    let err = new(data, Start::Given(five_tip_params()), config(dir.path(), 10, 10)).unwrap_err();
    assert!(matches!(err, McmcError::Config { .. }));

    let mut bad = five_tip_params();
    bad.matrices[0] = dmatrix![1.0, 2.0; 2.0, 1.0];
    let err = new(five_tip_data(), Start::Given(bad), config(dir.path(), 10, 10)).unwrap_err();
    assert!(matches!(err, McmcError::InvalidState { .. }));

    let short = Params::new(dvector![0.0], five_tip_params().matrices);
    let err = new(five_tip_data(), Start::Given(short), config(dir.path(), 10, 10)).unwrap_err();
    assert!(matches!(err, McmcError::Dimension { .. }));

    let mut outside = five_tip_params();
    outside.root[1] = 99.0;
    let err = new(five_tip_data(), Start::Given(outside), config(dir.path(), 10, 10)).unwrap_err();
    assert!(matches!(err, McmcError::InvalidState { .. }));
}

#[test]
fn output_directory_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    let run = chain(config(&nested, 5, 2)).run().unwrap();
    assert!(run.descriptor.files.loglik.starts_with(&nested));
    assert_eq!(line_count(&run.descriptor.files.loglik), 5);
}

#[test]
fn start_from_prior_is_valid() {
    let dir = tempfile::tempdir().unwrap();
    let run = Mcmc::new(
        five_tip_data(),
        TreeSample::single(five_tip_tree()),
        prior(),
        Start::FromPrior,
        McmcConfig {
            root_mode: RootMode::DataCorrelated,
            ..config(dir.path(), 20, 20)
        },
    )
    .unwrap()
    .run()
    .unwrap();
    assert!(run.last.log_posterior().is_finite());
}

#[test]
fn run_returns_inputs_and_drawn_start() {
    let dir = tempfile::tempdir().unwrap();
    let mcmc = Mcmc::new(
        five_tip_data(),
        TreeSample::single(five_tip_tree()),
        prior(),
        Start::FromPrior,
        config(dir.path(), 15, 4),
    )
    .unwrap();
    let drawn = mcmc.start().clone();
    let run = mcmc.run().unwrap();
    assert_eq!(run.start, drawn);
    assert!(run.start.validate(2, 2).is_ok());
    assert_eq!(run.data.labels, five_tip_data().labels);
    assert_eq!(run.data.values, five_tip_data().values);
    assert_eq!(run.trees.len(), 1);
    assert_eq!(run.trees.regimes(), run.descriptor.regimes.as_slice());
    assert_eq!(run.prior.n_traits(), 2);

    let post = read_chain(&run.descriptor, 0.0, 1).unwrap();
    assert_eq!(post.roots[0], run.start.root);
    for r in 0..2 {
        assert_eq!(post.matrices[r][0], run.start.matrices[r]);
    }

    let given = chain(config(dir.path(), 3, 3)).run().unwrap();
    assert_eq!(given.start, five_tip_params());
}

/// Matrix moves with the likelihood left out of the acceptance ratio: the
/// cached prior and Jacobian terms must reproduce the prior. Uniform sds on
/// (0.5, 2) and a flat LKJ on two traits give `E[σ₁] = 1.25`, `E[r] = 0` and
/// `E[r²] = 1/3`.
#[test]
fn prior_only_chain_recovers_prior_moments() {
    let data = five_tip_data();
    let plan = TraversalPlan::build(&five_tip_tree(), &data).unwrap();
    let prior = StdPrior::uniform(2, 2, (-10.0, 10.0), (0.5, 2.0)).unwrap();
    let proposal = MatrixProposal::new(0.8, 12.0, 0.5, 2).unwrap();
    let mut rng = StdRng::seed_from_u64(17);
    let start = Params::new(
        dvector![0.0, 0.0],
        vec![dmatrix![1.0, 0.2; 0.2, 1.0], dmatrix![1.0, 0.0; 0.0, 1.0]],
    );
    let mut state = ChainState::evaluate(start, 0, &data.values, &plan, &prior);
    let target = |s: &ChainState| s.log_posterior() - s.log_lik;

    let (burn, n) = (4_000, 80_000);
    let (mut sd1, mut r1, mut r2) = (0.0, 0.0, 0.0);
    for i in 0..(burn + n) {
        let c = proposal.propose(&state.params, &mut rng);
        let log_hastings = c.log_hastings;
        if log_hastings.is_finite() {
            let next = state.with_candidate(c, 0, &data.values, &plan, &prior);
            let log_alpha = target(&next) - target(&state) + log_hastings;
            if target(&next).is_finite() && rng.gen::<f64>().ln() < log_alpha {
                state = next;
            }
        }
        if i >= burn {
            let m = &state.params.matrices[0];
            let r = m[(0, 1)] / (m[(0, 0)] * m[(1, 1)]).sqrt();
            sd1 += m[(0, 0)].sqrt();
            r1 += r;
            r2 += r * r;
        }
    }
    let n = n as f64;
    let (sd1, r1, r2) = (sd1 / n, r1 / n, r2 / n);
    assert!((sd1 - 1.25).abs() < 0.05, "E[sd1] = {sd1}");
    assert!(r1.abs() < 0.05, "E[r] = {r1}");
    assert!((r2 - 1.0 / 3.0).abs() < 0.04, "E[r²] = {r2}");
}

#[test]
fn posterior_means_recover_simulating_parameters() {
    let mut rng = StdRng::seed_from_u64(2024);
    let tree = coalescent_tree(150, &mut rng).unwrap();
    let truth = Params::new(dvector![0.5, -0.5], vec![dmatrix![1.0, 0.5; 0.5, 2.0]]);
    let data = simulate_data(&tree, vec!["x".into(), "y".into()], &truth, &mut rng).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let cfg = McmcConfig {
        gen: 6_000,
        chunk: 500,
        w_sd: 0.3,
        w_mu: 1.0,
        v: 150.0,
        seed: Some(11),
        dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let start = Params::new(dvector![0.0, 0.0], vec![DMatrix::identity(2, 2)]);
    let run = Mcmc::new(
        data,
        TreeSample::single(tree),
        StdPrior::uniform(2, 1, (-10.0, 10.0), (0.01, 10.0)).unwrap(),
        Start::Given(start),
        cfg,
    )
    .unwrap()
    .run()
    .unwrap();

    let post = read_chain(&run.descriptor, 0.3, 1).unwrap();
    let mean = post.mean_matrix(0).unwrap();
    let want = &truth.matrices[0];
    for i in 0..2 {
        let rel = (mean[(i, i)] - want[(i, i)]).abs() / want[(i, i)];
        assert!(rel < 0.4, "posterior mean {mean} vs {want}");
    }
    let corr = mean[(0, 1)] / (mean[(0, 0)] * mean[(1, 1)]).sqrt();
    let want_corr = 0.5 / 2f64.sqrt();
    assert!((corr - want_corr).abs() < 0.25, "correlation {corr}");
}
