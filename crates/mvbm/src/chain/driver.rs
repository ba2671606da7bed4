//! Metropolis–Hastings driver.

use std::fs;
use std::path::PathBuf;

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use super::buffer::ChunkBuffer;
use super::state::{ChainState, Snapshot};
use super::writer::{ChainFiles, ChainWriter};
use crate::config::McmcConfig;
use crate::error::{McmcError, Result};
use crate::params::Params;
use crate::prior::Prior;
use crate::proposal::{Block, Candidate, MatrixProposal, RootProposal};
use crate::tree::{build_plans, TraitData, TraversalPlan, TreeSample};

/// Where the chain starts.
#[derive(Clone, Debug)]
pub enum Start {
    Given(Params),
    /// Draw from [`Prior::sample`] with the chain's RNG.
    FromPrior,
}

/// Everything needed to find and reload the output of a run.
#[derive(Clone, Debug)]
pub struct RunDescriptor {
    pub id: String,
    pub dir: PathBuf,
    pub outname: String,
    pub n_regimes: usize,
    pub n_traits: usize,
    pub traits: Vec<String>,
    pub regimes: Vec<String>,
    pub generations: usize,
    pub chunk: usize,
    /// Acceptance outcome per generation; the first is the starting state.
    pub accepted: Vec<bool>,
    /// Block label proposed at each generation (`start` for the first).
    pub blocks: Vec<String>,
    /// Active tree (0-based) per generation, only for samples of several trees.
    pub active_trees: Option<Vec<usize>>,
    pub files: ChainFiles,
}

impl RunDescriptor {
    /// Fraction of proposals accepted, the starting state excluded.
    pub fn acceptance_ratio(&self) -> f64 {
        acceptance(&self.accepted)
    }
}

/// Finished run: the descriptor, the inputs the chain was fitted to, the
/// starting parameters (drawn ones included) and the final state.
#[derive(Clone, Debug)]
pub struct Run<P: Prior> {
    pub descriptor: RunDescriptor,
    pub data: TraitData,
    pub trees: TreeSample,
    pub prior: P,
    pub start: Params,
    pub last: ChainState,
}

/// A configured chain, ready to run.
#[derive(Debug)]
pub struct Mcmc<P: Prior> {
    data: TraitData,
    trees: TreeSample,
    plans: Vec<TraversalPlan>,
    prior: P,
    start: Params,
    cfg: McmcConfig,
    root_proposal: RootProposal,
    matrix_proposal: MatrixProposal,
    rng: StdRng,
    state: ChainState,
    id: String,
    writer: ChainWriter,
}

impl<P: Prior> Mcmc<P> {
    /// Validates inputs, builds one traversal plan per tree, creates the
    /// output directory and files and evaluates the starting state.
    pub fn new(
        data: TraitData,
        trees: TreeSample,
        prior: P,
        start: Start,
        cfg: McmcConfig,
    ) -> Result<Self> {
        let k = data.n_traits();
        let p = trees.n_regimes();
        cfg.validate_for(k)?;
        let plans = build_plans(&trees, &data)?;

        let mut rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let params = match start {
            Start::Given(params) => params,
            Start::FromPrior => prior.sample(&mut rng),
        };
        params.validate(k, p)?;
        let state = ChainState::evaluate(params.clone(), 0, &data.values, &plans[0], &prior);
        if !state.log_lik.is_finite() {
            return Err(McmcError::invalid_state(
                "log-likelihood of the starting state is not finite",
            ));
        }
        if !state.log_posterior().is_finite() {
            return Err(McmcError::invalid_state(
                "starting state lies outside the prior support",
            ));
        }

        fs::create_dir_all(&cfg.dir).map_err(|e| {
            McmcError::config(format!(
                "cannot create output directory {}: {e}",
                cfg.dir.display()
            ))
        })?;
        let id = run_id(cfg.id_len);
        let files = ChainFiles::new(&cfg.dir, &cfg.outname, &id, p);
        let writer = ChainWriter::create(files)
            .map_err(|e| McmcError::config(format!("cannot write chain files: {e}")))?;

        Ok(Self {
            root_proposal: RootProposal::new(cfg.root_mode, cfg.w_mu, &data.values),
            matrix_proposal: MatrixProposal::new(cfg.w_sd, cfg.v, cfg.prop_sd, k)?,
            data,
            trees,
            plans,
            prior,
            start: params,
            cfg,
            rng,
            state,
            id,
            writer,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &ChainState {
        &self.state
    }

    /// Parameters of generation 1.
    pub fn start(&self) -> &Params {
        &self.start
    }

    pub fn files(&self) -> &ChainFiles {
        self.writer.files()
    }

    /// Runs exactly `gen` generations, streaming them to disk every `chunk`.
    /// A write failure aborts the run; chunks already flushed stay on disk.
    pub fn run(mut self) -> Result<Run<P>> {
        let gen = self.cfg.gen;
        let several_trees = self.plans.len() > 1;
        info!(
            id = %self.id,
            gen,
            chunk = self.cfg.chunk,
            trees = self.plans.len(),
            traits = self.data.n_traits(),
            regimes = self.trees.n_regimes(),
            "starting chain"
        );

        let mut buffer = ChunkBuffer::new(self.cfg.chunk.min(gen));
        let mut accepted = Vec::with_capacity(gen);
        let mut blocks = Vec::with_capacity(gen);
        let mut active_trees = several_trees.then(|| Vec::with_capacity(gen));

        for generation in 1..=gen {
            let (block, ok) = if generation == 1 {
                (None, true)
            } else {
                let (block, ok) = self.step();
                (Some(block), ok)
            };
            let snapshot = Snapshot::of(&self.state, generation, block, ok);
            accepted.push(ok);
            blocks.push(snapshot.block_label());
            if let Some(t) = active_trees.as_mut() {
                t.push(self.state.tree);
            }
            buffer.push(snapshot);
            if buffer.is_full() {
                self.flush(&mut buffer)?;
            }
            if generation % self.cfg.log_every == 0 {
                info!(
                    generation,
                    acceptance = acceptance(&accepted),
                    log_lik = self.state.log_lik,
                    "progress"
                );
            }
        }
        if !buffer.pending().is_empty() {
            self.flush(&mut buffer)?;
        }

        let descriptor = RunDescriptor {
            id: self.id.clone(),
            dir: self.cfg.dir.clone(),
            outname: self.cfg.outname.clone(),
            n_regimes: self.trees.n_regimes(),
            n_traits: self.data.n_traits(),
            traits: self.data.traits.clone(),
            regimes: self.trees.regimes().to_vec(),
            generations: gen,
            chunk: self.cfg.chunk,
            accepted,
            blocks,
            active_trees,
            files: self.writer.files().clone(),
        };
        info!(
            id = %descriptor.id,
            acceptance = descriptor.acceptance_ratio(),
            "chain finished"
        );
        Ok(Run {
            descriptor,
            data: self.data,
            trees: self.trees,
            prior: self.prior,
            start: self.start,
            last: self.state,
        })
    }

    fn flush(&mut self, buffer: &mut ChunkBuffer) -> Result<()> {
        let pending = buffer.pending();
        if let (Some(first), Some(last)) = (pending.first(), pending.last()) {
            debug!(from = first.generation, to = last.generation, "flushing chunk");
        }
        self.writer.write_chunk(pending)?;
        buffer.reset();
        Ok(())
    }

    /// One generation: propose, pick a tree, accept or reject.
    pub(crate) fn step(&mut self) -> (Block, bool) {
        let candidate = if self.rng.gen::<f64>() < self.cfg.prop_root {
            self.root_proposal.propose(&self.state.params, &mut self.rng)
        } else {
            self.matrix_proposal.propose(&self.state.params, &mut self.rng)
        };
        let tree = if self.plans.len() > 1 {
            self.rng.gen_range(0..self.plans.len())
        } else {
            0
        };
        let block = candidate.block;
        (block, self.consider(candidate, tree))
    }

    /// MH decision for `candidate` on tree `tree`. Candidates with a
    /// non-finite target or Hastings term are rejected without a draw.
    pub(crate) fn consider(&mut self, candidate: Candidate, tree: usize) -> bool {
        if !candidate.log_hastings.is_finite() {
            return false;
        }
        let log_hastings = candidate.log_hastings;
        let proposed = self.state.with_candidate(
            candidate,
            tree,
            &self.data.values,
            &self.plans[tree],
            &self.prior,
        );
        let target = proposed.log_posterior();
        if !target.is_finite() {
            return false;
        }
        let log_alpha = target - self.state.log_posterior() + log_hastings;
        if self.rng.gen::<f64>().ln() < log_alpha {
            self.state = proposed;
            true
        } else {
            false
        }
    }
}

fn acceptance(accepted: &[bool]) -> f64 {
    if accepted.len() < 2 {
        return 0.0;
    }
    let n = accepted[1..].iter().filter(|&&a| a).count();
    n as f64 / (accepted.len() - 1) as f64
}

/// Random alphanumeric run identifier. Drawn from the thread RNG so seeded
/// chains still get distinct file names.
fn run_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
