mod provenance;
mod runfile;
mod table;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mvbm::api::{
    coalescent_tree, read_chain, simulate_data, Mcmc, McmcConfig, Phylogeny, Start, TreeSample,
};
use rand::{rngs::StdRng, SeedableRng};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::SubscriberBuilder;

use provenance::{read_descriptor, write_sidecar, DescriptorDoc, Payload};
use runfile::{load, resolve, MatrixSet, RunFile, SimFile};

#[derive(Parser)]
#[command(name = "cli")]
#[command(about = "Rate-matrix MCMC on mapped phylogenies")]
struct Cmd {
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Run one chain described by a JSON run file
    Run {
        #[arg(long)]
        config: PathBuf,
        /// Overrides `mcmc.dir` of the run file
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Overrides `mcmc.seed` of the run file
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Simulate tip data under given parameters and write a CSV
    Simulate {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Reload a finished chain and print posterior means as JSON
    Report {
        #[arg(long)]
        descriptor: PathBuf,
        #[arg(long, default_value_t = 0.25)]
        burn: f64,
        #[arg(long, default_value_t = 1)]
        thin: usize,
    },
}

fn main() -> Result<()> {
    SubscriberBuilder::default().with_target(false).init();
    let cmd = Cmd::parse();
    match cmd.action {
        Action::Run {
            config,
            out_dir,
            seed,
        } => {
            let prov = run(&config, out_dir, seed)?;
            println!("{}", prov.display());
            Ok(())
        }
        Action::Simulate { config, out } => simulate(&config, &out),
        Action::Report {
            descriptor,
            burn,
            thin,
        } => {
            let summary = report(&descriptor, burn, thin)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}

/// Runs the chain and returns the path of its provenance sidecar.
fn run(config: &Path, out_dir: Option<PathBuf>, seed: Option<u64>) -> Result<PathBuf> {
    let file: RunFile = load(config)?;
    let data_path = resolve(config, &file.data);
    tracing::info!(config = %config.display(), data = %data_path.display(), "run");

    let data = table::read_traits(&data_path, &file.label_column, file.traits.as_deref())?;
    let trees = file
        .trees
        .iter()
        .enumerate()
        .map(|(i, t)| t.to_phylogeny().with_context(|| format!("tree {}", i + 1)))
        .collect::<Result<Vec<Phylogeny>>>()?;
    let trees = TreeSample::new(trees)?;
    let prior = file.prior.to_prior(data.n_traits(), trees.n_regimes())?;
    let start = match &file.start {
        Some(s) => Start::Given(s.to_params().context("start")?),
        None => Start::FromPrior,
    };

    let mut cfg: McmcConfig = file.mcmc.clone().into();
    if let Some(dir) = out_dir {
        cfg.dir = dir;
    } else if cfg.dir.is_relative() {
        cfg.dir = resolve(config, &cfg.dir);
    }
    if seed.is_some() {
        cfg.seed = seed;
    }

    let chain = Mcmc::new(data, trees, prior, start, cfg).context("setting up chain")?;
    let outcome = chain.run().context("running chain")?;
    let d = &outcome.descriptor;
    tracing::info!(id = %d.id, acceptance = d.acceptance_ratio(), "run_done");

    let mut payload = Payload::new("run", serde_json::to_value(&file)?);
    payload.outputs = d.files.all().iter().map(|p| p.to_path_buf()).collect();
    payload.run = Some(DescriptorDoc {
        start: Some(MatrixSet::from_params(&outcome.start)),
        ..DescriptorDoc::from(d)
    });
    write_sidecar(&d.files.loglik, payload)
}

fn simulate(config: &Path, out: &Path) -> Result<()> {
    let file: SimFile = load(config)?;
    tracing::info!(config = %config.display(), out = %out.display(), "simulate");
    let mut rng = match file.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let tree = match (&file.tree, file.n_tips) {
        (Some(t), None) => t.to_phylogeny()?,
        (None, Some(n)) => coalescent_tree(n, &mut rng)?,
        _ => bail!("give exactly one of `tree` or `n_tips`"),
    };
    let params = file.params.to_params()?;
    let data = simulate_data(&tree, file.traits.clone(), &params, &mut rng)?;
    table::write_traits(out, &file.label_column, &data)?;
    write_sidecar(out, Payload::new("simulate", serde_json::to_value(&file)?))?;
    Ok(())
}

fn report(descriptor: &Path, burn: f64, thin: usize) -> Result<serde_json::Value> {
    let d = read_descriptor(descriptor)?;
    let post = read_chain(&d, burn, thin).context("reading chain")?;
    tracing::info!(id = %d.id, samples = post.len(), "report");
    let root = post
        .mean_root()
        .map(|r| r.iter().copied().collect::<Vec<f64>>());
    let matrices: Vec<Option<Vec<Vec<f64>>>> = (0..d.n_regimes)
        .map(|r| {
            post.mean_matrix(r).map(|m| {
                m.row_iter()
                    .map(|row| row.iter().copied().collect())
                    .collect()
            })
        })
        .collect();
    Ok(json!({
        "id": d.id,
        "samples": post.len(),
        "burn": burn,
        "thin": thin,
        "acceptance_ratio": d.acceptance_ratio(),
        "traits": d.traits,
        "regimes": d.regimes,
        "mean_root": root,
        "mean_matrices": matrices,
    }))
}
