//! JSON run and simulation files.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use mvbm::api::{McmcConfig, Params, Phylogeny, RootMode, RootPrior, SdPrior, StdPrior};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

fn default_label_column() -> String {
    "species".to_string()
}

fn default_eta() -> f64 {
    1.0
}

/// `cli run --config run.json`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RunFile {
    /// CSV of trait values, relative to the run file.
    pub data: PathBuf,
    #[serde(default = "default_label_column")]
    pub label_column: String,
    /// Columns to use; all but the label column when absent.
    #[serde(default)]
    pub traits: Option<Vec<String>>,
    pub trees: Vec<TreeSpec>,
    pub prior: PriorSpec,
    #[serde(default)]
    pub mcmc: McmcSpec,
    #[serde(default)]
    pub start: Option<MatrixSet>,
}

/// `cli simulate --config sim.json`. Either `tree` or `n_tips` (coalescent).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SimFile {
    #[serde(default)]
    pub tree: Option<TreeSpec>,
    #[serde(default)]
    pub n_tips: Option<usize>,
    pub traits: Vec<String>,
    pub params: MatrixSet,
    #[serde(default = "default_label_column")]
    pub label_column: String,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Mapped tree as an edge list; tips are nodes `0..tips.len()`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TreeSpec {
    pub edges: Vec<[usize; 2]>,
    /// One row per edge: time spent in each regime.
    pub mapped: Vec<Vec<f64>>,
    pub tips: Vec<String>,
    #[serde(default)]
    pub regimes: Option<Vec<String>>,
}

impl TreeSpec {
    pub fn to_phylogeny(&self) -> Result<Phylogeny> {
        let n_regimes = self.mapped.first().map_or(0, Vec::len);
        if self.mapped.iter().any(|row| row.len() != n_regimes) {
            bail!("mapped rows have different lengths");
        }
        let regimes = self
            .regimes
            .clone()
            .unwrap_or_else(|| (1..=n_regimes).map(|i| i.to_string()).collect());
        let mapped = DMatrix::from_fn(self.mapped.len(), n_regimes, |i, r| self.mapped[i][r]);
        let edges = self.edges.iter().map(|&[p, c]| (p, c)).collect();
        Ok(Phylogeny::new(edges, mapped, self.tips.clone(), regimes)?)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(tag = "dist", rename_all = "snake_case")]
pub enum RootPriorSpec {
    Uniform { min: f64, max: f64 },
    Normal { mean: f64, sd: f64 },
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(tag = "dist", rename_all = "snake_case")]
pub enum SdPriorSpec {
    Uniform { min: f64, max: f64 },
    LogNormal { meanlog: f64, sdlog: f64 },
    Exponential { rate: f64 },
}

/// A single entry applies to every trait.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PriorSpec {
    pub root: Vec<RootPriorSpec>,
    pub sd: Vec<SdPriorSpec>,
    #[serde(default = "default_eta")]
    pub eta: f64,
}

impl PriorSpec {
    pub fn to_prior(&self, n_traits: usize, n_regimes: usize) -> Result<StdPrior> {
        let root = broadcast(&self.root, n_traits, "root")?
            .into_iter()
            .map(|p| match p {
                RootPriorSpec::Uniform { min, max } => RootPrior::Uniform { min, max },
                RootPriorSpec::Normal { mean, sd } => RootPrior::Normal { mean, sd },
            })
            .collect();
        let sd = broadcast(&self.sd, n_traits, "sd")?
            .into_iter()
            .map(|p| match p {
                SdPriorSpec::Uniform { min, max } => SdPrior::Uniform { min, max },
                SdPriorSpec::LogNormal { meanlog, sdlog } => SdPrior::LogNormal { meanlog, sdlog },
                SdPriorSpec::Exponential { rate } => SdPrior::Exponential { rate },
            })
            .collect();
        Ok(StdPrior::new(root, sd, self.eta, n_regimes)?)
    }
}

fn broadcast<T: Copy>(items: &[T], n: usize, what: &str) -> Result<Vec<T>> {
    match items.len() {
        1 => Ok(vec![items[0]; n]),
        len if len == n => Ok(items.to_vec()),
        len => bail!("{what} prior has {len} entries for {n} traits"),
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RootModeSpec {
    PerTrait,
    #[default]
    Joint,
    DataCorrelated,
}

impl From<RootModeSpec> for RootMode {
    fn from(m: RootModeSpec) -> Self {
        match m {
            RootModeSpec::PerTrait => RootMode::PerTrait,
            RootModeSpec::Joint => RootMode::Joint,
            RootModeSpec::DataCorrelated => RootMode::DataCorrelated,
        }
    }
}

/// MCMC settings; every field is optional and defaults as in `McmcConfig`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct McmcSpec {
    pub gen: usize,
    pub chunk: usize,
    pub w_sd: f64,
    pub w_mu: f64,
    pub v: f64,
    pub prop_root: f64,
    pub prop_sd: f64,
    pub root_mode: RootModeSpec,
    pub dir: PathBuf,
    pub outname: String,
    pub id_len: usize,
    pub log_every: usize,
    pub seed: Option<u64>,
}

impl Default for McmcSpec {
    fn default() -> Self {
        let d = McmcConfig::default();
        Self {
            gen: d.gen,
            chunk: d.chunk,
            w_sd: d.w_sd,
            w_mu: d.w_mu,
            v: d.v,
            prop_root: d.prop_root,
            prop_sd: d.prop_sd,
            root_mode: RootModeSpec::default(),
            dir: d.dir,
            outname: d.outname,
            id_len: d.id_len,
            log_every: d.log_every,
            seed: d.seed,
        }
    }
}

impl From<McmcSpec> for McmcConfig {
    fn from(s: McmcSpec) -> Self {
        Self {
            gen: s.gen,
            chunk: s.chunk,
            w_sd: s.w_sd,
            w_mu: s.w_mu,
            v: s.v,
            prop_root: s.prop_root,
            prop_sd: s.prop_sd,
            root_mode: s.root_mode.into(),
            dir: s.dir,
            outname: s.outname,
            id_len: s.id_len,
            log_every: s.log_every,
            seed: s.seed,
        }
    }
}

/// Root vector and rate matrices (row-major nested arrays).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MatrixSet {
    pub root: Vec<f64>,
    pub matrices: Vec<Vec<Vec<f64>>>,
}

impl MatrixSet {
    pub fn to_params(&self) -> Result<Params> {
        let k = self.root.len();
        let matrices = self
            .matrices
            .iter()
            .enumerate()
            .map(|(i, rows)| {
                if rows.len() != k || rows.iter().any(|r| r.len() != k) {
                    bail!("matrix {} is not {k}x{k}", i + 1);
                }
                Ok(DMatrix::from_fn(k, k, |r, c| rows[r][c]))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Params::new(DVector::from_vec(self.root.clone()), matrices))
    }

    pub fn from_params(params: &Params) -> Self {
        Self {
            root: params.root.iter().copied().collect(),
            matrices: params
                .matrices
                .iter()
                .map(|m| {
                    m.row_iter()
                        .map(|row| row.iter().copied().collect())
                        .collect()
                })
                .collect(),
        }
    }
}

pub fn load<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

/// `path` as given if absolute, else relative to the directory of `base`.
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    base.parent()
        .map(|dir| dir.join(path))
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn matrix_set_from_params_is_row_major() {
        let params = Params::new(
            DVector::from_vec(vec![1.0, 2.0]),
            vec![DMatrix::from_row_slice(2, 2, &[1.0, 0.25, 0.5, 3.0])],
        );
        let set = MatrixSet::from_params(&params);
        assert_eq!(set.root, vec![1.0, 2.0]);
        assert_eq!(set.matrices[0], vec![vec![1.0, 0.25], vec![0.5, 3.0]]);
        assert_eq!(set.to_params().unwrap(), params);
    }

    fn cherry() -> serde_json::Value {
        json!({
            "edges": [[2, 0], [2, 1]],
            "mapped": [[1.0, 0.5], [1.5, 0.0]],
            "tips": ["a", "b"],
            "regimes": ["low", "high"]
        })
    }

    #[test]
    fn run_file_defaults_follow_config() {
        let file: RunFile = serde_json::from_value(json!({
            "data": "traits.csv",
            "trees": [cherry()],
            "prior": {
                "root": [{"dist": "uniform", "min": -5.0, "max": 5.0}],
                "sd": [{"dist": "exponential", "rate": 1.0}]
            },
            "mcmc": {"gen": 500, "root_mode": "data_correlated"}
        }))
        .unwrap();
        assert_eq!(file.label_column, "species");
        assert_eq!(file.prior.eta, 1.0);
        let cfg: McmcConfig = file.mcmc.into();
        assert_eq!(cfg.gen, 500);
        assert_eq!(cfg.chunk, McmcConfig::default().chunk);
        assert_eq!(cfg.root_mode, RootMode::DataCorrelated);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_json::from_value::<McmcSpec>(json!({"generations": 10}));
        assert!(err.is_err());
    }

    #[test]
    fn tree_spec_builds_mapped_phylogeny() {
        let spec: TreeSpec = serde_json::from_value(cherry()).unwrap();
        let tree = spec.to_phylogeny().unwrap();
        assert_eq!(tree.n_regimes(), 2);
        assert_eq!(tree.edge_lengths(), vec![1.5, 1.5]);

        let unnamed: TreeSpec = serde_json::from_value(json!({
            "edges": [[2, 0], [2, 1]],
            "mapped": [[1.0], [1.0]],
            "tips": ["a", "b"]
        }))
        .unwrap();
        assert_eq!(unnamed.to_phylogeny().unwrap().regimes, vec!["1".to_string()]);

        let ragged = TreeSpec {
            mapped: vec![vec![1.0, 0.0], vec![1.0]],
            ..spec
        };
        assert!(ragged.to_phylogeny().is_err());
    }

    #[test]
    fn prior_entries_broadcast_or_match_traits() {
        let spec: PriorSpec = serde_json::from_value(json!({
            "root": [{"dist": "normal", "mean": 0.0, "sd": 2.0}],
            "sd": [
                {"dist": "uniform", "min": 0.0, "max": 4.0},
                {"dist": "log_normal", "meanlog": 0.0, "sdlog": 1.0}
            ],
            "eta": 2.0
        }))
        .unwrap();
        let prior = spec.to_prior(2, 3).unwrap();
        assert_eq!(prior.root.len(), 2);
        assert_eq!(prior.n_regimes, 3);
        assert!(spec.to_prior(3, 1).is_err());
    }

    #[test]
    fn matrix_set_checks_shapes() {
        let ok = MatrixSet {
            root: vec![0.0, 1.0],
            matrices: vec![vec![vec![1.0, 0.2], vec![0.2, 1.0]]],
        };
        let params = ok.to_params().unwrap();
        assert_eq!(params.matrices[0][(0, 1)], 0.2);
        let bad = MatrixSet {
            root: vec![0.0, 1.0],
            matrices: vec![vec![vec![1.0, 0.2]]],
        };
        assert!(bad.to_params().is_err());
    }

    #[test]
    fn relative_paths_resolve_against_run_file() {
        let base = Path::new("/runs/exp1/run.json");
        assert_eq!(
            resolve(base, Path::new("data.csv")),
            Path::new("/runs/exp1/data.csv")
        );
        assert_eq!(resolve(base, Path::new("/abs.csv")), Path::new("/abs.csv"));
    }
}
