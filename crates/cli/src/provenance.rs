//! Provenance sidecars: `<artifact>.provenance.json`.
//!
//! A run's sidecar also carries the full run descriptor, so `cli report`
//! can reload the chain from it alone.

use anyhow::{Context, Result};
use mvbm::api::{ChainFiles, RunDescriptor};

use crate::runfile::MatrixSet;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::ffi::OsString;
use std::fs;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Metadata used to generate a provenance sidecar.
pub struct Payload {
    pub command: String,
    pub params: Value,
    pub outputs: Vec<PathBuf>,
    pub run: Option<DescriptorDoc>,
}

impl Payload {
    pub fn new(command: impl Into<String>, params: Value) -> Self {
        Self {
            command: command.into(),
            params,
            outputs: Vec::new(),
            run: None,
        }
    }
}

/// Serialisable mirror of [`RunDescriptor`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct DescriptorDoc {
    pub id: String,
    pub dir: PathBuf,
    pub outname: String,
    pub n_regimes: usize,
    pub n_traits: usize,
    pub traits: Vec<String>,
    pub regimes: Vec<String>,
    pub generations: usize,
    pub chunk: usize,
    pub acceptance_ratio: f64,
    pub accepted: Vec<bool>,
    pub blocks: Vec<String>,
    #[serde(default)]
    pub active_trees: Option<Vec<usize>>,
    pub files: FilesDoc,
    /// Parameters of generation 1.
    #[serde(default)]
    pub start: Option<MatrixSet>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct FilesDoc {
    pub loglik: PathBuf,
    pub root: PathBuf,
    pub matrices: Vec<PathBuf>,
    pub log: PathBuf,
}

impl From<&RunDescriptor> for DescriptorDoc {
    fn from(d: &RunDescriptor) -> Self {
        Self {
            id: d.id.clone(),
            dir: d.dir.clone(),
            outname: d.outname.clone(),
            n_regimes: d.n_regimes,
            n_traits: d.n_traits,
            traits: d.traits.clone(),
            regimes: d.regimes.clone(),
            generations: d.generations,
            chunk: d.chunk,
            acceptance_ratio: d.acceptance_ratio(),
            accepted: d.accepted.clone(),
            blocks: d.blocks.clone(),
            active_trees: d.active_trees.clone(),
            files: FilesDoc {
                loglik: d.files.loglik.clone(),
                root: d.files.root.clone(),
                matrices: d.files.matrices.clone(),
                log: d.files.log.clone(),
            },
            start: None,
        }
    }
}

impl From<DescriptorDoc> for RunDescriptor {
    fn from(d: DescriptorDoc) -> Self {
        Self {
            id: d.id,
            dir: d.dir,
            outname: d.outname,
            n_regimes: d.n_regimes,
            n_traits: d.n_traits,
            traits: d.traits,
            regimes: d.regimes,
            generations: d.generations,
            chunk: d.chunk,
            accepted: d.accepted,
            blocks: d.blocks,
            active_trees: d.active_trees,
            files: ChainFiles {
                loglik: d.files.loglik,
                root: d.files.root,
                matrices: d.files.matrices,
                log: d.files.log,
            },
        }
    }
}

/// Write `<artifact>.provenance.json` containing the git commit, callsite,
/// command, params, outputs and (for runs) the descriptor.
#[track_caller]
pub fn write_sidecar<P: AsRef<Path>>(artifact: P, payload: Payload) -> Result<PathBuf> {
    let artifact = artifact.as_ref();
    let provenance_path = provenance_path(artifact);
    if let Some(parent) = provenance_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating provenance dir {}", parent.display()))?;
        }
    }

    let callsite = Location::caller();
    let mut outputs = payload.outputs;
    if outputs.is_empty() {
        outputs.push(artifact.to_path_buf());
    }
    let doc = json!({
        "code_rev": current_git_rev(),
        "mvbm_version": mvbm::VERSION,
        "callsite": {
            "file": callsite.file(),
            "line": callsite.line()
        },
        "command": payload.command,
        "params": payload.params,
        "outputs": outputs,
        "run": payload.run,
    });
    fs::write(&provenance_path, serde_json::to_vec_pretty(&doc)?)
        .with_context(|| format!("writing {}", provenance_path.display()))?;
    Ok(provenance_path)
}

/// Reads the run descriptor back from a sidecar.
pub fn read_descriptor(path: &Path) -> Result<RunDescriptor> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let doc: Value =
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?;
    let run = doc
        .get("run")
        .filter(|v| !v.is_null())
        .cloned()
        .with_context(|| format!("{} does not describe a chain run", path.display()))?;
    let run: DescriptorDoc = serde_json::from_value(run)
        .with_context(|| format!("parsing run descriptor in {}", path.display()))?;
    Ok(run.into())
}

fn provenance_path(artifact: &Path) -> PathBuf {
    let stem = artifact
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| OsString::from("artifact"));
    let mut name = stem;
    name.push(".provenance.json");
    artifact.with_file_name(name)
}

pub fn current_git_rev() -> String {
    if let Some(from_env) = option_env!("GIT_COMMIT") {
        if !from_env.is_empty() {
            return from_env.to_string();
        }
    }
    if let Ok(env_override) = std::env::var("GIT_COMMIT") {
        if !env_override.is_empty() {
            return env_override;
        }
    }
    Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                String::from_utf8(output.stdout)
                    .ok()
                    .map(|s| s.trim().to_string())
            } else {
                None
            }
        })
        .unwrap_or_else(|| "unknown".to_string())
}
