//! Append-only chain files, one per quantity.
//!
//! Layout (`;`-separated, one generation per line, no header)
//! - `<out>.<id>.loglik`: log-likelihood.
//! - `<out>.<id>.root`: root vector.
//! - `<out>.<id>.<i>.matrix`: rate matrix of regime `i` (1-based), row-major.
//! - `<out>.<id>.mcmc.log`: `generation;block;accepted;log_lik;tree`.

use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::state::Snapshot;
use crate::error::{McmcError, Result};

/// Paths of every file of one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainFiles {
    pub loglik: PathBuf,
    pub root: PathBuf,
    pub matrices: Vec<PathBuf>,
    pub log: PathBuf,
}

impl ChainFiles {
    pub fn new(dir: &Path, outname: &str, id: &str, n_regimes: usize) -> Self {
        let path = |suffix: &str| dir.join(format!("{outname}.{id}.{suffix}"));
        Self {
            loglik: path("loglik"),
            root: path("root"),
            matrices: (1..=n_regimes)
                .map(|i| path(&format!("{i}.matrix")))
                .collect(),
            log: path("mcmc.log"),
        }
    }

    pub fn all(&self) -> Vec<&Path> {
        let mut out = vec![self.loglik.as_path(), self.root.as_path()];
        out.extend(self.matrices.iter().map(PathBuf::as_path));
        out.push(self.log.as_path());
        out
    }
}

/// Owns the open handles; they close when the writer is dropped.
#[derive(Debug)]
pub struct ChainWriter {
    files: ChainFiles,
    loglik: File,
    root: File,
    matrices: Vec<File>,
    log: File,
}

impl ChainWriter {
    /// Creates every file; fails if any already exists. On failure the files
    /// this call created are removed again.
    pub fn create(files: ChainFiles) -> Result<Self> {
        let mut created = Vec::new();
        match open_all(&files, &mut created) {
            Ok((loglik, root, matrices, log)) => Ok(Self {
                files,
                loglik,
                root,
                matrices,
                log,
            }),
            Err(e) => {
                for path in &created {
                    let _ = fs::remove_file(path);
                }
                Err(e)
            }
        }
    }

    pub fn files(&self) -> &ChainFiles {
        &self.files
    }

    /// Appends `entries` with one write per file.
    pub fn write_chunk(&mut self, entries: &[Snapshot]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut loglik = String::new();
        let mut root = String::new();
        let mut matrices = vec![String::new(); self.matrices.len()];
        let mut log = String::new();
        for s in entries {
            let _ = writeln!(loglik, "{}", s.log_lik);
            let _ = writeln!(root, "{}", join(s.root.iter()));
            for (buf, m) in matrices.iter_mut().zip(&s.matrices) {
                // nalgebra stores column-major; transpose for row-major order.
                let _ = writeln!(buf, "{}", join(m.transpose().iter()));
            }
            let _ = writeln!(
                log,
                "{};{};{};{};{}",
                s.generation,
                s.block_label(),
                s.accepted,
                s.log_lik,
                s.tree + 1
            );
        }
        write_all(&mut self.loglik, &self.files.loglik, &loglik)?;
        write_all(&mut self.root, &self.files.root, &root)?;
        for ((file, path), buf) in self
            .matrices
            .iter_mut()
            .zip(&self.files.matrices)
            .zip(&matrices)
        {
            write_all(file, path, buf)?;
        }
        write_all(&mut self.log, &self.files.log, &log)?;
        Ok(())
    }
}

fn write_all(file: &mut File, path: &Path, text: &str) -> Result<()> {
    file.write_all(text.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| McmcError::io(path, e))
}

fn join<'a>(values: impl Iterator<Item = &'a f64>) -> String {
    values
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

type Handles = (File, File, Vec<File>, File);

fn open_all(files: &ChainFiles, created: &mut Vec<PathBuf>) -> Result<Handles> {
    let loglik = open_new(&files.loglik, created)?;
    let root = open_new(&files.root, created)?;
    let matrices = files
        .matrices
        .iter()
        .map(|p| open_new(p, created))
        .collect::<Result<_>>()?;
    let log = open_new(&files.log, created)?;
    Ok((loglik, root, matrices, log))
}

/// Opens `path` for appending, failing if it exists; records it in `created`.
fn open_new(path: &Path, created: &mut Vec<PathBuf>) -> Result<File> {
    let file = OpenOptions::new()
        .append(true)
        .create_new(true)
        .open(path)
        .map_err(|e| McmcError::io(path, e))?;
    created.push(path.to_path_buf());
    Ok(file)
}
