//! Error type shared by the whole crate.
//!
//! Numerical degeneracy during a run (non-positive-definite candidates,
//! non-finite likelihoods) is never an error: the driver rejects the
//! proposal. Errors are reserved for setup problems and I/O.

use std::fmt;
use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, McmcError>;

#[derive(Debug)]
pub enum McmcError {
    /// Bad tree, data/tree mismatch, invalid settings, unusable output dir.
    Config { reason: String },
    /// Sizes of data, parameters or trees disagree.
    Dimension { reason: String },
    /// Starting parameters outside the model's support.
    InvalidState { reason: String },
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Malformed persisted chain file.
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

impl McmcError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub(crate) fn dimension(reason: impl Into<String>) -> Self {
        Self::Dimension {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn parse(path: &Path, line: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.to_path_buf(),
            line,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for McmcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "invalid configuration: {reason}"),
            Self::Dimension { reason } => write!(f, "dimension mismatch: {reason}"),
            Self::InvalidState { reason } => write!(f, "invalid chain state: {reason}"),
            Self::Io { path, source } => write!(f, "i/o error on {}: {source}", path.display()),
            Self::Parse { path, line, reason } => {
                write!(f, "malformed {} at line {line}: {reason}", path.display())
            }
        }
    }
}

impl std::error::Error for McmcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
