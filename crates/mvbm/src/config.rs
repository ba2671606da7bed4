//! Run configuration for the MCMC driver.

use std::path::PathBuf;

use crate::error::{McmcError, Result};

/// How the root vector is perturbed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RootMode {
    /// One trait per proposal, chosen uniformly.
    PerTrait,
    /// Every trait moves in the same proposal, each with its own window draw.
    #[default]
    Joint,
    /// Joint normal draw shaped by the correlation of the tip data.
    DataCorrelated,
}

/// Settings of a single chain.
#[derive(Clone, Debug)]
pub struct McmcConfig {
    /// Total generations, the starting state included.
    pub gen: usize,
    /// Generations held in memory between flushes.
    pub chunk: usize,
    /// Window width of the log-sd proposal.
    pub w_sd: f64,
    /// Window width of the root proposal.
    pub w_mu: f64,
    /// Degrees of freedom of the inverse-Wishart matrix proposal. Must exceed k + 1.
    pub v: f64,
    /// Probability that a generation updates the root (else a rate matrix).
    pub prop_root: f64,
    /// Probability that a matrix update moves the sd component (else correlation).
    pub prop_sd: f64,
    pub root_mode: RootMode,
    pub dir: PathBuf,
    pub outname: String,
    /// Length of the random run identifier embedded in file names.
    pub id_len: usize,
    /// Progress event cadence (generations).
    pub log_every: usize,
    pub seed: Option<u64>,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            gen: 10_000,
            chunk: 1_000,
            w_sd: 0.5,
            w_mu: 0.5,
            v: 50.0,
            prop_root: 0.3,
            prop_sd: 0.5,
            root_mode: RootMode::Joint,
            dir: PathBuf::from("."),
            outname: "mcmc".to_string(),
            id_len: 10,
            log_every: 1_000,
            seed: None,
        }
    }
}

impl McmcConfig {
    /// Checks ranges that do not depend on the data. `v` is checked against
    /// the trait count by [`McmcConfig::validate_for`].
    pub fn validate(&self) -> Result<()> {
        if self.gen == 0 {
            return Err(McmcError::config("gen must be >= 1"));
        }
        if self.chunk == 0 {
            return Err(McmcError::config("chunk must be >= 1"));
        }
        if !(self.w_sd.is_finite() && self.w_sd > 0.0) {
            return Err(McmcError::config("w_sd must be finite and > 0"));
        }
        if !(self.w_mu.is_finite() && self.w_mu > 0.0) {
            return Err(McmcError::config("w_mu must be finite and > 0"));
        }
        if !self.v.is_finite() {
            return Err(McmcError::config("v must be finite"));
        }
        for (name, p) in [("prop_root", self.prop_root), ("prop_sd", self.prop_sd)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(McmcError::config(format!("{name} must lie in [0, 1]")));
            }
        }
        if self.outname.is_empty() || self.outname.contains(['/', '\\']) {
            return Err(McmcError::config(
                "outname must be a non-empty file name without separators",
            ));
        }
        if self.id_len == 0 {
            return Err(McmcError::config("id_len must be >= 1"));
        }
        if self.log_every == 0 {
            return Err(McmcError::config("log_every must be >= 1"));
        }
        Ok(())
    }

    /// Full validation once the number of traits is known.
    pub fn validate_for(&self, n_traits: usize) -> Result<()> {
        self.validate()?;
        if self.v <= (n_traits + 1) as f64 {
            return Err(McmcError::config(format!(
                "v must exceed k + 1 = {} (got {})",
                n_traits + 1,
                self.v
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = McmcConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_for(4).is_ok());
    }

    #[test]
    fn rejects_out_of_range_settings() {
        let bad = [
            McmcConfig {
                gen: 0,
                ..Default::default()
            },
            McmcConfig {
                chunk: 0,
                ..Default::default()
            },
            McmcConfig {
                w_sd: -1.0,
                ..Default::default()
            },
            McmcConfig {
                w_mu: f64::NAN,
                ..Default::default()
            },
            McmcConfig {
                prop_root: 1.5,
                ..Default::default()
            },
            McmcConfig {
                outname: "a/b".into(),
                ..Default::default()
            },
            McmcConfig {
                id_len: 0,
                ..Default::default()
            },
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(McmcError::Config { .. })));
        }
    }

    #[test]
    fn degrees_of_freedom_depend_on_traits() {
        let cfg = McmcConfig {
            v: 4.0,
            ..Default::default()
        };
        assert!(cfg.validate_for(2).is_ok());
        assert!(cfg.validate_for(3).is_err());
    }
}
