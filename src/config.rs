//! Reference engine configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Settings for [`LocalEngine`](crate::native::local::LocalEngine).
///
/// `n_workers` is how many cooperating workers a `parallel` operator call
/// partitions rows into. `seed` drives sampling and random renormalization.
/// `threads`, when set, sizes the rayon pool used for per-partition work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub n_workers: usize,
    pub seed: u64,
    pub threads: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            n_workers: num_cpus::get().max(2),
            seed: 0x5EED_u64,
            threads: None,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON object; missing keys take their defaults.
    ///
    /// # Errors
    /// On malformed JSON or a zero worker count.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s).context("parsing engine config")?;
        anyhow::ensure!(cfg.n_workers > 0, "n_workers must be at least 1");
        Ok(cfg)
    }

    #[must_use]
    pub fn with_workers(mut self, n_workers: usize) -> Self {
        self.n_workers = n_workers.max(1);
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = EngineConfig::from_json_str(r#"{"n_workers": 3}"#).unwrap();
        assert_eq!(cfg.n_workers, 3);
        assert_eq!(cfg.seed, EngineConfig::default().seed);
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(EngineConfig::from_json_str(r#"{"n_workers": 0}"#).is_err());
    }
}
