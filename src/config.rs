use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Disclosure policy: the thresholds every output is checked against.
///
/// Loaded once at session start and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Policy {
    /// Minimum number of contributors a cell needs to be publishable.
    pub safe_threshold: u32,
    /// Minimum residual degrees of freedom for a fitted model.
    pub safe_dof_threshold: u32,
    /// Number of top contributors considered by the dominance rule.
    pub safe_nk_n: usize,
    /// Dominance fraction: a top-n share of the cell total at or above
    /// this fraction triggers the nk-rule.
    pub safe_nk_k: f64,
    /// Second-largest / largest contributor ratio above this triggers
    /// the p-ratio rule.
    pub safe_pratio_p: f64,
    /// Whether cells containing missing contributor values are flagged
    /// for review instead of being scored numerically.
    pub check_missing_values: bool,
    /// Minimum at-risk decrement between survival table intervals.
    pub survival_safe_threshold: u32,
    /// Whether an all-zero cell is itself treated as disclosive.
    pub zeros_are_disclosive: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            safe_threshold: 10,
            safe_dof_threshold: 10,
            safe_nk_n: 2,
            safe_nk_k: 0.9,
            safe_pratio_p: 0.1,
            check_missing_values: false,
            survival_safe_threshold: 10,
            zeros_are_disclosive: true,
        }
    }
}

impl Policy {
    /// Load a policy from a YAML file.
    ///
    /// A missing file yields the documented defaults; a file with
    /// unrecognized keys is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!(path = %path.display(), "Policy file not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read policy file: {}", path.display()))?;

        let policy: Policy = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse policy file: {}", path.display()))?;

        info!(path = %path.display(), "Loaded disclosure policy");

        Ok(policy)
    }

    /// Load from the default location (`.outcheck/policy.yml`).
    pub fn load_default() -> Result<Self> {
        Self::load(".outcheck/policy.yml")
    }
}
