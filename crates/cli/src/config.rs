//! CLI configuration file.

use std::path::Path;

use anyhow::{Context, Result};
use planwatch_execution::AutoProcessOptions;
use planwatch_progress::GateFailurePolicy;
use serde::{Deserialize, Serialize};

/// Settings read from `--config`; flags override them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Remediation policy for auto-processing
    pub options: AutoProcessOptions,
    /// What to do when a milestone completion check fails
    pub gate_failure_policy: GateFailurePolicy,
    /// Post alerts here instead of logging them
    pub webhook_url: Option<String>,
}

impl CliConfig {
    /// Load from a JSON file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }
}
