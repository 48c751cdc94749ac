//! Analysis settings
//!
//! Settings are plain data. They are loaded from a JSON file or built in code and
//! then passed to the analyzers that need them; nothing reads them globally.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::linting::Inspection;
use crate::mql::components::ExplainPlanType;

/// Errors that can occur when loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading a settings file.
    #[error("I/O error reading {path}: {error}")]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisSettings {
    /// Documents sampled to infer a collection schema
    pub documents_sample_size: u32,
    pub explain_plan_type: ExplainPlanType,
    /// Above this many candidate indexes per collection, consolidation logs a warning
    pub indexes_soft_limit: usize,
    pub default_result_limit: u32,
    pub query_timeout_ms: u64,
    pub pretty_print: bool,
    pub enabled_inspections: Vec<Inspection>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            documents_sample_size: 50,
            explain_plan_type: ExplainPlanType::Safe,
            indexes_soft_limit: 10,
            default_result_limit: 50,
            query_timeout_ms: 1000,
            pretty_print: false,
            enabled_inspections: Inspection::ALL.to_vec(),
        }
    }
}

impl AnalysisSettings {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_json_str(&content)
    }

    pub fn query_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.query_timeout_ms)
    }

    pub fn is_enabled(&self, inspection: Inspection) -> bool {
        self.enabled_inspections.contains(&inspection)
    }
}
