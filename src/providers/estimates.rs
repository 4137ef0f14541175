//! External win-probability estimates.
//!
//! The engine trains no model; it consumes probabilities produced elsewhere.
//! The file source re-reads a JSON array of `ModelEstimate`s every cycle so
//! an upstream job can replace it at any time.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use crate::types::ModelEstimate;

#[async_trait]
pub trait EstimateSource: Send + Sync {
    async fn estimates(&self) -> Result<Vec<ModelEstimate>>;
}

/// Estimates read from a JSON file.
#[derive(Debug, Clone)]
pub struct FileEstimates {
    path: PathBuf,
}

impl FileEstimates {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl EstimateSource for FileEstimates {
    async fn estimates(&self) -> Result<Vec<ModelEstimate>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read estimates file {}", self.path.display()))?;
        let estimates: Vec<ModelEstimate> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse estimates file {}", self.path.display()))?;
        debug!(count = estimates.len(), path = %self.path.display(), "Estimates loaded");
        Ok(estimates)
    }
}

/// Fixed in-memory estimates (dry runs, tests).
#[derive(Debug, Clone, Default)]
pub struct StaticEstimates(pub Vec<ModelEstimate>);

#[async_trait]
impl EstimateSource for StaticEstimates {
    async fn estimates(&self) -> Result<Vec<ModelEstimate>> {
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
