//! Federation session configuration.

use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{FederationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// Weighted average followed by Laplace noise.
    Secure,
    /// Weighted average only.
    Plain,
}

impl Default for AggregationMode { fn default() -> Self { AggregationMode::Secure } }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    pub min_participants: usize,
    pub max_participants: usize,
    pub rounds_per_epoch: u64,
    pub convergence_threshold: f64,
    pub privacy_epsilon: f64,
    pub aggregation_mode: AggregationMode,
    pub min_sample_count: u64,
    pub round_timeout_ms: u64,
    pub max_concurrent_collections: usize,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            min_participants: 3,
            max_participants: 10,
            rounds_per_epoch: 5,
            convergence_threshold: 0.001,
            privacy_epsilon: 1.0,
            aggregation_mode: AggregationMode::Secure,
            min_sample_count: 1000,
            round_timeout_ms: 30_000,
            max_concurrent_collections: 16,
        }
    }
}

impl FederationConfig {
    pub fn round_timeout(&self) -> Duration { Duration::from_millis(self.round_timeout_ms) }

    pub fn validate(&self) -> Result<()> {
        if self.min_participants == 0 {
            return Err(FederationError::Config("min_participants must be > 0".into()));
        }
        if self.min_participants > self.max_participants {
            return Err(FederationError::Config(format!(
                "min_participants {} exceeds max_participants {}", self.min_participants, self.max_participants
            )));
        }
        if self.rounds_per_epoch == 0 { return Err(FederationError::Config("rounds_per_epoch must be > 0".into())); }
        if !(self.convergence_threshold > 0.0) {
            return Err(FederationError::Config("convergence_threshold must be positive".into()));
        }
        if !(self.privacy_epsilon > 0.0) || !self.privacy_epsilon.is_finite() {
            return Err(FederationError::Config("privacy_epsilon must be a positive finite number".into()));
        }
        if self.round_timeout_ms == 0 { return Err(FederationError::Config("round_timeout_ms must be > 0".into())); }
        if self.max_concurrent_collections == 0 {
            return Err(FederationError::Config("max_concurrent_collections must be > 0".into()));
        }
        Ok(())
    }
}
