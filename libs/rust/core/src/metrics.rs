//! Per-round training metrics and the append-only training history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FederationError, Result};

/// Summary of one completed round, forwarded to the monitoring collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundMetrics {
    pub round: u64,
    pub participant_count: usize,
    pub mean_accuracy: f64,
    pub min_accuracy: f64,
    pub max_accuracy: f64,
    pub mean_loss: f64,
    pub timestamp: DateTime<Utc>,
}

impl RoundMetrics {
    /// Builds metrics from `(training_loss, validation_accuracy)` pairs.
    pub fn from_reports<I>(round: u64, reports: I) -> Result<Self>
    where I: IntoIterator<Item = (f64, f64)> {
        let mut n = 0usize;
        let (mut loss_sum, mut acc_sum) = (0.0, 0.0);
        let (mut min_acc, mut max_acc) = (f64::INFINITY, f64::NEG_INFINITY);
        for (loss, acc) in reports {
            n += 1;
            loss_sum += loss;
            acc_sum += acc;
            min_acc = min_acc.min(acc);
            max_acc = max_acc.max(acc);
        }
        if n == 0 { return Err(FederationError::EmptyInput); }
        Ok(Self {
            round,
            participant_count: n,
            mean_accuracy: acc_sum / n as f64,
            min_accuracy: min_acc,
            max_accuracy: max_acc,
            mean_loss: loss_sum / n as f64,
            timestamp: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingHistory {
    rounds: Vec<RoundMetrics>,
}

impl TrainingHistory {
    pub fn new() -> Self { Self::default() }
    pub fn append(&mut self, m: RoundMetrics) { self.rounds.push(m); }
    pub fn rounds(&self) -> &[RoundMetrics] { &self.rounds }
    pub fn last(&self) -> Option<&RoundMetrics> { self.rounds.last() }
    pub fn len(&self) -> usize { self.rounds.len() }
    pub fn is_empty(&self) -> bool { self.rounds.is_empty() }
}
