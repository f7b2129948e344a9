//! Sample-size-weighted averaging of participant updates (FedAvg).
//!
//! Updates are keyed by `org_id` in a `BTreeMap`, so accumulation order is
//! fixed and results are bit-for-bit reproducible. NaN or Inf in any
//! contribution propagates into the output untouched.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

use crate::error::{FederationError, Result};
use crate::weights::{LayerTensor, WeightSnapshot};

/// One participant's decrypted contribution to a round. Lives only until the
/// round's aggregation has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundUpdate {
    pub weights: WeightSnapshot,
    pub sample_count: u64,
    pub training_loss: f64,
    pub validation_accuracy: f64,
}

pub fn aggregate(updates: &BTreeMap<String, RoundUpdate>) -> Result<WeightSnapshot> {
    let mut iter = updates.iter();
    let (first_org, first) = iter.next().ok_or(FederationError::EmptyInput)?;
    for (org_id, u) in iter {
        first.weights.ensure_same_schema(&u.weights).map_err(|e| match e {
            FederationError::SchemaMismatch(msg) => FederationError::SchemaMismatch(format!("{org_id} vs {first_org}: {msg}")),
            other => other,
        })?;
    }

    let total_samples: f64 = updates.values().map(|u| u.sample_count as f64).sum();
    if !(total_samples > 0.0) {
        return Err(FederationError::InvalidParameter("total sample count must be positive".into()));
    }

    let layers: WeightSnapshot = first.weights.layers()
        .map(|(name, template)| {
            let mut acc = vec![0.0f64; template.len()];
            for u in updates.values() {
                let factor = u.sample_count as f64 / total_samples;
                // Schema check above guarantees the layer exists with this length.
                if let Some(t) = u.weights.layer(name) {
                    for (a, v) in acc.iter_mut().zip(&t.values) { *a += factor * v; }
                }
            }
            (name.clone(), LayerTensor { shape: template.shape.clone(), values: acc })
        })
        .collect();
    Ok(layers)
}
