//! Convergence check between successive aggregated snapshots.

use tracing::debug;

use crate::error::Result;
use crate::weights::WeightSnapshot;

/// Mean over layers of each layer's mean absolute element difference.
/// Empty layers contribute zero; a snapshot with no layers yields infinity.
pub fn mean_layer_difference(current: &WeightSnapshot, previous: &WeightSnapshot) -> Result<f64> {
    current.ensure_same_schema(previous)?;
    let mut total = 0.0;
    let mut layers = 0usize;
    for (name, cur) in current.layers() {
        if let Some(prev) = previous.layer(name) {
            let diff = if cur.is_empty() {
                0.0
            } else {
                cur.values.iter().zip(&prev.values).map(|(a, b)| (a - b).abs()).sum::<f64>() / cur.len() as f64
            };
            total += diff;
            layers += 1;
        }
    }
    Ok(if layers == 0 { f64::INFINITY } else { total / layers as f64 })
}

/// First round never converges; otherwise true iff the mean layer difference
/// is strictly below `threshold`.
pub fn has_converged(current: &WeightSnapshot, previous: Option<&WeightSnapshot>, threshold: f64) -> Result<bool> {
    let Some(previous) = previous else { return Ok(false) };
    let avg_diff = mean_layer_difference(current, previous)?;
    debug!(avg_diff, threshold, "convergence_check");
    Ok(avg_diff < threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FederationError;
    use crate::weights::LayerTensor;

    fn snap(a: f64, b: f64) -> WeightSnapshot {
        WeightSnapshot::new()
            .with_layer("layer1", LayerTensor::filled(vec![4, 2], a))
            .with_layer("bias1", LayerTensor::filled(vec![2], b))
    }

    #[test]
    fn first_round_never_converges() {
        assert!(!has_converged(&snap(0.0, 0.0), None, 1.0).unwrap());
    }

    #[test]
    fn identical_snapshots_converge() {
        let s = snap(0.3, -0.1);
        assert!(has_converged(&s, Some(&s.clone()), 1e-12).unwrap());
    }

    #[test]
    fn averages_per_layer_means() {
        // layer1 differs by 0.01 everywhere, bias1 by 0.0 -> mean 0.005
        let d = mean_layer_difference(&snap(1.01, 2.0), &snap(1.0, 2.0)).unwrap();
        assert!((d - 0.005).abs() < 1e-12);
        assert!(has_converged(&snap(1.01, 2.0), Some(&snap(1.0, 2.0)), 0.006).unwrap());
        assert!(!has_converged(&snap(1.01, 2.0), Some(&snap(1.0, 2.0)), 0.004).unwrap());
    }

    #[test]
    fn threshold_is_strict() {
        let d = mean_layer_difference(&snap(0.5, 0.5), &snap(0.0, 0.0)).unwrap();
        assert_eq!(d, 0.5);
        assert!(!has_converged(&snap(0.5, 0.5), Some(&snap(0.0, 0.0)), 0.5).unwrap());
    }

    #[test]
    fn layer_mismatch_fails() {
        let short = WeightSnapshot::new().with_layer("layer1", LayerTensor::filled(vec![4, 2], 0.0));
        assert!(matches!(has_converged(&snap(0.0, 0.0), Some(&short), 0.1), Err(FederationError::SchemaMismatch(_))));
    }
}
