//! Differential-privacy noise for aggregated weights.
//!
//! Laplace noise calibrated to a simplified global sensitivity of
//! `2 / participant_count`. This is a statistical heuristic, not an audited DP
//! mechanism: there is no clipping and no budget accounting across rounds.

use rand::Rng;

use crate::error::{FederationError, Result};
use crate::weights::WeightSnapshot;

pub fn sensitivity(participant_count: usize) -> f64 { 2.0 / participant_count as f64 }

/// Adds independent Laplace(0, sensitivity / epsilon) noise to every scalar.
pub fn privatize(weights: &WeightSnapshot, epsilon: f64, participant_count: usize) -> Result<WeightSnapshot> {
    privatize_with_rng(weights, epsilon, participant_count, &mut rand::thread_rng())
}

pub fn privatize_with_rng<R: Rng + ?Sized>(
    weights: &WeightSnapshot,
    epsilon: f64,
    participant_count: usize,
    rng: &mut R,
) -> Result<WeightSnapshot> {
    if !(epsilon > 0.0) || !epsilon.is_finite() {
        return Err(FederationError::InvalidParameter(format!("epsilon must be positive, got {epsilon}")));
    }
    if participant_count == 0 {
        return Err(FederationError::InvalidParameter("participant_count must be positive".into()));
    }
    let scale = sensitivity(participant_count) / epsilon;
    Ok(weights.map_layers(|_, t| t.values.iter().map(|v| v + laplace(rng, scale)).collect()))
}

/// Inverse-CDF sample: `-b * sgn(u) * ln(1 - 2|u|)` for `u` uniform on (-0.5, 0.5).
fn laplace<R: Rng + ?Sized>(rng: &mut R, scale: f64) -> f64 {
    loop {
        let u: f64 = rng.gen::<f64>() - 0.5;
        if u.abs() < 0.5 { return -scale * u.signum() * (1.0 - 2.0 * u.abs()).ln(); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::LayerTensor;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn weights() -> WeightSnapshot {
        WeightSnapshot::new()
            .with_layer("layer1", LayerTensor::filled(vec![10, 5], 0.5))
            .with_layer("bias1", LayerTensor::filled(vec![5], 0.0))
    }

    #[test]
    fn preserves_structure_and_is_random() {
        let w = weights();
        let a = privatize(&w, 1.0, 4).unwrap();
        let b = privatize(&w, 1.0, 4).unwrap();
        assert!(w.ensure_same_schema(&a).is_ok());
        assert!(w.ensure_same_schema(&b).is_ok());
        assert_ne!(a, b);
        assert_ne!(a, w);
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let w = weights();
        let a = privatize_with_rng(&w, 0.5, 3, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = privatize_with_rng(&w, 0.5, 3, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_bad_parameters() {
        let w = weights();
        assert!(matches!(privatize(&w, 0.0, 3), Err(FederationError::InvalidParameter(_))));
        assert!(matches!(privatize(&w, -1.0, 3), Err(FederationError::InvalidParameter(_))));
        assert!(matches!(privatize(&w, 1.0, 0), Err(FederationError::InvalidParameter(_))));
    }

    #[test]
    fn noise_scale_tracks_epsilon() {
        // Mean absolute Laplace deviation equals the scale b.
        let w = WeightSnapshot::new().with_layer("w", LayerTensor::filled(vec![20_000], 0.0));
        let mut rng = StdRng::seed_from_u64(42);
        let mad = |s: &WeightSnapshot| s.layer("w").unwrap().values.iter().map(|v| v.abs()).sum::<f64>() / 20_000.0;
        let tight = privatize_with_rng(&w, 10.0, 2, &mut rng).unwrap();
        let loose = privatize_with_rng(&w, 0.1, 2, &mut rng).unwrap();
        assert!((mad(&tight) - 0.1).abs() < 0.01, "mad={}", mad(&tight));
        assert!((mad(&loose) - 10.0).abs() < 1.0, "mad={}", mad(&loose));
    }
}
