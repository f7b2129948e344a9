//! Weight snapshots: named layer tensors representing model parameters.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

use crate::error::{FederationError, Result};

/// Row-major tensor. Bias vectors are one-dimensional tensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
}

impl LayerTensor {
    pub fn new(shape: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        let t = Self { shape, values };
        t.validate()?;
        Ok(t)
    }

    pub fn vector(values: Vec<f64>) -> Self { Self { shape: vec![values.len()], values } }

    pub fn filled(shape: Vec<usize>, value: f64) -> Self {
        let len = shape.iter().product();
        Self { shape, values: vec![value; len] }
    }

    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    fn validate(&self) -> Result<()> {
        let expected: usize = self.shape.iter().product();
        if expected != self.values.len() {
            return Err(FederationError::Validation(format!(
                "tensor shape {:?} implies {} values, found {}",
                self.shape, expected, self.values.len()
            )));
        }
        Ok(())
    }
}

/// Immutable set of named layers. Aggregation and privatization always build a
/// new snapshot; nothing mutates one after construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightSnapshot {
    layers: BTreeMap<String, LayerTensor>,
}

impl WeightSnapshot {
    pub fn new() -> Self { Self::default() }

    pub fn from_layers(layers: BTreeMap<String, LayerTensor>) -> Result<Self> {
        let snap = Self { layers };
        snap.validate()?;
        Ok(snap)
    }

    /// Builder-style insert, used when assembling a snapshot by hand.
    pub fn with_layer(mut self, name: impl Into<String>, tensor: LayerTensor) -> Self {
        self.layers.insert(name.into(), tensor);
        self
    }

    pub fn layer(&self, name: &str) -> Option<&LayerTensor> { self.layers.get(name) }
    pub fn layers(&self) -> impl Iterator<Item = (&String, &LayerTensor)> { self.layers.iter() }
    pub fn layer_names(&self) -> impl Iterator<Item = &String> { self.layers.keys() }
    pub fn layer_count(&self) -> usize { self.layers.len() }
    pub fn parameter_count(&self) -> usize { self.layers.values().map(|t| t.len()).sum() }
    pub fn is_empty(&self) -> bool { self.layers.is_empty() }

    pub fn is_finite(&self) -> bool {
        self.layers.values().all(|t| t.values.iter().all(|v| v.is_finite()))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, tensor) in &self.layers {
            tensor.validate().map_err(|e| FederationError::Validation(format!("layer {name}: {e}")))?;
        }
        Ok(())
    }

    /// Fails with `SchemaMismatch` unless both snapshots carry the same layer
    /// names with the same shapes.
    pub fn ensure_same_schema(&self, other: &WeightSnapshot) -> Result<()> {
        if self.layers.len() != other.layers.len() || !self.layers.keys().eq(other.layers.keys()) {
            let mine: Vec<&String> = self.layers.keys().collect();
            let theirs: Vec<&String> = other.layers.keys().collect();
            return Err(FederationError::SchemaMismatch(format!("layer sets differ: {mine:?} vs {theirs:?}")));
        }
        for (name, tensor) in &self.layers {
            let o = &other.layers[name];
            if tensor.shape != o.shape || tensor.values.len() != o.values.len() {
                return Err(FederationError::SchemaMismatch(format!(
                    "layer {name} shape {:?} vs {:?}", tensor.shape, o.shape
                )));
            }
        }
        Ok(())
    }

    /// Builds a new snapshot with the same layer structure, mapping every
    /// tensor through `f`.
    pub fn map_layers<F>(&self, mut f: F) -> WeightSnapshot
    where F: FnMut(&str, &LayerTensor) -> Vec<f64> {
        let layers = self.layers.iter()
            .map(|(name, t)| (name.clone(), LayerTensor { shape: t.shape.clone(), values: f(name, t) }))
            .collect();
        WeightSnapshot { layers }
    }
}

impl FromIterator<(String, LayerTensor)> for WeightSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, LayerTensor)>>(iter: I) -> Self {
        Self { layers: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_shape_value_mismatch() {
        let err = LayerTensor::new(vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, FederationError::Validation(_)));
        assert!(LayerTensor::new(vec![2, 3], vec![0.0; 6]).is_ok());
    }

    #[test]
    fn schema_check_covers_names_and_shapes() {
        let a = WeightSnapshot::new()
            .with_layer("layer1", LayerTensor::filled(vec![2, 2], 1.0))
            .with_layer("bias1", LayerTensor::vector(vec![0.0, 0.0]));
        let b = a.clone();
        assert!(a.ensure_same_schema(&b).is_ok());

        let missing = WeightSnapshot::new().with_layer("layer1", LayerTensor::filled(vec![2, 2], 1.0));
        assert!(matches!(a.ensure_same_schema(&missing), Err(FederationError::SchemaMismatch(_))));

        let reshaped = WeightSnapshot::new()
            .with_layer("layer1", LayerTensor::filled(vec![4], 1.0))
            .with_layer("bias1", LayerTensor::vector(vec![0.0, 0.0]));
        assert!(matches!(a.ensure_same_schema(&reshaped), Err(FederationError::SchemaMismatch(_))));
    }

    #[test]
    fn map_layers_keeps_structure() {
        let a = WeightSnapshot::new().with_layer("w", LayerTensor::new(vec![1, 3], vec![1.0, 2.0, 3.0]).unwrap());
        let doubled = a.map_layers(|_, t| t.values.iter().map(|v| v * 2.0).collect());
        assert_eq!(doubled.layer("w").unwrap().values, vec![2.0, 4.0, 6.0]);
        assert_eq!(doubled.layer("w").unwrap().shape, vec![1, 3]);
        assert_eq!(a.layer("w").unwrap().values, vec![1.0, 2.0, 3.0]);
    }
}
