//! Secure channel codec: authenticated symmetric encryption of weight payloads.
//!
//! Blob layout: `version (1) || nonce (12) || ciphertext+tag`. The key is
//! generated once per codec, lives only in process memory and is zeroed on
//! drop. This gives confidentiality in transit only; the coordinator still sees
//! every decrypted update.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{FederationError, Result};
use crate::weights::WeightSnapshot;

const BLOB_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

pub struct SecureChannelCodec {
    key: Zeroizing<[u8; 32]>,
}

impl SecureChannelCodec {
    /// Creates a codec with a fresh random session key.
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut key[..]);
        Self { key }
    }

    fn cipher(&self) -> ChaCha20Poly1305 { ChaCha20Poly1305::new(Key::from_slice(&self.key[..])) }

    pub fn encrypt(&self, weights: &WeightSnapshot) -> Result<Vec<u8>> {
        if !weights.is_finite() {
            return Err(FederationError::Encoding("snapshot contains non-finite values".into()));
        }
        let plaintext = Zeroizing::new(serde_json::to_vec(weights).map_err(|e| FederationError::Encoding(e.to_string()))?);
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self.cipher()
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| FederationError::Encoding("encryption failed".into()))?;
        let mut blob = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        blob.push(BLOB_VERSION);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        debug!(bytes = blob.len(), layers = weights.layer_count(), "weights_encrypted");
        Ok(blob)
    }

    /// Fails with `Decryption` for anything not sealed by this codec's key.
    pub fn decrypt(&self, blob: &[u8]) -> Result<WeightSnapshot> {
        if blob.len() < 1 + NONCE_LEN + TAG_LEN {
            return Err(FederationError::Decryption(format!("blob too short ({} bytes)", blob.len())));
        }
        if blob[0] != BLOB_VERSION {
            return Err(FederationError::Decryption(format!("unsupported blob version {}", blob[0])));
        }
        let (nonce, ciphertext) = blob[1..].split_at(NONCE_LEN);
        let plaintext = Zeroizing::new(
            self.cipher()
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| FederationError::Decryption("authentication failed".into()))?,
        );
        let weights: WeightSnapshot = serde_json::from_slice(&plaintext)
            .map_err(|e| FederationError::Decryption(format!("malformed payload: {e}")))?;
        weights.validate().map_err(|e| FederationError::Decryption(format!("malformed payload: {e}")))?;
        Ok(weights)
    }
}

impl std::fmt::Debug for SecureChannelCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("SecureChannelCodec { key: <redacted> }") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::LayerTensor;

    fn sample() -> WeightSnapshot {
        WeightSnapshot::new()
            .with_layer("layer1", LayerTensor::new(vec![2, 3], vec![0.1, -2.5, 1e-300, 3.141592653589793, 0.0, -0.0]).unwrap())
            .with_layer("bias1", LayerTensor::vector(vec![f64::MAX, f64::MIN_POSITIVE, 1.0 / 3.0]))
    }

    #[test]
    fn round_trip_is_bit_exact() {
        let codec = SecureChannelCodec::generate();
        let w = sample();
        let back = codec.decrypt(&codec.encrypt(&w).unwrap()).unwrap();
        for (name, t) in w.layers() {
            let b = back.layer(name).unwrap();
            assert_eq!(t.shape, b.shape);
            let lhs: Vec<u64> = t.values.iter().map(|v| v.to_bits()).collect();
            let rhs: Vec<u64> = b.values.iter().map(|v| v.to_bits()).collect();
            assert_eq!(lhs, rhs, "layer {name}");
        }
    }

    #[test]
    fn nonces_differ_between_calls() {
        let codec = SecureChannelCodec::generate();
        let w = sample();
        assert_ne!(codec.encrypt(&w).unwrap(), codec.encrypt(&w).unwrap());
    }

    #[test]
    fn foreign_key_is_rejected() {
        let ours = SecureChannelCodec::generate();
        let theirs = SecureChannelCodec::generate();
        let blob = theirs.encrypt(&sample()).unwrap();
        assert!(matches!(ours.decrypt(&blob), Err(FederationError::Decryption(_))));
    }

    #[test]
    fn corrupted_blob_is_rejected() {
        let codec = SecureChannelCodec::generate();
        let mut blob = codec.encrypt(&sample()).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(codec.decrypt(&blob), Err(FederationError::Decryption(_))));
        assert!(matches!(codec.decrypt(&[1, 2, 3]), Err(FederationError::Decryption(_))));
    }

    #[test]
    fn non_finite_values_cannot_be_sealed() {
        let codec = SecureChannelCodec::generate();
        let w = WeightSnapshot::new().with_layer("w", LayerTensor::vector(vec![f64::NAN]));
        assert!(matches!(codec.encrypt(&w), Err(FederationError::Encoding(_))));
    }
}
