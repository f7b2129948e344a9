//! Messages exchanged with participants over the external transport.
//!
//! Both shapes carry the round number; anything not addressed to the current
//! round is rejected with `StaleRound`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FederationError, Result};

/// Coordinator -> participant at round start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightDistribution {
    pub session_id: Uuid,
    pub round: u64,
    #[serde(with = "b64")]
    pub encrypted_weights: Vec<u8>,
}

/// Participant -> coordinator during collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundUpdateMessage {
    pub org_id: String,
    pub round: u64,
    #[serde(with = "b64")]
    pub encrypted_weights: Vec<u8>,
    pub sample_count: u64,
    pub training_loss: f64,
    pub validation_accuracy: f64,
}

impl RoundUpdateMessage {
    /// Boundary checks run before the payload is decrypted.
    pub fn validate(&self, expected_org: &str, expected_round: u64) -> Result<()> {
        if self.round != expected_round {
            return Err(FederationError::StaleRound { expected: expected_round, got: self.round });
        }
        if self.org_id != expected_org {
            return Err(FederationError::MalformedUpdate(format!(
                "update from {} answered request to {expected_org}", self.org_id
            )));
        }
        if self.sample_count == 0 {
            return Err(FederationError::MalformedUpdate("sample_count must be positive".into()));
        }
        if !self.training_loss.is_finite() || self.training_loss < 0.0 {
            return Err(FederationError::MalformedUpdate(format!("invalid training_loss {}", self.training_loss)));
        }
        if !self.validation_accuracy.is_finite() || !(0.0..=1.0).contains(&self.validation_accuracy) {
            return Err(FederationError::MalformedUpdate(format!(
                "invalid validation_accuracy {}", self.validation_accuracy
            )));
        }
        Ok(())
    }
}

impl WeightDistribution {
    pub fn validate(&self, session_id: Uuid, expected_round: u64) -> Result<()> {
        if self.session_id != session_id {
            return Err(FederationError::MalformedUpdate(format!("distribution for foreign session {}", self.session_id)));
        }
        if self.round != expected_round {
            return Err(FederationError::StaleRound { expected: expected_round, got: self.round });
        }
        Ok(())
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> { s.serialize_str(&STANDARD.encode(bytes)) }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(round: u64) -> RoundUpdateMessage {
        RoundUpdateMessage {
            org_id: "mayo".into(),
            round,
            encrypted_weights: vec![1, 2, 3, 250],
            sample_count: 50_000,
            training_loss: 0.2,
            validation_accuracy: 0.9,
        }
    }

    #[test]
    fn stale_round_is_rejected() {
        assert_eq!(update(2).validate("mayo", 3), Err(FederationError::StaleRound { expected: 3, got: 2 }));
        assert!(update(3).validate("mayo", 3).is_ok());
    }

    #[test]
    fn malformed_metrics_are_rejected() {
        let mut u = update(1);
        u.validation_accuracy = 1.5;
        assert!(matches!(u.validate("mayo", 1), Err(FederationError::MalformedUpdate(_))));
        let mut u = update(1);
        u.training_loss = f64::NAN;
        assert!(matches!(u.validate("mayo", 1), Err(FederationError::MalformedUpdate(_))));
        let mut u = update(1);
        u.sample_count = 0;
        assert!(matches!(u.validate("mayo", 1), Err(FederationError::MalformedUpdate(_))));
        assert!(matches!(update(1).validate("hopkins", 1), Err(FederationError::MalformedUpdate(_))));
    }

    #[test]
    fn payload_travels_as_base64() {
        let json = serde_json::to_value(update(1)).unwrap();
        assert_eq!(json["encrypted_weights"], "AQID+g==");
        let back: RoundUpdateMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, update(1));
    }

    #[test]
    fn missing_metric_fields_fail_to_decode() {
        let raw = r#"{"org_id":"mayo","round":1,"encrypted_weights":"","sample_count":10}"#;
        assert!(serde_json::from_str::<RoundUpdateMessage>(raw).is_err());
    }

    #[test]
    fn distribution_checks_session_and_round() {
        let sid = Uuid::new_v4();
        let d = WeightDistribution { session_id: sid, round: 4, encrypted_weights: vec![] };
        assert!(d.validate(sid, 4).is_ok());
        assert!(matches!(d.validate(sid, 5), Err(FederationError::StaleRound { .. })));
        assert!(matches!(d.validate(Uuid::new_v4(), 4), Err(FederationError::MalformedUpdate(_))));
    }
}
