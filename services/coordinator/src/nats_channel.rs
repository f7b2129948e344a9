use async_nats::Client;
use async_trait::async_trait;
use federation_core::{FederationError, ParticipantChannel, Result, RoundUpdateMessage, WeightDistribution};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Body of the request sent on `<prefix>.participant.<org_id>.update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub round: u64,
}

/// NATS-backed participant channel. Weights are published fire-and-forget;
/// updates are request/reply with the caller's timeout bounding the wait.
#[derive(Clone)]
pub struct NatsParticipantChannel {
    client: Client,
    subject_prefix: String,
}

impl NatsParticipantChannel {
    pub fn new(client: Client, subject_prefix: impl Into<String>) -> Self {
        Self { client, subject_prefix: subject_prefix.into() }
    }

    pub fn weights_subject(&self, org_id: &str) -> String { format!("{}.participant.{org_id}.weights", self.subject_prefix) }
    pub fn update_subject(&self, org_id: &str) -> String { format!("{}.participant.{org_id}.update", self.subject_prefix) }
}

#[async_trait]
impl ParticipantChannel for NatsParticipantChannel {
    async fn send_weights(&self, org_id: &str, msg: WeightDistribution) -> Result<()> {
        let payload = serde_json::to_vec(&msg).map_err(|e| FederationError::Encoding(e.to_string()))?;
        let subject = self.weights_subject(org_id);
        debug!(%subject, round = msg.round, bytes = payload.len(), "publishing weights");
        self.client
            .publish(subject, payload.into())
            .await
            .map_err(|e| FederationError::Transport(e.to_string()))
    }

    async fn request_update(&self, org_id: &str, round: u64) -> Result<RoundUpdateMessage> {
        let body = serde_json::to_vec(&UpdateRequest { round }).map_err(|e| FederationError::Encoding(e.to_string()))?;
        let reply = self
            .client
            .request(self.update_subject(org_id), body.into())
            .await
            .map_err(|e| FederationError::Transport(e.to_string()))?;
        serde_json::from_slice(&reply.payload).map_err(|e| FederationError::MalformedUpdate(e.to_string()))
    }
}
