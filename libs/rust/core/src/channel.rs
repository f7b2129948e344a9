//! Transport seam between the coordinator and participants.
//!
//! The core assumes a reliable point-to-point channel exists; implementations
//! only move the payloads. Timeouts and cancellation are applied by the caller.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{RoundUpdateMessage, WeightDistribution};

#[async_trait]
pub trait ParticipantChannel: Send + Sync + 'static {
    async fn send_weights(&self, org_id: &str, msg: WeightDistribution) -> Result<()>;
    async fn request_update(&self, org_id: &str, round: u64) -> Result<RoundUpdateMessage>;
}
