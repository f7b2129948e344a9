//! Federation core: participant registry, secure weight exchange, weighted
//! aggregation with differential-privacy noise and round-based convergence.
//!
//! Aggregation is coordinator-mediated. Payloads are encrypted in transit only
//! and the coordinator sees decrypted per-participant updates; the Laplace
//! noise is a statistical safeguard, not a formal MPC or DP guarantee.

use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod federated_learning;
pub mod metrics;
pub mod privacy;
pub mod protocol;
pub mod registry;
pub mod weights;

pub use channel::ParticipantChannel;
pub use codec::SecureChannelCodec;
pub use config::{AggregationMode, FederationConfig};
pub use error::{FederationError, Result};
pub use federated_learning::{
    aggregate, has_converged, CancelHandle, FailureReason, FederationSession, RoundOrchestrator, RoundUpdate,
    SessionOutcome, SessionState, SessionStatus,
};
pub use metrics::{RoundMetrics, TrainingHistory};
pub use privacy::privatize;
pub use protocol::{RoundUpdateMessage, WeightDistribution};
pub use registry::{
    ComputeTier, Participant, ParticipantInfo, ParticipantRegistry, ParticipantStatus, PrivacyTier, RegistryPolicy,
};
pub use weights::{LayerTensor, WeightSnapshot};

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Installs the global subscriber once. `RUST_LOG` wins over `default_level`;
/// `FEDERATION_JSON_LOG=1|true` switches to JSON lines.
pub fn init_tracing(service: &str, default_level: &str) -> std::result::Result<(), tracing_subscriber::util::TryInitError> {
    TRACING_INIT.get_or_try_init(|| {
        let json = std::env::var("FEDERATION_JSON_LOG").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
        let json_layer = json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
        });
        let text_layer = (!json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_line_number(true)
        });
        tracing_subscriber::registry().with(env_filter).with(json_layer).with(text_layer).try_init()
    })?;
    info!(target: "federation", service, "tracing initialized");
    Ok(())
}
