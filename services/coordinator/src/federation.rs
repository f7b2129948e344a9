use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_nats::Client;
use federation_core::{
    CancelHandle, FederationSession, ParticipantInfo, ParticipantRegistry, RegistryPolicy, RoundOrchestrator,
    SessionOutcome, SessionStatus, WeightSnapshot,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::nats_channel::NatsParticipantChannel;
use crate::settings::CoordinatorConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationRequest {
    pub org_id: String,
    #[serde(default)]
    pub info: ParticipantInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Applies one `<prefix>.register` payload to the registry.
pub fn handle_registration(registry: &ParticipantRegistry, payload: &[u8]) -> RegistrationReply {
    let req: RegistrationRequest = match serde_json::from_slice(payload) {
        Ok(r) => r,
        Err(e) => return RegistrationReply { ok: false, error: Some(format!("malformed registration: {e}")) },
    };
    match registry.register(&req.org_id, req.info) {
        Ok(()) => RegistrationReply { ok: true, error: None },
        Err(e) => {
            warn!(org_id = %req.org_id, error = %e, "registration_rejected");
            RegistrationReply { ok: false, error: Some(e.to_string()) }
        }
    }
}

pub struct FederationModule {
    orchestrator: RoundOrchestrator<NatsParticipantChannel>,
    registry: Arc<ParticipantRegistry>,
    client: Client,
    cfg: CoordinatorConfig,
}

impl FederationModule {
    pub async fn new(cfg: CoordinatorConfig, client: Client) -> Result<Self> {
        let registry = Arc::new(ParticipantRegistry::new(RegistryPolicy {
            min_sample_count: cfg.federation.min_sample_count,
            max_participants: cfg.federation.max_participants,
        }));
        let session = FederationSession::with_registry(cfg.federation.clone(), registry.clone())?;
        let channel = Arc::new(NatsParticipantChannel::new(client.clone(), cfg.subject_prefix.clone()));
        let orchestrator = RoundOrchestrator::new(session, channel);
        info!(session_id = %orchestrator.session().id(), prefix = %cfg.subject_prefix, "federation_module_initialized");
        Ok(Self { orchestrator, registry, client, cfg })
    }

    pub fn status_watch(&self) -> watch::Receiver<SessionStatus> { self.orchestrator.status_watch() }
    pub fn cancel_handle(&self) -> CancelHandle { self.orchestrator.cancel_handle() }

    pub async fn spawn_registration_listener(&self) -> Result<JoinHandle<()>> {
        let subject = format!("{}.register", self.cfg.subject_prefix);
        let mut sub = self.client.subscribe(subject.clone()).await?;
        let client = self.client.clone();
        let registry = self.registry.clone();
        info!(%subject, "registration_listener_started");
        Ok(tokio::spawn(async move {
            while let Some(msg) = sub.next().await {
                let reply = handle_registration(&registry, &msg.payload);
                let Some(reply_to) = msg.reply else { continue };
                match serde_json::to_vec(&reply) {
                    Ok(body) => {
                        if let Err(e) = client.publish(reply_to, body.into()).await {
                            warn!(error = %e, "registration_reply_failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "registration_reply_encode_failed"),
                }
            }
        }))
    }

    /// Republishes each completed round's metrics on `<prefix>.metrics`.
    pub fn spawn_metrics_forwarder(&self) -> JoinHandle<()> {
        let mut rx = self.orchestrator.subscribe_metrics();
        let client = self.client.clone();
        let subject = format!("{}.metrics", self.cfg.subject_prefix);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(m) => {
                        let Ok(body) = serde_json::to_vec(&m) else { continue };
                        if let Err(e) = client.publish(subject.clone(), body.into()).await {
                            warn!(error = %e, round = m.round, "metrics_publish_failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => warn!(skipped, "metrics_forwarder_lagged"),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Waits until `min_participants` are active or the window elapses.
    /// Returns false if cancelled first.
    pub async fn wait_for_participants(&self, window: Duration) -> bool {
        let required = self.cfg.federation.min_participants;
        let cancel = self.cancel_handle();
        let deadline = tokio::time::Instant::now() + window;
        let mut tick = tokio::time::interval(Duration::from_millis(500));
        loop {
            tick.tick().await;
            if cancel.is_cancelled() { return false; }
            let active = self.registry.count_active();
            if active >= required {
                info!(active, required, "registration_quorum_reached");
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(active, required, "registration_window_elapsed");
                return true;
            }
        }
    }

    pub async fn run(&mut self, base: WeightSnapshot) -> Result<SessionOutcome> {
        self.orchestrator.start_session(base).await?;
        let outcome = self.orchestrator.run_epoch().await?;
        Ok(outcome)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.client.flush().await?;
        info!("federation_module_shutdown");
        Ok(())
    }
}
