//! Round orchestrator: collect -> aggregate -> privatize -> check -> redistribute.
//!
//! Rounds are synchronous barriers. Inside a round, collection fans out to
//! every participant of the round-start snapshot concurrently, bounded by a
//! semaphore, each request under its own timeout. A cancellation signal aborts
//! the outstanding requests and fails the session with `Cancelled`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use serde::{Serialize, Serializer};
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::aggregation::{aggregate, RoundUpdate};
use super::convergence::has_converged;
use super::session::FederationSession;
use crate::channel::ParticipantChannel;
use crate::codec::SecureChannelCodec;
use crate::config::AggregationMode;
use crate::error::{FederationError, Result};
use crate::metrics::{RoundMetrics, TrainingHistory};
use crate::privacy::privatize;
use crate::protocol::{RoundUpdateMessage, WeightDistribution};
use crate::registry::{Participant, ParticipantInfo};
use crate::weights::WeightSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Initializing,
    RoundInProgress,
    Converged,
    Exhausted,
    Failed { reason: FailureReason },
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Converged | SessionState::Exhausted | SessionState::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    Cancelled,
    Error(FederationError),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Cancelled => f.write_str("cancelled"),
            FailureReason::Error(e) => write!(f, "{e}"),
        }
    }
}

impl Serialize for FailureReason {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> { s.collect_str(self) }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    #[serde(flatten)]
    pub state: SessionState,
    pub round: u64,
    pub active_participants: usize,
    pub last_round: Option<RoundMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub state: SessionState,
    pub rounds_completed: usize,
    pub convergence_achieved: bool,
    pub final_accuracy: Option<f64>,
    pub history: TrainingHistory,
}

/// Aborts the running round's collection when triggered.
#[derive(Clone)]
pub struct CancelHandle { tx: Arc<watch::Sender<bool>> }

impl CancelHandle {
    pub fn cancel(&self) { self.tx.send_replace(true); }
    pub fn is_cancelled(&self) -> bool { *self.tx.borrow() }
}

struct FedMetrics {
    updates_total: Counter<u64>,
    updates_dropped: Counter<u64>,
    rounds_completed: Counter<u64>,
    aggregation_latency_ms: Histogram<f64>,
}

static FED_METER: Lazy<Meter> = Lazy::new(|| opentelemetry::global::meter("federation"));

impl FedMetrics {
    fn new() -> Self {
        Self {
            updates_total: FED_METER.u64_counter("fed_updates_total").with_description("Participant updates accepted into aggregation").init(),
            updates_dropped: FED_METER.u64_counter("fed_updates_dropped_total").with_description("Participant updates dropped (timeout, decryption, stale, malformed)").init(),
            rounds_completed: FED_METER.u64_counter("fed_rounds_completed_total").with_description("Federated rounds completed").init(),
            aggregation_latency_ms: FED_METER.f64_histogram("fed_aggregation_latency_ms").with_description("Aggregate + privatize latency ms").init(),
        }
    }
}

pub struct RoundOrchestrator<C: ParticipantChannel> {
    session: FederationSession,
    channel: Arc<C>,
    state: SessionState,
    previous: Option<Arc<WeightSnapshot>>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
    metrics_tx: broadcast::Sender<RoundMetrics>,
    status_tx: watch::Sender<SessionStatus>,
    telemetry: FedMetrics,
}

impl<C: ParticipantChannel> RoundOrchestrator<C> {
    pub fn new(session: FederationSession, channel: Arc<C>) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (metrics_tx, _) = broadcast::channel(64);
        let status = SessionStatus {
            session_id: session.id(),
            state: SessionState::Idle,
            round: 0,
            active_participants: session.registry().count_active(),
            last_round: None,
        };
        let (status_tx, _) = watch::channel(status);
        Self {
            session,
            channel,
            state: SessionState::Idle,
            previous: None,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
            metrics_tx,
            status_tx,
            telemetry: FedMetrics::new(),
        }
    }

    pub fn session(&self) -> &FederationSession { &self.session }
    pub fn state(&self) -> &SessionState { &self.state }

    pub fn register_participant(&self, org_id: &str, info: ParticipantInfo) -> Result<()> {
        self.session.registry().register(org_id, info)
    }

    pub fn cancel_handle(&self) -> CancelHandle { CancelHandle { tx: self.cancel_tx.clone() } }

    /// One `RoundMetrics` per completed round.
    pub fn subscribe_metrics(&self) -> broadcast::Receiver<RoundMetrics> { self.metrics_tx.subscribe() }

    /// Live view of `status()` for readers that cannot borrow the orchestrator.
    pub fn status_watch(&self) -> watch::Receiver<SessionStatus> { self.status_tx.subscribe() }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.session.id(),
            state: self.state.clone(),
            round: self.session.round(),
            active_participants: self.session.registry().count_active(),
            last_round: self.session.history().last().cloned(),
        }
    }

    fn set_state(&mut self, state: SessionState) {
        debug!(from = ?self.state, to = ?state, "session_state_changed");
        self.state = state;
        self.status_tx.send_replace(self.status());
    }

    fn fail(&mut self, err: FederationError) -> FederationError {
        let reason = match &err {
            FederationError::Cancelled => FailureReason::Cancelled,
            other => FailureReason::Error(other.clone()),
        };
        error!(session_id = %self.session.id(), round = self.session.round(), %reason, "session_failed");
        self.set_state(SessionState::Failed { reason });
        err
    }

    /// Idle -> Initializing -> RoundInProgress, distributing `base_weights`
    /// to every active participant as round 1.
    pub async fn start_session(&mut self, base_weights: WeightSnapshot) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(FederationError::InvalidState(format!("start_session requires idle state, found {:?}", self.state)));
        }
        base_weights.validate()?;
        let active = self.session.registry().count_active();
        let required = self.session.config().min_participants;
        if active < required {
            warn!(active, required, "insufficient_participants");
            return Err(FederationError::InsufficientParticipants { active, required });
        }
        self.set_state(SessionState::Initializing);
        let base = Arc::new(base_weights);
        if let Err(e) = self.distribute(1, &base).await { return Err(self.fail(e)); }
        self.session.global = Some(base);
        self.session.round = 1;
        self.previous = None;
        info!(session_id = %self.session.id(), participants = active, "federation_initialized");
        self.set_state(SessionState::RoundInProgress);
        Ok(())
    }

    pub async fn run_epoch(&mut self) -> Result<SessionOutcome> {
        let rounds = self.session.config().rounds_per_epoch;
        self.run(rounds).await
    }

    /// Drives rounds until convergence, until the round counter reaches
    /// `max_rounds`, or until a structural failure or cancellation.
    pub async fn run(&mut self, max_rounds: u64) -> Result<SessionOutcome> {
        if self.state != SessionState::RoundInProgress {
            return Err(FederationError::InvalidState(format!("run requires a started session, found {:?}", self.state)));
        }
        if max_rounds == 0 { return Err(FederationError::InvalidParameter("max_rounds must be > 0".into())); }
        info!(session_id = %self.session.id(), max_rounds, "federated_training_started");

        loop {
            let round = self.session.round();
            if *self.cancel_rx.borrow() { return Err(self.fail(FederationError::Cancelled)); }
            let (snapshot, converged) = match self.execute_round(round).await {
                Ok(v) => v,
                Err(e) => return Err(self.fail(e)),
            };
            self.telemetry.rounds_completed.add(1, &[]);
            self.session.global = Some(snapshot.clone());

            if converged {
                info!(round, "convergence_achieved");
                self.set_state(SessionState::Converged);
                break;
            }
            if round >= max_rounds {
                info!(round, "round_budget_exhausted");
                self.set_state(SessionState::Exhausted);
                break;
            }
            if let Err(e) = self.distribute(round + 1, &snapshot).await { return Err(self.fail(e)); }
            self.previous = Some(snapshot);
            self.session.round = round + 1;
            self.status_tx.send_replace(self.status());
        }
        Ok(self.outcome())
    }

    fn outcome(&self) -> SessionOutcome {
        let history = self.session.history().clone();
        SessionOutcome {
            session_id: self.session.id(),
            state: self.state.clone(),
            rounds_completed: history.len(),
            convergence_achieved: self.state == SessionState::Converged,
            final_accuracy: history.last().map(|m| m.mean_accuracy),
            history,
        }
    }

    /// Returns a finished orchestrator to `Idle`. Registered participants and
    /// the session key are kept; everything round-scoped is cleared.
    pub fn reset(&mut self) -> Result<()> {
        if !(self.state.is_terminal() || self.state == SessionState::Idle) {
            return Err(FederationError::InvalidState(format!("cannot reset while {:?}", self.state)));
        }
        self.session.clear();
        self.previous = None;
        self.cancel_tx.send_replace(false);
        self.set_state(SessionState::Idle);
        Ok(())
    }

    async fn execute_round(&mut self, round: u64) -> Result<(Arc<WeightSnapshot>, bool)> {
        let participants = self.session.registry().list_active();
        info!(round, participants = participants.len(), "round_started");
        let updates = self.collect(round, &participants).await?;
        if updates.is_empty() { return Err(FederationError::NoUpdates { round }); }
        let total_samples: f64 = updates.values().map(|u| u.sample_count as f64).sum();
        info!(round, updates = updates.len(), total_samples, "round_collected");

        let (mode, epsilon, threshold) = {
            let cfg = self.session.config();
            (cfg.aggregation_mode, cfg.privacy_epsilon, cfg.convergence_threshold)
        };
        let started = Instant::now();
        let aggregated = aggregate(&updates)?;
        let published = match mode {
            AggregationMode::Secure => privatize(&aggregated, epsilon, updates.len())?,
            AggregationMode::Plain => aggregated,
        };
        self.telemetry.aggregation_latency_ms.record(started.elapsed().as_secs_f64() * 1000.0, &[]);

        let metrics = RoundMetrics::from_reports(round, updates.values().map(|u| (u.training_loss, u.validation_accuracy)))?;
        info!(
            round,
            participants = metrics.participant_count,
            avg_accuracy = metrics.mean_accuracy,
            avg_loss = metrics.mean_loss,
            "round_completed"
        );
        self.session.history.append(metrics.clone());
        let _ = self.metrics_tx.send(metrics);

        let converged = has_converged(&published, self.previous.as_deref(), threshold)?;
        Ok((Arc::new(published), converged))
    }

    async fn collect(&self, round: u64, participants: &[Participant]) -> Result<BTreeMap<String, RoundUpdate>> {
        let cfg = self.session.config();
        let permits = Arc::new(Semaphore::new(cfg.max_concurrent_collections));
        let mut tasks = JoinSet::new();
        for p in participants {
            let channel = self.channel.clone();
            let codec = self.session.codec().clone();
            let permits = permits.clone();
            let org_id = p.org_id.clone();
            let registered_samples = p.sample_count;
            let timeout = cfg.round_timeout();
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => match tokio::time::timeout(timeout, channel.request_update(&org_id, round)).await {
                        Ok(Ok(msg)) => accept_update(&codec, &org_id, round, registered_samples, msg),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(FederationError::Timeout { org_id: org_id.clone() }),
                    },
                    Err(_) => Err(FederationError::Cancelled),
                };
                (org_id, result)
            });
        }

        let mut cancel = self.cancel_rx.clone();
        let mut updates = BTreeMap::new();
        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    tasks.abort_all();
                    warn!(round, outstanding = tasks.len(), "collection_cancelled");
                    return Err(FederationError::Cancelled);
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((org_id, Ok(update)))) => {
                        self.telemetry.updates_total.add(1, &[]);
                        debug!(%org_id, round, "update_received");
                        updates.insert(org_id, update);
                    }
                    Some(Ok((org_id, Err(e)))) => {
                        self.telemetry.updates_dropped.add(1, &[]);
                        warn!(%org_id, round, error = %e, "update_dropped");
                    }
                    Some(Err(e)) => {
                        self.telemetry.updates_dropped.add(1, &[]);
                        warn!(round, error = %e, "collection_task_failed");
                    }
                },
            }
        }
        Ok(updates)
    }

    /// Encrypts `weights` per participant and sends them as `round`'s
    /// distribution. Send failures only affect the participant concerned.
    async fn distribute(&self, round: u64, weights: &Arc<WeightSnapshot>) -> Result<()> {
        let cfg = self.session.config();
        let participants = self.session.registry().list_active();
        let permits = Arc::new(Semaphore::new(cfg.max_concurrent_collections));
        let mut tasks = JoinSet::new();
        for p in &participants {
            let blob = self.session.codec().encrypt(weights)?;
            let msg = WeightDistribution { session_id: self.session.id(), round, encrypted_weights: blob.clone() };
            let channel = self.channel.clone();
            let permits = permits.clone();
            let org_id = p.org_id.clone();
            let timeout = cfg.round_timeout();
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => match tokio::time::timeout(timeout, channel.send_weights(&org_id, msg)).await {
                        Ok(r) => r,
                        Err(_) => Err(FederationError::Timeout { org_id: org_id.clone() }),
                    },
                    Err(_) => Err(FederationError::Cancelled),
                };
                (org_id, blob, result)
            });
        }
        let mut delivered = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((org_id, blob, Ok(()))) => {
                    delivered += 1;
                    if let Err(e) = self.session.registry().record_distribution(&org_id, blob) {
                        warn!(%org_id, error = %e, "distribution_not_recorded");
                    }
                }
                Ok((org_id, _, Err(e))) => warn!(%org_id, round, error = %e, "distribution_failed"),
                Err(e) => warn!(round, error = %e, "distribution_task_failed"),
            }
        }
        info!(round, delivered, participants = participants.len(), "weights_distributed");
        Ok(())
    }
}

/// Weighting uses the sample count the participant registered with; the
/// count reported in the update is only checked for shape.
fn accept_update(
    codec: &SecureChannelCodec,
    org_id: &str,
    round: u64,
    registered_samples: u64,
    msg: RoundUpdateMessage,
) -> Result<RoundUpdate> {
    msg.validate(org_id, round)?;
    let weights = codec.decrypt(&msg.encrypted_weights)?;
    if msg.sample_count != registered_samples {
        debug!(org_id, reported = msg.sample_count, registered = registered_samples, "sample_count_differs_from_registration");
    }
    Ok(RoundUpdate {
        weights,
        sample_count: registered_samples,
        training_loss: msg.training_loss,
        validation_accuracy: msg.validation_accuracy,
    })
}

/// Resolves once the flag is set. Never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() { return; }
        if rx.changed().await.is_err() { std::future::pending::<()>().await; }
    }
}
