use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use federation_core::init_tracing;
use tracing::{error, info, warn};

mod federation;
mod health;
mod nats_channel;
mod settings;

use federation::FederationModule;
use health::HealthState;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = settings::load_config("federation-coordinator")?;
    init_tracing(&cfg.service_name, &cfg.log_level)?;
    info!(target: "federation-coordinator", nats = %cfg.nats_url, prefix = %cfg.subject_prefix, "Starting coordinator");

    let base_path = cfg.base_weights_file.clone().context("base_weights_file must be configured")?;
    let base = settings::load_base_weights(&base_path)?;

    let prom = health::init_metrics()?;
    let client = async_nats::connect(cfg.nats_url.as_str()).await.context("connecting to NATS")?;
    info!(target: "federation-coordinator", "Connected to NATS");

    let mut module = FederationModule::new(cfg.clone(), client).await?;
    let ready = Arc::new(AtomicBool::new(false));
    health::start_health_server(cfg.health_port, HealthState::new(module.status_watch(), ready.clone(), prom)).await?;

    let registration = module.spawn_registration_listener().await?;
    let forwarder = module.spawn_metrics_forwarder();
    ready.store(true, Ordering::SeqCst);

    let cancel = module.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown_requested");
            cancel.cancel();
        }
    });

    if module.wait_for_participants(Duration::from_secs(cfg.registration_window_secs)).await {
        match module.run(base).await {
            Ok(outcome) => info!(
                session_id = %outcome.session_id,
                rounds = outcome.rounds_completed,
                converged = outcome.convergence_achieved,
                final_accuracy = ?outcome.final_accuracy,
                "session_finished"
            ),
            Err(e) => error!(error = %e, "session_failed"),
        }
    } else {
        info!("cancelled during registration");
    }

    ready.store(false, Ordering::SeqCst);
    registration.abort();
    forwarder.abort();
    module.shutdown().await?;
    Ok(())
}
