use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use federation_core::{FederationConfig, WeightSnapshot};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    pub service_name: String,
    pub nats_url: String,
    pub log_level: String,
    pub health_port: u16,
    /// Root of every NATS subject this coordinator uses.
    pub subject_prefix: String,
    pub base_weights_file: Option<PathBuf>,
    pub registration_window_secs: u64,
    #[serde(default)]
    pub federation: FederationConfig,
}

/// Defaults, then `FEDERATION_CONFIG_FILE`, then `FEDERATION__*` env vars
/// (`FEDERATION__FEDERATION__PRIVACY_EPSILON=0.5` reaches the nested section).
pub fn load_config(service: &str) -> Result<CoordinatorConfig> {
    let mut builder = config::Config::builder()
        .set_default("service_name", service)?
        .set_default("nats_url", "127.0.0.1:4222")?
        .set_default("log_level", "info")?
        .set_default("health_port", 8080)?
        .set_default("subject_prefix", "federation")?
        .set_default("registration_window_secs", 60)?;

    if let Ok(file) = std::env::var("FEDERATION_CONFIG_FILE") {
        builder = builder.add_source(config::File::with_name(&file).required(false));
    }
    builder = builder.add_source(config::Environment::with_prefix("FEDERATION").separator("__").try_parsing(true));

    let cfg: CoordinatorConfig = builder.build()?.try_deserialize()?;
    cfg.federation.validate()?;
    Ok(cfg)
}

pub fn load_base_weights(path: &Path) -> Result<WeightSnapshot> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading base weights {}", path.display()))?;
    let snapshot: WeightSnapshot =
        serde_json::from_str(&text).with_context(|| format!("parsing base weights {}", path.display()))?;
    snapshot.validate()?;
    info!(layers = snapshot.layer_count(), params = snapshot.parameter_count(), "base weights loaded");
    Ok(snapshot)
}
