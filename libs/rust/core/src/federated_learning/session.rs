//! The owned state of one federation: configuration, registry, session key,
//! round counter, current global snapshot and training history.

use std::sync::Arc;
use uuid::Uuid;

use crate::codec::SecureChannelCodec;
use crate::config::FederationConfig;
use crate::error::Result;
use crate::metrics::TrainingHistory;
use crate::registry::{ParticipantRegistry, RegistryPolicy};
use crate::weights::WeightSnapshot;

pub struct FederationSession {
    id: Uuid,
    config: FederationConfig,
    registry: Arc<ParticipantRegistry>,
    codec: Arc<SecureChannelCodec>,
    pub(crate) round: u64,
    pub(crate) global: Option<Arc<WeightSnapshot>>,
    pub(crate) history: TrainingHistory,
}

impl FederationSession {
    pub fn new(config: FederationConfig) -> Result<Self> {
        let registry = Arc::new(ParticipantRegistry::new(RegistryPolicy {
            min_sample_count: config.min_sample_count,
            max_participants: config.max_participants,
        }));
        Self::with_registry(config, registry)
    }

    /// Builds a session around an existing registry, e.g. one shared with a
    /// registration listener.
    pub fn with_registry(config: FederationConfig, registry: Arc<ParticipantRegistry>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            config,
            registry,
            codec: Arc::new(SecureChannelCodec::generate()),
            round: 0,
            global: None,
            history: TrainingHistory::new(),
        })
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn config(&self) -> &FederationConfig { &self.config }
    pub fn registry(&self) -> &Arc<ParticipantRegistry> { &self.registry }
    pub fn codec(&self) -> &Arc<SecureChannelCodec> { &self.codec }
    pub fn round(&self) -> u64 { self.round }
    pub fn global_weights(&self) -> Option<&Arc<WeightSnapshot>> { self.global.as_ref() }
    pub fn history(&self) -> &TrainingHistory { &self.history }

    pub(crate) fn clear(&mut self) {
        self.id = Uuid::new_v4();
        self.round = 0;
        self.global = None;
        self.history = TrainingHistory::new();
    }
}
