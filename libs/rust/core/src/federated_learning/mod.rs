//! Federated learning: aggregation, convergence and the round orchestrator.

pub mod aggregation;
pub mod convergence;
pub mod coordinator;
pub mod session;

pub use aggregation::{aggregate, RoundUpdate};
pub use convergence::{has_converged, mean_layer_difference};
pub use coordinator::{
    CancelHandle,
    FailureReason,
    RoundOrchestrator,
    SessionOutcome,
    SessionState,
    SessionStatus,
};
pub use session::FederationSession;
