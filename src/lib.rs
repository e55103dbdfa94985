use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("resource {0} has no spec")]
    MissingSpec(String),

    #[error("namespace lookup failed for {0}: {1}")]
    NamespaceLookup(String, String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::SerializationError(_) => "SerializationError",
            Error::KubeError(_) => "KubeError",
            Error::MissingSpec(_) => "MissingSpec",
            Error::NamespaceLookup(_, _) => "NamespaceLookup",
        }
    }
}

/// Watch event model and tombstone recovery
pub mod events;

/// Change classification for update events
pub mod classifier;

/// Per-kind watch notification handlers
pub mod handlers;

/// Namespace-scoped watcher group lifecycle
pub mod namespaces;

/// Sync queue port
pub mod queue;

pub mod controller;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;

pub use controller::{run, State};
pub use metrics::Metrics;

/// Custom resource definitions
pub mod resources;
