//! Error types for the signal-propagation engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure kind `synapse_core` surfaces (§4.12 / §7).
///
/// Variants carry rendered messages rather than nested `#[source]` errors so
/// that a single `Error` can be stored once in a stimulation's failure latch
/// and read back by every `wait_until_complete()` caller (join results and
/// shared-future style consumers need `Clone`, which `anyhow::Error` and
/// `serde_json::Error` do not provide).
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("duplicate neuron name: {0}")]
    DuplicateNeuron(String),

    #[error("neuron {neuron} has a non-positive concurrency cap: {value}")]
    InvalidConcurrency { neuron: String, value: i64 },

    #[error("reaction on neuron {neuron} failed: {message}")]
    Reaction { neuron: String, message: String },

    #[error("response observer failed: {0}")]
    Observer(String),

    #[error("activation on neuron {neuron} exceeded max_hops ({max_hops}) at hop {hop}")]
    HopLimitExceeded {
        neuron: String,
        hop: usize,
        max_hops: usize,
    },

    #[error("stimulation was aborted with work outstanding")]
    Aborted,

    #[error("failed to convert payload for collateral {collateral}: {message}")]
    InvalidPayload { collateral: String, message: String },

    #[error("unknown neuron: {0}")]
    UnknownNeuron(String),

    #[error("scheduler task join error: {0}")]
    Join(String),

    #[error("other error: {0}")]
    Other(String),
}

impl Error {
    /// Whether this error kind represents a cooperative, expected stop
    /// condition rather than a programming mistake.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted)
    }

    /// Whether this error originates from construction (raised synchronously
    /// from `Engine::new`, never from a running stimulation).
    pub fn is_construction(&self) -> bool {
        matches!(self, Error::DuplicateNeuron(_) | Error::InvalidConcurrency { .. })
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
