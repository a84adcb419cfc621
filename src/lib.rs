//! `synapse_core`: an in-process signal-propagation engine.
//!
//! Typed events ("signals") are routed between user-defined processing units
//! ("neurons") along a statically indexed graph. A [`Stimulation`] drains a
//! signal to quiescence — running every reachable reaction, collecting
//! outputs, and re-enqueuing them transitively — while exposing a live trace
//! of every hop through the [`observer`] fan-out.

pub mod axon;
pub mod context;
pub mod engine;
pub mod error;
pub mod network;
pub mod neuron;
pub mod observer;
pub mod reaction;
pub mod signal;
pub mod stimulation;

pub use axon::Axon;
pub use context::{ContextHandle, ContextStore};
pub use engine::{Engine, EngineOptions, ListenerId};
pub use error::{Error, Result};
pub use network::Network;
pub use neuron::{neuron, Dendrite, Neuron, NeuronBuilder};
pub use observer::{observer, ResponseObserver, ResponseRecord};
pub use reaction::{reaction, Reaction, ReactionOutput};
pub use signal::{collateral, Collateral, Signal};
pub use stimulation::{ActivationTask, FailReason, FailedTask, StimulationHandle, StimulationOptions};
