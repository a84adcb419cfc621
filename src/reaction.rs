//! The reaction contract: `(payload, axon, contextHandle) -> R` where `R` is
//! zero, one, or many output signals (§3, §9 "Return-type polyvariance").

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::axon::Axon;
use crate::context::ContextHandle;
use crate::error::Result;
use crate::signal::Signal;

/// Normalised reaction output. The engine only ever sees this shape — the
/// polyvariance of "nothing / one signal / many signals / a future of any of
/// those" in the source spec is handled at the call site that builds one of
/// these, never leaked into the scheduler or the observer API.
#[derive(Debug, Clone, Default)]
pub enum ReactionOutput {
    #[default]
    None,
    One(Signal),
    Many(Vec<Signal>),
}

impl ReactionOutput {
    /// Flatten to the list of signals the scheduler should enqueue
    /// activations for. Order is preserved for `Many`.
    pub fn into_signals(self) -> Vec<Signal> {
        match self {
            ReactionOutput::None => Vec::new(),
            ReactionOutput::One(signal) => vec![signal],
            ReactionOutput::Many(signals) => signals,
        }
    }
}

impl From<Signal> for ReactionOutput {
    fn from(signal: Signal) -> Self {
        ReactionOutput::One(signal)
    }
}

impl From<Option<Signal>> for ReactionOutput {
    fn from(signal: Option<Signal>) -> Self {
        match signal {
            Some(signal) => ReactionOutput::One(signal),
            None => ReactionOutput::None,
        }
    }
}

impl From<Vec<Signal>> for ReactionOutput {
    fn from(signals: Vec<Signal>) -> Self {
        ReactionOutput::Many(signals)
    }
}

impl FromIterator<Signal> for ReactionOutput {
    fn from_iter<I: IntoIterator<Item = Signal>>(iter: I) -> Self {
        ReactionOutput::Many(iter.into_iter().collect())
    }
}

/// A dendrite's reaction body.
///
/// Implemented with `#[async_trait]` in the teacher's style (every seam
/// between layers in the teacher crate is an async trait) so reactions may
/// suspend on their own I/O without the scheduler caring.
#[async_trait]
pub trait Reaction: Send + Sync {
    async fn fire(&self, payload: serde_json::Value, axon: Axon, ctx: ContextHandle) -> Result<ReactionOutput>;
}

type ReactionFuture = Pin<Box<dyn Future<Output = Result<ReactionOutput>> + Send>>;

/// Adapts a plain closure into a [`Reaction`], so callers can write
/// `reaction(|payload, axon, ctx| async move { ... })` instead of defining a
/// struct and an `impl Reaction for ...` by hand.
struct FnReaction<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Reaction for FnReaction<F>
where
    F: Fn(serde_json::Value, Axon, ContextHandle) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ReactionOutput>> + Send + 'static,
{
    async fn fire(&self, payload: serde_json::Value, axon: Axon, ctx: ContextHandle) -> Result<ReactionOutput> {
        (self.f)(payload, axon, ctx).await
    }
}

/// Build a [`Reaction`] from a closure returning a future. The common case
/// for test fixtures and simple neurons.
pub fn reaction<F, Fut>(f: F) -> std::sync::Arc<dyn Reaction>
where
    F: Fn(serde_json::Value, Axon, ContextHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ReactionOutput>> + Send + 'static,
{
    std::sync::Arc::new(FnReaction { f })
}

/// Helper kept for call sites that want to return a boxed future explicitly
/// (e.g. when the closure captures non-`'static` borrows through an `Arc`).
#[allow(dead_code)]
pub(crate) fn boxed_reaction_future<Fut>(fut: Fut) -> ReactionFuture
where
    Fut: Future<Output = Result<ReactionOutput>> + Send + 'static,
{
    Box::pin(fut)
}
