//! The engine (C8): owns the static network, the per-neuron semaphore
//! registry shared across stimulations, and the global response-listener
//! list, and is the sole public entry point for starting work.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Semaphore;

use crate::context::ContextStore;
use crate::error::Result;
use crate::network::Network;
use crate::neuron::Neuron;
use crate::observer::ResponseObserver;
use crate::signal::Signal;
use crate::stimulation::{
    spawn_resumed, spawn_stimulation, ActivationTask, Stimulation, StimulationHandle, StimulationOptions,
};

/// Engine-wide defaults (§6: `options = { autoCleanupContexts? }`, plus the
/// ambient `max_hops`/`concurrency` defaults called for in the crate-level
/// configuration note).
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub auto_cleanup_contexts: bool,
    pub default_max_hops: Option<usize>,
    pub default_concurrency: Option<usize>,
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_cleanup_contexts(mut self, enabled: bool) -> Self {
        self.auto_cleanup_contexts = enabled;
        self
    }

    pub fn with_default_max_hops(mut self, max_hops: usize) -> Self {
        self.default_max_hops = Some(max_hops);
        self
    }

    pub fn with_default_concurrency(mut self, concurrency: usize) -> Self {
        self.default_concurrency = Some(concurrency);
        self
    }
}

/// Opaque handle returned by [`Engine::add_response_listener`]; pass it to
/// [`Engine::remove_response_listener`] to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The engine: a built network plus the cross-stimulation shared state
/// (§4.7, §4.9). Cheap to clone (everything inside is already `Arc`-backed),
/// so a single `Engine` value can be handed to many callers.
#[derive(Clone)]
pub struct Engine {
    network: Arc<Network>,
    neuron_semaphores: Arc<DashMap<String, Arc<Semaphore>>>,
    listeners: Arc<RwLock<Vec<(ListenerId, Arc<dyn ResponseObserver>)>>>,
    next_listener_id: Arc<AtomicU64>,
    options: EngineOptions,
}

impl Engine {
    /// Build an engine from a finished neuron list. Duplicate names and
    /// non-positive concurrency caps (already rejected at `NeuronBuilder`
    /// time, but re-checked here for neurons assembled by hand) surface as
    /// synchronous construction errors (§7.1).
    pub fn new(neurons: Vec<Neuron>, options: EngineOptions) -> Result<Self> {
        let neuron_semaphores = Arc::new(DashMap::new());
        for neuron in &neurons {
            if let Some(cap) = neuron.max_concurrency {
                neuron_semaphores.insert(neuron.name.clone(), Arc::new(Semaphore::new(cap.get())));
            }
        }
        let network = Arc::new(Network::build(neurons)?);
        Ok(Self {
            network,
            neuron_semaphores,
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_listener_id: Arc::new(AtomicU64::new(0)),
            options,
        })
    }

    /// Register a global observer, applied to every stimulation started
    /// after this call (not retroactively to ones already running).
    pub fn add_response_listener(&self, listener: Arc<dyn ResponseObserver>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn remove_response_listener(&self, id: ListenerId) {
        self.listeners.write().retain(|(existing, _)| *existing != id);
    }

    fn snapshot_listeners(&self) -> Vec<Arc<dyn ResponseObserver>> {
        self.listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect()
    }

    fn build_stimulation(&self, stimulation_id: String, options: &StimulationOptions) -> Arc<Stimulation> {
        let merged_max_hops = options.max_hops.or(self.options.default_max_hops);
        let merged_concurrency = options.concurrency.or(self.options.default_concurrency);
        let context = match &options.context_values {
            Some(values) => Arc::new(ContextStore::from_snapshot(values.clone())),
            None => Arc::new(ContextStore::new()),
        };

        let effective = StimulationOptions {
            stimulation_id: Some(stimulation_id.clone()),
            abort_signal: options.abort_signal.clone(),
            max_hops: merged_max_hops,
            concurrency: merged_concurrency,
            on_response: options.on_response.clone(),
            context_values: None,
            name_allowed: options.name_allowed.clone(),
            auto_cleanup_contexts: options.auto_cleanup_contexts,
        };

        Arc::new(Stimulation::new(
            stimulation_id,
            Arc::clone(&self.network),
            Arc::clone(&self.neuron_semaphores),
            self.snapshot_listeners(),
            context,
            &effective,
            self.options.auto_cleanup_contexts,
        ))
    }

    fn resolve_stimulation_id(options: &StimulationOptions) -> String {
        options
            .stimulation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// Start propagation from one seed signal.
    pub async fn stimulate(&self, signal: Signal, options: StimulationOptions) -> StimulationHandle {
        let stimulation_id = Self::resolve_stimulation_id(&options);
        let stimulation = self.build_stimulation(stimulation_id, &options);
        tracing::info!(stimulation = %stimulation.stimulation_id(), collateral = %signal.collateral_name, "stimulation started");
        spawn_stimulation(stimulation, signal).await
    }

    /// Start propagation from several seed signals at once. Each signal
    /// seeds the same stimulation (shared context, shared queue, shared
    /// trace) rather than spawning independent stimulations.
    pub async fn stimulate_many(&self, signals: Vec<Signal>, options: StimulationOptions) -> StimulationHandle {
        let stimulation_id = Self::resolve_stimulation_id(&options);
        let stimulation = self.build_stimulation(stimulation_id, &options);
        tracing::info!(stimulation = %stimulation.stimulation_id(), count = signals.len(), "stimulation started (batch seed)");
        for signal in signals {
            // seed() only ever appends to the shared queue, so seeding
            // sequentially before the driver task is spawned is equivalent
            // to seeding all of them "at once".
            stimulation.seed(signal).await;
        }
        let driven = Arc::clone(&stimulation);
        let driver = tokio::spawn(async move { driven.run().await });
        StimulationHandle::new(stimulation, driver)
    }

    /// Resume work from a previously logged set of failed (or otherwise
    /// saved) activation tasks, typically replayed with the context
    /// snapshot the original stimulation produced (§4.4, §9(i)).
    pub async fn activate(&self, tasks: Vec<ActivationTask>, options: StimulationOptions) -> StimulationHandle {
        let stimulation_id = Self::resolve_stimulation_id(&options);
        let stimulation = self.build_stimulation(stimulation_id, &options);
        tracing::info!(stimulation = %stimulation.stimulation_id(), count = tasks.len(), "stimulation resumed");
        spawn_resumed(stimulation, tasks).await
    }

    // -- Network introspection (§6) --

    pub fn strongly_connected_components(&self) -> Vec<Vec<String>> {
        self.network.strongly_connected_components()
    }

    pub fn scc_index_of(&self, neuron_name: &str) -> Option<usize> {
        self.network.scc_index_of(neuron_name)
    }

    pub fn scc_set_of(&self, neuron_name: &str) -> Option<HashSet<String>> {
        self.network.scc_set_of(neuron_name)
    }

    pub fn can_neuron_be_guaranteed_done(
        &self,
        neuron_name: &str,
        active_counts_by_scc: &std::collections::HashMap<usize, usize>,
    ) -> bool {
        self.network.can_neuron_be_guaranteed_done(neuron_name, active_counts_by_scc)
    }

    pub fn neuron_count(&self) -> usize {
        self.network.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axon::Axon;
    use crate::neuron::neuron;
    use crate::reaction::{reaction, ReactionOutput};

    fn echo_network() -> Vec<Neuron> {
        vec![neuron("echo", Axon::new().with_output("out", "echoed"))
            .bind("in", reaction(|payload, _axon, _ctx| async move {
                Ok(ReactionOutput::One(Signal::new("echoed", payload)))
            }))
            .build()]
    }

    #[tokio::test]
    async fn stimulate_runs_a_single_neuron_to_completion() {
        let engine = Engine::new(echo_network(), EngineOptions::new()).unwrap();
        let handle = engine
            .stimulate(Signal::new("in", serde_json::json!("hi")), StimulationOptions::new())
            .await;
        handle.wait_until_complete().await.unwrap();
        assert_eq!(handle.all_activation_tasks().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_neuron_name_is_a_construction_error() {
        let a = neuron("dup", Axon::new()).build();
        let b = neuron("dup", Axon::new()).build();
        let err = Engine::new(vec![a, b], EngineOptions::new()).unwrap_err();
        assert!(err.is_construction());
    }

    #[tokio::test]
    async fn global_listener_applies_to_stimulations_started_after_registration() {
        use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
        let engine = Engine::new(echo_network(), EngineOptions::new()).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        engine.add_response_listener(crate::observer::observer(move |_record| {
            let seen2 = Arc::clone(&seen2);
            async move {
                seen2.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(())
            }
        }));
        let handle = engine
            .stimulate(Signal::new("in", serde_json::json!(1)), StimulationOptions::new())
            .await;
        handle.wait_until_complete().await.unwrap();
        assert!(seen.load(AtomicOrdering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn scc_introspection_is_reachable_from_the_engine() {
        let engine = Engine::new(echo_network(), EngineOptions::new()).unwrap();
        assert_eq!(engine.strongly_connected_components().len(), 1);
        assert!(engine.scc_index_of("echo").is_some());
        assert!(engine.scc_index_of("missing").is_none());
    }
}
