//! The stimulation scheduler (C7): drives one in-flight propagation from a
//! seed signal to quiescence, enforcing hop limits, per-neuron and global
//! concurrency caps, response-observer fan-out, and SCC-based context
//! cleanup as it goes (§4.5 - §4.10).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::context::{ContextHandle, ContextStore};
use crate::error::{Error, Result};
use crate::network::Network;
use crate::observer::{self, ResponseObserver, ResponseRecord};
use crate::signal::Signal;

/// One unit of work the scheduler has decided to run: "this neuron's
/// dendrite bound to this collateral, fed this signal". The four named
/// fields are the stable wire schema (§6); `dendrite_index` is an
/// internal-only addition that disambiguates multiple dendrites on one
/// neuron bound to the same collateral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationTask {
    pub stimulation_id: String,
    pub neuron_name: String,
    pub input_collateral_name: String,
    pub input_signal: Signal,
    pub dendrite_index: usize,
}

#[derive(Debug, Clone)]
struct QueuedTask {
    task: ActivationTask,
    hop: usize,
}

/// Why an [`ActivationTask`] never produced a response record (§4.10).
#[derive(Debug, Clone)]
pub enum FailReason {
    ReactionError(String),
    HopLimitExceeded { hop: usize, max_hops: usize },
    AbortedWhileQueued,
}

#[derive(Debug, Clone)]
pub struct FailedTask {
    pub task: ActivationTask,
    pub reason: FailReason,
}

/// Per-stimulation knobs (§4.4, §4.8). Every field is optional; omitted
/// fields fall back to the engine-wide default.
#[derive(Default)]
pub struct StimulationOptions {
    pub stimulation_id: Option<String>,
    pub abort_signal: Option<CancellationToken>,
    pub max_hops: Option<usize>,
    pub concurrency: Option<usize>,
    pub on_response: Option<Arc<dyn ResponseObserver>>,
    pub context_values: Option<HashMap<String, serde_json::Value>>,
    pub name_allowed: Option<Arc<dyn Fn(&str) -> bool + Send + Sync>>,
    pub auto_cleanup_contexts: Option<bool>,
}

impl StimulationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stimulation_id(mut self, id: impl Into<String>) -> Self {
        self.stimulation_id = Some(id.into());
        self
    }

    pub fn with_abort_signal(mut self, token: CancellationToken) -> Self {
        self.abort_signal = Some(token);
        self
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = Some(max_hops);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_response_listener(mut self, listener: Arc<dyn ResponseObserver>) -> Self {
        self.on_response = Some(listener);
        self
    }

    pub fn with_context_values(mut self, values: HashMap<String, serde_json::Value>) -> Self {
        self.context_values = Some(values);
        self
    }

    pub fn with_name_allowed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.name_allowed = Some(Arc::new(f));
        self
    }

    pub fn with_auto_cleanup_contexts(mut self, enabled: bool) -> Self {
        self.auto_cleanup_contexts = Some(enabled);
        self
    }
}

/// One run of propagation, from a seed signal (or a resumed task list)
/// through to quiescence. Owned by an `Arc` so every spawned activation
/// task can reach back into shared bookkeeping.
pub(crate) struct Stimulation {
    stimulation_id: String,
    network: Arc<Network>,
    neuron_semaphores: Arc<DashMap<String, Arc<Semaphore>>>,
    global_listeners: Vec<Arc<dyn ResponseObserver>>,
    local_listener: Option<Arc<dyn ResponseObserver>>,
    context: Arc<ContextStore>,
    queue: SyncMutex<VecDeque<QueuedTask>>,
    active_by_neuron: DashMap<String, usize>,
    active_by_scc: DashMap<usize, usize>,
    queued_by_scc: DashMap<usize, usize>,
    failed_tasks: SyncMutex<Vec<FailedTask>>,
    all_tasks: SyncMutex<Vec<ActivationTask>>,
    first_error: SyncMutex<Option<Error>>,
    abort_token: Option<CancellationToken>,
    max_hops: Option<usize>,
    global_semaphore: Option<Arc<Semaphore>>,
    name_allowed: Arc<dyn Fn(&str) -> bool + Send + Sync>,
    auto_cleanup_contexts: bool,
}

impl Stimulation {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        stimulation_id: String,
        network: Arc<Network>,
        neuron_semaphores: Arc<DashMap<String, Arc<Semaphore>>>,
        global_listeners: Vec<Arc<dyn ResponseObserver>>,
        context: Arc<ContextStore>,
        options: &StimulationOptions,
        default_auto_cleanup_contexts: bool,
    ) -> Self {
        Self {
            stimulation_id,
            network,
            neuron_semaphores,
            global_listeners,
            local_listener: options.on_response.clone(),
            context,
            queue: SyncMutex::new(VecDeque::new()),
            active_by_neuron: DashMap::new(),
            active_by_scc: DashMap::new(),
            queued_by_scc: DashMap::new(),
            failed_tasks: SyncMutex::new(Vec::new()),
            all_tasks: SyncMutex::new(Vec::new()),
            first_error: SyncMutex::new(None),
            abort_token: options.abort_signal.clone(),
            max_hops: options.max_hops,
            global_semaphore: options.concurrency.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            name_allowed: options
                .name_allowed
                .clone()
                .unwrap_or_else(|| Arc::new(|_: &str| true)),
            auto_cleanup_contexts: options.auto_cleanup_contexts.unwrap_or(default_auto_cleanup_contexts),
        }
    }

    pub(crate) fn stimulation_id(&self) -> &str {
        &self.stimulation_id
    }

    pub(crate) fn context(&self) -> &Arc<ContextStore> {
        &self.context
    }

    pub(crate) fn failed_tasks(&self) -> Vec<FailedTask> {
        self.failed_tasks.lock().clone()
    }

    pub(crate) fn all_activation_tasks(&self) -> Vec<ActivationTask> {
        self.all_tasks.lock().clone()
    }

    /// Seed the scheduler with the initial tasks produced from `signal`'s
    /// subscribers, emitting a synthetic root response record first so
    /// callers always see at least one record per `stimulate()` call (P1).
    pub(crate) async fn seed(&self, signal: Signal) {
        let subs = self.network.subscribers_for(&signal.collateral_name);
        let prospective: Vec<QueuedTask> = subs
            .iter()
            .map(|&(n_idx, d_idx)| QueuedTask {
                task: ActivationTask {
                    stimulation_id: self.stimulation_id.clone(),
                    neuron_name: self.network.neuron_by_index(n_idx).name.clone(),
                    input_collateral_name: signal.collateral_name.clone(),
                    input_signal: signal.clone(),
                    dendrite_index: d_idx,
                },
                hop: 0,
            })
            .collect();

        let queue_length = { self.queue.lock().len() + prospective.len() };
        let record = ResponseRecord {
            stimulation_id: self.stimulation_id.clone(),
            hop_index: 0,
            neuron_name: String::new(),
            input_collateral_name: signal.collateral_name.clone(),
            input_signal: signal.clone(),
            output_signal: Some(signal),
            queue_length,
            duration: Duration::from_millis(0),
            error: None,
        };
        self.notify(record).await;

        if subs.is_empty() {
            tracing::warn!(collateral = %self.stimulation_id, "seed signal has no subscribers");
        }
        self.enqueue_all(prospective);
    }

    /// Seed the scheduler directly from a resumed list of activation tasks
    /// (the `activate(...)` entry point, §4.4), with no synthetic root
    /// record — each task is treated as if it had just been enqueued by its
    /// (unknown, already-settled) predecessor.
    fn seed_resumed(&self, tasks: Vec<ActivationTask>) {
        let queued = tasks.into_iter().map(|task| QueuedTask { task, hop: 0 }).collect();
        self.enqueue_all(queued);
    }

    fn enqueue_all(&self, tasks: Vec<QueuedTask>) {
        if tasks.is_empty() {
            return;
        }
        for qt in &tasks {
            if let Some(neuron_idx) = self.network.neuron_index(&qt.task.neuron_name) {
                let scc = self.network.scc_index_of_idx(neuron_idx);
                *self.queued_by_scc.entry(scc).or_insert(0) += 1;
            }
        }
        self.queue.lock().extend(tasks);
    }

    async fn notify(&self, record: ResponseRecord) {
        let mut listeners = self.global_listeners.clone();
        if let Some(local) = &self.local_listener {
            listeners.push(Arc::clone(local));
        }
        if let Err(err) = observer::fan_out(&listeners, record).await {
            self.latch_error(err);
        }
    }

    fn latch_error(&self, err: Error) {
        let mut guard = self.first_error.lock();
        if guard.is_none() {
            *guard = Some(err);
        }
    }

    fn maybe_cleanup_scc(&self, scc_idx: usize) {
        if !self.auto_cleanup_contexts {
            return;
        }
        let reachable = self.network.scc_reachable_from(scc_idx);
        let idle = reachable.iter().all(|r| {
            self.active_by_scc.get(r).map(|c| *c).unwrap_or(0) == 0
                && self.queued_by_scc.get(r).map(|c| *c).unwrap_or(0) == 0
        });
        if !idle {
            return;
        }
        for &neuron_idx in self.network.scc_members(scc_idx) {
            let name = self.network.neuron_by_index(neuron_idx).name.clone();
            self.context.delete(&name);
            tracing::debug!(neuron = %name, stimulation = %self.stimulation_id, "context cleaned up");
        }
    }

    async fn emit_and_enqueue(
        &self,
        task: &ActivationTask,
        hop: usize,
        duration: Duration,
        signals: Vec<Signal>,
        error_msg: Option<String>,
    ) {
        if signals.is_empty() {
            let queue_length = self.queue.lock().len();
            let record = ResponseRecord {
                stimulation_id: self.stimulation_id.clone(),
                hop_index: hop,
                neuron_name: task.neuron_name.clone(),
                input_collateral_name: task.input_collateral_name.clone(),
                input_signal: task.input_signal.clone(),
                output_signal: None,
                queue_length,
                duration,
                error: error_msg,
            };
            self.notify(record).await;
            return;
        }

        for signal in signals {
            let subs = self.network.subscribers_for(&signal.collateral_name);
            let prospective: Vec<QueuedTask> = subs
                .iter()
                .map(|&(n_idx, d_idx)| QueuedTask {
                    task: ActivationTask {
                        stimulation_id: self.stimulation_id.clone(),
                        neuron_name: self.network.neuron_by_index(n_idx).name.clone(),
                        input_collateral_name: signal.collateral_name.clone(),
                        input_signal: signal.clone(),
                        dendrite_index: d_idx,
                    },
                    hop: hop + 1,
                })
                .collect();

            let queue_length = self.queue.lock().len() + prospective.len();
            let record = ResponseRecord {
                stimulation_id: self.stimulation_id.clone(),
                hop_index: hop,
                neuron_name: task.neuron_name.clone(),
                input_collateral_name: task.input_collateral_name.clone(),
                input_signal: task.input_signal.clone(),
                output_signal: Some(signal.clone()),
                queue_length,
                duration,
                error: error_msg.clone(),
            };
            self.notify(record).await;

            if prospective.is_empty() {
                tracing::trace!(collateral = %signal.collateral_name, "signal emitted with no subscribers");
            } else {
                self.enqueue_all(prospective);
            }
        }
    }

    /// Release the SCC slot a caller claimed (via the `active_by_scc` bump in
    /// `run`) on this task's behalf, then re-check §4.6 idleness. A no-op for
    /// tasks whose neuron was never resolved (nothing was claimed for them).
    fn release_scc_slot(&self, scc_idx: Option<usize>) {
        let Some(scc_idx) = scc_idx else { return };
        if let Some(mut c) = self.active_by_scc.get_mut(&scc_idx) {
            if *c > 0 {
                *c -= 1;
            }
        }
        self.maybe_cleanup_scc(scc_idx);
    }

    /// `claimed_scc` is the SCC index `run` already bumped into
    /// `active_by_scc` for this task, at pop time, before it touched
    /// `queued_by_scc` — it is released here exactly once, on every exit
    /// path, so the task's SCC is never counted as idle in the window
    /// between leaving the queue and actually executing (§4.6).
    async fn execute_and_propagate(self: Arc<Self>, queued: QueuedTask, claimed_scc: Option<usize>) {
        let QueuedTask { task, hop } = queued;

        if let Some(max_hops) = self.max_hops {
            if hop > max_hops {
                self.failed_tasks.lock().push(FailedTask {
                    task: task.clone(),
                    reason: FailReason::HopLimitExceeded { hop, max_hops },
                });
                self.latch_error(Error::HopLimitExceeded {
                    neuron: task.neuron_name.clone(),
                    hop,
                    max_hops,
                });
                tracing::warn!(neuron = %task.neuron_name, hop, max_hops, "hop limit exceeded");
                self.release_scc_slot(claimed_scc);
                return;
            }
        }

        let Some(neuron_idx) = self.network.neuron_index(&task.neuron_name) else {
            self.failed_tasks.lock().push(FailedTask {
                task: task.clone(),
                reason: FailReason::ReactionError(format!("unknown neuron: {}", task.neuron_name)),
            });
            self.latch_error(Error::UnknownNeuron(task.neuron_name.clone()));
            self.release_scc_slot(claimed_scc);
            return;
        };

        let axon = self.network.neuron_by_index(neuron_idx).axon.clone();
        let dendrite_reaction = Arc::clone(&self.network.dendrite(neuron_idx, task.dendrite_index).reaction);
        let scc_idx = self.network.scc_index_of_idx(neuron_idx);

        let neuron_permit = match self.neuron_semaphores.get(&task.neuron_name) {
            Some(sem) => match Arc::clone(sem.value()).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => None,
            },
            None => None,
        };
        let global_permit = match &self.global_semaphore {
            Some(sem) => match Arc::clone(sem).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => None,
            },
            None => None,
        };

        *self.active_by_neuron.entry(task.neuron_name.clone()).or_insert(0) += 1;

        tracing::debug!(stimulation = %self.stimulation_id, neuron = %task.neuron_name, hop, "activation start");
        let started = Instant::now();
        let ctx_handle = ContextHandle::new(task.neuron_name.clone(), Arc::clone(&self.context));
        let result = dendrite_reaction
            .fire(task.input_signal.payload.clone(), axon, ctx_handle)
            .await;
        let duration = started.elapsed();
        self.all_tasks.lock().push(task.clone());

        match result {
            Ok(output) => {
                let signals = output.into_signals();
                self.emit_and_enqueue(&task, hop, duration, signals, None).await;
            }
            Err(err) => {
                tracing::error!(stimulation = %self.stimulation_id, neuron = %task.neuron_name, error = %err, "reaction failed");
                self.failed_tasks.lock().push(FailedTask {
                    task: task.clone(),
                    reason: FailReason::ReactionError(err.to_string()),
                });
                self.emit_and_enqueue(&task, hop, duration, Vec::new(), Some(err.to_string())).await;
                self.latch_error(Error::Reaction {
                    neuron: task.neuron_name.clone(),
                    message: err.to_string(),
                });
            }
        }

        drop(neuron_permit);
        drop(global_permit);
        if let Some(mut c) = self.active_by_neuron.get_mut(&task.neuron_name) {
            if *c > 0 {
                *c -= 1;
            }
        }
        tracing::debug!(stimulation = %self.stimulation_id, neuron = %task.neuron_name, hop, "activation end");

        self.release_scc_slot(Some(scc_idx));
    }

    fn drain_queue_into_failed_aborted(&self) {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            return;
        }
        let mut failed = self.failed_tasks.lock();
        while let Some(qt) = queue.pop_front() {
            failed.push(FailedTask {
                task: qt.task,
                reason: FailReason::AbortedWhileQueued,
            });
        }
    }

    /// Drive the scheduler loop to quiescence: repeatedly pop ready tasks
    /// off the queue, spawn one activation future per task, and wait for at
    /// least one to finish before looking at the queue again (newly
    /// enqueued descendants only become visible on the next pass). Returns
    /// `Err` if the stimulation was aborted with outstanding work, or if any
    /// activation/observer ultimately failed — but always drains every
    /// already-spawned task first (§4.8).
    pub(crate) async fn run(self: Arc<Self>) -> Result<()> {
        let mut join_set: JoinSet<()> = JoinSet::new();
        let mut aborted_with_work = false;

        loop {
            let is_aborted = self.abort_token.as_ref().map(|t| t.is_cancelled()).unwrap_or(false);

            if is_aborted {
                let queue_had_work = !self.queue.lock().is_empty();
                if queue_had_work {
                    aborted_with_work = true;
                    self.drain_queue_into_failed_aborted();
                }
            } else {
                loop {
                    let maybe_task = { self.queue.lock().pop_front() };
                    let Some(queued) = maybe_task else { break };

                    // Claim the task's SCC slot in `active_by_scc` *before*
                    // releasing its `queued_by_scc` slot, so a popped-but-
                    // not-yet-running task is always counted by at least one
                    // of the two counters `maybe_cleanup_scc` (§4.6) reads —
                    // never briefly by neither.
                    let claimed_scc = self.network.neuron_index(&queued.task.neuron_name).map(|neuron_idx| {
                        let scc = self.network.scc_index_of_idx(neuron_idx);
                        *self.active_by_scc.entry(scc).or_insert(0) += 1;
                        scc
                    });
                    if let Some(scc) = claimed_scc {
                        if let Some(mut c) = self.queued_by_scc.get_mut(&scc) {
                            if *c > 0 {
                                *c -= 1;
                            }
                        }
                    }

                    if !(self.name_allowed)(&queued.task.neuron_name) {
                        tracing::debug!(neuron = %queued.task.neuron_name, "dropped: name not allowed");
                        self.release_scc_slot(claimed_scc);
                        continue;
                    }

                    let this = Arc::clone(&self);
                    join_set.spawn(async move { this.execute_and_propagate(queued, claimed_scc).await });
                }
            }

            if join_set.is_empty() {
                break;
            }
            let _ = join_set.join_next().await;
        }

        if aborted_with_work {
            return Err(Error::Aborted);
        }
        if let Some(err) = self.first_error.lock().take() {
            return Err(err);
        }
        Ok(())
    }
}

/// Handle to a running stimulation, returned by `Engine::stimulate`. Exposes
/// the three read surfaces §4.5 promises: completion, failed tasks, and the
/// full activation-task trace.
pub struct StimulationHandle {
    stimulation: Arc<Stimulation>,
    driver: tokio::sync::Mutex<Option<tokio::task::JoinHandle<Result<()>>>>,
    cached_result: tokio::sync::OnceCell<std::result::Result<(), String>>,
}

impl StimulationHandle {
    pub(crate) fn new(stimulation: Arc<Stimulation>, driver: tokio::task::JoinHandle<Result<()>>) -> Self {
        Self {
            stimulation,
            driver: tokio::sync::Mutex::new(Some(driver)),
            cached_result: tokio::sync::OnceCell::new(),
        }
    }

    pub fn stimulation_id(&self) -> &str {
        self.stimulation.stimulation_id()
    }

    /// Resolve once the scheduler has drained to quiescence. Safe to call
    /// more than once, and from more than one caller — the underlying
    /// driver task is only ever joined once.
    pub async fn wait_until_complete(&self) -> Result<()> {
        let rendered = self
            .cached_result
            .get_or_init(|| async {
                let handle = self.driver.lock().await.take();
                match handle {
                    Some(handle) => match handle.await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(err)) => Err(err.to_string()),
                        Err(join_err) => Err(Error::Join(join_err.to_string()).to_string()),
                    },
                    // A second caller arriving while the first is still
                    // awaiting `get_or_init` blocks here rather than racing.
                    None => Ok(()),
                }
            })
            .await;

        match rendered {
            Ok(()) => Ok(()),
            Err(msg) => Err(Error::Other(msg.clone())),
        }
    }

    pub fn failed_tasks(&self) -> Vec<FailedTask> {
        self.stimulation.failed_tasks()
    }

    pub fn all_activation_tasks(&self) -> Vec<ActivationTask> {
        self.stimulation.all_activation_tasks()
    }

    pub fn context_snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.stimulation.context().get_all()
    }
}

pub(crate) async fn spawn_stimulation(stimulation: Arc<Stimulation>, seed: Signal) -> StimulationHandle {
    stimulation.seed(seed).await;
    let driven = Arc::clone(&stimulation);
    let driver = tokio::spawn(async move { driven.run().await });
    StimulationHandle::new(stimulation, driver)
}

pub(crate) async fn spawn_resumed(stimulation: Arc<Stimulation>, tasks: Vec<ActivationTask>) -> StimulationHandle {
    stimulation.seed_resumed(tasks);
    let driven = Arc::clone(&stimulation);
    let driver = tokio::spawn(async move { driven.run().await });
    StimulationHandle::new(stimulation, driver)
}
