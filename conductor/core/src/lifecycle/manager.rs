//! Model Lifecycle Manager
//!
//! Bounded cache of loaded backends keyed by backend id.
//!
//! # Protocol
//!
//! ```text
//! acquire(id)
//!   ├─ Ready    → pin (ref_count += 1), return lease
//!   ├─ Loading  → register as waiter, await the leader's signal
//!   └─ absent   → become leader:
//!                   probe memory → pick quantization → evict LRU idle slots
//!                   → reserve bytes → loader.load() → Ready, pin leader + waiters
//! ```
//!
//! All bookkeeping happens under one `parking_lot` mutex that is never held
//! across an await. Loads, unloads and memory probes run outside the lock.
//! The reserved bytes of `Loading` and `Ready` slots together never exceed the
//! effective budget, and a pinned slot is never chosen for eviction.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::Instrument;

use super::handle::{BackendHandle, BackendLease, HandleState};
use super::quantization::QuantizationLevel;
use crate::backend::{BackendLoader, BackendSpec, GenerationBackend};
use crate::config::LifecycleConfig;
use crate::metrics::Counter;
use crate::probe::ResourceProbe;

/// Errors surfaced by [`ModelLifecycleManager::acquire`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// No spec registered under this id
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// Not enough evictable memory for any allowed quantization level
    #[error(
        "insufficient memory for {backend_id}: need {required_bytes} bytes, {available_bytes} obtainable"
    )]
    ResourceExhausted {
        /// Backend that could not be admitted
        backend_id: String,
        /// Smallest footprint that would have been accepted
        required_bytes: u64,
        /// Bytes that could be freed or were free
        available_bytes: u64,
    },

    /// The loader failed
    #[error("backend {backend_id} failed to load: {reason}")]
    LoadFailure {
        /// Backend that failed
        backend_id: String,
        /// Loader diagnostic
        reason: String,
    },
}

/// Counters and gauges for the cache
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleStats {
    /// Slots currently `Ready`
    pub ready_backends: usize,
    /// Slots currently `Loading`
    pub loading_backends: usize,
    /// Bytes reserved by `Loading` and `Ready` slots
    pub used_bytes: u64,
    /// High-water mark of `used_bytes`
    pub peak_bytes: u64,
    /// Configured budget
    pub budget_bytes: u64,
    /// Successful loads
    pub loads: u64,
    /// Failed loads
    pub load_failures: u64,
    /// Slots evicted
    pub evictions: u64,
    /// Acquires that joined another caller's load
    pub single_flight_joins: u64,
    /// Acquires rejected for lack of memory
    pub exhausted: u64,
}

// ============================================================================
// Shared State
// ============================================================================

#[derive(Clone)]
enum LoadSignal {
    Pending,
    Ready {
        backend: Arc<dyn GenerationBackend>,
        level: QuantizationLevel,
    },
    Failed(LifecycleError),
}

struct Slot {
    generation: u64,
    state: HandleState,
    level: Option<QuantizationLevel>,
    footprint: u64,
    loaded_at: Option<Instant>,
    last_used_at: Option<Instant>,
    ref_count: usize,
    waiting: usize,
    backend: Option<Arc<dyn GenerationBackend>>,
    signal: watch::Sender<LoadSignal>,
}

impl Slot {
    fn evictable(&self) -> bool {
        self.state == HandleState::Ready && self.ref_count == 0
    }

    fn snapshot(&self, backend_id: &str) -> BackendHandle {
        BackendHandle {
            backend_id: backend_id.to_string(),
            quantization_level: self.level,
            memory_footprint_bytes: self.footprint,
            loaded_at: self.loaded_at,
            last_used_at: self.last_used_at,
            ref_count: self.ref_count,
            state: self.state,
        }
    }
}

/// A slot removed from the cache whose unload is still running
struct Retiring {
    generation: u64,
    level: QuantizationLevel,
    footprint: u64,
    loaded_at: Option<Instant>,
    last_used_at: Option<Instant>,
    done: watch::Receiver<()>,
}

/// Unload work handed out of the lock
struct Retirement {
    backend_id: String,
    generation: u64,
    level: QuantizationLevel,
    done: watch::Sender<()>,
}

#[derive(Default)]
struct State {
    slots: HashMap<String, Slot>,
    retiring: HashMap<String, Retiring>,
    next_generation: u64,
    peak_bytes: u64,
}

impl State {
    fn used_bytes(&self) -> u64 {
        self.slots.values().map(|s| s.footprint).sum()
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Move a slot out of the cache and into the retiring set
    fn retire(&mut self, backend_id: &str) -> Option<Retirement> {
        let mut slot = self.slots.remove(backend_id)?;
        slot.state = HandleState::Evicting;
        let level = slot.level?;
        let (done_tx, done_rx) = watch::channel(());
        self.retiring.insert(
            backend_id.to_string(),
            Retiring {
                generation: slot.generation,
                level,
                footprint: slot.footprint,
                loaded_at: slot.loaded_at,
                last_used_at: slot.last_used_at,
                done: done_rx,
            },
        );
        Some(Retirement {
            backend_id: backend_id.to_string(),
            generation: slot.generation,
            level,
            done: done_tx,
        })
    }
}

#[derive(Default)]
struct Counters {
    loads: Counter,
    load_failures: Counter,
    evictions: Counter,
    joins: Counter,
    exhausted: Counter,
}

/// State shared between the manager and outstanding leases
#[derive(Default)]
pub(crate) struct Shared {
    state: Mutex<State>,
    counters: Counters,
}

impl Shared {
    /// Unpin one reference; called from `BackendLease::drop`
    pub(crate) fn release(&self, backend_id: &str, generation: u64) {
        let mut state = self.state.lock();
        if let Some(slot) = state.slots.get_mut(backend_id) {
            if slot.generation == generation && slot.state == HandleState::Ready {
                slot.ref_count = slot.ref_count.saturating_sub(1);
                slot.last_used_at = Some(Instant::now());
            }
        }
    }

    /// Drop a `Loading` slot and wake its waiters with `error`
    fn abort_load(&self, backend_id: &str, generation: u64, error: Option<LifecycleError>) {
        let mut state = self.state.lock();
        let matches = state
            .slots
            .get(backend_id)
            .is_some_and(|s| s.generation == generation && s.state == HandleState::Loading);
        if !matches {
            return;
        }
        if let Some(slot) = state.slots.remove(backend_id) {
            if let Some(error) = error {
                slot.signal.send_replace(LoadSignal::Failed(error));
            }
            // Dropping the sender wakes any waiter still pending
        }
    }
}

/// Cleans up a leader's `Loading` slot if the leader is cancelled
struct LoadGuard {
    shared: Arc<Shared>,
    backend_id: String,
    generation: u64,
    armed: bool,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(backend_id = %self.backend_id, "Backend load abandoned before completion");
            self.shared.abort_load(&self.backend_id, self.generation, None);
        }
    }
}

/// Returns a waiter's reservation if it stops waiting early
struct WaitGuard {
    shared: Arc<Shared>,
    backend_id: String,
    generation: u64,
    claimed: bool,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if self.claimed {
            return;
        }
        let mut state = self.shared.state.lock();
        if let Some(slot) = state.slots.get_mut(&self.backend_id) {
            if slot.generation != self.generation {
                return;
            }
            match slot.state {
                HandleState::Loading => slot.waiting = slot.waiting.saturating_sub(1),
                // The leader already pinned on our behalf
                HandleState::Ready => {
                    slot.ref_count = slot.ref_count.saturating_sub(1);
                    slot.last_used_at = Some(Instant::now());
                }
                HandleState::Unloaded | HandleState::Evicting => {}
            }
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// LRU cache of loaded backends with a memory budget and single-flight loads
pub struct ModelLifecycleManager {
    shared: Arc<Shared>,
    config: LifecycleConfig,
    specs: HashMap<String, BackendSpec>,
    loader: Arc<dyn BackendLoader>,
    probe: Arc<dyn ResourceProbe>,
}

impl ModelLifecycleManager {
    /// Create a manager for the backends listed in `config`
    pub fn new(
        config: LifecycleConfig,
        loader: Arc<dyn BackendLoader>,
        probe: Arc<dyn ResourceProbe>,
    ) -> Self {
        let specs = config
            .backends
            .iter()
            .map(|spec| (spec.backend_id.clone(), spec.clone()))
            .collect();

        Self {
            shared: Arc::new(Shared::default()),
            config,
            specs,
            loader,
            probe,
        }
    }

    /// Register another backend spec, replacing one with the same id
    #[must_use]
    pub fn with_backend(mut self, spec: BackendSpec) -> Self {
        self.specs.insert(spec.backend_id.clone(), spec);
        self
    }

    /// Whether a spec is registered for `backend_id`
    #[must_use]
    pub fn knows(&self, backend_id: &str) -> bool {
        self.specs.contains_key(backend_id)
    }

    /// Configured memory budget
    #[must_use]
    pub fn budget_bytes(&self) -> u64 {
        self.config.memory_budget_bytes
    }

    /// Bytes reserved by `Loading` and `Ready` slots
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.shared.state.lock().used_bytes()
    }

    /// Obtain a pinned lease on `backend_id`, loading it if needed
    ///
    /// Suspends while a load is in flight. Fails fast with
    /// [`LifecycleError::ResourceExhausted`] when pinned slots leave no room.
    pub async fn acquire(&self, backend_id: &str) -> Result<BackendLease, LifecycleError> {
        let spec = self
            .specs
            .get(backend_id)
            .ok_or_else(|| LifecycleError::UnknownBackend(backend_id.to_string()))?;

        enum Role {
            Leader(u64),
            Waiter(u64, watch::Receiver<LoadSignal>),
        }

        let role = {
            let mut state = self.shared.state.lock();
            let generation = state.next_generation();
            match state.slots.entry(backend_id.to_string()) {
                Entry::Occupied(mut occupied) => {
                    let slot = occupied.get_mut();
                    match (&slot.backend, slot.level) {
                        (Some(backend), Some(level)) if slot.state == HandleState::Ready => {
                            slot.ref_count += 1;
                            slot.last_used_at = Some(Instant::now());
                            return Ok(BackendLease::new(
                                Arc::clone(&self.shared),
                                backend_id,
                                slot.generation,
                                level,
                                Arc::clone(backend),
                            ));
                        }
                        _ => {
                            slot.waiting += 1;
                            Role::Waiter(slot.generation, slot.signal.subscribe())
                        }
                    }
                }
                Entry::Vacant(vacant) => {
                    let (signal, _) = watch::channel(LoadSignal::Pending);
                    vacant.insert(Slot {
                        generation,
                        state: HandleState::Loading,
                        level: None,
                        footprint: 0,
                        loaded_at: None,
                        last_used_at: None,
                        ref_count: 0,
                        waiting: 0,
                        backend: None,
                        signal,
                    });
                    Role::Leader(generation)
                }
            }
        };

        match role {
            Role::Waiter(generation, rx) => self.wait_for_load(backend_id, generation, rx).await,
            Role::Leader(generation) => {
                let span = tracing::info_span!("backend_load", backend_id = %backend_id);
                self.lead_load(spec, generation).instrument(span).await
            }
        }
    }

    /// Release a lease explicitly; equivalent to dropping it
    pub fn release(&self, lease: BackendLease) {
        drop(lease);
    }

    async fn wait_for_load(
        &self,
        backend_id: &str,
        generation: u64,
        mut rx: watch::Receiver<LoadSignal>,
    ) -> Result<BackendLease, LifecycleError> {
        let mut guard = WaitGuard {
            shared: Arc::clone(&self.shared),
            backend_id: backend_id.to_string(),
            generation,
            claimed: false,
        };

        let outcome = rx
            .wait_for(|signal| !matches!(signal, LoadSignal::Pending))
            .await
            .map(|signal| signal.clone());

        match outcome {
            Ok(LoadSignal::Ready { backend, level }) => {
                guard.claimed = true;
                self.shared.counters.joins.inc();
                tracing::debug!(backend_id, "Joined in-flight backend load");
                Ok(BackendLease::new(
                    Arc::clone(&self.shared),
                    backend_id,
                    generation,
                    level,
                    backend,
                ))
            }
            Ok(LoadSignal::Failed(error)) => {
                guard.claimed = true;
                Err(error)
            }
            Ok(LoadSignal::Pending) | Err(_) => {
                guard.claimed = true;
                Err(LifecycleError::LoadFailure {
                    backend_id: backend_id.to_string(),
                    reason: "load abandoned by its initiator".to_string(),
                })
            }
        }
    }

    async fn lead_load(
        &self,
        spec: &BackendSpec,
        generation: u64,
    ) -> Result<BackendLease, LifecycleError> {
        let backend_id = spec.backend_id.as_str();
        let mut guard = LoadGuard {
            shared: Arc::clone(&self.shared),
            backend_id: backend_id.to_string(),
            generation,
            armed: true,
        };

        // A previous incarnation may still be unloading
        let pending_unload = self
            .shared
            .state
            .lock()
            .retiring
            .get(backend_id)
            .map(|r| r.done.clone());
        if let Some(mut done) = pending_unload {
            let _ = done.changed().await;
        }

        let available = self.probe.available_memory_bytes().await;
        let admission = {
            let mut state = self.shared.state.lock();
            self.admit(&mut state, spec, generation, available)
        };

        let (level, retirements) = match admission {
            Ok(admitted) => admitted,
            Err(error) => {
                guard.armed = false;
                self.shared.counters.exhausted.inc();
                tracing::warn!(backend_id, %error, "Backend admission rejected");
                self.shared.abort_load(backend_id, generation, Some(error.clone()));
                return Err(error);
            }
        };

        self.unload_all(retirements).await;

        let started = Instant::now();
        match self.loader.load(spec, level).await {
            Ok(backend) => {
                guard.armed = false;
                self.shared.counters.loads.inc();
                let Some(footprint) = self.publish(backend_id, generation, level, &backend) else {
                    // Nothing can reach this backend now. Leave a newer
                    // incarnation alone, it shares the server-side model.
                    let superseded = self.shared.state.lock().slots.contains_key(backend_id);
                    drop(backend);
                    if !superseded {
                        if let Err(e) = self.loader.unload(spec, level).await {
                            tracing::warn!(backend_id, %level, error = %e, "Unload of orphaned backend failed");
                        }
                    }
                    tracing::warn!(backend_id, %level, superseded, "Backend slot vanished during load");
                    return Err(LifecycleError::LoadFailure {
                        backend_id: backend_id.to_string(),
                        reason: "slot vanished during load".to_string(),
                    });
                };

                tracing::info!(
                    backend_id,
                    %level,
                    footprint_bytes = footprint,
                    load_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Backend ready"
                );

                Ok(BackendLease::new(
                    Arc::clone(&self.shared),
                    backend_id,
                    generation,
                    level,
                    backend,
                ))
            }
            Err(e) => {
                guard.armed = false;
                self.shared.counters.load_failures.inc();
                let error = LifecycleError::LoadFailure {
                    backend_id: backend_id.to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!(backend_id, %level, error = %e, "Backend load failed");
                self.shared.abort_load(backend_id, generation, Some(error.clone()));
                Err(error)
            }
        }
    }

    /// Mark the `generation` slot Ready and pin it for the leader and its
    /// waiters; returns the footprint, or `None` when the slot is gone
    fn publish(
        &self,
        backend_id: &str,
        generation: u64,
        level: QuantizationLevel,
        backend: &Arc<dyn GenerationBackend>,
    ) -> Option<u64> {
        let mut state = self.shared.state.lock();
        let slot = state
            .slots
            .get_mut(backend_id)
            .filter(|s| s.generation == generation)?;

        let now = Instant::now();
        slot.state = HandleState::Ready;
        slot.loaded_at = Some(now);
        slot.last_used_at = Some(now);
        slot.ref_count = 1 + slot.waiting;
        slot.waiting = 0;
        slot.backend = Some(Arc::clone(backend));
        slot.signal.send_replace(LoadSignal::Ready {
            backend: Arc::clone(backend),
            level,
        });
        Some(slot.footprint)
    }

    /// Choose a level, evict LRU idle slots and reserve memory for `spec`
    fn admit(
        &self,
        state: &mut State,
        spec: &BackendSpec,
        generation: u64,
        available: u64,
    ) -> Result<(QuantizationLevel, Vec<Retirement>), LifecycleError> {
        let backend_id = spec.backend_id.as_str();
        let class = self.probe.compute_class();
        let policy = &self.config.quantization;

        let used = state.used_bytes();
        let capacity = self
            .config
            .memory_budget_bytes
            .min(used.saturating_add(available));
        let pinned: u64 = state
            .slots
            .values()
            .filter(|s| !s.evictable())
            .map(|s| s.footprint)
            .sum();
        let headroom = capacity.saturating_sub(pinned);

        let Some((level, footprint)) = policy.select(class, spec, headroom) else {
            return Err(LifecycleError::ResourceExhausted {
                backend_id: backend_id.to_string(),
                required_bytes: policy.minimum_footprint(class, spec),
                available_bytes: headroom,
            });
        };

        let mut candidates: Vec<(&String, Option<Instant>, u64)> = state
            .slots
            .iter()
            .filter(|(id, s)| s.evictable() && id.as_str() != backend_id)
            .map(|(id, s)| (id, s.last_used_at, s.footprint))
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

        let max_loaded = self.config.max_loaded_backends;
        let mut projected = used;
        let mut resident = state.slots.len();
        let mut victims = Vec::new();
        let mut candidates = candidates.into_iter();
        while projected.saturating_add(footprint) > capacity || (max_loaded > 0 && resident > max_loaded)
        {
            let Some((id, _, bytes)) = candidates.next() else {
                return Err(LifecycleError::ResourceExhausted {
                    backend_id: backend_id.to_string(),
                    required_bytes: footprint,
                    available_bytes: capacity.saturating_sub(projected),
                });
            };
            projected -= bytes;
            resident -= 1;
            victims.push(id.clone());
        }

        let mut retirements = Vec::with_capacity(victims.len());
        for victim in victims {
            tracing::info!(backend_id = %victim, for_backend = backend_id, "Evicting idle backend (LRU)");
            if let Some(retirement) = state.retire(&victim) {
                retirements.push(retirement);
            }
        }
        self.shared.counters.evictions.add(retirements.len() as u64);

        if let Some(slot) = state
            .slots
            .get_mut(backend_id)
            .filter(|s| s.generation == generation)
        {
            slot.level = Some(level);
            slot.footprint = footprint;
        }
        let used = state.used_bytes();
        state.peak_bytes = state.peak_bytes.max(used);

        tracing::debug!(
            backend_id,
            %level,
            %class,
            footprint,
            capacity,
            used,
            "Reserved memory for backend"
        );

        Ok((level, retirements))
    }

    /// Run unloads outside the lock; each completes even if the caller is cancelled
    async fn unload_all(&self, retirements: Vec<Retirement>) {
        let mut tasks = Vec::with_capacity(retirements.len());
        for retirement in retirements {
            let Some(spec) = self.specs.get(&retirement.backend_id).cloned() else {
                continue;
            };
            let loader = Arc::clone(&self.loader);
            let shared = Arc::clone(&self.shared);
            tasks.push(tokio::spawn(async move {
                if let Err(e) = loader.unload(&spec, retirement.level).await {
                    tracing::warn!(backend_id = %retirement.backend_id, error = %e, "Backend unload failed");
                }
                let mut state = shared.state.lock();
                if state
                    .retiring
                    .get(&retirement.backend_id)
                    .is_some_and(|r| r.generation == retirement.generation)
                {
                    state.retiring.remove(&retirement.backend_id);
                }
                drop(retirement.done);
            }));
        }
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Unload task panicked");
            }
        }
    }

    /// Evict one idle backend; returns false if it is absent or pinned
    pub async fn evict(&self, backend_id: &str) -> bool {
        let retirement = {
            let mut state = self.shared.state.lock();
            let idle = state.slots.get(backend_id).is_some_and(Slot::evictable);
            if idle {
                state.retire(backend_id)
            } else {
                None
            }
        };

        match retirement {
            Some(retirement) => {
                self.shared.counters.evictions.inc();
                tracing::info!(backend_id, "Evicting backend on request");
                self.unload_all(vec![retirement]).await;
                true
            }
            None => false,
        }
    }

    /// Evict every unpinned backend idle for at least `max_idle`
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let retirements: Vec<Retirement> = {
            let mut state = self.shared.state.lock();
            let stale: Vec<String> = state
                .slots
                .iter()
                .filter(|(_, s)| {
                    s.evictable() && s.last_used_at.is_some_and(|t| t.elapsed() >= max_idle)
                })
                .map(|(id, _)| id.clone())
                .collect();
            stale.iter().filter_map(|id| state.retire(id)).collect()
        };

        let count = retirements.len();
        if count > 0 {
            self.shared.counters.evictions.add(count as u64);
            tracing::info!(count, ?max_idle, "Evicting idle backends");
            self.unload_all(retirements).await;
        }
        count
    }

    /// Point-in-time view of every slot, sorted by backend id
    #[must_use]
    pub fn snapshot(&self) -> Vec<BackendHandle> {
        let state = self.shared.state.lock();
        let mut handles: Vec<BackendHandle> = state
            .slots
            .iter()
            .map(|(id, slot)| slot.snapshot(id))
            .chain(state.retiring.iter().map(|(id, r)| BackendHandle {
                backend_id: id.clone(),
                quantization_level: Some(r.level),
                memory_footprint_bytes: r.footprint,
                loaded_at: r.loaded_at,
                last_used_at: r.last_used_at,
                ref_count: 0,
                state: HandleState::Evicting,
            }))
            .collect();
        handles.sort_by(|a, b| a.backend_id.cmp(&b.backend_id));
        handles
    }

    /// State of one backend
    #[must_use]
    pub fn state_of(&self, backend_id: &str) -> HandleState {
        let state = self.shared.state.lock();
        if let Some(slot) = state.slots.get(backend_id) {
            slot.state
        } else if state.retiring.contains_key(backend_id) {
            HandleState::Evicting
        } else {
            HandleState::Unloaded
        }
    }

    /// Counters and gauges
    #[must_use]
    pub fn stats(&self) -> LifecycleStats {
        let state = self.shared.state.lock();
        let counters = &self.shared.counters;
        LifecycleStats {
            ready_backends: state
                .slots
                .values()
                .filter(|s| s.state == HandleState::Ready)
                .count(),
            loading_backends: state
                .slots
                .values()
                .filter(|s| s.state == HandleState::Loading)
                .count(),
            used_bytes: state.used_bytes(),
            peak_bytes: state.peak_bytes,
            budget_bytes: self.config.memory_budget_bytes,
            loads: counters.loads.get(),
            load_failures: counters.load_failures.get(),
            evictions: counters.evictions.get(),
            single_flight_joins: counters.joins.get(),
            exhausted: counters.exhausted.get(),
        }
    }
}

impl std::fmt::Debug for ModelLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelLifecycleManager")
            .field("budget_bytes", &self.config.memory_budget_bytes)
            .field("backends", &self.specs.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::backend::{GenerationError, GenerationOutput, GenerationParams, LoadError};
    use crate::lifecycle::QuantizationPolicy;
    use crate::probe::{ComputeClass, StaticProbe};

    struct EchoBackend(String);

    #[async_trait]
    impl GenerationBackend for EchoBackend {
        fn name(&self) -> &str {
            &self.0
        }

        async fn generate(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> Result<GenerationOutput, GenerationError> {
            Ok(GenerationOutput::text(prompt))
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicUsize,
        unloads: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl BackendLoader for CountingLoader {
        async fn load(
            &self,
            spec: &BackendSpec,
            _level: QuantizationLevel,
        ) -> Result<Arc<dyn GenerationBackend>, LoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LoadError::Unreachable("connection refused".to_string()));
            }
            Ok(Arc::new(EchoBackend(spec.backend_id.clone())))
        }

        async fn unload(&self, _spec: &BackendSpec, _level: QuantizationLevel) -> Result<(), LoadError> {
            self.unloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager(budget: u64, specs: &[(&str, u64)], loader: Arc<CountingLoader>) -> ModelLifecycleManager {
        let config = LifecycleConfig {
            memory_budget_bytes: budget,
            max_loaded_backends: 0,
            quantization: QuantizationPolicy {
                accelerator: vec![QuantizationLevel::Full],
                cpu: vec![QuantizationLevel::Full],
            },
            backends: specs
                .iter()
                .map(|(id, bytes)| BackendSpec::new(*id, format!("{id}-model"), *bytes))
                .collect(),
        };
        ModelLifecycleManager::new(
            config,
            loader,
            Arc::new(StaticProbe::unlimited(ComputeClass::Cpu)),
        )
    }

    #[tokio::test]
    async fn test_acquire_loads_once_then_reuses() {
        let loader = Arc::new(CountingLoader::default());
        let mgr = manager(100, &[("a", 40)], Arc::clone(&loader));

        let lease = mgr.acquire("a").await.unwrap();
        assert_eq!(lease.backend_id(), "a");
        assert_eq!(mgr.state_of("a"), HandleState::Ready);
        mgr.release(lease);

        let _again = mgr.acquire("a").await.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.snapshot()[0].ref_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_backend() {
        let mgr = manager(100, &[], Arc::new(CountingLoader::default()));
        let err = mgr.acquire("ghost").await.unwrap_err();
        assert_eq!(err, LifecycleError::UnknownBackend("ghost".to_string()));
    }

    #[tokio::test]
    async fn test_lease_drop_decrements_ref_count() {
        let mgr = manager(100, &[("a", 10)], Arc::new(CountingLoader::default()));
        let first = mgr.acquire("a").await.unwrap();
        let second = mgr.acquire("a").await.unwrap();
        assert_eq!(mgr.snapshot()[0].ref_count, 2);

        drop(first);
        assert_eq!(mgr.snapshot()[0].ref_count, 1);
        drop(second);
        assert_eq!(mgr.snapshot()[0].ref_count, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction_order() {
        let loader = Arc::new(CountingLoader::default());
        let mgr = manager(100, &[("a", 40), ("b", 40), ("c", 40)], Arc::clone(&loader));

        drop(mgr.acquire("a").await.unwrap());
        drop(mgr.acquire("b").await.unwrap());
        // Touch "a" so "b" becomes least recently used
        drop(mgr.acquire("a").await.unwrap());
        drop(mgr.acquire("c").await.unwrap());

        assert_eq!(mgr.state_of("a"), HandleState::Ready);
        assert_eq!(mgr.state_of("b"), HandleState::Unloaded);
        assert_eq!(mgr.state_of("c"), HandleState::Ready);
        assert_eq!(loader.unloads.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.stats().evictions, 1);
        assert!(mgr.used_bytes() <= 100);
    }

    #[tokio::test]
    async fn test_pinned_backend_is_never_evicted() {
        let mgr = manager(100, &[("a", 60), ("b", 60)], Arc::new(CountingLoader::default()));

        let pinned = mgr.acquire("a").await.unwrap();
        let err = mgr.acquire("b").await.unwrap_err();
        assert!(matches!(err, LifecycleError::ResourceExhausted { .. }));
        assert_eq!(mgr.state_of("a"), HandleState::Ready);
        assert_eq!(mgr.state_of("b"), HandleState::Unloaded);
        assert_eq!(mgr.stats().exhausted, 1);

        drop(pinned);
        assert!(mgr.acquire("b").await.is_ok());
        assert_eq!(mgr.state_of("a"), HandleState::Unloaded);
    }

    #[tokio::test]
    async fn test_load_failure_frees_reservation() {
        let loader = Arc::new(CountingLoader {
            fail: true,
            ..Default::default()
        });
        let mgr = manager(100, &[("a", 50)], loader);

        let err = mgr.acquire("a").await.unwrap_err();
        assert!(matches!(err, LifecycleError::LoadFailure { .. }));
        assert_eq!(mgr.state_of("a"), HandleState::Unloaded);
        assert_eq!(mgr.used_bytes(), 0);
        assert_eq!(mgr.stats().load_failures, 1);
    }

    #[tokio::test]
    async fn test_max_loaded_backends_cap() {
        let loader = Arc::new(CountingLoader::default());
        let mut mgr = manager(1_000, &[("a", 10), ("b", 10)], Arc::clone(&loader));
        mgr.config.max_loaded_backends = 1;

        drop(mgr.acquire("a").await.unwrap());
        drop(mgr.acquire("b").await.unwrap());

        assert_eq!(mgr.state_of("a"), HandleState::Unloaded);
        assert_eq!(mgr.stats().ready_backends, 1);
    }

    #[tokio::test]
    async fn test_evict_idle_and_explicit_evict() {
        let mgr = manager(100, &[("a", 10), ("b", 10)], Arc::new(CountingLoader::default()));
        drop(mgr.acquire("a").await.unwrap());
        let held = mgr.acquire("b").await.unwrap();

        assert_eq!(mgr.evict_idle(Duration::ZERO).await, 1);
        assert_eq!(mgr.state_of("a"), HandleState::Unloaded);
        assert!(!mgr.evict("b").await);

        drop(held);
        assert!(mgr.evict("b").await);
        assert_eq!(mgr.used_bytes(), 0);
    }

    #[tokio::test]
    async fn test_quantization_falls_back_under_pressure() {
        let config = LifecycleConfig {
            memory_budget_bytes: 100,
            max_loaded_backends: 0,
            quantization: QuantizationPolicy::default(),
            backends: vec![BackendSpec::new("big", "big-model", 160)],
        };
        let mgr = ModelLifecycleManager::new(
            config,
            Arc::new(CountingLoader::default()),
            Arc::new(StaticProbe::new(1_000, ComputeClass::Accelerator)),
        );

        let lease = mgr.acquire("big").await.unwrap();
        assert_eq!(lease.quantization_level(), QuantizationLevel::Int8);
        assert_eq!(mgr.used_bytes(), 80);
    }

    #[tokio::test]
    async fn test_probe_limits_effective_capacity() {
        let config = LifecycleConfig {
            memory_budget_bytes: 1_000,
            max_loaded_backends: 0,
            quantization: QuantizationPolicy::default(),
            backends: vec![BackendSpec::new("m", "m", 160)],
        };
        let mgr = ModelLifecycleManager::new(
            config,
            Arc::new(CountingLoader::default()),
            Arc::new(StaticProbe::new(50, ComputeClass::Cpu)),
        );

        let lease = mgr.acquire("m").await.unwrap();
        assert_eq!(lease.quantization_level(), QuantizationLevel::Int4);
    }

    /// Loader that tears the slot out from under its own load
    #[derive(Default)]
    struct VanishingLoader {
        shared: std::sync::OnceLock<Arc<Shared>>,
        unloads: AtomicUsize,
    }

    #[async_trait]
    impl BackendLoader for VanishingLoader {
        async fn load(
            &self,
            spec: &BackendSpec,
            _level: QuantizationLevel,
        ) -> Result<Arc<dyn GenerationBackend>, LoadError> {
            if let Some(shared) = self.shared.get() {
                shared.state.lock().slots.remove(&spec.backend_id);
            }
            Ok(Arc::new(EchoBackend(spec.backend_id.clone())))
        }

        async fn unload(&self, _spec: &BackendSpec, _level: QuantizationLevel) -> Result<(), LoadError> {
            self.unloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_orphaned_load_is_unloaded() {
        let loader = Arc::new(VanishingLoader::default());
        let config = LifecycleConfig {
            memory_budget_bytes: 100,
            max_loaded_backends: 0,
            quantization: QuantizationPolicy::default(),
            backends: vec![BackendSpec::new("a", "a-model", 40)],
        };
        let mgr = ModelLifecycleManager::new(
            config,
            Arc::clone(&loader) as Arc<dyn BackendLoader>,
            Arc::new(StaticProbe::unlimited(ComputeClass::Cpu)),
        );
        assert!(loader.shared.set(Arc::clone(&mgr.shared)).is_ok());

        let err = mgr.acquire("a").await.unwrap_err();

        assert!(matches!(
            err,
            LifecycleError::LoadFailure { ref reason, .. } if reason == "slot vanished during load"
        ));
        assert_eq!(loader.unloads.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.state_of("a"), HandleState::Unloaded);
        assert_eq!(mgr.used_bytes(), 0);
    }
}
