//! Runtime context - the shared, resettable host of metric handlers.
//!
//! One context is shared by every session in the process. It is owned by
//! the [`EvaluationService`](super::service::EvaluationService) and handed
//! to tasks as an `Arc`; nothing looks it up globally.
//!
//! ```text
//! Uninitialized ──ensure_started──▶ Running ──emergency_reset──▶ Resetting
//!                                     ▲  │                          │
//!                                     │  └──shutdown──▶ Stopped     │
//!                                     └──────────── restart ◀───────┘
//! ```
//!
//! Lifecycle transitions (`ensure_started`, `emergency_reset`, `shutdown`)
//! run inside one single-flight region. A send that is in flight while the
//! context is torn down fails with [`RuntimeError::ResetDuringRequest`]; it
//! never returns a reply produced against a stale registration.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, MutexGuard, Notify};
use tokio::time::Instant;

use super::error::{HandlerError, RuntimeError};
use super::messages::{EvaluationRequestMessage, EvaluationResultMessage};
use super::types::Metric;

// ============================================================================
// Handler seam
// ============================================================================

/// A metric-specific handler registered in the runtime context.
#[async_trait]
pub trait MetricHandler: Send + Sync {
    /// The metric this handler evaluates.
    fn metric(&self) -> Metric;

    /// Name reported in replies, e.g. `AccuracyAgent`.
    fn agent_id(&self) -> &str;

    /// Evaluate one request.
    async fn handle(
        &self,
        request: &EvaluationRequestMessage,
    ) -> Result<EvaluationResultMessage, HandlerError>;
}

/// Builds a fresh set of handlers. Called on every start and reset.
pub type HandlerFactory =
    Arc<dyn Fn() -> Result<Vec<Arc<dyn MetricHandler>>, RuntimeError> + Send + Sync>;

// ============================================================================
// State
// ============================================================================

/// Lifecycle of the runtime context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Uninitialized,
    Running,
    Resetting,
    Stopped,
}

/// Tunables for stop and reset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeOptions {
    /// How long a stop waits for in-flight sends to drain before treating
    /// the context as stopped anyway.
    pub stop_timeout: Duration,
    /// Pause between teardown and re-registration during a reset.
    pub settle_delay: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// Bookkeeping for one in-flight send.
#[derive(Debug)]
struct InFlight {
    session_id: String,
    metric: Metric,
    started: Instant,
}

struct RuntimeState {
    lifecycle: Lifecycle,
    /// Incremented on every successful start.
    generation: u64,
    handlers: HashMap<Metric, Arc<dyn MetricHandler>>,
    in_flight: HashMap<String, InFlight>,
}

/// Serializable view for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeSnapshot {
    pub lifecycle: Lifecycle,
    pub generation: u64,
    pub resets: u64,
    pub registered_metrics: Vec<Metric>,
    pub in_flight: usize,
}

// ============================================================================
// RuntimeContext
// ============================================================================

/// Shared execution environment hosting one handler per metric.
pub struct RuntimeContext {
    factory: HandlerFactory,
    options: RuntimeOptions,
    state: Mutex<RuntimeState>,
    /// Single-flight region for lifecycle transitions.
    lifecycle_lock: tokio::sync::Mutex<()>,
    /// Bumped whenever the context stops; in-flight sends watch it.
    epoch: watch::Sender<u64>,
    drained: Notify,
    resets: AtomicU64,
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("options", &self.options)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl RuntimeContext {
    pub fn new(factory: HandlerFactory, options: RuntimeOptions) -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            factory,
            options,
            state: Mutex::new(RuntimeState {
                lifecycle: Lifecycle::Uninitialized,
                generation: 0,
                handlers: HashMap::new(),
                in_flight: HashMap::new(),
            }),
            lifecycle_lock: tokio::sync::Mutex::new(()),
            epoch,
            drained: Notify::new(),
            resets: AtomicU64::new(0),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Register handlers and start the context if it is not running.
    ///
    /// Idempotent. Callers racing a reset wait for it and then observe the
    /// fresh context.
    pub async fn ensure_started(&self) -> Result<(), RuntimeError> {
        if self.lifecycle() == Lifecycle::Running {
            return Ok(());
        }
        let flight = self.lifecycle_lock.lock().await;
        if self.lifecycle() == Lifecycle::Running {
            return Ok(());
        }
        self.start_locked(&flight)
    }

    /// Stop, clear, re-register and restart the context.
    ///
    /// Callers that queue behind a reset already in progress return as soon
    /// as it completes instead of running a second one. The reset runs on
    /// its own task, so dropping the caller's future never leaves the
    /// context half torn down.
    pub async fn emergency_reset(self: &Arc<Self>) -> Result<(), RuntimeError> {
        let observed = self.resets.load(Ordering::Acquire);
        let runtime = Arc::clone(self);
        tokio::spawn(async move { runtime.reset_from(observed).await })
            .await
            .map_err(|e| RuntimeError::Initialization(format!("reset task failed: {e}")))?
    }

    async fn reset_from(&self, observed: u64) -> Result<(), RuntimeError> {
        let flight = self.lifecycle_lock.lock().await;
        if self.resets.load(Ordering::Acquire) != observed {
            tracing::debug!("emergency reset already performed by a concurrent caller");
            return Ok(());
        }

        tracing::warn!("performing emergency runtime reset");
        let started = Instant::now();
        self.stop_locked(&flight, Lifecycle::Resetting).await;
        tokio::time::sleep(self.options.settle_delay).await;

        let result = self.start_locked(&flight);
        self.resets.fetch_add(1, Ordering::AcqRel);
        match &result {
            Ok(()) => tracing::info!(
                generation = self.generation(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "emergency runtime reset completed"
            ),
            Err(e) => {
                self.state.lock().lifecycle = Lifecycle::Uninitialized;
                tracing::error!(error = %e, "emergency runtime reset failed");
            }
        }
        result
    }

    /// Stop the context. Sends are refused until it is started again.
    pub async fn shutdown(&self) {
        let flight = self.lifecycle_lock.lock().await;
        let current = self.lifecycle();
        if matches!(current, Lifecycle::Uninitialized | Lifecycle::Stopped) {
            self.state.lock().lifecycle = Lifecycle::Stopped;
            return;
        }
        self.stop_locked(&flight, Lifecycle::Stopped).await;
        tracing::info!("runtime stopped");
    }

    fn start_locked(&self, _flight: &MutexGuard<'_, ()>) -> Result<(), RuntimeError> {
        let handlers = (self.factory)().map_err(|e| match e {
            RuntimeError::Initialization(_) => e,
            other => RuntimeError::Initialization(other.to_string()),
        })?;

        let mut registry: HashMap<Metric, Arc<dyn MetricHandler>> = HashMap::new();
        for handler in handlers {
            let metric = handler.metric();
            tracing::debug!(%metric, agent_id = handler.agent_id(), "registering handler");
            if registry.insert(metric, handler).is_some() {
                return Err(RuntimeError::Initialization(format!(
                    "duplicate handler for {metric}"
                )));
            }
        }

        let mut state = self.state.lock();
        state.handlers = registry;
        state.generation += 1;
        state.lifecycle = Lifecycle::Running;
        tracing::info!(
            generation = state.generation,
            handlers = state.handlers.len(),
            "runtime started"
        );
        Ok(())
    }

    async fn stop_locked(&self, _flight: &MutexGuard<'_, ()>, target: Lifecycle) {
        {
            let mut state = self.state.lock();
            state.lifecycle = target;
            self.epoch.send_modify(|epoch| *epoch += 1);
        }

        let drained = async {
            loop {
                let notified = self.drained.notified();
                if self.state.lock().in_flight.is_empty() {
                    break;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(self.options.stop_timeout, drained)
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_ms = self.options.stop_timeout.as_millis() as u64,
                "runtime stop timed out; treating as stopped"
            );
        }

        let mut state = self.state.lock();
        for (request_id, entry) in state.in_flight.drain() {
            tracing::warn!(
                %request_id,
                session_id = %entry.session_id,
                metric = %entry.metric,
                age_ms = entry.started.elapsed().as_millis() as u64,
                "abandoning in-flight request"
            );
        }
        state.handlers.clear();
    }

    // -----------------------------------------------------------------------
    // Messaging
    // -----------------------------------------------------------------------

    /// Deliver a request to the handler registered for its metric.
    pub async fn send(
        &self,
        request: EvaluationRequestMessage,
    ) -> Result<EvaluationResultMessage, RuntimeError> {
        let (handler, generation, mut epoch) = {
            let mut state = self.state.lock();
            match state.lifecycle {
                Lifecycle::Running => {}
                Lifecycle::Resetting => return Err(RuntimeError::Resetting),
                Lifecycle::Uninitialized | Lifecycle::Stopped => {
                    return Err(RuntimeError::NotRunning)
                }
            }
            let handler = state
                .handlers
                .get(&request.metric)
                .cloned()
                .ok_or(RuntimeError::HandlerMissing(request.metric))?;
            state.in_flight.insert(
                request.request_id.clone(),
                InFlight {
                    session_id: request.session_id.clone(),
                    metric: request.metric,
                    started: Instant::now(),
                },
            );
            (handler, state.generation, self.epoch.subscribe())
        };
        let _tracked = InFlightGuard {
            runtime: self,
            request_id: &request.request_id,
        };

        let reply = tokio::select! {
            reply = handler.handle(&request) => reply,
            _ = epoch.changed() => return Err(RuntimeError::ResetDuringRequest),
        };

        if !self.is_current(generation) {
            return Err(RuntimeError::ResetDuringRequest);
        }
        Ok(reply?)
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::Acquire)
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn snapshot(&self) -> RuntimeSnapshot {
        let state = self.state.lock();
        let mut registered_metrics: Vec<Metric> = state.handlers.keys().copied().collect();
        registered_metrics.sort();
        RuntimeSnapshot {
            lifecycle: state.lifecycle,
            generation: state.generation,
            resets: self.resets.load(Ordering::Acquire),
            registered_metrics,
            in_flight: state.in_flight.len(),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.lifecycle == Lifecycle::Running && state.generation == generation
    }
}

/// Removes an in-flight entry when the send settles or is cancelled.
struct InFlightGuard<'a> {
    runtime: &'a RuntimeContext,
    request_id: &'a str,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let empty = {
            let mut state = self.runtime.state.lock();
            state.in_flight.remove(self.request_id);
            state.in_flight.is_empty()
        };
        if empty {
            self.runtime.drained.notify_waiters();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
