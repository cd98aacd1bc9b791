//! Session registry: lifecycle and status of in-flight evaluations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use super::admission::AdmissionController;
use super::error::EvaluationError;
use super::types::{Metric, MetricResult};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One in-flight evaluation.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    started: Instant,
    pub selected: Vec<Metric>,
    /// Settled results; keys are always a subset of `selected`.
    pub results: BTreeMap<Metric, MetricResult>,
}

/// Snapshot returned by [`SessionManager::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub evaluation_id: String,
    pub status: SessionState,
    pub created_at: DateTime<Utc>,
    /// Seconds since the session was opened.
    pub elapsed_time: f64,
    pub selected_metrics: Vec<Metric>,
    pub settled_metrics: Vec<Metric>,
}

/// Registry of active sessions, gated by an [`AdmissionController`].
#[derive(Debug)]
pub struct SessionManager {
    admission: AdmissionController,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new(admission: AdmissionController) -> Self {
        Self {
            admission,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh identifier of the form `eval_<12 hex chars>`.
    pub fn generate_id() -> String {
        let hex = Uuid::new_v4().simple().to_string();
        format!("eval_{}", &hex[..12])
    }

    /// Admit and register a new session in state `processing`.
    ///
    /// The admission check and the insert happen under one lock.
    pub fn open(&self, selected: &[Metric]) -> Result<String, EvaluationError> {
        let mut sessions = self.sessions.lock();
        let active = sessions.len();
        if !self.admission.try_admit(active) {
            tracing::warn!(
                active,
                max = self.admission.max_concurrent(),
                "admission denied"
            );
            return Err(EvaluationError::CapacityExceeded {
                active,
                max: self.admission.max_concurrent(),
            });
        }

        let mut id = Self::generate_id();
        while sessions.contains_key(&id) {
            id = Self::generate_id();
        }

        sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                state: SessionState::Processing,
                created_at: Utc::now(),
                started: Instant::now(),
                selected: selected.to_vec(),
                results: BTreeMap::new(),
            },
        );
        tracing::info!(session_id = %id, active = active + 1, metrics = ?selected, "session opened");
        Ok(id)
    }

    /// Open a session whose close is tied to the returned guard.
    pub fn open_guarded(self: &Arc<Self>, selected: &[Metric]) -> Result<SessionGuard, EvaluationError> {
        let id = self.open(selected)?;
        Ok(SessionGuard {
            manager: Arc::clone(self),
            id,
        })
    }

    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        let sessions = self.sessions.lock();
        sessions.get(session_id).map(|s| SessionStatus {
            evaluation_id: s.id.clone(),
            status: s.state,
            created_at: s.created_at,
            elapsed_time: s.started.elapsed().as_secs_f64(),
            selected_metrics: s.selected.clone(),
            settled_metrics: s.results.keys().copied().collect(),
        })
    }

    /// Record a settled result. Returns `false` if the session is gone or
    /// the metric was not selected for it.
    pub fn record_result(&self, session_id: &str, result: MetricResult) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(session_id) {
            Some(session) if session.selected.contains(&result.metric()) => {
                session.results.insert(result.metric(), result);
                true
            }
            Some(_) => {
                tracing::warn!(
                    session_id,
                    metric = %result.metric(),
                    "ignoring result for unselected metric"
                );
                false
            }
            None => false,
        }
    }

    pub fn mark(&self, session_id: &str, state: SessionState) {
        if let Some(session) = self.sessions.lock().get_mut(session_id) {
            session.state = state;
        }
    }

    /// Remove a session from the registry. Returns whether it was present.
    pub fn close(&self, session_id: &str) -> bool {
        let removed = self.sessions.lock().remove(session_id);
        match removed {
            Some(session) => {
                tracing::info!(
                    session_id,
                    state = ?session.state,
                    elapsed_ms = session.started.elapsed().as_millis() as u64,
                    "session closed"
                );
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Ids of the active sessions, oldest first.
    pub fn active_ids(&self) -> Vec<String> {
        let sessions = self.sessions.lock();
        let mut active: Vec<&Session> = sessions.values().collect();
        active.sort_by_key(|s| s.started);
        active.into_iter().map(|s| s.id.clone()).collect()
    }

    pub fn max_concurrent(&self) -> usize {
        self.admission.max_concurrent()
    }
}

/// Closes its session exactly once when dropped, whichever way the
/// evaluation ends (including cancellation of the caller's future).
#[derive(Debug)]
pub struct SessionGuard {
    manager: Arc<SessionManager>,
    id: String,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mark(&self, state: SessionState) {
        self.manager.mark(&self.id, state);
    }

    pub fn record_result(&self, result: MetricResult) -> bool {
        self.manager.record_result(&self.id, result)
    }

    pub fn status(&self) -> Option<SessionStatus> {
        self.manager.status(&self.id)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.manager.close(&self.id);
    }
}
