//! Evaluation orchestration core.
//!
//! A request is admitted as a session, fanned out into one metric task per
//! selected metric, each task talks to its handler through the shared
//! [`RuntimeContext`], and the settled outcomes are folded into a
//! [`CompositeVerdict`].
//!
//! | Module         | Role                                             |
//! |----------------|--------------------------------------------------|
//! | `admission`    | cap on concurrently active sessions              |
//! | `session`      | session registry and lifecycle                   |
//! | `runtime`      | resettable host of metric handlers               |
//! | `task`         | retry, timeout and heartbeat per metric          |
//! | `dispatcher`   | fan-out / fan-in under the session deadline      |
//! | `aggregator`   | outcomes to verdict                              |
//! | `service`      | request, status and health surfaces              |

pub mod admission;
pub mod aggregator;
pub mod dispatcher;
pub mod error;
pub mod messages;
pub mod runtime;
pub mod service;
pub mod session;
pub mod task;
pub mod types;

pub use admission::AdmissionController;
pub use aggregator::aggregate;
pub use dispatcher::{Dispatcher, Outcomes};
pub use error::{EvaluationError, HandlerError, RuntimeError, TaskFailure};
pub use messages::{EvaluationRequestMessage, EvaluationResultMessage};
pub use runtime::{
    HandlerFactory, Lifecycle, MetricHandler, RuntimeContext, RuntimeOptions, RuntimeSnapshot,
};
pub use service::{EvaluationService, HealthReport, ServiceOptions};
pub use session::{SessionGuard, SessionManager, SessionState, SessionStatus};
pub use task::{MetricTask, RetryPolicy, TaskReport, TaskState};
pub use types::{
    Artifact, Badge, CompositeVerdict, Metric, MetricResult, OverallEvaluation, Rating,
    UnknownMetric,
};
