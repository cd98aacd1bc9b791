//! Metric definitions: criteria, prompt rendering, output parsing and the
//! evaluator-backed handlers registered in the runtime context.

pub mod criteria;
pub mod handler;
pub mod parser;
pub mod prompt;

pub use criteria::{CriteriaError, CriteriaSet, MetricCriteria, RatingLevel};
pub use handler::{handler_factory, LlmMetricHandler};
pub use parser::{parse_evaluation, ParseError};
pub use prompt::MetricPrompt;
