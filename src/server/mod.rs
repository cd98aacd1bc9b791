//! HTTP server for the evaluation service.
//!
//! # Endpoints
//!
//! - `GET  /health`              - Liveness probe
//! - `POST /api/v1/evaluate`     - Evaluate an AI response
//! - `GET  /api/v1/system/health` - Capacity and runtime introspection
//!
//! See [`routes`] for the full list.

pub mod request;
pub mod routes;

pub use request::{EvaluationRequest, UploadedFile, ValidatedRequest};
pub use routes::{app_router, AppState};
