//! Axum route handlers for the evaluation HTTP server.
//!
//! # Routes
//!
//! - `GET  /`                              - Service information
//! - `GET  /health`                        - Liveness probe
//! - `POST /api/v1/evaluate`               - Evaluate a response on the selected metrics
//! - `GET  /api/v1/evaluate/:id/status`    - Status of an active evaluation
//! - `GET  /api/v1/metrics`                - Metric definitions, rating scales, badges
//! - `GET  /api/v1/system/health`          - Capacity, timeouts and runtime state
//! - `POST /api/v1/test`                   - Built-in sample evaluation

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Map, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::config::Settings;
use crate::evaluation::{Artifact, CompositeVerdict, EvaluationError, EvaluationService, Metric};

use super::request::EvaluationRequest;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<EvaluationService>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(service: Arc<EvaluationService>, settings: Settings) -> Self {
        Self {
            service,
            settings: Arc::new(settings),
        }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/evaluate", post(evaluate_handler))
        .route("/evaluate/:id/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/system/health", get(system_health_handler))
        .route("/test", post(test_handler));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

fn evaluation_error(error: EvaluationError) -> (StatusCode, Json<Value>) {
    let status = match &error {
        EvaluationError::CapacityExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        EvaluationError::SessionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        EvaluationError::RuntimeInitialization(_) => StatusCode::SERVICE_UNAVAILABLE,
        EvaluationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_body(status, error.to_string())
}

/// GET / - service information.
async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": "AI Assisted SME Evaluation Platform",
        "version": crate::VERSION,
        "description": "Evaluates RAG applications using multi-agent AI system",
        "metrics": Metric::ALL.iter().map(Metric::as_str).collect::<Vec<_>>(),
        "status": "running",
    }))
}

/// GET /health - liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "sme-eval-platform",
    }))
}

/// POST /api/v1/evaluate - evaluate one AI response.
///
/// Validation failures are 400s. Session-fatal errors map to 429 (capacity),
/// 504 (session deadline), 503 (runtime did not start) and 500.
async fn evaluate_handler(
    State(state): State<AppState>,
    Json(request): Json<EvaluationRequest>,
) -> ApiResult<CompositeVerdict> {
    let correlation_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("evaluate_request", correlation_id = %correlation_id);

    async move {
        tracing::info!(
            selected = ?request.eval_metrices,
            query_length = request.user_query.len(),
            response_length = request.ai_response.len(),
            context_chunks = request.context_chunks().len(),
            file_uploaded = request.uploaded_file.is_some(),
            "evaluation request received"
        );
        if let Some(file) = &request.uploaded_file {
            tracing::info!(
                file_name = %file.name,
                file_type = %file.mime_type,
                file_size = file.size,
                "file uploaded with request"
            );
        }

        let valid = request
            .validate(state.settings.default_model())
            .map_err(|message| {
                tracing::warn!(error = %message, "evaluation request rejected");
                error_body(StatusCode::BAD_REQUEST, message)
            })?;
        if valid.deduplicated {
            tracing::debug!(metrics = ?valid.metrics, "duplicate metrics removed");
        }

        run_evaluation(&state, &valid.metrics, valid.artifact).await
    }
    .instrument(span)
    .await
}

async fn run_evaluation(
    state: &AppState,
    metrics: &[Metric],
    artifact: Artifact,
) -> ApiResult<CompositeVerdict> {
    let started = std::time::Instant::now();
    match state.service.evaluate(metrics, artifact).await {
        Ok(verdict) => {
            tracing::info!(
                evaluation_id = %verdict.evaluation_id,
                overall_score = verdict.overall.overall_score,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "evaluation completed"
            );
            Ok(Json(verdict))
        }
        Err(error) => {
            tracing::error!(
                error = %error,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "evaluation failed"
            );
            Err(evaluation_error(error))
        }
    }
}

/// GET /api/v1/evaluate/:id/status - status of an active evaluation.
async fn status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    state
        .service
        .status(&id)
        .map(Json)
        .ok_or_else(|| error_body(StatusCode::NOT_FOUND, format!("Evaluation {id} not found")))
}

/// GET /api/v1/metrics - definitions and rating scales of every metric.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut metrics = Map::new();
    for criteria in state.service.criteria().iter() {
        let scale: Map<String, Value> = criteria
            .rating_scale
            .iter()
            .rev()
            .map(|(score, level)| {
                (
                    format!("{score}_{}", level.label.to_lowercase()),
                    Value::String(level.description.clone()),
                )
            })
            .collect();
        metrics.insert(
            criteria.metric.key().to_string(),
            json!({
                "name": criteria.metric.as_str(),
                "agent": criteria.agent_name,
                "definition": criteria.definition,
                "rating_scale": scale,
                "focus_areas": criteria.focus_areas,
            }),
        );
    }

    Json(json!({
        "metrics": metrics,
        "badges": {
            "platinum": "Score 3 - Excellent performance",
            "gold": "Score 2 - Good performance with minor issues",
            "silver": "Score 1 - Fair performance with notable issues",
            "bronze": "Score 0 - Poor performance requiring improvement",
        },
        "overall_calculation": "Overall rating is calculated as the average of all individual metric scores",
    }))
}

/// GET /api/v1/system/health - capacity, configuration and runtime state.
async fn system_health_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let report = state.service.health();
    let mut body = serde_json::to_value(&report).map_err(|e| {
        error_body(StatusCode::SERVICE_UNAVAILABLE, format!("health report unavailable: {e}"))
    })?;
    if let Value::Object(fields) = &mut body {
        fields.insert("model_provider".into(), json!(state.settings.model_provider));
        fields.insert("current_model".into(), json!(state.settings.default_model()));
        fields.insert(
            "agents".into(),
            json!(Metric::ALL.iter().map(Metric::key).collect::<Vec<_>>()),
        );
        fields.insert("version".into(), json!(crate::VERSION));
    }
    Ok(Json(body))
}

/// POST /api/v1/test - evaluate a built-in sample on Accuracy and Usefulness.
async fn test_handler(State(state): State<AppState>) -> ApiResult<CompositeVerdict> {
    let artifact = sample::artifact(state.settings.default_model());
    tracing::info!("running sample evaluation");
    run_evaluation(&state, &[Metric::Accuracy, Metric::Usefulness], artifact).await
}

mod sample {
    use crate::evaluation::Artifact;

    const QUERY: &str = "Is a verbal employment contract enforceable in California?";

    const RESPONSE: &str = "Yes, verbal employment contracts are generally enforceable in California under specific circumstances, though written contracts provide stronger legal protection.

California follows the at-will employment doctrine, but verbal agreements can create binding contractual obligations when they include essential terms: compensation, job duties, and duration. The key requirement is mutual agreement and consideration between employer and employee.

For a verbal employment contract to be enforceable, it must demonstrate clear terms and mutual assent. Witness testimony or partial performance can provide evidence of the agreement's existence.

Verbal employment contracts must be enforced within two years under California's statute of limitations for oral agreements, while written contracts have a four-year enforcement period.";

    const CHUNKS: [&str; 3] = [
        "California Employment Contract Law\nSource: Labor Code Section 2922 - California At-Will Employment\n\nContent: \"An employment, having no specified term, may be terminated at the will of either party on notice to the other. However, an oral contract of employment may be enforceable if it contains the essential elements of a contract: offer, acceptance, consideration, and mutual assent.\"",
        "Verbal Contract Enforceability Standards\nSource: Foley v. Interactive Data Corp., 47 Cal. 3d 654 (1988)\n\nContent: \"Oral employment contracts are subject to the same contract formation requirements as written agreements.\"",
        "Evidence Requirements for Oral Agreements\nSource: Guz v. Bechtel National, Inc., 24 Cal. 4th 317 (2000)\n\nContent: \"To establish an oral employment contract, the employee must present evidence of definite contractual terms, not merely expectations or understandings.\"",
    ];

    pub(super) fn artifact(model: &str) -> Artifact {
        Artifact {
            user_query: QUERY.to_string(),
            ai_response: RESPONSE.to_string(),
            context_chunks: CHUNKS.iter().map(|c| c.to_string()).collect(),
            model: model.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::ServiceOptions;
    use crate::llm::Evaluator;
    use crate::metrics::CriteriaSet;
    use crate::testing::{Behavior, ScriptedEvaluator};
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app_with(evaluator: ScriptedEvaluator, options: ServiceOptions) -> (Router, AppState) {
        let service = Arc::new(EvaluationService::new(
            options,
            Arc::new(evaluator) as Arc<dyn Evaluator>,
            Arc::new(CriteriaSet::builtin()),
        ));
        let state = AppState::new(service, Settings::default());
        (app_router(state.clone()), state)
    }

    fn app() -> Router {
        app_with(ScriptedEvaluator::new(), ServiceOptions::default()).0
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let (status, json) = send(app(), get_req("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["metrics"].as_array().unwrap().len(), 4);
        assert_eq!(json["version"], crate::VERSION);

        let (status, json) = send(app(), get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
    }

    #[tokio::test]
    async fn test_evaluate_selected_metrics() {
        let evaluator = ScriptedEvaluator::new()
            .with(Metric::Accuracy, Behavior::Score(3))
            .with(Metric::Usefulness, Behavior::Score(2));
        let (app, _) = app_with(evaluator, ServiceOptions::default());

        let (status, json) = send(
            app,
            post_json(
                "/api/v1/evaluate",
                json!({
                    "user_query": "Is a verbal contract binding?",
                    "ai_response": "Generally yes, if its terms are definite.",
                    "eval_metrices": ["Accuracy", "Usefulness", "Accuracy"],
                    "chunk_1": "Oral contracts are enforceable when terms are definite.",
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["accuracy"]["rating"], "Great");
        assert_eq!(json["usefulness"]["score"], 2);
        assert!(json["hallucination"].is_null());
        assert!(json["authoritativeness"].is_null());
        assert_eq!(json["overall"]["overall_score"], 2.5);
        assert!(json["evaluation_id"].as_str().unwrap().starts_with("eval_"));
    }

    #[tokio::test]
    async fn test_evaluate_validation_errors() {
        let cases = [
            json!({"user_query": "", "ai_response": "a"}),
            json!({"user_query": "q", "ai_response": " "}),
            json!({"user_query": "q", "ai_response": "a", "eval_metrices": []}),
            json!({"user_query": "q", "ai_response": "a", "eval_metrices": ["Tone"]}),
        ];
        for body in cases {
            let (status, json) = send(app(), post_json("/api/v1/evaluate", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(json["error"].is_string());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_timeout_maps_to_gateway_timeout() {
        let evaluator = ScriptedEvaluator::new().with(Metric::Accuracy, Behavior::Hang);
        let options = ServiceOptions {
            evaluation_timeout: Duration::from_secs(10),
            ..ServiceOptions::default()
        };
        let (app, state) = app_with(evaluator, options);

        let (status, json) = send(
            app,
            post_json(
                "/api/v1/evaluate",
                json!({"user_query": "q", "ai_response": "a", "eval_metrices": ["Accuracy"]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert!(json["error"].as_str().unwrap().contains("timed out"));
        assert_eq!(state.service.active_count(), 0);
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (
                EvaluationError::CapacityExceeded { active: 5, max: 5 },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                EvaluationError::RuntimeInitialization("no handlers".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                EvaluationError::Internal("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            let (status, Json(body)) = evaluation_error(error);
            assert_eq!(status, expected);
            assert!(body["error"].is_string());
        }
        let (_, Json(body)) = evaluation_error(EvaluationError::CapacityExceeded { active: 5, max: 5 });
        assert_eq!(
            body["error"],
            "Maximum concurrent evaluations (5) reached. Please try again later."
        );
    }

    #[tokio::test]
    async fn test_status_of_unknown_evaluation_is_not_found() {
        let (status, json) = send(app(), get_req("/api/v1/evaluate/eval_000000000000/status")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "Evaluation eval_000000000000 not found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_of_active_evaluation() {
        let evaluator = ScriptedEvaluator::new()
            .with(Metric::Accuracy, Behavior::Delayed(Duration::from_secs(5), 3));
        let (app, state) = app_with(evaluator, ServiceOptions::default());

        let running = {
            let service = Arc::clone(&state.service);
            tokio::spawn(async move {
                service
                    .evaluate(&[Metric::Accuracy], crate::testing::sample_artifact())
                    .await
            })
        };
        while state.service.active_count() == 0 {
            tokio::task::yield_now().await;
        }
        let id = state.service.active_ids().remove(0);

        let (status, json) = send(
            app.clone(),
            get_req(&format!("/api/v1/evaluate/{id}/status")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["evaluation_id"], id.as_str());
        assert_eq!(json["status"], "processing");
        assert_eq!(json["selected_metrics"], json!(["Accuracy"]));

        let verdict = running.await.unwrap().unwrap();
        assert_eq!(verdict.evaluation_id, id);
        let (status, _) = send(app, get_req(&format!("/api/v1/evaluate/{id}/status"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_catalog() {
        let (status, json) = send(app(), get_req("/api/v1/metrics")).await;
        assert_eq!(status, StatusCode::OK);
        for metric in Metric::ALL {
            let entry = &json["metrics"][metric.key()];
            assert!(entry["definition"].as_str().unwrap().len() > 10);
            assert_eq!(entry["rating_scale"].as_object().unwrap().len(), 4);
            assert!(entry["rating_scale"]["3_great"].is_string());
        }
        assert_eq!(json["badges"].as_object().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_system_health() {
        let (status, json) = send(app(), get_req("/api/v1/system/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["max_concurrent_evaluations"], 5);
        assert_eq!(json["current_model"], "gpt-4o-mini");
        assert_eq!(json["model_provider"], "gpt");
        assert_eq!(json["agents"].as_array().unwrap().len(), 4);
        assert_eq!(json["runtime"]["lifecycle"], "uninitialized");
    }

    #[tokio::test]
    async fn test_sample_evaluation() {
        let (status, json) = send(app(), post_json("/api/v1/test", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["accuracy"].is_object());
        assert!(json["usefulness"].is_object());
        assert!(json["hallucination"].is_null());
        assert_eq!(json["overall"]["overall_rating"], "Great");
    }
}
