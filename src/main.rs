mod ctp;
mod event;
mod genai;
mod http;
mod jobs;
mod metrics;
mod models;
mod pipeline;
mod prompts;
mod services;
mod vision;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use event::EventDisposition;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, PushEnvelope};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "pixelphraser.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let pipeline = pipeline::Pipeline::from_env();
    let (queue, _worker) = jobs::JobQueue::spawn(pipeline);
    let openapi: serde_json::Value =
        serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
            .unwrap_or(json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;

    let state = AppState {
        queue,
        openapi: Arc::new(openapi),
        prometheus_handle,
    };
    let app = app(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "pixelphraser.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    queue: jobs::JobQueue,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/event", post(receive_event))
        .route("/jobs/{id}", get(get_job_status))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()))
}

/// Receive one push delivery from the message bus.
///
/// - Method: `POST`
/// - Path: `/event`
/// - Body: `{ "message": { "data": <base64>, ... } }`
///
/// Status mapping: malformed payloads and gate-disabled or non-product
/// events are acknowledged with 200 so the bus stops redelivering them;
/// permanent payload defects get a 400; accepted events are acknowledged
/// with 200 *before* the pipeline runs — the ack deadline of the bus is
/// shorter than the pipeline's worst-case latency, so completion is
/// decoupled from the response and post-ack failures surface only in logs
/// and the job-status map.
async fn receive_event(
    State(state): State<AppState>,
    Json(envelope): Json<PushEnvelope>,
) -> Response {
    metrics::inc_requests("/event");
    let message_id = envelope
        .message
        .as_ref()
        .and_then(|message| message.message_id.clone())
        .unwrap_or_default();

    let decoded = match event::decode_envelope(&envelope) {
        Ok(decoded) => decoded,
        Err(err) => {
            // A payload the bus cannot deliver intact will not self-heal;
            // ack it so the bus drops it, and keep the log record.
            warn!(
                target = "pixelphraser.api",
                message_id = %message_id,
                error = %err,
                "dropping malformed delivery",
            );
            metrics::inc_outcome("malformed");
            return StatusCode::OK.into_response();
        }
    };

    match event::evaluate(&decoded) {
        EventDisposition::Ignore => {
            info!(
                target = "pixelphraser.api",
                message_id = %message_id,
                "ignoring non-product event",
            );
            metrics::inc_outcome("ignored");
            StatusCode::OK.into_response()
        }
        EventDisposition::Skip => {
            info!(
                target = "pixelphraser.api",
                message_id = %message_id,
                "description generation not enabled for product, skipping",
            );
            metrics::inc_outcome("skipped");
            StatusCode::OK.into_response()
        }
        EventDisposition::Reject(reason) => {
            warn!(
                target = "pixelphraser.api",
                message_id = %message_id,
                reason = reason,
                "rejecting invalid product event",
            );
            metrics::inc_outcome("rejected");
            (
                StatusCode::BAD_REQUEST,
                Json(ApiError {
                    error: reason.to_string(),
                    detail: None,
                }),
            )
                .into_response()
        }
        EventDisposition::Proceed(product) => {
            let product_id = product.product_id.clone();
            match state.queue.enqueue(product).await {
                Ok(job_id) => {
                    info!(
                        target = "pixelphraser.api",
                        message_id = %message_id,
                        product_id = %product_id,
                        job_id = %job_id,
                        "event accepted, pipeline queued",
                    );
                    metrics::inc_outcome("accepted");
                    StatusCode::OK.into_response()
                }
                Err(err) => {
                    // Still pre-ack: a 5xx here lets the bus redeliver.
                    error!(
                        target = "pixelphraser.api",
                        message_id = %message_id,
                        product_id = %product_id,
                        error = %err.error,
                        "failed to queue accepted event",
                    );
                    (StatusCode::INTERNAL_SERVER_ERROR, Json(err)).into_response()
                }
            }
        }
    }
}

/// Health and readiness check.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "pixelphraser-rs",
    }))
}

async fn get_job_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                error: "invalid_job_id".into(),
                detail: None,
            }),
        )
            .into_response();
    };
    match state.queue.get(uuid).await {
        Some(info) => Json(info).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiError {
                error: "not_found".into(),
                detail: None,
            }),
        )
            .into_response(),
    }
}

async fn openapi_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json((*state.openapi).clone())
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>PixelPhraser API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LOCALES;
    use crate::pipeline::Pipeline;
    use crate::pipeline::tests::{FakeAnalyzer, FakeCategories, FakeGenerator, FakeStore};
    use crate::services::{ServiceError, TextGenerator};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use tower::util::ServiceExt;

    struct GatedGenerator {
        permits: Arc<Semaphore>,
    }

    #[async_trait]
    impl TextGenerator for GatedGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, ServiceError> {
            let permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| ServiceError::Failed("closed".into()))?;
            permit.forget();
            Ok("generated text".into())
        }
    }

    fn test_app(pipeline: Pipeline) -> Router {
        let (queue, _worker) = jobs::JobQueue::spawn(pipeline);
        app(AppState {
            queue,
            openapi: Arc::new(json!({"openapi": "3.0.3"})),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
        })
    }

    fn fake_pipeline(
        analyzer: Arc<FakeAnalyzer>,
        generator: Arc<dyn TextGenerator>,
        store: Arc<FakeStore>,
    ) -> Pipeline {
        Pipeline::new(
            Arc::new(FakeCategories::with_key("clothing")),
            analyzer,
            generator,
            store,
        )
    }

    fn product_payload() -> Value {
        json!({
            "type": "ProductCreated",
            "resource": { "typeId": "product", "id": "prod-1" },
            "productProjection": {
                "id": "prod-1",
                "name": { "en": "Linen Shirt" },
                "productType": { "typeId": "product-type", "id": "pt-clothing" },
                "masterVariant": {
                    "images": [ { "url": "https://cdn.example.com/shirt.jpg" } ],
                    "attributes": [ { "name": "generateDescription", "value": true } ]
                }
            }
        })
    }

    fn envelope_body(payload: &Value) -> Value {
        json!({
            "message": {
                "data": BASE64.encode(payload.to_string()),
                "messageId": "m-1",
            }
        })
    }

    async fn post_event(app: &Router, body: &Value) -> StatusCode {
        let request = Request::builder()
            .method("POST")
            .uri("/event")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        app.clone()
            .oneshot(request)
            .await
            .expect("response")
            .status()
    }

    async fn wait_for_record(store: &FakeStore) -> Value {
        for _ in 0..200 {
            if let Some(record) = store.objects.lock().unwrap().get("prod-1").cloned() {
                if record.get("translations").is_some() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("record never persisted");
    }

    #[tokio::test]
    async fn accepted_event_is_acked_before_pipeline_completes() {
        let permits = Arc::new(Semaphore::new(0));
        let store = Arc::new(FakeStore::default());
        let app = test_app(fake_pipeline(
            Arc::new(FakeAnalyzer::default()),
            Arc::new(GatedGenerator {
                permits: permits.clone(),
            }),
            store.clone(),
        ));

        let status = post_event(&app, &envelope_body(&product_payload())).await;
        assert_eq!(status, StatusCode::OK);
        // generator is still blocked, so nothing can have been persisted
        assert!(store.objects.lock().unwrap().is_empty());

        permits.add_permits(16);
        let record = wait_for_record(&store).await;
        assert_eq!(record["productName"], "Linen Shirt");
    }

    #[tokio::test]
    async fn acks_remain_immediate_while_pipelines_are_busy() {
        let permits = Arc::new(Semaphore::new(0));
        let store = Arc::new(FakeStore::default());
        let app = test_app(fake_pipeline(
            Arc::new(FakeAnalyzer::default()),
            Arc::new(GatedGenerator {
                permits: permits.clone(),
            }),
            store.clone(),
        ));

        // every earlier pipeline is parked on the generator, yet each new
        // delivery must still be acknowledged within the bus deadline
        for n in 0..3 {
            let mut payload = product_payload();
            payload["productProjection"]["id"] = json!(format!("prod-{n}"));
            let status = tokio::time::timeout(
                Duration::from_secs(2),
                post_event(&app, &envelope_body(&payload)),
            )
            .await
            .expect("ack must not wait on in-flight pipelines");
            assert_eq!(status, StatusCode::OK);
        }
        assert!(store.objects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn accepted_event_eventually_persists_complete_translations() {
        let store = Arc::new(FakeStore::default());
        let app = test_app(fake_pipeline(
            Arc::new(FakeAnalyzer::default()),
            Arc::new(FakeGenerator::default()),
            store.clone(),
        ));

        let status = post_event(&app, &envelope_body(&product_payload())).await;
        assert_eq!(status, StatusCode::OK);

        let record = wait_for_record(&store).await;
        let translations = record["translations"].as_object().expect("set");
        assert_eq!(translations.len(), LOCALES.len());
        for locale in LOCALES {
            assert!(translations.contains_key(locale), "missing {locale}");
        }
        assert_eq!(store.upserts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn non_product_event_is_acked_without_any_calls() {
        let analyzer = Arc::new(FakeAnalyzer::default());
        let store = Arc::new(FakeStore::default());
        let app = test_app(fake_pipeline(
            analyzer.clone(),
            Arc::new(FakeGenerator::default()),
            store.clone(),
        ));

        let mut payload = product_payload();
        payload["resource"]["typeId"] = json!("order");
        let status = post_event(&app, &envelope_body(&payload)).await;
        assert_eq!(status, StatusCode::OK);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(analyzer.calls.lock().unwrap().is_empty());
        assert!(store.objects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn gate_disabled_event_is_acked_without_any_calls() {
        let analyzer = Arc::new(FakeAnalyzer::default());
        let store = Arc::new(FakeStore::default());
        let app = test_app(fake_pipeline(
            analyzer.clone(),
            Arc::new(FakeGenerator::default()),
            store.clone(),
        ));

        let mut payload = product_payload();
        payload["productProjection"]["masterVariant"]["attributes"][0]["value"] = json!(false);
        let status = post_event(&app, &envelope_body(&payload)).await;
        assert_eq!(status, StatusCode::OK);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(analyzer.calls.lock().unwrap().is_empty());
        assert!(store.objects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_product_id_is_rejected_without_any_calls() {
        let analyzer = Arc::new(FakeAnalyzer::default());
        let app = test_app(fake_pipeline(
            analyzer.clone(),
            Arc::new(FakeGenerator::default()),
            Arc::new(FakeStore::default()),
        ));

        let mut payload = product_payload();
        payload["productProjection"]
            .as_object_mut()
            .unwrap()
            .remove("id");
        let status = post_event(&app, &envelope_body(&payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(analyzer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_deliveries_are_acked_and_dropped() {
        let analyzer = Arc::new(FakeAnalyzer::default());
        let app = test_app(fake_pipeline(
            analyzer.clone(),
            Arc::new(FakeGenerator::default()),
            Arc::new(FakeStore::default()),
        ));

        // no data field
        let status = post_event(&app, &json!({ "message": { "messageId": "m-1" } })).await;
        assert_eq!(status, StatusCode::OK);

        // data is not base64
        let body = json!({ "message": { "data": "!!not-base64!!" } });
        let status = post_event(&app, &body).await;
        assert_eq!(status, StatusCode::OK);

        // data decodes but is not JSON
        let body = json!({ "message": { "data": BASE64.encode("plain text") } });
        let status = post_event(&app, &body).await;
        assert_eq!(status, StatusCode::OK);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(analyzer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn health_reports_service_name() {
        let app = test_app(fake_pipeline(
            Arc::new(FakeAnalyzer::default()),
            Arc::new(FakeGenerator::default()),
            Arc::new(FakeStore::default()),
        ));
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn job_status_for_unknown_id_is_not_found() {
        let app = test_app(fake_pipeline(
            Arc::new(FakeAnalyzer::default()),
            Arc::new(FakeGenerator::default()),
            Arc::new(FakeStore::default()),
        ));
        let request = Request::builder()
            .uri(format!("/jobs/{}", uuid::Uuid::new_v4()))
            .body(Body::empty())
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let request = Request::builder()
            .uri("/jobs/not-a-uuid")
            .body(Body::empty())
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
