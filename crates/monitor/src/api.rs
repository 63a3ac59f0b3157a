//! HTTP API for health checks, Prometheus metrics and monitoring queries

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use monitor_lib::{
    now_millis, AnalysisOptions, Granularity, HistoricalQuery, MonitorError, MonitoringOrchestrator,
    OperationResult, PredictionRequest,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Default window of the history endpoint
const DEFAULT_HISTORY_MS: i64 = 60 * 60 * 1_000;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<MonitoringOrchestrator>,
}

impl AppState {
    pub fn new(monitor: Arc<MonitoringOrchestrator>) -> Self {
        Self { monitor }
    }
}

/// Library errors rendered as `{success: false, error}`
pub struct ApiError(MonitorError);

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MonitorError::UnknownSource(_) => StatusCode::NOT_FOUND,
            MonitorError::InvalidTimeRange { .. } => StatusCode::BAD_REQUEST,
            MonitorError::NotRunning
            | MonitorError::AlreadyRunning
            | MonitorError::InvalidState { .. } => StatusCode::CONFLICT,
            MonitorError::Storage(_) | MonitorError::Serialization(_) | MonitorError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(OperationResult::failed(&self.0))).into_response()
    }
}

/// 200 while the pipeline runs, 503 otherwise
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.monitor.status().await;
    let status_code = if status.running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(status))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn current_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.monitor.get_current_metrics().await)
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    /// Comma-separated source names
    pub collectors: Option<String>,
    pub aggregation: Option<Granularity>,
}

impl HistoryParams {
    fn into_query(self, now: i64) -> HistoricalQuery {
        let end_time = self.end_time.unwrap_or(now);
        HistoricalQuery {
            start_time: self
                .start_time
                .unwrap_or_else(|| end_time.saturating_sub(DEFAULT_HISTORY_MS)),
            end_time,
            collectors: self.collectors.map(|names| {
                names
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            }),
            aggregation: self.aggregation,
        }
    }
}

async fn historical_metrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = params.into_query(now_millis());
    let history = state.monitor.get_historical_metrics(&query).await?;
    Ok(Json(history))
}

async fn dashboard(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.monitor.get_dashboard_data().await)
}

async fn analysis(
    State(state): State<Arc<AppState>>,
    Json(options): Json<AnalysisOptions>,
) -> impl IntoResponse {
    Json(state.monitor.analyze_performance(options).await)
}

async fn predictions(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PredictionRequest>,
) -> impl IntoResponse {
    Json(state.monitor.predict_performance(&request).await)
}

async fn collectors(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.monitor.collectors())
}

async fn enable_collector(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let registration = state.monitor.enable_collector(&name)?;
    Ok(Json(registration))
}

async fn collect(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let report = state.monitor.collect_metrics().await?;
    Ok(Json(report))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/api/v1/metrics/current", get(current_metrics))
        .route("/api/v1/metrics/history", get(historical_metrics))
        .route("/api/v1/dashboard", get(dashboard))
        .route("/api/v1/analysis", post(analysis))
        .route("/api/v1/predictions", post(predictions))
        .route("/api/v1/collectors", get(collectors))
        .route("/api/v1/collectors/:name/enable", post(enable_collector))
        .route("/api/v1/collect", post(collect))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use async_trait::async_trait;
    use monitor_lib::{MetricSource, MetricValue, MetricValues, MonitorConfig};
    use tower::ServiceExt;

    struct FixedSource;

    #[async_trait]
    impl MetricSource for FixedSource {
        async fn collect(&self) -> anyhow::Result<MetricValues> {
            let mut values = MetricValues::new();
            values.insert("cpu_usage".to_string(), MetricValue::Number(42.0));
            values.insert("memory_usage".to_string(), MetricValue::Number(55.0));
            Ok(values)
        }
    }

    async fn setup_test_app(start: bool) -> (Router, Arc<MonitoringOrchestrator>) {
        let monitor = Arc::new(MonitoringOrchestrator::in_memory(MonitorConfig::default()));
        monitor.register_source("system", Arc::new(FixedSource));
        if start {
            monitor.start().await.unwrap();
        }
        let router = create_router(Arc::new(AppState::new(monitor.clone())));
        (router, monitor)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_healthz_reflects_running_state() {
        let (app, monitor) = setup_test_app(false).await;
        let response = app.clone().oneshot(get_request("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        monitor.start().await.unwrap();
        let response = app.oneshot(get_request("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        assert_eq!(status["running"], true);
        assert_eq!(status["sources_registered"], 1);
        monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_collect_then_query_current_and_history() {
        let (app, monitor) = setup_test_app(true).await;

        let response = app
            .clone()
            .oneshot(Request::builder().method("POST").uri("/api/v1/collect").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(get_request("/api/v1/metrics/current"))
            .await
            .unwrap();
        let current = body_json(response).await;
        assert_eq!(current["aggregated"]["system"]["cpu_usage"], 42.0);

        let response = app
            .clone()
            .oneshot(get_request("/api/v1/metrics/history?collectors=system&aggregation=minute"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let history = body_json(response).await;
        assert_eq!(history["snapshots"]["system"].as_array().unwrap().len(), 1);
        assert!(history["buckets"].is_array());

        let response = app
            .oneshot(get_request("/api/v1/metrics/history?start_time=10&end_time=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error = body_json(response).await;
        assert_eq!(error["success"], false);
        monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_collect_when_stopped_is_conflict() {
        let (app, _monitor) = setup_test_app(false).await;
        let response = app
            .oneshot(Request::builder().method("POST").uri("/api/v1/collect").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_collectors_and_enable() {
        let (app, _monitor) = setup_test_app(false).await;

        let response = app.clone().oneshot(get_request("/api/v1/collectors")).await.unwrap();
        let collectors = body_json(response).await;
        assert_eq!(collectors[0]["name"], "system");

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/collectors/system/enable", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(post_json("/api/v1/collectors/missing/enable", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_analysis_and_predictions() {
        let (app, monitor) = setup_test_app(true).await;
        monitor.collect_metrics().await.unwrap();

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/analysis", serde_json::json!({"include_trend": false})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert!(report["analysis"]["error"].is_null());
        assert!(report["recommendations"].is_array());

        let response = app
            .oneshot(post_json("/api/v1/predictions", serde_json::json!({"forecast_horizon": 5})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // Nothing trained after a single tick
        assert_eq!(body_json(response).await, serde_json::json!([]));
        monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_dashboard_and_metrics_endpoints() {
        let (app, monitor) = setup_test_app(true).await;
        monitor.collect_metrics().await.unwrap();

        let response = app.clone().oneshot(get_request("/api/v1/dashboard")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let dashboard = body_json(response).await;
        assert_eq!(dashboard["status"]["ticks_completed"], 1);

        let response = app.oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("perf_monitor_collection_latency_seconds"));
        monitor.stop().await.unwrap();
    }
}
