use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use clap::Parser;
use job_board_api::{
    ApiError, FaultConfig, JobBoardApi, MigrateResult, ReorderRequest, API_CONTRACT_VERSION,
};
use job_board_core::{BoardError, Job, JobPage, JobPatch, JobQuery, JobStatus, NewJob};
use job_board_store_sqlite::{IntegrityReport, SchemaStatus};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: JobBoardApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
    code: &'static str,
    retryable: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Query string for `GET /v1/jobs`; `tags` is comma separated.
#[derive(Debug, Clone, Default, Deserialize)]
struct ListParams {
    search: Option<String>,
    status: Option<JobStatus>,
    tags: Option<String>,
    page: Option<u32>,
    page_size: Option<u32>,
}

impl From<ListParams> for JobQuery {
    fn from(params: ListParams) -> Self {
        let tags = params
            .tags
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();
        JobQuery {
            search: params.search,
            status: params.status,
            tags,
            page: params.page,
            page_size: params.page_size,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "job-board-service")]
#[command(about = "Local HTTP service for the job board")]
struct Args {
    #[arg(long, env = "JOB_BOARD_DB", default_value = "./job_board.sqlite3")]
    db: PathBuf,
    #[arg(long, env = "JOB_BOARD_BIND", default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// Probability that a reorder fails just before commit.
    #[arg(long, default_value_t = 0.0)]
    reorder_failure_rate: f64,
    /// Probability that a create, update, or delete fails just before commit.
    #[arg(long, default_value_t = 0.0)]
    mutation_failure_rate: f64,
    #[arg(long)]
    fault_seed: Option<u64>,
}

impl Args {
    fn fault_config(&self) -> FaultConfig {
        FaultConfig {
            reorder_failure_rate: self.reorder_failure_rate,
            mutation_failure_rate: self.mutation_failure_rate,
            seed: self.fault_seed,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceError {
    fn new(status: StatusCode, code: &'static str, retryable: bool, message: String) -> Self {
        Self {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message,
            code,
            retryable,
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            false,
            message.into(),
        )
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            false,
            message.into(),
        )
    }
}

impl From<ApiError> for ServiceError {
    fn from(err: ApiError) -> Self {
        let status = match &err {
            ApiError::Board(BoardError::InvalidArgument(_)) => StatusCode::BAD_REQUEST,
            ApiError::Board(BoardError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Board(BoardError::Conflict { .. }) => StatusCode::CONFLICT,
            ApiError::Board(BoardError::TransactionFailure(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = format!("{err:#}");
        if status.is_server_error() {
            tracing::warn!(code = err.code(), %status, error = %message, "request failed");
        } else {
            tracing::debug!(code = err.code(), %status, error = %message, "request rejected");
        }
        Self::new(status, err.code(), err.is_retryable(), message)
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ServiceError {
    fn from(rejection: QueryRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

type Reply<T> = Result<Json<ServiceEnvelope<T>>, ServiceError>;

/// Run one synchronous API call on the blocking pool.
async fn run_api<T, F>(state: &ServiceState, call: F) -> Reply<T>
where
    T: Serialize + Send + 'static,
    F: FnOnce(&JobBoardApi) -> Result<T, ApiError> + Send + 'static,
{
    let api = state.api.clone();
    match tokio::task::spawn_blocking(move || call(&api)).await {
        Ok(result) => Ok(Json(envelope(result?))),
        Err(err) => {
            tracing::error!(error = %err, "blocking api task did not complete");
            Err(ServiceError::internal(format!("api task failed: {err}")))
        }
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/db/integrity-check", post(db_integrity_check))
        .route("/v1/jobs", get(jobs_list).post(jobs_create))
        .route(
            "/v1/jobs/:job_id",
            get(jobs_show).patch(jobs_update).delete(jobs_delete),
        )
        .route("/v1/jobs/:job_id/reorder", patch(jobs_reorder))
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("job_board=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let api = JobBoardApi::with_faults(args.db.clone(), &args.fault_config())?;
    let state = ServiceState { api };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, db = %args.db.display(), "job board service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/yaml; charset=utf-8")],
        OPENAPI_YAML,
    )
}

async fn db_schema_version(State(state): State<ServiceState>) -> Reply<SchemaStatus> {
    run_api(&state, JobBoardApi::schema_status).await
}

async fn db_migrate(
    State(state): State<ServiceState>,
    request: Result<Json<MigrateRequest>, JsonRejection>,
) -> Reply<MigrateResult> {
    let Json(request) = request?;
    run_api(&state, move |api| api.migrate(request.dry_run)).await
}

async fn db_integrity_check(State(state): State<ServiceState>) -> Reply<IntegrityReport> {
    run_api(&state, JobBoardApi::integrity_check).await
}

async fn jobs_list(
    State(state): State<ServiceState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Reply<JobPage> {
    let Query(params) = params?;
    let query = JobQuery::from(params);
    run_api(&state, move |api| api.list_jobs(&query)).await
}

async fn jobs_create(
    State(state): State<ServiceState>,
    request: Result<Json<NewJob>, JsonRejection>,
) -> Reply<Job> {
    let Json(request) = request?;
    run_api(&state, move |api| api.create_job(request)).await
}

async fn jobs_show(State(state): State<ServiceState>, Path(job_id): Path<String>) -> Reply<Job> {
    run_api(&state, move |api| api.get_job(&job_id)).await
}

async fn jobs_update(
    State(state): State<ServiceState>,
    Path(job_id): Path<String>,
    request: Result<Json<JobPatch>, JsonRejection>,
) -> Reply<Job> {
    let Json(patch) = request?;
    run_api(&state, move |api| api.update_job(&job_id, patch)).await
}

async fn jobs_reorder(
    State(state): State<ServiceState>,
    Path(job_id): Path<String>,
    request: Result<Json<ReorderRequest>, JsonRejection>,
) -> Reply<Job> {
    let Json(request) = request?;
    run_api(&state, move |api| api.reorder_job(&job_id, request)).await
}

async fn jobs_delete(
    State(state): State<ServiceState>,
    Path(job_id): Path<String>,
) -> Reply<Job> {
    run_api(&state, move |api| api.delete_job(&job_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!(
            "job-board-service-{}.sqlite3",
            ulid::Ulid::new()
        ))
    }

    fn test_router(db_path: PathBuf) -> Router {
        app(ServiceState {
            api: JobBoardApi::new(db_path),
        })
    }

    fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder().uri(uri).method(method);
        let built = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string())),
            None => builder.body(Body::empty()),
        };
        built.unwrap_or_else(|err| panic!("failed to build request: {err}"))
    }

    async fn read_body(response: Response) -> String {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        };
        let status = response.status();
        let body = read_body(response).await;
        match serde_json::from_str(&body) {
            Ok(value) => (status, value),
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    async fn send_json(
        router: &Router,
        method: &str,
        uri: &str,
        body: Value,
    ) -> (StatusCode, Value) {
        send(router, request(method, uri, Some(body))).await
    }

    async fn send_empty(router: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        send(router, request(method, uri, None)).await
    }

    fn data_str<'a>(value: &'a Value, field: &str) -> &'a str {
        value
            .pointer(&format!("/data/{field}"))
            .and_then(Value::as_str)
            .unwrap_or_else(|| panic!("missing data.{field} in {value}"))
    }

    fn data_u64(value: &Value, field: &str) -> u64 {
        value
            .pointer(&format!("/data/{field}"))
            .and_then(Value::as_u64)
            .unwrap_or_else(|| panic!("missing data.{field} in {value}"))
    }

    fn field_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
        value.get(field).and_then(Value::as_str)
    }

    fn cleanup(db_path: &std::path::Path) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", db_path.display(), suffix));
        }
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let router = test_router(unique_temp_db_path());
        let (status, value) = send_empty(&router, "GET", "/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            field_str(&value, "service_contract_version"),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert_eq!(data_str(&value, "status"), "ok");
    }

    #[tokio::test]
    async fn openapi_endpoint_returns_versioned_artifact() {
        let router = test_router(unique_temp_db_path());
        let response = match router.oneshot(request("GET", "/v1/openapi", None)).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        };
        assert_eq!(response.status(), StatusCode::OK);

        let body = read_body(response).await;
        assert!(body.contains("openapi: 3.1.0"));
        assert!(body.contains("version: service.v1"));
        assert!(body.contains("/v1/jobs/{id}/reorder"));
    }

    #[tokio::test]
    async fn create_insert_reorder_and_list_flow() {
        let db_path = unique_temp_db_path();
        let router = test_router(db_path.clone());

        let mut ids = Vec::new();
        for title in ["Platform Engineer", "Data Scientist", "Support Specialist"] {
            let body = json!({ "title": title, "tags": ["remote"] });
            let (status, value) = send_json(&router, "POST", "/v1/jobs", body).await;
            assert_eq!(status, StatusCode::OK);
            ids.push(data_str(&value, "id").to_string());
        }

        let body = json!({ "title": "Staff Engineer", "order": 2 });
        let (status, inserted) = send_json(&router, "POST", "/v1/jobs", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(data_u64(&inserted, "order"), 2);
        assert_eq!(data_str(&inserted, "slug"), "staff-engineer");

        let uri = format!("/v1/jobs/{}/reorder", ids[2]);
        let body = json!({ "from_order": 4, "to_order": 1 });
        let (status, moved) = send_json(&router, "PATCH", &uri, body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(data_u64(&moved, "order"), 1);

        let (status, page) =
            send_empty(&router, "GET", "/v1/jobs?tags=remote&page_size=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(data_u64(&page, "total"), 3);
        let listed: Vec<&str> = page
            .pointer("/data/items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("id")?.as_str())
                    .collect()
            })
            .unwrap_or_default();
        assert_eq!(listed, vec![ids[2].as_str(), ids[0].as_str()]);

        let (status, report) = send_empty(&router, "POST", "/v1/db/integrity-check").await;
        assert_eq!(status, StatusCode::OK);
        let live = report
            .pointer("/data/ordering/live_records")
            .and_then(Value::as_u64);
        assert_eq!(live, Some(4));

        cleanup(&db_path);
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let db_path = unique_temp_db_path();
        let router = test_router(db_path.clone());

        let body = json!({ "title": "Recruiter" });
        let (_, created) = send_json(&router, "POST", "/v1/jobs", body).await;
        let job_id = data_str(&created, "id").to_string();

        let uri = format!("/v1/jobs/{job_id}/reorder");
        let body = json!({ "from_order": 3, "to_order": 1 });
        let (status, conflict) = send_json(&router, "PATCH", &uri, body).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(field_str(&conflict, "code"), Some("conflict"));
        assert_eq!(
            conflict.get("retryable").and_then(Value::as_bool),
            Some(false)
        );

        let missing = ulid::Ulid::new();
        let uri = format!("/v1/jobs/{missing}");
        let (status, _) = send_empty(&router, "GET", &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let body = json!({ "title": "  " });
        let (status, invalid) = send_json(&router, "POST", "/v1/jobs", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(field_str(&invalid, "code"), Some("invalid_argument"));

        let body = json!({ "order": 1 });
        let (status, malformed) = send_json(&router, "POST", "/v1/jobs", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(field_str(&malformed, "code"), Some("invalid_request"));

        cleanup(&db_path);
    }

    #[tokio::test]
    async fn update_and_delete_keep_orders_dense() {
        let db_path = unique_temp_db_path();
        let router = test_router(db_path.clone());

        let mut ids = Vec::new();
        for title in ["Role A", "Role B", "Role C"] {
            let body = json!({ "title": title });
            let (_, value) = send_json(&router, "POST", "/v1/jobs", body).await;
            ids.push(data_str(&value, "id").to_string());
        }

        let uri = format!("/v1/jobs/{}", ids[0]);
        let body = json!({ "status": "archived", "order": 3 });
        let (status, updated) = send_json(&router, "PATCH", &uri, body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(data_str(&updated, "status"), "archived");
        assert_eq!(data_u64(&updated, "order"), 3);

        let uri = format!("/v1/jobs/{}", ids[1]);
        let (status, _) = send_empty(&router, "DELETE", &uri).await;
        assert_eq!(status, StatusCode::OK);

        let uri = format!("/v1/jobs/{}", ids[0]);
        let (_, remaining) = send_empty(&router, "GET", &uri).await;
        assert_eq!(data_u64(&remaining, "order"), 2);

        let (_, report) = send_empty(&router, "POST", "/v1/db/integrity-check").await;
        let missing = report
            .pointer("/data/ordering/missing_orders")
            .and_then(Value::as_array)
            .map(Vec::len);
        assert_eq!(missing, Some(0));

        cleanup(&db_path);
    }

    #[tokio::test]
    async fn migrate_dry_run_reports_plan() {
        let db_path = unique_temp_db_path();
        let router = test_router(db_path.clone());

        let body = json!({ "dry_run": true });
        let (status, value) = send_json(&router, "POST", "/v1/db/migrate", body).await;
        assert_eq!(status, StatusCode::OK);
        let dry_run = value.pointer("/data/dry_run").and_then(Value::as_bool);
        assert_eq!(dry_run, Some(true));

        let (status, schema) = send_empty(&router, "POST", "/v1/db/schema-version").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(data_u64(&schema, "target_version"), 2);

        cleanup(&db_path);
    }

    #[tokio::test]
    async fn list_tags_are_trimmed_before_matching() {
        let db_path = unique_temp_db_path();
        let router = test_router(db_path.clone());

        let body = json!({ "title": "Remote Role", "tags": ["remote"] });
        send_json(&router, "POST", "/v1/jobs", body).await;
        let body = json!({ "title": "Office Role", "tags": ["onsite"] });
        send_json(&router, "POST", "/v1/jobs", body).await;

        let (status, page) = send_empty(&router, "GET", "/v1/jobs?tags=%20remote%20,").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(data_u64(&page, "total"), 1);

        cleanup(&db_path);
    }
}
