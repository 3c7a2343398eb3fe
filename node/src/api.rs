//! # Token Authority API
//!
//! Builds the axum router that serves the ledger over HTTP. All handlers
//! share [`AppState`] through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                  | Description                               |
//! |--------|-----------------------|-------------------------------------------|
//! | POST   | `/api/v1.0/validate`  | Which of these tokens are live?           |
//! | POST   | `/api/v1.0/transform` | Spend inputs, register outputs, atomically |
//! | POST   | `/api/v1.0/create`    | Fresh, unregistered tokens                |
//! | GET    | `/api/v1.0/status`    | Ledger health, 503 when down              |
//! | GET    | `/health`             | Liveness probe                            |
//!
//! There is no request lock. Concurrent transforms on the same token race
//! inside the ledger's transactions, and exactly one of them commits.
//! Ledger work is blocking (sled), so it runs on the blocking thread pool.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use upay_protocol::config::API_PREFIX;
use upay_protocol::ledger::{LedgerError, TokenAuthority};
use upay_protocol::schema::{
    CreateRequest, CreateResponse, DatabaseStatus, ErrorResponse, InsufficientCreditResponse,
    RequestError, StatusResponse, TransformRequest, TransformResponse, ValidateRequest,
    ValidateResponse,
};
use upay_protocol::token::{Amount, Token};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state of every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Reported by `/health`.
    pub version: String,
    pub authority: TokenAuthority,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// The full router: token API under `/api/v1.0`, `/health`, JSON 404s for
/// everything else.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let api = Router::new()
        .route("/validate", post(validate_handler))
        .route("/transform", post(transform_handler))
        .route("/create", post(create_handler))
        .route("/status", get(status_handler));

    Router::new()
        .nest(API_PREFIX, api)
        .route("/health", get(health_handler))
        .fallback(not_found_handler)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Everything a handler can answer besides success.
#[derive(Debug)]
pub enum ApiError {
    /// 400: malformed body or a request that fails its checks.
    BadRequest(String),
    /// 402: outputs worth more than inputs.
    InsufficientCredit(Amount),
    /// 404: an input is unknown or spent.
    NoValidToken,
    /// 503: the ledger cannot be reached.
    Unavailable(String),
    /// 500: anything else.
    Internal(String),
}

impl ApiError {
    fn reason(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::InsufficientCredit(_) => "insufficient_credit",
            ApiError::NoValidToken => "no_valid_token",
            ApiError::Unavailable(_) => "unavailable",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<RequestError> for ApiError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::InsufficientCredit { missing } => ApiError::InsufficientCredit(missing),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(_) => ApiError::NoValidToken,
            LedgerError::Conflict(_)
            | LedgerError::StaleToken { .. }
            | LedgerError::ValueMismatch { .. }
            | LedgerError::Token(_)
            | LedgerError::BootstrapDisabled => ApiError::BadRequest(e.to_string()),
            LedgerError::Storage(_) => ApiError::Unavailable(e.to_string()),
            LedgerError::Serialization(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("ledger task failed: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(msg))).into_response()
            }
            ApiError::InsufficientCredit(amount) => (
                StatusCode::PAYMENT_REQUIRED,
                Json(InsufficientCreditResponse::new(amount)),
            )
                .into_response(),
            ApiError::NoValidToken => (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("No valid token")),
            )
                .into_response(),
            ApiError::Unavailable(msg) => {
                error!(error = %msg, "ledger unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ErrorResponse::new("Ledger unavailable")),
                )
                    .into_response()
            }
            ApiError::Internal(msg) => {
                error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::new("Internal error")),
                )
                    .into_response()
            }
        }
    }
}

/// Record latency and, on failure, the rejection reason.
fn finish<T>(
    metrics: &SharedMetrics,
    endpoint: &str,
    started: Instant,
    result: Result<T, ApiError>,
) -> Result<T, ApiError> {
    metrics.observe_latency(endpoint, started);
    if let Err(e) = &result {
        metrics.reject(e.reason());
        warn!(endpoint, reason = e.reason(), "request refused");
    }
    result
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: 200 while the process is alive. Ledger health belongs
/// to `/status`.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// `POST /validate`: the live subset of the submitted tokens. Unknown and
/// spent tokens are dropped, not reported.
async fn validate_handler(
    State(state): State<AppState>,
    payload: Result<Json<ValidateRequest>, JsonRejection>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let started = Instant::now();
    let result = validate(&state, payload).await;
    finish(&state.metrics, "validate", started, result)
}

async fn validate(
    state: &AppState,
    payload: Result<Json<ValidateRequest>, JsonRejection>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let Json(request) = payload?;
    request.check()?;

    state
        .metrics
        .tokens_validated_total
        .inc_by(request.tokens.len() as u64);

    let authority = state.authority.clone();
    let valid_tokens =
        tokio::task::spawn_blocking(move || authority.validate_tokens(&request.tokens)).await??;
    Ok(Json(ValidateResponse { valid_tokens }))
}

/// `POST /transform`: spend every input and register every output, or
/// nothing at all.
async fn transform_handler(
    State(state): State<AppState>,
    payload: Result<Json<TransformRequest>, JsonRejection>,
) -> Result<Json<TransformResponse>, ApiError> {
    let started = Instant::now();
    let result = transform(&state, payload).await;
    finish(&state.metrics, "transform", started, result)
}

async fn transform(
    state: &AppState,
    payload: Result<Json<TransformRequest>, JsonRejection>,
) -> Result<Json<TransformResponse>, ApiError> {
    let Json(request) = payload?;
    request.check()?;

    let inputs = request.input_tokens.len() as u64;
    let outputs = request.output_tokens.len() as u64;
    let authority = state.authority.clone();
    let transformed_tokens = tokio::task::spawn_blocking(move || {
        authority.transform(&request.input_tokens, &request.output_tokens)
    })
    .await??;

    if inputs > 0 {
        state.metrics.transforms_total.inc();
        state.metrics.tokens_voided_total.inc_by(inputs);
        state.metrics.tokens_created_total.inc_by(outputs);
    }
    Ok(Json(TransformResponse { transformed_tokens }))
}

/// `POST /create`: fresh bearer tokens of the requested values. They are
/// not registered; a transform output or `upay-node issue` does that.
async fn create_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<Json<CreateResponse>, ApiError> {
    let started = Instant::now();
    let result = create(&state, payload);
    finish(&state.metrics, "create", started, result)
}

fn create(
    state: &AppState,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<Json<CreateResponse>, ApiError> {
    let Json(request) = payload?;
    request.check()?;

    let created_tokens = request
        .values
        .iter()
        .map(|v| Token::create(*v))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    state
        .metrics
        .tokens_generated_total
        .inc_by(created_tokens.len() as u64);
    info!(count = created_tokens.len(), "generated tokens");
    Ok(Json(CreateResponse { created_tokens }))
}

/// `GET /status`: `{"database": "OK"}`, or `"DOWN"` with a 503.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let authority = state.authority.clone();
    let healthy = match tokio::task::spawn_blocking(move || authority.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!(error = %e, "ledger ping failed");
            false
        }
        Err(e) => {
            error!(error = %e, "ledger ping task failed");
            false
        }
    };

    if healthy {
        (
            StatusCode::OK,
            Json(StatusResponse {
                database: DatabaseStatus::Ok,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(StatusResponse {
                database: DatabaseStatus::Down,
            }),
        )
    }
}

async fn not_found_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new("Not found")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    use upay_protocol::client::{ClientConfig, ClientError, TokenClient, TokenService};
    use upay_protocol::session::SessionManager;
    use upay_protocol::MemoryCollector;

    fn cents(c: u64) -> Amount {
        Amount::from_cents(c)
    }

    fn test_app_state() -> AppState {
        AppState {
            version: "0.1.0-test".into(),
            authority: TokenAuthority::open_temporary().expect("temp ledger"),
            metrics: Arc::new(crate::metrics::NodeMetrics::new().expect("metrics")),
        }
    }

    /// Sends a GET request and returns (status, body).
    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    /// Sends a POST with a raw JSON body and returns (status, body).
    async fn post_raw(router: &Router, path: &str, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    async fn post_json<B: serde::Serialize>(
        router: &Router,
        path: &str,
        body: &B,
    ) -> (StatusCode, Vec<u8>) {
        post_raw(router, path, serde_json::to_vec(body).unwrap()).await
    }

    // -- health, status, fallback ---------------------------------------------

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], "0.1.0-test");
    }

    #[tokio::test]
    async fn status_reports_database_ok() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/api/v1.0/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, br#"{"database":"OK"}"#);
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/api/v1.0/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, br#"{"error":"Not found"}"#);
    }

    // -- validate ---------------------------------------------------------------

    #[tokio::test]
    async fn validate_drops_unknown_and_spent_tokens() {
        let state = test_app_state();
        let live = state.authority.issue_tokens(cents(100), 2).unwrap();
        let spent = state.authority.issue_tokens(cents(100), 1).unwrap();
        state
            .authority
            .transform(&spent, &[Token::create(cents(100)).unwrap()])
            .unwrap();
        let unknown = Token::create(cents(100)).unwrap();

        let router = create_router(state);
        let mut tokens = live.clone();
        tokens.extend(spent);
        tokens.push(unknown);
        let (status, body) =
            post_json(&router, "/api/v1.0/validate", &ValidateRequest { tokens }).await;

        assert_eq!(status, StatusCode::OK);
        let resp: ValidateResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.valid_tokens, live);
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let router = create_router(test_app_state());
        let (status, _) = post_raw(&router, "/api/v1.0/validate", b"{\"tokens\":".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // A value that is not in canonical NNN.NN form.
        let bad = br#"{"tokens":[{"value":"1.5","token":"00","created":"2024-01-01T00:00:00Z"}]}"#;
        let (status, body) = post_raw(&router, "/api/v1.0/validate", bad.to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(!err.error.is_empty());
    }

    #[tokio::test]
    async fn empty_validate_is_400() {
        let router = create_router(test_app_state());
        let (status, _) = post_json(
            &router,
            "/api/v1.0/validate",
            &ValidateRequest { tokens: Vec::new() },
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // -- transform --------------------------------------------------------------

    #[tokio::test]
    async fn transform_spends_inputs_once() {
        let state = test_app_state();
        let metrics = state.metrics.clone();
        let inputs = state.authority.issue_tokens(cents(100), 2).unwrap();
        let outputs = vec![Token::create(cents(200)).unwrap()];
        let router = create_router(state);

        let request = TransformRequest::new(inputs.clone(), outputs.clone());
        let (status, body) = post_json(&router, "/api/v1.0/transform", &request).await;
        assert_eq!(status, StatusCode::OK);
        let resp: TransformResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.transformed_tokens, outputs);

        let replay = TransformRequest::new(inputs, vec![Token::create(cents(200)).unwrap()]);
        let (status, _) = post_json(&router, "/api/v1.0/transform", &replay).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        assert_eq!(metrics.transforms_total.get(), 1);
        assert_eq!(metrics.tokens_voided_total.get(), 2);
        assert_eq!(
            metrics
                .requests_rejected_total
                .with_label_values(&["no_valid_token"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn overdrawn_transform_is_402_with_missing_amount() {
        let state = test_app_state();
        let inputs = state.authority.issue_tokens(cents(100), 1).unwrap();
        let router = create_router(state);

        let request = TransformRequest::new(inputs, vec![Token::create(cents(250)).unwrap()]);
        let (status, body) = post_json(&router, "/api/v1.0/transform", &request).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body, br#"{"error":{"amount":"001.50"}}"#);
    }

    #[tokio::test]
    async fn empty_transform_is_a_no_op() {
        let router = create_router(test_app_state());
        let request = TransformRequest::new(Vec::new(), Vec::new());
        let (status, body) = post_json(&router, "/api/v1.0/transform", &request).await;
        assert_eq!(status, StatusCode::OK);
        let resp: TransformResponse = serde_json::from_slice(&body).unwrap();
        assert!(resp.transformed_tokens.is_empty());
    }

    // -- create -----------------------------------------------------------------

    #[tokio::test]
    async fn create_returns_unregistered_tokens() {
        let state = test_app_state();
        let authority = state.authority.clone();
        let router = create_router(state);

        let body = serde_json::json!({ "values": ["000.25", "010.00"] });
        let (status, body) = post_json(&router, "/api/v1.0/create", &body).await;
        assert_eq!(status, StatusCode::OK);

        let resp: CreateResponse = serde_json::from_slice(&body).unwrap();
        let values: Vec<Amount> = resp.created_tokens.iter().map(Token::value).collect();
        assert_eq!(values, vec![cents(25), cents(1_000)]);
        assert!(resp.created_tokens.iter().all(Token::is_bearer));
        assert!(authority.validate_tokens(&resp.created_tokens).unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_non_canonical_values() {
        let router = create_router(test_app_state());
        let body = serde_json::json!({ "values": ["0.25"] });
        let (status, _) = post_json(&router, "/api/v1.0/create", &body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // -- over the wire ----------------------------------------------------------

    /// Serve the router on an ephemeral port from a background runtime.
    /// The blocking client must not run inside a tokio runtime, so the test
    /// body stays on a plain thread.
    fn serve_in_background(state: AppState) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                axum::serve(listener, create_router(state)).await.unwrap();
            });
        });
        format!("http://{addr}")
    }

    #[test]
    fn session_pays_through_http_client() {
        let state = test_app_state();
        let authority = state.authority.clone();
        let url = serve_in_background(state);

        let client = TokenClient::new(ClientConfig {
            timeout: Duration::from_secs(5),
            ..ClientConfig::new(url)
        })
        .unwrap();
        assert_eq!(client.status().unwrap(), DatabaseStatus::Ok);

        let purse = authority.issue_tokens(cents(50), 4).unwrap();
        let memory = Arc::new(MemoryCollector::new());
        let manager = SessionManager::new(client.clone()).with_collector(memory.clone());

        let charged = manager
            .with_session(|session| {
                session.validate_tokens(purse.clone())?;
                session.cash(cents(100))
            })
            .unwrap();

        assert_eq!(charged, cents(100));
        assert_eq!(memory.len(), 1);
        assert_eq!(authority.validate_tokens(&purse).unwrap().len(), 2);
        assert_eq!(authority.validate_tokens(&memory.collected()).unwrap().len(), 1);

        // The 402 and 404 answers map back to the client's error kinds.
        let spent = &purse[..1];
        let overdrawn = client.transform_tokens(
            &authority.validate_tokens(&purse).unwrap()[..1],
            &[Token::create(cents(100)).unwrap()],
        );
        assert_eq!(
            overdrawn,
            Err(ClientError::InsufficientCredit { amount: cents(50) })
        );
        let replay = client.transform_tokens(spent, &[Token::create(cents(50)).unwrap()]);
        assert_eq!(replay, Err(ClientError::NoValidToken));
    }

    #[test]
    fn large_purse_is_validated_over_http() {
        let state = test_app_state();
        let authority = state.authority.clone();
        let url = serve_in_background(state);
        let client = TokenClient::new(ClientConfig::new(url)).unwrap();

        let purse = authority.issue_tokens(cents(50), 300).unwrap();
        let manager = SessionManager::new(client);
        let charged = manager
            .with_session(|session| {
                assert_eq!(session.validate_tokens(purse.clone())?, cents(15_000));
                session.cash(cents(100))
            })
            .unwrap();

        assert_eq!(charged, cents(100));
        assert_eq!(authority.validate_tokens(&purse).unwrap().len(), 298);
    }
}
