//! framelab-api - HTTP API server for framelab

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use framelab_core::{
    defaults, ArtifactRepository, DeletionReason, EndpointType, Error, JobRepository,
    NotificationDelivery, SubscriptionTier, UserRepository,
};
use framelab_db::{Database, PoolConfig};
use framelab_gdpr::AccountDeletionService;
use framelab_jobs::{
    AnonymizeAccountHandler, DispatchReminderHandler, HardDeleteAccountHandler, WorkerBuilder,
    WorkerConfig,
};
use framelab_limits::{
    CounterKey, CounterStore, QuotaSpec, RateLimiter, RateLimiterConfig, RedisCounterStore,
};
use framelab_review::ReviewScheduler;

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
///
/// UUIDv7 embeds a Unix timestamp, so IDs sort chronologically — useful for
/// log correlation and debugging production incidents.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    db: Database,
    /// Counter store backing the rate limiter, kept separately so a
    /// configuration update can rebuild the limiter over the same store.
    counter_store: Arc<dyn CounterStore>,
    limiter: Arc<RwLock<Arc<RateLimiter>>>,
    reviews: Arc<ReviewScheduler>,
    deletions: Arc<AccountDeletionService>,
}

impl AppState {
    async fn limiter(&self) -> Arc<RateLimiter> {
        self.limiter.read().await.clone()
    }
}

/// OpenAPI documentation (utoipa metadata, used for Swagger UI).
#[allow(dead_code)]
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Framelab API",
        version = "0.4.0",
        description = "Learning platform backend: spaced-repetition review scheduling, tiered rate limiting, and GDPR account deletion"
    ),
    tags(
        (name = "Reviews", description = "Ebbinghaus review scheduling"),
        (name = "RateLimits", description = "Per-user quota status and administration"),
        (name = "Account", description = "Staged account deletion"),
        (name = "System", description = "Health checks and system info")
    )
)]
struct ApiDoc;

// =============================================================================
// REQUEST IDENTITY
// =============================================================================

/// Caller identity as injected by the authenticating gateway.
#[derive(Debug, Clone, Copy)]
struct RequestIdentity {
    user_id: Uuid,
    tier: SubscriptionTier,
}

/// Resolve the caller from `X-User-Id` / `X-Subscription-Tier` headers.
///
/// The gateway authenticates and injects both headers; when the tier header
/// is missing the user row is consulted so a stale gateway cannot grant the
/// wrong tier forever.
async fn resolve_identity(state: &AppState, headers: &HeaderMap) -> Result<RequestIdentity, ApiError> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| ApiError::Unauthorized("missing or invalid X-User-Id header".into()))?;

    let tier = match headers
        .get("x-subscription-tier")
        .and_then(|v| v.to_str().ok())
        .and_then(SubscriptionTier::parse)
    {
        Some(tier) => tier,
        None => state.db.users.fetch(user_id).await?.subscription_tier,
    };

    Ok(RequestIdentity { user_id, tier })
}

/// Map a request path to its quota accounting category.
///
/// Copilot and output-generation endpoints are metered separately; every
/// other API route draws from the general quota.
fn classify_endpoint(path: &str, method: &Method) -> EndpointType {
    if path.starts_with("/api/v1/copilot") {
        EndpointType::AiCopilot
    } else if path.starts_with("/api/v1/outputs") && *method == Method::POST {
        EndpointType::OutputGeneration
    } else {
        EndpointType::GeneralApi
    }
}

/// Paths exempt from rate limiting and identity resolution.
fn is_unmetered(path: &str) -> bool {
    path == "/health" || path.starts_with("/docs") || path.starts_with("/api-docs")
}

// =============================================================================
// RATE LIMITING MIDDLEWARE
// =============================================================================

async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path().to_string();
    if is_unmetered(&path) {
        return Ok(next.run(request).await);
    }

    let identity = resolve_identity(&state, request.headers()).await?;
    let endpoint = classify_endpoint(&path, request.method());
    let key = CounterKey::new(identity.user_id, endpoint);

    let decision = state.limiter().await.enforce(&key, identity.tier, 1).await?;

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", header_value(decision.limit));
    headers.insert("x-ratelimit-remaining", header_value(decision.remaining));
    if let Ok(reset) = HeaderValue::from_str(&decision.reset_at.timestamp().to_string()) {
        headers.insert("x-ratelimit-reset", reset);
    }
    Ok(response)
}

fn header_value(n: u32) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

// =============================================================================
// RATE LIMIT HANDLERS
// =============================================================================

#[derive(Serialize)]
struct EndpointUsage {
    endpoint_type: EndpointType,
    allowed: bool,
    limit: u32,
    remaining: u32,
    reset_at: chrono::DateTime<chrono::Utc>,
}

/// Current quota usage for the caller across all endpoint categories.
async fn rate_limit_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = resolve_identity(&state, &headers).await?;
    let limiter = state.limiter().await;

    let report = limiter.usage_report(identity.user_id, identity.tier).await?;
    let endpoints: Vec<EndpointUsage> = report
        .into_iter()
        .map(|(endpoint_type, d)| EndpointUsage {
            endpoint_type,
            allowed: d.allowed,
            limit: d.limit,
            remaining: d.remaining,
            reset_at: d.reset_at,
        })
        .collect();

    Ok(Json(serde_json::json!({
        "user_id": identity.user_id,
        "tier": identity.tier,
        "algorithm": limiter.config().algorithm,
        "endpoints": endpoints,
    })))
}

#[derive(Serialize)]
struct QuotaEntry {
    tier: SubscriptionTier,
    endpoint_type: EndpointType,
    max_requests: u32,
    window_seconds: u64,
}

/// Dump the active rate limit configuration.
async fn get_rate_limit_configuration(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let limiter = state.limiter().await;
    let config = limiter.config();

    let mut entries = Vec::new();
    for tier in [SubscriptionTier::Free, SubscriptionTier::Premium] {
        for (endpoint_type, spec) in config.limits.endpoints_for_tier(tier) {
            entries.push(QuotaEntry {
                tier,
                endpoint_type,
                max_requests: spec.max_requests,
                window_seconds: spec.window_seconds,
            });
        }
    }

    Ok(Json(serde_json::json!({
        "algorithm": config.algorithm,
        "failure_policy": config.failure_policy,
        "entries": entries,
    })))
}

#[derive(Deserialize)]
struct UpdateQuotaRequest {
    tier: SubscriptionTier,
    endpoint_type: EndpointType,
    /// Zero disables the endpoint category for the tier.
    max_requests: u32,
    window_seconds: u64,
}

/// Update one quota entry and swap in a rebuilt limiter.
///
/// In-flight counters are untouched; only the quota ceiling changes.
async fn update_rate_limit_configuration(
    State(state): State<AppState>,
    Json(req): Json<UpdateQuotaRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.window_seconds == 0 {
        return Err(ApiError::BadRequest("window_seconds must be >= 1".into()));
    }

    let mut guard = state.limiter.write().await;
    let mut config = guard.config().clone();
    config.limits.set(
        req.tier,
        req.endpoint_type,
        QuotaSpec::new(req.max_requests, req.window_seconds),
    );
    *guard = Arc::new(RateLimiter::new(state.counter_store.clone(), config));
    drop(guard);

    info!(
        tier = req.tier.as_str(),
        endpoint_type = req.endpoint_type.as_str(),
        max_requests = req.max_requests,
        window_seconds = req.window_seconds,
        "Rate limit configuration updated"
    );

    Ok(Json(serde_json::json!({ "updated": true })))
}

#[derive(Deserialize)]
struct ResetQuotaRequest {
    user_id: Uuid,
    endpoint_type: EndpointType,
}

/// Clear a user's counter for one endpoint category (support tooling).
async fn reset_rate_limit(
    State(state): State<AppState>,
    Json(req): Json<ResetQuotaRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let key = CounterKey::new(req.user_id, req.endpoint_type);
    state.limiter().await.reset(&key).await?;
    Ok(Json(serde_json::json!({ "reset": true })))
}

// =============================================================================
// REVIEW HANDLERS
// =============================================================================

/// The caller's review schedule, split into upcoming and overdue.
async fn get_review_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = resolve_identity(&state, &headers).await?;
    let schedule = state.reviews.get_schedule(identity.user_id).await?;
    Ok(Json(schedule))
}

#[derive(Deserialize)]
struct RecordSessionRequest {
    /// Self-assessed recall score, 0-100.
    score: u8,
    #[serde(default)]
    minutes_spent: i32,
}

/// Record a completed review session for one of the caller's outputs.
async fn record_review_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(artifact_id): Path<Uuid>,
    Json(req): Json<RecordSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = resolve_identity(&state, &headers).await?;

    // Ownership check before any mutation; a foreign artifact is
    // indistinguishable from a missing one.
    let artifact = state.db.artifacts.fetch(artifact_id).await?;
    if artifact.user_id != identity.user_id {
        return Err(ApiError::NotFound(format!("Artifact {artifact_id} not found")));
    }

    let completion = state
        .reviews
        .record_review_completion(artifact_id, req.score, req.minutes_spent)
        .await?;
    Ok(Json(completion))
}

/// (Re-)schedule fixed-interval review reminders for an output.
///
/// Idempotent: reminders carry dedup keys, so calling this twice cannot
/// produce duplicate pending notifications.
async fn schedule_review_reminders(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(artifact_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = resolve_identity(&state, &headers).await?;

    let artifact = state.db.artifacts.fetch(artifact_id).await?;
    if artifact.user_id != identity.user_id {
        return Err(ApiError::NotFound(format!("Artifact {artifact_id} not found")));
    }

    let notification_ids = state.reviews.schedule_reviews(&artifact).await?;
    Ok(Json(serde_json::json!({
        "artifact_id": artifact_id,
        "scheduled": notification_ids.len(),
        "notification_ids": notification_ids,
    })))
}

// =============================================================================
// ACCOUNT DELETION HANDLERS
// =============================================================================

#[derive(Deserialize, Default)]
struct RequestDeletionBody {
    reason: Option<DeletionReason>,
}

/// Start the staged deletion workflow for the caller's account.
async fn request_deletion(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RequestDeletionBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = resolve_identity(&state, &headers).await?;
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or(DeletionReason::UserRequest);

    let request = state.deletions.initiate(identity.user_id, reason).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "deletion_id": request.id,
            "stage": request.stage,
            "cancellable_until": request.cancellable_until,
        })),
    ))
}

/// Cancel an in-flight deletion within the grace window.
async fn cancel_deletion(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(deletion_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = resolve_identity(&state, &headers).await?;
    let request = state
        .deletions
        .cancel(identity.user_id, deletion_id)
        .await?;
    Ok(Json(serde_json::json!({
        "deletion_id": request.id,
        "stage": request.stage,
        "cancelled_at": request.cancelled_at,
    })))
}

/// The caller's active deletion request.
async fn deletion_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = resolve_identity(&state, &headers).await?;
    match state.deletions.status(identity.user_id).await? {
        Some(status) => Ok(Json(status).into_response()),
        None => Err(ApiError::NotFound("no active deletion request".into())),
    }
}

/// Preview of what a deletion would remove, per entity.
async fn deletion_impact(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = resolve_identity(&state, &headers).await?;
    let impact = state.deletions.estimate_impact(identity.user_id).await?;
    let total = impact.total();
    Ok(Json(serde_json::json!({
        "user_id": identity.user_id,
        "impact": impact,
        "total": total,
    })))
}

// =============================================================================
// HEALTH CHECK
// =============================================================================

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

#[derive(Debug)]
enum ApiError {
    Core(Error),
    Unauthorized(String),
    NotFound(String),
    BadRequest(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Core(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Core(err) => {
                let status = match &err {
                    Error::QuotaExceeded { retry_after } => {
                        let retry = *retry_after;
                        let body = Json(serde_json::json!({
                            "error": err.to_string(),
                            "retry_after": retry,
                        }));
                        let mut response =
                            (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                        if let Ok(v) = HeaderValue::from_str(&retry.to_string()) {
                            response.headers_mut().insert(header::RETRY_AFTER, v);
                        }
                        return response;
                    }
                    Error::FeatureNotAvailable(_) => StatusCode::FORBIDDEN,
                    Error::NotFound(_) | Error::UserNotFound(_) | Error::ArtifactNotFound(_) => {
                        StatusCode::NOT_FOUND
                    }
                    Error::AlreadyHasActiveDeletion(_)
                    | Error::InvalidStageTransition { .. } => StatusCode::CONFLICT,
                    Error::CancellationWindowExpired(_) => StatusCode::GONE,
                    Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    warn!(error = %err, "Internal error surfaced to client");
                }
                (status, err.to_string())
            }
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));
        (status, body).into_response()
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Parse allowed origins from the `CORS_ALLOWED_ORIGINS` environment
/// variable (comma-separated). Strict whitelist; no wildcard.
fn parse_allowed_origins() -> Vec<HeaderValue> {
    let raw = std::env::var("CORS_ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string());

    raw.split(',')
        .filter_map(|origin| {
            let trimmed = origin.trim();
            if trimmed.is_empty() {
                return None;
            }
            match HeaderValue::from_str(trimmed) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = trimmed, "Ignoring unparsable CORS origin");
                    None
                }
            }
        })
        .collect()
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "framelab_api=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // Get configuration from environment
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/framelab".to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults::SERVER_PORT);

    // Connect to database
    info!("Connecting to database...");
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env()).await?;
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    // Rate limiter over Redis counters
    let counter_store: Arc<dyn CounterStore> = Arc::new(RedisCounterStore::from_env().await);
    let limiter_config = RateLimiterConfig::from_env()?;
    info!(
        algorithm = limiter_config.algorithm.as_str(),
        failure_policy = ?limiter_config.failure_policy,
        "Rate limiter initialized"
    );
    let limiter = Arc::new(RwLock::new(Arc::new(RateLimiter::new(
        counter_store.clone(),
        limiter_config,
    ))));

    // Domain services
    let deletions = Arc::new(AccountDeletionService::new(
        db.deletions.clone(),
        db.users.clone(),
        db.jobs.clone(),
        db.notifications.clone(),
    ));
    let reviews = Arc::new(ReviewScheduler::new(
        db.artifacts.clone(),
        db.notifications.clone(),
        db.notifications.clone(),
    ));

    // Background job worker
    let worker_config = WorkerConfig::from_env();
    let _worker_handle = if worker_config.enabled {
        info!("Starting job worker...");
        let delivery: Arc<dyn NotificationDelivery> = db.notifications.clone();
        let job_repo: Arc<dyn JobRepository> = db.jobs.clone();
        let worker = WorkerBuilder::new(job_repo)
            .with_config(worker_config)
            .with_handler(AnonymizeAccountHandler::new(deletions.clone()))
            .with_handler(HardDeleteAccountHandler::new(deletions.clone()))
            .with_handler(DispatchReminderHandler::new(delivery))
            .build()
            .await;
        let handle = worker.start();
        info!("Job worker started");
        Some(handle)
    } else {
        info!("Job worker disabled");
        None
    };

    // Create app state
    let state = AppState {
        db,
        counter_store,
        limiter,
        reviews,
        deletions,
    };

    // Build router
    let app = Router::new()
        // Health check
        .route("/health", get(health_check))
        // OpenAPI / Swagger UI
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Review scheduling
        .route("/api/v1/reviews/schedule", get(get_review_schedule))
        .route(
            "/api/v1/reviews/outputs/:id/session",
            post(record_review_session),
        )
        .route(
            "/api/v1/reviews/outputs/:id/reminders",
            post(schedule_review_reminders),
        )
        // Rate limits
        .route("/api/v1/rate-limits/status", get(rate_limit_status))
        .route(
            "/api/v1/rate-limits/configuration",
            get(get_rate_limit_configuration).put(update_rate_limit_configuration),
        )
        .route("/api/v1/rate-limits/reset", post(reset_rate_limit))
        // Account deletion
        .route("/api/v1/users/request-deletion", post(request_deletion))
        .route(
            "/api/v1/users/cancel-deletion/:deletion_id",
            post(cancel_deletion),
        )
        .route("/api/v1/users/deletion-status", get(deletion_status))
        .route("/api/v1/users/deletion-impact", get(deletion_impact))
        // Middleware
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(CatchPanicLayer::new())
        .layer({
            let allowed_origins = parse_allowed_origins();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(allowed_origins))
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
                .allow_credentials(true)
                .max_age(std::time::Duration::from_secs(3600))
        })
        .layer(RequestBodyLimitLayer::new(1024 * 1024)) // 1 MB
        .with_state(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
