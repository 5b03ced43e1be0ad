pub mod admin;
pub mod balance;
pub mod health;
pub mod signup;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use rand::RngCore;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{hash_prefix, KeyStore};
use crate::cache::BalanceCache;
use crate::config::Config;
use crate::error::AppError;
use crate::rate::{client_ip, LimiterMap};
use crate::solana::BalanceFetcher;

const AUTH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub cache: BalanceCache,
    pub limiter: LimiterMap,
    pub keys: KeyStore,
    pub fetcher: Arc<dyn BalanceFetcher>,
}

/// Request id attached by the outermost middleware, echoed as `X-Request-ID`.
#[derive(Clone)]
pub struct RequestId(pub String);

/// Hash prefix of a validated API key, attached to the response extensions
/// for the logging middleware.
#[derive(Clone)]
struct ApiKeyHash(String);

async fn request_id(mut req: Request, next: Next) -> Response {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    let id = hex::encode(bytes);

    req.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-request-id"), value);
    }
    response
}

async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let ip = client_ip(&req);
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default();

    let start = Instant::now();
    let response = next.run(req).await;

    let api_key = response
        .extensions()
        .get::<ApiKeyHash>()
        .map(|h| h.0.clone())
        .unwrap_or_default();
    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        ip = %ip,
        request_id = %request_id,
        api_key = %api_key,
        "request"
    );
    response
}

async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = client_ip(&req);
    if !state.limiter.allow(&ip).await {
        return Err(AppError::RateLimited);
    }
    Ok(next.run(req).await)
}

/// Validates `X-API-Key` with its own 2 s bound layered on the request
/// context. Backend errors are logged but not distinguished in the response.
async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if key.is_empty() {
        return Err(AppError::MissingApiKey);
    }

    let active = match tokio::time::timeout(AUTH_TIMEOUT, state.keys.validate(&key)).await {
        Ok(Ok(active)) => active,
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "api key validation failed");
            return Err(AppError::InvalidApiKey);
        }
        Err(_) => {
            tracing::warn!("api key validation timed out");
            return Err(AppError::InvalidApiKey);
        }
    };
    if !active {
        return Err(AppError::InactiveApiKey);
    }

    let hash = hash_prefix(&key);
    let mut response = next.run(req).await;
    response.extensions_mut().insert(ApiKeyHash(hash));
    Ok(response)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static("x-api-key")])
}

/// Wires routes and the middleware chain. Order outermost-first:
/// RequestID -> Logger -> CORS -> RateLimit -> Auth, with rate limiting and
/// auth applied to `/api/*` only.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/get-balance", post(balance::get_balance))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    let mut router = Router::new()
        .route("/healthz", get(health::health_check))
        .merge(api);

    if state.config.admin_token.is_some() {
        router = router.route("/admin/create-key", post(admin::create_key));
    }
    if state.config.public_signup {
        router = router.route("/public/signup", post(signup::signup));
    }

    router
        .layer(cors_layer())
        .layer(middleware::from_fn(log_request))
        .layer(middleware::from_fn(request_id))
        .with_state(state)
}
