//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression, body limits
//! and rate limiting, and serves it with graceful shutdown.

use std::future::Future;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_core::config::ParleyConfig;
use parley_core::error::ParleyError;

use crate::handlers;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::state::AppState;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
}

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let server = &state.config.server;
    let cors = cors_layer(&server.allowed_origins);
    let limiter = RateLimiter::new(server.rate_limit_per_sec);
    let body_limit = server.max_body_bytes;

    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/", get(handlers::api_index));

    let rate_limited_routes = Router::new()
        .route("/api/v1/sessions/start", post(handlers::create_session))
        .route("/api/v1/sessions/stats", get(handlers::session_stats))
        .route(
            "/api/v1/sessions/{session_id}/history",
            get(handlers::session_history),
        )
        .route(
            "/api/v1/sessions/{session_id}/info",
            get(handlers::session_info),
        )
        .route(
            "/api/v1/sessions/{session_id}",
            delete(handlers::delete_session),
        )
        .route("/feedback", post(handlers::submit_feedback))
        .route("/events", post(handlers::record_event))
        .route("/leads", post(handlers::record_lead))
        .route("/translate", post(handlers::translate))
        .layer(axum::middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ));

    // Chat streams and stop requests are exempt from rate limiting.
    let stream_routes = Router::new()
        .route("/api/v1/sessions/{session_id}/chat", post(handlers::chat))
        .route("/api/v1/sessions/{session_id}/stop", post(handlers::stop_turn))
        .route(
            "/chat",
            post(handlers::legacy_chat).get(handlers::legacy_chat_get),
        );

    public_routes
        .merge(rate_limited_routes)
        .merge(stream_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on the configured address until `shutdown` resolves.
pub async fn start_server<F>(
    config: &ParleyConfig,
    state: AppState,
    shutdown: F,
) -> Result<(), ParleyError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", config.general.host, config.general.port);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ParleyError::Api(format!("Failed to bind {}: {}", addr, e)))?;
    info!("Starting API server on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ParleyError::Api(format!("Server error: {}", e)))?;

    info!("API server stopped");
    Ok(())
}
