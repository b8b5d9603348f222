use crate::api::handlers::{auth, health};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Method, Request, header::CONTENT_TYPE},
    routing::options,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, error, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

// Keep these internal to the crate while allowing CLI/server wiring to reference them.
pub(crate) mod email;
pub(crate) mod handlers;
pub(crate) mod maintenance;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use email::EmailWorkerConfig;
pub use handlers::auth::{MailboxScheme, PanelConfig, RateLimitPolicy};
pub use maintenance::MaintenanceConfig;
pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Assemble the full application: documented routes, the session
/// middleware, CORS pinned to the panel origin and the tracing layers.
///
/// # Errors
/// Returns an error if the configured base URL cannot be turned into a
/// CORS origin.
pub fn app(pool: PgPool, config: PanelConfig) -> Result<Router> {
    let origin = panel_origin(config.base_url())?;
    let state = Arc::new(auth::PanelState::new(
        config,
        Arc::new(auth::PanelHasher),
        auth::RateLimiter::new(pool.clone()),
    ));

    // The browser must send the session cookie cross-origin, so credentials
    // stay enabled and the origin is exact rather than a wildcard.
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, HeaderName::from_static("x-csrf-token")])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(AllowOrigin::exact(origin))
        .allow_credentials(true);

    // Build the router from OpenAPI-wired routes, then extend it with
    // non-doc routes like the preflight-only `OPTIONS /health`. The OpenAPI
    // document itself stays in openapi.rs for the `openapi` binary.
    let (router, _openapi) = router().split_for_parts();
    Ok(router
        .route("/health", options(health::health))
        .layer(axum::middleware::from_fn(
            auth::middleware::session_middleware,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state))
                .layer(Extension(pool)),
        ))
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: SecretString,
    config: PanelConfig,
    email_config: email::EmailWorkerConfig,
    maintenance_config: maintenance::MaintenanceConfig,
) -> Result<()> {
    // Ctrl-C feeds the shutdown channel; the background workers die with
    // the process.
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {err}");
        }
        let _ = tx.send(());
    });

    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    // Background worker polls email_outbox (DB-backed queue) for pending
    // rows, delivers/logs them, and retries failures with exponential
    // backoff.
    email::spawn_outbox_worker(pool.clone(), Arc::new(email::LogEmailSender), email_config);
    maintenance::spawn_maintenance_worker(pool.clone(), maintenance_config);

    let app = app(pool, config)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            rx.recv().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// Reduce the configured base URL to an exact `scheme://host[:port]`
/// origin for CORS.
fn panel_origin(base_url: &str) -> Result<HeaderValue> {
    let parsed =
        Url::parse(base_url).with_context(|| format!("Invalid panel base URL: {base_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Panel base URL must include a valid host: {base_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build panel origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_origin_strips_path_and_keeps_port() -> Result<()> {
        let origin = panel_origin("https://panel.example.com:8443/admin/")?;
        assert_eq!(origin.to_str()?, "https://panel.example.com:8443");

        let origin = panel_origin("http://panel.example.com/")?;
        assert_eq!(origin.to_str()?, "http://panel.example.com");
        Ok(())
    }

    #[test]
    fn panel_origin_rejects_garbage() {
        assert!(panel_origin("not a url").is_err());
    }
}
