//! Session cookie middleware: load on the way in, save on the way out.

use axum::{
    Extension,
    extract::Request,
    http::header::SET_COOKIE,
    middleware::Next,
    response::Response,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::session::{Session, SessionHandle, extract_session_cookie, session_cookie};
use super::state::PanelState;
use super::storage;

/// Attach a [`SessionHandle`] to every request and persist it afterwards.
///
/// A cookie with a bad signature is ignored outright. A store outage on load
/// degrades to an anonymous session instead of failing the request; the save
/// on the way out always runs, and the cookie is set even when that save
/// fails so the browser keeps a stable id.
pub(crate) async fn session_middleware(
    Extension(state): Extension<Arc<PanelState>>,
    Extension(pool): Extension<PgPool>,
    mut request: Request,
    next: Next,
) -> Response {
    let signer = state.config().signer();

    let session = match extract_session_cookie(request.headers())
        .and_then(|value| signer.decode(&value))
    {
        Some(id) => match storage::load_session(&pool, &id).await {
            Ok(Some(data)) => Session::from_store(id, data),
            Ok(None) => Session::with_id(id),
            Err(err) => {
                error!("Failed to load session, continuing anonymous: {err}");
                Session::with_id(id)
            }
        },
        None => Session::default(),
    };

    let handle = SessionHandle::new(session);
    request.extensions_mut().insert(handle.clone());

    let mut response = next.run(request).await;

    let mut session = handle.lock().await;
    let id = session.ensure_id();
    if let Err(err) = storage::save_session(
        &pool,
        &id,
        &session.data,
        state.config().session_ttl_seconds(),
    )
    .await
    {
        error!("Failed to save session: {err}");
    }
    drop(session);

    match signer.encode(&id) {
        Ok(signed) => match session_cookie(&signed, state.config().cookie_secure()) {
            Ok(cookie) => {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
            Err(err) => error!("Failed to build session cookie: {err}"),
        },
        Err(err) => error!("Failed to sign session id: {err}"),
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::password::PanelHasher;
    use super::super::rate_limit::RateLimiter;
    use super::super::session::SessionSigner;
    use super::super::state::PanelConfig;
    use anyhow::{Context, Result};
    use axum::{
        Router,
        body::Body,
        http::{Request as HttpRequest, StatusCode, header::COOKIE},
        routing::get,
    };
    use secrecy::SecretString;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    async fn probe(Extension(session): Extension<SessionHandle>) -> String {
        let session = session.lock().await;
        format!("logged_in={}", session.data.logged_in)
    }

    // Port 1 is never a Postgres server, so every query fails fast.
    fn unreachable_pool() -> Result<PgPool> {
        PgPoolOptions::new()
            .connect_lazy("postgres://postgres@127.0.0.1:1/postkesto")
            .context("lazy pool")
    }

    fn test_app(pool: PgPool) -> (Router, SessionSigner) {
        let config = PanelConfig::new(
            "http://panel.example.test".to_string(),
            SecretString::from("sufficiently-long-session-secret"),
        );
        let signer = config.signer();
        let state = Arc::new(PanelState::new(
            config,
            Arc::new(PanelHasher),
            RateLimiter::new(pool.clone()),
        ));
        let app = Router::new()
            .route("/probe", get(probe))
            .layer(axum::middleware::from_fn(session_middleware))
            .layer(Extension(state))
            .layer(Extension(pool));
        (app, signer)
    }

    fn cookie_value(response: &Response) -> Option<String> {
        let raw = response.headers().get(SET_COOKIE)?.to_str().ok()?;
        let pair = raw.split(';').next()?;
        let (name, value) = pair.split_once('=')?;
        (name == "session_id").then(|| value.to_string())
    }

    #[tokio::test]
    async fn store_outage_degrades_to_anonymous() -> Result<()> {
        let (app, _signer) = test_app(unreachable_pool()?);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/probe")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(cookie_value(&response).is_some());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&body[..], b"logged_in=false");
        Ok(())
    }

    #[tokio::test]
    async fn validated_id_survives_store_outage() -> Result<()> {
        let (app, signer) = test_app(unreachable_pool()?);
        let id = "a".repeat(32);
        let signed = signer.encode(&id)?;

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/probe")
                    .header(COOKIE, format!("session_id={signed}"))
                    .body(Body::empty())?,
            )
            .await?;

        let value = cookie_value(&response).context("response should set the session cookie")?;
        let round_tripped = signer.decode(&value).context("cookie should verify")?;
        assert_eq!(round_tripped, id);
        Ok(())
    }

    #[tokio::test]
    async fn tampered_cookie_gets_a_fresh_session() -> Result<()> {
        let (app, signer) = test_app(unreachable_pool()?);

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/probe")
                    .header(COOKIE, "session_id=forged-id.deadbeef")
                    .body(Body::empty())?,
            )
            .await?;

        let value = cookie_value(&response).context("response should set the session cookie")?;
        let fresh_id = signer.decode(&value).context("cookie should verify")?;
        assert_ne!(fresh_id, "forged-id");
        assert_eq!(fresh_id.len(), 32);
        Ok(())
    }
}
