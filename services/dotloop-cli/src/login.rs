//! Interactive login
//!
//! Binds a one-shot HTTP listener at the redirect URI's host, port and path,
//! hands the authorization URL to the caller, and waits for the browser to
//! come back with `code` and `state`. The callback is verified against the
//! pending login before the code is exchanged through the relay.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use axum::Router;
use axum::extract::{RawQuery, State};
use axum::response::Html;
use axum::routing::get;
use dotloop_auth::{CallbackParams, CredentialRecord, TokenManager};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long to wait for the browser to return.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

const RECEIVED_PAGE: &str = "<html><body><h3>Authorization received.</h3>\
<p>You can close this window and return to the terminal.</p></body></html>";

const DENIED_PAGE: &str = "<html><body><h3>Authorization was not granted.</h3>\
<p>Return to the terminal for details.</p></body></html>";

/// Socket address and path the redirect URI points at.
pub fn callback_target(redirect_uri: &str) -> Result<(String, String)> {
    let url = url::Url::parse(redirect_uri)
        .with_context(|| format!("invalid redirect_uri: {redirect_uri}"))?;
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("redirect_uri has no host: {redirect_uri}"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow!("redirect_uri has no port: {redirect_uri}"))?;
    Ok((format!("{host}:{port}"), url.path().to_string()))
}

/// Bind the callback listener for `redirect_uri`. Returns the listener and
/// the path the callback arrives on.
pub async fn bind_callback(redirect_uri: &str) -> Result<(TcpListener, String)> {
    let (addr, path) = callback_target(redirect_uri)?;
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind callback listener on {addr}"))?;
    Ok((listener, path))
}

/// Run one login round trip.
///
/// `on_url` receives the authorization URL once the listener is ready.
pub async fn login(
    manager: &TokenManager,
    listener: TcpListener,
    path: &str,
    timeout: Duration,
    on_url: impl FnOnce(&str),
) -> Result<CredentialRecord> {
    if manager.settings().client_id.trim().is_empty() {
        bail!("client_id is not configured; set [dotloop].client_id or DOTLOOP_CLIENT_ID");
    }

    let pending = manager.begin_authorization();
    on_url(pending.url());

    let callback = wait_for_callback(listener, path, timeout).await?;
    let record = manager
        .complete_authorization(&pending, &callback)
        .await
        .context("authorization failed")?;
    info!(
        has_refresh_token = record.has_refresh_token(),
        "login complete"
    );
    Ok(record)
}

/// Serve `path` on `listener` until the first callback arrives or `timeout` elapses.
pub async fn wait_for_callback(
    listener: TcpListener,
    path: &str,
    timeout: Duration,
) -> Result<CallbackParams> {
    let (tx, mut rx) = mpsc::channel::<CallbackParams>(1);
    let app = Router::new()
        .route(path, get(callback_handler))
        .with_state(tx);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let local_addr = listener.local_addr().ok();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });
    debug!(addr = ?local_addr, path, "waiting for authorization callback");

    let received = tokio::time::timeout(timeout, rx.recv()).await;
    let _ = shutdown_tx.send(());
    if let Err(e) = server.await {
        warn!(error = %e, "callback listener task failed");
    }

    match received {
        Ok(Some(callback)) => Ok(callback),
        Ok(None) => bail!("callback listener stopped before a callback arrived"),
        Err(_) => bail!(
            "timed out after {}s waiting for the authorization callback",
            timeout.as_secs()
        ),
    }
}

async fn callback_handler(
    State(tx): State<mpsc::Sender<CallbackParams>>,
    RawQuery(query): RawQuery,
) -> Html<&'static str> {
    let callback = CallbackParams::from_query(query.as_deref().unwrap_or(""));
    let page = if callback.error.is_some() {
        DENIED_PAGE
    } else {
        RECEIVED_PAGE
    };
    // Only the first callback counts.
    let _ = tx.try_send(callback);
    Html(page)
}
