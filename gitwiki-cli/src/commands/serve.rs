//! `gitwiki serve`: the site server plus its background tasks.

use super::build::open_service;
use super::{api, pages, sync, webhook};
use anyhow::{Context, Result};
use axum::{
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use gitwiki_core::{CallContext, Config, SiteService};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SiteService>,
    trusted_proxies: Arc<Vec<IpAddr>>,
}

impl AppState {
    pub fn new(service: Arc<SiteService>) -> Self {
        let trusted_proxies = parse_trusted_proxies(&service.config().trusted_proxies);
        Self {
            service,
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }

    /// Address recorded in commit messages for a request.
    pub fn client_addr(&self, peer: SocketAddr, headers: &HeaderMap) -> String {
        resolve_client_addr(peer.ip(), headers, &self.trusted_proxies).to_string()
    }
}

fn parse_trusted_proxies(raw: &[String]) -> Vec<IpAddr> {
    raw.iter()
        .filter_map(|entry| match entry.trim().parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!(entry = %entry, "ignoring invalid trusted proxy address");
                None
            }
        })
        .collect()
}

/// The peer itself unless it is a trusted proxy; then the right-most
/// `X-Forwarded-For` hop that is not trusted.
pub fn resolve_client_addr(peer: IpAddr, headers: &HeaderMap, trusted: &[IpAddr]) -> IpAddr {
    if !trusted.contains(&peer) {
        return peer;
    }
    let hops: Vec<IpAddr> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|hop| hop.trim().parse().ok())
        .collect();
    hops.iter()
        .rev()
        .find(|hop| !trusted.contains(hop))
        .or_else(|| hops.first())
        .copied()
        .unwrap_or(peer)
}

/// Site routes. API routes live under the configured base URL; every other
/// request falls through to the page handler.
pub fn router(state: AppState) -> Router {
    let site = Router::new()
        .route("/api/history", get(api::api_history))
        .route("/api/diff", get(api::api_diff))
        .route("/api/document", get(api::api_document))
        .route("/api/save", post(api::api_save))
        .route("/api/rename", post(api::api_rename))
        .route("/api/preview", post(api::api_preview))
        .route("/search-index.json", get(api::search_index));

    let base_url = state.service.config().normalized_base_url();
    let base = base_url.trim_end_matches('/');
    let app = if base.is_empty() {
        site
    } else {
        Router::new().nest(base, site)
    };

    app.fallback(pages::serve_page)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

pub async fn serve(config: Config, listen: Option<String>) -> Result<()> {
    let listen = listen.unwrap_or_else(|| config.listen.clone());
    let webhook_config = config.webhook.clone();
    let pull_interval = config.pull_interval();
    let poller = match config.poll_interval() {
        Some(every) => Some((sync::Poller::new(&config)?, every)),
        None => None,
    };

    let service = Arc::new(open_service(config).await?);

    if let Err(err) = service.build_static(&CallContext::background()).await {
        tracing::warn!(error = %err, "initial build failed; serving the previous snapshot");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    if let Some(every) = pull_interval {
        tasks.push(tokio::spawn(sync::pull_loop(
            service.clone(),
            every,
            shutdown_rx.clone(),
        )));
    }

    if webhook_config.enabled {
        let listener = TcpListener::bind(&webhook_config.listen)
            .await
            .with_context(|| format!("Failed to bind webhook listener to {}", webhook_config.listen))?;
        tracing::info!(addr = %webhook_config.listen, "webhook listener started");
        tasks.push(tokio::spawn(webhook::serve_webhook(
            listener,
            service.clone(),
            webhook_config.secret.clone(),
            shutdown_rx.clone(),
        )));
    }

    if let Some((poller, every)) = poller {
        tasks.push(tokio::spawn(sync::poll_loop(
            poller,
            service.clone(),
            every,
            shutdown_rx.clone(),
        )));
    }

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind to {}", listen))?;
    tracing::info!(addr = %listen, "serving site");
    println!("Serving at http://{}", listen);

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutting down");
        let _ = shutdown_tx.send(true);
    });

    let app = router(AppState::new(service));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
    .await
    .context("Server error")?;

    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

/// Resolves once shutdown has been requested or the sender is gone.
pub async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
