//! Background synchronization: the periodic pull loop and the
//! remote-notification poller.

use super::serve::wait_for_shutdown;
use anyhow::{Context, Result};
use gitwiki_core::{CallContext, Config, SiteService};
use reqwest::header::AUTHORIZATION;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

async fn pull_once(service: &SiteService) {
    match service.pull(&CallContext::background()).await {
        Ok(true) => tracing::info!("pulled remote changes and rebuilt the site"),
        Ok(false) => tracing::debug!("no remote changes"),
        Err(err) => tracing::warn!(error = %err, "scheduled pull failed"),
    }
}

/// Pull every `every` until shutdown. The first pull waits one full
/// interval since `serve` has just built the site.
pub async fn pull_loop(
    service: Arc<SiteService>,
    every: Duration,
    shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = wait_for_shutdown(shutdown.clone()) => break,
            _ = ticker.tick() => pull_once(&service).await,
        }
    }
    tracing::debug!("pull loop stopped");
}

/// Asks the notification service to call our webhook when the remote
/// repository changes.
pub struct Poller {
    client: reqwest::Client,
    endpoint: String,
    callback_url: String,
    repository: Option<String>,
    secret: String,
}

impl Poller {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(POLL_REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        let polling = &config.webhook.polling;
        Ok(Self {
            client,
            endpoint: polling.endpoint.trim().to_string(),
            callback_url: polling.callback_url.trim().to_string(),
            repository: config.repository_path(),
            secret: config.webhook.secret.clone(),
        })
    }

    pub fn payload(&self) -> serde_json::Value {
        json!({
            "webhook": self.callback_url,
            "repos": self.repository.iter().collect::<Vec<_>>(),
            "ping": true,
        })
    }

    pub async fn notify(&self) -> Result<()> {
        let mut request = self.client.post(&self.endpoint).json(&self.payload());
        if !self.secret.is_empty() {
            request = request.header(AUTHORIZATION, &self.secret);
        }
        request
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.endpoint))?
            .error_for_status()
            .context("Notification service rejected the request")?;
        Ok(())
    }
}

/// Notify, then pull; immediately and then every `every` until shutdown.
pub async fn poll_loop(
    poller: Poller,
    service: Arc<SiteService>,
    every: Duration,
    shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = wait_for_shutdown(shutdown.clone()) => break,
            _ = ticker.tick() => {
                match poller.notify().await {
                    Ok(()) => tracing::debug!(endpoint = %poller.endpoint, "poll notification sent"),
                    Err(err) => tracing::warn!(error = ?err, "poll notification failed"),
                }
                pull_once(&service).await;
            }
        }
    }
    tracing::debug!("poller stopped");
}
