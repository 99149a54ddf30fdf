//! Static build command.

use anyhow::{Context, Result};
use gitwiki_core::{CallContext, Config, SiteService};
use gitwiki_render::SiteTemplates;
use std::sync::Arc;
use std::time::Instant;

/// Open the working tree and publish a fresh snapshot.
pub async fn build_site(config: Config) -> Result<()> {
    let started = Instant::now();
    let service = open_service(config).await?;

    service
        .build_static(&CallContext::background())
        .await
        .context("Failed to build site")?;

    tracing::info!(
        output = %service.output_dir().display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "site built"
    );
    println!("Site built in {}", service.output_dir().display());
    Ok(())
}

pub async fn open_service(config: Config) -> Result<SiteService> {
    let repo = config.repo_dir();
    SiteService::open(config, Arc::new(SiteTemplates::new()))
        .await
        .with_context(|| format!("Failed to open repository at {}", repo.display()))
}
