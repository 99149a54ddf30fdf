//! Save and rename transactions.
//!
//! Each edit runs under the write lock as one sequence: freshness check,
//! mutation, commit, rebuild, then push. When the remote moves underneath
//! the transaction the local commit is soft-reset away and the caller is
//! told to retry.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, instrument, warn};

use crate::builder::StaticBuilder;
use crate::config::Config;
use crate::documents::DocumentStore;
use crate::error::SiteError;
use crate::paths::{ensure_home_doc, is_reserved_path, normalize_rel_path, route_from_path, PathError};
use crate::vcs::{CallContext, VcsGateway};

/// Ref used for rollback when the tree had no commit before the edit.
const PREVIOUS_HEAD: &str = "HEAD@{1}";

/// Rejects private routes when documents are served live.
pub(crate) fn ensure_route_accessible(
    config: &Config,
    home_doc: &str,
    rel: &str,
) -> Result<(), PathError> {
    if !config.live {
        return Ok(());
    }
    let route = route_from_path(rel, home_doc);
    if config.is_path_private(&route) {
        return Err(PathError::ForbiddenRoute(route));
    }
    Ok(())
}

pub struct EditCoordinator {
    config: Arc<Config>,
    home_doc: String,
    vcs: Arc<dyn VcsGateway>,
    documents: Arc<DocumentStore>,
    builder: Arc<StaticBuilder>,
    write_lock: Mutex<()>,
}

impl EditCoordinator {
    pub fn new(
        config: Arc<Config>,
        vcs: Arc<dyn VcsGateway>,
        documents: Arc<DocumentStore>,
        builder: Arc<StaticBuilder>,
    ) -> Self {
        Self {
            home_doc: ensure_home_doc(&config.home_doc),
            config,
            vcs,
            documents,
            builder,
            write_lock: Mutex::new(()),
        }
    }

    /// Acquire the write lock. Background pulls hold it too so they never
    /// interleave with an edit.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Write `content` to `path`, commit it and republish the site.
    #[instrument(skip(self, ctx, content, message), fields(path = %path))]
    pub async fn save_page(
        &self,
        ctx: &CallContext,
        path: &str,
        content: &[u8],
        message: &str,
        remote_addr: &str,
    ) -> Result<(), SiteError> {
        if !self.config.editable {
            return Err(SiteError::EditingDisabled);
        }
        let _guard = self.lock().await;
        self.ensure_fresh(ctx).await?;

        let rel = normalize_rel_path(path, &self.home_doc)?;
        ensure_route_accessible(&self.config, &self.home_doc, &rel)?;
        if !self.documents.exists(&rel).await? && is_reserved_path(&rel) {
            return Err(PathError::ReservedPath(rel).into());
        }
        let message = self.compose_message(message, remote_addr)?;

        let pre_head = self.vcs.head(ctx).await?;
        self.documents.write(&rel, content).await?;
        self.documents
            .commit(ctx, &[rel.clone()], &message, self.author())
            .await?;
        self.builder.build(ctx).await?;
        self.publish(ctx, pre_head).await?;

        info!(path = %rel, "page saved");
        Ok(())
    }

    /// Move a document to a new path, commit and republish.
    #[instrument(skip(self, ctx), fields(old = %old_path, new = %new_path))]
    pub async fn rename_page(
        &self,
        ctx: &CallContext,
        old_path: &str,
        new_path: &str,
        remote_addr: &str,
    ) -> Result<(), SiteError> {
        if !self.config.editable {
            return Err(SiteError::EditingDisabled);
        }
        if new_path.trim().is_empty() {
            return Err(SiteError::Validation("new path required".to_string()));
        }
        let _guard = self.lock().await;
        self.ensure_fresh(ctx).await?;

        let old_rel = normalize_rel_path(old_path, &self.home_doc)?;
        let new_rel = normalize_rel_path(new_path, &self.home_doc)?;
        ensure_route_accessible(&self.config, &self.home_doc, &old_rel)?;
        ensure_route_accessible(&self.config, &self.home_doc, &new_rel)?;
        if old_rel == new_rel {
            return Err(SiteError::Validation(
                "destination path must differ from the current path".to_string(),
            ));
        }
        if is_reserved_path(&new_rel) {
            return Err(PathError::ReservedPath(new_rel).into());
        }
        if !self.documents.exists(&old_rel).await? {
            return Err(SiteError::NotFound(old_rel));
        }
        if self.documents.exists(&new_rel).await? {
            return Err(SiteError::Validation(format!(
                "destination already exists: {}",
                new_rel
            )));
        }

        let message = format!(
            "Rename page: `{}` to `{}`",
            self.display_name(&old_rel),
            self.display_name(&new_rel)
        );
        let message = self.compose_message(&message, remote_addr)?;

        let pre_head = self.vcs.head(ctx).await?;
        self.documents.rename(ctx, &old_rel, &new_rel).await?;
        self.documents
            .commit(ctx, &[new_rel.clone()], &message, self.author())
            .await?;
        self.builder.build(ctx).await?;
        self.publish(ctx, pre_head).await?;

        info!(old = %old_rel, new = %new_rel, "page renamed");
        Ok(())
    }

    async fn ensure_fresh(&self, ctx: &CallContext) -> Result<(), SiteError> {
        if self.vcs.fetch_and_is_remote_ahead(ctx).await? {
            return Err(SiteError::RepositoryBehind);
        }
        Ok(())
    }

    /// Push the local commit, undoing it if the remote moved in the meantime.
    async fn publish(&self, ctx: &CallContext, pre_head: Option<String>) -> Result<(), SiteError> {
        if !self.vcs.has_remote() {
            return Ok(());
        }
        if self.vcs.fetch_and_is_remote_ahead(ctx).await? {
            return self.rollback(ctx, pre_head).await;
        }
        match self.vcs.push(ctx).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_remote_ahead() => self.rollback(ctx, pre_head).await,
            Err(err) => Err(err.into()),
        }
    }

    async fn rollback(&self, ctx: &CallContext, pre_head: Option<String>) -> Result<(), SiteError> {
        let target = pre_head.unwrap_or_else(|| PREVIOUS_HEAD.to_string());
        warn!(target = %target, "remote advanced during edit, rolling back local commit");
        match self.vcs.soft_reset(ctx, &target).await {
            Ok(()) => Err(SiteError::RepositoryBehind),
            Err(source) => Err(SiteError::RollbackFailed { source }),
        }
    }

    fn author(&self) -> &str {
        &self.config.git.author
    }

    fn compose_message(&self, message: &str, remote_addr: &str) -> Result<String, SiteError> {
        compose_commit_message(
            &self.config.git.commit_message_prefix,
            &self.config.git.commit_message_append_remote_addr,
            message,
            remote_addr,
        )
    }

    fn display_name(&self, rel: &str) -> String {
        display_name(rel, &self.home_doc)
    }
}

/// Prefix + trimmed message, then the optional client-address suffix.
/// A template containing `%s` gets the address substituted; anything else is
/// followed by the address.
pub fn compose_commit_message(
    prefix: &str,
    remote_template: &str,
    message: &str,
    remote_addr: &str,
) -> Result<String, SiteError> {
    let message = message.trim();
    if message.is_empty() {
        return Err(SiteError::Validation("commit message required".to_string()));
    }
    let mut composed = format!("{}{}", prefix, message);

    let remote_addr = remote_addr.trim();
    if !remote_template.is_empty() && !remote_addr.is_empty() {
        if remote_template.contains("%s") {
            composed.push_str(&remote_template.replace("%s", remote_addr));
        } else {
            composed.push_str(remote_template);
            composed.push_str(remote_addr);
        }
    }
    Ok(composed)
}

/// Document path without its extension; the home document when empty.
fn display_name(rel: &str, home_doc: &str) -> String {
    let strip = |path: &str| -> String {
        let path = path.trim().trim_matches('/');
        match path.rfind('.') {
            Some(dot) if !path[dot..].contains('/') => path[..dot].to_string(),
            _ => path.to_string(),
        }
    };
    let name = strip(rel);
    if !name.is_empty() {
        return name;
    }
    let home = strip(home_doc);
    if home.is_empty() {
        "Home".to_string()
    } else {
        home
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_message_requires_text() {
        let err = compose_commit_message("", "", "   ", "").unwrap_err();
        assert!(matches!(err, SiteError::Validation(ref m) if m == "commit message required"));
    }

    #[test]
    fn test_commit_message_prefix_and_template() {
        assert_eq!(
            compose_commit_message("[wiki] ", " (from %s)", " Fix typo ", "10.0.0.7").unwrap(),
            "[wiki] Fix typo (from 10.0.0.7)"
        );
        assert_eq!(
            compose_commit_message("", " via ", "Update", "10.0.0.7").unwrap(),
            "Update via 10.0.0.7"
        );
    }

    #[test]
    fn test_commit_message_skips_suffix_without_address() {
        assert_eq!(
            compose_commit_message("", " (from %s)", "Update", "").unwrap(),
            "Update"
        );
        assert_eq!(
            compose_commit_message("", "", "Update", "10.0.0.7").unwrap(),
            "Update"
        );
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("guides/setup.md", "Home.md"), "guides/setup");
        assert_eq!(display_name("v1.2/notes", "Home.md"), "v1.2/notes");
        assert_eq!(display_name("", "Start.md"), "Start");
        assert_eq!(display_name("", ""), "Home");
    }

    #[test]
    fn test_private_routes_only_enforced_live() {
        let mut config = Config::from_yaml("private_paths: [ops]").unwrap();
        assert!(ensure_route_accessible(&config, "Home.md", "ops/keys.md").is_ok());

        config.live = true;
        assert_eq!(
            ensure_route_accessible(&config, "Home.md", "ops/keys.md"),
            Err(PathError::ForbiddenRoute("/ops/keys/".to_string()))
        );
        assert!(ensure_route_accessible(&config, "Home.md", "operations.md").is_ok());
    }
}
