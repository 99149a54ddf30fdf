//! Document store: file access inside the working tree plus per-document
//! rendering.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::markdown::{Heading, RenderError, RenderResult, Renderer};
use crate::paths::{ensure_home_doc, html_path_from, route_from_path};
use crate::text::{derive_title, summarize};
use crate::vcs::{CallContext, Commit, VcsError, VcsGateway};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("render {path}: {source}")]
    Render {
        path: String,
        #[source]
        source: RenderError,
    },

    #[error(transparent)]
    Vcs(#[from] VcsError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Read { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// A rendered document ready for publication.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub source: String,
    pub route: String,
    pub output_path: String,
    pub title: String,
    pub html: String,
    pub sections: Vec<Heading>,
    pub summary: String,
    pub plain_text: String,
    pub last_hash: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

pub struct DocumentStore {
    vcs: Arc<dyn VcsGateway>,
    renderer: Arc<dyn Renderer>,
    home_doc: String,
}

impl DocumentStore {
    pub fn new(vcs: Arc<dyn VcsGateway>, renderer: Arc<dyn Renderer>, home_doc: &str) -> Self {
        Self {
            vcs,
            renderer,
            home_doc: ensure_home_doc(home_doc),
        }
    }

    pub fn home_doc(&self) -> &str {
        &self.home_doc
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.vcs.work_dir().to_path_buf()
    }

    pub fn renderer(&self) -> &Arc<dyn Renderer> {
        &self.renderer
    }

    pub fn vcs(&self) -> &Arc<dyn VcsGateway> {
        &self.vcs
    }

    fn full_path(&self, rel: &str) -> PathBuf {
        let mut full = self.vcs.work_dir().to_path_buf();
        full.extend(rel.split('/').filter(|s| !s.is_empty()));
        full
    }

    /// Tracked files in lexical order.
    pub async fn list_tracked(&self, ctx: &CallContext) -> Result<Vec<String>, StoreError> {
        let mut files = self.vcs.list_tracked(ctx).await?;
        files.sort();
        Ok(files)
    }

    pub async fn read(&self, rel: &str) -> Result<Vec<u8>, StoreError> {
        tokio::fs::read(self.full_path(rel))
            .await
            .map_err(|source| StoreError::Read {
                path: rel.to_string(),
                source,
            })
    }

    /// Write `content` to `rel`, creating parent directories.
    pub async fn write(&self, rel: &str, content: &[u8]) -> Result<(), StoreError> {
        let full = self.full_path(rel);
        let write_err = |source| StoreError::Write {
            path: rel.to_string(),
            source,
        };
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        tokio::fs::write(&full, content).await.map_err(write_err)
    }

    /// Whether `rel` names an existing regular file.
    pub async fn exists(&self, rel: &str) -> Result<bool, StoreError> {
        match tokio::fs::metadata(self.full_path(rel)).await {
            Ok(meta) => Ok(!meta.is_dir()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Read {
                path: rel.to_string(),
                source,
            }),
        }
    }

    pub fn render_source(&self, rel: &str, source: &[u8]) -> Result<RenderResult, StoreError> {
        self.renderer
            .render(source)
            .map_err(|source| StoreError::Render {
                path: rel.to_string(),
                source,
            })
    }

    /// Render a tracked document and attach its route, title and last commit.
    pub async fn render_document(&self, ctx: &CallContext, rel: &str) -> Result<Page, StoreError> {
        let data = self.read(rel).await?;
        let rendered = self.render_source(rel, &data)?;

        let mut page = Page {
            source: rel.to_string(),
            route: route_from_path(rel, &self.home_doc),
            output_path: html_path_from(rel, &self.home_doc),
            title: derive_title(rel),
            html: rendered.html,
            sections: rendered.headings,
            summary: summarize(&rendered.plain_text),
            plain_text: rendered.plain_text,
            last_hash: None,
            last_modified: None,
        };

        match self.vcs.log(ctx, rel, 0, 1).await {
            Ok((commits, _)) => {
                if let Some(commit) = commits.into_iter().next() {
                    page.last_hash = Some(commit.hash);
                    page.last_modified = Some(commit.committed_at);
                }
            }
            Err(err) => debug!(path = %rel, error = %err, "no commit metadata for document"),
        }
        Ok(page)
    }

    /// Render a layout fragment; a missing file yields `None`.
    pub async fn render_fragment(&self, name: &str) -> Result<Option<RenderResult>, StoreError> {
        match self.read(name).await {
            Ok(data) => self.render_source(name, &data).map(Some),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Move a tracked document, creating the destination directory.
    pub async fn rename(&self, ctx: &CallContext, old: &str, new: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.full_path(new).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Write {
                    path: new.to_string(),
                    source,
                })?;
        }
        self.vcs.rename(ctx, old, new).await?;
        Ok(())
    }

    pub async fn commit(
        &self,
        ctx: &CallContext,
        paths: &[String],
        message: &str,
        author: &str,
    ) -> Result<(), StoreError> {
        self.vcs.commit(ctx, paths, message, author).await?;
        Ok(())
    }

    pub async fn history(
        &self,
        ctx: &CallContext,
        rel: &str,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Commit>, bool), StoreError> {
        Ok(self.vcs.log(ctx, rel, page, page_size).await?)
    }

    pub async fn diff(
        &self,
        ctx: &CallContext,
        rel: &str,
        from: &str,
        to: &str,
    ) -> Result<String, StoreError> {
        Ok(self.vcs.diff(ctx, rel, from, to).await?)
    }
}
