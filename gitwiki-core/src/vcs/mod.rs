//! Version-control gateway.
//!
//! Every operation the site needs from its content repository goes through
//! [`VcsGateway`]. Implementations serialize their commands behind one lock so
//! the external tool never sees overlapping invocations, and each call takes a
//! [`CallContext`] whose deadline can shorten (never extend) the configured
//! default timeout.

pub mod classify;
pub mod git;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

pub use git::GitRepository;

#[derive(Error, Debug)]
pub enum VcsError {
    /// The upstream branch holds commits the local clone has not incorporated.
    #[error("remote contains newer commits: {0}")]
    RemoteAhead(String),

    #[error("git {command}: {output}")]
    Command { command: String, output: String },

    #[error("git {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("git i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("no changes to commit")]
    NoChanges,

    #[error("unexpected git output: {0}")]
    Parse(String),
}

impl VcsError {
    pub fn is_remote_ahead(&self) -> bool {
        matches!(self, VcsError::RemoteAhead(_))
    }
}

/// Cancellation scope for a single gateway call.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
}

impl CallContext {
    /// No caller deadline; the gateway's default timeout applies.
    pub fn background() -> Self {
        Self { deadline: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time budget for the next command: the default, capped by whatever
    /// remains until the caller's deadline.
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => default.min(deadline.saturating_duration_since(Instant::now())),
            None => default,
        }
    }
}

/// Log metadata for a single commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub hash: String,
    pub author: String,
    pub email: String,
    pub message: String,
    pub committed_at: DateTime<Utc>,
}

/// Narrow interface over the content repository.
#[async_trait]
pub trait VcsGateway: Send + Sync {
    /// Root of the working tree.
    fn work_dir(&self) -> &Path;

    /// Whether a remote is configured; local-only trees never pull or push.
    fn has_remote(&self) -> bool;

    /// Integrate remote commits. Returns whether HEAD moved.
    async fn pull(&self, ctx: &CallContext) -> Result<bool, VcsError>;

    /// Publish local commits. A non-fast-forward rejection is reported as
    /// [`VcsError::RemoteAhead`].
    async fn push(&self, ctx: &CallContext) -> Result<(), VcsError>;

    /// Fetch quietly and report whether the upstream has commits not present
    /// locally. A missing upstream counts as "not ahead".
    async fn fetch_and_is_remote_ahead(&self, ctx: &CallContext) -> Result<bool, VcsError>;

    /// Paginated history for a path (empty path = whole repository).
    async fn log(
        &self,
        ctx: &CallContext,
        path: &str,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Commit>, bool), VcsError>;

    async fn diff(
        &self,
        ctx: &CallContext,
        path: &str,
        from: &str,
        to: &str,
    ) -> Result<String, VcsError>;

    /// Stage `paths` (everything when empty) and commit them.
    async fn commit(
        &self,
        ctx: &CallContext,
        paths: &[String],
        message: &str,
        author: &str,
    ) -> Result<(), VcsError>;

    async fn rename(&self, ctx: &CallContext, old: &str, new: &str) -> Result<(), VcsError>;

    /// Move HEAD to `target` keeping index and working tree intact.
    async fn soft_reset(&self, ctx: &CallContext, target: &str) -> Result<(), VcsError>;

    /// Current HEAD hash, `None` for a repository without commits.
    async fn head(&self, ctx: &CallContext) -> Result<Option<String>, VcsError>;

    /// Every tracked file, slash-separated and relative to the work dir.
    async fn list_tracked(&self, ctx: &CallContext) -> Result<Vec<String>, VcsError>;
}
