use thiserror::Error;

use crate::builder::BuildError;
use crate::documents::StoreError;
use crate::markdown::RenderError;
use crate::page::TemplateError;
use crate::paths::PathError;
use crate::vcs::VcsError;

/// Error returned by the site service.
#[derive(Error, Debug)]
pub enum SiteError {
    /// The remote holds commits not yet pulled; reload and retry.
    #[error("repository has newer remote revisions")]
    RepositoryBehind,

    /// The remote moved mid-transaction and undoing the local commit failed.
    #[error("repository has newer remote revisions; rollback failed: {source}")]
    RollbackFailed {
        #[source]
        source: VcsError,
    },

    #[error("editing disabled")]
    EditingDisabled,

    #[error("{0}")]
    Validation(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Coarse classification used by transports to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
}

impl SiteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SiteError::Validation(_)
            | SiteError::Path(PathError::InvalidPath(_))
            | SiteError::Path(PathError::ReservedPath(_))
            | SiteError::Vcs(VcsError::InvalidArgument(_))
            | SiteError::Vcs(VcsError::NoChanges) => ErrorKind::Validation,
            SiteError::EditingDisabled | SiteError::Path(PathError::ForbiddenRoute(_)) => {
                ErrorKind::Forbidden
            }
            SiteError::NotFound(_) => ErrorKind::NotFound,
            SiteError::RepositoryBehind | SiteError::RollbackFailed { .. } => ErrorKind::Conflict,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<StoreError> for SiteError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Read { path, source } if source.kind() == std::io::ErrorKind::NotFound => {
                SiteError::NotFound(path)
            }
            StoreError::Vcs(err) => SiteError::Vcs(err),
            other => SiteError::Store(other),
        }
    }
}
