//! # gitwiki-core
//!
//! Core library for gitwiki, a git-backed Markdown document store.
//!
//! This crate wraps the content repository behind a serialized VCS gateway,
//! renders documents, publishes the whole site atomically, builds the
//! compact search index and coordinates edit transactions.

pub mod builder;
pub mod config;
pub mod directory;
pub mod documents;
pub mod edit;
pub mod error;
pub mod layout;
pub mod markdown;
pub mod page;
pub mod paths;
pub mod search;
pub mod service;
pub mod text;
pub mod vcs;

pub use builder::{BuildError, StaticBuilder};
pub use config::Config;
pub use documents::{DocumentStore, Page, StoreError};
pub use error::{ErrorKind, SiteError};
pub use markdown::{Heading, MarkdownRenderer, RenderResult, Renderer};
pub use page::{PageData, PageKind, PageTemplates, TemplateError};
pub use paths::PathError;
pub use search::{build_search_index, SearchCatalog};
pub use service::{CanonicalTarget, SiteService};
pub use vcs::{CallContext, Commit, GitRepository, VcsError, VcsGateway};
