//! # gitwiki-render
//!
//! HTML page templates for gitwiki.
//!
//! Pages are rendered with Askama from the [`PageData`] view model built by
//! `gitwiki-core`. The default stylesheet and scripts are embedded in the
//! binary and written to `assets/` on every build.
//!
//! [`PageData`]: gitwiki_core::PageData

pub mod templates;

pub use templates::{render_directory_html, PageTemplate, SiteTemplates};
