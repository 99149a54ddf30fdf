//! CLI command implementations.

pub mod api;
pub mod build;
pub mod pages;
pub mod serve;
pub mod sync;
pub mod webhook;

pub use build::build_site;
pub use serve::serve;
