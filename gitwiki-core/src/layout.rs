//! Cached header/footer/sidebar fragments shared by every rendered page.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::documents::{DocumentStore, StoreError};
use crate::paths::{FOOTER_FRAGMENT, HEADER_FRAGMENT, SIDEBAR_FRAGMENT};

#[derive(Debug, Clone, Default)]
pub struct LayoutSnapshot {
    pub header: String,
    pub footer: String,
    pub server_footer: String,
    pub sidebar: String,
    pub loaded_at: Option<DateTime<Utc>>,
}

/// Which fragments participate in the layout.
#[derive(Debug, Clone, Default)]
pub struct LayoutOptions {
    pub ignore_header: bool,
    pub ignore_footer: bool,
    /// Inline Markdown appended below the repository footer.
    pub server_footer: String,
}

/// Readers always see a complete snapshot; refresh swaps in a new one.
#[derive(Debug, Default)]
pub struct LayoutCache {
    current: RwLock<Arc<LayoutSnapshot>>,
}

impl LayoutCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<LayoutSnapshot> {
        self.current.read().clone()
    }

    pub fn replace(&self, snapshot: LayoutSnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }

    /// Re-render all fragments from the working tree. On error the previous
    /// snapshot stays in place.
    pub async fn refresh(
        &self,
        documents: &DocumentStore,
        options: &LayoutOptions,
    ) -> Result<(), StoreError> {
        let mut snapshot = LayoutSnapshot::default();

        if !options.ignore_header {
            snapshot.header = fragment_html(documents, HEADER_FRAGMENT).await?;
        }
        if !options.ignore_footer {
            snapshot.footer = fragment_html(documents, FOOTER_FRAGMENT).await?;
        }
        snapshot.sidebar = fragment_html(documents, SIDEBAR_FRAGMENT).await?;

        let server_footer = options.server_footer.trim();
        if !server_footer.is_empty() {
            snapshot.server_footer = documents
                .render_source("server_footer", server_footer.as_bytes())?
                .html;
        }

        snapshot.loaded_at = Some(Utc::now());
        debug!(
            header = !snapshot.header.is_empty(),
            footer = !snapshot.footer.is_empty(),
            sidebar = !snapshot.sidebar.is_empty(),
            "layout refreshed"
        );
        self.replace(snapshot);
        Ok(())
    }
}

async fn fragment_html(documents: &DocumentStore, name: &str) -> Result<String, StoreError> {
    Ok(documents
        .render_fragment(name)
        .await?
        .map(|fragment| fragment.html)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_swap_keeps_old_readers_intact() {
        let cache = LayoutCache::new();
        let before = cache.snapshot();
        assert!(before.header.is_empty());

        cache.replace(LayoutSnapshot {
            header: "<p>Header</p>".to_string(),
            ..Default::default()
        });

        assert!(before.header.is_empty());
        assert_eq!(cache.snapshot().header, "<p>Header</p>");
    }
}
