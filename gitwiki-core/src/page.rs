//! View model handed to the page templates.

use std::io;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::directory::{build_breadcrumbs, Breadcrumb, DirectoryEntry};
use crate::documents::Page;
use crate::layout::LayoutSnapshot;
use crate::markdown::Heading;
use crate::paths::{
    ensure_home_doc, sanitize_route, with_base, DIRECTORY_ROUTE, DIRECTORY_TITLE,
    SEARCH_INDEX_OUTPUT,
};
use crate::text::derive_title;

const META_DESCRIPTION_CHARS: usize = 160;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template rendering failed: {0}")]
    Render(String),

    #[error("failed to write theme assets: {0}")]
    Io(#[from] io::Error),
}

/// Renders page data into complete HTML documents and ships the theme's
/// static assets.
pub trait PageTemplates: Send + Sync {
    fn render_page(&self, data: &PageData) -> Result<String, TemplateError>;

    /// Write the theme assets into `dest`, creating it if needed.
    fn write_assets(&self, dest: &Path) -> Result<(), TemplateError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    Document,
    Directory,
    NotFound,
    Forbidden,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PageButtons {
    pub history: bool,
    pub rename: bool,
    pub edit: bool,
    pub new: bool,
}

impl PageButtons {
    fn all(enabled: bool) -> Self {
        Self {
            history: enabled,
            rename: enabled,
            edit: enabled,
            new: enabled,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PageMeta {
    pub description: String,
    pub og_type: String,
    pub og_site: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageData {
    pub kind: PageKind,
    pub title: String,
    /// `<title>` text: `"<title> - <site>"`.
    pub page_title: String,
    pub site_name: String,
    pub header_html: String,
    pub footer_html: String,
    pub server_footer_html: String,
    pub sidebar_html: String,
    pub content_html: String,
    pub sections: Vec<Heading>,
    pub active_path: String,
    pub requested_path: String,
    pub editable: bool,
    pub buttons: PageButtons,
    pub search_index_url: String,
    pub live: bool,
    pub base_url: String,
    pub breadcrumbs: Vec<Breadcrumb>,
    pub last_updated_iso: String,
    pub last_updated: String,
    pub last_commit_hash: String,
    pub last_commit_short: String,
    pub directory: Vec<DirectoryEntry>,
    pub meta: PageMeta,
}

/// Site-wide settings that shape every page.
#[derive(Debug, Clone)]
pub struct SiteContext {
    pub site_name: String,
    pub base_url: String,
    pub editable: bool,
    pub live: bool,
}

impl SiteContext {
    pub fn new(site_name: &str, home_doc: &str, base_url: &str, editable: bool, live: bool) -> Self {
        Self {
            site_name: resolve_site_name(site_name, home_doc),
            base_url: base_url.to_string(),
            editable,
            live,
        }
    }

    pub fn page_title(&self, title: &str) -> String {
        let title = title.trim();
        if title.is_empty() {
            self.site_name.clone()
        } else {
            format!("{} - {}", title, self.site_name)
        }
    }

    pub fn search_index_url(&self) -> String {
        with_base(&self.base_url, &format!("/{}", SEARCH_INDEX_OUTPUT))
    }

    fn meta(&self, summary: &str, fallback: &str, og_type: &str) -> PageMeta {
        let mut description = meta_description(summary, fallback);
        if description.is_empty() {
            description = self.site_name.clone();
        }
        PageMeta {
            description,
            og_type: og_type.to_string(),
            og_site: self.site_name.clone(),
        }
    }

    fn base(&self, kind: PageKind, title: &str, layout: &LayoutSnapshot) -> PageData {
        PageData {
            kind,
            title: title.to_string(),
            page_title: self.page_title(title),
            site_name: self.site_name.clone(),
            header_html: layout.header.clone(),
            footer_html: layout.footer.clone(),
            server_footer_html: layout.server_footer.clone(),
            sidebar_html: layout.sidebar.clone(),
            content_html: String::new(),
            sections: Vec::new(),
            active_path: String::new(),
            requested_path: String::new(),
            editable: false,
            buttons: PageButtons::default(),
            search_index_url: self.search_index_url(),
            live: self.live,
            base_url: self.base_url.clone(),
            breadcrumbs: Vec::new(),
            last_updated_iso: String::new(),
            last_updated: String::new(),
            last_commit_hash: String::new(),
            last_commit_short: String::new(),
            directory: Vec::new(),
            meta: PageMeta::default(),
        }
    }

    pub fn document_page(&self, page: &Page, layout: &LayoutSnapshot) -> PageData {
        let mut data = self.base(PageKind::Document, &page.title, layout);
        data.content_html = page.html.clone();
        data.sections = page.sections.clone();
        data.active_path = page.route.clone();
        data.requested_path = page.route.clone();
        data.editable = self.editable;
        data.buttons = PageButtons::all(self.editable);
        data.breadcrumbs = build_breadcrumbs(&page.route, &page.title, &self.base_url);
        if let Some(modified) = page.last_modified {
            data.last_updated_iso = modified.to_rfc3339();
            data.last_updated = modified.format("%b %-d %H:%M:%S UTC %Y").to_string();
        }
        if let Some(hash) = &page.last_hash {
            data.last_commit_hash = hash.clone();
            data.last_commit_short = hash.chars().take(12).collect();
        }
        data.meta = self.meta(&page.summary, &page.title, "article");
        data
    }

    pub fn directory_page(&self, entries: Vec<DirectoryEntry>, layout: &LayoutSnapshot) -> PageData {
        let mut data = self.base(PageKind::Directory, DIRECTORY_TITLE, layout);
        data.active_path = DIRECTORY_ROUTE.to_string();
        data.requested_path = DIRECTORY_ROUTE.to_string();
        data.breadcrumbs = vec![Breadcrumb {
            title: DIRECTORY_TITLE.to_string(),
            path: String::new(),
            current: true,
        }];
        data.directory = entries;
        data.meta = self.meta(
            "Browse the complete documentation index.",
            DIRECTORY_TITLE,
            "website",
        );
        data
    }

    pub fn not_found_page(&self, requested: &str, layout: &LayoutSnapshot) -> PageData {
        let requested = sanitize_requested_path(requested);
        let description = if requested.is_empty() || requested == "/" {
            "The page you are looking for could not be found.".to_string()
        } else {
            format!("The requested path {} could not be found.", requested)
        };
        let mut data = self.base(PageKind::NotFound, "404 - Not found", layout);
        data.requested_path = requested;
        data.meta = self.meta(&description, &description, "website");
        data
    }

    pub fn forbidden_page(&self, requested: &str, layout: &LayoutSnapshot) -> PageData {
        let requested = sanitize_requested_path(requested);
        let description = if requested.is_empty() || requested == "/" {
            "Access to the requested resource is restricted.".to_string()
        } else {
            format!("Access to {} is restricted.", requested)
        };
        let mut data = self.base(PageKind::Forbidden, "403 - Forbidden", layout);
        data.requested_path = requested;
        data.meta = self.meta(&description, "403 - Forbidden", "website");
        data
    }
}

/// Configured site name, else the humanized home document name.
pub fn resolve_site_name(site_name: &str, home_doc: &str) -> String {
    let name = site_name.trim();
    if !name.is_empty() {
        return name.to_string();
    }
    derive_title(&ensure_home_doc(home_doc))
}

fn sanitize_requested_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        sanitize_route(trimmed)
    }
}

/// Whitespace-collapsed summary (or `fallback`), cut to a meta-tag length.
pub fn meta_description(summary: &str, fallback: &str) -> String {
    let source = if summary.trim().is_empty() {
        fallback
    } else {
        summary
    };
    let collapsed = source.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(META_DESCRIPTION_CHARS) {
        Some((cut, _)) => format!("{}...", collapsed[..cut].trim_end()),
        None => collapsed,
    }
}
