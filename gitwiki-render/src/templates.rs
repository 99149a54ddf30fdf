//! Askama template definitions.

use std::fs;
use std::io;
use std::path::Path;

use askama::Template;
use include_dir::{include_dir, Dir, DirEntry};
use serde::Serialize;

use gitwiki_core::directory::{directory_href, DirectoryEntry};
use gitwiki_core::page::{PageData, PageKind, PageTemplates, TemplateError};
use gitwiki_core::paths::{with_base, ASSETS_DIR};
use gitwiki_core::text::html_escape;

/// Stylesheet and scripts shipped under `assets/` when no theme override is
/// configured.
static THEME_BUNDLE: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/theme");

/// Settings the theme scripts read from `window.GITWIKI`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientConfig<'a> {
    base_url: &'a str,
    search_index_url: &'a str,
    route: &'a str,
    kind: PageKind,
    editable: bool,
    live: bool,
}

/// Full page shell; the content block is chosen by `kind`.
#[derive(Template)]
#[template(path = "page.html")]
pub struct PageTemplate<'a> {
    pub page: &'a PageData,
    pub kind: &'static str,
    pub home_url: String,
    pub directory_url: String,
    pub assets_url: String,
    /// Pre-rendered tree for the directory page
    pub directory_html: String,
    /// JSON literal for `window.GITWIKI`
    pub client_config: String,
}

impl<'a> PageTemplate<'a> {
    pub fn new(page: &'a PageData) -> Result<Self, TemplateError> {
        let kind = match page.kind {
            PageKind::Document => "document",
            PageKind::Directory => "directory",
            PageKind::NotFound => "not-found",
            PageKind::Forbidden => "forbidden",
        };
        let client = ClientConfig {
            base_url: &page.base_url,
            search_index_url: &page.search_index_url,
            route: &page.active_path,
            kind: page.kind,
            editable: page.editable,
            live: page.live,
        };
        let client_config = serde_json::to_string(&client)
            .map_err(|e| TemplateError::Render(e.to_string()))?
            .replace("</", "<\\/");

        Ok(Self {
            page,
            kind,
            home_url: with_base(&page.base_url, "/"),
            directory_url: directory_href(&page.base_url),
            assets_url: with_base(&page.base_url, &format!("/{}/", ASSETS_DIR)),
            directory_html: render_directory_html(&page.directory),
            client_config,
        })
    }
}

/// Default [`PageTemplates`] implementation: compiled-in templates plus the
/// embedded theme bundle.
#[derive(Debug, Clone, Copy, Default)]
pub struct SiteTemplates;

impl SiteTemplates {
    pub fn new() -> Self {
        Self
    }
}

impl PageTemplates for SiteTemplates {
    fn render_page(&self, data: &PageData) -> Result<String, TemplateError> {
        PageTemplate::new(data)?
            .render()
            .map_err(|e| TemplateError::Render(e.to_string()))
    }

    fn write_assets(&self, dest: &Path) -> Result<(), TemplateError> {
        fs::create_dir_all(dest)?;
        for entry in THEME_BUNDLE.entries() {
            extract_entry(entry, dest)?;
        }
        Ok(())
    }
}

fn extract_entry(entry: &DirEntry, dest: &Path) -> io::Result<()> {
    match entry {
        DirEntry::Dir(dir) => {
            for sub_entry in dir.entries() {
                extract_entry(sub_entry, dest)?;
            }
        }
        DirEntry::File(file) => {
            let target = dest.join(file.path());
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, file.contents())?;
        }
    }
    Ok(())
}

/// Render the directory tree as nested lists. Folder nodes become
/// collapsible `<details>` blocks whose ids match breadcrumb anchors.
pub fn render_directory_html(entries: &[DirectoryEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }
    let mut html = String::from("<ul class=\"directory-tree\">\n");
    for entry in entries {
        render_directory_entry(&mut html, entry);
    }
    html.push_str("</ul>\n");
    html
}

fn render_directory_entry(html: &mut String, entry: &DirectoryEntry) {
    let title = html_escape(&entry.title);
    let link = if entry.url.is_empty() {
        format!("<span class=\"dir-label\">{}</span>", title)
    } else {
        format!(
            "<a href=\"{}\" class=\"file-link\">{}</a>",
            html_escape(&entry.url),
            title
        )
    };

    if entry.children.is_empty() {
        html.push_str(&format!("<li class=\"file-item\">{}</li>\n", link));
        return;
    }

    let id = if entry.anchor.is_empty() {
        String::new()
    } else {
        format!(" id=\"{}\"", html_escape(&entry.anchor))
    };
    html.push_str(&format!(
        "<li class=\"directory-node depth-{}\"{}>\n<details open>\n<summary>{} <span class=\"file-count\">({})</span></summary>\n<ul>\n",
        entry.depth, id, link, entry.count
    ));
    for child in &entry.children {
        render_directory_entry(html, child);
    }
    html.push_str("</ul>\n</details>\n</li>\n");
}
