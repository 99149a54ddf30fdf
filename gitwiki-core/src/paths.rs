//! Document path model.
//!
//! User input is normalized into a slash-separated `.md` path relative to the
//! working tree. Routes and output paths are derived from that path.

use std::path::Path;

use thiserror::Error;

pub const DEFAULT_HOME_DOC: &str = "Home.md";

pub const DIRECTORY_ROUTE: &str = "/directory";
pub const DIRECTORY_OUTPUT: &str = "directory.html";
pub const DIRECTORY_TITLE: &str = "Directory";

pub const NOT_FOUND_OUTPUT: &str = "404.html";
pub const FORBIDDEN_OUTPUT: &str = "403.html";
pub const SEARCH_INDEX_OUTPUT: &str = "search-index.json";
pub const ASSETS_DIR: &str = "assets";

pub const HEADER_FRAGMENT: &str = "_Header.md";
pub const FOOTER_FRAGMENT: &str = "_Footer.md";
pub const SIDEBAR_FRAGMENT: &str = "_Sidebar.md";

/// Top-level names that would collide with generated routes.
const RESERVED_NAMES: &[&str] = &[
    "index",
    "_sidebar",
    "_footer",
    "404",
    "403",
    "_header",
    "layout",
    "readme",
    "search-index",
    "directory",
    "gollum",
    "root",
    "default",
    "assets",
    "api",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("reserved path: {0}")]
    ReservedPath(String),

    #[error("route is restricted: {0}")]
    ForbiddenRoute(String),
}

fn invalid(reason: &str) -> PathError {
    PathError::InvalidPath(reason.to_string())
}

fn has_md_suffix(path: &str) -> bool {
    path.to_lowercase().ends_with(".md")
}

/// Lexically clean a slash path: drop empty and `.` segments, fold `..`
/// into its parent. Leading `..` segments that cannot be folded are kept.
fn clean(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(out.last(), Some(last) if *last != "..") {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out.join("/")
}

/// Normalize the configured home document (default `Home.md`).
pub fn ensure_home_doc(home_doc: &str) -> String {
    let mut candidate = home_doc.trim().replace('\\', "/");
    if candidate.is_empty() {
        candidate = DEFAULT_HOME_DOC.to_string();
    }
    if !has_md_suffix(&candidate) {
        candidate.push_str(".md");
    }
    let cleaned = clean(&candidate);
    if cleaned.is_empty() {
        DEFAULT_HOME_DOC.to_string()
    } else {
        cleaned
    }
}

/// Turn caller-supplied input into a validated relative document path.
///
/// Empty input resolves to the home document; a `.md` suffix is appended
/// when missing.
pub fn normalize_rel_path(input: &str, home_doc: &str) -> Result<String, PathError> {
    let home = ensure_home_doc(home_doc);
    let mut candidate = input.trim().replace('\\', "/");
    candidate = candidate.trim_matches('/').to_string();
    if candidate.is_empty() {
        candidate = home.clone();
    }
    if candidate.contains('\0') {
        return Err(invalid("contains null byte"));
    }
    if !has_md_suffix(&candidate) {
        candidate.push_str(".md");
    }

    let mut cleaned = clean(&candidate);
    if cleaned.is_empty() {
        cleaned = home;
    }
    if cleaned.starts_with("..") || cleaned.contains("/../") {
        return Err(invalid("path escapes repository root"));
    }

    for segment in cleaned.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid("invalid path segment"));
        }
        if segment.starts_with('-') {
            return Err(invalid("path segment cannot start with '-'"));
        }
    }
    Ok(cleaned)
}

/// Whether `rel` names a reserved top-level route (case-insensitive).
pub fn is_reserved_path(rel: &str) -> bool {
    let lowered = rel.trim().replace('\\', "/").to_lowercase();
    let lowered = lowered.trim_start_matches('/');
    let lowered = lowered.strip_suffix(".md").unwrap_or(lowered);
    if lowered.contains('/') {
        return false;
    }
    RESERVED_NAMES.contains(&lowered)
}

pub fn is_directory_route(rel: &str) -> bool {
    let lowered = rel.trim().replace('\\', "/").to_lowercase();
    let lowered = lowered.trim_start_matches('/');
    let lowered = lowered.strip_suffix(".md").unwrap_or(lowered);
    let lowered = lowered.strip_suffix('/').unwrap_or(lowered);
    lowered == DIRECTORY_ROUTE.trim_start_matches('/')
}

pub fn is_markdown(path: &str) -> bool {
    Path::new(path)
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("md"))
        .unwrap_or(false)
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// `_Header.md`, `_Footer.md` and `_Sidebar.md` anywhere in the tree.
pub fn is_layout_fragment(path: &str) -> bool {
    matches!(
        base_name(path),
        HEADER_FRAGMENT | FOOTER_FRAGMENT | SIDEBAR_FRAGMENT
    )
}

/// VCS metadata files (`.git`, `.gitignore`, ...) are never published.
pub fn is_ignorable(path: &str) -> bool {
    base_name(path).starts_with(".git")
}

fn strip_extension(path: &str) -> &str {
    let base = base_name(path);
    match base.rfind('.') {
        Some(dot) if dot > 0 => &path[..path.len() - (base.len() - dot)],
        _ => path,
    }
}

fn is_home(rel: &str, home_doc: &str) -> bool {
    let home = home_doc.trim().replace('\\', "/");
    let home = if home.is_empty() {
        DEFAULT_HOME_DOC.to_string()
    } else {
        home
    };
    rel.eq_ignore_ascii_case(&home)
}

/// URL route for a document: `/` for the home document, otherwise
/// `/<path-without-extension>/`.
pub fn route_from_path(rel_path: &str, home_doc: &str) -> String {
    let normalized = rel_path.trim().replace('\\', "/");
    if is_home(&normalized, home_doc) {
        return "/".to_string();
    }
    let base = strip_extension(&normalized).trim_matches('/');
    if base.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", base)
    }
}

/// Output file for a document, relative to the output directory.
pub fn html_path_from(rel_path: &str, home_doc: &str) -> String {
    let normalized = rel_path.trim().replace('\\', "/");
    if is_home(&normalized, home_doc) {
        return "index.html".to_string();
    }
    let base = strip_extension(&normalized).trim_matches('/');
    if base.is_empty() {
        "index.html".to_string()
    } else {
        format!("{}/index.html", base)
    }
}

/// Prefix an absolute route with the site base path.
pub fn with_base(base_url: &str, route: &str) -> String {
    let base = base_url.trim().trim_matches('/');
    let route = if route.starts_with('/') {
        route.to_string()
    } else {
        format!("/{}", route)
    };
    if base.is_empty() {
        route
    } else {
        format!("/{}{}", base, route)
    }
}

/// Clean an HTTP route, always returning an absolute path.
pub fn sanitize_route(input: &str) -> String {
    let route = input.trim();
    if route.is_empty() {
        return "/".to_string();
    }
    let cleaned = clean(route);
    // Rooted paths cannot climb above `/`.
    let cleaned: Vec<&str> = cleaned.split('/').filter(|s| *s != "..").collect();
    let joined = cleaned.join("/");
    if joined.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", joined)
    }
}
