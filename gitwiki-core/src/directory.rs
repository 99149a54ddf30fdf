//! Site directory tree and breadcrumb trails.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::documents::Page;
use crate::paths::{with_base, DIRECTORY_ROUTE, DIRECTORY_TITLE};
use crate::text::derive_title;

/// One node of the directory listing. Folder nodes have an empty `url`
/// unless a document shares the folder's name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DirectoryEntry {
    pub title: String,
    pub url: String,
    pub route: String,
    pub children: Vec<DirectoryEntry>,
    /// Documents in this subtree, including the node itself.
    pub count: usize,
    pub depth: usize,
    /// Unique key built from the lower-cased segment path.
    pub id: String,
    /// Fragment targeted by breadcrumbs (`/directory#anchor`).
    pub anchor: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breadcrumb {
    pub title: String,
    pub path: String,
    pub current: bool,
}

#[derive(Debug, Default)]
struct Node {
    segment: String,
    document: Option<(String, String)>,
    children: BTreeMap<String, Node>,
}

/// Build the directory tree for `pages`, linking through `base_url`.
pub fn build_directory(pages: &[Page], base_url: &str) -> Vec<DirectoryEntry> {
    let mut root = Node::default();

    for page in pages {
        let trimmed = page.route.trim_matches('/');
        let segments: Vec<&str> = if trimmed.is_empty() {
            // The home page sits at the top under its source name.
            vec![page.source.trim_end_matches(".md")]
        } else {
            trimmed.split('/').collect()
        };

        let mut node = &mut root;
        for segment in segments {
            node = node
                .children
                .entry(segment.to_lowercase())
                .or_insert_with(|| Node {
                    segment: segment.to_string(),
                    ..Default::default()
                });
        }
        node.document = Some((page.title.clone(), page.route.clone()));
    }

    let mut entries: Vec<DirectoryEntry> = root
        .children
        .into_values()
        .map(|node| into_entry(node, base_url, 0, ""))
        .collect();
    sort_entries(&mut entries);
    entries
}

fn into_entry(node: Node, base_url: &str, depth: usize, parent_id: &str) -> DirectoryEntry {
    let key = node.segment.to_lowercase();
    let id = if parent_id.is_empty() {
        key
    } else {
        format!("{}/{}", parent_id, key)
    };

    let mut children: Vec<DirectoryEntry> = node
        .children
        .into_values()
        .map(|child| into_entry(child, base_url, depth + 1, &id))
        .collect();
    sort_entries(&mut children);

    let own = usize::from(node.document.is_some());
    let count = own + children.iter().map(|c| c.count).sum::<usize>();

    let (title, url, route) = match node.document {
        Some((title, route)) => (title, with_base(base_url, &route), route),
        None => (derive_title(&node.segment), String::new(), String::new()),
    };

    DirectoryEntry {
        title,
        url,
        route,
        children,
        count,
        depth,
        anchor: breadcrumb_anchor(&node.segment),
        id,
    }
}

/// Folders first, then documents, each group by title.
fn sort_entries(entries: &mut [DirectoryEntry]) {
    entries.sort_by(|a, b| {
        a.children
            .is_empty()
            .cmp(&b.children.is_empty())
            .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
    });
}

/// Anchor for a route segment: lower-case ASCII alphanumerics joined by
/// single hyphens.
pub fn breadcrumb_anchor(segment: &str) -> String {
    let mut out = String::new();
    let mut last_dash = false;
    for c in segment.trim().to_lowercase().chars() {
        match c {
            'a'..='z' | '0'..='9' => {
                out.push(c);
                last_dash = false;
            }
            ' ' | '-' | '_' | '.' => {
                if last_dash || out.is_empty() {
                    continue;
                }
                out.push('-');
                last_dash = true;
            }
            _ => {}
        }
    }
    out.trim_matches('-').to_string()
}

pub fn directory_href(base_url: &str) -> String {
    with_base(base_url, DIRECTORY_ROUTE)
}

/// `Directory` root, one crumb per intermediate segment, then the page.
pub fn build_breadcrumbs(route: &str, title: &str, base_url: &str) -> Vec<Breadcrumb> {
    let root_href = directory_href(base_url);
    let mut crumbs = vec![Breadcrumb {
        title: DIRECTORY_TITLE.to_string(),
        path: root_href.clone(),
        current: false,
    }];

    let segments: Vec<&str> = route
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    if segments.is_empty() {
        crumbs.push(Breadcrumb {
            title: title.to_string(),
            path: String::new(),
            current: true,
        });
        return crumbs;
    }

    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        if i == last {
            crumbs.push(Breadcrumb {
                title: title.to_string(),
                path: String::new(),
                current: true,
            });
        } else {
            let anchor = breadcrumb_anchor(segment);
            let path = if anchor.is_empty() {
                root_href.clone()
            } else {
                format!("{}#{}", root_href, anchor)
            };
            crumbs.push(Breadcrumb {
                title: segment.to_string(),
                path,
                current: false,
            });
        }
    }
    crumbs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(source: &str, route: &str, title: &str) -> Page {
        Page {
            source: source.to_string(),
            route: route.to_string(),
            output_path: String::new(),
            title: title.to_string(),
            html: String::new(),
            sections: Vec::new(),
            summary: String::new(),
            plain_text: String::new(),
            last_hash: None,
            last_modified: None,
        }
    }

    #[test]
    fn test_tree_groups_by_segment() {
        let pages = vec![
            page("Home.md", "/", "Home"),
            page("guides/setup.md", "/guides/setup/", "Setup"),
            page("Guides/Advanced.md", "/Guides/Advanced/", "Advanced"),
            page("about.md", "/about/", "About"),
        ];
        let tree = build_directory(&pages, "/wiki/");

        assert_eq!(tree.len(), 3);
        let guides = &tree[0];
        assert_eq!(guides.title, "Guides");
        assert_eq!(guides.count, 2);
        assert!(guides.url.is_empty());
        assert_eq!(guides.anchor, "guides");
        assert_eq!(guides.children[0].title, "Advanced");
        assert_eq!(guides.children[0].depth, 1);
        assert_eq!(guides.children[0].id, "guides/advanced");

        assert_eq!(tree[1].title, "About");
        assert_eq!(tree[1].url, "/wiki/about/");
        assert_eq!(tree[2].title, "Home");
        assert_eq!(tree[2].url, "/wiki/");
    }

    #[test]
    fn test_document_with_children_counts_itself() {
        let pages = vec![
            page("net.md", "/net/", "Net"),
            page("net/bgp.md", "/net/bgp/", "Bgp"),
        ];
        let tree = build_directory(&pages, "/");
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].count, 2);
        assert_eq!(tree[0].url, "/net/");
    }

    #[test]
    fn test_breadcrumb_anchor() {
        assert_eq!(breadcrumb_anchor("Getting Started"), "getting-started");
        assert_eq!(breadcrumb_anchor("__v1.2__"), "v1-2");
        assert_eq!(breadcrumb_anchor("ünï"), "n");
    }

    #[test]
    fn test_breadcrumbs() {
        let crumbs = build_breadcrumbs("/guides/setup/", "Setup", "/");
        assert_eq!(crumbs.len(), 3);
        assert_eq!(crumbs[0].path, "/directory");
        assert_eq!(crumbs[1].title, "guides");
        assert_eq!(crumbs[1].path, "/directory#guides");
        assert!(crumbs[2].current);
        assert_eq!(crumbs[2].title, "Setup");

        let home = build_breadcrumbs("/", "Home", "/wiki/");
        assert_eq!(home[0].path, "/wiki/directory");
        assert_eq!(home.len(), 2);
    }
}
