//! Text helpers: heading anchors, document titles, summaries.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

static HYPHEN_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"-+").unwrap());

const SUMMARY_CHARS: usize = 200;

/// Convert heading text to an anchor-safe slug.
///
/// ```
/// use gitwiki_core::text::slugify;
///
/// assert_eq!(slugify("Hello World"), "hello-world");
/// assert_eq!(slugify("C++ Programming"), "c-programming");
/// ```
pub fn slugify(input: &str) -> String {
    let cleaned = input
        .to_lowercase()
        .graphemes(true)
        .filter_map(|g| match g {
            " " | "_" | "\t" | "\n" => Some("-"),
            _ => {
                let c = g.chars().next()?;
                (c.is_alphanumeric() || c == '-').then_some(g)
            }
        })
        .collect::<String>();

    HYPHEN_RUNS
        .replace_all(&cleaned, "-")
        .trim_matches('-')
        .to_string()
}

/// Hands out heading ids unique within one document.
#[derive(Debug, Default)]
pub struct HeadingIds {
    seen: HashMap<String, usize>,
}

impl HeadingIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slug for `text`, suffixed `-1`, `-2`, ... on repeats.
    pub fn assign(&mut self, text: &str) -> String {
        let mut base = slugify(text);
        if base.is_empty() {
            base = "section".to_string();
        }
        let count = self.seen.entry(base.clone()).or_insert(0);
        let id = if *count == 0 {
            base
        } else {
            format!("{}-{}", base, count)
        };
        *count += 1;
        id
    }

    /// Record an author-supplied id so generated ones do not collide with it.
    pub fn reserve(&mut self, id: &str) {
        *self.seen.entry(id.to_string()).or_insert(0) += 1;
    }
}

/// Human title from a document path: `notes/getting_started.md` becomes
/// `Getting Started`.
pub fn derive_title(rel_path: &str) -> String {
    let stem = Path::new(rel_path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let words: Vec<String> = stem
        .replace(['-', '_'], " ")
        .split_whitespace()
        .map(capitalize)
        .collect();
    if words.is_empty() {
        "Untitled".to_string()
    } else {
        words.join(" ")
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// First 200 characters of the plain text, with an ellipsis when cut.
pub fn summarize(plain: &str) -> String {
    let plain = plain.trim();
    match plain.char_indices().nth(SUMMARY_CHARS) {
        Some((cut, _)) => format!("{}...", &plain[..cut]),
        None => plain.to_string(),
    }
}

/// Escape text for inclusion in HTML.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Rust & Safety"), "rust-safety");
        assert_eq!(slugify("What's new?"), "whats-new");
        assert_eq!(slugify("Café au lait"), "café-au-lait");
        assert_eq!(slugify("  -Padded-  "), "padded");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_heading_ids_dedupe() {
        let mut ids = HeadingIds::new();
        assert_eq!(ids.assign("Setup"), "setup");
        assert_eq!(ids.assign("Setup"), "setup-1");
        assert_eq!(ids.assign("Setup"), "setup-2");
        assert_eq!(ids.assign("???"), "section");

        ids.reserve("intro");
        assert_eq!(ids.assign("Intro"), "intro-1");
    }

    #[test]
    fn test_derive_title() {
        assert_eq!(derive_title("foo/bar.md"), "Bar");
        assert_eq!(derive_title("notes/getting_started.md"), "Getting Started");
        assert_eq!(derive_title("release-notes-2024.md"), "Release Notes 2024");
        assert_eq!(derive_title("_.md"), "Untitled");
    }

    #[test]
    fn test_summarize_cuts_on_char_boundary() {
        let short = "short text";
        assert_eq!(summarize(short), "short text");

        let long = "é".repeat(250);
        let summary = summarize(&long);
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), 203);
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape("<a href=\"x\">Tom & 'Jerry'</a>"),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }
}
