//! Markdown rendering.
//!
//! The build pipeline and the edit coordinator only see the [`Renderer`]
//! trait; [`MarkdownRenderer`] is the default implementation built on
//! pulldown-cmark with syntect highlighting.

pub mod highlight;

use std::borrow::Cow;

use pulldown_cmark::{html, CowStr, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::text::HeadingIds;
pub use highlight::HighlightTransformer;

#[derive(Error, Debug)]
pub enum RenderError {
    /// Failure reported by a renderer backend.
    #[error("render failed: {0}")]
    Backend(String),
}

/// One heading of a rendered document, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Heading {
    pub id: String,
    pub text: String,
    pub level: u8,
}

#[derive(Debug, Clone, Default)]
pub struct RenderResult {
    pub html: String,
    pub plain_text: String,
    pub headings: Vec<Heading>,
}

/// Turns Markdown source into HTML plus the metadata needed for navigation
/// and search.
pub trait Renderer: Send + Sync {
    fn render(&self, source: &[u8]) -> Result<RenderResult, RenderError>;
}

/// GitHub-flavoured Markdown renderer.
#[derive(Debug, Clone)]
pub struct MarkdownRenderer {
    options: Options,
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_SMART_PUNCTUATION);
        options.insert(Options::ENABLE_HEADING_ATTRIBUTES);
        options.insert(Options::ENABLE_DEFINITION_LIST);
        options.insert(Options::ENABLE_YAML_STYLE_METADATA_BLOCKS);
        Self { options }
    }
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for MarkdownRenderer {
    fn render(&self, source: &[u8]) -> Result<RenderResult, RenderError> {
        let markdown = String::from_utf8_lossy(source);
        if matches!(markdown, Cow::Owned(_)) {
            warn!("document is not valid UTF-8; invalid bytes replaced");
        }
        let events: Vec<Event> = Parser::new_ext(&markdown, self.options).collect();

        let headings = collect_headings(&events);
        let plain_text = collect_plain_text(&events);

        let events = attach_heading_ids(events, &headings);
        let events = HighlightTransformer::new().transform(events);

        let mut html_output = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut html_output, events.into_iter());

        Ok(RenderResult {
            html: html_output,
            plain_text,
            headings,
        })
    }
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

fn collect_headings(events: &[Event]) -> Vec<Heading> {
    let mut ids = HeadingIds::new();
    let mut headings = Vec::new();
    let mut current: Option<(u8, Option<String>, String)> = None;

    for event in events {
        match event {
            Event::Start(Tag::Heading { level, id, .. }) => {
                current = Some((heading_level(*level), id.as_ref().map(|s| s.to_string()), String::new()));
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some((_, _, ref mut buf)) = current {
                    buf.push_str(text);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((level, explicit, text)) = current.take() {
                    let text = text.trim().to_string();
                    let id = match explicit {
                        Some(id) => {
                            ids.reserve(&id);
                            id
                        }
                        None => ids.assign(&text),
                    };
                    headings.push(Heading { id, text, level });
                }
            }
            _ => {}
        }
    }

    headings
}

fn collect_plain_text(events: &[Event]) -> String {
    let mut plain = String::new();
    let mut in_metadata = false;
    for event in events {
        match event {
            Event::Start(Tag::MetadataBlock(_)) => in_metadata = true,
            Event::End(TagEnd::MetadataBlock(_)) => in_metadata = false,
            Event::Text(text) | Event::Code(text) if !in_metadata => {
                plain.push_str(text);
                plain.push(' ');
            }
            _ => {}
        }
    }
    plain.trim().to_string()
}

fn attach_heading_ids<'a>(events: Vec<Event<'a>>, headings: &[Heading]) -> Vec<Event<'a>> {
    let mut heading_iter = headings.iter();

    events
        .into_iter()
        .map(|event| match event {
            Event::Start(Tag::Heading {
                level,
                id,
                classes,
                attrs,
            }) => {
                let next = heading_iter.next();
                let id = id.or_else(|| {
                    next.map(|h| CowStr::Boxed(h.id.clone().into_boxed_str()))
                });
                Event::Start(Tag::Heading {
                    level,
                    id,
                    classes,
                    attrs,
                })
            }
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(md: &str) -> RenderResult {
        MarkdownRenderer::new().render(md.as_bytes()).unwrap()
    }

    #[test]
    fn test_basic_markdown() {
        let result = render("# Hello World\n\nThis is a **test**.");
        assert!(result.html.contains("<h1 id=\"hello-world\">Hello World</h1>"));
        assert!(result.html.contains("<strong>test</strong>"));
        assert!(result.plain_text.starts_with("Hello World This is a"));
        assert!(result.plain_text.contains("test"));
        assert!(!result.plain_text.contains('<'));
    }

    #[test]
    fn test_heading_metadata() {
        let result = render("# Intro\n\n## Setup\n\n## Setup\n\n### `code` title {#custom}\n");
        let ids: Vec<&str> = result.headings.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["intro", "setup", "setup-1", "custom"]);
        assert_eq!(result.headings[3].text, "code title");
        assert_eq!(result.headings[3].level, 3);
        assert!(result.html.contains("<h2 id=\"setup-1\">"));
    }

    #[test]
    fn test_tables_and_tasks() {
        let md = "| A | B |\n|---|---|\n| 1 | 2 |\n\n- [x] done\n";
        let result = render(md);
        assert!(result.html.contains("<table>"));
        assert!(result.html.contains("checkbox"));
    }

    #[test]
    fn test_front_matter_is_not_rendered() {
        let result = render("---\ntitle: hidden\n---\n\nVisible body\n");
        assert!(!result.html.contains("hidden"));
        assert_eq!(result.plain_text, "Visible body");
    }

    #[test]
    fn test_code_blocks_are_highlighted() {
        let result = render("```rust\nfn main() {}\n```");
        assert!(result.html.contains("<pre"));
        assert!(result.html.contains("main"));
    }

    #[test]
    fn test_latin1_bytes_render_with_replacement() {
        let result = MarkdownRenderer::new().render(b"# Caf\xe9\n\nna\xefve text\n").unwrap();
        assert_eq!(result.headings.len(), 1);
        assert_eq!(result.headings[0].text, "Caf\u{fffd}");
        assert!(result.html.contains("<h1"));
        assert!(result.plain_text.contains("text"));
    }
}
