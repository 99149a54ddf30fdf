//! Code syntax highlighting using syntect.

use pulldown_cmark::{CodeBlockKind, CowStr, Event, Tag, TagEnd};
use std::sync::OnceLock;
use syntect::highlighting::{Theme, ThemeSet};
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

use crate::text::html_escape;

static SYNTAX_SET: OnceLock<SyntaxSet> = OnceLock::new();
static THEME: OnceLock<Option<Theme>> = OnceLock::new();

fn syntax_set() -> &'static SyntaxSet {
    SYNTAX_SET.get_or_init(SyntaxSet::load_defaults_newlines)
}

fn theme() -> Option<&'static Theme> {
    THEME
        .get_or_init(|| {
            let theme_set = ThemeSet::load_defaults();
            theme_set
                .themes
                .get("InspiredGitHub")
                .or_else(|| theme_set.themes.get("base16-ocean.light"))
                .cloned()
        })
        .as_ref()
}

/// Replaces fenced code blocks that name a language with highlighted HTML.
#[derive(Debug, Default)]
pub struct HighlightTransformer;

impl HighlightTransformer {
    pub fn new() -> Self {
        Self
    }

    pub fn transform<'a>(&self, events: Vec<Event<'a>>) -> Vec<Event<'a>> {
        let mut result = Vec::with_capacity(events.len());
        let mut fenced: Option<(CowStr<'a>, String)> = None;

        for event in events {
            match event {
                Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(lang)))
                    if !lang.trim().is_empty() =>
                {
                    fenced = Some((lang, String::new()));
                }
                Event::Text(text) if fenced.is_some() => {
                    if let Some((_, code)) = fenced.as_mut() {
                        code.push_str(&text);
                    }
                }
                Event::End(TagEnd::CodeBlock) if fenced.is_some() => {
                    if let Some((lang, code)) = fenced.take() {
                        let html = highlight_code(&code, &lang);
                        result.push(Event::Html(CowStr::Boxed(html.into_boxed_str())));
                    }
                }
                other => result.push(other),
            }
        }

        result
    }
}

fn highlight_code(code: &str, lang: &str) -> String {
    // Info strings may carry attributes after the language token.
    let token = lang.split_whitespace().next().unwrap_or(lang);
    let ss = syntax_set();
    let syntax = ss
        .find_syntax_by_token(token)
        .or_else(|| ss.find_syntax_by_extension(token))
        .unwrap_or_else(|| ss.find_syntax_plain_text());

    let plain = || {
        format!(
            "<pre><code class=\"language-{}\">{}</code></pre>\n",
            html_escape(token),
            html_escape(code)
        )
    };
    match theme() {
        Some(theme) => highlighted_html_for_string(code, ss, syntax, theme).unwrap_or_else(|_| plain()),
        None => plain(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulldown_cmark::Parser;

    fn highlight(md: &str) -> Vec<Event<'_>> {
        HighlightTransformer::new().transform(Parser::new(md).collect())
    }

    #[test]
    fn test_fenced_block_with_language_becomes_html() {
        let events = highlight("```rust\nfn main() {}\n```\n");
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Html(html) => {
                assert!(html.contains("<pre"));
                assert!(html.contains("main"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_untagged_block_is_left_alone() {
        let events = highlight("```\nplain\n```\n");
        assert!(matches!(
            events.first(),
            Some(Event::Start(Tag::CodeBlock(_)))
        ));
    }
}
