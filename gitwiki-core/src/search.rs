//! Compact inverted search index.
//!
//! The payload is JSON shaped for a client-side scorer:
//!
//! ```text
//! {"v":3,"c":<docs>,"f":["title","summary","content"],"a":[avg*100...],
//!  "d":[[route,title,summary,"tl,sl,cl"],...],
//!  "t":{term:"count|doc:tf:sf:cf[:p0.d1.d2...];..."}}
//! ```
//!
//! All integers inside strings are base 36. Content positions are
//! delta-encoded and capped per document.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::documents::Page;
use crate::paths::SEARCH_INDEX_OUTPUT;

pub const SEARCH_INDEX_VERSION: u32 = 3;
pub const MAX_POSITIONS_PER_DOC: usize = 48;
pub const SEARCH_FIELDS: [&str; 3] = ["title", "summary", "content"];
pub const EMPTY_SEARCH_INDEX: &str =
    r#"{"v":3,"c":0,"f":["title","summary","content"],"a":[0,0,0],"d":[],"t":{}}"#;

const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("failed to serialize search index: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("malformed posting list: {0}")]
    Malformed(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchPayload {
    #[serde(rename = "v")]
    pub version: u32,
    #[serde(rename = "c")]
    pub doc_count: usize,
    #[serde(rename = "f")]
    pub fields: Vec<String>,
    #[serde(rename = "a")]
    pub avg_field_lengths: Vec<u64>,
    #[serde(rename = "d")]
    pub docs: Vec<[String; 4]>,
    #[serde(rename = "t")]
    pub terms: BTreeMap<String, String>,
}

/// Per-document statistics for one term.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Posting {
    pub doc: usize,
    pub title_freq: usize,
    pub summary_freq: usize,
    pub content_freq: usize,
    pub positions: Vec<usize>,
}

/// Build the serialized index for `pages`; document ids are offsets into
/// `pages`.
pub fn build_search_index(pages: &[Page]) -> Result<String, SearchError> {
    if pages.is_empty() {
        return Ok(EMPTY_SEARCH_INDEX.to_string());
    }

    let mut docs = Vec::with_capacity(pages.len());
    let mut terms: HashMap<String, Vec<Posting>> = HashMap::with_capacity(pages.len() * 16);
    let mut sum_lengths = [0u64; 3];

    for (doc, page) in pages.iter().enumerate() {
        let mut doc_terms: HashMap<String, Posting> = HashMap::with_capacity(64);

        let title_len = tokenize(&page.title, |token| {
            posting_for(&mut doc_terms, doc, token).title_freq += 1;
        });
        let summary_len = tokenize(&page.summary, |token| {
            posting_for(&mut doc_terms, doc, token).summary_freq += 1;
        });
        let mut position = 0usize;
        let content_len = tokenize(&page.plain_text, |token| {
            let posting = posting_for(&mut doc_terms, doc, token);
            posting.content_freq += 1;
            if posting.positions.len() < MAX_POSITIONS_PER_DOC {
                posting.positions.push(position);
            }
            position += 1;
        });

        sum_lengths[0] += title_len as u64;
        sum_lengths[1] += summary_len as u64;
        sum_lengths[2] += content_len as u64;

        docs.push([
            page.route.clone(),
            page.title.clone(),
            page.summary.clone(),
            format!(
                "{},{},{}",
                encode_int(title_len),
                encode_int(summary_len),
                encode_int(content_len)
            ),
        ]);

        for (term, posting) in doc_terms {
            terms.entry(term).or_default().push(posting);
        }
    }

    let encoded: BTreeMap<String, String> = terms
        .into_iter()
        .map(|(term, mut postings)| {
            postings.sort_by_key(|p| p.doc);
            (term, encode_postings(&postings))
        })
        .collect();

    let doc_count = pages.len() as u64;
    let avg_field_lengths = sum_lengths
        .iter()
        .map(|sum| ((*sum * 100) as f64 / doc_count as f64).round() as u64)
        .collect();

    let payload = SearchPayload {
        version: SEARCH_INDEX_VERSION,
        doc_count: pages.len(),
        fields: SEARCH_FIELDS.iter().map(|f| f.to_string()).collect(),
        avg_field_lengths,
        docs,
        terms: encoded,
    };
    debug!(
        docs = payload.doc_count,
        terms = payload.terms.len(),
        "search index built"
    );
    Ok(serde_json::to_string(&payload)?)
}

fn posting_for<'a>(
    doc_terms: &'a mut HashMap<String, Posting>,
    doc: usize,
    token: String,
) -> &'a mut Posting {
    doc_terms.entry(token).or_insert_with(|| Posting {
        doc,
        ..Default::default()
    })
}

/// Split `text` into index tokens, calling `apply` for each. Returns the
/// token count.
///
/// Text is NFKD-normalized with combining marks removed and lower-cased;
/// tokens break on anything that is not a letter or digit. Single-byte tokens
/// survive only when they are digits.
pub fn tokenize(text: &str, mut apply: impl FnMut(String)) -> usize {
    let mut count = 0;
    let mut current = String::new();
    let mut flush = |current: &mut String, apply: &mut dyn FnMut(String)| {
        if current.is_empty() {
            return;
        }
        let token = std::mem::take(current);
        if should_index(&token) {
            apply(token);
            count += 1;
        }
    };

    for c in text.nfkd() {
        if is_combining_mark(c) {
            continue;
        }
        if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else {
            flush(&mut current, &mut apply);
        }
    }
    flush(&mut current, &mut apply);
    count
}

fn should_index(token: &str) -> bool {
    match token.as_bytes() {
        [] => false,
        [single] => single.is_ascii_digit(),
        _ => true,
    }
}

pub fn encode_int(mut value: usize) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::with_capacity(8);
    while value > 0 {
        buf.push(DIGITS[value % 36]);
        value /= 36;
    }
    buf.reverse();
    String::from_utf8_lossy(&buf).into_owned()
}

pub fn decode_int(encoded: &str) -> Result<usize, SearchError> {
    usize::from_str_radix(encoded, 36)
        .map_err(|_| SearchError::Malformed(format!("bad base-36 integer {:?}", encoded)))
}

/// Delta-encode ascending positions: first absolute, then gaps.
pub fn encode_positions(positions: &[usize]) -> String {
    let mut prev = 0;
    positions
        .iter()
        .enumerate()
        .map(|(i, &pos)| {
            let delta = if i == 0 { pos } else { pos - prev };
            prev = pos;
            encode_int(delta)
        })
        .collect::<Vec<_>>()
        .join(".")
}

pub fn decode_positions(encoded: &str) -> Result<Vec<usize>, SearchError> {
    if encoded.is_empty() {
        return Ok(Vec::new());
    }
    let mut total: usize = 0;
    encoded
        .split('.')
        .map(|part| {
            total = total.checked_add(decode_int(part)?).ok_or_else(|| {
                SearchError::Malformed(format!("position overflow in {:?}", encoded))
            })?;
            Ok(total)
        })
        .collect()
}

pub fn encode_postings(postings: &[Posting]) -> String {
    let entries: Vec<String> = postings
        .iter()
        .map(|p| {
            let mut entry = format!(
                "{}:{}:{}:{}",
                encode_int(p.doc),
                encode_int(p.title_freq),
                encode_int(p.summary_freq),
                encode_int(p.content_freq)
            );
            if !p.positions.is_empty() {
                entry.push(':');
                entry.push_str(&encode_positions(&p.positions));
            }
            entry
        })
        .collect();
    format!("{}|{}", encode_int(postings.len()), entries.join(";"))
}

pub fn decode_postings(encoded: &str) -> Result<Vec<Posting>, SearchError> {
    let malformed = || SearchError::Malformed(encoded.to_string());
    let (count, body) = encoded.split_once('|').ok_or_else(malformed)?;
    let count = decode_int(count)?;

    let postings = body
        .split(';')
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let fields: Vec<&str> = entry.split(':').collect();
            if fields.len() != 4 && fields.len() != 5 {
                return Err(malformed());
            }
            Ok(Posting {
                doc: decode_int(fields[0])?,
                title_freq: decode_int(fields[1])?,
                summary_freq: decode_int(fields[2])?,
                content_freq: decode_int(fields[3])?,
                positions: match fields.get(4) {
                    Some(p) => decode_positions(p)?,
                    None => Vec::new(),
                },
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if postings.len() != count {
        return Err(malformed());
    }
    Ok(postings)
}

/// In-memory copy of the most recently built index.
#[derive(Debug, Default)]
pub struct SearchCatalog {
    payload: RwLock<Option<Arc<str>>>,
}

impl SearchCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, payload: &str) {
        let next = (!payload.is_empty()).then(|| Arc::from(payload));
        *self.payload.write() = next;
    }

    pub fn snapshot(&self) -> Option<Arc<str>> {
        self.payload.read().clone()
    }

    /// The in-memory payload, else the published file in `output_dir`, else
    /// the empty index.
    pub fn resolve(&self, output_dir: &Path) -> Arc<str> {
        if let Some(payload) = self.snapshot() {
            return payload;
        }
        match std::fs::read_to_string(output_dir.join(SEARCH_INDEX_OUTPUT)) {
            Ok(data) if !data.trim().is_empty() => Arc::from(data),
            _ => Arc::from(EMPTY_SEARCH_INDEX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(route: &str, title: &str, summary: &str, plain: &str) -> Page {
        Page {
            source: String::new(),
            route: route.to_string(),
            output_path: String::new(),
            title: title.to_string(),
            html: String::new(),
            sections: Vec::new(),
            summary: summary.to_string(),
            plain_text: plain.to_string(),
            last_hash: None,
            last_modified: None,
        }
    }

    fn collect(text: &str) -> Vec<String> {
        let mut out = Vec::new();
        tokenize(text, |t| out.push(t));
        out
    }

    #[test]
    fn test_tokenize_normalizes() {
        assert_eq!(collect("Crème Brûlée!"), vec!["creme", "brulee"]);
        assert_eq!(collect("a 1 b 22 x"), vec!["1", "22"]);
        assert_eq!(collect("ﬁle"), vec!["file"]);
        assert!(collect("").is_empty());
    }

    #[test]
    fn test_tokenize_counts_indexed_tokens() {
        assert_eq!(tokenize("the a cat", |_| {}), 2);
    }

    #[test]
    fn test_base36() {
        assert_eq!(encode_int(0), "0");
        assert_eq!(encode_int(35), "z");
        assert_eq!(encode_int(36), "10");
        assert_eq!(decode_int("10").unwrap(), 36);
        assert!(decode_int("!").is_err());
    }

    #[test]
    fn test_positions_are_delta_encoded() {
        assert_eq!(encode_positions(&[3, 5, 40]), "3.2.z");
        assert_eq!(decode_positions("3.2.z").unwrap(), vec![3, 5, 40]);
    }

    #[test]
    fn test_base36_round_trips() {
        let mut values: Vec<usize> = (0..=1300).collect();
        values.extend([36 * 36 - 1, 36 * 36, 1 << 20, u32::MAX as usize, usize::MAX]);
        for n in values {
            let encoded = encode_int(n);
            assert!(encoded.bytes().all(|b| DIGITS.contains(&b)), "{:?}", encoded);
            assert_eq!(decode_int(&encoded).unwrap(), n, "{}", encoded);
        }
    }

    #[test]
    fn test_positions_round_trip() {
        let cases: Vec<Vec<usize>> = vec![
            vec![],
            vec![0],
            vec![35],
            vec![36],
            vec![0, 1, 2, 3],
            vec![1, 37, 1333, 1334],
            (0..48).map(|i| i * i + 5).collect(),
        ];
        for positions in cases {
            let encoded = encode_positions(&positions);
            assert_eq!(decode_positions(&encoded).unwrap(), positions, "{:?}", encoded);
        }
        assert!(decode_positions("zzzzzzzzzzzzzz.zzzzzzzzzzzzzz").is_err());
    }

    #[test]
    fn test_empty_corpus() {
        assert_eq!(build_search_index(&[]).unwrap(), EMPTY_SEARCH_INDEX);
    }

    #[test]
    fn test_small_index_payload() {
        let pages = vec![
            page("/", "Home", "Hello world", "Hello world"),
            page("/foo/bar/", "Bar", "", "world of bars"),
        ];
        let json = build_search_index(&pages).unwrap();
        insta::assert_snapshot!(json, @r#"{"v":3,"c":2,"f":["title","summary","content"],"a":[100,100,250],"d":[["/","Home","Hello world","1,2,2"],["/foo/bar/","Bar","","1,0,3"]],"t":{"bar":"1|1:1:0:0","bars":"1|1:0:0:1:2","hello":"1|0:0:1:1:0","home":"1|0:1:0:0","of":"1|1:0:0:1:1","world":"2|0:0:1:1:1;1:0:0:1:0"}}"#);
    }

    #[test]
    fn test_position_cap() {
        let text = vec!["word"; 100].join(" ");
        let pages = vec![page("/long/", "Long", "", &text)];
        let payload: SearchPayload =
            serde_json::from_str(&build_search_index(&pages).unwrap()).unwrap();
        let postings = decode_postings(&payload.terms["word"]).unwrap();
        assert_eq!(postings[0].content_freq, 100);
        assert_eq!(postings[0].positions.len(), MAX_POSITIONS_PER_DOC);
        assert_eq!(postings[0].positions[47], 47);
        assert_eq!(payload.docs[0][3], format!("1,0,{}", encode_int(100)));
    }

    #[test]
    fn test_decode_postings_rejects_count_mismatch() {
        assert!(decode_postings("2|0:1:0:0").is_err());
        assert!(decode_postings("no-separator").is_err());
    }

    #[test]
    fn test_catalog_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = SearchCatalog::new();
        assert_eq!(&*catalog.resolve(dir.path()), EMPTY_SEARCH_INDEX);

        std::fs::write(dir.path().join(SEARCH_INDEX_OUTPUT), "{\"v\":3}").unwrap();
        assert_eq!(&*catalog.resolve(dir.path()), "{\"v\":3}");

        catalog.update("{\"v\":3,\"c\":1}");
        assert_eq!(&*catalog.resolve(dir.path()), "{\"v\":3,\"c\":1}");
    }
}
