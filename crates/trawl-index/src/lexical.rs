//! In-memory inverted index with BM25 scoring.
//!
//! The tokenizer is tuned for source code: identifiers are split on
//! punctuation and on case changes, so `parseHttpHeader` and
//! `parse_http_header` index the same three terms.

use std::collections::{BTreeSet, HashMap};

use trawl_core::ChunkId;

const K1: f64 = 1.5;
const B: f64 = 0.75;

/// Split `text` into lowercase terms.
///
/// Splits on every non-alphanumeric character, on lower-to-upper case
/// transitions, and before the last capital of an upper-case run that is
/// followed by a lowercase letter. Digits stay attached to the word they
/// follow.
///
/// # Examples
///
/// ```
/// use trawl_index::lexical::tokenize;
///
/// assert_eq!(tokenize("parseHttpHeader"), vec!["parse", "http", "header"]);
/// assert_eq!(tokenize("HTTPServer::new"), vec!["http", "server", "new"]);
/// assert_eq!(tokenize("utf8Decode(buf_len)"), vec!["utf8", "decode", "buf", "len"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if !word.is_empty() {
            split_case(word, &mut tokens);
        }
    }
    tokens
}

fn split_case(word: &str, out: &mut Vec<String>) {
    let chars: Vec<char> = word.chars().collect();
    let mut start = 0;
    for i in 1..chars.len() {
        let prev = chars[i - 1];
        let cur = chars[i];
        let camel = (prev.is_lowercase() || prev.is_numeric()) && cur.is_uppercase();
        let acronym_end = prev.is_uppercase()
            && cur.is_uppercase()
            && chars.get(i + 1).is_some_and(|next| next.is_lowercase());
        if camel || acronym_end {
            out.push(chars[start..i].iter().collect::<String>().to_lowercase());
            start = i;
        }
    }
    out.push(chars[start..].iter().collect::<String>().to_lowercase());
}

#[derive(Debug, Clone)]
struct Document {
    length: u32,
    terms: Vec<String>,
}

/// BM25 index over chunk text.
///
/// # Examples
///
/// ```
/// use trawl_core::ChunkId;
/// use trawl_index::lexical::LexicalIndex;
///
/// let mut index = LexicalIndex::new();
/// index.add(ChunkId::from_raw(1), "fn open_store(path: &Path)");
/// index.add(ChunkId::from_raw(2), "fn close_store()");
///
/// let hits = index.search("open");
/// assert_eq!(hits.len(), 1);
/// assert_eq!(hits[0].0, ChunkId::from_raw(1));
/// ```
#[derive(Debug, Default, Clone)]
pub struct LexicalIndex {
    postings: HashMap<String, HashMap<ChunkId, u32>>,
    documents: HashMap<ChunkId, Document>,
    total_length: u64,
}

impl LexicalIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `text` under `id`, replacing any previous text for that id.
    pub fn add(&mut self, id: ChunkId, text: &str) {
        self.delete(id);

        let tokens = tokenize(text);
        let mut frequencies: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *frequencies.entry(token.clone()).or_default() += 1;
        }

        let length = u32::try_from(tokens.len()).unwrap_or(u32::MAX);
        let mut terms = Vec::with_capacity(frequencies.len());
        for (term, tf) in frequencies {
            self.postings.entry(term.clone()).or_default().insert(id, tf);
            terms.push(term);
        }
        self.total_length += u64::from(length);
        self.documents.insert(id, Document { length, terms });
    }

    /// Remove `id`. Terms left without documents are dropped.
    /// Returns `false` if `id` was not indexed.
    pub fn delete(&mut self, id: ChunkId) -> bool {
        let Some(doc) = self.documents.remove(&id) else {
            return false;
        };
        for term in &doc.terms {
            if let Some(posting) = self.postings.get_mut(term) {
                posting.remove(&id);
                if posting.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        self.total_length -= u64::from(doc.length);
        true
    }

    /// Score every document containing at least one query term.
    ///
    /// Sorted by descending score, ties by ascending id. Repeated query
    /// terms count once.
    pub fn search(&self, query: &str) -> Vec<(ChunkId, f64)> {
        if self.documents.is_empty() {
            return Vec::new();
        }
        let terms: BTreeSet<String> = tokenize(query).into_iter().collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let n_docs = self.documents.len() as f64;
        let avg_len = (self.total_length as f64 / n_docs).max(f64::MIN_POSITIVE);
        let mut scores: HashMap<ChunkId, f64> = HashMap::new();

        for term in &terms {
            let Some(posting) = self.postings.get(term) else {
                continue;
            };
            let n = posting.len() as f64;
            let idf = ((n_docs - n + 0.5) / (n + 0.5) + 1.0).ln();
            for (&id, &tf) in posting {
                let doc_len = self.documents.get(&id).map_or(0.0, |d| f64::from(d.length));
                let tf = f64::from(tf);
                let norm = tf + K1 * (1.0 - B + B * doc_len / avg_len);
                *scores.entry(id).or_default() += idf * tf * (K1 + 1.0) / norm;
            }
        }

        let mut ranked: Vec<(ChunkId, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }

    /// Whether `id` is indexed.
    pub fn contains(&self, id: ChunkId) -> bool {
        self.documents.contains_key(&id)
    }

    /// Indexed ids in ascending order.
    pub fn ids(&self) -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = self.documents.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the index holds no documents.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Number of distinct live terms.
    pub fn vocabulary_size(&self) -> usize {
        self.postings.len()
    }
}
