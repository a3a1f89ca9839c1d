//! Reference [`IndexClient`] implementation: a small TF-IDF workspace index.
//!
//! The index/search subsystem is explicitly out of scope as a *product*
//! (spec.md §1) — this crate exists only so the orchestrator has something
//! real to exercise in tests and the CLI demo. Adapted from the teacher's
//! `SemanticIndex` (term-frequency vectors, cosine similarity, camelCase-
//! aware tokenization, stop-word filtering).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use orc_core::collab::IndexClient;
use orc_core::types::{IndexStats, SearchHit};

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "of", "to", "in", "on", "for", "and", "or", "is", "are", "be", "this",
    "that", "with", "as", "at", "by", "it", "from",
];

#[derive(Debug, Clone)]
struct Document {
    path: PathBuf,
    content: String,
    term_freq: HashMap<String, f64>,
}

/// Splits on non-alphanumerics and camelCase boundaries, lowercases, and
/// drops stop words.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    let flush = |current: &mut String, tokens: &mut Vec<String>| {
        if !current.is_empty() {
            let lower = current.to_lowercase();
            if lower.len() > 1 && !STOP_WORDS.contains(&lower.as_str()) {
                tokens.push(lower);
            }
            current.clear();
        }
    };

    for c in text.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev_lower {
                flush(&mut current, &mut tokens);
            }
            prev_lower = c.is_lowercase();
            current.push(c);
        } else {
            flush(&mut current, &mut tokens);
            prev_lower = false;
        }
    }
    flush(&mut current, &mut tokens);
    tokens
}

fn term_frequencies(tokens: &[String]) -> HashMap<String, f64> {
    let mut counts: HashMap<String, f64> = HashMap::new();
    for token in tokens {
        *counts.entry(token.clone()).or_insert(0.0) += 1.0;
    }
    let total = tokens.len().max(1) as f64;
    for value in counts.values_mut() {
        *value /= total;
    }
    counts
}

/// In-memory TF-IDF index over a workspace directory tree.
pub struct TfIdfIndex {
    root: PathBuf,
    documents: RwLock<Vec<Document>>,
    idf: RwLock<HashMap<String, f64>>,
}

impl TfIdfIndex {
    /// Walk `root`, indexing every UTF-8 text file up to a modest size cap.
    pub fn build(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let mut documents = Vec::new();
        walk(&root, &root, &mut documents)?;

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for doc in &documents {
            for term in doc.term_freq.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
        }
        let n = documents.len().max(1) as f64;
        let idf = doc_freq
            .into_iter()
            .map(|(term, df)| (term, (n / (1.0 + df as f64)).ln() + 1.0))
            .collect();

        Ok(Self { root, documents: RwLock::new(documents), idf: RwLock::new(idf) })
    }

    fn score(&self, query_tf: &HashMap<String, f64>, doc_tf: &HashMap<String, f64>, idf: &HashMap<String, f64>) -> f64 {
        let mut dot = 0.0;
        let mut query_norm = 0.0;
        let mut doc_norm = 0.0;
        for (term, qtf) in query_tf {
            let weight_q = qtf * idf.get(term).copied().unwrap_or(1.0);
            query_norm += weight_q * weight_q;
            if let Some(dtf) = doc_tf.get(term) {
                let weight_d = dtf * idf.get(term).copied().unwrap_or(1.0);
                dot += weight_q * weight_d;
            }
        }
        for (term, dtf) in doc_tf {
            let weight_d = dtf * idf.get(term).copied().unwrap_or(1.0);
            doc_norm += weight_d * weight_d;
        }
        if query_norm == 0.0 || doc_norm == 0.0 {
            return 0.0;
        }
        dot / (query_norm.sqrt() * doc_norm.sqrt())
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<Document>) -> Result<()> {
    const MAX_BYTES: u64 = 256 * 1024;
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Ok(()),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name == "target" || name == "node_modules" {
            continue;
        }
        if path.is_dir() {
            walk(root, &path, out)?;
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if meta.len() > MAX_BYTES {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else { continue };
        let tokens = tokenize(&content);
        let term_freq = term_frequencies(&tokens);
        out.push(Document { path, content, term_freq });
    }
    Ok(())
}

#[async_trait]
impl IndexClient for TfIdfIndex {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let query_tf = term_frequencies(&tokenize(query));
        let idf = self.idf.read().unwrap();
        let documents = self.documents.read().unwrap();
        let mut hits: Vec<SearchHit> = documents
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let score = self.score(&query_tf, &doc.term_freq, &idf);
                let rel = doc.path.strip_prefix(&self.root).unwrap_or(&doc.path);
                SearchHit { doc_id: format!("doc-{i}"), path: rel.to_string_lossy().into_owned(), score }
            })
            .filter(|h| h.score > 0.0)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(20);
        Ok(hits)
    }

    async fn tree(&self, max_depth: usize) -> Result<String> {
        let documents = self.documents.read().unwrap();
        let mut paths: Vec<String> = documents
            .iter()
            .map(|d| d.path.strip_prefix(&self.root).unwrap_or(&d.path).to_string_lossy().into_owned())
            .filter(|p| p.matches('/').count() <= max_depth)
            .collect();
        paths.sort();
        Ok(paths.join("\n"))
    }

    async fn open_snippet(&self, path: &str) -> Result<Option<String>> {
        let documents = self.documents.read().unwrap();
        let target = self.root.join(path);
        Ok(documents
            .iter()
            .find(|d| d.path == target)
            .map(|d| d.content.chars().take(4000).collect()))
    }

    async fn symbols(&self, path: &str) -> Result<Option<String>> {
        if path.ends_with(".html") || path.ends_with(".css") || path.ends_with(".md") {
            return Ok(None);
        }
        let documents = self.documents.read().unwrap();
        let target = self.root.join(path);
        Ok(documents.iter().find(|d| d.path == target).map(|d| {
            d.term_freq
                .keys()
                .filter(|t| t.chars().next().map(|c| c.is_alphabetic()).unwrap_or(false))
                .take(20)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        }))
    }

    async fn ast(&self, path: &str) -> Result<Option<String>> {
        self.symbols(path).await.map(|s| s.map(|_| "Program".to_string()))
    }

    async fn impact_graph(&self, path: &str) -> Result<Option<String>> {
        if path.ends_with(".html") || path.ends_with(".md") {
            return Ok(None);
        }
        Ok(Some(String::new()))
    }

    async fn memory_recall(&self, _request: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_profile(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let documents = self.documents.read().unwrap();
        Ok(IndexStats { last_updated_epoch_ms: 0, num_docs: documents.len() })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn tokenize_splits_camel_case() {
        let tokens = tokenize("handleClickEvent and fooBar");
        assert!(tokens.contains(&"handle".to_string()));
        assert!(tokens.contains(&"click".to_string()));
        assert!(tokens.contains(&"event".to_string()));
    }

    #[tokio::test]
    async fn search_ranks_exact_term_match_first() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("auth.rs"), "fn login_user() { authenticate(); }").unwrap();
        std::fs::write(dir.path().join("unrelated.rs"), "fn render_button() {}").unwrap();
        let index = TfIdfIndex::build(dir.path()).unwrap();
        let hits = index.search("authenticate login").await.unwrap();
        assert_eq!(hits[0].path, "auth.rs");
    }

    #[tokio::test]
    async fn stats_counts_indexed_documents() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn b() {}").unwrap();
        let index = TfIdfIndex::build(dir.path()).unwrap();
        let stats = index.stats().await.unwrap();
        assert_eq!(stats.num_docs, 2);
    }
}
