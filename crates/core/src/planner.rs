//! Query Planner (C2) — routes a `QueryRequest` to the cheapest sufficient
//! tier against the store (C1), merging/falling back per §4.2.
//!
//! Tier 1 (structured, symbol DB / file metadata) is handled by the callers
//! that already know they want `go_to_definition`/`recent_files`/
//! `directory_search` — this module covers the `search` family that routes
//! through tiers 2 and 3.

use crate::config::ScorerOverrides;
use crate::error::CoreResult;
use crate::scorer::{self, ScoringContext, Weights};
use crate::store::WorkspaceHandle;
use crate::types::{Hit, QueryMode, QueryResult};

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// When a Tier 2 result has fewer hits than this, Tier 3 (semantic) is
/// queried as a supplement, not a replacement, per §4.2.
const SEMANTIC_SUPPLEMENT_THRESHOLD: usize = 5;

/// The Smart Query Preprocessor's decision for `Auto` mode: which field/
/// search-type it picked and why, surfaced to callers as an `insight`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessDecision {
    pub mode: QueryMode,
    pub reason: String,
}

const OPERATOR_CHARS: &[char] = &['=', '!', '<', '>', '&', '|', '+', '-', '*', '/', ':'];

/// Inspect query text for operators, camelCase, quoted phrases, length and
/// punctuation, and pick the tier-2 search type `Auto` mode should use.
pub fn preprocess_query(text: &str) -> PreprocessDecision {
    let trimmed = text.trim();

    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() > 1 {
        return PreprocessDecision {
            mode: QueryMode::Exact,
            reason: "quoted phrase — exact match on content".into(),
        };
    }

    if looks_like_regex(trimmed) {
        return PreprocessDecision {
            mode: QueryMode::Regex,
            reason: "contains regex metacharacters — regex search on content".into(),
        };
    }

    if is_camel_or_snake_identifier(trimmed) {
        return PreprocessDecision {
            mode: QueryMode::Symbol,
            reason: "looks like a single identifier — symbol field search".into(),
        };
    }

    if trimmed.split_whitespace().count() == 1 && trimmed.len() <= 40 {
        return PreprocessDecision {
            mode: QueryMode::Exact,
            reason: "short single token — exact match on content".into(),
        };
    }

    PreprocessDecision { mode: QueryMode::Fuzzy, reason: "free-form text — fuzzy match on content".into() }
}

fn looks_like_regex(text: &str) -> bool {
    let regex_meta = ['^', '$', '\\', '[', ']', '(', ')', '{', '}', '+', '*', '?', '|'];
    text.chars().filter(|c| regex_meta.contains(c)).count() >= 2
}

fn is_camel_or_snake_identifier(text: &str) -> bool {
    if text.is_empty() || text.contains(char::is_whitespace) {
        return false;
    }
    let alnum_underscore = text.chars().all(|c| c.is_alphanumeric() || c == '_');
    if !alnum_underscore {
        return false;
    }
    let has_underscore = text.contains('_');
    let has_camel_boundary =
        text.chars().zip(text.chars().skip(1)).any(|(a, b)| a.is_lowercase() && b.is_uppercase());
    has_underscore || has_camel_boundary
}

/// Execute a query request against `handle`, routing through the tiers per
/// §4.2's mode table and fallback graph. Tier 2 hits are re-ranked by the
/// Scorer (C3, §4.3) before leaving the planner; Tier 3 (semantic) hits
/// already carry an embedding-similarity score and are left as-is.
pub fn execute(handle: &WorkspaceHandle, mode: QueryMode, text: &str, limit: usize, want_snippets: bool) -> CoreResult<QueryResult> {
    execute_with_weights(handle, mode, text, limit, want_snippets, &Weights::default())
}

/// Same as [`execute`], with explicit Scorer weights (e.g. loaded from a
/// workspace's `.codescope.toml` `ScorerOverrides`).
pub fn execute_with_weights(
    handle: &WorkspaceHandle,
    mode: QueryMode,
    text: &str,
    limit: usize,
    want_snippets: bool,
    weights: &Weights,
) -> CoreResult<QueryResult> {
    match mode {
        QueryMode::Exact => rerank_tier2(handle, handle.search_exact(text, limit, want_snippets)?, text, weights),
        QueryMode::Fuzzy => rerank_tier2(handle, handle.search_fuzzy(text, limit, want_snippets)?, text, weights),
        QueryMode::Regex => rerank_tier2(handle, handle.search_regex(text, limit, want_snippets)?, text, weights),
        QueryMode::Symbol => {
            let result = handle.search_symbol_field(text, limit, want_snippets)?;
            let result = if result.hits.is_empty() {
                // Fallback: symbol search with zero hits retries on content.
                handle.search(text, limit, want_snippets)?
            } else {
                result
            };
            rerank_tier2(handle, result, text, weights)
        }
        QueryMode::Semantic => {
            let start = Instant::now();
            let semantic_hits = handle.search_symbols_semantic(text, limit)?;
            Ok(semantic_to_query_result(semantic_hits, start))
        }
        QueryMode::Auto => {
            let decision = preprocess_query(text);
            let mut tier2 = execute_with_weights(handle, decision.mode, text, limit, want_snippets, weights)?;

            if tier2.hits.len() < SEMANTIC_SUPPLEMENT_THRESHOLD && handle.is_semantic_available() {
                let start = Instant::now();
                if let Ok(semantic_hits) = handle.search_symbols_semantic(text, limit) {
                    let supplement = semantic_to_query_result(semantic_hits, start);
                    tier2 = merge_results(tier2, supplement, limit);
                }
            }
            Ok(tier2)
        }
    }
}

/// Re-rank a Tier 2 result's hits through the Scorer, pulling per-hit
/// extension/mtime context from the store's file metadata.
fn rerank_tier2(handle: &WorkspaceHandle, result: QueryResult, query: &str, weights: &Weights) -> CoreResult<QueryResult> {
    let now_unix = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
    let is_interface_query = is_camel_or_snake_identifier(query.trim()) || query.trim().starts_with('I');

    let hits = scorer::rerank(result.hits, query, weights, now_unix, |path| {
        handle
            .get_file_by_path(path)
            .ok()
            .flatten()
            .map(|doc| ScoringContext { ext: doc.ext, last_modified: Some(doc.last_modified), is_interface_query })
            .unwrap_or(ScoringContext { ext: String::new(), last_modified: None, is_interface_query })
    });

    Ok(QueryResult { hits, ..result })
}

/// Build Scorer weights from a workspace's configured overrides.
pub fn weights_from_config(overrides: &ScorerOverrides) -> Weights {
    Weights::from_overrides(overrides)
}

fn semantic_to_query_result(hits: Vec<(String, usize, String, f32)>, start: Instant) -> QueryResult {
    let hits: Vec<Hit> = hits
        .into_iter()
        .map(|(path, start_line, snippet, score)| Hit {
            path,
            start_line,
            end_line: start_line,
            score: score as f64,
            snippet: Some(snippet),
            source: "tier3",
        })
        .collect();
    QueryResult { total: hits.len(), truncated: false, hits, elapsed_ms: start.elapsed().as_millis() as u64 }
}

/// Merge Tier 2 and Tier 3 hits, de-duplicated by `(path, start_line)`,
/// keeping the higher score when the same key appears in both (§4.2).
fn merge_results(primary: QueryResult, supplement: QueryResult, limit: usize) -> QueryResult {
    let mut merged: Vec<Hit> = Vec::new();

    for hit in primary.hits.into_iter().chain(supplement.hits.into_iter()) {
        let key = (hit.path.clone(), hit.start_line);
        if let Some(existing) = merged.iter_mut().find(|h: &&mut Hit| (h.path.clone(), h.start_line) == key) {
            if hit.score > existing.score {
                *existing = hit;
            }
        } else {
            merged.push(hit);
        }
    }

    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.start_line.cmp(&b.start_line))
    });
    merged.truncate(limit);

    QueryResult {
        total: merged.len(),
        truncated: merged.len() >= limit,
        hits: merged,
        elapsed_ms: primary.elapsed_ms.max(supplement.elapsed_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_phrase_routes_to_exact() {
        let d = preprocess_query("\"hello world\"");
        assert_eq!(d.mode, QueryMode::Exact);
    }

    #[test]
    fn camel_case_routes_to_symbol() {
        let d = preprocess_query("getUserById");
        assert_eq!(d.mode, QueryMode::Symbol);
    }

    #[test]
    fn snake_case_routes_to_symbol() {
        let d = preprocess_query("get_user_by_id");
        assert_eq!(d.mode, QueryMode::Symbol);
    }

    #[test]
    fn regex_like_text_routes_to_regex() {
        let d = preprocess_query("^foo.*bar$");
        assert_eq!(d.mode, QueryMode::Regex);
    }

    #[test]
    fn free_text_routes_to_fuzzy() {
        let d = preprocess_query("where is the login flow handled");
        assert_eq!(d.mode, QueryMode::Fuzzy);
    }

    #[test]
    fn merge_deduplicates_by_path_and_line_keeping_higher_score() {
        let primary = QueryResult {
            total: 1,
            truncated: false,
            elapsed_ms: 1,
            hits: vec![Hit { path: "a.rs".into(), start_line: 1, end_line: 1, score: 1.0, snippet: None, source: "tier2" }],
        };
        let supplement = QueryResult {
            total: 1,
            truncated: false,
            elapsed_ms: 1,
            hits: vec![Hit { path: "a.rs".into(), start_line: 1, end_line: 1, score: 5.0, snippet: None, source: "tier3" }],
        };
        let merged = merge_results(primary, supplement, 10);
        assert_eq!(merged.hits.len(), 1);
        assert_eq!(merged.hits[0].score, 5.0);
    }
}
