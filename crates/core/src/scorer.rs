//! Scorer (C3) — multi-factor re-ranking of Tier 2 hits.
//!
//! The weights below carry forward the BM25-lite constants the teacher's
//! `grep_relevance_score` used for its filename/definition-file/position
//! bonuses, generalized into named, independently-overridable factors per
//! the config's `ScorerOverrides`.

use crate::config::ScorerOverrides;
use crate::types::Hit;

const SECONDS_PER_DAY: f64 = 86_400.0;
const RECENCY_SATURATION_DAYS: f64 = 90.0;

const DEBOOSTED_PATH_SEGMENTS: &[&str] =
    &["/test/", "/tests/", "/mock/", "/mocks/", "/.git/", "/node_modules/", "/dist/", "/build/", "/target/", "/out/"];

const BINARY_EXTENSIONS: &[&str] =
    &["png", "jpg", "jpeg", "gif", "ico", "zip", "tar", "gz", "exe", "dll", "so", "bin", "pdf", "woff", "woff2"];

const DEFINITION_EXTENSIONS: &[&str] = &["h", "hpp", "hxx", "pyi"];

/// Re-rank weights, seeded from defaults and overridable per workspace.
#[derive(Debug, Clone, Copy)]
pub struct Weights {
    /// Multiplicative penalty (0..1) applied to hits under a deboosted path.
    pub path_deboost: f64,
    /// Additive bonus when the filename contains a query term.
    pub filename_boost: f64,
    /// Additive bonus, saturating over `RECENCY_SATURATION_DAYS`.
    pub recency_boost: f64,
    /// Additive bonus for a literal phrase match.
    pub exact_match_boost: f64,
    /// Multiplicative penalty (0..1) applied to mock/test-named types when
    /// the query looks like an interface/type name search.
    pub mock_deboost: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self { path_deboost: 0.5, filename_boost: 15.0, recency_boost: 8.0, exact_match_boost: 20.0, mock_deboost: 0.4 }
    }
}

impl Weights {
    pub fn from_overrides(overrides: &ScorerOverrides) -> Self {
        let defaults = Self::default();
        Self {
            path_deboost: overrides.path_deboost.unwrap_or(defaults.path_deboost),
            filename_boost: overrides.filename_boost.unwrap_or(defaults.filename_boost),
            recency_boost: overrides.recency_boost.unwrap_or(defaults.recency_boost),
            exact_match_boost: overrides.exact_match_boost.unwrap_or(defaults.exact_match_boost),
            mock_deboost: overrides.mock_deboost.unwrap_or(defaults.mock_deboost),
        }
    }
}

/// Per-hit context the scorer needs beyond the `Hit` itself — pulled from the
/// store's file metadata, since `Hit` doesn't carry extension/mtime.
#[derive(Debug, Clone, Default)]
pub struct ScoringContext {
    pub ext: String,
    pub last_modified: Option<i64>,
    pub is_interface_query: bool,
}

/// Compute the re-ranked score for one hit. Always non-negative.
pub fn score_hit(hit: &Hit, query: &str, ctx: &ScoringContext, weights: &Weights, now_unix: i64) -> f64 {
    let mut score = hit.score.max(0.0);
    let path_lower = hit.path.to_lowercase();
    let filename_lower =
        std::path::Path::new(&hit.path).file_name().and_then(|f| f.to_str()).unwrap_or("").to_lowercase();
    let query_lower = query.to_lowercase();

    if DEBOOSTED_PATH_SEGMENTS.iter().any(|seg| path_lower.contains(seg)) {
        score *= 1.0 - weights.path_deboost.clamp(0.0, 1.0);
    }

    if !query_lower.is_empty() && filename_lower.contains(&query_lower) {
        score += weights.filename_boost;
    }

    if DEFINITION_EXTENSIONS.contains(&ctx.ext.as_str()) {
        score += 5.0;
    } else if BINARY_EXTENSIONS.contains(&ctx.ext.as_str()) {
        score *= 0.1;
    }

    if let Some(last_modified) = ctx.last_modified {
        let age_days = ((now_unix - last_modified).max(0) as f64) / SECONDS_PER_DAY;
        let recency_factor = (1.0 - (age_days / RECENCY_SATURATION_DAYS)).clamp(0.0, 1.0);
        score += weights.recency_boost * recency_factor;
    }

    if let Some(snippet) = &hit.snippet {
        if !query.is_empty() && snippet.to_lowercase().contains(&query_lower) {
            score += weights.exact_match_boost;
        }
    }

    if ctx.is_interface_query
        && (filename_lower.contains("mock") || filename_lower.contains("fake") || filename_lower.contains("stub"))
    {
        score *= 1.0 - weights.mock_deboost.clamp(0.0, 1.0);
    }

    score.max(0.0)
}

/// Re-rank a hit list in place, using `context_for` to fetch per-hit
/// extension/mtime context (typically from the store's file metadata).
/// Ordering tie-break per §3: score desc, path asc, start_line asc.
pub fn rerank(
    mut hits: Vec<Hit>,
    query: &str,
    weights: &Weights,
    now_unix: i64,
    context_for: impl Fn(&str) -> ScoringContext,
) -> Vec<Hit> {
    for hit in &mut hits {
        let ctx = context_for(&hit.path);
        hit.score = score_hit(hit, query, &ctx, weights, now_unix);
    }
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.start_line.cmp(&b.start_line))
    });
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(path: &str, score: f64, snippet: Option<&str>) -> Hit {
        Hit { path: path.into(), start_line: 1, end_line: 1, score, snippet: snippet.map(String::from), source: "tier2" }
    }

    #[test]
    fn deboosts_test_directory_paths() {
        let weights = Weights::default();
        let ctx = ScoringContext { ext: "rs".into(), last_modified: None, is_interface_query: false };
        let normal = score_hit(&hit("src/lib.rs", 10.0, None), "lib", &ctx, &weights, 0);
        let test_path = score_hit(&hit("tests/lib.rs", 10.0, None), "lib", &ctx, &weights, 0);
        assert!(test_path < normal);
    }

    #[test]
    fn boosts_filename_matches() {
        let weights = Weights::default();
        let ctx = ScoringContext { ext: "rs".into(), last_modified: None, is_interface_query: false };
        let scored = score_hit(&hit("src/parser.rs", 10.0, None), "parser", &ctx, &weights, 0);
        assert!(scored > 10.0);
    }

    #[test]
    fn recency_saturates_after_90_days() {
        let weights = Weights::default();
        let now = 1_000_000i64;
        let fresh_ctx = ScoringContext { ext: "rs".into(), last_modified: Some(now), is_interface_query: false };
        let stale_ctx =
            ScoringContext { ext: "rs".into(), last_modified: Some(now - 365 * 86_400), is_interface_query: false };
        let fresh = score_hit(&hit("a.rs", 1.0, None), "x", &fresh_ctx, &weights, now);
        let stale = score_hit(&hit("a.rs", 1.0, None), "x", &stale_ctx, &weights, now);
        assert!(fresh > stale);
    }

    #[test]
    fn score_never_negative() {
        let weights = Weights::default();
        let ctx = ScoringContext { ext: "png".into(), last_modified: None, is_interface_query: false };
        let scored = score_hit(&hit("assets/tests/mock/icon.png", -5.0, None), "icon", &ctx, &weights, 0);
        assert!(scored >= 0.0);
    }

    #[test]
    fn rerank_is_deterministic_on_ties() {
        let weights = Weights::default();
        let hits = vec![hit("b.rs", 5.0, None), hit("a.rs", 5.0, None)];
        let reranked = rerank(hits, "", &weights, 0, |_| ScoringContext::default());
        assert_eq!(reranked[0].path, "a.rs");
    }
}
