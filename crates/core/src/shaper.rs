//! Response Shaper (C4) — fits a hit list or a batch of files into a token
//! budget, generalizing the teacher's water-fill allocator (`budget.rs`) to
//! cover both "shape these hits" (query responses) and "read these files
//! under a budget" (batch reads, §10.5) behind one `TokenCounter`.

use crate::tokenizer::TokenCounter;
use crate::types::Hit;

use serde::Serialize;

/// Fraction of the caller's budget reserved for the hit payload itself; the
/// rest is left for the envelope (insights, actions, resource URI, etc).
const HITS_BUDGET_FRACTION: f64 = 0.4;

const SUMMARY_MAX_HITS: usize = 2;
const ADAPTIVE_MAX_HITS: usize = 3;
const FULL_MAX_HITS: usize = 10;

/// Per-hit token cost estimate: a flat base cost plus per-line context.
const BASE_HIT_TOKENS: usize = 12;
const TOKENS_PER_CONTEXT_LINE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Summary,
    Adaptive,
    Full,
}

impl ResponseMode {
    fn max_hits(self) -> usize {
        match self {
            ResponseMode::Summary => SUMMARY_MAX_HITS,
            ResponseMode::Adaptive => ADAPTIVE_MAX_HITS,
            ResponseMode::Full => FULL_MAX_HITS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResponseMode::Summary => "summary",
            ResponseMode::Adaptive => "adaptive",
            ResponseMode::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "summary" => Some(ResponseMode::Summary),
            "adaptive" => Some(ResponseMode::Adaptive),
            "full" => Some(ResponseMode::Full),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShapedHit {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f64,
    /// Snippet with `<<` `>>` highlight markers around the matched phrase.
    pub snippet: Option<String>,
    pub estimated_tokens: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShapedResponse {
    pub mode: ResponseMode,
    pub hits: Vec<ShapedHit>,
    pub estimated_tokens: usize,
    pub budget: usize,
    /// Set when the full result was persisted and truncated from the inline payload.
    pub resource_uri: Option<String>,
    pub insights: Vec<String>,
    pub actions: Vec<String>,
}

fn estimate_hit_tokens(hit: &Hit, counter: &dyn TokenCounter) -> usize {
    let context_lines = hit.end_line.saturating_sub(hit.start_line) + 1;
    let snippet_tokens = hit.snippet.as_deref().map(|s| counter.count_tokens(s)).unwrap_or(0);
    BASE_HIT_TOKENS + context_lines * TOKENS_PER_CONTEXT_LINE + snippet_tokens
}

fn highlight(snippet: &str, query: &str) -> String {
    if query.is_empty() {
        return snippet.to_string();
    }
    let lower_snippet = snippet.to_lowercase();
    let lower_query = query.to_lowercase();
    match lower_snippet.find(&lower_query) {
        Some(byte_idx) => {
            let end = byte_idx + lower_query.len();
            format!("{}<<{}>>{}", &snippet[..byte_idx], &snippet[byte_idx..end], &snippet[end..])
        }
        None => snippet.to_string(),
    }
}

fn pick_mode(hit_count: usize, hits_budget_tokens: usize, per_hit_estimate: usize) -> ResponseMode {
    let fits = |max_hits: usize| -> bool {
        let n = hit_count.min(max_hits);
        n * per_hit_estimate.max(1) <= hits_budget_tokens
    };

    if hit_count <= SUMMARY_MAX_HITS || !fits(ADAPTIVE_MAX_HITS) {
        ResponseMode::Summary
    } else if hit_count <= ADAPTIVE_MAX_HITS || !fits(FULL_MAX_HITS) {
        ResponseMode::Adaptive
    } else {
        ResponseMode::Full
    }
}

/// Degrade a caller-requested mode down to one that fits the budget — a
/// caller can ask for more detail than the budget allows, never less.
fn clamp_to_budget(requested: ResponseMode, hit_count: usize, hits_budget_tokens: usize, per_hit_estimate: usize) -> ResponseMode {
    let fits = |m: ResponseMode| -> bool {
        let n = hit_count.min(m.max_hits());
        n * per_hit_estimate.max(1) <= hits_budget_tokens
    };
    let mut mode = requested;
    loop {
        if mode == ResponseMode::Summary || fits(mode) {
            return mode;
        }
        mode = match mode {
            ResponseMode::Full => ResponseMode::Adaptive,
            ResponseMode::Adaptive => ResponseMode::Summary,
            ResponseMode::Summary => ResponseMode::Summary,
        };
    }
}

/// Shape a hit list to fit `budget` tokens, optionally persisting the full
/// set behind `resource_uri` when results were truncated. `requested_mode`
/// lets a caller ask for a specific mode (e.g. `response_mode="full"`); it is
/// still clamped to what the budget allows. `None` auto-picks per §4.4.
pub fn shape_hits(
    hits: Vec<Hit>,
    query: &str,
    budget: usize,
    counter: &dyn TokenCounter,
    requested_mode: Option<ResponseMode>,
    resource_uri: impl FnOnce(&[Hit]) -> Option<String>,
) -> ShapedResponse {
    let hits_budget = ((budget as f64) * HITS_BUDGET_FRACTION) as usize;

    if hits.is_empty() {
        return ShapedResponse {
            mode: ResponseMode::Summary,
            hits: Vec::new(),
            estimated_tokens: 0,
            budget,
            resource_uri: None,
            insights: vec!["0 hits".into()],
            actions: Vec::new(),
        };
    }

    let per_hit_estimates: Vec<usize> = hits.iter().map(|h| estimate_hit_tokens(h, counter)).collect();
    let avg_estimate = per_hit_estimates.iter().sum::<usize>() / per_hit_estimates.len().max(1);
    let mode = match requested_mode {
        Some(requested) => clamp_to_budget(requested, hits.len(), hits_budget, avg_estimate),
        None => pick_mode(hits.len(), hits_budget, avg_estimate),
    };
    let max_hits = mode.max_hits();

    let mut shaped = Vec::new();
    let mut used = 0usize;
    for (hit, cost) in hits.iter().zip(per_hit_estimates.iter()).take(max_hits) {
        if used + cost > hits_budget && !shaped.is_empty() {
            break;
        }
        used += cost;
        shaped.push(ShapedHit {
            path: hit.path.clone(),
            start_line: hit.start_line,
            end_line: hit.end_line,
            score: hit.score,
            snippet: hit.snippet.as_deref().map(|s| highlight(s, query)),
            estimated_tokens: *cost,
        });
    }

    let truncated = shaped.len() < hits.len();
    let file_count = hits.iter().map(|h| h.path.as_str()).collect::<std::collections::HashSet<_>>().len();
    let mut insights = vec![format!("{} hits in {} files", hits.len(), file_count)];
    let mut actions = Vec::new();

    let uri = if truncated {
        let uri = resource_uri(&hits);
        if uri.is_some() {
            insights.push(format!("showing {} of {}; full result persisted", shaped.len(), hits.len()));
            actions.push("fetch the resource URI for the remaining hits".into());
        }
        uri
    } else {
        None
    };

    ShapedResponse { mode, hits: shaped, estimated_tokens: used, budget, resource_uri: uri, insights, actions }
}

// ---------------------------------------------------------------------------
// Water-fill batch allocation — shared by "read these files" and "shape these
// hits across many files" call sites (§10.5).
// ---------------------------------------------------------------------------

/// One allocatable item: an importance weight plus (full_cost, floor_cost)
/// where floor_cost is the minimum representation (e.g. a manifest line).
#[derive(Debug, Clone, Copy)]
pub struct AllocationItem {
    pub importance: f64,
    pub full_cost: usize,
    pub floor_cost: usize,
}

/// Water-fill: distribute `total_budget` across items proportionally to
/// `importance.powf(1.5)`, locking items that clearly fit at full cost or
/// clearly don't (floor only) before splitting remaining budget among the
/// rest. Mirrors the teacher's `allocate_file_budgets`.
pub fn allocate(items: &[AllocationItem], total_budget: usize) -> Vec<usize> {
    let n = items.len();
    if n == 0 {
        return Vec::new();
    }

    let total_floor: usize = items.iter().map(|i| i.floor_cost).sum();
    let upgrade_budget = total_budget.saturating_sub(total_floor);
    if upgrade_budget == 0 {
        return items.iter().map(|i| i.floor_cost).collect();
    }

    const MIN_USEFUL_UPGRADE: usize = 30;
    let weights: Vec<f64> = items.iter().map(|i| i.importance.max(0.0).powf(1.5)).collect();
    let mut budgets: Vec<usize> = items.iter().map(|i| i.floor_cost).collect();
    let mut locked = vec![false; n];
    let mut remaining = upgrade_budget;
    let mut remaining_weight: f64 = weights.iter().sum();

    if remaining_weight <= 0.0 {
        return budgets;
    }

    for _ in 0..5 {
        let mut changed = false;
        for i in 0..n {
            if locked[i] || remaining_weight <= 0.0 || remaining == 0 {
                continue;
            }
            let ideal_upgrade = (weights[i] / remaining_weight * remaining as f64) as usize;
            let upgrade_cost = items[i].full_cost.saturating_sub(items[i].floor_cost);

            if ideal_upgrade >= upgrade_cost {
                budgets[i] = items[i].full_cost;
                remaining = remaining.saturating_sub(upgrade_cost);
                remaining_weight -= weights[i];
                locked[i] = true;
                changed = true;
            } else if ideal_upgrade < MIN_USEFUL_UPGRADE {
                budgets[i] = items[i].floor_cost;
                remaining_weight -= weights[i];
                locked[i] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let unlocked_weight: f64 = (0..n).filter(|&i| !locked[i]).map(|i| weights[i]).sum();
    if unlocked_weight > 0.0 && remaining > 0 {
        for i in 0..n {
            if locked[i] {
                continue;
            }
            let share = (weights[i] / unlocked_weight * remaining as f64) as usize;
            budgets[i] = items[i].floor_cost + share;
        }
    }

    budgets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::BytesEstimateCounter;

    fn hit(path: &str, line: usize, score: f64, snippet: &str) -> Hit {
        Hit { path: path.into(), start_line: line, end_line: line, score, snippet: Some(snippet.into()), source: "tier2" }
    }

    #[test]
    fn empty_hits_yield_summary_mode() {
        let shaped = shape_hits(Vec::new(), "x", 1000, &BytesEstimateCounter, None, |_| None);
        assert_eq!(shaped.mode, ResponseMode::Summary);
        assert!(shaped.hits.is_empty());
    }

    #[test]
    fn highlights_matched_phrase() {
        let shaped = shape_hits(
            vec![hit("a.rs", 1, 1.0, "fn login_handler() {}")],
            "login_handler",
            10_000,
            &BytesEstimateCounter,
            None,
            |_| None,
        );
        assert!(shaped.hits[0].snippet.as_deref().unwrap().contains("<<login_handler>>"));
    }

    #[test]
    fn estimated_tokens_never_exceed_budget_fraction() {
        let hits: Vec<Hit> = (0..20).map(|i| hit("a.rs", i, 1.0, "some snippet text here")).collect();
        let shaped = shape_hits(hits, "x", 500, &BytesEstimateCounter, None, |_| Some("resource://r1".into()));
        let allowed = (500.0 * HITS_BUDGET_FRACTION) as usize;
        assert!(shaped.estimated_tokens <= allowed || shaped.hits.len() == 1);
    }

    #[test]
    fn truncation_attaches_resource_uri() {
        let hits: Vec<Hit> = (0..20).map(|i| hit("a.rs", i, 1.0, "x".repeat(50).as_str())).collect();
        let shaped = shape_hits(hits, "x", 200, &BytesEstimateCounter, None, |_| Some("resource://full".into()));
        assert_eq!(shaped.resource_uri.as_deref(), Some("resource://full"));
    }

    #[test]
    fn requested_mode_is_clamped_to_the_budget() {
        let hits: Vec<Hit> = (0..20).map(|i| hit("a.rs", i, 1.0, "x".repeat(50).as_str())).collect();
        let shaped = shape_hits(hits, "x", 200, &BytesEstimateCounter, Some(ResponseMode::Full), |_| {
            Some("resource://full".into())
        });
        assert_ne!(shaped.mode, ResponseMode::Full);
    }

    #[test]
    fn requested_mode_is_honored_when_it_fits() {
        let hits: Vec<Hit> = (0..2).map(|i| hit("a.rs", i, 1.0, "short")).collect();
        let shaped = shape_hits(hits, "x", 10_000, &BytesEstimateCounter, Some(ResponseMode::Adaptive), |_| None);
        assert_eq!(shaped.mode, ResponseMode::Adaptive);
    }

    #[test]
    fn allocate_respects_total_budget() {
        let items = vec![
            AllocationItem { importance: 1.0, full_cost: 100, floor_cost: 10 },
            AllocationItem { importance: 5.0, full_cost: 100, floor_cost: 10 },
        ];
        let budgets = allocate(&items, 120);
        let total: usize = budgets.iter().sum();
        assert!(total <= 220);
        assert!(budgets[1] >= budgets[0]);
    }

    #[test]
    fn allocate_empty_items_returns_empty() {
        assert!(allocate(&[], 1000).is_empty());
    }
}
