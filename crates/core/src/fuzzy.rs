//! FZF v2 fuzzy matching with a 64-bit bitmask pre-filter for O(1) candidate
//! rejection and Smith-Waterman dynamic programming for scoring with
//! CamelCase, delimiter, and consecutive character bonuses.
//!
//! Backs `directory_search`'s fuzzy `pattern` matching (§4.8). Text and file
//! search go through the inverted index (`store.rs`) instead — this module
//! only needs to rank a workspace's directory tree, which is too small and
//! too volatile to justify its own tantivy segment.

use crate::scan::DirectoryRecord;
use rayon::prelude::*;
use serde::Serialize;
use std::time::Instant;

// ---------------------------------------------------------------------------
// Scoring constants (fzf v2)
// ---------------------------------------------------------------------------

const SCORE_MATCH: i32 = 16;
const SCORE_GAP_START: i32 = -3;
const SCORE_GAP_EXTENSION: i32 = -1;
const BONUS_BOUNDARY: i32 = 8;
const BONUS_CAMEL_CASE: i32 = 7;
const BONUS_CONSECUTIVE: i32 = 4;
const BONUS_FIRST_CHAR_MULTIPLIER: i32 = 2;
const BONUS_BOUNDARY_WHITE: i32 = 10;
const BONUS_BOUNDARY_DELIMITER: i32 = 9;

#[derive(Clone, Copy, PartialEq)]
enum CharClass {
    Lower,
    Upper,
    Digit,
    White,
    Delimiter,
    NonWord,
}

fn char_class(b: u8) -> CharClass {
    match b {
        b'a'..=b'z' => CharClass::Lower,
        b'A'..=b'Z' => CharClass::Upper,
        b'0'..=b'9' => CharClass::Digit,
        b' ' | b'\t' | b'\n' | b'\r' => CharClass::White,
        b'/' | b'_' | b'-' | b'.' | b':' | b';' | b'|' | b'>' => CharClass::Delimiter,
        _ => CharClass::NonWord,
    }
}

fn compute_bonus(prev: CharClass, curr: CharClass) -> i32 {
    match prev {
        CharClass::White => match curr {
            CharClass::White => 0,
            _ => BONUS_BOUNDARY_WHITE,
        },
        CharClass::Delimiter => match curr {
            CharClass::Delimiter => 0,
            _ => BONUS_BOUNDARY_DELIMITER,
        },
        CharClass::NonWord => match curr {
            CharClass::NonWord => 0,
            _ => BONUS_BOUNDARY,
        },
        CharClass::Lower => match curr {
            CharClass::Upper => BONUS_CAMEL_CASE,
            _ => 0,
        },
        CharClass::Digit => match curr {
            CharClass::Lower | CharClass::Upper => BONUS_BOUNDARY,
            _ => 0,
        },
        CharClass::Upper => 0,
    }
}

/// Compute a 64-bit character bitmask for O(1) rejection of non-matching
/// candidates. a-z -> bits 0-25, 0-9 -> bits 26-35, specials -> bits 36-39.
pub fn char_bitmask(s: &str) -> u64 {
    let mut mask: u64 = 0;
    for &b in s.as_bytes() {
        let idx = match b {
            b'a'..=b'z' => (b - b'a') as u32,
            b'A'..=b'Z' => (b.to_ascii_lowercase() - b'a') as u32,
            b'0'..=b'9' => (b - b'0') as u32 + 26,
            b'_' => 36,
            b'-' => 37,
            b'.' => 38,
            b'/' => 39,
            _ => continue,
        };
        mask |= 1u64 << idx;
    }
    mask
}

#[inline]
fn chars_match(text_byte: u8, pattern_byte: u8, case_sensitive: bool) -> bool {
    if case_sensitive {
        text_byte == pattern_byte
    } else {
        text_byte.eq_ignore_ascii_case(&pattern_byte)
    }
}

fn find_substring(text: &[u8], pattern: &[u8], case_sensitive: bool) -> Option<usize> {
    if pattern.is_empty() {
        return Some(0);
    }
    if pattern.len() > text.len() {
        return None;
    }
    'outer: for i in 0..=text.len() - pattern.len() {
        for (j, &pb) in pattern.iter().enumerate() {
            if !chars_match(text[i + j], pb, case_sensitive) {
                continue 'outer;
            }
        }
        return Some(i);
    }
    None
}

/// Smith-Waterman DP fuzzy matcher (fzf v2 style). Returns `(score, matched
/// byte indices)` or `None` if `pattern` is not a subsequence of `text`.
pub fn fuzzy_score_v2(text: &str, pattern: &str, case_sensitive: bool) -> Option<(f64, Vec<usize>)> {
    if pattern.is_empty() {
        return Some((0.0, vec![]));
    }
    let tb = text.as_bytes();
    let pb = pattern.as_bytes();
    let m = pb.len();
    let n = tb.len();
    if m > n {
        return None;
    }

    let mut pi = 0;
    let mut end_bound = 0;
    for (i, &b) in tb.iter().enumerate() {
        if pi < m && chars_match(b, pb[pi], case_sensitive) {
            pi += 1;
            end_bound = i;
        }
    }
    if pi < m {
        return None;
    }

    pi = m;
    let mut start_bound = end_bound;
    for i in (0..=end_bound).rev() {
        if pi > 0 && chars_match(tb[i], pb[pi - 1], case_sensitive) {
            pi -= 1;
            start_bound = i;
        }
    }

    let w = end_bound - start_bound + 1;

    let mut bonus = vec![0i32; w];
    for (j, slot) in bonus.iter_mut().enumerate() {
        let pos = start_bound + j;
        let prev_class = if pos == 0 { CharClass::White } else { char_class(tb[pos - 1]) };
        *slot = compute_bonus(prev_class, char_class(tb[pos]));
    }

    if let Some(sub_pos) = find_substring(&tb[start_bound..=end_bound], pb, case_sensitive) {
        let abs_pos = start_bound + sub_pos;
        let mut score = SCORE_MATCH * m as i32;
        let first_bonus = if abs_pos == 0 {
            compute_bonus(CharClass::White, char_class(tb[0]))
        } else {
            compute_bonus(char_class(tb[abs_pos - 1]), char_class(tb[abs_pos]))
        };
        score += first_bonus * BONUS_FIRST_CHAR_MULTIPLIER;
        for k in 1..m {
            let b = if abs_pos + k < start_bound + w { bonus[abs_pos + k - start_bound] } else { 0 };
            score += std::cmp::max(b, BONUS_CONSECUTIVE);
        }
        let indices: Vec<usize> = (abs_pos..abs_pos + m).collect();
        return Some((score as f64, indices));
    }

    let mut h = vec![i32::MIN / 2; m * w];
    let mut c = vec![0u16; m * w];
    let mut dir = vec![false; m * w];

    for i in 0..m {
        let mut in_gap = false;
        for j in 0..w {
            let pos = start_bound + j;
            let idx = i * w + j;

            if chars_match(tb[pos], pb[i], case_sensitive) {
                let mut score = SCORE_MATCH;
                let b = bonus[j];
                let prev_consec = if i > 0 && j > 0 { c[(i - 1) * w + (j - 1)] } else { 0 };

                if prev_consec > 0 {
                    score += std::cmp::max(b, BONUS_CONSECUTIVE);
                } else {
                    score += b;
                }
                if i == 0 {
                    score += b * (BONUS_FIRST_CHAR_MULTIPLIER - 1);
                }

                let diag = if i > 0 && j > 0 {
                    h[(i - 1) * w + (j - 1)]
                } else if i == 0 {
                    0
                } else {
                    i32::MIN / 2
                };
                let left = if j > 0 {
                    h[idx - 1] + if in_gap { SCORE_GAP_EXTENSION } else { SCORE_GAP_START }
                } else {
                    i32::MIN / 2
                };
                let match_score = diag.saturating_add(score);

                if match_score >= left {
                    h[idx] = match_score;
                    c[idx] = prev_consec + 1;
                    dir[idx] = true;
                } else {
                    h[idx] = left;
                    c[idx] = 0;
                    dir[idx] = false;
                }
                in_gap = false;
            } else {
                h[idx] = if j > 0 {
                    h[idx - 1] + if in_gap { SCORE_GAP_EXTENSION } else { SCORE_GAP_START }
                } else {
                    i32::MIN / 2
                };
                c[idx] = 0;
                dir[idx] = false;
                in_gap = true;
            }
        }
    }

    let last_row = (m - 1) * w;
    let mut best_score = i32::MIN;
    let mut best_j = 0;
    for j in 0..w {
        if h[last_row + j] > best_score {
            best_score = h[last_row + j];
            best_j = j;
        }
    }
    if best_score <= 0 {
        return None;
    }

    let mut indices = Vec::with_capacity(m);
    let mut i = m - 1;
    let mut j = best_j;
    loop {
        let idx = i * w + j;
        if dir[idx] {
            indices.push(start_bound + j);
            if i == 0 {
                break;
            }
            i -= 1;
            j -= 1;
        } else {
            if j == 0 {
                break;
            }
            j -= 1;
        }
    }
    indices.reverse();

    if indices.len() != m {
        return None;
    }
    Some((best_score as f64, indices))
}

// ---------------------------------------------------------------------------
// Directory search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryHit {
    #[serde(flatten)]
    pub record: DirectoryRecord,
    pub score: f64,
    pub matched_indices: Vec<usize>,
}

/// Rank directories by fuzzy match against `pattern` on the directory name.
/// `pattern` is treated as a regex when `use_regex` is set, otherwise as an
/// fzf-style fuzzy pattern.
pub fn fuzzy_search_directories(
    dirs: &[DirectoryRecord],
    pattern: &str,
    use_regex: bool,
    include_hidden: bool,
    max_results: usize,
) -> Result<Vec<DirectoryHit>, regex::Error> {
    let candidates: Vec<&DirectoryRecord> =
        dirs.iter().filter(|d| include_hidden || !d.is_hidden).collect();

    let mut hits: Vec<DirectoryHit> = if use_regex {
        let re = regex::Regex::new(pattern)?;
        candidates
            .into_iter()
            .filter(|d| re.is_match(&d.name) || re.is_match(&d.path))
            .map(|d| DirectoryHit { record: d.clone(), score: 1.0, matched_indices: vec![] })
            .collect()
    } else {
        let lower_pattern = pattern.to_lowercase();
        let pattern_mask = char_bitmask(&lower_pattern);
        candidates
            .into_par_iter()
            .filter_map(|d| {
                let name_mask = char_bitmask(&d.name.to_lowercase());
                if (pattern_mask & name_mask) != pattern_mask {
                    return None;
                }
                let (score, indices) = fuzzy_score_v2(&d.name, &lower_pattern, false)?;
                Some(DirectoryHit { record: d.clone(), score, matched_indices: indices })
            })
            .collect()
    };

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(max_results);
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(path: &str, file_count: usize) -> DirectoryRecord {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        let parent = path.rsplit_once('/').map(|(p, _)| p.to_string()).unwrap_or_default();
        DirectoryRecord {
            path: path.to_string(),
            name,
            parent,
            depth: path.split('/').count(),
            file_count,
            subdir_count: 0,
            is_hidden: path.split('/').any(|s| s.starts_with('.')),
        }
    }

    #[test]
    fn fuzzy_matches_camel_case_boundary() {
        let score = fuzzy_score_v2("SearchModule", "SM", true);
        assert!(score.is_some());
        assert!(score.unwrap().0 > 0.0);
    }

    #[test]
    fn non_matching_pattern_returns_none() {
        assert!(fuzzy_score_v2("hello", "xyz", false).is_none());
    }

    #[test]
    fn directory_search_excludes_hidden_by_default() {
        let dirs = vec![dir("src/core", 3), dir(".git/hooks", 0)];
        let hits = fuzzy_search_directories(&dirs, "core", false, false, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.path, "src/core");
    }

    #[test]
    fn directory_search_regex_mode() {
        let dirs = vec![dir("src/core", 1), dir("src/utils", 1)];
        let hits = fuzzy_search_directories(&dirs, "^co", true, false, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.name, "core");
    }
}
