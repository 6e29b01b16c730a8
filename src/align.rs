use crate::models::{Alignment, Highlight, ResolvedHeading};
use tracing::debug;

pub const DEFAULT_PREFIX_CHARS: usize = 50;
pub const DEFAULT_MAX_EDITS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchParams {
    /// Characters of highlight text used as the search key.
    pub prefix_chars: usize,
    /// Levenshtein edits tolerated between key and markup.
    pub max_edits: usize,
}

impl Default for MatchParams {
    fn default() -> Self {
        MatchParams {
            prefix_chars: DEFAULT_PREFIX_CHARS,
            max_edits: DEFAULT_MAX_EDITS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentOutcome {
    pub alignment: Alignment,
    /// Highlights whose key could not be found in the markup.
    pub unmatched: usize,
}

pub fn search_key(text: &str, prefix_chars: usize) -> String {
    let prefix: String = text.trim().chars().take(prefix_chars).collect();
    prefix.trim().to_string()
}

/// Start byte offset of the first approximate occurrence of `pattern` in
/// `text`, allowing up to `max_edits` insertions, deletions or substitutions.
///
/// Exact occurrences are tried first. Otherwise the pattern is cut into
/// `max_edits + 1` pieces: any match within the budget leaves one piece
/// intact, so only windows around exact piece hits are searched. Each window
/// runs Sellers' column-wise edit-distance recurrence, reporting the start of
/// the earliest-ending match.
pub fn fuzzy_find(pattern: &str, text: &str, max_edits: usize) -> Option<usize> {
    if pattern.is_empty() {
        return None;
    }
    if let Some(idx) = text.find(pattern) {
        return Some(idx);
    }

    let pattern: Vec<char> = pattern.chars().collect();
    // A key this short matches nearly anywhere once edits are allowed.
    if pattern.len() <= 2 * max_edits {
        return None;
    }

    candidate_windows(&pattern, text, max_edits)
        .into_iter()
        .find_map(|(from, to)| sellers_find(&pattern, &text[from..to], max_edits).map(|idx| from + idx))
}

/// Byte ranges of `text` that can hold a match, sorted and non-overlapping.
fn candidate_windows(pattern: &[char], text: &str, max_edits: usize) -> Vec<(usize, usize)> {
    let pieces = max_edits + 1;
    let piece_len = pattern.len() / pieces;
    // Wide enough for the whole match on either side of a piece hit.
    let margin = (pattern.len() + max_edits) * 4;

    let mut windows: Vec<(usize, usize)> = Vec::new();
    for i in 0..pieces {
        let from = i * piece_len;
        let to = if i + 1 == pieces { pattern.len() } else { from + piece_len };
        let piece: String = pattern[from..to].iter().collect();

        for (idx, _) in text.match_indices(piece.as_str()) {
            windows.push((
                floor_char_boundary(text, idx.saturating_sub(margin)),
                ceil_char_boundary(text, idx + piece.len() + margin),
            ));
        }
    }

    windows.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(windows.len());
    for (from, to) in windows {
        match merged.last_mut() {
            Some(last) if from <= last.1 => last.1 = last.1.max(to),
            _ => merged.push((from, to)),
        }
    }
    merged
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, idx: usize) -> usize {
    let mut idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn sellers_find(pattern: &[char], text: &str, max_edits: usize) -> Option<usize> {
    let m = pattern.len();

    // cost[i]: edits aligning pattern[..i] to a suffix of the text read so far.
    // start[i]: byte offset where that alignment begins.
    let mut cost: Vec<usize> = (0..=m).collect();
    let mut start: Vec<usize> = vec![0; m + 1];
    let mut next_cost = vec![0; m + 1];
    let mut next_start = vec![0; m + 1];

    for (offset, ch) in text.char_indices() {
        let after = offset + ch.len_utf8();
        next_cost[0] = 0;
        next_start[0] = after;

        for i in 1..=m {
            let substitute = cost[i - 1] + usize::from(pattern[i - 1] != ch);
            let insert = cost[i] + 1;
            let delete = next_cost[i - 1] + 1;

            if substitute <= insert && substitute <= delete {
                next_cost[i] = substitute;
                next_start[i] = start[i - 1];
            } else if insert <= delete {
                next_cost[i] = insert;
                next_start[i] = start[i];
            } else {
                next_cost[i] = delete;
                next_start[i] = next_start[i - 1];
            }
        }

        if next_cost[m] <= max_edits {
            return Some(next_start[m]);
        }

        std::mem::swap(&mut cost, &mut next_cost);
        std::mem::swap(&mut start, &mut next_start);
    }

    None
}

/// Index of the last heading positioned at or before `offset`.
pub fn heading_at(headings: &[ResolvedHeading], offset: usize) -> Option<usize> {
    match headings.partition_point(|h| h.position <= offset) {
        0 => None,
        n => Some(n - 1),
    }
}

/// Resolves the heading of every highlight. `headings` must be sorted by
/// position.
pub fn align_highlights(
    highlights: &[Highlight],
    headings: &[ResolvedHeading],
    markup: &str,
    params: MatchParams,
) -> AlignmentOutcome {
    let mut unmatched = 0;

    let alignment = highlights
        .iter()
        .map(|highlight| {
            let key = search_key(&highlight.text, params.prefix_chars);
            match fuzzy_find(&key, markup, params.max_edits) {
                Some(offset) => heading_at(headings, offset),
                None => {
                    unmatched += 1;
                    debug!(key = %key, "Highlight not found in book markup");
                    None
                }
            }
        })
        .collect();

    AlignmentOutcome {
        alignment,
        unmatched,
    }
}
