use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::geo::Rect;
use crate::logging::ALIGNMENT;
use crate::matcher::CandidateBlock;
use crate::normalize::Document;
use crate::pipeline::{CompareParams, PipelineError};
use crate::search_index::IndexStore;

// Classic Smith-Waterman scoring over token equality.
const MATCH_SCORE: i32 = 2;
const MISMATCH_PENALTY: i32 = -1;
const GAP_PENALTY: i32 = -1;

/// Refined alignments below this confidence are dropped.
pub const MIN_CONFIDENCE: f32 = 0.4;

const MATCH_ID_SEED: u64 = 0x414c_4947;

/// Highlight rectangles for one page. Never crosses a page boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRects {
    pub page: u32,
    pub rects: Vec<Rect>,
}

/// Durable Phase-B output: one refined overlap between the target and one
/// reference, with highlight-ready geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: u64,
    pub ref_doc: u32,
    /// Inclusive target token range.
    pub target_range: (u32, u32),
    /// Inclusive reference token range.
    pub ref_range: (u32, u32),
    pub score: i32,
    pub confidence: f32,
    /// Target-side highlight rectangles.
    pub rects: Vec<PageRects>,
    /// Reference-side highlight rectangles, for the jump-to-source view.
    pub ref_rects: Vec<PageRects>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SwAlignment {
    a_start: usize,
    a_end: usize,
    b_start: usize,
    b_end: usize,
    score: i32,
}

/// Smith-Waterman local alignment over token equality, row-major fill with a
/// zero floor, traceback from the maximum cell to the first zero. Returns
/// `None` when nothing aligns at all.
fn smith_waterman(a: &[&str], b: &[&str]) -> Option<SwAlignment> {
    let (m, n) = (a.len(), b.len());
    if m == 0 || n == 0 {
        return None;
    }

    let cols = n + 1;
    let mut matrix = vec![0i32; (m + 1) * cols];
    let mut max_score = 0;
    let mut max_pos = (0, 0);

    for i in 1..=m {
        let (prev_row, row) = matrix.split_at_mut(i * cols);
        let prev_row = &prev_row[(i - 1) * cols..];
        for j in 1..=n {
            let sub = if a[i - 1] == b[j - 1] {
                MATCH_SCORE
            } else {
                MISMATCH_PENALTY
            };
            let diag = prev_row[j - 1] + sub;
            let up = prev_row[j] + GAP_PENALTY;
            let left = row[j - 1] + GAP_PENALTY;
            let score = diag.max(up).max(left).max(0);
            row[j] = score;
            if score > max_score {
                max_score = score;
                max_pos = (i, j);
            }
        }
    }

    if max_score == 0 {
        return None;
    }

    let (mut i, mut j) = max_pos;
    let (mut a_start, mut a_end) = (usize::MAX, 0);
    let (mut b_start, mut b_end) = (usize::MAX, 0);
    while i > 0 && j > 0 && matrix[i * cols + j] > 0 {
        let score = matrix[i * cols + j];
        let sub = if a[i - 1] == b[j - 1] {
            MATCH_SCORE
        } else {
            MISMATCH_PENALTY
        };
        if score == matrix[(i - 1) * cols + j - 1] + sub {
            a_start = a_start.min(i - 1);
            a_end = a_end.max(i - 1);
            b_start = b_start.min(j - 1);
            b_end = b_end.max(j - 1);
            i -= 1;
            j -= 1;
        } else if score == matrix[(i - 1) * cols + j] + GAP_PENALTY {
            i -= 1;
        } else {
            j -= 1;
        }
    }

    if a_start == usize::MAX {
        return None;
    }
    Some(SwAlignment {
        a_start,
        a_end,
        b_start,
        b_end,
        score: max_score,
    })
}

fn stable_match_id(ref_doc: u32, t_start: u32, r_start: u32, score: i32) -> u64 {
    let mut bytes = [0u8; 16];
    bytes[0..4].copy_from_slice(&ref_doc.to_le_bytes());
    bytes[4..8].copy_from_slice(&t_start.to_le_bytes());
    bytes[8..12].copy_from_slice(&r_start.to_le_bytes());
    bytes[12..16].copy_from_slice(&score.to_le_bytes());
    xxh3_64_with_seed(&bytes, MATCH_ID_SEED)
}

/// Map an inclusive target token range back to per-page highlight
/// rectangles. Same-line boxes (y-midpoints within half a line height) are
/// unioned; the result is sorted by (page, y0, x0).
pub fn project_rects(doc: &Document, t_start: u32, t_end: u32) -> Vec<PageRects> {
    let mut by_page: BTreeMap<u32, Vec<Rect>> = BTreeMap::new();
    for token in &doc.tokens[t_start as usize..=t_end as usize] {
        let word = &doc.words[token.word_idx as usize];
        for fragment in &word.fragments {
            by_page.entry(fragment.page).or_default().push(fragment.bbox);
        }
    }

    by_page
        .into_iter()
        .map(|(page, mut rects)| {
            rects.sort_by(|a, b| a.y0.total_cmp(&b.y0).then(a.x0.total_cmp(&b.x0)));
            let mut merged: Vec<Rect> = Vec::with_capacity(rects.len());
            for rect in rects {
                match merged.last_mut() {
                    Some(last)
                        if (rect.y_mid() - last.y_mid()).abs()
                            <= 0.5 * rect.height().max(last.height()) =>
                    {
                        *last = last.union(&rect);
                    }
                    _ => merged.push(rect),
                }
            }
            merged.sort_by(|a, b| a.y0.total_cmp(&b.y0).then(a.x0.total_cmp(&b.x0)));
            PageRects {
                page,
                rects: merged,
            }
        })
        .collect()
}

/// Refine one candidate block. Returns `None` when the block degenerates or
/// falls under the confidence/span acceptance bar.
fn refine_block(
    block: &CandidateBlock,
    target: &Document,
    index: &IndexStore,
    params: &CompareParams,
) -> Option<MatchRecord> {
    let n = params.seed_size as u32;
    let ref_doc = index.doc(block.ref_doc);

    let (t_start, t_end, r_start, r_end, score, confidence) = if params.smith_waterman {
        let lookahead = params.context_lookahead;
        let t_lo = block.t_start.saturating_sub(lookahead);
        let t_hi = (block.t_end + lookahead).min(target.tokens.len() as u32 - 1);
        let r_lo = block.r_start.saturating_sub(lookahead);
        let r_hi = (block.r_end + lookahead).min(ref_doc.tokens.len() as u32 - 1);

        let a: Vec<&str> = target.tokens[t_lo as usize..=t_hi as usize]
            .iter()
            .map(|t| t.text.as_str())
            .collect();
        let b: Vec<&str> = ref_doc.tokens[r_lo as usize..=r_hi as usize]
            .iter()
            .map(|t| t.text.as_str())
            .collect();

        let aligned = smith_waterman(&a, &b)?;
        let denom = 2 * a.len().min(b.len()) as i32;
        let confidence = (aligned.score as f32 / denom.max(1) as f32).clamp(0.0, 1.0);
        (
            t_lo + aligned.a_start as u32,
            t_lo + aligned.a_end as u32,
            r_lo + aligned.b_start as u32,
            r_lo + aligned.b_end as u32,
            aligned.score,
            confidence,
        )
    } else {
        // Without refinement the block stands as-is, with a coverage-based
        // confidence heuristic.
        let span = block.target_span() as f32;
        let confidence = (0.5 + span / 20.0 * 0.5).min(1.0);
        let score = MATCH_SCORE * block.target_span() as i32;
        (
            block.t_start,
            block.t_end,
            block.r_start.min(ref_doc.tokens.len() as u32 - 1),
            block.r_end.min(ref_doc.tokens.len() as u32 - 1),
            score,
            confidence,
        )
    };

    if confidence < MIN_CONFIDENCE || t_end - t_start + 1 < n {
        debug!(
            target: ALIGNMENT,
            ref_doc = block.ref_doc,
            confidence,
            span = t_end - t_start + 1,
            "candidate rejected"
        );
        return None;
    }

    Some(MatchRecord {
        match_id: stable_match_id(block.ref_doc, t_start, r_start, score),
        ref_doc: block.ref_doc,
        target_range: (t_start, t_end),
        ref_range: (r_start, r_end),
        score,
        confidence,
        rects: project_rects(target, t_start, t_end),
        ref_rects: project_rects(ref_doc, r_start, r_end),
    })
}

/// Phase B: refine candidate blocks in parallel and restore deterministic
/// order. `on_block` receives the number of blocks finished so far, so the
/// caller can surface progress while workers run.
pub fn align_blocks(
    blocks: &[CandidateBlock],
    target: &Document,
    index: &IndexStore,
    params: &CompareParams,
    cancel: &AtomicBool,
    on_block: &(dyn Fn(usize) + Sync),
) -> Result<Vec<MatchRecord>, PipelineError> {
    let completed = std::sync::atomic::AtomicUsize::new(0);
    let mut matches: Vec<MatchRecord> = blocks
        .par_iter()
        .filter_map(|block| {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            let refined = refine_block(block, target, index, params);
            on_block(completed.fetch_add(1, Ordering::Relaxed) + 1);
            refined
        })
        .collect();

    if cancel.load(Ordering::Relaxed) {
        return Err(PipelineError::Cancelled);
    }

    matches.sort_by_key(|m| (m.ref_doc, m.target_range.0, m.ref_range.0));
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn align(a: &[&str], b: &[&str]) -> SwAlignment {
        smith_waterman(a, b).expect("alignment")
    }

    #[test]
    fn perfect_alignment_covers_both_sequences() {
        let s = ["a", "b", "c", "d", "e"];
        let got = align(&s, &s);
        assert_eq!((got.a_start, got.a_end), (0, 4));
        assert_eq!((got.b_start, got.b_end), (0, 4));
        assert_eq!(got.score, 10);
    }

    #[test]
    fn insertion_is_bridged_by_a_gap() {
        let a = ["a", "b", "x", "c", "d", "e"];
        let b = ["a", "b", "c", "d", "e"];
        let got = align(&a, &b);
        assert_eq!((got.a_start, got.a_end), (0, 5));
        assert_eq!((got.b_start, got.b_end), (0, 4));
        assert_eq!(got.score, 9);
    }

    #[test]
    fn substitution_is_absorbed() {
        let a = ["a", "b", "y", "d", "e"];
        let b = ["a", "b", "c", "d", "e"];
        let got = align(&a, &b);
        assert_eq!((got.a_start, got.a_end), (0, 4));
        assert_eq!((got.b_start, got.b_end), (0, 4));
        assert_eq!(got.score, 7);
    }

    #[test]
    fn disjoint_sequences_do_not_align() {
        let a = ["one", "two", "three"];
        let b = ["four", "five", "six"];
        assert!(smith_waterman(&a, &b).is_none());
    }

    #[test]
    fn empty_input_yields_none() {
        assert!(smith_waterman(&[], &["a"]).is_none());
        assert!(smith_waterman(&["a"], &[]).is_none());
    }

    #[test]
    fn local_alignment_ignores_unrelated_prefix() {
        let a = ["junk", "noise", "a", "b", "c"];
        let b = ["a", "b", "c", "tail"];
        let got = align(&a, &b);
        assert_eq!((got.a_start, got.a_end), (2, 4));
        assert_eq!((got.b_start, got.b_end), (0, 2));
        assert_eq!(got.score, 6);
    }

    #[test]
    fn match_id_is_stable_and_input_sensitive() {
        let a = stable_match_id(1, 10, 20, 42);
        let b = stable_match_id(1, 10, 20, 42);
        let c = stable_match_id(2, 10, 20, 42);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
