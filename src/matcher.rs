use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use tracing::debug;

use crate::fuzzy::FuzzyMatcher;
use crate::logging::SEED_SCAN;
use crate::normalize::Document;
use crate::pipeline::PipelineError;
use crate::search_index::{gram_fingerprint, IndexStore};

/// One fingerprint collision between the target and a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SeedHit {
    pub ref_doc: u32,
    pub target_start: u32,
    pub ref_start: u32,
}

/// A diagonally-coherent, gap-tolerant cluster of seed hits against a single
/// reference. Ranges are inclusive token indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateBlock {
    pub ref_doc: u32,
    pub t_start: u32,
    pub t_end: u32,
    pub r_start: u32,
    pub r_end: u32,
    pub seed_count: u32,
}

impl CandidateBlock {
    pub fn target_span(&self) -> u32 {
        self.t_end - self.t_start + 1
    }
}

/// Phase A scan: fingerprint every target n-gram and collect index
/// collisions, fanning the position space out across the thread pool. The
/// result is sorted by `(ref_doc, target_start, ref_start)` and deduplicated,
/// so worker scheduling cannot leak into the output.
pub fn scan_seeds(
    target: &Document,
    index: &IndexStore,
    fuzzy: Option<&FuzzyMatcher>,
    cancel: &AtomicBool,
) -> Result<Vec<SeedHit>, PipelineError> {
    let n = index.seed_size();
    if index.is_empty() || target.tokens.len() < n {
        return Ok(Vec::new());
    }
    let last_start = target.tokens.len() - n;

    let workers = rayon::current_num_threads().max(1);
    let chunk = (last_start / workers + 1).max(1);
    let chunk_starts: Vec<usize> = (0..=last_start).step_by(chunk).collect();

    let per_chunk: Vec<Vec<SeedHit>> = chunk_starts
        .par_iter()
        .map(|&start| {
            if cancel.load(Ordering::Relaxed) {
                return Vec::new();
            }
            let end = (start + chunk - 1).min(last_start);
            scan_range(target, index, fuzzy, start, end)
        })
        .collect();

    if cancel.load(Ordering::Relaxed) {
        return Err(PipelineError::Cancelled);
    }

    let mut hits: Vec<SeedHit> = per_chunk.into_iter().flatten().collect();
    hits.sort_unstable();
    hits.dedup();
    debug!(target: SEED_SCAN, hits = hits.len(), positions = last_start + 1, "seed scan complete");
    Ok(hits)
}

fn scan_range(
    target: &Document,
    index: &IndexStore,
    fuzzy: Option<&FuzzyMatcher>,
    start: usize,
    end: usize,
) -> Vec<SeedHit> {
    let n = index.seed_size();
    let mut hits = Vec::new();
    for i in start..=end {
        let gram = &target.tokens[i..i + n];
        match fuzzy {
            None => collect_hits(index, gram_fingerprint(gram), i, &mut hits),
            Some(matcher) => {
                for fp in matcher.expand(gram) {
                    collect_hits(index, fp, i, &mut hits);
                }
            }
        }
    }
    hits
}

fn collect_hits(index: &IndexStore, fingerprint: u64, target_start: usize, out: &mut Vec<SeedHit>) {
    for posting in index.lookup(fingerprint) {
        out.push(SeedHit {
            ref_doc: posting.doc,
            target_start: target_start as u32,
            ref_start: posting.pos,
        });
    }
}

/// Cluster sorted seed hits into candidate blocks.
///
/// Per reference, blocks stay open while a future hit could still merge into
/// them; a hit joins the eligible block whose `t_end` is nearest, ties going
/// to the earlier block. Closed blocks spanning fewer than `n` target words
/// are dropped.
pub fn cluster_hits(hits: &[SeedHit], n: usize, merge_gap: usize) -> Vec<CandidateBlock> {
    let window = (merge_gap + n) as i64;
    let span = (n - 1) as u32;

    let mut blocks: Vec<CandidateBlock> = Vec::new();
    let mut open: Vec<CandidateBlock> = Vec::new();
    let mut current_doc = None;

    let close = |block: CandidateBlock, out: &mut Vec<CandidateBlock>| {
        if block.target_span() >= n as u32 {
            out.push(block);
        }
    };

    for &hit in hits {
        if current_doc != Some(hit.ref_doc) {
            for block in open.drain(..) {
                close(block, &mut blocks);
            }
            current_doc = Some(hit.ref_doc);
        }

        // Hits arrive in ascending target order, so a block this far behind
        // can never merge again.
        while let Some(idx) = open
            .iter()
            .position(|b| hit.target_start as i64 - b.t_end as i64 > window)
        {
            let block = open.remove(idx);
            close(block, &mut blocks);
        }

        let mut best: Option<usize> = None;
        for (idx, block) in open.iter().enumerate() {
            let t_gap = hit.target_start as i64 - block.t_end as i64;
            let r_gap = hit.ref_start as i64 - block.r_end as i64;
            if t_gap <= window && r_gap <= window && hit.ref_start >= block.r_start {
                let dist = t_gap.abs();
                let better = match best {
                    None => true,
                    Some(b) => dist < (hit.target_start as i64 - open[b].t_end as i64).abs(),
                };
                if better {
                    best = Some(idx);
                }
            }
        }

        match best {
            Some(idx) => {
                let block = &mut open[idx];
                block.t_end = block.t_end.max(hit.target_start + span);
                block.r_end = block.r_end.max(hit.ref_start + span);
                block.seed_count += 1;
            }
            None => open.push(CandidateBlock {
                ref_doc: hit.ref_doc,
                t_start: hit.target_start,
                t_end: hit.target_start + span,
                r_start: hit.ref_start,
                r_end: hit.ref_start + span,
                seed_count: 1,
            }),
        }
    }
    for block in open.drain(..) {
        close(block, &mut blocks);
    }

    blocks.sort_unstable_by_key(|b| (b.ref_doc, b.t_start, b.r_start));
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(ref_doc: u32, target_start: u32, ref_start: u32) -> SeedHit {
        SeedHit {
            ref_doc,
            target_start,
            ref_start,
        }
    }

    #[test]
    fn empty_hits_yield_no_blocks() {
        assert!(cluster_hits(&[], 5, 3).is_empty());
    }

    #[test]
    fn single_hit_becomes_a_minimal_block() {
        let blocks = cluster_hits(&[hit(0, 10, 4)], 5, 3);
        assert_eq!(
            blocks,
            vec![CandidateBlock {
                ref_doc: 0,
                t_start: 10,
                t_end: 14,
                r_start: 4,
                r_end: 8,
                seed_count: 1,
            }]
        );
    }

    #[test]
    fn consecutive_diagonal_hits_merge() {
        let hits: Vec<SeedHit> = (0..10).map(|i| hit(0, i, i)).collect();
        let blocks = cluster_hits(&hits, 5, 3);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].t_start, 0);
        assert_eq!(blocks[0].t_end, 13);
        assert_eq!(blocks[0].seed_count, 10);
    }

    #[test]
    fn gap_beyond_window_splits_blocks() {
        // With n=5 and merge_gap=3 the window is 8; a 20-word jump splits.
        let hits = vec![hit(0, 0, 0), hit(0, 30, 30)];
        let blocks = cluster_hits(&hits, 5, 3);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn reference_regression_opens_a_new_block() {
        // Second hit goes backwards in the reference: not monotone.
        let hits = vec![hit(0, 0, 50), hit(0, 3, 10)];
        let blocks = cluster_hits(&hits, 5, 3);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn hits_against_different_refs_never_merge() {
        let hits = vec![hit(0, 0, 0), hit(1, 1, 1)];
        let blocks = cluster_hits(&hits, 5, 3);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].ref_doc, 0);
        assert_eq!(blocks[1].ref_doc, 1);
    }

    #[test]
    fn hit_joins_nearest_open_block() {
        // Two open diagonals for the same reference; the late hit at target
        // 12 is closer to the second block's tail.
        let hits = vec![hit(0, 0, 0), hit(0, 6, 40), hit(0, 12, 46)];
        let blocks = cluster_hits(&hits, 5, 3);
        assert_eq!(blocks.len(), 2);
        let second = blocks.iter().find(|b| b.r_start == 40).expect("block");
        assert_eq!(second.seed_count, 2);
        assert_eq!(second.t_end, 16);
    }

    #[test]
    fn blocks_sorted_by_ref_then_target() {
        let hits = vec![hit(1, 0, 0), hit(0, 20, 5), hit(0, 0, 0)];
        let mut sorted = hits.clone();
        sorted.sort_unstable();
        let blocks = cluster_hits(&sorted, 5, 3);
        let keys: Vec<(u32, u32)> = blocks.iter().map(|b| (b.ref_doc, b.t_start)).collect();
        let mut expected = keys.clone();
        expected.sort_unstable();
        assert_eq!(keys, expected);
    }
}
