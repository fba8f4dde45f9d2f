use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::align::{align_blocks, MatchRecord};
use crate::cache::CachePersister;
use crate::fuzzy::FuzzyMatcher;
use crate::logging::{INDEX_BUILD, PIPELINE};
use crate::matcher::{cluster_hits, scan_seeds};
use crate::normalize::{normalize, Document};
use crate::parse::{ExtractError, WordExtractor};
use crate::search_index::IndexStore;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no usable target: {0}")]
    NoTarget(String),
    #[error("reference pool is empty")]
    EmptyPool,
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    #[error("cancelled")]
    Cancelled,
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

/// Why one reference document was left out of the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    Unreadable(String),
    Encrypted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unreadable(msg) => write!(f, "unreadable: {msg}"),
            SkipReason::Encrypted => write!(f, "encrypted"),
        }
    }
}

impl From<ExtractError> for SkipReason {
    fn from(value: ExtractError) -> Self {
        match value {
            ExtractError::Unreadable(msg) => SkipReason::Unreadable(msg),
            ExtractError::Encrypted => SkipReason::Encrypted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedDoc {
    pub path: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMode {
    Exact,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareParams {
    pub seed_size: usize,
    pub merge_gap: usize,
    pub mode: MatchMode,
    pub smith_waterman: bool,
    pub context_lookahead: u32,
}

impl Default for CompareParams {
    fn default() -> Self {
        CompareParams {
            seed_size: 5,
            merge_gap: 3,
            mode: MatchMode::Exact,
            smith_waterman: true,
            context_lookahead: 10,
        }
    }
}

impl CompareParams {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.seed_size < 2 {
            return Err(PipelineError::InvalidParam(format!(
                "seed_size must be at least 2, got {}",
                self.seed_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Index,
    Compare,
    Align,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Index => "index",
            Phase::Compare => "compare",
            Phase::Align => "align",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    pub phase: Phase,
    pub current: usize,
    pub total: usize,
    pub message: &'a str,
}

pub type ProgressFn = dyn Fn(Progress<'_>) + Sync;

/// Callback that drops every event, for hosts that don't care.
pub fn no_progress(_: Progress<'_>) {}

pub struct IndexBuild {
    pub index: IndexStore,
    pub skipped: Vec<SkippedDoc>,
}

/// Load one document through the cache, falling back to a full parse. A
/// corrupt cache entry is deleted and re-parsed; extraction failures bubble
/// up as the document's skip reason.
fn ingest_document(
    path: &Path,
    extractor: &dyn WordExtractor,
    cache: Option<&CachePersister>,
) -> Result<Document, SkipReason> {
    if let Some(cache) = cache {
        match cache.load(path) {
            Ok(Some(doc)) => return Ok(doc),
            Ok(None) => {}
            Err(e) => {
                warn!(target: INDEX_BUILD, path = %path.display(), error = %e, "corrupt cache entry, re-parsing");
                cache.remove(path);
            }
        }
    }

    let raw = extractor.extract_words(path)?;
    let doc = normalize(&raw);
    if let Some(cache) = cache {
        cache.store(path, &doc);
    }
    Ok(doc)
}

/// Index phase: ingest every reference (parallel across documents, serial
/// within one) and build the inverted n-gram index. Unreadable or encrypted
/// references are skipped, never fatal.
pub fn build_index(
    ref_paths: &[PathBuf],
    seed_size: usize,
    extractor: &dyn WordExtractor,
    cache: Option<&CachePersister>,
    progress: &ProgressFn,
    cancel: &AtomicBool,
) -> Result<IndexBuild, PipelineError> {
    if seed_size < 2 {
        return Err(PipelineError::InvalidParam(format!(
            "seed_size must be at least 2, got {seed_size}"
        )));
    }
    if ref_paths.is_empty() {
        return Err(PipelineError::EmptyPool);
    }

    let total = ref_paths.len();
    progress(Progress {
        phase: Phase::Index,
        current: 0,
        total,
        message: "indexing references",
    });

    let done = AtomicUsize::new(0);
    let results: Vec<Result<Document, SkipReason>> = ref_paths
        .par_iter()
        .map(|path| {
            if cancel.load(Ordering::Relaxed) {
                return Err(SkipReason::Unreadable("cancelled".into()));
            }
            let result = ingest_document(path, extractor, cache);
            let current = done.fetch_add(1, Ordering::Relaxed) + 1;
            progress(Progress {
                phase: Phase::Index,
                current,
                total,
                message: &path.display().to_string(),
            });
            result
        })
        .collect();

    if cancel.load(Ordering::Relaxed) {
        return Err(PipelineError::Cancelled);
    }

    let mut index = IndexStore::new(seed_size);
    let mut skipped = Vec::new();
    for (path, result) in ref_paths.iter().zip(results) {
        match result {
            Ok(doc) => {
                let doc_id = index.add_document(doc);
                info!(target: INDEX_BUILD, path = %path.display(), doc_id, "reference indexed");
            }
            Err(reason) => {
                warn!(target: INDEX_BUILD, path = %path.display(), %reason, "reference skipped");
                skipped.push(SkippedDoc {
                    path: path.clone(),
                    reason,
                });
            }
        }
    }

    Ok(IndexBuild { index, skipped })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompareResult {
    pub matches: Vec<MatchRecord>,
    /// Similarity per reference: matched target tokens / surviving target
    /// tokens. Every indexed reference appears, zero-scored or not.
    pub per_ref_score: BTreeMap<u32, f32>,
    pub ref_names: Vec<PathBuf>,
    /// Surviving (post-filter) target token count.
    pub target_word_count: u32,
}

/// Compare phase: extract and normalise the target, run Phase A seeding and
/// Phase B refinement, and assemble the deterministic result.
pub fn compare(
    target_path: &Path,
    index: &IndexStore,
    params: &CompareParams,
    extractor: &dyn WordExtractor,
    progress: &ProgressFn,
    cancel: &AtomicBool,
) -> Result<CompareResult, PipelineError> {
    params.validate()?;
    if params.seed_size != index.seed_size() {
        return Err(PipelineError::InvalidParam(format!(
            "seed_size {} does not match index seed size {}",
            params.seed_size,
            index.seed_size()
        )));
    }

    progress(Progress {
        phase: Phase::Compare,
        current: 0,
        total: 3,
        message: "extracting target",
    });
    let raw = extractor
        .extract_words(target_path)
        .map_err(|e| PipelineError::NoTarget(e.to_string()))?;
    let target = normalize(&raw);

    let empty = |index: &IndexStore, target: &Document| CompareResult {
        matches: Vec::new(),
        per_ref_score: (0..index.docs().len() as u32).map(|id| (id, 0.0)).collect(),
        ref_names: index.docs().iter().map(|d| d.path.clone()).collect(),
        target_word_count: target.tokens.len() as u32,
    };

    if target.tokens.is_empty() || index.is_empty() {
        progress(Progress {
            phase: Phase::Done,
            current: 1,
            total: 1,
            message: "nothing to compare",
        });
        return Ok(empty(index, &target));
    }

    let fuzzy = match params.mode {
        MatchMode::Fuzzy => {
            progress(Progress {
                phase: Phase::Compare,
                current: 1,
                total: 3,
                message: "building fuzzy neighbour table",
            });
            Some(FuzzyMatcher::build(index))
        }
        MatchMode::Exact => None,
    };

    progress(Progress {
        phase: Phase::Compare,
        current: 2,
        total: 3,
        message: "scanning seeds",
    });
    let hits = scan_seeds(&target, index, fuzzy.as_ref(), cancel)?;
    let blocks = cluster_hits(&hits, params.seed_size, params.merge_gap);
    info!(target: PIPELINE, hits = hits.len(), blocks = blocks.len(), "phase A complete");

    progress(Progress {
        phase: Phase::Align,
        current: 0,
        total: blocks.len(),
        message: "refining candidate blocks",
    });
    let matches = align_blocks(&blocks, &target, index, params, cancel, &|current| {
        progress(Progress {
            phase: Phase::Align,
            current,
            total: blocks.len(),
            message: "refining candidate blocks",
        });
    })?;
    validate_matches(&matches)?;

    // Per-reference similarity over unique matched target tokens. Overlaps
    // within one reference count once; across references they may double
    // count.
    let token_count = target.tokens.len();
    let mut matched: BTreeMap<u32, Vec<bool>> = BTreeMap::new();
    for m in &matches {
        let seen = matched
            .entry(m.ref_doc)
            .or_insert_with(|| vec![false; token_count]);
        for i in m.target_range.0..=m.target_range.1 {
            seen[i as usize] = true;
        }
    }
    let mut per_ref_score: BTreeMap<u32, f32> =
        (0..index.docs().len() as u32).map(|id| (id, 0.0)).collect();
    for (ref_doc, seen) in matched {
        let covered = seen.iter().filter(|&&s| s).count();
        per_ref_score.insert(ref_doc, covered as f32 / token_count as f32);
    }

    progress(Progress {
        phase: Phase::Done,
        current: 1,
        total: 1,
        message: "complete",
    });

    Ok(CompareResult {
        matches,
        per_ref_score,
        ref_names: index.docs().iter().map(|d| d.path.clone()).collect(),
        target_word_count: token_count as u32,
    })
}

/// Invariant sweep over the final matches. Violations mean a bug upstream
/// and surface immediately instead of producing quietly wrong highlights.
fn validate_matches(matches: &[MatchRecord]) -> Result<(), PipelineError> {
    for m in matches {
        if m.target_range.1 < m.target_range.0 || m.ref_range.1 < m.ref_range.0 {
            return Err(PipelineError::Internal(format!(
                "inverted range in match {:x}",
                m.match_id
            )));
        }
        if !(0.0..=1.0).contains(&m.confidence) {
            return Err(PipelineError::Internal(format!(
                "confidence {} out of bounds in match {:x}",
                m.confidence, m.match_id
            )));
        }
        for page in &m.rects {
            let sorted = page.rects.windows(2).all(|w| {
                (w[0].y0, w[0].x0) <= (w[1].y0, w[1].x0)
            });
            if !sorted {
                return Err(PipelineError::Internal(format!(
                    "unsorted rectangles on page {} in match {:x}",
                    page.page, m.match_id
                )));
            }
        }
    }
    Ok(())
}

const COLOR_SEED: u64 = 0x434f_4c52;

/// Deterministic per-source highlight colour, derived from the reference id
/// alone so it is stable across runs and processes.
pub fn source_color(ref_doc: u32) -> [u8; 3] {
    let h = xxh3_64_with_seed(&ref_doc.to_le_bytes(), COLOR_SEED);
    // Clamp channels away from both extremes so highlights stay legible.
    [
        64 + (h as u8 % 160),
        64 + ((h >> 8) as u8 % 160),
        64 + ((h >> 16) as u8 % 160),
    ]
}
