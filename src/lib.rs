//! Textual overlap detection between a target PDF and a pool of reference
//! PDFs.
//!
//! The comparison runs in two phases. Phase A builds an inverted n-gram
//! index over the normalised reference pool and scans the target against it,
//! clustering fingerprint collisions into gap-tolerant candidate blocks.
//! Phase B refines each block with a Smith-Waterman local alignment over
//! token equality, producing match records that carry per-page highlight
//! rectangles and a confidence score. Normalised word records are cached on
//! disk keyed by file content, so re-running against an unchanged reference
//! pool skips PDF parsing entirely.
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::atomic::AtomicBool;
//! use pdfcompare::{build_index, compare, no_progress, CompareParams, PdfExtractor};
//!
//! # fn run() -> Result<(), pdfcompare::PipelineError> {
//! let cancel = AtomicBool::new(false);
//! let refs = vec![PathBuf::from("refs/a.pdf"), PathBuf::from("refs/b.pdf")];
//! let params = CompareParams::default();
//!
//! let build = build_index(&refs, params.seed_size, &PdfExtractor, None, &no_progress, &cancel)?;
//! let result = compare(
//!     "target.pdf".as_ref(),
//!     &build.index,
//!     &params,
//!     &PdfExtractor,
//!     &no_progress,
//!     &cancel,
//! )?;
//! for m in &result.matches {
//!     println!("ref {} covers target words {:?}", m.ref_doc, m.target_range);
//! }
//! # Ok(())
//! # }
//! ```

pub mod align;
pub mod cache;
pub mod fuzzy;
pub mod geo;
pub mod logging;
pub mod matcher;
pub mod normalize;
pub mod parse;
pub mod pipeline;
pub mod search_index;

pub use align::{MatchRecord, PageRects};
pub use cache::CachePersister;
pub use normalize::{normalize, Document};
pub use parse::{ExtractError, PdfExtractor, RawDocument, WordExtractor};
pub use pipeline::{
    build_index, compare, no_progress, source_color, CompareParams, CompareResult, IndexBuild,
    MatchMode, Phase, PipelineError, Progress, SkipReason, SkippedDoc,
};
pub use search_index::IndexStore;

use std::path::Path;
use std::sync::atomic::AtomicBool;

/// One-call convenience wrapper: index the references, then compare the
/// target against them, with the default extractor and the default cache
/// location.
pub fn compare_files(
    target: &Path,
    refs: &[std::path::PathBuf],
    params: &CompareParams,
) -> Result<(CompareResult, Vec<SkippedDoc>), PipelineError> {
    let cancel = AtomicBool::new(false);
    let cache = CachePersister::default_dir().map(CachePersister::new);
    let build = build_index(
        refs,
        params.seed_size,
        &PdfExtractor,
        cache.as_ref(),
        &no_progress,
        &cancel,
    )?;
    let result = compare(
        target,
        &build.index,
        params,
        &PdfExtractor,
        &no_progress,
        &cancel,
    )?;
    Ok((result, build.skipped))
}
