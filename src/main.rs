use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::{bail, Context};
use clap::Parser;

use pdfcompare::logging::init_logging;
use pdfcompare::{
    build_index, compare, source_color, CachePersister, CompareParams, MatchMode, PdfExtractor,
    Progress,
};

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "Detect textual overlap between a target PDF and a reference pool.",
    arg_required_else_help = true
)]
pub struct Args {
    /// Path to the target PDF
    #[clap(short, long)]
    pub target: PathBuf,

    /// Reference PDFs to compare against
    #[clap(required = true)]
    pub refs: Vec<PathBuf>,

    /// Seed n-gram size
    #[clap(long, default_value_t = 5)]
    pub seed_size: usize,

    /// Maximum target-word gap merged into one candidate block
    #[clap(long, default_value_t = 3)]
    pub merge_gap: usize,

    /// Tolerate single-word rewrites when seeding
    #[clap(long)]
    pub fuzzy: bool,

    /// Skip Smith-Waterman refinement
    #[clap(long)]
    pub no_sw: bool,

    /// Context words pulled into each alignment window
    #[clap(long, default_value_t = 10)]
    pub lookahead: u32,

    /// Cache directory (defaults to ~/.pdfcompare/index_cache)
    #[clap(long)]
    pub cache_dir: Option<PathBuf>,

    /// Disable the on-disk word-record cache
    #[clap(long)]
    pub no_cache: bool,

    /// Emit the full result as JSON on stdout
    #[clap(long)]
    pub json: bool,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let params = CompareParams {
        seed_size: args.seed_size,
        merge_gap: args.merge_gap,
        mode: if args.fuzzy {
            MatchMode::Fuzzy
        } else {
            MatchMode::Exact
        },
        smith_waterman: !args.no_sw,
        context_lookahead: args.lookahead,
    };

    let cache = if args.no_cache {
        None
    } else {
        match args.cache_dir.or_else(CachePersister::default_dir) {
            Some(dir) => Some(CachePersister::new(dir)),
            None => {
                bail!("no cache directory available; pass --cache-dir or --no-cache")
            }
        }
    };

    let cancel = AtomicBool::new(false);
    let progress = |p: Progress<'_>| {
        eprintln!("[{}] {}/{} {}", p.phase, p.current, p.total, p.message);
    };

    let build = build_index(
        &args.refs,
        params.seed_size,
        &PdfExtractor,
        cache.as_ref(),
        &progress,
        &cancel,
    )
    .context("indexing reference pool")?;

    for skipped in &build.skipped {
        eprintln!("skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    let stats = build.index.stats();
    eprintln!(
        "indexed {} reference(s), {} distinct n-grams, {} postings (~{} KiB)",
        stats.ref_docs,
        stats.distinct_grams,
        stats.postings,
        build.index.approx_memory() / 1024
    );

    let result = compare(
        &args.target,
        &build.index,
        &params,
        &PdfExtractor,
        &progress,
        &cancel,
    )
    .context("comparing target")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!(
        "{} match(es) over {} target words",
        result.matches.len(),
        result.target_word_count
    );
    for (ref_doc, score) in &result.per_ref_score {
        let name = result.ref_names[*ref_doc as usize].display();
        let [r, g, b] = source_color(*ref_doc);
        println!("  {name}: {:.1}% (colour #{r:02x}{g:02x}{b:02x})", score * 100.0);
    }
    for m in &result.matches {
        println!(
            "  match {:016x} ref {} target {}..={} confidence {:.2}",
            m.match_id, m.ref_doc, m.target_range.0, m.target_range.1, m.confidence
        );
    }

    Ok(())
}
