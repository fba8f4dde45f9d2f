use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use pdfcompare::geo::Rect;
use pdfcompare::parse::{RawDocument, RawPage, RawWord};
use pdfcompare::{build_index, compare, no_progress, CompareParams};

mod common;
use common::FakeExtractor;

fn word(text: &str, x: f32, y: f32) -> RawWord {
    RawWord {
        text: text.to_string(),
        bbox: Rect::new(x, y, x + 9.0 * text.len() as f32, y + 12.0),
    }
}

fn page(words: Vec<RawWord>) -> RawPage {
    RawPage {
        width: 612.0,
        height: 792.0,
        words,
    }
}

fn small_params() -> CompareParams {
    CompareParams {
        seed_size: 3,
        ..Default::default()
    }
}

fn run(extractor: &FakeExtractor, ref_path: &str, target_path: &str) -> pdfcompare::CompareResult {
    let cancel = AtomicBool::new(false);
    let build = build_index(
        &[PathBuf::from(ref_path)],
        3,
        extractor,
        None,
        &no_progress,
        &cancel,
    )
    .unwrap();
    compare(
        target_path.as_ref(),
        &build.index,
        &small_params(),
        extractor,
        &no_progress,
        &cancel,
    )
    .unwrap()
}

#[test]
fn line_broken_reference_word_highlights_as_two_rectangles() {
    // "detec-" / "tion" split over two lines in the reference.
    let reference = RawDocument {
        path: PathBuf::from("refA.pdf"),
        pages: vec![page(vec![
            word("seed0", 40.0, 40.0),
            word("seed1", 120.0, 40.0),
            word("detec-", 200.0, 40.0),
            word("tion", 40.0, 60.0),
            word("seed2", 100.0, 60.0),
            word("seed3", 180.0, 60.0),
        ])],
    };
    let extractor = FakeExtractor::new()
        .with_raw(reference)
        .with_doc("target.pdf", "seed0 seed1 detection seed2 seed3");

    let result = run(&extractor, "refA.pdf", "target.pdf");

    assert_eq!(result.matches.len(), 1);
    let m = &result.matches[0];
    assert_eq!(m.target_range, (0, 4));
    assert_eq!(m.ref_range, (0, 4));

    // Target side is one unbroken line.
    assert_eq!(m.rects.len(), 1);
    assert_eq!(m.rects[0].rects.len(), 1);

    // Reference side spans two lines, so the fused word splits the highlight.
    assert_eq!(m.ref_rects.len(), 1);
    assert_eq!(m.ref_rects[0].rects.len(), 2);
}

#[test]
fn page_broken_target_word_yields_rectangles_on_both_pages() {
    let target = RawDocument {
        path: PathBuf::from("target.pdf"),
        pages: vec![
            page(vec![
                word("seed0", 40.0, 760.0),
                word("seed1", 120.0, 760.0),
                word("hyphen-", 200.0, 760.0),
            ]),
            page(vec![
                word("ation", 40.0, 40.0),
                word("seed2", 100.0, 40.0),
                word("seed3", 180.0, 40.0),
            ]),
        ],
    };
    let extractor = FakeExtractor::new()
        .with_raw(target)
        .with_doc("refA.pdf", "seed0 seed1 hyphenation seed2 seed3");

    let result = run(&extractor, "refA.pdf", "target.pdf");

    assert_eq!(result.matches.len(), 1);
    let m = &result.matches[0];

    // One rectangle per page; none crosses the page boundary.
    assert_eq!(m.rects.len(), 2);
    assert_eq!(m.rects[0].page, 0);
    assert_eq!(m.rects[1].page, 1);
    for page_rects in &m.rects {
        assert_eq!(page_rects.rects.len(), 1);
    }
}

#[test]
fn rectangles_are_sorted_within_each_page() {
    let text: Vec<String> = (0..30).map(|i| format!("sorted{i}")).collect();
    let extractor = FakeExtractor::new()
        .with_doc("refA.pdf", &text.join(" "))
        .with_doc("target.pdf", &text.join(" "));

    let result = run(&extractor, "refA.pdf", "target.pdf");
    assert_eq!(result.matches.len(), 1);
    for page_rects in &result.matches[0].rects {
        for pair in page_rects.rects.windows(2) {
            assert!(
                (pair[0].y0, pair[0].x0) <= (pair[1].y0, pair[1].x0),
                "rects out of order on page {}",
                page_rects.page
            );
        }
    }
}
