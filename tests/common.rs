use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use pdfcompare::geo::Rect;
use pdfcompare::parse::{ExtractError, RawDocument, RawPage, RawWord, WordExtractor};

const WORDS_PER_LINE: usize = 6;
const LINES_PER_PAGE: usize = 20;
const CELL_WIDTH: f32 = 80.0;
const LINE_HEIGHT: f32 = 15.0;

/// Lay a whitespace-separated text out as a synthetic multi-page word
/// stream: six words per line, twenty lines per page.
pub fn doc_from_text(path: impl Into<PathBuf>, text: &str) -> RawDocument {
    let mut pages: Vec<RawPage> = Vec::new();
    for (i, word) in text.split_whitespace().enumerate() {
        let line = i / WORDS_PER_LINE;
        let col = i % WORDS_PER_LINE;
        let page = line / LINES_PER_PAGE;
        let line_in_page = line % LINES_PER_PAGE;

        if pages.len() <= page {
            pages.push(RawPage {
                width: 612.0,
                height: 792.0,
                words: Vec::new(),
            });
        }
        let x = 40.0 + col as f32 * CELL_WIDTH;
        let y = 40.0 + line_in_page as f32 * LINE_HEIGHT;
        pages[page].words.push(RawWord {
            text: word.to_string(),
            bbox: Rect::new(x, y, x + 9.0 * word.len() as f32, y + 12.0),
        });
    }
    if pages.is_empty() {
        pages.push(RawPage {
            width: 612.0,
            height: 792.0,
            words: Vec::new(),
        });
    }
    RawDocument {
        path: path.into(),
        pages,
    }
}

/// `count` distinct non-stop-word tokens: "tango0 tango1 ...".
pub fn numbered_words(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{prefix}{i}")).collect()
}

/// In-memory word extractor for pipeline tests: no PDFs involved, but the
/// same seam the production extractor plugs into.
#[derive(Default)]
pub struct FakeExtractor {
    docs: HashMap<PathBuf, RawDocument>,
    encrypted: Vec<PathBuf>,
    pub parses: AtomicUsize,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_doc(mut self, path: impl Into<PathBuf>, text: &str) -> Self {
        let path = path.into();
        self.docs.insert(path.clone(), doc_from_text(path, text));
        self
    }

    pub fn with_raw(mut self, doc: RawDocument) -> Self {
        self.docs.insert(doc.path.clone(), doc);
        self
    }

    pub fn with_encrypted(mut self, path: impl Into<PathBuf>) -> Self {
        self.encrypted.push(path.into());
        self
    }

    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::Relaxed)
    }
}

impl WordExtractor for FakeExtractor {
    fn extract_words(&self, path: &Path) -> Result<RawDocument, ExtractError> {
        if self.encrypted.iter().any(|p| p == path) {
            return Err(ExtractError::Encrypted);
        }
        self.parses.fetch_add(1, Ordering::Relaxed);
        self.docs
            .get(path)
            .cloned()
            .ok_or_else(|| ExtractError::Unreadable(format!("no such document: {}", path.display())))
    }
}
