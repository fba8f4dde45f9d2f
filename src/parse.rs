use std::path::{Path, PathBuf};

use lopdf::{Dictionary, Document, Encoding, Error as LopdfError, Object};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::geo::{multiply_matrices, pre_translate, transform_point, Matrix, Rect, IDENTITY_MATRIX};
use crate::logging::PDF_PARSING;

/// A word as reported by the text engine, in reading order, before any
/// normalisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawWord {
    pub text: String,
    pub bbox: Rect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPage {
    pub width: f32,
    pub height: f32,
    pub words: Vec<RawWord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub path: PathBuf,
    pub pages: Vec<RawPage>,
}

impl RawDocument {
    pub fn word_count(&self) -> usize {
        self.pages.iter().map(|p| p.words.len()).sum()
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unreadable pdf: {0}")]
    Unreadable(String),
    #[error("encrypted pdf")]
    Encrypted,
}

/// The single pluggable seam between the comparison core and whatever
/// produces the word stream.
pub trait WordExtractor: Sync {
    fn extract_words(&self, path: &Path) -> Result<RawDocument, ExtractError>;
}

/// lopdf-backed extractor. Walks each page's content stream with a
/// graphics-state stack, tracks the text matrix, and splits shown text into
/// words at spaces and large kerning jumps.
#[derive(Debug, Default)]
pub struct PdfExtractor;

impl WordExtractor for PdfExtractor {
    fn extract_words(&self, path: &Path) -> Result<RawDocument, ExtractError> {
        let doc = Document::load(path).map_err(|e| ExtractError::Unreadable(e.to_string()))?;
        if doc.is_encrypted() {
            return Err(ExtractError::Encrypted);
        }

        let mut pages = Vec::new();
        for (page_num, page_id) in doc.get_pages() {
            match extract_page(&doc, page_id) {
                Ok(page) => pages.push(page),
                Err(e) => {
                    // A single bad page does not sink the document.
                    warn!(target: PDF_PARSING, page = page_num, error = %e, "skipping undecodable page");
                }
            }
        }
        Ok(RawDocument {
            path: path.to_path_buf(),
            pages,
        })
    }
}

// Glyph advances are estimated from the font size alone. Highlight
// rectangles only need line-level accuracy, not metric-exact widths.
const AVG_GLYPH_WIDTH_EM: f32 = 0.5;
const SPACE_WIDTH_EM: f32 = 0.25;
const ASCENT_EM: f32 = 0.8;
const DESCENT_EM: f32 = 0.2;

#[derive(Clone)]
struct TextState {
    size: f32,
    char_space: f32,
    word_space: f32,
    scale: f32,
    leading: f32,
}

impl Default for TextState {
    fn default() -> Self {
        TextState {
            size: 0.0,
            char_space: 0.0,
            word_space: 0.0,
            scale: 1.0,
            leading: 0.0,
        }
    }
}

#[derive(Clone)]
struct GraphicsState {
    ctm: Matrix,
    text: TextState,
}

struct WordAssembler {
    words: Vec<RawWord>,
    pending: String,
    start_x: f32,
    cursor_x: f32,
    baseline_y: f32,
    size: f32,
}

impl WordAssembler {
    fn new() -> Self {
        WordAssembler {
            words: Vec::new(),
            pending: String::new(),
            start_x: 0.0,
            cursor_x: 0.0,
            baseline_y: 0.0,
            size: 0.0,
        }
    }

    fn push_char(&mut self, ch: char, x: f32, y: f32, advance: f32, size: f32) {
        if self.pending.is_empty() {
            self.start_x = x;
            self.baseline_y = y;
            self.size = size;
        }
        self.pending.push(ch);
        self.cursor_x = x + advance;
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.pending);
        self.words.push(RawWord {
            text,
            bbox: Rect {
                x0: self.start_x,
                y0: self.baseline_y - DESCENT_EM * self.size,
                x1: self.cursor_x,
                y1: self.baseline_y + ASCENT_EM * self.size,
            },
        });
    }
}

fn operand_as_float(obj: &Object) -> f32 {
    match obj {
        Object::Integer(i) => *i as f32,
        Object::Real(f) => *f,
        _ => 0.0,
    }
}

fn matrix_from_operands(op: &lopdf::content::Operation) -> Matrix {
    let v: Vec<f32> = op.operands.iter().map(operand_as_float).collect();
    if v.len() == 6 {
        Matrix {
            a: v[0],
            b: v[1],
            c: v[2],
            d: v[3],
            e: v[4],
            f: v[5],
        }
    } else {
        IDENTITY_MATRIX
    }
}

fn page_media_box(page_dict: &Dictionary) -> Rect {
    page_dict
        .get(b"MediaBox")
        .ok()
        .and_then(|obj| obj.as_array().ok())
        .map(|arr| {
            let mut b = [0.0f32; 4];
            for (i, obj) in arr.iter().take(4).enumerate() {
                b[i] = operand_as_float(obj);
            }
            Rect::new(b[0], b[1], b[2], b[3])
        })
        .unwrap_or(Rect::new(0.0, 0.0, 612.0, 792.0))
}

fn page_resources<'a>(doc: &'a Document, page_dict: &'a Dictionary) -> Option<&'a Dictionary> {
    let obj = page_dict.get(b"Resources").ok()?;
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok(),
        Object::Dictionary(d) => Some(d),
        _ => None,
    }
}

fn font_encodings<'a>(
    doc: &'a Document,
    resources: Option<&'a Dictionary>,
) -> BTreeMap<Vec<u8>, Encoding<'a>> {
    let mut encodings = BTreeMap::new();
    let Some(resources) = resources else {
        return encodings;
    };
    if let Ok(fonts_dict) = resources.get(b"Font").and_then(Object::as_dict) {
        for (name, obj) in fonts_dict.iter() {
            if let Ok(ref_id) = obj.as_reference() {
                if let Ok(font_obj) = doc.get_object(ref_id) {
                    if let Ok(font_dict) = font_obj.as_dict() {
                        if let Ok(encoding) = font_dict.get_font_encoding(doc) {
                            encodings.insert(name.clone(), encoding);
                        }
                    }
                }
            }
        }
    }
    encodings
}

fn extract_page(doc: &Document, page_id: (u32, u16)) -> Result<RawPage, LopdfError> {
    let content = doc.get_and_decode_page_content(page_id)?;
    let page_dict = doc.get_dictionary(page_id)?;
    let media_box = page_media_box(page_dict);
    let resources = page_resources(doc, page_dict);
    let encodings = font_encodings(doc, resources);

    let mut gs_stack = vec![GraphicsState {
        ctm: IDENTITY_MATRIX,
        text: TextState::default(),
    }];
    let mut tm = IDENTITY_MATRIX;
    let mut tlm = IDENTITY_MATRIX;
    let mut current_encoding: Option<&Encoding> = None;
    let mut assembler = WordAssembler::new();

    for op in &content.operations {
        let gs = gs_stack.last_mut().expect("graphics state stack underflow");
        match op.operator.as_ref() {
            "q" => {
                let top = gs.clone();
                gs_stack.push(top);
            }
            "Q" => {
                if gs_stack.len() > 1 {
                    gs_stack.pop();
                }
            }
            "cm" => {
                let m = matrix_from_operands(op);
                gs.ctm = multiply_matrices(&m, &gs.ctm);
            }
            "BT" => {
                assembler.flush();
                tm = IDENTITY_MATRIX;
                tlm = IDENTITY_MATRIX;
            }
            "ET" => assembler.flush(),
            "Tf" => {
                if let (Some(Object::Name(font_name)), Some(size_obj)) =
                    (op.operands.first(), op.operands.get(1))
                {
                    gs.text.size = operand_as_float(size_obj);
                    current_encoding = encodings.get(font_name);
                    if current_encoding.is_none() {
                        debug!(target: PDF_PARSING, font = ?String::from_utf8_lossy(font_name), "no encoding for font");
                    }
                }
            }
            "Tc" => {
                if let Some(obj) = op.operands.first() {
                    gs.text.char_space = operand_as_float(obj);
                }
            }
            "Tw" => {
                if let Some(obj) = op.operands.first() {
                    gs.text.word_space = operand_as_float(obj);
                }
            }
            "Tz" => {
                if let Some(obj) = op.operands.first() {
                    gs.text.scale = operand_as_float(obj) / 100.0;
                }
            }
            "TL" => {
                if let Some(obj) = op.operands.first() {
                    gs.text.leading = operand_as_float(obj);
                }
            }
            "Tm" => {
                assembler.flush();
                tm = matrix_from_operands(op);
                tlm = tm;
            }
            "Td" => {
                assembler.flush();
                if let (Some(tx), Some(ty)) = (op.operands.first(), op.operands.get(1)) {
                    tlm = pre_translate(tlm, operand_as_float(tx), operand_as_float(ty));
                    tm = tlm;
                }
            }
            "TD" => {
                assembler.flush();
                if let (Some(tx), Some(ty)) = (op.operands.first(), op.operands.get(1)) {
                    gs.text.leading = -operand_as_float(ty);
                    tlm = pre_translate(tlm, operand_as_float(tx), operand_as_float(ty));
                    tm = tlm;
                }
            }
            "T*" => {
                assembler.flush();
                tlm = pre_translate(tlm, 0.0, -gs.text.leading);
                tm = tlm;
            }
            "Tj" | "TJ" | "'" | "\"" => {
                if op.operator == "'" || op.operator == "\"" {
                    assembler.flush();
                    tlm = pre_translate(tlm, 0.0, -gs.text.leading);
                    tm = tlm;
                }
                show_text(
                    &op.operands,
                    &gs.text,
                    &gs.ctm,
                    &mut tm,
                    current_encoding,
                    &mut assembler,
                );
            }
            _ => {}
        }
    }
    assembler.flush();

    // Flip to top-left coordinates.
    let page_height = media_box.y1;
    let words = assembler
        .words
        .into_iter()
        .map(|w| RawWord {
            bbox: Rect {
                x0: w.bbox.x0,
                y0: page_height - w.bbox.y1,
                x1: w.bbox.x1,
                y1: page_height - w.bbox.y0,
            },
            text: w.text,
        })
        .collect();

    Ok(RawPage {
        width: media_box.width(),
        height: media_box.height(),
        words,
    })
}

fn show_text(
    operands: &[Object],
    ts: &TextState,
    ctm: &Matrix,
    tm: &mut Matrix,
    encoding: Option<&Encoding>,
    assembler: &mut WordAssembler,
) {
    for operand in operands {
        match operand {
            Object::String(bytes, _) => {
                let decoded = match encoding {
                    Some(enc) => match Document::decode_text(enc, bytes) {
                        Ok(text) => text,
                        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
                    },
                    None => String::from_utf8_lossy(bytes).into_owned(),
                };
                for ch in decoded.chars() {
                    let advance = if ch == ' ' {
                        SPACE_WIDTH_EM * ts.size * ts.scale + ts.char_space + ts.word_space
                    } else {
                        AVG_GLYPH_WIDTH_EM * ts.size * ts.scale + ts.char_space
                    };
                    if ch.is_whitespace() {
                        assembler.flush();
                    } else {
                        let (x, y) = transform_point(tm.e, tm.f, ctm);
                        assembler.push_char(ch, x, y, advance, ts.size);
                    }
                    tm.e += advance;
                }
            }
            Object::Integer(i) => {
                let offset = -(*i as f32) / 1000.0 * ts.size * ts.scale;
                // A large kerning jump acts as an implicit space.
                if offset > 0.2 * ts.size {
                    assembler.flush();
                }
                tm.e += offset;
            }
            Object::Real(f) => {
                let offset = -f / 1000.0 * ts.size * ts.scale;
                if offset > 0.2 * ts.size {
                    assembler.flush();
                }
                tm.e += offset;
            }
            Object::Array(arr) => {
                show_text(arr, ts, ctm, tm, encoding, assembler);
            }
            _ => {}
        }
    }
}
