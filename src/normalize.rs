use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::geo::Rect;
use crate::parse::RawDocument;

// English stop words, stored in normalised (lower-case, alphanumeric-only)
// form so membership is checked after token normalisation.
static STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "arent", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "cannot", "cant", "could", "couldnt", "did", "didnt", "do", "does", "doesnt",
    "doing", "dont", "down", "during", "each", "few", "for", "from", "further", "had", "hadnt",
    "has", "hasnt", "have", "havent", "having", "he", "hed", "hell", "her", "here", "heres",
    "hers", "herself", "hes", "him", "himself", "his", "how", "hows", "i", "id", "if", "ill",
    "im", "in", "into", "is", "isnt", "it", "its", "itself", "ive", "lets", "me", "more", "most",
    "mustnt", "my", "myself", "no", "nor", "not", "of", "off", "on", "once", "only", "or",
    "other", "ought", "our", "ours", "ourselves", "out", "over", "own", "same", "shant", "she",
    "shed", "shell", "shes", "should", "shouldnt", "so", "some", "such", "than", "that", "thats",
    "the", "their", "theirs", "them", "themselves", "then", "there", "theres", "these", "they",
    "theyd", "theyll", "theyre", "theyve", "this", "those", "through", "to", "too", "under",
    "until", "up", "very", "was", "wasnt", "we", "wed", "well", "were", "werent", "weve", "what",
    "whats", "when", "whens", "where", "wheres", "which", "while", "who", "whom", "whos", "why",
    "whys", "with", "wont", "would", "wouldnt", "you", "youd", "youll", "your", "youre", "yours",
    "yourself", "yourselves", "youve",
];

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// One on-page piece of a logical word. De-hyphenated words carry two
/// fragments, possibly on different pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordFragment {
    pub page: u32,
    pub bbox: Rect,
}

/// A logical word after de-hyphenation. `token` is empty when the word was
/// dropped by the filter; geometry is kept either way so matches over token
/// indices can be projected back to rectangles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub raw: String,
    pub token: String,
    pub fragments: Vec<WordFragment>,
}

/// A surviving normalised token. Its position in `Document::tokens` is the
/// dense `doc_word_idx`; `word_idx` points back into `Document::words`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub word_idx: u32,
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub path: PathBuf,
    pub pages: Vec<PageInfo>,
    pub words: Vec<Word>,
    pub tokens: Vec<Token>,
}

/// Lower-case and keep only alphanumeric characters. Idempotent.
pub fn normalize_token(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn keep_token(token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    if token.len() < 2 && token.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    !is_stop_word(token)
}

/// The word following a trailing hyphen continues it only across a line
/// break: a later page, a vertical drop, or an x reset on the same band.
fn is_line_break(cur: &WordFragment, next: &WordFragment) -> bool {
    if next.page != cur.page {
        return true;
    }
    next.bbox.y_mid() > cur.bbox.y1 || next.bbox.x0 < cur.bbox.x0
}

fn dehyphenate(flat: Vec<(String, WordFragment)>) -> Vec<Word> {
    let mut words = Vec::with_capacity(flat.len());
    let mut iter = flat.into_iter().peekable();
    while let Some((text, frag)) = iter.next() {
        let fuse = text.ends_with('-')
            && text.len() > 1
            && iter
                .peek()
                .map(|(_, next)| is_line_break(&frag, next))
                .unwrap_or(false);
        if fuse {
            let (next_text, next_frag) = iter.next().expect("peeked word");
            let mut raw = text;
            raw.pop();
            raw.push_str(&next_text);
            words.push(Word {
                raw,
                token: String::new(),
                fragments: vec![frag, next_frag],
            });
        } else {
            words.push(Word {
                raw: text,
                token: String::new(),
                fragments: vec![frag],
            });
        }
    }
    words
}

/// Turn a raw extraction into the normalised document the index and the
/// aligner operate on: de-hyphenate, normalise, filter, re-index densely.
pub fn normalize(raw: &RawDocument) -> Document {
    let mut flat = Vec::with_capacity(raw.word_count());
    for (page_idx, page) in raw.pages.iter().enumerate() {
        for word in &page.words {
            flat.push((
                word.text.clone(),
                WordFragment {
                    page: page_idx as u32,
                    bbox: word.bbox,
                },
            ));
        }
    }

    let mut words = dehyphenate(flat);
    let mut tokens = Vec::new();
    for (word_idx, word) in words.iter_mut().enumerate() {
        let token = normalize_token(&word.raw);
        if keep_token(&token) {
            word.token = token.clone();
            tokens.push(Token {
                text: token,
                word_idx: word_idx as u32,
            });
        }
    }

    Document {
        path: raw.path.clone(),
        pages: raw
            .pages
            .iter()
            .map(|p| PageInfo {
                width: p.width,
                height: p.height,
            })
            .collect(),
        words,
        tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{RawPage, RawWord};

    fn word(text: &str, x: f32, y: f32) -> RawWord {
        RawWord {
            text: text.to_string(),
            bbox: Rect::new(x, y, x + 10.0 * text.len() as f32, y + 12.0),
        }
    }

    fn single_page(words: Vec<RawWord>) -> RawDocument {
        RawDocument {
            path: PathBuf::from("test.pdf"),
            pages: vec![RawPage {
                width: 612.0,
                height: 792.0,
                words,
            }],
        }
    }

    #[test]
    fn stop_word_table_is_sorted() {
        let mut sorted = STOP_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOP_WORDS, "binary search needs a sorted table");
    }

    #[test]
    fn normalize_token_is_idempotent() {
        for input in ["Hello,", "WORLD!", "foo-bar", "Caf\u{00e9}", "42nd"] {
            let once = normalize_token(input);
            assert_eq!(normalize_token(&once), once);
        }
    }

    #[test]
    fn filters_stop_words_and_short_numbers() {
        let raw = single_page(vec![
            word("The", 10.0, 10.0),
            word("7", 60.0, 10.0),
            word("42", 90.0, 10.0),
            word("foxes", 120.0, 10.0),
        ]);
        let doc = normalize(&raw);
        let tokens: Vec<&str> = doc.tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(tokens, vec!["42", "foxes"]);
        assert_eq!(doc.words.len(), 4);
        assert!(doc.words[0].token.is_empty());
    }

    #[test]
    fn dense_reindex_points_back_to_words() {
        let raw = single_page(vec![
            word("alpha", 10.0, 10.0),
            word("the", 80.0, 10.0),
            word("beta", 120.0, 10.0),
        ]);
        let doc = normalize(&raw);
        assert_eq!(doc.tokens.len(), 2);
        assert_eq!(doc.tokens[0].word_idx, 0);
        assert_eq!(doc.tokens[1].word_idx, 2);
    }

    #[test]
    fn dehyphenates_across_line_break() {
        let raw = single_page(vec![
            word("detec-", 500.0, 10.0),
            word("tion", 10.0, 30.0),
            word("works", 60.0, 30.0),
        ]);
        let doc = normalize(&raw);
        assert_eq!(doc.words[0].raw, "detection");
        assert_eq!(doc.words[0].fragments.len(), 2);
        assert_eq!(doc.tokens[0].text, "detection");
        assert_eq!(doc.words.len(), 2);
    }

    #[test]
    fn dehyphenates_across_page_break() {
        let raw = RawDocument {
            path: PathBuf::from("test.pdf"),
            pages: vec![
                RawPage {
                    width: 612.0,
                    height: 792.0,
                    words: vec![word("hyphen-", 500.0, 780.0)],
                },
                RawPage {
                    width: 612.0,
                    height: 792.0,
                    words: vec![word("ation", 10.0, 10.0)],
                },
            ],
        };
        let doc = normalize(&raw);
        assert_eq!(doc.words.len(), 1);
        assert_eq!(doc.words[0].raw, "hyphenation");
        assert_eq!(doc.words[0].fragments[0].page, 0);
        assert_eq!(doc.words[0].fragments[1].page, 1);
    }

    #[test]
    fn hyphen_mid_line_is_not_fused() {
        let raw = single_page(vec![
            word("well-", 10.0, 10.0),
            word("known", 70.0, 10.0),
        ]);
        let doc = normalize(&raw);
        assert_eq!(doc.words.len(), 2);
        assert_eq!(doc.words[0].raw, "well-");
    }

    #[test]
    fn lone_hyphen_is_not_fused() {
        let raw = single_page(vec![word("-", 500.0, 10.0), word("next", 10.0, 30.0)]);
        let doc = normalize(&raw);
        assert_eq!(doc.words.len(), 2);
    }
}
