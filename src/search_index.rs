use std::collections::HashMap;
use std::sync::Arc;

use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::normalize::Document;

/// Fixed fingerprint seed. Fingerprints must be identical across process
/// invocations, so a process-salted hasher is off the table.
pub const FINGERPRINT_SEED: u64 = 0x5044_4643;

/// Byte placed between tokens before hashing so that token-boundary shifts
/// ("ab c" vs "a bc") cannot collide.
const TOKEN_SEPARATOR: u8 = 0x1f;

/// 64-bit fingerprint of `n` consecutive tokens.
pub fn gram_fingerprint<S: AsRef<str>>(tokens: &[S]) -> u64 {
    let mut buf = Vec::with_capacity(tokens.iter().map(|t| t.as_ref().len() + 1).sum());
    fill_gram_buf(&mut buf, tokens);
    xxh3_64_with_seed(&buf, FINGERPRINT_SEED)
}

fn fill_gram_buf<S: AsRef<str>>(buf: &mut Vec<u8>, tokens: &[S]) {
    buf.clear();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            buf.push(TOKEN_SEPARATOR);
        }
        buf.extend_from_slice(token.as_ref().as_bytes());
    }
}

/// One index entry: token position `pos` in reference document `doc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub doc: u32,
    pub pos: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub ref_docs: usize,
    pub distinct_grams: usize,
    pub postings: usize,
}

/// Inverted n-gram index over the reference pool. Append-only while the pool
/// is being ingested, then read-only for the whole compare phase.
#[derive(Debug)]
pub struct IndexStore {
    seed_size: usize,
    grams: HashMap<u64, Vec<Posting>>,
    docs: Vec<Arc<Document>>,
    posting_count: usize,
}

impl IndexStore {
    pub fn new(seed_size: usize) -> Self {
        IndexStore {
            seed_size,
            grams: HashMap::new(),
            docs: Vec::new(),
            posting_count: 0,
        }
    }

    pub fn seed_size(&self) -> usize {
        self.seed_size
    }

    /// Fingerprint every n-gram of the document and append its postings.
    /// Documents shorter than the seed size contribute no postings.
    pub fn add_document(&mut self, doc: Document) -> u32 {
        let doc_id = self.docs.len() as u32;
        let doc = Arc::new(doc);
        let n = self.seed_size;
        if doc.tokens.len() >= n {
            let mut buf = Vec::new();
            for i in 0..=doc.tokens.len() - n {
                fill_gram_buf(&mut buf, &doc.tokens[i..i + n]);
                let fp = xxh3_64_with_seed(&buf, FINGERPRINT_SEED);
                self.grams.entry(fp).or_default().push(Posting {
                    doc: doc_id,
                    pos: i as u32,
                });
                self.posting_count += 1;
            }
        }
        self.docs.push(doc);
        doc_id
    }

    pub fn lookup(&self, fingerprint: u64) -> &[Posting] {
        self.grams.get(&fingerprint).map_or(&[], Vec::as_slice)
    }

    pub fn docs(&self) -> &[Arc<Document>] {
        &self.docs
    }

    pub fn doc(&self, id: u32) -> &Arc<Document> {
        &self.docs[id as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            ref_docs: self.docs.len(),
            distinct_grams: self.grams.len(),
            postings: self.posting_count,
        }
    }

    /// Rough in-memory footprint, for display purposes.
    pub fn approx_memory(&self) -> usize {
        let gram_bytes = self.grams.capacity()
            * (std::mem::size_of::<u64>() + std::mem::size_of::<Vec<Posting>>());
        let posting_bytes = self.posting_count * std::mem::size_of::<Posting>();
        let token_bytes: usize = self
            .docs
            .iter()
            .map(|d| d.tokens.iter().map(|t| t.text.len() + 8).sum::<usize>())
            .sum();
        gram_bytes + posting_bytes + token_bytes
    }
}
