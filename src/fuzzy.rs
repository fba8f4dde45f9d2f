use std::collections::{HashMap, HashSet};

use strsim::levenshtein;

use crate::normalize::Token;
use crate::search_index::{gram_fingerprint, IndexStore};

/// Upper bound on fingerprint variants generated per n-gram. Keeps the
/// Cartesian expansion of positional alternatives from fanning out.
pub const MAX_GRAM_VARIANTS: usize = 8;

// Per-token alternative lists are clipped to the same bound; the product is
// clipped again in `expand`.
const MAX_TOKEN_ALTERNATIVES: usize = MAX_GRAM_VARIANTS;

/// Rewrite tolerance for Phase A: expands each target n-gram with reference
/// tokens one edit away, so a single substituted word still seeds a block.
///
/// Built once per compare call from the reference vocabulary; read-only
/// afterwards.
pub struct FuzzyMatcher {
    neighbors: HashMap<String, Vec<String>>,
    by_len: HashMap<usize, Vec<String>>,
}

impl FuzzyMatcher {
    pub fn build(index: &IndexStore) -> Self {
        let n = index.seed_size();
        let mut vocab: HashSet<&str> = HashSet::new();
        for doc in index.docs() {
            // Only tokens that participate in at least one n-gram matter.
            if doc.tokens.len() >= n {
                vocab.extend(doc.tokens.iter().map(|t| t.text.as_str()));
            }
        }

        let mut by_len: HashMap<usize, Vec<String>> = HashMap::new();
        for token in &vocab {
            by_len
                .entry(token.chars().count())
                .or_default()
                .push((*token).to_string());
        }
        for bucket in by_len.values_mut() {
            bucket.sort_unstable();
        }

        let mut neighbors = HashMap::with_capacity(vocab.len());
        for token in vocab {
            neighbors.insert(token.to_string(), scan_buckets(&by_len, token));
        }

        FuzzyMatcher { neighbors, by_len }
    }

    /// Reference tokens within Levenshtein distance 1 and length difference
    /// ≤ 1 of `token`, the token itself first when it is in the vocabulary.
    fn alternatives<'a>(&'a self, token: &'a str) -> Vec<&'a str> {
        let mut alts: Vec<&str> = vec![token];
        let class = match self.neighbors.get(token) {
            Some(precomputed) => precomputed.iter().map(String::as_str).collect(),
            None => scan_buckets_ref(&self.by_len, token),
        };
        for v in class {
            if v != token && alts.len() < MAX_TOKEN_ALTERNATIVES {
                alts.push(v);
            }
        }
        alts
    }

    /// Fingerprints for the capped Cartesian product of per-position
    /// alternatives. The unmodified gram always comes first, so fuzzy output
    /// is a superset of exact output.
    pub fn expand(&self, gram: &[Token]) -> Vec<u64> {
        let alts: Vec<Vec<&str>> = gram
            .iter()
            .map(|t| self.alternatives(t.text.as_str()))
            .collect();

        let mut fingerprints = Vec::with_capacity(MAX_GRAM_VARIANTS);
        let mut odometer = vec![0usize; alts.len()];
        let mut variant: Vec<&str> = Vec::with_capacity(alts.len());
        loop {
            variant.clear();
            variant.extend(odometer.iter().zip(&alts).map(|(&i, a)| a[i]));
            let fp = gram_fingerprint(&variant);
            if !fingerprints.contains(&fp) {
                fingerprints.push(fp);
                if fingerprints.len() >= MAX_GRAM_VARIANTS {
                    break;
                }
            }

            // Advance the rightmost position first.
            let mut pos = alts.len();
            loop {
                if pos == 0 {
                    return fingerprints;
                }
                pos -= 1;
                odometer[pos] += 1;
                if odometer[pos] < alts[pos].len() {
                    break;
                }
                odometer[pos] = 0;
            }
        }
        fingerprints
    }
}

fn within_one_edit(a: &str, b: &str) -> bool {
    let la = a.chars().count() as i64;
    let lb = b.chars().count() as i64;
    (la - lb).abs() <= 1 && levenshtein(a, b) <= 1
}

fn scan_buckets(by_len: &HashMap<usize, Vec<String>>, token: &str) -> Vec<String> {
    scan_buckets_ref(by_len, token)
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn scan_buckets_ref<'a>(by_len: &'a HashMap<usize, Vec<String>>, token: &str) -> Vec<&'a str> {
    let len = token.chars().count();
    let mut found = Vec::new();
    for l in len.saturating_sub(1)..=len + 1 {
        if let Some(bucket) = by_len.get(&l) {
            for v in bucket {
                if within_one_edit(token, v) {
                    found.push(v.as_str());
                    if found.len() >= MAX_TOKEN_ALTERNATIVES {
                        return found;
                    }
                }
            }
        }
    }
    found
}
