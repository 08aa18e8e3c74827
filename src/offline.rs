//! Deterministic stand-ins for the neural models.
//!
//! [`TrigramEmbedder`] hashes character trigrams of each word into a fixed
//! number of buckets, so names that share most of their spelling land close
//! together. [`LexicalScorer`] scores passages by word overlap with the
//! query. Neither needs network access or model weights.

use std::collections::HashSet;

use crate::{
    embedding::TextEmbedder,
    error::Result,
    reranker::RelevanceScorer,
};

/// Embeds text as a bag of hashed character trigrams.
#[derive(Debug, Clone)]
pub struct TrigramEmbedder {
    dimension: usize,
}

impl TrigramEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        for word in words(text) {
            let padded: Vec<char> =
                format!(" {word} ").chars().collect();
            for trigram in padded.windows(3) {
                let bucket = fnv1a(trigram) % self.dimension as u64;
                vector[bucket as usize] += 1.0;
            }
        }
        vector
    }
}

impl TextEmbedder for TrigramEmbedder {
    fn dimension(&self) -> Result<usize> {
        Ok(self.dimension)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Scores passages by the Jaccard overlap of their words with the query.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalScorer;

impl RelevanceScorer for LexicalScorer {
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let query_words: HashSet<String> = words(query).collect();
        Ok(passages
            .iter()
            .map(|passage| {
                let passage_words: HashSet<String> = words(passage).collect();
                jaccard(&query_words, &passage_words)
            })
            .collect())
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f32 / union as f32
}

fn fnv1a(chars: &[char]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for c in chars {
        let mut buf = [0u8; 4];
        for byte in c.encode_utf8(&mut buf).bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
    }
    hash
}
