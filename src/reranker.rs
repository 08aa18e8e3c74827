use crate::error::{Error, Result};

/// Scores how relevant each passage is to a query.
///
/// Scores are only comparable within one call; higher is more relevant.
pub trait RelevanceScorer: Send + Sync {
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;
}

/// An item with the relevance score it was reranked by.
#[derive(Debug, Clone)]
pub struct Reranked<T> {
    pub item: T,
    pub score: f32,
}

/// Rerank `items` against `query` and keep the best `top_k`.
///
/// Every (query, item text) pair is scored in one call to the scorer, then
/// the items are sorted by score descending. The sort is stable, so items
/// with equal scores keep their incoming (retrieval) order.
pub fn rerank<T>(
    scorer: &dyn RelevanceScorer,
    query: &str,
    items: Vec<T>,
    text_of: impl Fn(&T) -> String,
    top_k: usize,
) -> Result<Vec<Reranked<T>>> {
    if items.is_empty() || top_k == 0 {
        return Ok(Vec::new());
    }

    let passages: Vec<String> = items.iter().map(&text_of).collect();
    let scores = scorer.score(query, &passages)?;
    if scores.len() != items.len() {
        return Err(Error::Config(format!(
            "reranker returned {} scores for {} passages",
            scores.len(),
            items.len()
        )));
    }

    let mut ranked: Vec<Reranked<T>> = items
        .into_iter()
        .zip(scores)
        .map(|(item, score)| Reranked { item, score })
        .collect();

    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(top_k);

    Ok(ranked)
}
