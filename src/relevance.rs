use anyhow::Result;
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde::{Deserialize, Serialize};
use crate::matcher::contains_ignore_case;
use crate::storage::ExecutedCommand;
use crate::store_manager::StoreManager;

/// Text relevance of candidate rows for a query pattern.
///
/// Implementations return one score per row, in row order; higher is more
/// relevant. Scores are only compared within one candidate set.
pub trait RelevanceScorer {
    fn name(&self) -> &'static str;
    fn score(&self, pattern: &str, rows: &[ExecutedCommand]) -> Result<Vec<f64>>;
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RelevanceKind {
    #[default]
    Fts,
    Fuzzy,
    Substring,
}

/// Binary relevance: 1 when the command contains the pattern.
pub struct SubstringRelevance;

impl RelevanceScorer for SubstringRelevance {
    fn name(&self) -> &'static str {
        "substring"
    }

    fn score(&self, pattern: &str, rows: &[ExecutedCommand]) -> Result<Vec<f64>> {
        Ok(rows
            .iter()
            .map(|row| if contains_ignore_case(&row.command, pattern) { 1.0 } else { 0.0 })
            .collect())
    }
}

/// FZF-style graded relevance computed in process.
pub struct FuzzyRelevance {
    matcher: SkimMatcherV2,
}

impl FuzzyRelevance {
    pub fn new() -> Self {
        Self {
            matcher: SkimMatcherV2::default().ignore_case(),
        }
    }
}

impl Default for FuzzyRelevance {
    fn default() -> Self {
        Self::new()
    }
}

impl RelevanceScorer for FuzzyRelevance {
    fn name(&self) -> &'static str {
        "fuzzy"
    }

    fn score(&self, pattern: &str, rows: &[ExecutedCommand]) -> Result<Vec<f64>> {
        Ok(rows
            .iter()
            .map(|row| {
                self.matcher
                    .fuzzy_match(&row.command, pattern)
                    .map(|s| s as f64)
                    .unwrap_or(0.0)
            })
            .collect())
    }
}

/// BM25 relevance from the store's full-text index.
pub struct FtsRelevance<'a> {
    store: &'a StoreManager,
}

impl<'a> FtsRelevance<'a> {
    pub fn new(store: &'a StoreManager) -> Self {
        Self { store }
    }
}

impl RelevanceScorer for FtsRelevance<'_> {
    fn name(&self) -> &'static str {
        "fts"
    }

    fn score(&self, pattern: &str, rows: &[ExecutedCommand]) -> Result<Vec<f64>> {
        let ranks = self.store.fts_scores(pattern)?;
        // Negated bm25 is positive for every match; rows outside the match set score 0.
        Ok(rows
            .iter()
            .map(|row| {
                row.id
                    .and_then(|id| ranks.get(&id).copied())
                    .unwrap_or(0.0)
            })
            .collect())
    }
}

/// Pick the scorer for `kind`, falling back to substring relevance when the
/// store cannot serve full-text queries.
pub fn scorer_for<'a>(kind: RelevanceKind, store: &'a StoreManager) -> Box<dyn RelevanceScorer + 'a> {
    match kind {
        RelevanceKind::Fts if store.fts_enabled() => Box::new(FtsRelevance::new(store)),
        RelevanceKind::Fts | RelevanceKind::Substring => Box::new(SubstringRelevance),
        RelevanceKind::Fuzzy => Box::new(FuzzyRelevance::new()),
    }
}
