//! Core data models that flow through the matching pipeline.

use serde::{Deserialize, Serialize};

/// A single question/answer pair. Position within its dataset is significant:
/// it indexes the matching row of the embedding matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
}

impl FaqEntry {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Where a corpus came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceIdentity {
    /// A `faq_data_<language>.json` file in the data directory.
    Local { language: String },
    /// A JSON document fetched over HTTP.
    Remote { url: String },
}

/// An ordered corpus together with its source identity.
#[derive(Debug, Clone)]
pub struct FaqDataset {
    pub source: SourceIdentity,
    pub entries: Vec<FaqEntry>,
}

impl FaqDataset {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The accepted best match for a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub question: String,
    pub answer: String,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Terminal outcome of a search that did not abort.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Found(MatchResult),
    NoMatch,
}

impl SearchOutcome {
    pub fn into_match(self) -> Option<MatchResult> {
        match self {
            SearchOutcome::Found(m) => Some(m),
            SearchOutcome::NoMatch => None,
        }
    }
}
