use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::EngineError;
use crate::models::activity::{ItemId, SubjectFields, SubjectId};

/// Persisted output unit (`film_with_recommendations`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationRecord {
    #[serde(flatten)]
    pub subject: SubjectFields,
    #[serde(rename = "filmId")]
    pub film_id: ItemId,
}

impl RecommendationRecord {
    pub fn new(subject: &SubjectId, film_id: impl Into<ItemId>) -> Self {
        RecommendationRecord {
            subject: subject.to_fields(),
            film_id: film_id.into(),
        }
    }
}

/// How a subject's recommendation set was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationMode {
    /// Too little activity: content profile of the subject's liked films.
    ColdStart,
    /// Neighbors supplied enough candidates on their own.
    Collaborative,
    /// Neighbor candidates topped up from the top-film pool.
    SparseBlend,
    /// No neighbors and no usable profile: the top-film pool minus seen films.
    TopOnly,
}

impl fmt::Display for RecommendationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecommendationMode::ColdStart => "COLD_START",
            RecommendationMode::Collaborative => "COLLABORATIVE",
            RecommendationMode::SparseBlend => "SPARSE_BLEND",
            RecommendationMode::TopOnly => "TOP_ONLY",
        };
        f.write_str(name)
    }
}

/// What a computation run wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub subjects: usize,
    pub records: usize,
    pub dropped_records: usize,
    pub modes: BTreeMap<RecommendationMode, usize>,
}

impl RunSummary {
    pub fn record_mode(&mut self, mode: RecommendationMode, records: usize) {
        self.subjects += 1;
        self.records += records;
        *self.modes.entry(mode).or_insert(0) += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Uniform result handed to the request layer; never carries a raw failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineResponse<T> {
    pub status: Status,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> EngineResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        EngineResponse {
            status: Status::Ok,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(operation: &str, error: &EngineError) -> Self {
        EngineResponse {
            status: Status::Error,
            message: format!("{} failed: {}", operation, error),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}
