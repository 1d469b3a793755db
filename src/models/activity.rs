use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::query::Filter;

pub type ItemId = String;

pub const USER_ID_FIELD: &str = "userId";
pub const ANONYMOUS_ID_FIELD: &str = "anonymousId";

/// Identity of whoever produced activity: a registered user or an anonymous
/// visitor. Both live in one key space without ever colliding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubjectId {
    Registered(String),
    Anonymous(String),
}

impl SubjectId {
    /// Picks the registered id when present, the anonymous one otherwise.
    /// Blank identifiers count as absent.
    pub fn resolve(user_id: Option<&str>, anonymous_id: Option<&str>) -> Option<Self> {
        match (present(user_id), present(anonymous_id)) {
            (Some(id), _) => Some(SubjectId::Registered(id.to_string())),
            (None, Some(id)) => Some(SubjectId::Anonymous(id.to_string())),
            (None, None) => None,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            SubjectId::Registered(id) | SubjectId::Anonymous(id) => id,
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            SubjectId::Registered(_) => USER_ID_FIELD,
            SubjectId::Anonymous(_) => ANONYMOUS_ID_FIELD,
        }
    }

    /// Store filter selecting documents owned by this subject.
    pub fn filter(&self) -> Filter {
        Filter::eq(self.field(), self.id())
    }

    pub fn to_fields(&self) -> SubjectFields {
        match self {
            SubjectId::Registered(id) => SubjectFields {
                user_id: Some(id.clone()),
                anonymous_id: None,
            },
            SubjectId::Anonymous(id) => SubjectFields {
                user_id: None,
                anonymous_id: Some(id.clone()),
            },
        }
    }
}

fn present(id: Option<&str>) -> Option<&str> {
    id.map(str::trim).filter(|id| !id.is_empty())
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectId::Registered(id) => write!(f, "user:{}", id),
            SubjectId::Anonymous(id) => write!(f, "anonymous:{}", id),
        }
    }
}

/// Wire form of a subject inside stored documents: exactly one of the two fields is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectFields {
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "anonymousId", default, skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<String>,
}

impl SubjectFields {
    pub fn subject(&self) -> Option<SubjectId> {
        SubjectId::resolve(self.user_id.as_deref(), self.anonymous_id.as_deref())
    }
}

/// A rating document as written by the product (`film_user_rating`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingRecord {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub anonymous_id: Option<String>,
    #[serde(default)]
    pub film_id: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A like/dislike document as written by the product (`like_dislike`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRecord {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub anonymous_id: Option<String>,
    #[serde(default)]
    pub film_id: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, alias = "isWatched")]
    pub watched: Option<bool>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementKind {
    Rating(u8),
    Like { watched: bool },
    Dislike { watched: bool },
}

/// A validated engagement fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngagementEvent {
    pub subject: SubjectId,
    pub item_id: ItemId,
    pub kind: EngagementKind,
}

/// One signed affinity of a subject for an item.
///
/// Also the document shape of the `user_activity` snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedAffinity {
    #[serde(flatten)]
    pub subject: SubjectFields,
    #[serde(rename = "filmId")]
    pub item_id: ItemId,
    pub score: i32,
}

impl UnifiedAffinity {
    pub fn new(subject: &SubjectId, item_id: impl Into<ItemId>, score: i32) -> Self {
        UnifiedAffinity {
            subject: subject.to_fields(),
            item_id: item_id.into(),
            score,
        }
    }

    pub fn subject_id(&self) -> Option<SubjectId> {
        self.subject.subject()
    }
}
