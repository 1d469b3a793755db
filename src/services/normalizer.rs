use crate::models::activity::{
    EngagementEvent, EngagementKind, LikeRecord, RatingRecord, SubjectId, UnifiedAffinity,
};

/// Lowest and highest score a single engagement can map to.
pub const MIN_SCORE: i32 = -2;
pub const MAX_SCORE: i32 = 2;

const MAX_RATING: f64 = 10.0;

/// Output of a normalization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedActivity {
    pub rows: Vec<UnifiedAffinity>,
    /// Records that failed validation and were left out.
    pub dropped: usize,
}

impl NormalizedActivity {
    /// Keeps only the rows that resolve to `subject` and counts the rest as
    /// dropped. A document carrying both identifiers resolves to the
    /// registered one, even when it was fetched by its anonymous id.
    pub fn retain_subject(&mut self, subject: &SubjectId) {
        let before = self.rows.len();
        self.rows.retain(|row| row.subject_id().as_ref() == Some(subject));
        let foreign = before - self.rows.len();
        if foreign > 0 {
            log::debug!("{} records fetched for {} belong to another subject", foreign, subject);
        }
        self.dropped += foreign;
    }
}

/// Maps an engagement to its signed affinity.
///
/// Ratings: 8+ => 2, 6+ => 1, 4+ => 0, below => -1.
/// Likes: watched 2, otherwise 1. Dislikes: watched -2, otherwise -1.
pub fn score(kind: EngagementKind) -> i32 {
    match kind {
        EngagementKind::Rating(rating) if rating >= 8 => 2,
        EngagementKind::Rating(rating) if rating >= 6 => 1,
        EngagementKind::Rating(rating) if rating >= 4 => 0,
        EngagementKind::Rating(_) => -1,
        EngagementKind::Like { watched: true } => 2,
        EngagementKind::Like { watched: false } => 1,
        EngagementKind::Dislike { watched: true } => -2,
        EngagementKind::Dislike { watched: false } => -1,
    }
}

/// Validates a rating document. Ratings must be whole-or-fractional values in 0..=10;
/// fractional ratings are floored.
pub fn validate_rating(record: &RatingRecord) -> Option<EngagementEvent> {
    let subject = SubjectId::resolve(record.user_id.as_deref(), record.anonymous_id.as_deref())?;
    let item_id = non_blank(record.film_id.as_deref())?;
    let rating = record.rating.filter(|r| r.is_finite() && (0.0..=MAX_RATING).contains(r))?;

    Some(EngagementEvent {
        subject,
        item_id,
        kind: EngagementKind::Rating(rating.floor() as u8),
    })
}

pub fn validate_like(record: &LikeRecord) -> Option<EngagementEvent> {
    let subject = SubjectId::resolve(record.user_id.as_deref(), record.anonymous_id.as_deref())?;
    let item_id = non_blank(record.film_id.as_deref())?;
    let watched = record.watched.unwrap_or(false);
    let kind = match record.state.as_deref().map(str::trim) {
        Some(state) if state.eq_ignore_ascii_case("LIKE") => EngagementKind::Like { watched },
        Some(state) if state.eq_ignore_ascii_case("DISLIKE") => EngagementKind::Dislike { watched },
        _ => return None,
    };

    Some(EngagementEvent {
        subject,
        item_id,
        kind,
    })
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn to_affinity(event: &EngagementEvent) -> UnifiedAffinity {
    UnifiedAffinity::new(&event.subject, event.item_id.clone(), score(event.kind))
}

/// Turns raw rating and like documents into one affinity row per engagement.
///
/// Records missing both identifiers, missing the film, carrying an unknown
/// state or an out-of-range rating are dropped and counted.
pub fn normalize(ratings: &[RatingRecord], likes: &[LikeRecord]) -> NormalizedActivity {
    let mut activity = NormalizedActivity::default();

    let events = ratings
        .iter()
        .map(validate_rating)
        .chain(likes.iter().map(validate_like));

    for event in events {
        match event {
            Some(event) => activity.rows.push(to_affinity(&event)),
            None => activity.dropped += 1,
        }
    }

    if activity.dropped > 0 {
        log::warn!(
            "Dropped {} malformed engagement records out of {}",
            activity.dropped,
            ratings.len() + likes.len()
        );
    }
    activity
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rating(user: Option<&str>, anonymous: Option<&str>, film: &str, value: f64) -> RatingRecord {
        RatingRecord {
            user_id: user.map(String::from),
            anonymous_id: anonymous.map(String::from),
            film_id: Some(film.to_string()),
            rating: Some(value),
            updated_at: None,
        }
    }

    fn like(user: &str, film: &str, state: &str, watched: Option<bool>) -> LikeRecord {
        LikeRecord {
            user_id: Some(user.to_string()),
            film_id: Some(film.to_string()),
            state: Some(state.to_string()),
            watched,
            ..Default::default()
        }
    }

    #[test]
    fn test_rating_table() {
        let cases = [
            (10.0, 2),
            (8.0, 2),
            (7.9, 1),
            (6.0, 1),
            (5.0, 0),
            (4.0, 0),
            (3.0, -1),
            (0.0, -1),
        ];
        for (value, expected) in cases {
            let out = normalize(&[rating(Some("u1"), None, "f1", value)], &[]);
            assert_eq!(out.rows[0].score, expected, "rating {}", value);
        }
    }

    #[test]
    fn test_like_table() {
        let likes = vec![
            like("u1", "f1", "LIKE", Some(true)),
            like("u1", "f2", "LIKE", None),
            like("u1", "f3", "DISLIKE", Some(true)),
            like("u1", "f4", "DISLIKE", Some(false)),
        ];
        let scores: Vec<i32> = normalize(&[], &likes).rows.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![2, 1, -2, -1]);
    }

    #[test]
    fn test_anonymous_activity_keeps_its_own_identity() {
        let out = normalize(
            &[
                rating(None, Some("42"), "f1", 9.0),
                rating(Some("42"), None, "f1", 9.0),
            ],
            &[],
        );
        assert_eq!(
            out.rows[0].subject_id(),
            Some(SubjectId::Anonymous("42".to_string()))
        );
        assert_eq!(
            out.rows[1].subject_id(),
            Some(SubjectId::Registered("42".to_string()))
        );
    }

    #[test]
    fn test_retain_subject_drops_rows_resolving_elsewhere() {
        let visitor = SubjectId::Anonymous("a1".to_string());
        let mut out = normalize(
            &[
                rating(Some("u1"), Some("a1"), "f1", 9.0),
                rating(None, Some("a1"), "f2", 9.0),
            ],
            &[],
        );
        out.retain_subject(&visitor);

        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].item_id, "f2");
        assert_eq!(out.rows[0].subject_id(), Some(visitor));
        assert_eq!(out.dropped, 1);
    }

    #[test]
    fn test_malformed_rows_are_dropped_and_counted() {
        let ratings = vec![
            rating(None, None, "f1", 7.0),
            rating(Some("u1"), None, "f1", 11.0),
            rating(Some("u1"), None, "f1", -1.0),
            rating(Some("u1"), None, "f1", f64::NAN),
            rating(Some("u1"), None, "  ", 7.0),
            rating(Some("u1"), None, "f2", 7.0),
        ];
        let likes = vec![
            like("u1", "f3", "MEH", None),
            LikeRecord {
                state: Some("LIKE".to_string()),
                film_id: Some("f4".to_string()),
                ..Default::default()
            },
        ];

        let out = normalize(&ratings, &likes);
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].item_id, "f2");
        assert_eq!(out.dropped, 7);
    }

    #[test]
    fn test_scores_stay_in_range_for_every_input() {
        let mut ratings = Vec::new();
        for tenth in 0..=100 {
            ratings.push(rating(Some("u1"), None, "f", tenth as f64 / 10.0));
        }
        let mut likes = Vec::new();
        for state in ["LIKE", "DISLIKE", "like"] {
            for watched in [None, Some(false), Some(true)] {
                likes.push(like("u1", "f", state, watched));
            }
        }

        let out = normalize(&ratings, &likes);
        assert_eq!(out.dropped, 0);
        assert!(out
            .rows
            .iter()
            .all(|row| (MIN_SCORE..=MAX_SCORE).contains(&row.score)));
    }
}
