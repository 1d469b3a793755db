use std::cmp::Ordering;

use crate::models::film::{FilmDocument, TopFilmRecord};

/// Scale of the "good review" source, which reports percentages.
const GOOD_REVIEW_SCALE: f64 = 10.0;
const SOURCES: f64 = 5.0;

/// Mean of the five rating sources; an absent source counts as `missing_rating`.
pub fn mean_rating(film: &FilmDocument, missing_rating: f64) -> f64 {
    let or_missing = |value: Option<f64>| value.filter(|v| v.is_finite()).unwrap_or(missing_rating);
    let good_review = film
        .rating_good_review
        .filter(|v| v.is_finite())
        .map(|v| v / GOOD_REVIEW_SCALE)
        .unwrap_or(missing_rating);

    (or_missing(film.rating)
        + or_missing(film.rating_film_critics)
        + good_review
        + or_missing(film.rating_imdb)
        + or_missing(film.rating_kinopoisk))
        / SOURCES
}

/// Films whose mean rating reaches `top_rating`, best first (ties by film id).
pub fn rank_top_films(films: &[FilmDocument], top_rating: f64, missing_rating: f64) -> Vec<TopFilmRecord> {
    let mut top: Vec<TopFilmRecord> = films
        .iter()
        .map(|film| TopFilmRecord {
            film_id: film.id.clone(),
            mean_rating: mean_rating(film, missing_rating),
        })
        .filter(|record| record.mean_rating >= top_rating)
        .collect();

    top.sort_by(|a, b| {
        b.mean_rating
            .partial_cmp(&a.mean_rating)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.film_id.cmp(&b.film_id))
    });
    top
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rated(id: &str, value: f64) -> FilmDocument {
        FilmDocument {
            rating: Some(value),
            rating_film_critics: Some(value),
            rating_good_review: Some(value * 10.0),
            rating_imdb: Some(value),
            rating_kinopoisk: Some(value),
            ..FilmDocument::new(id)
        }
    }

    #[test]
    fn test_only_films_above_threshold_are_kept() {
        let films = vec![rated("A", 8.2), rated("B", 6.0)];
        let top = rank_top_films(&films, 7.0, 6.0);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].film_id, "A");
        assert!((top[0].mean_rating - 8.2).abs() < 1e-9);
    }

    #[test]
    fn test_missing_sources_use_default() {
        let film = FilmDocument {
            rating: Some(9.0),
            rating_imdb: Some(9.0),
            ..FilmDocument::new("f")
        };
        // (9 + 6 + 6 + 9 + 6) / 5
        assert!((mean_rating(&film, 6.0) - 7.2).abs() < 1e-9);
        assert!((mean_rating(&FilmDocument::new("g"), 6.0) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_ranked_best_first() {
        let films = vec![rated("b", 7.5), rated("c", 9.0), rated("a", 7.5)];
        let ids: Vec<String> = rank_top_films(&films, 7.0, 6.0)
            .into_iter()
            .map(|r| r.film_id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
