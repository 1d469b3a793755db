use serde::{Deserialize, Serialize};

use crate::models::activity::ItemId;

pub const FILM_ID_FIELD: &str = "_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Profession {
    Director,
    Actor,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffMember {
    pub person_id: String,
    // the catalog has carried both spellings
    #[serde(alias = "proffession")]
    pub profession: Profession,
}

/// A catalog entry of the `film` collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilmDocument {
    #[serde(rename = "_id")]
    pub id: ItemId,
    #[serde(default)]
    pub name_ru: Option<String>,
    #[serde(default)]
    pub name_original: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub staff: Vec<StaffMember>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub rating_film_critics: Option<f64>,
    #[serde(default)]
    pub rating_good_review: Option<f64>,
    #[serde(default)]
    pub rating_imdb: Option<f64>,
    #[serde(default)]
    pub rating_kinopoisk: Option<f64>,
}

impl FilmDocument {
    pub fn new(id: impl Into<ItemId>) -> Self {
        FilmDocument {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Fields needed to score the film against a taste profile.
    pub const FEATURE_FIELDS: [&'static str; 6] = [
        "_id",
        "nameRu",
        "nameOriginal",
        "genres",
        "countries",
        "staff",
    ];

    pub const RATING_FIELDS: [&'static str; 6] = [
        "_id",
        "rating",
        "ratingFilmCritics",
        "ratingGoodReview",
        "ratingImdb",
        "ratingKinopoisk",
    ];
}

/// Entry of the global fallback pool (`film_top`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopFilmRecord {
    pub film_id: ItemId,
    pub mean_rating: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_staff_accepts_legacy_spelling() {
        let film: FilmDocument = serde_json::from_value(json!({
            "_id": "f1",
            "staff": [
                {"personId": "p1", "proffession": "DIRECTOR"},
                {"personId": "p2", "profession": "ACTOR"},
                {"personId": "p3", "profession": "WRITER"}
            ]
        }))
        .unwrap();

        let professions: Vec<Profession> = film.staff.iter().map(|s| s.profession).collect();
        assert_eq!(
            professions,
            vec![Profession::Director, Profession::Actor, Profession::Other]
        );
        assert!(film.genres.is_empty());
    }
}
