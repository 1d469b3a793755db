use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use crate::models::activity::ItemId;
use crate::models::film::{FilmDocument, Profession, FILM_ID_FIELD};
use crate::models::query::Filter;

const PROFILE_GENRES: usize = 3;
const PROFILE_COUNTRIES: usize = 2;
const MIN_TOKEN_LEN: usize = 4;

// How many of the strongest profile entries make it into the catalog query.
const FILTER_GENRES: usize = 5;
const FILTER_COUNTRIES: usize = 5;
const FILTER_PEOPLE: usize = 10;

/// Additive counter of feature values.
pub type WeightedSet = BTreeMap<String, u32>;

/// Lower-cased title words longer than three characters; anything that is not
/// a letter or digit splits words.
pub fn tokenize_title(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= MIN_TOKEN_LEN)
        .map(str::to_string)
        .collect()
}

/// Features of one film as seen by the profile engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilmFeatures {
    pub genres: BTreeSet<String>,
    pub countries: BTreeSet<String>,
    pub directors: BTreeSet<String>,
    pub actors: BTreeSet<String>,
    pub title_tokens: Vec<String>,
}

impl FilmFeatures {
    /// Leading genres and countries, a director credited first, and actors
    /// among the first `actor_limit` staff entries.
    pub fn extract(film: &FilmDocument, actor_limit: usize) -> Self {
        let title = format!(
            "{} {}",
            film.name_ru.as_deref().unwrap_or(""),
            film.name_original.as_deref().unwrap_or("")
        );
        FilmFeatures {
            genres: film.genres.iter().take(PROFILE_GENRES).cloned().collect(),
            countries: film.countries.iter().take(PROFILE_COUNTRIES).cloned().collect(),
            directors: film
                .staff
                .iter()
                .take(1)
                .filter(|member| member.profession == Profession::Director)
                .map(|member| member.person_id.clone())
                .collect(),
            actors: film
                .staff
                .iter()
                .take(actor_limit)
                .filter(|member| member.profession == Profession::Actor)
                .map(|member| member.person_id.clone())
                .collect(),
            title_tokens: tokenize_title(&title),
        }
    }
}

/// Running taste profile built from liked films.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureProfile {
    pub genres: WeightedSet,
    pub countries: WeightedSet,
    pub directors: WeightedSet,
    pub actors: WeightedSet,
    pub title_tokens: WeightedSet,
    /// Films folded into or excluded from the profile's candidates.
    pub watched: BTreeSet<ItemId>,
}

fn add_all<'a>(target: &mut WeightedSet, values: impl IntoIterator<Item = &'a String>) {
    for value in values {
        *target.entry(value.clone()).or_insert(0) += 1;
    }
}

fn strongest(set: &WeightedSet, n: usize) -> Vec<String> {
    let mut entries: Vec<(&String, &u32)> = set.iter().collect();
    entries.sort_by_key(|(value, count)| (Reverse(**count), *value));
    entries.into_iter().take(n).map(|(value, _)| value.clone()).collect()
}

fn overlap(profile: &WeightedSet, values: &BTreeSet<String>) -> u32 {
    values.iter().filter(|value| profile.contains_key(*value)).count() as u32
}

impl FeatureProfile {
    pub fn is_empty(&self) -> bool {
        self.genres.is_empty()
            && self.countries.is_empty()
            && self.directors.is_empty()
            && self.actors.is_empty()
            && self.title_tokens.is_empty()
    }

    /// Folds a liked film into the profile, adding to existing counts.
    pub fn absorb(&mut self, film_id: &str, features: &FilmFeatures) {
        add_all(&mut self.genres, &features.genres);
        add_all(&mut self.countries, &features.countries);
        add_all(&mut self.directors, &features.directors);
        add_all(&mut self.actors, &features.actors);
        add_all(&mut self.title_tokens, &features.title_tokens);
        self.watched.insert(film_id.to_string());
    }

    pub fn mark_watched(&mut self, film_ids: impl IntoIterator<Item = ItemId>) {
        self.watched.extend(film_ids);
    }

    /// Raw overlap count across genres, countries, directors, actors and title words.
    pub fn score(&self, features: &FilmFeatures) -> u32 {
        let tokens: BTreeSet<String> = features.title_tokens.iter().cloned().collect();
        overlap(&self.genres, &features.genres)
            + overlap(&self.countries, &features.countries)
            + overlap(&self.directors, &features.directors)
            + overlap(&self.actors, &features.actors)
            + overlap(&self.title_tokens, &tokens)
    }

    /// Catalog query for films sharing a leading genre, country or person
    /// with the profile and not yet watched.
    pub fn catalog_filter(&self) -> Filter {
        let mut people = strongest(&self.directors, FILTER_PEOPLE);
        people.extend(strongest(&self.actors, FILTER_PEOPLE));

        Filter::And(vec![
            Filter::not_in(FILM_ID_FIELD, self.watched.iter().cloned()),
            Filter::Or(vec![
                Filter::is_in("genres", strongest(&self.genres, FILTER_GENRES)),
                Filter::is_in("countries", strongest(&self.countries, FILTER_COUNTRIES)),
                Filter::is_in("staff.personId", people),
            ]),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredFilm {
    pub film_id: ItemId,
    pub score: u32,
}

pub struct ContentEngine {
    profile_actor_limit: usize,
    candidate_actor_limit: usize,
    limit: usize,
}

impl ContentEngine {
    pub fn new(profile_actor_limit: usize, candidate_actor_limit: usize, limit: usize) -> Self {
        ContentEngine {
            profile_actor_limit,
            candidate_actor_limit,
            limit,
        }
    }

    pub fn build_profile<'a>(&self, liked: impl IntoIterator<Item = &'a FilmDocument>) -> FeatureProfile {
        let mut profile = FeatureProfile::default();
        for film in liked {
            profile.absorb(&film.id, &FilmFeatures::extract(film, self.profile_actor_limit));
        }
        profile
    }

    /// Scores candidates against the profile, best first (ties by film id),
    /// keeping at most the configured number of films.
    pub fn rank(&self, profile: &FeatureProfile, candidates: &[FilmDocument]) -> Vec<ScoredFilm> {
        let mut scored: Vec<ScoredFilm> = candidates
            .iter()
            .filter(|film| !profile.watched.contains(&film.id))
            .map(|film| ScoredFilm {
                film_id: film.id.clone(),
                score: profile.score(&FilmFeatures::extract(film, self.candidate_actor_limit)),
            })
            .filter(|scored| scored.score > 0)
            .collect();

        scored.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.film_id.cmp(&b.film_id)));
        scored.dedup_by(|a, b| a.film_id == b.film_id);
        scored.truncate(self.limit);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::film::StaffMember;
    use crate::models::query::to_document;

    fn staff(person: &str, profession: Profession) -> StaffMember {
        StaffMember {
            person_id: person.to_string(),
            profession,
        }
    }

    fn film(id: &str, genres: &[&str], countries: &[&str], title: &str) -> FilmDocument {
        FilmDocument {
            genres: genres.iter().map(|s| s.to_string()).collect(),
            countries: countries.iter().map(|s| s.to_string()).collect(),
            name_original: Some(title.to_string()),
            ..FilmDocument::new(id)
        }
    }

    fn engine() -> ContentEngine {
        ContentEngine::new(4, 10, 20)
    }

    #[test]
    fn test_tokenize_title() {
        assert_eq!(
            tokenize_title("  Брат 2: The Return of the KING!\u{a0}Ёлки"),
            vec!["брат", "return", "king", "ёлки"]
        );
        assert!(tokenize_title("Up").is_empty());
    }

    #[test]
    fn test_extract_limits_features() {
        let mut f = film("f1", &["a", "b", "c", "d"], &["x", "y", "z"], "Long Title Words");
        f.staff = vec![
            staff("d1", Profession::Director),
            staff("a1", Profession::Actor),
            staff("a2", Profession::Actor),
            staff("a3", Profession::Actor),
            staff("a4", Profession::Actor),
        ];

        let features = FilmFeatures::extract(&f, 4);
        assert_eq!(features.genres.len(), 3);
        assert_eq!(features.countries.len(), 2);
        assert_eq!(features.directors.len(), 1);
        assert_eq!(features.actors.len(), 3);
        assert_eq!(features.title_tokens, vec!["long", "title", "words"]);

        // a director not credited first is ignored
        f.staff.reverse();
        assert!(FilmFeatures::extract(&f, 10).directors.is_empty());
    }

    #[test]
    fn test_profile_counts_accumulate() {
        let liked = vec![
            film("f1", &["drama", "comedy"], &["FR"], "Amelie"),
            film("f2", &["drama"], &["FR", "BE"], "Amelie Again"),
        ];
        let profile = engine().build_profile(&liked);

        assert_eq!(profile.genres["drama"], 2);
        assert_eq!(profile.genres["comedy"], 1);
        assert_eq!(profile.countries["FR"], 2);
        assert_eq!(profile.title_tokens["amelie"], 2);
        assert_eq!(profile.watched.len(), 2);
    }

    #[test]
    fn test_score_is_plain_overlap_count() {
        let profile = engine().build_profile(&[film("f1", &["drama", "war"], &["FR"], "Grand Illusion")]);
        let candidate = FilmFeatures::extract(&film("f2", &["war", "drama", "noir"], &["US"], "Illusion"), 10);
        assert_eq!(profile.score(&candidate), 3);
    }

    #[test]
    fn test_rank_orders_filters_and_truncates() {
        let profile = engine().build_profile(&[film("seen", &["drama", "war"], &["FR"], "")]);
        let candidates = vec![
            film("seen", &["drama", "war"], &["FR"], ""),
            film("b", &["drama"], &[], ""),
            film("a", &["drama"], &[], ""),
            film("best", &["drama", "war"], &["FR"], ""),
            film("none", &["horror"], &["US"], ""),
        ];

        let ranked = ContentEngine::new(4, 10, 2).rank(&profile, &candidates);
        let ids: Vec<&str> = ranked.iter().map(|s| s.film_id.as_str()).collect();
        assert_eq!(ids, vec!["best", "a"]);
        assert_eq!(ranked[0].score, 3);
    }

    #[test]
    fn test_catalog_filter_selects_overlapping_unwatched_films() {
        let mut liked = film("f1", &["drama"], &["FR"], "");
        liked.staff = vec![staff("d1", Profession::Director)];
        let profile = engine().build_profile(&[liked.clone()]);
        let filter = profile.catalog_filter();

        let mut by_director = film("f2", &["horror"], &["US"], "");
        by_director.staff = vec![staff("d1", Profession::Director)];
        let unrelated = film("f3", &["horror"], &["US"], "");

        assert!(filter.matches(&to_document(&by_director).unwrap()));
        assert!(!filter.matches(&to_document(&unrelated).unwrap()));
        assert!(!filter.matches(&to_document(&liked).unwrap()));
    }

    #[test]
    fn test_empty_profile() {
        let profile = engine().build_profile(&[]);
        assert!(profile.is_empty());
        assert!(engine().rank(&profile, &[film("a", &["drama"], &[], "Drama")]).is_empty());
    }
}
