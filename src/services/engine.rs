use std::collections::BTreeSet;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::activity::{ItemId, SubjectId};
use crate::models::db::Database;
use crate::models::film::{FilmDocument, FILM_ID_FIELD};
use crate::models::query::{from_document, to_document, Document, Filter, Projection};
use crate::models::recommendation::{
    EngineResponse, RecommendationMode, RecommendationRecord, RunSummary,
};
use crate::services::aggregator::{seeded_rng, shuffled_pool, Aggregation, Aggregator};
use crate::services::content::ContentEngine;
use crate::services::matrix::{AffinityMatrix, BuiltMatrix, MatrixBuilder};
use crate::services::normalizer::normalize;
use crate::services::similarity::{DistanceRow, DistanceTable, PreparedView, SimilarityEngine};
use crate::services::top_films::rank_top_films;

/// Where cold-start candidates are looked up.
enum Catalog {
    /// Ask the store for every lookup.
    Store,
    /// Film features loaded once for the whole run.
    Loaded(Vec<Document>),
}

/// Entry point of the recommendation computation.
///
/// Every public operation converts failures into an error response, so the
/// request layer never sees engine internals.
pub struct RecommendationEngine {
    config: EngineConfig,
    db: Database,
    builder: MatrixBuilder,
    similarity: SimilarityEngine,
    aggregator: Aggregator,
    content: ContentEngine,
}

impl RecommendationEngine {
    pub fn new(config: EngineConfig, db: Database) -> Self {
        RecommendationEngine {
            builder: MatrixBuilder::new(config.min_activity),
            similarity: SimilarityEngine::new(config.similarity.clone()),
            aggregator: Aggregator::new(config.activity_trigger_limit, config.shuffle_seed),
            content: ContentEngine::new(
                config.profile_actor_limit,
                config.candidate_actor_limit,
                config.number_similar_films,
            ),
            config,
            db,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Recomputes the global top-film pool.
    pub async fn compute_top_items(&self) -> EngineResponse<usize> {
        match self.try_compute_top_items().await {
            Ok(count) => EngineResponse::ok(format!("{} top films stored", count), count),
            Err(e) => fail("compute_top_items", e),
        }
    }

    /// Recomputes recommendations for every subject with activity.
    pub async fn compute_recommendations_for_all(&self) -> EngineResponse<RunSummary> {
        match self.try_compute_for_all().await {
            Ok(summary) => EngineResponse::ok(
                format!(
                    "{} recommendations stored for {} subjects",
                    summary.records, summary.subjects
                ),
                summary,
            ),
            Err(e) => fail("compute_recommendations_for_all", e),
        }
    }

    /// Recomputes recommendations for one subject against the stored activity snapshot.
    pub async fn compute_recommendations_for_subject(
        &self,
        subject: &SubjectId,
    ) -> EngineResponse<RunSummary> {
        match self.try_compute_for_subject(subject).await {
            Ok(summary) => EngineResponse::ok(
                format!("{} recommendations stored for {}", summary.records, subject),
                summary,
            ),
            Err(e) => fail("compute_recommendations_for_subject", e),
        }
    }

    /// Films to show a subject now: stored recommendations when the subject is
    /// active and has some, the top pool otherwise.
    pub async fn recommendations_for(&self, subject: &SubjectId) -> EngineResponse<Vec<ItemId>> {
        match self.try_recommendations_for(subject).await {
            Ok((films, mode)) => {
                EngineResponse::ok(format!("{} films ({}) for {}", films.len(), mode, subject), films)
            }
            Err(e) => fail("recommendations_for", e),
        }
    }

    /// Catalog films closest in content to `film_id`.
    pub async fn similar_items(&self, film_id: &str) -> EngineResponse<Vec<ItemId>> {
        match self.try_similar_items(film_id).await {
            Ok(films) => EngineResponse::ok(format!("{} films similar to {}", films.len(), film_id), films),
            Err(e) => fail("similar_items", e),
        }
    }

    async fn try_compute_top_items(&self) -> EngineResult<usize> {
        let collections = &self.config.collections;
        let films = self
            .db
            .load_films(&collections.films, &Filter::All, &FilmDocument::RATING_FIELDS)
            .await?;
        let top = rank_top_films(&films.records, self.config.top_rating, self.config.missing_rating);
        log::info!("Got {} top films out of {}", top.len(), films.records.len());

        let documents = top.iter().map(to_document).collect::<Result<Vec<_>, _>>()?;
        self.db.ensure_collection(&collections.top_films).await?;
        let outcome = self
            .db
            .replace(&collections.top_films, &Filter::All, documents)
            .await?;
        log::info!("{} top films inserted", outcome.inserted);
        Ok(outcome.inserted)
    }

    async fn try_compute_for_all(&self) -> EngineResult<RunSummary> {
        let collections = &self.config.collections;

        let ratings = self.db.load_ratings(&collections.ratings, &Filter::All).await?;
        let likes = self.db.load_likes(&collections.likes, &Filter::All).await?;
        let activity = normalize(&ratings.records, &likes.records);
        log::info!("Got users activity: {}", activity.rows.len());

        let built = self.builder.build(&activity.rows);
        let snapshot = documents_of(&built.all.to_affinities())?;
        self.db.ensure_collection(&collections.activity).await?;
        let outcome = self.db.replace(&collections.activity, &Filter::All, snapshot).await?;
        log::info!("{} users activity inserted", outcome.inserted);

        let distances = self.similarity.batch(&built.retained);
        let fallback = self.similarity.fallback_view(&built.retained);
        let top_pool = self.top_pool().await?;
        let catalog = if built.dropped_subjects() > 0 {
            Catalog::Loaded(self.load_catalog().await?)
        } else {
            Catalog::Store
        };

        let mut summary = RunSummary {
            dropped_records: activity.dropped + ratings.malformed + likes.malformed,
            ..RunSummary::default()
        };
        let mut records = Vec::new();
        for subject in built.all.subjects() {
            let aggregation = self
                .route(subject, &built, Some(&distances), &fallback, &top_pool, &catalog)
                .await?;
            summary.record_mode(aggregation.mode, aggregation.items.len());
            for film in aggregation.items {
                records.push(to_document(&RecommendationRecord::new(subject, film))?);
            }
        }

        self.db.ensure_collection(&collections.recommendations).await?;
        let outcome = self
            .db
            .replace(&collections.recommendations, &Filter::All, records)
            .await?;
        log::info!(
            "{} recommendations inserted ({} replaced), modes: {:?}",
            outcome.inserted,
            outcome.deleted,
            summary.modes
        );
        Ok(summary)
    }

    async fn try_compute_for_subject(&self, subject: &SubjectId) -> EngineResult<RunSummary> {
        let collections = &self.config.collections;

        let ratings = self
            .db
            .load_ratings(&collections.ratings, &subject.filter())
            .await?;
        let likes = self
            .db
            .load_recent_likes(&collections.likes, subject, self.config.activity_trigger_limit)
            .await?;
        let mut own = normalize(&ratings.records, &likes.records);
        own.retain_subject(subject);
        log::info!("Got user activity: {}", own.rows.len());

        let others = self
            .db
            .load_activity(&collections.activity, &subject.filter().negate())
            .await?;
        let mut rows = others.records;
        rows.extend(own.rows.iter().cloned());
        log::info!("Got all users activity: {}", rows.len());

        let built = self.builder.build(&rows);
        let fallback = self.similarity.fallback_view(&built.retained);
        let top_pool = self.top_pool().await?;
        let aggregation = self
            .route(subject, &built, None, &fallback, &top_pool, &Catalog::Store)
            .await?;

        let records = aggregation
            .items
            .iter()
            .map(|film| to_document(&RecommendationRecord::new(subject, film.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        self.db.ensure_collection(&collections.recommendations).await?;
        let outcome = self
            .db
            .replace(&collections.recommendations, &subject.filter(), records)
            .await?;
        log::info!(
            "{} recommendations for {} inserted ({})",
            outcome.inserted,
            subject,
            aggregation.mode
        );

        let own_snapshot = documents_of(&AffinityMatrix::from_affinities(&own.rows).to_affinities())?;
        self.db.ensure_collection(&collections.activity).await?;
        self.db
            .replace(&collections.activity, &subject.filter(), own_snapshot)
            .await?;

        let mut summary = RunSummary {
            dropped_records: own.dropped + ratings.malformed + likes.malformed,
            ..RunSummary::default()
        };
        summary.record_mode(aggregation.mode, outcome.inserted);
        Ok(summary)
    }

    /// Picks the mode for one subject and produces its recommendation set.
    async fn route(
        &self,
        subject: &SubjectId,
        built: &BuiltMatrix,
        batch: Option<&DistanceTable>,
        fallback: &PreparedView<'_>,
        top_pool: &[ItemId],
        catalog: &Catalog,
    ) -> EngineResult<Aggregation> {
        if !built.retained.contains(subject) {
            log::debug!(
                "{} below activity threshold ({} scored films), cold start",
                subject,
                built.all.non_zero_count(subject)
            );
            return self.cold_start(subject, &built.all, top_pool, catalog).await;
        }

        let incremental: DistanceRow;
        let distances = match batch.and_then(|table| table.get(subject)) {
            Some(row) => row,
            None => {
                incremental = self.similarity.incremental(&built.retained, subject);
                &incremental
            }
        };

        let neighbors = self.similarity.neighbors(fallback, subject, distances);
        if neighbors.is_empty() {
            log::debug!("{} has no neighbors, serving top films", subject);
            return Ok(self.aggregator.top_only(subject, &built.all, top_pool));
        }

        let aggregation = self
            .aggregator
            .aggregate(subject, &neighbors, &built.all, top_pool);
        log::debug!(
            "{}: {} films from {} neighbors ({:?}), mode {}",
            subject,
            aggregation.items.len(),
            neighbors.subjects.len(),
            neighbors.source,
            aggregation.mode
        );
        Ok(aggregation)
    }

    /// Content-based recommendations from the subject's liked films; the top
    /// pool when there is nothing to build a profile from.
    async fn cold_start(
        &self,
        subject: &SubjectId,
        matrix: &AffinityMatrix,
        top_pool: &[ItemId],
        catalog: &Catalog,
    ) -> EngineResult<Aggregation> {
        let liked = matrix.liked_items(subject);
        if liked.is_empty() {
            return Ok(self.aggregator.top_only(subject, matrix, top_pool));
        }

        let liked_films = self
            .catalog_films(catalog, &Filter::is_in(FILM_ID_FIELD, liked))
            .await?;
        let mut profile = self.content.build_profile(&liked_films);
        if profile.is_empty() {
            return Ok(self.aggregator.top_only(subject, matrix, top_pool));
        }
        profile.mark_watched(matrix.seen_items(subject));

        let candidates = self.catalog_films(catalog, &profile.catalog_filter()).await?;
        let ranked = self.content.rank(&profile, &candidates);
        if ranked.is_empty() {
            return Ok(self.aggregator.top_only(subject, matrix, top_pool));
        }

        Ok(Aggregation {
            items: ranked.into_iter().map(|scored| scored.film_id).collect(),
            mode: RecommendationMode::ColdStart,
        })
    }

    async fn catalog_films(&self, catalog: &Catalog, filter: &Filter) -> EngineResult<Vec<FilmDocument>> {
        match catalog {
            Catalog::Store => Ok(self
                .db
                .load_films(&self.config.collections.films, filter, &FilmDocument::FEATURE_FIELDS)
                .await?
                .records),
            Catalog::Loaded(documents) => Ok(documents
                .iter()
                .filter(|document| filter.matches(document))
                .filter_map(|document| from_document(document.clone()).ok())
                .collect()),
        }
    }

    async fn load_catalog(&self) -> EngineResult<Vec<Document>> {
        let projection = Projection::new(FilmDocument::FEATURE_FIELDS);
        let documents = self
            .db
            .get(&self.config.collections.films, &Filter::All, Some(&projection))
            .await?;
        log::info!("Got {} films", documents.len());
        Ok(documents)
    }

    /// Film ids of the top pool, in a stable order.
    async fn top_pool(&self) -> EngineResult<Vec<ItemId>> {
        let pool: BTreeSet<ItemId> = self
            .db
            .load_top_pool(&self.config.collections.top_films)
            .await?
            .into_iter()
            .map(|record| record.film_id)
            .collect();
        Ok(pool.into_iter().collect())
    }

    async fn try_recommendations_for(
        &self,
        subject: &SubjectId,
    ) -> EngineResult<(Vec<ItemId>, RecommendationMode)> {
        let collections = &self.config.collections;
        let filter = subject.filter();

        let activity = self.db.count(&collections.likes, &filter).await?
            + self.db.count(&collections.ratings, &filter).await?;
        let stored = self.db.count(&collections.recommendations, &filter).await?;
        log::info!(
            "{}: activity {}, stored recommendations {}",
            subject,
            activity,
            stored
        );

        let mut rng = seeded_rng(self.config.shuffle_seed, &subject.to_string());
        let film_ids = Projection::new(["filmId"]);

        if activity < self.config.min_activity || stored == 0 {
            let mut seen = BTreeSet::new();
            for collection in [&collections.likes, &collections.ratings] {
                seen.extend(film_ids_of(self.db.get(collection, &filter, Some(&film_ids)).await?));
            }
            let pool = self.top_pool().await?;
            let mut films = shuffled_pool(&pool, &seen, &mut rng);
            films.truncate(self.config.top_limit);
            return Ok((films, RecommendationMode::TopOnly));
        }

        let stored: Vec<ItemId> = film_ids_of(
            self.db
                .get(&collections.recommendations, &filter, Some(&film_ids))
                .await?,
        )
        .into_iter()
        .collect();
        let mut films = shuffled_pool(&stored, &BTreeSet::new(), &mut rng);
        films.truncate(self.config.top_limit);
        Ok((films, RecommendationMode::Collaborative))
    }

    async fn try_similar_items(&self, film_id: &str) -> EngineResult<Vec<ItemId>> {
        let collections = &self.config.collections;
        let projection = Projection::new(FilmDocument::FEATURE_FIELDS);
        let film: FilmDocument = match self
            .db
            .get_one(&collections.films, &Filter::eq(FILM_ID_FIELD, film_id), Some(&projection))
            .await?
        {
            Some(document) => from_document(document)?,
            None => return Err(EngineError::InvalidInput(format!("unknown film '{}'", film_id))),
        };

        let profile = self.content.build_profile([&film]);
        let candidates = self
            .catalog_films(&Catalog::Store, &profile.catalog_filter())
            .await?;
        Ok(self
            .content
            .rank(&profile, &candidates)
            .into_iter()
            .map(|scored| scored.film_id)
            .collect())
    }
}

fn fail<T>(operation: &str, error: EngineError) -> EngineResponse<T> {
    log::error!("{} failed: {}", operation, error);
    EngineResponse::error(operation, &error)
}

fn documents_of<T: serde::Serialize>(records: &[T]) -> EngineResult<Vec<Document>> {
    records
        .iter()
        .map(|record| to_document(record).map_err(EngineError::from))
        .collect()
}

/// Sorted, de-duplicated `filmId` values of the documents.
fn film_ids_of(documents: Vec<Document>) -> BTreeSet<ItemId> {
    documents
        .into_iter()
        .filter_map(|mut document| match document.remove("filmId") {
            Some(serde_json::Value::String(id)) => Some(id),
            _ => None,
        })
        .collect()
}
