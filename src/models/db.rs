use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::DatabaseError;
use crate::models::activity::{LikeRecord, RatingRecord, SubjectId, UnifiedAffinity};
use crate::models::film::{FilmDocument, TopFilmRecord};
use crate::models::query::{from_document, Document, Filter, Projection, SortSpec};

/// Outcome of a replace-by-filter write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub deleted: usize,
    pub inserted: usize,
}

/// Contract the engine needs from a document store.
#[async_trait]
pub trait DocumentStore {
    async fn get(
        &mut self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, DatabaseError>;

    async fn get_one(
        &mut self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
    ) -> Result<Option<Document>, DatabaseError> {
        let mut found = self.get(collection, filter, projection, Some(1)).await?;
        Ok(found.pop())
    }

    async fn count(&mut self, collection: &str, filter: &Filter) -> Result<usize, DatabaseError>;

    async fn get_sorted_limited(
        &mut self,
        collection: &str,
        filter: &Filter,
        sort: &SortSpec,
        limit: usize,
    ) -> Result<Vec<Document>, DatabaseError>;

    /// Deletes the documents matching `delete_filter`, then inserts `records`.
    /// The two steps are not atomic.
    async fn replace(
        &mut self,
        collection: &str,
        delete_filter: &Filter,
        records: Vec<Document>,
    ) -> Result<ReplaceOutcome, DatabaseError>;

    /// Creates the collection if it does not exist yet.
    async fn ensure_collection(&mut self, name: &str) -> Result<(), DatabaseError>;

    async fn close(&mut self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

/// Typed documents plus how many stored documents could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub records: Vec<T>,
    pub malformed: usize,
}

fn decode_all<T: DeserializeOwned>(collection: &str, documents: Vec<Document>) -> Decoded<T> {
    let total = documents.len();
    let records: Vec<T> = documents
        .into_iter()
        .filter_map(|document| match from_document(document) {
            Ok(record) => Some(record),
            Err(e) => {
                log::debug!("Skipping undecodable document in {}: {}", collection, e);
                None
            }
        })
        .collect();
    let malformed = total - records.len();
    if malformed > 0 {
        log::warn!("{} undecodable documents skipped in {}", malformed, collection);
    }
    Decoded { records, malformed }
}

/// Shared handle to a store backend. Attaches operation context to errors and
/// offers typed loaders for the engine's collections.
#[derive(Clone)]
pub struct Database {
    backend: Arc<Mutex<dyn DocumentStore + Send + Sync>>,
}

impl Database {
    pub fn new(backend: Arc<Mutex<dyn DocumentStore + Send + Sync>>) -> Self {
        Database { backend }
    }

    pub fn from_store<S: DocumentStore + Send + Sync + 'static>(store: S) -> Self {
        Database::new(Arc::new(Mutex::new(store)))
    }

    pub async fn get(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
    ) -> Result<Vec<Document>, DatabaseError> {
        let mut backend = self.backend.lock().await;
        backend
            .get(collection, filter, projection, None)
            .await
            .map_err(|e| context("get", collection, e))
    }

    pub async fn get_one(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
    ) -> Result<Option<Document>, DatabaseError> {
        let mut backend = self.backend.lock().await;
        backend
            .get_one(collection, filter, projection)
            .await
            .map_err(|e| context("get_one", collection, e))
    }

    pub async fn count(&self, collection: &str, filter: &Filter) -> Result<usize, DatabaseError> {
        let mut backend = self.backend.lock().await;
        backend
            .count(collection, filter)
            .await
            .map_err(|e| context("count", collection, e))
    }

    pub async fn get_sorted_limited(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &SortSpec,
        limit: usize,
    ) -> Result<Vec<Document>, DatabaseError> {
        let mut backend = self.backend.lock().await;
        backend
            .get_sorted_limited(collection, filter, sort, limit)
            .await
            .map_err(|e| context("get_sorted_limited", collection, e))
    }

    pub async fn replace(
        &self,
        collection: &str,
        delete_filter: &Filter,
        records: Vec<Document>,
    ) -> Result<ReplaceOutcome, DatabaseError> {
        let mut backend = self.backend.lock().await;
        backend
            .replace(collection, delete_filter, records)
            .await
            .map_err(|e| context("replace", collection, e))
    }

    pub async fn ensure_collection(&self, name: &str) -> Result<(), DatabaseError> {
        let mut backend = self.backend.lock().await;
        backend
            .ensure_collection(name)
            .await
            .map_err(|e| context("ensure_collection", name, e))
    }

    pub async fn close(&self) -> Result<(), DatabaseError> {
        let mut backend = self.backend.lock().await;
        backend
            .close()
            .await
            .map_err(|e| DatabaseError::Close(e.to_string()))
    }

    pub async fn load_ratings(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Decoded<RatingRecord>, DatabaseError> {
        let documents = self.get(collection, filter, None).await?;
        Ok(decode_all(collection, documents))
    }

    pub async fn load_likes(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Decoded<LikeRecord>, DatabaseError> {
        let documents = self.get(collection, filter, None).await?;
        Ok(decode_all(collection, documents))
    }

    /// The subject's most recently updated likes.
    pub async fn load_recent_likes(
        &self,
        collection: &str,
        subject: &SubjectId,
        limit: usize,
    ) -> Result<Decoded<LikeRecord>, DatabaseError> {
        let documents = self
            .get_sorted_limited(
                collection,
                &subject.filter(),
                &SortSpec::descending("updatedAt"),
                limit,
            )
            .await?;
        Ok(decode_all(collection, documents))
    }

    pub async fn load_films(
        &self,
        collection: &str,
        filter: &Filter,
        fields: &[&str],
    ) -> Result<Decoded<FilmDocument>, DatabaseError> {
        let projection = Projection::new(fields.iter().copied());
        let documents = self.get(collection, filter, Some(&projection)).await?;
        Ok(decode_all(collection, documents))
    }

    pub async fn load_top_pool(&self, collection: &str) -> Result<Vec<TopFilmRecord>, DatabaseError> {
        let documents = self.get(collection, &Filter::All, None).await?;
        Ok(decode_all(collection, documents).records)
    }

    pub async fn load_activity(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Decoded<UnifiedAffinity>, DatabaseError> {
        let documents = self.get(collection, filter, None).await?;
        Ok(decode_all(collection, documents))
    }
}

// Backends report their own context; keep it and only wrap bare failures.
fn context(operation: &'static str, collection: &str, error: DatabaseError) -> DatabaseError {
    match error {
        DatabaseError::Connection(message) => DatabaseError::query(operation, collection, message),
        other => other,
    }
}
