use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::DatabaseError;
use crate::models::db::{DocumentStore, ReplaceOutcome};
use crate::models::query::{run_query, Document, Filter, Projection, SortSpec};

/// Document store kept in process memory. Reading a collection that was never
/// created yields no documents.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    collections: HashMap<String, Vec<Document>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a collection, replacing whatever it held.
    pub fn with_collection(mut self, name: &str, documents: Vec<Document>) -> Self {
        self.collections.insert(name.to_string(), documents);
        self
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn documents(&self, name: &str) -> &[Document] {
        self.collections.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(
        &mut self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, DatabaseError> {
        Ok(run_query(self.documents(collection), filter, None, limit, projection))
    }

    async fn count(&mut self, collection: &str, filter: &Filter) -> Result<usize, DatabaseError> {
        Ok(self
            .documents(collection)
            .iter()
            .filter(|document| filter.matches(document))
            .count())
    }

    async fn get_sorted_limited(
        &mut self,
        collection: &str,
        filter: &Filter,
        sort: &SortSpec,
        limit: usize,
    ) -> Result<Vec<Document>, DatabaseError> {
        Ok(run_query(self.documents(collection), filter, Some(sort), Some(limit), None))
    }

    async fn replace(
        &mut self,
        collection: &str,
        delete_filter: &Filter,
        records: Vec<Document>,
    ) -> Result<ReplaceOutcome, DatabaseError> {
        let documents = self.collections.entry(collection.to_string()).or_default();
        let before = documents.len();
        documents.retain(|document| !delete_filter.matches(document));
        let deleted = before - documents.len();
        let inserted = records.len();
        documents.extend(records);
        Ok(ReplaceOutcome { deleted, inserted })
    }

    async fn ensure_collection(&mut self, name: &str) -> Result<(), DatabaseError> {
        self.collections.entry(name.to_string()).or_default();
        Ok(())
    }
}
