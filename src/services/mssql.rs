use async_trait::async_trait;
use futures::stream::TryStreamExt;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt}; // Required for async compatibility with `tiberius`

use crate::config::SqlServerConfig;
use crate::error::DatabaseError;
use crate::models::db::{DocumentStore, ReplaceOutcome};
use crate::models::query::{run_query, Document, Filter, Projection, SortSpec};

// Keeps DELETE statements well under the SQL Server parameter/statement limits.
const DELETE_BATCH: usize = 500;

/// Document store on SQL Server: one table per collection, one JSON document
/// per row. Queries load the collection and evaluate filters in-process.
pub struct SqlServerStore {
    client: Client<Compat<TcpStream>>,
}

impl SqlServerStore {
    pub async fn connect(settings: &SqlServerConfig) -> Result<Self, DatabaseError> {
        let mut config = Config::new();
        config.host(&settings.host);
        config.port(settings.port);
        config.authentication(AuthMethod::sql_server(&settings.username, &settings.password));
        config.database(&settings.database);

        if settings.trust_cert {
            // Accept self-signed certificates
            config.trust_cert();
        }

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        tcp.set_nodelay(true)
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        log::info!("Connected to SQL Server at {}:{}", settings.host, settings.port);
        Ok(SqlServerStore { client })
    }

    /// All rows of a collection as (row id, document). Rows holding invalid
    /// JSON are skipped.
    async fn load(
        &mut self,
        operation: &'static str,
        collection: &str,
    ) -> Result<Vec<(i64, Document)>, DatabaseError> {
        let table = table_name(operation, collection)?;
        let query = format!(
            "IF OBJECT_ID(N'dbo.{table}', N'U') IS NOT NULL SELECT id, doc FROM dbo.{table} ORDER BY id",
            table = table
        );

        let mut stream = self
            .client
            .simple_query(query)
            .await
            .map_err(|e| DatabaseError::query(operation, collection, e))?;

        let mut documents = Vec::new();
        while let Some(item) = stream
            .try_next()
            .await
            .map_err(|e| DatabaseError::query(operation, collection, e))?
        {
            if let Some(row) = item.into_row() {
                let id: Option<i64> = row.get(0);
                let body: Option<&str> = row.get(1);
                match (id, body.map(serde_json::from_str::<Document>)) {
                    (Some(id), Some(Ok(document))) => documents.push((id, document)),
                    (id, _) => log::warn!("Skipping unreadable row {:?} in {}", id, collection),
                }
            }
        }
        Ok(documents)
    }
}

/// Collection names become table names, so only plain identifiers pass.
fn table_name(operation: &'static str, collection: &str) -> Result<String, DatabaseError> {
    let valid = !collection.is_empty()
        && collection
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(collection.to_string())
    } else {
        Err(DatabaseError::query(
            operation,
            collection,
            "collection names may only contain letters, digits and underscores",
        ))
    }
}

#[async_trait]
impl DocumentStore for SqlServerStore {
    async fn get(
        &mut self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, DatabaseError> {
        let rows = self.load("get", collection).await?;
        Ok(run_query(
            rows.iter().map(|(_, document)| document),
            filter,
            None,
            limit,
            projection,
        ))
    }

    async fn count(&mut self, collection: &str, filter: &Filter) -> Result<usize, DatabaseError> {
        let rows = self.load("count", collection).await?;
        Ok(rows
            .iter()
            .filter(|(_, document)| filter.matches(document))
            .count())
    }

    async fn get_sorted_limited(
        &mut self,
        collection: &str,
        filter: &Filter,
        sort: &SortSpec,
        limit: usize,
    ) -> Result<Vec<Document>, DatabaseError> {
        let rows = self.load("get_sorted_limited", collection).await?;
        Ok(run_query(
            rows.iter().map(|(_, document)| document),
            filter,
            Some(sort),
            Some(limit),
            None,
        ))
    }

    async fn replace(
        &mut self,
        collection: &str,
        delete_filter: &Filter,
        records: Vec<Document>,
    ) -> Result<ReplaceOutcome, DatabaseError> {
        let table = table_name("replace", collection)?;
        self.ensure_collection(collection).await?;

        let doomed: Vec<i64> = self
            .load("replace", collection)
            .await?
            .into_iter()
            .filter(|(_, document)| delete_filter.matches(document))
            .map(|(id, _)| id)
            .collect();

        for chunk in doomed.chunks(DELETE_BATCH) {
            let ids: Vec<String> = chunk.iter().map(i64::to_string).collect();
            let statement = format!("DELETE FROM dbo.{} WHERE id IN ({})", table, ids.join(","));
            self.client
                .execute(statement, &[])
                .await
                .map_err(|e| DatabaseError::query("replace", collection, e))?;
        }

        let insert = format!("INSERT INTO dbo.{} (doc) VALUES (@P1)", table);
        for record in &records {
            let body = serde_json::to_string(record)
                .map_err(|e| DatabaseError::query("replace", collection, e))?;
            self.client
                .execute(insert.as_str(), &[&body])
                .await
                .map_err(|e| DatabaseError::query("replace", collection, e))?;
        }

        Ok(ReplaceOutcome {
            deleted: doomed.len(),
            inserted: records.len(),
        })
    }

    async fn ensure_collection(&mut self, name: &str) -> Result<(), DatabaseError> {
        let table = table_name("ensure_collection", name)?;
        let statement = format!(
            "IF OBJECT_ID(N'dbo.{table}', N'U') IS NULL \
             CREATE TABLE dbo.{table} (id BIGINT IDENTITY(1,1) PRIMARY KEY, doc NVARCHAR(MAX) NOT NULL)",
            table = table
        );
        self.client
            .execute(statement, &[])
            .await
            .map_err(|e| DatabaseError::query("ensure_collection", name, e))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DatabaseError> {
        // the connection closes when the client is dropped
        log::info!("Closing SQL Server document store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names_are_plain_identifiers() {
        assert_eq!(table_name("get", "film_top").unwrap(), "film_top");
        tokio_test::assert_err!(table_name("get", "film; DROP TABLE x"));
        tokio_test::assert_err!(table_name("get", ""));
    }
}
