/// Store failures, tagged with the operation and collection that hit them.
#[derive(thiserror::Error, Debug)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("{operation} on '{collection}' failed: {message}")]
    Query {
        operation: &'static str,
        collection: String,
        message: String,
    },

    #[error("Close error: {0}")]
    Close(String),
}

impl DatabaseError {
    pub fn query(operation: &'static str, collection: &str, message: impl ToString) -> Self {
        DatabaseError::Query {
            operation,
            collection: collection.to_string(),
            message: message.to_string(),
        }
    }
}

/// Engine-level errors. Everything here is fatal for the current run.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Missing required setting {0}")]
    Missing(String),
}
