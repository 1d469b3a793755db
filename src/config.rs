use chrono_tz::Tz;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::services::similarity::Metric;

/// Collection names of the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionNames {
    pub films: String,
    pub likes: String,
    pub ratings: String,
    pub recommendations: String,
    pub top_films: String,
    pub activity: String,
}

impl Default for CollectionNames {
    fn default() -> Self {
        CollectionNames {
            films: "film".to_string(),
            likes: "like_dislike".to_string(),
            ratings: "film_user_rating".to_string(),
            recommendations: "film_with_recommendations".to_string(),
            top_films: "film_top".to_string(),
            activity: "user_activity".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityConfig {
    pub primary: Metric,
    pub secondary: Metric,
    /// Inclusive distance band a neighbor must fall into under the primary metric.
    pub lower_bound: f64,
    pub upper_bound: f64,
    /// Neighbors kept when the secondary metric takes over.
    pub fallback_top_k: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        SimilarityConfig {
            primary: Metric::Cosine,
            secondary: Metric::Pearson,
            lower_bound: 0.01,
            upper_bound: 0.3,
            fallback_top_k: 10,
        }
    }
}

/// Thresholds and knobs of the recommendation engine. Built once, then shared read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub min_activity: usize,
    pub activity_trigger_limit: usize,
    pub top_limit: usize,
    pub top_rating: f64,
    pub missing_rating: f64,
    pub number_similar_films: usize,
    pub profile_actor_limit: usize,
    pub candidate_actor_limit: usize,
    pub shuffle_seed: u64,
    pub similarity: SimilarityConfig,
    pub collections: CollectionNames,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            min_activity: 10,
            activity_trigger_limit: 50,
            top_limit: 20,
            top_rating: 7.0,
            missing_rating: 6.0,
            number_similar_films: 20,
            profile_actor_limit: 4,
            candidate_actor_limit: 10,
            shuffle_seed: 0,
            similarity: SimilarityConfig::default(),
            collections: CollectionNames::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlServerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub trust_cert: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Memory,
    SqlServer(SqlServerConfig),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleConfig {
    pub cron: String,
    pub timezone: Tz,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub store: StoreConfig,
    pub bind_addr: SocketAddr,
    pub schedule: Option<ScheduleConfig>,
}

impl AppConfig {
    /// Reads the configuration from the environment (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let settings = Settings { lookup };
        let defaults = EngineConfig::default();
        let similarity_defaults = SimilarityConfig::default();
        let collection_defaults = CollectionNames::default();

        let similarity = SimilarityConfig {
            primary: settings.parse_or("SIMILARITY_PRIMARY_METRIC", similarity_defaults.primary)?,
            secondary: settings
                .parse_or("SIMILARITY_SECONDARY_METRIC", similarity_defaults.secondary)?,
            lower_bound: settings.parse_or("SIMILARITY_LOWER_BOUND", similarity_defaults.lower_bound)?,
            upper_bound: settings.parse_or("SIMILARITY_UPPER_BOUND", similarity_defaults.upper_bound)?,
            fallback_top_k: settings
                .parse_or("SIMILARITY_FALLBACK_TOP_K", similarity_defaults.fallback_top_k)?,
        };
        if similarity.lower_bound > similarity.upper_bound {
            return Err(ConfigError::InvalidValue {
                key: "SIMILARITY_LOWER_BOUND".to_string(),
                value: similarity.lower_bound.to_string(),
                reason: "must not exceed SIMILARITY_UPPER_BOUND".to_string(),
            });
        }

        let collections = CollectionNames {
            films: settings.string_or("MONGO_FILMS_TABLE", collection_defaults.films),
            likes: settings.string_or("MONGO_FILMS_LIKES_TABLE", collection_defaults.likes),
            ratings: settings.string_or("MONGO_FILMS_RATINGS_TABLE", collection_defaults.ratings),
            recommendations: settings
                .string_or("MONGO_USER_RECOMS_TABLE", collection_defaults.recommendations),
            top_films: settings.string_or("MONGO_FILMS_TOP_TABLE", collection_defaults.top_films),
            activity: settings.string_or("MONGO_USER_ACTIVITY_TABLE", collection_defaults.activity),
        };

        let engine = EngineConfig {
            min_activity: settings.parse_or("DEFAULT_USER_ACTIVITY_LIMIT", defaults.min_activity)?,
            activity_trigger_limit: settings
                .parse_or("DEFAULT_ACTIVITY_TRIGGER_LIMIT", defaults.activity_trigger_limit)?,
            top_limit: settings.parse_or("DEFAULT_TOP_LIMIT", defaults.top_limit)?,
            top_rating: settings.parse_or("DEFAULT_TOP_RATING", defaults.top_rating)?,
            missing_rating: settings.parse_or("DEFAULT_FILM_MISSED_RATING", defaults.missing_rating)?,
            number_similar_films: settings
                .parse_or("NUMBER_SIMILAR_FILMS", defaults.number_similar_films)?,
            profile_actor_limit: settings
                .parse_or("PROFILE_ACTOR_LIMIT", defaults.profile_actor_limit)?,
            candidate_actor_limit: settings
                .parse_or("CANDIDATE_ACTOR_LIMIT", defaults.candidate_actor_limit)?,
            shuffle_seed: settings.parse_or("SHUFFLE_SEED", defaults.shuffle_seed)?,
            similarity,
            collections,
        };

        let store = match settings.string_or("DB_TYPE", "memory".to_string()).as_str() {
            "memory" => StoreConfig::Memory,
            "sqlserver" => StoreConfig::SqlServer(SqlServerConfig {
                host: settings.required("DB_HOST")?,
                port: settings.parse_or("DB_PORT", 1433)?,
                username: settings.required("DB_USERNAME")?,
                password: settings.required("DB_PASSWORD")?,
                database: settings.required("DB_NAME")?,
                trust_cert: settings.parse_or("DB_TRUST_CERT", true)?,
            }),
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "DB_TYPE".to_string(),
                    value: other.to_string(),
                    reason: "expected 'memory' or 'sqlserver'".to_string(),
                })
            }
        };

        let bind_addr = settings.parse_or("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8000)))?;

        let schedule = match (settings.lookup)("RECOMPUTE_CRON") {
            Some(cron) if !cron.trim().is_empty() => Some(ScheduleConfig {
                cron,
                timezone: settings.parse_or("RECOMPUTE_TIMEZONE", Tz::UTC)?,
            }),
            _ => None,
        };

        Ok(AppConfig {
            engine,
            store,
            bind_addr,
            schedule,
        })
    }
}

struct Settings<F> {
    lookup: F,
}

impl<F> Settings<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string_or(&self, key: &str, default: String) -> String {
        (self.lookup)(key)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(default)
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        (self.lookup)(key)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.lookup)(key) {
            Some(raw) if !raw.trim().is_empty() => {
                raw.trim()
                    .parse::<T>()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: key.to_string(),
                        value: raw.clone(),
                        reason: e.to_string(),
                    })
            }
            _ => Ok(default),
        }
    }
}
