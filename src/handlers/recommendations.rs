use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::Filter;

use crate::error::EngineError;
use crate::models::activity::SubjectId;
use crate::models::recommendation::EngineResponse;
use crate::services::engine::RecommendationEngine;

/// `?anonymous=true` addresses the subject by its anonymous identifier.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SubjectQuery {
    #[serde(default)]
    pub anonymous: bool,
}

pub fn global_handler(
    engine: Arc<RecommendationEngine>,
) -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    calculate_handler(engine.clone())
        .or(recommend_handler(engine))
        .or(health_handler())
}

fn with_engine(
    engine: Arc<RecommendationEngine>,
) -> impl warp::Filter<Extract = (Arc<RecommendationEngine>,), Error = Infallible> + Clone {
    warp::any().map(move || engine.clone())
}

fn calculate_handler(
    engine: Arc<RecommendationEngine>,
) -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let base_route = warp::post().and(warp::path("calculate"));

    let top_route = base_route
        .clone()
        .and(warp::path("top"))
        .and(warp::path::end())
        .and(with_engine(engine.clone()))
        .and_then(calculate_top);

    let all_route = base_route
        .clone()
        .and(warp::path("recommendations"))
        .and(warp::path::end())
        .and(with_engine(engine.clone()))
        .and_then(calculate_all);

    let subject_route = base_route
        .and(warp::path("recommendations"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::query::<SubjectQuery>())
        .and(with_engine(engine))
        .and_then(calculate_subject);

    top_route.or(all_route).or(subject_route)
}

fn recommend_handler(
    engine: Arc<RecommendationEngine>,
) -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let base_route = warp::get().and(warp::path("recommend"));

    let user_route = base_route
        .clone()
        .and(warp::path("user"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::query::<SubjectQuery>())
        .and(with_engine(engine.clone()))
        .and_then(get_recommendation);

    let film_route = base_route
        .and(warp::path("film"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(with_engine(engine))
        .and_then(get_similar_films);

    user_route.or(film_route)
}

fn health_handler(
) -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::get()
        .and(warp::path("health"))
        .and(warp::path::end())
        .map(|| warp::reply::json(&serde_json::json!({ "status": "ok" })))
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().to_string()
}

/// Subject named by a path segment; `None` when the segment is blank.
pub fn subject_from_path(raw: &str, query: SubjectQuery) -> Option<SubjectId> {
    let id = decode(raw);
    if query.anonymous {
        SubjectId::resolve(None, Some(id.as_str()))
    } else {
        SubjectId::resolve(Some(id.as_str()), None)
    }
}

/// JSON body with 200 for `ok` responses and 500 for `error` ones.
pub fn reply<T: Serialize>(response: &EngineResponse<T>) -> warp::reply::WithStatus<warp::reply::Json> {
    let status = if response.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    warp::reply::with_status(warp::reply::json(response), status)
}

fn bad_subject(operation: &str, raw: &str) -> warp::reply::WithStatus<warp::reply::Json> {
    let error = EngineError::InvalidInput(format!("blank subject identifier '{}'", raw));
    let response: EngineResponse<()> = EngineResponse::error(operation, &error);
    warp::reply::with_status(warp::reply::json(&response), StatusCode::BAD_REQUEST)
}

async fn calculate_top(engine: Arc<RecommendationEngine>) -> Result<impl warp::Reply, Infallible> {
    log::info!("Received request to calculate top films");
    Ok(reply(&engine.compute_top_items().await))
}

async fn calculate_all(engine: Arc<RecommendationEngine>) -> Result<impl warp::Reply, Infallible> {
    log::info!("Received request to calculate recommendations for all users");
    Ok(reply(&engine.compute_recommendations_for_all().await))
}

async fn calculate_subject(
    raw: String,
    query: SubjectQuery,
    engine: Arc<RecommendationEngine>,
) -> Result<impl warp::Reply, Infallible> {
    let subject = match subject_from_path(&raw, query) {
        Some(subject) => subject,
        None => return Ok(bad_subject("compute_recommendations_for_subject", &raw)),
    };
    log::info!("Received request to calculate recommendations for {}", subject);
    Ok(reply(&engine.compute_recommendations_for_subject(&subject).await))
}

async fn get_recommendation(
    raw: String,
    query: SubjectQuery,
    engine: Arc<RecommendationEngine>,
) -> Result<impl warp::Reply, Infallible> {
    let subject = match subject_from_path(&raw, query) {
        Some(subject) => subject,
        None => return Ok(bad_subject("recommendations_for", &raw)),
    };
    log::info!("Received request for recommendations for {}", subject);
    Ok(reply(&engine.recommendations_for(&subject).await))
}

async fn get_similar_films(
    raw: String,
    engine: Arc<RecommendationEngine>,
) -> Result<impl warp::Reply, Infallible> {
    let film_id = decode(&raw);
    log::info!("Received request for films similar to {}", film_id);
    Ok(reply(&engine.similar_items(&film_id).await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::db::Database;
    use crate::services::memory::InMemoryStore;

    fn routes() -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let engine = RecommendationEngine::new(
            EngineConfig::default(),
            Database::from_store(InMemoryStore::new()),
        );
        global_handler(Arc::new(engine))
    }

    #[test]
    fn test_subject_from_path() {
        let registered = subject_from_path("user%201", SubjectQuery::default());
        assert_eq!(registered, Some(SubjectId::Registered("user 1".to_string())));

        let anonymous = subject_from_path("abc", SubjectQuery { anonymous: true });
        assert_eq!(anonymous, Some(SubjectId::Anonymous("abc".to_string())));

        assert_eq!(subject_from_path("%20", SubjectQuery::default()), None);
    }

    #[tokio::test]
    async fn test_health() {
        let response = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&routes())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_calculate_top_on_empty_store() {
        let response = warp::test::request()
            .method("POST")
            .path("/calculate/top")
            .reply(&routes())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["data"], 0);
    }

    #[tokio::test]
    async fn test_unknown_film_is_an_error() {
        let response = warp::test::request()
            .method("GET")
            .path("/recommend/film/missing")
            .reply(&routes())
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_blank_subject_is_rejected() {
        let response = warp::test::request()
            .method("POST")
            .path("/calculate/recommendations/%20?anonymous=true")
            .reply(&routes())
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
