//! HTTP API for student profiles

use crate::profiles::{
    ActivityEntry, ProfileData, ProfileError, ProfileStore, DEFAULT_RECENT_LIMIT,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: ProfileStore,
}

// Request/Response types
#[derive(Debug, Deserialize)]
pub struct LogActivityRequest {
    pub action: String,
    #[serde(default)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct RecentActivityQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ActivityListResponse {
    pub activity: Vec<ActivityEntry>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub service: String,
    pub signed_in_as: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// Configure routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/profiles/:user_id", get(get_profile).put(upsert_profile))
        .route(
            "/profiles/:user_id/activity",
            get(recent_activity).post(log_activity),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(e: ProfileError) -> Response {
    let status = match &e {
        ProfileError::Validation(_) => StatusCode::BAD_REQUEST,
        ProfileError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let signed_in_as = state.store.current_user().await.map(|user| user.uid);

    Json(StatusResponse {
        status: "ok".to_string(),
        service: "profile-store".to_string(),
        signed_in_as,
    })
}

async fn get_profile(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    match state.store.fetch_profile(&user_id).await {
        Ok(Some(profile)) => (StatusCode::OK, Json(profile)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("No profile for '{}'", user_id),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn upsert_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(payload): Json<ProfileData>,
) -> Response {
    match state.store.upsert_profile(&user_id, &payload).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn log_activity(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(payload): Json<LogActivityRequest>,
) -> Response {
    info!("Activity '{}' reported for '{}'", payload.action, user_id);

    match state
        .store
        .log_activity(&user_id, &payload.action, payload.details)
        .await
    {
        Ok(()) => (
            StatusCode::CREATED,
            Json(MessageResponse {
                success: true,
                message: format!("Logged '{}' for '{}'", payload.action, user_id),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn recent_activity(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<RecentActivityQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);

    match state.store.fetch_recent_activity(&user_id, limit).await {
        Ok(activity) => {
            let count = activity.len();
            (StatusCode::OK, Json(ActivityListResponse { activity, count })).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::{AuthUser, LocalAuth, MemoryStore};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn router() -> Router {
        let store = ProfileStore::new(
            Arc::new(MemoryStore::new()),
            Arc::new(LocalAuth::new(AuthUser::new("u1"))),
        );
        create_router(AppState { store })
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_check_reports_ok() {
        let router = router();
        let (status, body) = send(&router, Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["signed_in_as"], Value::Null);
    }

    #[tokio::test]
    async fn unknown_profiles_are_404() {
        let router = router();
        let (status, body) = send(&router, Method::GET, "/profiles/nobody", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nobody"));
    }

    #[tokio::test]
    async fn put_then_get_merges_profile_fields() {
        let router = router();
        let (status, _) = send(
            &router,
            Method::PUT,
            "/profiles/u1",
            Some(json!({"displayName": "A"})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        send(&router, Method::PUT, "/profiles/u1", Some(json!({"grade": 10}))).await;

        let (status, body) = send(&router, Method::GET, "/profiles/u1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["userId"], "u1");
        assert_eq!(body["displayName"], "A");
        assert_eq!(body["grade"], 10);
        assert!(body["createdAt"].is_string());
        assert_eq!(body["activity"], json!([]));
    }

    #[tokio::test]
    async fn activity_is_logged_and_listed_newest_first() {
        let router = router();
        let (status, _) = send(
            &router,
            Method::POST,
            "/profiles/u1/activity",
            Some(json!({"action": "lesson_completed", "details": {"lessonId": "L1"}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        send(
            &router,
            Method::POST,
            "/profiles/u1/activity",
            Some(json!({"action": "quiz_passed"})),
        )
        .await;

        let (status, body) = send(&router, Method::GET, "/profiles/u1/activity", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["activity"][0]["action"], "quiz_passed");
        assert_eq!(body["activity"][1]["details"]["lessonId"], "L1");

        let (_, body) = send(&router, Method::GET, "/profiles/u1/activity?limit=1", None).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["activity"][0]["action"], "quiz_passed");
    }

    #[tokio::test]
    async fn activity_for_unknown_users_is_empty() {
        let router = router();
        let (status, body) = send(&router, Method::GET, "/profiles/nobody/activity", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"activity": [], "count": 0}));
    }
}
