use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use axum::body::Bytes;
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::dispatch::{Delivery, Dispatcher};
use crate::model::{NotificationRecord, UserStats};
use crate::ops;

#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
    dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(conn: Connection, dispatcher: Dispatcher) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            dispatcher: Arc::new(dispatcher),
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .db
            .lock()
            .map_err(|_| anyhow!("database lock poisoned"))?;
        f(&conn)
    }
}

/// Error responses. Internal detail is logged, never returned.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(&'static str),
    NotFound(&'static str),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::Internal(e) => {
                error!("Request failed: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sendTestNotification", post(send_test_notification))
        .route("/getUserStats", get(get_user_stats))
        .route("/notifications", get(list_notifications))
        .route("/notifications/{id}/read", post(mark_notification_read))
        .with_state(state)
}

pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("server error")?;
    Ok(())
}

const MISSING_FIELDS: &str = "Missing required fields: userId, title, body";
const MISSING_USER: &str = "Missing userId parameter";

/// A validated `sendTestNotification` body.
#[derive(Debug, PartialEq)]
pub struct TestNotification {
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

fn required(req: &Value, field: &str) -> Option<String> {
    req.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Push payload values must be strings; anything else is sent as its JSON text.
fn stringify(data: serde_json::Map<String, Value>) -> BTreeMap<String, String> {
    data.into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect()
}

impl TestNotification {
    /// Parses the raw body regardless of content type. Anything malformed is
    /// the same 400 as a missing field.
    pub fn parse(raw: &[u8]) -> Result<Self, ApiError> {
        let bad = || ApiError::BadRequest(MISSING_FIELDS);
        let mut req: Value = serde_json::from_slice(raw).map_err(|_| bad())?;
        let (Some(user_id), Some(title), Some(body)) = (
            required(&req, "userId"),
            required(&req, "title"),
            required(&req, "body"),
        ) else {
            return Err(bad());
        };
        let data = match req.get_mut("data").map(Value::take) {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(map)) => stringify(map),
            Some(_) => return Err(bad()),
        };
        Ok(Self {
            user_id,
            title,
            body,
            data,
        })
    }
}

pub async fn send_test_notification(
    State(state): State<AppState>,
    raw: Bytes,
) -> Result<Json<Value>, ApiError> {
    let req = TestNotification::parse(&raw)?;
    let delivery = state.with_conn(|conn| {
        Ok(state
            .dispatcher
            .send(conn, &req.user_id, &req.title, &req.body, req.data.clone()))
    })?;
    if delivery == Delivery::LookupFailed {
        return Err(ApiError::Internal(anyhow!(
            "profile lookup failed for {}",
            req.user_id
        )));
    }
    Ok(Json(json!({ "success": true, "message": "Notification sent" })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_id: Option<String>,
    #[serde(default)]
    pub unread: bool,
}

impl UserQuery {
    fn user_id(&self) -> Result<&str, ApiError> {
        self.user_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ApiError::BadRequest(MISSING_USER))
    }
}

/// A query string that fails to parse is reported as a 400, never axum's
/// plain-text rejection.
fn user_query(query: Result<Query<UserQuery>, QueryRejection>) -> Result<UserQuery, ApiError> {
    query
        .map(|Query(q)| q)
        .map_err(|_| ApiError::BadRequest("Invalid query parameters"))
}

pub async fn get_user_stats(
    State(state): State<AppState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<UserStats>, ApiError> {
    let query = user_query(query)?;
    let user_id = query.user_id()?;
    let stats = state.with_conn(|conn| ops::user_stats(conn, user_id))?;
    stats
        .map(Json)
        .ok_or(ApiError::NotFound("User not found"))
}

pub async fn list_notifications(
    State(state): State<AppState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<Vec<NotificationRecord>>, ApiError> {
    let query = user_query(query)?;
    let user_id = query.user_id()?;
    let records =
        state.with_conn(|conn| ops::list_notifications(conn, user_id, query.unread))?;
    Ok(Json(records))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Ok(Path(id)) = id else {
        return Err(ApiError::BadRequest("Invalid notification id"));
    };
    if state.with_conn(|conn| ops::mark_read(conn, id))? {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(ApiError::NotFound("Notification not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::model::{NewNotification, NotificationKind};
    use crate::ops::fixtures::marketplace;
    use crate::push::testing::RecordingProvider;

    fn state(provider: Arc<RecordingProvider>) -> AppState {
        let conn = db::open_memory().unwrap();
        marketplace(&conn);
        AppState::new(conn, Dispatcher::new(provider))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn query(user: Option<&str>) -> Result<Query<UserQuery>, QueryRejection> {
        Ok(Query(UserQuery {
            user_id: user.map(Into::into),
            unread: false,
        }))
    }

    fn raw(body: Value) -> Bytes {
        Bytes::from(body.to_string())
    }

    async fn rejected(response: Response) -> Value {
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        body_json(response).await
    }

    #[tokio::test]
    async fn test_notification_sent() {
        let provider = Arc::new(RecordingProvider::default());
        let req = raw(json!({
            "userId": "r1",
            "title": "Hi",
            "body": "There",
            "data": { "taskId": "t1", "attempt": 2 },
        }));
        let Json(body) = send_test_notification(State(state(provider.clone())), req)
            .await
            .unwrap();
        assert_eq!(body, json!({ "success": true, "message": "Notification sent" }));
        let attempts = provider.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].data["attempt"], "2");
    }

    #[tokio::test]
    async fn test_notification_without_token_still_succeeds() {
        let provider = Arc::new(RecordingProvider::default());
        let req = raw(json!({ "userId": "e2", "title": "Hi", "body": "There", "data": null }));
        assert!(send_test_notification(State(state(provider.clone())), req)
            .await
            .is_ok());
        assert!(provider.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_notification_missing_fields() {
        let req = raw(json!({ "userId": "r1", "body": "There" }));
        let err = send_test_notification(
            State(state(Arc::new(RecordingProvider::default()))),
            req,
        )
        .await
        .unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Missing required fields: userId, title, body" })
        );
    }

    #[test]
    fn malformed_bodies_are_missing_fields() {
        for body in [
            "",
            "not json",
            "[]",
            r#"{"userId":5,"title":"Hi","body":"There"}"#,
            r#"{"userId":"r1","title":"Hi","body":"  "}"#,
            r#"{"userId":"r1","title":"Hi","body":"There","data":[1]}"#,
        ] {
            match TestNotification::parse(body.as_bytes()) {
                Err(ApiError::BadRequest(m)) => assert_eq!(m, MISSING_FIELDS, "{body}"),
                other => panic!("expected 400 for {body:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn null_data_is_empty() {
        let req = TestNotification::parse(
            br#"{"userId":"r1","title":"Hi","body":"There","data":null}"#,
        )
        .unwrap();
        assert!(req.data.is_empty());
    }

    #[tokio::test]
    async fn empty_body_is_json_400() {
        let s = state(Arc::new(RecordingProvider::default()));
        let response = send_test_notification(State(s), Bytes::new())
            .await
            .unwrap_err()
            .into_response();
        assert_eq!(rejected(response).await, json!({ "error": MISSING_FIELDS }));
    }

    #[tokio::test]
    async fn stats_for_known_user() {
        let s = state(Arc::new(RecordingProvider::default()));
        let Json(stats) = get_user_stats(State(s), query(Some("r1"))).await.unwrap();
        assert_eq!(stats.tasks_created, 0);
        let v = serde_json::to_value(&stats).unwrap();
        for key in ["tasksCreated", "tasksCompleted", "totalEarnings", "rating", "trustScore"] {
            assert!(v.get(key).is_some(), "missing {key} in {v}");
        }
    }

    #[tokio::test]
    async fn stats_unknown_user_is_404() {
        let s = state(Arc::new(RecordingProvider::default()));
        let response = get_user_stats(State(s), query(Some("ghost")))
            .await
            .unwrap_err()
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({ "error": "User not found" }));
    }

    #[tokio::test]
    async fn stats_without_user_is_400() {
        let s = state(Arc::new(RecordingProvider::default()));
        let response = get_user_stats(State(s), query(None))
            .await
            .unwrap_err()
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn internal_errors_are_generic() {
        let response = ApiError::Internal(anyhow!("disk on fire at /var/db")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Internal server error" })
        );
    }

    #[tokio::test]
    async fn inbox_and_mark_read() {
        let s = state(Arc::new(RecordingProvider::default()));
        let id = s
            .with_conn(|conn| {
                ops::insert_notification(
                    conn,
                    &NewNotification {
                        user_id: "r1".into(),
                        kind: NotificationKind::TaskAccepted,
                        title: "Task Accepted!".into(),
                        body: "b".into(),
                        from_user_id: Some("e1".into()),
                        task_id: Some("t1".into()),
                        chat_id: None,
                    },
                )
            })
            .unwrap();

        let Json(inbox) = list_notifications(State(s.clone()), query(Some("r1")))
            .await
            .unwrap();
        assert_eq!(inbox.len(), 1);
        assert!(!inbox[0].read);

        mark_notification_read(State(s.clone()), Ok(Path(id))).await.unwrap();
        let unread = Ok(Query(UserQuery {
            user_id: Some("r1".into()),
            unread: true,
        }));
        let Json(inbox) = list_notifications(State(s.clone()), unread).await.unwrap();
        assert!(inbox.is_empty());

        let response = mark_notification_read(State(s), Ok(Path(9999)))
            .await
            .unwrap_err()
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
