//! REST persistence against an in-process fake backend.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use ovio_canvas::{ComponentKind, PlacedComponent, Position, ProjectId};
use ovio_sync::coordinator::{LocalEdit, Phase};
use ovio_sync::identity::Identity;
use ovio_sync::persistence::{HttpStateStore, LoadOutcome, PersistenceError, StateStore};
use ovio_sync::session::{EditorSession, SessionEvent, SessionOptions};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOKEN: &str = "secret-token";

#[derive(Clone, Default)]
struct Backend {
    states: Arc<Mutex<HashMap<String, Value>>>,
    posted: Arc<Mutex<Vec<Value>>>,
    failing: Arc<AtomicBool>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn get_state(State(backend): State<Backend>, Path(project_id): Path<String>) -> Response {
    if backend.failing.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    match backend.states.lock().unwrap().get(&project_id) {
        Some(canvas) => Json(json!({"canvas": canvas, "id": project_id})).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "Project not found"}))).into_response(),
    }
}

async fn post_state(
    State(backend): State<Backend>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    backend.states.lock().unwrap().insert(project_id, body["canvas"].clone());
    backend.posted.lock().unwrap().push(body);
    Json(json!({"message": "State saved"})).into_response()
}

async fn me(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({"user": {"id": 3, "username": "sarah", "name": "Sarah K"}})).into_response()
}

async fn start_backend(backend: Backend) -> String {
    let app = Router::new()
        .route("/editor/{project_id}/state", get(get_state).post(post_state))
        .route("/auth/me", get(me))
        .with_state(backend);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn store(api_url: &str, identity: Identity) -> HttpStateStore {
    HttpStateStore::new(api_url, identity, Duration::from_secs(5)).unwrap()
}

fn sarah() -> Identity {
    Identity::new("3", "sarah", TOKEN)
}

#[tokio::test]
async fn test_missing_project_is_not_found() {
    let api = start_backend(Backend::default()).await;
    let outcome = store(&api, sarah()).load_state(&ProjectId::from("7")).await.unwrap();
    assert_eq!(outcome, LoadOutcome::NotFound);
}

#[tokio::test]
async fn test_save_then_load() {
    let backend = Backend::default();
    let api = start_backend(backend.clone()).await;
    let store = store(&api, sarah());
    let project = ProjectId::from(7u64);
    let canvas = vec![PlacedComponent::new("button-1", ComponentKind::Button, Position::new(100.0, 100.0))];

    store.save_state(&project, &canvas).await.unwrap();
    assert_eq!(store.load_state(&project).await.unwrap(), LoadOutcome::Loaded(canvas));

    let posted = backend.posted.lock().unwrap().clone();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0]["id"], "7");
    assert_eq!(posted[0]["canvas"][0]["id"], "button");
    assert_eq!(posted[0]["canvas"][0]["uniqueId"], "button-1");
}

#[tokio::test]
async fn test_server_error_is_status() {
    let backend = Backend::default();
    backend.failing.store(true, Ordering::SeqCst);
    let api = start_backend(backend).await;
    let err = store(&api, sarah()).load_state(&ProjectId::from("7")).await.unwrap_err();
    assert_eq!(err, PersistenceError::Status(500));
}

#[tokio::test]
async fn test_save_without_token_is_unauthorized() {
    let api = start_backend(Backend::default()).await;
    let err = store(&api, Identity::local("guest"))
        .save_state(&ProjectId::from("7"), &[])
        .await
        .unwrap_err();
    assert_eq!(err, PersistenceError::Unauthorized);
}

#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let err = store(&format!("http://127.0.0.1:{port}"), sarah())
        .load_state(&ProjectId::from("7"))
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::Network(_)), "got {err:?}");
}

#[tokio::test]
async fn test_identity_fetch() {
    let api = start_backend(Backend::default()).await;
    let client = reqwest::Client::new();

    let identity = Identity::fetch(&client, &api, TOKEN).await.unwrap();
    assert_eq!(identity.user_id.as_str(), "3");
    assert_eq!(identity.username, "sarah");
    assert_eq!(identity.name, "Sarah K");
    assert_eq!(identity.token, TOKEN);

    let err = Identity::fetch(&client, &api, "wrong").await.unwrap_err();
    assert_eq!(err, PersistenceError::Unauthorized);
}

#[tokio::test]
async fn test_session_over_http() {
    let backend = Backend::default();
    backend.states.lock().unwrap().insert(
        "7".into(),
        json!([{"id": "heading", "uniqueId": "heading-1", "x": 10, "y": 20, "props": {"text": "Welcome"}}]),
    );
    let api = start_backend(backend.clone()).await;

    let (mut handle, task) =
        EditorSession::spawn(SessionOptions::new("7"), Arc::new(store(&api, sarah())), None);
    let mut events = handle.take_events().unwrap();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
            Some(SessionEvent::Loaded { components, .. }) => {
                assert_eq!(components, 1);
                break;
            }
            Some(_) => {}
            None => panic!("session ended"),
        }
    }
    assert_eq!(handle.phase().await.unwrap(), Phase::Ready);

    let loaded = handle.snapshot().await.unwrap();
    assert_eq!(loaded[0].property("text"), Some(json!("Welcome")));
    assert!(loaded[0].actions.is_empty());

    handle
        .edit(LocalEdit::AddComponent { kind: ComponentKind::Columns, position: Position::new(0.0, 50.0) })
        .await
        .unwrap();
    handle.save_now().await.unwrap();

    let saved = backend.states.lock().unwrap().get("7").cloned().unwrap();
    assert_eq!(saved.as_array().map(Vec::len), Some(2));
    assert_eq!(saved[1]["id"], "columns");

    handle.teardown().await;
    task.await.unwrap();
}
