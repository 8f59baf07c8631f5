//! API service routes

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Basic},
};
use tracing::{info, warn};

use common::{error::DatabaseError, models::File};

use crate::{
    credentials::hash_password,
    error::{ApiError, ApiResult},
    middleware::{AuthUser, SessionToken, auth_middleware},
    models::{
        CreateUserRequest, FileListQuery, StatsResponse, StatusResponse, TokenResponse,
        UploadRequest, UserResponse,
    },
    state::AppState,
};

/// Create the router for the API service
pub fn create_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/disconnect", get(disconnect))
        .route("/users/me", get(get_me))
        .route("/files", post(upload_file).get(list_files))
        .route("/files/:id", get(get_file))
        .route("/files/:id/publish", put(publish_file))
        .route("/files/:id/unpublish", put(unpublish_file))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/status", get(get_status))
        .route("/stats", get(get_stats))
        .route("/users", post(create_user))
        .route("/connect", get(connect))
        .merge(protected_routes)
        .with_state(state)
}

/// Store connectivity; a failing probe reports false
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let redis = state.cache.health_check().await.unwrap_or_else(|e| {
        warn!("Redis health check failed: {}", e);
        false
    });

    let db = state.users.health_check().await.unwrap_or_else(|e| {
        warn!("Database health check failed: {}", e);
        false
    });

    Json(StatusResponse { redis, db })
}

/// Number of users and files
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let users = state.users.count().await?;
    let files = state.files.count().await?;

    Ok(Json(StatsResponse { users, files }))
}

/// Register a new user
pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    let email = payload
        .email
        .filter(|email| !email.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing email".to_string()))?;
    let password = payload
        .password
        .filter(|password| !password.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing password".to_string()))?;

    if state.users.find_by_email(&email).await?.is_some() {
        return Err(ApiError::BadRequest("Already exists".to_string()));
    }

    let password_hash = hash_password(&password).map_err(|e| {
        tracing::error!("{}", e);
        ApiError::InternalServerError
    })?;

    let user = match state.users.create(&email, &password_hash).await {
        Ok(user) => user,
        Err(DatabaseError::Duplicate(_)) => {
            return Err(ApiError::BadRequest("Already exists".to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    info!(user_id = user.id, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            id: user.id,
            email: user.email,
        }),
    ))
}

/// Exchange Basic credentials for a session token
pub async fn connect(
    State(state): State<AppState>,
    credentials: Option<TypedHeader<Authorization<Basic>>>,
) -> ApiResult<impl IntoResponse> {
    let TypedHeader(Authorization(basic)) = credentials.ok_or(ApiError::Unauthorized)?;

    let user_id = state
        .credentials
        .verify(basic.username(), basic.password())
        .await?;

    let token = state.sessions.issue(user_id).await.map_err(|e| {
        tracing::error!("Failed to store session: {}", e);
        ApiError::InternalServerError
    })?;

    Ok(Json(TokenResponse { token }))
}

/// Revoke the session the request was made with
pub async fn disconnect(
    State(state): State<AppState>,
    Extension(SessionToken(token)): Extension<SessionToken>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    state.sessions.revoke(&token).await.map_err(|e| {
        tracing::error!("Failed to remove session: {}", e);
        ApiError::InternalServerError
    })?;

    info!(user_id = user.id, "Session revoked");
    Ok(StatusCode::NO_CONTENT)
}

/// Identity of the token holder
pub async fn get_me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let user = state
        .users
        .find_by_id(user.id)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    Ok(Json(UserResponse {
        id: user.id,
        email: user.email,
    }))
}

/// Upload a file, folder or image
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let file = state.ingestion.ingest(user.id, payload).await?;

    Ok((StatusCode::CREATED, Json(file)))
}

/// Get one of the caller's files
pub async fn get_file(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_file_id(&id)?;
    let file = state
        .files
        .find_owned(id, user.id)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(file))
}

/// One page of the caller's files under a parent
pub async fn list_files(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<FileListQuery>,
) -> ApiResult<impl IntoResponse> {
    let files = state
        .files
        .list(user.id, query.parent_id(), query.page())
        .await?;

    Ok(Json(files))
}

pub async fn publish_file(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    set_visibility(&state, user, &id, true).await
}

pub async fn unpublish_file(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    set_visibility(&state, user, &id, false).await
}

async fn set_visibility(
    state: &AppState,
    user: AuthUser,
    id: &str,
    is_public: bool,
) -> ApiResult<Json<File>> {
    let id = parse_file_id(id)?;
    let file = state
        .files
        .set_public(id, user.id, is_public)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(file))
}

/// Ids that cannot exist are reported like missing files
fn parse_file_id(id: &str) -> ApiResult<i64> {
    id.parse().map_err(|_| ApiError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, header},
        response::Response,
    };
    use base64::{Engine, engine::general_purpose::STANDARD};
    use common::{
        memory::{MemoryFileStore, MemoryJobQueue, MemoryStore, MemoryUserStore},
        storage::{BlobStorage, StorageConfig},
    };
    use serde_json::{Value, json};
    use std::{sync::Arc, time::Duration};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::{
        credentials::CredentialVerifier,
        ingest::UploadIngestion,
        session::{SESSION_TTL_SECONDS, SessionManager},
    };

    struct TestApp {
        _dir: TempDir,
        router: Router,
        store: Arc<MemoryStore>,
        queue: Arc<MemoryJobQueue>,
    }

    impl TestApp {
        fn new() -> Self {
            Self::with_cache(MemoryStore::new())
        }

        fn with_cache(cache: MemoryStore) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(cache);
            let users = Arc::new(MemoryUserStore::new());
            let files = Arc::new(MemoryFileStore::new());
            let queue = Arc::new(MemoryJobQueue::new());
            let storage = BlobStorage::new(&StorageConfig {
                root: dir.path().to_path_buf(),
            });

            let state = AppState {
                cache: store.clone(),
                users: users.clone(),
                files: files.clone(),
                sessions: SessionManager::new(store.clone(), SESSION_TTL_SECONDS),
                credentials: CredentialVerifier::new(users),
                ingestion: UploadIngestion::new(files, storage, queue.clone()),
            };

            Self {
                _dir: dir,
                router: create_router(state),
                store,
                queue,
            }
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response: Response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, body)
        }

        async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
            let mut builder = Request::builder().uri(uri);
            if let Some(token) = token {
                builder = builder.header("X-Token", token);
            }
            self.send(builder.body(Body::empty()).unwrap()).await
        }

        async fn send_json(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Value,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json");
            if let Some(token) = token {
                builder = builder.header("X-Token", token);
            }
            self.send(builder.body(Body::from(body.to_string())).unwrap())
                .await
        }

        async fn register(&self, email: &str, password: &str) -> (StatusCode, Value) {
            self.send_json(
                Method::POST,
                "/users",
                None,
                json!({"email": email, "password": password}),
            )
            .await
        }

        async fn connect(&self, email: &str, password: &str) -> (StatusCode, Value) {
            let credentials = STANDARD.encode(format!("{}:{}", email, password));
            let request = Request::builder()
                .uri("/connect")
                .header(header::AUTHORIZATION, format!("Basic {}", credentials))
                .body(Body::empty())
                .unwrap();
            self.send(request).await
        }

        async fn login(&self, email: &str) -> String {
            self.register(email, "pw").await;
            let (status, body) = self.connect(email, "pw").await;
            assert_eq!(status, StatusCode::OK);
            body["token"].as_str().unwrap().to_string()
        }

        async fn upload(&self, token: &str, body: Value) -> (StatusCode, Value) {
            self.send_json(Method::POST, "/files", Some(token), body)
                .await
        }
    }

    #[tokio::test]
    async fn test_register_twice_is_rejected() {
        let app = TestApp::new();

        let (status, body) = app.register("a@b.com", "pw").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["email"], "a@b.com");
        assert!(body["id"].is_i64());
        assert!(body.get("password").is_none());

        let (status, body) = app.register("a@b.com", "pw").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Already exists"}));
    }

    #[tokio::test]
    async fn test_register_requires_email_then_password() {
        let app = TestApp::new();

        let (status, body) = app
            .send_json(Method::POST, "/users", None, json!({}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing email");

        let (_, body) = app
            .send_json(Method::POST, "/users", None, json!({"email": "a@b.com"}))
            .await;
        assert_eq!(body["error"], "Missing password");
    }

    #[tokio::test]
    async fn test_connect_me_disconnect_cycle() {
        let app = TestApp::new();
        app.register("a@b.com", "pw").await;

        let (status, body) = app.connect("a@b.com", "pw").await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, body) = app.get("/users/me", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "a@b.com");

        let (status, body) = app.get("/disconnect", Some(&token)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);

        let (status, body) = app.get("/users/me", Some(&token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "Unauthorized"}));

        let (status, _) = app.get("/disconnect", Some(&token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_credentials_alike() {
        let app = TestApp::new();
        app.register("a@b.com", "pw").await;

        let (wrong_password, body) = app.connect("a@b.com", "nope").await;
        let (unknown_email, _) = app.connect("x@b.com", "pw").await;
        assert_eq!(wrong_password, StatusCode::UNAUTHORIZED);
        assert_eq!(unknown_email, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "Unauthorized"}));

        let (missing, _) = app.get("/connect", None).await;
        assert_eq!(missing, StatusCode::UNAUTHORIZED);

        let malformed = Request::builder()
            .uri("/connect")
            .header(header::AUTHORIZATION, "Basic %%%")
            .body(Body::empty())
            .unwrap();
        let (malformed, _) = app.send(malformed).await;
        assert_eq!(malformed, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected_everywhere() {
        let app = TestApp::new();
        let token = app.login("a@b.com").await;

        app.store
            .advance(Duration::from_secs(SESSION_TTL_SECONDS + 1));

        for uri in ["/users/me", "/files", "/files/1", "/disconnect"] {
            let (status, body) = app.get(uri, Some(&token)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
            assert_eq!(body, json!({"error": "Unauthorized"}));
        }

        let (status, _) = app
            .send_json(Method::PUT, "/files/1/publish", Some(&token), json!({}))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .upload(&token, json!({"name": "docs", "type": "folder"}))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected() {
        let app = TestApp::new();

        let (status, _) = app.get("/files", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app.get("/files", Some("made-up")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_upload_into_folder_and_parent_checks() {
        let app = TestApp::new();
        let token = app.login("a@b.com").await;

        let (status, folder) = app
            .upload(&token, json!({"name": "images", "type": "folder"}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(folder["parentId"], 0);
        assert_eq!(folder["isPublic"], false);
        assert!(folder.get("localPath").is_none());
        assert!(app.queue.queued().is_empty());

        let (status, image) = app
            .upload(
                &token,
                json!({
                    "name": "cat.png",
                    "type": "image",
                    "parentId": folder["id"],
                    "isPublic": true,
                    "data": STANDARD.encode(b"not really a png"),
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(image["parentId"], folder["id"]);
        assert_eq!(image["isPublic"], true);
        assert!(image["localPath"].is_string());

        let jobs = app.queue.queued();
        assert_eq!(jobs.len(), 1);
        assert_eq!(Some(jobs[0].file_id), image["id"].as_i64());

        let (status, body) = app
            .upload(
                &token,
                json!({
                    "name": "nested.txt",
                    "type": "file",
                    "parentId": image["id"],
                    "data": "aGk=",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Parent is not a folder"}));

        let (status, body) = app
            .upload(
                &token,
                json!({"name": "x", "type": "file", "parentId": 4040, "data": "aGk="}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Parent not found"}));
    }

    #[tokio::test]
    async fn test_upload_reports_missing_name_first() {
        let app = TestApp::new();
        let token = app.login("a@b.com").await;

        let (status, body) = app.upload(&token, json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Missing name"}));

        let (_, body) = app.upload(&token, json!({"name": "a"})).await;
        assert_eq!(body, json!({"error": "Missing type"}));

        let (_, body) = app
            .upload(&token, json!({"name": "a", "type": "file"}))
            .await;
        assert_eq!(body, json!({"error": "Missing data"}));
    }

    #[tokio::test]
    async fn test_files_are_private_to_their_owner() {
        let app = TestApp::new();
        let alice = app.login("alice@b.com").await;
        let bob = app.login("bob@b.com").await;

        let (_, file) = app
            .upload(&alice, json!({"name": "a.txt", "type": "file", "data": "aGk="}))
            .await;
        let uri = format!("/files/{}", file["id"]);

        let (status, shown) = app.get(&uri, Some(&alice)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(shown, file);

        let (status, body) = app.get(&uri, Some(&bob)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "Not found"}));

        let (status, _) = app.get("/files/not-a-number", Some(&alice)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app
            .send_json(Method::PUT, &format!("{}/publish", uri), Some(&bob), json!({}))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, listed) = app.get("/files", Some(&bob)).await;
        assert_eq!(listed, json!([]));
    }

    #[tokio::test]
    async fn test_publish_and_unpublish() {
        let app = TestApp::new();
        let token = app.login("a@b.com").await;

        let (_, file) = app
            .upload(&token, json!({"name": "a.txt", "type": "file", "data": "aGk="}))
            .await;
        let uri = format!("/files/{}", file["id"]);

        let (status, published) = app
            .send_json(Method::PUT, &format!("{}/publish", uri), Some(&token), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(published["isPublic"], true);
        assert_eq!(published["id"], file["id"]);

        let (status, unpublished) = app
            .send_json(Method::PUT, &format!("{}/unpublish", uri), Some(&token), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(unpublished["isPublic"], false);

        let (_, shown) = app.get(&uri, Some(&token)).await;
        assert_eq!(shown["isPublic"], false);
    }

    #[tokio::test]
    async fn test_list_paginates_twenty_per_page() {
        let app = TestApp::new();
        let token = app.login("a@b.com").await;

        let (_, folder) = app
            .upload(&token, json!({"name": "docs", "type": "folder"}))
            .await;
        for i in 0..25 {
            app.upload(
                &token,
                json!({"name": format!("f{}", i), "type": "file", "parentId": folder["id"], "data": "aGk="}),
            )
            .await;
        }

        let (_, root) = app.get("/files", Some(&token)).await;
        assert_eq!(root.as_array().unwrap().len(), 1);

        let uri = format!("/files?parentId={}", folder["id"]);
        let (_, first) = app.get(&uri, Some(&token)).await;
        assert_eq!(first.as_array().unwrap().len(), 20);
        assert_eq!(first[0]["name"], "f0");

        let (_, second) = app.get(&format!("{}&page=1", uri), Some(&token)).await;
        assert_eq!(second.as_array().unwrap().len(), 5);
        assert_eq!(second[0]["name"], "f20");

        let (_, garbage) = app.get(&format!("{}&page=abc", uri), Some(&token)).await;
        assert_eq!(garbage, first);
    }

    #[tokio::test]
    async fn test_status_and_stats() {
        let app = TestApp::new();

        let (status, body) = app.get("/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"redis": true, "db": true}));

        let token = app.login("a@b.com").await;
        app.upload(&token, json!({"name": "docs", "type": "folder"}))
            .await;

        let (status, body) = app.get("/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"users": 1, "files": 1}));
    }

    #[tokio::test]
    async fn test_status_reports_unreachable_cache() {
        let app = TestApp::with_cache(MemoryStore::unreachable());

        let (status, body) = app.get("/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"redis": false, "db": true}));
    }
}
