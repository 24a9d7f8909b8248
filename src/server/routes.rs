use axum::{
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use medsync_core::{ApiEnvelope, Collection};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::collections::{CollectionStore, ListParams};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub collections: Arc<CollectionStore>,
    /// Version published on `/version` for the client's update channel
    pub asset_version: String,
    /// When set, `/api` routes require `Authorization: Bearer <key>`
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(asset_version: impl Into<String>) -> Self {
        Self {
            collections: Arc::new(CollectionStore::new()),
            asset_version: asset_version.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }
}

type ApiResponse = (StatusCode, Json<ApiEnvelope>);

pub fn router(state: AppState) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/version", get(version));

    let api_routes = Router::new()
        .route("/api/{collection}", get(list).post(create))
        .route(
            "/api/{collection}/{id}",
            get(show).put(update).delete(remove),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .with_state(state)
}

async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match presented {
        Some(key) if key == expected => next.run(request).await,
        Some(_) => failure(StatusCode::UNAUTHORIZED, "Invalid API key").into_response(),
        None => failure(StatusCode::UNAUTHORIZED, "Authorization header required").into_response(),
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct VersionResponse {
    version: String,
}

async fn version(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        version: state.asset_version.clone(),
    })
}

async fn list(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResponse {
    let collection = match parse_collection(&collection) {
        Ok(c) => c,
        Err(response) => return response,
    };
    let params = match parse_list_params(pairs) {
        Ok(p) => p,
        Err(message) => return failure(StatusCode::BAD_REQUEST, message),
    };

    let (items, pagination) = state.collections.list(collection, &params).await;
    (
        StatusCode::OK,
        Json(ApiEnvelope::page(Value::Array(items), pagination)),
    )
}

async fn create(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResponse {
    let collection = match parse_collection(&collection) {
        Ok(c) => c,
        Err(response) => return response,
    };
    let fields = match object_body(body) {
        Ok(f) => f,
        Err(response) => return response,
    };

    let doc = state.collections.create(collection, fields).await;
    tracing::info!("Created {} {}", collection, doc["id"]);
    (StatusCode::CREATED, Json(ApiEnvelope::ok(doc)))
}

async fn show(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> ApiResponse {
    let collection = match parse_collection(&collection) {
        Ok(c) => c,
        Err(response) => return response,
    };

    match state.collections.get(collection, &id).await {
        Some(doc) => (StatusCode::OK, Json(ApiEnvelope::ok(doc))),
        None => not_found(collection, &id),
    }
}

async fn update(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResponse {
    let collection = match parse_collection(&collection) {
        Ok(c) => c,
        Err(response) => return response,
    };
    let fields = match object_body(body) {
        Ok(f) => f,
        Err(response) => return response,
    };

    match state.collections.update(collection, &id, fields).await {
        Some(doc) => (StatusCode::OK, Json(ApiEnvelope::ok(doc))),
        None => not_found(collection, &id),
    }
}

async fn remove(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> ApiResponse {
    let collection = match parse_collection(&collection) {
        Ok(c) => c,
        Err(response) => return response,
    };

    if state.collections.delete(collection, &id).await {
        tracing::info!("Deleted {} {}", collection, id);
        (StatusCode::OK, Json(ApiEnvelope::ok(Value::Null)))
    } else {
        not_found(collection, &id)
    }
}

fn parse_collection(segment: &str) -> Result<Collection, ApiResponse> {
    segment
        .parse()
        .map_err(|e: String| failure(StatusCode::NOT_FOUND, e))
}

fn parse_list_params(pairs: Vec<(String, String)>) -> Result<ListParams, String> {
    let mut params = ListParams::default();
    for (key, value) in pairs {
        match key.as_str() {
            "page" => params.page = Some(parse_positive(&key, &value)?),
            "limit" => params.limit = Some(parse_positive(&key, &value)?),
            "search" => params.search = Some(value),
            "sort" => params.sort = Some(value),
            _ => params.filters.push((key, value)),
        }
    }
    Ok(params)
}

fn parse_positive(key: &str, value: &str) -> Result<u32, String> {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("'{}' must be a positive integer, got '{}'", key, value)),
    }
}

fn object_body(body: Result<Json<Value>, JsonRejection>) -> Result<Map<String, Value>, ApiResponse> {
    match body {
        Ok(Json(Value::Object(fields))) => Ok(fields),
        Ok(Json(_)) => Err(failure(
            StatusCode::BAD_REQUEST,
            "Request body must be a JSON object",
        )),
        Err(rejection) => Err(failure(StatusCode::BAD_REQUEST, rejection.body_text())),
    }
}

fn not_found(collection: Collection, id: &str) -> ApiResponse {
    failure(
        StatusCode::NOT_FOUND,
        format!("{} {} not found", collection, id),
    )
}

fn failure(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (status, Json(ApiEnvelope::err(message)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use medsync_core::{
        HttpAssetSource, HttpRemote, ListQuery, LocalStore, NetworkMonitor, OfflineData,
        RemoteApi, SyncEngine, SyncError, UpdateChannel, UpdateState, FileActivator,
    };
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    /// Serves the router on an ephemeral port and returns its base URL.
    async fn spawn_server(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_health_and_version() {
        let app = router(AppState::new("2.1.0"));

        let (status, body) = call(app.clone(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (_, body) = call(app, "GET", "/version", None).await;
        assert_eq!(body, json!({"version": "2.1.0"}));
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let state = AppState::new("1.0.0");
        let app = router(state.clone());

        let (status, body) = call(
            app.clone(),
            "POST",
            "/api/patients",
            Some(json!({"name": "Ada Lovelace"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["id"], "srv-1");

        let (status, body) = call(app, "GET", "/api/patients?search=ada&limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(
            body["pagination"],
            json!({"page": 1, "limit": 5, "total": 1, "pages": 1})
        );
    }

    #[tokio::test]
    async fn test_missing_entity_is_404_envelope() {
        let app = router(AppState::new("1.0.0"));

        for method in ["GET", "DELETE"] {
            let (status, body) = call(app.clone(), method, "/api/bills/srv-9", None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["success"], false);
            assert_eq!(body["error"], "bills srv-9 not found");
        }

        let (status, _) = call(app, "PUT", "/api/bills/srv-9", Some(json!({"amount": 1}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let app = router(AppState::new("1.0.0"));

        let (status, body) = call(app.clone(), "GET", "/api/spaceships", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, _) = call(app.clone(), "GET", "/api/doctors?page=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(app, "POST", "/api/doctors", Some(json!(["not", "an", "object"]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Request body must be a JSON object");
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let app = router(AppState::new("1.0.0"));
        call(app.clone(), "POST", "/api/medical-records", Some(json!({"diagnosis": "flu", "ward": "A"}))).await;

        let (status, body) = call(
            app,
            "PUT",
            "/api/medical-records/srv-1",
            Some(json!({"ward": "B"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!({"id": "srv-1", "diagnosis": "flu", "ward": "B"}));
    }

    #[tokio::test]
    async fn test_http_remote_against_server() {
        let base_url = spawn_server(AppState::new("1.0.0")).await;
        let remote = HttpRemote::new(&base_url, Some("dev-key".into()), Duration::from_secs(5)).unwrap();

        let created = remote
            .create(Collection::Pharmacies, &json!({"name": "Corner Chemist"}))
            .await
            .unwrap();
        assert_eq!(created["id"], "srv-1");

        let page = remote
            .list(Collection::Pharmacies, &ListQuery::new().with_page(1).with_limit(10))
            .await
            .unwrap();
        assert_eq!(page.total_items(), 1);

        let updated = remote
            .update(Collection::Pharmacies, "srv-1", &json!({"open": true}))
            .await
            .unwrap();
        assert_eq!(updated["open"], true);

        remote.delete(Collection::Pharmacies, "srv-1").await.unwrap();
        let err = remote.get(Collection::Pharmacies, "srv-1").await.unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));

        let err = remote
            .create(Collection::Pharmacies, &json!("just a string"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        assert!(medsync_core::check_server(&base_url).await);
    }

    #[tokio::test]
    async fn test_api_key_guards_collections_only() {
        let state = AppState::new("1.0.0").with_api_key(Some("dev-key".into()));
        let base_url = spawn_server(state).await;

        let anonymous = HttpRemote::new(&base_url, None, Duration::from_secs(5)).unwrap();
        let err = anonymous
            .list(Collection::Doctors, &ListQuery::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(ref m) if m == "Authorization header required"));

        let wrong = HttpRemote::new(&base_url, Some("nope".into()), Duration::from_secs(5)).unwrap();
        assert!(wrong.list(Collection::Doctors, &ListQuery::new()).await.is_err());

        let authed = HttpRemote::new(&base_url, Some("dev-key".into()), Duration::from_secs(5)).unwrap();
        let page = authed.list(Collection::Doctors, &ListQuery::new()).await.unwrap();
        assert_eq!(page.total_items(), 0);

        // Health and version stay public for probes and update checks.
        assert!(medsync_core::check_server(&base_url).await);
    }

    #[tokio::test]
    async fn test_offline_writes_sync_to_server() {
        let state = AppState::new("1.0.0");
        let collections = state.collections.clone();
        let base_url = spawn_server(state).await;

        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path().join("cache.db")).await.unwrap();
        let remote: Arc<dyn RemoteApi> =
            Arc::new(HttpRemote::new(&base_url, None, Duration::from_secs(5)).unwrap());
        let network = NetworkMonitor::new(false);
        let data = OfflineData::new(store.clone(), remote.clone(), network.clone());
        let engine = SyncEngine::new(store, remote);

        let patient = data
            .create(Collection::Patients, json!({"name": "Grace"}))
            .await
            .unwrap();
        data.create(
            Collection::MedicalRecords,
            json!({"patient_id": patient.id.clone(), "diagnosis": "sprain"}),
        )
        .await
        .unwrap();
        assert_eq!(collections.count(Collection::Patients).await, 0);

        network.set_online(true);
        let run = engine.trigger().await.unwrap().unwrap();
        assert_eq!(run.succeeded, 2);

        let record = collections
            .get(Collection::MedicalRecords, "srv-2")
            .await
            .unwrap();
        assert_eq!(record["patient_id"], "srv-1");

        let view = data
            .fetch::<Value>(Collection::Patients, ListQuery::new())
            .await
            .unwrap();
        assert!(!view.from_cache);
        assert_eq!(view.data, vec![json!({"id": "srv-1", "name": "Grace"})]);
    }

    #[tokio::test]
    async fn test_update_channel_against_server() {
        let base_url = spawn_server(AppState::new("1.4.0")).await;
        let temp_dir = TempDir::new().unwrap();
        let activator = Arc::new(FileActivator::beside(&temp_dir.path().join("cache.db")));

        let source = Arc::new(HttpAssetSource::new(&base_url, Duration::from_secs(5)).unwrap());
        let updates = UpdateChannel::new("1.3.0", source, activator.clone());

        assert_eq!(
            updates.check().await.unwrap(),
            UpdateState::UpdateAvailable {
                current: "1.3.0".into(),
                available: "1.4.0".into()
            }
        );
        updates.confirm().await.unwrap();
        assert_eq!(
            activator.installed_version().await.unwrap().as_deref(),
            Some("1.4.0")
        );
    }
}
