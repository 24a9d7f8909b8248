//! Remote REST API client.
//!
//! Every collection is a conventional resource under `/api/{collection}`
//! answering with an [`ApiEnvelope`].

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::models::{ApiEnvelope, Collection, ListPage, ListQuery};

/// Timeout for the reachability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
/// Default timeout for API calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// The remote side of the sync layer.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list(&self, collection: Collection, query: &ListQuery) -> Result<ListPage>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Value>;

    /// Creates an entity and returns the stored document, including the server id.
    async fn create(&self, collection: Collection, payload: &Value) -> Result<Value>;

    async fn update(&self, collection: Collection, id: &str, payload: &Value) -> Result<Value>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<()>;
}

/// Which kind of call produced a response; decides how a 404 is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    List,
    Create,
    ById,
}

/// reqwest-backed [`RemoteApi`].
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, collection: Collection) -> String {
        format!("{}/api/{}", self.base_url, collection)
    }

    fn entity_url(&self, collection: Collection, id: &str) -> String {
        format!(
            "{}/{}",
            self.collection_url(collection),
            urlencoding::encode(id)
        )
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, call: Call) -> Result<ApiEnvelope> {
        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        parse_envelope(status, &body, call)
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn list(&self, collection: Collection, query: &ListQuery) -> Result<ListPage> {
        let url = self.collection_url(collection);
        tracing::debug!("GET {} {:?}", url, query.to_pairs());

        let builder = self.request(Method::GET, &url).query(&query.to_pairs());
        let envelope = self.send(builder, Call::List).await?;

        match envelope.data {
            Some(Value::Array(items)) => Ok(ListPage {
                items,
                pagination: envelope.pagination,
            }),
            Some(_) => Err(SyncError::Validation(format!(
                "Expected a list of {} from the server",
                collection
            ))),
            None => Ok(ListPage {
                items: Vec::new(),
                pagination: envelope.pagination,
            }),
        }
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Value> {
        let url = self.entity_url(collection, id);
        let envelope = self.send(self.request(Method::GET, &url), Call::ById).await?;
        expect_document(envelope, collection)
    }

    async fn create(&self, collection: Collection, payload: &Value) -> Result<Value> {
        let url = self.collection_url(collection);
        tracing::debug!("POST {}", url);
        let builder = self.request(Method::POST, &url).json(payload);
        let envelope = self.send(builder, Call::Create).await?;
        expect_document(envelope, collection)
    }

    async fn update(&self, collection: Collection, id: &str, payload: &Value) -> Result<Value> {
        let url = self.entity_url(collection, id);
        tracing::debug!("PUT {}", url);
        let builder = self.request(Method::PUT, &url).json(payload);
        let envelope = self.send(builder, Call::ById).await?;
        expect_document(envelope, collection)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        let url = self.entity_url(collection, id);
        tracing::debug!("DELETE {}", url);
        self.send(self.request(Method::DELETE, &url), Call::ById)
            .await?;
        Ok(())
    }
}

/// Returns true if `GET <server_url>/health` answers with a success status.
pub async fn check_server(server_url: &str) -> bool {
    let url = format!("{}/health", normalize_base_url(server_url));
    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(c) => c,
        Err(_) => return false,
    };

    match client.get(&url).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

pub(crate) fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

fn expect_document(envelope: ApiEnvelope, collection: Collection) -> Result<Value> {
    match envelope.data {
        Some(doc @ Value::Object(_)) => Ok(doc),
        _ => Err(SyncError::Validation(format!(
            "Expected a {} document from the server",
            collection
        ))),
    }
}

fn parse_envelope(status: StatusCode, body: &str, call: Call) -> Result<ApiEnvelope> {
    let envelope: Option<ApiEnvelope> = serde_json::from_str(body).ok();

    if status.is_success() {
        return match envelope {
            Some(env) if env.success => Ok(env),
            Some(env) => Err(SyncError::Validation(
                env.error
                    .unwrap_or_else(|| "Server reported failure".to_string()),
            )),
            None => Err(SyncError::Validation(format!(
                "Unparseable response body (HTTP {})",
                status.as_u16()
            ))),
        };
    }

    let message = envelope
        .and_then(|env| env.error)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    Err(classify_status(status, call, message))
}

fn classify_status(status: StatusCode, call: Call, message: String) -> SyncError {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        return SyncError::Network(message);
    }

    match status {
        StatusCode::NOT_FOUND | StatusCode::CONFLICT | StatusCode::GONE
            if call == Call::ById =>
        {
            SyncError::Conflict(message)
        }
        StatusCode::CONFLICT => SyncError::Conflict(message),
        _ => SyncError::Validation(message),
    }
}
