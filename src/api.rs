//! Delivery backend API client.
//!
//! The role API traits are the seam between the core (feeds and gateways)
//! and the REST backend; [`HttpBackend`] implements all three over `reqwest`.
//! Every call attaches the bearer token, unwraps the `{ "data": ... }`
//! envelope, and maps failures onto [`DeliveryError`].

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DeliveryError, DeliveryResult};
use crate::models::{DeliveryTask, IncidentReport, NewOrder, Order, Rating, RestaurantOrder};
use crate::status::{Bucket, OrderStatus};
use crate::storage::TokenSource;

/// Default timeout for API requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Timeout used specifically for the lightweight connectivity test.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Role API surfaces
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CustomerApi: Send + Sync {
    async fn list_orders(&self, bucket: Bucket) -> DeliveryResult<Vec<Order>>;
    async fn get_order(&self, id: &str) -> DeliveryResult<Order>;
    async fn place_order(&self, order: &NewOrder) -> DeliveryResult<Order>;
    async fn cancel_order(&self, id: &str) -> DeliveryResult<Order>;
    async fn submit_rating(&self, id: &str, rating: &Rating) -> DeliveryResult<()>;
}

/// Courier task lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskList {
    /// Open tasks no courier has accepted yet.
    Available,
    Active,
    History,
}

impl TaskList {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Active => "active",
            Self::History => "history",
        }
    }
}

impl From<Bucket> for TaskList {
    fn from(bucket: Bucket) -> Self {
        match bucket {
            Bucket::Active => Self::Active,
            Bucket::History => Self::History,
        }
    }
}

#[async_trait]
pub trait CourierApi: Send + Sync {
    async fn list_tasks(&self, list: TaskList) -> DeliveryResult<Vec<DeliveryTask>>;
    async fn get_task(&self, id: &str) -> DeliveryResult<DeliveryTask>;
    async fn accept_task(&self, id: &str) -> DeliveryResult<DeliveryTask>;
    async fn update_task_status(
        &self,
        id: &str,
        status: &OrderStatus,
        note: Option<&str>,
    ) -> DeliveryResult<DeliveryTask>;
    async fn report_incident(&self, id: &str, note: &str) -> DeliveryResult<IncidentReport>;
}

#[async_trait]
pub trait RestaurantApi: Send + Sync {
    async fn list_restaurant_orders(&self, bucket: Bucket) -> DeliveryResult<Vec<RestaurantOrder>>;
    async fn get_restaurant_order(&self, id: &str) -> DeliveryResult<RestaurantOrder>;
    async fn update_restaurant_order_status(
        &self,
        id: &str,
        status: &OrderStatus,
    ) -> DeliveryResult<RestaurantOrder>;
}

// ---------------------------------------------------------------------------
// URL helpers
// ---------------------------------------------------------------------------

/// Normalise the API base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_api_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Append `segments` to the base URL's path, each one encoded on its own
/// (order ids are opaque strings), plus an optional query pair.
fn endpoint(
    base_url: &str,
    segments: &[&str],
    query: Option<(&str, &str)>,
) -> DeliveryResult<Url> {
    let invalid = || DeliveryError::Network(format!("Invalid delivery service URL: {base_url}"));
    let mut url = Url::parse(base_url).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|_| invalid())?
        .pop_if_empty()
        .extend(segments);
    if let Some((key, value)) = query {
        url.query_pairs_mut().append_pair(key, value);
    }
    Ok(url)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn transport_error(url: &str, err: &reqwest::Error) -> DeliveryError {
    if err.is_timeout() {
        return DeliveryError::Timeout(format!("Connection to {url} timed out"));
    }
    if err.is_connect() {
        return DeliveryError::Network(format!("Cannot reach delivery service at {url}"));
    }
    if err.is_builder() {
        return DeliveryError::Network(format!("Invalid delivery service URL: {url}"));
    }
    DeliveryError::Network(format!("Network error communicating with {url}: {err}"))
}

/// Map a non-2xx response onto the error taxonomy, preferring the backend's
/// `{ "message", "code" }` envelope when present.
fn status_error(status: StatusCode, body_text: &str) -> DeliveryError {
    let envelope = serde_json::from_str::<Value>(body_text).ok();
    let message = envelope
        .as_ref()
        .and_then(|v| v.get("message").or_else(|| v.get("error")))
        .and_then(Value::as_str)
        .map(str::to_string);
    let code = envelope
        .as_ref()
        .and_then(|v| v.get("code"))
        .and_then(Value::as_str);

    let detail = match (message, code) {
        (Some(m), Some(c)) => format!("{m} ({c})"),
        (Some(m), None) => m,
        (None, _) if !body_text.trim().is_empty() => body_text.trim().to_string(),
        (None, _) => format!("HTTP {}", status.as_u16()),
    };

    match status.as_u16() {
        401 | 403 => DeliveryError::Unauthorized(detail),
        404 => DeliveryError::NotFound(detail),
        409 => DeliveryError::Conflict(detail),
        400 | 422 => DeliveryError::Validation(detail),
        408 | 504 => DeliveryError::Timeout(detail),
        s if s >= 500 => DeliveryError::Network(format!("Delivery service error (HTTP {s}): {detail}")),
        s => DeliveryError::Network(format!("Unexpected response (HTTP {s}): {detail}")),
    }
}

/// Pull the payload out of `{ "data": ... }`.
fn unwrap_envelope(mut body: Value) -> DeliveryResult<Value> {
    match body.get_mut("data") {
        Some(data) => Ok(data.take()),
        None => Err(DeliveryError::Decode("response has no \"data\" field".into())),
    }
}

fn decode<T: DeserializeOwned>(path: &str, data: Value) -> DeliveryResult<T> {
    serde_json::from_value(data).map_err(|e| DeliveryError::Decode(format!("{path}: {e}")))
}

/// Decode a list element by element. A malformed entry is skipped so one bad
/// record never hides the rest of the list.
fn decode_list<T: DeserializeOwned>(path: &str, data: Value) -> DeliveryResult<Vec<T>> {
    let Value::Array(entries) = data else {
        return Err(DeliveryError::Decode(format!("{path}: expected a list")));
    };
    let total = entries.len();
    let decoded: Vec<T> = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<T>(entry) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(path, error = %e, "Skipping malformed list entry");
                None
            }
        })
        .collect();
    if decoded.len() != total {
        debug!(path, total, kept = decoded.len(), "Decoded list with skipped entries");
    }
    Ok(decoded)
}

// ---------------------------------------------------------------------------
// Connectivity test
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Serialize)]
pub struct ConnectivityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

pub struct HttpBackend {
    base_url: String,
    client: Client,
    token: Arc<dyn TokenSource>,
}

impl HttpBackend {
    pub fn new(
        base_url: &str,
        token: Arc<dyn TokenSource>,
        timeout: Duration,
    ) -> DeliveryResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: normalize_api_url(base_url),
            client,
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform an authenticated request and return the unwrapped payload
    /// (`Value::Null` for empty bodies).
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
        idempotency_key: Option<&str>,
    ) -> DeliveryResult<Value> {
        let token = self
            .token
            .bearer_token()
            .ok_or_else(|| DeliveryError::Unauthorized("No access token, sign in first".into()))?;
        let path = url.path().to_string();

        let mut req = self
            .client
            .request(method.clone(), url)
            .bearer_auth(token.as_str())
            .header("Accept", "application/json");
        if let Some(key) = idempotency_key {
            req = req.header("Idempotency-Key", key);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }

        let started = Instant::now();
        let resp = req
            .send()
            .await
            .map_err(|e| transport_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .map_err(|e| transport_error(&self.base_url, &e))?;
        debug!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Backend call"
        );

        if !status.is_success() {
            return Err(status_error(status, &body_text));
        }
        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        let parsed: Value = serde_json::from_str(&body_text)
            .map_err(|e| DeliveryError::Decode(format!("{path}: invalid JSON: {e}")))?;
        unwrap_envelope(parsed)
    }

    fn url(&self, segments: &[&str]) -> DeliveryResult<Url> {
        endpoint(&self.base_url, segments, None)
    }

    fn list_url(&self, segments: &[&str], bucket: Bucket) -> DeliveryResult<Url> {
        endpoint(&self.base_url, segments, Some(("status", bucket.as_str())))
    }

    async fn get_one<T: DeserializeOwned>(&self, url: Url) -> DeliveryResult<T> {
        let path = url.path().to_string();
        let data = self.send(Method::GET, url, None, None).await?;
        decode(&path, data)
    }

    async fn get_list<T: DeserializeOwned>(&self, url: Url) -> DeliveryResult<Vec<T>> {
        let path = url.path().to_string();
        let data = self.send(Method::GET, url, None, None).await?;
        decode_list(&path, data)
    }

    async fn write<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> DeliveryResult<T> {
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| DeliveryError::Validation(format!("Cannot encode request: {e}")))?;
        let path = url.path().to_string();
        let data = self.send(method, url, body, None).await?;
        decode(&path, data)
    }

    /// Lightweight health check against `GET /health`.
    pub async fn check_connectivity(&self) -> ConnectivityResult {
        let health_url = match self.url(&["health"]) {
            Ok(url) => url,
            Err(e) => {
                return ConnectivityResult {
                    success: false,
                    latency_ms: None,
                    error: Some(e.to_string()),
                };
            }
        };
        let start = Instant::now();

        let resp = match self
            .client
            .get(health_url)
            .timeout(CONNECTIVITY_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return ConnectivityResult {
                    success: false,
                    latency_ms: None,
                    error: Some(transport_error(&self.base_url, &e).to_string()),
                };
            }
        };

        let latency = start.elapsed().as_millis() as u64;
        let status = resp.status();
        if status.is_success() {
            info!(latency_ms = latency, "connectivity test passed");
            ConnectivityResult {
                success: true,
                latency_ms: Some(latency),
                error: None,
            }
        } else {
            ConnectivityResult {
                success: false,
                latency_ms: Some(latency),
                error: Some(status_error(status, "").to_string()),
            }
        }
    }
}

#[async_trait]
impl CustomerApi for HttpBackend {
    async fn list_orders(&self, bucket: Bucket) -> DeliveryResult<Vec<Order>> {
        self.get_list(self.list_url(&["orders"], bucket)?).await
    }

    async fn get_order(&self, id: &str) -> DeliveryResult<Order> {
        self.get_one(self.url(&["orders", id])?).await
    }

    async fn place_order(&self, order: &NewOrder) -> DeliveryResult<Order> {
        let body = serde_json::to_value(order)
            .map_err(|e| DeliveryError::Validation(format!("Cannot encode order: {e}")))?;
        let key = Uuid::new_v4().to_string();
        let data = self
            .send(Method::POST, self.url(&["orders"])?, Some(body), Some(&key))
            .await?;
        decode("/orders", data)
    }

    async fn cancel_order(&self, id: &str) -> DeliveryResult<Order> {
        self.write::<Order, Value>(Method::PATCH, self.url(&["orders", id, "cancel"])?, None)
            .await
    }

    async fn submit_rating(&self, id: &str, rating: &Rating) -> DeliveryResult<()> {
        let body = serde_json::to_value(rating)
            .map_err(|e| DeliveryError::Validation(format!("Cannot encode rating: {e}")))?;
        self.send(Method::POST, self.url(&["orders", id, "rating"])?, Some(body), None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CourierApi for HttpBackend {
    async fn list_tasks(&self, list: TaskList) -> DeliveryResult<Vec<DeliveryTask>> {
        self.get_list(self.url(&["delivery", list.as_str()])?).await
    }

    async fn get_task(&self, id: &str) -> DeliveryResult<DeliveryTask> {
        self.get_one(self.url(&["delivery", id])?).await
    }

    async fn accept_task(&self, id: &str) -> DeliveryResult<DeliveryTask> {
        let url = self.url(&["delivery", id, "accept"])?;
        self.write::<DeliveryTask, Value>(Method::POST, url, None).await
    }

    async fn update_task_status(
        &self,
        id: &str,
        status: &OrderStatus,
        note: Option<&str>,
    ) -> DeliveryResult<DeliveryTask> {
        let mut body = serde_json::json!({ "status": status });
        if let Some(note) = note {
            body["note"] = Value::String(note.to_string());
        }
        self.write(Method::PATCH, self.url(&["delivery", id, "status"])?, Some(&body))
            .await
    }

    async fn report_incident(&self, id: &str, note: &str) -> DeliveryResult<IncidentReport> {
        let body = serde_json::json!({ "note": note });
        self.write(Method::POST, self.url(&["delivery", id, "incident"])?, Some(&body))
            .await
    }
}

#[async_trait]
impl RestaurantApi for HttpBackend {
    async fn list_restaurant_orders(&self, bucket: Bucket) -> DeliveryResult<Vec<RestaurantOrder>> {
        self.get_list(self.list_url(&["restaurant", "orders"], bucket)?)
            .await
    }

    async fn get_restaurant_order(&self, id: &str) -> DeliveryResult<RestaurantOrder> {
        self.get_one(self.url(&["restaurant", "orders", id])?).await
    }

    async fn update_restaurant_order_status(
        &self,
        id: &str,
        status: &OrderStatus,
    ) -> DeliveryResult<RestaurantOrder> {
        let body = serde_json::json!({ "status": status });
        self.write(
            Method::PATCH,
            self.url(&["restaurant", "orders", id, "status"])?,
            Some(&body),
        )
        .await
    }
}
