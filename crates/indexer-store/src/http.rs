//! HTTP document store client.
//!
//! Speaks the document-oriented REST dialect of the search store:
//! `GET/PUT/DELETE {base}/{index}/{type}/{id}` and
//! `POST {base}/{index}/{type}/{id}/_update` with a `{"doc": ...}` body.
//! 404 is an expected answer for every call; any other status >= 400 is an
//! error carrying the store's error body.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use indexer_types::{Document, StoreSettings};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{DocRef, DocumentStore, StoreError, WriteAck};

/// A store response that was accepted (status < 400 or 404).
struct StoreResponse {
    status_code: u16,
    body: Value,
    elapsed: Duration,
}

impl StoreResponse {
    fn is_not_found(&self) -> bool {
        self.status_code == 404 || self.body.get("found") == Some(&Value::Bool(false))
    }

    fn into_ack(self) -> WriteAck {
        WriteAck {
            status_code: self.status_code,
            version: self.body.get("_version").and_then(Value::as_i64),
            elapsed: self.elapsed,
        }
    }
}

/// [`DocumentStore`] over HTTP.
pub struct HttpDocumentStore {
    client: Client,
    base_url: String,
}

impl HttpDocumentStore {
    pub fn new(settings: &StoreSettings) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, doc: DocRef<'_>) -> String {
        format!("{}/{}", self.base_url, doc.path())
    }

    async fn send(
        &self,
        request: RequestBuilder,
        method: &'static str,
        url: &str,
    ) -> Result<StoreResponse, StoreError> {
        let started = Instant::now();
        let response = request.send().await?;
        let status_code = response.status().as_u16();
        let text = response.text().await?;
        let elapsed = started.elapsed();

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)?
        };

        if status_code >= 400 && status_code != 404 {
            warn!(
                method,
                url = %url,
                status = status_code,
                elapsed_ms = elapsed.as_millis(),
                "Store request failed"
            );
            let details = body.get("error").cloned().unwrap_or(body);
            return Err(StoreError::Status {
                status_code,
                details: details.to_string(),
            });
        }

        debug!(
            method,
            url = %url,
            status = status_code,
            elapsed_ms = elapsed.as_millis(),
            "Store request"
        );
        Ok(StoreResponse {
            status_code,
            body,
            elapsed,
        })
    }
}

/// Single-value arrays in a field projection are unwrapped; arrays of objects
/// (statistics groups) are returned whole.
fn unwrap_projected(value: Value) -> Value {
    match value {
        Value::Array(mut items) if !items.is_empty() && !items[0].is_object() => {
            items.swap_remove(0)
        }
        other => other,
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn get(&self, doc: DocRef<'_>) -> Result<Option<Document>, StoreError> {
        let url = self.url(doc);
        let response = self.send(self.client.get(&url), "GET", &url).await?;
        if response.is_not_found() {
            return Ok(None);
        }
        Ok(response
            .body
            .get("_source")
            .and_then(Value::as_object)
            .cloned())
    }

    async fn get_fields(
        &self,
        doc: DocRef<'_>,
        fields: &[&str],
    ) -> Result<Option<Document>, StoreError> {
        let url = self.url(doc);
        let request = self.client.get(&url).query(&[("fields", fields.join(","))]);
        let response = self.send(request, "GET", &url).await?;
        if response.is_not_found() {
            return Ok(None);
        }

        let mut projected = Document::new();
        let body = response.body;
        if let Some(stored) = body.get("fields").and_then(Value::as_object) {
            for field in fields {
                if let Some(value) = stored.get(*field) {
                    projected.insert(field.to_string(), unwrap_projected(value.clone()));
                }
            }
        } else if let Some(source) = body.get("_source").and_then(Value::as_object) {
            for field in fields {
                if let Some(value) = source.get(*field) {
                    projected.insert(field.to_string(), value.clone());
                }
            }
        }
        Ok(Some(projected))
    }

    async fn put(&self, doc: DocRef<'_>, body: &Document) -> Result<WriteAck, StoreError> {
        let url = self.url(doc);
        let response = self
            .send(self.client.put(&url).json(body), "PUT", &url)
            .await?;
        Ok(response.into_ack())
    }

    async fn update(&self, doc: DocRef<'_>, partial: &Document) -> Result<WriteAck, StoreError> {
        let url = format!("{}/_update", self.url(doc));
        let response = self
            .send(
                self.client.post(&url).json(&json!({ "doc": partial })),
                "POST",
                &url,
            )
            .await?;
        Ok(response.into_ack())
    }

    async fn delete(&self, doc: DocRef<'_>) -> Result<WriteAck, StoreError> {
        let url = self.url(doc);
        let response = self.send(self.client.delete(&url), "DELETE", &url).await?;
        Ok(response.into_ack())
    }
}
