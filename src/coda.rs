//! Coda REST API client.
//!
//! Implements [`WorkspaceClient`] against `https://coda.io/apis/v1` (or any
//! compatible base URL, which the integration tests point at a local mock).
//!
//! # Authentication
//!
//! Requests carry `Authorization: Bearer <token>`. The token is read from
//! the environment variable named by `workspace.token_env`
//! (`CODA_API_TOKEN` by default); a missing token is a startup error.
//!
//! # Pagination
//!
//! List endpoints return `{ "items": [...], "nextPageToken": "..." }`. The
//! client follows `nextPageToken` until it is absent. Table rows are the
//! exception: [`list_rows`](WorkspaceClient::list_rows) returns only the
//! window requested by the caller. The continuation token seen at each row
//! offset is kept per `(doc, table, limit)`, so walking a table page by page
//! resumes where the previous window stopped instead of starting over.
//! Asking for page 1 again forgets the table's tokens.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, ... capped at 32s)
//! - Network errors → retry
//! - Other 4xx → fail immediately (404 maps to [`ClientError::NotFound`])

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::client::{ClientError, ClientResult, WorkspaceClient};
use crate::config::WorkspaceConfig;
use crate::models::{
    ContentPage, Document, Page, Permission, RemediationOutcome, Row, RowPage, Table,
};

/// Largest `limit` the Coda API accepts on list endpoints.
const MAX_API_PAGE_SIZE: usize = 500;

/// Envelope shared by all Coda list endpoints.
#[derive(Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// `(doc_id, table_id, limit)`
type RowCursorKey = (String, String, usize);

pub struct CodaClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
    max_retries: u32,
    timeout_secs: u64,
    /// Row offset → `pageToken` that starts there.
    row_cursors: Mutex<HashMap<RowCursorKey, BTreeMap<usize, String>>>,
}

impl CodaClient {
    /// Build a client from config, reading the API token from the environment.
    ///
    /// # Errors
    ///
    /// Fails if the token variable is unset or empty, or the base URL is
    /// invalid.
    pub fn from_config(config: &WorkspaceConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env)
            .with_context(|| format!("{} environment variable not set", config.token_env))?;
        if token.trim().is_empty() {
            anyhow::bail!("{} environment variable is empty", config.token_env);
        }
        Self::new(config, token)
    }

    pub fn new(config: &WorkspaceConfig, token: String) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid workspace.base_url: {}", config.base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("workspace.base_url cannot be used as a base: {}", base_url);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url,
            token,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
            row_cursors: Mutex::new(HashMap::new()),
        })
    }

    /// Closest known resume point at or before `start`.
    fn row_cursor(&self, key: &RowCursorKey, start: usize) -> (usize, Option<String>) {
        let mut cursors = self
            .row_cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if start == 0 {
            cursors.remove(key);
            return (0, None);
        }
        cursors
            .get(key)
            .and_then(|by_offset| by_offset.range(..=start).next_back())
            .map(|(offset, token)| (*offset, Some(token.clone())))
            .unwrap_or((0, None))
    }

    fn remember_row_cursor(&self, key: &RowCursorKey, offset: usize, token: String) {
        self.row_cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .insert(offset, token);
    }

    fn forget_row_cursors(&self, key: &RowCursorKey) {
        self.row_cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn url(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Transport(format!("invalid base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request with retry/backoff and map the final status.
    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> ClientResult<reqwest::Response> {
        let url = self.url(segments)?;
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .request(method.clone(), url.clone())
                .bearer_auth(&self.token)
                .query(query)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let body = response.text().await.unwrap_or_default();

                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        tracing::debug!(%url, %status, attempt, "retrying workspace request");
                        last_err = Some(ClientError::Http {
                            status: status.as_u16(),
                            body,
                        });
                        continue;
                    }

                    if status == StatusCode::NOT_FOUND {
                        return Err(ClientError::NotFound(url.path().to_string()));
                    }

                    return Err(ClientError::Http {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(e) => {
                    last_err = Some(if e.is_timeout() {
                        ClientError::Timeout(self.timeout_secs)
                    } else {
                        ClientError::Transport(e.to_string())
                    });
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ClientError::Transport("request failed".to_string())))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> ClientResult<T> {
        let response = self.send(Method::GET, segments, query).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Collect a list endpoint, following `nextPageToken`.
    async fn list_all<T: DeserializeOwned>(
        &self,
        segments: &[&str],
    ) -> ClientResult<Vec<T>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let query: Vec<(&str, String)> = page_token
                .iter()
                .map(|token| ("pageToken", token.clone()))
                .collect();

            let page: ListResponse<T> = self.get_json(segments, &query).await?;
            items.extend(page.items);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(items),
            }
        }
    }
}

#[async_trait]
impl WorkspaceClient for CodaClient {
    async fn list_documents(&self) -> ClientResult<Vec<Document>> {
        self.list_all(&["docs"]).await
    }

    async fn get_document(&self, doc_id: &str) -> ClientResult<Document> {
        self.get_json(&["docs", doc_id], &[]).await
    }

    async fn list_permissions(&self, doc_id: &str) -> ClientResult<Vec<Permission>> {
        self.list_all(&["docs", doc_id, "acl", "permissions"])
            .await
    }

    async fn list_tables(&self, doc_id: &str) -> ClientResult<Vec<Table>> {
        self.list_all(&["docs", doc_id, "tables"]).await
    }

    async fn list_rows(
        &self,
        doc_id: &str,
        table_id: &str,
        page: RowPage,
    ) -> ClientResult<Vec<Row>> {
        let (start, end) = page.range();
        let limit = page.limit.clamp(1, MAX_API_PAGE_SIZE);
        let key: RowCursorKey = (doc_id.to_string(), table_id.to_string(), limit);
        let segments = ["docs", doc_id, "tables", table_id, "rows"];

        let (mut position, mut page_token) = self.row_cursor(&key, start);
        let mut rows = Vec::new();

        while position < end {
            let mut query = vec![
                ("useColumnNames", "true".to_string()),
                ("limit", limit.to_string()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }

            let batch: ListResponse<Row> = match self.get_json(&segments, &query).await {
                Ok(batch) => batch,
                Err(err) => {
                    self.forget_row_cursors(&key);
                    return Err(err);
                }
            };

            let count = batch.items.len();
            for (i, row) in batch.items.into_iter().enumerate() {
                if (start..end).contains(&(position + i)) {
                    rows.push(row);
                }
            }
            position += count;

            match batch.next_page_token {
                Some(token) if !token.is_empty() && count > 0 => {
                    self.remember_row_cursor(&key, position, token.clone());
                    page_token = Some(token);
                }
                _ => break,
            }
        }

        Ok(rows)
    }

    async fn list_pages(&self, doc_id: &str) -> ClientResult<Vec<Page>> {
        self.list_all(&["docs", doc_id, "pages"]).await
    }

    async fn export_page_html(&self, doc_id: &str, page_id: &str) -> ClientResult<String> {
        let response = self
            .send(
                Method::GET,
                &["docs", doc_id, "pages", page_id, "export", "html"],
                &[],
            )
            .await?;
        response
            .text()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn get_page_content(
        &self,
        doc_id: &str,
        page_id: &str,
        cursor: Option<&str>,
    ) -> ClientResult<ContentPage> {
        let query: Vec<(&str, String)> = cursor
            .map(|c| vec![("pageToken", c.to_string())])
            .unwrap_or_default();
        self.get_json(&["docs", doc_id, "pages", page_id, "content"], &query)
            .await
    }

    async fn delete_permission(&self, doc_id: &str, permission_id: &str) -> ClientResult<()> {
        self.send(
            Method::DELETE,
            &["docs", doc_id, "acl", "permissions", permission_id],
            &[],
        )
        .await?;
        Ok(())
    }

    async fn delete_document(&self, doc_id: &str) -> ClientResult<RemediationOutcome> {
        self.send(Method::DELETE, &["docs", doc_id], &[]).await?;
        Ok(RemediationOutcome::ok("Document deleted"))
    }
}
