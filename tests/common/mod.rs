//! In-memory workspace shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use coda_sentinel::client::{ClientError, ClientResult, WorkspaceClient};
use coda_sentinel::models::{
    AccessLevel, ContentItem, ContentPage, Document, Page, Permission, Principal, PrincipalType,
    RemediationOutcome, Row, RowPage, Table,
};

type Key = (String, String);

fn key(a: &str, b: &str) -> Key {
    (a.to_string(), b.to_string())
}

/// A workspace held in maps. Writes are recorded, not applied.
#[derive(Default)]
pub struct FakeWorkspace {
    /// Behind a lock so a test can change the listing between cycles.
    pub documents: Mutex<Vec<Document>>,
    pub permissions: HashMap<String, Vec<Permission>>,
    pub tables: HashMap<String, Vec<Table>>,
    pub rows: HashMap<Key, Vec<Row>>,
    pub pages: HashMap<String, Vec<Page>>,
    pub html: HashMap<Key, String>,
    /// Content blocks per page, split into cursor pages.
    pub content: HashMap<Key, Vec<Vec<ContentItem>>>,

    pub failing_permissions: HashSet<String>,
    pub slow_permissions: HashSet<String>,
    /// When set, `list_documents` waits for a notification first.
    pub gate: Option<Arc<Notify>>,

    pub row_requests: Mutex<Vec<(String, RowPage)>>,
    pub content_requests: AtomicUsize,
    pub document_requests: AtomicUsize,
    pub deleted_documents: Mutex<Vec<String>>,
    pub deleted_permissions: Mutex<Vec<String>>,
}

impl FakeWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, id: &str, name: &str, days_since_update: i64) -> Self {
        self.documents
            .get_mut()
            .unwrap()
            .push(document(id, name, days_since_update));
        self
    }

    /// Swap the document listing seen by later calls.
    pub fn replace_documents(&self, documents: Vec<Document>) {
        *self.documents.lock().unwrap() = documents;
    }

    pub fn with_permission(mut self, doc_id: &str, permission: Permission) -> Self {
        self.permissions
            .entry(doc_id.to_string())
            .or_default()
            .push(permission);
        self
    }

    pub fn with_rows(mut self, doc_id: &str, table_id: &str, rows: Vec<Row>) -> Self {
        self.tables.entry(doc_id.to_string()).or_default().push(Table {
            id: table_id.to_string(),
            name: table_id.to_string(),
        });
        self.rows.insert(key(doc_id, table_id), rows);
        self
    }

    pub fn with_page(
        mut self,
        doc_id: &str,
        page_id: &str,
        name: &str,
        html: &str,
        content: Vec<Vec<ContentItem>>,
    ) -> Self {
        self.pages.entry(doc_id.to_string()).or_default().push(Page {
            id: page_id.to_string(),
            name: name.to_string(),
        });
        self.html.insert(key(doc_id, page_id), html.to_string());
        self.content.insert(key(doc_id, page_id), content);
        self
    }
}

pub fn document(id: &str, name: &str, days_since_update: i64) -> Document {
    let updated = Utc::now() - Duration::days(days_since_update);
    Document {
        id: id.to_string(),
        name: name.to_string(),
        created_at: updated - Duration::days(1),
        updated_at: updated,
        browser_link: None,
    }
}

pub fn anonymous_viewer(id: &str) -> Permission {
    Permission {
        id: id.to_string(),
        principal: Principal {
            kind: PrincipalType::AnonymousViewer,
            email: None,
            domain: None,
        },
        access: AccessLevel::ReadOnly,
    }
}

pub fn email_grant(id: &str, email: &str, access: AccessLevel) -> Permission {
    Permission {
        id: id.to_string(),
        principal: Principal {
            kind: PrincipalType::Email,
            email: Some(email.to_string()),
            domain: None,
        },
        access,
    }
}

pub fn row(id: &str, values: Value) -> Row {
    let values: Map<String, Value> = match values {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Row {
        id: id.to_string(),
        values,
    }
}

pub fn blocks(texts: &[&str]) -> Vec<ContentItem> {
    texts.iter().map(|t| ContentItem::from_text(*t)).collect()
}

#[async_trait]
impl WorkspaceClient for FakeWorkspace {
    async fn list_documents(&self) -> ClientResult<Vec<Document>> {
        self.document_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(self.documents.lock().unwrap().clone())
    }

    async fn list_permissions(&self, doc_id: &str) -> ClientResult<Vec<Permission>> {
        if self.failing_permissions.contains(doc_id) {
            return Err(ClientError::Http {
                status: 500,
                body: "boom".to_string(),
            });
        }
        if self.slow_permissions.contains(doc_id) {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        }
        Ok(self.permissions.get(doc_id).cloned().unwrap_or_default())
    }

    async fn list_tables(&self, doc_id: &str) -> ClientResult<Vec<Table>> {
        Ok(self.tables.get(doc_id).cloned().unwrap_or_default())
    }

    async fn list_rows(
        &self,
        doc_id: &str,
        table_id: &str,
        page: RowPage,
    ) -> ClientResult<Vec<Row>> {
        self.row_requests
            .lock()
            .unwrap()
            .push((table_id.to_string(), page));
        let rows = self
            .rows
            .get(&key(doc_id, table_id))
            .cloned()
            .unwrap_or_default();
        let (start, end) = page.range();
        Ok(rows.into_iter().skip(start).take(end - start).collect())
    }

    async fn list_pages(&self, doc_id: &str) -> ClientResult<Vec<Page>> {
        Ok(self.pages.get(doc_id).cloned().unwrap_or_default())
    }

    async fn export_page_html(&self, doc_id: &str, page_id: &str) -> ClientResult<String> {
        self.html
            .get(&key(doc_id, page_id))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("{}/{}", doc_id, page_id)))
    }

    async fn get_page_content(
        &self,
        doc_id: &str,
        page_id: &str,
        cursor: Option<&str>,
    ) -> ClientResult<ContentPage> {
        self.content_requests.fetch_add(1, Ordering::SeqCst);
        let chunks = self
            .content
            .get(&key(doc_id, page_id))
            .cloned()
            .unwrap_or_default();
        let index: usize = match cursor {
            None => 0,
            Some(c) => c
                .strip_prefix("cursor-")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| ClientError::Decode(format!("bad cursor {}", c)))?,
        };
        let items = chunks.get(index).cloned().unwrap_or_default();
        let next_cursor = (index + 1 < chunks.len()).then(|| format!("cursor-{}", index + 1));
        Ok(ContentPage { items, next_cursor })
    }

    async fn delete_permission(&self, _doc_id: &str, permission_id: &str) -> ClientResult<()> {
        self.deleted_permissions
            .lock()
            .unwrap()
            .push(permission_id.to_string());
        Ok(())
    }

    async fn delete_document(&self, doc_id: &str) -> ClientResult<RemediationOutcome> {
        if !self.documents.lock().unwrap().iter().any(|d| d.id == doc_id) {
            return Err(ClientError::NotFound(format!("/docs/{}", doc_id)));
        }
        self.deleted_documents
            .lock()
            .unwrap()
            .push(doc_id.to_string());
        Ok(RemediationOutcome::ok("Document deleted"))
    }
}
