//! Workspace API client abstraction.
//!
//! [`WorkspaceClient`] is the seam between the scan pipeline and the
//! workspace. The production implementation is
//! [`CodaClient`](crate::coda::CodaClient); tests plug in in-memory fakes.
//!
//! Every method returns an explicit `Result` so the orchestrator can tell an
//! empty collection from one that failed to load.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    AccessLevel, ContentItem, ContentPage, Document, Page, Permission, RemediationOutcome, Row,
    RowPage, Table,
};

/// Upper bound on content cursor pages followed for a single page.
const MAX_CONTENT_PAGES: usize = 10_000;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("workspace API error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Read and write access to a document workspace.
///
/// Pagination of list endpoints is the implementation's concern, except
/// for [`list_rows`](WorkspaceClient::list_rows) whose window is chosen by
/// the caller, and [`get_page_content`](WorkspaceClient::get_page_content)
/// which exposes the raw cursor.
#[async_trait]
pub trait WorkspaceClient: Send + Sync {
    async fn list_documents(&self) -> ClientResult<Vec<Document>>;

    async fn list_permissions(&self, doc_id: &str) -> ClientResult<Vec<Permission>>;

    async fn list_tables(&self, doc_id: &str) -> ClientResult<Vec<Table>>;

    /// Rows of `table_id` inside the window described by `page`.
    ///
    /// A window shorter than `page.limit` means the table is exhausted.
    async fn list_rows(
        &self,
        doc_id: &str,
        table_id: &str,
        page: RowPage,
    ) -> ClientResult<Vec<Row>>;

    async fn list_pages(&self, doc_id: &str) -> ClientResult<Vec<Page>>;

    async fn export_page_html(&self, doc_id: &str, page_id: &str) -> ClientResult<String>;

    /// One cursor page of a page's content blocks. `cursor = None` starts
    /// from the beginning.
    async fn get_page_content(
        &self,
        doc_id: &str,
        page_id: &str,
        cursor: Option<&str>,
    ) -> ClientResult<ContentPage>;

    async fn delete_permission(&self, doc_id: &str, permission_id: &str) -> ClientResult<()>;

    async fn delete_document(&self, doc_id: &str) -> ClientResult<RemediationOutcome>;

    /// A single document. The default scans [`list_documents`](WorkspaceClient::list_documents).
    async fn get_document(&self, doc_id: &str) -> ClientResult<Document> {
        self.list_documents()
            .await?
            .into_iter()
            .find(|doc| doc.id == doc_id)
            .ok_or_else(|| ClientError::NotFound(format!("document {}", doc_id)))
    }

    /// The full content stream of a page, following cursors until none
    /// remains.
    async fn get_full_page_content(
        &self,
        doc_id: &str,
        page_id: &str,
    ) -> ClientResult<Vec<ContentItem>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_CONTENT_PAGES {
            let page = self
                .get_page_content(doc_id, page_id, cursor.as_deref())
                .await?;
            items.extend(page.items);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(items),
            }
        }

        Err(ClientError::Decode(format!(
            "content of page {} did not terminate after {} cursor pages",
            page_id, MAX_CONTENT_PAGES
        )))
    }

    /// Revoke one read-only grant on the document.
    ///
    /// An anonymous read-only grant is preferred; otherwise the first
    /// read-only grant is revoked.
    async fn remove_public_access(&self, doc_id: &str) -> ClientResult<RemediationOutcome> {
        let permissions = self.list_permissions(doc_id).await?;

        let target = permissions
            .iter()
            .filter(|p| p.access == AccessLevel::ReadOnly)
            .find(|p| p.is_anonymous())
            .or_else(|| {
                permissions
                    .iter()
                    .find(|p| p.access == AccessLevel::ReadOnly)
            });

        let Some(permission) = target else {
            return Ok(RemediationOutcome::failed(
                "No public access found on this document",
            ));
        };

        self.delete_permission(doc_id, &permission.id).await?;
        Ok(RemediationOutcome::ok("Public access removed successfully"))
    }
}
