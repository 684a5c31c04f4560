//! Core data models used throughout the sentinel.
//!
//! Workspace projections ([`Document`], [`Permission`], [`Row`], [`Page`],
//! [`ContentItem`]) mirror the camelCase JSON returned by the Coda API and are
//! discarded after each scan. [`Alert`] is the only type that outlives a scan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A Coda document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_link: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrincipalType {
    /// Link sharing: anyone with the link can view.
    AnonymousViewer,
    Anyone,
    Email,
    User,
    Group,
    Domain,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    #[serde(rename = "type")]
    pub kind: PrincipalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessLevel {
    #[serde(alias = "readonly")]
    ReadOnly,
    Write,
    Comment,
    #[serde(rename = "none")]
    NoAccess,
    #[serde(other)]
    Other,
}

/// One entry of a document's access-control list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    pub principal: Principal,
    pub access: AccessLevel,
}

impl Permission {
    pub fn is_anonymous(&self) -> bool {
        self.principal.kind == PrincipalType::AnonymousViewer
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// A table row. Cell values are kept as raw JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    #[serde(default)]
    pub values: Map<String, Value>,
}

/// Explicit pagination window for [`list_rows`](crate::client::WorkspaceClient::list_rows).
///
/// `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPage {
    pub page: usize,
    pub limit: usize,
}

impl RowPage {
    pub fn new(page: usize, limit: usize) -> Self {
        Self {
            page: page.max(1),
            limit,
        }
    }

    /// Half-open index range covered by this page.
    pub fn range(&self) -> (usize, usize) {
        let start = (self.page - 1) * self.limit;
        (start, start + self.limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemContent {
    #[serde(default)]
    pub content: Option<String>,
}

/// One structured block from a page's content stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    #[serde(default)]
    pub item_content: Option<ItemContent>,
}

impl ContentItem {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            item_content: Some(ItemContent {
                content: Some(text.into()),
            }),
        }
    }

    /// Block text, or `""` when the block carries none.
    pub fn text(&self) -> &str {
        self.item_content
            .as_ref()
            .and_then(|c| c.content.as_deref())
            .unwrap_or("")
    }
}

/// One cursor page of content blocks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPage {
    #[serde(default)]
    pub items: Vec<ContentItem>,
    #[serde(default, rename = "nextPageToken")]
    pub next_cursor: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════
// Alerts
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    UnusedDocument,
    PublicDocument,
    ExternalShare,
    SensitiveDataInRow,
    SensitiveTextOnPage,
    SensitivePageContent,
    /// A resource could not be loaded, so it was not checked.
    FetchFailed,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::UnusedDocument => "UNUSED_DOCUMENT",
            AlertType::PublicDocument => "PUBLIC_DOCUMENT",
            AlertType::ExternalShare => "EXTERNAL_SHARE",
            AlertType::SensitiveDataInRow => "SENSITIVE_DATA_IN_ROW",
            AlertType::SensitiveTextOnPage => "SENSITIVE_TEXT_ON_PAGE",
            AlertType::SensitivePageContent => "SENSITIVE_PAGE_CONTENT",
            AlertType::FetchFailed => "FETCH_FAILED",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Alert severity, always within `1..=10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Severity(u8);

impl Severity {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    /// Clamp an arbitrary value into the valid range.
    pub fn saturating(value: u8) -> Self {
        Self(value.clamp(Self::MIN, Self::MAX))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!("severity {} out of range [1, 10]", value))
        }
    }
}

impl From<Severity> for u8 {
    fn from(s: Severity) -> u8 {
        s.0
    }
}

/// A typed, severity-ranked finding.
///
/// `subject_id` names the document, row or page that triggered the alert;
/// `metadata` carries the surrounding identifiers (`docId`, `tableId`,
/// `pageId`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub subject_id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Alert {
    pub fn new(
        subject_id: impl Into<String>,
        alert_type: AlertType,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            alert_type,
            severity,
            message: message.into(),
            metadata: None,
        }
    }

    /// Attach a metadata entry, creating the map on first use.
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    /// The `docId` metadata entry, if present.
    pub fn doc_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("docId"))
            .and_then(|v| v.as_str())
    }
}

/// Result of a remediation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationOutcome {
    pub success: bool,
    pub message: String,
}

impl RemediationOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
