//! Detection rule engine.
//!
//! Each rule is an independent predicate over one [`Entity`] and returns the
//! alerts it raises. Rules are stateless; everything they need (thresholds,
//! allow-lists, the scan's reference time) is either configured at
//! construction or carried by the entity.
//!
//! # Built-in rules
//!
//! | Rule | Entity | Severity |
//! |------|--------|----------|
//! | [`UnusedDocumentRule`] | document | configurable (default 5) |
//! | [`PublicDocumentRule`] | document | 9 |
//! | [`ExternalShareRule`] | document | 8 |
//! | [`SensitiveRowRule`] | table row | 8 |
//! | [`SensitiveHtmlRule`] | exported page HTML | 8 |
//! | [`SensitiveContentRule`] | page content block | 8 |
//!
//! The sharing rules report the first qualifying permission only, so a
//! document yields at most one `PUBLIC_DOCUMENT` and one `EXTERNAL_SHARE`
//! alert no matter how many grants qualify.
//!
//! # Extending
//!
//! ```rust
//! use coda_sentinel::config::DetectionConfig;
//! use coda_sentinel::rules::RuleRegistry;
//!
//! let mut rules = RuleRegistry::with_builtins(&DetectionConfig::default());
//! // rules.register(Box::new(MyClassifier::new()));
//! assert_eq!(rules.len(), 6);
//! ```

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::config::DetectionConfig;
use crate::models::{Alert, AlertType, ContentItem, Document, Page, Permission, Row, Severity};

const SHARING_PUBLIC_SEVERITY: u8 = 9;
const SENSITIVE_SEVERITY: u8 = 8;

static ROW_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|secret|card|ssn|token|key|credential)")
        .expect("row keyword pattern is valid")
});

static HTML_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|secret|apikey|credential)")
        .expect("html keyword pattern is valid")
});

static CONTENT_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|secret|token|apikey|card|ssn)")
        .expect("content keyword pattern is valid")
});

/// One unit of workspace data presented to the rules.
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    /// A document together with its full access-control list.
    DocumentAccess {
        document: &'a Document,
        permissions: &'a [Permission],
        now: DateTime<Utc>,
    },
    Row {
        doc_id: &'a str,
        table_id: &'a str,
        row: &'a Row,
    },
    PageHtml {
        doc_id: &'a str,
        page: &'a Page,
        html: &'a str,
    },
    ContentBlock {
        doc_id: &'a str,
        page: &'a Page,
        index: usize,
        item: &'a ContentItem,
    },
}

/// A detection rule.
pub trait Rule: Send + Sync {
    /// Stable identifier, usually the alert type it raises.
    fn name(&self) -> &str;

    /// Classify `entity`. Rules ignore entity kinds they do not handle.
    fn evaluate(&self, entity: &Entity<'_>) -> Vec<Alert>;
}

// ═══════════════════════════════════════════════════════════════════════
// Document rules
// ═══════════════════════════════════════════════════════════════════════

/// Fractional days between `updated_at` and `now`.
pub fn age_in_days(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - updated_at).num_milliseconds() as f64 / 86_400_000.0
}

fn document_alert(
    document: &Document,
    alert_type: AlertType,
    severity: Severity,
    message: String,
) -> Alert {
    Alert::new(&document.id, alert_type, severity, message)
        .with_meta("docId", document.id.as_str())
        .with_meta("docName", document.name.as_str())
}

/// Flags documents not edited for longer than the configured threshold.
pub struct UnusedDocumentRule {
    threshold_days: f64,
    severity: Severity,
}

impl UnusedDocumentRule {
    pub fn new(threshold_days: f64, severity: Severity) -> Self {
        Self {
            threshold_days,
            severity,
        }
    }
}

impl Rule for UnusedDocumentRule {
    fn name(&self) -> &str {
        AlertType::UnusedDocument.as_str()
    }

    fn evaluate(&self, entity: &Entity<'_>) -> Vec<Alert> {
        let Entity::DocumentAccess { document, now, .. } = entity else {
            return Vec::new();
        };

        let age = age_in_days(document.updated_at, *now);
        if age <= self.threshold_days {
            return Vec::new();
        }

        vec![document_alert(
            document,
            AlertType::UnusedDocument,
            self.severity,
            format!("{} unused for {:.3} days", document.name, age),
        )
        .with_meta("ageDays", age)]
    }
}

/// Flags documents with an anonymous (link) viewer grant.
pub struct PublicDocumentRule;

impl Rule for PublicDocumentRule {
    fn name(&self) -> &str {
        AlertType::PublicDocument.as_str()
    }

    fn evaluate(&self, entity: &Entity<'_>) -> Vec<Alert> {
        let Entity::DocumentAccess {
            document,
            permissions,
            ..
        } = entity
        else {
            return Vec::new();
        };

        let Some(permission) = permissions.iter().find(|p| p.is_anonymous()) else {
            return Vec::new();
        };

        vec![document_alert(
            document,
            AlertType::PublicDocument,
            Severity::saturating(SHARING_PUBLIC_SEVERITY),
            format!("{} is shared publicly", document.name),
        )
        .with_meta("permissionId", permission.id.as_str())]
    }
}

/// Flags documents shared with an email outside the allowed domains.
pub struct ExternalShareRule {
    allowed_domains: Vec<String>,
}

impl ExternalShareRule {
    pub fn new(allowed_domains: &[String]) -> Self {
        Self {
            allowed_domains: allowed_domains
                .iter()
                .map(|d| d.trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// The domain is whatever follows the last `@`, so a malformed address
    /// such as `a@yourcompany.com@evil.org` counts as `evil.org`.
    fn is_external(&self, email: &str) -> bool {
        let domain = email
            .rsplit_once('@')
            .map(|(_, d)| d.to_ascii_lowercase())
            .unwrap_or_default();
        !self.allowed_domains.iter().any(|d| *d == domain)
    }
}

impl Rule for ExternalShareRule {
    fn name(&self) -> &str {
        AlertType::ExternalShare.as_str()
    }

    fn evaluate(&self, entity: &Entity<'_>) -> Vec<Alert> {
        let Entity::DocumentAccess {
            document,
            permissions,
            ..
        } = entity
        else {
            return Vec::new();
        };

        let offender = permissions.iter().find_map(|p| {
            p.principal
                .email
                .as_deref()
                .filter(|email| self.is_external(email))
                .map(|email| (p, email))
        });

        let Some((permission, email)) = offender else {
            return Vec::new();
        };

        vec![document_alert(
            document,
            AlertType::ExternalShare,
            Severity::saturating(SENSITIVE_SEVERITY),
            format!("{} shared with outside domain", document.name),
        )
        .with_meta("permissionId", permission.id.as_str())
        .with_meta("email", email)]
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Content rules
// ═══════════════════════════════════════════════════════════════════════

/// Keyword scan over a row's serialized values (field names included).
pub struct SensitiveRowRule {
    pattern: Regex,
}

impl Default for SensitiveRowRule {
    fn default() -> Self {
        Self {
            pattern: ROW_KEYWORDS.clone(),
        }
    }
}

impl Rule for SensitiveRowRule {
    fn name(&self) -> &str {
        AlertType::SensitiveDataInRow.as_str()
    }

    fn evaluate(&self, entity: &Entity<'_>) -> Vec<Alert> {
        let Entity::Row {
            doc_id,
            table_id,
            row,
        } = entity
        else {
            return Vec::new();
        };

        let text = serde_json::to_string(&row.values).unwrap_or_default();
        if !self.pattern.is_match(&text) {
            return Vec::new();
        }

        vec![Alert::new(
            &row.id,
            AlertType::SensitiveDataInRow,
            Severity::saturating(SENSITIVE_SEVERITY),
            "Sensitive content found in table row",
        )
        .with_meta("docId", *doc_id)
        .with_meta("tableId", *table_id)]
    }
}

/// Keyword scan over a page's exported HTML, once per page.
pub struct SensitiveHtmlRule {
    pattern: Regex,
}

impl Default for SensitiveHtmlRule {
    fn default() -> Self {
        Self {
            pattern: HTML_KEYWORDS.clone(),
        }
    }
}

impl Rule for SensitiveHtmlRule {
    fn name(&self) -> &str {
        AlertType::SensitiveTextOnPage.as_str()
    }

    fn evaluate(&self, entity: &Entity<'_>) -> Vec<Alert> {
        let Entity::PageHtml { doc_id, page, html } = entity else {
            return Vec::new();
        };

        if !self.pattern.is_match(html) {
            return Vec::new();
        }

        vec![Alert::new(
            &page.id,
            AlertType::SensitiveTextOnPage,
            Severity::saturating(SENSITIVE_SEVERITY),
            "Sensitive text found inside page content",
        )
        .with_meta("docId", *doc_id)
        .with_meta("pageId", page.id.as_str())
        .with_meta("pageName", page.name.as_str())]
    }
}

/// Keyword scan over one structured content block.
pub struct SensitiveContentRule {
    pattern: Regex,
}

impl Default for SensitiveContentRule {
    fn default() -> Self {
        Self {
            pattern: CONTENT_KEYWORDS.clone(),
        }
    }
}

impl Rule for SensitiveContentRule {
    fn name(&self) -> &str {
        AlertType::SensitivePageContent.as_str()
    }

    fn evaluate(&self, entity: &Entity<'_>) -> Vec<Alert> {
        let Entity::ContentBlock {
            doc_id,
            page,
            index,
            item,
        } = entity
        else {
            return Vec::new();
        };

        if !self.pattern.is_match(item.text()) {
            return Vec::new();
        }

        vec![Alert::new(
            &page.id,
            AlertType::SensitivePageContent,
            Severity::saturating(SENSITIVE_SEVERITY),
            format!("Sensitive content found on page '{}'.", page.name),
        )
        .with_meta("docId", *doc_id)
        .with_meta("pageId", page.id.as_str())
        .with_meta("pageName", page.name.as_str())
        .with_meta("blockIndex", *index)]
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Ordered set of rules. Evaluation order decides alert order, nothing else.
pub struct RuleRegistry {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleRegistry {
    /// Create an empty rule registry.
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Create a registry with the six built-in rules.
    pub fn with_builtins(config: &DetectionConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(UnusedDocumentRule::new(
            config.unused_days_threshold,
            Severity::saturating(config.unused_severity),
        )));
        registry.register(Box::new(PublicDocumentRule));
        registry.register(Box::new(ExternalShareRule::new(&config.allowed_domains)));
        registry.register(Box::new(SensitiveRowRule::default()));
        registry.register(Box::new(SensitiveHtmlRule::default()));
        registry.register(Box::new(SensitiveContentRule::default()));
        registry
    }

    /// Register a rule after the existing ones.
    pub fn register(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Box<dyn Rule>] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Run every rule over `entity`, concatenating results in rule order.
    pub fn evaluate(&self, entity: &Entity<'_>) -> Vec<Alert> {
        self.rules
            .iter()
            .flat_map(|rule| rule.evaluate(entity))
            .collect()
    }

    /// Document and permission rules over a set of documents.
    ///
    /// Documents missing from `permissions` are treated as having no grants.
    pub fn analyze(
        &self,
        documents: &[Document],
        permissions: &HashMap<String, Vec<Permission>>,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        documents
            .iter()
            .flat_map(|document| {
                let perms = permissions
                    .get(&document.id)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                self.evaluate(&Entity::DocumentAccess {
                    document,
                    permissions: perms,
                    now,
                })
            })
            .collect()
    }

    pub fn detect_sensitive_rows(
        &self,
        doc_id: &str,
        table_id: &str,
        rows: &[Row],
    ) -> Vec<Alert> {
        rows.iter()
            .flat_map(|row| {
                self.evaluate(&Entity::Row {
                    doc_id,
                    table_id,
                    row,
                })
            })
            .collect()
    }

    pub fn detect_sensitive_html(&self, doc_id: &str, page: &Page, html: &str) -> Vec<Alert> {
        self.evaluate(&Entity::PageHtml { doc_id, page, html })
    }

    pub fn detect_sensitive_page_content(
        &self,
        items: &[ContentItem],
        doc_id: &str,
        page: &Page,
    ) -> Vec<Alert> {
        items
            .iter()
            .enumerate()
            .flat_map(|(index, item)| {
                self.evaluate(&Entity::ContentBlock {
                    doc_id,
                    page,
                    index,
                    item,
                })
            })
            .collect()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Convenience entry points
// ═══════════════════════════════════════════════════════════════════════

/// Run the document rules configured by `config` over `documents`.
pub fn analyze(
    documents: &[Document],
    permissions: &HashMap<String, Vec<Permission>>,
    now: DateTime<Utc>,
    config: &DetectionConfig,
) -> Vec<Alert> {
    RuleRegistry::with_builtins(config).analyze(documents, permissions, now)
}

fn single_rule(rule: impl Rule + 'static) -> RuleRegistry {
    let mut registry = RuleRegistry::new();
    registry.register(Box::new(rule));
    registry
}

/// One `SENSITIVE_DATA_IN_ROW` alert per matching row.
pub fn detect_sensitive_rows(doc_id: &str, table_id: &str, rows: &[Row]) -> Vec<Alert> {
    single_rule(SensitiveRowRule::default()).detect_sensitive_rows(doc_id, table_id, rows)
}

/// At most one `SENSITIVE_TEXT_ON_PAGE` alert for the page.
pub fn detect_sensitive_html(doc_id: &str, page: &Page, html: &str) -> Vec<Alert> {
    single_rule(SensitiveHtmlRule::default()).detect_sensitive_html(doc_id, page, html)
}

/// One `SENSITIVE_PAGE_CONTENT` alert per matching block.
pub fn detect_sensitive_page_content(
    items: &[ContentItem],
    doc_id: &str,
    page: &Page,
) -> Vec<Alert> {
    single_rule(SensitiveContentRule::default())
        .detect_sensitive_page_content(items, doc_id, page)
}
