//! Scan orchestration.
//!
//! One scan cycle walks the workspace in a fixed order:
//!
//! 1. list documents
//! 2. list each document's permissions
//! 3. run document rules over every document and append
//! 4. per document: tables → rows (explicit page windows) → row rules
//! 5. per document: pages → exported HTML → HTML rule
//! 6. per document: pages → full content stream → content-block rules
//!
//! Within a stage, up to `scan.concurrency` documents are in flight at once.
//! Results are appended per document in document order, so a document's
//! alerts are never interleaved with another's and stage 3 always lands
//! before any row or page alert.
//!
//! Fetch failures never abort a scan: the resource is treated as empty,
//! logged, and (unless disabled) reported as a `FETCH_FAILED` alert so a
//! missing permission list is not mistaken for a clean one.
//!
//! Scans are serialized: [`Scanner::trigger_scan`] refuses to start while
//! another cycle holds the scan lock, and [`Scanner::run_scan`] waits for it.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::{ClientError, ClientResult, WorkspaceClient};
use crate::config::Config;
use crate::models::{Alert, AlertType, Document, Permission, RowPage, Severity};
use crate::progress::{NoProgress, ScanProgressEvent, ScanProgressReporter, ScanStage};
use crate::rules::{Entity, RuleRegistry};
use crate::store::AlertStore;

/// Guard against clients that keep returning full row windows forever.
const MAX_ROW_PAGES: usize = 10_000;

/// Summary of one finished scan cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub documents: usize,
    pub alerts: usize,
    pub fetch_failures: u64,
    pub cancelled: bool,
}

/// Outcome of [`Scanner::trigger_scan`].
#[derive(Debug, Clone)]
pub enum ScanTrigger {
    Completed(ScanReport),
    /// Another scan held the lock; nothing was started.
    AlreadyRunning,
}

/// The workspace resource a fetch was aimed at.
#[derive(Debug, Clone, Copy)]
enum FetchTarget<'a> {
    Documents,
    Permissions { doc_id: &'a str },
    Tables { doc_id: &'a str },
    Rows { doc_id: &'a str, table_id: &'a str, page: usize },
    Pages { doc_id: &'a str },
    PageHtml { doc_id: &'a str, page_id: &'a str },
    PageContent { doc_id: &'a str, page_id: &'a str },
}

impl FetchTarget<'_> {
    fn doc_id(&self) -> Option<&str> {
        match self {
            FetchTarget::Documents => None,
            FetchTarget::Permissions { doc_id }
            | FetchTarget::Tables { doc_id }
            | FetchTarget::Rows { doc_id, .. }
            | FetchTarget::Pages { doc_id }
            | FetchTarget::PageHtml { doc_id, .. }
            | FetchTarget::PageContent { doc_id, .. } => Some(*doc_id),
        }
    }

    fn subject_id(&self) -> &str {
        match self {
            FetchTarget::Documents => "workspace",
            FetchTarget::Permissions { doc_id }
            | FetchTarget::Tables { doc_id }
            | FetchTarget::Pages { doc_id } => *doc_id,
            FetchTarget::Rows { table_id, .. } => *table_id,
            FetchTarget::PageHtml { page_id, .. } | FetchTarget::PageContent { page_id, .. } => {
                *page_id
            }
        }
    }

    fn resource(&self) -> &'static str {
        match self {
            FetchTarget::Documents => "documents",
            FetchTarget::Permissions { .. } => "permissions",
            FetchTarget::Tables { .. } => "tables",
            FetchTarget::Rows { .. } => "rows",
            FetchTarget::Pages { .. } => "pages",
            FetchTarget::PageHtml { .. } => "page-html",
            FetchTarget::PageContent { .. } => "page-content",
        }
    }
}

impl fmt::Display for FetchTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchTarget::Documents => write!(f, "document list"),
            FetchTarget::Permissions { doc_id } => write!(f, "permissions of {}", doc_id),
            FetchTarget::Tables { doc_id } => write!(f, "tables of {}", doc_id),
            FetchTarget::Rows {
                doc_id,
                table_id,
                page,
            } => write!(f, "rows page {} of {}/{}", page, doc_id, table_id),
            FetchTarget::Pages { doc_id } => write!(f, "pages of {}", doc_id),
            FetchTarget::PageHtml { doc_id, page_id } => {
                write!(f, "HTML export of {}/{}", doc_id, page_id)
            }
            FetchTarget::PageContent { doc_id, page_id } => {
                write!(f, "content of {}/{}", doc_id, page_id)
            }
        }
    }
}

/// Per-cycle state shared by every task of one scan.
struct Cycle {
    id: String,
    cancel: CancellationToken,
    fetch_failures: AtomicU64,
}

/// Drives scan cycles and owns the alert store they fill.
pub struct Scanner {
    client: Arc<dyn WorkspaceClient>,
    store: Arc<AlertStore>,
    rules: RuleRegistry,
    progress: Box<dyn ScanProgressReporter>,
    concurrency: usize,
    fetch_timeout: Duration,
    row_page_size: usize,
    report_fetch_failures: bool,
    fetch_failed_severity: Severity,
    scan_lock: Mutex<()>,
    last_report: RwLock<Option<ScanReport>>,
    shutdown: CancellationToken,
}

impl Scanner {
    /// Create a scanner with the built-in rules and a fresh, empty store.
    pub fn new(config: &Config, client: Arc<dyn WorkspaceClient>) -> Self {
        Self {
            client,
            store: Arc::new(AlertStore::new()),
            rules: RuleRegistry::with_builtins(&config.detection),
            progress: Box::new(NoProgress),
            concurrency: config.scan.concurrency.max(1),
            fetch_timeout: Duration::from_secs(config.scan.fetch_timeout_secs),
            row_page_size: config.workspace.row_page_size.max(1),
            report_fetch_failures: config.scan.report_fetch_failures,
            fetch_failed_severity: Severity::saturating(config.detection.fetch_failed_severity),
            scan_lock: Mutex::new(()),
            last_report: RwLock::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the rule set.
    pub fn with_rules(mut self, rules: RuleRegistry) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn ScanProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Share the store with readers.
    pub fn store(&self) -> Arc<AlertStore> {
        Arc::clone(&self.store)
    }

    pub fn client(&self) -> Arc<dyn WorkspaceClient> {
        Arc::clone(&self.client)
    }

    /// Cancel the running scan (if any) and every future one.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.scan_lock.try_lock().is_err()
    }

    pub fn last_report(&self) -> Option<ScanReport> {
        self.last_report
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn list_alerts(&self, offset: usize, limit: usize) -> Vec<Alert> {
        self.store.list(offset, limit)
    }

    /// Start a scan unless one is already running.
    pub async fn trigger_scan(&self) -> ScanTrigger {
        let Ok(_guard) = self.scan_lock.try_lock() else {
            tracing::info!("scan already in progress; trigger ignored");
            return ScanTrigger::AlreadyRunning;
        };
        ScanTrigger::Completed(self.run_cycle().await)
    }

    /// Run a scan, waiting for any running scan to finish first.
    pub async fn run_scan(&self) -> ScanReport {
        let _guard = self.scan_lock.lock().await;
        self.run_cycle().await
    }

    async fn run_cycle(&self) -> ScanReport {
        let cycle = Cycle {
            id: Uuid::new_v4().to_string(),
            cancel: self.shutdown.child_token(),
            fetch_failures: AtomicU64::new(0),
        };
        let started_at = Utc::now();
        tracing::info!(cycle_id = %cycle.id, "scan started");

        self.store.clear();

        let mut workspace_alerts = Vec::new();
        let documents: Vec<Document> = self
            .fetch(
                &cycle,
                &mut workspace_alerts,
                FetchTarget::Documents,
                self.client.list_documents(),
            )
            .await;
        self.store.add(workspace_alerts);
        tracing::info!(cycle_id = %cycle.id, documents = documents.len(), "documents listed");

        self.scan_access(&cycle, &documents).await;
        self.run_stage(&cycle, ScanStage::Rows, &documents).await;
        self.run_stage(&cycle, ScanStage::PageHtml, &documents).await;
        self.run_stage(&cycle, ScanStage::PageContent, &documents).await;

        let report = ScanReport {
            cycle_id: cycle.id.clone(),
            started_at,
            finished_at: Utc::now(),
            documents: documents.len(),
            alerts: self.store.len(),
            fetch_failures: cycle.fetch_failures.load(Ordering::Relaxed),
            cancelled: cycle.cancel.is_cancelled(),
        };

        self.progress.report(ScanProgressEvent::Finished {
            alerts: report.alerts as u64,
            fetch_failures: report.fetch_failures,
        });
        if report.cancelled {
            tracing::warn!(cycle_id = %report.cycle_id, alerts = report.alerts, "scan cancelled");
        } else {
            tracing::info!(
                cycle_id = %report.cycle_id,
                alerts = report.alerts,
                fetch_failures = report.fetch_failures,
                "scan complete"
            );
        }

        *self
            .last_report
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        report
    }

    /// Stages 2 and 3: permissions, then document rules over the whole set.
    async fn scan_access(&self, cycle: &Cycle, documents: &[Document]) {
        let total = documents.len() as u64;
        let mut done = 0u64;

        let fetches: Vec<BoxFuture<'_, (String, Vec<Permission>, Vec<Alert>)>> = documents
            .iter()
            .map(|doc| {
                async move {
                    let mut failures = Vec::new();
                    let permissions: Vec<Permission> = self
                        .fetch(
                            cycle,
                            &mut failures,
                            FetchTarget::Permissions { doc_id: &doc.id },
                            self.client.list_permissions(&doc.id),
                        )
                        .await;
                    (doc.id.clone(), permissions, failures)
                }
                .boxed()
            })
            .collect();
        let mut fetched = stream::iter(fetches).buffered(self.concurrency);

        let mut permissions_map: HashMap<String, Vec<Permission>> = HashMap::new();
        let mut failures_by_doc: HashMap<String, Vec<Alert>> = HashMap::new();
        while let Some((doc_id, permissions, failures)) = fetched.next().await {
            permissions_map.insert(doc_id.clone(), permissions);
            if !failures.is_empty() {
                failures_by_doc.insert(doc_id, failures);
            }
            done += 1;
            self.progress.report(ScanProgressEvent::Stage {
                stage: ScanStage::Permissions,
                n: done,
                total,
            });
        }

        if cycle.cancel.is_cancelled() {
            return;
        }

        let now = Utc::now();
        let mut alerts = Vec::new();
        for document in documents {
            let permissions = permissions_map
                .get(&document.id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            alerts.extend(self.rules.evaluate(&Entity::DocumentAccess {
                document,
                permissions,
                now,
            }));
            if let Some(failures) = failures_by_doc.remove(&document.id) {
                alerts.extend(failures);
            }
        }

        tracing::debug!(cycle_id = %cycle.id, alerts = alerts.len(), "document rules evaluated");
        self.store.add(alerts);
    }

    /// Run one per-document stage with bounded fan-out, appending each
    /// document's alerts as soon as it and all earlier documents are done.
    async fn run_stage(&self, cycle: &Cycle, stage: ScanStage, documents: &[Document]) {
        if cycle.cancel.is_cancelled() {
            return;
        }

        let total = documents.len() as u64;
        let mut done = 0u64;

        let scans: Vec<BoxFuture<'_, Vec<Alert>>> = documents
            .iter()
            .map(|doc| match stage {
                ScanStage::Rows => self.scan_rows(cycle, doc).boxed(),
                ScanStage::PageHtml => self.scan_page_html(cycle, doc).boxed(),
                ScanStage::PageContent => self.scan_page_content(cycle, doc).boxed(),
                ScanStage::Permissions => futures::future::ready(Vec::new()).boxed(),
            })
            .collect();
        let mut results = stream::iter(scans).buffered(self.concurrency);

        while let Some(alerts) = results.next().await {
            self.store.add(alerts);
            done += 1;
            self.progress
                .report(ScanProgressEvent::Stage { stage, n: done, total });
        }

        tracing::debug!(cycle_id = %cycle.id, %stage, "stage finished");
    }

    /// Stage 4 for one document.
    async fn scan_rows(&self, cycle: &Cycle, doc: &Document) -> Vec<Alert> {
        let mut alerts = Vec::new();
        if cycle.cancel.is_cancelled() {
            return alerts;
        }

        let tables = self
            .fetch(
                cycle,
                &mut alerts,
                FetchTarget::Tables { doc_id: &doc.id },
                self.client.list_tables(&doc.id),
            )
            .await;

        for table in &tables {
            for page in 1..=MAX_ROW_PAGES {
                if cycle.cancel.is_cancelled() {
                    return alerts;
                }

                let window = RowPage::new(page, self.row_page_size);
                let rows = self
                    .fetch(
                        cycle,
                        &mut alerts,
                        FetchTarget::Rows {
                            doc_id: &doc.id,
                            table_id: &table.id,
                            page,
                        },
                        self.client.list_rows(&doc.id, &table.id, window),
                    )
                    .await;

                alerts.extend(self.rules.detect_sensitive_rows(&doc.id, &table.id, &rows));

                if rows.len() < self.row_page_size {
                    break;
                }
            }
        }

        alerts
    }

    /// Stage 5 for one document.
    async fn scan_page_html(&self, cycle: &Cycle, doc: &Document) -> Vec<Alert> {
        let mut alerts = Vec::new();
        if cycle.cancel.is_cancelled() {
            return alerts;
        }

        let pages = self
            .fetch(
                cycle,
                &mut alerts,
                FetchTarget::Pages { doc_id: &doc.id },
                self.client.list_pages(&doc.id),
            )
            .await;

        for page in &pages {
            if cycle.cancel.is_cancelled() {
                break;
            }
            let html: String = self
                .fetch(
                    cycle,
                    &mut alerts,
                    FetchTarget::PageHtml {
                        doc_id: &doc.id,
                        page_id: &page.id,
                    },
                    self.client.export_page_html(&doc.id, &page.id),
                )
                .await;
            alerts.extend(self.rules.detect_sensitive_html(&doc.id, page, &html));
        }

        alerts
    }

    /// Stage 6 for one document. Pages are listed again rather than reused
    /// from stage 5.
    async fn scan_page_content(&self, cycle: &Cycle, doc: &Document) -> Vec<Alert> {
        let mut alerts = Vec::new();
        if cycle.cancel.is_cancelled() {
            return alerts;
        }

        let pages = self
            .fetch(
                cycle,
                &mut alerts,
                FetchTarget::Pages { doc_id: &doc.id },
                self.client.list_pages(&doc.id),
            )
            .await;

        for page in &pages {
            if cycle.cancel.is_cancelled() {
                break;
            }
            let items = self
                .fetch(
                    cycle,
                    &mut alerts,
                    FetchTarget::PageContent {
                        doc_id: &doc.id,
                        page_id: &page.id,
                    },
                    self.client.get_full_page_content(&doc.id, &page.id),
                )
                .await;
            alerts.extend(
                self.rules
                    .detect_sensitive_page_content(&items, &doc.id, page),
            );
        }

        alerts
    }

    /// Await a client call under the fetch timeout and cancellation.
    ///
    /// Failures are logged, counted, optionally reported into `out` as a
    /// `FETCH_FAILED` alert, and replaced by `T::default()`. Cancellation
    /// also yields the default, without counting as a failure.
    async fn fetch<T, F>(
        &self,
        cycle: &Cycle,
        out: &mut Vec<Alert>,
        target: FetchTarget<'_>,
        call: F,
    ) -> T
    where
        T: Default,
        F: Future<Output = ClientResult<T>>,
    {
        let result = tokio::select! {
            _ = cycle.cancel.cancelled() => return T::default(),
            r = tokio::time::timeout(self.fetch_timeout, call) => match r {
                Ok(inner) => inner,
                Err(_) => Err(ClientError::Timeout(self.fetch_timeout.as_secs())),
            },
        };

        match result {
            Ok(value) => value,
            Err(err) => {
                cycle.fetch_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    cycle_id = %cycle.id,
                    resource = target.resource(),
                    error = %err,
                    "failed to fetch {}; treating as empty",
                    target
                );
                if self.report_fetch_failures {
                    out.push(self.fetch_failed_alert(&target, &err));
                }
                T::default()
            }
        }
    }

    fn fetch_failed_alert(&self, target: &FetchTarget<'_>, err: &ClientError) -> Alert {
        let mut alert = Alert::new(
            target.subject_id(),
            AlertType::FetchFailed,
            self.fetch_failed_severity,
            format!("Could not load {}; it was not checked", target),
        )
        .with_meta("resource", target.resource())
        .with_meta("error", err.to_string());
        if let Some(doc_id) = target.doc_id() {
            alert = alert.with_meta("docId", doc_id);
        }
        alert
    }
}
