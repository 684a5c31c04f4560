//! Remediation dispatcher.
//!
//! Turns a document id plus an action into exactly one corrective call
//! against the workspace. Outcomes are always returned as values:
//!
//! | Client result | Outcome |
//! |---------------|---------|
//! | `Ok(outcome)` | passed through |
//! | `NotFound` | `success = false`, "Document … not found" |
//! | any other error | `success = false`, error message (logged at `error`) |
//!
//! A 404 is not an error so repeating a remediation is safe. Remediation
//! never triggers a rescan; stale alerts remain until the next scan.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::client::{ClientError, ClientResult, WorkspaceClient};
use crate::models::RemediationOutcome;

/// Corrective action applied to a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemediationAction {
    /// Delete the document. Irreversible.
    #[default]
    DeleteDocument,
    /// Revoke one read-only grant, preferring the anonymous one.
    RemovePublicAccess,
}

impl RemediationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationAction::DeleteDocument => "deleteDocument",
            RemediationAction::RemovePublicAccess => "removePublicAccess",
        }
    }
}

impl fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct RemediationDispatcher {
    client: Arc<dyn WorkspaceClient>,
}

impl RemediationDispatcher {
    pub fn new(client: Arc<dyn WorkspaceClient>) -> Self {
        Self { client }
    }

    pub async fn remediate(&self, doc_id: &str, action: RemediationAction) -> RemediationOutcome {
        match action {
            RemediationAction::DeleteDocument => self.delete_document(doc_id).await,
            RemediationAction::RemovePublicAccess => self.remove_public_access(doc_id).await,
        }
    }

    pub async fn remove_public_access(&self, doc_id: &str) -> RemediationOutcome {
        let result = self.client.remove_public_access(doc_id).await;
        settle(doc_id, RemediationAction::RemovePublicAccess, result)
    }

    pub async fn delete_document(&self, doc_id: &str) -> RemediationOutcome {
        let result = self.client.delete_document(doc_id).await;
        settle(doc_id, RemediationAction::DeleteDocument, result)
    }
}

fn settle(
    doc_id: &str,
    action: RemediationAction,
    result: ClientResult<RemediationOutcome>,
) -> RemediationOutcome {
    match result {
        Ok(outcome) => {
            tracing::info!(
                doc_id,
                %action,
                success = outcome.success,
                "{}",
                outcome.message
            );
            outcome
        }
        Err(ClientError::NotFound(_)) => {
            tracing::warn!(doc_id, %action, "document not found");
            RemediationOutcome::failed(format!("Document {} not found", doc_id))
        }
        Err(err) => {
            tracing::error!(doc_id, %action, error = %err, "remediation failed");
            RemediationOutcome::failed(err.to_string())
        }
    }
}
