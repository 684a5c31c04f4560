//! # Coda Sentinel
//!
//! Security auditing for Coda workspaces.
//!
//! Sentinel walks a workspace (documents, their sharing settings, table rows,
//! exported page HTML and structured page content), classifies what it finds
//! with a set of detection rules, and keeps the resulting alerts in memory for
//! a dashboard. Two remediations call back into the workspace: revoking public
//! access and deleting a document.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌────────────┐
//! │  Workspace  │──▶│   Scanner    │──▶│ AlertStore │
//! │ Coda client │   │ stages+rules │   │ (in memory)│
//! └──────▲──────┘   └─────────────┘   └─────┬──────┘
//!        │                                   │
//!        │          ┌────────────────────────┤
//!        │          ▼                        ▼
//!  ┌─────┴──────────────┐              ┌──────────┐
//!  │    Remediation     │◀─────────────│   HTTP   │
//!  │     dispatcher     │              │   API    │
//!  └────────────────────┘              └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export CODA_API_TOKEN=...
//! sentinel documents            # check connectivity
//! sentinel scan                 # one scan, alerts on stdout
//! sentinel serve                # HTTP API with initial scan
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Workspace entities, alerts and outcomes |
//! | [`client`] | Workspace client trait and error taxonomy |
//! | [`coda`] | Coda REST implementation of the client |
//! | [`rules`] | Detection rules and rule registry |
//! | [`store`] | In-memory alert store |
//! | [`scan`] | Scan orchestration |
//! | [`progress`] | Scan progress reporting |
//! | [`remediate`] | Remediation dispatcher |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command implementations |

pub mod client;
pub mod coda;
pub mod commands;
pub mod config;
pub mod models;
pub mod progress;
pub mod remediate;
pub mod rules;
pub mod scan;
pub mod server;
pub mod store;
