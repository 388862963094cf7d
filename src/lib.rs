//! # IcapGuard
//!
//! **ICAP adaptation server for malware gating at the proxy edge.**
//!
//! IcapGuard speaks ICAP (RFC 3507) to an HTTP intermediary and decides, per
//! transaction, whether the payload passes through unmodified (204) or is
//! replaced with a block page, based on the verdict of a configured scanner
//! backend.
//!
//! ## Architecture
//!
//! - **[`server`]** — ICAP wire layer wiring: routes, OPTIONS advertisement,
//!   response assembly
//! - **[`handler`]** — REQMOD / RESPMOD adaptation pipelines, verdict
//!   decision, block-page rendering
//! - **[`scanner`]** — vendor-abstract scanner capability, local (clamd) and
//!   remote (reputation API) backends, submit-and-poll orchestration
//! - **[`filter`]** — content classification and extension gating
//! - **[`config`]** — TOML-based configuration, read-only after startup
//! - **[`logging`]** — SQLite-backed transaction audit log with JSON/CSV
//!   export
//! - **[`cli`]** — command-line interface (clap)
//! - **[`error`]** — unified error types using `thiserror`
//!
//! ## Quick Start
//!
//! ```bash
//! # Write a default configuration
//! icapguard init
//!
//! # Validate it and list the resolved scanner vendors
//! icapguard check
//!
//! # Start the server
//! icapguard start
//!
//! # Point the proxy at it, e.g. squid:
//! #   icap_service svc_resp respmod_precache icap://127.0.0.1:1344/respmod
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod handler;
pub mod logging;
pub mod scanner;
pub mod server;
