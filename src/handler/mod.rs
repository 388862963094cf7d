//! Adaptation pipelines for the two modification modes.
//!
//! Handlers are pure with respect to the wire layer: they consume a
//! transaction extracted from the parsed ICAP request and produce an
//! [`AdaptOutcome`], which the server converts into an ICAP response. A
//! transaction is never partially modified: it passes through, is replaced
//! with a block page, or is rejected with a status code.

pub mod block;
pub mod reqmod;
pub mod respmod;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::config::AppConfig;
use crate::scanner::{SampleInfo, ScannerError, ScannerRegistry};

/// One request-modification transaction, as seen by the pipeline.
#[derive(Debug, Clone)]
pub struct ReqmodTransaction {
    /// Whether the client advertised `Allow: 204`.
    pub allow_204: bool,
    /// URI of the encapsulated HTTP request; empty when the ICAP message
    /// carried none.
    pub request_uri: String,
}

/// One response-modification transaction, as seen by the pipeline.
#[derive(Debug, Clone)]
pub struct RespmodTransaction {
    /// Whether the client advertised `Allow: 204`.
    pub allow_204: bool,
    /// URI of the originating HTTP request, when the wire layer surfaces it.
    pub request_uri: String,
    /// Buffered encapsulated response body; `None` when it could not be
    /// obtained.
    pub body: Option<Vec<u8>>,
}

/// What the pipeline decided for a transaction.
#[derive(Debug)]
pub enum AdaptOutcome {
    /// Let the transaction through unmodified (204).
    Pass,
    /// Replace the transaction with the given HTTP response (ICAP 200).
    Block(http::Response<Vec<u8>>),
    /// Reject with an ICAP status code (400, 405, 424, 500).
    Reject(u16),
}

impl AdaptOutcome {
    /// Short action label for the audit log.
    pub fn action(&self) -> &'static str {
        match self {
            AdaptOutcome::Pass => "pass",
            AdaptOutcome::Block(_) => "block",
            AdaptOutcome::Reject(_) => "reject",
        }
    }
}

/// Delegation seam for upstream ICAP pass-through. Consulted before local
/// adaptation when configured; no dispatcher ships with the server.
#[async_trait]
pub trait UpstreamIcap: Send + Sync {
    async fn reqmod(&self, transaction: &ReqmodTransaction) -> AdaptOutcome;
    async fn respmod(&self, transaction: &RespmodTransaction) -> AdaptOutcome;
}

/// Everything a pipeline needs besides the transaction itself.
pub struct AdaptCtx<'a> {
    pub config: &'a AppConfig,
    pub registry: &'a ScannerRegistry,
    pub upstream: Option<&'a dyn UpstreamIcap>,
}

/// Whether the sample's severity is on the vendor's benign list.
pub fn verdict_is_ok(sample: &SampleInfo, ok_severities: &[String]) -> bool {
    ok_severities.iter().any(|s| s == &sample.severity)
}

/// A failure that, depending on `propagate_error`, surfaces as an ICAP
/// error status or is silently rewritten to a pass-through.
#[derive(Debug)]
pub enum AdaptFailure {
    UnknownVendor(String),
    ModeUnsupported { vendor: String, mode: &'static str },
    Backend(ScannerError),
    Render(String),
}

impl AdaptFailure {
    fn status(&self) -> u16 {
        match self {
            AdaptFailure::UnknownVendor(_) | AdaptFailure::ModeUnsupported { .. } => 400,
            AdaptFailure::Backend(_) => 424,
            AdaptFailure::Render(_) => 500,
        }
    }
}

/// Map a failure to its outcome under the configured propagation policy.
pub fn failure_outcome(failure: AdaptFailure, propagate_error: bool) -> AdaptOutcome {
    match &failure {
        AdaptFailure::UnknownVendor(vendor) => {
            debug!(vendor = %vendor, "no such scanner vendor");
        }
        AdaptFailure::ModeUnsupported { vendor, mode } => {
            debug!(vendor = %vendor, mode, "vendor does not support this mode");
        }
        AdaptFailure::Backend(err) => {
            error!(error = %err, "scanner backend call failed");
        }
        AdaptFailure::Render(err) => {
            error!(error = %err, "block page rendering failed");
        }
    }
    if propagate_error {
        AdaptOutcome::Reject(failure.status())
    } else {
        AdaptOutcome::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(severity: &str) -> SampleInfo {
        SampleInfo {
            severity: severity.to_string(),
            ..SampleInfo::default()
        }
    }

    fn ok_set(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn verdict_matches_exact_label() {
        assert!(verdict_is_ok(&sample("ok"), &ok_set(&["ok", "clean"])));
        assert!(!verdict_is_ok(&sample("malicious"), &ok_set(&["ok"])));
        assert!(!verdict_is_ok(&sample("OK"), &ok_set(&["ok"])));
    }

    #[test]
    fn failures_pass_when_not_propagating() {
        let outcome = failure_outcome(AdaptFailure::UnknownVendor("x".to_string()), false);
        assert!(matches!(outcome, AdaptOutcome::Pass));
    }

    #[test]
    fn failures_map_to_statuses_when_propagating() {
        assert!(matches!(
            failure_outcome(AdaptFailure::UnknownVendor("x".to_string()), true),
            AdaptOutcome::Reject(400)
        ));
        assert!(matches!(
            failure_outcome(
                AdaptFailure::ModeUnsupported {
                    vendor: "x".to_string(),
                    mode: "reqmod"
                },
                true
            ),
            AdaptOutcome::Reject(400)
        ));
        assert!(matches!(
            failure_outcome(
                AdaptFailure::Backend(ScannerError::Protocol("boom".to_string())),
                true
            ),
            AdaptOutcome::Reject(424)
        ));
        assert!(matches!(
            failure_outcome(AdaptFailure::Render("marshal".to_string()), true),
            AdaptOutcome::Reject(500)
        ));
    }
}
