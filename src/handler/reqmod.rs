//! Request-modification pipeline: URL-based scanning.
//!
//! The payload never leaves the client in this mode, so there is no body to
//! buffer and no size limit. Classification uses the URL's file extension,
//! defaulting to `html`, and only remote scanners apply; the URL is what
//! gets submitted.

use tracing::{debug, info};

use super::block::{self, BlockPayload};
use super::{
    failure_outcome, verdict_is_ok, AdaptCtx, AdaptFailure, AdaptOutcome, ReqmodTransaction,
};
use crate::filter::{self, FileMeta, GateDecision};
use crate::scanner::poll::{self, ScanMode, ScanOutcome};

pub async fn handle(ctx: &AdaptCtx<'_>, transaction: ReqmodTransaction) -> AdaptOutcome {
    let policy = &ctx.config.policy;

    if !transaction.allow_204 {
        debug!("client did not advertise Allow: 204, processing not required");
        return AdaptOutcome::Pass;
    }

    if let Some(upstream) = ctx.upstream {
        return upstream.reqmod(&transaction).await;
    }

    if transaction.request_uri.is_empty() {
        return AdaptOutcome::Reject(400);
    }

    let vendor = policy.req_scanner_vendor.as_str();
    if vendor.is_empty() {
        debug!("no reqmod scanner configured, bypassing everything");
        return AdaptOutcome::Pass;
    }

    let mut ext = filter::file_ext_from_uri(&transaction.request_uri);
    if ext.is_empty() {
        ext = "html".to_string();
    }

    if filter::gate(&ext, &policy.process_extensions, &policy.bypass_extensions)
        == GateDecision::Bypass
    {
        debug!(ext = %ext, "processing not required for this file type");
        return AdaptOutcome::Pass;
    }

    let meta = FileMeta {
        file_name: filter::file_name_from_uri(&transaction.request_uri),
        file_type: ext,
        file_size: 0,
    };

    let scanner = match ctx.registry.resolve_remote(vendor) {
        Some(scanner) => scanner,
        None => {
            return failure_outcome(
                AdaptFailure::UnknownVendor(vendor.to_string()),
                policy.propagate_error,
            )
        }
    };
    if !scanner.req_supported() {
        return failure_outcome(
            AdaptFailure::ModeUnsupported {
                vendor: vendor.to_string(),
                mode: "reqmod",
            },
            policy.propagate_error,
        );
    }

    let submission = match scanner
        .submit_url(&transaction.request_uri, &meta.file_name)
        .await
    {
        Ok(submission) => submission,
        Err(err) => return failure_outcome(AdaptFailure::Backend(err), policy.propagate_error),
    };

    let sample = match poll::drive_to_verdict(scanner.as_ref(), &submission, &meta, ScanMode::Url)
        .await
    {
        Ok(ScanOutcome::Verdict(sample)) => sample,
        Ok(ScanOutcome::TimedOut) => {
            debug!(vendor, "url submission is taking too long to finish");
            return AdaptOutcome::Pass;
        }
        Ok(ScanOutcome::NoSubmission) => return AdaptOutcome::Pass,
        Err(err) => return failure_outcome(AdaptFailure::Backend(err), policy.propagate_error),
    };

    if verdict_is_ok(&sample, scanner.ok_severities()) {
        info!(url = %transaction.request_uri, "url is good to go");
        return AdaptOutcome::Pass;
    }

    info!(
        url = %transaction.request_uri,
        severity = %sample.severity,
        "url flagged, answering with block payload"
    );
    let payload = BlockPayload::new(&sample, &transaction.request_uri, vendor);
    match block::render_block_request_response(&payload) {
        Ok(response) => AdaptOutcome::Block(response),
        Err(err) => failure_outcome(
            AdaptFailure::Render(err.to_string()),
            policy.propagate_error,
        ),
    }
}
