//! Response-modification pipeline: body-based scanning.
//!
//! Ordered checks, each of which can short-circuit to a pass-through:
//! `Allow: 204` screening, upstream delegation, vendor selection, content
//! classification, extension gating, size limit, then the scan itself. Only
//! a non-benign verdict modifies the transaction.

use tracing::{debug, error, info};

use super::block::{self, BlockPayload};
use super::{
    failure_outcome, verdict_is_ok, AdaptCtx, AdaptFailure, AdaptOutcome, RespmodTransaction,
};
use crate::filter::{self, FileMeta, GateDecision};
use crate::scanner::poll::{self, ScanMode, ScanOutcome};
use crate::scanner::{Backend, SampleInfo};

pub async fn handle(ctx: &AdaptCtx<'_>, mut transaction: RespmodTransaction) -> AdaptOutcome {
    let policy = &ctx.config.policy;

    if !transaction.allow_204 {
        debug!("client did not advertise Allow: 204, processing not required");
        return AdaptOutcome::Pass;
    }

    if let Some(upstream) = ctx.upstream {
        return upstream.respmod(&transaction).await;
    }

    let vendor = policy.resp_scanner_vendor.as_str();
    if vendor.is_empty() {
        debug!("no respmod scanner configured, bypassing everything");
        return AdaptOutcome::Pass;
    }

    let body = match transaction.body.take() {
        Some(body) => body,
        None => {
            error!("failed to obtain the encapsulated response body");
            return AdaptOutcome::Pass;
        }
    };

    let content_ext = filter::sniff_extension(&body);
    if filter::gate(
        content_ext,
        &policy.process_extensions,
        &policy.bypass_extensions,
    ) == GateDecision::Bypass
    {
        debug!(content_ext, "processing not required for this file type");
        return AdaptOutcome::Pass;
    }

    if body.len() as u64 > ctx.config.icap.max_file_size {
        debug!(size = body.len(), "file size too large");
        return AdaptOutcome::Pass;
    }

    let meta = FileMeta::from_uri(&transaction.request_uri, body.len() as u64);

    match ctx.registry.resolve(vendor) {
        None => {
            return failure_outcome(
                AdaptFailure::UnknownVendor(vendor.to_string()),
                policy.propagate_error,
            )
        }
        Some(Backend::Local(scanner)) => {
            if !scanner.resp_supported() {
                return failure_outcome(
                    AdaptFailure::ModeUnsupported {
                        vendor: vendor.to_string(),
                        mode: "respmod",
                    },
                    policy.propagate_error,
                );
            }
            match scanner.scan_stream(&body, &meta).await {
                Ok(sample) => decide(ctx, &transaction, sample, scanner.ok_severities(), vendor),
                Err(err) => {
                    failure_outcome(AdaptFailure::Backend(err), policy.propagate_error)
                }
            }
        }
        Some(Backend::Remote(scanner)) => {
            if !scanner.resp_supported() {
                return failure_outcome(
                    AdaptFailure::ModeUnsupported {
                        vendor: vendor.to_string(),
                        mode: "respmod",
                    },
                    policy.propagate_error,
                );
            }
            let submission = match scanner.submit_file(&body, &meta.file_name).await {
                Ok(submission) => submission,
                Err(err) => {
                    return failure_outcome(AdaptFailure::Backend(err), policy.propagate_error)
                }
            };
            match poll::drive_to_verdict(scanner.as_ref(), &submission, &meta, ScanMode::File)
                .await
            {
                Ok(ScanOutcome::Verdict(sample)) => {
                    decide(ctx, &transaction, sample, scanner.ok_severities(), vendor)
                }
                Ok(ScanOutcome::TimedOut) => {
                    debug!(vendor, "file submission is taking too long to finish");
                    AdaptOutcome::Pass
                }
                Ok(ScanOutcome::NoSubmission) => AdaptOutcome::Pass,
                Err(err) => failure_outcome(AdaptFailure::Backend(err), policy.propagate_error),
            }
        }
    }
}

fn decide(
    ctx: &AdaptCtx<'_>,
    transaction: &RespmodTransaction,
    sample: SampleInfo,
    ok_severities: &[String],
    vendor: &str,
) -> AdaptOutcome {
    if verdict_is_ok(&sample, ok_severities) {
        info!(file = %sample.file_name, "file is good to go");
        return AdaptOutcome::Pass;
    }
    info!(
        file = %sample.file_name,
        severity = %sample.severity,
        "file flagged, replacing with block page"
    );
    let payload = BlockPayload::new(&sample, &transaction.request_uri, vendor);
    match block::render_block_response(&payload) {
        Ok(response) => AdaptOutcome::Block(response),
        Err(err) => failure_outcome(
            AdaptFailure::Render(err.to_string()),
            ctx.config.policy.propagate_error,
        ),
    }
}
