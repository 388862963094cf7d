//! Submit-and-poll orchestration for remote scanners.
//!
//! After a successful submit, the scan is driven to a verdict by polling the
//! backend until it reports completion or an absolute deadline expires. The
//! deadline is captured once at loop entry and re-checked before every poll;
//! a retry never extends it.

use tokio::time::{sleep, Instant};
use tracing::debug;

use super::{RemoteScanner, SampleInfo, ScannerError, Submission};
use crate::filter::FileMeta;

/// Which report endpoint the orchestrator consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    File,
    Url,
}

/// Terminal state of one orchestrated scan.
#[derive(Debug)]
pub enum ScanOutcome {
    /// The backend produced a report.
    Verdict(SampleInfo),
    /// The deadline expired before the backend finished.
    TimedOut,
    /// The backend never acknowledged the payload, or withheld the sample
    /// id needed to fetch a report.
    NoSubmission,
}

/// Drive a submission to a verdict under the scanner's polling budget.
///
/// Backend errors terminate the loop immediately; there are no per-call
/// retries at this layer.
pub async fn drive_to_verdict(
    scanner: &dyn RemoteScanner,
    submission: &Submission,
    meta: &FileMeta,
    mode: ScanMode,
) -> Result<ScanOutcome, ScannerError> {
    if !submission.exists || submission.sample_id.is_empty() {
        debug!(vendor = scanner.vendor(), "no submission for the payload");
        return Ok(ScanOutcome::NoSubmission);
    }

    let deadline = Instant::now() + scanner.status_check_timeout();
    let interval = scanner.status_check_interval();
    let mut finished = false;
    let mut retained: Option<SampleInfo> = None;

    while !finished && Instant::now() < deadline {
        if scanner.status_endpoint_exists() {
            finished = scanner
                .get_submission_status(&submission.submission_id)
                .await?;
        } else {
            // No status endpoint: the report itself carries the completion
            // flag, and doubles as the verdict once finished.
            let sample = fetch_report(scanner, submission, meta, mode).await?;
            finished = sample.submission_finished;
            retained = Some(sample);
        }

        if !finished {
            debug!(
                vendor = scanner.vendor(),
                submission_id = %submission.submission_id,
                "submission not finished yet"
            );
            sleep(interval).await;
        }
    }

    if !finished {
        return Ok(ScanOutcome::TimedOut);
    }

    let sample = match retained {
        Some(sample) => sample,
        None => fetch_report(scanner, submission, meta, mode).await?,
    };
    Ok(ScanOutcome::Verdict(sample))
}

async fn fetch_report(
    scanner: &dyn RemoteScanner,
    submission: &Submission,
    meta: &FileMeta,
    mode: ScanMode,
) -> Result<SampleInfo, ScannerError> {
    match mode {
        ScanMode::File => scanner.get_sample_file_info(&submission.sample_id, meta).await,
        ScanMode::Url => scanner.get_sample_url_info(&submission.sample_id, meta).await,
    }
}
