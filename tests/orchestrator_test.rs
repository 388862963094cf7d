use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use icapguard::filter::FileMeta;
use icapguard::scanner::poll::{drive_to_verdict, ScanMode, ScanOutcome};
use icapguard::scanner::{
    RemoteScanner, SampleInfo, ScannerCore, ScannerError, Submission,
};

/// Remote scanner double with a scripted completion point.
struct MockRemote {
    status_endpoint: bool,
    /// Report `finished` on the nth poll; `None` never finishes.
    finish_on_poll: Option<usize>,
    severity: &'static str,
    timeout: Duration,
    interval: Duration,
    status_calls: AtomicUsize,
    report_calls: AtomicUsize,
    ok: Vec<String>,
}

impl MockRemote {
    fn new(status_endpoint: bool, finish_on_poll: Option<usize>) -> Self {
        Self {
            status_endpoint,
            finish_on_poll,
            severity: "malicious",
            timeout: Duration::from_millis(200),
            interval: Duration::from_millis(50),
            status_calls: AtomicUsize::new(0),
            report_calls: AtomicUsize::new(0),
            ok: vec!["ok".to_string()],
        }
    }

    fn finished(&self, poll_number: usize) -> bool {
        self.finish_on_poll.map(|n| poll_number >= n).unwrap_or(false)
    }

    fn sample(&self, finished: bool) -> SampleInfo {
        SampleInfo {
            file_name: "payload.exe".to_string(),
            sample_type: "exe".to_string(),
            file_size_str: "1.0 KB".to_string(),
            severity: self.severity.to_string(),
            score: "29/60".to_string(),
            submission_finished: finished,
        }
    }
}

impl ScannerCore for MockRemote {
    fn vendor(&self) -> &str {
        "mock"
    }
    fn resp_supported(&self) -> bool {
        true
    }
    fn req_supported(&self) -> bool {
        true
    }
    fn ok_severities(&self) -> &[String] {
        &self.ok
    }
    fn status_check_timeout(&self) -> Duration {
        self.timeout
    }
    fn status_check_interval(&self) -> Duration {
        self.interval
    }
    fn status_endpoint_exists(&self) -> bool {
        self.status_endpoint
    }
}

#[async_trait]
impl RemoteScanner for MockRemote {
    async fn submit_file(
        &self,
        _body: &[u8],
        _filename: &str,
    ) -> Result<Submission, ScannerError> {
        Ok(submission())
    }

    async fn submit_url(&self, _url: &str, _filename: &str) -> Result<Submission, ScannerError> {
        Ok(submission())
    }

    async fn get_submission_status(&self, submission_id: &str) -> Result<bool, ScannerError> {
        assert_eq!(submission_id, "sub-1");
        let n = self.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self.finished(n))
    }

    async fn get_sample_file_info(
        &self,
        sample_id: &str,
        _meta: &FileMeta,
    ) -> Result<SampleInfo, ScannerError> {
        assert_eq!(sample_id, "sample-1");
        let n = self.report_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self.sample(self.finished(n)))
    }

    async fn get_sample_url_info(
        &self,
        sample_id: &str,
        meta: &FileMeta,
    ) -> Result<SampleInfo, ScannerError> {
        self.get_sample_file_info(sample_id, meta).await
    }
}

/// Remote scanner double whose status endpoint always errors.
struct FailingStatus {
    ok: Vec<String>,
}

impl ScannerCore for FailingStatus {
    fn vendor(&self) -> &str {
        "failing"
    }
    fn resp_supported(&self) -> bool {
        true
    }
    fn req_supported(&self) -> bool {
        true
    }
    fn ok_severities(&self) -> &[String] {
        &self.ok
    }
    fn status_check_timeout(&self) -> Duration {
        Duration::from_millis(200)
    }
    fn status_check_interval(&self) -> Duration {
        Duration::from_millis(50)
    }
    fn status_endpoint_exists(&self) -> bool {
        true
    }
}

#[async_trait]
impl RemoteScanner for FailingStatus {
    async fn submit_file(
        &self,
        _body: &[u8],
        _filename: &str,
    ) -> Result<Submission, ScannerError> {
        Ok(submission())
    }
    async fn submit_url(&self, _url: &str, _filename: &str) -> Result<Submission, ScannerError> {
        Ok(submission())
    }
    async fn get_submission_status(&self, _submission_id: &str) -> Result<bool, ScannerError> {
        Err(ScannerError::Protocol("status endpoint down".to_string()))
    }
    async fn get_sample_file_info(
        &self,
        _sample_id: &str,
        _meta: &FileMeta,
    ) -> Result<SampleInfo, ScannerError> {
        unreachable!("report must not be fetched after a status error");
    }
    async fn get_sample_url_info(
        &self,
        _sample_id: &str,
        _meta: &FileMeta,
    ) -> Result<SampleInfo, ScannerError> {
        unreachable!("report must not be fetched after a status error");
    }
}

fn submission() -> Submission {
    Submission {
        submission_id: "sub-1".to_string(),
        sample_id: "sample-1".to_string(),
        exists: true,
    }
}

fn meta() -> FileMeta {
    FileMeta {
        file_name: "payload.exe".to_string(),
        file_type: "exe".to_string(),
        file_size: 1024,
    }
}

#[tokio::test]
async fn never_finishing_submission_times_out() {
    let scanner = MockRemote::new(true, None);
    let started = Instant::now();

    let outcome = drive_to_verdict(&scanner, &submission(), &meta(), ScanMode::File)
        .await
        .unwrap();

    assert!(matches!(outcome, ScanOutcome::TimedOut));
    let polls = scanner.status_calls.load(Ordering::SeqCst);
    assert!(
        (3..=5).contains(&polls),
        "expected 3-5 status polls in a 200ms/50ms window, got {}",
        polls
    );
    // Never past the deadline by more than one interval.
    assert!(started.elapsed() < Duration::from_millis(200 + 50 + 50));
    assert_eq!(scanner.report_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn finishes_on_third_poll_then_fetches_report_once() {
    let scanner = MockRemote::new(true, Some(3));

    let outcome = drive_to_verdict(&scanner, &submission(), &meta(), ScanMode::File)
        .await
        .unwrap();

    let sample = match outcome {
        ScanOutcome::Verdict(sample) => sample,
        other => panic!("expected a verdict, got {:?}", other),
    };
    assert_eq!(sample.severity, "malicious");
    assert_eq!(scanner.status_calls.load(Ordering::SeqCst), 3);
    assert_eq!(scanner.report_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn folded_status_reuses_retained_report() {
    // No status endpoint: completion arrives inside the report itself, and
    // the finishing report doubles as the verdict.
    let scanner = MockRemote::new(false, Some(2));

    let outcome = drive_to_verdict(&scanner, &submission(), &meta(), ScanMode::File)
        .await
        .unwrap();

    assert!(matches!(outcome, ScanOutcome::Verdict(_)));
    assert_eq!(scanner.status_calls.load(Ordering::SeqCst), 0);
    assert_eq!(scanner.report_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unacknowledged_submission_short_circuits() {
    let scanner = MockRemote::new(true, Some(1));
    let submission = Submission {
        submission_id: String::new(),
        sample_id: String::new(),
        exists: false,
    };

    let outcome = drive_to_verdict(&scanner, &submission, &meta(), ScanMode::File)
        .await
        .unwrap();

    assert!(matches!(outcome, ScanOutcome::NoSubmission));
    assert_eq!(scanner.status_calls.load(Ordering::SeqCst), 0);
    assert_eq!(scanner.report_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_sample_id_is_inconclusive() {
    let scanner = MockRemote::new(true, Some(1));
    let submission = Submission {
        submission_id: "sub-1".to_string(),
        sample_id: String::new(),
        exists: true,
    };

    let outcome = drive_to_verdict(&scanner, &submission, &meta(), ScanMode::File)
        .await
        .unwrap();

    assert!(matches!(outcome, ScanOutcome::NoSubmission));
}

#[tokio::test]
async fn backend_error_terminates_the_loop() {
    let scanner = FailingStatus {
        ok: vec!["ok".to_string()],
    };

    let err = drive_to_verdict(&scanner, &submission(), &meta(), ScanMode::File)
        .await
        .unwrap_err();

    assert!(matches!(err, ScannerError::Protocol(_)));
}

#[tokio::test]
async fn url_mode_uses_url_report() {
    let scanner = MockRemote::new(false, Some(1));

    let outcome = drive_to_verdict(&scanner, &submission(), &meta(), ScanMode::Url)
        .await
        .unwrap();

    assert!(matches!(outcome, ScanOutcome::Verdict(_)));
    assert_eq!(scanner.report_calls.load(Ordering::SeqCst), 1);
}
