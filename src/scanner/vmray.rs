//! Remote sandbox scanner backend (VMRay REST API shape).
//!
//! Unlike the reputation backend, this vendor exposes a status endpoint:
//! submissions are polled at `submission/<id>` and the verdict is fetched
//! once from `sample/<id>` after completion.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use tracing::debug;

use super::{RemoteScanner, SampleInfo, ScannerCore, ScannerError, Submission};
use crate::config::VendorConfig;
use crate::error::Result;
use crate::filter::{human_size, FileMeta};

const DEFAULT_BASE_URL: &str = "https://cloud.vmray.com";

pub struct VmrayScanner {
    name: String,
    base_url: String,
    api_key: String,
    ok_severities: Vec<String>,
    poll_timeout: Duration,
    poll_interval: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SubmitReply {
    data: SubmitData,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    #[serde(default)]
    submissions: Vec<SubmissionEntry>,
}

#[derive(Debug, Deserialize)]
struct SubmissionEntry {
    submission_id: u64,
    submission_sample_id: u64,
}

#[derive(Debug, Deserialize)]
struct StatusReply {
    data: StatusData,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    #[serde(default)]
    submission_finished: bool,
}

#[derive(Debug, Deserialize)]
struct SampleReply {
    data: SampleData,
}

#[derive(Debug, Deserialize)]
struct SampleData {
    #[serde(default)]
    sample_filename: Option<String>,
    #[serde(default)]
    sample_type: Option<String>,
    #[serde(default)]
    sample_severity: Option<String>,
    #[serde(default)]
    sample_vti_score: Option<f64>,
    #[serde(default)]
    sample_filesize: Option<u64>,
}

impl VmrayScanner {
    pub fn new(name: &str, config: &VendorConfig) -> Result<Self> {
        let poll_timeout = config.status_check_timeout();
        let client = reqwest::Client::builder()
            .timeout(poll_timeout)
            .build()
            .map_err(ScannerError::Http)?;
        Ok(Self {
            name: name.to_string(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: config.api_key.clone().unwrap_or_default(),
            ok_severities: config.ok_severities(),
            poll_timeout,
            poll_interval: config.status_check_interval(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/rest/{}", self.base_url, path)
    }

    fn auth_header(&self) -> String {
        format!("api_key {}", self.api_key)
    }
}

impl ScannerCore for VmrayScanner {
    fn vendor(&self) -> &str {
        &self.name
    }

    fn resp_supported(&self) -> bool {
        true
    }

    fn req_supported(&self) -> bool {
        false
    }

    fn ok_severities(&self) -> &[String] {
        &self.ok_severities
    }

    fn status_check_timeout(&self) -> Duration {
        self.poll_timeout
    }

    fn status_check_interval(&self) -> Duration {
        self.poll_interval
    }

    fn status_endpoint_exists(&self) -> bool {
        true
    }
}

#[async_trait]
impl RemoteScanner for VmrayScanner {
    async fn submit_file(
        &self,
        body: &[u8],
        filename: &str,
    ) -> std::result::Result<Submission, ScannerError> {
        let form = multipart::Form::new().part(
            "sample_file",
            multipart::Part::bytes(body.to_vec()).file_name(filename.to_string()),
        );
        let reply = self
            .client
            .post(self.endpoint("sample/submit"))
            .header("Authorization", self.auth_header())
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json::<SubmitReply>()
            .await?;
        Ok(submission_from_reply(reply))
    }

    async fn submit_url(
        &self,
        _url: &str,
        _filename: &str,
    ) -> std::result::Result<Submission, ScannerError> {
        Err(ScannerError::Unsupported("url submission"))
    }

    async fn get_submission_status(
        &self,
        submission_id: &str,
    ) -> std::result::Result<bool, ScannerError> {
        let reply = self
            .client
            .get(self.endpoint(&format!("submission/{submission_id}")))
            .header("Authorization", self.auth_header())
            .send()
            .await?
            .error_for_status()?
            .json::<StatusReply>()
            .await?;
        debug!(
            vendor = %self.name,
            submission_id,
            finished = reply.data.submission_finished,
            "status reply"
        );
        Ok(reply.data.submission_finished)
    }

    async fn get_sample_file_info(
        &self,
        sample_id: &str,
        meta: &FileMeta,
    ) -> std::result::Result<SampleInfo, ScannerError> {
        let reply = self
            .client
            .get(self.endpoint(&format!("sample/{sample_id}")))
            .header("Authorization", self.auth_header())
            .send()
            .await?
            .error_for_status()?
            .json::<SampleReply>()
            .await?;
        Ok(sample_from_reply(&reply.data, meta))
    }

    async fn get_sample_url_info(
        &self,
        _sample_id: &str,
        _meta: &FileMeta,
    ) -> std::result::Result<SampleInfo, ScannerError> {
        Err(ScannerError::Unsupported("url report"))
    }
}

fn submission_from_reply(reply: SubmitReply) -> Submission {
    match reply.data.submissions.first() {
        Some(entry) => Submission {
            submission_id: entry.submission_id.to_string(),
            sample_id: entry.submission_sample_id.to_string(),
            exists: true,
        },
        None => Submission {
            submission_id: String::new(),
            sample_id: String::new(),
            exists: false,
        },
    }
}

fn sample_from_reply(data: &SampleData, meta: &FileMeta) -> SampleInfo {
    SampleInfo {
        file_name: data
            .sample_filename
            .clone()
            .unwrap_or_else(|| meta.file_name.clone()),
        sample_type: data
            .sample_type
            .clone()
            .unwrap_or_else(|| meta.file_type.clone()),
        file_size_str: match data.sample_filesize {
            Some(size) => human_size(size),
            None => human_size(meta.file_size),
        },
        severity: data
            .sample_severity
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        score: data
            .sample_vti_score
            .map(|score| format!("{score}"))
            .unwrap_or_default(),
        // Reports are only fetched after the status endpoint said so.
        submission_finished: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_uses_first_entry() {
        let reply: SubmitReply = serde_json::from_str(
            r#"{"data": {"submissions": [
                {"submission_id": 5651578, "submission_sample_id": 4715575}
            ]}}"#,
        )
        .unwrap();
        let submission = submission_from_reply(reply);
        assert!(submission.exists);
        assert_eq!(submission.submission_id, "5651578");
        assert_eq!(submission.sample_id, "4715575");
    }

    #[test]
    fn empty_submission_list_means_none() {
        let reply: SubmitReply =
            serde_json::from_str(r#"{"data": {"submissions": []}}"#).unwrap();
        assert!(!submission_from_reply(reply).exists);
    }

    #[test]
    fn status_reply_parses() {
        let reply: StatusReply =
            serde_json::from_str(r#"{"data": {"submission_finished": true}}"#).unwrap();
        assert!(reply.data.submission_finished);
    }

    #[test]
    fn sample_reply_maps_fields() {
        let reply: SampleReply = serde_json::from_str(
            r#"{"data": {
                "sample_filename": "dropper.exe",
                "sample_type": "Windows Exe (x86-32)",
                "sample_severity": "malicious",
                "sample_vti_score": 100.0,
                "sample_filesize": 4096
            }}"#,
        )
        .unwrap();
        let sample = sample_from_reply(&reply.data, &FileMeta::default());
        assert_eq!(sample.file_name, "dropper.exe");
        assert_eq!(sample.severity, "malicious");
        assert_eq!(sample.score, "100");
        assert_eq!(sample.file_size_str, "4.0 KB");
        assert!(sample.submission_finished);
    }

    #[test]
    fn sample_reply_falls_back_to_meta() {
        let reply: SampleReply = serde_json::from_str(r#"{"data": {}}"#).unwrap();
        let meta = FileMeta {
            file_name: "payload.bin".to_string(),
            file_type: "bin".to_string(),
            file_size: 10,
        };
        let sample = sample_from_reply(&reply.data, &meta);
        assert_eq!(sample.file_name, "payload.bin");
        assert_eq!(sample.severity, "unknown");
        assert_eq!(sample.file_size_str, "10 B");
    }
}
