//! Remote reputation scanner backend (VirusTotal v2 API shape).
//!
//! Files and URLs are submitted to `file/scan` / `url/scan`; the report
//! endpoints fold completion status into the reply (`response_code` 1 means
//! finished, -2 queued), so this vendor has no separate status endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use tracing::debug;

use super::{RemoteScanner, SampleInfo, ScannerCore, ScannerError, Submission};
use crate::config::VendorConfig;
use crate::error::Result;
use crate::filter::{human_size, FileMeta};

const DEFAULT_BASE_URL: &str = "https://www.virustotal.com/vtapi/v2";

pub struct VirusTotalScanner {
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
    response_code: i64,
    #[serde(default)]
    scan_id: Option<String>,
    #[serde(default)]
    resource: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportReply {
    response_code: i64,
    #[serde(default)]
    positives: Option<u32>,
    #[serde(default)]
    total: Option<u32>,
}

impl VirusTotalScanner {
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
        format!("{}/{}", self.base_url, path)
    }

    async fn fetch_report(
        &self,
        path: &str,
        resource: &str,
    ) -> std::result::Result<ReportReply, ScannerError> {
        let reply = self
            .client
            .get(self.endpoint(path))
            .query(&[("apikey", self.api_key.as_str()), ("resource", resource)])
            .send()
            .await?
            .error_for_status()?
            .json::<ReportReply>()
            .await?;
        debug!(vendor = %self.name, resource, code = reply.response_code, "report reply");
        Ok(reply)
    }
}

impl ScannerCore for VirusTotalScanner {
    fn vendor(&self) -> &str {
        &self.name
    }

    fn resp_supported(&self) -> bool {
        true
    }

    fn req_supported(&self) -> bool {
        true
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
        false
    }
}

#[async_trait]
impl RemoteScanner for VirusTotalScanner {
    async fn submit_file(
        &self,
        body: &[u8],
        filename: &str,
    ) -> std::result::Result<Submission, ScannerError> {
        let form = multipart::Form::new()
            .text("apikey", self.api_key.clone())
            .part(
                "file",
                multipart::Part::bytes(body.to_vec()).file_name(filename.to_string()),
            );
        let reply = self
            .client
            .post(self.endpoint("file/scan"))
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
        url: &str,
        _filename: &str,
    ) -> std::result::Result<Submission, ScannerError> {
        let reply = self
            .client
            .post(self.endpoint("url/scan"))
            .form(&[("apikey", self.api_key.as_str()), ("url", url)])
            .send()
            .await?
            .error_for_status()?
            .json::<SubmitReply>()
            .await?;
        Ok(submission_from_reply(reply))
    }

    async fn get_submission_status(
        &self,
        _submission_id: &str,
    ) -> std::result::Result<bool, ScannerError> {
        Err(ScannerError::Unsupported("no status endpoint"))
    }

    async fn get_sample_file_info(
        &self,
        sample_id: &str,
        meta: &FileMeta,
    ) -> std::result::Result<SampleInfo, ScannerError> {
        let reply = self.fetch_report("file/report", sample_id).await?;
        Ok(report_to_sample(&reply, meta))
    }

    async fn get_sample_url_info(
        &self,
        sample_id: &str,
        meta: &FileMeta,
    ) -> std::result::Result<SampleInfo, ScannerError> {
        let reply = self.fetch_report("url/report", sample_id).await?;
        Ok(report_to_sample(&reply, meta))
    }
}

fn submission_from_reply(reply: SubmitReply) -> Submission {
    let sample_id = reply
        .resource
        .or(reply.sha256)
        .or_else(|| reply.scan_id.clone())
        .unwrap_or_default();
    Submission {
        submission_id: reply.scan_id.unwrap_or_default(),
        sample_id,
        exists: reply.response_code == 1,
    }
}

fn report_to_sample(reply: &ReportReply, meta: &FileMeta) -> SampleInfo {
    let positives = reply.positives.unwrap_or(0);
    let total = reply.total.unwrap_or(0);
    let severity = if positives == 0 { "ok" } else { "malicious" };
    SampleInfo {
        file_name: meta.file_name.clone(),
        sample_type: meta.file_type.clone(),
        file_size_str: human_size(meta.file_size),
        severity: severity.to_string(),
        score: format!("{positives}/{total}"),
        submission_finished: reply.response_code == 1,
    }
}
