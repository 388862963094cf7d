//! Local scanner backend speaking the clamd TCP protocol.
//!
//! The payload is streamed to the daemon with `zINSTREAM` (length-prefixed
//! chunks, zero-length terminator) and the single-line reply is mapped to a
//! severity: `stream: OK` is benign, `stream: <signature> FOUND` is
//! malicious with the signature name as the score text.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::{SampleInfo, ScannerCore, ScannerError, StreamScanner};
use crate::config::VendorConfig;
use crate::error::Result;
use crate::filter::{human_size, FileMeta};

const INSTREAM_CHUNK: usize = 8192;

pub struct ClamavScanner {
    name: String,
    address: String,
    ok_severities: Vec<String>,
    scan_timeout: Duration,
    interval: Duration,
}

impl ClamavScanner {
    pub fn new(name: &str, config: &VendorConfig) -> Result<Self> {
        let address = config.address.clone().unwrap_or_default();
        Ok(Self {
            name: name.to_string(),
            address,
            ok_severities: config.ok_severities(),
            scan_timeout: config.status_check_timeout(),
            interval: config.status_check_interval(),
        })
    }

    async fn instream(&self, body: &[u8]) -> std::result::Result<String, ScannerError> {
        let mut stream = TcpStream::connect(&self.address).await?;
        stream.write_all(b"zINSTREAM\0").await?;
        for chunk in body.chunks(INSTREAM_CHUNK) {
            stream.write_all(&(chunk.len() as u32).to_be_bytes()).await?;
            stream.write_all(chunk).await?;
        }
        stream.write_all(&0u32.to_be_bytes()).await?;

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await?;
        // Null-delimited reply; trim the terminator.
        while reply.last() == Some(&0) {
            reply.pop();
        }
        String::from_utf8(reply)
            .map_err(|_| ScannerError::Protocol("clamd reply is not UTF-8".to_string()))
    }
}

impl ScannerCore for ClamavScanner {
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
        self.scan_timeout
    }

    fn status_check_interval(&self) -> Duration {
        self.interval
    }

    fn status_endpoint_exists(&self) -> bool {
        false
    }
}

#[async_trait]
impl StreamScanner for ClamavScanner {
    async fn scan_stream(
        &self,
        body: &[u8],
        meta: &FileMeta,
    ) -> std::result::Result<SampleInfo, ScannerError> {
        let reply = timeout(self.scan_timeout, self.instream(body))
            .await
            .map_err(|_| ScannerError::CallTimeout)??;
        debug!(vendor = %self.name, reply = %reply, "clamd reply");

        let (severity, score) = parse_clamd_reply(&reply)?;
        Ok(SampleInfo {
            file_name: meta.file_name.clone(),
            sample_type: meta.file_type.clone(),
            file_size_str: human_size(meta.file_size),
            severity,
            score,
            submission_finished: true,
        })
    }
}

/// Map a clamd reply line to `(severity, score)`.
fn parse_clamd_reply(reply: &str) -> std::result::Result<(String, String), ScannerError> {
    let line = reply.trim();
    if let Some(rest) = line.strip_suffix("FOUND") {
        let signature = rest
            .rsplit_once(':')
            .map(|(_, sig)| sig.trim())
            .unwrap_or_default();
        return Ok(("malicious".to_string(), signature.to_string()));
    }
    if line.ends_with("OK") {
        return Ok(("ok".to_string(), String::new()));
    }
    Err(ScannerError::Protocol(format!("clamd said: {line}")))
}
