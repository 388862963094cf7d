//! Block-page assembly.
//!
//! On a `block` verdict the transaction is replaced: response mode carries
//! an HTML page rendered from `templates/block.html`, request mode carries
//! the same fields serialized as JSON, since the rewritten request is
//! answered at the ICAP layer rather than forwarded.

use askama::Template;
use http::{header, Response, StatusCode, Version};
use serde::Serialize;

use crate::scanner::SampleInfo;

const URL_BREAK_EVERY: usize = 64;

/// Everything the block page shows about the verdict.
#[derive(Debug, Clone, Serialize)]
pub struct BlockPayload {
    pub file_name: String,
    pub file_type: String,
    pub file_size: String,
    pub requested_url: String,
    pub severity: String,
    pub score: String,
    pub results_by: String,
}

impl BlockPayload {
    pub fn new(sample: &SampleInfo, requested_url: &str, vendor: &str) -> Self {
        Self {
            file_name: sample.file_name.clone(),
            file_type: sample.sample_type.clone(),
            file_size: sample.file_size_str.clone(),
            requested_url: break_long_url(requested_url),
            severity: sample.severity.clone(),
            score: sample.score.clone(),
            results_by: vendor.to_string(),
        }
    }
}

#[derive(Template)]
#[template(path = "block.html")]
struct BlockPageTemplate<'a> {
    file_name: &'a str,
    file_type: &'a str,
    file_size: &'a str,
    requested_url: &'a str,
    severity: &'a str,
    score: &'a str,
    results_by: &'a str,
}

/// Build the HTTP response that replaces a blocked response-mode
/// transaction.
pub fn render_block_response(
    payload: &BlockPayload,
) -> Result<Response<Vec<u8>>, askama::Error> {
    let page = BlockPageTemplate {
        file_name: &payload.file_name,
        file_type: &payload.file_type,
        file_size: &payload.file_size,
        requested_url: &payload.requested_url,
        severity: &payload.severity,
        score: &payload.score,
        results_by: &payload.results_by,
    };
    let html = page.render()?;
    Ok(blocked_response(
        "text/html; charset=utf-8",
        html.into_bytes(),
    ))
}

/// Build the HTTP response that answers a blocked request-mode transaction,
/// carrying the verdict as JSON.
pub fn render_block_request_response(
    payload: &BlockPayload,
) -> Result<Response<Vec<u8>>, serde_json::Error> {
    let body = serde_json::to_vec(payload)?;
    Ok(blocked_response("application/json", body))
}

fn blocked_response(content_type: &str, body: Vec<u8>) -> Response<Vec<u8>> {
    let builder = Response::builder()
        .status(StatusCode::FORBIDDEN)
        .version(Version::HTTP_11)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(header::CONTENT_LENGTH, body.len().to_string());
    // Infallible with the header set above.
    builder.body(body).expect("static response parts")
}

/// Break long URLs so the block page can wrap them for display.
pub fn break_long_url(url: &str) -> String {
    if url.len() <= URL_BREAK_EVERY {
        return url.to_string();
    }
    let mut out = String::with_capacity(url.len() + url.len() / URL_BREAK_EVERY);
    for (i, c) in url.chars().enumerate() {
        if i > 0 && i % URL_BREAK_EVERY == 0 {
            out.push('\n');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> BlockPayload {
        BlockPayload {
            file_name: "dropper.exe".to_string(),
            file_type: "exe".to_string(),
            file_size: "2.0 KB".to_string(),
            requested_url: "http://evil.example/dropper.exe".to_string(),
            severity: "malicious".to_string(),
            score: "29/60".to_string(),
            results_by: "virustotal".to_string(),
        }
    }

    #[test]
    fn html_page_carries_verdict_fields() {
        let response = render_block_response(&payload()).unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = String::from_utf8(response.body().clone()).unwrap();
        assert!(body.contains("dropper.exe"));
        assert!(body.contains("malicious"));
        assert!(body.contains("29/60"));
        assert!(body.contains("virustotal"));
    }

    #[test]
    fn json_payload_round_trips() {
        let response = render_block_request_response(&payload()).unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let parsed: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(parsed["severity"], "malicious");
        assert_eq!(parsed["results_by"], "virustotal");
        assert_eq!(parsed["file_name"], "dropper.exe");
    }

    #[test]
    fn short_urls_untouched() {
        assert_eq!(break_long_url("http://x/a"), "http://x/a");
    }

    #[test]
    fn long_urls_broken_for_display() {
        let url = "a".repeat(150);
        let broken = break_long_url(&url);
        assert_eq!(broken.matches('\n').count(), 2);
        assert_eq!(broken.replace('\n', ""), url);
    }
}
