//! ICAP wire layer wiring.
//!
//! This is the only module that touches `icap-rs` types: it builds the two
//! service routes, advertises capabilities for OPTIONS, extracts the
//! handler-level transactions from parsed requests, and converts pipeline
//! outcomes back into ICAP responses. One task runs per connection, driven
//! by the wire layer; dropping the connection cancels the in-flight
//! pipeline.

use std::sync::{Arc, Mutex};

use http::{header, HeaderMap};
use icap_rs::request::{EmbeddedHttp, Request};
use icap_rs::response::{Response, StatusCode};
use icap_rs::server::options::ServiceOptions;
use icap_rs::server::Server;
use icap_rs::{Body, Method};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::Result;
use crate::filter;
use crate::handler::{self, AdaptCtx, AdaptOutcome, ReqmodTransaction, RespmodTransaction};
use crate::logging::{self, TransactionLog};
use crate::scanner::ScannerRegistry;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What an endpoint advertises on OPTIONS, limited to what the wire
/// library lets a service set: the `Methods` and `Transfer-Preview`
/// headers are emitted by the library itself from the route registration
/// and preview handling. Pure function of the config, so two successive
/// OPTIONS always answer identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAdvert {
    pub istag: String,
    pub service: String,
    pub allow_204: bool,
    /// `Preview` header value; `None` omits the header.
    pub preview: Option<u32>,
}

/// RESPMOD advertisement: preview only when configured non-zero.
pub fn respmod_advert(config: &AppConfig) -> ServiceAdvert {
    ServiceAdvert {
        istag: config.icap.istag.clone(),
        service: config.icap.service_label.clone(),
        allow_204: true,
        preview: (config.icap.preview_bytes > 0).then_some(config.icap.preview_bytes),
    }
}

/// REQMOD advertisement: the URL path needs no payload, preview is 0.
pub fn reqmod_advert(config: &AppConfig) -> ServiceAdvert {
    ServiceAdvert {
        istag: config.icap.istag.clone(),
        service: config.icap.service_label.clone(),
        allow_204: true,
        preview: Some(0),
    }
}

fn service_options(advert: &ServiceAdvert) -> ServiceOptions {
    let istag = advert.istag.clone();
    let mut options = ServiceOptions::new()
        .with_istag_provider(move |_req: &Request| istag.clone())
        .with_service(advert.service.as_str());
    if advert.allow_204 {
        options = options.add_allow("204");
    }
    if let Some(preview) = advert.preview {
        options = options.with_preview(preview);
    }
    options
}

/// The assembled server: configuration, scanner bindings, optional audit
/// sink.
pub struct IcapGuardServer {
    config: Arc<AppConfig>,
    registry: Arc<ScannerRegistry>,
    audit: Option<Arc<Mutex<Connection>>>,
}

impl IcapGuardServer {
    pub fn new(config: AppConfig) -> Result<Self> {
        let registry = ScannerRegistry::from_config(&config)?;
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            audit: None,
        })
    }

    pub fn with_audit_db(mut self, db: Arc<Mutex<Connection>>) -> Self {
        self.audit = Some(db);
        self
    }

    pub fn registry(&self) -> &ScannerRegistry {
        &self.registry
    }

    /// Bind and serve until the wire layer stops.
    pub async fn run(self) -> std::result::Result<(), BoxError> {
        let config = self.config.clone();

        let reqmod_opts = service_options(&reqmod_advert(&config));
        let respmod_opts = service_options(&respmod_advert(&config));

        let server = Server::builder()
            .bind(config.icap.listen.as_str())
            .route_reqmod(
                config.icap.reqmod_service.as_str(),
                {
                    let config = self.config.clone();
                    let registry = self.registry.clone();
                    let audit = self.audit.clone();
                    move |request: Request| {
                        let config = config.clone();
                        let registry = registry.clone();
                        let audit = audit.clone();
                        async move {
                            if request.method != Method::ReqMod {
                                return into_icap_response(
                                    AdaptOutcome::Reject(405),
                                    &config,
                                );
                            }
                            let transaction = extract_reqmod(&request);
                            let uri = transaction.request_uri.clone();
                            let ctx = AdaptCtx {
                                config: &config,
                                registry: &registry,
                                upstream: None,
                            };
                            let outcome = handler::reqmod::handle(&ctx, transaction).await;
                            audit_transaction(
                                audit.as_ref(),
                                "reqmod",
                                &uri,
                                &config.policy.req_scanner_vendor,
                                &outcome,
                            );
                            into_icap_response(outcome, &config)
                        }
                    }
                },
                Some(reqmod_opts),
            )
            .route_respmod(
                config.icap.respmod_service.as_str(),
                {
                    let config = self.config.clone();
                    let registry = self.registry.clone();
                    let audit = self.audit.clone();
                    move |request: Request| {
                        let config = config.clone();
                        let registry = registry.clone();
                        let audit = audit.clone();
                        async move {
                            if request.method != Method::RespMod {
                                return into_icap_response(
                                    AdaptOutcome::Reject(405),
                                    &config,
                                );
                            }
                            let transaction = extract_respmod(&request);
                            let uri = transaction.request_uri.clone();
                            let ctx = AdaptCtx {
                                config: &config,
                                registry: &registry,
                                upstream: None,
                            };
                            let outcome = handler::respmod::handle(&ctx, transaction).await;
                            audit_transaction(
                                audit.as_ref(),
                                "respmod",
                                &uri,
                                &config.policy.resp_scanner_vendor,
                                &outcome,
                            );
                            into_icap_response(outcome, &config)
                        }
                    }
                },
                Some(respmod_opts),
            )
            .build()
            .await?;

        info!(
            listen = %config.icap.listen,
            reqmod = %config.icap.reqmod_service,
            respmod = %config.icap.respmod_service,
            "ICAP server started"
        );
        server.run().await.map_err(Into::into)
    }
}

/// `Allow: 204` screening per RFC 3507 §4.6.
fn allow_204(headers: &HeaderMap) -> bool {
    headers
        .get("Allow")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').any(|p| p.trim() == "204"))
        .unwrap_or(false)
}

fn extract_reqmod(request: &Request) -> ReqmodTransaction {
    let request_uri = match &request.embedded {
        Some(EmbeddedHttp::Req { head, .. }) => head.uri().to_string(),
        _ => String::new(),
    };
    ReqmodTransaction {
        allow_204: allow_204(&request.icap_headers),
        request_uri,
    }
}

fn extract_respmod(request: &Request) -> RespmodTransaction {
    let (request_uri, body) = match &request.embedded {
        Some(EmbeddedHttp::Resp { head, body }) => {
            let body = match body {
                Body::Full { reader } => Some(reader.to_vec()),
                _ => None,
            };
            (respmod_request_uri(head.headers()), body)
        }
        Some(EmbeddedHttp::Req { head, .. }) => (head.uri().to_string(), None),
        None => (String::new(), None),
    };
    RespmodTransaction {
        allow_204: allow_204(&request.icap_headers),
        request_uri,
        body,
    }
}

/// Best-effort origin identity for a response-mode transaction. The parsed
/// message carries only the encapsulated response in this mode, so the name
/// comes from what the origin said about its own payload; an empty string
/// degrades to `unknown` downstream.
fn respmod_request_uri(headers: &HeaderMap) -> String {
    if let Some(location) = headers
        .get(header::CONTENT_LOCATION)
        .and_then(|v| v.to_str().ok())
    {
        if !location.is_empty() {
            return location.to_string();
        }
    }
    headers
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(content_disposition_filename)
        .unwrap_or_default()
}

fn content_disposition_filename(value: &str) -> Option<String> {
    value.split(';').find_map(|part| {
        let name = part.trim().strip_prefix("filename=")?.trim_matches('"');
        (!name.is_empty()).then(|| name.to_string())
    })
}

fn into_icap_response(
    outcome: AdaptOutcome,
    config: &AppConfig,
) -> icap_rs::error::IcapResult<Response> {
    let istag = config.icap.istag.as_str();
    let service = config.icap.service_label.as_str();
    match outcome {
        AdaptOutcome::Pass => Ok(Response::no_content()
            .try_set_istag(istag)?
            .add_header("Service", service)),
        AdaptOutcome::Block(http_response) => Ok(Response::new(StatusCode::OK, "OK")
            .try_set_istag(istag)?
            .add_header("Service", service)
            .with_http_response(&http_response)?),
        AdaptOutcome::Reject(code) => {
            let (status, reason) = match code {
                400 => (StatusCode::BAD_REQUEST, "Bad Request"),
                405 => (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"),
                424 => (StatusCode::FAILED_DEPENDENCY, "Failed Dependency"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
            };
            Ok(Response::new(status, reason)
                .try_set_istag(istag)?
                .add_header("Service", service))
        }
    }
}

/// Write one audit row if a database is attached. Failures are logged and
/// swallowed; auditing never affects the transaction.
fn audit_transaction(
    db: Option<&Arc<Mutex<Connection>>>,
    mode: &str,
    uri: &str,
    vendor: &str,
    outcome: &AdaptOutcome,
) {
    let Some(db) = db else { return };
    let reason = match outcome {
        AdaptOutcome::Pass => "no modification".to_string(),
        AdaptOutcome::Block(_) => "replaced with block page".to_string(),
        AdaptOutcome::Reject(code) => format!("rejected with status {code}"),
    };
    let log = TransactionLog {
        id: None,
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: mode.to_string(),
        url: uri.to_string(),
        file_name: filter::file_name_from_uri(uri),
        extension: filter::file_ext_from_uri(uri),
        vendor: vendor.to_string(),
        action: outcome.action().to_string(),
        reason,
    };
    match db.lock() {
        Ok(conn) => {
            if let Err(e) = logging::log_transaction(&conn, &log) {
                warn!("failed to write audit log entry: {}", e);
            }
        }
        Err(_) => warn!("audit log mutex poisoned, dropping entry"),
    }
}
