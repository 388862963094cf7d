//! Vendor-abstract scanner capability and registry.
//!
//! Every backend, local or remote, reports the same capability surface
//! ([`ScannerCore`]). Local scanners produce a verdict in a single streaming
//! call ([`StreamScanner`]); remote scanners follow a submit/poll/report
//! contract ([`RemoteScanner`]) driven by the orchestrator in [`poll`].
//!
//! The registry resolves a lower-cased vendor name to a backend, local
//! bindings first.

pub mod clamav;
pub mod poll;
pub mod virustotal;
pub mod vmray;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{AppConfig, VendorKind};
use crate::error::Result;
use crate::filter::FileMeta;

/// Failure of a scanner backend call.
#[derive(Debug, Error)]
pub enum ScannerError {
    /// HTTP transport failure talking to a remote vendor API.
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Socket failure talking to a local daemon.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend answered with something the client cannot interpret.
    #[error("unexpected reply from backend: {0}")]
    Protocol(String),

    /// The call does not exist for this backend.
    #[error("operation not supported by this scanner: {0}")]
    Unsupported(&'static str),

    /// A single backend call ran past its budget.
    #[error("scanner call timed out")]
    CallTimeout,
}

/// A scanner's report on one sample.
#[derive(Debug, Clone, Default)]
pub struct SampleInfo {
    pub file_name: String,
    pub sample_type: String,
    pub file_size_str: String,
    /// Vendor-defined severity label, e.g. `"malicious"` or `"ok"`.
    pub severity: String,
    /// Vendor-defined threat score, kept as display text.
    pub score: String,
    /// Set when the vendor folds completion status into the report.
    pub submission_finished: bool,
}

/// Identifiers handed back by a remote scanner when it accepts a payload.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Used against the status endpoint, where one exists.
    pub submission_id: String,
    /// Used to fetch the final report.
    pub sample_id: String,
    /// Whether the scanner acknowledged the payload at all.
    pub exists: bool,
}

/// Capability surface common to every backend.
pub trait ScannerCore: Send + Sync {
    fn vendor(&self) -> &str;
    fn resp_supported(&self) -> bool;
    fn req_supported(&self) -> bool;
    /// Severity labels considered benign.
    fn ok_severities(&self) -> &[String];
    /// Total polling budget per transaction.
    fn status_check_timeout(&self) -> Duration;
    /// Sleep between polls.
    fn status_check_interval(&self) -> Duration;
    /// Whether the vendor exposes a status endpoint separate from the report.
    fn status_endpoint_exists(&self) -> bool;
}

/// In-process scanner over a byte stream; the verdict arrives in one call.
#[async_trait]
pub trait StreamScanner: ScannerCore {
    async fn scan_stream(
        &self,
        body: &[u8],
        meta: &FileMeta,
    ) -> std::result::Result<SampleInfo, ScannerError>;
}

/// Remote scanner following the submit/poll/report contract.
#[async_trait]
pub trait RemoteScanner: ScannerCore {
    async fn submit_file(
        &self,
        body: &[u8],
        filename: &str,
    ) -> std::result::Result<Submission, ScannerError>;

    async fn submit_url(
        &self,
        url: &str,
        filename: &str,
    ) -> std::result::Result<Submission, ScannerError>;

    /// Poll the status endpoint; `true` means the submission finished.
    /// Only meaningful when [`ScannerCore::status_endpoint_exists`].
    async fn get_submission_status(
        &self,
        submission_id: &str,
    ) -> std::result::Result<bool, ScannerError>;

    /// Fetch the report for a file submission.
    async fn get_sample_file_info(
        &self,
        sample_id: &str,
        meta: &FileMeta,
    ) -> std::result::Result<SampleInfo, ScannerError>;

    /// Fetch the report for a URL submission.
    async fn get_sample_url_info(
        &self,
        sample_id: &str,
        meta: &FileMeta,
    ) -> std::result::Result<SampleInfo, ScannerError>;
}

/// A resolved backend.
#[derive(Clone)]
pub enum Backend {
    Local(Arc<dyn StreamScanner>),
    Remote(Arc<dyn RemoteScanner>),
}

/// Vendor-name → backend bindings, immutable after startup.
#[derive(Default)]
pub struct ScannerRegistry {
    local: HashMap<String, Arc<dyn StreamScanner>>,
    remote: HashMap<String, Arc<dyn RemoteScanner>>,
}

impl ScannerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the configured vendor entries.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut registry = Self::new();
        for (name, vc) in &config.vendors {
            match vc.kind {
                VendorKind::Clamav => {
                    registry.register_local(name, Arc::new(clamav::ClamavScanner::new(name, vc)?));
                }
                VendorKind::Virustotal => {
                    registry.register_remote(
                        name,
                        Arc::new(virustotal::VirusTotalScanner::new(name, vc)?),
                    );
                }
                VendorKind::Vmray => {
                    registry
                        .register_remote(name, Arc::new(vmray::VmrayScanner::new(name, vc)?));
                }
            }
        }
        Ok(registry)
    }

    pub fn register_local(&mut self, name: &str, scanner: Arc<dyn StreamScanner>) {
        self.local.insert(name.to_lowercase(), scanner);
    }

    pub fn register_remote(&mut self, name: &str, scanner: Arc<dyn RemoteScanner>) {
        self.remote.insert(name.to_lowercase(), scanner);
    }

    /// Resolve a vendor name, local bindings first.
    pub fn resolve(&self, name: &str) -> Option<Backend> {
        if let Some(scanner) = self.local.get(name) {
            return Some(Backend::Local(scanner.clone()));
        }
        self.remote.get(name).map(|s| Backend::Remote(s.clone()))
    }

    /// Resolve against the remote bindings only; the URL-scanning path has
    /// no local capability.
    pub fn resolve_remote(&self, name: &str) -> Option<Arc<dyn RemoteScanner>> {
        self.remote.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }

    /// Registered vendor names with their binding kind, for diagnostics.
    pub fn vendor_names(&self) -> Vec<(String, &'static str)> {
        let mut names: Vec<(String, &'static str)> = self
            .local
            .keys()
            .map(|k| (k.clone(), "local"))
            .chain(self.remote.keys().map(|k| (k.clone(), "remote")))
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn registry_builds_from_config() {
        let config = AppConfig::load_from_str(
            r#"
            [icap]
            listen = "127.0.0.1:1344"

            [vendors.clamav]
            kind = "clamav"
            address = "127.0.0.1:3310"

            [vendors.virustotal]
            kind = "virustotal"
            api_key = "k"
            "#,
        )
        .unwrap();
        let registry = ScannerRegistry::from_config(&config).unwrap();
        assert!(matches!(registry.resolve("clamav"), Some(Backend::Local(_))));
        assert!(matches!(
            registry.resolve("virustotal"),
            Some(Backend::Remote(_))
        ));
        assert!(registry.resolve("nosuch").is_none());
        assert!(registry.resolve_remote("clamav").is_none());
    }

    #[test]
    fn local_binding_shadows_remote() {
        let config = AppConfig::load_from_str(
            r#"
            [icap]
            listen = "127.0.0.1:1344"

            [vendors.clamav]
            kind = "clamav"
            address = "127.0.0.1:3310"
            "#,
        )
        .unwrap();
        let mut registry = ScannerRegistry::from_config(&config).unwrap();
        let vt_config = crate::config::VendorConfig {
            kind: VendorKind::Virustotal,
            base_url: None,
            api_key: Some("k".to_string()),
            address: None,
            status_check_timeout_secs: 1,
            status_check_interval_secs: 1,
            status_endpoint_exists: None,
            ok_file_status: None,
        };
        registry.register_remote(
            "clamav",
            Arc::new(virustotal::VirusTotalScanner::new("clamav", &vt_config).unwrap()),
        );
        assert!(matches!(registry.resolve("clamav"), Some(Backend::Local(_))));
    }

    #[test]
    fn vendor_names_sorted() {
        let config = AppConfig::load_from_str(
            r#"
            [icap]
            listen = "127.0.0.1:1344"

            [vendors.vmray]
            kind = "vmray"
            api_key = "k"

            [vendors.clamav]
            kind = "clamav"
            address = "127.0.0.1:3310"
            "#,
        )
        .unwrap();
        let registry = ScannerRegistry::from_config(&config).unwrap();
        let names = registry.vendor_names();
        assert_eq!(
            names,
            vec![
                ("clamav".to_string(), "local"),
                ("vmray".to_string(), "remote")
            ]
        );
    }
}
