//! Application configuration.
//!
//! One [`AppConfig`] is loaded from a TOML file at startup and never mutated
//! afterwards; handlers receive it behind an `Arc`. Extension lists and
//! vendor names are normalized to lower case on load so lookups never have
//! to care about case.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IcapGuardError, Result};

/// The wildcard token accepted in extension lists.
pub const ANY: &str = "*";

/// ICAP endpoint settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IcapConfig {
    /// Listen address, e.g. `"127.0.0.1:1344"`.
    pub listen: String,
    /// Server identity tag sent as `ISTag` on every response.
    #[serde(default = "default_istag")]
    pub istag: String,
    /// Human-readable `Service` label.
    #[serde(default = "default_service_label")]
    pub service_label: String,
    /// Service path for the request-modification endpoint.
    #[serde(default = "default_reqmod_service")]
    pub reqmod_service: String,
    /// Service path for the response-modification endpoint.
    #[serde(default = "default_respmod_service")]
    pub respmod_service: String,
    /// Preview size advertised on the RESPMOD endpoint; 0 disables the
    /// `Preview` header there.
    #[serde(default = "default_preview_bytes")]
    pub preview_bytes: u32,
    /// Largest response body that will be scanned, in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

/// Scanning policy: which vendor handles which direction, and which
/// extensions are processed or bypassed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    /// Vendor for request-mode (URL) scanning; empty bypasses the direction.
    #[serde(default)]
    pub req_scanner_vendor: String,
    /// Vendor for response-mode (body) scanning; empty bypasses the direction.
    #[serde(default)]
    pub resp_scanner_vendor: String,
    /// Extensions to process; `*` means everything not explicitly bypassed.
    #[serde(default = "default_process_extensions")]
    pub process_extensions: Vec<String>,
    /// Extensions to bypass; `*` means everything not explicitly processed.
    #[serde(default)]
    pub bypass_extensions: Vec<String>,
    /// Surface backend failures to the proxy as 4xx/5xx instead of 204.
    #[serde(default)]
    pub propagate_error: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            req_scanner_vendor: String::new(),
            resp_scanner_vendor: String::new(),
            process_extensions: default_process_extensions(),
            bypass_extensions: Vec::new(),
            propagate_error: false,
        }
    }
}

/// Upstream ICAP pass-through endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteIcapConfig {
    pub reqmod_endpoint: String,
    pub respmod_endpoint: String,
}

/// Which backend implementation a vendor entry binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorKind {
    Clamav,
    Virustotal,
    Vmray,
}

/// Per-vendor scanner settings.
///
/// Fields not set in the file fall back to per-kind defaults via the
/// accessors below, mirroring how deployments usually only set an API key.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VendorConfig {
    pub kind: VendorKind,
    /// Base URL of the vendor HTTP API (remote kinds only).
    #[serde(default)]
    pub base_url: Option<String>,
    /// API key for the vendor HTTP API (remote kinds only).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Daemon address for local kinds, e.g. clamd `"127.0.0.1:3310"`.
    #[serde(default)]
    pub address: Option<String>,
    /// Total budget for polling a submission to completion.
    #[serde(default = "default_status_timeout_secs")]
    pub status_check_timeout_secs: u64,
    /// Sleep between polls.
    #[serde(default = "default_status_interval_secs")]
    pub status_check_interval_secs: u64,
    /// Whether the vendor has a status endpoint separate from the report.
    #[serde(default)]
    pub status_endpoint_exists: Option<bool>,
    /// Severity labels treated as benign for this vendor.
    #[serde(default)]
    pub ok_file_status: Option<Vec<String>>,
}

impl VendorConfig {
    pub fn status_check_timeout(&self) -> Duration {
        Duration::from_secs(self.status_check_timeout_secs)
    }

    pub fn status_check_interval(&self) -> Duration {
        Duration::from_secs(self.status_check_interval_secs)
    }

    pub fn status_endpoint_exists(&self) -> bool {
        self.status_endpoint_exists
            .unwrap_or(matches!(self.kind, VendorKind::Vmray))
    }

    pub fn ok_severities(&self) -> Vec<String> {
        match &self.ok_file_status {
            Some(list) => list.iter().map(|s| s.to_lowercase()).collect(),
            None => match self.kind {
                VendorKind::Clamav | VendorKind::Virustotal => vec!["ok".to_string()],
                VendorKind::Vmray => {
                    vec!["not_suspicious".to_string(), "whitelisted".to_string()]
                }
            },
        }
    }
}

/// Audit-log settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuditConfig {
    /// SQLite database path; absent disables the audit log.
    #[serde(default)]
    pub database: Option<PathBuf>,
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub icap: IcapConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub remote_icap: Option<RemoteIcapConfig>,
    #[serde(default)]
    pub vendors: HashMap<String, VendorConfig>,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl AppConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    pub fn load_from_str(content: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Lower-case everything that is compared case-insensitively at request
    /// time: vendor names and extension lists.
    fn normalize(&mut self) {
        self.policy.req_scanner_vendor = self.policy.req_scanner_vendor.to_lowercase();
        self.policy.resp_scanner_vendor = self.policy.resp_scanner_vendor.to_lowercase();
        lowercase_all(&mut self.policy.process_extensions);
        lowercase_all(&mut self.policy.bypass_extensions);
        let vendors = std::mem::take(&mut self.vendors);
        self.vendors = vendors
            .into_iter()
            .map(|(name, vc)| (name.to_lowercase(), vc))
            .collect();
    }

    fn validate(&self) -> Result<()> {
        if self.remote_icap.is_some() {
            return Err(IcapGuardError::ConfigInvalid(
                "remote ICAP pass-through requires an upstream dispatcher; none is built in"
                    .to_string(),
            ));
        }
        for (name, vc) in &self.vendors {
            match vc.kind {
                VendorKind::Clamav => {
                    if vc.address.is_none() {
                        return Err(IcapGuardError::ConfigInvalid(format!(
                            "vendor `{name}`: clamav requires `address`"
                        )));
                    }
                }
                VendorKind::Virustotal | VendorKind::Vmray => {
                    if vc.api_key.as_deref().unwrap_or("").is_empty() {
                        return Err(IcapGuardError::ConfigInvalid(format!(
                            "vendor `{name}`: missing `api_key`"
                        )));
                    }
                }
            }
            if vc.status_check_interval_secs == 0 {
                return Err(IcapGuardError::ConfigInvalid(format!(
                    "vendor `{name}`: `status_check_interval_secs` must be at least 1"
                )));
            }
        }
        Ok(())
    }
}

fn lowercase_all(list: &mut [String]) {
    for item in list.iter_mut() {
        *item = item.to_lowercase();
    }
}

fn default_istag() -> String {
    concat!("ICAPGUARD-", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_service_label() -> String {
    "IcapGuard URL & File Reputation".to_string()
}

fn default_reqmod_service() -> String {
    "reqmod".to_string()
}

fn default_respmod_service() -> String {
    "respmod".to_string()
}

fn default_preview_bytes() -> u32 {
    1024
}

fn default_max_file_size() -> u64 {
    // 50 MiB
    50 * 1024 * 1024
}

fn default_process_extensions() -> Vec<String> {
    vec![ANY.to_string()]
}

fn default_status_timeout_secs() -> u64 {
    30
}

fn default_status_interval_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [icap]
        listen = "127.0.0.1:1344"
        preview_bytes = 2048

        [policy]
        resp_scanner_vendor = "ClamAV"
        process_extensions = ["*"]
        bypass_extensions = ["TXT", "png"]

        [vendors.clamav]
        kind = "clamav"
        address = "127.0.0.1:3310"

        [vendors.virustotal]
        kind = "virustotal"
        api_key = "test-key"
        status_check_timeout_secs = 2
        status_check_interval_secs = 1
    "#;

    #[test]
    fn parses_and_normalizes() {
        let config = AppConfig::load_from_str(SAMPLE).unwrap();
        assert_eq!(config.icap.listen, "127.0.0.1:1344");
        assert_eq!(config.icap.preview_bytes, 2048);
        assert_eq!(config.policy.resp_scanner_vendor, "clamav");
        assert_eq!(config.policy.bypass_extensions, vec!["txt", "png"]);
        assert!(config.vendors.contains_key("clamav"));
    }

    #[test]
    fn defaults_applied() {
        let config = AppConfig::load_from_str(
            r#"
            [icap]
            listen = "127.0.0.1:1344"
            "#,
        )
        .unwrap();
        assert_eq!(config.icap.preview_bytes, 1024);
        assert_eq!(config.icap.max_file_size, 50 * 1024 * 1024);
        assert_eq!(config.icap.reqmod_service, "reqmod");
        assert_eq!(config.policy.process_extensions, vec!["*"]);
        assert!(!config.policy.propagate_error);
        assert!(config.audit.database.is_none());
    }

    #[test]
    fn vendor_kind_defaults() {
        let config = AppConfig::load_from_str(SAMPLE).unwrap();
        let vt = &config.vendors["virustotal"];
        assert!(!vt.status_endpoint_exists());
        assert_eq!(vt.ok_severities(), vec!["ok"]);
        assert_eq!(vt.status_check_timeout(), Duration::from_secs(2));

        let clam = &config.vendors["clamav"];
        assert_eq!(clam.status_check_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn remote_icap_rejected() {
        let err = AppConfig::load_from_str(
            r#"
            [icap]
            listen = "127.0.0.1:1344"

            [remote_icap]
            reqmod_endpoint = "icap://upstream:1344/reqmod"
            respmod_endpoint = "icap://upstream:1344/respmod"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, IcapGuardError::ConfigInvalid(_)));
    }

    #[test]
    fn missing_api_key_rejected() {
        let err = AppConfig::load_from_str(
            r#"
            [icap]
            listen = "127.0.0.1:1344"

            [vendors.vmray]
            kind = "vmray"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("api_key"));
    }

    #[test]
    fn zero_interval_rejected() {
        let err = AppConfig::load_from_str(
            r#"
            [icap]
            listen = "127.0.0.1:1344"

            [vendors.clamav]
            kind = "clamav"
            address = "127.0.0.1:3310"
            status_check_interval_secs = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, IcapGuardError::ConfigInvalid(_)));
    }
}
