//! Content classification and extension gating.
//!
//! The response-mode pipeline classifies a payload by magic bytes; the
//! request-mode pipeline classifies by the URL's file extension. Both feed
//! the same gate, a pure function over the configured process/bypass lists
//! where `*` acts as a wildcard token.

use crate::config::ANY;

/// Outcome of the extension gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Process,
    Bypass,
}

/// Meta information about the payload under scan. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct FileMeta {
    /// Last path segment of the target URI, `"unknown"` when absent.
    pub file_name: String,
    /// Lower-cased extension; empty when the URI carries none.
    pub file_type: String,
    /// Body length in bytes; only meaningful in response mode.
    pub file_size: u64,
}

impl FileMeta {
    pub fn from_uri(uri: &str, file_size: u64) -> Self {
        Self {
            file_name: file_name_from_uri(uri),
            file_type: file_ext_from_uri(uri),
            file_size,
        }
    }
}

/// Decide whether a payload with extension `ext` is scanned.
///
/// An extension survives only if the process list claims it, either by name
/// or via `*`, and the bypass list does not name it. A `*` in the bypass
/// list only sweeps extensions the process list left unclaimed; since an
/// unclaimed extension is already bypassed by the first check, `*` on both
/// sides resolves to process.
pub fn gate(ext: &str, process_exts: &[String], bypass_exts: &[String]) -> GateDecision {
    let any_process = contains(process_exts, ANY);
    let in_process = contains(process_exts, ext);

    if !any_process && !in_process {
        return GateDecision::Bypass;
    }
    if contains(bypass_exts, ext) {
        return GateDecision::Bypass;
    }
    GateDecision::Process
}

fn contains(list: &[String], token: &str) -> bool {
    list.iter().any(|item| item == token)
}

/// Classify a payload by its leading bytes, returning an extension token
/// comparable against the gate lists.
///
/// Recognizes the common binary signatures; anything textual falls back to
/// `html` or `txt`, anything else to `bin`.
pub fn sniff_extension(preview: &[u8]) -> &'static str {
    const MAGICS: &[(&[u8], &str)] = &[
        (b"%PDF-", "pdf"),
        (&[0x89, b'P', b'N', b'G'], "png"),
        (b"GIF87a", "gif"),
        (b"GIF89a", "gif"),
        (&[0xFF, 0xD8, 0xFF], "jpg"),
        (b"PK\x03\x04", "zip"),
        (&[0x1F, 0x8B], "gz"),
        (b"Rar!\x1a\x07", "rar"),
        (b"MZ", "exe"),
        (&[0x7F, b'E', b'L', b'F'], "exe"),
        (b"\xD0\xCF\x11\xE0", "doc"),
        (b"OggS", "ogg"),
        (b"ID3", "mp3"),
    ];

    for (magic, ext) in MAGICS {
        if preview.starts_with(magic) {
            return ext;
        }
    }

    // Strip a UTF-8 BOM and leading whitespace before looking at text.
    let mut offset = 0usize;
    if preview.starts_with(&[0xEF, 0xBB, 0xBF]) {
        offset = 3;
    }
    while offset < preview.len() && matches!(preview[offset], b' ' | b'\t' | b'\r' | b'\n') {
        offset += 1;
    }
    let head = &preview[offset..preview.len().min(offset + 512)];

    if head.contains(&0) {
        return "bin";
    }
    let lower: Vec<u8> = head.iter().map(u8::to_ascii_lowercase).collect();
    if lower.starts_with(b"<!doctype") || lower.starts_with(b"<html") || lower.starts_with(b"<?xml")
    {
        return "html";
    }
    "txt"
}

/// Last path segment of a URI, without query string; `"unknown"` when the
/// URI has no usable segment.
pub fn file_name_from_uri(uri: &str) -> String {
    let path = strip_scheme_and_query(uri);
    match path.rsplit('/').next() {
        Some(segment) if !segment.is_empty() => segment.to_string(),
        _ => "unknown".to_string(),
    }
}

/// Lower-cased extension of a URI's last path segment, empty when absent.
pub fn file_ext_from_uri(uri: &str) -> String {
    let name = file_name_from_uri(uri);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_lowercase(),
        _ => String::new(),
    }
}

fn strip_scheme_and_query(uri: &str) -> &str {
    let without_query = uri.split(['?', '#']).next().unwrap_or(uri);
    match without_query.find("://") {
        Some(pos) => &without_query[pos + 3..],
        None => without_query,
    }
}

/// Human-readable size string for the block page.
pub fn human_size(bytes: u64) -> String {
    const UNITS: &[(&str, u64)] = &[("GB", 1 << 30), ("MB", 1 << 20), ("KB", 1 << 10)];
    for (unit, scale) in UNITS {
        if bytes >= *scale {
            return format!("{:.1} {}", bytes as f64 / *scale as f64, unit);
        }
    }
    format!("{bytes} B")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn gate_bypasses_unlisted_extension() {
        let process = exts(&["pdf", "exe"]);
        let bypass = exts(&[]);
        assert_eq!(gate("txt", &process, &bypass), GateDecision::Bypass);
        assert_eq!(gate("pdf", &process, &bypass), GateDecision::Process);
    }

    #[test]
    fn gate_wildcard_process_unless_bypassed() {
        let process = exts(&["*"]);
        let bypass = exts(&["txt"]);
        assert_eq!(gate("exe", &process, &bypass), GateDecision::Process);
        assert_eq!(gate("txt", &process, &bypass), GateDecision::Bypass);
    }

    #[test]
    fn gate_wildcard_bypass_unless_processed() {
        let process = exts(&["pdf"]);
        let bypass = exts(&["*"]);
        assert_eq!(gate("pdf", &process, &bypass), GateDecision::Process);
        assert_eq!(gate("doc", &process, &bypass), GateDecision::Bypass);
    }

    #[test]
    fn gate_wildcard_on_both_sides_processes() {
        let process = exts(&["*"]);
        let bypass = exts(&["*"]);
        assert_eq!(gate("exe", &process, &bypass), GateDecision::Process);
    }

    #[test]
    fn gate_is_asymmetric() {
        let a = exts(&["pdf"]);
        let b = exts(&["*"]);
        assert_ne!(gate("doc", &a, &b), gate("doc", &b, &a));
    }

    #[test]
    fn gate_explicit_bypass_beats_explicit_process() {
        let process = exts(&["exe"]);
        let bypass = exts(&["exe"]);
        assert_eq!(gate("exe", &process, &bypass), GateDecision::Bypass);
    }

    #[test]
    fn sniff_recognizes_binaries() {
        assert_eq!(sniff_extension(b"%PDF-1.7 ..."), "pdf");
        assert_eq!(sniff_extension(b"MZ\x90\x00"), "exe");
        assert_eq!(sniff_extension(b"PK\x03\x04rest"), "zip");
        assert_eq!(sniff_extension(&[0x89, b'P', b'N', b'G', 0x0D]), "png");
    }

    #[test]
    fn sniff_recognizes_text() {
        assert_eq!(sniff_extension(b"  <!DOCTYPE html><html>"), "html");
        assert_eq!(sniff_extension(b"plain words"), "txt");
        assert_eq!(sniff_extension(b"\xEF\xBB\xBF<html>"), "html");
    }

    #[test]
    fn sniff_falls_back_to_bin() {
        assert_eq!(sniff_extension(&[0x00, 0x01, 0x02, 0x03]), "bin");
    }

    #[test]
    fn file_name_and_ext_from_uri() {
        assert_eq!(file_name_from_uri("http://x/y/setup.EXE?v=1"), "setup.EXE");
        assert_eq!(file_ext_from_uri("http://x/y/setup.EXE?v=1"), "exe");
        assert_eq!(file_ext_from_uri("http://x/download"), "");
        assert_eq!(file_name_from_uri("http://x/"), "unknown");
        assert_eq!(file_name_from_uri(""), "unknown");
        assert_eq!(file_ext_from_uri("http://x/.hidden"), "");
    }

    #[test]
    fn human_size_units() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MB");
    }
}
