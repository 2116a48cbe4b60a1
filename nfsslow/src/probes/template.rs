use crate::config::SlowConfig;
use crate::errors::SlowError;
use nfsslow_common::{SchemaVersion, DNAME_INLINE_LEN};
use std::io::Write;
use tracing::warn;

/// Probe program for the NFSv4 open path, with `/*NAME*/` placeholders.
pub(crate) const NFS4_OPEN_TEMPLATE: &str = include_str!("../../../probes/nfs4-open/trace.bpf.c");

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProbeParams {
    pub slow_threshold_ms: u64,
    pub sample_ratio: u64,
    pub file_name: String,
    pub schema: SchemaVersion,
    pub debug: bool,
}

impl ProbeParams {
    pub fn from_config(config: &SlowConfig) -> Result<ProbeParams, SlowError> {
        Ok(ProbeParams {
            slow_threshold_ms: config.tracing.slow_threshold_ms,
            sample_ratio: config.tracing.sample_ratio,
            file_name: config.tracing.file_name.clone(),
            schema: config.schema_version()?,
            debug: config.debug,
        })
    }

    fn placeholder(&self, name: &str) -> Option<String> {
        match name {
            "SLOW_THRESHOLD_MS" => Some(self.slow_threshold_ms.to_string()),
            "SAMPLE_RATIO" => Some(self.sample_ratio.to_string()),
            "FILE_NAME" => Some(c_escape(&self.file_name)),
            "SCHEMA_VERSION" => Some(self.schema.number().to_string()),
            _ => None,
        }
    }
}

/// Renders the NFSv4 open probe program. In debug mode the result is also
/// written to stderr.
pub(crate) fn render_program(params: &ProbeParams) -> String {
    // d_iname holds at most 31 bytes before its NUL
    if params.file_name.len() >= DNAME_INLINE_LEN {
        warn!(target: "error", "File name {:?} is longer than {} bytes and will never match",
            params.file_name, DNAME_INLINE_LEN - 1);
    }

    let source = render(NFS4_OPEN_TEMPLATE, params);
    if params.debug {
        if let Err(e) = dump_program(&mut std::io::stderr().lock(), &source) {
            warn!(target: "error", "Could not dump probe program. Err: {}", e);
        }
    }
    source
}

fn dump_program(out: &mut impl Write, source: &str) -> std::io::Result<()> {
    out.write_all(source.as_bytes())?;
    out.flush()
}

/// Replaces every known `/*NAME*/` placeholder in one left to right pass.
/// Substituted text is not scanned again and unknown placeholders are kept.
pub(crate) fn render(template: &str, params: &ProbeParams) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let name_len = after
            .find(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..name_len];

        match params.placeholder(name) {
            Some(value) if after[name_len..].starts_with("*/") => {
                out.push_str(&value);
                rest = &after[name_len + 2..];
            }
            _ => {
                out.push_str("/*");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Escapes `s` for the inside of a C string literal.
fn c_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            // octal escapes stop after three digits, hex ones do not
            _ => out.push_str(&format!("\\{:03o}", b)),
        }
    }
    out
}
