use crate::errors::SlowError;
use clap::Parser;
use config::{Config, File, FileFormat};
use nfsslow_common::SchemaVersion;
use std::env;

#[derive(Parser, Debug, Default)]
#[command(name = "nfsslow")]
#[command(about = "Reports slow NFSv4 opens, traced with kprobes on the client open path")]
#[command(version)]
pub(crate) struct Cli {
    /// Report opens slower than this many milliseconds
    #[arg(short = 't', long)]
    pub slow_threshold_ms: Option<u64>,

    /// Report one in N opens regardless of latency, 0 disables sampling
    #[arg(short = 'r', long)]
    pub sample_ratio: Option<u64>,

    /// Always report opens of this file name
    #[arg(short = 'f', long)]
    pub file_name: Option<String>,

    /// Verifier log level passed to the kernel when loading the program
    #[arg(long)]
    pub bpf_debug: Option<u32>,

    /// Print the rendered probe program and every decoded event
    #[arg(long)]
    pub debug: bool,

    /// Compile and load the probe program, then exit without attaching
    #[arg(long)]
    pub quit: bool,

    /// Record layout compiled into the probe program (v1, v2)
    #[arg(long)]
    pub schema: Option<String>,

    /// Directory holding config.json5, defaults to $CONFIG_DIR or config/
    #[arg(long)]
    pub config_dir: Option<String>,
}

#[derive(Debug, Default, serde_derive::Deserialize, PartialEq, Eq)]
pub(crate) struct SlowLogEntry {
    pub enable: bool,
    pub target: String,
    pub directory: Option<String>,
    pub prefix: Option<String>,
    pub rotation: Option<String>,
    pub max_files: Option<usize>,
    pub format: Option<String>,
}

#[derive(Debug, Default, serde_derive::Deserialize, PartialEq, Eq)]
pub(crate) struct SlowLogsConfig {
    pub default: SlowLogEntry,
    pub errors: Option<SlowLogEntry>,
    pub events: Option<SlowLogEntry>,
}

#[derive(Debug, Default, serde_derive::Deserialize, PartialEq, Eq)]
pub(crate) struct TracingConfig {
    pub slow_threshold_ms: u64,
    pub sample_ratio: u64,
    pub file_name: String,
    pub schema: String,
    pub queue_capacity: usize,
    /// Pages per CPU for each perf buffer, must be a power of two.
    pub perf_pages: usize,
}

#[derive(Debug, Default, serde_derive::Deserialize, PartialEq, Eq)]
pub(crate) struct ProbesConfig {
    pub clang: String,
    pub kernel_headers: Option<String>,
    pub bpf_debug: u32,
}

#[derive(Debug, Default, serde_derive::Deserialize, PartialEq, Eq)]
pub(crate) struct SlowConfig {
    pub debug: bool,
    pub quit: bool,
    pub tracing: TracingConfig,
    pub probes: ProbesConfig,
    pub logs: SlowLogsConfig,
}

impl SlowConfig {
    pub fn schema_version(&self) -> Result<SchemaVersion, SlowError> {
        let mut name = self.tracing.schema.clone();
        let version = SchemaVersion::from_str(name.as_mut_str());
        if version.is_undefined() {
            return Err(SlowError::InvalidAttribute {
                attribute: "tracing.schema",
                value: self.tracing.schema.clone(),
            });
        }
        Ok(version)
    }
}

pub(crate) fn config_dir(cli: &Cli) -> String {
    let mut config_dir = match &cli.config_dir {
        Some(dir) => dir.clone(),
        None => env::var("CONFIG_DIR").unwrap_or_else(|_| "config/".into()),
    };
    if !config_dir.ends_with('/') {
        config_dir.push('/');
    }
    config_dir
}

pub(crate) fn load_config(cli: &Cli) -> Result<SlowConfig, anyhow::Error> {
    let config_dir = config_dir(cli);

    let config = Config::builder()
        .set_default("debug", false)?
        .set_default("quit", false)?
        .set_default("tracing.slow_threshold_ms", 100u64)?
        .set_default("tracing.sample_ratio", 1000u64)?
        .set_default("tracing.file_name", "")?
        .set_default("tracing.schema", "v2")?
        .set_default("tracing.queue_capacity", 8192u64)?
        .set_default("tracing.perf_pages", 64u64)?
        .set_default("probes.clang", "clang")?
        .set_default("probes.bpf_debug", 0u64)?
        .set_default("logs.default.enable", true)?
        .set_default("logs.default.target", "stderr")?
        .add_source(
            File::new(&format!("{}config.json5", config_dir), FileFormat::Json5).required(false),
        )
        .set_override_option("tracing.slow_threshold_ms", cli.slow_threshold_ms)?
        .set_override_option("tracing.sample_ratio", cli.sample_ratio)?
        .set_override_option("tracing.file_name", cli.file_name.clone())?
        .set_override_option("tracing.schema", cli.schema.clone())?
        .set_override_option("probes.bpf_debug", cli.bpf_debug.map(u64::from))?
        .set_override_option("debug", cli.debug.then_some(true))?
        .set_override_option("quit", cli.quit.then_some(true))?
        .build()?;

    let conf: SlowConfig = config.try_deserialize()?;
    if conf.tracing.queue_capacity == 0 {
        return Err(SlowError::InvalidAttribute {
            attribute: "tracing.queue_capacity",
            value: "0".to_string(),
        }
        .into());
    }

    Ok(conf)
}
