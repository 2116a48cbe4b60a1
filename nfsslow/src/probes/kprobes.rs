use crate::config::SlowConfig;
use crate::errors::SlowError;
use crate::loader::ProbeBackend;
use crate::tracker::RecordSender;
use anyhow::{anyhow, Context};
use aya::maps::perf::AsyncPerfEventArray;
use aya::programs::KProbe;
use aya::util::online_cpus;
use aya::{Bpf, BpfLoader, VerifierLogLevel};
use bytes::BytesMut;
use nfsslow_common::points::PointKind;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Turns probe program text into a BPF object with clang, against the
/// headers of the running kernel.
#[derive(Debug, Clone)]
pub(crate) struct ProbeCompiler {
    clang: String,
    kernel_headers: PathBuf,
    arch: &'static str,
}

/// Kernel `arch/` directory for the host.
fn kernel_arch() -> Result<&'static str, SlowError> {
    match std::env::consts::ARCH {
        "x86_64" => Ok("x86"),
        "aarch64" => Ok("arm64"),
        other => Err(SlowError::InvalidAttribute {
            attribute: "Unsupported architecture",
            value: other.to_string(),
        }),
    }
}

impl ProbeCompiler {
    pub fn from_config(config: &SlowConfig) -> Result<ProbeCompiler, anyhow::Error> {
        let kernel_headers = match &config.probes.kernel_headers {
            Some(dir) => PathBuf::from(dir),
            None => {
                let release = fs::read_to_string("/proc/sys/kernel/osrelease")
                    .context("reading kernel release")?;
                PathBuf::from(format!("/lib/modules/{}/build", release.trim()))
            }
        };

        Ok(ProbeCompiler {
            clang: config.probes.clang.clone(),
            kernel_headers,
            arch: kernel_arch()?,
        })
    }

    fn args(&self) -> Vec<String> {
        let h = self.kernel_headers.display();
        let arch = self.arch;
        let mut args: Vec<String> = [
            "-nostdinc",
            "-D__KERNEL__",
            "-D__BPF_TRACING__",
            "-D__ASM_SYSREG_H",
            "-Dasm_inline=asm",
            "-Wno-unused-value",
            "-Wno-pointer-sign",
            "-Wno-compare-distinct-pointer-types",
            "-Wno-gnu-variable-sized-type-not-at-end",
            "-Wno-address-of-packed-member",
            "-Wno-tautological-compare",
            "-Wno-unknown-warning-option",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push(format!("-D__TARGET_ARCH_{}", arch));
        for dir in [
            format!("{}/arch/{}/include", h, arch),
            format!("{}/arch/{}/include/generated", h, arch),
            format!("{}/include", h),
            format!("{}/arch/{}/include/uapi", h, arch),
            format!("{}/arch/{}/include/generated/uapi", h, arch),
            format!("{}/include/uapi", h),
            format!("{}/include/generated/uapi", h),
        ] {
            args.push(format!("-I{}", dir));
        }
        args.push("-include".to_string());
        args.push(format!("{}/include/linux/kconfig.h", h));
        // libbpf's bpf_helpers.h comes from the system include dir
        args.push("-idirafter".to_string());
        args.push("/usr/include".to_string());

        for a in ["-O2", "-g", "-target", "bpf", "-c", "-x", "c", "-", "-o", "-"] {
            args.push(a.to_string());
        }
        args
    }

    pub fn compile(&self, source: &str) -> Result<Vec<u8>, SlowError> {
        debug!("Compiling probe program with {}", self.clang);

        let mut child = Command::new(&self.clang)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SlowError::Compile(format!("could not run {}: {}", self.clang, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(source.as_bytes())
                .map_err(|e| SlowError::Compile(format!("could not write source: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| SlowError::Compile(e.to_string()))?;
        if !output.status.success() {
            return Err(SlowError::Compile(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(output.stdout)
    }
}

/// Live kernel backend on top of aya.
pub(crate) struct KprobeBackend {
    bpf: Bpf,
    record_len: usize,
    perf_pages: usize,
    cancel: CancellationToken,
}

impl KprobeBackend {
    /// `bpf_debug` goes to the verifier untouched.
    pub fn load(
        object: &[u8],
        bpf_debug: u32,
        record_len: usize,
        perf_pages: usize,
        cancel: CancellationToken,
    ) -> Result<KprobeBackend, anyhow::Error> {
        let bpf = BpfLoader::new()
            .verifier_log_level(VerifierLogLevel::from_bits_truncate(bpf_debug))
            .load(object)
            .context("loading probe program")?;

        Ok(KprobeBackend {
            bpf,
            record_len,
            perf_pages,
            cancel,
        })
    }
}

impl ProbeBackend for KprobeBackend {
    fn attach_probe(
        &mut self,
        program: &str,
        function: &str,
        _kind: PointKind,
    ) -> Result<(), anyhow::Error> {
        let probe: &mut KProbe = self
            .bpf
            .program_mut(program)
            .ok_or_else(|| anyhow!("program {} missing from object", program))?
            .try_into()?;
        probe.load()?;
        probe.attach(function, 0)?;
        Ok(())
    }

    fn open_events(&mut self, output: RecordSender) -> Result<(), anyhow::Error> {
        let mut events: AsyncPerfEventArray<_> = self
            .bpf
            .take_map("events")
            .ok_or_else(|| anyhow!("events map missing from object"))?
            .try_into()?;

        for cpu_id in online_cpus()? {
            let mut buf = events.open(cpu_id, Some(self.perf_pages))?;
            let output = output.clone();
            let cancel = self.cancel.clone();
            let record_len = self.record_len;

            tokio::spawn(async move {
                let mut buffers = (0..16)
                    .map(|_| BytesMut::with_capacity(record_len))
                    .collect::<Vec<_>>();

                loop {
                    let events = tokio::select! {
                        _ = cancel.cancelled() => break,
                        r = buf.read_events(&mut buffers) => r,
                    };

                    let events = match events {
                        Ok(e) => e,
                        Err(e) => {
                            error!(target: "error", "Perf buffer on cpu {} failed. Err: {}", cpu_id, e);
                            break;
                        }
                    };
                    if events.lost > 0 {
                        error!(target: "error", "Lost {} records on cpu {}", events.lost, cpu_id);
                    }
                    for b in buffers.iter_mut().take(events.read) {
                        output.push(b.split().freeze());
                    }
                }
            });
        }
        Ok(())
    }
}
