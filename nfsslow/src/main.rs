extern crate serde_derive;

mod config;
mod errors;
mod loader;
mod logs;
mod probes;
mod tracker;

use clap::Parser;
use errors::SlowError;
use loader::{Attached, EbpfLoader};
use logs::SlowLogs;
use nfsslow_common::RecordDecoder;
use probes::kprobes::{KprobeBackend, ProbeCompiler};
use probes::template::{render_program, ProbeParams};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracker::classifier::Classifier;
use tracker::report::TracingSink;
use tracker::{record_queue, EventTracker};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = config::Cli::parse();
    let config = config::load_config(&cli)?;

    let _logs = SlowLogs::new(&config)?;

    // Bump the memlock rlimit. This is needed for older kernels that don't use the
    // new memcg based accounting, see https://lwn.net/Articles/837122/
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {}", ret);
    }

    let params = ProbeParams::from_config(&config)?;
    let decoder = RecordDecoder::new(params.schema).map_err(SlowError::from)?;
    let record_len = decoder.record_len();
    let event_tracker = EventTracker::new(
        decoder,
        Classifier::from_config(&config),
        Box::new(TracingSink),
        config.debug,
    )?;

    let source = render_program(&params);
    let compiler = ProbeCompiler::from_config(&config)?;
    let object = match compiler.compile(&source) {
        Ok(o) => o,
        Err(e) => {
            error!(target: "error", "{}", e);
            return Err(e.into());
        }
    };

    let cancel = CancellationToken::new();
    let mut backend = KprobeBackend::load(
        &object,
        config.probes.bpf_debug,
        record_len,
        config.tracing.perf_pages,
        cancel.clone(),
    )?;

    let (snd, rx) = record_queue(config.tracing.queue_capacity);
    match EbpfLoader::new(config.quit).attach(&mut backend, snd) {
        Ok(Attached::DryRun) => return Ok(()),
        Ok(Attached::Running { probes }) => debug!("{} probes attached", probes),
        Err(e) => {
            error!(target: "error", "{:#}", e);
            return Err(e);
        }
    }

    let consumer = tokio::spawn(event_tracker.run(rx, cancel.clone()));

    info!(
        "Tracing NFSv4 opens ({} layout, slow >= {} ms, 1 in {} sampled). Waiting for Ctrl-C...",
        params.schema, params.slow_threshold_ms, params.sample_ratio
    );
    signal::ctrl_c().await?;
    info!("Exiting...");

    cancel.cancel();
    consumer.await?;
    drop(backend);

    Ok(())
}
