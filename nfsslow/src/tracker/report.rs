use chrono::{DateTime, SecondsFormat, Utc};
use nfsslow_common::models::{FileHandle, NfsStateSnapshot, OpenSnapshots, StateId};
use nfsslow_common::points::point_label;
use nfsslow_common::tables::{self, LabelTables};
use nfsslow_common::{EmitReasons, Event};
use serde_derive::Serialize;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct CallPointReport {
    pub id: u8,
    pub point: String,
    pub delta_us: u64,
    /// Times this point fired during the request.
    pub total: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct CallCountReport {
    pub id: u8,
    pub point: String,
    pub count: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct StateIdReport {
    pub seqid: u32,
    pub other: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct StateReport {
    pub open_stateid: StateIdReport,
    pub stateid: StateIdReport,
    pub flags: Vec<String>,
    pub n_rdonly: u32,
    pub n_wronly: u32,
    pub n_rdwr: u32,
    pub state: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct RunOpenTaskReport {
    pub fh: String,
    pub share_access: Vec<String>,
    pub claim: String,
    pub stateid: StateIdReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct UpdateOpenStateidReport {
    pub open_stateid: StateIdReport,
    pub state: StateReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ReclaimNograceReport {
    pub executed: bool,
    pub result: u32,
    pub enter_state: StateReport,
    pub return_state: StateReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct SnapshotsReport {
    pub run_open_task: RunOpenTaskReport,
    pub opendata_to_nfs4_state: StateIdReport,
    pub update_open_stateid: UpdateOpenStateidReport,
    pub state_mark_reclaim_nograce: ReclaimNograceReport,
    pub cl_state: Vec<String>,
}

/// Everything logged for one accepted open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct EventReport {
    pub start: String,
    pub duration_us: u64,
    pub pid: u32,
    pub task: String,
    pub file: String,
    pub reasons: Vec<String>,
    pub call_path: Vec<CallPointReport>,
    pub call_counts: Vec<CallCountReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshots: Option<SnapshotsReport>,
}

fn hex_bytes(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn stateid_report(stateid: &StateId) -> StateIdReport {
    StateIdReport {
        seqid: stateid.seqid,
        other: hex_bytes(&stateid.other),
        type_name: tables::stateid_type(stateid.type_tag),
    }
}

fn fh_report(fh: &FileHandle) -> String {
    hex_bytes(&fh.data)
}

fn state_report(state: &NfsStateSnapshot, tables: &LabelTables) -> StateReport {
    StateReport {
        open_stateid: stateid_report(&state.open_stateid),
        stateid: stateid_report(&state.stateid),
        flags: tables.state_flags.decode(state.flags),
        n_rdonly: state.n_rdonly,
        n_wronly: state.n_wronly,
        n_rdwr: state.n_rdwr,
        state: tables.fmode.decode(state.fmode as u64),
    }
}

fn snapshots_report(snapshots: &OpenSnapshots, tables: &LabelTables) -> SnapshotsReport {
    let run = &snapshots.run_open_task;
    let update = &snapshots.update_open_stateid;
    let reclaim = &snapshots.reclaim_nograce;

    SnapshotsReport {
        run_open_task: RunOpenTaskReport {
            fh: fh_report(&run.enter_fh),
            share_access: tables::share_access(run.enter_share_access),
            claim: tables::open_claim(run.enter_claim),
            stateid: stateid_report(&run.return_stateid),
        },
        opendata_to_nfs4_state: stateid_report(&snapshots.opendata_to_nfs4_state),
        update_open_stateid: UpdateOpenStateidReport {
            open_stateid: stateid_report(&update.open_stateid),
            state: state_report(&update.state, tables),
        },
        state_mark_reclaim_nograce: ReclaimNograceReport {
            executed: reclaim.executed,
            result: reclaim.result,
            enter_state: state_report(&reclaim.enter_state, tables),
            return_state: state_report(&reclaim.return_state, tables),
        },
        cl_state: tables
            .client_state
            .decode(snapshots.wait_clnt_recover.cl_state),
    }
}

impl EventReport {
    /// `received_at` is when user space saw the record; the open started
    /// `duration` earlier.
    pub fn build(
        event: &Event,
        reasons: EmitReasons,
        tables: &LabelTables,
        received_at: DateTime<Utc>,
    ) -> EventReport {
        let start = chrono::Duration::from_std(event.duration)
            .ok()
            .and_then(|d| received_at.checked_sub_signed(d))
            .unwrap_or(received_at);

        let call_path = event
            .call_path
            .iter()
            .map(|p| CallPointReport {
                id: p.id,
                point: point_label(p.id),
                delta_us: p.delta.as_micros() as u64,
                total: event.call_count(p.id),
            })
            .collect();

        let call_counts = event
            .call_counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count != 0)
            .map(|(id, count)| CallCountReport {
                id: id as u8,
                point: point_label(id as u8),
                count: *count,
            })
            .collect();

        EventReport {
            start: start.to_rfc3339_opts(SecondsFormat::Micros, true),
            duration_us: event.duration.as_micros() as u64,
            pid: event.pid,
            task: event.task.clone(),
            file: event.file.clone(),
            reasons: tables.reasons.decode(reasons.bits() as u64),
            call_path,
            call_counts,
            snapshots: event
                .snapshots
                .as_ref()
                .map(|s| snapshots_report(s, tables)),
        }
    }
}

/// Destination for accepted events.
pub(crate) trait ReportSink: Send {
    fn report(&mut self, report: &EventReport);
}

/// Writes each report as one `event` target log line.
pub(crate) struct TracingSink;

impl ReportSink for TracingSink {
    fn report(&mut self, report: &EventReport) {
        let call_path = match serde_json::to_string(&report.call_path) {
            Ok(s) => s,
            Err(e) => {
                error!(target: "error", "Could not serialize call path. Err: {}", e);
                return;
            }
        };
        let snapshots = match report.snapshots.as_ref().map(serde_json::to_string).transpose() {
            Ok(s) => s.unwrap_or_default(),
            Err(e) => {
                error!(target: "error", "Could not serialize snapshots. Err: {}", e);
                return;
            }
        };

        info!(target: "event", start = report.start, duration_us = report.duration_us, pid = report.pid, task = report.task, file = report.file, reasons = report.reasons.join("|"), call_path = call_path, snapshots = snapshots);
    }
}
