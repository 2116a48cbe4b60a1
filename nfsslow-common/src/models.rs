use crate::schema::SchemaVersion;
use crate::{NFS4_STATEID_OTHER_SIZE, SLOW_POINT_COUNT};
use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

/// Why an event is surfaced. Bit positions are shared with the probe program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct EmitReasons(u32);

impl EmitReasons {
    pub const SAMPLE: EmitReasons = EmitReasons(1 << 0);
    pub const SLOW: EmitReasons = EmitReasons(1 << 1);
    /// The OPEN reply carried a seqid above 1.
    pub const SEQID: EmitReasons = EmitReasons(1 << 2);
    /// `nfs4_state_mark_reclaim_nograce` marked the state for recovery.
    pub const RECLAIM_NOGRACE: EmitReasons = EmitReasons(1 << 3);
    pub const FILE: EmitReasons = EmitReasons(1 << 4);

    /// Reasons only the probe program can decide.
    pub const PROTOCOL: EmitReasons =
        EmitReasons(EmitReasons::SEQID.0 | EmitReasons::RECLAIM_NOGRACE.0);

    pub const fn empty() -> EmitReasons {
        EmitReasons(0)
    }

    pub const fn from_bits(bits: u32) -> EmitReasons {
        EmitReasons(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(&self, other: EmitReasons) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersection(self, other: EmitReasons) -> EmitReasons {
        EmitReasons(self.0 & other.0)
    }
}

impl BitOr for EmitReasons {
    type Output = EmitReasons;

    fn bitor(self, rhs: EmitReasons) -> EmitReasons {
        EmitReasons(self.0 | rhs.0)
    }
}

impl BitOrAssign for EmitReasons {
    fn bitor_assign(&mut self, rhs: EmitReasons) {
        self.0 |= rhs.0;
    }
}

/// One step of the call path: which probe point fired and how long after the
/// start of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPoint {
    pub id: u8,
    pub delta: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateId {
    pub seqid: u32,
    pub other: [u8; NFS4_STATEID_OTHER_SIZE],
    pub type_tag: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileHandle {
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NfsStateSnapshot {
    pub open_stateid: StateId,
    pub stateid: StateId,
    pub flags: u64,
    pub n_rdonly: u32,
    pub n_wronly: u32,
    pub n_rdwr: u32,
    /// `fmode_t` bits held on the server.
    pub fmode: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientSnapshot {
    pub cl_state: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOpenTask {
    pub enter_fh: FileHandle,
    pub enter_share_access: u32,
    pub enter_claim: u8,
    pub return_stateid: StateId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOpenStateid {
    pub open_stateid: StateId,
    pub state: NfsStateSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReclaimNograce {
    pub enter_state: NfsStateSnapshot,
    pub return_state: NfsStateSnapshot,
    pub executed: bool,
    pub result: u32,
}

/// Kernel objects captured along the open path (schema v2 and later).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OpenSnapshots {
    pub run_open_task: RunOpenTask,
    pub opendata_to_nfs4_state: StateId,
    pub update_open_stateid: UpdateOpenStateid,
    pub reclaim_nograce: ReclaimNograce,
    pub wait_clnt_recover: ClientSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub schema: SchemaVersion,
    /// Kernel monotonic clock at `nfs4_file_open` entry, in microseconds.
    pub timestamp_us: u64,
    pub duration: Duration,
    pub call_path: Vec<CallPoint>,
    pub call_counts: [u8; SLOW_POINT_COUNT],
    pub pid: u32,
    pub task: String,
    pub file: String,
    pub snapshots: Option<OpenSnapshots>,
    /// Reasons set by the probe program.
    pub reasons: EmitReasons,
}

impl Event {
    pub fn call_count(&self, id: u8) -> u8 {
        self.call_counts.get(id as usize).copied().unwrap_or(0)
    }
}
