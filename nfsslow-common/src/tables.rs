//! Names for the kernel bitmasks and enums carried in a record.

use crate::errors::TableError;
use crate::flags::{decode_enum, FlagTable32, FlagTable64};

/// `nfs4_state.flags` bit numbers.
pub const STATE_FLAGS: &[&str] = &[
    "LK_STATE_IN_USE",
    "NFS_DELEGATED_STATE",
    "NFS_OPEN_STATE",
    "NFS_O_RDONLY_STATE",
    "NFS_O_WRONLY_STATE",
    "NFS_O_RDWR_STATE",
    "NFS_STATE_RECLAIM_REBOOT",
    "NFS_STATE_RECLAIM_NOGRACE",
    "NFS_STATE_POSIX_LOCKS",
    "NFS_STATE_RECOVERY_FAILED",
    "NFS_STATE_MAY_NOTIFY_LOCK",
    "NFS_STATE_CHANGE_WAIT",
    "NFS_CLNT_DST_SSC_COPY_STATE",
];

/// `fmode_t` bits. Unassigned positions are left empty.
pub const FMODE_FLAGS: &[&str] = &[
    "FMODE_READ",
    "FMODE_WRITE",
    "FMODE_LSEEK",
    "FMODE_PREAD",
    "FMODE_PWRITE",
    "FMODE_EXEC",
    "FMODE_NDELAY",
    "FMODE_EXCL",
    "FMODE_WRITE_IOCTL",
    "FMODE_32BITHASH",
    "FMODE_64BITHASH",
    "FMODE_NOCMTIME",
    "FMODE_RANDOM",
    "FMODE_UNSIGNED_OFFSET",
    "FMODE_PATH",
    "FMODE_ATOMIC_POS",
    "FMODE_WRITER",
    "FMODE_CAN_READ",
    "FMODE_CAN_WRITE",
    "FMODE_OPENED",
    "FMODE_CREATED",
    "FMODE_STREAM",
    "",
    "",
    "",
    "",
    "FMODE_NONOTIFY",
    "FMODE_NOWAIT",
    "FMODE_NEED_UNMOUNT",
    "FMODE_NOACCOUNT",
];

/// `nfs_client.cl_state` bit numbers.
pub const CLIENT_STATES: &[&str] = &[
    "NFS4CLNT_MANAGER_RUNNING",
    "NFS4CLNT_CHECK_LEASE",
    "NFS4CLNT_LEASE_EXPIRED",
    "NFS4CLNT_RECLAIM_REBOOT",
    "NFS4CLNT_RECLAIM_NOGRACE",
    "NFS4CLNT_DELEGRETURN",
    "NFS4CLNT_SESSION_RESET",
    "NFS4CLNT_LEASE_CONFIRM",
    "NFS4CLNT_SERVER_SCOPE_MISMATCH",
    "NFS4CLNT_PURGE_STATE",
    "NFS4CLNT_BIND_CONN_TO_SESSION",
    "NFS4CLNT_MOVED",
    "NFS4CLNT_LEASE_MOVED",
    "NFS4CLNT_DELEGATION_EXPIRED",
    "NFS4CLNT_RUN_MANAGER",
    "NFS4CLNT_DELEGRETURN_RUNNING",
];

/// Matches the bits of [`crate::EmitReasons`].
pub const EMIT_REASONS: &[&str] = &[
    "SAMPLE",
    "SLOW",
    "SEQID",
    "RECLAIM_NOGRACE",
    "FILE",
];

pub const STATEID_TYPES: &[&str] = &[
    "NFS4_INVALID_STATEID_TYPE",
    "NFS4_SPECIAL_STATEID_TYPE",
    "NFS4_OPEN_STATEID_TYPE",
    "NFS4_LOCK_STATEID_TYPE",
    "NFS4_DELEGATION_STATEID_TYPE",
    "NFS4_LAYOUT_STATEID_TYPE",
    "NFS4_PNFS_DS_STATEID_TYPE",
    "NFS4_REVOKED_STATEID_TYPE",
];

pub const OPEN_CLAIMS: &[&str] = &[
    "NFS4_OPEN_CLAIM_NULL",
    "NFS4_OPEN_CLAIM_PREVIOUS",
    "NFS4_OPEN_CLAIM_DELEGATE_CUR",
    "NFS4_OPEN_CLAIM_DELEGATE_PREV",
    "NFS4_OPEN_CLAIM_FH",
    "NFS4_OPEN_CLAIM_DELEG_CUR_FH",
    "NFS4_OPEN_CLAIM_DELEG_PREV_FH",
];

/// Lower four bits of `share_access`. Zero is not a valid access mode.
pub const SHARE_ACCESS: &[&str] = &[
    "",
    "NFS4_SHARE_ACCESS_READ",
    "NFS4_SHARE_ACCESS_WRITE",
    "NFS4_SHARE_ACCESS_BOTH",
];

/// Bits 8..16 of `share_access`.
pub const SHARE_WANTS: &[&str] = &[
    "NFS4_SHARE_WANT_NO_PREFERENCE",
    "NFS4_SHARE_WANT_READ_DELEG",
    "NFS4_SHARE_WANT_WRITE_DELEG",
    "NFS4_SHARE_WANT_ANY_DELEG",
    "NFS4_SHARE_WANT_NO_DELEG",
    "NFS4_SHARE_WANT_CANCEL",
];

/// Every bitmask table, validated against its field width.
#[derive(Debug, Clone, Copy)]
pub struct LabelTables {
    pub state_flags: FlagTable64,
    pub fmode: FlagTable32,
    pub client_state: FlagTable64,
    pub reasons: FlagTable32,
}

impl LabelTables {
    pub fn load() -> Result<LabelTables, TableError> {
        Ok(LabelTables {
            state_flags: FlagTable64::new("nfs4_state.flags", STATE_FLAGS)?,
            fmode: FlagTable32::new("fmode_t", FMODE_FLAGS)?,
            client_state: FlagTable64::new("nfs_client.cl_state", CLIENT_STATES)?,
            reasons: FlagTable32::new("reason", EMIT_REASONS)?,
        })
    }
}

pub fn stateid_type(type_tag: u32) -> String {
    decode_enum(type_tag as u64, STATEID_TYPES)
}

pub fn open_claim(claim: u8) -> String {
    decode_enum(claim as u64, OPEN_CLAIMS)
}

/// Splits `share_access` into its access mode and delegation want.
pub fn share_access(value: u32) -> Vec<String> {
    let access = (value & 0x0000_000f) as u64;
    let want = ((value & 0x0000_ff00) >> 8) as u64;

    [(access, SHARE_ACCESS), (want, SHARE_WANTS)]
        .into_iter()
        .map(|(v, names)| match decode_enum(v, names) {
            name if name.is_empty() => format!("UNKNOWN_TYPE: {}", v),
            name => name,
        })
        .collect()
}
