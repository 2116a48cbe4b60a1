//! Kernel functions instrumented on the NFSv4 open path.
//!
//! Every function gets an entry and a return probe. The ids are the call-path
//! ids the probe program records for each of them and must stay in sync with
//! the `enter__*`/`return__*` handlers in `trace.bpf.c`.

use crate::errors::TableError;
use crate::SLOW_POINT_COUNT;
use std::collections::HashSet;
use std::fmt;

/// Opens and closes a traced request; it records no call-path id.
pub const OPEN_FUNCTION: &str = "nfs4_file_open";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePoint {
    pub function: &'static str,
    pub entry_id: u8,
    pub return_id: u8,
}

const fn point(function: &'static str, entry_id: u8, return_id: u8) -> ProbePoint {
    ProbePoint {
        function,
        entry_id,
        return_id,
    }
}

//  nfs4_atomic_open
//    nfs4_client_recover_expired_lease
//      nfs4_wait_clnt_recover
//        prepare_to_wait / nfs_wait_bit_killable / finish_wait
//        nfs_put_client
//      nfs4_schedule_state_manager
//    nfs4_opendata_alloc
//    nfs4_run_open_task
//    _nfs4_proc_open_confirm
//    _nfs4_opendata_to_nfs4_state
//      nfs4_get_open_state
//        __nfs4_find_state_byowner
//      update_open_stateid
//        nfs_state_log_update_open_stateid
//        nfs4_state_mark_reclaim_nograce
//        update_open_stateflags
pub const PROBE_POINTS: &[ProbePoint] = &[
    point("nfs4_atomic_open", 0, 17),
    point("nfs4_client_recover_expired_lease", 1, 6),
    point("nfs4_wait_clnt_recover", 2, 5),
    point("nfs_put_client", 3, 4),
    point("nfs4_opendata_alloc", 28, 29),
    point("nfs4_run_open_task", 30, 31),
    point("_nfs4_proc_open_confirm", 34, 35),
    point("_nfs4_opendata_to_nfs4_state", 32, 33),
    point("nfs4_get_open_state", 24, 27),
    point("__nfs4_find_state_byowner", 25, 26),
    point("update_open_stateid", 7, 16),
    point("nfs_state_log_update_open_stateid", 12, 13),
    point("prepare_to_wait", 8, 9),
    point("finish_wait", 10, 11),
    point("nfs4_state_mark_reclaim_nograce", 22, 23),
    point("nfs4_schedule_state_manager", 20, 21),
    point("update_open_stateflags", 14, 15),
    point("nfs_wait_bit_killable", 18, 19),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointKind {
    Enter,
    Return,
}

impl fmt::Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointKind::Enter => f.write_str("enter"),
            PointKind::Return => f.write_str("return"),
        }
    }
}

pub fn lookup(id: u8) -> Option<(&'static str, PointKind)> {
    PROBE_POINTS.iter().find_map(|p| {
        if p.entry_id == id {
            Some((p.function, PointKind::Enter))
        } else if p.return_id == id {
            Some((p.function, PointKind::Return))
        } else {
            None
        }
    })
}

/// `"enter nfs4_run_open_task"`, or `"point 47"` for ids with no function.
pub fn point_label(id: u8) -> String {
    match lookup(id) {
        Some((function, kind)) => format!("{} {}", kind, function),
        None => format!("point {}", id),
    }
}

pub fn validate(points: &[ProbePoint]) -> Result<(), TableError> {
    let mut functions = HashSet::new();
    let mut ids = HashSet::new();

    for p in points {
        if p.function == OPEN_FUNCTION {
            return Err(TableError::Catalogue(format!(
                "{} is attached separately",
                OPEN_FUNCTION
            )));
        }
        if !functions.insert(p.function) {
            return Err(TableError::Catalogue(format!(
                "{} listed twice",
                p.function
            )));
        }
        for id in [p.entry_id, p.return_id] {
            if id as usize >= SLOW_POINT_COUNT {
                return Err(TableError::Catalogue(format!(
                    "{} uses id {}, counters stop at {}",
                    p.function, id, SLOW_POINT_COUNT
                )));
            }
            if !ids.insert(id) {
                return Err(TableError::Catalogue(format!(
                    "id {} used twice ({})",
                    id, p.function
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_is_valid() {
        validate(PROBE_POINTS).unwrap();
    }

    #[test]
    fn duplicate_function_is_rejected() {
        let points = [point("a", 0, 1), point("a", 2, 3)];
        assert!(validate(&points).is_err());
    }

    #[test]
    fn duplicate_or_large_id_is_rejected() {
        assert!(validate(&[point("a", 0, 1), point("b", 1, 2)]).is_err());
        assert!(validate(&[point("a", 0, 48)]).is_err());
        assert!(validate(&[point(OPEN_FUNCTION, 0, 1)]).is_err());
    }

    #[test]
    fn labels() {
        assert_eq!(point_label(30), "enter nfs4_run_open_task");
        assert_eq!(point_label(17), "return nfs4_atomic_open");
        assert_eq!(point_label(47), "point 47");
    }
}
