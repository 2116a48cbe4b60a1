use crate::errors::{MalformedRecord, SchemaError};
use crate::models::{
    CallPoint, ClientSnapshot, EmitReasons, Event, FileHandle, NfsStateSnapshot, OpenSnapshots,
    ReclaimNograce, RunOpenTask, StateId, UpdateOpenStateid,
};
use crate::schema::{ByteOrder, CompiledSchema, FieldType, SchemaVersion, Slot};
use crate::utils::str_from_buf_nul;
use crate::{CALL_ORDER_COUNT, NFS4_STATEID_OTHER_SIZE, NFS_MAXFHSIZE, SLOW_POINT_COUNT};
use std::time::Duration;

/// Turns raw perf samples into [`Event`]s under one fixed layout.
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    schema: CompiledSchema,
}

impl RecordDecoder {
    pub fn new(version: SchemaVersion) -> Result<RecordDecoder, SchemaError> {
        let schema = CompiledSchema::compile(&version.descriptor()?)?;
        Ok(RecordDecoder { schema })
    }

    pub fn record_len(&self) -> usize {
        self.schema.record_len()
    }

    pub fn decode(&self, data: &[u8]) -> Result<Event, MalformedRecord> {
        if data.len() != self.schema.record_len() {
            return Err(MalformedRecord::Length {
                observed: data.len(),
                expected: self.schema.record_len(),
            });
        }

        let view = RecordView {
            schema: &self.schema,
            data,
        };

        let order_index = view.unsigned("order_index")?;
        let steps = usize::try_from(order_index)
            .ok()
            .filter(|n| *n <= CALL_ORDER_COUNT)
            .ok_or_else(|| {
                MalformedRecord::field(
                    "order_index",
                    format!("{} exceeds {} call-order slots", order_index, CALL_ORDER_COUNT),
                )
            })?;

        let ids = view.unsigned_array("point_ids")?;
        let deltas = view.unsigned_array("point_deltas")?;
        let mut call_path = Vec::with_capacity(steps);
        for (id, delta) in ids.into_iter().zip(deltas).take(steps) {
            let id = u8::try_from(id)
                .ok()
                .filter(|id| (*id as usize) < SLOW_POINT_COUNT)
                .ok_or_else(|| {
                    MalformedRecord::field(
                        "point_ids",
                        format!("point id {} is not below {}", id, SLOW_POINT_COUNT),
                    )
                })?;
            call_path.push(CallPoint {
                id,
                delta: Duration::from_micros(delta),
            });
        }

        let mut call_counts = [0u8; SLOW_POINT_COUNT];
        let counts = view.unsigned_array("call_counts")?;
        for (slot, count) in call_counts.iter_mut().zip(counts) {
            *slot = narrow("call_counts", count)?;
        }

        let snapshots = match self.schema.version() {
            SchemaVersion::V2 => Some(view.open_snapshots()?),
            _ => None,
        };

        Ok(Event {
            schema: self.schema.version(),
            timestamp_us: view.unsigned("ts")?,
            duration: Duration::from_micros(view.unsigned("delta")?),
            call_path,
            call_counts,
            pid: view.narrow("pid")?,
            task: view.text("task")?,
            file: view.text("file")?,
            snapshots,
            reasons: EmitReasons::from_bits(view.narrow("reason")?),
        })
    }
}

struct RecordView<'a> {
    schema: &'a CompiledSchema,
    data: &'a [u8],
}

impl<'a> RecordView<'a> {
    fn slot(&self, path: &str) -> Result<(Slot, &'a [u8]), MalformedRecord> {
        let slot = *self
            .schema
            .slot(path)
            .ok_or_else(|| MalformedRecord::field(path, "not part of this schema"))?;
        let bytes = self
            .data
            .get(slot.offset..slot.offset + slot.width())
            .ok_or_else(|| MalformedRecord::field(path, "outside of the record"))?;
        Ok((slot, bytes))
    }

    fn unsigned(&self, path: &str) -> Result<u64, MalformedRecord> {
        let (slot, bytes) = self.slot(path)?;
        match slot.ty {
            FieldType::Unsigned(_) => read_unsigned(bytes, slot.order)
                .ok_or_else(|| MalformedRecord::field(path, "unsupported integer width")),
            _ => Err(MalformedRecord::field(path, "not an integer field")),
        }
    }

    fn narrow<T: TryFrom<u64>>(&self, path: &str) -> Result<T, MalformedRecord> {
        narrow(path, self.unsigned(path)?)
    }

    fn unsigned_array(&self, path: &str) -> Result<Vec<u64>, MalformedRecord> {
        let (slot, bytes) = self.slot(path)?;
        let elem = match slot.ty {
            FieldType::UnsignedArray { elem, .. } if elem > 0 => elem,
            _ => return Err(MalformedRecord::field(path, "not an integer array")),
        };
        bytes
            .chunks_exact(elem)
            .map(|chunk| {
                read_unsigned(chunk, slot.order)
                    .ok_or_else(|| MalformedRecord::field(path, "unsupported element width"))
            })
            .collect()
    }

    fn text(&self, path: &str) -> Result<String, MalformedRecord> {
        let (slot, bytes) = self.slot(path)?;
        match slot.ty {
            FieldType::Text(_) => Ok(str_from_buf_nul(bytes).into_owned()),
            _ => Err(MalformedRecord::field(path, "not a text field")),
        }
    }

    fn opaque(&self, path: &str) -> Result<&'a [u8], MalformedRecord> {
        let (slot, bytes) = self.slot(path)?;
        match slot.ty {
            FieldType::Opaque(_) => Ok(bytes),
            _ => Err(MalformedRecord::field(path, "not an opaque field")),
        }
    }

    fn stateid(&self, prefix: &str) -> Result<StateId, MalformedRecord> {
        let other_path = format!("{}.other", prefix);
        let other: [u8; NFS4_STATEID_OTHER_SIZE] = self
            .opaque(&other_path)?
            .try_into()
            .map_err(|_| MalformedRecord::field(&other_path, "unexpected width"))?;

        Ok(StateId {
            seqid: self.narrow(&format!("{}.seqid", prefix))?,
            other,
            type_tag: self.narrow(&format!("{}.type", prefix))?,
        })
    }

    fn state(&self, prefix: &str) -> Result<NfsStateSnapshot, MalformedRecord> {
        Ok(NfsStateSnapshot {
            open_stateid: self.stateid(&format!("{}.open_stateid", prefix))?,
            stateid: self.stateid(&format!("{}.stateid", prefix))?,
            flags: self.unsigned(&format!("{}.flags", prefix))?,
            n_rdonly: self.narrow(&format!("{}.n_rdonly", prefix))?,
            n_wronly: self.narrow(&format!("{}.n_wronly", prefix))?,
            n_rdwr: self.narrow(&format!("{}.n_rdwr", prefix))?,
            fmode: self.narrow(&format!("{}.state", prefix))?,
        })
    }

    fn file_handle(&self, prefix: &str) -> Result<FileHandle, MalformedRecord> {
        let size_path = format!("{}.size", prefix);
        let size = self.unsigned(&size_path)? as usize;
        if size > NFS_MAXFHSIZE {
            return Err(MalformedRecord::field(
                &size_path,
                format!("file handle size {} exceeds {}", size, NFS_MAXFHSIZE),
            ));
        }
        let data = self.opaque(&format!("{}.data", prefix))?;
        let data = data
            .get(..size)
            .ok_or_else(|| MalformedRecord::field(&size_path, "file handle truncated"))?;
        Ok(FileHandle {
            data: data.to_vec(),
        })
    }

    fn open_snapshots(&self) -> Result<OpenSnapshots, MalformedRecord> {
        let run_open_task = RunOpenTask {
            enter_fh: self.file_handle("run_open_task.enter_o_arg_fh")?,
            enter_share_access: self.narrow("run_open_task.enter_o_arg_share_access")?,
            enter_claim: self.narrow("run_open_task.enter_o_arg_claim")?,
            return_stateid: self.stateid("run_open_task.return_o_res_stateid")?,
        };

        let update_open_stateid = UpdateOpenStateid {
            open_stateid: self.stateid("update_open_stateid.open_stateid")?,
            state: self.state("update_open_stateid.state")?,
        };

        let reclaim_nograce = ReclaimNograce {
            enter_state: self.state("state_mark_reclaim_nograce.enter_state")?,
            return_state: self.state("state_mark_reclaim_nograce.return_state")?,
            executed: self.unsigned("state_mark_reclaim_nograce.executed")? != 0,
            result: self.narrow("state_mark_reclaim_nograce.result")?,
        };

        Ok(OpenSnapshots {
            run_open_task,
            opendata_to_nfs4_state: self.stateid("opendata_to_nfs4_state.o_res_stateid")?,
            update_open_stateid,
            reclaim_nograce,
            wait_clnt_recover: ClientSnapshot {
                cl_state: self.unsigned("wait_clnt_recover.client.cl_state")?,
            },
        })
    }
}

fn narrow<T: TryFrom<u64>>(path: &str, value: u64) -> Result<T, MalformedRecord> {
    T::try_from(value).map_err(|_| MalformedRecord::field(path, format!("{} out of range", value)))
}

fn read_unsigned(bytes: &[u8], order: ByteOrder) -> Option<u64> {
    let value = match (bytes.len(), order) {
        (1, _) => u64::from(*bytes.first()?),
        (2, ByteOrder::Native) => u64::from(u16::from_ne_bytes(bytes.try_into().ok()?)),
        (2, ByteOrder::Big) => u64::from(u16::from_be_bytes(bytes.try_into().ok()?)),
        (4, ByteOrder::Native) => u64::from(u32::from_ne_bytes(bytes.try_into().ok()?)),
        (4, ByteOrder::Big) => u64::from(u32::from_be_bytes(bytes.try_into().ok()?)),
        (8, ByteOrder::Native) => u64::from_ne_bytes(bytes.try_into().ok()?),
        (8, ByteOrder::Big) => u64::from_be_bytes(bytes.try_into().ok()?),
        _ => return None,
    };
    Some(value)
}
