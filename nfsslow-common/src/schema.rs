//! Byte layouts of the records written by the probe program.
//!
//! A layout is an ordered list of [`FieldSpec`]s. Nested structures are
//! flattened into dotted paths when the layout is compiled, so decoding code
//! addresses fields as `"run_open_task.return_o_res_stateid.seqid"`.

use crate::errors::SchemaError;
use crate::{
    CALL_ORDER_COUNT, DNAME_INLINE_LEN, NFS4_STATEID_OTHER_SIZE, NFS_MAXFHSIZE, SLOW_POINT_COUNT,
    TASK_COMM_LEN,
};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Host order, as the probe program stores plain integers.
    Native,
    /// Network order, as the kernel stores NFSv4 seqids.
    Big,
}

#[derive(Debug, Clone, Copy)]
pub enum FieldType {
    Unsigned(usize),
    UnsignedArray { elem: usize, count: usize },
    /// NUL-padded text.
    Text(usize),
    Opaque(usize),
    Padding(usize),
    Struct(&'static [FieldSpec]),
}

impl FieldType {
    pub const fn width(&self) -> usize {
        match *self {
            FieldType::Unsigned(w)
            | FieldType::Text(w)
            | FieldType::Opaque(w)
            | FieldType::Padding(w) => w,
            FieldType::UnsignedArray { elem, count } => elem * count,
            FieldType::Struct(fields) => fields_width(fields),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub order: ByteOrder,
}

impl FieldSpec {
    pub const fn native(name: &'static str, ty: FieldType) -> FieldSpec {
        FieldSpec {
            name,
            ty,
            order: ByteOrder::Native,
        }
    }

    pub const fn big(name: &'static str, ty: FieldType) -> FieldSpec {
        FieldSpec {
            name,
            ty,
            order: ByteOrder::Big,
        }
    }
}

pub const fn fields_width(fields: &[FieldSpec]) -> usize {
    let mut width = 0;
    let mut i = 0;
    while i < fields.len() {
        width += fields[i].ty.width();
        i += 1;
    }
    width
}

const STATEID: &[FieldSpec] = &[
    FieldSpec::big("seqid", FieldType::Unsigned(4)),
    FieldSpec::native("other", FieldType::Opaque(NFS4_STATEID_OTHER_SIZE)),
    FieldSpec::native("type", FieldType::Unsigned(4)),
];

const FILE_HANDLE: &[FieldSpec] = &[
    FieldSpec::native("size", FieldType::Unsigned(1)),
    FieldSpec::native("data", FieldType::Opaque(NFS_MAXFHSIZE)),
];

const STATE: &[FieldSpec] = &[
    FieldSpec::native("open_stateid", FieldType::Struct(STATEID)),
    FieldSpec::native("stateid", FieldType::Struct(STATEID)),
    FieldSpec::native("flags", FieldType::Unsigned(8)),
    FieldSpec::native("n_rdonly", FieldType::Unsigned(4)),
    FieldSpec::native("n_wronly", FieldType::Unsigned(4)),
    FieldSpec::native("n_rdwr", FieldType::Unsigned(4)),
    FieldSpec::native("state", FieldType::Unsigned(4)),
];

const CLIENT: &[FieldSpec] = &[FieldSpec::native("cl_state", FieldType::Unsigned(8))];

const RUN_OPEN_TASK: &[FieldSpec] = &[
    FieldSpec::native("enter_o_arg_fh", FieldType::Struct(FILE_HANDLE)),
    FieldSpec::native("enter_o_arg_share_access", FieldType::Unsigned(4)),
    FieldSpec::native("enter_o_arg_claim", FieldType::Unsigned(1)),
    FieldSpec::native("return_o_res_stateid", FieldType::Struct(STATEID)),
];

const OPENDATA_TO_NFS4_STATE: &[FieldSpec] =
    &[FieldSpec::native("o_res_stateid", FieldType::Struct(STATEID))];

const UPDATE_OPEN_STATEID: &[FieldSpec] = &[
    FieldSpec::native("open_stateid", FieldType::Struct(STATEID)),
    FieldSpec::native("state", FieldType::Struct(STATE)),
];

const STATE_MARK_RECLAIM_NOGRACE: &[FieldSpec] = &[
    FieldSpec::native("enter_state", FieldType::Struct(STATE)),
    FieldSpec::native("return_state", FieldType::Struct(STATE)),
    FieldSpec::native("executed", FieldType::Unsigned(4)),
    FieldSpec::native("result", FieldType::Unsigned(4)),
];

const WAIT_CLNT_RECOVER: &[FieldSpec] = &[FieldSpec::native("client", FieldType::Struct(CLIENT))];

const RECORD_V1: &[FieldSpec] = &[
    FieldSpec::native("ts", FieldType::Unsigned(8)),
    FieldSpec::native(
        "point_ids",
        FieldType::UnsignedArray {
            elem: 1,
            count: CALL_ORDER_COUNT,
        },
    ),
    FieldSpec::native(
        "point_deltas",
        FieldType::UnsignedArray {
            elem: 4,
            count: CALL_ORDER_COUNT,
        },
    ),
    FieldSpec::native(
        "call_counts",
        FieldType::UnsignedArray {
            elem: 1,
            count: SLOW_POINT_COUNT,
        },
    ),
    FieldSpec::native("task", FieldType::Text(TASK_COMM_LEN)),
    FieldSpec::native("file", FieldType::Text(DNAME_INLINE_LEN)),
    FieldSpec::native("pid", FieldType::Unsigned(8)),
    FieldSpec::native("delta", FieldType::Unsigned(8)),
    FieldSpec::native("order_index", FieldType::Unsigned(4)),
    FieldSpec::native("reason", FieldType::Unsigned(4)),
    FieldSpec::native("_pad", FieldType::Padding(4)),
];

const RECORD_V2: &[FieldSpec] = &[
    FieldSpec::native("ts", FieldType::Unsigned(8)),
    FieldSpec::native(
        "point_ids",
        FieldType::UnsignedArray {
            elem: 1,
            count: CALL_ORDER_COUNT,
        },
    ),
    FieldSpec::native(
        "point_deltas",
        FieldType::UnsignedArray {
            elem: 4,
            count: CALL_ORDER_COUNT,
        },
    ),
    FieldSpec::native(
        "call_counts",
        FieldType::UnsignedArray {
            elem: 1,
            count: SLOW_POINT_COUNT,
        },
    ),
    FieldSpec::native("task", FieldType::Text(TASK_COMM_LEN)),
    FieldSpec::native("file", FieldType::Text(DNAME_INLINE_LEN)),
    FieldSpec::native("pid", FieldType::Unsigned(8)),
    FieldSpec::native("delta", FieldType::Unsigned(8)),
    FieldSpec::native("run_open_task", FieldType::Struct(RUN_OPEN_TASK)),
    FieldSpec::native(
        "opendata_to_nfs4_state",
        FieldType::Struct(OPENDATA_TO_NFS4_STATE),
    ),
    FieldSpec::native("update_open_stateid", FieldType::Struct(UPDATE_OPEN_STATEID)),
    FieldSpec::native(
        "state_mark_reclaim_nograce",
        FieldType::Struct(STATE_MARK_RECLAIM_NOGRACE),
    ),
    FieldSpec::native("wait_clnt_recover", FieldType::Struct(WAIT_CLNT_RECOVER)),
    FieldSpec::native("order_index", FieldType::Unsigned(4)),
    FieldSpec::native("reason", FieldType::Unsigned(4)),
    FieldSpec::native("_pad", FieldType::Padding(2)),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    Undefined,
    /// Timing only: call path, counters, task and file.
    V1,
    /// V1 plus NFSv4 open/state snapshots.
    V2,
}

impl SchemaVersion {
    pub fn from_str(s: &mut str) -> Self {
        s.make_ascii_lowercase();
        match s.trim() {
            "v1" | "1" => SchemaVersion::V1,
            "v2" | "2" => SchemaVersion::V2,
            _ => SchemaVersion::Undefined,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, SchemaVersion::Undefined)
    }

    /// Value substituted for `SCHEMA_VERSION` in the probe program.
    pub fn number(&self) -> u32 {
        match self {
            SchemaVersion::Undefined => 0,
            SchemaVersion::V1 => 1,
            SchemaVersion::V2 => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SchemaVersion::Undefined => "undefined",
            SchemaVersion::V1 => "v1",
            SchemaVersion::V2 => "v2",
        }
    }

    pub fn descriptor(&self) -> Result<SchemaDescriptor, SchemaError> {
        match self {
            SchemaVersion::V1 => Ok(SchemaDescriptor {
                version: SchemaVersion::V1,
                fields: RECORD_V1,
                record_len: 772,
            }),
            SchemaVersion::V2 => Ok(SchemaDescriptor {
                version: SchemaVersion::V2,
                fields: RECORD_V2,
                record_len: 1172,
            }),
            SchemaVersion::Undefined => Err(SchemaError::UnknownVersion(self.name().to_string())),
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A pinned record layout. `record_len` is the length of every perf sample
/// produced under this layout (the C struct plus its trailing padding).
#[derive(Debug, Clone, Copy)]
pub struct SchemaDescriptor {
    pub version: SchemaVersion,
    pub fields: &'static [FieldSpec],
    pub record_len: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Slot {
    pub offset: usize,
    pub ty: FieldType,
    pub order: ByteOrder,
}

impl Slot {
    pub fn width(&self) -> usize {
        self.ty.width()
    }
}

/// A descriptor resolved into absolute offsets by dotted path.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    version: SchemaVersion,
    record_len: usize,
    slots: HashMap<String, Slot>,
}

impl CompiledSchema {
    pub fn compile(descriptor: &SchemaDescriptor) -> Result<CompiledSchema, SchemaError> {
        let computed = fields_width(descriptor.fields);
        if computed != descriptor.record_len {
            return Err(SchemaError::WidthMismatch {
                version: descriptor.version.name(),
                declared: descriptor.record_len,
                computed,
            });
        }

        let mut slots = HashMap::new();
        let end = flatten(
            descriptor.version,
            "",
            descriptor.fields,
            0,
            &mut slots,
        )?;
        debug_assert_eq!(end, computed);

        Ok(CompiledSchema {
            version: descriptor.version,
            record_len: descriptor.record_len,
            slots,
        })
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub fn record_len(&self) -> usize {
        self.record_len
    }

    pub fn slot(&self, path: &str) -> Option<&Slot> {
        self.slots.get(path)
    }
}

fn flatten(
    version: SchemaVersion,
    prefix: &str,
    fields: &'static [FieldSpec],
    mut offset: usize,
    slots: &mut HashMap<String, Slot>,
) -> Result<usize, SchemaError> {
    for field in fields {
        let path = if prefix.is_empty() {
            field.name.to_string()
        } else {
            format!("{}.{}", prefix, field.name)
        };

        if let FieldType::Struct(inner) = field.ty {
            flatten(version, &path, inner, offset, slots)?;
        }

        let slot = Slot {
            offset,
            ty: field.ty,
            order: field.order,
        };
        if slots.insert(path.clone(), slot).is_some() {
            return Err(SchemaError::DuplicateField {
                version: version.name(),
                field: path,
            });
        }
        offset += field.ty.width();
    }
    Ok(offset)
}
