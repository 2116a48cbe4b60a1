pub mod decoder;
pub mod errors;
pub mod flags;
pub mod models;
pub mod points;
pub mod schema;
pub mod tables;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use decoder::RecordDecoder;
pub use errors::{MalformedRecord, SchemaError, TableError};
pub use models::{EmitReasons, Event};
pub use schema::SchemaVersion;

/// Call-order slots recorded per request.
pub const CALL_ORDER_COUNT: usize = 128;
/// Distinct probe points with an invocation counter.
pub const SLOW_POINT_COUNT: usize = 48;
pub const TASK_COMM_LEN: usize = 16;
pub const DNAME_INLINE_LEN: usize = 32;
pub const NFS4_STATEID_OTHER_SIZE: usize = 12;
pub const NFS_MAXFHSIZE: usize = 128;
