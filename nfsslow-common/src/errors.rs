use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedRecord {
    #[error("Record length mismatch: observed {observed} bytes, expected {expected}")]
    Length { observed: usize, expected: usize },
    #[error("Invalid field {field:?}: {reason}")]
    Field { field: String, reason: String },
}

impl MalformedRecord {
    pub(crate) fn field(field: &str, reason: impl Into<String>) -> MalformedRecord {
        MalformedRecord::Field {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("Name table {table:?} has {len} entries but its field is {width} bits wide")]
    TooLong {
        table: &'static str,
        len: usize,
        width: u32,
    },
    #[error("Name table {table:?} targets an unsupported {width} bit field")]
    UnsupportedWidth { table: &'static str, width: u32 },
    #[error("Invalid probe point catalogue: {0}")]
    Catalogue(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Unknown schema version: {0:?}")]
    UnknownVersion(String),
    #[error("Schema {version} declares {declared} bytes but its fields add up to {computed}")]
    WidthMismatch {
        version: &'static str,
        declared: usize,
        computed: usize,
    },
    #[error("Schema {version} defines field {field:?} twice")]
    DuplicateField { version: &'static str, field: String },
}
