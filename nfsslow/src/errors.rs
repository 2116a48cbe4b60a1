use nfsslow_common::points::PointKind;
use nfsslow_common::{SchemaError, TableError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SlowError {
    #[error("Could not attach {kind} probe to {function}: {reason}")]
    AttachmentFailure {
        function: String,
        kind: PointKind,
        reason: String,
    },
    #[error("Configuration error: {0}")]
    Configuration(#[from] TableError),
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("Probe program failed to compile: {0}")]
    Compile(String),
    #[error("Invalid attribute: {attribute:?}, value: {value:?}")]
    InvalidAttribute {
        attribute: &'static str,
        value: String,
    },
    #[error("Missing attribute: {0}")]
    MissingAttribute(String),
}
