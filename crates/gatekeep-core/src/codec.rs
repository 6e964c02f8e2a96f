// ABOUTME: Strict JSON codec for resource group configuration documents.
// ABOUTME: Parsing rejects unknown fields with source positions; serialization renders deterministic two-space-indented JSON.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::model::ManagerSpec;

/// A malformed or unrecognized configuration document. The message is
/// serde's innermost failure (it names unknown fields directly); line
/// and column are 1-based positions into the document text.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SchemaError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl From<serde_json::Error> for SchemaError {
    fn from(e: serde_json::Error) -> Self {
        Self {
            message: e.to_string(),
            line: e.line(),
            column: e.column(),
        }
    }
}

/// Errors from the file-reading entry points.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Schema(#[from] SchemaError),
}

/// Parse a configuration document. Any property not in the recognized
/// schema fails the parse; so does a value of the wrong shape.
pub fn parse_str(document: &str) -> Result<ManagerSpec, SchemaError> {
    serde_json::from_str(document).map_err(SchemaError::from)
}

/// Read and parse a configuration file.
pub fn parse_file(path: &Path) -> Result<ManagerSpec, CodecError> {
    let document = fs::read_to_string(path)?;
    Ok(parse_str(&document)?)
}

/// Check a configuration file without touching anything else. This is
/// the pre-deployment validation entry point: parse only, no storage.
pub fn validate(path: &Path) -> Result<(), CodecError> {
    parse_file(path).map(|_| ())
}

/// Render a spec tree as the canonical document form: two-space
/// indentation, struct-declaration key order, optional fields present
/// only when set.
pub fn to_json(spec: &ManagerSpec) -> Result<String, serde_json::Error> {
    let mut document = serde_json::to_string_pretty(spec)?;
    document.push('\n');
    Ok(document)
}
