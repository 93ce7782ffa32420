//! Error types shared across the converter.

use thiserror::Error;

/// Result type alias for conversion operations.
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Error types that can occur during conversion.
///
/// Syntactic findings only surface here when the active severity policy
/// escalates them to errors; at WARN level they are collected on the
/// validation engine instead. Mapping and index errors are always fatal
/// to the record that produced them.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bundled asset table that fails to parse
    #[error("asset table error: {0}")]
    Asset(#[from] serde_json::Error),

    /// Syntactic finding escalated by the severity policy
    #[error("[{rule}] line {line}: {msg}")]
    Syntactic {
        /// Validation rule that fired
        rule: &'static str,
        /// 1-based line number in the input stream
        line: u64,
        /// Finding text
        msg: String,
    },

    /// Feature type with no usable ontology term
    #[error("feature type '{type_name}' on {accession} does not resolve to a sequence feature term")]
    UnresolvableFeatureType {
        /// Annotation accession
        accession: String,
        /// Offending type column or feature key
        type_name: String,
    },

    /// Parent attribute referencing an id never seen in the annotation
    #[error("feature '{child}' on {accession} references unknown parent '{parent}'")]
    DanglingParent {
        accession: String,
        child: String,
        parent: String,
    },

    /// Entry whose feature table lacks the leading source feature
    #[error("entry {accession} has no source feature")]
    MissingSourceFeature { accession: String },

    /// Feature run for an accession whose annotation was already flushed
    #[error("accession {accession} reappears after its annotation was completed (line {line})")]
    AccessionRevisited { accession: String, line: u64 },

    /// Location text that does not parse under the INSDC grammar
    #[error("bad location for feature '{feature}' on {accession}: {msg}")]
    BadLocation {
        accession: String,
        feature: String,
        msg: String,
    },

    /// Byte outside the configured alphabet while indexing sequence data
    #[error("illegal byte 0x{byte:02x} at file offset {offset} (expected {expected})")]
    IllegalByte {
        /// Absolute byte offset in the source
        offset: u64,
        byte: u8,
        /// Description of the allowed byte set
        expected: &'static str,
    },

    /// Base or byte range outside the indexed extent
    #[error("range {from}..={to} outside indexed extent of {len}")]
    InvalidRange { from: u64, to: u64, len: u64 },

    /// Residue failing the amino-acid alphabet in a translation record
    #[error("translation '{key}' contains invalid residue 0x{byte:02x}")]
    InvalidResidue { key: String, byte: u8 },

    /// Flat-file text that violates the line-code dialect
    #[error("flat-file parse error at line {line}: {msg}")]
    FlatFile { line: u64, msg: String },
}
