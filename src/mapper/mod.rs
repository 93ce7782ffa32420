//! Structural mappers between the two feature graphs
//!
//! `to_entry` turns one GFF3 annotation into a flat-file entry; `to_gff3`
//! goes the other way. Both keep their per-record working state in an
//! explicit context struct created fresh for every record, so one mapper
//! value can convert any number of independent records.

pub mod to_entry;
pub mod to_gff3;

pub use to_entry::EntryMapper;
pub use to_gff3::{Gff3Mapper, MappedEntry};

/// Key of one feature's translation in the trailing sequence block.
pub fn translation_key(accession: &str, feature_id: &str) -> String {
    format!("{accession}|{feature_id}")
}

/// Attribute values GFF3 uses for boolean flags.
pub fn is_true(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}
