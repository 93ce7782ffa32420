//! Flat-file entry model
//!
//! An Entry is one annotation record: accession, sequence descriptor, and an
//! ordered feature table whose first feature is by convention the "source"
//! feature carrying organism and topology metadata. The model is built once
//! per record by a reader or mapper and handed to a writer unchanged.

use std::fs::File;
use std::path::PathBuf;

use crate::error::Result;
use crate::location::CompoundLocation;
use crate::seqindex::{ReadAt, SequenceIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    #[default]
    Linear,
    Circular,
}

/// Sequence-level metadata from the entry header.
#[derive(Debug, Clone, Default)]
pub struct SequenceDescriptor {
    pub length: u64,
    pub topology: Topology,
    pub molecule_type: Option<String>,
}

/// Where the entry's sequence text lives.
///
/// `Indexed` keeps only a line table over the source file so large records
/// never hold their sequence in memory; consumers stream it span by span.
#[derive(Debug)]
pub enum SequenceSource {
    None,
    Inline(Vec<u8>),
    Indexed { path: PathBuf, index: SequenceIndex },
}

impl SequenceSource {
    pub fn total_bases(&self) -> u64 {
        match self {
            SequenceSource::None => 0,
            SequenceSource::Inline(bytes) => bytes.len() as u64,
            SequenceSource::Indexed { index, .. } => index.total_bases(),
        }
    }

    /// Materializes the full sequence. Indexed sources are read span by span
    /// from the underlying file.
    pub fn to_bytes(&self) -> Result<Option<Vec<u8>>> {
        match self {
            SequenceSource::None => Ok(None),
            SequenceSource::Inline(bytes) => Ok(Some(bytes.clone())),
            SequenceSource::Indexed { path, index } => {
                let total = index.total_bases();
                if total == 0 {
                    return Ok(Some(Vec::new()));
                }
                let file = File::open(path)?;
                let mut sequence = Vec::with_capacity(total as usize);
                for span in index.byte_spans_for_base_range(1, total)? {
                    let mut chunk = vec![0u8; (span.end - span.start) as usize];
                    file.read_exact_at(&mut chunk, span.start)?;
                    sequence.extend_from_slice(&chunk);
                }
                Ok(Some(sequence))
            }
        }
    }
}

/// One feature-table row: a type name, an extent, and ordered qualifiers.
#[derive(Debug, Clone)]
pub struct Feature {
    pub name: String,
    pub location: CompoundLocation,
    pub qualifiers: Vec<Qualifier>,
}

impl Feature {
    pub fn new(name: impl Into<String>, location: CompoundLocation) -> Self {
        Feature {
            name: name.into(),
            location,
            qualifiers: Vec::new(),
        }
    }

    /// First value recorded under `name`, if any.
    pub fn qualifier_value(&self, name: &str) -> Option<&str> {
        self.qualifiers
            .iter()
            .find(|q| q.name == name)
            .and_then(|q| q.value.as_deref())
    }

    pub fn has_qualifier(&self, name: &str) -> bool {
        self.qualifiers.iter().any(|q| q.name == name)
    }

    pub fn push_qualifier(&mut self, name: impl Into<String>, value: Option<String>) {
        self.qualifiers.push(Qualifier {
            name: name.into(),
            value,
        });
    }

    /// Adds a qualifier only when no qualifier of that name exists yet.
    pub fn push_qualifier_if_absent(&mut self, name: &str, value: Option<String>) {
        if !self.has_qualifier(name) {
            self.push_qualifier(name.to_string(), value);
        }
    }

    pub fn remove_qualifier(&mut self, name: &str) {
        self.qualifiers.retain(|q| q.name != name);
    }
}

/// One `name=value` pair from the feature table; boolean-like qualifiers
/// carry no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qualifier {
    pub name: String,
    pub value: Option<String>,
}

/// One complete flat-file record.
#[derive(Debug)]
pub struct Entry {
    pub accession: String,
    pub version: Option<u32>,
    pub description: Option<String>,
    pub descriptor: SequenceDescriptor,
    pub features: Vec<Feature>,
    pub sequence: SequenceSource,
}

impl Entry {
    pub fn new(accession: impl Into<String>) -> Self {
        Entry {
            accession: accession.into(),
            version: None,
            description: None,
            descriptor: SequenceDescriptor::default(),
            features: Vec::new(),
            sequence: SequenceSource::None,
        }
    }

    /// The leading source feature, when present.
    pub fn source_feature(&self) -> Option<&Feature> {
        self.features.first().filter(|f| f.name == "source")
    }

    pub fn organism(&self) -> Option<&str> {
        self.source_feature()
            .and_then(|f| f.qualifier_value("organism"))
    }

    /// Numeric taxon id from the source feature's `db_xref` qualifiers.
    pub fn taxon_id(&self) -> Option<u64> {
        let source = self.source_feature()?;
        source
            .qualifiers
            .iter()
            .filter(|q| q.name == "db_xref")
            .filter_map(|q| q.value.as_deref())
            .find_map(|v| v.strip_prefix("taxon:"))
            .and_then(|id| id.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;

    fn entry_with_source() -> Entry {
        let mut entry = Entry::new("AB000001");
        let mut source = Feature::new(
            "source",
            CompoundLocation::from_location(Location::new(1, 500)),
        );
        source.push_qualifier("organism", Some("Homo sapiens".to_string()));
        source.push_qualifier("db_xref", Some("BioSample:SAMN1".to_string()));
        source.push_qualifier("db_xref", Some("taxon:9606".to_string()));
        entry.features.push(source);
        entry
    }

    #[test]
    fn source_feature_must_lead_the_table() {
        let mut entry = entry_with_source();
        assert!(entry.source_feature().is_some());
        entry.features.insert(
            0,
            Feature::new("gene", CompoundLocation::from_location(Location::new(3, 9))),
        );
        assert!(entry.source_feature().is_none());
    }

    #[test]
    fn taxon_id_scans_all_db_xrefs() {
        let entry = entry_with_source();
        assert_eq!(entry.organism(), Some("Homo sapiens"));
        assert_eq!(entry.taxon_id(), Some(9606));
    }

    #[test]
    fn qualifier_if_absent_never_overwrites() {
        let mut feature = Feature::new(
            "CDS",
            CompoundLocation::from_location(Location::new(1, 30)),
        );
        feature.push_qualifier("codon_start", Some("2".to_string()));
        feature.push_qualifier_if_absent("codon_start", Some("1".to_string()));
        assert_eq!(feature.qualifier_value("codon_start"), Some("2"));
        feature.push_qualifier_if_absent("gene", Some("RHD".to_string()));
        assert_eq!(feature.qualifier_value("gene"), Some("RHD"));
    }
}
