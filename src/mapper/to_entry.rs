//! GFF3 annotation to flat-file entry

use std::hash::{Hash, Hasher};

use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};

use super::{is_true, translation_key};
use crate::entry::{Entry, Feature, SequenceSource, Topology};
use crate::error::{ConvertError, Result};
use crate::gff3::{Gff3Annotation, Gff3Feature, Strand};
use crate::location::{CompoundLocation, Location};
use crate::ontology::{OntologyLookup, QualifierDefaults, CDS, REGION, SEQUENCE_FEATURE};
use crate::trans_index::TranslationSource;

/// Attribute keys that carry structure rather than qualifier content.
const STRUCTURAL_ATTRIBUTES: &[&str] = &["ID", "Parent", "partial", "Is_circular"];

/// Maps GFF3 annotations onto the entry model. Holds only configuration;
/// per-record state lives in a context created per call.
pub struct EntryMapper<'a, O: OntologyLookup + ?Sized> {
    ontology: &'a O,
    defaults: &'a QualifierDefaults,
}

/// Working state for one annotation.
struct RecordContext<'f> {
    /// Feature identity to slot in the entry's feature table, for merging
    /// repeat records that describe one multi-segment feature.
    slots: FxHashMap<String, usize>,
    /// `ID` to record, for gene-inheritance walks up the parent chain.
    by_id: FxHashMap<&'f str, &'f Gff3Feature>,
    circular: bool,
}

impl<'a, O: OntologyLookup + ?Sized> EntryMapper<'a, O> {
    pub fn new(ontology: &'a O, defaults: &'a QualifierDefaults) -> Self {
        EntryMapper { ontology, defaults }
    }

    pub fn map_annotation(
        &self,
        annotation: &Gff3Annotation,
        translations: &mut dyn TranslationSource,
    ) -> Result<Entry> {
        let accession = annotation.accession();
        let mut context = self.check_forest(annotation)?;

        let mut entry = Entry::new(accession);
        entry.version = annotation.region.version;
        entry.descriptor.length = annotation.region.end;
        entry.features.push(self.source_feature(annotation));

        for record in &annotation.features {
            self.map_feature(annotation, record, &mut context, &mut entry, translations)?;
        }

        if context.circular {
            entry.descriptor.topology = Topology::Circular;
        }
        if let Some(sequence) = translations.nucleotide(accession)? {
            entry.descriptor.length = sequence.len() as u64;
            entry.sequence = SequenceSource::Inline(sequence.into_bytes());
        }
        debug!(
            "mapped {} GFF3 record(s) into {} feature(s) for {}",
            annotation.features.len(),
            entry.features.len(),
            accession
        );
        Ok(entry)
    }

    /// Verifies parent links and builds the id map for inheritance walks.
    fn check_forest<'f>(&self, annotation: &'f Gff3Annotation) -> Result<RecordContext<'f>> {
        let mut by_id: FxHashMap<&str, &Gff3Feature> = FxHashMap::default();
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        for record in &annotation.features {
            if let Some(parent) = record.parent() {
                if !seen.contains(parent) {
                    return Err(ConvertError::DanglingParent {
                        accession: annotation.accession().to_string(),
                        child: record
                            .id()
                            .unwrap_or(&record.type_name)
                            .to_string(),
                        parent: parent.to_string(),
                    });
                }
            }
            if let Some(id) = record.id() {
                seen.insert(id);
                by_id.entry(id).or_insert(record);
            }
        }
        Ok(RecordContext {
            slots: FxHashMap::default(),
            by_id,
            circular: false,
        })
    }

    /// Leading source feature reconstructed from the directives.
    fn source_feature(&self, annotation: &Gff3Annotation) -> Feature {
        let region = &annotation.region;
        let location = CompoundLocation::from_location(Location::new(region.start, region.end));
        let mut source = Feature::new("source", location);
        if let Some(species) = annotation.species.first() {
            if let Some(organism) = species.organism() {
                source.push_qualifier("organism", Some(organism));
            }
            if let Some(taxon_id) = species.taxon_id() {
                source.push_qualifier("db_xref", Some(format!("taxon:{taxon_id}")));
            }
        }
        for (name, value) in self.defaults.for_type("source") {
            source.push_qualifier_if_absent(name, Some(value.to_string()));
        }
        source
    }

    fn map_feature(
        &self,
        annotation: &Gff3Annotation,
        record: &Gff3Feature,
        context: &mut RecordContext<'_>,
        entry: &mut Entry,
        translations: &mut dyn TranslationSource,
    ) -> Result<()> {
        let identity = feature_identity(record);
        let location = segment_location(record);

        // Repeat records sharing one identity extend the existing compound.
        if let Some(&slot) = context.slots.get(&identity) {
            trace!("merging segment {}..{} into '{identity}'", record.start, record.end);
            entry.features[slot].location.push(location);
            return Ok(());
        }

        let term_id = self.resolve_type(annotation.accession(), &record.type_name)?;
        if term_id == REGION {
            if record.attribute("Is_circular").is_some_and(is_true) {
                // Topology landmark only; rebuilt by the reverse mapper.
                context.circular = true;
                return Ok(());
            }
        }

        let name = if record.type_name == term_id {
            self.ontology
                .canonical_name(&term_id)
                .unwrap_or(&record.type_name)
                .to_string()
        } else {
            record.type_name.clone()
        };
        let mut feature = Feature::new(name, CompoundLocation::from_location(location));

        for (key, values) in &record.attributes {
            if STRUCTURAL_ATTRIBUTES.contains(&key.as_str()) {
                continue;
            }
            for value in values {
                if is_true(value) {
                    feature.push_qualifier(key.clone(), None);
                } else {
                    feature.push_qualifier(key.clone(), Some(value.clone()));
                }
            }
        }

        if !feature.has_qualifier("gene") {
            if let Some(gene) = inherited_gene(record, context) {
                feature.push_qualifier("gene", Some(gene));
            }
        }

        let cds_like = self.ontology.is_descendant_of(&term_id, CDS);
        if cds_like {
            if let Some(phase) = record.phase {
                feature.push_qualifier_if_absent("codon_start", Some((phase + 1).to_string()));
            }
        }
        for (name, value) in self.defaults.for_type(&feature.name) {
            feature.push_qualifier_if_absent(name, Some(value.to_string()));
        }
        if cds_like {
            let key = translation_key(annotation.accession(), &identity);
            if let Some(translation) = translations.translation(&key)? {
                feature.push_qualifier_if_absent("translation", Some(translation));
            }
        }

        context.slots.insert(identity, entry.features.len());
        entry.features.push(feature);
        Ok(())
    }

    /// Exact id pass-through when the type column already holds a term id,
    /// else a name/synonym lookup. The resolved term must sit under the
    /// sequence-feature root.
    fn resolve_type(&self, accession: &str, type_name: &str) -> Result<String> {
        let term_id = if self.ontology.is_valid_id(type_name) {
            type_name.to_string()
        } else {
            self.ontology
                .resolve_name_or_synonym(type_name)
                .ok_or_else(|| ConvertError::UnresolvableFeatureType {
                    accession: accession.to_string(),
                    type_name: type_name.to_string(),
                })?
                .to_string()
        };
        if !self.ontology.is_descendant_of(&term_id, SEQUENCE_FEATURE) {
            return Err(ConvertError::UnresolvableFeatureType {
                accession: accession.to_string(),
                type_name: type_name.to_string(),
            });
        }
        Ok(term_id)
    }
}

/// `ID` attribute, or a content hash when absent. Coordinates are excluded
/// so split segments of one feature share an identity.
pub fn feature_identity(record: &Gff3Feature) -> String {
    if let Some(id) = record.id() {
        return id.to_string();
    }
    let mut hasher = FxHasher::default();
    record.type_name.hash(&mut hasher);
    for (key, values) in &record.attributes {
        key.hash(&mut hasher);
        for value in values {
            value.hash(&mut hasher);
        }
    }
    format!("{:016x}", hasher.finish())
}

/// One record's coordinates as a location segment, with strand and the
/// positional `partial` tokens folded into the flag frame.
fn segment_location(record: &Gff3Feature) -> Location {
    let mut location = Location::new(record.start, record.end);
    if record.strand == Strand::Reverse {
        location.complement = true;
    }
    if let Some(tokens) = record.attributes.get("partial") {
        for token in tokens {
            match token.as_str() {
                "start" => location.set_lower_partial(true),
                "end" => location.set_upper_partial(true),
                _ => {}
            }
        }
    }
    location
}

/// Walks the parent chain until a `gene` value or the root is found.
fn inherited_gene(record: &Gff3Feature, context: &RecordContext<'_>) -> Option<String> {
    let mut current = record;
    loop {
        let parent_id = current.parent()?;
        let parent = context.by_id.get(parent_id)?;
        if let Some(gene) = parent.attribute("gene") {
            return Some(gene.to_string());
        }
        current = parent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gff3::SequenceRegion;
    use crate::ontology::BundledOntology;
    use crate::trans_index::NoTranslations;

    fn record(type_name: &str, start: u64, end: u64, attrs: &[(&str, &str)]) -> Gff3Feature {
        let mut feature = Gff3Feature {
            accession: "AB000001".to_string(),
            source: ".".to_string(),
            type_name: type_name.to_string(),
            start,
            end,
            strand: Strand::Forward,
            ..Gff3Feature::default()
        };
        for (key, value) in attrs {
            feature.push_attribute(*key, *value);
        }
        feature
    }

    fn annotation(features: Vec<Gff3Feature>) -> Gff3Annotation {
        Gff3Annotation {
            region: SequenceRegion {
                accession: "AB000001".to_string(),
                version: Some(1),
                start: 1,
                end: 500,
            },
            species: Vec::new(),
            features,
        }
    }

    fn map(features: Vec<Gff3Feature>) -> Result<Entry> {
        let ontology = BundledOntology::load().unwrap();
        let defaults = QualifierDefaults::load().unwrap();
        EntryMapper::new(&ontology, &defaults)
            .map_annotation(&annotation(features), &mut NoTranslations)
    }

    #[test]
    fn repeat_ids_merge_into_one_compound() {
        let entry = map(vec![
            record("CDS", 10, 50, &[("ID", "cds_1"), ("gene", "RHD")]),
            record("CDS", 80, 120, &[("ID", "cds_1"), ("gene", "RHD")]),
        ])
        .unwrap();
        // Source feature plus one merged CDS.
        assert_eq!(entry.features.len(), 2);
        let cds = &entry.features[1];
        assert_eq!(cds.name, "CDS");
        assert_eq!(cds.location.segments.len(), 2);
        assert_eq!(cds.location.span_start(), 10);
        assert_eq!(cds.location.span_end(), 120);
    }

    #[test]
    fn unresolvable_type_is_a_hard_error() {
        let err = map(vec![record("plasmid_vector", 1, 10, &[])]).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::UnresolvableFeatureType { .. }
        ));
    }

    #[test]
    fn dangling_parent_is_rejected() {
        let err = map(vec![record("exon", 1, 10, &[("Parent", "missing")])]).unwrap_err();
        match err {
            ConvertError::DanglingParent { parent, .. } => assert_eq!(parent, "missing"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn circular_region_landmark_is_dropped() {
        let entry = map(vec![
            record("region", 1, 500, &[("ID", "AB000001"), ("Is_circular", "true")]),
            record("gene", 10, 100, &[("ID", "g1"), ("gene", "RHD")]),
        ])
        .unwrap();
        assert_eq!(entry.descriptor.topology, Topology::Circular);
        assert_eq!(entry.features.len(), 2);
        assert_eq!(entry.features[1].name, "gene");
    }

    #[test]
    fn gene_inherits_through_the_parent_chain() {
        let entry = map(vec![
            record("gene", 10, 400, &[("ID", "gene_RHD"), ("gene", "RHD")]),
            record("mRNA", 10, 400, &[("ID", "mrna_1"), ("Parent", "gene_RHD")]),
            record("exon", 10, 100, &[("Parent", "mrna_1")]),
        ])
        .unwrap();
        let exon = &entry.features[3];
        assert_eq!(exon.name, "exon");
        assert_eq!(exon.qualifier_value("gene"), Some("RHD"));
    }

    #[test]
    fn explicit_gene_is_never_overwritten() {
        let entry = map(vec![
            record("gene", 10, 400, &[("ID", "gene_RHD"), ("gene", "RHD")]),
            record("exon", 10, 100, &[("Parent", "gene_RHD"), ("gene", "OTHER")]),
        ])
        .unwrap();
        assert_eq!(entry.features[2].qualifier_value("gene"), Some("OTHER"));
    }

    #[test]
    fn defaults_fill_only_missing_qualifiers() {
        let entry = map(vec![
            record("CDS", 10, 100, &[("ID", "c1"), ("codon_start", "2")]),
            record("CDS", 200, 300, &[("ID", "c2")]),
        ])
        .unwrap();
        assert_eq!(entry.features[1].qualifier_value("codon_start"), Some("2"));
        assert_eq!(entry.features[2].qualifier_value("codon_start"), Some("1"));
    }

    #[test]
    fn phase_becomes_codon_start() {
        let mut cds = record("CDS", 10, 100, &[("ID", "c1")]);
        cds.phase = Some(2);
        let entry = map(vec![cds]).unwrap();
        assert_eq!(entry.features[1].qualifier_value("codon_start"), Some("3"));
    }

    #[test]
    fn translations_attach_by_key() {
        let mut translations: FxHashMap<String, String> = FxHashMap::default();
        translations.insert("AB000001|cds_1".to_string(), "MKVL".to_string());
        let ontology = BundledOntology::load().unwrap();
        let defaults = QualifierDefaults::load().unwrap();
        let entry = EntryMapper::new(&ontology, &defaults)
            .map_annotation(
                &annotation(vec![record("CDS", 10, 100, &[("ID", "cds_1")])]),
                &mut translations,
            )
            .unwrap();
        assert_eq!(
            entry.features[1].qualifier_value("translation"),
            Some("MKVL")
        );
    }

    #[test]
    fn so_id_column_maps_to_canonical_name() {
        let entry = map(vec![record("SO:0000316", 10, 100, &[("ID", "c1")])]).unwrap();
        assert_eq!(entry.features[1].name, "CDS");
    }

    #[test]
    fn segments_without_ids_coalesce_by_content() {
        let entry = map(vec![
            record("exon", 10, 50, &[("gene", "RHD")]),
            record("exon", 80, 120, &[("gene", "RHD")]),
            record("exon", 10, 50, &[("gene", "XYZ")]),
        ])
        .unwrap();
        assert_eq!(entry.features.len(), 3);
        assert_eq!(entry.features[1].location.segments.len(), 2);
        assert_eq!(entry.features[2].location.segments.len(), 1);
    }
}
