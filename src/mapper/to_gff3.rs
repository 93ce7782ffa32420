//! Flat-file entry to GFF3 annotation

use log::debug;
use rustc_hash::FxHashMap;

use super::translation_key;
use crate::entry::{Entry, Feature, Topology};
use crate::error::{ConvertError, Result};
use crate::gff3::{Gff3Annotation, Gff3Feature, SequenceRegion, Species, Strand};
use crate::ontology::{OntologyLookup, CDS, SEQUENCE_FEATURE};

/// One mapped entry: the annotation plus the translations destined for the
/// trailing sequence block, keyed `accession|feature-id`.
pub struct MappedEntry {
    pub annotation: Gff3Annotation,
    pub translations: Vec<(String, String)>,
}

/// Maps entries onto the GFF3 model.
pub struct Gff3Mapper<'a, O: OntologyLookup + ?Sized> {
    ontology: &'a O,
}

/// Emission order within one region: genes open their group, transcript
/// kinds follow, then exon/CDS, then everything else.
fn type_precedence(name: &str) -> u8 {
    match name {
        "gene" | "pseudogene" => 0,
        "mRNA" | "transcript" | "precursor_RNA" | "misc_RNA" | "ncRNA" | "tRNA" | "rRNA"
        | "snRNA" | "snoRNA" | "miRNA" | "tmRNA" => 1,
        "exon" => 2,
        "CDS" => 3,
        _ => 4,
    }
}

impl<'a, O: OntologyLookup + ?Sized> Gff3Mapper<'a, O> {
    pub fn new(ontology: &'a O) -> Self {
        Gff3Mapper { ontology }
    }

    pub fn map_entry(&self, entry: &Entry) -> Result<MappedEntry> {
        let source = entry
            .source_feature()
            .ok_or_else(|| ConvertError::MissingSourceFeature {
                accession: entry.accession.clone(),
            })?;
        let region = SequenceRegion {
            accession: entry.accession.clone(),
            version: entry.version,
            start: source.location.span_start().max(1),
            end: source.location.span_end().max(entry.descriptor.length),
        };
        let species = Species::from_organism(entry.organism(), entry.taxon_id())
            .into_iter()
            .collect();

        let mut ordered: Vec<&Feature> = entry.features.iter().skip(1).collect();
        ordered.sort_by_key(|f| (f.location.span_start(), type_precedence(&f.name)));

        let mut records = Vec::with_capacity(ordered.len());
        let mut genes: Vec<Option<String>> = Vec::with_capacity(ordered.len());
        let mut pending_translations: Vec<(usize, String)> = Vec::new();
        for feature in ordered {
            let (record, translation) = self.map_feature(entry, feature)?;
            if let Some(translation) = translation {
                pending_translations.push((records.len(), translation));
            }
            genes.push(feature.qualifier_value("gene").map(str::to_string));
            records.push(record);
        }

        assign_gene_hierarchy(&mut records, &genes);

        let mut translations = Vec::with_capacity(pending_translations.len());
        let mut anonymous = 0usize;
        for (index, translation) in pending_translations {
            let id = match records[index].id() {
                Some(id) => id.to_string(),
                None => {
                    anonymous += 1;
                    let id = format!("{}_{}", records[index].type_name, anonymous);
                    records[index].push_attribute("ID", id.clone());
                    id
                }
            };
            translations.push((translation_key(&entry.accession, &id), translation));
        }

        if entry.descriptor.topology == Topology::Circular
            && !entry
                .features
                .iter()
                .any(|f| f.has_qualifier("circular_RNA"))
        {
            records.insert(0, self.circular_landmark(entry, source));
        }

        debug!(
            "mapped entry {} into {} GFF3 record(s)",
            entry.accession,
            records.len()
        );
        Ok(MappedEntry {
            annotation: Gff3Annotation {
                region,
                species,
                features: records,
            },
            translations,
        })
    }

    fn map_feature(
        &self,
        entry: &Entry,
        feature: &Feature,
    ) -> Result<(Gff3Feature, Option<String>)> {
        let term_id = self.resolve_type(entry, &feature.name)?;
        let cds_like = self.ontology.is_descendant_of(&term_id, CDS);
        let location = &feature.location;

        let mut record = Gff3Feature {
            accession: entry.accession.clone(),
            version: entry.version,
            source: ".".to_string(),
            type_name: feature.name.clone(),
            start: location.span_start(),
            end: location.span_end(),
            score: None,
            strand: if location.is_reverse() {
                Strand::Reverse
            } else {
                Strand::Forward
            },
            phase: if cds_like {
                Some(phase_of(feature))
            } else {
                None
            },
            ..Gff3Feature::default()
        };

        let mut translation = None;
        for qualifier in &feature.qualifiers {
            match qualifier.name.as_str() {
                // Rendered through the phase column.
                "codon_start" | "phase" => {}
                // Exported to the trailing sequence block.
                "translation" => translation = qualifier.value.clone(),
                name => match &qualifier.value {
                    Some(value) => record.push_attribute(name, value.clone()),
                    None => record.push_attribute(name, "true"),
                },
            }
        }
        if location.start_partial() {
            record.push_attribute("partial", "start");
        }
        if location.end_partial() {
            record.push_attribute("partial", "end");
        }
        Ok((record, translation))
    }

    fn resolve_type(&self, entry: &Entry, name: &str) -> Result<String> {
        let term_id = if self.ontology.is_valid_id(name) {
            name.to_string()
        } else {
            self.ontology
                .resolve_name_or_synonym(name)
                .ok_or_else(|| ConvertError::UnresolvableFeatureType {
                    accession: entry.accession.clone(),
                    type_name: name.to_string(),
                })?
                .to_string()
        };
        if !self.ontology.is_descendant_of(&term_id, SEQUENCE_FEATURE) {
            return Err(ConvertError::UnresolvableFeatureType {
                accession: entry.accession.clone(),
                type_name: name.to_string(),
            });
        }
        Ok(term_id)
    }

    /// Circular topology has no per-feature marker in the flat model, so the
    /// output always carries a region landmark with `Is_circular`.
    fn circular_landmark(&self, entry: &Entry, source: &Feature) -> Gff3Feature {
        let mut record = Gff3Feature {
            accession: entry.accession.clone(),
            version: entry.version,
            source: ".".to_string(),
            type_name: "region".to_string(),
            start: source.location.span_start().max(1),
            end: source.location.span_end().max(entry.descriptor.length),
            strand: Strand::Forward,
            ..Gff3Feature::default()
        };
        record.push_attribute("ID", entry.accession.clone());
        record.push_attribute("Is_circular", "true");
        record
    }
}

/// Phase column for a CDS-like feature: explicit `phase` qualifier first,
/// else `codon_start - 1`, else 0.
fn phase_of(feature: &Feature) -> u8 {
    if let Some(phase) = feature
        .qualifier_value("phase")
        .and_then(|v| v.parse::<u8>().ok())
    {
        return phase.min(2);
    }
    feature
        .qualifier_value("codon_start")
        .and_then(|v| v.parse::<u8>().ok())
        .map(|codon_start| codon_start.saturating_sub(1).min(2))
        .unwrap_or(0)
}

/// Groups records by their `gene` attribute: the (start asc, end desc) first
/// member roots the group under `ID=<type>_<gene>`; every other member gets
/// a `Parent` link, inherits the root's `locus_tag`, and loses its own
/// `gene` attribute.
fn assign_gene_hierarchy(records: &mut [Gff3Feature], genes: &[Option<String>]) {
    let mut order: Vec<String> = Vec::new();
    let mut groups: FxHashMap<String, Vec<usize>> = FxHashMap::default();
    for (index, gene) in genes.iter().enumerate() {
        if let Some(gene) = gene {
            let members = groups.entry(gene.clone()).or_default();
            if members.is_empty() {
                order.push(gene.clone());
            }
            members.push(index);
        }
    }
    for gene in order {
        let mut members = groups.remove(&gene).expect("group members");
        members.sort_by(|&a, &b| {
            records[a]
                .start
                .cmp(&records[b].start)
                .then(records[b].end.cmp(&records[a].end))
        });
        let root = members[0];
        let root_id = format!("{}_{}", records[root].type_name, gene);
        records[root].push_attribute("ID", root_id.clone());
        let locus_tag = records[root].attribute("locus_tag").map(str::to_string);
        for &member in &members[1..] {
            records[member].push_attribute("Parent", root_id.clone());
            records[member].attributes.remove("gene");
            if let Some(locus_tag) = &locus_tag {
                if !records[member].attributes.contains_key("locus_tag") {
                    records[member].push_attribute("locus_tag", locus_tag.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{CompoundLocation, Location};
    use crate::ontology::BundledOntology;

    fn feature(name: &str, start: u64, end: u64, qualifiers: &[(&str, Option<&str>)]) -> Feature {
        let mut feature = Feature::new(
            name,
            CompoundLocation::from_location(Location::new(start, end)),
        );
        for (key, value) in qualifiers {
            feature.push_qualifier(*key, value.map(str::to_string));
        }
        feature
    }

    fn entry_with(features: Vec<Feature>) -> Entry {
        let mut entry = Entry::new("AB000001");
        entry.version = Some(1);
        entry.descriptor.length = 500;
        let mut source = feature("source", 1, 500, &[]);
        source.push_qualifier("organism", Some("Homo sapiens".to_string()));
        source.push_qualifier("db_xref", Some("taxon:9606".to_string()));
        entry.features.push(source);
        entry.features.extend(features);
        entry
    }

    fn map(entry: &Entry) -> Result<MappedEntry> {
        let ontology = BundledOntology::load().unwrap();
        Gff3Mapper::new(&ontology).map_entry(entry)
    }

    #[test]
    fn source_feature_becomes_directives() {
        let mapped = map(&entry_with(vec![feature("gene", 10, 100, &[])])).unwrap();
        let annotation = &mapped.annotation;
        assert_eq!(annotation.region.seqid(), "AB000001.1");
        assert_eq!(annotation.region.end, 500);
        assert_eq!(annotation.species.len(), 1);
        assert_eq!(annotation.species[0].taxon_id(), Some(9606));
        // The source feature itself is not emitted.
        assert_eq!(annotation.features.len(), 1);
        assert_eq!(annotation.features[0].type_name, "gene");
    }

    #[test]
    fn missing_source_feature_is_fatal() {
        let mut entry = Entry::new("AB000001");
        entry.features.push(feature("gene", 1, 10, &[]));
        assert!(matches!(
            map(&entry),
            Err(ConvertError::MissingSourceFeature { .. })
        ));
    }

    #[test]
    fn gene_group_links_children_to_the_widest_first_member() {
        let mapped = map(&entry_with(vec![
            feature("CDS", 10, 300, &[("gene", Some("RHD")), ("codon_start", Some("1"))]),
            feature(
                "gene",
                10,
                400,
                &[("gene", Some("RHD")), ("locus_tag", Some("LT_001"))],
            ),
        ]))
        .unwrap();
        let records = &mapped.annotation.features;
        assert_eq!(records[0].type_name, "gene");
        assert_eq!(records[0].id(), Some("gene_RHD"));
        assert_eq!(records[0].attribute("gene"), Some("RHD"));
        let cds = &records[1];
        assert_eq!(cds.parent(), Some("gene_RHD"));
        assert_eq!(cds.attribute("gene"), None);
        assert_eq!(cds.attribute("locus_tag"), Some("LT_001"));
        assert_eq!(cds.phase, Some(0));
    }

    #[test]
    fn standalone_features_get_no_linkage() {
        let mapped = map(&entry_with(vec![feature(
            "repeat_region",
            50,
            80,
            &[("note", Some("alu"))],
        )]))
        .unwrap();
        let record = &mapped.annotation.features[0];
        assert_eq!(record.id(), None);
        assert_eq!(record.parent(), None);
    }

    #[test]
    fn strand_partiality_and_phase_render() {
        let mut location = Location::new(20, 220);
        location.complement = true;
        let mut cds = Feature::new("CDS", CompoundLocation::from_location(location));
        cds.location.segments[0].set_lower_partial(true);
        cds.push_qualifier("codon_start", Some("3".to_string()));
        let mapped = map(&entry_with(vec![cds])).unwrap();
        let record = &mapped.annotation.features[0];
        assert_eq!(record.strand, Strand::Reverse);
        assert_eq!(record.phase, Some(2));
        assert_eq!(
            record.attributes.get("partial").map(Vec::as_slice),
            Some(["start".to_string()].as_slice())
        );
    }

    #[test]
    fn circular_topology_synthesizes_a_region_landmark() {
        let mut entry = entry_with(vec![feature("gene", 10, 100, &[])]);
        entry.descriptor.topology = Topology::Circular;
        let mapped = map(&entry).unwrap();
        let landmark = &mapped.annotation.features[0];
        assert_eq!(landmark.type_name, "region");
        assert_eq!(landmark.id(), Some("AB000001"));
        assert_eq!(landmark.attribute("Is_circular"), Some("true"));
        assert_eq!(landmark.end, 500);
    }

    #[test]
    fn circular_rna_qualifier_suppresses_the_landmark() {
        let mut entry = entry_with(vec![feature("gene", 10, 100, &[("circular_RNA", None)])]);
        entry.descriptor.topology = Topology::Circular;
        let mapped = map(&entry).unwrap();
        assert!(mapped
            .annotation
            .features
            .iter()
            .all(|f| f.type_name != "region"));
    }

    #[test]
    fn translations_are_exported_with_stable_keys() {
        let mapped = map(&entry_with(vec![
            feature("gene", 10, 400, &[("gene", Some("RHD"))]),
            feature(
                "CDS",
                10,
                300,
                &[("gene", Some("RHD")), ("translation", Some("MKVL"))],
            ),
            feature("CDS", 420, 480, &[("translation", Some("MR"))]),
        ]))
        .unwrap();
        assert_eq!(mapped.translations.len(), 2);
        // The grouped CDS has no ID of its own, so one is assigned.
        assert_eq!(mapped.translations[0].0, "AB000001|CDS_1");
        assert_eq!(mapped.translations[0].1, "MKVL");
        assert_eq!(mapped.translations[1].0, "AB000001|CDS_2");
    }

    #[test]
    fn flag_qualifiers_render_as_true() {
        let mapped = map(&entry_with(vec![feature(
            "CDS",
            10,
            100,
            &[("ribosomal_slippage", None)],
        )]))
        .unwrap();
        assert_eq!(
            mapped.annotation.features[0].attribute("ribosomal_slippage"),
            Some("true")
        );
    }
}
