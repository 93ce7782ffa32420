//! Feature-type ontology lookup
//!
//! The converter only needs three questions answered about feature types: is
//! this string a known term id, which term does this name or synonym belong
//! to, and does one term descend from another. `BundledOntology` answers
//! them from a Sequence Ontology subset compiled into the binary; anything
//! richer can be swapped in behind the same trait.

use regex::Regex;
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::error::Result;

const SO_TERMS_JSON: &str = include_str!("../assets/so_terms.json");
const QUALIFIER_DEFAULTS_JSON: &str = include_str!("../assets/qualifier_defaults.json");

/// Root term every feature type must descend from.
pub const SEQUENCE_FEATURE: &str = "SO:0000110";
/// Term carried by circular-topology landmark features.
pub const REGION: &str = "SO:0000001";
/// Term for coding sequences, the only type that takes translations.
pub const CDS: &str = "SO:0000316";

/// Lookup client used by both mapper directions.
pub trait OntologyLookup {
    fn is_valid_id(&self, id: &str) -> bool;
    fn resolve_name_or_synonym(&self, name: &str) -> Option<&str>;
    fn is_descendant_of(&self, id: &str, ancestor_id: &str) -> bool;

    /// Canonical display name for a term id, when the implementation knows it.
    fn canonical_name(&self, _id: &str) -> Option<&str> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct TermRecord {
    id: String,
    name: String,
    #[serde(default)]
    synonyms: Vec<String>,
    #[serde(default)]
    parents: Vec<String>,
}

/// Ontology subset loaded from the bundled term table.
pub struct BundledOntology {
    terms: Vec<TermRecord>,
    by_id: FxHashMap<String, usize>,
    by_name: FxHashMap<String, usize>,
    id_pattern: Regex,
}

impl BundledOntology {
    pub fn load() -> Result<Self> {
        let terms: Vec<TermRecord> = serde_json::from_str(SO_TERMS_JSON)?;
        let mut by_id = FxHashMap::default();
        let mut by_name = FxHashMap::default();
        for (idx, term) in terms.iter().enumerate() {
            by_id.insert(term.id.clone(), idx);
            by_name.insert(term.name.to_ascii_lowercase(), idx);
            for synonym in &term.synonyms {
                by_name.entry(synonym.to_ascii_lowercase()).or_insert(idx);
            }
        }
        Ok(BundledOntology {
            terms,
            by_id,
            by_name,
            id_pattern: Regex::new(r"^SO:\d{7}$").expect("regex"),
        })
    }

    /// True when the string has the shape of a term id, whether or not the
    /// bundled subset knows it.
    pub fn looks_like_id(&self, text: &str) -> bool {
        self.id_pattern.is_match(text)
    }

    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(|&idx| self.terms[idx].name.as_str())
    }
}

impl OntologyLookup for BundledOntology {
    fn is_valid_id(&self, id: &str) -> bool {
        self.id_pattern.is_match(id) && self.by_id.contains_key(id)
    }

    fn resolve_name_or_synonym(&self, name: &str) -> Option<&str> {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .map(|&idx| self.terms[idx].id.as_str())
    }

    /// Reflexive transitive walk over the parent links.
    fn is_descendant_of(&self, id: &str, ancestor_id: &str) -> bool {
        if id == ancestor_id {
            return true;
        }
        let Some(&start) = self.by_id.get(id) else {
            return false;
        };
        let mut stack = vec![start];
        let mut seen = vec![false; self.terms.len()];
        while let Some(idx) = stack.pop() {
            if seen[idx] {
                continue;
            }
            seen[idx] = true;
            for parent in &self.terms[idx].parents {
                if parent == ancestor_id {
                    return true;
                }
                if let Some(&pidx) = self.by_id.get(parent) {
                    stack.push(pidx);
                }
            }
        }
        false
    }

    fn canonical_name(&self, id: &str) -> Option<&str> {
        self.name_of(id)
    }
}

#[derive(Debug, Deserialize)]
struct DefaultQualifier {
    name: String,
    value: String,
}

/// Per-feature-type default qualifiers, applied by the mapper only when the
/// incoming record carries no qualifier of that name.
pub struct QualifierDefaults {
    by_type: FxHashMap<String, Vec<DefaultQualifier>>,
}

impl QualifierDefaults {
    pub fn load() -> Result<Self> {
        let by_type: FxHashMap<String, Vec<DefaultQualifier>> =
            serde_json::from_str(QUALIFIER_DEFAULTS_JSON)?;
        Ok(QualifierDefaults { by_type })
    }

    pub fn for_type(&self, type_name: &str) -> impl Iterator<Item = (&str, &str)> {
        self.by_type
            .get(type_name)
            .into_iter()
            .flatten()
            .map(|q| (q.name.as_str(), q.value.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_table_parses() {
        let ontology = BundledOntology::load().unwrap();
        assert!(ontology.is_valid_id(CDS));
        assert!(!ontology.is_valid_id("SO:9999999"));
        assert!(!ontology.is_valid_id("CDS"));
    }

    #[test]
    fn names_and_synonyms_resolve() {
        let ontology = BundledOntology::load().unwrap();
        assert_eq!(ontology.resolve_name_or_synonym("CDS"), Some(CDS));
        assert_eq!(ontology.resolve_name_or_synonym("mRNA"), Some("SO:0000234"));
        assert_eq!(
            ontology.resolve_name_or_synonym("misc_feature"),
            Some("SO:0001411")
        );
        assert_eq!(
            ontology.resolve_name_or_synonym("rep_origin"),
            Some("SO:0000296")
        );
        assert_eq!(ontology.resolve_name_or_synonym("plasmid_vector"), None);
    }

    #[test]
    fn descent_walks_transitively_and_is_reflexive() {
        let ontology = BundledOntology::load().unwrap();
        assert!(ontology.is_descendant_of("SO:0000234", SEQUENCE_FEATURE));
        assert!(ontology.is_descendant_of("SO:0000253", "SO:0000673"));
        assert!(ontology.is_descendant_of(SEQUENCE_FEATURE, SEQUENCE_FEATURE));
        assert!(!ontology.is_descendant_of(SEQUENCE_FEATURE, CDS));
        assert!(!ontology.is_descendant_of("SO:9999999", SEQUENCE_FEATURE));
    }

    #[test]
    fn defaults_cover_cds_codon_start() {
        let defaults = QualifierDefaults::load().unwrap();
        let cds: Vec<_> = defaults.for_type("CDS").collect();
        assert!(cds.contains(&("codon_start", "1")));
        assert_eq!(defaults.for_type("exon").count(), 0);
    }
}
