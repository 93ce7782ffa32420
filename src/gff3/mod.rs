//! GFF3 model and text conventions
//!
//! Holds the in-memory shape of one annotation (sequence-region directive,
//! species directives, feature records) plus the attribute percent-encoding
//! rules shared by the reader and writer.

pub mod reader;
pub mod writer;

use std::collections::BTreeMap;
use std::fmt;

pub use reader::Gff3Reader;
pub use writer::Gff3Writer;

/// Strand column of a feature record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strand {
    Forward,
    Reverse,
    #[default]
    Unknown,
}

impl Strand {
    pub fn symbol(&self) -> char {
        match self {
            Strand::Forward => '+',
            Strand::Reverse => '-',
            Strand::Unknown => '.',
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "+" => Some(Strand::Forward),
            "-" => Some(Strand::Reverse),
            "." | "?" => Some(Strand::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// One nine-column feature record.
///
/// Attributes keep every value seen for a key, in input order; the map itself
/// is sorted so rendering is deterministic.
#[derive(Debug, Clone, Default)]
pub struct Gff3Feature {
    pub accession: String,
    pub version: Option<u32>,
    pub source: String,
    pub type_name: String,
    pub start: u64,
    pub end: u64,
    pub score: Option<f64>,
    pub strand: Strand,
    pub phase: Option<u8>,
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl Gff3Feature {
    pub fn id(&self) -> Option<&str> {
        self.attribute("ID")
    }

    pub fn parent(&self) -> Option<&str> {
        self.attribute("Parent")
    }

    /// First value recorded under `key`.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn push_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes
            .entry(key.into())
            .or_default()
            .push(value.into());
    }

    /// Seqid column text, with the version suffix when one is carried.
    pub fn seqid(&self) -> String {
        match self.version {
            Some(version) => format!("{}.{}", self.accession, version),
            None => self.accession.clone(),
        }
    }
}

/// `##sequence-region` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRegion {
    pub accession: String,
    pub version: Option<u32>,
    pub start: u64,
    pub end: u64,
}

impl SequenceRegion {
    pub fn seqid(&self) -> String {
        match self.version {
            Some(version) => format!("{}.{}", self.accession, version),
            None => self.accession.clone(),
        }
    }
}

/// `##species` directive. The URL carries the organism name and/or taxon id
/// as query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Species {
    pub url: String,
}

impl Species {
    const TAXONOMY_BROWSER: &'static str =
        "https://www.ncbi.nlm.nih.gov/Taxonomy/Browser/wwwtax.cgi";

    pub fn from_organism(organism: Option<&str>, taxon_id: Option<u64>) -> Option<Self> {
        let mut params = Vec::new();
        if let Some(id) = taxon_id {
            params.push(format!("id={id}"));
        }
        if let Some(name) = organism {
            params.push(format!("name={}", name.replace(' ', "+")));
        }
        if params.is_empty() {
            return None;
        }
        Some(Species {
            url: format!("{}?{}", Self::TAXONOMY_BROWSER, params.join("&")),
        })
    }

    fn query_param(&self, key: &str) -> Option<&str> {
        let query = self.url.split_once('?')?.1;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    pub fn organism(&self) -> Option<String> {
        self.query_param("name").map(|name| name.replace('+', " "))
    }

    pub fn taxon_id(&self) -> Option<u64> {
        self.query_param("id").and_then(|id| id.parse().ok())
    }
}

/// One accession's worth of directives and features.
#[derive(Debug, Clone)]
pub struct Gff3Annotation {
    pub region: SequenceRegion,
    pub species: Vec<Species>,
    pub features: Vec<Gff3Feature>,
}

impl Gff3Annotation {
    pub fn accession(&self) -> &str {
        &self.region.accession
    }
}

/// Splits a seqid column into accession and trailing numeric version.
pub fn split_seqid(seqid: &str) -> (String, Option<u32>) {
    if let Some((accession, suffix)) = seqid.rsplit_once('.') {
        if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(version) = suffix.parse() {
                return (accession.to_string(), Some(version));
            }
        }
    }
    (seqid.to_string(), None)
}

/// Percent-decodes attribute text. Malformed escapes are kept verbatim.
pub fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Percent-encodes one attribute value: the structural characters of the
/// attribute grammar, the percent sign itself, and control characters.
pub fn percent_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for b in text.bytes() {
        match b {
            b';' | b'=' | b'&' | b',' | b'%' | b'\t' | b'\n' | b'\r' => {
                out.push_str(&format!("%{b:02X}"));
            }
            0x20..=0x7E => out.push(b as char),
            // Control and non-ASCII bytes are escaped byte by byte.
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seqid_version_split() {
        assert_eq!(split_seqid("AB000001.2"), ("AB000001".to_string(), Some(2)));
        assert_eq!(split_seqid("AB000001"), ("AB000001".to_string(), None));
        assert_eq!(split_seqid("chr1.alt"), ("chr1.alt".to_string(), None));
    }

    #[test]
    fn percent_codec_round_trips_structural_chars() {
        let raw = "beta-globin; exon=2, 50%";
        let encoded = percent_encode(raw);
        assert!(!encoded.contains(';'));
        assert!(!encoded.contains('='));
        assert!(!encoded.contains(','));
        assert_eq!(percent_decode(&encoded), raw);
    }

    #[test]
    fn decode_keeps_malformed_escapes() {
        assert_eq!(percent_decode("50%GC"), "50%GC");
        assert_eq!(percent_decode("a%2"), "a%2");
    }

    #[test]
    fn species_url_carries_query_params() {
        let species = Species::from_organism(Some("Homo sapiens"), Some(9606)).unwrap();
        assert_eq!(species.taxon_id(), Some(9606));
        assert_eq!(species.organism(), Some("Homo sapiens".to_string()));
        assert!(Species::from_organism(None, None).is_none());
    }
}
