//! Integration test for whole-file conversion: flat-file -> GFF3 -> flat-file
//! Exercises gene grouping, the translation block, circular topology, and
//! compressed-input rejection through the public facade.

use std::fs;
use std::path::PathBuf;

use flatgff::convert::{flat_to_gff3, gff3_to_flat, ConversionReport};
use flatgff::entry::{Entry, Topology};
use flatgff::flatfile::FlatFileReader;
use flatgff::validate::ValidationEngine;
use tempfile::TempDir;

const FLAT_SAMPLE: &str = "\
ID   AB000001; SV 2; linear; genomic DNA; STD; XXX; 24 BP.
XX
AC   AB000001;
XX
DE   test record
XX
OS   Homo sapiens
XX
FH   Key             Location/Qualifiers
FH
FT   source          1..24
FT                   /organism=\"Homo sapiens\"
FT                   /mol_type=\"genomic DNA\"
FT                   /db_xref=\"taxon:9606\"
FT   gene            2..20
FT                   /gene=\"RHD\"
FT   CDS             2..15
FT                   /gene=\"RHD\"
FT                   /codon_start=1
FT                   /translation=\"MK\"
XX
SQ   Sequence 24 BP; 6 A; 6 C; 6 G; 6 T; 0 other;
     acgtacgtac gtacgtacgt acgt                                            24
//
";

const CIRCULAR_SAMPLE: &str = "\
ID   AB000002; SV 1; circular; genomic DNA; STD; XXX; 8 BP.
XX
AC   AB000002;
XX
FH   Key             Location/Qualifiers
FH
FT   source          1..8
FT                   /organism=\"Test virus\"
FT                   /mol_type=\"genomic DNA\"
FT   gene            2..6
FT                   /gene=\"rep\"
XX
SQ   Sequence 8 BP; 2 A; 2 C; 2 G; 2 T; 0 other;
     acgtacgt                                                                8
//
";

fn write_input(dir: &TempDir, name: &str, text: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, text).unwrap();
    path
}

fn to_gff3(flat_text: &str) -> (String, ConversionReport) {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "input.dat", flat_text);
    let mut out = Vec::new();
    let mut engine = ValidationEngine::with_defaults();
    let report = flat_to_gff3(&input, &mut out, &mut engine).unwrap();
    (String::from_utf8(out).unwrap(), report)
}

fn to_flat(gff3_text: &str) -> (String, ConversionReport) {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "input.gff3", gff3_text);
    let mut out = Vec::new();
    let mut engine = ValidationEngine::with_defaults();
    let report = gff3_to_flat(&input, &mut out, &mut engine).unwrap();
    (String::from_utf8(out).unwrap(), report)
}

fn parse_entries(flat_text: &str) -> Vec<Entry> {
    let mut reader = FlatFileReader::new(flat_text.as_bytes());
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().unwrap() {
        entries.push(entry);
    }
    entries
}

/// Feature content as comparable tuples: name, span, sorted qualifiers.
fn feature_shapes(entry: &Entry) -> Vec<(String, u64, u64, Vec<(String, Option<String>)>)> {
    entry
        .features
        .iter()
        .map(|feature| {
            let mut qualifiers: Vec<(String, Option<String>)> = feature
                .qualifiers
                .iter()
                .map(|q| (q.name.clone(), q.value.clone()))
                .collect();
            qualifiers.sort();
            (
                feature.name.clone(),
                feature.location.span_start(),
                feature.location.span_end(),
                qualifiers,
            )
        })
        .collect()
}

#[test]
fn flat_to_gff3_emits_directives_hierarchy_and_sequences() {
    let (text, report) = to_gff3(FLAT_SAMPLE);
    assert_eq!(report.records, 1);
    assert!(report.warnings.is_empty());

    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "##gff-version 3");
    assert_eq!(lines[1], "##sequence-region AB000001.2 1 24");
    assert!(lines[2].starts_with("##species "));
    assert!(lines[2].contains("id=9606"));
    assert_eq!(
        lines[3],
        "AB000001.2\t.\tgene\t2\t20\t.\t+\t.\tID=gene_RHD;gene=RHD"
    );
    assert_eq!(
        lines[4],
        "AB000001.2\t.\tCDS\t2\t15\t.\t+\t0\tID=CDS_1;Parent=gene_RHD"
    );
    assert_eq!(lines[5], "###");
    assert_eq!(lines[6], "##FASTA");
    assert_eq!(lines[7], ">AB000001");
    assert_eq!(lines[8], "acgtacgtacgtacgtacgtacgt");
    assert_eq!(lines[9], ">AB000001|CDS_1");
    assert_eq!(lines[10], "MK");
}

#[test]
fn gff3_to_flat_rebuilds_features_and_sequence() {
    let (gff3_text, _) = to_gff3(FLAT_SAMPLE);
    let (flat_text, report) = to_flat(&gff3_text);
    assert_eq!(report.records, 1);

    assert!(flat_text.starts_with("ID   AB000001; SV 2; linear; genomic DNA; STD; XXX; 24 BP."));
    assert!(flat_text.contains("OS   Homo sapiens"));
    assert!(flat_text.contains("FT   gene            2..20"));
    assert!(flat_text.contains("FT   CDS             2..15"));
    assert!(flat_text.contains("/translation=\"MK\""));
    assert!(flat_text.contains("SQ   Sequence 24 BP; 6 A; 6 C; 6 G; 6 T; 0 other;"));
}

#[test]
fn round_trip_preserves_feature_content() {
    let (gff3_text, _) = to_gff3(FLAT_SAMPLE);
    let (flat_text, _) = to_flat(&gff3_text);

    let original = parse_entries(FLAT_SAMPLE);
    let rebuilt = parse_entries(&flat_text);
    assert_eq!(original.len(), 1);
    assert_eq!(rebuilt.len(), 1);

    assert_eq!(rebuilt[0].accession, original[0].accession);
    assert_eq!(rebuilt[0].version, original[0].version);
    assert_eq!(rebuilt[0].descriptor.topology, original[0].descriptor.topology);
    assert_eq!(feature_shapes(&rebuilt[0]), feature_shapes(&original[0]));
    assert_eq!(
        rebuilt[0].sequence.to_bytes().unwrap(),
        original[0].sequence.to_bytes().unwrap()
    );
}

#[test]
fn circular_topology_survives_the_round_trip() {
    let (gff3_text, _) = to_gff3(CIRCULAR_SAMPLE);
    assert!(gff3_text.contains("\tregion\t1\t8\t"));
    assert!(gff3_text.contains("Is_circular=true"));

    let (flat_text, report) = to_flat(&gff3_text);
    assert_eq!(report.records, 1);
    assert!(flat_text.starts_with("ID   AB000002; SV 1; circular;"));

    let rebuilt = parse_entries(&flat_text);
    assert_eq!(rebuilt[0].descriptor.topology, Topology::Circular);
    // The landmark is structural only; it never becomes a feature.
    assert!(rebuilt[0].features.iter().all(|f| f.name != "region"));
}

#[test]
fn regular_gzip_input_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("input.gff3.gz");
    // Plain gzip header: no FEXTRA flag, so no BC subfield.
    let mut bytes = vec![0x1f, 0x8b, 0x08, 0x00];
    bytes.extend([0u8; 16]);
    fs::write(&path, bytes).unwrap();

    let mut out = Vec::new();
    let mut engine = ValidationEngine::with_defaults();
    let err = gff3_to_flat(&path, &mut out, &mut engine).unwrap_err();
    assert!(err.to_string().contains("BGZF"));
}
