//! GFF3 writer
//!
//! Emits the version pragma once, then per annotation the sequence-region
//! and species directives, the nine-column feature records, and a `###`
//! resolution marker. A trailing `##FASTA` block carries whole-record
//! nucleotide sequences and per-feature translations.

use std::io::Write;

use log::debug;

use super::{percent_encode, Gff3Annotation, Gff3Feature};
use crate::error::Result;
use crate::trans_index::FASTA_MARKER;

const SEQUENCE_WRAP: usize = 60;

pub struct Gff3Writer<W: Write> {
    out: W,
    header_written: bool,
    fasta_open: bool,
}

impl<W: Write> Gff3Writer<W> {
    pub fn new(out: W) -> Self {
        Gff3Writer {
            out,
            header_written: false,
            fasta_open: false,
        }
    }

    pub fn write_header(&mut self) -> Result<()> {
        if !self.header_written {
            writeln!(self.out, "##gff-version 3")?;
            self.header_written = true;
        }
        Ok(())
    }

    pub fn write_annotation(&mut self, annotation: &Gff3Annotation) -> Result<()> {
        self.write_header()?;
        let region = &annotation.region;
        writeln!(
            self.out,
            "##sequence-region {} {} {}",
            region.seqid(),
            region.start,
            region.end
        )?;
        for species in &annotation.species {
            writeln!(self.out, "##species {}", species.url)?;
        }
        for feature in &annotation.features {
            self.write_feature(feature)?;
        }
        writeln!(self.out, "###")?;
        debug!(
            "wrote annotation {} with {} feature(s)",
            region.accession,
            annotation.features.len()
        );
        Ok(())
    }

    fn write_feature(&mut self, feature: &Gff3Feature) -> Result<()> {
        let score = match feature.score {
            Some(score) => score.to_string(),
            None => ".".to_string(),
        };
        let phase = match feature.phase {
            Some(phase) => phase.to_string(),
            None => ".".to_string(),
        };
        writeln!(
            self.out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            feature.seqid(),
            feature.source,
            feature.type_name,
            feature.start,
            feature.end,
            score,
            feature.strand,
            phase,
            render_attributes(feature)
        )?;
        Ok(())
    }

    /// Opens the trailing sequence block and writes one record under `key`.
    pub fn write_sequence(&mut self, key: &str, sequence: &str) -> Result<()> {
        self.write_header()?;
        if !self.fasta_open {
            writeln!(self.out, "{FASTA_MARKER}")?;
            self.fasta_open = true;
        }
        writeln!(self.out, ">{key}")?;
        let bytes = sequence.as_bytes();
        for chunk in bytes.chunks(SEQUENCE_WRAP) {
            self.out.write_all(chunk)?;
            self.out.write_all(b"\n")?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Attribute column: keys in lexicographic order, values joined by comma,
/// each value percent-encoded.
fn render_attributes(feature: &Gff3Feature) -> String {
    if feature.attributes.is_empty() {
        return ".".to_string();
    }
    feature
        .attributes
        .iter()
        .map(|(key, values)| {
            let joined: Vec<String> = values.iter().map(|v| percent_encode(v)).collect();
            format!("{}={}", key, joined.join(","))
        })
        .collect::<Vec<_>>()
        .join(";")
}
