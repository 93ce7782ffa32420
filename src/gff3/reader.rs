//! GFF3 streaming reader
//!
//! Line-oriented state machine over a buffered stream. Directives, comments,
//! resolution markers, and nine-column feature records are recognized one
//! line at a time; one complete [`Gff3Annotation`] is emitted per accession
//! run. The explicit `###` marker flushes the pending annotation, and so
//! does a plain accession change between consecutive feature records, since
//! many producers never write the marker. Every parsed feature and every
//! completed annotation passes through the injected validation engine before
//! it is accepted.

use std::io::BufRead;

use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};

use super::{
    percent_decode, split_seqid, Gff3Annotation, Gff3Feature, SequenceRegion, Species, Strand,
};
use crate::error::{ConvertError, Result};
use crate::trans_index::FASTA_MARKER;
use crate::validate::ValidationEngine;

const VERSION_DIRECTIVE: &str = "##gff-version";
const REGION_DIRECTIVE: &str = "##sequence-region";
const SPECIES_DIRECTIVE: &str = "##species";
const RESOLUTION_MARKER: &str = "###";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingHeader,
    Scanning,
    Eof,
}

struct PendingAnnotation {
    region: SequenceRegion,
    region_synthesized: bool,
    species: Vec<Species>,
    features: Vec<Gff3Feature>,
}

/// Streaming reader bound to a validation engine for the run.
pub struct Gff3Reader<'a, R: BufRead> {
    input: R,
    engine: &'a mut ValidationEngine,
    pushback: Option<String>,
    line_no: u64,
    state: State,
    regions: FxHashMap<String, SequenceRegion>,
    flushed: FxHashSet<String>,
    last_flushed: Option<String>,
    pending: Option<PendingAnnotation>,
    pending_species: Vec<Species>,
}

impl<'a, R: BufRead> Gff3Reader<'a, R> {
    pub fn new(input: R, engine: &'a mut ValidationEngine) -> Self {
        Gff3Reader {
            input,
            engine,
            pushback: None,
            line_no: 0,
            state: State::AwaitingHeader,
            regions: FxHashMap::default(),
            flushed: FxHashSet::default(),
            last_flushed: None,
            pending: None,
            pending_species: Vec::new(),
        }
    }

    /// Next logical line, honoring the one-slot pushback.
    fn next_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.pushback.take() {
            return Ok(Some(line));
        }
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Restores one line for the next logical read.
    fn push_back(&mut self, line: String) {
        debug_assert!(self.pushback.is_none(), "pushback slot already occupied");
        self.pushback = Some(line);
    }

    /// Consumes the version directive. The first non-blank, non-comment line
    /// must be `##gff-version <ver>`; anything else is a syntactic error
    /// (restored to the stream when the severity policy demotes it, with the
    /// version assumed to be 3).
    pub fn read_header(&mut self) -> Result<String> {
        loop {
            let Some(line) = self.next_line()? else {
                self.state = State::Eof;
                self.engine.handle_syntactic(
                    "gff3.header",
                    self.line_no,
                    "stream ended before a ##gff-version directive".to_string(),
                )?;
                return Ok("3".to_string());
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(version) = trimmed.strip_prefix(VERSION_DIRECTIVE) {
                let version = version.trim();
                if version.is_empty() {
                    self.engine.handle_syntactic(
                        "gff3.header",
                        self.line_no,
                        "##gff-version directive without a version".to_string(),
                    )?;
                }
                self.state = State::Scanning;
                debug!("gff-version {version}");
                return Ok(version.to_string());
            }
            if trimmed.starts_with("##") || !trimmed.starts_with('#') {
                self.engine.handle_syntactic(
                    "gff3.header",
                    self.line_no,
                    format!("expected {VERSION_DIRECTIVE}, found '{trimmed}'"),
                )?;
                // Demoted: assume version 3 and let the line be re-read.
                self.push_back(line);
                self.state = State::Scanning;
                return Ok("3".to_string());
            }
            // Plain comment before the header.
        }
    }

    /// Produces the next annotation, or `None` at end of stream.
    pub fn next_annotation(&mut self) -> Result<Option<Gff3Annotation>> {
        if self.state == State::AwaitingHeader {
            self.read_header()?;
        }
        if self.state == State::Eof {
            return Ok(None);
        }
        loop {
            let Some(line) = self.next_line()? else {
                self.state = State::Eof;
                return self.flush();
            };
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed == RESOLUTION_MARKER {
                if let Some(annotation) = self.flush()? {
                    return Ok(Some(annotation));
                }
                continue;
            }
            if trimmed == FASTA_MARKER {
                // The trailing sequence block is indexed separately.
                self.state = State::Eof;
                return self.flush();
            }
            if let Some(rest) = trimmed.strip_prefix(REGION_DIRECTIVE) {
                self.handle_region_directive(rest.trim())?;
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix(SPECIES_DIRECTIVE) {
                let species = Species {
                    url: rest.trim().to_string(),
                };
                match &mut self.pending {
                    Some(pending) => pending.species.push(species),
                    None => self.pending_species.push(species),
                }
                continue;
            }
            if trimmed.starts_with(VERSION_DIRECTIVE) {
                trace!("ignoring repeated version directive at line {}", self.line_no);
                continue;
            }
            if trimmed.starts_with('#') {
                continue;
            }
            // Feature record. An accession change flushes the pending
            // annotation first; the record is restored for the next call.
            let (accession, _) = split_seqid(trimmed.split('\t').next().unwrap_or(""));
            if let Some(pending) = &self.pending {
                if pending.region.accession != accession {
                    debug!(
                        "accession change {} -> {} at line {}",
                        pending.region.accession, accession, self.line_no
                    );
                    self.push_back(line);
                    return self.flush();
                }
            }
            if let Some(feature) = self.parse_feature(trimmed)? {
                self.accept_feature(feature)?;
            }
        }
    }

    fn handle_region_directive(&mut self, rest: &str) -> Result<()> {
        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() != 3 {
            return self.engine.handle_syntactic(
                "gff3.record",
                self.line_no,
                format!("malformed sequence-region directive '{rest}'"),
            );
        }
        let (accession, version) = split_seqid(fields[0]);
        let (Ok(start), Ok(end)) = (fields[1].parse(), fields[2].parse()) else {
            return self.engine.handle_syntactic(
                "gff3.record",
                self.line_no,
                format!("non-numeric sequence-region bounds '{rest}'"),
            );
        };
        let region = SequenceRegion {
            accession: accession.clone(),
            version,
            start,
            end,
        };
        if self.regions.contains_key(&accession) {
            self.engine.handle_syntactic(
                "gff3.sequence-region.duplicate",
                self.line_no,
                format!("sequence-region {accession} declared more than once"),
            )?;
            return Ok(());
        }
        self.regions.insert(accession, region);
        Ok(())
    }

    /// Parses one nine-column record. Returns `None` when a syntactic finding
    /// was demoted and the record is skipped.
    fn parse_feature(&mut self, line: &str) -> Result<Option<Gff3Feature>> {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() != 9 {
            self.engine.handle_syntactic(
                "gff3.record",
                self.line_no,
                format!("expected 9 tab-separated columns, found {}", cols.len()),
            )?;
            return Ok(None);
        }
        let (accession, version) = split_seqid(cols[0]);
        // A directly following run of the accession just flushed is legal
        // (the facade merges those); coming back to it later is not.
        if self.flushed.contains(&accession)
            && self.last_flushed.as_deref() != Some(accession.as_str())
        {
            return Err(ConvertError::AccessionRevisited {
                accession,
                line: self.line_no,
            });
        }
        if !self.regions.contains_key(&accession) {
            self.engine.handle_syntactic(
                "gff3.sequence-region.undeclared",
                self.line_no,
                format!("feature references undeclared sequence-region '{accession}'"),
            )?;
            // Demoted: synthesize a region so scanning can continue; its end
            // grows with the features it receives.
            self.regions.insert(
                accession.clone(),
                SequenceRegion {
                    accession: accession.clone(),
                    version,
                    start: 1,
                    end: 0,
                },
            );
        }
        let (Ok(start), Ok(end)) = (cols[3].parse::<u64>(), cols[4].parse::<u64>()) else {
            self.engine.handle_syntactic(
                "gff3.record",
                self.line_no,
                format!("non-numeric coordinates '{}'/'{}'", cols[3], cols[4]),
            )?;
            return Ok(None);
        };
        let score = if cols[5] == "." {
            None
        } else {
            match cols[5].parse::<f64>() {
                Ok(score) => Some(score),
                Err(_) => {
                    self.engine.handle_syntactic(
                        "gff3.record",
                        self.line_no,
                        format!("non-numeric score '{}'", cols[5]),
                    )?;
                    None
                }
            }
        };
        let Some(strand) = Strand::from_symbol(cols[6]) else {
            self.engine.handle_syntactic(
                "gff3.record",
                self.line_no,
                format!("invalid strand '{}'", cols[6]),
            )?;
            return Ok(None);
        };
        let phase = match cols[7] {
            "." => None,
            "0" => Some(0),
            "1" => Some(1),
            "2" => Some(2),
            other => {
                self.engine.handle_syntactic(
                    "gff3.record",
                    self.line_no,
                    format!("invalid phase '{other}'"),
                )?;
                None
            }
        };

        let mut feature = Gff3Feature {
            accession,
            version,
            source: cols[1].to_string(),
            type_name: cols[2].to_string(),
            start,
            end,
            score,
            strand,
            phase,
            ..Gff3Feature::default()
        };
        for pair in cols[8].split(';') {
            let pair = pair.trim();
            if pair.is_empty() || pair == "." {
                continue;
            }
            let Some((key, values)) = pair.split_once('=') else {
                self.engine.handle_syntactic(
                    "gff3.attributes",
                    self.line_no,
                    format!("attribute '{pair}' has no '='"),
                )?;
                continue;
            };
            for value in values.split(',') {
                feature.push_attribute(key, percent_decode(value));
            }
        }
        self.engine.validate_feature(&feature, self.line_no)?;
        Ok(Some(feature))
    }

    fn accept_feature(&mut self, feature: Gff3Feature) -> Result<()> {
        if self.pending.is_none() {
            let region = self.regions[&feature.accession].clone();
            let region_synthesized = region.end == 0;
            self.pending = Some(PendingAnnotation {
                region,
                region_synthesized,
                species: std::mem::take(&mut self.pending_species),
                features: Vec::new(),
            });
        }
        let pending = self.pending.as_mut().expect("pending annotation");
        if pending.region_synthesized {
            pending.region.end = pending.region.end.max(feature.end);
            if let Some(declared) = self.regions.get_mut(&pending.region.accession) {
                declared.end = pending.region.end;
            }
        }
        pending.features.push(feature);
        Ok(())
    }

    /// Completes and returns the pending annotation, if any.
    fn flush(&mut self) -> Result<Option<Gff3Annotation>> {
        let Some(pending) = self.pending.take() else {
            return Ok(None);
        };
        let annotation = Gff3Annotation {
            region: pending.region,
            species: pending.species,
            features: pending.features,
        };
        self.engine.validate_annotation(&annotation, self.line_no)?;
        self.flushed.insert(annotation.region.accession.clone());
        self.last_flushed = Some(annotation.region.accession.clone());
        debug!(
            "annotation {} complete with {} feature(s)",
            annotation.region.accession,
            annotation.features.len()
        );
        Ok(Some(annotation))
    }
}
