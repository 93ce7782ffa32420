//! EMBL-style flat-file reader and writer
//!
//! Line-code oriented dialect: `ID`/`AC`/`DE`/`OS` header lines, an `FT`
//! feature table with the key at column 6 and location/qualifier text at
//! column 22, an `SQ` block of 60-base lines in six 10-base groups, and a
//! `//` record terminator. Locations follow the INSDC grammar (`join`,
//! `order`, `complement`, `a..b`, single base, `<`/`>` partiality).
//!
//! When the reader is built from a path, sequence blocks are not loaded:
//! each record's `SQ` body is indexed in place and the entry carries a
//! [`SequenceIndex`] over the file instead of the bases themselves.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::entry::{Entry, Feature, SequenceSource, Topology};
use crate::error::{ConvertError, Result};
use crate::location::{CompoundLocation, Location};
use crate::seqindex::{SequenceAlphabet, SequenceIndexBuilder};

const CONTENT_COLUMN: usize = 5;
const KEY_WIDTH: usize = 16;
const LINE_WIDTH: usize = 80;
const SEQUENCE_WRAP: usize = 60;
const SEQUENCE_GROUP: usize = 10;

/// Streaming reader over one or more flat-file records.
pub struct FlatFileReader<R: BufRead> {
    input: R,
    /// Set when reading from a file; enables indexed sequence blocks.
    path: Option<PathBuf>,
    offset: u64,
    line_no: u64,
}

impl FlatFileReader<BufReader<File>> {
    /// Opens a file for reading. Sequence blocks are indexed, not loaded.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(FlatFileReader {
            input: BufReader::new(file),
            path: Some(path.to_path_buf()),
            offset: 0,
            line_no: 0,
        })
    }
}

impl<R: BufRead> FlatFileReader<R> {
    /// Reader over an arbitrary stream; sequence text is kept inline.
    pub fn new(input: R) -> Self {
        FlatFileReader {
            input,
            path: None,
            offset: 0,
            line_no: 0,
        }
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        self.offset += line.len() as u64;
        self.line_no += 1;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    fn error(&self, msg: impl Into<String>) -> ConvertError {
        ConvertError::FlatFile {
            line: self.line_no,
            msg: msg.into(),
        }
    }

    /// Reads the next record, or `None` at end of stream.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        let mut entry: Option<Entry> = None;
        let mut organism: Option<String> = None;
        let mut feature: Option<FeatureBuilder> = None;
        let mut inline_sequence: Option<Vec<u8>> = None;

        loop {
            let Some(line) = self.read_line()? else {
                if entry.is_some() {
                    return Err(self.error("record not terminated by //"));
                }
                return Ok(None);
            };
            if line.starts_with("//") {
                let Some(mut entry) = entry.take() else {
                    continue;
                };
                if let Some(builder) = feature.take() {
                    entry.features.push(builder.finish(&entry.accession)?);
                }
                if let Some(bases) = inline_sequence {
                    entry.descriptor.length = bases.len() as u64;
                    entry.sequence = SequenceSource::Inline(bases);
                }
                if let (Some(organism), Some(source)) = (&organism, entry.features.first_mut()) {
                    if source.name == "source" && !source.has_qualifier("organism") {
                        source.push_qualifier("organism", Some(organism.clone()));
                    }
                }
                debug!(
                    "read entry {} with {} feature(s)",
                    entry.accession,
                    entry.features.len()
                );
                return Ok(Some(entry));
            }

            let code = line.get(..2).unwrap_or("");
            let content = line.get(CONTENT_COLUMN..).unwrap_or("");
            match code {
                "ID" => {
                    if entry.is_some() {
                        return Err(self.error("second ID line inside one record"));
                    }
                    entry = Some(self.parse_id_line(content)?);
                }
                "AC" | "XX" | "DT" | "KW" | "OC" | "RN" | "RP" | "RT" | "RL" | "RA" | "FH" => {}
                "DE" => {
                    let entry = entry
                        .as_mut()
                        .ok_or_else(|| self.error("DE line before ID"))?;
                    match &mut entry.description {
                        Some(description) => {
                            description.push(' ');
                            description.push_str(content.trim());
                        }
                        None => entry.description = Some(content.trim().to_string()),
                    }
                }
                "OS" => organism = Some(content.trim().to_string()),
                "FT" => {
                    let entry = entry
                        .as_mut()
                        .ok_or_else(|| self.error("FT line before ID"))?;
                    if !content.starts_with(' ') && !content.is_empty() {
                        // New feature key.
                        if let Some(builder) = feature.take() {
                            entry
                                .features
                                .push(builder.finish(&entry.accession)?);
                        }
                        let mut parts = content.trim_start().splitn(2, char::is_whitespace);
                        let key = parts.next().unwrap_or("").to_string();
                        let location = parts.next().unwrap_or("").trim().to_string();
                        feature = Some(FeatureBuilder::new(key, location));
                    } else {
                        let builder = feature
                            .as_mut()
                            .ok_or_else(|| self.error("FT continuation before a feature key"))?;
                        builder.continuation(content.trim());
                    }
                }
                "SQ" => {
                    let entry = entry
                        .as_mut()
                        .ok_or_else(|| self.error("SQ line before ID"))?;
                    if let Some(builder) = feature.take() {
                        entry
                            .features
                            .push(builder.finish(&entry.accession)?);
                    }
                    if let Some(path) = &self.path {
                        let file = File::open(path)?;
                        let alphabet = SequenceAlphabet::flatfile();
                        let index =
                            SequenceIndexBuilder::new(&file, &alphabet).scan(self.offset)?;
                        entry.descriptor.length = index.total_bases();
                        entry.sequence = SequenceSource::Indexed {
                            path: path.clone(),
                            index,
                        };
                    } else {
                        inline_sequence = Some(Vec::new());
                    }
                }
                _ => {
                    if let Some(bases) = &mut inline_sequence {
                        bases.extend(line.bytes().filter(u8::is_ascii_alphabetic));
                    }
                    // Sequence lines in indexed mode are covered by the scan.
                }
            }
        }
    }

    /// `ID   <acc>; SV <n>; <topology>; <mol type>; STD; XXX; <len> BP.`
    fn parse_id_line(&self, content: &str) -> Result<Entry> {
        let parts: Vec<&str> = content.split(';').map(str::trim).collect();
        let accession = parts.first().copied().unwrap_or("");
        if accession.is_empty() {
            return Err(self.error("ID line without an accession"));
        }
        let mut entry = Entry::new(accession);
        let mut after_topology = false;
        for part in &parts[1..] {
            if part.is_empty() || *part == "STD" || *part == "XXX" {
                continue;
            }
            if let Some(version) = part.strip_prefix("SV ") {
                entry.version = version.trim().parse().ok();
            } else if part.eq_ignore_ascii_case("linear") {
                entry.descriptor.topology = Topology::Linear;
                after_topology = true;
            } else if part.eq_ignore_ascii_case("circular") {
                entry.descriptor.topology = Topology::Circular;
                after_topology = true;
            } else if let Some(length) = part.strip_suffix(" BP.").or_else(|| part.strip_suffix(" BP")) {
                entry.descriptor.length = length.trim().parse().unwrap_or(0);
            } else if after_topology && entry.descriptor.molecule_type.is_none() {
                entry.descriptor.molecule_type = Some(part.to_string());
            }
        }
        Ok(entry)
    }
}

/// Accumulates one feature's location and qualifier text across lines.
struct FeatureBuilder {
    key: String,
    location_text: String,
    qualifiers: Vec<(String, Option<String>)>,
    /// Open quoted qualifier value awaiting its closing quote.
    open_value: Option<(String, String)>,
    in_location: bool,
}

impl FeatureBuilder {
    fn new(key: String, location_text: String) -> Self {
        FeatureBuilder {
            key,
            location_text,
            qualifiers: Vec::new(),
            open_value: None,
            in_location: true,
        }
    }

    fn continuation(&mut self, text: &str) {
        if let Some((name, mut value)) = self.open_value.take() {
            // Translations wrap mid-word; prose values wrap at spaces.
            if name != "translation" && !value.is_empty() {
                value.push(' ');
            }
            if let Some(body) = text.strip_suffix('"') {
                value.push_str(body);
                self.qualifiers.push((name, Some(value)));
            } else {
                value.push_str(text);
                self.open_value = Some((name, value));
            }
            return;
        }
        if let Some(qualifier) = text.strip_prefix('/') {
            self.in_location = false;
            match qualifier.split_once('=') {
                Some((name, value)) => {
                    if let Some(body) = value.strip_prefix('"') {
                        match body.strip_suffix('"') {
                            Some(closed) => {
                                self.qualifiers.push((name.to_string(), Some(closed.to_string())));
                            }
                            None => self.open_value = Some((name.to_string(), body.to_string())),
                        }
                    } else {
                        self.qualifiers.push((name.to_string(), Some(value.to_string())));
                    }
                }
                None => self.qualifiers.push((qualifier.to_string(), None)),
            }
            return;
        }
        if self.in_location {
            self.location_text.push_str(text);
        }
    }

    fn finish(mut self, accession: &str) -> Result<Feature> {
        if let Some((name, value)) = self.open_value.take() {
            // Unterminated quote; keep what was collected.
            self.qualifiers.push((name, Some(value)));
        }
        let location = parse_location(&self.location_text).map_err(|msg| {
            ConvertError::BadLocation {
                accession: accession.to_string(),
                feature: self.key.clone(),
                msg,
            }
        })?;
        let mut feature = Feature::new(self.key, location);
        for (name, value) in self.qualifiers {
            feature.push_qualifier(name, value);
        }
        Ok(feature)
    }
}

/// Parses one INSDC location string into a compound location.
pub fn parse_location(text: &str) -> std::result::Result<CompoundLocation, String> {
    let segments = parse_expr(text.trim())?;
    if segments.is_empty() {
        return Err("empty location".to_string());
    }
    let mut compound = CompoundLocation::new();
    for segment in segments {
        compound.push(segment);
    }
    Ok(compound)
}

fn parse_expr(text: &str) -> std::result::Result<Vec<Location>, String> {
    let text = text.trim();
    if let Some(inner) = call_body(text, "complement") {
        let mut segments = parse_expr(inner)?;
        for segment in &mut segments {
            segment.toggle_complement();
        }
        return Ok(segments);
    }
    if let Some(inner) = call_body(text, "join").or_else(|| call_body(text, "order")) {
        let mut segments = Vec::new();
        for part in split_top_level(inner) {
            segments.extend(parse_expr(part)?);
        }
        return Ok(segments);
    }
    parse_range(text).map(|location| vec![location])
}

fn call_body<'t>(text: &'t str, name: &str) -> Option<&'t str> {
    text.strip_prefix(name)
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(')'))
}

/// Splits on commas outside parentheses.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, b) in text.bytes().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn parse_range(text: &str) -> std::result::Result<Location, String> {
    let parse_bound = |bound: &str, marker: char| -> std::result::Result<(u64, bool), String> {
        let (partial, digits) = match bound.strip_prefix(marker) {
            Some(rest) => (true, rest),
            None => (false, bound),
        };
        let value = digits
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("bad coordinate '{bound}'"))?;
        Ok((value, partial))
    };
    let (start, lower_partial, end, upper_partial) = match text.split_once("..") {
        Some((start_text, end_text)) => {
            let (start, lower) = parse_bound(start_text.trim(), '<')?;
            let (end, upper) = parse_bound(end_text.trim(), '>')?;
            (start, lower, end, upper)
        }
        None => {
            let (value, lower) = parse_bound(text.trim(), '<')?;
            (value, lower, value, false)
        }
    };
    if end < start {
        return Err(format!("inverted range {start}..{end}"));
    }
    let mut location = Location::new(start, end);
    location.set_lower_partial(lower_partial);
    location.set_upper_partial(upper_partial);
    Ok(location)
}

/// Renders a compound location back to INSDC text.
pub fn render_location(compound: &CompoundLocation) -> String {
    let rendered: Vec<String> = compound.segments.iter().map(render_segment).collect();
    let body = if rendered.len() == 1 {
        rendered.into_iter().next().unwrap_or_default()
    } else {
        format!("join({})", rendered.join(","))
    };
    if compound.complement {
        format!("complement({body})")
    } else {
        body
    }
}

fn render_segment(location: &Location) -> String {
    let body = if location.start == location.end
        && !location.lower_partial()
        && !location.upper_partial()
    {
        location.start.to_string()
    } else {
        format!(
            "{}{}..{}{}",
            if location.lower_partial() { "<" } else { "" },
            location.start,
            if location.upper_partial() { ">" } else { "" },
            location.end
        )
    };
    if location.complement {
        format!("complement({body})")
    } else {
        body
    }
}

/// Writer producing the same dialect the reader consumes.
pub struct FlatFileWriter<W: Write> {
    out: W,
}

impl<W: Write> FlatFileWriter<W> {
    pub fn new(out: W) -> Self {
        FlatFileWriter { out }
    }

    pub fn write_entry(&mut self, entry: &Entry) -> Result<()> {
        let sequence = entry.sequence.to_bytes()?;
        let length = sequence
            .as_ref()
            .map(|s| s.len() as u64)
            .unwrap_or(entry.descriptor.length);
        let topology = match entry.descriptor.topology {
            Topology::Linear => "linear",
            Topology::Circular => "circular",
        };
        let molecule = entry
            .descriptor
            .molecule_type
            .as_deref()
            .or_else(|| {
                entry
                    .source_feature()
                    .and_then(|f| f.qualifier_value("mol_type"))
            })
            .unwrap_or("genomic DNA");
        writeln!(
            self.out,
            "ID   {}; SV {}; {}; {}; STD; XXX; {} BP.",
            entry.accession,
            entry.version.unwrap_or(1),
            topology,
            molecule,
            length
        )?;
        writeln!(self.out, "XX")?;
        writeln!(self.out, "AC   {};", entry.accession)?;
        writeln!(self.out, "XX")?;
        if let Some(description) = &entry.description {
            writeln!(self.out, "DE   {description}")?;
            writeln!(self.out, "XX")?;
        }
        if let Some(organism) = entry.organism() {
            writeln!(self.out, "OS   {organism}")?;
            writeln!(self.out, "XX")?;
        }
        writeln!(self.out, "FH   Key             Location/Qualifiers")?;
        writeln!(self.out, "FH")?;
        for feature in &entry.features {
            self.write_feature(feature)?;
        }
        writeln!(self.out, "XX")?;
        self.write_sequence_block(sequence.as_deref().unwrap_or(&[]))?;
        writeln!(self.out, "//")?;
        debug!("wrote entry {} ({} BP)", entry.accession, length);
        Ok(())
    }

    fn write_feature(&mut self, feature: &Feature) -> Result<()> {
        let width = LINE_WIDTH - CONTENT_COLUMN - KEY_WIDTH;
        let location = render_location(&feature.location);
        let mut first = true;
        for chunk in wrap_anywhere(&location, width) {
            self.write_feature_line(&feature.name, first, chunk)?;
            first = false;
        }
        for qualifier in &feature.qualifiers {
            let text = match &qualifier.value {
                None => format!("/{}", qualifier.name),
                Some(value) if value.bytes().all(|b| b.is_ascii_digit()) => {
                    format!("/{}={}", qualifier.name, value)
                }
                Some(value) => format!("/{}=\"{}\"", qualifier.name, value),
            };
            let chunks: Vec<String> = if qualifier.name == "translation" {
                wrap_anywhere(&text, width)
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            } else {
                wrap_words(&text, width)
            };
            for chunk in chunks {
                self.write_feature_line(&feature.name, false, &chunk)?;
            }
        }
        Ok(())
    }

    fn write_feature_line(&mut self, key: &str, with_key: bool, text: &str) -> Result<()> {
        if with_key {
            writeln!(self.out, "FT   {key:<width$}{text}", width = KEY_WIDTH)?;
        } else {
            writeln!(self.out, "FT   {:<width$}{text}", "", width = KEY_WIDTH)?;
        }
        Ok(())
    }

    fn write_sequence_block(&mut self, bases: &[u8]) -> Result<()> {
        let count = |symbol: u8| {
            bases
                .iter()
                .filter(|b| b.eq_ignore_ascii_case(&symbol))
                .count()
        };
        let (a, c, g, t) = (count(b'a'), count(b'c'), count(b'g'), count(b't'));
        let other = bases.len() - a - c - g - t;
        writeln!(
            self.out,
            "SQ   Sequence {} BP; {} A; {} C; {} G; {} T; {} other;",
            bases.len(),
            a,
            c,
            g,
            t,
            other
        )?;
        for (index, line) in bases.chunks(SEQUENCE_WRAP).enumerate() {
            let groups: Vec<String> = line
                .chunks(SEQUENCE_GROUP)
                .map(|g| String::from_utf8_lossy(g).to_lowercase())
                .collect();
            let upto = index * SEQUENCE_WRAP + line.len();
            writeln!(self.out, "     {:<65} {:>9}", groups.join(" "), upto)?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Splits at the width boundary, anywhere in the text.
fn wrap_anywhere(text: &str, width: usize) -> Vec<&str> {
    if text.is_empty() {
        return vec![""];
    }
    text.as_bytes()
        .chunks(width)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
        .collect()
}

/// Splits at space boundaries so re-joining with single spaces restores the
/// original text.
fn wrap_words(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split(' ') {
        if current.is_empty() {
            current = word.to_string();
        } else if current.len() + 1 + word.len() <= width {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current = word.to_string();
        }
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}
