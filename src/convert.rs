//! Conversion facade
//!
//! Drives reader, mapper, and writer in either direction over whole files.
//! On the GFF3 side, consecutive annotations sharing an accession (split by
//! `###` markers) are merged into one record group before mapping. GFF3
//! input may be BGZF-compressed; it is decompressed up front so the
//! translation index can still issue absolute-offset reads.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, info};
use noodles::bgzf;

use crate::error::Result;
use crate::flatfile::{FlatFileReader, FlatFileWriter};
use crate::gff3::{Gff3Annotation, Gff3Reader, Gff3Writer};
use crate::mapper::{EntryMapper, Gff3Mapper};
use crate::ontology::{BundledOntology, QualifierDefaults};
use crate::seqindex::ReadAt;
use crate::trans_index::IndexedTranslations;
use crate::validate::{Finding, ValidationEngine};

/// Outcome of one conversion run.
#[derive(Debug)]
pub struct ConversionReport {
    pub records: usize,
    pub warnings: Vec<Finding>,
}

/// GFF3 input bytes: a plain file read in place, or a decompressed BGZF
/// stream held in memory. Both support absolute-offset reads.
enum Gff3Source {
    Plain(File),
    Buffered(Vec<u8>),
}

const BGZF_HEADER_SIZE: usize = 18;

/// Check whether a file starts with a valid BGZF header.
/// Returns `Ok(false)` for regular gzip, too-small files, or plain text.
fn is_bgzf<R: Read + Seek>(reader: &mut R) -> io::Result<bool> {
    let mut header = [0u8; BGZF_HEADER_SIZE];
    let result = match reader.read_exact(&mut header) {
        Ok(()) => {
            Ok(header[0..2] == [0x1f, 0x8b]      // gzip magic
                && header[2] == 0x08              // DEFLATE
                && header[3] == 0x04              // FEXTRA
                && header[10..12] == [0x06, 0x00] // XLEN=6
                && header[12..14] == [b'B', b'C'] // BC subfield
                && header[14..16] == [0x02, 0x00]) // SLEN=2
        }
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    };
    reader.seek(SeekFrom::Start(0))?;
    result
}

impl Gff3Source {
    fn open(path: &Path) -> Result<Self> {
        let compressed = [".gz", ".bgz"]
            .iter()
            .any(|extension| path.to_string_lossy().ends_with(extension));
        if !compressed {
            return Ok(Gff3Source::Plain(File::open(path)?));
        }
        let mut file = File::open(path)?;
        if !is_bgzf(&mut file)? {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "'{}' is regular gzip, not BGZF; recompress with bgzip",
                    path.display()
                ),
            )
            .into());
        }
        let mut reader = bgzf::io::Reader::new(file);
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        debug!("decompressed {} BGZF byte(s)", bytes.len());
        Ok(Gff3Source::Buffered(bytes))
    }

    fn reader(&self) -> Result<Box<dyn BufRead + '_>> {
        match self {
            Gff3Source::Plain(file) => Ok(Box::new(BufReader::new(file.try_clone()?))),
            Gff3Source::Buffered(bytes) => Ok(Box::new(bytes.as_slice())),
        }
    }
}

impl ReadAt for Gff3Source {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        match self {
            Gff3Source::Plain(file) => file.read_at(buf, offset),
            Gff3Source::Buffered(bytes) => bytes.as_slice().read_at(buf, offset),
        }
    }

    fn len(&self) -> io::Result<u64> {
        match self {
            Gff3Source::Plain(file) => ReadAt::len(file),
            Gff3Source::Buffered(bytes) => ReadAt::len(bytes.as_slice()),
        }
    }
}

/// Appends a consecutive same-accession annotation onto the held one.
fn merge_annotations(held: &mut Gff3Annotation, mut next: Gff3Annotation) {
    held.species.append(&mut next.species);
    held.features.append(&mut next.features);
    held.region.end = held.region.end.max(next.region.end);
}

/// Converts a GFF3 stream into flat-file records.
pub fn gff3_to_flat(
    input: &Path,
    out: &mut dyn Write,
    engine: &mut ValidationEngine,
) -> Result<ConversionReport> {
    let source = Gff3Source::open(input)?;
    let mut translations = IndexedTranslations::new(&source)?;
    let ontology = BundledOntology::load()?;
    let defaults = QualifierDefaults::load()?;
    let mapper = EntryMapper::new(&ontology, &defaults);
    let mut writer = FlatFileWriter::new(out);
    let mut records = 0usize;
    let mut pending: Option<Gff3Annotation> = None;

    {
        let mut reader = Gff3Reader::new(source.reader()?, engine);
        let version = reader.read_header()?;
        debug!("input declares gff-version {version}");
        while let Some(annotation) = reader.next_annotation()? {
            match &mut pending {
                Some(held) if held.accession() == annotation.accession() => {
                    debug!("merging consecutive annotation for {}", held.accession());
                    merge_annotations(held, annotation);
                }
                Some(held) => {
                    let complete = std::mem::replace(held, annotation);
                    let entry = mapper.map_annotation(&complete, &mut translations)?;
                    writer.write_entry(&entry)?;
                    records += 1;
                }
                None => pending = Some(annotation),
            }
        }
    }
    if let Some(annotation) = pending {
        let entry = mapper.map_annotation(&annotation, &mut translations)?;
        writer.write_entry(&entry)?;
        records += 1;
    }
    writer.finish()?;
    info!(
        "converted {} record(s) from {} ({} warning(s))",
        records,
        input.display(),
        engine.warnings().len()
    );
    Ok(ConversionReport {
        records,
        warnings: engine.warnings().to_vec(),
    })
}

/// Converts flat-file records into one GFF3 stream.
pub fn flat_to_gff3(
    input: &Path,
    out: &mut dyn Write,
    engine: &mut ValidationEngine,
) -> Result<ConversionReport> {
    let ontology = BundledOntology::load()?;
    let mapper = Gff3Mapper::new(&ontology);
    let mut reader = FlatFileReader::from_path(input)?;
    let mut writer = Gff3Writer::new(out);
    writer.write_header()?;

    let mut sequences: Vec<(String, String)> = Vec::new();
    let mut records = 0usize;
    while let Some(entry) = reader.next_entry()? {
        let mapped = mapper.map_entry(&entry)?;
        engine.validate_annotation(&mapped.annotation, 0)?;
        writer.write_annotation(&mapped.annotation)?;
        if let Some(bases) = entry.sequence.to_bytes()? {
            if !bases.is_empty() {
                sequences.push((
                    entry.accession.clone(),
                    String::from_utf8_lossy(&bases).into_owned(),
                ));
            }
        }
        sequences.extend(mapped.translations);
        records += 1;
    }
    for (key, sequence) in &sequences {
        writer.write_sequence(key, sequence)?;
    }
    writer.finish()?;
    info!(
        "converted {} record(s) from {} ({} warning(s))",
        records,
        input.display(),
        engine.warnings().len()
    );
    Ok(ConversionReport {
        records,
        warnings: engine.warnings().to_vec(),
    })
}
