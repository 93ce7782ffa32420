//! Translation index over the trailing sequence block
//!
//! A GFF3 stream may end with a `##FASTA` block holding per-feature
//! translations (headers of the form `accession|feature-id`) and whole-record
//! nucleotide sequences (bare accession headers). The reader scans the file
//! backwards from end-of-file to the marker line, so the feature section is
//! never touched, and records each entry either as a decoded string or as a
//! raw byte range for on-demand reads.

use log::debug;
use rustc_hash::FxHashMap;

use crate::error::{ConvertError, Result};
use crate::seqindex::{ReadAt, SequenceAlphabet};

/// Marker line that opens the trailing sequence block.
pub const FASTA_MARKER: &str = "##FASTA";

/// Amino-acid codes in NCBI order, plus the stop symbol.
const AMINO_ACIDS: &[u8] = b"ARNDCQEGHILKMFPSTWYVBJZX*";

fn amino_acid_table() -> [bool; 256] {
    let mut table = [false; 256];
    for &b in AMINO_ACIDS {
        table[b as usize] = true;
        table[b.to_ascii_lowercase() as usize] = true;
    }
    table
}

/// Raw byte span of one record's sequence text, newlines included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetRange {
    pub start: u64,
    pub end: u64,
}

struct RawRecord {
    key: String,
    sequence: String,
    range: OffsetRange,
}

struct PendingLine {
    text: String,
    start: u64,
    byte_len: u64,
}

struct ReverseScan {
    aa_table: [bool; 256],
    line_rev: Vec<u8>,
    pending: Vec<PendingLine>,
    records: Vec<RawRecord>,
}

impl ReverseScan {
    fn new() -> Self {
        ReverseScan {
            aa_table: amino_acid_table(),
            line_rev: Vec::new(),
            pending: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Finishes the line whose content begins at `start`. Returns true when
    /// the line is the block marker and scanning must stop.
    fn complete_line(&mut self, start: u64) -> Result<bool> {
        self.line_rev.reverse();
        let mut text = String::from_utf8_lossy(&self.line_rev).into_owned();
        self.line_rev.clear();
        if text.ends_with('\r') {
            text.pop();
        }
        if text == FASTA_MARKER {
            if self.pending.iter().any(|l| !l.text.is_empty()) {
                debug!("ignoring stray text between {FASTA_MARKER} and the first header");
            }
            self.pending.clear();
            return Ok(true);
        }
        if let Some(header) = text.strip_prefix('>') {
            let key = header.split_whitespace().next().unwrap_or("").to_string();
            if key.is_empty() {
                debug!("skipping sequence record with empty header at offset {start}");
                self.pending.clear();
                return Ok(false);
            }
            // Pending lines were collected bottom-up; the last one pushed is
            // the line right below this header.
            let range = match (self.pending.last(), self.pending.first()) {
                (Some(top), Some(bottom)) => OffsetRange {
                    start: top.start,
                    end: bottom.start + bottom.byte_len,
                },
                _ => OffsetRange { start, end: start },
            };
            let mut sequence = String::new();
            for line in self.pending.iter().rev() {
                sequence.push_str(&line.text);
            }
            if key.contains('|') {
                validate_residues(&self.aa_table, &key, sequence.as_bytes())?;
            }
            self.records.push(RawRecord {
                key,
                sequence,
                range,
            });
            self.pending.clear();
        } else if !text.is_empty() {
            let byte_len = text.len() as u64;
            self.pending.push(PendingLine {
                text,
                start,
                byte_len,
            });
        }
        Ok(false)
    }
}

fn validate_residues(table: &[bool; 256], key: &str, bytes: &[u8]) -> Result<()> {
    for &b in bytes {
        if !table[b as usize] {
            return Err(ConvertError::InvalidResidue {
                key: key.to_string(),
                byte: b,
            });
        }
    }
    Ok(())
}

/// Backward scanner over a stream's trailing sequence block.
pub struct TranslationIndexReader<'a, R: ReadAt + ?Sized> {
    source: &'a R,
}

impl<'a, R: ReadAt + ?Sized> TranslationIndexReader<'a, R> {
    pub fn new(source: &'a R) -> Self {
        TranslationIndexReader { source }
    }

    /// Scans back to the marker, collecting complete records. Returns None
    /// when the stream carries no trailing block at all.
    fn scan(&self) -> Result<Option<Vec<RawRecord>>> {
        let total = self.source.len()?;
        let mut state = ReverseScan::new();
        let mut chunk = vec![0u8; 8192];
        let mut read_end = total;
        let mut found_marker = false;
        'outer: while read_end > 0 {
            let read_start = read_end.saturating_sub(chunk.len() as u64);
            let n = (read_end - read_start) as usize;
            self.source.read_exact_at(&mut chunk[..n], read_start)?;
            for i in (0..n).rev() {
                let byte = chunk[i];
                if byte == b'\n' {
                    if state.complete_line(read_start + i as u64 + 1)? {
                        found_marker = true;
                        break 'outer;
                    }
                } else {
                    state.line_rev.push(byte);
                }
            }
            read_end = read_start;
        }
        if !found_marker {
            // The topmost line has no newline in front of it.
            found_marker = state.complete_line(0)?;
        }
        if !found_marker {
            debug!("no {FASTA_MARKER} block found in {total} bytes");
            return Ok(None);
        }
        debug!(
            "trailing block holds {} sequence record(s)",
            state.records.len()
        );
        Ok(Some(state.records))
    }

    /// Eagerly decoded map of every record in the trailing block.
    pub fn read_sequences(&self) -> Result<FxHashMap<String, String>> {
        let mut map = FxHashMap::default();
        if let Some(records) = self.scan()? {
            for record in records {
                map.insert(record.key, record.sequence);
            }
        }
        Ok(map)
    }

    /// Offset-only index; sequence text is read back on demand through
    /// [`TranslationIndex::sequence`].
    pub fn read_offsets(&self) -> Result<TranslationIndex> {
        let mut ranges = FxHashMap::default();
        if let Some(records) = self.scan()? {
            for record in records {
                ranges.insert(record.key, record.range);
            }
        }
        Ok(TranslationIndex { ranges })
    }
}

/// Key to byte-range map over the trailing block.
#[derive(Debug, Default)]
pub struct TranslationIndex {
    ranges: FxHashMap<String, OffsetRange>,
}

impl TranslationIndex {
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.ranges.contains_key(key)
    }

    pub fn range(&self, key: &str) -> Option<OffsetRange> {
        self.ranges.get(key).copied()
    }

    /// Re-reads one record's bytes, strips embedded line breaks, and
    /// validates the assembled text before handing it out.
    pub fn sequence<R: ReadAt + ?Sized>(&self, source: &R, key: &str) -> Result<Option<String>> {
        let Some(range) = self.range(key) else {
            return Ok(None);
        };
        let mut bytes = vec![0u8; (range.end - range.start) as usize];
        source.read_exact_at(&mut bytes, range.start)?;
        bytes.retain(|&b| b != b'\n' && b != b'\r');
        if key.contains('|') {
            validate_residues(&amino_acid_table(), key, &bytes)?;
        } else {
            let alphabet = SequenceAlphabet::nucleotide();
            for &b in &bytes {
                if !alphabet.is_base(b) {
                    return Err(ConvertError::InvalidResidue {
                        key: key.to_string(),
                        byte: b,
                    });
                }
            }
        }
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// Source of attached sequences for the mapper: translations for CDS-like
/// features and whole-record nucleotide text.
pub trait TranslationSource {
    fn translation(&mut self, key: &str) -> Result<Option<String>>;
    fn nucleotide(&mut self, key: &str) -> Result<Option<String>>;
}

/// Offset index bound to its byte source.
pub struct IndexedTranslations<'a, R: ReadAt + ?Sized> {
    index: TranslationIndex,
    source: &'a R,
}

impl<'a, R: ReadAt + ?Sized> IndexedTranslations<'a, R> {
    pub fn new(source: &'a R) -> Result<Self> {
        let index = TranslationIndexReader::new(source).read_offsets()?;
        Ok(IndexedTranslations { index, source })
    }

    pub fn index(&self) -> &TranslationIndex {
        &self.index
    }
}

impl<R: ReadAt + ?Sized> TranslationSource for IndexedTranslations<'_, R> {
    fn translation(&mut self, key: &str) -> Result<Option<String>> {
        self.index.sequence(self.source, key)
    }

    fn nucleotide(&mut self, key: &str) -> Result<Option<String>> {
        self.index.sequence(self.source, key)
    }
}

impl TranslationSource for FxHashMap<String, String> {
    fn translation(&mut self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key).cloned())
    }

    fn nucleotide(&mut self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key).cloned())
    }
}

/// Stand-in for streams without a trailing block.
pub struct NoTranslations;

impl TranslationSource for NoTranslations {
    fn translation(&mut self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn nucleotide(&mut self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &[u8] = b"##gff-version 3\n\
        ##sequence-region AB000001 1 60\n\
        AB000001\t.\tgene\t1\t60\t.\t+\t.\tID=gene_RHD;gene=RHD\n\
        ##FASTA\n\
        >AB000001|CDS_RHD\n\
        MKVL\n\
        SSDE\n\
        >AB000001\n\
        acgtacgt\n\
        acgt\n";

    #[test]
    fn eager_map_joins_wrapped_lines() {
        let map = TranslationIndexReader::new(STREAM).read_sequences().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["AB000001|CDS_RHD"], "MKVLSSDE");
        assert_eq!(map["AB000001"], "acgtacgtacgt");
    }

    #[test]
    fn offset_index_defers_decoding() {
        let index = TranslationIndexReader::new(STREAM).read_offsets().unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.contains_key("AB000001|CDS_RHD"));
        let decoded = index.sequence(STREAM, "AB000001|CDS_RHD").unwrap();
        assert_eq!(decoded.as_deref(), Some("MKVLSSDE"));
        assert_eq!(index.sequence(STREAM, "missing|key").unwrap(), None);
    }

    #[test]
    fn missing_marker_yields_empty_index() {
        let stream = b"##gff-version 3\n>not a real block\nACGT\n";
        let index = TranslationIndexReader::new(stream.as_slice())
            .read_offsets()
            .unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn invalid_residue_is_fatal() {
        let stream = b"##FASTA\n>X|cds_1\nMK9Z\n";
        let err = TranslationIndexReader::new(stream.as_slice())
            .read_sequences()
            .unwrap_err();
        match err {
            ConvertError::InvalidResidue { key, byte } => {
                assert_eq!(key, "X|cds_1");
                assert_eq!(byte, b'9');
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bare_keys_skip_amino_acid_validation() {
        let stream = b"##FASTA\n>AB000002\nacgtn\n";
        let map = TranslationIndexReader::new(stream.as_slice())
            .read_sequences()
            .unwrap();
        assert_eq!(map["AB000002"], "acgtn");
    }
}
