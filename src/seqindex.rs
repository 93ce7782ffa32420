//! Byte-accurate sequence index
//!
//! A single forward scan over one record's sequence block produces a line
//! table mapping 1-based base coordinates to absolute byte ranges, so
//! consumers can fetch any base range without ever holding the whole block
//! in memory. The scan classifies every byte against a configurable
//! alphabet and stops at the next record header found at a line boundary.

use std::fs::File;
use std::io;

use log::debug;

use crate::error::{ConvertError, Result};

/// Absolute-offset reads over a byte source.
///
/// Every consumer reads this way instead of through a shared cursor, so
/// multiple scans may run concurrently over one open file.
pub trait ReadAt {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
    fn len(&self) -> io::Result<u64>;

    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "unexpected end of byte source",
                    ));
                }
                Ok(n) => {
                    let rest = buf;
                    buf = &mut rest[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl ReadAt for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let start = (offset as usize).min(self.len());
        let n = (self.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(<[u8]>::len(self) as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteClass {
    Base,
    HeaderStart,
    Separator,
}

/// Byte classification table for one sequence dialect.
pub struct SequenceAlphabet {
    bases: [bool; 256],
    separators: [bool; 256],
    header_start: u8,
    expected: &'static str,
}

const IUPAC_NUCLEOTIDES: &[u8] = b"ACGTURYSWKMBDHVNacgturyswkmbdhvn";

impl SequenceAlphabet {
    fn build(
        bases: &[u8],
        separators: &[u8],
        header_start: u8,
        expected: &'static str,
    ) -> Self {
        let mut base_table = [false; 256];
        for &b in bases {
            base_table[b as usize] = true;
        }
        let mut separator_table = [false; 256];
        for &b in separators {
            separator_table[b as usize] = true;
        }
        SequenceAlphabet {
            bases: base_table,
            separators: separator_table,
            header_start,
            expected,
        }
    }

    /// FASTA-style blocks: `>` opens the next record.
    pub fn nucleotide() -> Self {
        SequenceAlphabet::build(
            IUPAC_NUCLEOTIDES,
            b" \t\r\n",
            b'>',
            "an IUPAC nucleotide code or line separator",
        )
    }

    /// Flat-file sequence blocks: base-count columns are separators and the
    /// `//` terminator line delimits the record.
    pub fn flatfile() -> Self {
        SequenceAlphabet::build(
            IUPAC_NUCLEOTIDES,
            b" \t\r\n0123456789",
            b'/',
            "an IUPAC nucleotide code, digit, or line separator",
        )
    }

    pub fn classify(&self, byte: u8) -> Option<ByteClass> {
        if byte == self.header_start {
            Some(ByteClass::HeaderStart)
        } else if self.bases[byte as usize] {
            Some(ByteClass::Base)
        } else if self.separators[byte as usize] {
            Some(ByteClass::Separator)
        } else {
            None
        }
    }

    pub fn is_base(&self, byte: u8) -> bool {
        self.bases[byte as usize]
    }

    pub fn is_ambiguous(&self, byte: u8) -> bool {
        byte == b'N' || byte == b'n'
    }

    pub fn header_start(&self) -> u8 {
        self.header_start
    }
}

/// One maximal run of base bytes: a closed 1-based base range mapped to a
/// half-open byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    pub base_start: u64,
    pub base_end: u64,
    pub byte_start: u64,
    pub byte_end: u64,
}

/// Half-open absolute byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan {
    pub start: u64,
    pub end: u64,
}

/// Forward scanner producing a [`SequenceIndex`].
pub struct SequenceIndexBuilder<'a, R: ReadAt + ?Sized> {
    source: &'a R,
    alphabet: &'a SequenceAlphabet,
}

impl<'a, R: ReadAt + ?Sized> SequenceIndexBuilder<'a, R> {
    pub fn new(source: &'a R, alphabet: &'a SequenceAlphabet) -> Self {
        SequenceIndexBuilder { source, alphabet }
    }

    /// Scans from `start_offset` to the next header byte sitting at a line
    /// boundary, or to end of input. The source's read position is never
    /// moved; only absolute reads are issued.
    pub fn scan(&self, start_offset: u64) -> Result<SequenceIndex> {
        let total_len = self.source.len()?;
        let mut lines: Vec<LineEntry> = Vec::new();
        let mut base_cursor: u64 = 0;
        let mut run_start: u64 = 0;
        let mut run_len: u64 = 0;
        let mut first_base: Option<u64> = None;
        let mut at_line_start = true;
        let mut end_offset = total_len;

        fn commit(lines: &mut Vec<LineEntry>, cursor: &mut u64, start: u64, len: u64) {
            if len == 0 {
                return;
            }
            lines.push(LineEntry {
                base_start: *cursor + 1,
                base_end: *cursor + len,
                byte_start: start,
                byte_end: start + len,
            });
            *cursor += len;
        }

        let mut buf = [0u8; 8192];
        let mut offset = start_offset;
        'scan: while offset < total_len {
            let n = self.source.read_at(&mut buf, offset)?;
            if n == 0 {
                break;
            }
            for (i, &byte) in buf[..n].iter().enumerate() {
                let pos = offset + i as u64;
                if at_line_start && byte == self.alphabet.header_start {
                    end_offset = pos;
                    break 'scan;
                }
                match self.alphabet.classify(byte) {
                    Some(ByteClass::Base) => {
                        if run_len == 0 {
                            run_start = pos;
                        }
                        run_len += 1;
                        if first_base.is_none() {
                            first_base = Some(pos);
                        }
                    }
                    Some(ByteClass::Separator) | Some(ByteClass::HeaderStart) => {
                        commit(&mut lines, &mut base_cursor, run_start, run_len);
                        run_len = 0;
                    }
                    None => {
                        return Err(ConvertError::IllegalByte {
                            offset: pos,
                            byte,
                            expected: self.alphabet.expected,
                        });
                    }
                }
                at_line_start = byte == b'\n';
            }
            offset += n as u64;
        }
        commit(&mut lines, &mut base_cursor, run_start, run_len);

        // Keep only runs strictly inside the observed sequence window and
        // renumber base coordinates over what survives.
        if let Some(first) = first_base {
            lines.retain(|l| l.byte_start >= first && l.byte_end <= end_offset);
            let mut cursor = 0;
            for line in &mut lines {
                let len = line.byte_end - line.byte_start;
                line.base_start = cursor + 1;
                line.base_end = cursor + len;
                cursor += len;
            }
        }

        let leading_ambiguous = match lines.first() {
            Some(line) => self.edge_ambiguous_run(line, true)?,
            None => 0,
        };
        let trailing_ambiguous = match lines.last() {
            Some(line) => self.edge_ambiguous_run(line, false)?,
            None => 0,
        };

        debug!(
            "indexed {} bases over {} line entries (offsets {}..{})",
            lines.last().map(|l| l.base_end).unwrap_or(0),
            lines.len(),
            start_offset,
            end_offset
        );

        Ok(SequenceIndex {
            lines,
            leading_ambiguous,
            trailing_ambiguous,
            end_offset,
        })
    }

    /// Run length of ambiguous bases at one edge, confined to that line.
    fn edge_ambiguous_run(&self, line: &LineEntry, from_start: bool) -> Result<u64> {
        let len = (line.byte_end - line.byte_start) as usize;
        let mut bytes = vec![0u8; len];
        self.source.read_exact_at(&mut bytes, line.byte_start)?;
        let run = if from_start {
            bytes
                .iter()
                .take_while(|&&b| self.alphabet.is_ambiguous(b))
                .count()
        } else {
            bytes
                .iter()
                .rev()
                .take_while(|&&b| self.alphabet.is_ambiguous(b))
                .count()
        };
        Ok(run as u64)
    }
}

/// Immutable line table with derived edge metadata.
///
/// The only mutation is [`SequenceIndex::apply_deletion`]; callers must
/// serialize it against concurrent lookups on the same index.
#[derive(Debug)]
pub struct SequenceIndex {
    lines: Vec<LineEntry>,
    leading_ambiguous: u64,
    trailing_ambiguous: u64,
    end_offset: u64,
}

impl SequenceIndex {
    pub fn total_bases(&self) -> u64 {
        self.lines.last().map(|l| l.base_end).unwrap_or(0)
    }

    pub fn lines(&self) -> &[LineEntry] {
        &self.lines
    }

    pub fn leading_ambiguous_bases(&self) -> u64 {
        self.leading_ambiguous
    }

    pub fn trailing_ambiguous_bases(&self) -> u64 {
        self.trailing_ambiguous
    }

    pub fn first_base_offset(&self) -> Option<u64> {
        self.lines.first().map(|l| l.byte_start)
    }

    pub fn last_base_offset(&self) -> Option<u64> {
        self.lines.last().map(|l| l.byte_end - 1)
    }

    /// Byte offset of the record boundary that ended the scan.
    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    /// Byte spans covering the closed base range `from..=to`, one per line
    /// entry touched, each clipped to the requested range.
    pub fn byte_spans_for_base_range(&self, from: u64, to: u64) -> Result<Vec<ByteSpan>> {
        let total = self.total_bases();
        if from < 1 || to < from || to > total {
            return Err(ConvertError::InvalidRange {
                from,
                to,
                len: total,
            });
        }
        let first = self.lines.partition_point(|l| l.base_end < from);
        let mut spans = Vec::new();
        for line in &self.lines[first..] {
            if line.base_start > to {
                break;
            }
            let lo = from.max(line.base_start);
            let hi = to.min(line.base_end);
            spans.push(ByteSpan {
                start: line.byte_start + (lo - line.base_start),
                end: line.byte_start + (hi - line.base_start) + 1,
            });
        }
        Ok(spans)
    }

    /// Removes the closed base range `from..=to` from the index, as if the
    /// corresponding base bytes were spliced out of the file. Later lines
    /// shift left by the deleted length in both coordinate systems; lines
    /// that collapse to nothing are dropped. Not reentrant.
    pub fn apply_deletion(&mut self, from: u64, to: u64) -> Result<()> {
        let total = self.total_bases();
        if from < 1 || to < from || to > total {
            return Err(ConvertError::InvalidRange {
                from,
                to,
                len: total,
            });
        }
        let deleted = to - from + 1;
        let mut updated = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            if line.base_end < from {
                updated.push(*line);
            } else if line.base_start > to {
                updated.push(LineEntry {
                    base_start: line.base_start - deleted,
                    base_end: line.base_end - deleted,
                    byte_start: line.byte_start - deleted,
                    byte_end: line.byte_end - deleted,
                });
            } else {
                let prefix = from.saturating_sub(line.base_start);
                let suffix = line.base_end.saturating_sub(to);
                if prefix + suffix == 0 {
                    continue;
                }
                if prefix > 0 {
                    // Deletion begins inside this line; any suffix slides
                    // left against the prefix.
                    updated.push(LineEntry {
                        base_start: line.base_start,
                        base_end: line.base_start + prefix + suffix - 1,
                        byte_start: line.byte_start,
                        byte_end: line.byte_start + prefix + suffix,
                    });
                } else {
                    // Head of the line is deleted; the tail takes over the
                    // deletion point's coordinates.
                    updated.push(LineEntry {
                        base_start: from,
                        base_end: from + suffix - 1,
                        byte_start: line.byte_end - suffix - deleted,
                        byte_end: line.byte_end - deleted,
                    });
                }
            }
        }
        debug!(
            "deleted bases {from}..={to}: {} -> {} line entries",
            self.lines.len(),
            updated.len()
        );
        self.lines = updated;
        Ok(())
    }
}
