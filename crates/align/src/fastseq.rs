//! Séquences nommées et format FASTA

use std::io::{BufRead, Write};

use brin_core::kmer::{char_to_base, Base};
use tracing::warn;

use crate::error::{AlignError, Result};

/// Largeur de repli par défaut des lignes de séquence.
pub const DEFAULT_FASTA_COLS: usize = 50;

/// Séquence nommée, éventuellement accompagnée de qualités.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FastSeq {
    pub name: String,
    pub comment: String,
    pub seq: String,
    pub qual: String,
}

impl FastSeq {
    pub fn new(name: impl Into<String>, seq: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: String::new(),
            seq: seq.into(),
            qual: String::new(),
        }
    }

    pub fn length(&self) -> usize {
        self.seq.chars().count()
    }

    pub fn has_qual(&self) -> bool {
        !self.qual.is_empty()
    }

    /// Convertit la séquence en bases; les caractères non nucléotidiques
    /// sont ignorés avec un avertissement.
    pub fn tokens(&self) -> Vec<Base> {
        let mut bases = Vec::with_capacity(self.seq.len());
        for c in self.seq.chars() {
            match char_to_base(c) {
                Ok(b) => bases.push(b),
                Err(_) => warn!(
                    "Ignore le caractère non nucléotidique '{}' dans {}",
                    c, self.name
                ),
            }
        }
        bases
    }
}

/// Lit toutes les séquences d'un flux FASTA.
pub fn read_fasta<R: BufRead>(reader: R) -> Result<Vec<FastSeq>> {
    let mut seqs: Vec<FastSeq> = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if let Some(header) = line.strip_prefix('>') {
            let mut parts = header.splitn(2, char::is_whitespace);
            let name = parts.next().unwrap_or_default().to_string();
            let comment = parts.next().unwrap_or_default().trim().to_string();
            seqs.push(FastSeq {
                name,
                comment,
                seq: String::new(),
                qual: String::new(),
            });
        } else {
            let chunk: String = line.split_whitespace().collect();
            match seqs.last_mut() {
                Some(fs) => fs.seq.push_str(&chunk),
                None if chunk.is_empty() => {}
                None => {
                    return Err(AlignError::BadFasta(
                        "données de séquence avant le premier en-tête '>'".into(),
                    ))
                }
            }
        }
    }
    Ok(seqs)
}

/// Écrit une séquence au format FASTA, repliée à `cols` colonnes.
pub fn write_fasta<W: Write>(out: &mut W, fs: &FastSeq, cols: usize) -> Result<()> {
    if fs.comment.is_empty() {
        writeln!(out, ">{}", fs.name)?;
    } else {
        writeln!(out, ">{} {}", fs.name, fs.comment)?;
    }
    let chars: Vec<char> = fs.seq.chars().collect();
    for chunk in chars.chunks(cols.max(1)) {
        writeln!(out, "{}", chunk.iter().collect::<String>())?;
    }
    Ok(())
}

/// Écrivain en flux: en-tête immédiat, repli des bases au fil de l'eau.
/// Implémente [`std::io::Write`] pour brancher directement l'encodeur.
pub struct FastaWriter<W: Write> {
    out: W,
    col: usize,
    max_cols: usize,
}

impl<W: Write> FastaWriter<W> {
    pub fn new(mut out: W, name: &str) -> std::io::Result<Self> {
        writeln!(out, ">{}", name)?;
        Ok(Self {
            out,
            col: 0,
            max_cols: DEFAULT_FASTA_COLS,
        })
    }

    pub fn with_cols(mut out: W, name: &str, max_cols: usize) -> std::io::Result<Self> {
        writeln!(out, ">{}", name)?;
        Ok(Self {
            out,
            col: 0,
            max_cols: max_cols.max(1),
        })
    }

    /// Termine la dernière ligne et rend l'écrivain sous-jacent.
    pub fn finish(mut self) -> std::io::Result<W> {
        if self.col > 0 {
            writeln!(self.out)?;
        }
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> Write for FastaWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for &b in buf {
            self.out.write_all(&[b])?;
            self.col += 1;
            if self.col >= self.max_cols {
                writeln!(self.out)?;
                self.col = 0;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_fasta() {
        let text = ">seq1 un commentaire\nACGT\nACGT\n>seq2\nTTTT\n";
        let seqs = read_fasta(text.as_bytes()).unwrap();
        assert_eq!(seqs.len(), 2);
        assert_eq!(seqs[0].name, "seq1");
        assert_eq!(seqs[0].comment, "un commentaire");
        assert_eq!(seqs[0].seq, "ACGTACGT");
        assert_eq!(seqs[1].seq, "TTTT");
    }

    #[test]
    fn test_write_fasta_wraps() {
        let fs = FastSeq::new("s", "ACGTACGTACGT");
        let mut buf = Vec::new();
        write_fasta(&mut buf, &fs, 5).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, ">s\nACGTA\nCGTAC\nGT\n");
    }

    #[test]
    fn test_fasta_roundtrip() {
        let fs = FastSeq::new("abc", "ACGTGA".repeat(20));
        let mut buf = Vec::new();
        write_fasta(&mut buf, &fs, DEFAULT_FASTA_COLS).unwrap();
        let back = read_fasta(buf.as_slice()).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].seq, fs.seq);
    }

    #[test]
    fn test_streaming_writer() {
        let mut w = FastaWriter::with_cols(Vec::new(), "s", 4).unwrap();
        w.write_all(b"ACGTAC").unwrap();
        let out = w.finish().unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ">s\nACGT\nAC\n");
    }

    #[test]
    fn test_tokens_skip_unknown() {
        let fs = FastSeq::new("s", "AC-GT");
        assert_eq!(fs.tokens().len(), 4);
    }
}
