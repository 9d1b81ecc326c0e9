//! Lecture et écriture du format Stockholm
//!
//! Enregistrements reconnus: en-tête `# STOCKHOLM 1.0`, annotations de
//! fichier `#=GF`, par colonne `#=GC`, par rangée et par colonne `#=GR`,
//! par rangée `#=GS`, rangées de séquence (reprises sur plusieurs blocs)
//! et terminateur `//`.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, Write};

use tracing::warn;

use crate::alignpath::{AlignPath, Alignment};
use crate::error::Result;
use crate::fastseq::FastSeq;

pub const DEFAULT_STOCKHOLM_ROW_LENGTH: usize = 80;
pub const MIN_STOCKHOLM_CHARS_PER_ROW: usize = 10;

/// Alignement multiple annoté au format Stockholm.
#[derive(Debug, Clone, Default)]
pub struct Stockholm {
    pub gapped: Vec<FastSeq>,
    /// gc[tag] = colonnes
    pub gc: BTreeMap<String, String>,
    /// gf[tag] = lignes
    pub gf: BTreeMap<String, Vec<String>>,
    /// gr[tag][nom] = colonnes
    pub gr: BTreeMap<String, BTreeMap<String, String>>,
    /// gs[tag][nom] = lignes
    pub gs: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl Stockholm {
    pub fn new(seqs: Vec<FastSeq>) -> Self {
        Self {
            gapped: seqs,
            ..Self::default()
        }
    }

    /// Lit un enregistrement (jusqu'au `//` ou à la fin du flux). Rend
    /// `None` si le flux ne contient plus aucune donnée.
    pub fn read<R: BufRead>(reader: &mut R) -> Result<Option<Stockholm>> {
        let mut stock = Stockholm::default();
        let mut seq: BTreeMap<String, String> = BTreeMap::new();
        let mut row_names: Vec<String> = Vec::new();
        let mut saw_anything = false;
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let trimmed = line.trim_end();
            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }
            if tokens[0] == "//" {
                saw_anything = true;
                break;
            }
            if tokens[0] == "#=GF" && tokens.len() >= 3 {
                saw_anything = true;
                stock
                    .gf
                    .entry(tokens[1].to_string())
                    .or_default()
                    .push(tokens[2..].join(" "));
            } else if tokens[0] == "#=GC" && tokens.len() == 3 {
                saw_anything = true;
                stock
                    .gc
                    .entry(tokens[1].to_string())
                    .or_default()
                    .push_str(tokens[2]);
            } else if tokens[0] == "#=GR" && tokens.len() == 4 {
                saw_anything = true;
                stock
                    .gr
                    .entry(tokens[2].to_string())
                    .or_default()
                    .entry(tokens[1].to_string())
                    .or_default()
                    .push_str(tokens[3]);
            } else if tokens[0] == "#=GS" && tokens.len() >= 4 {
                saw_anything = true;
                stock
                    .gs
                    .entry(tokens[2].to_string())
                    .or_default()
                    .entry(tokens[1].to_string())
                    .or_default()
                    .push(tokens[3..].join(" "));
            } else if tokens[0].starts_with('#') {
                // en-tête ou commentaire
                continue;
            } else if tokens.len() == 2 {
                saw_anything = true;
                let name = tokens[0].to_string();
                if !seq.contains_key(&name) {
                    row_names.push(name.clone());
                }
                seq.entry(name).or_default().push_str(tokens[1]);
            } else {
                warn!("Ligne Stockholm non reconnue: {}", trimmed);
            }
        }
        if !saw_anything {
            return Ok(None);
        }
        for name in row_names {
            let s = seq.remove(&name).unwrap_or_default();
            stock.gapped.push(FastSeq {
                name,
                comment: String::new(),
                seq: s,
                qual: String::new(),
            });
        }
        Ok(Some(stock))
    }

    /// Écrit l'enregistrement en blocs d'au plus `chars_per_row` colonnes.
    pub fn write<W: Write>(&self, out: &mut W, chars_per_row: usize) -> Result<()> {
        let mut nw = 0usize;
        let mut tw = 0usize;
        let mut w = 0usize;
        let mut cols = self.columns();
        let mut names: BTreeSet<&str> = BTreeSet::new();
        for fs in &self.gapped {
            w = w.max(fs.name.len());
            names.insert(&fs.name);
        }
        for tag in self.gf.keys() {
            w = w.max(tag.len() + 5);
        }
        for (tag, cs) in &self.gc {
            w = w.max(tag.len() + 5);
            cols = cols.max(cs.len());
        }
        for (tag, by_name) in &self.gs {
            tw = tw.max(tag.len());
            for name in by_name.keys() {
                nw = nw.max(name.len());
            }
        }
        for (tag, by_name) in &self.gr {
            tw = tw.max(tag.len());
            for (name, cs) in by_name {
                nw = nw.max(name.len());
                cols = cols.max(cs.len());
            }
        }
        if tw > 0 {
            w = w.max(nw + tw + 6);
        }

        writeln!(out, "# STOCKHOLM 1.0")?;
        for (tag, lines) in &self.gf {
            for line in lines {
                writeln!(out, "#=GF {:<width$} {}", tag, line, width = w.saturating_sub(5))?;
            }
        }
        for (tag, by_name) in &self.gs {
            for fs in &self.gapped {
                if let Some(lines) = by_name.get(&fs.name) {
                    for line in lines {
                        writeln!(
                            out,
                            "#=GS {:<nw$} {:<tw$} {}",
                            fs.name,
                            tag,
                            line,
                            nw = nw,
                            tw = tw
                        )?;
                    }
                }
            }
            for (name, lines) in by_name {
                if !names.contains(name.as_str()) {
                    for line in lines {
                        writeln!(out, "#=GS {:<nw$} {:<tw$} {}", name, tag, line, nw = nw, tw = tw)?;
                    }
                }
            }
        }

        let col_step = MIN_STOCKHOLM_CHARS_PER_ROW.max(chars_per_row.saturating_sub(w + 1));
        let mut col = 0usize;
        while col < cols.max(1) {
            for (tag, cs) in &self.gc {
                if col < cs.len() {
                    let end = (col + col_step).min(cs.len());
                    writeln!(
                        out,
                        "#=GC {:<width$} {}",
                        tag,
                        &cs[col..end],
                        width = w.saturating_sub(5)
                    )?;
                }
            }
            for fs in &self.gapped {
                if col < fs.seq.len() {
                    let end = (col + col_step).min(fs.seq.len());
                    writeln!(out, "{:<width$} {}", fs.name, &fs.seq[col..end], width = w)?;
                }
                for (tag, by_name) in &self.gr {
                    if let Some(cs) = by_name.get(&fs.name) {
                        if col < cs.len() {
                            let end = (col + col_step).min(cs.len());
                            writeln!(
                                out,
                                "#=GR {:<nw$} {:<tw$} {}",
                                fs.name,
                                tag,
                                &cs[col..end],
                                nw = nw,
                                tw = tw
                            )?;
                        }
                    }
                }
            }
            for (tag, by_name) in &self.gr {
                for (name, cs) in by_name {
                    if !names.contains(name.as_str()) && col < cs.len() {
                        let end = (col + col_step).min(cs.len());
                        writeln!(
                            out,
                            "#=GR {:<nw$} {:<tw$} {}",
                            name,
                            tag,
                            &cs[col..end],
                            nw = nw,
                            tw = tw
                        )?;
                    }
                }
            }
            col += col_step;
            if col < cols {
                writeln!(out)?;
            }
        }
        writeln!(out, "//")?;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.gapped.len()
    }

    pub fn columns(&self) -> usize {
        self.gapped.first().map_or(0, |fs| fs.length())
    }

    /// Chemin d'alignement des rangées de séquence.
    pub fn path(&self) -> AlignPath {
        Alignment::from_gapped(&self.gapped).path
    }

    pub fn alignment(&self) -> Alignment {
        Alignment::from_gapped(&self.gapped)
    }
}

/// Lit tous les enregistrements d'une base de données Stockholm.
pub fn read_stockholm_database<R: BufRead>(reader: &mut R) -> Result<Vec<Stockholm>> {
    let mut db = Vec::new();
    while let Some(stock) = Stockholm::read(reader)? {
        db.push(stock);
    }
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# STOCKHOLM 1.0\n\
#=GF ID exemple\n\
#=GS x DE premiere rangee\n\
x ACG-T\n\
y AC-GT\n\
#=GR x PP 99.9.\n\
#=GC SS ....-\n\
x ACG\n\
y ACG\n\
//\n";

    #[test]
    fn test_read_record() {
        let mut r = SAMPLE.as_bytes();
        let stock = Stockholm::read(&mut r).unwrap().unwrap();
        assert_eq!(stock.rows(), 2);
        assert_eq!(stock.gapped[0].seq, "ACG-TACG");
        assert_eq!(stock.gapped[1].seq, "AC-GTACG");
        assert_eq!(stock.gf["ID"], vec!["exemple".to_string()]);
        assert_eq!(stock.gs["DE"]["x"], vec!["premiere rangee".to_string()]);
        assert_eq!(stock.gr["PP"]["x"], "99.9.");
        assert_eq!(stock.gc["SS"], "....-");
    }

    #[test]
    fn test_roundtrip_through_writer() {
        let mut r = SAMPLE.as_bytes();
        let stock = Stockholm::read(&mut r).unwrap().unwrap();
        let mut buf = Vec::new();
        stock.write(&mut buf, DEFAULT_STOCKHOLM_ROW_LENGTH).unwrap();
        let mut r2 = buf.as_slice();
        let back = Stockholm::read(&mut r2).unwrap().unwrap();
        assert_eq!(back.gapped[0].seq, stock.gapped[0].seq);
        assert_eq!(back.gapped[1].seq, stock.gapped[1].seq);
        assert_eq!(back.gc, stock.gc);
        assert_eq!(back.gr, stock.gr);
    }

    #[test]
    fn test_narrow_writer_floors_width() {
        let stock = Stockholm::new(vec![FastSeq::new("tres-long-nom", "ACGT".repeat(10))]);
        let mut buf = Vec::new();
        stock.write(&mut buf, 1).unwrap();
        let text = String::from_utf8(buf).unwrap();
        // au moins MIN_STOCKHOLM_CHARS_PER_ROW colonnes par bloc
        let mut r = text.as_bytes();
        let back = Stockholm::read(&mut r).unwrap().unwrap();
        assert_eq!(back.gapped[0].seq, "ACGT".repeat(10));
    }

    #[test]
    fn test_database_reads_multiple_records() {
        let two = format!("{}{}", SAMPLE, SAMPLE);
        let mut r = two.as_bytes();
        let db = read_stockholm_database(&mut r).unwrap();
        assert_eq!(db.len(), 2);
    }

    #[test]
    fn test_path_extraction() {
        let mut r = SAMPLE.as_bytes();
        let stock = Stockholm::read(&mut r).unwrap().unwrap();
        let path = stock.path();
        assert_eq!(path[&0][3], false);
        assert_eq!(path[&1][2], false);
        assert_eq!(path[&0].len(), 8);
    }
}
