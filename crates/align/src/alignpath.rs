//! Chemins d'alignement par paires et multiples
//!
//! Un chemin d'alignement associe à chaque rangée un vecteur de bits
//! colonne par colonne: vrai quand la rangée place un résidu dans la
//! colonne. L'union, la concaténation et la fusion synchronisée portent
//! sur ces vecteurs, jamais sur les caractères.

use std::collections::BTreeMap;

use tracing::info;

use crate::error::{AlignError, Result};
use crate::fastseq::FastSeq;

pub type AlignRowIndex = usize;
pub type AlignColIndex = usize;
pub type AlignRowPath = Vec<bool>;
pub type AlignPath = BTreeMap<AlignRowIndex, AlignRowPath>;

pub const GAP_CHAR: char = '-';
pub const WILDCARD_CHAR: char = '*';

pub fn is_gap(c: char) -> bool {
    c == '-' || c == '.'
}

pub fn is_wildcard(c: char) -> bool {
    c == WILDCARD_CHAR
}

/// Nombre de colonnes d'un chemin; vérifie qu'il est affleurant.
pub fn align_path_columns(a: &AlignPath) -> Result<AlignColIndex> {
    let mut cols = None;
    for (row, path) in a {
        match cols {
            None => cols = Some(path.len()),
            Some(c) if c != path.len() => {
                return Err(AlignError::NotFlush {
                    row: row.to_string(),
                    expected: c,
                    got: path.len(),
                })
            }
            _ => {}
        }
    }
    Ok(cols.unwrap_or(0))
}

/// Nombre de résidus placés par une rangée.
pub fn align_path_residues_in_row(r: &AlignRowPath) -> usize {
    r.iter().filter(|&&b| b).count()
}

/// Union simple de deux chemins sans rangée commune.
pub fn align_path_union(a1: &AlignPath, a2: &AlignPath) -> AlignPath {
    let mut a = a1.clone();
    for (row, path) in a2 {
        a.entry(*row).or_insert_with(|| path.clone());
    }
    a
}

/// Concaténation en longueur: les rangées absentes d'un côté sont
/// complétées par des brèches.
pub fn align_path_concat(a1: &AlignPath, a2: &AlignPath) -> Result<AlignPath> {
    let c1 = align_path_columns(a1)?;
    let c2 = align_path_columns(a2)?;
    let mut a = a1.clone();
    for (row, path) in a.iter_mut() {
        if !a2.contains_key(row) {
            path.extend(std::iter::repeat(false).take(c2));
        }
    }
    for (row, r_path) in a2 {
        let l_path = a.entry(*row).or_default();
        if l_path.is_empty() {
            l_path.extend(std::iter::repeat(false).take(c1));
        }
        l_path.extend_from_slice(r_path);
    }
    Ok(a)
}

pub fn align_path_concat3(a1: &AlignPath, a2: &AlignPath, a3: &AlignPath) -> Result<AlignPath> {
    align_path_concat(&align_path_concat(a1, a2)?, a3)
}

/// Carte bidirectionnelle (alignement, colonne) <-> (rangée, résidu),
/// support de la fusion synchronisée.
struct AlignSeqMap<'a> {
    alignments: &'a [AlignPath],
    align_cols: Vec<AlignColIndex>,
    seq_len: BTreeMap<AlignRowIndex, usize>,
    align_col_row_to_pos: BTreeMap<usize, BTreeMap<AlignColIndex, BTreeMap<AlignRowIndex, usize>>>,
    row_pos_align_to_col: BTreeMap<AlignRowIndex, BTreeMap<usize, BTreeMap<usize, AlignColIndex>>>,
}

impl<'a> AlignSeqMap<'a> {
    fn new(alignments: &'a [AlignPath]) -> Result<Self> {
        let mut align_cols = Vec::with_capacity(alignments.len());
        let mut seq_len: BTreeMap<AlignRowIndex, usize> = BTreeMap::new();
        for align in alignments {
            let cols = align_path_columns(align)?;
            align_cols.push(cols);
            for (&row, path) in align {
                let len = align_path_residues_in_row(path);
                match seq_len.get(&row) {
                    None => {
                        seq_len.insert(row, len);
                    }
                    Some(&prev) if prev != len => {
                        return Err(AlignError::IncompatibleResidues {
                            row,
                            a: prev,
                            b: len,
                        })
                    }
                    _ => {}
                }
            }
        }

        let mut align_col_row_to_pos: BTreeMap<
            usize,
            BTreeMap<AlignColIndex, BTreeMap<AlignRowIndex, usize>>,
        > = BTreeMap::new();
        let mut row_pos_align_to_col: BTreeMap<
            AlignRowIndex,
            BTreeMap<usize, BTreeMap<usize, AlignColIndex>>,
        > = BTreeMap::new();
        for (n_align, align) in alignments.iter().enumerate() {
            let mut row_pos: BTreeMap<AlignRowIndex, usize> =
                align.keys().map(|&r| (r, 0)).collect();
            for col in 0..align_cols[n_align] {
                for (&row, path) in align {
                    if path[col] {
                        let pos = row_pos.get_mut(&row).expect("rangée indexée");
                        align_col_row_to_pos
                            .entry(n_align)
                            .or_default()
                            .entry(col)
                            .or_default()
                            .insert(row, *pos);
                        row_pos_align_to_col
                            .entry(row)
                            .or_default()
                            .entry(*pos)
                            .or_default()
                            .insert(n_align, col);
                        *pos += 1;
                    }
                }
            }
        }
        Ok(Self {
            alignments,
            align_cols,
            seq_len,
            align_col_row_to_pos,
            row_pos_align_to_col,
        })
    }

    /// Colonnes liées transitivement à (n_align, col) via les résidus.
    fn linked_columns(&self, n_align: usize, col: AlignColIndex) -> Result<BTreeMap<usize, AlignColIndex>> {
        let mut ac: BTreeMap<usize, AlignColIndex> = BTreeMap::new();
        let mut queue: Vec<(usize, AlignColIndex)> = vec![(n_align, col)];
        while let Some((na, c)) = queue.pop() {
            if let Some(&existing) = ac.get(&na) {
                if existing != c {
                    return Err(AlignError::InconsistentAlignments { align: na, col: c });
                }
                continue;
            }
            ac.insert(na, c);
            if let Some(rows) = self
                .align_col_row_to_pos
                .get(&na)
                .and_then(|cols| cols.get(&c))
            {
                for (&row, &pos) in rows {
                    if let Some(linked) = self
                        .row_pos_align_to_col
                        .get(&row)
                        .and_then(|p| p.get(&pos))
                    {
                        for (&ln, &lc) in linked {
                            match ac.get(&ln) {
                                Some(&existing) if existing != lc => {
                                    return Err(AlignError::InconsistentAlignments {
                                        align: ln,
                                        col: lc,
                                    })
                                }
                                Some(_) => {}
                                None => queue.push((ln, lc)),
                            }
                        }
                    }
                }
            }
        }
        Ok(ac)
    }
}

/// Fusion synchronisée d'une liste de chemins partageant des rangées: la
/// fusion classique d'alignements multiples pilotée par la carte
/// bidirectionnelle colonne/position.
pub fn align_path_merge(alignments: &[AlignPath]) -> Result<AlignPath> {
    let map = AlignSeqMap::new(alignments)?;
    let mut a: AlignPath = map.seq_len.keys().map(|&r| (r, Vec::new())).collect();
    let mut next_col: Vec<AlignColIndex> = vec![0; alignments.len()];
    loop {
        let mut all_done = true;
        let mut none_ready = true;
        for n in 0..alignments.len() {
            if next_col[n] >= map.align_cols[n] {
                continue;
            }
            all_done = false;
            let linked = map.linked_columns(n, next_col[n])?;
            let ready = linked
                .iter()
                .all(|(&na, &c)| next_col[na] == c);
            if ready {
                none_ready = false;
                if linked.is_empty() {
                    next_col[n] += 1; // colonne vide
                } else {
                    for path in a.values_mut() {
                        path.push(false);
                    }
                    for (&na, &c) in &linked {
                        for (&row, path) in &alignments[na] {
                            if path[c] {
                                *a.get_mut(&row)
                                    .expect("rangée présente")
                                    .last_mut()
                                    .expect("colonne poussée") = true;
                            }
                        }
                        next_col[na] += 1;
                    }
                }
                break;
            }
        }
        if all_done {
            break;
        }
        if none_ready {
            return Err(AlignError::MergeDeadlock);
        }
    }
    let rows = a.len();
    let cols = align_path_columns(&a)?;
    info!(
        "Fusionné {} alignements en un alignement de {} rangées et {} colonnes",
        alignments.len(),
        rows,
        cols
    );
    Ok(a)
}

/// Alignement: séquences sans brèches + chemin.
#[derive(Debug, Clone, Default)]
pub struct Alignment {
    pub ungapped: Vec<FastSeq>,
    pub path: AlignPath,
}

impl Alignment {
    /// Décompose des séquences avec brèches en (séquences nues, chemin).
    pub fn from_gapped(gapped: &[FastSeq]) -> Self {
        let mut ungapped = Vec::with_capacity(gapped.len());
        let mut path = AlignPath::new();
        for (row, g) in gapped.iter().enumerate() {
            let mut fs = FastSeq {
                name: g.name.clone(),
                comment: g.comment.clone(),
                seq: String::new(),
                qual: String::new(),
            };
            let quals: Vec<char> = g.qual.chars().collect();
            let mut row_path = Vec::with_capacity(g.length());
            for (col, c) in g.seq.chars().enumerate() {
                if is_gap(c) {
                    row_path.push(false);
                } else {
                    row_path.push(true);
                    fs.seq.push(c);
                    if let Some(&q) = quals.get(col) {
                        fs.qual.push(q);
                    }
                }
            }
            path.insert(row, row_path);
            ungapped.push(fs);
        }
        Self { ungapped, path }
    }

    pub fn new(ungapped: Vec<FastSeq>, path: AlignPath) -> Self {
        Self { ungapped, path }
    }

    /// Recompose les séquences avec brèches.
    pub fn gapped(&self) -> Result<Vec<FastSeq>> {
        let mut out = vec![FastSeq::default(); self.ungapped.len()];
        for (&row, row_path) in &self.path {
            let ug = &self.ungapped[row];
            let g = &mut out[row];
            g.name = ug.name.clone();
            g.comment = ug.comment.clone();
            let chars: Vec<char> = ug.seq.chars().collect();
            let quals: Vec<char> = ug.qual.chars().collect();
            let mut pos = 0usize;
            for (col, &present) in row_path.iter().enumerate() {
                if present {
                    let c = *chars.get(pos).ok_or_else(|| AlignError::OutOfBounds {
                        name: ug.name.clone(),
                        pos: col,
                    })?;
                    g.seq.push(c);
                    if ug.has_qual() {
                        let q = *quals.get(pos).ok_or_else(|| AlignError::OutOfBounds {
                            name: ug.name.clone(),
                            pos: col,
                        })?;
                        g.qual.push(q);
                    }
                    pos += 1;
                } else {
                    g.seq.push(GAP_CHAR);
                    if ug.has_qual() {
                        g.qual.push('!');
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_of(rows: &[(usize, &str)]) -> AlignPath {
        rows.iter()
            .map(|&(r, bits)| (r, bits.chars().map(|c| c == '1').collect()))
            .collect()
    }

    #[test]
    fn test_columns_and_residues() {
        let a = path_of(&[(0, "1101"), (1, "1011")]);
        assert_eq!(align_path_columns(&a).unwrap(), 4);
        assert_eq!(align_path_residues_in_row(&a[&0]), 3);
    }

    #[test]
    fn test_not_flush_is_error() {
        let a = path_of(&[(0, "110"), (1, "1011")]);
        assert!(align_path_columns(&a).is_err());
    }

    #[test]
    fn test_concat_pads_with_gaps() {
        let a1 = path_of(&[(0, "11")]);
        let a2 = path_of(&[(1, "11")]);
        let a = align_path_concat(&a1, &a2).unwrap();
        assert_eq!(a[&0], vec![true, true, false, false]);
        assert_eq!(a[&1], vec![false, false, true, true]);
    }

    #[test]
    fn test_merge_shared_row() {
        // alignement 0 lie les rangées 0 et 1; alignement 1 lie 1 et 2;
        // la rangée 1 impose la synchronisation
        let a0 = path_of(&[(0, "11"), (1, "11")]);
        let a1 = path_of(&[(1, "11"), (2, "11")]);
        let merged = align_path_merge(&[a0, a1]).unwrap();
        assert_eq!(align_path_columns(&merged).unwrap(), 2);
        assert_eq!(align_path_residues_in_row(&merged[&0]), 2);
        assert_eq!(align_path_residues_in_row(&merged[&2]), 2);
    }

    #[test]
    fn test_merge_interleaves_private_columns() {
        // la colonne privée de la rangée 0 ne force aucune synchronisation
        let a0 = path_of(&[(0, "101"), (1, "011")]);
        let a1 = path_of(&[(1, "11"), (2, "11")]);
        let merged = align_path_merge(&[a0, a1]).unwrap();
        assert_eq!(align_path_residues_in_row(&merged[&1]), 2);
        assert_eq!(align_path_residues_in_row(&merged[&2]), 2);
        // rangée 2 alignée sur les résidus de la rangée 1
        let cols = align_path_columns(&merged).unwrap();
        assert!(cols >= 3);
    }

    #[test]
    fn test_gapped_ungapped_roundtrip() {
        let gapped = vec![FastSeq::new("x", "AC-GT"), FastSeq::new("y", "A-CGT")];
        let a = Alignment::from_gapped(&gapped);
        assert_eq!(a.ungapped[0].seq, "ACGT");
        assert_eq!(a.ungapped[1].seq, "ACGT");
        let back = a.gapped().unwrap();
        assert_eq!(back[0].seq, "AC-GT");
        assert_eq!(back[1].seq, "A-CGT");
    }
}
