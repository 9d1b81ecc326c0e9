//! Enveloppe d'alignement guide
//!
//! Un alignement de référence à deux rangées borne les paires (i, j) que
//! la programmation dynamique a le droit de visiter: une paire est
//! admissible si la différence des comptes de correspondances cumulés du
//! guide aux deux positions est au plus `max_distance`. Une petite borne
//! rend la matrice en bande.

use crate::alignpath::{align_path_columns, AlignPath, AlignRowIndex};
use crate::error::{AlignError, Result};

#[derive(Debug, Clone)]
pub struct GuideAlignmentEnvelope {
    pub max_distance: Option<usize>,
    cumulative_matches: Vec<usize>,
    row1_pos_to_col: Vec<usize>,
    row2_pos_to_col: Vec<usize>,
}

impl GuideAlignmentEnvelope {
    /// Enveloppe sans restriction (toute paire est admissible).
    pub fn unbounded(in_len: usize, out_len: usize) -> Self {
        let _ = (in_len, out_len);
        Self {
            max_distance: None,
            cumulative_matches: Vec::new(),
            row1_pos_to_col: Vec::new(),
            row2_pos_to_col: Vec::new(),
        }
    }

    pub fn new(
        guide: &AlignPath,
        row1: AlignRowIndex,
        row2: AlignRowIndex,
        max_distance: usize,
    ) -> Result<Self> {
        let r1 = guide.get(&row1).ok_or(AlignError::MissingGuideRow(row1))?;
        let r2 = guide.get(&row2).ok_or(AlignError::MissingGuideRow(row2))?;
        let cols = align_path_columns(guide)?;

        let mut cumulative_matches = Vec::with_capacity(cols + 1);
        let mut row1_pos_to_col = vec![0usize];
        let mut row2_pos_to_col = vec![0usize];
        cumulative_matches.push(0);
        let mut matches = 0usize;
        for col in 0..cols {
            if r1[col] {
                row1_pos_to_col.push(col + 1);
            }
            if r2[col] {
                row2_pos_to_col.push(col + 1);
            }
            if r1[col] && r2[col] {
                matches += 1;
            }
            cumulative_matches.push(matches);
        }
        Ok(Self {
            max_distance: Some(max_distance),
            cumulative_matches,
            row1_pos_to_col,
            row2_pos_to_col,
        })
    }

    /// Vrai si la cellule (i, j) est dans l'enveloppe; i et j sont des
    /// positions de résidu (0 = avant le premier résidu).
    #[inline]
    pub fn in_range(&self, i: usize, j: usize) -> bool {
        match self.max_distance {
            None => true,
            Some(max) => {
                let ci = self.cumulative_matches[self.row1_pos_to_col[i]];
                let cj = self.cumulative_matches[self.row2_pos_to_col[j]];
                ci.abs_diff(cj) <= max
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn path_of(rows: &[(usize, &str)]) -> AlignPath {
        rows.iter()
            .map(|&(r, bits)| (r, bits.chars().map(|c| c == '1').collect()))
            .collect::<BTreeMap<_, _>>()
    }

    #[test]
    fn test_diagonal_band() {
        // alignement identitaire de longueur 4
        let guide = path_of(&[(0, "1111"), (1, "1111")]);
        let env = GuideAlignmentEnvelope::new(&guide, 0, 1, 1).unwrap();
        assert!(env.in_range(0, 0));
        assert!(env.in_range(2, 3));
        assert!(env.in_range(2, 2));
        assert!(!env.in_range(0, 4));
        assert!(!env.in_range(4, 0));
    }

    #[test]
    fn test_gaps_do_not_count_as_matches() {
        let guide = path_of(&[(0, "110"), (1, "011")]);
        // colonnes: (r0,r0+r1,r1) -> une seule correspondance (colonne 2)
        let env = GuideAlignmentEnvelope::new(&guide, 0, 1, 0).unwrap();
        // i=1 (apres premier residu de r0, col 1, cumul 0); j=0 (cumul 0)
        assert!(env.in_range(1, 0));
        assert!(env.in_range(2, 1));
    }

    #[test]
    fn test_unbounded_accepts_everything() {
        let env = GuideAlignmentEnvelope::unbounded(10, 10);
        assert!(env.in_range(0, 10));
        assert!(env.in_range(10, 0));
    }

    #[test]
    fn test_missing_row_is_error() {
        let guide = path_of(&[(0, "11")]);
        assert!(GuideAlignmentEnvelope::new(&guide, 0, 1, 1).is_err());
    }
}
