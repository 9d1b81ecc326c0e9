//! Filtres de motifs sur k-mers
//!
//! Quatre tests à sortie anticipée décident si un k-mer contient une
//! structure problématique pour la synthèse ou le séquençage: suffixe
//! interdit, répétition en tandem exacte, répétition inversée locale
//! (épingle à cheveux), répétition inversée distante. Le rejet est signalé
//! par le journal, jamais par une erreur.

use std::collections::BTreeSet;

use tracing::{debug, trace};

use crate::kmer::{
    kmer_rev_comp, kmer_string, kmer_sub, kmer_sub_at, Kmer, KmerLen, Pos,
};

/// Vrai si `seq` se termine par l'un des motifs (comparaison de suffixe sur
/// les `len(motif)` dernières bases).
pub fn ends_with_motif(seq: Kmer, len: Pos, motifs: &BTreeSet<KmerLen>) -> bool {
    motifs
        .iter()
        .any(|kl| kl.len <= len && kmer_sub(seq, 1, kl.len) == kl.kmer)
}

/// Variante journalisée de [`ends_with_motif`], utilisée pendant la
/// génération des candidats.
pub fn ends_with_motif_logged(
    seq: Kmer,
    len: Pos,
    motifs: &BTreeSet<KmerLen>,
    desc: &str,
) -> bool {
    for kl in motifs {
        if kl.len <= len && kmer_sub(seq, 1, kl.len) == kl.kmer {
            debug!(
                "Rejet de {}: se termine par {} ({})",
                kmer_string(seq, len),
                kl,
                desc
            );
            return true;
        }
    }
    false
}

/// Répétition en tandem exacte: il existe r ∈ [1, max_repeat_len] et une
/// position i telles que seq[i..i+r-1] == seq[i+r..i+2r-1].
pub fn has_exact_tandem_repeat(seq: Kmer, len: Pos, max_repeat_len: Pos) -> bool {
    for repeat_len in 1..=max_repeat_len {
        if 2 * repeat_len > len {
            break;
        }
        for i in (1..=(len - 2 * repeat_len + 1)).rev() {
            if kmer_sub(seq, i, repeat_len) == kmer_sub(seq, i + repeat_len, repeat_len) {
                trace!(
                    "Rejet de {}: {} répète {} ({})",
                    kmer_string(seq, len),
                    kmer_sub_at(seq, i + repeat_len, repeat_len, len),
                    kmer_sub_at(seq, i, repeat_len, len),
                    if repeat_len == 1 {
                        "base répétée"
                    } else {
                        "répétition en tandem exacte"
                    }
                );
                return true;
            }
        }
    }
    false
}

/// Répétition inversée locale exacte (palindrome/épingle): il existe
/// r ∈ [min_repeat_len, max_repeat_len] et i telles que
/// revcomp(seq[i..i+r-1]) == seq[i+r..i+2r-1].
pub fn has_exact_local_inverted_repeat(
    seq: Kmer,
    len: Pos,
    min_repeat_len: Pos,
    max_repeat_len: Pos,
) -> bool {
    let rc = kmer_rev_comp(seq, len);
    for repeat_len in min_repeat_len..=max_repeat_len {
        if 2 * repeat_len > len {
            break;
        }
        for i in (1..=(len - 2 * repeat_len + 1)).rev() {
            // revcomp(seq[i..i+r-1]) lu dans le complément inverse précalculé
            let inv_rep = kmer_sub(rc, len - i - repeat_len + 2, repeat_len);
            if inv_rep == kmer_sub(seq, i + repeat_len, repeat_len) {
                trace!(
                    "Rejet de {}: {} répète {} (palindrome)",
                    kmer_string(seq, len),
                    kmer_sub_at(seq, i + repeat_len, repeat_len, len),
                    kmer_sub_at(seq, i, repeat_len, len)
                );
                return true;
            }
        }
    }
    false
}

/// Répétition inversée distante exacte de longueur `repeat_len`, les deux
/// segments étant séparés d'au moins `min_separation` bases.
pub fn has_exact_nonlocal_inverted_repeat(
    seq: Kmer,
    len: Pos,
    repeat_len: Pos,
    min_separation: Pos,
) -> bool {
    if repeat_len == 0 {
        return false;
    }
    if len < 2 * repeat_len + min_separation {
        return false;
    }
    let rc = kmer_rev_comp(seq, len);
    for i in (1..=(len - 2 * repeat_len - min_separation + 1)).rev() {
        let inv_rep = kmer_sub(rc, len - i - repeat_len + 2, repeat_len);
        let j_min = i + repeat_len + min_separation;
        for j in (j_min..=(len - repeat_len + 1)).rev() {
            if inv_rep == kmer_sub(seq, j, repeat_len) {
                debug!(
                    "Rejet de {}: {} répète {} (répétition inversée exacte)",
                    kmer_string(seq, len),
                    kmer_sub_at(seq, j, repeat_len, len),
                    kmer_sub_at(seq, i, repeat_len, len)
                );
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmer::string_to_kmer;

    fn k(s: &str) -> (Kmer, Pos) {
        (string_to_kmer(s).unwrap(), s.len() as Pos)
    }

    #[test]
    fn test_tandem_repeat() {
        let (seq, len) = k("ACGACG");
        assert!(has_exact_tandem_repeat(seq, len, 3));
        let (seq, len) = k("ACGACT");
        assert!(!has_exact_tandem_repeat(seq, len, 3));
    }

    #[test]
    fn test_tandem_repeat_embedded() {
        // ACGACG présent à toute position force le rejet avec r = 3
        for s in ["ACGACGTC", "TCACGACG", "TACGACGC"] {
            let (seq, len) = k(s);
            assert!(has_exact_tandem_repeat(seq, len, 3), "{}", s);
        }
    }

    #[test]
    fn test_repeated_base_is_tandem() {
        let (seq, len) = k("ATTGCA");
        assert!(has_exact_tandem_repeat(seq, len, 1));
        let (seq, len) = k("ACGTAG");
        assert!(!has_exact_tandem_repeat(seq, len, 1));
    }

    #[test]
    fn test_local_inverted_repeat() {
        // épingles à cheveux de longueurs croissantes
        let (seq, len) = k("ACGCGA");
        assert!(has_exact_local_inverted_repeat(seq, len, 1, 4));
        assert!(has_exact_local_inverted_repeat(seq, len, 2, 4));
        assert!(!has_exact_local_inverted_repeat(seq, len, 3, 4));
        let (seq, len) = k("ACGCGT");
        assert!(has_exact_local_inverted_repeat(seq, len, 3, 4));
        assert!(!has_exact_local_inverted_repeat(seq, len, 4, 4));
    }

    #[test]
    fn test_nonlocal_inverted_repeat() {
        let (seq, len) = k("ACGCGT");
        assert!(!has_exact_nonlocal_inverted_repeat(seq, len, 3, 2));
        let (seq, len) = k("ACGTCGT");
        assert!(!has_exact_nonlocal_inverted_repeat(seq, len, 3, 2));
        let (seq, len) = k("ACGTTCGT");
        assert!(has_exact_nonlocal_inverted_repeat(seq, len, 3, 2));
    }

    #[test]
    fn test_nonlocal_disabled_when_zero() {
        let (seq, len) = k("ACGTTCGT");
        assert!(!has_exact_nonlocal_inverted_repeat(seq, len, 0, 2));
    }

    #[test]
    fn test_ends_with_motif() {
        let mut motifs = BTreeSet::new();
        motifs.insert(KmerLen::new(string_to_kmer("CGT").unwrap(), 3));
        let (seq, len) = k("AACGT");
        assert!(ends_with_motif(seq, len, &motifs));
        let (seq, len) = k("ACGTA");
        assert!(!ends_with_motif(seq, len, &motifs));
        // un motif plus long que la séquence ne correspond jamais
        let mut long = BTreeSet::new();
        long.insert(KmerLen::new(string_to_kmer("AAAAAA").unwrap(), 6));
        let (seq, len) = k("AAAA");
        assert!(!ends_with_motif(seq, len, &long));
    }
}
