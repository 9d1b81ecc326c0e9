//! Matrices avant et arrière sur un alignement d'entraînement
//!
//! Pour une paire (séquence d'entrée de longueur I, séquence observée de
//! longueur O), la matrice porte trois sous-états par cellule (i, j):
//! `S` (en phase), `D` (dans une délétion) et `T[d]` (en cours de
//! duplication en tandem, indice restant d). L'enveloppe guide borne les
//! cellules remplies; hors enveloppe les scores restent à -∞.

use tracing::warn;

use brin_align::{GuideAlignmentEnvelope, Stockholm};
use brin_core::kmer::Base;

use crate::error::{MutationError, Result};
use crate::logsumexp::{log_accum_exp, LogProb, LOG_ZERO};
use crate::params::{MutatorCounts, MutatorParams, MutatorScores};

/// Alignement d'entraînement prêt pour la programmation dynamique: la
/// rangée 0 est la séquence d'entrée (propre), la rangée 1 l'observation.
pub struct AlignedPair {
    pub in_seq: Vec<Base>,
    pub out_seq: Vec<Base>,
    pub env: GuideAlignmentEnvelope,
}

impl AlignedPair {
    pub fn from_stockholm(stock: &Stockholm, max_distance: Option<usize>) -> Result<Self> {
        if stock.rows() != 2 {
            return Err(MutationError::NotPairwise(stock.rows()));
        }
        let align = stock.alignment();
        let in_seq = align.ungapped[0].tokens();
        let out_seq = align.ungapped[1].tokens();
        let env = match max_distance {
            Some(d) => GuideAlignmentEnvelope::new(&align.path, 0, 1, d)?,
            None => GuideAlignmentEnvelope::unbounded(in_seq.len(), out_seq.len()),
        };
        Ok(Self {
            in_seq,
            out_seq,
            env,
        })
    }
}

/// Stockage plat des cellules (S, D, T[0..maxDupLen)).
pub struct MutatorMatrix<'a> {
    pub scores: MutatorScores,
    pub max_dup_len: usize,
    pub pair: &'a AlignedPair,
    pub in_len: usize,
    pub out_len: usize,
    cell: Vec<LogProb>,
}

impl<'a> MutatorMatrix<'a> {
    fn empty(params: &MutatorParams, pair: &'a AlignedPair) -> Self {
        let max_dup_len = params.max_dup_len();
        let in_len = pair.in_seq.len();
        let out_len = pair.out_seq.len();
        let n_cells = (max_dup_len + 2) * (in_len + 1) * (out_len + 1);
        Self {
            scores: MutatorScores::new(params),
            max_dup_len,
            pair,
            in_len,
            out_len,
            cell: vec![LOG_ZERO; n_cells],
        }
    }

    #[inline]
    fn base_index(&self, i: usize, j: usize) -> usize {
        (self.max_dup_len + 2) * (i + (self.in_len + 1) * j)
    }

    #[inline]
    pub fn s(&self, i: usize, j: usize) -> LogProb {
        self.cell[self.base_index(i, j)]
    }

    #[inline]
    pub fn d(&self, i: usize, j: usize) -> LogProb {
        self.cell[self.base_index(i, j) + 1]
    }

    #[inline]
    pub fn t(&self, i: usize, j: usize, dup: usize) -> LogProb {
        self.cell[self.base_index(i, j) + 2 + dup]
    }

    #[inline]
    fn s_mut(&mut self, i: usize, j: usize) -> &mut LogProb {
        let idx = self.base_index(i, j);
        &mut self.cell[idx]
    }

    #[inline]
    fn d_mut(&mut self, i: usize, j: usize) -> &mut LogProb {
        let idx = self.base_index(i, j) + 1;
        &mut self.cell[idx]
    }

    #[inline]
    fn t_mut(&mut self, i: usize, j: usize, dup: usize) -> &mut LogProb {
        let idx = self.base_index(i, j) + 2 + dup;
        &mut self.cell[idx]
    }

    /// Longueur de duplication admissible à la position d'entrée `i`.
    #[inline]
    pub fn max_dup_len_at(&self, i: usize) -> usize {
        self.max_dup_len.min(i)
    }

    #[inline]
    pub fn in_base(&self, i: usize) -> Base {
        self.pair.in_seq[i - 1]
    }

    #[inline]
    pub fn out_base(&self, j: usize) -> Base {
        self.pair.out_seq[j - 1]
    }

    /// Base dupliquée: `dup + 1` positions en amont dans l'entrée.
    #[inline]
    pub fn dup_base(&self, i: usize, dup: usize) -> Base {
        self.pair.in_seq[i - 1 - dup]
    }

    #[inline]
    pub fn sub_score(&self, i: usize, j: usize) -> LogProb {
        self.scores.sub[self.in_base(i) as usize][self.out_base(j) as usize]
    }

    #[inline]
    pub fn tan_dup_score(&self, i: usize, j: usize, dup: usize) -> LogProb {
        self.scores.sub[self.dup_base(i, dup) as usize][self.out_base(j) as usize]
    }
}

/// Matrice avant.
pub struct ForwardMatrix<'a> {
    pub m: MutatorMatrix<'a>,
}

impl<'a> ForwardMatrix<'a> {
    pub fn new(params: &MutatorParams, pair: &'a AlignedPair) -> Self {
        let mut m = MutatorMatrix::empty(params, pair);
        *m.s_mut(0, 0) = 0.0;
        for j in 0..=m.out_len {
            for i in 0..=m.in_len {
                if !pair.env.in_range(i, j) {
                    continue;
                }
                // D: ouvre ou étend une délétion en consommant l'entrée
                if i > 0 {
                    let open = m.s(i - 1, j) + m.scores.del_open;
                    let extend = m.d(i - 1, j) + m.scores.del_extend;
                    let v = crate::logsumexp::log_sum_exp(open, extend);
                    let dst = m.d_mut(i, j);
                    log_accum_exp(dst, v);
                }
                // S: correspondance en phase, fin de duplication, fin de délétion
                if i > 0 && j > 0 {
                    let v = m.s(i - 1, j - 1) + m.scores.no_gap + m.sub_score(i, j);
                    let dst = m.s_mut(i, j);
                    log_accum_exp(dst, v);
                }
                if j > 0 && m.max_dup_len_at(i) > 0 {
                    let v = m.t(i, j - 1, 0) + m.tan_dup_score(i, j, 0);
                    let dst = m.s_mut(i, j);
                    log_accum_exp(dst, v);
                }
                {
                    let v = m.d(i, j) + m.scores.del_end;
                    let dst = m.s_mut(i, j);
                    log_accum_exp(dst, v);
                }
                // T: entre en duplication depuis S, ou poursuit l'émission
                let mdl = m.max_dup_len_at(i);
                for dup in 0..mdl {
                    let mut v = m.s(i, j) + m.scores.tan_dup + m.scores.len[dup];
                    if dup + 1 < mdl && j > 0 {
                        let cont = m.t(i, j - 1, dup + 1) + m.tan_dup_score(i, j, dup + 1);
                        v = crate::logsumexp::log_sum_exp(v, cont);
                    }
                    *m.t_mut(i, j, dup) = v;
                }
            }
        }
        Self { m }
    }

    pub fn loglike(&self) -> LogProb {
        self.m.s(self.m.in_len, self.m.out_len)
    }
}

/// Matrice arrière.
pub struct BackwardMatrix<'a> {
    pub m: MutatorMatrix<'a>,
}

impl<'a> BackwardMatrix<'a> {
    pub fn new(params: &MutatorParams, pair: &'a AlignedPair) -> Self {
        let mut m = MutatorMatrix::empty(params, pair);
        let (in_len, out_len) = (m.in_len, m.out_len);
        for j in (0..=out_len).rev() {
            for i in (0..=in_len).rev() {
                if !pair.env.in_range(i, j) {
                    continue;
                }
                let mdl = m.max_dup_len_at(i);
                // T: poursuit la duplication ou la termine vers S
                for dup in 0..mdl {
                    let v = if j < out_len {
                        if dup == 0 {
                            m.s(i, j + 1) + m.tan_dup_score(i, j + 1, 0)
                        } else {
                            m.t(i, j + 1, dup - 1) + m.tan_dup_score(i, j + 1, dup)
                        }
                    } else {
                        LOG_ZERO
                    };
                    *m.t_mut(i, j, dup) = v;
                }
                // S
                let mut s = if i == in_len && j == out_len {
                    0.0
                } else {
                    LOG_ZERO
                };
                if i < in_len && j < out_len {
                    let v = m.s(i + 1, j + 1) + m.scores.no_gap + m.sub_score(i + 1, j + 1);
                    s = crate::logsumexp::log_sum_exp(s, v);
                }
                if i < in_len {
                    let v = m.d(i + 1, j) + m.scores.del_open;
                    s = crate::logsumexp::log_sum_exp(s, v);
                }
                for dup in 0..mdl {
                    let v = m.t(i, j, dup) + m.scores.tan_dup + m.scores.len[dup];
                    s = crate::logsumexp::log_sum_exp(s, v);
                }
                *m.s_mut(i, j) = s;
                // D: étend la délétion ou la referme vers S
                let mut d = m.s(i, j) + m.scores.del_end;
                if i < in_len {
                    let v = m.d(i + 1, j) + m.scores.del_extend;
                    d = crate::logsumexp::log_sum_exp(d, v);
                }
                *m.d_mut(i, j) = d;
            }
        }
        Self { m }
    }

    pub fn loglike(&self) -> LogProb {
        self.m.s(0, 0)
    }
}

/// Paire avant/arrière et comptes postérieurs.
pub struct FwdBackMatrix<'a> {
    pub fwd: ForwardMatrix<'a>,
    pub back: BackwardMatrix<'a>,
}

impl<'a> FwdBackMatrix<'a> {
    pub fn new(params: &MutatorParams, pair: &'a AlignedPair) -> Self {
        let fwd = ForwardMatrix::new(params, pair);
        let back = BackwardMatrix::new(params, pair);
        let (fl, bl) = (fwd.loglike(), back.loglike());
        if fl.is_finite() && bl.is_finite() && ((fl - bl) / fl).abs() > 1e-5 {
            warn!(
                "Log-vraisemblances avant ({}) et arrière ({}) en désaccord",
                fl, bl
            );
        }
        Self { fwd, back }
    }

    pub fn loglike(&self) -> LogProb {
        self.fwd.loglike()
    }

    /// Comptes espérés par sommation des postérieurs de transition.
    pub fn counts(&self, params: &MutatorParams) -> MutatorCounts {
        let mut counts = MutatorCounts::new(params);
        let ll = self.loglike();
        if !ll.is_finite() {
            warn!("Alignement de probabilité nulle: comptes ignorés");
            return counts;
        }
        let f = &self.fwd.m;
        let b = &self.back.m;
        let env = &f.pair.env;
        for j in 0..=f.out_len {
            for i in 0..=f.in_len {
                if !env.in_range(i, j) {
                    continue;
                }
                let mdl = f.max_dup_len_at(i);
                // S -> S (correspondance en phase)
                if i > 0 && j > 0 {
                    let p = (f.s(i - 1, j - 1) + f.scores.no_gap + f.sub_score(i, j) + b.s(i, j)
                        - ll)
                        .exp();
                    counts.n_no_gap += p;
                    counts.n_sub[f.in_base(i) as usize][f.out_base(j) as usize] += p;
                }
                // T -> T et T -> S (émissions de duplication)
                if j > 0 && mdl > 0 {
                    let p = (f.t(i, j - 1, 0) + f.tan_dup_score(i, j, 0) + b.s(i, j) - ll).exp();
                    counts.n_sub[f.dup_base(i, 0) as usize][f.out_base(j) as usize] += p;
                    for dup in 0..mdl.saturating_sub(1) {
                        let p = (f.t(i, j - 1, dup + 1)
                            + f.tan_dup_score(i, j, dup + 1)
                            + b.t(i, j, dup)
                            - ll)
                            .exp();
                        counts.n_sub[f.dup_base(i, dup + 1) as usize][f.out_base(j) as usize] += p;
                    }
                }
                // S -> D, D -> D, D -> S
                if i > 0 {
                    let p = (f.s(i - 1, j) + f.scores.del_open + b.d(i, j) - ll).exp();
                    counts.n_del_open += p;
                    let p = (f.d(i - 1, j) + f.scores.del_extend + b.d(i, j) - ll).exp();
                    counts.n_del_extend += p;
                }
                {
                    let p = (f.d(i, j) + f.scores.del_end + b.s(i, j) - ll).exp();
                    counts.n_del_end += p;
                }
                // S -> T (ouverture de duplication)
                for dup in 0..mdl {
                    let p = (f.s(i, j) + f.scores.tan_dup + f.scores.len[dup] + b.t(i, j, dup)
                        - ll)
                        .exp();
                    counts.n_tan_dup += p;
                    counts.n_len[dup] += p;
                }
            }
        }
        counts
    }
}

/// Comptes espérés et log-vraisemblance cumulés sur une base
/// d'alignements d'entraînement.
pub fn expected_counts(
    params: &MutatorParams,
    db: &[Stockholm],
    max_distance: Option<usize>,
) -> Result<(MutatorCounts, LogProb)> {
    let mut counts = MutatorCounts::new(params);
    let mut ll = 0.0;
    for stock in db {
        let pair = AlignedPair::from_stockholm(stock, max_distance)?;
        let fb = FwdBackMatrix::new(params, &pair);
        ll += fb.loglike();
        let c = fb.counts(params);
        counts += &c;
    }
    Ok((counts, ll))
}

#[cfg(test)]
mod tests {
    use super::*;
    use brin_align::FastSeq;

    fn params() -> MutatorParams {
        MutatorParams::with_defaults(0.05, 2.0, 0.02, 0.02, 0.4, 3, false).unwrap()
    }

    fn stock_of(a: &str, b: &str) -> Stockholm {
        Stockholm::new(vec![FastSeq::new("in", a), FastSeq::new("out", b)])
    }

    fn pair_of(a: &str, b: &str) -> AlignedPair {
        AlignedPair::from_stockholm(&stock_of(a, b), None).unwrap()
    }

    #[test]
    fn test_forward_backward_agree() {
        let p = params();
        for (a, b) in [
            ("ACGT", "ACGT"),
            ("ACGT", "ACCT"),
            ("ACGTACG", "ACGACG"),
            ("ACGA", "ACGGA"),
            ("TACGTACG", "TACG"),
        ] {
            let pair = pair_of(a, b);
            let fwd = ForwardMatrix::new(&p, &pair);
            let back = BackwardMatrix::new(&p, &pair);
            let (fl, bl) = (fwd.loglike(), back.loglike());
            assert!(fl.is_finite(), "{} / {}", a, b);
            assert!(
                ((fl - bl) / fl).abs() < 1e-5,
                "{} / {}: {} vs {}",
                a,
                b,
                fl,
                bl
            );
        }
    }

    #[test]
    fn test_posteriors_transition_identity() {
        // vérifie fwd(src) + score + back(dst) = ll le long du chemin sûr
        let p = params();
        let pair = pair_of("ACGT", "ACGT");
        let fb = FwdBackMatrix::new(&p, &pair);
        let counts = fb.counts(&p);
        // quatre émissions, réparties entre les routes en phase et les
        // routes de duplication: le total des substitutions émises vaut
        // exactement la longueur observée
        let total_sub: f64 = counts.n_sub.iter().flatten().sum();
        assert!((total_sub - 4.0).abs() < 1e-6, "{}", total_sub);
    }

    #[test]
    fn test_one_column_posterior_marginals() {
        let p = params();
        let pair = pair_of("A", "A");
        let fb = FwdBackMatrix::new(&p, &pair);
        let counts = fb.counts(&p);

        // routes possibles: correspondance en phase, ou délétion de
        // l'entrée rejouée par duplication de longueur 1
        let match_route = p.p_no_gap() * p.p_match();
        let dup_route =
            p.p_del_open * p.p_del_end() * p.p_tan_dup * p.p_len[0] * p.p_match();
        let total = match_route + dup_route;
        assert!((fb.loglike() - total.ln()).abs() < 1e-6);

        let sub_total: f64 = counts.n_sub.iter().flatten().sum();
        assert!((sub_total - 1.0).abs() < 1e-6);
        assert!((counts.n_no_gap - match_route / total).abs() < 1e-6);
        assert!((counts.n_tan_dup - dup_route / total).abs() < 1e-6);
        assert!((counts.n_del_open - dup_route / total).abs() < 1e-6);
    }

    #[test]
    fn test_banded_envelope_matches_full_on_diagonal() {
        let p = params();
        let stock = stock_of("ACGTACGT", "ACGTACGT");
        let full = AlignedPair::from_stockholm(&stock, None).unwrap();
        let banded = AlignedPair::from_stockholm(&stock, Some(2)).unwrap();
        let lf = ForwardMatrix::new(&p, &full).loglike();
        let lb = ForwardMatrix::new(&p, &banded).loglike();
        // la bande couvre le chemin dominant: les vraisemblances restent
        // proches (la bande tronque seulement des routes négligeables)
        assert!(lb <= lf + 1e-9);
        assert!((lf - lb).abs() < 0.1, "{} vs {}", lf, lb);
    }

    #[test]
    fn test_mismatch_lowers_likelihood() {
        let p = params();
        let clean = ForwardMatrix::new(&p, &pair_of("ACGTAC", "ACGTAC")).loglike();
        let dirty = ForwardMatrix::new(&p, &pair_of("ACGTAC", "ACTTAC")).loglike();
        assert!(dirty < clean);
    }
}
