//! Paramètres, scores et comptes du modèle de mutation
//!
//! Le modèle couvre les substitutions (transition/transversion), les
//! duplications en tandem de longueur bornée et les délétions affines.
//! Contraintes: `pDelOpen + pTanDup + pNoGap = 1`,
//! `pTransition + pTransversion + pMatch = 1`, `pLen` somme à 1.

use std::io::{Read, Write};
use std::ops::AddAssign;
use std::path::Path;

use serde::{Deserialize, Serialize};

use brin_core::kmer::{is_transition, Base};

use crate::error::{MutationError, Result};
use crate::logsumexp::{log_beta_pdf_counts, log_dirichlet_pdf_counts, LogProb};

/// Paramètres du modèle, persistés en JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutatorParams {
    #[serde(rename = "pDelOpen")]
    pub p_del_open: f64,
    #[serde(rename = "pDelExtend")]
    pub p_del_extend: f64,
    #[serde(rename = "pTanDup")]
    pub p_tan_dup: f64,
    #[serde(rename = "pTransition")]
    pub p_transition: f64,
    #[serde(rename = "pTransversion")]
    pub p_transversion: f64,
    /// Distribution de longueur des duplications en tandem.
    #[serde(rename = "pLen")]
    pub p_len: Vec<f64>,
    /// Extrémités libres dans la séquence observée.
    pub local: bool,

    // champs hérités du format: acceptés à zéro, rejetés sinon
    #[serde(rename = "pFwdDup", default, skip_serializing)]
    fwd_dup: Option<f64>,
    #[serde(rename = "pRevDup", default, skip_serializing)]
    rev_dup: Option<f64>,
}

impl MutatorParams {
    /// Modèle par défaut: `sub_prob` répartie selon le rapport
    /// transition/transversion `iv_ratio`, duplication `dup_prob`,
    /// délétions affines (`del_open`, `del_extend`), longueurs uniformes.
    pub fn with_defaults(
        sub_prob: f64,
        iv_ratio: f64,
        dup_prob: f64,
        del_open: f64,
        del_extend: f64,
        max_dup_len: usize,
        local: bool,
    ) -> Result<Self> {
        let params = Self {
            p_del_open: del_open,
            p_del_extend: del_extend,
            p_tan_dup: dup_prob,
            p_transition: sub_prob * iv_ratio / (1.0 + iv_ratio),
            p_transversion: sub_prob / (1.0 + iv_ratio),
            p_len: vec![1.0 / max_dup_len as f64; max_dup_len],
            local,
            fwd_dup: None,
            rev_dup: None,
        };
        params.validate()?;
        Ok(params)
    }

    /// Redimensionne la distribution de longueur (uniforme).
    pub fn init_max_dup_len(mut self, max_dup_len: usize) -> Self {
        self.p_len = vec![1.0 / max_dup_len as f64; max_dup_len];
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.fwd_dup.unwrap_or(0.0) != 0.0 || self.rev_dup.unwrap_or(0.0) != 0.0 {
            return Err(MutationError::UnsupportedDup);
        }
        for (name, p) in [
            ("pDelOpen", self.p_del_open),
            ("pDelExtend", self.p_del_extend),
            ("pTanDup", self.p_tan_dup),
            ("pTransition", self.p_transition),
            ("pTransversion", self.p_transversion),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(MutationError::BadParams(format!(
                    "{} = {} hors de [0, 1)",
                    name, p
                )));
            }
        }
        if self.p_del_open + self.p_tan_dup >= 1.0 {
            return Err(MutationError::BadParams(
                "pDelOpen + pTanDup >= 1".into(),
            ));
        }
        if self.p_transition + self.p_transversion >= 1.0 {
            return Err(MutationError::BadParams(
                "pTransition + pTransversion >= 1".into(),
            ));
        }
        if self.p_len.is_empty() {
            return Err(MutationError::BadParams("pLen vide".into()));
        }
        let total: f64 = self.p_len.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(MutationError::BadParams(format!(
                "pLen somme à {} au lieu de 1",
                total
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn p_match(&self) -> f64 {
        1.0 - self.p_transition - self.p_transversion
    }

    #[inline]
    pub fn p_sub(&self, x: Base, y: Base) -> f64 {
        if x == y {
            self.p_match()
        } else if is_transition(x, y) {
            self.p_transition
        } else {
            self.p_transversion / 2.0
        }
    }

    #[inline]
    pub fn p_no_gap(&self) -> f64 {
        1.0 - self.p_del_open - self.p_tan_dup
    }

    #[inline]
    pub fn p_del_end(&self) -> f64 {
        1.0 - self.p_del_extend
    }

    #[inline]
    pub fn max_dup_len(&self) -> usize {
        self.p_len.len()
    }

    pub fn write_json(&self, out: &mut dyn Write) -> Result<()> {
        serde_json::to_writer_pretty(&mut *out, self)?;
        writeln!(out)?;
        Ok(())
    }

    pub fn read_json(input: &mut dyn Read) -> Result<Self> {
        let params: MutatorParams = serde_json::from_reader(input)?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        Self::read_json(&mut file)
    }
}

/// Transformée log des paramètres, précalculée pour les boucles de
/// programmation dynamique.
#[derive(Debug, Clone)]
pub struct MutatorScores {
    pub del_open: LogProb,
    pub tan_dup: LogProb,
    pub no_gap: LogProb,
    pub del_extend: LogProb,
    pub del_end: LogProb,
    /// sub[base][observée]
    pub sub: [[LogProb; 4]; 4],
    pub len: Vec<LogProb>,
}

impl MutatorScores {
    pub fn new(params: &MutatorParams) -> Self {
        let mut sub = [[0.0; 4]; 4];
        for x in 0..4u8 {
            for y in 0..4u8 {
                sub[x as usize][y as usize] = params.p_sub(x, y).ln();
            }
        }
        Self {
            del_open: params.p_del_open.ln(),
            tan_dup: params.p_tan_dup.ln(),
            no_gap: params.p_no_gap().ln(),
            del_extend: params.p_del_extend.ln(),
            del_end: params.p_del_end().ln(),
            sub,
            len: params.p_len.iter().map(|p| p.ln()).collect(),
        }
    }
}

/// Sac de comptes espérés, accumulé par avant-arrière et consommé par
/// l'estimation au maximum de vraisemblance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutatorCounts {
    #[serde(rename = "nDelOpen")]
    pub n_del_open: f64,
    #[serde(rename = "nTanDup")]
    pub n_tan_dup: f64,
    #[serde(rename = "nNoGap")]
    pub n_no_gap: f64,
    #[serde(rename = "nDelExtend")]
    pub n_del_extend: f64,
    #[serde(rename = "nDelEnd")]
    pub n_del_end: f64,
    #[serde(rename = "nSub")]
    pub n_sub: Vec<Vec<f64>>,
    #[serde(rename = "nLen")]
    pub n_len: Vec<f64>,
}

impl MutatorCounts {
    pub fn new(params: &MutatorParams) -> Self {
        Self {
            n_del_open: 0.0,
            n_tan_dup: 0.0,
            n_no_gap: 0.0,
            n_del_extend: 0.0,
            n_del_end: 0.0,
            n_sub: vec![vec![0.0; 4]; 4],
            n_len: vec![0.0; params.max_dup_len()],
        }
    }

    /// Pseudo-comptes de Laplace uniformes.
    pub fn init_laplace(mut self, n: f64) -> Self {
        self.n_del_open = n;
        self.n_tan_dup = n;
        self.n_no_gap = n;
        self.n_del_extend = n;
        self.n_del_end = n;
        for row in &mut self.n_sub {
            for v in row {
                *v = n;
            }
        }
        for v in &mut self.n_len {
            *v = n;
        }
        self
    }

    pub fn n_match(&self) -> f64 {
        (0..4).map(|i| self.n_sub[i][i]).sum()
    }

    pub fn n_transition(&self) -> f64 {
        let mut total = 0.0;
        for x in 0..4u8 {
            for y in 0..4u8 {
                if is_transition(x, y) {
                    total += self.n_sub[x as usize][y as usize];
                }
            }
        }
        total
    }

    pub fn n_transversion(&self) -> f64 {
        let mut total = 0.0;
        for x in 0..4u8 {
            for y in 0..4u8 {
                if x != y && !is_transition(x, y) {
                    total += self.n_sub[x as usize][y as usize];
                }
            }
        }
        total
    }

    /// Estimation au maximum de vraisemblance avec pseudo-comptes,
    /// normalisation rapport-des-sommes par catégorielle.
    pub fn ml_params(&self, prior: &MutatorCounts, local: bool) -> MutatorParams {
        let c = self.clone() + prior.clone();
        let gap_total = c.n_del_open + c.n_tan_dup + c.n_no_gap;
        let sub_total = c.n_match() + c.n_transition() + c.n_transversion();
        let ext_total = c.n_del_extend + c.n_del_end;
        let len_total: f64 = c.n_len.iter().sum();
        MutatorParams {
            p_del_open: c.n_del_open / gap_total,
            p_del_extend: c.n_del_extend / ext_total,
            p_tan_dup: c.n_tan_dup / gap_total,
            p_transition: c.n_transition() / sub_total,
            p_transversion: c.n_transversion() / sub_total,
            p_len: c.n_len.iter().map(|n| n / len_total).collect(),
            local,
            fwd_dup: None,
            rev_dup: None,
        }
    }

    /// Log-prior des paramètres sous ces pseudo-comptes.
    pub fn log_prior(&self, params: &MutatorParams) -> LogProb {
        let mut lp = 0.0;
        lp += log_dirichlet_pdf_counts(
            &[params.p_del_open, params.p_tan_dup, params.p_no_gap()],
            &[self.n_del_open, self.n_tan_dup, self.n_no_gap],
        );
        lp += log_beta_pdf_counts(params.p_del_extend, self.n_del_extend, self.n_del_end);
        lp += log_dirichlet_pdf_counts(
            &[
                params.p_transition,
                params.p_transversion,
                params.p_match(),
            ],
            &[self.n_transition(), self.n_transversion(), self.n_match()],
        );
        lp += log_dirichlet_pdf_counts(&params.p_len, &self.n_len);
        lp
    }

    /// Log-vraisemblance espérée des paramètres sous ces comptes.
    pub fn log_likelihood(&self, params: &MutatorParams) -> LogProb {
        let mut ll = 0.0;
        let terms = [
            (self.n_no_gap, params.p_no_gap()),
            (self.n_del_open, params.p_del_open),
            (self.n_tan_dup, params.p_tan_dup),
            (self.n_del_extend, params.p_del_extend),
            (self.n_del_end, params.p_del_end()),
        ];
        for (n, p) in terms {
            if n > 0.0 {
                ll += n * p.ln();
            }
        }
        for x in 0..4u8 {
            for y in 0..4u8 {
                let n = self.n_sub[x as usize][y as usize];
                if n > 0.0 {
                    ll += n * params.p_sub(x, y).ln();
                }
            }
        }
        for (n, p) in self.n_len.iter().zip(&params.p_len) {
            if *n > 0.0 {
                ll += n * p.ln();
            }
        }
        ll
    }

    pub fn write_json(&self, out: &mut dyn Write) -> Result<()> {
        serde_json::to_writer_pretty(&mut *out, self)?;
        writeln!(out)?;
        Ok(())
    }

    pub fn read_json(input: &mut dyn Read) -> Result<Self> {
        Ok(serde_json::from_reader(input)?)
    }
}

impl AddAssign<&MutatorCounts> for MutatorCounts {
    fn add_assign(&mut self, c: &MutatorCounts) {
        self.n_del_open += c.n_del_open;
        self.n_tan_dup += c.n_tan_dup;
        self.n_no_gap += c.n_no_gap;
        self.n_del_extend += c.n_del_extend;
        self.n_del_end += c.n_del_end;
        for (a, b) in self.n_sub.iter_mut().zip(&c.n_sub) {
            for (x, y) in a.iter_mut().zip(b) {
                *x += y;
            }
        }
        for (a, b) in self.n_len.iter_mut().zip(&c.n_len) {
            *a += b;
        }
    }
}

impl std::ops::Add for MutatorCounts {
    type Output = MutatorCounts;
    fn add(mut self, rhs: MutatorCounts) -> MutatorCounts {
        self += &rhs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MutatorParams {
        MutatorParams::with_defaults(0.03, 2.0, 0.01, 0.01, 0.5, 4, false).unwrap()
    }

    #[test]
    fn test_defaults_are_consistent() {
        let p = sample();
        assert!((p.p_transition + p.p_transversion - 0.03).abs() < 1e-12);
        assert!((p.p_transition / p.p_transversion - 2.0).abs() < 1e-9);
        assert!((p.p_no_gap() + p.p_del_open + p.p_tan_dup - 1.0).abs() < 1e-12);
        assert!((p.p_len.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(p.max_dup_len(), 4);
    }

    #[test]
    fn test_sub_rows_sum_to_one() {
        let p = sample();
        for x in 0..4u8 {
            let total: f64 = (0..4u8).map(|y| p.p_sub(x, y)).sum();
            assert!((total - 1.0).abs() < 1e-12, "base {}", x);
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let p = sample();
        let mut buf = Vec::new();
        p.write_json(&mut buf).unwrap();
        let back = MutatorParams::read_json(&mut buf.as_slice()).unwrap();
        assert!((back.p_del_open - p.p_del_open).abs() < 1e-15);
        assert_eq!(back.p_len.len(), 4);
        assert_eq!(back.local, p.local);
    }

    #[test]
    fn test_nonzero_fwd_dup_rejected() {
        let text = r#"{
            "pDelOpen": 0.01, "pDelExtend": 0.5, "pTanDup": 0.01,
            "pTransition": 0.02, "pTransversion": 0.01,
            "pLen": [1.0], "local": false, "pFwdDup": 0.1
        }"#;
        let err = MutatorParams::read_json(&mut text.as_bytes()).unwrap_err();
        assert!(matches!(err, MutationError::UnsupportedDup));
    }

    #[test]
    fn test_zero_fwd_dup_accepted() {
        let text = r#"{
            "pDelOpen": 0.01, "pDelExtend": 0.5, "pTanDup": 0.01,
            "pTransition": 0.02, "pTransversion": 0.01,
            "pLen": [1.0], "local": false, "pFwdDup": 0.0, "pRevDup": 0.0
        }"#;
        assert!(MutatorParams::read_json(&mut text.as_bytes()).is_ok());
    }

    #[test]
    fn test_ml_params_ratio_of_sums() {
        let p = sample();
        let mut counts = MutatorCounts::new(&p);
        counts.n_no_gap = 100.0;
        counts.n_del_open = 0.0;
        counts.n_tan_dup = 0.0;
        for i in 0..4 {
            counts.n_sub[i][i] = 25.0;
        }
        let prior = MutatorCounts::new(&p).init_laplace(1.0);
        let ml = counts.ml_params(&prior, false);
        // 1 / (100 + 3) avec les pseudo-comptes de Laplace
        assert!((ml.p_del_open - 1.0 / 103.0).abs() < 1e-12);
        assert!(ml.p_match() > 0.8);
        assert!((ml.p_len.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_counts_add() {
        let p = sample();
        let mut a = MutatorCounts::new(&p).init_laplace(1.0);
        let b = MutatorCounts::new(&p).init_laplace(2.0);
        a += &b;
        assert_eq!(a.n_del_open, 3.0);
        assert_eq!(a.n_sub[2][3], 3.0);
    }

    #[test]
    fn test_scores_match_params() {
        let p = sample();
        let s = MutatorScores::new(&p);
        assert!((s.no_gap.exp() - p.p_no_gap()).abs() < 1e-12);
        assert!((s.sub[0][0].exp() - p.p_match()).abs() < 1e-12);
        assert!((s.sub[0][3].exp() - p.p_transversion / 2.0).abs() < 1e-12);
        // A (0) et G (1) sont partenaires de transition
        assert!((s.sub[0][1].exp() - p.p_transition).abs() < 1e-12);
    }
}
