//! Sommes en espace logarithmique, numériquement stables
//!
//! `log(e^a + e^b) = max(a, b) + log(1 + e^-|a - b|)`. Le terme unaire est
//! servi par une table précalculée sur [0, 10] au pas de 1e-4 avec
//! interpolation linéaire; la fonctionnalité `exact-logsumexp` bascule
//! sur le chemin exact `ln_1p`. Le garde `a == b` évite le NaN de
//! `∞ - ∞` quand on additionne deux zéros en espace log.

use std::sync::OnceLock;

use tracing::warn;

pub type LogProb = f64;

/// Zéro de probabilité en espace log.
pub const LOG_ZERO: LogProb = f64::NEG_INFINITY;

const LOOKUP_MAX: f64 = 10.0;
const LOOKUP_PRECISION: f64 = 1e-4;
const LOOKUP_ENTRIES: usize = (LOOKUP_MAX / LOOKUP_PRECISION) as usize + 2;

static LOOKUP: OnceLock<Vec<f64>> = OnceLock::new();

fn lookup_table() -> &'static [f64] {
    LOOKUP.get_or_init(|| {
        (0..LOOKUP_ENTRIES)
            .map(|n| log_sum_exp_unary_slow(n as f64 * LOOKUP_PRECISION))
            .collect()
    })
}

/// `log(1 + e^-x)` exact, pour x >= 0.
#[inline]
pub fn log_sum_exp_unary_slow(x: f64) -> f64 {
    (-x).exp().ln_1p()
}

/// `log(1 + e^-x)` par table interpolée, pour x >= 0.
pub fn log_sum_exp_unary_table(x: f64) -> f64 {
    if x >= LOOKUP_MAX || x.is_nan() || x.is_infinite() {
        return 0.0;
    }
    if x < 0.0 {
        // ne devrait jamais arriver: l'appelant passe |a - b|
        warn!("log_sum_exp_unary appelé avec x négatif = {}", x);
        return -x;
    }
    let table = lookup_table();
    let n = (x / LOOKUP_PRECISION) as usize;
    let dx = x - n as f64 * LOOKUP_PRECISION;
    let f0 = table[n];
    let f1 = table[n + 1];
    f0 + (f1 - f0) * (dx / LOOKUP_PRECISION)
}

/// `log(1 + e^-x)`, chemin choisi à la compilation.
#[inline]
pub fn log_sum_exp_unary(x: f64) -> f64 {
    #[cfg(feature = "exact-logsumexp")]
    {
        log_sum_exp_unary_slow(x)
    }
    #[cfg(not(feature = "exact-logsumexp"))]
    {
        log_sum_exp_unary_table(x)
    }
}

/// `log(e^a + e^b)`.
#[inline]
pub fn log_sum_exp(a: LogProb, b: LogProb) -> LogProb {
    let (max, diff) = if a == b {
        (a, 0.0)
    } else if a < b {
        (b, b - a)
    } else {
        (a, a - b)
    };
    max + log_sum_exp_unary(diff)
}

pub fn log_sum_exp3(a: LogProb, b: LogProb, c: LogProb) -> LogProb {
    log_sum_exp(log_sum_exp(a, b), c)
}

pub fn log_sum_exp4(a: LogProb, b: LogProb, c: LogProb, d: LogProb) -> LogProb {
    log_sum_exp(log_sum_exp3(a, b, c), d)
}

/// `a <- log(e^a + e^b)`.
#[inline]
pub fn log_accum_exp(a: &mut LogProb, b: LogProb) {
    *a = log_sum_exp(*a, b);
}

/// Log-densité Beta non normalisée, en pseudo-comptes.
pub fn log_beta_pdf_counts(prob: f64, yes: f64, no: f64) -> f64 {
    if prob <= 0.0 || prob >= 1.0 {
        return LOG_ZERO;
    }
    yes * prob.ln() + no * (1.0 - prob).ln()
}

/// Log-densité Dirichlet non normalisée, en pseudo-comptes.
pub fn log_dirichlet_pdf_counts(probs: &[f64], counts: &[f64]) -> f64 {
    debug_assert_eq!(probs.len(), counts.len());
    let mut sum = 0.0;
    for (&p, &c) in probs.iter().zip(counts) {
        if c == 0.0 {
            continue;
        }
        if p <= 0.0 {
            return LOG_ZERO;
        }
        sum += c * p.ln();
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unary_table_matches_exact() {
        // les deux chemins doivent coïncider sur toute la plage utile
        let mut x = 0.0;
        while x < 12.0 {
            let fast = log_sum_exp_unary_table(x);
            let slow = if x >= LOOKUP_MAX { 0.0 } else { log_sum_exp_unary_slow(x) };
            assert!((fast - slow).abs() < 1e-7, "x = {}: {} vs {}", x, fast, slow);
            x += 0.000137;
        }
    }

    #[test]
    fn test_log_sum_exp_basic() {
        let v = log_sum_exp(0.0_f64.ln(), 0.0_f64.ln());
        assert_eq!(v, LOG_ZERO);
        let v = log_sum_exp(0.5_f64.ln(), 0.5_f64.ln());
        assert!((v - 1.0_f64.ln()).abs() < 1e-9);
        let v = log_sum_exp(0.25_f64.ln(), 0.75_f64.ln());
        assert!((v - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_equal_infinities_no_nan() {
        // le garde a == b doit empêcher ∞ - ∞
        let v = log_sum_exp(LOG_ZERO, LOG_ZERO);
        assert!(!v.is_nan());
        assert_eq!(v, LOG_ZERO);
    }

    #[test]
    fn test_asymmetric_infinity() {
        let v = log_sum_exp(LOG_ZERO, -1.5);
        assert!((v + 1.5).abs() < 1e-9);
        let v = log_sum_exp(-1.5, LOG_ZERO);
        assert!((v + 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_accumulate() {
        let mut acc = LOG_ZERO;
        for _ in 0..4 {
            log_accum_exp(&mut acc, 0.25_f64.ln());
        }
        assert!((acc - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_dirichlet_counts() {
        let lp = log_dirichlet_pdf_counts(&[0.5, 0.5], &[2.0, 2.0]);
        assert!((lp - 4.0 * 0.5_f64.ln()).abs() < 1e-12);
        assert_eq!(log_dirichlet_pdf_counts(&[0.0, 1.0], &[1.0, 0.0]), LOG_ZERO);
    }
}
