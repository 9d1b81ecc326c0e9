//! Boucle externe de Baum-Welch
//!
//! À chaque itération: comptes espérés par avant-arrière sur toute la
//! base d'alignements, puis ré-estimation au maximum de vraisemblance
//! avec les pseudo-comptes du prior. Arrêt quand l'amélioration
//! fractionnaire de l'objectif (log-vraisemblance + log-prior) passe sous
//! 1e-3, quand l'objectif cesse de croître, ou après 100 itérations.

use tracing::info;

use brin_align::Stockholm;

use crate::error::Result;
use crate::fwdback::expected_counts;
use crate::params::{MutatorCounts, MutatorParams};

pub const BAUM_WELCH_MAX_ITER: usize = 100;
pub const BAUM_WELCH_MIN_FRAC_INC: f64 = 1e-3;

/// Trace d'une itération, pour les journaux et les tests.
#[derive(Debug, Clone, Copy)]
pub struct EmIteration {
    pub iter: usize,
    pub loglike: f64,
    pub objective: f64,
}

/// Ré-estime les paramètres sur la base d'alignements. Rend les
/// paramètres finaux et la trace des itérations.
pub fn baum_welch(
    init: &MutatorParams,
    prior: &MutatorCounts,
    db: &[Stockholm],
    max_distance: Option<usize>,
) -> Result<(MutatorParams, Vec<EmIteration>)> {
    let mut params = init.clone();
    let mut best_params = params.clone();
    let mut prev_objective: Option<f64> = None;
    let mut history = Vec::new();

    for iter in 1..=BAUM_WELCH_MAX_ITER {
        let (counts, ll) = expected_counts(&params, db, max_distance)?;
        let objective = ll + prior.log_prior(&params);
        history.push(EmIteration {
            iter,
            loglike: ll,
            objective,
        });
        info!(
            "Baum-Welch itération {}: log-vraisemblance {:.6}, objectif {:.6}",
            iter, ll, objective
        );
        if let Some(prev) = prev_objective {
            if objective <= prev {
                info!("Objectif stationnaire, arrêt");
                break;
            }
            best_params = params.clone();
            if (objective - prev).abs() / prev.abs().max(f64::MIN_POSITIVE) < BAUM_WELCH_MIN_FRAC_INC
            {
                info!("Amélioration fractionnaire sous le seuil, arrêt");
                break;
            }
        } else {
            best_params = params.clone();
        }
        prev_objective = Some(objective);
        params = counts.ml_params(prior, init.local);
    }
    Ok((best_params, history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use brin_align::FastSeq;

    fn stock_of(a: &str, b: &str) -> Stockholm {
        Stockholm::new(vec![FastSeq::new("in", a), FastSeq::new("out", b)])
    }

    fn init_params() -> MutatorParams {
        MutatorParams::with_defaults(0.1, 2.0, 0.05, 0.05, 0.4, 3, false).unwrap()
    }

    #[test]
    fn test_em_objective_monotonic() {
        let init = init_params();
        let prior = MutatorCounts::new(&init).init_laplace(1.0);
        let db = vec![
            stock_of("ACGTACGTAC", "ACGTACGTAC"),
            stock_of("ACGTACGTAC", "ACGTACCTAC"),
            stock_of("TACGATCGA-", "TACGATCGAT"),
        ];
        let (_, history) = baum_welch(&init, &prior, &db, None).unwrap();
        assert!(!history.is_empty());
        for pair in history.windows(2) {
            assert!(
                pair[1].objective >= pair[0].objective - 1e-6,
                "itération {}: {} < {}",
                pair[1].iter,
                pair[1].objective,
                pair[0].objective
            );
        }
    }

    #[test]
    fn test_em_on_identical_pair() {
        // deux séquences identiques de longueur 100: après une itération,
        // pDelOpen retombe sur le pseudo-compte de Laplace 1/(100+3) et
        // les correspondances dominent les substitutions
        let seq: String = "ACGT".repeat(25);
        let init = init_params();
        let prior = MutatorCounts::new(&init).init_laplace(1.0);
        let (counts, _) =
            expected_counts(&init, &[stock_of(&seq, &seq)], None).unwrap();
        let ml = counts.ml_params(&prior, false);
        // les routes par duplication portent une masse négligeable: le
        // compte de nNoGap approche 100
        assert!((counts.n_no_gap - 100.0).abs() < 1.0, "{}", counts.n_no_gap);
        assert!(ml.p_del_open < 1.5 / 103.0);
        assert!(ml.p_del_open > 0.5 / 103.0);
        assert!(ml.p_match() > 0.85);
    }

    #[test]
    fn test_em_learns_substitution_rate() {
        // un alignement à une substitution sur dix: le taux appris domine
        // le prior et dépasse nettement zéro
        let a = "ACGTACGTAC".repeat(4);
        let mut b = a.clone();
        // remplace chaque dixième base par son partenaire de transition
        let chars: Vec<char> = b.chars().collect();
        let mut mutated = chars.clone();
        for i in (4..chars.len()).step_by(10) {
            mutated[i] = match chars[i] {
                'A' => 'G',
                'G' => 'A',
                'C' => 'T',
                'T' => 'C',
                other => other,
            };
        }
        b = mutated.into_iter().collect();
        let init = init_params();
        let prior = MutatorCounts::new(&init).init_laplace(0.1);
        let (fit, history) = baum_welch(&init, &prior, &[stock_of(&a, &b)], None).unwrap();
        assert!(!history.is_empty());
        assert!(fit.p_transition > 0.01);
        assert!(fit.p_match() > 0.5);
    }
}
