//! Modèle de mutation et décodage probabiliste pour Brin
//!
//! Le modèle couvre substitutions, duplications en tandem bornées et
//! délétions affines. Le décodeur de Viterbi aligne une lecture bruitée
//! contre le transducteur; l'estimateur de Baum-Welch réajuste le modèle
//! sur une base d'alignements guides.

pub mod baumwelch;
pub mod error;
pub mod fwdback;
pub mod logsumexp;
pub mod params;
pub mod viterbi;

pub use baumwelch::{baum_welch, EmIteration, BAUM_WELCH_MAX_ITER};
pub use error::{MutationError, Result};
pub use fwdback::{expected_counts, AlignedPair, BackwardMatrix, ForwardMatrix, FwdBackMatrix};
pub use logsumexp::{log_accum_exp, log_sum_exp, LogProb, LOG_ZERO};
pub use params::{MutatorCounts, MutatorParams, MutatorScores};
pub use viterbi::{decode_sequence, InputModel, ViterbiMatrix};
