//! Types d'erreurs du modèle de mutation

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MutationError {
    #[error("L'entraînement requiert un alignement à 2 rangées; celui-ci en a {0}")]
    NotPairwise(usize),

    #[error("Paramètres de mutation invalides: {0}")]
    BadParams(String),

    #[error("Les champs pFwdDup/pRevDup non nuls ne sont pas pris en charge")]
    UnsupportedDup,

    #[error("La machine n'émet pas de l'ADN")]
    NotDnaMachine,

    #[error("Transition silencieuse descendante à l'état {0}: le remplissage de Viterbi requiert un ordre topologique")]
    UnorderedSilent(String),

    #[error("Échec du retour sur trace à la position {pos}")]
    TracebackFailure { pos: usize },

    #[error(transparent)]
    Core(#[from] brin_core::BrinError),

    #[error(transparent)]
    Align(#[from] brin_align::AlignError),

    #[error("Erreur de sérialisation: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Erreur IO: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MutationError>;
