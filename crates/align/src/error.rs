//! Types d'erreurs pour les entrées/sorties d'alignements

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlignError {
    #[error("Alignement non affleurant: la rangée {row} a {got} colonnes, la première en a {expected}")]
    NotFlush {
        row: String,
        expected: usize,
        got: usize,
    },

    #[error("Nombre de résidus incompatible pour la rangée #{row} ({a} != {b})")]
    IncompatibleResidues { row: usize, a: usize, b: usize },

    #[error("Alignements incohérents: la colonne {col} de l'alignement {align} boucle ailleurs")]
    InconsistentAlignments { align: usize, col: usize },

    #[error("Fusion bloquée: aucun alignement prêt")]
    MergeDeadlock,

    #[error("L'enveloppe guide requiert la rangée #{0}")]
    MissingGuideRow(usize),

    #[error("Format FASTA invalide: {0}")]
    BadFasta(String),

    #[error("Position {pos} hors de la séquence {name}")]
    OutOfBounds { name: String, pos: usize },

    #[error(transparent)]
    Core(#[from] brin_core::BrinError),

    #[error("Erreur IO: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AlignError>;
