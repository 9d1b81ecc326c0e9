//! Types d'erreurs pour la bibliothèque Brin

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrinError {
    #[error("'{0}' n'est pas un nucléotide")]
    InvalidBase(char),

    #[error("Longueur de k-mer invalide: {len} (attendu 1..=31)")]
    KmerLenOutOfRange { len: u32 },

    #[error("Plus de mots de contrôle disponibles: {placed} placés sur {requested} demandés")]
    ControlWordsExhausted { requested: usize, placed: usize },

    #[error("Mot de contrôle #{index} ({word}) inatteignable")]
    ControlWordUnreachable { index: usize, word: String },

    #[error("Pas de k-mer intermédiaire après {from} à l'étape {step} vers le mot de contrôle #{index}")]
    BridgeBroken { from: String, step: usize, index: usize },

    #[error("Le graphe est vide après filtrage: aucun {len}-mer valide")]
    EmptyGraph { len: u32 },

    #[error("Machine non alternante: l'état {state} mélange transitions avec et sans entrée")]
    NotWaiting { state: String },

    #[error("Cycle silencieux détecté à l'état {state}: aucune transition ne produit de symbole")]
    SilentCycle { state: String },

    #[error("Contexte incohérent à l'état {state}: la transition émet '{emitted}' mais le contexte attend '{expected}'")]
    ContextMismatch { state: String, emitted: char, expected: char },

    #[error("Machine invalide: {0}")]
    BadMachine(String),

    #[error("Le mode retardé requiert une longueur paire et les deux cadrages (longueur {len})")]
    DelayUnsupported { len: u32 },

    #[error("Composition impossible: {0}")]
    Compose(String),

    #[error("Erreur d'encodage: {0}")]
    Encoding(String),

    #[error("Erreur de décodage: {0}")]
    Decoding(String),

    #[error("Erreur de sérialisation: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Erreur IO: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BrinError>;
