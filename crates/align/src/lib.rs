//! Entrées/sorties de séquences et d'alignements pour Brin
//!
//! FASTA, Stockholm, chemins d'alignement et enveloppe guide utilisée par
//! le décodeur probabiliste.

pub mod alignpath;
pub mod envelope;
pub mod error;
pub mod fastseq;
pub mod stockholm;

pub use alignpath::{
    align_path_columns, align_path_concat, align_path_concat3, align_path_merge,
    align_path_residues_in_row, align_path_union, AlignColIndex, AlignPath, AlignRowIndex,
    AlignRowPath, Alignment,
};
pub use envelope::GuideAlignmentEnvelope;
pub use error::{AlignError, Result};
pub use fastseq::{read_fasta, write_fasta, FastSeq, FastaWriter, DEFAULT_FASTA_COLS};
pub use stockholm::{
    read_stockholm_database, Stockholm, DEFAULT_STOCKHOLM_ROW_LENGTH, MIN_STOCKHOLM_CHARS_PER_ROW,
};
