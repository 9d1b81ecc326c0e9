//! Bibliothèque cœur de Brin
//!
//! Codec entre données binaires arbitraires et séquences de nucléotides,
//! par transducteur d'état fini construit sur un sous-graphe de de Bruijn
//! contraint: les k-mers porteurs de répétitions en tandem, de répétitions
//! inversées, de motifs exclus ou d'un GC déséquilibré sont écartés avant
//! la synthèse de la machine.

pub mod assemble;
pub mod codec;
pub mod controls;
pub mod error;
pub mod graph;
pub mod kmer;
pub mod machine;
pub mod pattern;
pub mod progress;

pub use assemble::{build_machine, BuildConfig};
pub use codec::{BinaryWriter, Decoder, Encoder, InputSink, SymbolCollector};
pub use controls::{ControlPlan, DEFAULT_MAX_STEPS};
pub use error::{BrinError, Result};
pub use graph::KmerGraph;
pub use machine::{Machine, MachineState, MachineTransition, StateIndex, StateKind, Sym};
