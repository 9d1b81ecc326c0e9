//! Codec d'exécution: encodeur et décodeur en flux sur le transducteur
//!
//! Les deux moitiés entretiennent un ensemble d'états possibles, chacun
//! muni d'une file de symboles en attente; un symbole n'est engagé vers la
//! sortie que lorsque tous les candidats s'accordent sur sa tête de file.

pub mod bits;
pub mod decoder;
pub mod encoder;

pub use bits::{BinaryWriter, InputSink, SymbolCollector};
pub use decoder::Decoder;
pub use encoder::Encoder;
