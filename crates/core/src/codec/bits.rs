//! Empaquetage binaire des symboles décodés
//!
//! Le décodeur engage des symboles d'entrée; le `BinaryWriter` convertit
//! les suites de bits en octets (poids faible en tête par défaut) et
//! journalise tout autre symbole au lieu d'échouer.

use std::io::Write;

use tracing::warn;

use crate::error::Result;
use crate::machine::Sym;

/// Réceptacle des symboles d'entrée engagés par le décodeur.
pub trait InputSink {
    fn accept(&mut self, sym: Sym) -> Result<()>;
    /// Clôture: signale les restes éventuels.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Empaqueteur 8 bits. `msb0` inverse l'ordre des bits dans l'octet.
pub struct BinaryWriter<W: Write> {
    out: W,
    pub msb0: bool,
    buf: Vec<bool>,
}

impl<W: Write> BinaryWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            msb0: false,
            buf: Vec::with_capacity(8),
        }
    }

    pub fn with_msb0(out: W) -> Self {
        Self {
            out,
            msb0: true,
            buf: Vec::with_capacity(8),
        }
    }

    fn flush_octet(&mut self) -> Result<()> {
        let mut c = 0u8;
        for (n, &bit) in self.buf.iter().enumerate() {
            if bit {
                c |= 1 << if self.msb0 { 7 - n } else { n };
            }
        }
        self.out.write_all(&[c])?;
        self.buf.clear();
        Ok(())
    }

    /// Déballe l'écrivain sous-jacent.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> InputSink for BinaryWriter<W> {
    fn accept(&mut self, sym: Sym) -> Result<()> {
        match sym {
            Sym::Bit0 | Sym::Bit1 => {
                self.buf.push(sym == Sym::Bit1);
                if self.buf.len() == 8 {
                    self.flush_octet()?;
                }
            }
            Sym::Control(_) | Sym::Sof | Sym::Eof | Sym::Flush => {
                warn!("Ignore le caractère de contrôle {}", sym);
            }
            other => {
                warn!("Ignore le symbole inattendu {}", other);
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            warn!(
                "{} bits ({}) restent en sortie",
                self.buf.len(),
                self.buf
                    .iter()
                    .map(|&b| if b { '1' } else { '0' })
                    .collect::<String>()
            );
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Collecte les symboles sous forme de chaîne de mnémoniques, pour les
/// modes bit-à-bit et les tests.
#[derive(Default)]
pub struct SymbolCollector {
    pub text: String,
}

impl SymbolCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InputSink for SymbolCollector {
    fn accept(&mut self, sym: Sym) -> Result<()> {
        match sym.stream_char() {
            Some(c) => self.text.push(c),
            None => self.text.push_str(&sym.mnemonic()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsb_first_packing() {
        let mut w = BinaryWriter::new(Vec::new());
        // 'A' = 0x41 = 0b01000001, poids faible en tête: 1,0,0,0,0,0,1,0
        for bit in [true, false, false, false, false, false, true, false] {
            w.accept(if bit { Sym::Bit1 } else { Sym::Bit0 }).unwrap();
        }
        assert_eq!(w.into_inner(), vec![0x41]);
    }

    #[test]
    fn test_msb_first_packing() {
        let mut w = BinaryWriter::with_msb0(Vec::new());
        for bit in [false, true, false, false, false, false, false, true] {
            w.accept(if bit { Sym::Bit1 } else { Sym::Bit0 }).unwrap();
        }
        assert_eq!(w.into_inner(), vec![0x41]);
    }

    #[test]
    fn test_partial_bits_warn_not_fail() {
        let mut w = BinaryWriter::new(Vec::new());
        w.accept(Sym::Bit1).unwrap();
        w.finish().unwrap();
        assert!(w.into_inner().is_empty());
    }

    #[test]
    fn test_control_symbols_ignored() {
        let mut w = BinaryWriter::new(Vec::new());
        w.accept(Sym::Control(0)).unwrap();
        w.accept(Sym::Eof).unwrap();
        assert!(w.into_inner().is_empty());
    }
}
