//! Encodeur en flux
//!
//! L'encodeur est non déterministe entre chemins également valides: il
//! suit toutes les transitions correspondant au symbole reçu, ferme par
//! les transitions silencieuses côté entrée, puis n'écrit un caractère que
//! lorsque toutes les files candidates partagent la même tête.

use std::collections::{BTreeMap, VecDeque};
use std::io::{Read, Write};

use tracing::{debug, warn};

use crate::error::{BrinError, Result};
use crate::machine::{Machine, StateIndex, Sym};

pub struct Encoder<'a, W: Write> {
    machine: &'a Machine,
    writer: W,
    /// État possible -> symboles de sortie pas encore engagés.
    current: BTreeMap<StateIndex, VecDeque<Sym>>,
}

impl<'a, W: Write> Encoder<'a, W> {
    pub fn new(machine: &'a Machine, writer: W) -> Result<Self> {
        let mut enc = Self {
            machine,
            writer,
            current: BTreeMap::new(),
        };
        enc.current.insert(machine.start_state(), VecDeque::new());
        enc.eps_close()?;
        enc.shift_resolved()?;
        // le cadrage de début consomme un SOF injecté d'office
        if enc.accepts(Sym::Sof) {
            enc.push_symbol(Sym::Sof)?;
        }
        Ok(enc)
    }

    /// Vrai si au moins un candidat accepte le symbole.
    pub fn accepts(&self, sym: Sym) -> bool {
        self.current
            .keys()
            .any(|&s| self.machine.states[s].trans_for(sym).is_some())
    }

    fn insert_candidate(
        map: &mut BTreeMap<StateIndex, VecDeque<Sym>>,
        machine: &Machine,
        dest: StateIndex,
        queue: VecDeque<Sym>,
    ) {
        match map.entry(dest) {
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(queue);
            }
            std::collections::btree_map::Entry::Occupied(e) => {
                if *e.get() != queue {
                    warn!(
                        "Files de sortie divergentes vers l'état {}; la première est conservée",
                        machine.states[dest].name
                    );
                }
            }
        }
    }

    /// Avance tous les candidats d'un symbole d'entrée.
    fn push_symbol(&mut self, sym: Sym) -> Result<()> {
        let mut next: BTreeMap<StateIndex, VecDeque<Sym>> = BTreeMap::new();
        for (&s, queue) in &self.current {
            for t in &self.machine.states[s].trans {
                if t.input == Some(sym) {
                    let mut q = queue.clone();
                    if let Some(out) = t.output {
                        q.push_back(out);
                    }
                    Self::insert_candidate(&mut next, self.machine, t.dest, q);
                }
            }
        }
        if next.is_empty() {
            return Err(BrinError::Encoding(format!(
                "aucune transition n'accepte le symbole {}",
                sym
            )));
        }
        self.current = next;
        self.eps_close()?;
        self.shift_resolved()?;
        Ok(())
    }

    /// Ferme l'ensemble sous les transitions sans entrée.
    fn eps_close(&mut self) -> Result<()> {
        let mut guard = 0usize;
        loop {
            let pending: Option<StateIndex> = self
                .current
                .keys()
                .copied()
                .find(|&s| {
                    let st = &self.machine.states[s];
                    !st.trans.is_empty() && !st.is_wait()
                });
            let Some(s) = pending else { break };
            let queue = self.current.remove(&s).expect("candidat présent");
            for t in &self.machine.states[s].trans {
                let mut q = queue.clone();
                if let Some(out) = t.output {
                    q.push_back(out);
                }
                Self::insert_candidate(&mut self.current, self.machine, t.dest, q);
            }
            guard += 1;
            if guard > self.machine.n_states() * 4 {
                return Err(BrinError::Encoding(
                    "fermeture silencieuse sans point d'attente".into(),
                ));
            }
        }
        Ok(())
    }

    /// Écrit les symboles résolus: tête commune à toutes les files, puis
    /// file entière quand un seul candidat subsiste.
    fn shift_resolved(&mut self) -> Result<()> {
        loop {
            let mut heads = self.current.values().map(|q| q.front().copied());
            let Some(first) = heads.next().flatten() else { break };
            if !heads.all(|h| h == Some(first)) {
                break;
            }
            self.emit(first)?;
            for q in self.current.values_mut() {
                q.pop_front();
            }
        }
        if self.current.len() == 1 {
            let (&s, _) = self.current.iter().next().expect("singleton");
            let st = &self.machine.states[s];
            if st.is_wait() || st.trans.is_empty() {
                let syms: Vec<Sym> = self
                    .current
                    .values_mut()
                    .next()
                    .expect("singleton")
                    .drain(..)
                    .collect();
                for sym in syms {
                    self.emit(sym)?;
                }
            }
        }
        Ok(())
    }

    fn emit(&mut self, sym: Sym) -> Result<()> {
        let c = sym.stream_char().ok_or_else(|| {
            BrinError::Encoding(format!("symbole de sortie sans caractère: {}", sym))
        })?;
        self.writer.write_all(&[c as u8])?;
        Ok(())
    }

    /// Encode un symbole arbitraire, en insérant au besoin un FLUSH.
    pub fn encode_symbol(&mut self, sym: Sym) -> Result<()> {
        if !self.accepts(sym) && self.accepts(Sym::Flush) {
            warn!("Insère un FLUSH avant {}", sym);
            self.push_symbol(Sym::Flush)?;
        }
        self.push_symbol(sym)
    }

    pub fn encode_bit(&mut self, bit: bool) -> Result<()> {
        self.push_symbol(if bit { Sym::Bit1 } else { Sym::Bit0 })
    }

    /// Octet en bits, poids faible en tête.
    pub fn encode_byte(&mut self, byte: u8) -> Result<()> {
        for i in 0..8 {
            self.encode_bit((byte >> i) & 1 == 1)?;
        }
        Ok(())
    }

    /// Chaîne de '0'/'1' (les autres caractères sont ignorés avec un
    /// avertissement).
    pub fn encode_bit_string(&mut self, bits: &str) -> Result<()> {
        for c in bits.chars() {
            match c {
                '0' => self.encode_bit(false)?,
                '1' => self.encode_bit(true)?,
                c if c.is_whitespace() => {}
                other => warn!("Ignore le caractère '{}' du flux de bits", other),
            }
        }
        Ok(())
    }

    pub fn encode_stream<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        let mut buf = [0u8; 4096];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            for &b in &buf[..n] {
                self.encode_byte(b)?;
            }
        }
        Ok(())
    }

    /// Injecte EOF (précédé si nécessaire de FLUSH ou de bits nuls), vide
    /// les files et rend l'écrivain.
    pub fn close(mut self) -> Result<W> {
        if self.machine.input_alphabet().contains(&Sym::Eof) {
            let mut padding = 0usize;
            while !self.accepts(Sym::Eof) {
                if self.accepts(Sym::Flush) {
                    warn!("Insère un FLUSH pour atteindre EOF");
                    self.push_symbol(Sym::Flush)?;
                } else {
                    warn!("Insère un bit nul pour atteindre EOF");
                    self.push_symbol(Sym::Bit0)?;
                }
                padding += 1;
                if padding > self.machine.len as usize * 2 + 8 {
                    return Err(BrinError::Encoding(
                        "impossible d'atteindre EOF".into(),
                    ));
                }
            }
            self.push_symbol(Sym::Eof)?;
        }
        self.shift_resolved()?;
        for (&s, queue) in &self.current {
            if !queue.is_empty() {
                debug!(
                    "Encodeur non résolu: file de {} symboles sur l'état {}",
                    queue.len(),
                    self.machine.states[s].name
                );
            }
        }
        if self.current.values().any(|q| !q.is_empty()) {
            warn!(
                "Encodeur non résolu: {} état(s) conservent des symboles en attente",
                self.current.len()
            );
        }
        self.writer.flush()?;
        Ok(self.writer)
    }
}
