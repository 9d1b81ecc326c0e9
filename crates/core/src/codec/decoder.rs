//! Décodeur en flux
//!
//! Symétrique de l'encodeur: consomme un caractère de sortie, avance le
//! long de toutes les arêtes dont la sortie correspond, ferme par les
//! transitions sans sortie (qui accumulent leurs symboles d'entrée dans
//! les files), et engage un symbole d'entrée dès que toutes les files
//! s'accordent sur leur tête. Les arêtes strictes et FLUSH, doublons des
//! arêtes à bits au niveau de l'ADN, sont invisibles au décodeur.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, trace, warn};

use crate::error::{BrinError, Result};
use crate::kmer::char_to_base;
use crate::machine::{Machine, StateIndex, Sym};

use super::bits::InputSink;

pub struct Decoder<'a, S: InputSink> {
    machine: &'a Machine,
    sink: S,
    /// État possible -> symboles d'entrée pas encore engagés.
    current: BTreeMap<StateIndex, VecDeque<Sym>>,
}

/// Les arêtes ignorées par le décodeur d'exécution: elles doublonnent des
/// arêtes à bits sur le même caractère émis et rendraient la
/// correspondance sortie -> état ambiguë.
fn hidden_input(input: Option<Sym>) -> bool {
    match input {
        Some(sym) => sym.is_strict() || sym == Sym::Flush,
        None => false,
    }
}

impl<'a, S: InputSink> Decoder<'a, S> {
    pub fn new(machine: &'a Machine, sink: S) -> Result<Self> {
        let mut dec = Self {
            machine,
            sink,
            current: BTreeMap::new(),
        };
        dec.current.insert(machine.start_state(), VecDeque::new());
        dec.expand()?;
        Ok(dec)
    }

    /// Fermeture sous les transitions sans sortie: elles s'empruntent
    /// librement en accumulant leurs symboles d'entrée. Un état n'est
    /// conservé tel quel que s'il porte au moins une transition émettrice.
    fn expand(&mut self) -> Result<()> {
        let mut result: BTreeMap<StateIndex, VecDeque<Sym>> = BTreeMap::new();
        let mut visited: BTreeMap<StateIndex, VecDeque<Sym>> = self.current.clone();
        let mut work: Vec<(StateIndex, VecDeque<Sym>)> = self
            .current
            .iter()
            .map(|(&s, q)| (s, q.clone()))
            .collect();
        let mut guard = 0usize;
        while let Some((s, queue)) = work.pop() {
            guard += 1;
            if guard > self.machine.n_states() * 4 + 16 {
                return Err(BrinError::Decoding(
                    "fermeture du décodeur sans point fixe".into(),
                ));
            }
            let st = &self.machine.states[s];
            let mut has_output = st.trans.is_empty();
            for t in &st.trans {
                if hidden_input(t.input) {
                    continue;
                }
                if t.output.is_some() {
                    has_output = true;
                    continue;
                }
                let mut q = queue.clone();
                if let Some(sym) = t.input {
                    q.push_back(sym);
                }
                match visited.entry(t.dest) {
                    std::collections::btree_map::Entry::Vacant(e) => {
                        e.insert(q.clone());
                        work.push((t.dest, q));
                    }
                    std::collections::btree_map::Entry::Occupied(e) => {
                        if *e.get() != q {
                            warn!(
                                "Files d'entrée divergentes vers l'état {}",
                                self.machine.states[t.dest].name
                            );
                        }
                    }
                }
            }
            if has_output {
                result.entry(s).or_insert(queue);
            }
        }
        self.current = result;
        Ok(())
    }

    /// Consomme un caractère de la séquence ADN observée. Les caractères
    /// non nucléotidiques sont ignorés avec un avertissement.
    pub fn decode_base(&mut self, c: char) -> Result<()> {
        let base = match char_to_base(c) {
            Ok(b) => b,
            Err(_) => {
                if !c.is_whitespace() {
                    warn!("Ignore le caractère non nucléotidique '{}'", c);
                }
                return Ok(());
            }
        };
        trace!("Décode {}", c);
        let target = Sym::Base(base);
        let mut next: BTreeMap<StateIndex, VecDeque<Sym>> = BTreeMap::new();
        for (&s, queue) in &self.current {
            for t in &self.machine.states[s].trans {
                if hidden_input(t.input) || t.output != Some(target) {
                    continue;
                }
                let mut q = queue.clone();
                if let Some(sym) = t.input {
                    q.push_back(sym);
                }
                match next.entry(t.dest) {
                    std::collections::btree_map::Entry::Vacant(e) => {
                        e.insert(q);
                    }
                    std::collections::btree_map::Entry::Occupied(e) => {
                        if *e.get() != q {
                            return Err(BrinError::Decoding(format!(
                                "plusieurs entrées décodent vers l'état {}",
                                self.machine.states[t.dest].name
                            )));
                        }
                    }
                }
            }
        }
        if next.is_empty() {
            return Err(BrinError::Decoding(format!(
                "aucune entrée n'est compatible avec la sortie '{}'",
                c
            )));
        }
        self.current = next;
        self.expand()?;
        self.commit_agreed()
    }

    /// Engage les symboles de tête partagés par toutes les files.
    fn commit_agreed(&mut self) -> Result<()> {
        loop {
            let mut heads = self.current.values().map(|q| q.front().copied());
            let Some(first) = heads.next().flatten() else { break };
            if !heads.all(|h| h == Some(first)) {
                break;
            }
            debug!("Engage le symbole {}", first);
            self.sink.accept(first)?;
            for q in self.current.values_mut() {
                q.pop_front();
            }
        }
        Ok(())
    }

    pub fn decode_string(&mut self, seq: &str) -> Result<()> {
        for c in seq.chars() {
            self.decode_base(c)?;
        }
        Ok(())
    }

    /// Clôture: les états non résolus sont signalés mais non fatals.
    pub fn close(mut self) -> Result<S> {
        let unresolved: Vec<(StateIndex, usize)> = self
            .current
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(&s, q)| (s, q.len()))
            .collect();
        if !unresolved.is_empty() {
            warn!(
                "Décodeur non résolu: {} état(s) conservent des symboles d'entrée",
                unresolved.len()
            );
            for (s, n) in unresolved {
                warn!(
                    "État {}: {} symbole(s) en file",
                    self.machine.states[s].name,
                    n
                );
            }
        }
        self.sink.finish()?;
        Ok(self.sink)
    }
}
