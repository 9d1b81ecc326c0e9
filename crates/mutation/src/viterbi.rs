//! Décodage de Viterbi d'une lecture bruitée contre le transducteur
//!
//! La programmation dynamique porte sur (état machine, position observée,
//! sous-état de mutation). Les délétions consomment des pas machine sans
//! consommer d'observation: à position fixée, les cellules S et D forment
//! un graphe de relaxation dont tous les arcs ont un poids log négatif ou
//! nul; il se résout exactement en plus-long-chemin par étiquetage
//! définitif (Dijkstra sur les poids opposés). Le retour sur trace
//! reconstitue la chaîne de symboles d'entrée d'origine.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tracing::{debug, warn};

use brin_core::kmer::{char_to_base, Base};
use brin_core::machine::{Machine, StateIndex, Sym};

use crate::error::{MutationError, Result};
use crate::logsumexp::{LogProb, LOG_ZERO};
use crate::params::{MutatorParams, MutatorScores};

/// Distribution des symboles d'entrée: les contrôles se partagent
/// `control_prob`, le reste va aux symboles de charge utile.
#[derive(Debug, Clone)]
pub struct InputModel {
    pub sym_prob: std::collections::BTreeMap<Sym, f64>,
}

impl InputModel {
    pub fn new(machine: &Machine, control_prob: f64) -> Self {
        let alphabet: Vec<Sym> = machine
            .input_alphabet()
            .into_iter()
            .filter(|s| !s.is_strict() && !matches!(s, Sym::Flush | Sym::Sof | Sym::Eof))
            .collect();
        let n_controls = alphabet.iter().filter(|s| s.is_control()).count();
        let n_payload = alphabet.len() - n_controls;
        let mut sym_prob = std::collections::BTreeMap::new();
        for sym in alphabet {
            let p = if sym.is_control() {
                control_prob / n_controls as f64
            } else if n_controls == 0 {
                1.0 / n_payload as f64
            } else {
                (1.0 - control_prob) / n_payload as f64
            };
            sym_prob.insert(sym, p);
        }
        Self { sym_prob }
    }
}

/// Transition entrante pré-scorée.
#[derive(Debug, Clone, Copy)]
struct IncomingTransScore {
    src: StateIndex,
    score: LogProb,
    sym: Option<Sym>,
}

/// Transitions entrantes d'un état, séparées émettrices/silencieuses,
/// plus le contexte gauche décodé en bases.
struct StateScores {
    left: Vec<Option<Base>>,
    /// émettrices: (transition, base émise)
    emit: Vec<(IncomingTransScore, Base)>,
    /// silencieuses côté sortie (consomment éventuellement de l'entrée)
    null: Vec<IncomingTransScore>,
    /// bases de contexte connues en fin de gauche (borne les duplications)
    known_tail: usize,
}

struct MachineScores {
    state: Vec<StateScores>,
    /// adjacence sortante émettrice: src -> (dest, score)
    out_emit: Vec<Vec<(StateIndex, LogProb)>>,
    /// adjacence sortante silencieuse: src -> (dest, score)
    out_null: Vec<Vec<(StateIndex, LogProb)>>,
}

impl MachineScores {
    fn new(machine: &Machine, input_model: &InputModel) -> Result<Self> {
        if !machine.is_dna_output() {
            return Err(MutationError::NotDnaMachine);
        }
        machine.verify_waiting()?;
        machine.verify_contexts()?;
        machine.verify_silent_acyclic()?;

        let mut state: Vec<StateScores> = machine
            .states
            .iter()
            .map(|st| {
                let left: Vec<Option<Base>> = st
                    .left
                    .chars()
                    .map(|c| char_to_base(c).ok())
                    .collect();
                let known_tail = left.iter().rev().take_while(|b| b.is_some()).count();
                StateScores {
                    left,
                    emit: Vec::new(),
                    null: Vec::new(),
                    known_tail,
                }
            })
            .collect();

        let mut out_emit = vec![Vec::new(); machine.n_states()];
        let mut out_null = vec![Vec::new(); machine.n_states()];
        for (s, st) in machine.states.iter().enumerate() {
            for t in &st.trans {
                let score = match t.input {
                    None => 0.0,
                    Some(Sym::Sof) | Some(Sym::Eof) => 0.0,
                    Some(sym) if sym.is_strict() || sym == Sym::Flush => continue,
                    Some(sym) => match input_model.sym_prob.get(&sym) {
                        Some(&p) => p.ln(),
                        None => continue,
                    },
                };
                let its = IncomingTransScore {
                    src: s,
                    score,
                    sym: t.input,
                };
                match t.output {
                    None => {
                        state[t.dest].null.push(its);
                        out_null[s].push((t.dest, score));
                    }
                    Some(Sym::Base(b)) => {
                        state[t.dest].emit.push((its, b));
                        out_emit[s].push((t.dest, score));
                    }
                    Some(_) => return Err(MutationError::NotDnaMachine),
                }
            }
        }
        // le remplissage par colonne suppose les arcs silencieux ascendants
        for (s, ss) in state.iter().enumerate() {
            for its in &ss.null {
                if its.src >= s {
                    return Err(MutationError::UnorderedSilent(
                        machine.states[s].name.clone(),
                    ));
                }
            }
        }
        Ok(Self {
            state,
            out_emit,
            out_null,
        })
    }
}

/// Entrée de tas pour l'étiquetage définitif.
#[derive(PartialEq)]
struct HeapEntry(LogProb, usize);

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0).then(self.1.cmp(&other.1))
    }
}

/// Matrice de Viterbi composée machine × observation × sous-état.
pub struct ViterbiMatrix<'a> {
    pub machine: &'a Machine,
    pub params: &'a MutatorParams,
    scores: MutatorScores,
    mscores: MachineScores,
    seq: Vec<Base>,
    n_states: usize,
    seq_len: usize,
    max_dup_len: usize,
    cell: Vec<LogProb>,
    pub loglike: LogProb,
}

impl<'a> ViterbiMatrix<'a> {
    #[inline]
    fn base_index(&self, state: StateIndex, pos: usize) -> usize {
        (pos * self.n_states + state) * (self.max_dup_len + 2)
    }

    #[inline]
    fn s(&self, state: StateIndex, pos: usize) -> LogProb {
        self.cell[self.base_index(state, pos)]
    }

    #[inline]
    fn d(&self, state: StateIndex, pos: usize) -> LogProb {
        self.cell[self.base_index(state, pos) + 1]
    }

    #[inline]
    fn t(&self, state: StateIndex, pos: usize, dup: usize) -> LogProb {
        self.cell[self.base_index(state, pos) + 2 + dup]
    }

    /// Longueur de duplication admissible: bornée par le contexte connu.
    #[inline]
    fn max_dup_len_at(&self, state: StateIndex) -> usize {
        self.max_dup_len.min(self.mscores.state[state].known_tail)
    }

    /// Base `dup` positions en amont dans le contexte gauche de l'état.
    #[inline]
    fn dup_base(&self, state: StateIndex, dup: usize) -> Base {
        let left = &self.mscores.state[state].left;
        left[left.len() - 1 - dup].expect("contexte connu")
    }

    pub fn new(
        machine: &'a Machine,
        input_model: &InputModel,
        params: &'a MutatorParams,
        seq: &[Base],
    ) -> Result<Self> {
        let mscores = MachineScores::new(machine, input_model)?;
        let n_states = machine.n_states();
        let seq_len = seq.len();
        let max_dup_len = params.max_dup_len();
        let mut vit = Self {
            machine,
            params,
            scores: MutatorScores::new(params),
            mscores,
            seq: seq.to_vec(),
            n_states,
            seq_len,
            max_dup_len,
            cell: vec![LOG_ZERO; (max_dup_len + 2) * n_states * (seq_len + 1)],
            loglike: LOG_ZERO,
        };
        vit.fill();
        Ok(vit)
    }

    fn fill(&mut self) {
        for pos in 0..=self.seq_len {
            // amorces S de la colonne
            let mut s_col = vec![LOG_ZERO; self.n_states];
            if pos == 0 {
                if self.params.local {
                    s_col.fill(0.0);
                } else {
                    s_col[self.machine.start_state()] = 0.0;
                }
            } else {
                let obs = self.seq[pos - 1] as usize;
                for state in 0..self.n_states {
                    let mut best = LOG_ZERO;
                    for &(its, base) in &self.mscores.state[state].emit {
                        let v = self.s(its.src, pos - 1)
                            + its.score
                            + self.scores.no_gap
                            + self.scores.sub[base as usize][obs];
                        if v > best {
                            best = v;
                        }
                    }
                    if self.max_dup_len_at(state) > 0 {
                        let v = self.t(state, pos - 1, 0)
                            + self.scores.sub[self.dup_base(state, 0) as usize][obs];
                        if v > best {
                            best = v;
                        }
                    }
                    s_col[state] = best;
                }
            }

            let (s_col, d_col) = self.relax_column(s_col);
            for state in 0..self.n_states {
                let idx = self.base_index(state, pos);
                self.cell[idx] = s_col[state];
                self.cell[idx + 1] = d_col[state];
            }

            // cellules de duplication
            for state in 0..self.n_states {
                let mdl = self.max_dup_len_at(state);
                for dup in 0..mdl {
                    let mut v = s_col[state] + self.scores.tan_dup + self.scores.len[dup];
                    if dup + 1 < mdl && pos > 0 {
                        let obs = self.seq[pos - 1] as usize;
                        let cont = self.t(state, pos - 1, dup + 1)
                            + self.scores.sub[self.dup_base(state, dup + 1) as usize][obs];
                        if cont > v {
                            v = cont;
                        }
                    }
                    let idx = self.base_index(state, pos) + 2 + dup;
                    self.cell[idx] = v;
                }
            }
        }
        self.loglike = (0..self.n_states)
            .map(|s| self.s(s, self.seq_len))
            .fold(LOG_ZERO, f64::max);
    }

    /// Clôture exacte de la colonne: plus-longs-chemins sur le graphe
    /// {S(q), D(q)} dont les arcs (délétions, transitions silencieuses,
    /// fins de délétion) ont des poids non positifs.
    fn relax_column(&self, s_seed: Vec<LogProb>) -> (Vec<LogProb>, Vec<LogProb>) {
        let n = self.n_states;
        // nœuds: 0..n = S, n..2n = D
        let mut value = vec![LOG_ZERO; 2 * n];
        value[..n].copy_from_slice(&s_seed);
        let mut settled = vec![false; 2 * n];
        let mut heap = BinaryHeap::new();
        for (node, &v) in value.iter().enumerate() {
            if v > LOG_ZERO {
                heap.push(HeapEntry(v, node));
            }
        }
        while let Some(HeapEntry(v, node)) = heap.pop() {
            if settled[node] || v < value[node] {
                continue;
            }
            settled[node] = true;
            let (is_del, q) = (node >= n, node % n);
            let mut relax = |target: usize, w: LogProb, heap: &mut BinaryHeap<HeapEntry>,
                             value: &mut Vec<LogProb>| {
                let cand = v + w;
                if cand > value[target] {
                    value[target] = cand;
                    heap.push(HeapEntry(cand, target));
                }
            };
            if is_del {
                // D(q) -> S(q): fin de délétion
                relax(q, self.scores.del_end, &mut heap, &mut value);
            }
            for &(dest, score) in &self.mscores.out_emit[q] {
                if is_del {
                    // D -> D: la délétion s'étend sur la base émise
                    relax(n + dest, score + self.scores.del_extend, &mut heap, &mut value);
                } else {
                    // S -> D: la délétion s'ouvre sur la base émise
                    relax(n + dest, score + self.scores.del_open, &mut heap, &mut value);
                }
            }
            for &(dest, score) in &self.mscores.out_null[q] {
                let target = if is_del { n + dest } else { dest };
                relax(target, score, &mut heap, &mut value);
            }
        }
        let d_col = value.split_off(n);
        (value, d_col)
    }

    /// Retour sur trace: reconstruit la suite des symboles d'entrée.
    pub fn traceback(&self) -> Result<Vec<Sym>> {
        #[derive(Clone, Copy, PartialEq)]
        enum SubState {
            S,
            D,
            T(usize),
        }

        let mut state = (0..self.n_states)
            .max_by(|&a, &b| self.s(a, self.seq_len).total_cmp(&self.s(b, self.seq_len)))
            .ok_or(MutationError::TracebackFailure { pos: 0 })?;
        let mut pos = self.seq_len;
        let mut sub = SubState::S;
        let mut value = self.s(state, pos);
        if !value.is_finite() {
            return Err(MutationError::TracebackFailure { pos });
        }
        if self.machine.end_control().is_some()
            && !matches!(
                self.machine.states[state].kind,
                brin_core::machine::StateKind::End
            )
        {
            debug!(
                "Le retour sur trace ne part pas de l'état final mais de {}",
                self.machine.states[state].name
            );
        }

        let rel_ok = |a: LogProb, b: LogProb| {
            a == b || ((a - b) / if b == 0.0 { 1.0 } else { b }).abs() < 1e-6
        };

        let mut trace: Vec<Sym> = Vec::new();
        let limit = (self.seq_len + 2) * self.n_states * (self.max_dup_len + 2) * 4;
        for _ in 0..limit {
            // condition d'arrêt: amorce de la colonne 0
            if pos == 0 && sub == SubState::S && value == 0.0 {
                if self.params.local || state == self.machine.start_state() {
                    trace.reverse();
                    return Ok(trace);
                }
            }
            let obs = if pos > 0 {
                self.seq[pos - 1] as usize
            } else {
                usize::MAX
            };
            let ss = &self.mscores.state[state];
            let mdl = self.max_dup_len_at(state);
            let mut found = false;
            match sub {
                SubState::S => {
                    if pos > 0 {
                        for &(its, base) in &ss.emit {
                            let v = self.s(its.src, pos - 1)
                                + its.score
                                + self.scores.no_gap
                                + self.scores.sub[base as usize][obs];
                            if rel_ok(v, value) {
                                if let Some(sym) = its.sym {
                                    trace.push(sym);
                                }
                                state = its.src;
                                pos -= 1;
                                value = self.s(state, pos);
                                found = true;
                                break;
                            }
                        }
                        if !found && mdl > 0 {
                            let v = self.t(state, pos - 1, 0)
                                + self.scores.sub[self.dup_base(state, 0) as usize][obs];
                            if rel_ok(v, value) {
                                sub = SubState::T(0);
                                pos -= 1;
                                value = self.t(state, pos, 0);
                                found = true;
                            }
                        }
                    }
                    if !found {
                        let v = self.d(state, pos) + self.scores.del_end;
                        if rel_ok(v, value) {
                            sub = SubState::D;
                            value = self.d(state, pos);
                            found = true;
                        }
                    }
                    if !found {
                        for &its in &ss.null {
                            let v = self.s(its.src, pos) + its.score;
                            if rel_ok(v, value) {
                                if let Some(sym) = its.sym {
                                    trace.push(sym);
                                }
                                state = its.src;
                                value = self.s(state, pos);
                                found = true;
                                break;
                            }
                        }
                    }
                }
                SubState::D => {
                    for &(its, _) in &ss.emit {
                        let open = self.s(its.src, pos) + its.score + self.scores.del_open;
                        let extend = self.d(its.src, pos) + its.score + self.scores.del_extend;
                        if rel_ok(extend, value) {
                            if let Some(sym) = its.sym {
                                trace.push(sym);
                            }
                            state = its.src;
                            value = self.d(state, pos);
                            found = true;
                            break;
                        }
                        if rel_ok(open, value) {
                            if let Some(sym) = its.sym {
                                trace.push(sym);
                            }
                            state = its.src;
                            sub = SubState::S;
                            value = self.s(state, pos);
                            found = true;
                            break;
                        }
                    }
                    if !found {
                        for &its in &ss.null {
                            let v = self.d(its.src, pos) + its.score;
                            if rel_ok(v, value) {
                                if let Some(sym) = its.sym {
                                    trace.push(sym);
                                }
                                state = its.src;
                                value = self.d(state, pos);
                                found = true;
                                break;
                            }
                        }
                    }
                }
                SubState::T(dup) => {
                    if dup + 1 < mdl && pos > 0 {
                        let v = self.t(state, pos - 1, dup + 1)
                            + self.scores.sub[self.dup_base(state, dup + 1) as usize][obs];
                        if rel_ok(v, value) {
                            sub = SubState::T(dup + 1);
                            pos -= 1;
                            value = self.t(state, pos, dup + 1);
                            found = true;
                        }
                    }
                    if !found {
                        let v = self.s(state, pos) + self.scores.tan_dup + self.scores.len[dup];
                        if rel_ok(v, value) {
                            sub = SubState::S;
                            value = self.s(state, pos);
                            found = true;
                        }
                    }
                }
            }
            if !found {
                return Err(MutationError::TracebackFailure { pos });
            }
        }
        warn!("Retour sur trace interrompu par la garde d'itérations");
        Err(MutationError::TracebackFailure { pos })
    }
}

/// Décodage complet d'une lecture: matrice, retour sur trace, symboles.
pub fn decode_sequence(
    machine: &Machine,
    params: &MutatorParams,
    seq: &[Base],
    control_prob: f64,
) -> Result<(Vec<Sym>, LogProb)> {
    let input_model = InputModel::new(machine, control_prob);
    let vit = ViterbiMatrix::new(machine, &input_model, params, seq)?;
    let trace = vit.traceback()?;
    Ok((trace, vit.loglike))
}

#[cfg(test)]
mod tests {
    use super::*;
    use brin_core::machine::{MachineState, MachineTransition, StateKind};

    /// Machine jouet à deux états: bit0 émet A (vers l'état de contexte
    /// A), bit1 émet C (vers l'état de contexte C); sans cadrage.
    fn toy_machine() -> Machine {
        let mut m = Machine::new(1);
        for ctx in ["A", "C"] {
            let mut st = MachineState::new(ctx.into(), StateKind::Code, ctx.into());
            st.trans
                .push(MachineTransition::new(Some(Sym::Bit0), Some(Sym::Base(0)), 0));
            st.trans
                .push(MachineTransition::new(Some(Sym::Bit1), Some(Sym::Base(3)), 1));
            m.states.push(st);
        }
        m
    }

    fn quiet_params() -> MutatorParams {
        MutatorParams::with_defaults(1e-3, 2.0, 1e-4, 1e-4, 0.1, 2, false).unwrap()
    }

    #[test]
    fn test_clean_read_recovers_bits() {
        let m = toy_machine();
        let p = quiet_params();
        // bits 0,1,1,0 -> A,C,C,A
        let seq: Vec<Base> = vec![0, 3, 3, 0];
        let (trace, ll) = decode_sequence(&m, &p, &seq, 0.01).unwrap();
        assert!(ll.is_finite());
        let bits: Vec<Sym> = trace.into_iter().filter(|s| s.is_bit()).collect();
        assert_eq!(bits, vec![Sym::Bit0, Sym::Bit1, Sym::Bit1, Sym::Bit0]);
    }

    #[test]
    fn test_short_read_decodes() {
        let m = toy_machine();
        let p = quiet_params();
        let seq: Vec<Base> = vec![0, 0];
        let (trace, ll) = decode_sequence(&m, &p, &seq, 0.01).unwrap();
        assert!(ll.is_finite());
        // deux bases observées, au moins deux bits décodés
        assert!(trace.iter().filter(|s| s.is_bit()).count() >= 2);
    }

    #[test]
    fn test_substitution_cost_is_bounded() {
        let m = toy_machine();
        let p = quiet_params();
        let clean: Vec<Base> = vec![0, 3, 0, 3];
        let (_, ll_clean) = decode_sequence(&m, &p, &clean, 0.01).unwrap();
        // remplace la troisième base par son partenaire de transition G:
        // aucune branche n'émet G, le chemin optimal paie la substitution
        let mut dirty = clean.clone();
        dirty[2] = 1;
        let (_, ll_dirty) = decode_sequence(&m, &p, &dirty, 0.01).unwrap();
        assert!(ll_dirty < ll_clean);
        let expected_drop = p.p_match().ln() - p.p_transition.ln();
        assert!(
            (ll_clean - ll_dirty - expected_drop).abs() < 1e-3,
            "écart {} attendu {}",
            ll_clean - ll_dirty,
            expected_drop
        );
    }

    #[test]
    fn test_local_mode_free_endpoints() {
        let m = toy_machine();
        let mut p = quiet_params();
        p.local = true;
        let seq: Vec<Base> = vec![3, 0];
        let (trace, ll) = decode_sequence(&m, &p, &seq, 0.01).unwrap();
        assert!(ll.is_finite());
        assert_eq!(trace.iter().filter(|s| s.is_bit()).count(), 2);
    }
}
