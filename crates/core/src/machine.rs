//! Transducteur d'état fini
//!
//! La machine est un graphe plat d'états indexés par de petits entiers;
//! les transitions portent un symbole d'entrée optionnel, un symbole de
//! sortie optionnel et l'index de destination. Une machine est
//! *alternante*: chaque état accepte de l'entrée sur toutes ses
//! transitions, ou sur aucune. La composition et le décodeur de Viterbi
//! s'appuient sur cette propriété.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::{BrinError, Result};
use crate::kmer::{base_to_char, char_to_base, Base, Pos};

/// Index d'un état dans le vecteur plat.
pub type StateIndex = usize;

/// Caractères réservés aux symboles de contrôle, par index.
pub const CONTROL_CHARS: &str = "XYPQVWKLMNZREFIJUD23456789";

/// Symbole d'entrée ou de sortie d'une transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Sym {
    /// Base ADN (symbole de sortie du transducteur de code).
    Base(Base),
    /// Bits non stricts, acceptés dans tout état codant.
    Bit0,
    Bit1,
    /// Bits stricts, acceptés seulement en degré sortant 2.
    StrictBit0,
    StrictBit1,
    /// Trits, acceptés seulement en degré sortant 3.
    Trit(u8),
    /// Quats, acceptés seulement en degré sortant 4.
    Quat(u8),
    /// Complète un bit en attente par la branche 0.
    Flush,
    /// Cadrage de début et de fin.
    Sof,
    Eof,
    /// Symbole de contrôle, un par mot de contrôle réservé.
    Control(u8),
}

impl Sym {
    /// Caractère du flux pour les symboles qui en ont un.
    pub fn stream_char(&self) -> Option<char> {
        match *self {
            Sym::Base(b) => Some(base_to_char(b)),
            Sym::Bit0 => Some('0'),
            Sym::Bit1 => Some('1'),
            Sym::Flush => Some('!'),
            Sym::Sof => Some('<'),
            Sym::Eof => Some('>'),
            Sym::Control(c) => CONTROL_CHARS.chars().nth(c as usize),
            _ => None,
        }
    }

    /// Mnémonique de sérialisation (un caractère quand c'est possible).
    pub fn mnemonic(&self) -> String {
        match *self {
            Sym::Base(b) => base_to_char(b).to_string(),
            Sym::Bit0 => "0".into(),
            Sym::Bit1 => "1".into(),
            Sym::StrictBit0 => "s0".into(),
            Sym::StrictBit1 => "s1".into(),
            Sym::Trit(i) => format!("t{}", i),
            Sym::Quat(i) => format!("q{}", i),
            Sym::Flush => "flush".into(),
            Sym::Sof => "sof".into(),
            Sym::Eof => "eof".into(),
            Sym::Control(c) => CONTROL_CHARS
                .chars()
                .nth(c as usize)
                .map(|ch| ch.to_string())
                .unwrap_or_else(|| format!("ctl{}", c)),
        }
    }

    /// Analyse un mnémonique produit par [`Sym::mnemonic`].
    pub fn parse(s: &str) -> Result<Sym> {
        match s {
            "0" => return Ok(Sym::Bit0),
            "1" => return Ok(Sym::Bit1),
            "s0" => return Ok(Sym::StrictBit0),
            "s1" => return Ok(Sym::StrictBit1),
            "flush" => return Ok(Sym::Flush),
            "sof" => return Ok(Sym::Sof),
            "eof" => return Ok(Sym::Eof),
            _ => {}
        }
        if let Some(rest) = s.strip_prefix('t') {
            if let Ok(i) = rest.parse::<u8>() {
                if i < 3 && rest.len() == 1 {
                    return Ok(Sym::Trit(i));
                }
            }
        }
        if let Some(rest) = s.strip_prefix('q') {
            if let Ok(i) = rest.parse::<u8>() {
                if i < 4 && rest.len() == 1 {
                    return Ok(Sym::Quat(i));
                }
            }
        }
        let mut chars = s.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if let Some(idx) = CONTROL_CHARS.find(c) {
                return Ok(Sym::Control(idx as u8));
            }
            if let Ok(b) = char_to_base(c) {
                return Ok(Sym::Base(b));
            }
        }
        Err(BrinError::BadMachine(format!("symbole inconnu '{}'", s)))
    }

    /// Symboles stricts: réservés à la composition avec des transducteurs
    /// externes, ignorés par le codec d'exécution.
    pub fn is_strict(&self) -> bool {
        matches!(
            self,
            Sym::StrictBit0 | Sym::StrictBit1 | Sym::Trit(_) | Sym::Quat(_)
        )
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Sym::Control(_))
    }

    pub fn is_bit(&self) -> bool {
        matches!(self, Sym::Bit0 | Sym::Bit1)
    }
}

impl std::fmt::Display for Sym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// Discriminant d'état, avec sa petite charge utile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// État codant ordinaire.
    Code,
    /// Se termine par un motif source: terminateur de graphe.
    Source,
    /// Réalisation d'un mot de contrôle.
    Control(u8),
    /// État auxiliaire de répartition (degré sortant 3 ou 4).
    Split(u8),
    /// État de pont vers un mot de contrôle.
    Bridge { control: u8, step: u16 },
    /// Chaîne de chargement du cadrage de début.
    Start(u16),
    /// États de vidage du mode retardé.
    Drain(u16),
    /// État final unique.
    End,
}

impl StateKind {
    pub fn type_string(&self) -> String {
        match *self {
            StateKind::Code => "Code".into(),
            StateKind::Source => "Source".into(),
            StateKind::Control(c) => format!(
                "Meta({})",
                CONTROL_CHARS.chars().nth(c as usize).unwrap_or('?')
            ),
            StateKind::Split(i) => format!("Split{}", i),
            StateKind::Bridge { control, step } => format!(
                "Pad({},{})",
                CONTROL_CHARS.chars().nth(control as usize).unwrap_or('?'),
                step
            ),
            StateKind::Start(_) => "Start".into(),
            StateKind::Drain(_) => "Drain".into(),
            StateKind::End => "End".into(),
        }
    }

    /// Reconstruit le discriminant depuis un nom d'état sérialisé.
    pub fn from_name(name: &str) -> StateKind {
        if name == "end" {
            return StateKind::End;
        }
        if let Some(rest) = name.strip_prefix("start") {
            if let Ok(i) = rest.parse::<u16>() {
                return StateKind::Start(i);
            }
        }
        if let Some(rest) = name.strip_prefix("drain") {
            if let Ok(i) = rest.parse::<u16>() {
                return StateKind::Drain(i);
            }
        }
        if let Some(rest) = name.strip_prefix("src:") {
            let _ = rest;
            return StateKind::Source;
        }
        if let Some(rest) = name.strip_prefix("ctl") {
            if let Some((idx, _)) = rest.split_once(':') {
                if let Ok(c) = idx.parse::<u8>() {
                    return StateKind::Control(c);
                }
            }
        }
        if let Some(rest) = name.strip_prefix("pad") {
            if let Some((coords, _)) = rest.split_once(':') {
                if let Some((c, s)) = coords.split_once('.') {
                    if let (Ok(c), Ok(s)) = (c.parse::<u8>(), s.parse::<u16>()) {
                        return StateKind::Bridge { control: c, step: s };
                    }
                }
            }
        }
        if let Some((_, sub)) = name.rsplit_once('.') {
            if let Ok(i) = sub.parse::<u8>() {
                if i < 2 {
                    return StateKind::Split(i);
                }
            }
        }
        StateKind::Code
    }
}

/// Transition étiquetée d'une machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineTransition {
    pub input: Option<Sym>,
    pub output: Option<Sym>,
    pub dest: StateIndex,
}

impl MachineTransition {
    pub fn new(input: Option<Sym>, output: Option<Sym>, dest: StateIndex) -> Self {
        Self { input, output, dest }
    }
}

/// État d'une machine: nom lisible, discriminant, contextes, transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineState {
    pub name: String,
    pub kind: StateKind,
    /// Bases qui viennent d'être émises pour arriver ici ('*' = inconnue).
    pub left: String,
    /// Bases à venir, renseigné seulement par la variante retardée.
    pub right: Option<String>,
    pub trans: Vec<MachineTransition>,
}

impl MachineState {
    pub fn new(name: String, kind: StateKind, left: String) -> Self {
        Self {
            name,
            kind,
            left,
            right: None,
            trans: Vec::new(),
        }
    }

    /// Vrai si l'état attend de l'entrée (toutes les transitions en
    /// consomment); un état sans transition attend par convention.
    pub fn is_wait(&self) -> bool {
        self.trans.iter().all(|t| t.input.is_some())
    }

    /// Première transition correspondant au symbole d'entrée.
    pub fn trans_for(&self, sym: Sym) -> Option<&MachineTransition> {
        self.trans.iter().find(|t| t.input == Some(sym))
    }

    pub fn type_string(&self) -> String {
        self.kind.type_string()
    }
}

/// Transducteur complet, immuable après assemblage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    /// Longueur de contexte totale (gauche + droite).
    pub len: Pos,
    pub states: Vec<MachineState>,
}

#[derive(Serialize, Deserialize)]
struct TransJson {
    #[serde(rename = "in", default, skip_serializing_if = "Option::is_none")]
    input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    out: Option<String>,
    to: usize,
}

#[derive(Serialize, Deserialize)]
struct StateJson {
    n: usize,
    id: String,
    l: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    r: Option<String>,
    trans: Vec<TransJson>,
}

#[derive(Serialize, Deserialize)]
struct MachineJson {
    state: Vec<StateJson>,
}

impl Machine {
    pub fn new(len: Pos) -> Self {
        Self {
            len,
            states: Vec::new(),
        }
    }

    pub fn n_states(&self) -> usize {
        self.states.len()
    }

    /// La machine démarre toujours à l'état 0.
    pub fn start_state(&self) -> StateIndex {
        0
    }

    pub fn state_name(s: StateIndex) -> String {
        format!("#{}", s + 1)
    }

    /// Index du mot de contrôle de fin, si le cadrage de fin est présent:
    /// l'état Meta dont la chaîne silencieuse mène à l'état final.
    pub fn end_control(&self) -> Option<u8> {
        for st in &self.states {
            if let StateKind::Control(c) = st.kind {
                let mut cur = st;
                let mut hops = 0;
                while cur.trans.len() == 1 && cur.trans[0].input.is_none() {
                    let dest = &self.states[cur.trans[0].dest];
                    if dest.kind == StateKind::End {
                        return Some(c);
                    }
                    cur = dest;
                    hops += 1;
                    if hops > self.n_states() {
                        break;
                    }
                }
            }
        }
        None
    }

    /// Index du mot de contrôle de début, si le cadrage de début est
    /// présent: celui que la chaîne de chargement réalise.
    pub fn start_control(&self) -> Option<u8> {
        let mut cur = self.states.first()?;
        if !matches!(cur.kind, StateKind::Start(_)) {
            return None;
        }
        let mut hops = 0;
        loop {
            let t = cur.trans.first()?;
            let dest = &self.states[t.dest];
            if let StateKind::Control(c) = dest.kind {
                return Some(c);
            }
            if !matches!(dest.kind, StateKind::Start(_)) {
                return None;
            }
            cur = dest;
            hops += 1;
            if hops > self.n_states() {
                return None;
            }
        }
    }

    /// Alphabet d'entrée effectif.
    pub fn input_alphabet(&self) -> BTreeSet<Sym> {
        self.states
            .iter()
            .flat_map(|s| s.trans.iter().filter_map(|t| t.input))
            .collect()
    }

    /// Alphabet de sortie effectif.
    pub fn output_alphabet(&self) -> BTreeSet<Sym> {
        self.states
            .iter()
            .flat_map(|s| s.trans.iter().filter_map(|t| t.output))
            .collect()
    }

    /// Vrai si toutes les sorties sont des bases ADN.
    pub fn is_dna_output(&self) -> bool {
        self.output_alphabet()
            .iter()
            .all(|s| matches!(s, Sym::Base(_)))
    }

    /// Vérifie la propriété alternante.
    pub fn verify_waiting(&self) -> Result<()> {
        for st in &self.states {
            let with_input = st.trans.iter().filter(|t| t.input.is_some()).count();
            if with_input != 0 && with_input != st.trans.len() {
                return Err(BrinError::NotWaiting {
                    state: st.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Vérifie la cohérence des contextes: un caractère émis doit ouvrir
    /// le contexte droit de la source et clore le contexte gauche de la
    /// destination, quand ces champs sont renseignés.
    pub fn verify_contexts(&self) -> Result<()> {
        for st in &self.states {
            for t in &st.trans {
                let Some(Sym::Base(b)) = t.output else {
                    continue;
                };
                let c = base_to_char(b);
                if let Some(r) = &st.right {
                    if let Some(first) = r.chars().next() {
                        if first != '*' && first != c {
                            return Err(BrinError::ContextMismatch {
                                state: st.name.clone(),
                                emitted: c,
                                expected: first,
                            });
                        }
                    }
                }
                let dest = &self.states[t.dest];
                if let Some(last) = dest.left.chars().last() {
                    if last != '*' && last != c {
                        return Err(BrinError::ContextMismatch {
                            state: st.name.clone(),
                            emitted: c,
                            expected: last,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Vérifie que le sous-graphe des transitions sans sortie est acyclique
    /// (un cycle silencieux bloquerait le décodeur et le Viterbi).
    pub fn verify_silent_acyclic(&self) -> Result<()> {
        // 0 = blanc, 1 = en cours, 2 = fini
        let mut colour = vec![0u8; self.n_states()];
        for root in 0..self.n_states() {
            if colour[root] != 0 {
                continue;
            }
            // parcours itératif avec pile de retour
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            colour[root] = 1;
            while let Some(&(s, next)) = stack.last() {
                let silent: Vec<usize> = self.states[s]
                    .trans
                    .iter()
                    .filter(|t| t.output.is_none())
                    .map(|t| t.dest)
                    .collect();
                if next < silent.len() {
                    stack.last_mut().expect("pile non vide").1 += 1;
                    let d = silent[next];
                    match colour[d] {
                        0 => {
                            colour[d] = 1;
                            stack.push((d, 0));
                        }
                        1 => {
                            return Err(BrinError::SilentCycle {
                                state: self.states[d].name.clone(),
                            })
                        }
                        _ => {}
                    }
                } else {
                    colour[s] = 2;
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    /// Validation complète après assemblage ou rechargement.
    pub fn validate(&self) -> Result<()> {
        for st in &self.states {
            for t in &st.trans {
                if t.dest >= self.n_states() {
                    return Err(BrinError::BadMachine(format!(
                        "transition de {} vers l'état inexistant {}",
                        st.name, t.dest
                    )));
                }
            }
        }
        self.verify_waiting()?;
        self.verify_contexts()?;
        self.verify_silent_acyclic()?;
        Ok(())
    }

    /// Table lisible de la machine, états puis transitions.
    pub fn write(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let sw = self
            .states
            .iter()
            .enumerate()
            .map(|(i, _)| Self::state_name(i).len())
            .max()
            .unwrap_or(0);
        let tw = self
            .states
            .iter()
            .map(|s| s.type_string().len())
            .max()
            .unwrap_or(0);
        let nw = self.states.iter().map(|s| s.name.len()).max().unwrap_or(0);
        for (i, st) in self.states.iter().enumerate() {
            let ctx = match &st.right {
                Some(r) => format!("{}:{}", st.left, r),
                None => st.left.clone(),
            };
            write!(
                out,
                "{:<sw$} {:<tw$} {:<nw$} {}",
                Self::state_name(i),
                st.type_string(),
                st.name,
                ctx,
                sw = sw + 1,
                tw = tw + 1,
                nw = nw + 1
            )?;
            for t in &st.trans {
                write!(
                    out,
                    " {}/{}->{}",
                    t.input.map(|s| s.mnemonic()).unwrap_or_default(),
                    t.output.map(|s| s.mnemonic()).unwrap_or_default(),
                    Self::state_name(t.dest)
                )?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Rendu Graphviz.
    pub fn to_dot(&self) -> String {
        let mut s = String::from("digraph machine {\n  rankdir=LR;\n  node [shape=circle];\n");
        for (i, st) in self.states.iter().enumerate() {
            s.push_str(&format!(
                "  s{} [label=\"{}\\n{}\"];\n",
                i,
                st.name.replace('"', "'"),
                st.type_string()
            ));
        }
        for (i, st) in self.states.iter().enumerate() {
            for t in &st.trans {
                s.push_str(&format!(
                    "  s{} -> s{} [label=\"{}/{}\"];\n",
                    i,
                    t.dest,
                    t.input.map(|x| x.mnemonic()).unwrap_or_default(),
                    t.output.map(|x| x.mnemonic()).unwrap_or_default()
                ));
            }
        }
        s.push_str("}\n");
        s
    }

    /// Sérialise la machine au format JSON `{ "state": [...] }`.
    pub fn write_json(&self, out: &mut dyn Write) -> Result<()> {
        let doc = MachineJson {
            state: self
                .states
                .iter()
                .enumerate()
                .map(|(n, st)| StateJson {
                    n,
                    id: st.name.clone(),
                    l: st.left.clone(),
                    r: st.right.clone(),
                    trans: st
                        .trans
                        .iter()
                        .map(|t| TransJson {
                            input: t.input.map(|s| s.mnemonic()),
                            out: t.output.map(|s| s.mnemonic()),
                            to: t.dest,
                        })
                        .collect(),
                })
                .collect(),
        };
        serde_json::to_writer_pretty(&mut *out, &doc)?;
        writeln!(out)?;
        Ok(())
    }

    /// Recharge une machine sérialisée; le résultat est revalidé et doit
    /// être identique à la machine d'origine, à l'ordre des transitions
    /// près dans chaque état.
    pub fn read_json(input: &mut dyn std::io::Read) -> Result<Machine> {
        let doc: MachineJson = serde_json::from_reader(input)?;
        let mut len = 0;
        let mut states = Vec::with_capacity(doc.state.len());
        for (idx, sj) in doc.state.into_iter().enumerate() {
            if sj.n != idx {
                return Err(BrinError::BadMachine(format!(
                    "état {} numéroté {}",
                    idx, sj.n
                )));
            }
            let total = sj.l.len() + sj.r.as_ref().map_or(0, |r| r.len());
            len = len.max(total as Pos);
            let mut st = MachineState::new(sj.id.clone(), StateKind::from_name(&sj.id), sj.l);
            st.right = sj.r;
            for tj in sj.trans {
                let input = tj.input.as_deref().map(Sym::parse).transpose()?;
                let output = tj.out.as_deref().map(Sym::parse).transpose()?;
                st.trans.push(MachineTransition::new(input, output, tj.to));
            }
            states.push(st);
        }
        let machine = Machine { len, states };
        machine.validate()?;
        Ok(machine)
    }

    /// Estime le nombre moyen de bases émises par bit consommé, sous des
    /// bits d'entrée uniformes: itération de puissance sur la chaîne de
    /// Markov induite par les états d'attente pilotés par bits.
    pub fn expected_bases_per_bit(&self) -> Option<f64> {
        let driven: Vec<StateIndex> = (0..self.n_states())
            .filter(|&s| {
                let st = &self.states[s];
                st.is_wait()
                    && st.trans_for(Sym::Bit0).is_some()
                    && st.trans_for(Sym::Bit1).is_some()
            })
            .collect();
        if driven.is_empty() {
            return None;
        }
        let row: BTreeMap<StateIndex, usize> =
            driven.iter().enumerate().map(|(i, &s)| (s, i)).collect();

        // suit les chaînes sans attente jusqu'au prochain état d'attente
        fn settle(
            machine: &Machine,
            s: StateIndex,
            prob: f64,
            bases: f64,
            depth: usize,
            acc: &mut Vec<(StateIndex, f64, f64)>,
        ) {
            let st = &machine.states[s];
            if st.is_wait() || depth > machine.n_states() {
                acc.push((s, prob, bases));
                return;
            }
            let k = st.trans.len() as f64;
            for t in &st.trans {
                let emitted = if t.output.is_some() { 1.0 } else { 0.0 };
                settle(machine, t.dest, prob / k, bases + emitted, depth + 1, acc);
            }
        }

        let n = driven.len();
        let mut p = vec![vec![0.0f64; n]; n];
        let mut ebases = vec![0.0f64; n];
        for (i, &s) in driven.iter().enumerate() {
            for bit in [Sym::Bit0, Sym::Bit1] {
                let t = self.states[s].trans_for(bit).expect("état piloté par bits");
                let mut acc = Vec::new();
                let emitted = if t.output.is_some() { 1.0 } else { 0.0 };
                settle(self, t.dest, 0.5, emitted, 0, &mut acc);
                for (dest, prob, bases) in acc {
                    ebases[i] += prob * bases;
                    if let Some(&j) = row.get(&dest) {
                        p[i][j] += prob;
                    }
                }
            }
        }

        let mut pi = vec![1.0 / n as f64; n];
        for _ in 0..2000 {
            let mut next = vec![0.0f64; n];
            for i in 0..n {
                for j in 0..n {
                    next[j] += pi[i] * p[i][j];
                }
            }
            let total: f64 = next.iter().sum();
            if total <= 0.0 {
                return None;
            }
            for v in &mut next {
                *v /= total;
            }
            let delta: f64 = pi
                .iter()
                .zip(&next)
                .map(|(a, b)| (a - b).abs())
                .sum();
            pi = next;
            if delta < 1e-13 {
                break;
            }
        }
        Some(pi.iter().zip(&ebases).map(|(p, e)| p * e).sum())
    }

    /// Compose `self` (machine externe) avec `inner`: les symboles émis
    /// par `self` alimentent l'entrée d'`inner`. `inner` doit être
    /// alternante.
    pub fn compose(&self, inner: &Machine) -> Result<Machine> {
        inner
            .verify_waiting()
            .map_err(|_| BrinError::Compose("la machine interne n'est pas alternante".into()))?;

        let mut index: BTreeMap<(StateIndex, StateIndex), StateIndex> = BTreeMap::new();
        let mut queue: VecDeque<(StateIndex, StateIndex)> = VecDeque::new();
        let mut pairs: Vec<(StateIndex, StateIndex)> = Vec::new();
        index.insert((0, 0), 0);
        pairs.push((0, 0));
        queue.push_back((0, 0));

        let mut transitions: Vec<Vec<MachineTransition>> = Vec::new();
        let mut intern = |index: &mut BTreeMap<(StateIndex, StateIndex), StateIndex>,
                          pairs: &mut Vec<(StateIndex, StateIndex)>,
                          queue: &mut VecDeque<(StateIndex, StateIndex)>,
                          pair: (StateIndex, StateIndex)| {
            *index.entry(pair).or_insert_with(|| {
                pairs.push(pair);
                queue.push_back(pair);
                pairs.len() - 1
            })
        };

        while let Some((s1, s2)) = queue.pop_front() {
            let inner_state = &inner.states[s2];
            let mut trans = Vec::new();
            if !inner_state.is_wait() && !inner_state.trans.is_empty() {
                // la machine interne avance seule, en silence côté entrée
                for t2 in &inner_state.trans {
                    let dest = intern(&mut index, &mut pairs, &mut queue, (s1, t2.dest));
                    trans.push(MachineTransition::new(None, t2.output, dest));
                }
            } else {
                for t1 in &self.states[s1].trans {
                    match t1.output {
                        None => {
                            let dest = intern(&mut index, &mut pairs, &mut queue, (t1.dest, s2));
                            trans.push(MachineTransition::new(t1.input, None, dest));
                        }
                        Some(x) => {
                            for t2 in inner_state.trans.iter().filter(|t2| t2.input == Some(x)) {
                                let dest =
                                    intern(&mut index, &mut pairs, &mut queue, (t1.dest, t2.dest));
                                trans.push(MachineTransition::new(t1.input, t2.output, dest));
                            }
                        }
                    }
                }
            }
            transitions.push(trans);
        }

        let mut machine = Machine::new(inner.len);
        for (i, &(s1, s2)) in pairs.iter().enumerate() {
            let o = &self.states[s1];
            let inn = &inner.states[s2];
            let kind = if inn.kind == StateKind::End {
                StateKind::End
            } else {
                StateKind::Code
            };
            let mut st = MachineState::new(format!("{}~{}", o.name, inn.name), kind, inn.left.clone());
            st.right = inn.right.clone();
            st.trans = transitions[i].clone();
            machine.states.push(st);
        }
        machine.verify_waiting()?;
        Ok(machine)
    }

    /// Variante retardée: les contextes sont scindés en deux moitiés et
    /// l'émission est différée de L/2 pas. Requiert une longueur paire et
    /// les deux cadrages.
    pub fn delayed(&self) -> Result<Machine> {
        let l = self.len as usize;
        if l % 2 != 0 {
            return Err(BrinError::DelayUnsupported { len: self.len });
        }
        let half = l / 2;
        let end_old = self
            .states
            .iter()
            .position(|s| s.kind == StateKind::End)
            .ok_or(BrinError::DelayUnsupported { len: self.len })?;
        if !matches!(self.states[0].kind, StateKind::Start(_)) {
            return Err(BrinError::DelayUnsupported { len: self.len });
        }
        if end_old != self.n_states() - 1 {
            return Err(BrinError::BadMachine(
                "l'état final doit être le dernier".into(),
            ));
        }
        // l'état du mot de fin est l'unique prédécesseur silencieux de End
        let end_word = self
            .states
            .iter()
            .position(|s| {
                s.trans.len() == 1
                    && s.trans[0].dest == end_old
                    && s.trans[0].input.is_none()
                    && s.trans[0].output.is_none()
            })
            .ok_or_else(|| BrinError::BadMachine("pas de mot de fin devant l'état final".into()))?;

        let ctx_w: Vec<char> = self.states[end_word].left.chars().collect();
        if ctx_w.iter().any(|&c| c == '*') {
            return Err(BrinError::BadMachine(
                "contexte du mot de fin incomplet".into(),
            ));
        }
        let n_drain = half - 1;
        let new_end = end_old + n_drain;
        let map_dest = |d: StateIndex| if d >= end_old { d + n_drain } else { d };

        let deferred_out = |dest: StateIndex| -> Option<Sym> {
            let dctx: Vec<char> = self.states[dest].left.chars().collect();
            let c = dctx[half - 1];
            if c == '*' {
                None
            } else {
                Some(Sym::Base(char_to_base(c).expect("contexte nucléotidique")))
            }
        };

        let mut machine = Machine::new(self.len);
        for (idx, st) in self.states.iter().enumerate().take(end_old) {
            let ctx: Vec<char> = st.left.chars().collect();
            let left: String = ctx[..half].iter().collect();
            let right: String = ctx[half..].iter().collect();
            let mut ns = MachineState::new(st.name.clone(), st.kind, left);
            ns.right = Some(right);
            if idx == end_word {
                // remplace la sortie silencieuse par la chaîne de vidage
                let first_dest = if n_drain > 0 { end_old } else { new_end };
                ns.trans.push(MachineTransition::new(
                    None,
                    Some(Sym::Base(char_to_base(ctx_w[half]).expect("nucléotide"))),
                    first_dest,
                ));
            } else {
                for t in &st.trans {
                    let output = match t.output {
                        Some(Sym::Base(_)) => deferred_out(t.dest),
                        other => other,
                    };
                    ns.trans
                        .push(MachineTransition::new(t.input, output, map_dest(t.dest)));
                }
            }
            machine.states.push(ns);
        }

        // états de vidage: fenêtre glissante sur le mot de fin
        for j in 1..=n_drain {
            let full: Vec<char> = ctx_w[j..]
                .iter()
                .copied()
                .chain(std::iter::repeat('*').take(j))
                .collect();
            let left: String = full[..half].iter().collect();
            let right: String = full[half..].iter().collect();
            let mut ns = MachineState::new(
                format!("drain{}", j),
                StateKind::Drain(j as u16),
                left,
            );
            ns.right = Some(right);
            let next = if j == n_drain { new_end } else { end_old + j };
            let emit = ctx_w[half + j];
            ns.trans.push(MachineTransition::new(
                None,
                Some(Sym::Base(char_to_base(emit).expect("nucléotide"))),
                next,
            ));
            machine.states.push(ns);
        }

        // état final: moitié droite en jokers
        let mut end_state = MachineState::new(
            "end".into(),
            StateKind::End,
            ctx_w[half..].iter().collect(),
        );
        end_state.right = Some("*".repeat(half));
        machine.states.push(end_state);

        machine.validate()?;
        Ok(machine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sym_mnemonic_roundtrip() {
        let syms = [
            Sym::Base(0),
            Sym::Base(3),
            Sym::Bit0,
            Sym::Bit1,
            Sym::StrictBit0,
            Sym::StrictBit1,
            Sym::Trit(2),
            Sym::Quat(3),
            Sym::Flush,
            Sym::Sof,
            Sym::Eof,
            Sym::Control(0),
            Sym::Control(5),
        ];
        for sym in syms {
            assert_eq!(Sym::parse(&sym.mnemonic()).unwrap(), sym);
        }
    }

    #[test]
    fn test_control_chars_avoid_reserved() {
        for c in CONTROL_CHARS.chars() {
            assert!(!"ACGT01<>!".contains(c), "{}", c);
        }
    }

    #[test]
    fn test_state_kind_from_name() {
        assert_eq!(StateKind::from_name("end"), StateKind::End);
        assert_eq!(StateKind::from_name("start3"), StateKind::Start(3));
        assert_eq!(StateKind::from_name("drain2"), StateKind::Drain(2));
        assert_eq!(StateKind::from_name("src:ACGT"), StateKind::Source);
        assert_eq!(StateKind::from_name("ctl1:ACGT"), StateKind::Control(1));
        assert_eq!(
            StateKind::from_name("pad0.3:ACGT"),
            StateKind::Bridge { control: 0, step: 3 }
        );
        assert_eq!(StateKind::from_name("ACGT.1"), StateKind::Split(1));
        assert_eq!(StateKind::from_name("ACGT"), StateKind::Code);
    }

    fn tiny_machine() -> Machine {
        // deux états: 0 attend un bit et émet, 1 émet en silence et revient
        let mut m = Machine::new(1);
        let mut s0 = MachineState::new("A".into(), StateKind::Code, "A".into());
        s0.trans
            .push(MachineTransition::new(Some(Sym::Bit0), Some(Sym::Base(0)), 0));
        s0.trans
            .push(MachineTransition::new(Some(Sym::Bit1), Some(Sym::Base(3)), 1));
        let mut s1 = MachineState::new("C".into(), StateKind::Code, "C".into());
        s1.trans
            .push(MachineTransition::new(None, Some(Sym::Base(0)), 0));
        m.states.push(s0);
        m.states.push(s1);
        m
    }

    #[test]
    fn test_waiting_and_validation() {
        let m = tiny_machine();
        m.verify_waiting().unwrap();
        m.verify_silent_acyclic().unwrap();
        let mut bad = m.clone();
        bad.states[0]
            .trans
            .push(MachineTransition::new(None, Some(Sym::Base(1)), 0));
        assert!(bad.verify_waiting().is_err());
    }

    #[test]
    fn test_silent_cycle_detected() {
        let mut m = Machine::new(1);
        let mut s0 = MachineState::new("a".into(), StateKind::Code, "*".into());
        s0.trans.push(MachineTransition::new(None, None, 1));
        let mut s1 = MachineState::new("b".into(), StateKind::Code, "*".into());
        s1.trans.push(MachineTransition::new(None, None, 0));
        m.states.push(s0);
        m.states.push(s1);
        assert!(matches!(
            m.verify_silent_acyclic(),
            Err(BrinError::SilentCycle { .. })
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let m = tiny_machine();
        let mut buf = Vec::new();
        m.write_json(&mut buf).unwrap();
        let back = Machine::read_json(&mut buf.as_slice()).unwrap();
        assert_eq!(m.len, back.len);
        assert_eq!(m.states.len(), back.states.len());
        for (a, b) in m.states.iter().zip(&back.states) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.left, b.left);
            assert_eq!(a.trans, b.trans);
        }
    }

    #[test]
    fn test_expected_bases_per_bit_simple() {
        // chaque bit émet exactement une base dans la machine jouet, puis
        // éventuellement une base silencieuse de plus après bit1
        let m = tiny_machine();
        let rate = m.expected_bases_per_bit().unwrap();
        assert!(rate > 1.0 && rate < 2.0, "{}", rate);
    }

    #[test]
    fn test_compose_identity_bits() {
        // machine externe identité: chaque bit est réémis tel quel
        let mut outer = Machine::new(1);
        let mut s = MachineState::new("id".into(), StateKind::Code, "*".into());
        s.trans
            .push(MachineTransition::new(Some(Sym::Bit0), Some(Sym::Bit0), 0));
        s.trans
            .push(MachineTransition::new(Some(Sym::Bit1), Some(Sym::Bit1), 0));
        outer.states.push(s);

        let inner = tiny_machine();
        let composed = outer.compose(&inner).unwrap();
        composed.verify_waiting().unwrap();
        // la composée doit accepter les mêmes bits et produire de l'ADN
        assert!(composed.is_dna_output());
        let t = composed.states[0].trans_for(Sym::Bit1).unwrap();
        assert_eq!(t.output, Some(Sym::Base(3)));
    }
}
