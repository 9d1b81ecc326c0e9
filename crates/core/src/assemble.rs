//! Assemblage du transducteur depuis le graphe contraint
//!
//! Chaque k-mer vivant devient un état codant; les degrés sortants 3 et 4
//! reçoivent des états auxiliaires de répartition; les ponts vers les mots
//! de contrôle deviennent des chaînes d'états déterministes; les cadrages
//! de début et de fin ajoutent la chaîne de chargement et l'état final.
//! L'ordre des index garantit que toute transition sans sortie va d'un
//! index inférieur vers un index supérieur.

use std::collections::BTreeMap;

use tracing::info;

use crate::controls::{plan_control_words, ControlPlan, DEFAULT_MAX_STEPS};
use crate::error::{BrinError, Result};
use crate::graph::KmerGraph;
use crate::kmer::{get_base, Base, Kmer, Pos};
use crate::machine::{Machine, MachineState, MachineTransition, StateKind, Sym};
use crate::pattern::ends_with_motif;

/// Paramètres de construction de bout en bout.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Longueur des k-mers (1..=31).
    pub len: Pos,
    /// Longueur maximale des répétitions en tandem; défaut: len / 2.
    pub max_tandem: Option<Pos>,
    /// Longueur des répétitions inversées distantes (0 = désactivé).
    pub inverted_repeat_len: Pos,
    /// Motifs exclus (chaînes de nucléotides).
    pub excluded: Vec<String>,
    /// Motifs source supplémentaires.
    pub sources: Vec<String>,
    /// Nombre de symboles de contrôle utilisateur.
    pub n_controls: usize,
    /// Cadrage de début (chaîne de chargement émettant le mot de début).
    pub start_frame: bool,
    /// Cadrage de fin (transitions EOF vers l'état final).
    pub end_frame: bool,
    /// Variante retardée (contextes scindés, émission différée).
    pub delay: bool,
    /// Conserve les arêtes dégénérées par transition.
    pub keep_degenerates: bool,
    /// Borne sur la longueur des ponts.
    pub max_steps: u32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            len: 12,
            max_tandem: None,
            inverted_repeat_len: 0,
            excluded: Vec::new(),
            sources: Vec::new(),
            n_controls: 4,
            start_frame: true,
            end_frame: true,
            delay: false,
            keep_degenerates: false,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

/// Affectation des mots planifiés aux rôles: les `n_user` premiers portent
/// les symboles de contrôle, puis le mot de fin, puis le mot de début.
#[derive(Debug, Clone, Copy)]
pub struct ControlLayout {
    pub n_user: usize,
    pub end_index: Option<usize>,
    pub start_index: Option<usize>,
}

impl ControlLayout {
    pub fn new(n_user: usize, end_frame: bool, start_frame: bool) -> Self {
        let end_index = end_frame.then_some(n_user);
        let start_index = start_frame.then_some(n_user + usize::from(end_frame));
        Self {
            n_user,
            end_index,
            start_index,
        }
    }

    pub fn total(&self) -> usize {
        self.n_user + usize::from(self.end_index.is_some()) + usize::from(self.start_index.is_some())
    }

    /// Symbole d'entrée associé au mot `c`, s'il en a un.
    fn symbol(&self, c: usize) -> Option<Sym> {
        if c < self.n_user {
            Some(Sym::Control(c as u8))
        } else if Some(c) == self.end_index {
            Some(Sym::Eof)
        } else {
            None
        }
    }
}

/// Construit la machine complète depuis la configuration.
pub fn build_machine(cfg: &BuildConfig) -> Result<Machine> {
    if cfg.delay && (cfg.len % 2 != 0 || !cfg.start_frame || !cfg.end_frame) {
        return Err(BrinError::DelayUnsupported { len: cfg.len });
    }
    let mut g = KmerGraph::new(cfg.len)?;
    g.max_tandem_repeat_len = cfg.max_tandem.unwrap_or(cfg.len / 2);
    g.inverted_repeat_len = cfg.inverted_repeat_len;
    g.keep_degenerates = cfg.keep_degenerates;
    for motif in &cfg.excluded {
        g.add_excluded_motif(motif)?;
    }
    for motif in &cfg.sources {
        g.add_source_motif(motif)?;
    }

    g.find_candidates();
    if g.kmers().is_empty() {
        return Err(BrinError::EmptyGraph { len: cfg.len });
    }
    g.prune_dead_ends();
    g.prune_unreachable();
    if g.kmers().is_empty() {
        return Err(BrinError::EmptyGraph { len: cfg.len });
    }

    let layout = ControlLayout::new(cfg.n_controls, cfg.end_frame, cfg.start_frame);
    let words = plan_control_words(&mut g, layout.total(), cfg.max_steps)?;
    g.build_edges();
    g.check_consistency()?;
    let plan = ControlPlan::compute(&g, &words, cfg.max_steps)?;

    let machine = assemble(&g, &plan, &layout)?;
    machine.validate()?;
    info!(
        "Machine assemblée: {} états, {} mots de contrôle",
        machine.n_states(),
        plan.words.len()
    );
    if cfg.delay {
        let delayed = machine.delayed()?;
        info!("Variante retardée: {} états", delayed.n_states());
        Ok(delayed)
    } else {
        Ok(machine)
    }
}

/// Assemble la machine (non retardée) depuis un graphe gelé et son plan.
pub fn assemble(g: &KmerGraph, plan: &ControlPlan, layout: &ControlLayout) -> Result<Machine> {
    let l = g.len as usize;
    let start_word = layout.start_index.map(|i| plan.words[i]);
    let end_word = layout.end_index.map(|i| plan.words[i]);

    // ---- affectation des index ----
    let mut next = 0usize;
    let chain_base = next;
    if start_word.is_some() {
        next += l;
    }
    let mut code_index: BTreeMap<Kmer, usize> = BTreeMap::new();
    for &kmer in g.kmers() {
        code_index.insert(kmer, next);
        next += 1;
    }
    let mut split_zero: BTreeMap<Kmer, usize> = BTreeMap::new();
    let mut split_one: BTreeMap<Kmer, usize> = BTreeMap::new();
    for &kmer in g.kmers() {
        if Some(kmer) == end_word {
            continue;
        }
        let d = g.out_flags(kmer).count_ones();
        if d > 2 {
            split_zero.insert(kmer, next);
            next += 1;
        }
        if d > 3 {
            split_one.insert(kmer, next);
            next += 1;
        }
    }
    // les ponts du mot de début ne sont jamais matérialisés
    let bridged: Vec<usize> = (0..plan.words.len())
        .filter(|&c| Some(c) != layout.start_index)
        .collect();
    let mut bridge_index: BTreeMap<(usize, usize, Kmer), usize> = BTreeMap::new();
    for &c in &bridged {
        for (step, kmers) in plan.intermediates[c].iter().enumerate() {
            for &kmer in kmers {
                bridge_index.insert((c, step, kmer), next);
                next += 1;
            }
        }
    }
    let end_state = end_word.map(|_| {
        let s = next;
        next += 1;
        s
    });

    let control_dest = |c: usize, step: usize, dest_kmer: Kmer| -> Result<usize> {
        let last = plan.steps[c] as usize - 1;
        if step == last && dest_kmer == plan.words[c] {
            Ok(code_index[&dest_kmer])
        } else {
            bridge_index
                .get(&(c, step, dest_kmer))
                .copied()
                .ok_or_else(|| BrinError::BridgeBroken {
                    from: g.render(dest_kmer),
                    step,
                    index: c,
                })
        }
    };

    let placeholder = MachineState::new(String::new(), StateKind::Code, String::new());
    let mut states = vec![placeholder; next];

    // ---- chaîne de chargement ----
    if let Some(word) = start_word {
        let w = g.render(word);
        let wb: Vec<char> = w.chars().collect();
        for i in 0..l {
            let mut left = "*".repeat(l - i);
            left.push_str(&w[..i]);
            let mut st = MachineState::new(format!("start{}", i), StateKind::Start(i as u16), left);
            let dest = if i + 1 < l {
                chain_base + i + 1
            } else {
                code_index[&word]
            };
            let input = (i == 0).then_some(Sym::Sof);
            let base = crate::kmer::char_to_base(wb[i])?;
            st.trans
                .push(MachineTransition::new(input, Some(Sym::Base(base)), dest));
            states[chain_base + i] = st;
        }
    }

    // ---- états codants et répartitions ----
    let mut rotation = [0usize; 5];
    for &kmer in g.kmers() {
        let s = code_index[&kmer];
        let rendered = g.render(kmer);
        let kind = if ends_with_motif(kmer, g.len, &g.source_motif) {
            match plan.words.iter().position(|&w| w == kmer) {
                Some(c) => StateKind::Control(c as u8),
                None => StateKind::Source,
            }
        } else {
            StateKind::Code
        };
        let name = match kind {
            StateKind::Control(c) => format!("ctl{}:{}", c, rendered),
            StateKind::Source => format!("src:{}", rendered),
            _ => rendered.clone(),
        };
        let mut st = MachineState::new(name, kind, rendered.clone());

        if Some(kmer) == end_word {
            // le mot de fin est terminal: il bascule en silence vers l'état final
            st.trans.push(MachineTransition::new(
                None,
                None,
                end_state.expect("cadrage de fin"),
            ));
            states[s] = st;
            continue;
        }

        let flags = g.out_flags(kmer);
        let out = g.get_outgoing(kmer);
        let mut out_base: Vec<Base> = Vec::new();
        let mut out_state: Vec<usize> = Vec::new();
        for (n, &dest) in out.iter().enumerate() {
            if flags & (1 << n) != 0 {
                out_base.push(n as Base);
                out_state.push(code_index[&dest]);
            }
        }
        let d = out_base.len();

        // rotation des permutations de sortie pour casser les suites
        // d'émissions identiques sous charge biaisée
        if d >= 2 {
            let rot = rotation[d] % d;
            rotation[d] += 1;
            out_base.rotate_left(rot);
            out_state.rotate_left(rot);
        }

        match d {
            0 => {}
            1 => st.trans.push(MachineTransition::new(
                None,
                Some(Sym::Base(out_base[0])),
                out_state[0],
            )),
            2 => {
                st.trans.push(MachineTransition::new(
                    Some(Sym::Bit0),
                    Some(Sym::Base(out_base[0])),
                    out_state[0],
                ));
                st.trans.push(MachineTransition::new(
                    Some(Sym::Bit1),
                    Some(Sym::Base(out_base[1])),
                    out_state[1],
                ));
                st.trans.push(MachineTransition::new(
                    Some(Sym::StrictBit0),
                    Some(Sym::Base(out_base[0])),
                    out_state[0],
                ));
                st.trans.push(MachineTransition::new(
                    Some(Sym::StrictBit1),
                    Some(Sym::Base(out_base[1])),
                    out_state[1],
                ));
            }
            3 => {
                let s0 = split_zero[&kmer];
                st.trans
                    .push(MachineTransition::new(Some(Sym::Bit0), None, s0));
                st.trans.push(MachineTransition::new(
                    Some(Sym::Bit1),
                    Some(Sym::Base(out_base[2])),
                    out_state[2],
                ));
                for i in 0..3 {
                    st.trans.push(MachineTransition::new(
                        Some(Sym::Trit(i as u8)),
                        Some(Sym::Base(out_base[i])),
                        out_state[i],
                    ));
                }
                let mut sz =
                    MachineState::new(format!("{}.0", rendered), StateKind::Split(0), rendered.clone());
                for i in 0..2 {
                    sz.trans.push(MachineTransition::new(
                        Some(if i == 0 { Sym::Bit0 } else { Sym::Bit1 }),
                        Some(Sym::Base(out_base[i])),
                        out_state[i],
                    ));
                }
                sz.trans.push(MachineTransition::new(
                    Some(Sym::Flush),
                    Some(Sym::Base(out_base[0])),
                    out_state[0],
                ));
                states[s0] = sz;
            }
            4 => {
                let s0 = split_zero[&kmer];
                let s1 = split_one[&kmer];
                st.trans
                    .push(MachineTransition::new(Some(Sym::Bit0), None, s0));
                st.trans
                    .push(MachineTransition::new(Some(Sym::Bit1), None, s1));
                for i in 0..4 {
                    st.trans.push(MachineTransition::new(
                        Some(Sym::Quat(i as u8)),
                        Some(Sym::Base(out_base[i])),
                        out_state[i],
                    ));
                }
                for (sub, split_state) in [(0usize, s0), (1usize, s1)] {
                    let mut sp = MachineState::new(
                        format!("{}.{}", rendered, sub),
                        StateKind::Split(sub as u8),
                        rendered.clone(),
                    );
                    for i in 0..2 {
                        sp.trans.push(MachineTransition::new(
                            Some(if i == 0 { Sym::Bit0 } else { Sym::Bit1 }),
                            Some(Sym::Base(out_base[2 * sub + i])),
                            out_state[2 * sub + i],
                        ));
                    }
                    sp.trans.push(MachineTransition::new(
                        Some(Sym::Flush),
                        Some(Sym::Base(out_base[2 * sub])),
                        out_state[2 * sub],
                    ));
                    states[split_state] = sp;
                }
            }
            _ => unreachable!("degré sortant > 4"),
        }

        // transitions de contrôle et d'EOF depuis les états codants de
        // degré sortant >= 2
        if d >= 2 {
            for &c in &bridged {
                let Some(sym) = layout.symbol(c) else { continue };
                let path = &plan.paths[c][&kmer];
                let first = path[0];
                let dest = control_dest(c, 0, first)?;
                st.trans.push(MachineTransition::new(
                    Some(sym),
                    Some(Sym::Base(get_base(first, 1))),
                    dest,
                ));
            }
        }
        states[s] = st;
    }

    // ---- états de pont ----
    for &c in &bridged {
        for (step, kmers) in plan.intermediates[c].iter().enumerate() {
            for &kmer in kmers {
                let s = bridge_index[&(c, step, kmer)];
                let dest_kmer = plan.next_intermediate(g, kmer, c, step + 1)?;
                let dest = control_dest(c, step + 1, dest_kmer)?;
                let mut st = MachineState::new(
                    format!("pad{}.{}:{}", c, step, g.render(kmer)),
                    StateKind::Bridge {
                        control: c as u8,
                        step: step as u16,
                    },
                    g.render(kmer),
                );
                st.trans.push(MachineTransition::new(
                    None,
                    Some(Sym::Base(get_base(dest_kmer, 1))),
                    dest,
                ));
                states[s] = st;
            }
        }
    }

    // ---- état final ----
    if let (Some(s), Some(word)) = (end_state, end_word) {
        states[s] = MachineState::new("end".into(), StateKind::End, g.render(word));
    }

    Ok(Machine {
        len: g.len,
        states,
    })
}
