//! Planification des mots de contrôle
//!
//! Un mot de contrôle est un k-mer réservé comme méta-symbole: son
//! apparition dans l'ADN émis signale un événement de cadrage ou
//! d'échappement. Le choix procède par recherche en profondeur avec retour
//! arrière: chaque candidat est engagé à titre d'essai comme motif source,
//! son complément inverse est invalidé, puis on vérifie que lui-même et
//! tous les mots déjà engagés restent atteignables depuis chaque état
//! vivant en un nombre borné de pas.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::error::{BrinError, Result};
use crate::graph::KmerGraph;
use crate::kmer::{
    kmer_hamming_distance, kmer_rev_comp, kmer_string, Kmer, KmerLen, Pos,
};
use crate::pattern::ends_with_motif;

/// Borne par défaut sur la longueur des chemins de pont.
pub const DEFAULT_MAX_STEPS: u32 = 64;

/// Résultat de la planification: mots engagés, longueurs de chemin,
/// chemins de pont et états intermédiaires à matérialiser.
pub struct ControlPlan {
    /// Mots de contrôle, dans l'ordre d'engagement.
    pub words: Vec<Kmer>,
    /// Nombre de pas du pont vers chaque mot.
    pub steps: Vec<Pos>,
    /// Pour chaque mot, le chemin exact depuis chaque k-mer vivant,
    /// du premier intermédiaire jusqu'au mot lui-même.
    pub paths: Vec<BTreeMap<Kmer, Vec<Kmer>>>,
    /// Pour chaque mot, les k-mers à matérialiser en états de pont,
    /// par pas (le dernier pas, le mot lui-même, est omis).
    pub intermediates: Vec<Vec<BTreeSet<Kmer>>>,
}

/// Nombre de pas pour que `motif` soit atteignable depuis *tous* les
/// k-mers vivants par un chemin d'exactement ce nombre d'arêtes.
///
/// La frontière remonte les arêtes entrantes; un k-mer de la frontière qui
/// se termine par un motif source, ou par le motif cible, n'est jamais
/// développé sauf au pas 0 (variante excluante).
pub fn steps_to_reach(g: &KmerGraph, motif: KmerLen, max_steps: u32) -> Option<Pos> {
    let mut motif_set = BTreeSet::new();
    motif_set.insert(motif);
    let mut nbr: BTreeSet<Kmer> = g.kmers_ending_with(motif);
    for steps in 0..max_steps {
        if nbr.len() == g.kmers().len() {
            return Some(steps);
        }
        let mut prev = BTreeSet::new();
        for &kmer in &nbr {
            if steps == 0
                || !(ends_with_motif(kmer, g.len, &g.source_motif)
                    || ends_with_motif(kmer, g.len, &motif_set))
            {
                for p in g.get_incoming(kmer) {
                    if g.is_valid(p) {
                        prev.insert(p);
                    }
                }
            }
        }
        nbr = prev;
    }
    None
}

/// Chemin d'exactement `steps` arêtes de chaque k-mer vivant vers `dest`,
/// stocké du premier intermédiaire jusqu'à `dest`. Les nœuds intérieurs ne
/// peuvent être ni des motifs source ni `dest` lui-même.
pub fn paths_to(g: &KmerGraph, dest: Kmer, steps: Pos) -> BTreeMap<Kmer, Vec<Kmer>> {
    let mut path_from: BTreeMap<Kmer, Vec<Kmer>> = BTreeMap::new();
    path_from.insert(dest, Vec::new());
    for step in (0..steps).rev() {
        let mut longer: BTreeMap<Kmer, Vec<Kmer>> = BTreeMap::new();
        for (&inter, suffix) in &path_from {
            for src in g.get_incoming(inter) {
                if g.is_valid(src)
                    && (step == 0
                        || !(ends_with_motif(src, g.len, &g.source_motif) || src == dest))
                {
                    let mut path = Vec::with_capacity(suffix.len() + 1);
                    path.push(inter);
                    path.extend_from_slice(suffix);
                    longer.insert(src, path);
                }
            }
        }
        path_from = longer;
    }
    path_from
}

/// Recherche `n` mots de contrôle. Le graphe est engagé en sortie (motifs
/// source ajoutés, compléments inverses invalidés, graphe ré-élagué).
pub fn plan_control_words(g: &mut KmerGraph, n: usize, max_steps: u32) -> Result<Vec<Kmer>> {
    let mut words = Vec::new();
    if n > 0 {
        if !next_control_word(g, n, max_steps, &mut words) {
            return Err(BrinError::ControlWordsExhausted {
                requested: n,
                placed: words.len(),
            });
        }
    }
    g.prune_dead_ends();
    g.prune_unreachable();
    Ok(words)
}

fn next_control_word(
    g: &mut KmerGraph,
    n: usize,
    max_steps: u32,
    words: &mut Vec<Kmer>,
) -> bool {
    if words.len() == n {
        return true;
    }
    info!(
        "Recherche du mot de contrôle #{}{}",
        words.len() + 1,
        if words.is_empty() {
            String::new()
        } else {
            format!(
                " (précédents: {})",
                words
                    .iter()
                    .map(|&w| kmer_string(w, g.len))
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        }
    );

    // Score des candidats: distance de Hamming minimale aux mots déjà
    // choisis et à leurs compléments inverses; le tout premier vaut L.
    let cand: Vec<Kmer> = g.kmers().to_vec();
    let mut dist: Vec<Pos> = vec![g.len; cand.len()];
    for (k, &c) in cand.iter().enumerate() {
        for &cw in words.iter() {
            dist[k] = dist[k]
                .min(kmer_hamming_distance(c, cw, g.len))
                .min(kmer_hamming_distance(c, kmer_rev_comp(cw, g.len), g.len));
        }
    }
    let mut order: Vec<usize> = (0..cand.len()).collect();
    order.sort_by_key(|&i| dist[i]);

    while let Some(best_idx) = order.pop() {
        if dist[best_idx] == 0 {
            continue;
        }
        let best = cand[best_idx];
        if !g.is_valid(best) {
            continue;
        }
        let best_motif = KmerLen::new(best, g.len);
        let Some(steps) = steps_to_reach(g, best_motif, max_steps) else {
            debug!(
                "Rejette {} pour le mot de contrôle #{}: inatteignable",
                best_motif,
                words.len() + 1
            );
            continue;
        };
        let best_rev_comp = kmer_rev_comp(best, g.len);
        if best_rev_comp == best {
            debug!(
                "Rejette {} pour le mot de contrôle #{}: palindromique",
                best_motif,
                words.len() + 1
            );
            continue;
        }
        info!(
            "Essaie le mot de contrôle {} atteignable en {} pas{}",
            best_motif,
            steps,
            if words.is_empty() {
                String::new()
            } else {
                format!(" et à {}+ différences des précédents", dist[best_idx])
            }
        );

        let snap = g.snapshot();
        g.source_motif.insert(best_motif);
        if g.is_valid(best_rev_comp) {
            g.invalidate(best_rev_comp);
        }
        g.prune_dead_ends();
        g.prune_unreachable();

        let mut broken = false;
        if steps_to_reach(g, best_motif, max_steps).is_none() {
            debug!(
                "Échec: {} devient inatteignable quand son complément inverse {} est exclu",
                best_motif,
                kmer_string(best_rev_comp, g.len)
            );
            broken = true;
        }
        for &prev in words.iter() {
            if broken {
                break;
            }
            let prev_motif = KmerLen::new(prev, g.len);
            if steps_to_reach(g, prev_motif, max_steps).is_none() {
                debug!(
                    "Échec: engager {} casse les chemins vers le mot précédent {}",
                    best_motif, prev_motif
                );
                broken = true;
            }
        }

        if !broken {
            words.push(best);
            if next_control_word(g, n, max_steps, words) {
                return true;
            }
            words.pop();
        }

        // candidat inutilisable: restaure l'état antérieur et continue
        g.restore(snap);
        debug!(
            "Essaie l'option suivante pour le mot de contrôle #{}",
            words.len() + 1
        );
    }
    false
}

impl ControlPlan {
    /// Calcule ponts et intermédiaires pour des mots déjà engagés, sur le
    /// graphe final (après élimination des arêtes dégénérées).
    pub fn compute(g: &KmerGraph, words: &[Kmer], max_steps: u32) -> Result<Self> {
        let mut plan = ControlPlan {
            words: words.to_vec(),
            steps: Vec::new(),
            paths: Vec::new(),
            intermediates: Vec::new(),
        };
        for (c, &word) in words.iter().enumerate() {
            let motif = KmerLen::new(word, g.len);
            let steps = steps_to_reach(g, motif, max_steps).ok_or_else(|| {
                BrinError::ControlWordUnreachable {
                    index: c,
                    word: kmer_string(word, g.len),
                }
            })?;
            let paths = paths_to(g, word, steps);
            for &kmer in g.kmers() {
                if !paths.contains_key(&kmer) {
                    return Err(BrinError::ControlWordUnreachable {
                        index: c,
                        word: kmer_string(word, g.len),
                    });
                }
            }
            let mut inters: Vec<BTreeSet<Kmer>> = vec![BTreeSet::new(); steps as usize];
            for path in paths.values() {
                for (step, &inter) in path.iter().enumerate() {
                    inters[step].insert(inter);
                }
            }
            // le dernier pas est le mot lui-même, déjà un état du graphe
            inters.pop();
            let n_inter: usize = inters.iter().map(|s| s.len()).sum();
            info!(
                "Le mot de contrôle {} requiert {} états intermédiaires",
                kmer_string(word, g.len),
                n_inter
            );
            plan.steps.push(steps);
            plan.paths.push(paths);
            plan.intermediates.push(inters);
        }
        Ok(plan)
    }

    /// K-mer suivant sur le pont `c` depuis `src`, au pas `step` (indexé
    /// sur la destination).
    pub fn next_intermediate(
        &self,
        g: &KmerGraph,
        src: Kmer,
        c: usize,
        step: usize,
    ) -> Result<Kmer> {
        let last = self.steps[c] as usize - 1;
        for dest in g.get_outgoing(src) {
            if (step == last && dest == self.words[c])
                || (step < last && self.intermediates[c][step].contains(&dest))
            {
                return Ok(dest);
            }
        }
        Err(BrinError::BridgeBroken {
            from: kmer_string(src, g.len),
            step,
            index: c,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pruned_graph(len: Pos) -> KmerGraph {
        let mut g = KmerGraph::new(len).unwrap();
        g.find_candidates();
        g.prune_dead_ends();
        g.prune_unreachable();
        g
    }

    #[test]
    fn test_steps_to_reach_excluding_variant() {
        // Sur le graphe complet (aucun filtre, L = 2), tout 2-mer est
        // atteignable; la variante excluante ne développe pas les sources
        // intérieures. On pose un motif source étranger et on vérifie que
        // les chemins le contournent.
        let mut g = KmerGraph::new(2).unwrap();
        for kmer in 0..=g.max_kmer {
            g.valid[kmer as usize] = true;
            g.kmers.push(kmer);
        }
        let target = KmerLen::new(crate::kmer::string_to_kmer("AC").unwrap(), 2);
        let unrestricted = steps_to_reach(&g, target, DEFAULT_MAX_STEPS).unwrap();
        g.add_source_motif("GA").unwrap();
        let restricted = steps_to_reach(&g, target, DEFAULT_MAX_STEPS);
        // Les chemins existent toujours, mais ne traversent jamais GA:
        // la longueur uniforme ne peut que croître ou rester égale.
        assert!(restricted.is_some());
        assert!(restricted.unwrap() >= unrestricted);
    }

    #[test]
    fn test_paths_have_exact_length() {
        let mut g = pruned_graph(6);
        let words = plan_control_words(&mut g, 1, DEFAULT_MAX_STEPS).unwrap();
        g.build_edges();
        let plan = ControlPlan::compute(&g, &words, DEFAULT_MAX_STEPS).unwrap();
        let steps = plan.steps[0] as usize;
        for (&src, path) in &plan.paths[0] {
            assert_eq!(path.len(), steps, "depuis {}", g.render(src));
            assert_eq!(*path.last().unwrap(), words[0]);
            // chaque maillon est bien un décalage du précédent
            let mut prev = src;
            for &next in path {
                assert!(g.get_outgoing(prev).contains(&next));
                prev = next;
            }
        }
    }

    #[test]
    fn test_control_word_not_palindromic_and_revcomp_dead() {
        let mut g = pruned_graph(6);
        let words = plan_control_words(&mut g, 2, DEFAULT_MAX_STEPS).unwrap();
        assert_eq!(words.len(), 2);
        for &w in &words {
            let rc = kmer_rev_comp(w, g.len);
            assert_ne!(rc, w);
            assert!(!g.is_valid(rc));
            assert!(g.is_valid(w));
        }
        assert_ne!(words[0], words[1]);
    }

    #[test]
    fn test_every_kmer_reaches_every_control_word() {
        let mut g = pruned_graph(6);
        let words = plan_control_words(&mut g, 2, DEFAULT_MAX_STEPS).unwrap();
        g.build_edges();
        let plan = ControlPlan::compute(&g, &words, DEFAULT_MAX_STEPS).unwrap();
        for c in 0..words.len() {
            for &kmer in g.kmers() {
                assert!(
                    plan.paths[c].contains_key(&kmer),
                    "{} n'atteint pas le mot #{}",
                    g.render(kmer),
                    c
                );
            }
        }
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        // Sur un graphe minuscule, demander un nombre absurde de mots
        // épuise l'arbre de recherche.
        let mut g = pruned_graph(2);
        let err = plan_control_words(&mut g, 20, DEFAULT_MAX_STEPS).unwrap_err();
        match err {
            BrinError::ControlWordsExhausted { requested, .. } => assert_eq!(requested, 20),
            other => panic!("erreur inattendue: {other}"),
        }
    }
}
