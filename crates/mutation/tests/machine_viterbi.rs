//! Décodage de Viterbi contre une machine construite de bout en bout
//!
//! Une lecture propre restitue la charge utile; une substitution isolée
//! coûte exactement le rapport des probabilités de substitution; une
//! délétion isolée est pontée sans perdre la charge utile.

use brin_core::kmer::{char_to_base, complement_base, Base};
use brin_core::{build_machine, BuildConfig, Encoder, Sym};
use brin_mutation::{decode_sequence, MutatorParams};

fn machine() -> brin_core::Machine {
    let cfg = BuildConfig {
        len: 6,
        n_controls: 0,
        ..BuildConfig::default()
    };
    build_machine(&cfg).unwrap()
}

fn quiet_params() -> MutatorParams {
    MutatorParams::with_defaults(1e-3, 2.0, 1e-9, 1e-9, 0.1, 2, false).unwrap()
}

fn encode(machine: &brin_core::Machine, payload: &[u8]) -> Vec<Base> {
    let mut enc = Encoder::new(machine, Vec::new()).unwrap();
    for &b in payload {
        enc.encode_byte(b).unwrap();
    }
    let dna = String::from_utf8(enc.close().unwrap()).unwrap();
    dna.chars().map(|c| char_to_base(c).unwrap()).collect()
}

fn payload_bits(payload: &[u8]) -> Vec<Sym> {
    let mut bits = Vec::new();
    for &b in payload {
        for i in 0..8 {
            bits.push(if (b >> i) & 1 == 1 { Sym::Bit1 } else { Sym::Bit0 });
        }
    }
    bits
}

#[test]
fn test_clean_read_recovers_payload() {
    let m = machine();
    let p = quiet_params();
    let payload = b"Hi";
    let seq = encode(&m, payload);
    let (trace, ll) = decode_sequence(&m, &p, &seq, 0.01).unwrap();
    assert!(ll.is_finite());
    let bits: Vec<Sym> = trace.into_iter().filter(|s| s.is_bit()).collect();
    let expected = payload_bits(payload);
    assert!(
        bits.len() >= expected.len() && bits[..expected.len()] == expected[..],
        "bits décodés: {:?}",
        bits.len()
    );
    // au plus le bourrage de clôture
    assert!(bits.len() <= expected.len() + 2);
}

#[test]
fn test_single_substitution_costs_one_transversion() {
    let m = machine();
    let p = quiet_params();
    let seq = encode(&m, b"Hi");
    let (_, ll_clean) = decode_sequence(&m, &p, &seq, 0.01).unwrap();

    // substitue une base de la chaîne de chargement (chemin forcé, sans
    // ré-interprétation possible) par son complément: une transversion
    let mut dirty = seq.clone();
    dirty[2] = complement_base(dirty[2]);
    let (_, ll_dirty) = decode_sequence(&m, &p, &dirty, 0.01).unwrap();

    assert!(ll_dirty < ll_clean);
    let expected_drop = p.p_match().ln() - (p.p_transversion / 2.0).ln();
    let drop = ll_clean - ll_dirty;
    assert!(
        (drop - expected_drop).abs() < 1e-3,
        "écart {} attendu {}",
        drop,
        expected_drop
    );
}

#[test]
fn test_single_deletion_is_bridged() {
    let m = machine();
    // délétions plausibles pour que le pont soit l'explication préférée
    let p = MutatorParams::with_defaults(1e-3, 2.0, 1e-6, 0.01, 0.1, 2, false).unwrap();
    let payload = b"Hi";
    let seq = encode(&m, payload);
    let (clean_trace, _) = decode_sequence(&m, &p, &seq, 0.01).unwrap();

    let mut deleted = seq.clone();
    deleted.remove(2);
    let (trace, ll) = decode_sequence(&m, &p, &deleted, 0.01).unwrap();
    assert!(ll.is_finite());

    let clean_bits: Vec<Sym> = clean_trace.into_iter().filter(|s| s.is_bit()).collect();
    let bits: Vec<Sym> = trace.into_iter().filter(|s| s.is_bit()).collect();
    assert_eq!(clean_bits, bits);
}

#[test]
fn test_local_mode_decodes_partial_read() {
    let m = machine();
    let mut p = quiet_params();
    p.local = true;
    let seq = encode(&m, b"Hi");
    // lecture partielle: on perd le début et la fin
    let partial = &seq[4..seq.len() - 4];
    let (trace, ll) = decode_sequence(&m, &p, partial, 0.01).unwrap();
    assert!(ll.is_finite());
    assert!(!trace.is_empty());
}