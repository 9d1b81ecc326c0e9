//! Tests de bout en bout du codec
//!
//! Construction de machines de taille test, aller-retours octets et bits,
//! déterminisme de l'encodeur et propriétés des séquences produites.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use brin_core::kmer::{string_to_kmer, Pos};
use brin_core::pattern::has_exact_tandem_repeat;
use brin_core::{build_machine, BinaryWriter, BuildConfig, Decoder, Encoder, Machine};

fn framed_config(len: Pos, n_controls: usize) -> BuildConfig {
    BuildConfig {
        len,
        n_controls,
        ..BuildConfig::default()
    }
}

fn encode_bytes(machine: &Machine, data: &[u8]) -> String {
    let mut enc = Encoder::new(machine, Vec::new()).unwrap();
    for &b in data {
        enc.encode_byte(b).unwrap();
    }
    String::from_utf8(enc.close().unwrap()).unwrap()
}

fn decode_bytes(machine: &Machine, dna: &str) -> Vec<u8> {
    let mut dec = Decoder::new(machine, BinaryWriter::new(Vec::new())).unwrap();
    dec.decode_string(dna).unwrap();
    dec.close().unwrap().into_inner()
}

/// Le mot de début, lu sur la chaîne de chargement de la machine.
fn start_word(machine: &Machine) -> String {
    let mut word = String::new();
    let mut state = machine.start_state();
    loop {
        let st = &machine.states[state];
        if !matches!(st.kind, brin_core::StateKind::Start(_)) {
            break;
        }
        let t = &st.trans[0];
        if let Some(brin_core::Sym::Base(b)) = t.output {
            word.push(brin_core::kmer::base_to_char(b));
        }
        state = t.dest;
    }
    word
}

#[test]
fn test_hello_world_roundtrip() {
    let machine = build_machine(&framed_config(8, 2)).unwrap();
    let payload = b"Hello, world!";
    let dna = encode_bytes(&machine, payload);
    assert!(!dna.is_empty());
    let back = decode_bytes(&machine, &dna);
    assert_eq!(back, payload);
}

#[test]
fn test_output_avoids_tandem_repeats() {
    let machine = build_machine(&framed_config(8, 2)).unwrap();
    let dna = encode_bytes(&machine, b"Hello, world!");
    let len = machine.len;
    let max_tandem = len / 2;
    let chars: Vec<char> = dna.chars().collect();
    // toute fenêtre de L bases est un k-mer vivant: aucune répétition en
    // tandem de longueur <= L/2 ne peut s'y loger
    for window in chars.windows(len as usize) {
        let s: String = window.iter().collect();
        let kmer = string_to_kmer(&s).unwrap();
        assert!(
            !has_exact_tandem_repeat(kmer, len, max_tandem),
            "répétition en tandem dans {}",
            s
        );
    }
}

#[test]
fn test_encoder_is_deterministic() {
    let machine = build_machine(&framed_config(8, 2)).unwrap();
    let payload = b"determinisme";
    let a = encode_bytes(&machine, payload);
    let b = encode_bytes(&machine, payload);
    assert_eq!(a, b);
}

#[test]
fn test_bit_stream_roundtrip_with_framing() {
    // Scénario: L = 8, deux mots de contrôle, cadrage complet, 128 bits
    // alternés; la sortie commence par le mot de début et le décodage
    // restitue les bits.
    let machine = build_machine(&framed_config(8, 2)).unwrap();
    let bits: String = "01".repeat(64);

    let mut enc = Encoder::new(&machine, Vec::new()).unwrap();
    enc.encode_bit_string(&bits).unwrap();
    let dna = String::from_utf8(enc.close().unwrap()).unwrap();

    let word = start_word(&machine);
    assert_eq!(word.len(), machine.len as usize);
    assert!(dna.starts_with(&word), "{} ne commence pas par {}", dna, word);

    let mut dec = Decoder::new(&machine, brin_core::SymbolCollector::new()).unwrap();
    dec.decode_string(&dna).unwrap();
    let decoded = dec.close().unwrap().text;
    let decoded_bits: String = decoded.chars().filter(|c| *c == '0' || *c == '1').collect();
    assert!(
        decoded_bits.starts_with(bits.as_str()),
        "bits décodés: {}",
        decoded_bits
    );
    // au plus quelques bits de bourrage avant EOF
    assert!(decoded_bits.len() <= bits.len() + 2);
}

#[test]
fn test_random_buffer_roundtrip() {
    let machine = build_machine(&framed_config(8, 4)).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let payload: Vec<u8> = (0..256).map(|_| rng.gen()).collect();
    let dna = encode_bytes(&machine, &payload);
    let back = decode_bytes(&machine, &dna);
    assert_eq!(back, payload);
}

#[test]
fn test_sequence_length_matches_rate_estimate() {
    // Scénario: tampon aléatoire d'un kilo-octet; la longueur produite
    // suit l'estimateur de débit à 5% près, hors surcoût de cadrage.
    let machine = build_machine(&framed_config(8, 4)).unwrap();
    let rate = machine.expected_bases_per_bit().unwrap();
    assert!(rate > 0.5 && rate < 3.0, "débit estimé {}", rate);

    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let payload: Vec<u8> = (0..1024).map(|_| rng.gen()).collect();
    let dna = encode_bytes(&machine, &payload);

    let n_bits = payload.len() as f64 * 8.0;
    let expected = n_bits * rate;
    let framing_slack = 2.0 * machine.len as f64 + 96.0;
    let delta = (dna.len() as f64 - expected).abs();
    assert!(
        delta <= 0.05 * expected + framing_slack,
        "longueur {} attendue {}",
        dna.len(),
        expected
    );
}

#[test]
fn test_machine_json_reload_is_identical() {
    let machine = build_machine(&framed_config(6, 1)).unwrap();
    let mut buf = Vec::new();
    machine.write_json(&mut buf).unwrap();
    let back = Machine::read_json(&mut buf.as_slice()).unwrap();
    assert_eq!(machine, back);
    // et le codec fonctionne à l'identique après rechargement
    let payload = b"abc";
    assert_eq!(
        encode_bytes(&machine, payload),
        encode_bytes(&back, payload)
    );
}

#[test]
fn test_delayed_machine_roundtrip() {
    let cfg = BuildConfig {
        len: 6,
        n_controls: 0,
        delay: true,
        ..BuildConfig::default()
    };
    let machine = build_machine(&cfg).unwrap();
    let payload = b"xy";
    let dna = encode_bytes(&machine, payload);
    let back = decode_bytes(&machine, &dna);
    assert_eq!(back, payload);
}

#[test]
fn test_bare_machine_bit_roundtrip() {
    // sans cadrage ni contrôle: l'encodeur démarre à l'état 0 et le
    // décodeur restitue le préfixe de bits engagé
    let cfg = BuildConfig {
        len: 6,
        n_controls: 0,
        start_frame: false,
        end_frame: false,
        ..BuildConfig::default()
    };
    let machine = build_machine(&cfg).unwrap();
    let bits = "0110100111001010";
    let mut enc = Encoder::new(&machine, Vec::new()).unwrap();
    enc.encode_bit_string(bits).unwrap();
    let dna = String::from_utf8(enc.close().unwrap()).unwrap();
    assert!(!dna.is_empty());

    let mut dec = Decoder::new(&machine, brin_core::SymbolCollector::new()).unwrap();
    dec.decode_string(&dna).unwrap();
    let decoded = dec.close().unwrap().text;
    let decoded_bits: String = decoded.chars().filter(|c| *c == '0' || *c == '1').collect();
    // sans EOF, les derniers symboles peuvent rester en file: on vérifie
    // le préfixe commun
    let common = bits
        .chars()
        .zip(decoded_bits.chars())
        .take_while(|(a, b)| a == b)
        .count();
    assert!(common + 4 >= bits.len().min(decoded_bits.len()));
    assert!(decoded_bits.len() + 4 >= bits.len());
}