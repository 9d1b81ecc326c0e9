//! Mise en œuvre des modes d'opération de la CLI

use std::io::{BufReader, Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use brin_align::{read_fasta, read_stockholm_database, FastaWriter};
use brin_core::{BinaryWriter, Decoder, Encoder, InputSink, Machine, Sym, SymbolCollector};
use brin_mutation::{
    baum_welch, decode_sequence, expected_counts, MutatorCounts, MutatorParams,
};

use crate::Cli;

/// Barre de progression pour les traitements de fichiers.
fn progress_bar(length: u64, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(length);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("gabarit valide")
            .progress_chars("##-"),
    );
    pb.set_message(msg.to_string());
    pb
}

/// Modèle d'erreur: fichier JSON ou valeurs par défaut de la ligne de
/// commande.
pub fn error_model(cli: &Cli) -> Result<MutatorParams> {
    match &cli.error_file {
        Some(path) => {
            MutatorParams::from_file(path).with_context(|| format!("lecture de {}", path.display()))
        }
        None => Ok(MutatorParams::with_defaults(
            cli.error_sub_prob,
            cli.error_iv_ratio,
            cli.error_dup_prob,
            cli.error_del_open,
            cli.error_del_ext,
            cli.error_dup_len,
            !cli.error_global,
        )?),
    }
}

/// Encode des octets et écrit l'ADN (FASTA ou brut) sur stdout.
fn emit_encoded(cli: &Cli, machine: &Machine, data: &[u8]) -> Result<()> {
    let stdout = std::io::stdout();
    let lock = stdout.lock();
    if cli.raw {
        let mut enc = Encoder::new(machine, lock)?;
        for &b in data {
            enc.encode_byte(b)?;
        }
        let mut out = enc.close()?;
        writeln!(out)?;
    } else {
        let writer = FastaWriter::with_cols(lock, &cli.seqname, cli.cols)?;
        let mut enc = Encoder::new(machine, writer)?;
        for &b in data {
            enc.encode_byte(b)?;
        }
        enc.close()?.finish()?;
    }
    Ok(())
}

pub fn encode_file(cli: &Cli, machine: &Machine, path: &Path) -> Result<()> {
    let mut data = Vec::new();
    std::fs::File::open(path)
        .with_context(|| format!("ouverture de {}", path.display()))?
        .read_to_end(&mut data)?;
    let stdout = std::io::stdout();
    let lock = stdout.lock();
    let pb = progress_bar(data.len() as u64, "encodage");
    if cli.raw {
        let mut enc = Encoder::new(machine, lock)?;
        for &b in &data {
            enc.encode_byte(b)?;
            pb.inc(1);
        }
        let mut out = enc.close()?;
        writeln!(out)?;
    } else {
        let writer = FastaWriter::with_cols(lock, &cli.seqname, cli.cols)?;
        let mut enc = Encoder::new(machine, writer)?;
        for &b in &data {
            enc.encode_byte(b)?;
            pb.inc(1);
        }
        enc.close()?.finish()?;
    }
    pb.finish_and_clear();
    Ok(())
}

pub fn encode_bytes_mode(cli: &Cli, machine: &Machine, data: &[u8]) -> Result<()> {
    emit_encoded(cli, machine, data)
}

pub fn encode_bits_mode(cli: &Cli, machine: &Machine, bits: &str) -> Result<()> {
    let stdout = std::io::stdout();
    let lock = stdout.lock();
    if cli.raw {
        let mut enc = Encoder::new(machine, lock)?;
        enc.encode_bit_string(bits)?;
        let mut out = enc.close()?;
        writeln!(out)?;
    } else {
        let writer = FastaWriter::with_cols(lock, &cli.seqname, cli.cols)?;
        let mut enc = Encoder::new(machine, writer)?;
        enc.encode_bit_string(bits)?;
        enc.close()?.finish()?;
    }
    Ok(())
}

/// Concatène les séquences d'un fichier FASTA (ou brut avec `--raw`).
fn read_dna(cli: &Cli, path: &Path) -> Result<String> {
    let file =
        std::fs::File::open(path).with_context(|| format!("ouverture de {}", path.display()))?;
    if cli.raw {
        let mut text = String::new();
        BufReader::new(file).read_to_string(&mut text)?;
        Ok(text.split_whitespace().collect())
    } else {
        let seqs = read_fasta(BufReader::new(file))?;
        Ok(seqs.into_iter().map(|fs| fs.seq).collect())
    }
}

pub fn decode_file(cli: &Cli, machine: &Machine, path: &Path) -> Result<()> {
    let dna = read_dna(cli, path)?;
    let stdout = std::io::stdout();
    let mut dec = Decoder::new(machine, BinaryWriter::new(stdout.lock()))?;
    let pb = progress_bar(dna.len() as u64, "décodage");
    for c in dna.chars() {
        dec.decode_base(c)?;
        pb.inc(1);
    }
    pb.finish_and_clear();
    dec.close()?;
    Ok(())
}

pub fn decode_string_mode(machine: &Machine, seq: &str) -> Result<()> {
    let stdout = std::io::stdout();
    let mut dec = Decoder::new(machine, BinaryWriter::new(stdout.lock()))?;
    dec.decode_string(seq)?;
    dec.close()?;
    Ok(())
}

pub fn decode_bits_mode(machine: &Machine, seq: &str) -> Result<()> {
    let mut dec = Decoder::new(machine, SymbolCollector::new())?;
    dec.decode_string(seq)?;
    let collector = dec.close()?;
    println!("{}", collector.text);
    Ok(())
}

pub fn decode_viterbi(
    cli: &Cli,
    machine: &Machine,
    params: &MutatorParams,
    path: &Path,
) -> Result<()> {
    let file =
        std::fs::File::open(path).with_context(|| format!("ouverture de {}", path.display()))?;
    let seqs = read_fasta(BufReader::new(file))?;
    if seqs.is_empty() {
        bail!("aucune séquence dans {}", path.display());
    }
    let stdout = std::io::stdout();
    let mut sink = BinaryWriter::new(stdout.lock());
    for fs in &seqs {
        info!("Décodage de Viterbi de {} ({} bases)", fs.name, fs.length());
        let bases = fs.tokens();
        let (trace, ll) = decode_sequence(machine, params, &bases, cli.error_control_prob)?;
        info!("Log-vraisemblance {:.3}", ll);
        for sym in trace {
            sink.accept(sym)?;
        }
    }
    sink.finish()?;
    Ok(())
}

pub fn fit_error(cli: &Cli, init: &MutatorParams, path: &Path) -> Result<()> {
    let file =
        std::fs::File::open(path).with_context(|| format!("ouverture de {}", path.display()))?;
    let db = read_stockholm_database(&mut BufReader::new(file))?;
    if db.is_empty() {
        bail!("aucun alignement dans {}", path.display());
    }
    let prior = MutatorCounts::new(init).init_laplace(1.0);
    let (fitted, history) = baum_welch(init, &prior, &db, cli.fit_band)?;
    for it in &history {
        info!(
            "itération {}: log-vraisemblance {:.6}",
            it.iter, it.loglike
        );
    }
    let stdout = std::io::stdout();
    fitted.write_json(&mut stdout.lock())?;
    Ok(())
}

pub fn error_counts(cli: &Cli, params: &MutatorParams, path: &Path) -> Result<()> {
    let file =
        std::fs::File::open(path).with_context(|| format!("ouverture de {}", path.display()))?;
    let db = read_stockholm_database(&mut BufReader::new(file))?;
    if db.is_empty() {
        bail!("aucun alignement dans {}", path.display());
    }
    let (counts, ll) = expected_counts(params, &db, cli.fit_band)?;
    info!("Log-vraisemblance totale {:.6}", ll);
    let stdout = std::io::stdout();
    counts.write_json(&mut stdout.lock())?;
    Ok(())
}

/// Table des symboles d'entrée de la machine.
pub fn token_info(machine: &Machine) {
    println!("{:<10} {:<12} {}", "symbole", "classe", "acceptation");
    for sym in machine.input_alphabet() {
        let class = match sym {
            Sym::Bit0 | Sym::Bit1 => "bit",
            Sym::StrictBit0 | Sym::StrictBit1 => "bit strict",
            Sym::Trit(_) => "trit",
            Sym::Quat(_) => "quat",
            Sym::Flush => "vidage",
            Sym::Sof | Sym::Eof => "cadrage",
            Sym::Control(_) => "contrôle",
            Sym::Base(_) => "base",
        };
        let rule = match sym {
            Sym::Bit0 | Sym::Bit1 => "tout état codant",
            Sym::StrictBit0 | Sym::StrictBit1 => "degré sortant 2",
            Sym::Trit(_) => "degré sortant 3",
            Sym::Quat(_) => "degré sortant 4",
            Sym::Flush => "états de répartition",
            Sym::Sof => "chaîne de chargement",
            Sym::Eof => "états codants de degré >= 2",
            Sym::Control(_) => "états codants de degré >= 2",
            Sym::Base(_) => "-",
        };
        println!("{:<10} {:<12} {}", sym.mnemonic(), class, rule);
    }
    let n_states = machine.n_states();
    let n_controls = machine
        .input_alphabet()
        .iter()
        .filter(|s| s.is_control())
        .count();
    println!();
    println!("{} états, {} symboles de contrôle", n_states, n_controls);
}
