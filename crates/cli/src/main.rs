//! CLI du codec ADN Brin

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

mod commands;
mod logging;

use brin_core::{build_machine, BuildConfig, Machine};

#[derive(Parser)]
#[command(name = "brin")]
#[command(about = "Codec entre données binaires et séquences ADN contraintes", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Longueur des k-mers du graphe de de Bruijn (1..=31)
    #[arg(long, default_value_t = 12)]
    pub length: u32,

    /// Longueur maximale des répétitions en tandem (défaut: longueur / 2)
    #[arg(long)]
    pub tandem: Option<u32>,

    /// Longueur des répétitions inversées distantes rejetées (0 = désactivé)
    #[arg(long, default_value_t = 0)]
    pub invrep: u32,

    /// Motif de nucléotides exclu (répétable)
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Motif source supplémentaire (répétable)
    #[arg(long)]
    pub source: Vec<String>,

    /// Nombre de symboles de contrôle réservés
    #[arg(long, default_value_t = 4)]
    pub controls: usize,

    /// Désactive le cadrage de début
    #[arg(long)]
    pub no_start: bool,

    /// Désactive le cadrage de fin
    #[arg(long)]
    pub no_end: bool,

    /// Variante retardée (contextes scindés, émission différée)
    #[arg(long)]
    pub delay: bool,

    /// Conserve les arêtes dégénérées par transition
    #[arg(long)]
    pub keep_degenerates: bool,

    /// Charge une machine depuis un fichier JSON au lieu de la construire
    #[arg(long, value_name = "FILE")]
    pub load_machine: Option<PathBuf>,

    /// Sauve la machine au format JSON
    #[arg(long, value_name = "FILE")]
    pub save_machine: Option<PathBuf>,

    /// Compose la machine avec des transducteurs externes (répétable,
    /// appliqués de l'extérieur vers l'intérieur)
    #[arg(long, value_name = "FILE")]
    pub compose_machine: Vec<PathBuf>,

    /// Encode un fichier en ADN (FASTA sur la sortie standard)
    #[arg(long, value_name = "FILE")]
    pub encode_file: Option<PathBuf>,

    /// Décode un fichier FASTA en octets
    #[arg(long, value_name = "FILE")]
    pub decode_file: Option<PathBuf>,

    /// Encode une chaîne de caractères
    #[arg(long, value_name = "S")]
    pub encode_string: Option<String>,

    /// Décode une séquence ADN donnée en argument
    #[arg(long, value_name = "S")]
    pub decode_string: Option<String>,

    /// Encode une chaîne de bits '0'/'1'
    #[arg(long, value_name = "S")]
    pub encode_bits: Option<String>,

    /// Décode une séquence ADN en chaîne de symboles d'entrée
    #[arg(long, value_name = "S")]
    pub decode_bits: Option<String>,

    /// Décode un fichier FASTA bruité par alignement de Viterbi
    #[arg(long, value_name = "FILE")]
    pub decode_viterbi: Option<PathBuf>,

    /// Charge le modèle d'erreur depuis un fichier JSON
    #[arg(long, value_name = "FILE")]
    pub error_file: Option<PathBuf>,

    /// Réajuste le modèle d'erreur par Baum-Welch sur une base Stockholm
    #[arg(long, value_name = "FILE")]
    pub fit_error: Option<PathBuf>,

    /// Émet les comptes espérés du modèle sur une base Stockholm
    #[arg(long, value_name = "FILE")]
    pub error_counts: Option<PathBuf>,

    /// Probabilité totale de substitution par base
    #[arg(long, default_value_t = 0.01)]
    pub error_sub_prob: f64,

    /// Rapport transitions/transversions
    #[arg(long, default_value_t = 2.0)]
    pub error_iv_ratio: f64,

    /// Probabilité de duplication en tandem
    #[arg(long, default_value_t = 0.005)]
    pub error_dup_prob: f64,

    /// Longueur maximale des duplications en tandem
    #[arg(long, default_value_t = 4)]
    pub error_dup_len: usize,

    /// Probabilité d'ouverture de délétion
    #[arg(long, default_value_t = 0.005)]
    pub error_del_open: f64,

    /// Probabilité d'extension de délétion
    #[arg(long, default_value_t = 0.5)]
    pub error_del_ext: f64,

    /// Alignement global de l'observation (désactive les extrémités libres)
    #[arg(long)]
    pub error_global: bool,

    /// Masse de probabilité des symboles de contrôle pour le Viterbi
    #[arg(long, default_value_t = 0.01)]
    pub error_control_prob: f64,

    /// Demi-largeur de l'enveloppe guide pour l'ajustement (vide = sans borne)
    #[arg(long, value_name = "N")]
    pub fit_band: Option<usize>,

    /// Sortie ADN brute (sans en-tête FASTA) et entrée ADN brute
    #[arg(long)]
    pub raw: bool,

    /// Émet la machine au format Graphviz
    #[arg(long)]
    pub dot: bool,

    /// Affiche le débit estimé (bases par bit)
    #[arg(long)]
    pub rate: bool,

    /// Affiche la table des symboles d'entrée
    #[arg(long)]
    pub token_info: bool,

    /// Nom de séquence des sorties FASTA
    #[arg(long, default_value = "SEQ")]
    pub seqname: String,

    /// Largeur de repli des lignes FASTA
    #[arg(long, default_value_t = 50)]
    pub cols: usize,

    /// Niveau de verbosité (0 = silencieux)
    #[arg(long, default_value_t = 1)]
    pub verbose: u32,

    /// Active la trace détaillée d'une cible de journalisation (répétable)
    #[arg(long, value_name = "CIBLE")]
    pub log: Vec<String>,

    /// Désactive la couleur dans les journaux
    #[arg(long)]
    pub nocolor: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, &cli.log, cli.nocolor);

    // 1. machine: chargée ou construite
    let mut machine = match &cli.load_machine {
        Some(path) => {
            let mut file = std::fs::File::open(path)
                .with_context(|| format!("ouverture de {}", path.display()))?;
            Machine::read_json(&mut file).context("lecture de la machine")?
        }
        None => {
            let cfg = BuildConfig {
                len: cli.length,
                max_tandem: cli.tandem,
                inverted_repeat_len: cli.invrep,
                excluded: cli.exclude.clone(),
                sources: cli.source.clone(),
                n_controls: cli.controls,
                start_frame: !cli.no_start,
                end_frame: !cli.no_end,
                delay: cli.delay,
                keep_degenerates: cli.keep_degenerates,
                ..BuildConfig::default()
            };
            build_machine(&cfg).context("construction de la machine")?
        }
    };

    // 2. pré-composition avec des transducteurs externes
    for path in &cli.compose_machine {
        let mut file = std::fs::File::open(path)
            .with_context(|| format!("ouverture de {}", path.display()))?;
        let outer = Machine::read_json(&mut file)
            .with_context(|| format!("lecture de {}", path.display()))?;
        machine = outer.compose(&machine).context("composition")?;
    }
    machine.validate().context("machine incohérente")?;

    // 3. persistance et sorties descriptives
    if let Some(path) = &cli.save_machine {
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("création de {}", path.display()))?;
        machine.write_json(&mut file)?;
    }
    if cli.dot {
        print!("{}", machine.to_dot());
    }
    if cli.rate {
        match machine.expected_bases_per_bit() {
            Some(rate) => println!("{:.6}", rate),
            None => bail!("machine sans états pilotés par bits"),
        }
    }
    if cli.token_info {
        commands::token_info(&machine);
    }

    // 4. modèle d'erreur
    let params = commands::error_model(&cli)?;

    // 5. modes d'opération
    let mut ran_mode = false;
    if let Some(path) = &cli.encode_file {
        commands::encode_file(&cli, &machine, path)?;
        ran_mode = true;
    }
    if let Some(text) = &cli.encode_string {
        commands::encode_bytes_mode(&cli, &machine, text.as_bytes())?;
        ran_mode = true;
    }
    if let Some(bits) = &cli.encode_bits {
        commands::encode_bits_mode(&cli, &machine, bits)?;
        ran_mode = true;
    }
    if let Some(path) = &cli.decode_file {
        commands::decode_file(&cli, &machine, path)?;
        ran_mode = true;
    }
    if let Some(seq) = &cli.decode_string {
        commands::decode_string_mode(&machine, seq)?;
        ran_mode = true;
    }
    if let Some(seq) = &cli.decode_bits {
        commands::decode_bits_mode(&machine, seq)?;
        ran_mode = true;
    }
    if let Some(path) = &cli.decode_viterbi {
        commands::decode_viterbi(&cli, &machine, &params, path)?;
        ran_mode = true;
    }
    if let Some(path) = &cli.fit_error {
        commands::fit_error(&cli, &params, path)?;
        ran_mode = true;
    }
    if let Some(path) = &cli.error_counts {
        commands::error_counts(&cli, &params, path)?;
        ran_mode = true;
    }

    // sans mode: décrit la machine
    if !ran_mode && !cli.dot && !cli.rate && !cli.token_info && cli.save_machine.is_none() {
        let stdout = std::io::stdout();
        machine.write(&mut stdout.lock())?;
    }
    Ok(())
}
