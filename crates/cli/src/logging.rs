//! Initialisation de la journalisation
//!
//! Le niveau global suit `--verbose`; chaque `--log CIBLE` pousse la
//! cible nommée en trace; `--nocolor` coupe les séquences ANSI.

use tracing_subscriber::{fmt, EnvFilter};

pub fn init(verbose: u32, targets: &[String], nocolor: bool) {
    let level = match verbose {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    for target in targets {
        if let Ok(directive) = format!("{}=trace", target).parse() {
            filter = filter.add_directive(directive);
        }
    }
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(!nocolor)
        .init();
}
