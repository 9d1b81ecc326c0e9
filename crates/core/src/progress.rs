//! Journal de progression à cadence bornée
//!
//! Les boucles serrées sur 4^L k-mers ne doivent jamais bloquer sur la
//! journalisation: une barrière d'horloge murale limite l'émission à un
//! message par seconde, le reste des appels ne coûte qu'une comparaison.

use std::time::{Duration, Instant};

use tracing::info;

const LOG_INTERVAL: Duration = Duration::from_secs(1);

pub struct ProgressLog {
    name: String,
    start: Instant,
    last: Option<Instant>,
}

impl ProgressLog {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        info!("{}", name);
        Self {
            name,
            start: Instant::now(),
            last: None,
        }
    }

    /// Signale l'avancement `frac` ∈ [0, 1]. Le détail n'est construit que
    /// si le message est réellement émis.
    pub fn log<F: FnOnce() -> String>(&mut self, frac: f64, detail: F) {
        let now = Instant::now();
        let due = match self.last {
            None => now.duration_since(self.start) >= LOG_INTERVAL,
            Some(last) => now.duration_since(last) >= LOG_INTERVAL,
        };
        if !due {
            return;
        }
        self.last = Some(now);
        let elapsed = now.duration_since(self.start).as_secs_f64();
        if frac > 0.0 && frac < 1.0 {
            let remaining = elapsed * (1.0 - frac) / frac;
            info!(
                "{}: {:.1}% ({}), reste environ {:.0}s",
                self.name,
                100.0 * frac,
                detail(),
                remaining
            );
        } else {
            info!("{}: {:.1}% ({})", self.name, 100.0 * frac, detail());
        }
    }
}
