//! Voice Activity Detection (VAD)
//!
//! Zweistufig:
//! 1. [`EnergieAnalysator`] bewertet jeden Frame einzeln (geglaettete
//!    RMS-Energie kombiniert mit Zero-Crossing-Rate).
//! 2. [`CombinedVad`] haelt die letzten 8 Bewertungen und erklaert Sprache
//!    erst wenn deren Mittelwert ueber 0.8 liegt. Ein einzelner lauter Frame
//!    reicht dafuer nicht.

use serde::{Deserialize, Serialize};

use super::SprachAnalysator;

/// Laenge der Bewertungs-Historie
pub const HISTORIE_LAENGE: usize = 8;

/// Mittelwert ab dem Sprache erkannt wird (exklusiv)
pub const SPRACH_SCHWELLE: f32 = 0.8;

/// Konfiguration fuer den Energie-Analysator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadKonfig {
    /// Energie-Schwellenwert (normalisierte RMS, 0.0..1.0)
    pub energie_schwelle: f32,
    /// Zero-Crossing-Rate ab der ein Frame eher Rauschen ist
    pub zcr_schwelle: f32,
    /// Glaettungsfaktor fuer Energie (0.0 = keine Glaettung, 1.0 = volle Glaettung)
    pub glaettung: f32,
}

impl Default for VadKonfig {
    fn default() -> Self {
        Self {
            energie_schwelle: 0.01,
            zcr_schwelle: 0.3,
            glaettung: 0.9,
        }
    }
}

// ---------------------------------------------------------------------------
// EnergieAnalysator
// ---------------------------------------------------------------------------

/// Sprachwahrscheinlichkeit aus Energie und Zero-Crossing-Rate
pub struct EnergieAnalysator {
    konfig: VadKonfig,
    geglaettete_energie: f32,
}

impl EnergieAnalysator {
    pub fn neu(konfig: VadKonfig) -> Self {
        Self {
            konfig,
            geglaettete_energie: 0.0,
        }
    }

    /// Gibt die geglaettete Energie zurueck
    pub fn geglaettete_energie(&self) -> f32 {
        self.geglaettete_energie
    }
}

impl Default for EnergieAnalysator {
    fn default() -> Self {
        Self::neu(VadKonfig::default())
    }
}

impl SprachAnalysator for EnergieAnalysator {
    fn sprach_wahrscheinlichkeit(&mut self, samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }

        let energie = rms_energie(samples);
        self.geglaettete_energie = self.konfig.glaettung * self.geglaettete_energie
            + (1.0 - self.konfig.glaettung) * energie;

        // Ab doppelter Schwelle gilt der Frame als sicher laut
        let schwelle = self.konfig.energie_schwelle.max(f32::EPSILON);
        let mut p = (self.geglaettete_energie / (2.0 * schwelle)).clamp(0.0, 1.0);

        // Rauschen hat typisch hohe ZCR, Sprache moderate
        if zero_crossing_rate(samples) >= self.konfig.zcr_schwelle {
            p *= 0.5;
        }
        p
    }

    fn reset(&mut self) {
        self.geglaettete_energie = 0.0;
    }
}

/// Berechnet den RMS-Energiewert eines Frames
pub fn rms_energie(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let summe: f32 = samples.iter().map(|s| s * s).sum();
    (summe / samples.len() as f32).sqrt()
}

/// Berechnet die normalisierte Zero-Crossing-Rate
pub fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let durchgaenge = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    durchgaenge as f32 / (samples.len() - 1) as f32
}

// ---------------------------------------------------------------------------
// CombinedVad
// ---------------------------------------------------------------------------

/// Geglaettete Sprach-Entscheidung ueber die letzten 8 Frames
pub struct CombinedVad {
    analysator: Box<dyn SprachAnalysator>,
    historie: [f32; HISTORIE_LAENGE],
    spricht: bool,
}

impl CombinedVad {
    pub fn neu(analysator: Box<dyn SprachAnalysator>) -> Self {
        Self {
            analysator,
            historie: [0.0; HISTORIE_LAENGE],
            spricht: false,
        }
    }

    /// Bewertet einen Frame und gibt die aktuelle Entscheidung zurueck
    pub fn update(&mut self, samples: &[f32]) -> bool {
        let p = self.analysator.sprach_wahrscheinlichkeit(samples);
        self.bewertung_einspeisen(p)
    }

    /// Schiebt eine Frame-Bewertung in die Historie (aelteste faellt heraus)
    pub fn bewertung_einspeisen(&mut self, wahrscheinlichkeit: f32) -> bool {
        self.historie.rotate_left(1);
        self.historie[HISTORIE_LAENGE - 1] = wahrscheinlichkeit;
        self.spricht = self.mittelwert() > SPRACH_SCHWELLE;
        self.spricht
    }

    /// Ungewichteter Mittelwert der Historie
    pub fn mittelwert(&self) -> f32 {
        self.historie.iter().sum::<f32>() / HISTORIE_LAENGE as f32
    }

    pub fn spricht(&self) -> bool {
        self.spricht
    }

    pub fn reset(&mut self) {
        self.historie = [0.0; HISTORIE_LAENGE];
        self.spricht = false;
        self.analysator.reset();
    }
}

impl Default for CombinedVad {
    fn default() -> Self {
        Self::neu(Box::new(EnergieAnalysator::default()))
    }
}
