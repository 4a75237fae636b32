//! Session-Konfiguration
//!
//! Alle Werte haben Defaults; die Konfiguration wird typischerweise als
//! `[session]`-Abschnitt aus einer TOML-Datei geladen.

use std::time::Duration;

use huddle_audio::VadKonfig;
use serde::{Deserialize, Serialize};

/// Parameter einer Group-Session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Kapazitaet des Puffers fuer Pakete unbekannter SSRCs
    pub puffer_kapazitaet: usize,
    /// Periode der Pegel-Telemetrie in Millisekunden
    pub pegel_intervall_ms: u64,
    /// Sammelfenster fuer Meldungen unbekannter SSRCs in Millisekunden
    pub unbekannt_fenster_ms: u64,
    /// Pegel bis einschliesslich dieses Werts werden nicht gemeldet
    pub rausch_schwelle: f32,
    /// Anzahl ausgehender Simulcast-Layer
    pub simulcast_layer: usize,
    /// Parameter der Sprach-Erkennung
    pub vad: VadKonfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            puffer_kapazitaet: 100,
            pegel_intervall_ms: 50,
            unbekannt_fenster_ms: 100,
            rausch_schwelle: 0.001,
            simulcast_layer: 1,
            vad: VadKonfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn pegel_intervall(&self) -> Duration {
        Duration::from_millis(self.pegel_intervall_ms)
    }

    pub fn unbekannt_fenster(&self) -> Duration {
        Duration::from_millis(self.unbekannt_fenster_ms)
    }
}
