//! Gemeinsame Werttypen fuer Huddle
//!
//! SSRCs bleiben bewusst rohe `u32` (so wie sie im RTP-Header stehen);
//! Teilnehmer werden ueber ihre primaere Audio-SSRC identifiziert.

use serde::{Deserialize, Serialize};

/// SSRC unter der der lokale Pegel im Telemetrie-Batch gemeldet wird
pub const LOKALE_PEGEL_SSRC: u32 = 0;

/// Medienart eines Streams bzw. Kanals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedienArt {
    Audio,
    Video,
}

impl MedienArt {
    /// Beide Medienarten in fester Reihenfolge (Audio zuerst)
    pub const ALLE: [MedienArt; 2] = [MedienArt::Audio, MedienArt::Video];
}

impl std::fmt::Display for MedienArt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Momentaner Audio-Pegel eines Teilnehmers (oder des lokalen Streams)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PegelWert {
    /// Normalisierter Spitzenpegel (nominal 0.0–1.0, nicht geclippt)
    pub level: f32,
    /// Sprachaktivitaet erkannt
    pub voice: bool,
}

impl PegelWert {
    /// Stille ohne Sprachaktivitaet
    pub const STILLE: PegelWert = PegelWert {
        level: 0.0,
        voice: false,
    };

    pub fn neu(level: f32, voice: bool) -> Self {
        Self { level, voice }
    }
}

/// Ein Eintrag im periodischen Pegel-Batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PegelUpdate {
    /// Primaere Audio-SSRC, `LOKALE_PEGEL_SSRC` fuer den eigenen Stream
    pub ssrc: u32,
    pub wert: PegelWert,
}
