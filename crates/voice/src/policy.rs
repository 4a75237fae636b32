//! Verbindungs- und Bitrate-Politik
//!
//! Leitet aus drei Eingangsgroessen ab, was die Media-Engine senden darf:
//!
//! ```text
//! verbunden   stumm   hat_capture  ->  Audio senden   Video senden
//!   false       *         *                false          false
//!   true      false       *                true           hat_capture
//!   true      true        *                false          hat_capture
//! ```
//!
//! Wiederholte Meldungen desselben Zustands sind wirkungslos.

use huddle_core::MedienArt;

use crate::media::MedienEngine;

// ---------------------------------------------------------------------------
// Bitrate
// ---------------------------------------------------------------------------

/// Bitrate-Grenzen fuer den Encoder (bit/s)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateProfil {
    pub min_bps: u32,
    pub start_bps: u32,
    pub max_bps: u32,
}

impl BitrateProfil {
    /// Nur Audio
    pub const NUR_AUDIO: Self = Self {
        min_bps: 32_000,
        start_bps: 32_000,
        max_bps: 32_000,
    };

    /// Audio plus Video
    pub const MIT_VIDEO: Self = Self {
        min_bps: 64_000,
        start_bps: 400_000,
        max_bps: 900_000,
    };

    pub fn fuer(hat_capture: bool) -> Self {
        if hat_capture {
            Self::MIT_VIDEO
        } else {
            Self::NUR_AUDIO
        }
    }
}

// ---------------------------------------------------------------------------
// VerbindungsPolitik
// ---------------------------------------------------------------------------

/// Zustand der Sende-Politik
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerbindungsPolitik {
    verbunden: bool,
    stumm: bool,
    hat_capture: bool,
}

impl Default for VerbindungsPolitik {
    fn default() -> Self {
        Self {
            verbunden: false,
            stumm: true,
            hat_capture: false,
        }
    }
}

impl VerbindungsPolitik {
    pub fn neu() -> Self {
        Self::default()
    }

    pub fn verbunden(&self) -> bool {
        self.verbunden
    }

    pub fn stumm(&self) -> bool {
        self.stumm
    }

    pub fn hat_capture(&self) -> bool {
        self.hat_capture
    }

    pub fn audio_senden(&self) -> bool {
        self.verbunden && !self.stumm
    }

    pub fn video_senden(&self) -> bool {
        self.verbunden && self.hat_capture
    }

    /// Erstmaliges Anwenden beim Start der Session
    pub fn initial_anwenden(&self, engine: &mut dyn MedienEngine) {
        engine.bitrate_setzen(BitrateProfil::fuer(self.hat_capture));
        self.netzwerk_status_anwenden(engine);
        engine.audio_senden(self.audio_senden());
        engine.video_senden(self.video_senden());
    }

    /// Konnektivitaet aendern; `true` wenn sich der Zustand geaendert hat
    pub fn verbunden_setzen(&mut self, verbunden: bool, engine: &mut dyn MedienEngine) -> bool {
        if self.verbunden == verbunden {
            return false;
        }
        self.verbunden = verbunden;
        tracing::info!(verbunden, "Netzwerkzustand geaendert");

        self.netzwerk_status_anwenden(engine);
        engine.audio_senden(self.audio_senden());
        engine.video_senden(self.video_senden());
        true
    }

    /// Stummschaltung aendern; beeinflusst nur das Audio-Senden
    pub fn stumm_setzen(&mut self, stumm: bool, engine: &mut dyn MedienEngine) -> bool {
        if self.stumm == stumm {
            return false;
        }
        self.stumm = stumm;
        tracing::debug!(stumm, "Stummschaltung geaendert");
        engine.audio_senden(self.audio_senden());
        true
    }

    /// Video-Capture an- oder abmelden
    ///
    /// Setzt das Bitrate-Profil inklusive Start-Bitrate neu.
    pub fn capture_setzen(&mut self, hat_capture: bool, engine: &mut dyn MedienEngine) -> bool {
        if self.hat_capture == hat_capture {
            return false;
        }
        self.hat_capture = hat_capture;
        let profil = BitrateProfil::fuer(hat_capture);
        tracing::debug!(hat_capture, max_bps = profil.max_bps, "Bitrate-Profil gewechselt");
        engine.bitrate_setzen(profil);
        engine.video_senden(self.video_senden());
        true
    }

    /// Meldet den aktuellen Netzwerkzustand fuer Audio und Video
    pub fn netzwerk_status_anwenden(&self, engine: &mut dyn MedienEngine) {
        for art in MedienArt::ALLE {
            engine.netzwerk_status(art, self.verbunden);
        }
    }

    /// Abbau: alles herunterfahren, unabhaengig vom Zustand
    pub fn abbauen(&mut self, engine: &mut dyn MedienEngine) {
        self.verbunden = false;
        for art in MedienArt::ALLE {
            engine.netzwerk_status(art, false);
        }
        engine.audio_senden(false);
        engine.video_senden(false);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
