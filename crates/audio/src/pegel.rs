//! Pegel-Analysator pro Audio-Stream
//!
//! Wird mit jedem dekodierten (bzw. aufgenommenen) Frame gefuettert. Der
//! Spitzenpegel wird ueber mindestens 1200 Samples (25 ms bei 48 kHz)
//! gesammelt; dann wird `peak / 4000` zusammen mit der aktuellen
//! VAD-Entscheidung gemeldet und die Akkumulatoren zurueckgesetzt.
//!
//! Nur Mono-Frames werden ausgewertet, Mehrkanal-Frames ignoriert.
//! Samples liegen im 16-Bit-Wertebereich.

use huddle_core::PegelWert;

use crate::dsp::vad::CombinedVad;

/// Samples pro Pegel-Meldung
pub const PEGEL_FENSTER_SAMPLES: usize = 1200;

/// Normierung des Spitzenpegels (empirisch, nicht kalibriert)
pub const PEGEL_NORMIERUNG: f32 = 4000.0;

const I16_SKALA: f32 = 32768.0;

/// Pegel und Sprachaktivitaet eines einzelnen Streams
pub struct PegelAnalysator {
    vad: CombinedVad,
    peak: f32,
    anzahl: usize,
    /// Wiederverwendeter Puffer fuer die normalisierten VAD-Samples
    normalisiert: Vec<f32>,
}

impl PegelAnalysator {
    pub fn neu(vad: CombinedVad) -> Self {
        Self {
            vad,
            peak: 0.0,
            anzahl: 0,
            normalisiert: Vec::new(),
        }
    }

    /// Verarbeitet einen 16-Bit-Frame (dekodiertes Remote-Audio)
    ///
    /// Gibt einen Pegelwert zurueck sobald das Sample-Fenster voll ist.
    pub fn frame_i16(&mut self, samples: &[i16], kanaele: usize) -> Option<PegelWert> {
        if kanaele != 1 {
            return None;
        }
        self.normalisiert.clear();
        self.normalisiert
            .extend(samples.iter().map(|&s| s as f32 / I16_SKALA));
        self.auswerten(samples.iter().map(|&s| (s as i32).unsigned_abs() as f32))
    }

    /// Verarbeitet einen Float-Frame im 16-Bit-Wertebereich (lokaler Capture)
    pub fn frame_f32(&mut self, samples: &[f32], kanaele: usize) -> Option<PegelWert> {
        if kanaele != 1 {
            return None;
        }
        self.normalisiert.clear();
        self.normalisiert
            .extend(samples.iter().map(|&s| s / I16_SKALA));
        self.auswerten(samples.iter().map(|s| s.abs()))
    }

    fn auswerten(&mut self, betraege: impl Iterator<Item = f32>) -> Option<PegelWert> {
        let spricht = self.vad.update(&self.normalisiert);

        for betrag in betraege {
            if betrag > self.peak {
                self.peak = betrag;
            }
            self.anzahl += 1;
        }

        if self.anzahl < PEGEL_FENSTER_SAMPLES {
            return None;
        }
        let wert = PegelWert::neu(self.peak / PEGEL_NORMIERUNG, spricht);
        self.peak = 0.0;
        self.anzahl = 0;
        tracing::trace!(level = wert.level, voice = wert.voice, "Pegel gemessen");
        Some(wert)
    }

    /// Aktuelle VAD-Entscheidung
    pub fn spricht(&self) -> bool {
        self.vad.spricht()
    }
}

impl Default for PegelAnalysator {
    fn default() -> Self {
        Self::neu(CombinedVad::default())
    }
}
