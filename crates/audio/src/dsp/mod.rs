//! DSP-Module fuer die Sprach-Erkennung
//!
//! Jeder Analysator liefert pro Frame eine Sprachwahrscheinlichkeit; die
//! Glaettung zur Ja/Nein-Entscheidung uebernimmt [`vad::CombinedVad`].

pub mod vad;

/// Gemeinsames Trait fuer Sprach-Analysatoren
///
/// Samples sind Mono und normalisiert (-1.0..1.0). Analysatoren veraendern
/// die Samples nicht.
pub trait SprachAnalysator: Send {
    /// Sprachwahrscheinlichkeit des Frames (0.0..1.0)
    fn sprach_wahrscheinlichkeit(&mut self, samples: &[f32]) -> f32;

    /// Setzt den internen Zustand zurueck (z.B. Glaettung)
    fn reset(&mut self);
}
