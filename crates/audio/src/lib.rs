//! huddle-audio – Audio-Analyse
//!
//! Pegel und Sprachaktivitaet fuer den lokalen Capture-Stream und jeden
//! entfernten Teilnehmer:
//! - [`pegel`] – Spitzenpegel ueber 1200-Sample-Fenster
//! - [`dsp`] – Sprachwahrscheinlichkeit pro Frame und geglaettete VAD
//!
//! Codec, Geraete-I/O und Wiedergabe gehoeren zur Media-Engine.

pub mod dsp;
pub mod pegel;

pub use dsp::vad::{CombinedVad, EnergieAnalysator, VadKonfig};
pub use dsp::SprachAnalysator;
pub use pegel::PegelAnalysator;
