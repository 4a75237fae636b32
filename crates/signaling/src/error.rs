//! Fehlertypen fuer die Signalisierungsverbindung

use thiserror::Error;

/// Fehlertyp fuer KCP und die Signalisierungsverbindung
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KcpFehler {
    /// Nachricht braucht mehr Fragmente als das Empfangsfenster fasst
    #[error("Nachricht zu gross: {fragmente} Fragmente (Maximum {maximum})")]
    NachrichtZuGross { fragmente: usize, maximum: usize },

    /// Datagramm kuerzer als ein Segment-Header
    #[error("Datagramm zu kurz: {0} Bytes")]
    DatagrammZuKurz(usize),

    /// Segment einer fremden Konversation
    #[error("Falsche Konversation: erwartet {erwartet}, bekommen {bekommen}")]
    FalscheKonversation { erwartet: u32, bekommen: u32 },

    /// Unbekanntes Segment-Kommando
    #[error("Unbekanntes Kommando: {0}")]
    UnbekanntesKommando(u8),

    /// Segment-Laenge groesser als der Rest des Datagramms
    #[error("Segment abgeschnitten: {erwartet} Bytes erwartet, {vorhanden} vorhanden")]
    Abgeschnitten { erwartet: usize, vorhanden: usize },

    /// Verbindungs-Task laeuft nicht mehr
    #[error("Verbindung geschlossen")]
    Geschlossen,
}

/// Result-Typ fuer die Signalisierung
pub type KcpResult<T> = Result<T, KcpFehler>;
