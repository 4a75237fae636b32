//! Fehlertypen fuer Huddle
//!
//! Zentraler Fehler-Enum fuer alle Setup- und Steuerpfade.
//! Der Medien-Hot-Path erzeugt keine Fehler (Pakete werden still verworfen
//! oder gepuffert), nur Konfiguration, Sockets und Steuernachrichten.

use thiserror::Error;

/// Globaler Result-Alias fuer Huddle
pub type Result<T> = std::result::Result<T, HuddleError>;

/// Alle moeglichen Fehler im Huddle-System
#[derive(Debug, Error)]
pub enum HuddleError {
    // --- Verbindung & Netzwerk ---
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Session beendet")]
    SessionBeendet,

    // --- Protokoll ---
    #[error("Ungueltiges Paket: {0}")]
    UngueltigesPaket(String),

    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    #[error("Ungueltiger ICE-Kandidat: Feld '{feld}' = '{wert}'")]
    UngueltigerKandidat { feld: &'static str, wert: String },

    // --- Medien ---
    #[error("Kein nutzbarer Video-Codec verfuegbar")]
    KeinVideoCodec,

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl HuddleError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::Verbindung(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = HuddleError::UngueltigesPaket("RTP-Header zu kurz".into());
        assert_eq!(e.to_string(), "Ungueltiges Paket: RTP-Header zu kurz");
    }

    #[test]
    fn wiederholbar_erkennung() {
        assert!(HuddleError::Verbindung("test".into()).ist_wiederholbar());
        assert!(!HuddleError::KeinVideoCodec.ist_wiederholbar());
        assert!(!HuddleError::SessionBeendet.ist_wiederholbar());
    }

    #[test]
    fn kandidaten_fehler() {
        let e = HuddleError::UngueltigerKandidat {
            feld: "port",
            wert: "abc".into(),
        };
        assert!(e.to_string().contains("'port'"));
        assert!(e.to_string().contains("'abc'"));
    }
}
