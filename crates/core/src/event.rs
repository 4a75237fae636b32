//! Session-Ereignisse
//!
//! Alles was die Group-Session an die Aufrufseite meldet, fliesst als
//! `SessionEreignis` ueber einen tokio-Kanal. Die Session ruft nie direkt
//! in Aufrufer-Code zurueck.

use crate::types::PegelUpdate;
use serde::{Deserialize, Serialize};

/// Alle Ereignisse die eine Group-Session nach aussen meldet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEreignis {
    /// Verbindungsstatus hat sich geaendert (true = sendebereit)
    NetzwerkStatus { verbunden: bool },
    /// Periodischer Pegel-Batch (alle 50 ms)
    AudioPegel(Vec<PegelUpdate>),
    /// Aktuelle Liste der Teilnehmer (primaere SSRC) mit Video-Kanal
    VideoQuellen(Vec<u32>),
    /// Fuer diese SSRCs fehlt eine Teilnehmerbeschreibung
    TeilnehmerBeschreibungenBenoetigt(Vec<u32>),
}
