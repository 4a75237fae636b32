//! Pegel-Telemetrie – gebuendelte Audio-Pegel aller Teilnehmer
//!
//! Pegel-Analysatoren melden laufend Werte pro SSRC. Alle 50 ms wird eine
//! Momentaufnahme gezogen, Rauschen unterhalb der Schwelle verworfen, der
//! lokale Pegel unter SSRC 0 angehaengt und die Tabelle geleert.
//!
//! ## Ausgabe
//! - Remote-Eintraege aufsteigend nach SSRC
//! - Lokaler Eintrag immer als letzter, bei Stummschaltung `{0.0, false}`
//! - Wer im Zeitraum nichts gemeldet hat, fehlt in der Meldung

use std::collections::BTreeMap;

use huddle_core::types::LOKALE_PEGEL_SSRC;
use huddle_core::{PegelUpdate, PegelWert};

/// Sammelt Pegel zwischen zwei Telemetrie-Ticks
pub struct PegelTelemetrie {
    rausch_schwelle: f32,
    remote: BTreeMap<u32, PegelWert>,
    lokal: PegelWert,
    ticks: u64,
}

impl PegelTelemetrie {
    pub fn neu(rausch_schwelle: f32) -> Self {
        Self {
            rausch_schwelle,
            remote: BTreeMap::new(),
            lokal: PegelWert::STILLE,
            ticks: 0,
        }
    }

    /// Letzter Wert eines Remote-Streams im Zeitraum ueberschreibt fruehere
    pub fn remote_melden(&mut self, ssrc: u32, wert: PegelWert) {
        self.remote.insert(ssrc, wert);
    }

    pub fn lokal_melden(&mut self, wert: PegelWert) {
        self.lokal = wert;
    }

    /// Schliesst den Zeitraum ab und liefert die Meldung
    pub fn abschluss(&mut self, stumm: bool) -> Vec<PegelUpdate> {
        let schwelle = self.rausch_schwelle;
        let mut updates: Vec<PegelUpdate> = std::mem::take(&mut self.remote)
            .into_iter()
            .filter(|(_, wert)| wert.level > schwelle)
            .map(|(ssrc, wert)| PegelUpdate { ssrc, wert })
            .collect();

        let lokal = if stumm { PegelWert::STILLE } else { self.lokal };
        updates.push(PegelUpdate {
            ssrc: LOKALE_PEGEL_SSRC,
            wert: lokal,
        });

        self.ticks += 1;
        updates
    }

    /// Vergisst den Stand eines entfernten Teilnehmers
    pub fn entfernen(&mut self, ssrc: u32) {
        self.remote.remove(&ssrc);
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rauschen_wird_gefiltert_und_lokal_angehaengt() {
        let mut telemetrie = PegelTelemetrie::neu(0.001);
        telemetrie.remote_melden(30, PegelWert::neu(0.5, true));
        telemetrie.remote_melden(10, PegelWert::neu(0.001, false));
        telemetrie.remote_melden(20, PegelWert::neu(0.2, false));
        telemetrie.lokal_melden(PegelWert::neu(0.3, true));

        let updates = telemetrie.abschluss(false);
        let ssrcs: Vec<u32> = updates.iter().map(|u| u.ssrc).collect();
        assert_eq!(ssrcs, vec![20, 30, 0]);
        assert_eq!(updates[2].wert, PegelWert::neu(0.3, true));
    }

    #[test]
    fn stumm_meldet_stille() {
        let mut telemetrie = PegelTelemetrie::neu(0.001);
        telemetrie.lokal_melden(PegelWert::neu(0.9, true));
        let updates = telemetrie.abschluss(true);
        assert_eq!(
            updates,
            vec![PegelUpdate {
                ssrc: 0,
                wert: PegelWert::STILLE
            }]
        );
    }

    #[test]
    fn tabelle_wird_pro_zeitraum_geleert() {
        let mut telemetrie = PegelTelemetrie::neu(0.001);
        telemetrie.remote_melden(5, PegelWert::neu(0.4, false));
        assert_eq!(telemetrie.abschluss(false).len(), 2);
        assert_eq!(telemetrie.abschluss(false).len(), 1);
        assert_eq!(telemetrie.ticks(), 2);
    }

    #[test]
    fn entfernter_teilnehmer_fehlt() {
        let mut telemetrie = PegelTelemetrie::neu(0.001);
        telemetrie.remote_melden(5, PegelWert::neu(0.4, false));
        telemetrie.entfernen(5);
        assert_eq!(telemetrie.abschluss(false).len(), 1);
    }
}
