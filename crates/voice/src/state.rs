//! SSRC-Tabelle – Zuordnung jeder SSRC zu ihrem Teilnehmer
//!
//! Jede auf dem Draht gesehene SSRC (Audio, Video-Layer, RTX) zeigt auf die
//! primaere Audio-SSRC des Teilnehmers und die Medienart. Eintraege
//! entstehen nur bei der Aufnahme eines Teilnehmers, werden nie veraendert
//! und verschwinden wenn der Teilnehmer geht.
//!
//! Die Tabelle gehoert exklusiv dem Media-Kontext, daher ohne Locks.

use std::collections::HashMap;

use huddle_core::MedienArt;

/// Ein Eintrag der SSRC-Tabelle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SsrcEintrag {
    /// Primaere Audio-SSRC des Teilnehmers
    pub primaer_ssrc: u32,
    pub art: MedienArt,
}

/// Zuordnung SSRC -> Teilnehmer
#[derive(Debug, Default)]
pub struct SsrcTabelle {
    eintraege: HashMap<u32, SsrcEintrag>,
}

impl SsrcTabelle {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Traegt eine SSRC ein; ist sie schon vergeben, bleibt der alte Eintrag
    ///
    /// Gibt `true` zurueck wenn die SSRC neu eingetragen wurde.
    pub fn eintragen(&mut self, ssrc: u32, primaer_ssrc: u32, art: MedienArt) -> bool {
        if self.eintraege.contains_key(&ssrc) {
            tracing::trace!(ssrc, primaer_ssrc, "SSRC bereits zugeordnet");
            return false;
        }
        self.eintraege.insert(ssrc, SsrcEintrag { primaer_ssrc, art });
        true
    }

    pub fn aufloesen(&self, ssrc: u32) -> Option<SsrcEintrag> {
        self.eintraege.get(&ssrc).copied()
    }

    /// Entfernt alle Eintraege eines Teilnehmers und gibt deren SSRCs zurueck
    pub fn teilnehmer_entfernen(&mut self, primaer_ssrc: u32) -> Vec<u32> {
        let mut entfernt: Vec<u32> = self
            .eintraege
            .iter()
            .filter(|(_, e)| e.primaer_ssrc == primaer_ssrc)
            .map(|(ssrc, _)| *ssrc)
            .collect();
        for ssrc in &entfernt {
            self.eintraege.remove(ssrc);
        }
        entfernt.sort_unstable();
        entfernt
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.eintraege.len()
    }

    pub fn leeren(&mut self) {
        self.eintraege.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eintragen_und_aufloesen() {
        let mut tabelle = SsrcTabelle::neu();
        assert!(tabelle.eintragen(1001, 1001, MedienArt::Audio));
        assert!(tabelle.eintragen(1002, 1001, MedienArt::Video));

        let video = tabelle.aufloesen(1002).unwrap();
        assert_eq!(video.primaer_ssrc, 1001);
        assert_eq!(video.art, MedienArt::Video);
        assert!(tabelle.aufloesen(9999).is_none());
    }

    #[test]
    fn erster_eintrag_gewinnt() {
        let mut tabelle = SsrcTabelle::neu();
        assert!(tabelle.eintragen(5, 5, MedienArt::Audio));
        assert!(!tabelle.eintragen(5, 7, MedienArt::Video));
        assert_eq!(
            tabelle.aufloesen(5),
            Some(SsrcEintrag {
                primaer_ssrc: 5,
                art: MedienArt::Audio
            })
        );
    }

    #[test]
    fn teilnehmer_entfernen_nimmt_alle_ssrcs() {
        let mut tabelle = SsrcTabelle::neu();
        tabelle.eintragen(1001, 1001, MedienArt::Audio);
        tabelle.eintragen(1003, 1001, MedienArt::Video);
        tabelle.eintragen(1002, 1001, MedienArt::Video);
        tabelle.eintragen(2001, 2001, MedienArt::Audio);

        assert_eq!(tabelle.teilnehmer_entfernen(1001), vec![1001, 1002, 1003]);
        assert_eq!(tabelle.len(), 1);
        assert!(tabelle.aufloesen(2001).is_some());
        assert!(tabelle.teilnehmer_entfernen(1001).is_empty());
    }

    #[test]
    fn leeren_vergisst_alle_zuordnungen() {
        let mut tabelle = SsrcTabelle::neu();
        tabelle.eintragen(1001, 1001, MedienArt::Audio);
        tabelle.eintragen(2001, 2001, MedienArt::Audio);
        tabelle.leeren();
        assert_eq!(tabelle.len(), 0);
        assert!(tabelle.eintragen(1001, 1001, MedienArt::Audio));
    }
}
