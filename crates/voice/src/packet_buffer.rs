//! Puffer fuer Pakete noch unbekannter SSRCs
//!
//! Signalisierung und Medien laufen getrennt: Pakete eines gerade
//! angekuendigten Teilnehmers koennen eintreffen bevor seine SSRCs bekannt
//! sind. Sie werden hier zwischengelagert bis der Teilnehmer aufgenommen ist.
//!
//! ## Verhalten
//! - Feste Kapazitaet, O(1) Anhaengen
//! - Bei voller Kapazitaet faellt das aelteste Paket heraus, unabhaengig von
//!   der SSRC (eine laute SSRC kann Pakete anderer verdraengen)
//! - `entnehmen(ssrc)` entfernt alle Pakete dieser SSRC in Ankunftsreihenfolge

use std::collections::VecDeque;

use bytes::Bytes;

/// Statistiken des Puffers (Snapshot)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PufferStatistik {
    /// Aktuell gepufferte Pakete
    pub fuellstand: usize,
    /// Insgesamt gepufferte Pakete
    pub gepuffert: u64,
    /// Wegen voller Kapazitaet verworfene Pakete
    pub verdraengt: u64,
    /// Nach Aufloesung wieder ausgelieferte Pakete
    pub ausgeliefert: u64,
}

/// FIFO-Puffer fuer Pakete unbekannter SSRCs
pub struct FehlendePaketePuffer {
    kapazitaet: usize,
    pakete: VecDeque<(u32, Bytes)>,
    statistik: PufferStatistik,
}

impl FehlendePaketePuffer {
    pub fn neu(kapazitaet: usize) -> Self {
        Self {
            kapazitaet: kapazitaet.max(1),
            pakete: VecDeque::with_capacity(kapazitaet.max(1)),
            statistik: PufferStatistik::default(),
        }
    }

    /// Haengt ein Paket an; gibt `true` zurueck wenn dafuer eins verdraengt wurde
    pub fn hinzufuegen(&mut self, ssrc: u32, paket: Bytes) -> bool {
        let verdraengt = if self.pakete.len() >= self.kapazitaet {
            self.pakete.pop_front();
            self.statistik.verdraengt += 1;
            true
        } else {
            false
        };
        self.pakete.push_back((ssrc, paket));
        self.statistik.gepuffert += 1;
        verdraengt
    }

    /// Entnimmt alle Pakete einer SSRC in Ankunftsreihenfolge
    ///
    /// Pakete anderer SSRCs bleiben in ihrer relativen Reihenfolge liegen.
    pub fn entnehmen(&mut self, ssrc: u32) -> Vec<Bytes> {
        let mut treffer = Vec::new();
        self.pakete.retain(|(s, paket)| {
            if *s == ssrc {
                treffer.push(paket.clone());
                false
            } else {
                true
            }
        });
        self.statistik.ausgeliefert += treffer.len() as u64;
        treffer
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pakete.len()
    }

    pub fn statistik(&self) -> PufferStatistik {
        PufferStatistik {
            fuellstand: self.pakete.len(),
            ..self.statistik
        }
    }

    pub fn leeren(&mut self) {
        self.pakete.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn paket(n: u8) -> Bytes {
        Bytes::from(vec![n])
    }

    #[test]
    fn entnehmen_liefert_nur_passende_in_reihenfolge() {
        let mut puffer = FehlendePaketePuffer::neu(10);
        puffer.hinzufuegen(1, paket(1));
        puffer.hinzufuegen(2, paket(2));
        puffer.hinzufuegen(1, paket(3));
        puffer.hinzufuegen(3, paket(4));
        puffer.hinzufuegen(1, paket(5));

        assert_eq!(puffer.entnehmen(1), vec![paket(1), paket(3), paket(5)]);
        assert!(puffer.entnehmen(1).is_empty());
        assert_eq!(puffer.len(), 2);
        assert_eq!(puffer.entnehmen(2), vec![paket(2)]);
        assert_eq!(puffer.entnehmen(3), vec![paket(4)]);
    }

    #[test]
    fn kapazitaet_haelt_die_neuesten() {
        let mut puffer = FehlendePaketePuffer::neu(100);
        for i in 0..250u32 {
            puffer.hinzufuegen(i % 3, Bytes::from(i.to_be_bytes().to_vec()));
        }
        assert_eq!(puffer.len(), 100);

        let mut alle: Vec<u32> = (0..3)
            .flat_map(|ssrc| puffer.entnehmen(ssrc))
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        alle.sort_unstable();
        assert_eq!(alle, (150..250).collect::<Vec<u32>>());
    }

    #[test]
    fn verdraengung_ist_nicht_ssrc_fair() {
        let mut puffer = FehlendePaketePuffer::neu(3);
        puffer.hinzufuegen(7, paket(1));
        assert!(!puffer.hinzufuegen(9, paket(2)));
        assert!(!puffer.hinzufuegen(9, paket(3)));
        assert!(puffer.hinzufuegen(9, paket(4)));

        assert!(puffer.entnehmen(7).is_empty());
        assert_eq!(puffer.statistik().verdraengt, 1);
    }

    #[test]
    fn statistik_zaehlt() {
        let mut puffer = FehlendePaketePuffer::neu(2);
        puffer.hinzufuegen(1, paket(1));
        puffer.hinzufuegen(1, paket(2));
        puffer.hinzufuegen(2, paket(3));
        puffer.entnehmen(1);

        let statistik = puffer.statistik();
        assert_eq!(statistik.gepuffert, 3);
        assert_eq!(statistik.verdraengt, 1);
        assert_eq!(statistik.ausgeliefert, 1);
        assert_eq!(statistik.fuellstand, 1);
    }
}
