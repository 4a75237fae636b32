//! SSRC-Router – Zuordnung eingehender Pakete zu Teilnehmern
//!
//! Der `SsrcRouter` klassifiziert jedes eingehende Paket und entscheidet
//! wohin es gehoert. Er fuehrt selbst keine Zustellung durch; das Ergebnis
//! wird von der Session auf die Kanaele angewendet.
//!
//! ## Ablauf
//! - RTCP: immer zustellbar (Media-Engine entscheidet)
//! - RTP mit eigener Sende-SSRC: verwerfen (Echo der eigenen Pakete)
//! - RTP mit bekannter SSRC: an den Kanal `(primaer_ssrc, art)`
//! - RTP mit unbekannter SSRC: puffern und gebuendelt nachfragen
//!
//! ## Nachfrage-Buendelung
//! Jede unbekannte SSRC wird nur einmal gemeldet. Liegt die letzte Meldung
//! mehr als 100 ms zurueck, wird sofort gemeldet, sonst genau ein Timer
//! geplant der alle bis dahin gesammelten SSRCs in einer Meldung verschickt.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use bytes::Bytes;
use huddle_core::MedienArt;
use huddle_protocol::rtp::{self, PaketKlasse};
use tokio::time::Instant;

use crate::packet_buffer::{FehlendePaketePuffer, PufferStatistik};
use crate::state::{SsrcEintrag, SsrcTabelle};

// ---------------------------------------------------------------------------
// Unbekannte SSRCs melden
// ---------------------------------------------------------------------------

/// Was nach dem Sichten einer unbekannten SSRC zu tun ist
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeldeSchritt {
    /// Schon gemeldet oder Timer laeuft bereits
    Nichts,
    /// Diese SSRCs jetzt melden
    JetztMelden(Vec<u32>),
    /// Einmaligen Timer mit dieser Verzoegerung planen
    TimerPlanen(Duration),
}

/// Buendelt Nachfragen nach Teilnehmerbeschreibungen
pub struct UnbekannteSsrcMelder {
    fenster: Duration,
    gemeldet: HashSet<u32>,
    ausstehend: BTreeSet<u32>,
    letzte_meldung: Option<Instant>,
    timer_geplant: bool,
    meldungen: u64,
}

impl UnbekannteSsrcMelder {
    pub fn neu(fenster: Duration) -> Self {
        Self {
            fenster,
            gemeldet: HashSet::new(),
            ausstehend: BTreeSet::new(),
            letzte_meldung: None,
            timer_geplant: false,
            meldungen: 0,
        }
    }

    /// Registriert eine unbekannte SSRC
    pub fn sichten(&mut self, ssrc: u32, jetzt: Instant) -> MeldeSchritt {
        if !self.gemeldet.insert(ssrc) {
            return MeldeSchritt::Nichts;
        }
        self.ausstehend.insert(ssrc);

        let faellig = self
            .letzte_meldung
            .map_or(true, |letzte| jetzt.duration_since(letzte) > self.fenster);
        if faellig {
            // Ein noch laufender Timer findet danach eine leere Menge vor
            return match self.melden(jetzt) {
                Some(ssrcs) => MeldeSchritt::JetztMelden(ssrcs),
                None => MeldeSchritt::Nichts,
            };
        }

        if self.timer_geplant {
            MeldeSchritt::Nichts
        } else {
            self.timer_geplant = true;
            MeldeSchritt::TimerPlanen(self.fenster)
        }
    }

    /// Der geplante Timer ist abgelaufen
    ///
    /// Ohne ausstehende SSRCs passiert nichts.
    pub fn timer_ausgeloest(&mut self, jetzt: Instant) -> Option<Vec<u32>> {
        self.timer_geplant = false;
        self.melden(jetzt)
    }

    /// Vergisst alle gemeldeten und ausstehenden SSRCs
    pub fn zuruecksetzen(&mut self) {
        self.gemeldet.clear();
        self.ausstehend.clear();
        self.letzte_meldung = None;
    }

    fn melden(&mut self, jetzt: Instant) -> Option<Vec<u32>> {
        if self.ausstehend.is_empty() {
            return None;
        }
        let ssrcs: Vec<u32> = std::mem::take(&mut self.ausstehend).into_iter().collect();
        self.letzte_meldung = Some(jetzt);
        self.meldungen += 1;
        Some(ssrcs)
    }

    /// SSRCs wieder als unbekannt behandeln (Teilnehmer hat verlassen)
    pub fn vergessen(&mut self, ssrcs: &[u32]) {
        for ssrc in ssrcs {
            self.gemeldet.remove(ssrc);
            self.ausstehend.remove(ssrc);
        }
    }

    /// Gesammelte, noch nicht gemeldete SSRCs
    pub fn ausstehend(&self) -> usize {
        self.ausstehend.len()
    }

    pub fn meldungen(&self) -> u64 {
        self.meldungen
    }

    pub fn timer_geplant(&self) -> bool {
        self.timer_geplant
    }
}

// ---------------------------------------------------------------------------
// SsrcRouter
// ---------------------------------------------------------------------------

/// Ergebnis der Paket-Zuordnung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingErgebnis {
    /// RTCP, an die Media-Engine ohne Medienart
    Steuerung,
    /// Eigene Sende-SSRC, verworfen
    EigenesPaket,
    /// Bekannte SSRC
    Zustellen(SsrcEintrag),
    /// Unbekannte SSRC, Paket liegt im Puffer
    Gepuffert { ssrc: u32, meldung: MeldeSchritt },
    /// Header nicht lesbar, verworfen
    Ungueltig,
}

/// Zaehler des Routers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStatistik {
    pub zugestellt: u64,
    pub steuerung: u64,
    pub eigene_verworfen: u64,
    pub ungueltig: u64,
    pub meldungen: u64,
    pub ausstehend: usize,
    pub puffer: PufferStatistik,
}

/// Ordnet eingehende Pakete Teilnehmern zu
pub struct SsrcRouter {
    lokale_ssrc: u32,
    tabelle: SsrcTabelle,
    puffer: FehlendePaketePuffer,
    melder: UnbekannteSsrcMelder,
    zugestellt: u64,
    steuerung: u64,
    eigene_verworfen: u64,
    ungueltig: u64,
}

impl SsrcRouter {
    pub fn neu(lokale_ssrc: u32, puffer_kapazitaet: usize, melde_fenster: Duration) -> Self {
        Self {
            lokale_ssrc,
            tabelle: SsrcTabelle::neu(),
            puffer: FehlendePaketePuffer::neu(puffer_kapazitaet),
            melder: UnbekannteSsrcMelder::neu(melde_fenster),
            zugestellt: 0,
            steuerung: 0,
            eigene_verworfen: 0,
            ungueltig: 0,
        }
    }

    /// Ordnet ein eingehendes Paket zu
    ///
    /// Unbekannte Pakete werden dabei bereits gepuffert.
    pub fn route(&mut self, paket: &Bytes, jetzt: Instant) -> RoutingErgebnis {
        let header = match rtp::klassifizieren(paket) {
            Ok(PaketKlasse::Rtcp) => {
                self.steuerung += 1;
                return RoutingErgebnis::Steuerung;
            }
            Ok(PaketKlasse::Rtp(header)) => header,
            Err(e) => {
                self.ungueltig += 1;
                tracing::debug!(fehler = %e, laenge = paket.len(), "Paket verworfen");
                return RoutingErgebnis::Ungueltig;
            }
        };

        let ssrc = header.ssrc;
        if ssrc == self.lokale_ssrc {
            self.eigene_verworfen += 1;
            return RoutingErgebnis::EigenesPaket;
        }

        if let Some(eintrag) = self.tabelle.aufloesen(ssrc) {
            self.zugestellt += 1;
            return RoutingErgebnis::Zustellen(eintrag);
        }

        if self.puffer.hinzufuegen(ssrc, paket.clone()) {
            tracing::trace!(ssrc, "Puffer voll, aeltestes Paket verdraengt");
        }
        let meldung = self.melder.sichten(ssrc, jetzt);
        RoutingErgebnis::Gepuffert { ssrc, meldung }
    }

    /// Traegt eine SSRC ein; `true` wenn sie neu ist
    pub fn eintragen(&mut self, ssrc: u32, primaer_ssrc: u32, art: MedienArt) -> bool {
        self.tabelle.eintragen(ssrc, primaer_ssrc, art)
    }

    pub fn aufloesen(&self, ssrc: u32) -> Option<SsrcEintrag> {
        self.tabelle.aufloesen(ssrc)
    }

    /// Gepufferte Pakete einer jetzt bekannten SSRC
    pub fn gepufferte_entnehmen(&mut self, ssrc: u32) -> Vec<Bytes> {
        self.puffer.entnehmen(ssrc)
    }

    /// Entfernt alle SSRCs eines Teilnehmers aus Tabelle und Melder
    pub fn teilnehmer_entfernen(&mut self, primaer_ssrc: u32) -> Vec<u32> {
        let ssrcs = self.tabelle.teilnehmer_entfernen(primaer_ssrc);
        self.melder.vergessen(&ssrcs);
        ssrcs
    }

    pub fn melde_timer_ausgeloest(&mut self, jetzt: Instant) -> Option<Vec<u32>> {
        self.melder.timer_ausgeloest(jetzt)
    }

    pub fn lokale_ssrc(&self) -> u32 {
        self.lokale_ssrc
    }

    pub fn statistik(&self) -> RouterStatistik {
        RouterStatistik {
            zugestellt: self.zugestellt,
            steuerung: self.steuerung,
            eigene_verworfen: self.eigene_verworfen,
            ungueltig: self.ungueltig,
            meldungen: self.melder.meldungen(),
            ausstehend: self.melder.ausstehend(),
            puffer: self.puffer.statistik(),
        }
    }

    pub fn leeren(&mut self) {
        self.tabelle.leeren();
        self.puffer.leeren();
        self.melder.zuruecksetzen();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::rtp::rtp_paket_bauen;

    const FENSTER: Duration = Duration::from_millis(100);

    fn rtp(ssrc: u32) -> Bytes {
        Bytes::from(rtp_paket_bauen(111, 1, 0, ssrc, &[0xAB]))
    }

    fn rtcp() -> Bytes {
        Bytes::from_static(&[0x80, 200, 0x00, 0x01, 0, 0, 0, 9])
    }

    #[test]
    fn rtcp_ist_immer_zustellbar() {
        let mut router = SsrcRouter::neu(1, 100, FENSTER);
        assert_eq!(router.route(&rtcp(), Instant::now()), RoutingErgebnis::Steuerung);
    }

    #[test]
    fn eigene_ssrc_wird_verworfen() {
        let mut router = SsrcRouter::neu(42, 100, FENSTER);
        assert_eq!(router.route(&rtp(42), Instant::now()), RoutingErgebnis::EigenesPaket);
        assert_eq!(router.statistik().puffer.fuellstand, 0);
    }

    #[test]
    fn kaputtes_paket_ist_ungueltig() {
        let mut router = SsrcRouter::neu(1, 100, FENSTER);
        let kaputt = Bytes::from_static(&[0x80, 111, 0, 1]);
        assert_eq!(router.route(&kaputt, Instant::now()), RoutingErgebnis::Ungueltig);
        assert_eq!(router.statistik().ungueltig, 1);
    }

    #[test]
    fn bekannte_ssrc_wird_jedes_mal_zugestellt() {
        let mut router = SsrcRouter::neu(1, 100, FENSTER);
        router.eintragen(1002, 1001, MedienArt::Video);
        let paket = rtp(1002);
        let jetzt = Instant::now();
        for _ in 0..2 {
            assert_eq!(
                router.route(&paket, jetzt),
                RoutingErgebnis::Zustellen(SsrcEintrag {
                    primaer_ssrc: 1001,
                    art: MedienArt::Video
                })
            );
        }
        assert_eq!(router.statistik().zugestellt, 2);
    }

    #[test]
    fn unbekannte_ssrc_wird_gepuffert_und_gemeldet() {
        let mut router = SsrcRouter::neu(1, 100, FENSTER);
        let jetzt = Instant::now();
        assert_eq!(
            router.route(&rtp(1001), jetzt),
            RoutingErgebnis::Gepuffert {
                ssrc: 1001,
                meldung: MeldeSchritt::JetztMelden(vec![1001])
            }
        );
        // Zweites Paket: nur puffern, keine erneute Meldung
        assert_eq!(
            router.route(&rtp(1001), jetzt),
            RoutingErgebnis::Gepuffert {
                ssrc: 1001,
                meldung: MeldeSchritt::Nichts
            }
        );
        router.eintragen(1001, 1001, MedienArt::Audio);
        assert_eq!(router.gepufferte_entnehmen(1001).len(), 2);
    }

    #[test]
    fn meldungen_innerhalb_des_fensters_werden_gebuendelt() {
        let mut melder = UnbekannteSsrcMelder::neu(FENSTER);
        let t0 = Instant::now();
        assert_eq!(melder.sichten(1, t0), MeldeSchritt::JetztMelden(vec![1]));

        let t1 = t0 + Duration::from_millis(10);
        assert_eq!(melder.sichten(3, t1), MeldeSchritt::TimerPlanen(FENSTER));
        // Timer laeuft bereits: kein zweiter
        assert_eq!(melder.sichten(2, t1), MeldeSchritt::Nichts);
        assert!(melder.timer_geplant());
        assert_eq!(melder.ausstehend(), 2);

        let t2 = t1 + FENSTER;
        assert_eq!(melder.timer_ausgeloest(t2), Some(vec![2, 3]));
        assert!(!melder.timer_geplant());
        assert_eq!(melder.meldungen(), 2);
    }

    #[test]
    fn nach_ablauf_des_fensters_sofort_melden() {
        let mut melder = UnbekannteSsrcMelder::neu(FENSTER);
        let t0 = Instant::now();
        melder.sichten(1, t0);
        let spaeter = t0 + Duration::from_millis(101);
        assert_eq!(melder.sichten(2, spaeter), MeldeSchritt::JetztMelden(vec![2]));
    }

    #[test]
    fn genau_100_ms_ist_noch_im_fenster() {
        let mut melder = UnbekannteSsrcMelder::neu(FENSTER);
        let t0 = Instant::now();
        melder.sichten(1, t0);
        assert_eq!(
            melder.sichten(2, t0 + FENSTER),
            MeldeSchritt::TimerPlanen(FENSTER)
        );
    }

    #[test]
    fn leerer_timer_meldet_nichts() {
        let mut melder = UnbekannteSsrcMelder::neu(FENSTER);
        assert_eq!(melder.timer_ausgeloest(Instant::now()), None);
        assert_eq!(melder.meldungen(), 0);
    }

    #[test]
    fn abgelaufenes_fenster_meldet_trotz_laufendem_timer() {
        let mut melder = UnbekannteSsrcMelder::neu(FENSTER);
        let t0 = Instant::now();
        melder.sichten(1, t0);
        let t1 = t0 + Duration::from_millis(10);
        assert_eq!(melder.sichten(2, t1), MeldeSchritt::TimerPlanen(FENSTER));

        // Timer verspaetet, Fenster aber schon vorbei
        let t2 = t0 + Duration::from_millis(150);
        assert_eq!(melder.sichten(3, t2), MeldeSchritt::JetztMelden(vec![2, 3]));
        assert_eq!(melder.ausstehend(), 0);

        // Der spaete Timer hat nichts mehr zu tun
        assert_eq!(melder.timer_ausgeloest(t2 + Duration::from_millis(1)), None);
        assert!(!melder.timer_geplant());
        assert_eq!(melder.meldungen(), 2);
    }

    #[test]
    fn leeren_setzt_auch_den_melder_zurueck() {
        let mut router = SsrcRouter::neu(1, 100, FENSTER);
        let t0 = Instant::now();
        assert!(matches!(
            router.route(&rtp(1001), t0),
            RoutingErgebnis::Gepuffert {
                meldung: MeldeSchritt::JetztMelden(_),
                ..
            }
        ));
        router.route(&rtp(1002), t0 + Duration::from_millis(10));
        assert_eq!(router.statistik().ausstehend, 1);

        router.leeren();
        assert_eq!(router.statistik().ausstehend, 0);

        // Nach dem Leeren gilt 1001 wieder als neu und wird sofort gemeldet
        assert_eq!(
            router.route(&rtp(1001), t0 + Duration::from_millis(20)),
            RoutingErgebnis::Gepuffert {
                ssrc: 1001,
                meldung: MeldeSchritt::JetztMelden(vec![1001])
            }
        );
    }

    #[test]
    fn entfernte_teilnehmer_werden_vergessen() {
        let mut router = SsrcRouter::neu(1, 100, FENSTER);
        router.eintragen(1001, 1001, MedienArt::Audio);
        router.eintragen(1002, 1001, MedienArt::Video);
        assert_eq!(router.teilnehmer_entfernen(1001), vec![1001, 1002]);
        assert!(router.aufloesen(1002).is_none());

        // Wieder unbekannt: wird erneut gepuffert
        assert!(matches!(
            router.route(&rtp(1001), Instant::now()),
            RoutingErgebnis::Gepuffert { ssrc: 1001, .. }
        ));
    }
}
