//! Signalisierungsverbindung – KCP in einem eigenen tokio-Task
//!
//! Der Task besitzt die [`Kcp`]-Engine exklusiv und wird nur ueber
//! Nachrichten angesprochen. Der 10-ms-Takt plant sich selbst neu: nach jedem
//! Tick wird ein einmaliger verzoegerter Post abgesetzt, der nur noch eine
//! schwache Referenz auf die Befehls-Queue haelt. Ist die Verbindung
//! inzwischen geschlossen, verfaellt der Tick still.
//!
//! Ausgehende Datagramme gehen an `ausgang` (Transport), vollstaendige
//! Nachrichten an `zustellung` (Anwendung).

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::error::{KcpFehler, KcpResult};
use crate::kcp::{Kcp, KcpKonfig};

/// Momentaufnahme des Verbindungszustands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KcpStatistik {
    pub retransmissionen: u64,
    pub wartende_segmente: usize,
    pub srtt_ms: u32,
    pub tot: bool,
}

enum KcpBefehl {
    Senden(Vec<u8>),
    Empfangen(Bytes),
    Tick,
    Statistik(oneshot::Sender<KcpStatistik>),
    Schliessen,
}

/// Handle auf eine laufende Signalisierungsverbindung
///
/// Klonbar; der Task endet wenn alle Handles gedroppt sind oder
/// [`SignalVerbindung::schliessen`] aufgerufen wurde.
#[derive(Clone)]
pub struct SignalVerbindung {
    befehle: mpsc::UnboundedSender<KcpBefehl>,
}

impl SignalVerbindung {
    /// Startet den Verbindungs-Task; der erste Tick laeuft sofort
    pub fn starten(
        konfig: KcpKonfig,
        ausgang: mpsc::UnboundedSender<Bytes>,
        zustellung: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(KcpBefehl::Tick);

        let task = VerbindungsTask {
            intervall: Duration::from_millis(konfig.intervall_ms.max(1) as u64),
            kcp: Kcp::neu(&konfig),
            start: Instant::now(),
            selbst: tx.downgrade(),
            ausgang,
            zustellung,
        };
        tokio::spawn(task.ausfuehren(rx));

        tracing::debug!(
            konversation = konfig.konversation,
            mtu = konfig.mtu,
            "Signalisierungsverbindung gestartet"
        );
        Self { befehle: tx }
    }

    /// Reiht eine Nachricht ein; uebertragen wird beim naechsten Tick
    pub fn senden(&self, daten: Vec<u8>) -> KcpResult<()> {
        self.befehle
            .send(KcpBefehl::Senden(daten))
            .map_err(|_| KcpFehler::Geschlossen)
    }

    /// Speist ein vom Transport empfangenes Datagramm ein
    pub fn empfangen_extern(&self, daten: Bytes) -> KcpResult<()> {
        self.befehle
            .send(KcpBefehl::Empfangen(daten))
            .map_err(|_| KcpFehler::Geschlossen)
    }

    pub async fn statistik(&self) -> KcpResult<KcpStatistik> {
        let (tx, rx) = oneshot::channel();
        self.befehle
            .send(KcpBefehl::Statistik(tx))
            .map_err(|_| KcpFehler::Geschlossen)?;
        rx.await.map_err(|_| KcpFehler::Geschlossen)
    }

    /// Beendet den Task; ausstehende Befehle davor werden noch verarbeitet
    pub fn schliessen(&self) {
        let _ = self.befehle.send(KcpBefehl::Schliessen);
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

struct VerbindungsTask {
    kcp: Kcp,
    intervall: Duration,
    start: Instant,
    selbst: mpsc::WeakUnboundedSender<KcpBefehl>,
    ausgang: mpsc::UnboundedSender<Bytes>,
    zustellung: mpsc::UnboundedSender<Vec<u8>>,
}

impl VerbindungsTask {
    async fn ausfuehren(mut self, mut rx: mpsc::UnboundedReceiver<KcpBefehl>) {
        let mut war_tot = false;
        while let Some(befehl) = rx.recv().await {
            match befehl {
                KcpBefehl::Senden(daten) => {
                    if let Err(e) = self.kcp.senden(&daten) {
                        tracing::warn!(fehler = %e, laenge = daten.len(), "Nachricht verworfen");
                    }
                }
                KcpBefehl::Empfangen(daten) => {
                    if let Err(e) = self.kcp.eingabe(&daten) {
                        tracing::debug!(fehler = %e, laenge = daten.len(), "Ungueltiges KCP-Datagramm");
                    }
                }
                KcpBefehl::Tick => {
                    self.tick();
                    if self.kcp.ist_tot() && !war_tot {
                        war_tot = true;
                        tracing::warn!("Signalisierungsverbindung antwortet nicht mehr");
                    }
                    self.naechsten_tick_planen();
                }
                KcpBefehl::Statistik(antwort) => {
                    let _ = antwort.send(KcpStatistik {
                        retransmissionen: self.kcp.retransmissionen(),
                        wartende_segmente: self.kcp.wartende_segmente(),
                        srtt_ms: self.kcp.srtt_ms(),
                        tot: self.kcp.ist_tot(),
                    });
                }
                KcpBefehl::Schliessen => break,
            }
        }
        tracing::debug!("Signalisierungsverbindung beendet");
    }

    fn tick(&mut self) {
        let jetzt_ms = self.start.elapsed().as_millis() as u32;
        self.kcp.update(jetzt_ms);

        for datagramm in self.kcp.ausgang_leeren() {
            if self.ausgang.send(datagramm).is_err() {
                tracing::trace!("Transport geschlossen, Datagramm verworfen");
            }
        }
        while let Some(nachricht) = self.kcp.empfangen() {
            tracing::trace!(laenge = nachricht.len(), "Signalnachricht zugestellt");
            if self.zustellung.send(nachricht).is_err() {
                tracing::trace!("Empfaenger geschlossen, Nachricht verworfen");
            }
        }
    }

    fn naechsten_tick_planen(&self) {
        let selbst = self.selbst.clone();
        let intervall = self.intervall;
        tokio::spawn(async move {
            tokio::time::sleep(intervall).await;
            if let Some(tx) = selbst.upgrade() {
                let _ = tx.send(KcpBefehl::Tick);
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Verbindet zwei Endpunkte; jedes `verlust_jedes`-te Datagramm geht verloren
    fn verkabeln(
        mut von: mpsc::UnboundedReceiver<Bytes>,
        nach: SignalVerbindung,
        verlust_jedes: usize,
    ) {
        tokio::spawn(async move {
            let mut zaehler = 0usize;
            while let Some(datagramm) = von.recv().await {
                zaehler += 1;
                if verlust_jedes > 0 && zaehler % verlust_jedes == 0 {
                    continue;
                }
                if nach.empfangen_extern(datagramm).is_err() {
                    break;
                }
            }
        });
    }

    struct Endpunkt {
        verbindung: SignalVerbindung,
        ausgang: mpsc::UnboundedReceiver<Bytes>,
        zustellung: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    fn endpunkt() -> Endpunkt {
        let (ausgang_tx, ausgang) = mpsc::unbounded_channel();
        let (zustellung_tx, zustellung) = mpsc::unbounded_channel();
        Endpunkt {
            verbindung: SignalVerbindung::starten(KcpKonfig::default(), ausgang_tx, zustellung_tx),
            ausgang,
            zustellung,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn nachrichten_kommen_geordnet_an() {
        let a = endpunkt();
        let mut b = endpunkt();
        verkabeln(a.ausgang, b.verbindung.clone(), 0);
        verkabeln(b.ausgang, a.verbindung.clone(), 0);

        for i in 0..20u8 {
            a.verbindung.senden(vec![i; 10]).unwrap();
        }
        for i in 0..20u8 {
            let nachricht = tokio::time::timeout(Duration::from_secs(10), b.zustellung.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(nachricht, vec![i; 10]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn verlust_wird_durch_wiederholung_ausgeglichen() {
        let a = endpunkt();
        let mut b = endpunkt();
        verkabeln(a.ausgang, b.verbindung.clone(), 3);
        verkabeln(b.ausgang, a.verbindung.clone(), 4);

        for i in 0..10u8 {
            a.verbindung.senden(vec![i]).unwrap();
        }
        for i in 0..10u8 {
            let nachricht = tokio::time::timeout(Duration::from_secs(600), b.zustellung.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(nachricht, vec![i]);
        }
        let statistik = a.verbindung.statistik().await.unwrap();
        assert!(statistik.retransmissionen > 0);
        assert!(!statistik.tot);
    }

    #[tokio::test(start_paused = true)]
    async fn geschlossene_verbindung_lehnt_ab() {
        let a = endpunkt();
        a.verbindung.schliessen();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(a.verbindung.senden(vec![1]), Err(KcpFehler::Geschlossen));
        assert_eq!(a.verbindung.statistik().await, Err(KcpFehler::Geschlossen));
    }
}
