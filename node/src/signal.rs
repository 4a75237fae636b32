//! Signalisierung ueber KCP auf einem UDP-Socket
//!
//! ```text
//! SignalNachricht --kodieren--> SignalVerbindung --Datagramme--> send_to(gegenstelle)
//! recv_from --empfangen_extern--> SignalVerbindung --zustellung--> dekodieren
//! ```
//!
//! Ohne konfigurierte Gegenstelle gilt der Absender des ersten empfangenen
//! Datagramms; bis dahin gehen ausgehende Datagramme verloren und KCP
//! wiederholt sie.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use huddle_protocol::SignalNachricht;
use huddle_signaling::{KcpKonfig, KcpStatistik, SignalVerbindung};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const UDP_PUFFER_GROESSE: usize = 1500;

/// Signalisierungskanal zu genau einer Gegenstelle
pub struct SignalKanal {
    verbindung: SignalVerbindung,
    lokal: SocketAddr,
    gegenstelle: Arc<Mutex<Option<SocketAddr>>>,
    aufgaben: Vec<JoinHandle<()>>,
}

impl SignalKanal {
    /// Bindet den Socket und startet die KCP-Verbindung
    ///
    /// Dekodierte Nachrichten landen in `eingang`.
    pub async fn binden(
        addr: SocketAddr,
        gegenstelle: Option<SocketAddr>,
        konfig: KcpKonfig,
        eingang: mpsc::UnboundedSender<SignalNachricht>,
    ) -> anyhow::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let lokal = socket.local_addr()?;
        let gegenstelle = Arc::new(Mutex::new(gegenstelle));

        let (ausgang_tx, ausgang_rx) = mpsc::unbounded_channel();
        let (zustellung_tx, zustellung_rx) = mpsc::unbounded_channel();
        let verbindung = SignalVerbindung::starten(konfig, ausgang_tx, zustellung_tx);

        let aufgaben = vec![
            tokio::spawn(senden(socket.clone(), gegenstelle.clone(), ausgang_rx)),
            tokio::spawn(empfangen(socket, gegenstelle.clone(), verbindung.clone())),
            tokio::spawn(dekodieren(zustellung_rx, eingang)),
        ];

        tracing::info!(addr = %lokal, "Signalisierungs-Socket gebunden");
        Ok(Self {
            verbindung,
            lokal,
            gegenstelle,
            aufgaben,
        })
    }

    pub fn lokale_adresse(&self) -> SocketAddr {
        self.lokal
    }

    pub fn gegenstelle(&self) -> Option<SocketAddr> {
        *self.gegenstelle.lock()
    }

    pub fn gegenstelle_setzen(&self, addr: SocketAddr) {
        *self.gegenstelle.lock() = Some(addr);
    }

    pub fn senden(&self, nachricht: &SignalNachricht) -> anyhow::Result<()> {
        tracing::debug!(nachricht = nachricht.name(), "Signalnachricht senden");
        self.verbindung.senden(nachricht.kodieren()?)?;
        Ok(())
    }

    pub async fn statistik(&self) -> anyhow::Result<KcpStatistik> {
        Ok(self.verbindung.statistik().await?)
    }

    #[cfg(test)]
    pub(crate) fn schliessen(&self) {
        self.verbindung.schliessen();
    }
}

impl Drop for SignalKanal {
    fn drop(&mut self) {
        self.verbindung.schliessen();
        for aufgabe in &self.aufgaben {
            aufgabe.abort();
        }
    }
}

async fn senden(
    socket: Arc<UdpSocket>,
    gegenstelle: Arc<Mutex<Option<SocketAddr>>>,
    mut ausgang: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(datagramm) = ausgang.recv().await {
        let Some(ziel) = *gegenstelle.lock() else {
            tracing::trace!("Keine Gegenstelle, Datagramm verworfen");
            continue;
        };
        if let Err(e) = socket.send_to(&datagramm, ziel).await {
            tracing::debug!(fehler = %e, ziel = %ziel, "Signal-Datagramm nicht gesendet");
        }
    }
}

async fn empfangen(
    socket: Arc<UdpSocket>,
    gegenstelle: Arc<Mutex<Option<SocketAddr>>>,
    verbindung: SignalVerbindung,
) {
    let mut puffer = vec![0u8; UDP_PUFFER_GROESSE];
    loop {
        match socket.recv_from(&mut puffer).await {
            Ok((laenge, von)) => {
                {
                    let mut gegenstelle = gegenstelle.lock();
                    match *gegenstelle {
                        None => {
                            tracing::info!(gegenstelle = %von, "Gegenstelle gelernt");
                            *gegenstelle = Some(von);
                        }
                        Some(bekannt) if bekannt != von => {
                            tracing::debug!(von = %von, "Datagramm fremder Adresse ignoriert");
                            continue;
                        }
                        Some(_) => {}
                    }
                }
                if verbindung
                    .empfangen_extern(Bytes::copy_from_slice(&puffer[..laenge]))
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(fehler = %e, "Signal-Empfang gestoert");
            }
        }
    }
}

async fn dekodieren(
    mut zustellung: mpsc::UnboundedReceiver<Vec<u8>>,
    eingang: mpsc::UnboundedSender<SignalNachricht>,
) {
    while let Some(daten) = zustellung.recv().await {
        match SignalNachricht::dekodieren(&daten) {
            Ok(nachricht) => {
                if eingang.send(nachricht).is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(fehler = %e, "Unlesbare Signalnachricht"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn lokal() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn nachrichten_ueber_udp_austauschen() {
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let a = SignalKanal::binden(lokal(), None, KcpKonfig::default(), a_tx)
            .await
            .unwrap();
        let b = SignalKanal::binden(lokal(), Some(a.lokale_adresse()), KcpKonfig::default(), b_tx)
            .await
            .unwrap();

        // a lernt b aus dem ersten Datagramm
        b.senden(&SignalNachricht::SsrcsEntfernt(vec![1, 2])).unwrap();
        let nachricht = tokio::time::timeout(Duration::from_secs(5), a_rx.recv())
            .await
            .unwrap();
        assert_eq!(nachricht, Some(SignalNachricht::SsrcsEntfernt(vec![1, 2])));
        assert_eq!(a.gegenstelle(), Some(b.lokale_adresse()));

        a.senden(&SignalNachricht::TeilnehmerAnfrage { ssrcs: vec![9] })
            .unwrap();
        let antwort = tokio::time::timeout(Duration::from_secs(5), b_rx.recv())
            .await
            .unwrap();
        assert_eq!(
            antwort,
            Some(SignalNachricht::TeilnehmerAnfrage { ssrcs: vec![9] })
        );
    }

    #[tokio::test]
    async fn senden_nach_schliessen_meldet_fehler() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let kanal = SignalKanal::binden(lokal(), None, KcpKonfig::default(), tx)
            .await
            .unwrap();
        kanal.schliessen();
        assert!(kanal.senden(&SignalNachricht::SsrcsEntfernt(vec![1])).is_err());
    }
}
