//! UDP-Netzwerk-Manager – einfacher Transport ohne ICE-Aushandlung
//!
//! Bindet einen UDP-Socket und spricht genau eine Gegenstelle an. Die
//! Gegenstelle kommt aus der Konfiguration oder aus dem ersten gueltigen
//! Remote-Kandidaten. Ufrag und Passwort werden zufaellig erzeugt und nur
//! durchgereicht.
//!
//! ## Architektur
//!
//! ```text
//! UDP Socket (recv_from)          Netzwerk-Kontext
//!     |                                 |
//!     v                                 v
//! Empfangs-Task               nachricht_senden()
//!     |                                 |
//!     +--> NetzwerkRueckmeldung::paket  +--> Sende-Queue --> Sende-Task
//!                                                              |
//!                                                              +--> send_to(ziel).await
//! ```

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use huddle_core::Result;
use huddle_protocol::{IceKandidat, IceParameter};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::network::{NetzwerkManager, NetzwerkRueckmeldung};

/// Maximale Groesse eines empfangenen Datagramms
const UDP_PUFFER_GROESSE: usize = 1500;
/// Pakete die auf den Sende-Task warten duerfen
const SENDE_QUEUE_GROESSE: usize = 512;

fn zufalls_text(laenge: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(laenge)
        .map(char::from)
        .collect()
}

/// Transport ueber einen einzelnen UDP-Socket
pub struct UdpNetzwerkManager {
    socket: Arc<UdpSocket>,
    lokal: SocketAddr,
    ice: IceParameter,
    ziel: Option<SocketAddr>,
    rueckmeldung: Option<NetzwerkRueckmeldung>,
    empfang: Option<JoinHandle<()>>,
    sende_queue: mpsc::Sender<(Bytes, SocketAddr)>,
    sender: JoinHandle<()>,
}

impl UdpNetzwerkManager {
    /// Bindet den Socket; `ziel` ist optional und kann spaeter ueber
    /// Remote-Kandidaten gesetzt werden
    pub async fn binden(addr: SocketAddr, ziel: Option<SocketAddr>) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let lokal = socket.local_addr()?;
        tracing::info!(addr = %lokal, "UDP-Medien-Socket gebunden");

        let socket = Arc::new(socket);
        let (sende_queue, rx) = mpsc::channel(SENDE_QUEUE_GROESSE);
        let sender = tokio::spawn(sende_schleife(socket.clone(), rx));

        Ok(Self {
            socket,
            lokal,
            ice: IceParameter {
                ufrag: zufalls_text(8),
                pwd: zufalls_text(24),
            },
            ziel,
            rueckmeldung: None,
            empfang: None,
            sende_queue,
            sender,
        })
    }

    pub fn lokale_adresse(&self) -> SocketAddr {
        self.lokal
    }

    pub fn ziel(&self) -> Option<SocketAddr> {
        self.ziel
    }

    fn bereit_melden(&self) {
        if let (Some(rueckmeldung), Some(ziel)) = (&self.rueckmeldung, self.ziel) {
            tracing::info!(ziel = %ziel, "UDP-Transport bereit");
            rueckmeldung.zustand(true, false);
        }
    }
}

async fn sende_schleife(socket: Arc<UdpSocket>, mut rx: mpsc::Receiver<(Bytes, SocketAddr)>) {
    while let Some((daten, ziel)) = rx.recv().await {
        match socket.send_to(&daten, ziel).await {
            Ok(_) => tracing::trace!(bytes = daten.len(), ziel = %ziel, "UDP-Paket gesendet"),
            Err(e) => tracing::warn!(fehler = %e, ziel = %ziel, "UDP-Sendefehler"),
        }
    }
    tracing::debug!("UDP-Sende-Task beendet");
}

async fn empfangs_schleife(socket: Arc<UdpSocket>, rueckmeldung: NetzwerkRueckmeldung) {
    let mut puffer = vec![0u8; UDP_PUFFER_GROESSE];
    loop {
        match socket.recv_from(&mut puffer).await {
            Ok((laenge, von)) => {
                tracing::trace!(bytes = laenge, von = %von, "UDP-Paket empfangen");
                rueckmeldung.paket(Bytes::copy_from_slice(&puffer[..laenge]));
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused | ErrorKind::Interrupted
                ) =>
            {
                tracing::debug!(fehler = %e, "UDP-Empfang voruebergehend gestoert");
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "UDP-Empfang fehlgeschlagen");
                rueckmeldung.zustand(false, true);
                break;
            }
        }
    }
}

impl NetzwerkManager for UdpNetzwerkManager {
    fn starten(&mut self, rueckmeldung: NetzwerkRueckmeldung) {
        self.empfang = Some(tokio::spawn(empfangs_schleife(
            self.socket.clone(),
            rueckmeldung.clone(),
        )));
        self.rueckmeldung = Some(rueckmeldung);
        self.bereit_melden();
    }

    fn nachricht_senden(&mut self, daten: &[u8]) -> bool {
        let Some(ziel) = self.ziel else {
            return false;
        };
        match self
            .sende_queue
            .try_send((Bytes::copy_from_slice(daten), ziel))
        {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(fehler = %e, ziel = %ziel, "UDP-Sende-Queue voll, Paket verworfen");
                false
            }
        }
    }

    fn lokale_ice_parameter(&self) -> IceParameter {
        self.ice.clone()
    }

    fn remote_parameter_setzen(&mut self, _ice: IceParameter, kandidaten: Vec<IceKandidat>) {
        let neues_ziel = kandidaten.iter().find_map(|k| k.adresse().ok());
        match neues_ziel {
            Some(ziel) if self.ziel != Some(ziel) => {
                self.ziel = Some(ziel);
                self.bereit_melden();
            }
            Some(_) => {}
            None => tracing::debug!("Kein verwendbarer Remote-Kandidat"),
        }
    }
}

impl Drop for UdpNetzwerkManager {
    fn drop(&mut self) {
        if let Some(empfang) = self.empfang.take() {
            empfang.abort();
        }
        self.sender.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{MedienNachricht, MedienPost};
    use tokio::sync::mpsc;

    fn lokal() -> SocketAddr {
        "127.0.0.1:0".parse::<SocketAddr>().unwrap()
    }

    fn kandidat_fuer(addr: SocketAddr) -> IceKandidat {
        IceKandidat {
            component: "1".into(),
            protocol: "udp".into(),
            ip: addr.ip().to_string(),
            port: addr.port().to_string(),
            priority: "1".into(),
            typ: "host".into(),
            generation: "0".into(),
            foundation: "1".into(),
            network: "1".into(),
        }
    }

    #[tokio::test]
    async fn ice_parameter_sind_zufaellig() {
        let a = UdpNetzwerkManager::binden(lokal(), None).await.unwrap();
        let b = UdpNetzwerkManager::binden(lokal(), None).await.unwrap();
        assert_eq!(a.lokale_ice_parameter().ufrag.len(), 8);
        assert_eq!(a.lokale_ice_parameter().pwd.len(), 24);
        assert_ne!(a.lokale_ice_parameter(), b.lokale_ice_parameter());
    }

    #[tokio::test]
    async fn ohne_ziel_wird_nicht_gesendet() {
        let mut a = UdpNetzwerkManager::binden(lokal(), None).await.unwrap();
        assert!(!a.nachricht_senden(b"x"));
    }

    #[tokio::test]
    async fn kandidat_setzt_ziel_und_meldet_bereit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut a = UdpNetzwerkManager::binden(lokal(), None).await.unwrap();
        let mut b = UdpNetzwerkManager::binden(lokal(), None).await.unwrap();
        b.starten(NetzwerkRueckmeldung::neu(MedienPost::neu(&tx)));

        b.remote_parameter_setzen(
            a.lokale_ice_parameter(),
            vec![kandidat_fuer(a.lokale_adresse())],
        );
        assert_eq!(b.ziel(), Some(a.lokale_adresse()));
        assert!(matches!(
            rx.recv().await,
            Some(MedienNachricht::NetzwerkZustand {
                bereit: true,
                fehlgeschlagen: false
            })
        ));

        // a -> b landet als PaketEmpfangen
        a.remote_parameter_setzen(
            b.lokale_ice_parameter(),
            vec![kandidat_fuer(b.lokale_adresse())],
        );
        assert!(a.nachricht_senden(b"rtp-paket"));
        match rx.recv().await {
            Some(MedienNachricht::PaketEmpfangen(daten)) => assert_eq!(&daten[..], b"rtp-paket"),
            _ => panic!("PaketEmpfangen erwartet"),
        }
    }

    #[tokio::test]
    async fn pakete_direkt_nach_zielwahl_gehen_nicht_verloren() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut a = UdpNetzwerkManager::binden(lokal(), None).await.unwrap();
        let mut b = UdpNetzwerkManager::binden(lokal(), None).await.unwrap();
        b.starten(NetzwerkRueckmeldung::neu(MedienPost::neu(&tx)));
        a.remote_parameter_setzen(
            b.lokale_ice_parameter(),
            vec![kandidat_fuer(b.lokale_adresse())],
        );

        // Ohne Warten auf Schreibbereitschaft hintereinander senden
        for i in 0..5u8 {
            assert!(a.nachricht_senden(&[i]));
        }

        let mut empfangen = Vec::new();
        while empfangen.len() < 5 {
            match rx.recv().await {
                Some(MedienNachricht::PaketEmpfangen(daten)) => empfangen.push(daten[0]),
                Some(_) => {}
                None => panic!("Kanal geschlossen"),
            }
        }
        empfangen.sort_unstable();
        assert_eq!(empfangen, vec![0, 1, 2, 3, 4]);
    }
}
