//! Netzwerk-Kontext
//!
//! Der Session-Kern spricht das Transportnetz (ICE, DTLS, Sockets) nur ueber
//! den [`NetzwerkManager`] an. Der Manager lebt exklusiv in einem eigenen
//! tokio-Task und meldet Zustand und eingehende Pakete ueber eine
//! [`NetzwerkRueckmeldung`] an den Media-Kontext.

use bytes::Bytes;
use huddle_protocol::{IceKandidat, IceParameter};
use tokio::sync::mpsc;

use crate::context::{MedienNachricht, MedienPost, NetzwerkBefehl};

/// Transport-Schnittstelle des Session-Kerns
pub trait NetzwerkManager: Send + 'static {
    /// Startet den Transport; Rueckmeldungen laufen ab jetzt ueber `rueckmeldung`
    fn starten(&mut self, rueckmeldung: NetzwerkRueckmeldung);

    /// Sendet ein RTP/RTCP-Paket; `true` wenn der Transport es angenommen hat
    fn nachricht_senden(&mut self, daten: &[u8]) -> bool;

    fn lokale_ice_parameter(&self) -> IceParameter;

    fn remote_parameter_setzen(&mut self, ice: IceParameter, kandidaten: Vec<IceKandidat>);
}

/// Rueckkanal vom Transport in den Media-Kontext
#[derive(Clone)]
pub struct NetzwerkRueckmeldung {
    post: MedienPost,
}

impl NetzwerkRueckmeldung {
    pub fn neu(post: MedienPost) -> Self {
        Self { post }
    }

    /// Verbindungszustand; verbunden gilt `bereit && !fehlgeschlagen`
    pub fn zustand(&self, bereit: bool, fehlgeschlagen: bool) {
        self.post.posten(MedienNachricht::NetzwerkZustand {
            bereit,
            fehlgeschlagen,
        });
    }

    pub fn paket(&self, daten: Bytes) {
        self.post.posten(MedienNachricht::PaketEmpfangen(daten));
    }
}

/// Startet den Netzwerk-Kontext als tokio-Task
pub(crate) fn kontext_starten(
    manager: Box<dyn NetzwerkManager>,
    befehle: mpsc::UnboundedReceiver<NetzwerkBefehl>,
    medien: MedienPost,
) {
    tokio::spawn(ausfuehren(manager, befehle, medien));
}

async fn ausfuehren(
    mut manager: Box<dyn NetzwerkManager>,
    mut befehle: mpsc::UnboundedReceiver<NetzwerkBefehl>,
    medien: MedienPost,
) {
    manager.starten(NetzwerkRueckmeldung::neu(medien.clone()));
    tracing::debug!("Netzwerk-Kontext gestartet");

    while let Some(befehl) = befehle.recv().await {
        match befehl {
            NetzwerkBefehl::Senden { daten, paket_id } => {
                if manager.nachricht_senden(&daten) {
                    medien.posten(MedienNachricht::PaketGesendet(paket_id));
                } else {
                    tracing::trace!(paket_id, laenge = daten.len(), "Paket nicht gesendet");
                }
            }
            NetzwerkBefehl::JoinPayloadVervollstaendigen {
                mut payload,
                antwort,
            } => {
                let ice = manager.lokale_ice_parameter();
                payload.ufrag = ice.ufrag;
                payload.pwd = ice.pwd;
                let _ = antwort.send(payload);
            }
            NetzwerkBefehl::RemoteParameterSetzen { ice, kandidaten } => {
                tracing::debug!(kandidaten = kandidaten.len(), "Remote-ICE-Parameter gesetzt");
                manager.remote_parameter_setzen(ice, kandidaten);
            }
            NetzwerkBefehl::Stoppen => break,
        }
    }
    drop(manager);
    tracing::debug!("Netzwerk-Kontext beendet");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::fake::AufzeichnenderManager;
    use super::*;
    use huddle_protocol::JoinPayload;
    use tokio::sync::oneshot;

    struct Aufbau {
        manager: AufzeichnenderManager,
        befehle: mpsc::UnboundedSender<NetzwerkBefehl>,
        medien_rx: mpsc::UnboundedReceiver<MedienNachricht>,
        _medien_tx: mpsc::UnboundedSender<MedienNachricht>,
    }

    fn aufbauen() -> Aufbau {
        let manager = AufzeichnenderManager::default();
        let (medien_tx, medien_rx) = mpsc::unbounded_channel();
        let (befehle, befehle_rx) = mpsc::unbounded_channel();
        kontext_starten(Box::new(manager.clone()), befehle_rx, MedienPost::neu(&medien_tx));
        Aufbau {
            manager,
            befehle,
            medien_rx,
            _medien_tx: medien_tx,
        }
    }

    #[tokio::test]
    async fn gesendetes_paket_wird_quittiert() {
        let mut aufbau = aufbauen();
        aufbau
            .befehle
            .send(NetzwerkBefehl::Senden {
                daten: Bytes::from_static(b"abc"),
                paket_id: 9,
            })
            .unwrap();
        assert!(matches!(
            aufbau.medien_rx.recv().await,
            Some(MedienNachricht::PaketGesendet(9))
        ));
        assert_eq!(aufbau.manager.innen.lock().gesendet.len(), 1);
    }

    #[tokio::test]
    async fn join_payload_bekommt_ice_parameter() {
        let aufbau = aufbauen();
        let (tx, rx) = oneshot::channel();
        aufbau
            .befehle
            .send(NetzwerkBefehl::JoinPayloadVervollstaendigen {
                payload: JoinPayload {
                    ssrc: 77,
                    ..Default::default()
                },
                antwort: tx,
            })
            .unwrap();
        let payload = rx.await.unwrap();
        assert_eq!(payload.ssrc, 77);
        assert_eq!(payload.ufrag, "ufrg");
        assert_eq!(payload.pwd, "passwort");
    }

    #[tokio::test]
    async fn rueckmeldungen_landen_im_media_kontext() {
        let mut aufbau = aufbauen();
        // Starten laeuft im Task; auf die Rueckmeldung warten
        let rueckmeldung = loop {
            if let Some(r) = aufbau.manager.rueckmeldung() {
                break r;
            }
            tokio::task::yield_now().await;
        };
        rueckmeldung.zustand(true, false);
        rueckmeldung.paket(Bytes::from_static(b"x"));
        assert!(matches!(
            aufbau.medien_rx.recv().await,
            Some(MedienNachricht::NetzwerkZustand {
                bereit: true,
                fehlgeschlagen: false
            })
        ));
        assert!(matches!(
            aufbau.medien_rx.recv().await,
            Some(MedienNachricht::PaketEmpfangen(_))
        ));
    }
}
