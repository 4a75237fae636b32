//! GroupCall – Handle der Aufrufseite
//!
//! Startet Media- und Netzwerk-Kontext und ist deren einziger Besitzer
//! starker Sender. Alle Methoden posten nur und kehren sofort zurueck;
//! Ergebnisse (Pegel, Video-Quellen, Netzwerkstatus) kommen ueber den
//! Ereignis-Kanal.
//!
//! Wird der Handle ohne [`GroupCall::stop`] gedroppt, enden beide Kontexte
//! sobald ihre Queues leer sind; die Session baut sich dabei selbst ab.

use std::sync::{Arc, Weak};

use huddle_core::{HuddleError, Result, SessionEreignis};
use huddle_protocol::{JoinPayload, JoinResponsePayload, TeilnehmerBeschreibung};
use tokio::sync::{mpsc, oneshot};

use crate::config::SessionConfig;
use crate::context::{MedienNachricht, MedienPost, NetzPost, NetzwerkBefehl};
use crate::engine::{GroupSession, SessionStatistik};
use crate::media::{MedienEngine, VideoQuelle, VideoSenke};
use crate::network::{self, NetzwerkManager};

/// Laufender Group-Call
pub struct GroupCall {
    medien: mpsc::UnboundedSender<MedienNachricht>,
    netz: mpsc::UnboundedSender<NetzwerkBefehl>,
    lokale_ssrc: u32,
}

impl GroupCall {
    /// Startet beide Kontexte; muss innerhalb einer tokio-Runtime laufen
    pub fn starten(
        config: SessionConfig,
        engine: Box<dyn MedienEngine>,
        netzwerk: Box<dyn NetzwerkManager>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEreignis>) {
        let (medien_tx, medien_rx) = mpsc::unbounded_channel();
        let (netz_tx, netz_rx) = mpsc::unbounded_channel();
        let (ereignis_tx, ereignis_rx) = mpsc::unbounded_channel();

        let medien_post = MedienPost::neu(&medien_tx);
        let session = GroupSession::neu(
            config,
            engine,
            medien_post.clone(),
            NetzPost::neu(&netz_tx),
            ereignis_tx,
        );
        let lokale_ssrc = session.lokale_ssrc();

        network::kontext_starten(netzwerk, netz_rx, medien_post);
        tokio::spawn(session.ausfuehren(medien_rx));

        (
            Self {
                medien: medien_tx,
                netz: netz_tx,
                lokale_ssrc,
            },
            ereignis_rx,
        )
    }

    /// Eigene Audio-SSRC
    pub fn lokale_ssrc(&self) -> u32 {
        self.lokale_ssrc
    }

    fn posten(&self, nachricht: MedienNachricht) -> Result<()> {
        self.medien
            .send(nachricht)
            .map_err(|_| HuddleError::SessionBeendet)
    }

    /// Join-Payload inklusive lokaler ICE-Parameter
    pub async fn join_payload(&self) -> Result<JoinPayload> {
        let (tx, rx) = oneshot::channel();
        self.posten(MedienNachricht::JoinPayload(tx))?;
        rx.await.map_err(|_| HuddleError::SessionBeendet)
    }

    pub fn join_response_setzen(
        &self,
        payload: JoinResponsePayload,
        teilnehmer: Vec<TeilnehmerBeschreibung>,
    ) -> Result<()> {
        self.posten(MedienNachricht::JoinResponse {
            payload,
            teilnehmer,
        })
    }

    pub fn teilnehmer_hinzufuegen(&self, teilnehmer: Vec<TeilnehmerBeschreibung>) -> Result<()> {
        self.posten(MedienNachricht::TeilnehmerHinzufuegen(teilnehmer))
    }

    pub fn ssrcs_entfernen(&self, ssrcs: Vec<u32>) -> Result<()> {
        self.posten(MedienNachricht::SsrcsEntfernen(ssrcs))
    }

    pub fn stumm_setzen(&self, stumm: bool) -> Result<()> {
        self.posten(MedienNachricht::StummSetzen(stumm))
    }

    pub fn video_capture_setzen(&self, quelle: Option<Arc<dyn VideoQuelle>>) -> Result<()> {
        self.posten(MedienNachricht::VideoCaptureSetzen(quelle))
    }

    /// Haengt eine Ausgabe an den Video-Kanal des Teilnehmers `ssrc`
    ///
    /// Die Ausgabe wird nur schwach gehalten.
    pub fn video_ausgabe_hinzufuegen(&self, ssrc: u32, senke: Weak<dyn VideoSenke>) -> Result<()> {
        self.posten(MedienNachricht::VideoAusgabeHinzufuegen { ssrc, senke })
    }

    pub fn lautstaerke_setzen(&self, ssrc: u32, lautstaerke: f64) -> Result<()> {
        self.posten(MedienNachricht::LautstaerkeSetzen { ssrc, lautstaerke })
    }

    pub async fn statistik(&self) -> Result<SessionStatistik> {
        let (tx, rx) = oneshot::channel();
        self.posten(MedienNachricht::Statistik(tx))?;
        rx.await.map_err(|_| HuddleError::SessionBeendet)
    }

    /// Baut erst die Session ab, danach den Netzwerk-Kontext
    pub async fn stop(self) {
        let (tx, rx) = oneshot::channel();
        if self.medien.send(MedienNachricht::Beenden(tx)).is_ok() {
            let _ = rx.await;
        }
        let _ = self.netz.send(NetzwerkBefehl::Stoppen);
        tracing::info!(ssrc = self.lokale_ssrc, "Group-Call gestoppt");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
