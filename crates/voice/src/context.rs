//! Nachrichten zwischen Media- und Netzwerk-Kontext
//!
//! Beide Kontexte sind eigene tokio-Tasks mit exklusivem Zustand. Sie
//! sprechen nur ueber typisierte Nachrichten miteinander:
//!
//! ```text
//! GroupCall ---(MedienNachricht)---> Media-Kontext (GroupSession)
//!     |                                   |   ^
//!     |                    NetzwerkBefehl |   | NetzwerkZustand, PaketEmpfangen,
//!     |                                   v   | PaketGesendet
//!     +-----(Stoppen)---------------> Netzwerk-Kontext (NetzwerkManager)
//! ```
//!
//! Nur der `GroupCall` haelt starke Sender. Alle Posts aus den Kontexten
//! heraus (Timer, Rueckmeldungen, Callbacks) gehen ueber schwache Sender.
//! Ist das Ziel bereits abgebaut, schlaegt das Upgrade fehl und die
//! Nachricht verfaellt still.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use huddle_core::PegelWert;
use huddle_protocol::{IceKandidat, IceParameter, JoinPayload, JoinResponsePayload, TeilnehmerBeschreibung};
use tokio::sync::{mpsc, oneshot};

use crate::engine::SessionStatistik;
use crate::media::{VideoQuelle, VideoSenke};

// ---------------------------------------------------------------------------
// Media-Kontext
// ---------------------------------------------------------------------------

/// Nachrichten an den Media-Kontext
pub enum MedienNachricht {
    // Aufrufseite
    JoinPayload(oneshot::Sender<JoinPayload>),
    JoinResponse {
        payload: JoinResponsePayload,
        teilnehmer: Vec<TeilnehmerBeschreibung>,
    },
    TeilnehmerHinzufuegen(Vec<TeilnehmerBeschreibung>),
    SsrcsEntfernen(Vec<u32>),
    StummSetzen(bool),
    VideoCaptureSetzen(Option<Arc<dyn VideoQuelle>>),
    VideoAusgabeHinzufuegen {
        ssrc: u32,
        senke: Weak<dyn VideoSenke>,
    },
    LautstaerkeSetzen {
        ssrc: u32,
        lautstaerke: f64,
    },
    Statistik(oneshot::Sender<SessionStatistik>),
    Beenden(oneshot::Sender<()>),

    // Netzwerk-Kontext
    NetzwerkZustand {
        bereit: bool,
        fehlgeschlagen: bool,
    },
    PaketEmpfangen(Bytes),
    PaketGesendet(u64),

    // Media-Engine
    AusgehendesPaket {
        daten: Bytes,
        paket_id: u64,
    },
    RemotePegel {
        ssrc: u32,
        wert: PegelWert,
    },
    LokalerPegel(PegelWert),

    // Timer
    PegelTick,
    UnbekannteMelden,
}

impl MedienNachricht {
    /// Kurzname fuer Logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinPayload(_) => "join_payload",
            Self::JoinResponse { .. } => "join_response",
            Self::TeilnehmerHinzufuegen(_) => "teilnehmer_hinzufuegen",
            Self::SsrcsEntfernen(_) => "ssrcs_entfernen",
            Self::StummSetzen(_) => "stumm_setzen",
            Self::VideoCaptureSetzen(_) => "video_capture_setzen",
            Self::VideoAusgabeHinzufuegen { .. } => "video_ausgabe_hinzufuegen",
            Self::LautstaerkeSetzen { .. } => "lautstaerke_setzen",
            Self::Statistik(_) => "statistik",
            Self::Beenden(_) => "beenden",
            Self::NetzwerkZustand { .. } => "netzwerk_zustand",
            Self::PaketEmpfangen(_) => "paket_empfangen",
            Self::PaketGesendet(_) => "paket_gesendet",
            Self::AusgehendesPaket { .. } => "ausgehendes_paket",
            Self::RemotePegel { .. } => "remote_pegel",
            Self::LokalerPegel(_) => "lokaler_pegel",
            Self::PegelTick => "pegel_tick",
            Self::UnbekannteMelden => "unbekannte_melden",
        }
    }
}

/// Schwacher Post-Handle auf den Media-Kontext
#[derive(Clone)]
pub struct MedienPost {
    ziel: mpsc::WeakUnboundedSender<MedienNachricht>,
}

impl MedienPost {
    pub fn neu(sender: &mpsc::UnboundedSender<MedienNachricht>) -> Self {
        Self {
            ziel: sender.downgrade(),
        }
    }

    /// Stellt die Nachricht zu; `false` wenn der Kontext nicht mehr existiert
    pub fn posten(&self, nachricht: MedienNachricht) -> bool {
        match self.ziel.upgrade() {
            Some(tx) => tx.send(nachricht).is_ok(),
            None => false,
        }
    }

    /// Einmaliger verzoegerter Post (Timer)
    pub fn verzoegert_posten(&self, verzoegerung: Duration, nachricht: MedienNachricht) {
        let post = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(verzoegerung).await;
            if !post.posten(nachricht) {
                tracing::trace!("Media-Kontext beendet, Timer verfaellt");
            }
        });
    }
}

/// Ausgang fuer Pakete die die Media-Engine verschicken will
///
/// Wird der Engine beim Start uebergeben; die Pakete laufen ueber den
/// Media-Kontext zum Netzwerk-Kontext.
#[derive(Clone)]
pub struct PaketAusgang {
    post: MedienPost,
}

impl PaketAusgang {
    pub fn neu(post: MedienPost) -> Self {
        Self { post }
    }

    pub fn senden(&self, daten: Bytes, paket_id: u64) -> bool {
        self.post
            .posten(MedienNachricht::AusgehendesPaket { daten, paket_id })
    }
}

// ---------------------------------------------------------------------------
// Netzwerk-Kontext
// ---------------------------------------------------------------------------

/// Befehle an den Netzwerk-Kontext
pub enum NetzwerkBefehl {
    Senden {
        daten: Bytes,
        paket_id: u64,
    },
    /// Traegt die lokalen ICE-Parameter in den Payload ein
    JoinPayloadVervollstaendigen {
        payload: JoinPayload,
        antwort: oneshot::Sender<JoinPayload>,
    },
    RemoteParameterSetzen {
        ice: IceParameter,
        kandidaten: Vec<IceKandidat>,
    },
    Stoppen,
}

/// Schwacher Post-Handle auf den Netzwerk-Kontext
#[derive(Clone)]
pub struct NetzPost {
    ziel: mpsc::WeakUnboundedSender<NetzwerkBefehl>,
}

impl NetzPost {
    pub fn neu(sender: &mpsc::UnboundedSender<NetzwerkBefehl>) -> Self {
        Self {
            ziel: sender.downgrade(),
        }
    }

    pub fn posten(&self, befehl: NetzwerkBefehl) -> bool {
        match self.ziel.upgrade() {
            Some(tx) => tx.send(befehl).is_ok(),
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn post_nach_abbau_verfaellt() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let post = MedienPost::neu(&tx);

        assert!(post.posten(MedienNachricht::PegelTick));
        assert!(matches!(rx.recv().await, Some(MedienNachricht::PegelTick)));

        drop(tx);
        assert!(!post.posten(MedienNachricht::PegelTick));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn verzoegerter_post_kommt_nach_ablauf() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let post = MedienPost::neu(&tx);
        let start = tokio::time::Instant::now();

        post.verzoegert_posten(Duration::from_millis(100), MedienNachricht::UnbekannteMelden);
        assert!(matches!(
            rx.recv().await,
            Some(MedienNachricht::UnbekannteMelden)
        ));
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn verzoegerter_post_nach_abbau_verfaellt() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let post = MedienPost::neu(&tx);
        post.verzoegert_posten(Duration::from_millis(50), MedienNachricht::PegelTick);
        drop(tx);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn paket_ausgang_laeuft_ueber_media_kontext() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ausgang = PaketAusgang::neu(MedienPost::neu(&tx));
        assert!(ausgang.senden(Bytes::from_static(b"rtp"), 7));
        match rx.recv().await {
            Some(MedienNachricht::AusgehendesPaket { daten, paket_id }) => {
                assert_eq!(&daten[..], b"rtp");
                assert_eq!(paket_id, 7);
            }
            _ => panic!("AusgehendesPaket erwartet"),
        }
    }
}
