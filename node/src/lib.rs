//! huddle-node – Bibliotheks-Root
//!
//! Ein Knoten nimmt mit genau einer Gegenstelle an einem Group-Call teil:
//! Medien laufen ueber einen UDP-Socket ([`UdpNetzwerkManager`]), die
//! Steuernachrichten ueber KCP auf einem zweiten Socket.
//!
//! ## Ablauf
//!
//! ```text
//! Knoten A                                 Knoten B
//!    |--- JoinPayload (ssrc, ufrag, ...) --->|
//!    |<-- JoinResponse (Kandidat, Teilnehmer)|
//!    |<-------------- JoinPayload -----------|
//!    |--- JoinResponse --------------------->|
//!    |<========== RTP/RTCP (UDP) ===========>|
//!    |--- TeilnehmerAnfrage (unbekannt) ---->|
//!    |<-- TeilnehmerHinzu -------------------|
//!    |--- SsrcsEntfernt (beim Beenden) ----->|
//! ```

pub mod config;
pub mod engine;
pub mod signal;

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Result;
use config::NodeConfig;
use engine::ProtokollEngine;
use huddle_core::SessionEreignis;
use huddle_observability::{HuddleMetrics, KcpMesswerte, SessionMesswerte};
use huddle_protocol::{
    IceKandidat, JoinPayload, JoinResponsePayload, SignalNachricht, TeilnehmerBeschreibung,
};
use huddle_voice::{GroupCall, SessionStatistik, UdpNetzwerkManager};
use signal::SignalKanal;
use tokio::sync::mpsc;

/// Laufender Knoten
pub struct Node {
    config: NodeConfig,
    call: GroupCall,
    ereignisse: mpsc::UnboundedReceiver<SessionEreignis>,
    signal: SignalKanal,
    signal_eingang: mpsc::UnboundedReceiver<SignalNachricht>,
    medien_kandidat: IceKandidat,
    eigener_payload: Option<JoinPayload>,
    metriken: Option<HuddleMetrics>,
}

/// Medien-Kandidat den die Gegenstelle ansprechen soll
fn kandidat(addr: SocketAddr) -> IceKandidat {
    IceKandidat {
        component: "1".into(),
        protocol: "udp".into(),
        ip: addr.ip().to_string(),
        port: addr.port().to_string(),
        priority: "2130706431".into(),
        typ: "host".into(),
        generation: "0".into(),
        foundation: "1".into(),
        network: "1".into(),
    }
}

/// Adresse die im Kandidaten genannt wird
fn bekanntgegebene_adresse(lokal: SocketAddr, oeffentlich: Option<&str>) -> Result<SocketAddr> {
    if let Some(ip) = oeffentlich {
        let ip: IpAddr = ip
            .parse()
            .map_err(|e| anyhow::anyhow!("Ungueltige oeffentliche Adresse '{ip}': {e}"))?;
        return Ok(SocketAddr::new(ip, lokal.port()));
    }
    if lokal.ip().is_unspecified() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), lokal.port()));
    }
    Ok(lokal)
}

/// Uebersetzt die Session-Statistik in Metrik-Werte
pub fn messwerte(statistik: &SessionStatistik) -> SessionMesswerte {
    let router = &statistik.router;
    SessionMesswerte {
        teilnehmer: statistik.teilnehmer,
        video_kanaele: statistik.video_kanaele,
        verbunden: statistik.verbunden,
        gepufferte_pakete: router.puffer.fuellstand,
        ausstehende_unbekannte: router.ausstehend,
        verdraengte_pakete: router.puffer.verdraengt,
        unbekannte_meldungen: router.meldungen,
        ungueltige_pakete: router.ungueltig,
        zugestellte_pakete: router.zugestellt,
    }
}

/// Signalnachricht fuer ein Session-Ereignis, falls die Gegenstelle es erfahren muss
pub fn ereignis_weiterleiten(ereignis: &SessionEreignis) -> Option<SignalNachricht> {
    match ereignis {
        SessionEreignis::TeilnehmerBeschreibungenBenoetigt(ssrcs) => {
            Some(SignalNachricht::TeilnehmerAnfrage {
                ssrcs: ssrcs.clone(),
            })
        }
        SessionEreignis::NetzwerkStatus { verbunden } => {
            tracing::info!(verbunden, "Netzwerkstatus");
            None
        }
        SessionEreignis::VideoQuellen(quellen) => {
            tracing::info!(quellen = ?quellen, "Video-Quellen geaendert");
            None
        }
        SessionEreignis::AudioPegel(pegel) => {
            for update in pegel {
                tracing::trace!(
                    ssrc = update.ssrc,
                    level = update.wert.level,
                    voice = update.wert.voice,
                    "Pegel"
                );
            }
            None
        }
    }
}

/// Prueft ob eine Anfrage nach unbekannten SSRCs den eigenen Payload betrifft
fn betrifft_payload(payload: &JoinPayload, ssrcs: &[u32]) -> bool {
    ssrcs.iter().any(|ssrc| {
        *ssrc == payload.ssrc
            || payload
                .video_source_groups
                .iter()
                .any(|g| g.ssrcs.contains(ssrc))
    })
}

impl Node {
    /// Bindet beide Sockets und startet den Group-Call
    pub async fn binden(config: NodeConfig) -> Result<Self> {
        let netzwerk =
            UdpNetzwerkManager::binden(config.medien_bind_adresse()?, config.gegenstelle_medien()?)
                .await?;
        let medien_lokal = netzwerk.lokale_adresse();
        let medien_kandidat = kandidat(bekanntgegebene_adresse(
            medien_lokal,
            config.netzwerk.oeffentliche_adresse.as_deref(),
        )?);

        let (signal_tx, signal_eingang) = mpsc::unbounded_channel();
        let signal = SignalKanal::binden(
            config.signal_bind_adresse()?,
            config.gegenstelle_signal()?,
            config.signaling.clone(),
            signal_tx,
        )
        .await?;

        let engine = ProtokollEngine::neu(true);
        let (call, ereignisse) =
            GroupCall::starten(config.session.clone(), Box::new(engine), Box::new(netzwerk));

        let metriken = if config.observability.aktiviert {
            Some(HuddleMetrics::neu()?)
        } else {
            None
        };

        tracing::info!(
            ssrc = call.lokale_ssrc(),
            medien = %medien_lokal,
            signal = %signal.lokale_adresse(),
            "Knoten gebunden"
        );

        Ok(Self {
            config,
            call,
            ereignisse,
            signal,
            signal_eingang,
            medien_kandidat,
            eigener_payload: None,
            metriken,
        })
    }

    pub fn lokale_ssrc(&self) -> u32 {
        self.call.lokale_ssrc()
    }

    pub fn signal_adresse(&self) -> SocketAddr {
        self.signal.lokale_adresse()
    }

    pub fn signal_gegenstelle_setzen(&self, addr: SocketAddr) {
        self.signal.gegenstelle_setzen(addr);
    }

    /// Laeuft bis `stopp` fertig ist und liefert die letzte Session-Statistik
    pub async fn ausfuehren(mut self, stopp: impl Future<Output = ()>) -> Result<SessionStatistik> {
        if let Some(metriken) = self.metriken.clone() {
            let addr = self.config.observability_bind_adresse()?;
            tokio::spawn(async move {
                if let Err(e) = huddle_observability::observability_server_starten(addr, metriken).await {
                    tracing::error!(fehler = %e, "Observability-Server beendet");
                }
            });
        }

        if !self.config.anruf.stumm {
            self.call.stumm_setzen(false)?;
        }

        let payload = self.call.join_payload().await?;
        self.signal_senden(&SignalNachricht::JoinPayload(payload.clone()));
        self.eigener_payload = Some(payload);

        let mut takt = tokio::time::interval(Duration::from_millis(
            self.config.observability.intervall_ms.max(1),
        ));
        tokio::pin!(stopp);

        loop {
            tokio::select! {
                _ = &mut stopp => break,
                Some(ereignis) = self.ereignisse.recv() => {
                    if let Some(nachricht) = ereignis_weiterleiten(&ereignis) {
                        self.signal_senden(&nachricht);
                    }
                }
                Some(nachricht) = self.signal_eingang.recv() => {
                    self.signal_verarbeiten(nachricht)?;
                }
                _ = takt.tick() => {
                    self.metriken_aktualisieren().await;
                }
            }
        }

        tracing::info!("Knoten wird beendet");
        let statistik = self.call.statistik().await?;
        self.signal_senden(&SignalNachricht::SsrcsEntfernt(vec![self.call.lokale_ssrc()]));
        // KCP braucht ein paar Ticks fuer die Abmeldung
        tokio::time::sleep(Duration::from_millis(
            u64::from(self.config.signaling.intervall_ms) * 5,
        ))
        .await;
        self.call.stop().await;
        Ok(statistik)
    }

    fn signal_verarbeiten(&mut self, nachricht: SignalNachricht) -> Result<()> {
        tracing::debug!(nachricht = nachricht.name(), "Signalnachricht empfangen");
        match nachricht {
            SignalNachricht::JoinPayload(remote) => {
                let Some(eigener) = &self.eigener_payload else {
                    return Ok(());
                };
                tracing::info!(ssrc = remote.ssrc, "Join der Gegenstelle");
                let antwort = SignalNachricht::JoinResponse {
                    payload: JoinResponsePayload {
                        ufrag: eigener.ufrag.clone(),
                        pwd: eigener.pwd.clone(),
                        candidates: vec![self.medien_kandidat.clone()],
                    },
                    teilnehmer: vec![TeilnehmerBeschreibung::from(eigener)],
                };
                self.signal_senden(&antwort);
            }
            SignalNachricht::JoinResponse { payload, teilnehmer } => {
                self.call.join_response_setzen(payload, teilnehmer)?;
            }
            SignalNachricht::TeilnehmerHinzu(teilnehmer) => {
                self.call.teilnehmer_hinzufuegen(teilnehmer)?;
            }
            SignalNachricht::SsrcsEntfernt(ssrcs) => {
                self.call.ssrcs_entfernen(ssrcs)?;
            }
            SignalNachricht::TeilnehmerAnfrage { ssrcs } => {
                if let Some(eigener) = &self.eigener_payload {
                    if betrifft_payload(eigener, &ssrcs) {
                        let antwort = SignalNachricht::TeilnehmerHinzu(vec![
                            TeilnehmerBeschreibung::from(eigener),
                        ]);
                        self.signal_senden(&antwort);
                    }
                }
            }
        }
        Ok(())
    }

    /// Sendefehler beenden den Knoten nicht
    fn signal_senden(&self, nachricht: &SignalNachricht) {
        if let Err(e) = self.signal.senden(nachricht) {
            tracing::warn!(
                fehler = %e,
                nachricht = nachricht.name(),
                "Signalnachricht nicht gesendet"
            );
        }
    }

    async fn metriken_aktualisieren(&self) {
        let Some(metriken) = &self.metriken else {
            return;
        };
        match self.call.statistik().await {
            Ok(statistik) => metriken.session_aktualisieren(&messwerte(&statistik)),
            Err(e) => tracing::debug!(fehler = %e, "Session-Statistik nicht verfuegbar"),
        }
        match self.signal.statistik().await {
            Ok(kcp) => metriken.kcp_aktualisieren(&KcpMesswerte {
                retransmissionen: kcp.retransmissionen,
                srtt_ms: kcp.srtt_ms,
            }),
            Err(e) => tracing::debug!(fehler = %e, "KCP-Statistik nicht verfuegbar"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::{PegelUpdate, PegelWert};
    use huddle_protocol::SsrcGruppe;
    use huddle_voice::router::RouterStatistik;

    fn test_config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.netzwerk.bind_adresse = "127.0.0.1".into();
        config.netzwerk.medien_port = 0;
        config.netzwerk.signal_port = 0;
        config.observability.aktiviert = false;
        config
    }

    #[test]
    fn unbekannte_ssrcs_werden_angefragt() {
        let nachricht =
            ereignis_weiterleiten(&SessionEreignis::TeilnehmerBeschreibungenBenoetigt(vec![3, 4]));
        assert_eq!(
            nachricht,
            Some(SignalNachricht::TeilnehmerAnfrage { ssrcs: vec![3, 4] })
        );
        assert!(ereignis_weiterleiten(&SessionEreignis::AudioPegel(vec![PegelUpdate {
            ssrc: 1,
            wert: PegelWert::STILLE,
        }]))
        .is_none());
    }

    #[test]
    fn anfrage_betrifft_auch_video_ssrcs() {
        let payload = JoinPayload {
            ssrc: 10,
            video_source_groups: vec![SsrcGruppe::neu("FID", vec![11, 12])],
            ..Default::default()
        };
        assert!(betrifft_payload(&payload, &[99, 10]));
        assert!(betrifft_payload(&payload, &[12]));
        assert!(!betrifft_payload(&payload, &[13]));
    }

    #[test]
    fn unspezifizierte_adresse_wird_localhost() {
        let lokal: SocketAddr = "0.0.0.0:5004".parse().unwrap();
        assert_eq!(
            bekanntgegebene_adresse(lokal, None).unwrap(),
            "127.0.0.1:5004".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            bekanntgegebene_adresse(lokal, Some("10.1.2.3")).unwrap(),
            "10.1.2.3:5004".parse::<SocketAddr>().unwrap()
        );
        assert!(bekanntgegebene_adresse(lokal, Some("kein-ip")).is_err());
    }

    #[test]
    fn statistik_wird_zu_messwerten() {
        let mut statistik = SessionStatistik {
            lokale_ssrc: 1,
            teilnehmer: 2,
            video_kanaele: 1,
            verbunden: true,
            stumm: true,
            hat_capture: false,
            pegel_ticks: 0,
            router: RouterStatistik::default(),
        };
        statistik.router.ausstehend = 3;
        statistik.router.puffer.verdraengt = 7;

        let werte = messwerte(&statistik);
        assert_eq!(werte.teilnehmer, 2);
        assert!(werte.verbunden);
        assert_eq!(werte.ausstehende_unbekannte, 3);
        assert_eq!(werte.verdraengte_pakete, 7);
    }

    #[tokio::test]
    async fn geschlossene_signalisierung_beendet_den_knoten_nicht() {
        let node = Node::binden(test_config()).await.unwrap();
        node.signal.schliessen();

        let statistik = node
            .ausfuehren(tokio::time::sleep(Duration::from_millis(200)))
            .await
            .unwrap();
        assert_eq!(statistik.teilnehmer, 0);
    }

    #[tokio::test]
    async fn zwei_knoten_treten_sich_bei() {
        let a = Node::binden(test_config()).await.unwrap();
        let b = Node::binden(test_config()).await.unwrap();
        a.signal_gegenstelle_setzen(b.signal_adresse());
        b.signal_gegenstelle_setzen(a.signal_adresse());

        let (stopp_a, warten_a) = tokio::sync::oneshot::channel::<()>();
        let (stopp_b, warten_b) = tokio::sync::oneshot::channel::<()>();
        let lauf_a = tokio::spawn(a.ausfuehren(async move {
            let _ = warten_a.await;
        }));
        let lauf_b = tokio::spawn(b.ausfuehren(async move {
            let _ = warten_b.await;
        }));

        tokio::time::sleep(Duration::from_millis(500)).await;
        let _ = stopp_a.send(());
        let _ = stopp_b.send(());

        let statistik_a = lauf_a.await.unwrap().unwrap();
        let statistik_b = lauf_b.await.unwrap().unwrap();
        assert_eq!(statistik_a.teilnehmer, 1);
        assert_eq!(statistik_b.teilnehmer, 1);
        assert!(statistik_a.verbunden);
        assert!(statistik_b.verbunden);
    }
}
