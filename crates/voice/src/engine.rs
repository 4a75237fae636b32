//! GroupSession – Zustand und Logik des Media-Kontexts
//!
//! Die Session besitzt SSRC-Router, Kanaele, Politik und Telemetrie
//! exklusiv und laeuft vollstaendig im Media-Kontext. Jede Operation ist
//! synchron; Timer und Rueckmeldungen kommen als [`MedienNachricht`] wieder
//! herein.
//!
//! ## Abschnitte
//! - Aufbau und Start
//! - Join / Teilnehmer
//! - Eingehende Pakete
//! - Zustand (Netzwerk, Stumm, Capture)
//! - Telemetrie
//! - Abbau
//!
//! Auf dem Paketpfad wird nie ein Fehler zurueckgegeben: kaputte Pakete
//! werden verworfen, unbekannte gepuffert.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use huddle_audio::{CombinedVad, EnergieAnalysator, PegelAnalysator};
use huddle_core::{MedienArt, PegelWert, SessionEreignis};
use huddle_protocol::codec::{self, AusgehendesVideoFormat, SimulcastLayer};
use huddle_protocol::{JoinPayload, JoinResponsePayload, TeilnehmerBeschreibung};
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::channel::{EingehenderAudioKanal, EingehenderVideoKanal};
use crate::config::SessionConfig;
use crate::context::{MedienNachricht, MedienPost, NetzPost, NetzwerkBefehl, PaketAusgang};
use crate::media::{MedienEngine, VideoQuelle, VideoSenke};
use crate::policy::VerbindungsPolitik;
use crate::router::{MeldeSchritt, RouterStatistik, RoutingErgebnis, SsrcRouter};
use crate::state::SsrcEintrag;
use crate::telemetry::PegelTelemetrie;

/// Momentaufnahme einer laufenden Session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatistik {
    pub lokale_ssrc: u32,
    pub teilnehmer: usize,
    pub video_kanaele: usize,
    pub verbunden: bool,
    pub stumm: bool,
    pub hat_capture: bool,
    pub pegel_ticks: u64,
    pub router: RouterStatistik,
}

/// Zufaellige, von Null verschiedene SSRC
fn zufaellige_ssrc() -> u32 {
    let mut rng = rand::thread_rng();
    loop {
        let ssrc: u32 = rng.gen();
        if ssrc != 0 {
            return ssrc;
        }
    }
}

// ---------------------------------------------------------------------------
// GroupSession
// ---------------------------------------------------------------------------

pub struct GroupSession {
    config: SessionConfig,
    engine: Box<dyn MedienEngine>,
    medien: MedienPost,
    netz: NetzPost,
    ereignisse: mpsc::UnboundedSender<SessionEreignis>,

    lokale_ssrc: u32,
    layer: Vec<SimulcastLayer>,
    video_format: Option<AusgehendesVideoFormat>,

    router: SsrcRouter,
    audio_kanaele: BTreeMap<u32, EingehenderAudioKanal>,
    video_kanaele: BTreeMap<u32, EingehenderVideoKanal>,
    politik: VerbindungsPolitik,
    telemetrie: PegelTelemetrie,
    video_quelle: Option<Arc<dyn VideoQuelle>>,
    beendet: bool,
}

impl GroupSession {
    /// Erzeugt eine Session mit zufaelliger Audio-SSRC
    pub fn neu(
        config: SessionConfig,
        engine: Box<dyn MedienEngine>,
        medien: MedienPost,
        netz: NetzPost,
        ereignisse: mpsc::UnboundedSender<SessionEreignis>,
    ) -> Self {
        Self::mit_ssrc(config, engine, medien, netz, ereignisse, zufaellige_ssrc())
    }

    pub fn mit_ssrc(
        config: SessionConfig,
        engine: Box<dyn MedienEngine>,
        medien: MedienPost,
        netz: NetzPost,
        ereignisse: mpsc::UnboundedSender<SessionEreignis>,
        lokale_ssrc: u32,
    ) -> Self {
        let layer = codec::simulcast_layer(lokale_ssrc, config.simulcast_layer.max(1));
        let video_format = codec::payload_typen_zuweisen(&engine.video_formate());
        if video_format.is_none() {
            tracing::warn!("Media-Engine bietet kein VP8 an, Video deaktiviert");
        }

        Self {
            router: SsrcRouter::neu(
                lokale_ssrc,
                config.puffer_kapazitaet,
                config.unbekannt_fenster(),
            ),
            telemetrie: PegelTelemetrie::neu(config.rausch_schwelle),
            config,
            engine,
            medien,
            netz,
            ereignisse,
            lokale_ssrc,
            layer,
            video_format,
            audio_kanaele: BTreeMap::new(),
            video_kanaele: BTreeMap::new(),
            politik: VerbindungsPolitik::neu(),
            video_quelle: None,
            beendet: false,
        }
    }

    pub fn lokale_ssrc(&self) -> u32 {
        self.lokale_ssrc
    }

    /// Verbindet Engine, Capture-Analyse und Politik und startet den Pegel-Timer
    pub fn starten(&mut self) {
        self.engine.starten(PaketAusgang::neu(self.medien.clone()));
        self.engine.sende_streams_konfigurieren(
            self.lokale_ssrc,
            self.video_format.as_ref(),
            &self.layer,
        );

        let post = self.medien.clone();
        let mut analysator = PegelAnalysator::neu(CombinedVad::neu(Box::new(
            EnergieAnalysator::neu(self.config.vad.clone()),
        )));
        self.engine
            .capture_analyse_setzen(Some(Box::new(move |samples: &[f32], kanaele: usize| {
                if let Some(wert) = analysator.frame_f32(samples, kanaele) {
                    post.posten(MedienNachricht::LokalerPegel(wert));
                }
            })));

        self.politik.initial_anwenden(self.engine.as_mut());
        self.medien
            .verzoegert_posten(self.config.pegel_intervall(), MedienNachricht::PegelTick);

        tracing::info!(
            ssrc = self.lokale_ssrc,
            video = self.video_format.is_some(),
            layer = self.layer.len(),
            "Group-Session gestartet"
        );
    }

    /// Verarbeitet eine Nachricht des Media-Kontexts
    pub fn verarbeiten(&mut self, nachricht: MedienNachricht) {
        if self.beendet {
            if let MedienNachricht::Beenden(ack) = nachricht {
                let _ = ack.send(());
            }
            return;
        }
        match nachricht {
            MedienNachricht::JoinPayload(antwort) => self.join_payload(antwort),
            MedienNachricht::JoinResponse {
                payload,
                teilnehmer,
            } => self.join_response_setzen(payload, teilnehmer),
            MedienNachricht::TeilnehmerHinzufuegen(liste) => self.teilnehmer_hinzufuegen(liste),
            MedienNachricht::SsrcsEntfernen(ssrcs) => self.ssrcs_entfernen(&ssrcs),
            MedienNachricht::StummSetzen(stumm) => self.stumm_setzen(stumm),
            MedienNachricht::VideoCaptureSetzen(quelle) => self.video_capture_setzen(quelle),
            MedienNachricht::VideoAusgabeHinzufuegen { ssrc, senke } => {
                self.video_ausgabe_hinzufuegen(ssrc, senke)
            }
            MedienNachricht::LautstaerkeSetzen { ssrc, lautstaerke } => {
                self.lautstaerke_setzen(ssrc, lautstaerke)
            }
            MedienNachricht::Statistik(antwort) => {
                let _ = antwort.send(self.statistik());
            }
            MedienNachricht::Beenden(ack) => {
                self.beenden();
                let _ = ack.send(());
            }
            MedienNachricht::NetzwerkZustand {
                bereit,
                fehlgeschlagen,
            } => self.netzwerk_zustand(bereit, fehlgeschlagen),
            MedienNachricht::PaketEmpfangen(paket) => self.paket_empfangen(paket),
            MedienNachricht::PaketGesendet(paket_id) => self.paket_gesendet(paket_id),
            MedienNachricht::AusgehendesPaket { daten, paket_id } => {
                self.ausgehendes_paket(daten, paket_id)
            }
            MedienNachricht::RemotePegel { ssrc, wert } => self.remote_pegel(ssrc, wert),
            MedienNachricht::LokalerPegel(wert) => self.telemetrie.lokal_melden(wert),
            MedienNachricht::PegelTick => self.pegel_tick(),
            MedienNachricht::UnbekannteMelden => self.unbekannte_melden(),
        }
    }

    /// Schleife des Media-Kontexts
    ///
    /// Endet mit `Beenden` oder wenn alle starken Sender weg sind; in beiden
    /// Faellen wird die Session abgebaut.
    pub async fn ausfuehren(mut self, mut rx: mpsc::UnboundedReceiver<MedienNachricht>) {
        self.starten();
        while let Some(nachricht) = rx.recv().await {
            tracing::trace!(nachricht = nachricht.name(), "Media-Kontext");
            self.verarbeiten(nachricht);
            if self.beendet {
                break;
            }
        }
        self.beenden();
        tracing::debug!("Media-Kontext beendet");
    }

    // -----------------------------------------------------------------------
    // Join / Teilnehmer
    // -----------------------------------------------------------------------

    /// Baut den eigenen Join-Payload; ICE-Parameter ergaenzt der Netzwerk-Kontext
    pub fn join_payload(&mut self, antwort: oneshot::Sender<JoinPayload>) {
        let mut payload = JoinPayload {
            ssrc: self.lokale_ssrc,
            ..Default::default()
        };
        if let Some(format) = &self.video_format {
            payload.video_payload_types = format.payload_typen();
            payload.video_extension_map = codec::video_erweiterungen()
                .into_iter()
                .map(|e| (e.id, e.uri))
                .collect();
            payload.video_source_groups = codec::quell_gruppen(&self.layer);
        }

        if !self.netz.posten(NetzwerkBefehl::JoinPayloadVervollstaendigen { payload, antwort }) {
            tracing::debug!("Netzwerk-Kontext beendet, Join-Payload verworfen");
        }
    }

    /// Setzt die Remote-ICE-Parameter und nimmt die anwesenden Teilnehmer auf
    pub fn join_response_setzen(
        &mut self,
        payload: JoinResponsePayload,
        teilnehmer: Vec<TeilnehmerBeschreibung>,
    ) {
        let ice = payload.ice_parameter();
        let kandidaten: Vec<_> = payload
            .candidates
            .into_iter()
            .filter(|k| match k.adresse() {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(fehler = %e, foundation = %k.foundation, "ICE-Kandidat ignoriert");
                    false
                }
            })
            .collect();
        tracing::info!(
            kandidaten = kandidaten.len(),
            teilnehmer = teilnehmer.len(),
            "Join-Response erhalten"
        );
        self.netz
            .posten(NetzwerkBefehl::RemoteParameterSetzen { ice, kandidaten });
        self.teilnehmer_hinzufuegen(teilnehmer);
    }

    /// Legt fehlende Kanaele an und liefert gepufferte Pakete nach
    pub fn teilnehmer_hinzufuegen(&mut self, liste: Vec<TeilnehmerBeschreibung>) {
        let mut neue_ssrcs = Vec::new();
        let mut video_geaendert = false;

        for beschreibung in liste {
            let audio_ssrc = beschreibung.audio_ssrc;
            if audio_ssrc == self.lokale_ssrc {
                continue;
            }

            if !self.audio_kanaele.contains_key(&audio_ssrc) {
                if self.router.eintragen(audio_ssrc, audio_ssrc, MedienArt::Audio) {
                    neue_ssrcs.push(audio_ssrc);
                }
                let kanal = EingehenderAudioKanal::oeffnen(
                    audio_ssrc,
                    self.engine.as_mut(),
                    self.medien.clone(),
                    &self.config.vad,
                );
                self.audio_kanaele.insert(audio_ssrc, kanal);
                self.politik.netzwerk_status_anwenden(self.engine.as_mut());
                tracing::info!(ssrc = audio_ssrc, "Teilnehmer aufgenommen");
            }

            if beschreibung.hat_video() && !self.video_kanaele.contains_key(&audio_ssrc) {
                if self.video_format.is_none() {
                    tracing::warn!(ssrc = audio_ssrc, "Kein Video-Codec, Video-Kanal nicht angelegt");
                    continue;
                }
                let Some(kanal) = EingehenderVideoKanal::oeffnen(&beschreibung, self.engine.as_mut())
                else {
                    continue;
                };
                for &ssrc in kanal.ssrcs() {
                    if self.router.eintragen(ssrc, audio_ssrc, MedienArt::Video) {
                        neue_ssrcs.push(ssrc);
                    }
                }
                self.video_kanaele.insert(audio_ssrc, kanal);
                self.politik.netzwerk_status_anwenden(self.engine.as_mut());
                video_geaendert = true;
            }
        }

        if video_geaendert {
            self.video_quellen_melden();
        }

        for ssrc in neue_ssrcs {
            let gepuffert = self.router.gepufferte_entnehmen(ssrc);
            if gepuffert.is_empty() {
                continue;
            }
            let Some(eintrag) = self.router.aufloesen(ssrc) else {
                continue;
            };
            tracing::debug!(ssrc, pakete = gepuffert.len(), "Gepufferte Pakete nachgeliefert");
            for paket in gepuffert {
                self.zustellen(eintrag, paket);
            }
        }
    }

    /// Entfernt die Teilnehmer der angegebenen SSRCs vollstaendig
    pub fn ssrcs_entfernen(&mut self, ssrcs: &[u32]) {
        let mut video_entfernt = false;

        for &ssrc in ssrcs {
            let Some(eintrag) = self.router.aufloesen(ssrc) else {
                continue;
            };
            let primaer_ssrc = eintrag.primaer_ssrc;

            if let Some(kanal) = self.audio_kanaele.remove(&primaer_ssrc) {
                kanal.schliessen(self.engine.as_mut());
            }
            if let Some(kanal) = self.video_kanaele.remove(&primaer_ssrc) {
                kanal.schliessen(self.engine.as_mut());
                video_entfernt = true;
            }
            let entfernt = self.router.teilnehmer_entfernen(primaer_ssrc);
            self.telemetrie.entfernen(primaer_ssrc);
            tracing::info!(primaer_ssrc, ssrcs = entfernt.len(), "Teilnehmer entfernt");
        }

        if video_entfernt {
            self.video_quellen_melden();
        }
    }

    fn video_quellen_melden(&self) {
        let quellen: Vec<u32> = self.video_kanaele.keys().copied().collect();
        self.melden(SessionEreignis::VideoQuellen(quellen));
    }

    // -----------------------------------------------------------------------
    // Eingehende Pakete
    // -----------------------------------------------------------------------

    pub fn paket_empfangen(&mut self, paket: Bytes) {
        match self.router.route(&paket, Instant::now()) {
            RoutingErgebnis::Steuerung => self.engine.paket_zustellen(None, paket),
            RoutingErgebnis::Zustellen(eintrag) => self.zustellen(eintrag, paket),
            RoutingErgebnis::Gepuffert { ssrc, meldung } => {
                tracing::trace!(ssrc, "Paket unbekannter SSRC gepuffert");
                match meldung {
                    MeldeSchritt::JetztMelden(ssrcs) => self.unbekannte_ssrcs_melden(ssrcs),
                    MeldeSchritt::TimerPlanen(verzoegerung) => self
                        .medien
                        .verzoegert_posten(verzoegerung, MedienNachricht::UnbekannteMelden),
                    MeldeSchritt::Nichts => {}
                }
            }
            RoutingErgebnis::EigenesPaket | RoutingErgebnis::Ungueltig => {}
        }
    }

    fn zustellen(&mut self, eintrag: SsrcEintrag, paket: Bytes) {
        let vorhanden = match eintrag.art {
            MedienArt::Audio => self.audio_kanaele.contains_key(&eintrag.primaer_ssrc),
            MedienArt::Video => self.video_kanaele.contains_key(&eintrag.primaer_ssrc),
        };
        if vorhanden {
            self.engine.paket_zustellen(Some(eintrag.art), paket);
        } else {
            tracing::trace!(primaer_ssrc = eintrag.primaer_ssrc, art = %eintrag.art, "Kein Kanal, Paket verworfen");
        }
    }

    /// Der Sammel-Timer fuer unbekannte SSRCs ist abgelaufen
    pub fn unbekannte_melden(&mut self) {
        if let Some(ssrcs) = self.router.melde_timer_ausgeloest(Instant::now()) {
            self.unbekannte_ssrcs_melden(ssrcs);
        }
    }

    fn unbekannte_ssrcs_melden(&self, ssrcs: Vec<u32>) {
        tracing::debug!(?ssrcs, "Teilnehmerbeschreibungen angefordert");
        self.melden(SessionEreignis::TeilnehmerBeschreibungenBenoetigt(ssrcs));
    }

    pub fn ausgehendes_paket(&mut self, daten: Bytes, paket_id: u64) {
        if !self.netz.posten(NetzwerkBefehl::Senden { daten, paket_id }) {
            tracing::trace!(paket_id, "Netzwerk-Kontext beendet, Paket verworfen");
        }
    }

    /// Der Netzwerk-Kontext hat das Paket verschickt
    pub fn paket_gesendet(&mut self, paket_id: u64) {
        self.engine.paket_gesendet(paket_id);
    }

    // -----------------------------------------------------------------------
    // Zustand
    // -----------------------------------------------------------------------

    pub fn netzwerk_zustand(&mut self, bereit: bool, fehlgeschlagen: bool) {
        let verbunden = bereit && !fehlgeschlagen;
        if self.politik.verbunden_setzen(verbunden, self.engine.as_mut()) {
            self.melden(SessionEreignis::NetzwerkStatus { verbunden });
        }
    }

    pub fn stumm_setzen(&mut self, stumm: bool) {
        self.politik.stumm_setzen(stumm, self.engine.as_mut());
    }

    pub fn video_capture_setzen(&mut self, quelle: Option<Arc<dyn VideoQuelle>>) {
        if quelle.is_some() && self.video_format.is_none() {
            tracing::warn!("Video-Capture ohne Video-Codec, es wird nichts gesendet");
        }
        if let Some(q) = &quelle {
            tracing::info!(quelle = %q.bezeichnung(), "Video-Capture gesetzt");
        }
        self.engine.video_quelle_setzen(quelle.clone());
        self.politik
            .capture_setzen(quelle.is_some(), self.engine.as_mut());
        self.video_quelle = quelle;
    }

    pub fn video_ausgabe_hinzufuegen(&mut self, ssrc: u32, senke: Weak<dyn VideoSenke>) {
        match self.video_kanaele.get(&ssrc) {
            Some(kanal) => kanal.ausgabe_hinzufuegen(senke),
            None => tracing::debug!(ssrc, "Kein Video-Kanal fuer Ausgabe"),
        }
    }

    pub fn lautstaerke_setzen(&mut self, ssrc: u32, lautstaerke: f64) {
        if self.audio_kanaele.contains_key(&ssrc) {
            self.engine.lautstaerke_setzen(ssrc, lautstaerke);
        } else {
            tracing::debug!(ssrc, "Kein Audio-Kanal fuer Lautstaerke");
        }
    }

    // -----------------------------------------------------------------------
    // Telemetrie
    // -----------------------------------------------------------------------

    pub fn remote_pegel(&mut self, ssrc: u32, wert: PegelWert) {
        // Nachzuegler eines entfernten Teilnehmers ignorieren
        if self.audio_kanaele.contains_key(&ssrc) {
            self.telemetrie.remote_melden(ssrc, wert);
        }
    }

    /// Pegel-Batch melden und den naechsten Tick planen
    pub fn pegel_tick(&mut self) {
        let updates = self.telemetrie.abschluss(self.politik.stumm());
        self.melden(SessionEreignis::AudioPegel(updates));
        self.medien
            .verzoegert_posten(self.config.pegel_intervall(), MedienNachricht::PegelTick);
    }

    pub fn statistik(&self) -> SessionStatistik {
        SessionStatistik {
            lokale_ssrc: self.lokale_ssrc,
            teilnehmer: self.audio_kanaele.len(),
            video_kanaele: self.video_kanaele.len(),
            verbunden: self.politik.verbunden(),
            stumm: self.politik.stumm(),
            hat_capture: self.politik.hat_capture(),
            pegel_ticks: self.telemetrie.ticks(),
            router: self.router.statistik(),
        }
    }

    fn melden(&self, ereignis: SessionEreignis) {
        if self.ereignisse.send(ereignis).is_err() {
            tracing::trace!("Kein Empfaenger fuer Session-Ereignisse");
        }
    }

    // -----------------------------------------------------------------------
    // Abbau
    // -----------------------------------------------------------------------

    /// Netz runter, Senden aus, alle Kanaele schliessen; mehrfach aufrufbar
    pub fn beenden(&mut self) {
        if self.beendet {
            return;
        }
        self.beendet = true;

        self.politik.abbauen(self.engine.as_mut());
        for (_, kanal) in std::mem::take(&mut self.audio_kanaele) {
            kanal.schliessen(self.engine.as_mut());
        }
        for (_, kanal) in std::mem::take(&mut self.video_kanaele) {
            kanal.schliessen(self.engine.as_mut());
        }
        self.engine.capture_analyse_setzen(None);
        if self.video_quelle.take().is_some() {
            self.engine.video_quelle_setzen(None);
        }
        self.router.leeren();
        tracing::info!(ssrc = self.lokale_ssrc, "Group-Session beendet");
    }

    pub fn ist_beendet(&self) -> bool {
        self.beendet
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
