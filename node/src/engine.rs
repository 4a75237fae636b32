//! Protokollierende Media-Engine ohne Codec
//!
//! Der Knoten hat keine Audio-Hardware. Die Engine erfuellt den
//! [`MedienEngine`]-Vertrag trotzdem vollstaendig: Empfangs-Streams werden
//! verwaltet, zugestellte Audio-Pakete erreichen die Pegel-Senken als
//! Stille-Frames, und solange Senden erlaubt ist, verlaesst alle 20 ms ein
//! Opus-Stille-Paket die Engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use huddle_core::MedienArt;
use huddle_protocol::codec::{
    AusgehendesVideoFormat, SimulcastLayer, VideoFormat, OPUS_PAYLOAD_TYP,
};
use huddle_protocol::rtp::rtp_paket_bauen;
use huddle_protocol::RtpHeader;
use huddle_voice::context::PaketAusgang;
use huddle_voice::media::{
    AudioEmpfangsParameter, AudioSenke, CaptureAnalyse, VideoEmpfangsParameter,
};
use huddle_voice::{BitrateProfil, MedienEngine, VideoQuelle, VideoSenke};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Opus-Frame fuer 20 ms Stille
const OPUS_STILLE: [u8; 3] = [0xF8, 0xFF, 0xFE];
/// Samples pro 20-ms-Frame bei 48 kHz
const FRAME_SAMPLES: usize = 960;
const FRAME_DAUER: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineZaehler {
    pub empfangen_audio: u64,
    pub empfangen_video: u64,
    pub empfangen_rtcp: u64,
    pub gesendet: u64,
}

/// Media-Engine die nur protokolliert und Stille erzeugt
pub struct ProtokollEngine {
    ausgang: Option<PaketAusgang>,
    audio_ssrc: u32,
    audio_senken: HashMap<u32, AudioSenke>,
    capture: Arc<Mutex<Option<CaptureAnalyse>>>,
    video_senken: HashMap<u32, Arc<dyn VideoSenke>>,
    video_format: bool,
    sender: Option<JoinHandle<()>>,
    zaehler: Arc<Mutex<EngineZaehler>>,
}

impl ProtokollEngine {
    /// `video_format` legt fest ob VP8 angeboten wird
    pub fn neu(video_format: bool) -> Self {
        Self {
            ausgang: None,
            audio_ssrc: 0,
            audio_senken: HashMap::new(),
            capture: Arc::new(Mutex::new(None)),
            video_senken: HashMap::new(),
            video_format,
            sender: None,
            zaehler: Arc::new(Mutex::new(EngineZaehler::default())),
        }
    }

    /// Gemeinsamer Zaehlerstand, bleibt nach dem Verschieben der Engine lesbar
    pub fn zaehler(&self) -> Arc<Mutex<EngineZaehler>> {
        self.zaehler.clone()
    }

    fn sender_stoppen(&mut self) {
        if let Some(sender) = self.sender.take() {
            sender.abort();
        }
    }
}

async fn stille_senden(
    ausgang: PaketAusgang,
    ssrc: u32,
    capture: Arc<Mutex<Option<CaptureAnalyse>>>,
    zaehler: Arc<Mutex<EngineZaehler>>,
) {
    let mut takt = tokio::time::interval(FRAME_DAUER);
    let mut sequenz: u16 = 0;
    let mut zeitstempel: u32 = 0;
    let stille = [0f32; FRAME_SAMPLES];

    loop {
        takt.tick().await;
        if let Some(analyse) = capture.lock().as_mut() {
            analyse(&stille, 1);
        }

        let paket = rtp_paket_bauen(OPUS_PAYLOAD_TYP, sequenz, zeitstempel, ssrc, &OPUS_STILLE);
        let paket_id = u64::from(sequenz);
        if !ausgang.senden(Bytes::from(paket), paket_id) {
            tracing::debug!(ssrc, "Media-Kontext beendet, Sender stoppt");
            break;
        }
        zaehler.lock().gesendet += 1;
        sequenz = sequenz.wrapping_add(1);
        zeitstempel = zeitstempel.wrapping_add(FRAME_SAMPLES as u32);
    }
}

impl MedienEngine for ProtokollEngine {
    fn starten(&mut self, ausgang: PaketAusgang) {
        tracing::info!(video = self.video_format, "Protokoll-Engine gestartet");
        self.ausgang = Some(ausgang);
    }

    fn audio_empfang_hinzufuegen(&mut self, parameter: &AudioEmpfangsParameter) {
        tracing::debug!(
            ssrc = parameter.ssrc,
            stream = %parameter.stream_id,
            payload_typ = parameter.payload_typ,
            "Audio-Empfang angelegt"
        );
    }

    fn audio_empfang_entfernen(&mut self, ssrc: u32) {
        self.audio_senken.remove(&ssrc);
        tracing::debug!(ssrc, "Audio-Empfang entfernt");
    }

    fn wiedergabe_setzen(&mut self, ssrc: u32, aktiv: bool) {
        tracing::debug!(ssrc, aktiv, "Wiedergabe");
    }

    fn lautstaerke_setzen(&mut self, ssrc: u32, lautstaerke: f64) {
        tracing::debug!(ssrc, lautstaerke, "Lautstaerke");
    }

    fn audio_senke_setzen(&mut self, ssrc: u32, senke: Option<AudioSenke>) {
        match senke {
            Some(senke) => {
                self.audio_senken.insert(ssrc, senke);
            }
            None => {
                self.audio_senken.remove(&ssrc);
            }
        }
    }

    fn capture_analyse_setzen(&mut self, analyse: Option<CaptureAnalyse>) {
        *self.capture.lock() = analyse;
    }

    fn video_empfang_hinzufuegen(&mut self, parameter: &VideoEmpfangsParameter) {
        tracing::debug!(
            haupt_ssrc = parameter.haupt_ssrc,
            audio_ssrc = parameter.audio_ssrc,
            gruppen = parameter.quell_gruppen.len(),
            "Video-Empfang angelegt"
        );
    }

    fn video_empfang_entfernen(&mut self, haupt_ssrc: u32) {
        self.video_senken.remove(&haupt_ssrc);
        tracing::debug!(haupt_ssrc, "Video-Empfang entfernt");
    }

    fn video_senke_setzen(&mut self, haupt_ssrc: u32, senke: Option<Arc<dyn VideoSenke>>) {
        match senke {
            Some(senke) => {
                self.video_senken.insert(haupt_ssrc, senke);
            }
            None => {
                self.video_senken.remove(&haupt_ssrc);
            }
        }
    }

    fn paket_zustellen(&mut self, art: Option<MedienArt>, paket: Bytes) {
        let mut zaehler = self.zaehler.lock();
        match art {
            Some(MedienArt::Audio) => {
                zaehler.empfangen_audio += 1;
                let Ok(header) = RtpHeader::parsen(&paket) else {
                    return;
                };
                if let Some(senke) = self.audio_senken.get_mut(&header.ssrc) {
                    senke(&[0i16; FRAME_SAMPLES], 1);
                }
            }
            Some(MedienArt::Video) => zaehler.empfangen_video += 1,
            None => zaehler.empfangen_rtcp += 1,
        }
        tracing::trace!(art = ?art, laenge = paket.len(), "Paket zugestellt");
    }

    fn netzwerk_status(&mut self, art: MedienArt, oben: bool) {
        tracing::debug!(%art, oben, "Netzwerkstatus");
    }

    fn audio_senden(&mut self, aktiv: bool) {
        tracing::info!(aktiv, "Audio senden");
        self.sender_stoppen();
        if !aktiv {
            return;
        }
        if let Some(ausgang) = self.ausgang.clone() {
            self.sender = Some(tokio::spawn(stille_senden(
                ausgang,
                self.audio_ssrc,
                self.capture.clone(),
                self.zaehler.clone(),
            )));
        }
    }

    fn video_senden(&mut self, aktiv: bool) {
        tracing::info!(aktiv, "Video senden");
    }

    fn bitrate_setzen(&mut self, profil: BitrateProfil) {
        tracing::debug!(
            min = profil.min_bps,
            start = profil.start_bps,
            max = profil.max_bps,
            "Bitrate"
        );
    }

    fn video_formate(&self) -> Vec<VideoFormat> {
        if self.video_format {
            vec![VideoFormat::neu("VP8")]
        } else {
            Vec::new()
        }
    }

    fn sende_streams_konfigurieren(
        &mut self,
        audio_ssrc: u32,
        video: Option<&AusgehendesVideoFormat>,
        layer: &[SimulcastLayer],
    ) {
        self.audio_ssrc = audio_ssrc;
        tracing::info!(
            audio_ssrc,
            video_pt = video.map(|v| v.video.id),
            layer = layer.len(),
            "Sende-Streams konfiguriert"
        );
    }

    fn video_quelle_setzen(&mut self, quelle: Option<Arc<dyn VideoQuelle>>) {
        tracing::info!(
            quelle = quelle.as_ref().map(|q| q.bezeichnung()),
            "Video-Quelle"
        );
    }

    fn paket_gesendet(&mut self, paket_id: u64) {
        tracing::trace!(paket_id, "Paket gesendet");
    }
}

impl Drop for ProtokollEngine {
    fn drop(&mut self) {
        self.sender_stoppen();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_voice::context::{MedienNachricht, MedienPost};
    use tokio::sync::mpsc;

    #[test]
    fn vp8_nur_wenn_angeboten() {
        assert_eq!(ProtokollEngine::neu(true).video_formate().len(), 1);
        assert!(ProtokollEngine::neu(false).video_formate().is_empty());
    }

    #[test]
    fn audio_paket_erreicht_senke() {
        let mut engine = ProtokollEngine::neu(false);
        let aufrufe = Arc::new(Mutex::new(0usize));
        let zaehler = aufrufe.clone();
        engine.audio_senke_setzen(
            7,
            Some(Box::new(move |samples: &[i16], _kanaele: usize| {
                assert_eq!(samples.len(), FRAME_SAMPLES);
                *zaehler.lock() += 1;
            })),
        );

        let paket = rtp_paket_bauen(OPUS_PAYLOAD_TYP, 1, 0, 7, &OPUS_STILLE);
        engine.paket_zustellen(Some(MedienArt::Audio), Bytes::from(paket));
        engine.paket_zustellen(None, Bytes::from_static(&[0x80, 201]));

        assert_eq!(*aufrufe.lock(), 1);
        let stand = *engine.zaehler().lock();
        assert_eq!(stand.empfangen_audio, 1);
        assert_eq!(stand.empfangen_rtcp, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn senden_erzeugt_stille_pakete() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = ProtokollEngine::neu(false);
        engine.starten(PaketAusgang::neu(MedienPost::neu(&tx)));
        engine.sende_streams_konfigurieren(4242, None, &[]);
        engine.audio_senden(true);

        for erwartet in 0..3u64 {
            match rx.recv().await {
                Some(MedienNachricht::AusgehendesPaket { daten, paket_id }) => {
                    assert_eq!(paket_id, erwartet);
                    let header = RtpHeader::parsen(&daten).unwrap();
                    assert_eq!(header.ssrc, 4242);
                    assert_eq!(header.payload_typ, OPUS_PAYLOAD_TYP);
                }
                _ => panic!("AusgehendesPaket erwartet"),
            }
        }

        engine.audio_senden(false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        while let Ok(nachricht) = rx.try_recv() {
            assert!(matches!(nachricht, MedienNachricht::AusgehendesPaket { .. }));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }
}
