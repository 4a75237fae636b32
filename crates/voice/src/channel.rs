//! Eingehende Kanaele pro Teilnehmer
//!
//! Ein Teilnehmer hat hoechstens einen Audio- und einen Video-Kanal. Die
//! Kanaele melden ihre Streams bei der Media-Engine an und wieder ab; das
//! Abmelden geschieht explizit ueber `schliessen`, weil dafuer die Engine
//! gebraucht wird.

use std::sync::{Arc, Weak};

use huddle_audio::{CombinedVad, EnergieAnalysator, PegelAnalysator, VadKonfig};
use huddle_protocol::control::haupt_video_ssrc;
use huddle_protocol::TeilnehmerBeschreibung;
use parking_lot::Mutex;

use crate::context::{MedienNachricht, MedienPost};
use crate::media::{AudioEmpfangsParameter, MedienEngine, VideoEmpfangsParameter, VideoFrame, VideoSenke};

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

/// Eingehender Audio-Stream eines Teilnehmers
pub struct EingehenderAudioKanal {
    ssrc: u32,
}

impl EingehenderAudioKanal {
    /// Meldet den Stream an und haengt einen Pegel-Analysator an die Ausgabe
    pub fn oeffnen(
        ssrc: u32,
        engine: &mut dyn MedienEngine,
        post: MedienPost,
        vad: &VadKonfig,
    ) -> Self {
        engine.audio_empfang_hinzufuegen(&AudioEmpfangsParameter::opus(ssrc));

        let mut analysator =
            PegelAnalysator::neu(CombinedVad::neu(Box::new(EnergieAnalysator::neu(vad.clone()))));
        engine.audio_senke_setzen(
            ssrc,
            Some(Box::new(move |samples: &[i16], kanaele: usize| {
                if let Some(wert) = analysator.frame_i16(samples, kanaele) {
                    post.posten(MedienNachricht::RemotePegel { ssrc, wert });
                }
            })),
        );
        engine.wiedergabe_setzen(ssrc, true);

        tracing::debug!(ssrc, "Audio-Kanal geoeffnet");
        Self { ssrc }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn schliessen(self, engine: &mut dyn MedienEngine) {
        engine.wiedergabe_setzen(self.ssrc, false);
        engine.audio_senke_setzen(self.ssrc, None);
        engine.audio_empfang_entfernen(self.ssrc);
        tracing::debug!(ssrc = self.ssrc, "Audio-Kanal geschlossen");
    }
}

// ---------------------------------------------------------------------------
// Video-Verteiler
// ---------------------------------------------------------------------------

struct VerteilerZustand {
    senken: Vec<Weak<dyn VideoSenke>>,
    letzter_frame: Option<VideoFrame>,
}

/// Verteilt die Frames eines Video-Kanals an beliebig viele Ausgaben
///
/// Ausgaben werden schwach gehalten; verschwundene fallen beim naechsten
/// Frame heraus. Eine neue Ausgabe bekommt sofort den letzten Frame.
pub struct VideoVerteiler {
    zustand: Mutex<VerteilerZustand>,
}

impl VideoVerteiler {
    pub fn neu() -> Self {
        Self {
            zustand: Mutex::new(VerteilerZustand {
                senken: Vec::new(),
                letzter_frame: None,
            }),
        }
    }

    pub fn hinzufuegen(&self, senke: Weak<dyn VideoSenke>) {
        let Some(lebend) = senke.upgrade() else {
            return;
        };
        let letzter = {
            let mut zustand = self.zustand.lock();
            zustand.senken.push(senke);
            zustand.letzter_frame.clone()
        };
        if let Some(frame) = letzter {
            lebend.frame(&frame);
        }
    }

    /// Anzahl noch lebender Ausgaben
    pub fn anzahl(&self) -> usize {
        self.zustand
            .lock()
            .senken
            .iter()
            .filter(|s| s.strong_count() > 0)
            .count()
    }
}

impl Default for VideoVerteiler {
    fn default() -> Self {
        Self::neu()
    }
}

impl VideoSenke for VideoVerteiler {
    fn frame(&self, frame: &VideoFrame) {
        // Ausgaben ausserhalb des Locks aufrufen
        let lebende: Vec<Arc<dyn VideoSenke>> = {
            let mut zustand = self.zustand.lock();
            zustand.letzter_frame = Some(frame.clone());
            let mut lebende = Vec::with_capacity(zustand.senken.len());
            zustand.senken.retain(|s| match s.upgrade() {
                Some(senke) => {
                    lebende.push(senke);
                    true
                }
                None => false,
            });
            lebende
        };
        for senke in lebende {
            senke.frame(frame);
        }
    }
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

/// Eingehender Video-Stream eines Teilnehmers (alle Layer)
pub struct EingehenderVideoKanal {
    audio_ssrc: u32,
    haupt_ssrc: u32,
    ssrcs: Vec<u32>,
    verteiler: Arc<VideoVerteiler>,
}

impl EingehenderVideoKanal {
    /// Legt den Kanal an; `None` wenn die Beschreibung keine Quellgruppen hat
    pub fn oeffnen(
        beschreibung: &TeilnehmerBeschreibung,
        engine: &mut dyn MedienEngine,
    ) -> Option<Self> {
        let haupt_ssrc = haupt_video_ssrc(&beschreibung.video_source_groups)?;

        let mut ssrcs: Vec<u32> = beschreibung
            .video_source_groups
            .iter()
            .flat_map(|g| g.ssrcs.iter().copied())
            .collect();
        ssrcs.sort_unstable();
        ssrcs.dedup();

        let audio_ssrc = beschreibung.audio_ssrc;
        engine.video_empfang_hinzufuegen(&VideoEmpfangsParameter {
            audio_ssrc,
            haupt_ssrc,
            stream_id: format!("stream{audio_ssrc}"),
            payload_typen: beschreibung.video_payload_types.clone(),
            erweiterungen: beschreibung.video_extension_map.clone(),
            quell_gruppen: beschreibung.video_source_groups.clone(),
        });

        let verteiler = Arc::new(VideoVerteiler::neu());
        engine.video_senke_setzen(haupt_ssrc, Some(verteiler.clone()));

        tracing::debug!(audio_ssrc, haupt_ssrc, layer_ssrcs = ssrcs.len(), "Video-Kanal geoeffnet");
        Some(Self {
            audio_ssrc,
            haupt_ssrc,
            ssrcs,
            verteiler,
        })
    }

    pub fn audio_ssrc(&self) -> u32 {
        self.audio_ssrc
    }

    pub fn haupt_ssrc(&self) -> u32 {
        self.haupt_ssrc
    }

    /// Alle SSRCs der Quellgruppen, aufsteigend
    pub fn ssrcs(&self) -> &[u32] {
        &self.ssrcs
    }

    pub fn ausgabe_hinzufuegen(&self, senke: Weak<dyn VideoSenke>) {
        self.verteiler.hinzufuegen(senke);
    }

    pub fn schliessen(self, engine: &mut dyn MedienEngine) {
        engine.video_senke_setzen(self.haupt_ssrc, None);
        engine.video_empfang_entfernen(self.haupt_ssrc);
        tracing::debug!(audio_ssrc = self.audio_ssrc, "Video-Kanal geschlossen");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::fake::{Aufruf, AufzeichnendeEngine};
    use bytes::Bytes;
    use huddle_protocol::SsrcGruppe;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct ZaehlendeSenke {
        frames: Mutex<Vec<i64>>,
    }

    impl VideoSenke for ZaehlendeSenke {
        fn frame(&self, frame: &VideoFrame) {
            self.frames.lock().push(frame.zeitstempel_us);
        }
    }

    fn frame(zeit: i64) -> VideoFrame {
        VideoFrame {
            breite: 640,
            hoehe: 360,
            zeitstempel_us: zeit,
            daten: Bytes::new(),
        }
    }

    #[test]
    fn neue_ausgabe_bekommt_letzten_frame() {
        let verteiler = VideoVerteiler::neu();
        verteiler.frame(&frame(1));
        verteiler.frame(&frame(2));

        let senke = Arc::new(ZaehlendeSenke::default());
        let schwach: Weak<dyn VideoSenke> = Arc::downgrade(&senke) as Weak<dyn VideoSenke>;
        verteiler.hinzufuegen(schwach);
        verteiler.frame(&frame(3));
        assert_eq!(*senke.frames.lock(), vec![2, 3]);
    }

    #[test]
    fn tote_ausgaben_fallen_heraus() {
        let verteiler = VideoVerteiler::neu();
        let senke = Arc::new(ZaehlendeSenke::default());
        verteiler.hinzufuegen(Arc::downgrade(&senke) as Weak<dyn VideoSenke>);
        assert_eq!(verteiler.anzahl(), 1);
        drop(senke);
        verteiler.frame(&frame(1));
        assert_eq!(verteiler.anzahl(), 0);
    }

    #[tokio::test]
    async fn audio_kanal_meldet_pegel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = AufzeichnendeEngine::neu();
        let kanal =
            EingehenderAudioKanal::oeffnen(1001, &mut engine, MedienPost::neu(&tx), &VadKonfig::default());

        engine.audio_dekodiert(1001, &[2000i16; 1200]);
        match rx.recv().await {
            Some(MedienNachricht::RemotePegel { ssrc, wert }) => {
                assert_eq!(ssrc, 1001);
                assert!((wert.level - 0.5).abs() < 1e-6);
            }
            _ => panic!("RemotePegel erwartet"),
        }

        kanal.schliessen(&mut engine);
        let aufrufe = engine.aufrufe();
        assert!(aufrufe.contains(&Aufruf::AudioHinzu(1001)));
        assert!(aufrufe.contains(&Aufruf::AudioWeg(1001)));
        assert!(aufrufe.contains(&Aufruf::AudioSenke(1001, false)));
    }

    #[test]
    fn video_kanal_nutzt_sim_haupt_ssrc() {
        let mut engine = AufzeichnendeEngine::neu();
        let beschreibung = TeilnehmerBeschreibung {
            audio_ssrc: 1000,
            video_payload_types: vec![huddle_protocol::VideoPayloadTyp {
                id: 100,
                name: "VP8".into(),
                clockrate: 90_000,
                channels: 0,
                feedback_types: Vec::new(),
                parameters: Vec::new(),
            }],
            video_extension_map: Vec::new(),
            video_source_groups: vec![
                SsrcGruppe::neu("SIM", vec![1001, 1003]),
                SsrcGruppe::neu("FID", vec![1001, 1002]),
                SsrcGruppe::neu("FID", vec![1003, 1004]),
            ],
        };
        let kanal = EingehenderVideoKanal::oeffnen(&beschreibung, &mut engine).unwrap();
        assert_eq!(kanal.haupt_ssrc(), 1001);
        assert_eq!(kanal.ssrcs(), &[1001, 1002, 1003, 1004]);
        assert!(engine.video_senke(1001).is_some());

        kanal.schliessen(&mut engine);
        assert!(engine.video_senke(1001).is_none());
        assert!(engine.aufrufe().contains(&Aufruf::VideoWeg(1001)));
    }

    #[test]
    fn ohne_quellgruppen_kein_video_kanal() {
        let mut engine = AufzeichnendeEngine::neu();
        assert!(EingehenderVideoKanal::oeffnen(&TeilnehmerBeschreibung::nur_audio(5), &mut engine).is_none());
        assert!(engine.aufrufe().is_empty());
    }
}
