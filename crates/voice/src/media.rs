//! Schnittstelle zur Media-Engine
//!
//! Die Media-Engine (Codecs, Jitter-Buffer, Encoder, Geraete) ist fuer die
//! Session undurchsichtig. Sie wird ausschliesslich aus dem Media-Kontext
//! heraus angesprochen, daher `&mut self` ohne eigene Synchronisierung.
//!
//! ## Richtung
//!
//! ```text
//! Session  --(Streams, Pakete, Sende-Flags, Bitrate)-->  MedienEngine
//! Session  <--(Audio-Senke, Capture-Analyse, PaketAusgang)--  MedienEngine
//! ```

use std::sync::Arc;

use bytes::Bytes;
use huddle_core::MedienArt;
use huddle_protocol::codec::{
    self, AusgehendesVideoFormat, RtpErweiterung, SimulcastLayer, VideoFormat,
};
use huddle_protocol::{SsrcGruppe, VideoPayloadTyp};

use crate::context::PaketAusgang;
use crate::policy::BitrateProfil;

/// Empfaengt dekodierte Mono/Stereo-Samples eines Remote-Streams
pub type AudioSenke = Box<dyn FnMut(&[i16], usize) + Send>;

/// Empfaengt aufgenommene Samples (16-Bit-Skala) vor dem Encoder
pub type CaptureAnalyse = Box<dyn FnMut(&[f32], usize) + Send>;

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

/// Dekodierter Video-Frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub breite: u32,
    pub hoehe: u32,
    pub zeitstempel_us: i64,
    pub daten: Bytes,
}

/// Ziel fuer dekodierte Video-Frames (z.B. ein Renderer)
pub trait VideoSenke: Send + Sync {
    fn frame(&self, frame: &VideoFrame);
}

/// Lokale Video-Quelle (Kamera, Bildschirm)
pub trait VideoQuelle: Send + Sync {
    fn bezeichnung(&self) -> String;
}

// ---------------------------------------------------------------------------
// Empfangsparameter
// ---------------------------------------------------------------------------

/// Parameter eines eingehenden Audio-Streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioEmpfangsParameter {
    pub ssrc: u32,
    pub stream_id: String,
    pub payload_typ: u8,
    pub clockrate: u32,
    pub kanaele: u32,
    pub erweiterungen: Vec<RtpErweiterung>,
    pub rtcp_reduziert: bool,
}

impl AudioEmpfangsParameter {
    /// Opus, 48 kHz, Stereo, reduzierte RTCP-Groesse
    pub fn opus(ssrc: u32) -> Self {
        Self {
            ssrc,
            stream_id: format!("stream{ssrc}"),
            payload_typ: codec::OPUS_PAYLOAD_TYP,
            clockrate: codec::OPUS_CLOCKRATE,
            kanaele: codec::OPUS_KANAELE,
            erweiterungen: codec::audio_empfangs_erweiterungen(),
            rtcp_reduziert: true,
        }
    }
}

/// Parameter eines eingehenden Video-Streams
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEmpfangsParameter {
    /// Primaere Audio-SSRC des Teilnehmers
    pub audio_ssrc: u32,
    pub haupt_ssrc: u32,
    pub stream_id: String,
    pub payload_typen: Vec<VideoPayloadTyp>,
    pub erweiterungen: Vec<(u32, String)>,
    pub quell_gruppen: Vec<SsrcGruppe>,
}

// ---------------------------------------------------------------------------
// MedienEngine
// ---------------------------------------------------------------------------

/// Vom Session-Kern benoetigte Operationen der Media-Engine
pub trait MedienEngine: Send {
    /// Einmalig beim Start; ueber `ausgang` verlassen RTP/RTCP-Pakete die Engine
    fn starten(&mut self, ausgang: PaketAusgang);

    fn audio_empfang_hinzufuegen(&mut self, parameter: &AudioEmpfangsParameter);
    fn audio_empfang_entfernen(&mut self, ssrc: u32);
    fn wiedergabe_setzen(&mut self, ssrc: u32, aktiv: bool);
    fn lautstaerke_setzen(&mut self, ssrc: u32, lautstaerke: f64);
    fn audio_senke_setzen(&mut self, ssrc: u32, senke: Option<AudioSenke>);
    fn capture_analyse_setzen(&mut self, analyse: Option<CaptureAnalyse>);

    fn video_empfang_hinzufuegen(&mut self, parameter: &VideoEmpfangsParameter);
    fn video_empfang_entfernen(&mut self, haupt_ssrc: u32);
    fn video_senke_setzen(&mut self, haupt_ssrc: u32, senke: Option<Arc<dyn VideoSenke>>);

    /// `art == None` fuer RTCP
    fn paket_zustellen(&mut self, art: Option<MedienArt>, paket: Bytes);
    fn netzwerk_status(&mut self, art: MedienArt, oben: bool);
    fn audio_senden(&mut self, aktiv: bool);
    fn video_senden(&mut self, aktiv: bool);
    fn bitrate_setzen(&mut self, profil: BitrateProfil);

    /// Vom Encoder unterstuetzte Video-Formate
    fn video_formate(&self) -> Vec<VideoFormat>;
    fn sende_streams_konfigurieren(
        &mut self,
        audio_ssrc: u32,
        video: Option<&AusgehendesVideoFormat>,
        layer: &[SimulcastLayer],
    );
    fn video_quelle_setzen(&mut self, quelle: Option<Arc<dyn VideoQuelle>>);
    fn paket_gesendet(&mut self, paket_id: u64);
}
