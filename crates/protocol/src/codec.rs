//! Codec-Konfiguration und Payload-Typ-Zuweisung
//!
//! Audio wird fest als Opus empfangen. Fuer ausgehendes Video wird aus den
//! Formaten der Media-Engine der erste VP8-Eintrag gewaehlt und zusammen mit
//! einem RTX-Begleiter auf feste Payload-Typen gelegt.

use crate::control::{FeedbackTyp, SsrcGruppe, VideoPayloadTyp, SEMANTIK_FID, SEMANTIK_SIM};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Audio (Opus, nur Empfang)
// ---------------------------------------------------------------------------

pub const OPUS_PAYLOAD_TYP: u8 = 111;
pub const OPUS_CLOCKRATE: u32 = 48_000;
pub const OPUS_KANAELE: u32 = 2;

// ---------------------------------------------------------------------------
// RTP-Header-Erweiterungen
// ---------------------------------------------------------------------------

pub const URI_AUDIO_LEVEL: &str = "urn:ietf:params:rtp-hdrext:ssrc-audio-level";
pub const URI_ABS_SEND_TIME: &str = "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time";
pub const URI_TRANSPORT_CC: &str =
    "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01";
pub const URI_VIDEO_ORIENTATION: &str = "urn:3gpp:video-orientation";

/// Header-Erweiterung mit fester ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpErweiterung {
    pub id: u32,
    pub uri: String,
}

impl RtpErweiterung {
    pub fn neu(id: u32, uri: &str) -> Self {
        Self {
            id,
            uri: uri.to_string(),
        }
    }
}

/// Erweiterungen fuer eingehende Audio-Streams
pub fn audio_empfangs_erweiterungen() -> Vec<RtpErweiterung> {
    vec![
        RtpErweiterung::neu(1, URI_AUDIO_LEVEL),
        RtpErweiterung::neu(2, URI_ABS_SEND_TIME),
        RtpErweiterung::neu(3, URI_TRANSPORT_CC),
    ]
}

/// Erweiterungen fuer Video (Senden und Empfang)
pub fn video_erweiterungen() -> Vec<RtpErweiterung> {
    vec![
        RtpErweiterung::neu(2, URI_ABS_SEND_TIME),
        RtpErweiterung::neu(3, URI_TRANSPORT_CC),
        RtpErweiterung::neu(13, URI_VIDEO_ORIENTATION),
    ]
}

// ---------------------------------------------------------------------------
// Video-Formate
// ---------------------------------------------------------------------------

/// Ein von der Media-Engine unterstuetztes Video-Format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub name: String,
    #[serde(default)]
    pub parameter: Vec<(String, String)>,
}

impl VideoFormat {
    pub fn neu(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parameter: Vec::new(),
        }
    }
}

/// Payload-Typ des ausgehenden VP8-Streams
pub const VP8_PAYLOAD_TYP: u32 = 100;
/// Payload-Typ des zugehoerigen RTX-Streams
pub const RTX_PAYLOAD_TYP: u32 = 101;
pub const VIDEO_CLOCKRATE: u32 = 90_000;

/// Zugewiesene Payload-Typen fuer ausgehendes Video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AusgehendesVideoFormat {
    pub video: VideoPayloadTyp,
    pub rtx: VideoPayloadTyp,
}

impl AusgehendesVideoFormat {
    /// Beide Payload-Typen in Join-Payload-Reihenfolge
    pub fn payload_typen(&self) -> Vec<VideoPayloadTyp> {
        vec![self.video.clone(), self.rtx.clone()]
    }
}

/// Waehlt VP8 aus den Engine-Formaten und vergibt die Payload-Typen
///
/// Gibt `None` zurueck wenn kein VP8 angeboten wird; Video bleibt dann aus.
pub fn payload_typen_zuweisen(formate: &[VideoFormat]) -> Option<AusgehendesVideoFormat> {
    let vp8 = formate.iter().find(|f| f.name.eq_ignore_ascii_case("VP8"))?;

    let video = VideoPayloadTyp {
        id: VP8_PAYLOAD_TYP,
        name: "VP8".to_string(),
        clockrate: VIDEO_CLOCKRATE,
        channels: 0,
        feedback_types: vec![
            FeedbackTyp::neu("goog-remb", ""),
            FeedbackTyp::neu("transport-cc", ""),
            FeedbackTyp::neu("ccm", "fir"),
            FeedbackTyp::neu("nack", ""),
            FeedbackTyp::neu("nack", "pli"),
        ],
        parameters: vp8.parameter.clone(),
    };
    let rtx = VideoPayloadTyp {
        id: RTX_PAYLOAD_TYP,
        name: "rtx".to_string(),
        clockrate: VIDEO_CLOCKRATE,
        channels: 0,
        feedback_types: Vec::new(),
        parameters: vec![("apt".to_string(), VP8_PAYLOAD_TYP.to_string())],
    };
    Some(AusgehendesVideoFormat { video, rtx })
}

// ---------------------------------------------------------------------------
// Ausgehende SSRCs
// ---------------------------------------------------------------------------

/// Ein Simulcast-Layer: Medien-SSRC und RTX-SSRC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulcastLayer {
    pub ssrc: u32,
    pub rtx_ssrc: u32,
}

/// Layer-SSRCs aus der Audio-SSRC ableiten (`a+1+2i`, `a+2+2i`)
pub fn simulcast_layer(audio_ssrc: u32, anzahl: usize) -> Vec<SimulcastLayer> {
    (0..anzahl as u32)
        .map(|i| SimulcastLayer {
            ssrc: audio_ssrc.wrapping_add(1 + 2 * i),
            rtx_ssrc: audio_ssrc.wrapping_add(2 + 2 * i),
        })
        .collect()
}

/// Quellgruppen fuer den Join-Payload
///
/// `SIM` nur bei mehr als einem Layer, danach eine `FID`-Gruppe je Layer.
pub fn quell_gruppen(layer: &[SimulcastLayer]) -> Vec<SsrcGruppe> {
    let mut gruppen = Vec::with_capacity(layer.len() + 1);
    if layer.len() > 1 {
        gruppen.push(SsrcGruppe::neu(
            SEMANTIK_SIM,
            layer.iter().map(|l| l.ssrc).collect(),
        ));
    }
    for l in layer {
        gruppen.push(SsrcGruppe::neu(SEMANTIK_FID, vec![l.ssrc, l.rtx_ssrc]));
    }
    gruppen
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
