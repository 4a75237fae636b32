//! Control-Protokoll (Join-Payloads, Teilnehmer, Signalisierung)
//!
//! Alle Steuernachrichten laufen als JSON ueber die zuverlaessige
//! Signalisierungsverbindung (KCP), eine Nachricht pro KCP-Nachricht.
//!
//! ## Kompatibilitaet
//! ICE-Kandidaten sind flache String-Records; numerische Felder (Port,
//! Prioritaet, ...) werden als Dezimalstrings transportiert. Diese
//! Text-Kodierung muss erhalten bleiben.

use huddle_core::{HuddleError, Result};
use serde::{Deserialize, Serialize};

/// Semantik einer Simulcast-Gruppe
pub const SEMANTIK_SIM: &str = "SIM";
/// Semantik einer Retransmission-Gruppe (SSRC + RTX-SSRC)
pub const SEMANTIK_FID: &str = "FID";

// ---------------------------------------------------------------------------
// ICE
// ---------------------------------------------------------------------------

/// ICE-Zugangsdaten einer Seite
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceParameter {
    pub ufrag: String,
    pub pwd: String,
}

/// ICE-Kandidat als flacher String-Record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceKandidat {
    pub component: String,
    pub protocol: String,
    pub ip: String,
    pub port: String,
    pub priority: String,
    #[serde(rename = "type")]
    pub typ: String,
    pub generation: String,
    pub foundation: String,
    pub network: String,
}

impl IceKandidat {
    /// Komponente als Zahl (1 = RTP)
    pub fn component_wert(&self) -> Result<u32> {
        zahl_parsen("component", &self.component)
    }

    pub fn port_wert(&self) -> Result<u16> {
        zahl_parsen("port", &self.port)
    }

    pub fn priority_wert(&self) -> Result<u32> {
        zahl_parsen("priority", &self.priority)
    }

    pub fn generation_wert(&self) -> Result<u32> {
        zahl_parsen("generation", &self.generation)
    }

    pub fn network_wert(&self) -> Result<u32> {
        zahl_parsen("network", &self.network)
    }

    /// Socket-Adresse aus `ip` und `port`
    pub fn adresse(&self) -> Result<std::net::SocketAddr> {
        let ip: std::net::IpAddr = self.ip.parse().map_err(|_| HuddleError::UngueltigerKandidat {
            feld: "ip",
            wert: self.ip.clone(),
        })?;
        Ok(std::net::SocketAddr::new(ip, self.port_wert()?))
    }
}

fn zahl_parsen<T: std::str::FromStr>(feld: &'static str, wert: &str) -> Result<T> {
    wert.parse().map_err(|_| HuddleError::UngueltigerKandidat {
        feld,
        wert: wert.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Payload-Typen und SSRC-Gruppen
// ---------------------------------------------------------------------------

/// RTCP-Feedback-Typ eines Payload-Typs (`nack`, `nack pli`, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackTyp {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default)]
    pub subtype: String,
}

impl FeedbackTyp {
    pub fn neu(typ: &str, subtype: &str) -> Self {
        Self {
            typ: typ.to_string(),
            subtype: subtype.to_string(),
        }
    }
}

/// Beschreibung eines Video-Payload-Typs im Join-Payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoPayloadTyp {
    pub id: u32,
    pub name: String,
    pub clockrate: u32,
    pub channels: u32,
    #[serde(default)]
    pub feedback_types: Vec<FeedbackTyp>,
    #[serde(default)]
    pub parameters: Vec<(String, String)>,
}

/// SSRC-Gruppe (`SIM` fuer Simulcast-Layer, `FID` fuer SSRC + RTX)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsrcGruppe {
    pub semantics: String,
    pub ssrcs: Vec<u32>,
}

impl SsrcGruppe {
    pub fn neu(semantics: &str, ssrcs: Vec<u32>) -> Self {
        Self {
            semantics: semantics.to_string(),
            ssrcs,
        }
    }
}

/// Haupt-SSRC eines Video-Senders
///
/// Erste SSRC der ersten `SIM`-Gruppe, sonst erste SSRC der ersten Gruppe.
pub fn haupt_video_ssrc(gruppen: &[SsrcGruppe]) -> Option<u32> {
    gruppen
        .iter()
        .find(|g| g.semantics == SEMANTIK_SIM)
        .or_else(|| gruppen.first())
        .and_then(|g| g.ssrcs.first().copied())
}

// ---------------------------------------------------------------------------
// Join-Payloads
// ---------------------------------------------------------------------------

/// Was ein Teilnehmer ueber sich veroeffentlicht um beitreten zu koennen
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinPayload {
    pub ssrc: u32,
    #[serde(default)]
    pub video_payload_types: Vec<VideoPayloadTyp>,
    /// Header-Erweiterungen als `(id, uri)`
    #[serde(default)]
    pub video_extension_map: Vec<(u32, String)>,
    #[serde(default)]
    pub video_source_groups: Vec<SsrcGruppe>,
    pub ufrag: String,
    pub pwd: String,
}

impl JoinPayload {
    pub fn ice_parameter(&self) -> IceParameter {
        IceParameter {
            ufrag: self.ufrag.clone(),
            pwd: self.pwd.clone(),
        }
    }
}

/// Antwort der Gegenseite auf einen Join (ICE-Daten des Remote-Endpunkts)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponsePayload {
    pub ufrag: String,
    pub pwd: String,
    #[serde(default)]
    pub candidates: Vec<IceKandidat>,
}

impl JoinResponsePayload {
    pub fn ice_parameter(&self) -> IceParameter {
        IceParameter {
            ufrag: self.ufrag.clone(),
            pwd: self.pwd.clone(),
        }
    }
}

/// Beschreibung eines entfernten Teilnehmers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeilnehmerBeschreibung {
    pub audio_ssrc: u32,
    #[serde(default)]
    pub video_payload_types: Vec<VideoPayloadTyp>,
    #[serde(default)]
    pub video_extension_map: Vec<(u32, String)>,
    #[serde(default)]
    pub video_source_groups: Vec<SsrcGruppe>,
}

impl TeilnehmerBeschreibung {
    /// Reiner Audio-Teilnehmer
    pub fn nur_audio(audio_ssrc: u32) -> Self {
        Self {
            audio_ssrc,
            ..Default::default()
        }
    }

    /// Video-Kanal wird nur mit Payload-Typen und Quellgruppen angelegt
    pub fn hat_video(&self) -> bool {
        !self.video_payload_types.is_empty() && !self.video_source_groups.is_empty()
    }
}

impl From<&JoinPayload> for TeilnehmerBeschreibung {
    fn from(p: &JoinPayload) -> Self {
        Self {
            audio_ssrc: p.ssrc,
            video_payload_types: p.video_payload_types.clone(),
            video_extension_map: p.video_extension_map.clone(),
            video_source_groups: p.video_source_groups.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Signalisierungsnachrichten
// ---------------------------------------------------------------------------

/// Alle Nachrichten auf der Signalisierungsverbindung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "typ", content = "daten", rename_all = "snake_case")]
pub enum SignalNachricht {
    /// Eigener Join-Payload
    JoinPayload(JoinPayload),
    /// Antwort mit Remote-ICE-Daten und den bereits anwesenden Teilnehmern
    JoinResponse {
        payload: JoinResponsePayload,
        teilnehmer: Vec<TeilnehmerBeschreibung>,
    },
    /// Neue Teilnehmer
    TeilnehmerHinzu(Vec<TeilnehmerBeschreibung>),
    /// SSRCs die den Call verlassen haben
    SsrcsEntfernt(Vec<u32>),
    /// Anfrage nach Beschreibungen fuer unbekannte SSRCs
    TeilnehmerAnfrage { ssrcs: Vec<u32> },
}

impl SignalNachricht {
    /// Serialisiert die Nachricht als JSON-Bytes
    pub fn kodieren(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| HuddleError::UngueltigeNachricht(e.to_string()))
    }

    /// Deserialisiert eine Nachricht aus JSON-Bytes
    pub fn dekodieren(daten: &[u8]) -> Result<Self> {
        serde_json::from_slice(daten).map_err(|e| HuddleError::UngueltigeNachricht(e.to_string()))
    }

    /// Kurzname fuer Logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinPayload(_) => "join_payload",
            Self::JoinResponse { .. } => "join_response",
            Self::TeilnehmerHinzu(_) => "teilnehmer_hinzu",
            Self::SsrcsEntfernt(_) => "ssrcs_entfernt",
            Self::TeilnehmerAnfrage { .. } => "teilnehmer_anfrage",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn kandidat() -> IceKandidat {
        IceKandidat {
            component: "1".into(),
            protocol: "udp".into(),
            ip: "192.168.1.20".into(),
            port: "40001".into(),
            priority: "2130706431".into(),
            typ: "host".into(),
            generation: "0".into(),
            foundation: "1".into(),
            network: "1".into(),
        }
    }

    #[test]
    fn kandidat_zahlen_sind_dezimalstrings() {
        let json = serde_json::to_value(kandidat()).unwrap();
        assert_eq!(json["port"], "40001");
        assert_eq!(json["priority"], "2130706431");
        assert_eq!(json["type"], "host");
    }

    #[test]
    fn kandidat_felder_parsen() {
        let k = kandidat();
        assert_eq!(k.port_wert().unwrap(), 40001);
        assert_eq!(k.priority_wert().unwrap(), 2_130_706_431);
        assert_eq!(k.component_wert().unwrap(), 1);
        assert_eq!(k.adresse().unwrap(), "192.168.1.20:40001".parse::<std::net::SocketAddr>().unwrap());
    }

    #[test]
    fn kandidat_mit_ungueltigem_port() {
        let mut k = kandidat();
        k.port = "abc".into();
        match k.port_wert() {
            Err(HuddleError::UngueltigerKandidat { feld, wert }) => {
                assert_eq!(feld, "port");
                assert_eq!(wert, "abc");
            }
            other => panic!("Fehler erwartet, bekommen: {other:?}"),
        }
    }

    #[test]
    fn haupt_ssrc_bevorzugt_sim_gruppe() {
        let gruppen = vec![
            SsrcGruppe::neu(SEMANTIK_FID, vec![11, 12]),
            SsrcGruppe::neu(SEMANTIK_SIM, vec![11, 13, 15]),
        ];
        assert_eq!(haupt_video_ssrc(&gruppen), Some(11));

        let nur_fid = vec![SsrcGruppe::neu(SEMANTIK_FID, vec![21, 22])];
        assert_eq!(haupt_video_ssrc(&nur_fid), Some(21));
        assert_eq!(haupt_video_ssrc(&[]), None);
    }

    #[test]
    fn video_braucht_payload_typen_und_gruppen() {
        let mut t = TeilnehmerBeschreibung::nur_audio(1001);
        assert!(!t.hat_video());
        t.video_source_groups = vec![SsrcGruppe::neu(SEMANTIK_FID, vec![1002, 1003])];
        assert!(!t.hat_video());
        t.video_payload_types = vec![VideoPayloadTyp {
            id: 100,
            name: "VP8".into(),
            clockrate: 90000,
            ..Default::default()
        }];
        assert!(t.hat_video());
    }

    #[test]
    fn signal_nachricht_kodieren_dekodieren() {
        let nachricht = SignalNachricht::JoinResponse {
            payload: JoinResponsePayload {
                ufrag: "u".into(),
                pwd: "p".into(),
                candidates: vec![kandidat()],
            },
            teilnehmer: vec![TeilnehmerBeschreibung::nur_audio(1001)],
        };
        let bytes = nachricht.kodieren().unwrap();
        assert_eq!(SignalNachricht::dekodieren(&bytes).unwrap(), nachricht);
        assert_eq!(nachricht.name(), "join_response");
    }

    #[test]
    fn beschreibung_ohne_video_felder_dekodierbar() {
        let json = br#"{"typ":"teilnehmer_hinzu","daten":[{"audio_ssrc":7}]}"#;
        let nachricht = SignalNachricht::dekodieren(json).unwrap();
        assert_eq!(
            nachricht,
            SignalNachricht::TeilnehmerHinzu(vec![TeilnehmerBeschreibung::nur_audio(7)])
        );
    }

    #[test]
    fn kaputtes_json_ist_ungueltige_nachricht() {
        assert!(matches!(
            SignalNachricht::dekodieren(b"{nicht json"),
            Err(HuddleError::UngueltigeNachricht(_))
        ));
    }
}
