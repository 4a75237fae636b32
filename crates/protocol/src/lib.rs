//! huddle-protocol – Protokoll-Definitionen
//!
//! - [`rtp`] – RTP/RTCP-Header-Klassifizierung (RFC 3550)
//! - [`control`] – Join-Payloads, ICE-Kandidaten und Steuernachrichten (JSON)
//! - [`codec`] – Payload-Typ-Zuweisung und RTP-Erweiterungen

pub mod codec;
pub mod control;
pub mod rtp;

pub use control::{
    IceKandidat, IceParameter, JoinPayload, JoinResponsePayload, SignalNachricht, SsrcGruppe,
    TeilnehmerBeschreibung, VideoPayloadTyp,
};
pub use rtp::{PaketKlasse, RtpHeader};
