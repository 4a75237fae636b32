//! huddle-voice – Group-Session-Engine
//!
//! Verwaltet die Medienseite eines Mehrparteien-Calls: welche SSRC gehoert
//! zu welchem Teilnehmer, wohin geht ein eingehendes Paket, welche Kanaele
//! existieren und was die Media-Engine senden darf.
//!
//! ## Module
//! - [`call`] – `GroupCall`, Handle der Aufrufseite
//! - [`engine`] – `GroupSession`, Zustand des Media-Kontexts
//! - [`context`] – Nachrichten und schwache Post-Handles der Kontexte
//! - [`router`] – SSRC-Router und Buendelung unbekannter SSRCs
//! - [`state`] – SSRC-Tabelle
//! - [`packet_buffer`] – Puffer fuer Pakete unbekannter SSRCs
//! - [`channel`] – eingehende Audio- und Video-Kanaele
//! - [`policy`] – Verbindungs- und Bitrate-Politik
//! - [`telemetry`] – Pegel-Telemetrie
//! - [`media`] – Schnittstelle zur Media-Engine
//! - [`network`] – Schnittstelle zum Transport, Netzwerk-Kontext
//! - [`udp`] – UDP-Transport fuer genau eine Gegenstelle
//! - [`config`] – Session-Konfiguration

pub mod call;
pub mod channel;
pub mod config;
pub mod context;
pub mod engine;
pub mod media;
pub mod network;
pub mod packet_buffer;
pub mod policy;
pub mod router;
pub mod state;
pub mod telemetry;
pub mod udp;

pub use call::GroupCall;
pub use config::SessionConfig;
pub use engine::{GroupSession, SessionStatistik};
pub use media::{MedienEngine, VideoFrame, VideoQuelle, VideoSenke};
pub use network::{NetzwerkManager, NetzwerkRueckmeldung};
pub use policy::BitrateProfil;
pub use udp::UdpNetzwerkManager;
