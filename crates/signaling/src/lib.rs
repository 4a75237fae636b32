//! huddle-signaling – Zuverlaessige Signalisierung
//!
//! Steuernachrichten (Join-Payloads, Teilnehmer-Aenderungen) muessen denselben
//! Paketverlust ueberstehen wie Medien, duerfen aber nie verloren gehen.
//! Sie laufen deshalb ueber ein KCP-kompatibles ARQ-Protokoll.
//!
//! - [`kcp`] – Protokoll-Engine (Fenster, Quittungen, RTO, Staukontrolle)
//! - [`verbindung`] – tokio-Task der die Engine im 10-ms-Takt treibt

pub mod error;
pub mod kcp;
pub mod verbindung;

pub use error::{KcpFehler, KcpResult};
pub use kcp::{Kcp, KcpKonfig};
pub use verbindung::{KcpStatistik, SignalVerbindung};
