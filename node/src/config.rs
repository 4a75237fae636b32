//! Knoten-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Knoten ohne Konfigurationsdatei
//! lauffaehig ist.

use std::net::SocketAddr;

use anyhow::Context;
use huddle_signaling::KcpKonfig;
use huddle_voice::SessionConfig;
use serde::{Deserialize, Serialize};

/// Vollstaendige Knoten-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Parameter der Group-Session
    pub session: SessionConfig,
    /// Verhalten im Call
    pub anruf: AnrufEinstellungen,
    /// Sockets und Gegenstelle
    pub netzwerk: NetzwerkEinstellungen,
    /// KCP-Parameter der Signalisierung
    pub signaling: KcpKonfig,
    pub logging: LoggingEinstellungen,
    pub observability: ObservabilityEinstellungen,
}

/// Verhalten im Call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnrufEinstellungen {
    /// Mit stummem Mikrofon beitreten
    pub stumm: bool,
}

impl Default for AnrufEinstellungen {
    fn default() -> Self {
        Self { stumm: true }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer beide UDP-Sockets
    pub bind_adresse: String,
    /// Port fuer RTP/RTCP
    pub medien_port: u16,
    /// Port fuer die KCP-Signalisierung
    pub signal_port: u16,
    /// Adresse die der Gegenstelle als Medien-Kandidat genannt wird
    /// (leer = lokale Adresse, `0.0.0.0` wird zu `127.0.0.1`)
    pub oeffentliche_adresse: Option<String>,
    /// Signalisierungsadresse der Gegenstelle; ohne Angabe gilt der
    /// Absender des ersten empfangenen Datagramms
    pub gegenstelle_signal: Option<String>,
    /// Feste Medienadresse der Gegenstelle (sonst aus der Join-Response)
    pub gegenstelle_medien: Option<String>,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            medien_port: 5004,
            signal_port: 5005,
            oeffentliche_adresse: None,
            gegenstelle_signal: None,
            gegenstelle_medien: None,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den `/metrics`-Endpunkt
    pub aktiviert: bool,
    pub port: u16,
    /// Abstand der Metrik-Aktualisierung
    pub intervall_ms: u64,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
            intervall_ms: 1000,
        }
    }
}

fn adresse(text: &str) -> anyhow::Result<SocketAddr> {
    text.parse()
        .with_context(|| format!("Ungueltige Socket-Adresse '{text}'"))
}

impl NodeConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    pub fn medien_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        adresse(&format!(
            "{}:{}",
            self.netzwerk.bind_adresse, self.netzwerk.medien_port
        ))
    }

    pub fn signal_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        adresse(&format!(
            "{}:{}",
            self.netzwerk.bind_adresse, self.netzwerk.signal_port
        ))
    }

    pub fn observability_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        adresse(&format!(
            "{}:{}",
            self.netzwerk.bind_adresse, self.observability.port
        ))
    }

    pub fn gegenstelle_signal(&self) -> anyhow::Result<Option<SocketAddr>> {
        self.netzwerk
            .gegenstelle_signal
            .as_deref()
            .map(adresse)
            .transpose()
    }

    pub fn gegenstelle_medien(&self) -> anyhow::Result<Option<SocketAddr>> {
        self.netzwerk
            .gegenstelle_medien
            .as_deref()
            .map(adresse)
            .transpose()
    }
}
