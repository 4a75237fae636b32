//! Huddle Node – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Knoten.

use anyhow::Result;
use huddle_node::{config::NodeConfig, Node};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("HUDDLE_CONFIG").unwrap_or_else(|_| "huddle.toml".into());

    let config = NodeConfig::laden(&config_pfad)?;

    huddle_observability::logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Huddle Node wird initialisiert"
    );

    let node = Node::binden(config).await?;
    let statistik = node
        .ausfuehren(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(fehler = %e, "Shutdown-Signal nicht verfuegbar");
            }
        })
        .await?;

    tracing::info!(
        teilnehmer = statistik.teilnehmer,
        zugestellt = statistik.router.zugestellt,
        "Huddle Node beendet"
    );
    Ok(())
}
