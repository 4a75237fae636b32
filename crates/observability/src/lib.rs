//! # huddle-observability
//!
//! Observability-Crate fuer Huddle:
//! - Prometheus-kompatible Metriken der Session (`/metrics`)
//! - Structured Logging (Text oder JSON) via tracing-subscriber

pub mod logging;
pub mod metrics;

pub use logging::logging_initialisieren;
pub use metrics::{metrics_router, HuddleMetrics, KcpMesswerte, SessionMesswerte};

use anyhow::Result;
use std::net::SocketAddr;

/// Startet den Observability-HTTP-Server
///
/// Endpunkte:
/// - `GET /metrics` – Prometheus scrape format
pub async fn observability_server_starten(bind_addr: SocketAddr, metriken: HuddleMetrics) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Observability-Server gestartet");

    axum::serve(listener, metrics_router(metriken)).await?;
    Ok(())
}
