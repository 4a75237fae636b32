//! Prometheus-kompatible Metriken fuer Huddle
//!
//! Registrierte Metriken:
//! - `huddle_teilnehmer` – Gauge: Teilnehmer mit Audio-Kanal
//! - `huddle_video_kanaele` – Gauge: Teilnehmer mit Video-Kanal
//! - `huddle_verbunden` – Gauge: 1 wenn der Transport verbunden ist
//! - `huddle_gepufferte_pakete` – Gauge: Pakete unbekannter SSRCs im Puffer
//! - `huddle_ausstehende_unbekannte_ssrcs` – Gauge: gesammelte, noch nicht gemeldete SSRCs
//! - `huddle_verdraengte_pakete_total` – Counter: wegen voller Kapazitaet verworfene Pakete
//! - `huddle_unbekannte_meldungen_total` – Counter: Nachfragen nach Teilnehmerbeschreibungen
//! - `huddle_ungueltige_pakete_total` – Counter: Pakete mit unlesbarem Header
//! - `huddle_zugestellte_pakete_total` – Counter: an Kanaele zugestellte RTP-Pakete
//! - `huddle_kcp_retransmissionen_total` – Counter: KCP-Wiederholungen
//! - `huddle_kcp_srtt_ms` – Gauge: geglaettete RTT der Signalisierung
//!
//! Die Session liefert kumulierte Zaehlerstaende; Counter werden um die
//! Differenz zum letzten Stand erhoeht.

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Snapshot der Session-Werte fuer den Export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionMesswerte {
    pub teilnehmer: usize,
    pub video_kanaele: usize,
    pub verbunden: bool,
    pub gepufferte_pakete: usize,
    pub ausstehende_unbekannte: usize,
    pub verdraengte_pakete: u64,
    pub unbekannte_meldungen: u64,
    pub ungueltige_pakete: u64,
    pub zugestellte_pakete: u64,
}

/// Snapshot der Signalisierungsverbindung
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KcpMesswerte {
    pub retransmissionen: u64,
    pub srtt_ms: u32,
}

/// Alle Huddle-Prometheus-Metriken
#[derive(Clone)]
pub struct HuddleMetrics {
    pub registry: Arc<Registry>,

    // Session
    pub teilnehmer: IntGauge,
    pub video_kanaele: IntGauge,
    pub verbunden: IntGauge,
    pub gepufferte_pakete: IntGauge,
    pub ausstehende_unbekannte: IntGauge,
    pub verdraengte_pakete_total: IntCounter,
    pub unbekannte_meldungen_total: IntCounter,
    pub ungueltige_pakete_total: IntCounter,
    pub zugestellte_pakete_total: IntCounter,

    // Signalisierung
    pub kcp_retransmissionen_total: IntCounter,
    pub kcp_srtt_ms: IntGauge,
}

fn gauge(registry: &Registry, name: &str, hilfe: &str) -> Result<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn zaehler(registry: &Registry, name: &str, hilfe: &str) -> Result<IntCounter> {
    let zaehler = IntCounter::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(zaehler.clone()))?;
    Ok(zaehler)
}

/// Counter auf einen kumulierten Stand nachziehen (nie rueckwaerts)
fn nachziehen(zaehler: &IntCounter, stand: u64) {
    let bisher = zaehler.get();
    if stand > bisher {
        zaehler.inc_by(stand - bisher);
    }
}

impl HuddleMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        // --- Session ---
        let teilnehmer = gauge(&registry, "huddle_teilnehmer", "Teilnehmer mit Audio-Kanal")?;
        let video_kanaele = gauge(&registry, "huddle_video_kanaele", "Teilnehmer mit Video-Kanal")?;
        let verbunden = gauge(&registry, "huddle_verbunden", "1 wenn der Transport verbunden ist")?;
        let gepufferte_pakete = gauge(
            &registry,
            "huddle_gepufferte_pakete",
            "Pakete unbekannter SSRCs im Puffer",
        )?;
        let ausstehende_unbekannte = gauge(
            &registry,
            "huddle_ausstehende_unbekannte_ssrcs",
            "Gesammelte, noch nicht gemeldete unbekannte SSRCs",
        )?;
        let verdraengte_pakete_total = zaehler(
            &registry,
            "huddle_verdraengte_pakete_total",
            "Wegen voller Kapazitaet verworfene Pakete",
        )?;
        let unbekannte_meldungen_total = zaehler(
            &registry,
            "huddle_unbekannte_meldungen_total",
            "Nachfragen nach Teilnehmerbeschreibungen",
        )?;
        let ungueltige_pakete_total = zaehler(
            &registry,
            "huddle_ungueltige_pakete_total",
            "Pakete mit unlesbarem Header",
        )?;
        let zugestellte_pakete_total = zaehler(
            &registry,
            "huddle_zugestellte_pakete_total",
            "An Kanaele zugestellte RTP-Pakete",
        )?;

        // --- Signalisierung ---
        let kcp_retransmissionen_total = zaehler(
            &registry,
            "huddle_kcp_retransmissionen_total",
            "Wiederholte KCP-Segmente",
        )?;
        let kcp_srtt_ms = gauge(
            &registry,
            "huddle_kcp_srtt_ms",
            "Geglaettete RTT der Signalisierung in Millisekunden",
        )?;

        Ok(Self {
            registry: Arc::new(registry),
            teilnehmer,
            video_kanaele,
            verbunden,
            gepufferte_pakete,
            ausstehende_unbekannte,
            verdraengte_pakete_total,
            unbekannte_meldungen_total,
            ungueltige_pakete_total,
            zugestellte_pakete_total,
            kcp_retransmissionen_total,
            kcp_srtt_ms,
        })
    }

    /// Uebernimmt einen Session-Snapshot
    pub fn session_aktualisieren(&self, werte: &SessionMesswerte) {
        self.teilnehmer.set(werte.teilnehmer as i64);
        self.video_kanaele.set(werte.video_kanaele as i64);
        self.verbunden.set(i64::from(werte.verbunden));
        self.gepufferte_pakete.set(werte.gepufferte_pakete as i64);
        self.ausstehende_unbekannte
            .set(werte.ausstehende_unbekannte as i64);
        nachziehen(&self.verdraengte_pakete_total, werte.verdraengte_pakete);
        nachziehen(&self.unbekannte_meldungen_total, werte.unbekannte_meldungen);
        nachziehen(&self.ungueltige_pakete_total, werte.ungueltige_pakete);
        nachziehen(&self.zugestellte_pakete_total, werte.zugestellte_pakete);
    }

    pub fn kcp_aktualisieren(&self, werte: &KcpMesswerte) {
        nachziehen(&self.kcp_retransmissionen_total, werte.retransmissionen);
        self.kcp_srtt_ms.set(i64::from(werte.srtt_ms));
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: HuddleMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<HuddleMetrics>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = HuddleMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn session_snapshot_wird_uebernommen() {
        let metriken = HuddleMetrics::neu().unwrap();
        metriken.session_aktualisieren(&SessionMesswerte {
            teilnehmer: 3,
            verbunden: true,
            verdraengte_pakete: 5,
            ausstehende_unbekannte: 2,
            ..Default::default()
        });
        assert_eq!(metriken.teilnehmer.get(), 3);
        assert_eq!(metriken.verbunden.get(), 1);
        assert_eq!(metriken.verdraengte_pakete_total.get(), 5);
        assert_eq!(metriken.ausstehende_unbekannte.get(), 2);
    }

    #[test]
    fn counter_laufen_nie_rueckwaerts() {
        let metriken = HuddleMetrics::neu().unwrap();
        metriken.kcp_aktualisieren(&KcpMesswerte {
            retransmissionen: 10,
            srtt_ms: 40,
        });
        metriken.kcp_aktualisieren(&KcpMesswerte {
            retransmissionen: 4,
            srtt_ms: 35,
        });
        assert_eq!(metriken.kcp_retransmissionen_total.get(), 10);
        assert_eq!(metriken.kcp_srtt_ms.get(), 35);
    }

    #[test]
    fn export_enthaelt_huddle_metriken() {
        let metriken = HuddleMetrics::neu().unwrap();
        let text = metriken.exportieren().unwrap();
        assert!(text.contains("huddle_teilnehmer"));
        assert!(text.contains("huddle_kcp_retransmissionen_total"));
    }

    #[tokio::test]
    async fn metrics_endpunkt_antwortet() {
        let metriken = HuddleMetrics::neu().unwrap();
        metriken.teilnehmer.set(2);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, metrics_router(metriken)).await;
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut antwort = String::new();
        stream.read_to_string(&mut antwort).await.unwrap();
        assert!(antwort.starts_with("HTTP/1.1 200"));
        assert!(antwort.contains("huddle_teilnehmer 2"));
    }
}
