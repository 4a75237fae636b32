//! RTP/RTCP-Klassifizierung (RFC 3550, RFC 5761)
//!
//! Medien und Steuerpakete teilen sich denselben Transport (RTCP-Mux).
//! Die Unterscheidung erfolgt ueber das zweite Byte: liegt der Payload-Typ
//! (ohne Marker-Bit) im Bereich 64–95, handelt es sich um RTCP
//! (Pakettypen 192–223).
//!
//! ## RTP-Header (mindestens 12 Bytes, big-endian)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   V(2) P(1) X(1) CC(4)
//!  1       1   M(1) PT(7)
//!  2       2   Sequenznummer
//!  4       4   Zeitstempel
//!  8       4   SSRC
//! 12    4*CC   CSRC-Liste
//!  ..      4   Erweiterungs-Header (falls X), danach 4*Laenge Bytes
//! ```

use huddle_core::{HuddleError, Result};

/// Einzige gueltige RTP-Version
pub const RTP_VERSION: u8 = 2;

/// Minimale Laenge eines RTP-Headers ohne CSRCs
pub const RTP_HEADER_MIN: usize = 12;

/// Minimale Laenge eines RTCP-Pakets (Header + Sender-SSRC)
pub const RTCP_HEADER_MIN: usize = 8;

// ---------------------------------------------------------------------------
// Klassifizierung
// ---------------------------------------------------------------------------

/// Ergebnis der Header-Analyse eines eingehenden Pakets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaketKlasse {
    /// Steuerpaket, immer zustellbar
    Rtcp,
    /// Medienpaket mit geparstem Header
    Rtp(RtpHeader),
}

/// Klassifiziert ein Paket als RTP oder RTCP und validiert den Header
///
/// # Fehler
/// `UngueltigesPaket` bei zu kurzen Paketen, falscher Version oder
/// inkonsistenten Laengenangaben (CSRC, Erweiterung, Padding).
pub fn klassifizieren(daten: &[u8]) -> Result<PaketKlasse> {
    if daten.len() < 2 {
        return Err(ungueltig(format!("Paket zu kurz: {} Bytes", daten.len())));
    }
    if ist_rtcp(daten) {
        if daten.len() < RTCP_HEADER_MIN {
            return Err(ungueltig(format!(
                "RTCP-Paket zu kurz: {} Bytes (erwartet {})",
                daten.len(),
                RTCP_HEADER_MIN
            )));
        }
        let version = daten[0] >> 6;
        if version != RTP_VERSION {
            return Err(ungueltig(format!("Ungueltige RTCP-Version: {version}")));
        }
        return Ok(PaketKlasse::Rtcp);
    }
    RtpHeader::parsen(daten).map(PaketKlasse::Rtp)
}

/// Prueft anhand des Pakettyps ob es sich um RTCP handelt (RFC 5761 §4)
pub fn ist_rtcp(daten: &[u8]) -> bool {
    daten.len() >= 2 && (64..96).contains(&(daten[1] & 0x7F))
}

fn ungueltig(msg: String) -> HuddleError {
    HuddleError::UngueltigesPaket(msg)
}

// ---------------------------------------------------------------------------
// RtpHeader
// ---------------------------------------------------------------------------

/// Geparster RTP-Fixed-Header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_typ: u8,
    pub sequenz: u16,
    pub zeitstempel: u32,
    pub ssrc: u32,
    /// Anzahl CSRC-Eintraege
    pub csrc_anzahl: u8,
    /// Laenge inklusive CSRCs und Erweiterung (= Offset der Nutzdaten)
    pub header_laenge: usize,
    /// Anzahl Padding-Bytes am Paketende
    pub padding: usize,
}

impl RtpHeader {
    /// Parst und validiert einen RTP-Header
    pub fn parsen(daten: &[u8]) -> Result<Self> {
        if daten.len() < RTP_HEADER_MIN {
            return Err(ungueltig(format!(
                "RTP-Header zu kurz: {} Bytes (erwartet {})",
                daten.len(),
                RTP_HEADER_MIN
            )));
        }

        let version = daten[0] >> 6;
        if version != RTP_VERSION {
            return Err(ungueltig(format!("Ungueltige RTP-Version: {version}")));
        }
        let hat_padding = daten[0] & 0x20 != 0;
        let hat_erweiterung = daten[0] & 0x10 != 0;
        let csrc_anzahl = daten[0] & 0x0F;

        let mut header_laenge = RTP_HEADER_MIN + 4 * csrc_anzahl as usize;
        if daten.len() < header_laenge {
            return Err(ungueltig(format!(
                "CSRC-Liste abgeschnitten: {} Bytes (erwartet {})",
                daten.len(),
                header_laenge
            )));
        }

        if hat_erweiterung {
            if daten.len() < header_laenge + 4 {
                return Err(ungueltig("Erweiterungs-Header abgeschnitten".into()));
            }
            let woerter =
                u16::from_be_bytes([daten[header_laenge + 2], daten[header_laenge + 3]]) as usize;
            header_laenge += 4 + 4 * woerter;
            if daten.len() < header_laenge {
                return Err(ungueltig(format!(
                    "Erweiterung abgeschnitten: {} Bytes (erwartet {})",
                    daten.len(),
                    header_laenge
                )));
            }
        }

        let padding = if hat_padding {
            let anzahl = daten[daten.len() - 1] as usize;
            if anzahl == 0 || header_laenge + anzahl > daten.len() {
                return Err(ungueltig(format!("Ungueltiges Padding: {anzahl} Bytes")));
            }
            anzahl
        } else {
            0
        };

        Ok(Self {
            marker: daten[1] & 0x80 != 0,
            payload_typ: daten[1] & 0x7F,
            sequenz: u16::from_be_bytes([daten[2], daten[3]]),
            zeitstempel: u32::from_be_bytes([daten[4], daten[5], daten[6], daten[7]]),
            ssrc: u32::from_be_bytes([daten[8], daten[9], daten[10], daten[11]]),
            csrc_anzahl,
            header_laenge,
            padding,
        })
    }

    /// Nutzdaten-Bereich eines bereits geparsten Pakets
    pub fn nutzdaten<'a>(&self, daten: &'a [u8]) -> &'a [u8] {
        &daten[self.header_laenge..daten.len() - self.padding]
    }
}

/// Baut ein minimales RTP-Paket (ohne CSRC/Erweiterung/Padding)
pub fn rtp_paket_bauen(
    payload_typ: u8,
    sequenz: u16,
    zeitstempel: u32,
    ssrc: u32,
    nutzdaten: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RTP_HEADER_MIN + nutzdaten.len());
    buf.push(RTP_VERSION << 6);
    buf.push(payload_typ & 0x7F);
    buf.extend_from_slice(&sequenz.to_be_bytes());
    buf.extend_from_slice(&zeitstempel.to_be_bytes());
    buf.extend_from_slice(&ssrc.to_be_bytes());
    buf.extend_from_slice(nutzdaten);
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Receiver Report ohne Report-Bloecke (PT 201)
    fn receiver_report(ssrc: u32) -> Vec<u8> {
        let mut buf = vec![0x80, 201, 0x00, 0x01];
        buf.extend_from_slice(&ssrc.to_be_bytes());
        buf
    }

    #[test]
    fn rtp_header_wird_geparst() {
        let paket = rtp_paket_bauen(111, 4711, 96_000, 1001, &[1, 2, 3]);
        let PaketKlasse::Rtp(header) = klassifizieren(&paket).unwrap() else {
            panic!("RTP erwartet");
        };
        assert_eq!(header.payload_typ, 111);
        assert_eq!(header.sequenz, 4711);
        assert_eq!(header.zeitstempel, 96_000);
        assert_eq!(header.ssrc, 1001);
        assert_eq!(header.header_laenge, RTP_HEADER_MIN);
        assert_eq!(header.nutzdaten(&paket), &[1, 2, 3]);
    }

    #[test]
    fn rtcp_wird_erkannt() {
        assert_eq!(
            klassifizieren(&receiver_report(5)).unwrap(),
            PaketKlasse::Rtcp
        );
    }

    #[test]
    fn video_payload_typ_100_ist_kein_rtcp() {
        let paket = rtp_paket_bauen(100, 1, 0, 2002, &[]);
        assert!(!ist_rtcp(&paket));
        // Marker-Bit gesetzt: 0x80 | 100 = 228, weiterhin RTP
        let mut mit_marker = paket.clone();
        mit_marker[1] |= 0x80;
        assert!(!ist_rtcp(&mit_marker));
    }

    #[test]
    fn zu_kurzes_paket_ist_ungueltig() {
        let paket = rtp_paket_bauen(111, 1, 0, 1001, &[]);
        assert!(matches!(
            klassifizieren(&paket[..8]),
            Err(HuddleError::UngueltigesPaket(_))
        ));
        assert!(klassifizieren(&[0x80]).is_err());
    }

    #[test]
    fn falsche_version_ist_ungueltig() {
        let mut paket = rtp_paket_bauen(111, 1, 0, 1001, &[]);
        paket[0] = 0x40;
        assert!(klassifizieren(&paket).is_err());
    }

    #[test]
    fn csrc_und_erweiterung_verschieben_nutzdaten() {
        let mut paket = rtp_paket_bauen(111, 1, 0, 1001, &[]);
        // CC = 1, X = 1
        paket[0] |= 0x10 | 0x01;
        paket.extend_from_slice(&7u32.to_be_bytes());
        paket.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01]);
        paket.extend_from_slice(&[0x10, 0xAA, 0x00, 0x00]);
        paket.push(0x42);

        let header = RtpHeader::parsen(&paket).unwrap();
        assert_eq!(header.csrc_anzahl, 1);
        assert_eq!(header.header_laenge, 12 + 4 + 4 + 4);
        assert_eq!(header.nutzdaten(&paket), &[0x42]);
    }

    #[test]
    fn abgeschnittene_erweiterung_ist_ungueltig() {
        let mut paket = rtp_paket_bauen(111, 1, 0, 1001, &[]);
        paket[0] |= 0x10;
        paket.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x04]);
        assert!(RtpHeader::parsen(&paket).is_err());
    }

    #[test]
    fn padding_wird_abgezogen() {
        let mut paket = rtp_paket_bauen(111, 1, 0, 1001, &[9, 9]);
        paket[0] |= 0x20;
        paket.extend_from_slice(&[0, 0, 3]);
        let header = RtpHeader::parsen(&paket).unwrap();
        assert_eq!(header.padding, 3);
        assert_eq!(header.nutzdaten(&paket), &[9, 9]);
    }

    #[test]
    fn padding_laenger_als_paket_ist_ungueltig() {
        let mut paket = rtp_paket_bauen(111, 1, 0, 1001, &[]);
        paket[0] |= 0x20;
        paket.push(200);
        assert!(RtpHeader::parsen(&paket).is_err());
    }
}
