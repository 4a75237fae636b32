//! KCP-Protokoll-Engine
//!
//! Schiebefenster-ARQ ueber unzuverlaessige Datagramme, kompatibel zum
//! KCP-Segmentformat. Die Engine macht selbst kein I/O: ausgehende
//! Datagramme werden gesammelt und per [`Kcp::ausgang_leeren`] abgeholt,
//! eingehende per [`Kcp::eingabe`] eingespeist. Die Uhr (Millisekunden)
//! kommt von aussen ueber [`Kcp::update`].
//!
//! ## Segment-Header (24 Bytes, little-endian)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       4   conv  – Konversations-ID
//!  4       1   cmd   – PUSH(81) ACK(82) WASK(83) WINS(84)
//!  5       1   frg   – verbleibende Fragmente der Nachricht
//!  6       2   wnd   – freies Empfangsfenster des Senders
//!  8       4   ts    – Zeitstempel
//! 12       4   sn    – Sequenznummer
//! 16       4   una   – naechste erwartete Sequenznummer des Senders
//! 20       4   len   – Nutzdaten-Laenge
//! ```

use std::collections::VecDeque;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{KcpFehler, KcpResult};

pub const KOMMANDO_PUSH: u8 = 81;
pub const KOMMANDO_ACK: u8 = 82;
pub const KOMMANDO_WASK: u8 = 83;
pub const KOMMANDO_WINS: u8 = 84;

pub const HEADER_LAENGE: usize = 24;

const RTO_MIN_NODELAY: u32 = 30;
const RTO_MIN: u32 = 100;
const RTO_START: u32 = 200;
const RTO_MAX: u32 = 60_000;
const SSTHRESH_START: u32 = 2;
const SSTHRESH_MIN: u32 = 2;
const SONDE_START_MS: u32 = 7_000;
const SONDE_LIMIT_MS: u32 = 120_000;
const FAST_RESEND_LIMIT: u32 = 5;

const FRAGE_FENSTER: u32 = 1;
const MELDE_FENSTER: u32 = 2;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Parameter einer KCP-Verbindung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KcpKonfig {
    /// Konversations-ID (muss auf beiden Seiten gleich sein)
    pub konversation: u32,
    /// Sendefenster in Segmenten
    pub sende_fenster: u16,
    /// Empfangsfenster in Segmenten
    pub empfangs_fenster: u16,
    /// Maximale Datagramm-Groesse
    pub mtu: usize,
    /// Takt von `update` in Millisekunden
    pub intervall_ms: u32,
    /// Aggressiver RTO (kein Minimum von 100 ms, lineares Backoff)
    pub nodelay: bool,
    /// Fast-Resend nach so vielen uebersprungenen ACKs (0 = aus)
    pub fast_resend: u32,
    /// Staukontrolle abschalten
    pub ohne_staukontrolle: bool,
    /// Nach so vielen Sendeversuchen gilt die Verbindung als tot
    pub tot_nach_versuchen: u32,
}

impl Default for KcpKonfig {
    fn default() -> Self {
        Self {
            konversation: 0,
            sende_fenster: 128,
            empfangs_fenster: 128,
            mtu: 1400,
            intervall_ms: 10,
            nodelay: false,
            fast_resend: 0,
            ohne_staukontrolle: false,
            tot_nach_versuchen: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Segment {
    conv: u32,
    cmd: u8,
    frg: u8,
    wnd: u16,
    ts: u32,
    sn: u32,
    una: u32,
    resendts: u32,
    rto: u32,
    fastack: u32,
    xmit: u32,
    daten: Vec<u8>,
}

impl Segment {
    fn kodieren(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.conv.to_le_bytes());
        buf.push(self.cmd);
        buf.push(self.frg);
        buf.extend_from_slice(&self.wnd.to_le_bytes());
        buf.extend_from_slice(&self.ts.to_le_bytes());
        buf.extend_from_slice(&self.sn.to_le_bytes());
        buf.extend_from_slice(&self.una.to_le_bytes());
        buf.extend_from_slice(&(self.daten.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.daten);
    }
}

fn u32_le(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// Vorzeichenbehaftete Differenz zweier umlaufender Zaehler
fn diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

// ---------------------------------------------------------------------------
// Kcp
// ---------------------------------------------------------------------------

/// Zustand einer KCP-Verbindung
pub struct Kcp {
    conv: u32,
    mtu: usize,
    mss: usize,
    tot: bool,

    snd_una: u32,
    snd_nxt: u32,
    rcv_nxt: u32,

    ssthresh: u32,
    rx_rttval: u32,
    rx_srtt: u32,
    rx_rto: u32,
    rx_minrto: u32,

    snd_wnd: u32,
    rcv_wnd: u32,
    rmt_wnd: u32,
    cwnd: u32,
    incr: u32,
    sonde: u32,
    ts_sonde: u32,
    sonde_warten: u32,

    current: u32,
    interval: u32,
    ts_flush: u32,
    aktualisiert: bool,

    nodelay: bool,
    fastresend: u32,
    nocwnd: bool,
    dead_link: u32,

    snd_queue: VecDeque<Segment>,
    snd_buf: VecDeque<Segment>,
    rcv_queue: VecDeque<Segment>,
    rcv_buf: VecDeque<Segment>,
    ack_liste: Vec<(u32, u32)>,

    ausgang: Vec<Bytes>,
    retransmissionen: u64,
}

impl Kcp {
    pub fn neu(konfig: &KcpKonfig) -> Self {
        let mtu = konfig.mtu.max(HEADER_LAENGE + 1);
        Self {
            conv: konfig.konversation,
            mtu,
            mss: mtu - HEADER_LAENGE,
            tot: false,
            snd_una: 0,
            snd_nxt: 0,
            rcv_nxt: 0,
            ssthresh: SSTHRESH_START,
            rx_rttval: 0,
            rx_srtt: 0,
            rx_rto: RTO_START,
            rx_minrto: if konfig.nodelay { RTO_MIN_NODELAY } else { RTO_MIN },
            snd_wnd: konfig.sende_fenster.max(1) as u32,
            rcv_wnd: konfig.empfangs_fenster.max(1) as u32,
            rmt_wnd: konfig.empfangs_fenster.max(1) as u32,
            cwnd: 0,
            incr: 0,
            sonde: 0,
            ts_sonde: 0,
            sonde_warten: 0,
            current: 0,
            interval: konfig.intervall_ms.clamp(10, 5000),
            ts_flush: 0,
            aktualisiert: false,
            nodelay: konfig.nodelay,
            fastresend: konfig.fast_resend,
            nocwnd: konfig.ohne_staukontrolle,
            dead_link: konfig.tot_nach_versuchen,
            snd_queue: VecDeque::new(),
            snd_buf: VecDeque::new(),
            rcv_queue: VecDeque::new(),
            rcv_buf: VecDeque::new(),
            ack_liste: Vec::new(),
            ausgang: Vec::new(),
            retransmissionen: 0,
        }
    }

    // --- Anwendungsseite ---

    /// Reiht eine Nachricht zum Senden ein (fragmentiert nach MSS)
    ///
    /// Es wird nichts uebertragen; das passiert beim naechsten `update`.
    pub fn senden(&mut self, daten: &[u8]) -> KcpResult<()> {
        let anzahl = if daten.len() <= self.mss {
            1
        } else {
            daten.len().div_ceil(self.mss)
        };
        if anzahl >= self.rcv_wnd as usize || anzahl > u8::MAX as usize {
            return Err(KcpFehler::NachrichtZuGross {
                fragmente: anzahl,
                maximum: (self.rcv_wnd as usize - 1).min(u8::MAX as usize),
            });
        }

        let mut rest = daten;
        for i in 0..anzahl {
            let laenge = rest.len().min(self.mss);
            let (stueck, danach) = rest.split_at(laenge);
            self.snd_queue.push_back(Segment {
                frg: (anzahl - i - 1) as u8,
                daten: stueck.to_vec(),
                ..Default::default()
            });
            rest = danach;
        }
        Ok(())
    }

    /// Holt die naechste vollstaendige Nachricht in Sende-Reihenfolge
    pub fn empfangen(&mut self) -> Option<Vec<u8>> {
        let groesse = self.naechste_groesse()?;
        let war_voll = self.rcv_queue.len() >= self.rcv_wnd as usize;

        let mut nachricht = Vec::with_capacity(groesse);
        while let Some(seg) = self.rcv_queue.pop_front() {
            nachricht.extend_from_slice(&seg.daten);
            if seg.frg == 0 {
                break;
            }
        }

        self.empfangspuffer_uebernehmen();

        // Fenster wieder offen: Gegenseite aktiv informieren
        if war_voll && self.rcv_queue.len() < self.rcv_wnd as usize {
            self.sonde |= MELDE_FENSTER;
        }
        Some(nachricht)
    }

    fn naechste_groesse(&self) -> Option<usize> {
        let erstes = self.rcv_queue.front()?;
        if erstes.frg == 0 {
            return Some(erstes.daten.len());
        }
        if self.rcv_queue.len() < erstes.frg as usize + 1 {
            return None;
        }
        let mut groesse = 0;
        for seg in &self.rcv_queue {
            groesse += seg.daten.len();
            if seg.frg == 0 {
                break;
            }
        }
        Some(groesse)
    }

    // --- Transportseite ---

    /// Verarbeitet ein eingehendes Datagramm (ein oder mehrere Segmente)
    ///
    /// Aktualisiert Quittungs- und Fensterzustand, liefert aber nichts aus.
    pub fn eingabe(&mut self, mut daten: &[u8]) -> KcpResult<()> {
        if daten.len() < HEADER_LAENGE {
            return Err(KcpFehler::DatagrammZuKurz(daten.len()));
        }

        let vorher_una = self.snd_una;
        let mut max_ack: Option<u32> = None;

        while daten.len() >= HEADER_LAENGE {
            let conv = u32_le(&daten[0..4]);
            if conv != self.conv {
                return Err(KcpFehler::FalscheKonversation {
                    erwartet: self.conv,
                    bekommen: conv,
                });
            }
            let cmd = daten[4];
            let frg = daten[5];
            let wnd = u16::from_le_bytes([daten[6], daten[7]]);
            let ts = u32_le(&daten[8..12]);
            let sn = u32_le(&daten[12..16]);
            let una = u32_le(&daten[16..20]);
            let len = u32_le(&daten[20..24]) as usize;
            daten = &daten[HEADER_LAENGE..];

            if daten.len() < len {
                return Err(KcpFehler::Abgeschnitten {
                    erwartet: len,
                    vorhanden: daten.len(),
                });
            }
            if !(KOMMANDO_PUSH..=KOMMANDO_WINS).contains(&cmd) {
                return Err(KcpFehler::UnbekanntesKommando(cmd));
            }

            self.rmt_wnd = wnd as u32;
            self.una_verarbeiten(una);
            self.sendepuffer_kuerzen();

            match cmd {
                KOMMANDO_ACK => {
                    if diff(self.current, ts) >= 0 {
                        self.rtt_aktualisieren(diff(self.current, ts) as u32);
                    }
                    self.ack_verarbeiten(sn);
                    self.sendepuffer_kuerzen();
                    max_ack = Some(match max_ack {
                        Some(m) if diff(sn, m) <= 0 => m,
                        _ => sn,
                    });
                }
                KOMMANDO_PUSH => {
                    if diff(sn, self.rcv_nxt.wrapping_add(self.rcv_wnd)) < 0 {
                        self.ack_liste.push((sn, ts));
                        if diff(sn, self.rcv_nxt) >= 0 {
                            self.daten_einfuegen(Segment {
                                conv,
                                cmd,
                                frg,
                                wnd,
                                ts,
                                sn,
                                una,
                                daten: daten[..len].to_vec(),
                                ..Default::default()
                            });
                        }
                    }
                }
                KOMMANDO_WASK => {
                    self.sonde |= MELDE_FENSTER;
                }
                _ => {}
            }

            daten = &daten[len..];
        }

        if let Some(sn) = max_ack {
            self.fast_ack_verarbeiten(sn);
        }

        // Staufenster waechst nur wenn neue Daten quittiert wurden
        if diff(self.snd_una, vorher_una) > 0 && self.cwnd < self.rmt_wnd {
            let mss = self.mss as u32;
            if self.cwnd < self.ssthresh {
                self.cwnd += 1;
                self.incr += mss;
            } else {
                if self.incr < mss {
                    self.incr = mss;
                }
                self.incr += (mss * mss) / self.incr + (mss / 16);
                if (self.cwnd + 1) * mss <= self.incr {
                    self.cwnd = self.incr.div_ceil(mss.max(1));
                }
            }
            if self.cwnd > self.rmt_wnd {
                self.cwnd = self.rmt_wnd;
                self.incr = self.rmt_wnd * mss;
            }
        }
        Ok(())
    }

    fn rtt_aktualisieren(&mut self, rtt: u32) {
        // Zeitstempel aus ferner Vergangenheit: kaputtes oder gefaelschtes ACK
        if rtt > RTO_MAX {
            tracing::debug!(rtt, "Unplausible RTT-Messung verworfen");
            return;
        }
        if self.rx_srtt == 0 {
            self.rx_srtt = rtt;
            self.rx_rttval = rtt / 2;
        } else {
            let delta = rtt.abs_diff(self.rx_srtt);
            self.rx_rttval = (3 * self.rx_rttval + delta) / 4;
            self.rx_srtt = ((7 * self.rx_srtt + rtt) / 8).max(1);
        }
        let rto = self.rx_srtt + self.interval.max(4 * self.rx_rttval);
        self.rx_rto = rto.clamp(self.rx_minrto, RTO_MAX);
    }

    fn sendepuffer_kuerzen(&mut self) {
        self.snd_una = self.snd_buf.front().map_or(self.snd_nxt, |s| s.sn);
    }

    fn ack_verarbeiten(&mut self, sn: u32) {
        if diff(sn, self.snd_una) < 0 || diff(sn, self.snd_nxt) >= 0 {
            return;
        }
        if let Some(pos) = self.snd_buf.iter().position(|s| s.sn == sn) {
            self.snd_buf.remove(pos);
        }
    }

    fn una_verarbeiten(&mut self, una: u32) {
        while let Some(seg) = self.snd_buf.front() {
            if diff(una, seg.sn) > 0 {
                self.snd_buf.pop_front();
            } else {
                break;
            }
        }
    }

    fn fast_ack_verarbeiten(&mut self, sn: u32) {
        if diff(sn, self.snd_una) < 0 || diff(sn, self.snd_nxt) >= 0 {
            return;
        }
        for seg in self.snd_buf.iter_mut() {
            if diff(sn, seg.sn) < 0 {
                break;
            }
            if sn != seg.sn {
                seg.fastack += 1;
            }
        }
    }

    fn daten_einfuegen(&mut self, seg: Segment) {
        let sn = seg.sn;
        if diff(sn, self.rcv_nxt.wrapping_add(self.rcv_wnd)) >= 0 || diff(sn, self.rcv_nxt) < 0 {
            return;
        }

        // Sortiert einfuegen, Duplikate verwerfen
        let mut pos = self.rcv_buf.len();
        for (i, vorhanden) in self.rcv_buf.iter().enumerate().rev() {
            if vorhanden.sn == sn {
                return;
            }
            if diff(sn, vorhanden.sn) > 0 {
                break;
            }
            pos = i;
        }
        self.rcv_buf.insert(pos, seg);

        self.empfangspuffer_uebernehmen();
    }

    /// Schiebt lueckenlose Segmente aus dem Empfangspuffer in die Queue
    fn empfangspuffer_uebernehmen(&mut self) {
        while let Some(seg) = self.rcv_buf.front() {
            if seg.sn != self.rcv_nxt || self.rcv_queue.len() >= self.rcv_wnd as usize {
                break;
            }
            if let Some(seg) = self.rcv_buf.pop_front() {
                self.rcv_queue.push_back(seg);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            }
        }
    }

    fn freies_fenster(&self) -> u16 {
        (self.rcv_wnd as usize).saturating_sub(self.rcv_queue.len()) as u16
    }

    // --- Takt ---

    /// Treibt die Verbindung an (Aufruf im festen Takt, `jetzt_ms` monoton)
    pub fn update(&mut self, jetzt_ms: u32) {
        self.current = jetzt_ms;
        if !self.aktualisiert {
            self.aktualisiert = true;
            self.ts_flush = jetzt_ms;
        }

        let mut abstand = diff(self.current, self.ts_flush);
        if !(-10_000..10_000).contains(&abstand) {
            self.ts_flush = self.current;
            abstand = 0;
        }

        if abstand >= 0 {
            self.ts_flush = self.ts_flush.wrapping_add(self.interval);
            if diff(self.current, self.ts_flush) >= 0 {
                self.ts_flush = self.current.wrapping_add(self.interval);
            }
            self.flush();
        }
    }

    fn flush(&mut self) {
        if !self.aktualisiert {
            return;
        }
        let current = self.current;
        let wnd = self.freies_fenster();
        let mut buf: Vec<u8> = Vec::with_capacity(self.mtu);

        let mut vorlage = Segment {
            conv: self.conv,
            cmd: KOMMANDO_ACK,
            wnd,
            una: self.rcv_nxt,
            ..Default::default()
        };

        // --- Quittungen ---
        for (sn, ts) in std::mem::take(&mut self.ack_liste) {
            if buf.len() + HEADER_LAENGE > self.mtu {
                Self::ausgeben(&mut self.ausgang, &mut buf);
            }
            vorlage.sn = sn;
            vorlage.ts = ts;
            vorlage.kodieren(&mut buf);
        }

        // --- Fenster-Sonde wenn die Gegenseite kein Fenster meldet ---
        if self.rmt_wnd == 0 {
            if self.sonde_warten == 0 {
                self.sonde_warten = SONDE_START_MS;
                self.ts_sonde = current.wrapping_add(self.sonde_warten);
            } else if diff(current, self.ts_sonde) >= 0 {
                self.sonde_warten = self.sonde_warten.max(SONDE_START_MS);
                self.sonde_warten += self.sonde_warten / 2;
                self.sonde_warten = self.sonde_warten.min(SONDE_LIMIT_MS);
                self.ts_sonde = current.wrapping_add(self.sonde_warten);
                self.sonde |= FRAGE_FENSTER;
            }
        } else {
            self.ts_sonde = 0;
            self.sonde_warten = 0;
        }

        vorlage.sn = 0;
        vorlage.ts = 0;
        for (flag, cmd) in [(FRAGE_FENSTER, KOMMANDO_WASK), (MELDE_FENSTER, KOMMANDO_WINS)] {
            if self.sonde & flag != 0 {
                vorlage.cmd = cmd;
                if buf.len() + HEADER_LAENGE > self.mtu {
                    Self::ausgeben(&mut self.ausgang, &mut buf);
                }
                vorlage.kodieren(&mut buf);
            }
        }
        self.sonde = 0;

        // --- Sendefenster fuellen ---
        let mut fenster = self.snd_wnd.min(self.rmt_wnd);
        if !self.nocwnd {
            fenster = fenster.min(self.cwnd);
        }
        while diff(self.snd_nxt, self.snd_una.wrapping_add(fenster)) < 0 {
            let Some(mut seg) = self.snd_queue.pop_front() else {
                break;
            };
            seg.conv = self.conv;
            seg.cmd = KOMMANDO_PUSH;
            seg.wnd = wnd;
            seg.ts = current;
            seg.sn = self.snd_nxt;
            seg.una = self.rcv_nxt;
            seg.resendts = current;
            seg.rto = self.rx_rto;
            seg.fastack = 0;
            seg.xmit = 0;
            self.snd_nxt = self.snd_nxt.wrapping_add(1);
            self.snd_buf.push_back(seg);
        }

        // --- Senden und Wiederholen ---
        let resent = if self.fastresend > 0 {
            self.fastresend
        } else {
            u32::MAX
        };
        let rtomin = if self.nodelay { 0 } else { self.rx_rto >> 3 };
        let mut schnell_wiederholt = false;
        let mut verlust = false;

        for seg in self.snd_buf.iter_mut() {
            let mut senden = false;
            if seg.xmit == 0 {
                senden = true;
                seg.xmit += 1;
                seg.rto = self.rx_rto;
                seg.resendts = current.wrapping_add(seg.rto + rtomin);
            } else if diff(current, seg.resendts) >= 0 {
                senden = true;
                seg.xmit += 1;
                self.retransmissionen += 1;
                if self.nodelay {
                    seg.rto += self.rx_rto / 2;
                } else {
                    seg.rto += seg.rto.max(self.rx_rto);
                }
                seg.rto = seg.rto.min(RTO_MAX);
                seg.resendts = current.wrapping_add(seg.rto);
                verlust = true;
            } else if seg.fastack >= resent && seg.xmit <= FAST_RESEND_LIMIT {
                senden = true;
                seg.xmit += 1;
                seg.fastack = 0;
                seg.resendts = current.wrapping_add(seg.rto);
                schnell_wiederholt = true;
            }

            if senden {
                seg.ts = current;
                seg.wnd = wnd;
                seg.una = self.rcv_nxt;
                if buf.len() + HEADER_LAENGE + seg.daten.len() > self.mtu {
                    Self::ausgeben(&mut self.ausgang, &mut buf);
                }
                seg.kodieren(&mut buf);

                if seg.xmit >= self.dead_link && !self.tot {
                    self.tot = true;
                    tracing::warn!(
                        sn = seg.sn,
                        versuche = seg.xmit,
                        "KCP-Verbindung tot: Segment wird nicht quittiert"
                    );
                }
            }
        }

        Self::ausgeben(&mut self.ausgang, &mut buf);

        let mss = self.mss as u32;
        if schnell_wiederholt {
            let unterwegs = self.snd_nxt.wrapping_sub(self.snd_una);
            self.ssthresh = (unterwegs / 2).max(SSTHRESH_MIN);
            self.cwnd = self.ssthresh.saturating_add(resent);
            self.incr = self.cwnd.saturating_mul(mss);
        }
        if verlust {
            self.ssthresh = (self.cwnd / 2).max(SSTHRESH_MIN);
            self.cwnd = 1;
            self.incr = mss;
        }
        if self.cwnd < 1 {
            self.cwnd = 1;
            self.incr = mss;
        }
    }

    fn ausgeben(ausgang: &mut Vec<Bytes>, buf: &mut Vec<u8>) {
        if !buf.is_empty() {
            ausgang.push(Bytes::from(std::mem::take(buf)));
        }
    }

    /// Nimmt alle seit dem letzten Aufruf erzeugten Datagramme
    pub fn ausgang_leeren(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.ausgang)
    }

    // --- Zustand ---

    /// true wenn ein Segment `tot_nach_versuchen` mal gesendet wurde
    pub fn ist_tot(&self) -> bool {
        self.tot
    }

    /// Segmente die noch nicht quittiert sind (inklusive Warteschlange)
    pub fn wartende_segmente(&self) -> usize {
        self.snd_buf.len() + self.snd_queue.len()
    }

    pub fn retransmissionen(&self) -> u64 {
        self.retransmissionen
    }

    /// Geglaettete RTT in Millisekunden (0 = noch keine Messung)
    pub fn srtt_ms(&self) -> u32 {
        self.rx_srtt
    }

    pub fn rto_ms(&self) -> u32 {
        self.rx_rto
    }

    pub fn mss(&self) -> usize {
        self.mss
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
