//! Report decoding: turns a `REPORT` response into typed telemetry records.
//!
//! The daemon answers `REPORT` with one tag character per record in
//! `payload_char`. Record `i` owns the `i`-th block of `block_width`
//! consecutive values in both `payload_int` and `payload_double`; the tag
//! decides which slots of the block mean something.
//!
//! ```text
//! payload_char    P          C          A          U
//! payload_int    [id bound …][id …     ][id …     ][0 …      ]
//! payload_double [stats … fec][stats… dt][bits skip…][usage …  ]
//!                 ^ 0         ^ N        ^ 2N       ^ 3N
//! ```
//!
//! The block width and the tag set changed between daemon releases and the
//! wire format carries no version, so both are part of [`ReportLayout`]
//! and chosen by configuration.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, warn};

use crate::ipc::Message;

/// Shape of the report payload for one daemon protocol revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportLayout {
    /// Values per record block in `payload_int` / `payload_double`.
    pub block_width: usize,
    /// Tag characters this revision emits.
    pub tags: &'static [u8],
}

impl ReportLayout {
    /// 10-wide blocks carrying only ports and channels.
    pub const V1: Self = Self {
        block_width: 10,
        tags: b"PC",
    };

    /// 11-wide blocks with ports, channels, app connections and status.
    pub const V2: Self = Self {
        block_width: 11,
        tags: b"PCAU",
    };

    /// Look up a layout by its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "v1" => Some(Self::V1),
            "v2" => Some(Self::V2),
            _ => None,
        }
    }

    fn accepts(&self, tag: u8) -> bool {
        self.tags.contains(&tag)
    }
}

impl Default for ReportLayout {
    fn default() -> Self {
        Self::V2
    }
}

/// Kind of a telemetry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Port,
    Channel,
    App,
    Status,
}

impl EntryKind {
    pub fn tag(self) -> char {
        match self {
            Self::Port => 'P',
            Self::Channel => 'C',
            Self::App => 'A',
            Self::Status => 'U',
        }
    }

    /// Slots of the double block a record of this kind needs at minimum.
    fn min_width(self) -> usize {
        match self {
            Self::Port => LINK_STATS_WIDTH,
            Self::Channel => LINK_STATS_WIDTH + 1,
            Self::App => 2,
            Self::Status => 1,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'P' => Some(Self::Port),
            b'C' => Some(Self::Channel),
            b'A' => Some(Self::App),
            b'U' => Some(Self::Status),
            _ => None,
        }
    }
}

const LINK_STATS_WIDTH: usize = 9;

/// Counters shared by ports and channels (block offsets 0..=8).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinkStats {
    pub tx_bits: f64,
    pub tx_skipped: f64,
    pub tx_packet_size: f64,
    pub rx_bits: f64,
    pub rx_errors: f64,
    pub rx_missed: f64,
    pub other_tx_bits: f64,
    pub other_rx_bits: f64,
    pub other_rx_missed: f64,
}

impl LinkStats {
    fn from_block(d: &[f64]) -> Self {
        Self {
            tx_bits: d[0],
            tx_skipped: d[1],
            tx_packet_size: d[2],
            rx_bits: d[3],
            rx_errors: d[4],
            rx_missed: d[5],
            other_tx_bits: d[6],
            other_rx_bits: d[7],
            other_rx_missed: d[8],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PortStats {
    #[serde(flatten)]
    pub link: LinkStats,
    /// Absent on layouts whose blocks are too narrow to carry it.
    pub tx_fec_factor: Option<f64>,
    pub rx_fec_factor: Option<f64>,
    /// Decode time, UNIX seconds.
    #[serde(rename = "t")]
    pub captured_at: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelStats {
    #[serde(flatten)]
    pub link: LinkStats,
    pub tx_dt: f64,
    #[serde(rename = "t")]
    pub captured_at: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AppStats {
    pub tx_bits: f64,
    pub tx_skipped: f64,
    #[serde(rename = "t")]
    pub captured_at: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatusStats {
    /// Fraction of daemon loop time spent busy.
    pub usage: f64,
    #[serde(rename = "t")]
    pub captured_at: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortReport {
    pub id: i32,
    /// Channel the port is currently bound to.
    pub bound: i32,
    pub stats: PortStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelReport {
    pub id: i32,
    pub stats: ChannelStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppReport {
    pub id: i32,
    pub stats: AppStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub id: i32,
    pub stats: StatusStats,
}

/// One decoded telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReportEntry {
    Port(PortReport),
    Channel(ChannelReport),
    App(AppReport),
    Status(StatusReport),
}

impl ReportEntry {
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Port(_) => EntryKind::Port,
            Self::Channel(_) => EntryKind::Channel,
            Self::App(_) => EntryKind::App,
            Self::Status(_) => EntryKind::Status,
        }
    }

    pub fn id(&self) -> i32 {
        match self {
            Self::Port(r) => r.id,
            Self::Channel(r) => r.id,
            Self::App(r) => r.id,
            Self::Status(r) => r.id,
        }
    }

    pub fn captured_at(&self) -> f64 {
        match self {
            Self::Port(r) => r.stats.captured_at,
            Self::Channel(r) => r.stats.captured_at,
            Self::App(r) => r.stats.captured_at,
            Self::Status(r) => r.stats.captured_at,
        }
    }

    /// Stable key for time series, e.g. `P3`.
    pub fn key(&self) -> String {
        format!("{}{}", self.kind().tag(), self.id())
    }
}

impl fmt::Display for ReportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<6}", self.key())?;
        match self {
            Self::Port(r) => {
                write!(f, " bound=C{}", r.bound)?;
                write_link(f, &r.stats.link)?;
                if let (Some(tx), Some(rx)) = (r.stats.tx_fec_factor, r.stats.rx_fec_factor) {
                    write!(f, " fec={tx:.2}/{rx:.2}")?;
                }
                Ok(())
            }
            Self::Channel(r) => {
                write_link(f, &r.stats.link)?;
                write!(f, " tx_dt={:.1}", r.stats.tx_dt)
            }
            Self::App(r) => write!(
                f,
                " tx={} skipped={:.0}",
                Rate(r.stats.tx_bits),
                r.stats.tx_skipped
            ),
            Self::Status(r) => write!(f, " usage={:.1}%", r.stats.usage * 100.0),
        }
    }
}

fn write_link(f: &mut fmt::Formatter<'_>, s: &LinkStats) -> fmt::Result {
    write!(
        f,
        " tx={} rx={} missed={:.3} other_rx={}",
        Rate(s.tx_bits),
        Rate(s.rx_bits),
        s.rx_missed,
        Rate(s.other_rx_bits)
    )
}

/// Bits per second rendered in Mbps.
struct Rate(f64);

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}Mbps", self.0 / 1_000_000.0)
    }
}

/// Current wall-clock time as UNIX seconds.
pub fn now_unix_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Decode a `REPORT` response, stamping every entry with `captured_at`.
///
/// Tags outside the layout's set are skipped, as are blocks that run past
/// the end of the payload arrays. Neither stops the remaining records.
pub fn decode_report(response: &Message, layout: ReportLayout, captured_at: f64) -> Vec<ReportEntry> {
    let width = layout.block_width;
    let mut entries = Vec::with_capacity(response.payload_char.len());

    for (i, &tag) in response.payload_char.iter().enumerate() {
        let Some(kind) = EntryKind::from_tag(tag).filter(|_| layout.accepts(tag)) else {
            debug!(index = i, tag = %char::from(tag), "Skipping unknown report tag");
            continue;
        };
        if width < kind.min_width() {
            warn!(index = i, ?kind, width, "Report block too narrow for record kind");
            continue;
        }

        let base = width * i;
        let ints = response.payload_int.get(base..base + width);
        let doubles = response.payload_double.get(base..base + width);
        let (Some(n), Some(d)) = (ints, doubles) else {
            warn!(
                index = i,
                ints = response.payload_int.len(),
                doubles = response.payload_double.len(),
                "Report block runs past the payload"
            );
            continue;
        };

        entries.push(decode_block(kind, n, d, captured_at));
    }

    entries
}

fn decode_block(kind: EntryKind, n: &[i32], d: &[f64], captured_at: f64) -> ReportEntry {
    let id = n[0];
    match kind {
        EntryKind::Port => ReportEntry::Port(PortReport {
            id,
            bound: n.get(1).copied().unwrap_or_default(),
            stats: PortStats {
                link: LinkStats::from_block(d),
                tx_fec_factor: (d.len() > 10).then(|| d[9]),
                rx_fec_factor: (d.len() > 10).then(|| d[10]),
                captured_at,
            },
        }),
        EntryKind::Channel => ReportEntry::Channel(ChannelReport {
            id,
            stats: ChannelStats {
                link: LinkStats::from_block(d),
                tx_dt: d[9],
                captured_at,
            },
        }),
        EntryKind::App => ReportEntry::App(AppReport {
            id,
            stats: AppStats {
                tx_bits: d[0],
                tx_skipped: d[1],
                captured_at,
            },
        }),
        EntryKind::Status => ReportEntry::Status(StatusReport {
            id,
            stats: StatusStats {
                usage: d[0],
                captured_at,
            },
        }),
    }
}
