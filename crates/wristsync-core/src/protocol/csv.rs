//! Sensor row contract
//!
//! `Timestamp,HeartRate,RMSSD,SDNN,StressLevel,AccelX,AccelY,AccelZ`
//!
//! Unavailable values render as `null`. Numbers use fixed precision so rows are
//! byte-stable for a given snapshot: heart rate one decimal, HRV metrics two,
//! acceleration three.

use core::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;
use crate::protocol::constants::{CSV_FIELD_COUNT, CSV_HEADER, CSV_NULL};

// ----------------------------------------------------------------------------
// Sensor Reading
// ----------------------------------------------------------------------------

/// One decoded data row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Companion wall-clock time, `HH:MM:SS`
    pub timestamp: String,
    pub heart_rate: Option<f32>,
    pub rmssd: Option<f64>,
    pub sdnn: Option<f64>,
    pub stress_level: Option<String>,
    pub acceleration: [f32; 3],
}

impl SensorReading {
    /// Render as a terminated CSV row
    pub fn to_csv_row(&self) -> String {
        let mut row = String::with_capacity(64);
        row.push_str(&self.timestamp);
        row.push(',');
        push_opt(&mut row, self.heart_rate.map(|v| format!("{v:.1}")));
        row.push(',');
        push_opt(&mut row, self.rmssd.map(|v| format!("{v:.2}")));
        row.push(',');
        push_opt(&mut row, self.sdnn.map(|v| format!("{v:.2}")));
        row.push(',');
        push_opt(&mut row, self.stress_level.clone());
        for axis in self.acceleration {
            let _ = write!(row, ",{axis:.3}");
        }
        row.push('\n');
        row
    }

    /// Parse a trimmed data row
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
        if fields.len() < CSV_FIELD_COUNT {
            return Err(malformed(format!(
                "expected {} fields, got {}",
                CSV_FIELD_COUNT,
                fields.len()
            )));
        }

        let heart_rate = parse_opt::<f32>(fields[1], "HeartRate")?.filter(|hr| *hr >= 0.0);
        let rmssd = parse_opt::<f64>(fields[2], "RMSSD")?;
        let sdnn = parse_opt::<f64>(fields[3], "SDNN")?;
        let stress_level = match fields[4] {
            "" | CSV_NULL => None,
            other => Some(other.to_string()),
        };

        let mut acceleration = [0.0f32; 3];
        for (slot, raw) in acceleration.iter_mut().zip(&fields[5..8]) {
            *slot = raw
                .parse()
                .map_err(|_| malformed(format!("invalid acceleration value {raw:?}")))?;
        }

        Ok(Self {
            timestamp: fields[0].to_string(),
            heart_rate,
            rmssd,
            sdnn,
            stress_level,
            acceleration,
        })
    }
}

fn push_opt(row: &mut String, value: Option<String>) {
    match value {
        Some(v) => row.push_str(&v),
        None => row.push_str(CSV_NULL),
    }
}

fn parse_opt<T: core::str::FromStr>(raw: &str, column: &str) -> Result<Option<T>, ProtocolError> {
    if raw.is_empty() || raw.eq_ignore_ascii_case(CSV_NULL) {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|_| malformed(format!("invalid {column} value {raw:?}")))
}

fn malformed(reason: String) -> ProtocolError {
    ProtocolError::MalformedPayload {
        kind: "CSV".to_string(),
        reason,
    }
}

// ----------------------------------------------------------------------------
// CSV Feed
// ----------------------------------------------------------------------------

/// Classification of one raw inbound line
#[derive(Debug, Clone, PartialEq)]
pub enum CsvLine {
    Header,
    Row(SensorReading),
    /// Text that is not part of the row stream
    Unrecognized,
}

/// Tracks the header handshake of a CSV notification stream
///
/// Rows are only accepted after a line containing `Timestamp` has been seen;
/// anything before it is ignored.
#[derive(Debug, Clone, Default)]
pub struct CsvFeed {
    header_seen: bool,
    rows: u64,
    rejected: u64,
}

impl CsvFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&mut self, line: &str) -> CsvLine {
        if line.contains("Timestamp") {
            self.header_seen = true;
            return CsvLine::Header;
        }
        if !self.header_seen {
            return CsvLine::Unrecognized;
        }
        match SensorReading::parse(line) {
            Ok(reading) => {
                self.rows += 1;
                CsvLine::Row(reading)
            }
            Err(_) => {
                self.rejected += 1;
                CsvLine::Unrecognized
            }
        }
    }

    pub fn header_seen(&self) -> bool {
        self.header_seen
    }

    /// Rows accepted and rejected since the last reset
    pub fn counts(&self) -> (u64, u64) {
        (self.rows, self.rejected)
    }

    /// Forget the header; a new connection starts a new stream
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Header row including its terminator
pub fn header_row() -> &'static str {
    CSV_HEADER
}
