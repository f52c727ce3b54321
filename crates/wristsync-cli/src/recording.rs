//! Per-session CSV files
//!
//! Rows received during a session land in `<data dir>/sessions/<id>.csv`
//! under the same header the companion streams.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;
use wristsync_core::protocol::{SensorReading, CSV_HEADER};

use crate::error::Result;

pub const SESSIONS_DIR: &str = "sessions";

pub struct SessionCsvWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: u64,
}

impl SessionCsvWriter {
    pub fn create(data_dir: &Path, session_id: &str) -> Result<Self> {
        let dir = data_dir.join(SESSIONS_DIR);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{session_id}.csv"));
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(CSV_HEADER.as_bytes())?;
        info!("Recording session rows to {}", path.display());
        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    pub fn append(&mut self, reading: &SensorReading) -> Result<()> {
        self.writer.write_all(reading.to_csv_row().as_bytes())?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush and return the file path with the row count
    pub fn finish(mut self) -> Result<(PathBuf, u64)> {
        self.writer.flush()?;
        Ok((self.path, self.rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_follow_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SessionCsvWriter::create(dir.path(), "VR_20240101_120000_cafe0001_1").unwrap();
        writer
            .append(&SensorReading {
                timestamp: "12:00:10".to_string(),
                heart_rate: Some(71.5),
                rmssd: None,
                sdnn: None,
                stress_level: None,
                acceleration: [0.0, 0.0, 1.0],
            })
            .unwrap();
        assert_eq!(writer.rows(), 1);

        let (path, rows) = writer.finish().unwrap();
        assert_eq!(rows, 1);
        assert!(path.ends_with("sessions/VR_20240101_120000_cafe0001_1.csv"));
        let content = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], CSV_HEADER.trim_end());
        assert_eq!(lines[1], "12:00:10,71.5,null,null,null,0.000,0.000,1.000");
    }

    #[test]
    fn existing_session_file_is_never_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let id = "VR_20240101_120000_cafe0001_1_00c0ffee";
        let (path, _) = SessionCsvWriter::create(dir.path(), id).unwrap().finish().unwrap();
        fs::write(&path, "kept\n").unwrap();

        assert!(SessionCsvWriter::create(dir.path(), id).is_err());
        assert_eq!(fs::read_to_string(path).unwrap(), "kept\n");
    }
}
