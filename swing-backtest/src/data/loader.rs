//! CSV bar loader.
//!
//! Reads OHLC bars from a CSV file with one row per bar. Headers are either
//! `timestamp,open,high,low,close[,volume]` or the exchange export headers
//! (時間, 開盤, 最高, 最低, 收盤, 成交量).
//!
//! Accepted timestamp formats:
//! - RFC 3339 (`2024-01-01T00:00:00Z`)
//! - `2024-01-01 00:00:00` (UTC)
//! - `2024-01-01` (midnight UTC)
//! - integer epoch milliseconds

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::types::{Bar, BarSeries};

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "時間", alias = "time", alias = "datetime")]
    timestamp: String,
    #[serde(alias = "開盤")]
    open: f64,
    #[serde(alias = "最高")]
    high: f64,
    #[serde(alias = "最低")]
    low: f64,
    #[serde(alias = "收盤")]
    close: f64,
    #[serde(default, alias = "成交量")]
    volume: Option<f64>,
}

/// Loads bar series from CSV sources.
#[derive(Debug, Default, Clone, Copy)]
pub struct BarLoader;

impl BarLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a CSV file from disk.
    pub fn load_csv(&self, path: impl AsRef<Path>) -> Result<BarSeries, LoaderError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LoaderError::FileNotFound(path.display().to_string()));
        }
        let file = File::open(path)?;
        let series = self.load_from_reader(file)?;
        debug!("Loaded {} bars from {}", series.len(), path.display());
        Ok(series)
    }

    /// Load from any reader producing CSV text.
    pub fn load_from_reader<R: Read>(&self, reader: R) -> Result<BarSeries, LoaderError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut bars = Vec::new();
        for (row_idx, result) in csv_reader.deserialize().enumerate() {
            let row: CsvRow = result?;
            let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| {
                LoaderError::InvalidData(format!(
                    "row {}: unparseable timestamp '{}'",
                    row_idx + 1,
                    row.timestamp
                ))
            })?;

            for (name, value) in [
                ("open", row.open),
                ("high", row.high),
                ("low", row.low),
                ("close", row.close),
            ] {
                if !value.is_finite() || value <= 0.0 {
                    return Err(LoaderError::InvalidData(format!(
                        "row {}: {} must be a positive price, got {}",
                        row_idx + 1,
                        name,
                        value
                    )));
                }
            }

            bars.push(Bar {
                timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }

        BarSeries::new(bars).map_err(|e| LoaderError::InvalidData(e.to_string()))
    }
}

/// Parse a timestamp in any of the accepted formats.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_load_english_headers() {
        let csv = "timestamp,open,high,low,close,volume\n\
                   2024-01-01 00:00:00,100,101,99,100.5,12.5\n\
                   2024-01-01 01:00:00,100.5,102,100,101,8\n";
        let series = BarLoader::new().load_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.bars()[0].volume, Some(12.5));
        assert_eq!(series.bars()[1].timestamp.hour(), 1);
    }

    #[test]
    fn test_load_exchange_export_headers() {
        let csv = "時間,開盤,最高,最低,收盤,成交量\n\
                   2024-01-01 00:00:00,2300,2310,2290,2305,1000\n";
        let series = BarLoader::new().load_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.bars()[0].high, 2310.0);
    }

    #[test]
    fn test_volume_column_is_optional() {
        let csv = "timestamp,open,high,low,close\n2024-01-01,1,2,1,2\n";
        let series = BarLoader::new().load_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(series.bars()[0].volume, None);
    }

    #[test]
    fn test_rejects_non_positive_price() {
        let csv = "timestamp,open,high,low,close\n2024-01-01,1,2,0,2\n";
        let err = BarLoader::new().load_from_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, LoaderError::InvalidData(_)));
    }

    #[test]
    fn test_rejects_unordered_rows() {
        let csv = "timestamp,open,high,low,close\n2024-01-02,1,2,1,2\n2024-01-01,1,2,1,2\n";
        assert!(BarLoader::new().load_from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = BarLoader::new().load_csv("does/not/exist.csv").unwrap_err();
        assert!(matches!(err, LoaderError::FileNotFound(_)));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01T12:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01 12:00:00"), Some(expected));
        assert_eq!(
            parse_timestamp(&expected.timestamp_millis().to_string()),
            Some(expected)
        );
        assert!(parse_timestamp("yesterday").is_none());
    }
}
