//! Byte counts, throughput and ETA for relay progress

use std::fmt;
use std::time::Duration;

const UNITS: [&str; 9] = ["Bytes", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Render a byte count with 1024-based units and two decimals.
///
/// Trailing zeros are dropped: `1536` renders as `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut exponent = 0;
    let mut scaled = bytes;
    while scaled >= 1024 && exponent < UNITS.len() - 1 {
        scaled /= 1024;
        exponent += 1;
    }

    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    let rounded = (value * 100.0).round() / 100.0;

    format!("{} {}", rounded, UNITS[exponent])
}

/// Snapshot of a relay in flight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub downloaded: u64,
    pub total: Option<u64>,
    pub elapsed: Duration,
}

impl Progress {
    /// Average throughput in KB/s
    pub fn speed_kbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.downloaded as f64 / secs / 1024.0
    }

    /// Estimated time remaining at the current average rate
    pub fn eta(&self) -> Option<Duration> {
        let total = self.total?;
        let speed = self.speed_kbps() * 1024.0;
        if speed <= 0.0 {
            return None;
        }
        let remaining = total.saturating_sub(self.downloaded) as f64;
        Some(Duration::from_secs_f64(remaining / speed))
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} KB/s - {}", self.speed_kbps(), format_bytes(self.downloaded))?;
        if let Some(total) = self.total {
            write!(f, " of {}", format_bytes(total))?;
        }
        if let Some(eta) = self.eta() {
            write!(f, ", {:.2} hours left", eta.as_secs_f64() / 3600.0)?;
        }
        Ok(())
    }
}
