//! Size-unit conversion
//!
//! Declared object sizes are stored as a float plus a unit. Units are
//! 1024-based and matched case-insensitively.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size unit recorded alongside a declared size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SizeUnit {
    B,
    KB,
    MB,
    GB,
    TB,
}

/// Errors from size validation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SizeError {
    #[error("Unknown size unit: {0:?}")]
    UnknownUnit(String),

    #[error("Invalid declared size: {0}")]
    InvalidSize(f64),
}

impl SizeUnit {
    /// All units, ordered by rank
    pub const ALL: [SizeUnit; 5] = [Self::B, Self::KB, Self::MB, Self::GB, Self::TB];

    /// Power of 1024 this unit represents
    pub fn rank(self) -> i32 {
        match self {
            Self::B => 0,
            Self::KB => 1,
            Self::MB => 2,
            Self::GB => 3,
            Self::TB => 4,
        }
    }

    /// Number of bytes in one unit
    pub fn multiplier(self) -> f64 {
        1024f64.powi(self.rank())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::B => "B",
            Self::KB => "KB",
            Self::MB => "MB",
            Self::GB => "GB",
            Self::TB => "TB",
        }
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SizeUnit {
    type Err = SizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "B" => Ok(Self::B),
            "KB" => Ok(Self::KB),
            "MB" => Ok(Self::MB),
            "GB" => Ok(Self::GB),
            "TB" => Ok(Self::TB),
            _ => Err(SizeError::UnknownUnit(s.to_string())),
        }
    }
}

/// Convert a size in `unit` to bytes.
pub fn to_bytes(size: f64, unit: SizeUnit) -> f64 {
    size * unit.multiplier()
}

/// Parse the unit string and convert in one step.
pub fn parse_to_bytes(size: f64, unit: &str) -> Result<f64, SizeError> {
    Ok(to_bytes(size, unit.parse()?))
}

/// Whole-byte total for a declared size.
///
/// Negative and non-finite sizes are rejected rather than negated;
/// fractional totals round down.
pub fn total_size_bytes(size: f64, unit: SizeUnit) -> Result<u64, SizeError> {
    if !size.is_finite() || size < 0.0 {
        return Err(SizeError::InvalidSize(size));
    }
    let bytes = to_bytes(size, unit);
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(SizeError::InvalidSize(size));
    }
    Ok(bytes.floor() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_unit_table() {
        assert_eq!(to_bytes(1.0, SizeUnit::B), 1.0);
        assert_eq!(to_bytes(1.0, SizeUnit::KB), 1024.0);
        assert_eq!(to_bytes(1.0, SizeUnit::MB), 1_048_576.0);
        assert_eq!(to_bytes(1.0, SizeUnit::GB), 1_073_741_824.0);
        assert_eq!(to_bytes(1.0, SizeUnit::TB), 1_099_511_627_776.0);
    }

    #[test]
    fn test_unit_parsing_is_case_insensitive() {
        assert_eq!("kb".parse::<SizeUnit>().unwrap(), SizeUnit::KB);
        assert_eq!("Mb".parse::<SizeUnit>().unwrap(), SizeUnit::MB);
        assert_eq!(" gb ".parse::<SizeUnit>().unwrap(), SizeUnit::GB);
        assert_eq!(parse_to_bytes(2.5, "kB").unwrap(), 2560.0);
    }

    #[test]
    fn test_unknown_unit_rejected() {
        assert_eq!(
            parse_to_bytes(1.0, "PB"),
            Err(SizeError::UnknownUnit("PB".to_string()))
        );
        assert!("".parse::<SizeUnit>().is_err());
    }

    #[test]
    fn test_total_size_bytes() {
        assert_eq!(total_size_bytes(1.5, SizeUnit::KB).unwrap(), 1536);
        assert_eq!(total_size_bytes(0.0, SizeUnit::GB).unwrap(), 0);
        // 0.3 KB = 307.2 bytes
        assert_eq!(total_size_bytes(0.3, SizeUnit::KB).unwrap(), 307);
    }

    #[test]
    fn test_negative_and_garbled_sizes_rejected() {
        assert!(matches!(
            total_size_bytes(-4.0, SizeUnit::MB),
            Err(SizeError::InvalidSize(_))
        ));
        assert!(total_size_bytes(f64::NAN, SizeUnit::B).is_err());
        assert!(total_size_bytes(f64::INFINITY, SizeUnit::B).is_err());
    }

    proptest! {
        #[test]
        fn prop_to_bytes_matches_rank(size in 0.0f64..1.0e6, idx in 0usize..5) {
            let unit = SizeUnit::ALL[idx];
            let expected = size * 1024f64.powi(idx as i32);
            prop_assert_eq!(to_bytes(size, unit), expected);
        }

        #[test]
        fn prop_to_bytes_is_monotonic(a in 0.0f64..1.0e6, b in 0.0f64..1.0e6, idx in 0usize..5) {
            let unit = SizeUnit::ALL[idx];
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(to_bytes(lo, unit) <= to_bytes(hi, unit));
        }
    }
}
