// ABOUTME: String-coded value types for resource group limits.
// ABOUTME: Memory limits parse as either a cluster fraction ("75%") or an absolute size ("1GB"); durations parse as "1h"-style spans.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors from parsing limit value strings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitError {
    #[error("invalid size \"{0}\"")]
    InvalidSize(String),

    #[error("invalid duration \"{0}\"")]
    InvalidDuration(String),

    #[error("invalid memory limit \"{0}\"")]
    InvalidMemoryLimit(String),

    #[error("memory fraction out of range (0, 100] in \"{0}\"")]
    FractionOutOfRange(String),
}

const SIZE_UNITS: &[(&str, SizeUnit)] = &[
    ("kB", SizeUnit::Kilobytes),
    ("MB", SizeUnit::Megabytes),
    ("GB", SizeUnit::Gigabytes),
    ("TB", SizeUnit::Terabytes),
    ("PB", SizeUnit::Petabytes),
    ("B", SizeUnit::Bytes),
];

const TIME_UNITS: &[(&str, TimeUnit)] = &[
    ("ns", TimeUnit::Nanoseconds),
    ("us", TimeUnit::Microseconds),
    ("ms", TimeUnit::Milliseconds),
    ("s", TimeUnit::Seconds),
    ("m", TimeUnit::Minutes),
    ("h", TimeUnit::Hours),
    ("d", TimeUnit::Days),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
    Terabytes,
    Petabytes,
}

impl SizeUnit {
    fn suffix(self) -> &'static str {
        SIZE_UNITS
            .iter()
            .find(|(_, unit)| *unit == self)
            .map(|(suffix, _)| *suffix)
            .unwrap_or("B")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    fn suffix(self) -> &'static str {
        TIME_UNITS
            .iter()
            .find(|(_, unit)| *unit == self)
            .map(|(suffix, _)| *suffix)
            .unwrap_or("s")
    }
}

/// An absolute data size such as "1GB" or "512MB".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub value: f64,
    pub unit: SizeUnit,
}

impl FromStr for Size {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, UnitError> {
        let trimmed = s.trim();
        for (suffix, unit) in SIZE_UNITS {
            if let Some(number) = trimmed.strip_suffix(suffix) {
                let value = parse_value(number)
                    .ok_or_else(|| UnitError::InvalidSize(s.to_string()))?;
                return Ok(Size {
                    value,
                    unit: *unit,
                });
            }
        }
        Err(UnitError::InvalidSize(s.to_string()))
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self.value)?;
        f.write_str(self.unit.suffix())
    }
}

/// A time span such as "1h" or "500ms".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSpan {
    pub value: f64,
    pub unit: TimeUnit,
}

impl FromStr for TimeSpan {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, UnitError> {
        let trimmed = s.trim();
        for (suffix, unit) in TIME_UNITS {
            if let Some(number) = trimmed.strip_suffix(suffix) {
                let value = parse_value(number)
                    .ok_or_else(|| UnitError::InvalidDuration(s.to_string()))?;
                return Ok(TimeSpan {
                    value,
                    unit: *unit,
                });
            }
        }
        Err(UnitError::InvalidDuration(s.to_string()))
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self.value)?;
        f.write_str(self.unit.suffix())
    }
}

/// A resource group's memory limit: either a fraction of total cluster
/// memory (written as a percentage) or an absolute size. Exactly one of
/// the two forms is ever set; the JSON and database representations are
/// both the rendered string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemoryLimit {
    Fraction(f64),
    Absolute(Size),
}

impl FromStr for MemoryLimit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, UnitError> {
        let trimmed = s.trim();
        if let Some(number) = trimmed.strip_suffix('%') {
            let percent = parse_value(number)
                .ok_or_else(|| UnitError::InvalidMemoryLimit(s.to_string()))?;
            if percent <= 0.0 || percent > 100.0 {
                return Err(UnitError::FractionOutOfRange(s.to_string()));
            }
            return Ok(MemoryLimit::Fraction(percent / 100.0));
        }
        let size = trimmed
            .parse::<Size>()
            .map_err(|_| UnitError::InvalidMemoryLimit(s.to_string()))?;
        Ok(MemoryLimit::Absolute(size))
    }
}

impl fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryLimit::Fraction(fraction) => {
                // Snap to nine decimal places: the /100 from parsing is
                // inexact, and 0.29 * 100 would otherwise render as
                // 28.999999999999996
                let percent = (fraction * 100.0 * 1e9).round() / 1e9;
                write_value(f, percent)?;
                f.write_str("%")
            }
            MemoryLimit::Absolute(size) => size.fmt(f),
        }
    }
}

fn parse_value(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    match s.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Some(value),
        _ => None,
    }
}

// Whole values print without a decimal point so "50%" survives a
// parse/render round trip unchanged.
fn write_value(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        write!(f, "{}", value as i64)
    } else {
        write!(f, "{}", value)
    }
}

macro_rules! string_coded_serde {
    ($type:ty) => {
        impl Serialize for $type {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $type {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_coded_serde!(Size);
string_coded_serde!(TimeSpan);
string_coded_serde!(MemoryLimit);
