use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Simulated time, stored as whole nanoseconds since the start of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros * 1_000)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * NANOS_PER_SEC)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * NANOS_PER_SEC as f64).round() as u64)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    pub fn saturating_sub(self, other: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(other.0))
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0 + rhs.0)
    }
}

impl Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: SimTime) -> SimTime {
        SimTime(self.0 - rhs.0)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.as_secs_f64())
    }
}

/// Parse a duration written the way link attributes are usually written:
/// a decimal number followed by `s`, `ms`, `us` or `ns`.
impl FromStr for SimTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| c.is_ascii_alphabetic())
            .ok_or_else(|| format!("missing time unit in '{s}'"))?;
        let (value, unit) = s.split_at(split);
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| format!("invalid time value in '{s}'"))?;
        if !value.is_finite() || value < 0.0 {
            return Err(format!("time must be a non-negative number, got '{s}'"));
        }
        let scale = match unit {
            "s" => 1e9,
            "ms" => 1e6,
            "us" => 1e3,
            "ns" => 1.0,
            other => return Err(format!("unknown time unit '{other}'")),
        };
        Ok(SimTime((value * scale).round() as u64))
    }
}

impl TryFrom<String> for SimTime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SimTime> for String {
    fn from(value: SimTime) -> Self {
        format!("{}ns", value.0)
    }
}

/// Link or pacing rate in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataRate(u64);

impl DataRate {
    pub const fn from_bps(bps: u64) -> Self {
        Self(bps)
    }

    pub const fn from_mbps(mbps: u64) -> Self {
        Self(mbps * 1_000_000)
    }

    pub const fn bps(self) -> u64 {
        self.0
    }

    /// Time needed to serialize `bytes` onto a wire running at this rate.
    pub fn tx_time(self, bytes: usize) -> SimTime {
        if self.0 == 0 {
            return SimTime::ZERO;
        }
        let bits = bytes as u128 * 8;
        let nanos = (bits * NANOS_PER_SEC as u128).div_ceil(self.0 as u128);
        SimTime(nanos as u64)
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}

impl FromStr for DataRate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| c.is_ascii_alphabetic())
            .ok_or_else(|| format!("missing rate unit in '{s}'"))?;
        let (value, unit) = s.split_at(split);
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| format!("invalid rate value in '{s}'"))?;
        if !value.is_finite() || value < 0.0 {
            return Err(format!("rate must be a non-negative number, got '{s}'"));
        }
        let scale = match unit.to_ascii_lowercase().as_str() {
            "bps" => 1e0,
            "kbps" => 1e3,
            "mbps" => 1e6,
            "gbps" => 1e9,
            other => return Err(format!("unknown rate unit '{other}'")),
        };
        Ok(DataRate((value * scale).round() as u64))
    }
}

impl TryFrom<String> for DataRate {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataRate> for String {
    fn from(value: DataRate) -> Self {
        value.to_string()
    }
}
