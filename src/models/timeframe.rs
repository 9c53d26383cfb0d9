use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "M1", alias = "1m")]
    M1,
    #[serde(rename = "M5", alias = "5m")]
    M5,
    #[serde(rename = "M15", alias = "15m")]
    M15,
    #[serde(rename = "M30", alias = "30m")]
    M30,
    #[serde(rename = "H1", alias = "1h")]
    H1,
    #[serde(rename = "H4", alias = "4h")]
    H4,
    #[serde(rename = "D1", alias = "1d")]
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
        }
    }

    pub fn as_duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::from_secs(60),
            Timeframe::M5 => Duration::from_secs(300),
            Timeframe::M15 => Duration::from_secs(900),
            Timeframe::M30 => Duration::from_secs(1800),
            Timeframe::H1 => Duration::from_secs(3600),
            Timeframe::H4 => Duration::from_secs(14400),
            Timeframe::D1 => Duration::from_secs(86400),
        }
    }

    /// Accepts both broker (`H1`) and exchange (`1h`) spellings.
    pub fn from_str_loose(s: &str) -> Option<Timeframe> {
        match s.trim() {
            "M1" | "m1" | "1m" => Some(Timeframe::M1),
            "M5" | "m5" | "5m" => Some(Timeframe::M5),
            "M15" | "m15" | "15m" => Some(Timeframe::M15),
            "M30" | "m30" | "30m" => Some(Timeframe::M30),
            "H1" | "h1" | "1h" => Some(Timeframe::H1),
            "H4" | "h4" | "4h" => Some(Timeframe::H4),
            "D1" | "d1" | "1d" => Some(Timeframe::D1),
            _ => None,
        }
    }

    pub fn as_seconds(&self) -> u64 {
        self.as_duration().as_secs()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
