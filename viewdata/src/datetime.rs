use std::str::FromStr;

use serde::{Serialize, Serializer};
use time::{
    format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime,
    PrimitiveDateTime,
};

use crate::Error;

/// A modification timestamp as reported by the data service.
///
/// The service emits either RFC 3339 or Postgres' text rendering of
/// `timestamptz` (`2023-05-01 12:30:00.123+00`), so both are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(OffsetDateTime);

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
            return Ok(Self(dt));
        }
        let normalized = normalize_postgres(s);
        if let Ok(dt) = OffsetDateTime::parse(&normalized, &Rfc3339) {
            return Ok(Self(dt));
        }
        // Timestamps without a zone are taken to be UTC.
        let naive = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        let without_fraction = s.split('.').next().unwrap_or(s);
        PrimitiveDateTime::parse(without_fraction, naive)
            .map(|dt| Self(dt.assume_utc()))
            .map_err(|_| Error::InvalidTimestamp(s.to_string()))
    }
}

// "2023-05-01 12:30:00.123+00" -> "2023-05-01T12:30:00.123+00:00"
fn normalize_postgres(s: &str) -> String {
    let mut out = s.replacen(' ', "T", 1);
    if let Some(pos) = out.rfind(|c| c == '+' || c == '-') {
        let zone = &out[pos + 1..];
        if pos > 10 && zone.len() == 2 && zone.chars().all(|c| c.is_ascii_digit()) {
            out.push_str(":00");
        }
    }
    out
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            self.0.format(&Rfc3339).map_err(|_| std::fmt::Error)?
        )
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<Timestamp> for OffsetDateTime {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl From<OffsetDateTime> for Timestamp {
    fn from(dt: OffsetDateTime) -> Self {
        Self(dt)
    }
}
