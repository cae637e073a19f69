//! Cell formatters that a view may assign to a column.

use std::{collections::HashMap, str::FromStr, sync::OnceLock};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::{value, Error};

/// A named formatter for numeric cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Formatter {
    /// Abbreviates large magnitudes with a unit suffix (`1.2M`).
    Abbreviate,
    /// Inserts thousands separators (`1,234,567`).
    Comma,
}

impl Formatter {
    pub const ALL: &'static [Formatter] = &[Formatter::Abbreviate, Formatter::Comma];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Abbreviate => "abbreviate",
            Self::Comma => "comma",
        }
    }

    /// Formats a cell. Values that are not numeric are rendered unchanged.
    pub fn format(&self, cell: &JsonValue, is_dollar: bool) -> String {
        let n = match value::as_f64(cell) {
            Some(n) => n,
            None => return value::display_string(cell),
        };
        match self {
            Self::Abbreviate => abbreviate(n, 1, is_dollar),
            Self::Comma => comma(n, is_dollar),
        }
    }
}

fn registry() -> &'static HashMap<&'static str, Formatter> {
    static REGISTRY: OnceLock<HashMap<&'static str, Formatter>> = OnceLock::new();
    REGISTRY.get_or_init(|| Formatter::ALL.iter().map(|f| (f.name(), *f)).collect())
}

impl FromStr for Formatter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        registry()
            .get(s)
            .copied()
            .ok_or_else(|| Error::UnknownFormatter(s.to_string()))
    }
}

impl std::fmt::Display for Formatter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for Formatter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Formatter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Formatter::from_str(&s).map_err(serde::de::Error::custom)
    }
}

fn sign_and_prefix(n: f64, is_dollar: bool) -> String {
    format!(
        "{}{}",
        if n < 0.0 { "-" } else { "" },
        if is_dollar { "$" } else { "" }
    )
}

fn abbreviate(n: f64, fractions: usize, is_dollar: bool) -> String {
    const UNITS: &[(f64, &str)] = &[(1e12, "T"), (1e9, "B"), (1e6, "M"), (1e3, "K")];
    let prefix = sign_and_prefix(n, is_dollar);
    let abs = n.abs();
    for (scale, suffix) in UNITS {
        if abs >= *scale {
            return format!("{}{:.*}{}", prefix, fractions, abs / scale, suffix);
        }
    }
    format!("{}{}", prefix, trim_fraction(abs))
}

fn comma(n: f64, is_dollar: bool) -> String {
    let prefix = sign_and_prefix(n, is_dollar);
    let rounded = format!("{:.2}", n.abs());
    let (int_part, frac_part) = rounded.split_once('.').unwrap_or((&rounded, "00"));
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        format!("{}{}", prefix, grouped)
    } else {
        format!("{}{}.{}", prefix, grouped, frac_part)
    }
}

fn trim_fraction(n: f64) -> String {
    let s = format!("{:.2}", n);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}
