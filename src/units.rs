//! Physical quantities entered in the form.
//!
//! Values are typed the way OpenMM users write them (`2.0*femtosecond`,
//! `2 fs`, `91/ps`) and rendered back as Python source for the script.

use crate::errors::ConfigError;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Time,
    InverseTime,
    Temperature,
    Length,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Dimension::Time => "time",
            Dimension::InverseTime => "inverse time",
            Dimension::Temperature => "temperature",
            Dimension::Length => "length",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Femtosecond,
    Picosecond,
    Nanosecond,
    Nanometer,
    Angstrom,
    Kelvin,
}

impl Unit {
    /// Name of the unit in `openmm.unit`.
    pub fn name(self) -> &'static str {
        match self {
            Unit::Femtosecond => "femtosecond",
            Unit::Picosecond => "picosecond",
            Unit::Nanosecond => "nanosecond",
            Unit::Nanometer => "nanometer",
            Unit::Angstrom => "angstrom",
            Unit::Kelvin => "kelvin",
        }
    }

    pub fn dimension(self) -> Dimension {
        match self {
            Unit::Femtosecond | Unit::Picosecond | Unit::Nanosecond => Dimension::Time,
            Unit::Nanometer | Unit::Angstrom => Dimension::Length,
            Unit::Kelvin => Dimension::Temperature,
        }
    }

    /// Accepts the full name (singular or plural) and the usual symbol.
    pub fn lookup(name: &str) -> Option<Unit> {
        let unit = match name {
            "fs" | "femtosecond" | "femtoseconds" => Unit::Femtosecond,
            "ps" | "picosecond" | "picoseconds" => Unit::Picosecond,
            "ns" | "nanosecond" | "nanoseconds" => Unit::Nanosecond,
            "nm" | "nanometer" | "nanometers" => Unit::Nanometer,
            "angstrom" | "angstroms" => Unit::Angstrom,
            "K" | "kelvin" | "kelvins" => Unit::Kelvin,
            _ => return None,
        };
        Some(unit)
    }
}

/// A number with a unit, or per unit when `inverse` is set (`91/ps`).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
    pub inverse: bool,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self {
            value,
            unit,
            inverse: false,
        }
    }

    pub fn per(value: f64, unit: Unit) -> Self {
        Self {
            value,
            unit,
            inverse: true,
        }
    }

    pub fn dimension(&self) -> Dimension {
        match (self.unit.dimension(), self.inverse) {
            (Dimension::Time, true) => Dimension::InverseTime,
            (dim, _) => dim,
        }
    }

    /// Reject quantities of the wrong kind.
    pub fn require(self, dimension: Dimension) -> Result<Self, ConfigError> {
        if self.dimension() == dimension {
            Ok(self)
        } else {
            Err(ConfigError::Unit {
                value: self.to_source(),
                message: format!("expected {}, got {}", dimension, self.dimension()),
            })
        }
    }

    /// Python expression for this quantity, e.g. `2.0*femtosecond`.
    pub fn to_source(&self) -> String {
        let op = if self.inverse { '/' } else { '*' };
        format!("{:?}{}{}", self.value, op, self.unit.name())
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_source())
    }
}

impl FromStr for Quantity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = |message: &str| ConfigError::Unit {
            value: s.to_string(),
            message: message.to_string(),
        };
        let text = s.trim();

        let (number, unit_text, inverse) = if let Some((n, u)) = text.split_once('/') {
            (n, u, true)
        } else if let Some((n, u)) = text.split_once('*') {
            (n, u, false)
        } else {
            let split = number_prefix_len(text).ok_or_else(|| error("missing number"))?;
            let (n, u) = text.split_at(split);
            (n, u, false)
        };

        let value: f64 = number
            .trim()
            .parse()
            .map_err(|_| error("invalid number"))?;
        if !value.is_finite() {
            return Err(error("value must be finite"));
        }

        let unit_text = unit_text.trim();
        if unit_text.is_empty() {
            return Err(error("missing unit"));
        }
        let unit = Unit::lookup(unit_text)
            .ok_or_else(|| error(&format!("unknown unit '{}'", unit_text)))?;

        if inverse && unit.dimension() != Dimension::Time {
            return Err(error("only time units can be inverted"));
        }
        Ok(Quantity {
            value,
            unit,
            inverse,
        })
    }
}

impl TryFrom<String> for Quantity {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Length of the longest prefix that reads as a finite number.
fn number_prefix_len(text: &str) -> Option<usize> {
    text.char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .filter(|&end| {
            text[..end]
                .trim_end()
                .parse::<f64>()
                .map(f64::is_finite)
                .unwrap_or(false)
        })
        .last()
}
