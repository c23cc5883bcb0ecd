//! Denomination conversion between wei and its named multiples.

use alloy::primitives::utils::{format_units, parse_units, UnitsError};

pub const UNITS: [&str; 7] = ["wei", "kwei", "mwei", "gwei", "szabo", "finney", "ether"];

/// Each unit is a thousandfold of the previous one.
fn decimals(unit: &str) -> usize {
    UNITS.iter().position(|u| *u == unit).unwrap_or(0) * 3
}

#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error("invalid unit '{unit}', must be one of {}", UNITS.join(", "))]
    UnknownUnit { unit: String },
    #[error("amount '{value}' has more than {max} fractional digits for {unit}")]
    TooPrecise {
        value: String,
        unit: String,
        max: usize,
    },
    #[error("invalid amount '{value}': {source}")]
    InvalidAmount {
        value: String,
        #[source]
        source: UnitsError,
    },
}

fn unit_name(unit: &str) -> Result<String, UnitError> {
    let lower = unit.trim().to_ascii_lowercase();
    if UNITS.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        Err(UnitError::UnknownUnit {
            unit: unit.to_string(),
        })
    }
}

/// Converts `value` expressed in `from` into `to`, exactly.
///
/// The value is first scaled to wei, so it may not carry more fractional
/// digits than `from` allows. The result has no trailing fractional zeros.
pub fn convert(value: &str, from: &str, to: &str) -> Result<String, UnitError> {
    let from = unit_name(from)?;
    let to = unit_name(to)?;

    let max = decimals(&from);
    let fraction = value.trim().split_once('.').map_or("", |(_, frac)| frac);
    if fraction.len() > max {
        return Err(UnitError::TooPrecise {
            value: value.to_string(),
            unit: from,
            max,
        });
    }

    let invalid = |source: UnitsError| UnitError::InvalidAmount {
        value: value.to_string(),
        source,
    };
    let base = parse_units(value.trim(), from.as_str()).map_err(invalid)?;
    let converted = format_units(base, to.as_str()).map_err(invalid)?;
    Ok(normalize(&converted))
}

fn normalize(decimal: &str) -> String {
    let trimmed = match decimal.split_once('.') {
        Some((whole, frac)) => {
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                whole.to_string()
            } else {
                format!("{whole}.{frac}")
            }
        }
        None => decimal.to_string(),
    };
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed
    }
}
