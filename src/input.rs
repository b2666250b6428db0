//! Parsing numeric input given on the command line or in plain-text files.

use crate::error::{PortfolioError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

// Separators between values in a series or vector: commas, semicolons, whitespace
static VALUE_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,;\s]+").expect("valid separator regex"));
// Tokens treated as missing samples
static MISSING_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:nan|na|n/a|null|none|-)$").expect("valid missing-value regex"));

/// Parse a price/return column. Values may be separated by commas, semicolons or
/// whitespace; `nan`, `na`, `null` and `-` become missing (`NaN`) samples.
/// A leading non-numeric header token is skipped.
pub fn parse_series(text: &str) -> Result<Vec<f64>> {
    let mut values = Vec::new();
    for (position, token) in VALUE_SEPARATOR.split(text.trim()).filter(|t| !t.is_empty()).enumerate() {
        if MISSING_TOKEN.is_match(token) {
            values.push(f64::NAN);
            continue;
        }
        match token.parse::<f64>() {
            Ok(v) => values.push(v),
            Err(_) if position == 0 => log::debug!("skipping header token '{}'", token),
            Err(_) => {
                return Err(PortfolioError::InvalidInput(format!(
                    "'{}' is not a number (value {})",
                    token,
                    position + 1
                )))
            }
        }
    }
    Ok(values)
}

/// Parse a comma-separated vector such as `0.1,0.2,0.05`. Missing or infinite values are rejected.
pub fn parse_vector(text: &str) -> Result<Vec<f64>> {
    VALUE_SEPARATOR
        .split(text.trim())
        .filter(|t| !t.is_empty())
        .map(|token| match token.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(PortfolioError::InvalidInput(format!("'{}' is not a finite number", token))),
        })
        .collect()
}

/// Parse a matrix written as `;`-separated rows of comma-separated values,
/// e.g. `1,0;0,1`.
pub fn parse_matrix(text: &str) -> Result<Vec<Vec<f64>>> {
    text.split(';')
        .map(str::trim)
        .filter(|row| !row.is_empty())
        .map(parse_vector)
        .collect()
}

/// Simple returns `p_t / p_{t-1} − 1`. Pairs touching a missing or zero price
/// yield a missing return.
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|pair| {
            let (prev, next) = (pair[0], pair[1]);
            if prev.is_nan() || next.is_nan() || prev == 0.0 {
                f64::NAN
            } else {
                next / prev - 1.0
            }
        })
        .collect()
}
