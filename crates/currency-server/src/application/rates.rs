//! Exchange rates and conversion.
//!
//! Every rate is the value of one unit of a currency expressed in the table's
//! base currency, so converting is `amount * rate(from) / rate(to)`.  The base
//! currency always has rate 1.  Currency codes are case-insensitive.

use std::collections::HashMap;

use thiserror::Error;

/// Rates shipped as defaults, against a `USD` base.
pub const DEFAULT_BASE_CURRENCY: &str = "USD";
pub const DEFAULT_RATES: &[(&str, f64)] = &[
    ("AUD", 0.66),
    ("CAD", 0.74),
    ("CHF", 1.13),
    ("EUR", 1.08),
    ("GBP", 1.27),
    ("JPY", 0.0067),
];

/// Source of exchange rates for the convert command.
#[cfg_attr(test, mockall::automock)]
pub trait ExchangeRates {
    /// Value of one unit of `currency` in the base currency, or `None` if the
    /// currency is unknown.
    fn rate(&self, currency: &str) -> Option<f64>;
}

/// Errors from building or using a rate table.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateError {
    #[error("unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("invalid rate {rate} for {currency}: rates must be finite and positive")]
    InvalidRate { currency: String, rate: f64 },

    #[error("invalid currency code {0:?}")]
    InvalidCode(String),

    #[error("converting {amount} {from} to {to} overflows")]
    OutOfRange { from: String, amount: f64, to: String },
}

/// Converts `amount` of `from` into `to`.
///
/// # Errors
///
/// Returns [`RateError::UnknownCurrency`] naming the first currency the rate
/// source does not know, and [`RateError::OutOfRange`] if the result is not
/// finite.
pub fn convert<R>(rates: &R, from: &str, amount: f64, to: &str) -> Result<f64, RateError>
where
    R: ExchangeRates + ?Sized,
{
    let from_rate = rates
        .rate(from)
        .ok_or_else(|| RateError::UnknownCurrency(from.to_string()))?;
    let to_rate = rates
        .rate(to)
        .ok_or_else(|| RateError::UnknownCurrency(to.to_string()))?;
    let value = amount * from_rate / to_rate;
    if !value.is_finite() {
        return Err(RateError::OutOfRange {
            from: from.to_string(),
            amount,
            to: to.to_string(),
        });
    }
    Ok(value)
}

/// In-memory rate table against a base currency.
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    base: String,
    rates: HashMap<String, f64>,
}

impl RateTable {
    /// Creates a table containing only `base` at rate 1.
    ///
    /// # Errors
    ///
    /// Returns [`RateError::InvalidCode`] if `base` is empty or contains
    /// whitespace.
    pub fn new(base: &str) -> Result<Self, RateError> {
        let base = normalize(base)?;
        let mut rates = HashMap::new();
        rates.insert(base.clone(), 1.0);
        Ok(Self { base, rates })
    }

    /// Adds or replaces the rate for `currency`.
    ///
    /// # Errors
    ///
    /// Returns [`RateError::InvalidRate`] for a non-finite or non-positive
    /// rate, or for any rate other than 1 on the base currency, and
    /// [`RateError::InvalidCode`] for an unusable code.
    pub fn insert(&mut self, currency: &str, rate: f64) -> Result<(), RateError> {
        let code = normalize(currency)?;
        let base_mismatch = code == self.base && rate != 1.0;
        if !rate.is_finite() || rate <= 0.0 || base_mismatch {
            return Err(RateError::InvalidRate {
                currency: code,
                rate,
            });
        }
        self.rates.insert(code, rate);
        Ok(())
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// All known currency codes, sorted.
    pub fn currencies(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.rates.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

impl Default for RateTable {
    fn default() -> Self {
        let mut rates: HashMap<String, f64> = DEFAULT_RATES
            .iter()
            .map(|(code, rate)| (code.to_string(), *rate))
            .collect();
        rates.insert(DEFAULT_BASE_CURRENCY.to_string(), 1.0);
        Self {
            base: DEFAULT_BASE_CURRENCY.to_string(),
            rates,
        }
    }
}

impl ExchangeRates for RateTable {
    fn rate(&self, currency: &str) -> Option<f64> {
        self.rates.get(&currency.to_ascii_uppercase()).copied()
    }
}

fn normalize(code: &str) -> Result<String, RateError> {
    if code.is_empty() || code.chars().any(char::is_whitespace) {
        return Err(RateError::InvalidCode(code.to_string()));
    }
    Ok(code.to_ascii_uppercase())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
