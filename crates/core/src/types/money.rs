//! Money in integer minor units.
//!
//! All stored amounts (`subtotal`, `total`, `refund_amount`, unit prices) are
//! `i64` counts of the currency's smallest unit, matching what the payment
//! provider expects. Decimal conversion only happens at the display edge.

use core::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// ISO 4217 currency codes accepted at checkout.
///
/// Serialized lowercase, which is the form the payment provider uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyCode {
    #[default]
    Usd,
    Eur,
    Gbp,
    Cad,
    Aud,
}

/// Error returned when parsing an unsupported currency code.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported currency: {0}")]
pub struct UnknownCurrency(pub String);

impl CurrencyCode {
    /// Lowercase ISO code (`usd`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Usd => "usd",
            Self::Eur => "eur",
            Self::Gbp => "gbp",
            Self::Cad => "cad",
            Self::Aud => "aud",
        }
    }

    /// Display symbol.
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Usd | Self::Cad | Self::Aud => "$",
            Self::Eur => "€",
            Self::Gbp => "£",
        }
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CurrencyCode {
    type Err = UnknownCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "usd" => Ok(Self::Usd),
            "eur" => Ok(Self::Eur),
            "gbp" => Ok(Self::Gbp),
            "cad" => Ok(Self::Cad),
            "aud" => Ok(Self::Aud),
            _ => Err(UnknownCurrency(s.to_owned())),
        }
    }
}

/// An amount of money in minor units with its currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the currency's smallest unit (cents for USD).
    pub cents: i64,
    /// Currency of the amount.
    pub currency: CurrencyCode,
}

impl Money {
    /// Create an amount from minor units.
    #[must_use]
    pub const fn from_cents(cents: i64, currency: CurrencyCode) -> Self {
        Self { cents, currency }
    }

    /// Zero in the given currency.
    #[must_use]
    pub const fn zero(currency: CurrencyCode) -> Self {
        Self { cents: 0, currency }
    }

    /// Amount in the currency's standard unit (dollars, not cents).
    #[must_use]
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.cents, 2)
    }

    /// Add two amounts of the same currency, `None` on overflow or mismatch.
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        if self.currency != other.currency {
            return None;
        }
        self.cents
            .checked_add(other.cents)
            .map(|cents| Self::from_cents(cents, self.currency))
    }

    /// Multiply by a quantity, `None` on overflow.
    #[must_use]
    pub fn checked_mul(self, quantity: i64) -> Option<Self> {
        self.cents
            .checked_mul(quantity)
            .map(|cents| Self::from_cents(cents, self.currency))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = Decimal::new(self.cents.saturating_abs(), 2);
        write!(f, "{sign}{}{abs:.2}", self.currency.symbol())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats_minor_units() {
        assert_eq!(Money::from_cents(1999, CurrencyCode::Usd).to_string(), "$19.99");
        assert_eq!(Money::from_cents(5, CurrencyCode::Gbp).to_string(), "£0.05");
        assert_eq!(Money::from_cents(-250, CurrencyCode::Eur).to_string(), "-€2.50");
    }

    #[test]
    fn test_checked_add_rejects_currency_mismatch() {
        let usd = Money::from_cents(100, CurrencyCode::Usd);
        let eur = Money::from_cents(100, CurrencyCode::Eur);
        assert!(usd.checked_add(eur).is_none());
        assert_eq!(usd.checked_add(usd).unwrap().cents, 200);
    }

    #[test]
    fn test_checked_mul_overflow() {
        let big = Money::from_cents(i64::MAX, CurrencyCode::Usd);
        assert!(big.checked_mul(2).is_none());
        assert_eq!(Money::from_cents(250, CurrencyCode::Usd).checked_mul(3).unwrap().cents, 750);
    }

    #[test]
    fn test_currency_parse_is_case_insensitive() {
        assert_eq!("USD".parse::<CurrencyCode>().unwrap(), CurrencyCode::Usd);
        assert_eq!("gbp".parse::<CurrencyCode>().unwrap(), CurrencyCode::Gbp);
        assert!("btc".parse::<CurrencyCode>().is_err());
    }

    #[test]
    fn test_to_decimal() {
        let money = Money::from_cents(12345, CurrencyCode::Usd);
        assert_eq!(money.to_decimal().to_string(), "123.45");
    }
}
