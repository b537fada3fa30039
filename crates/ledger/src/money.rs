use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Neg, Sub},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::LedgerError;

/// Signed monetary amount represented as **integer cents**.
///
/// Every total the ledger keeps (transaction amounts, monthly income and
/// expenses, the wallet balance) is an `Amount`, so repeated additions never
/// drift the way binary floating point does. On the wire and in storage an
/// amount is decimal text.
///
/// # Examples
///
/// ```rust
/// use ledger::Amount;
///
/// let amount = Amount::new(12_34);
/// assert_eq!(amount.cents(), 1234);
/// assert_eq!(amount.to_string(), "12.34");
/// ```
///
/// Parsing stored or user supplied text (accepts `.` or `,` as decimal
/// separator; rejects more than 2 decimals):
///
/// ```rust
/// use ledger::Amount;
///
/// assert_eq!("10".parse::<Amount>().unwrap().cents(), 1000);
/// assert_eq!("50.0".parse::<Amount>().unwrap().cents(), 5000);
/// assert!("12.345".parse::<Amount>().is_err());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Creates a new amount from integer cents.
    #[must_use]
    pub const fn new(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the raw value in cents.
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Returns `true` if the amount is positive.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Checked addition (returns `None` on overflow).
    #[must_use]
    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    /// Reads amount text written by any client of the store.
    ///
    /// Beyond what [`FromStr`] accepts, this takes any number of fraction
    /// digits and float notation (`"0.30000000000000004"`, `"1e2"`), rounded
    /// half away from zero to cents. `None` when the text is not a finite
    /// number or does not fit.
    ///
    /// ```rust
    /// use ledger::Amount;
    ///
    /// assert_eq!(Amount::parse_lenient("0.30000000000000004"), Some(Amount::new(30)));
    /// assert_eq!(Amount::parse_lenient("-2.675"), Some(Amount::new(-268)));
    /// assert_eq!(Amount::parse_lenient("NaN"), None);
    /// ```
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Option<Amount> {
        if let Some(text) = DecimalText::split(raw) {
            return text.rounded();
        }
        let value = raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
        let cents = (value * 100.0).round();
        // Strictly inside the i64 range; the cast below cannot saturate.
        (cents.abs() < 9.0e18).then(|| Amount(cents as i64))
    }

    /// Parses a stored total, treating unreadable text as zero.
    ///
    /// Aggregates are derived data: a corrupt value is logged and replaced by
    /// zero so the next update rewrites it instead of failing forever.
    pub(crate) fn parse_stored(raw: &str, field: &str) -> Amount {
        Amount::parse_lenient(raw).unwrap_or_else(|| {
            tracing::warn!(field, raw, "unreadable stored total, resetting to zero");
            Amount::ZERO
        })
    }
}

/// Plain decimal text: optional sign, digits, optional `.`/`,` and fraction
/// digits.
struct DecimalText<'a> {
    negative: bool,
    units: &'a str,
    fraction: &'a str,
}

impl<'a> DecimalText<'a> {
    fn split(raw: &'a str) -> Option<Self> {
        let trimmed = raw.trim();
        let (negative, rest) = match trimmed.as_bytes().first()? {
            b'-' => (true, trimmed[1..].trim_start()),
            b'+' => (false, trimmed[1..].trim_start()),
            _ => (false, trimmed),
        };
        let (units, fraction) = rest.split_once(['.', ',']).unwrap_or((rest, ""));

        let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        (!units.is_empty() && digits(units) && digits(fraction)).then_some(Self {
            negative,
            units,
            fraction,
        })
    }

    /// Cents, with any digits past the second rounded half away from zero.
    fn rounded(&self) -> Option<Amount> {
        let mut digits = self.fraction.bytes().map(|b| i64::from(b - b'0'));
        let tenths = digits.next().unwrap_or(0);
        let hundredths = digits.next().unwrap_or(0);
        let carry = i64::from(digits.next().is_some_and(|d| d >= 5));

        let cents = self
            .units
            .parse::<i64>()
            .ok()?
            .checked_mul(100)?
            .checked_add(tenths * 10 + hundredths + carry)?;
        if self.negative {
            cents.checked_neg().map(Amount)
        } else {
            Some(Amount(cents))
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let units = abs / 100;
        let cents = abs % 100;
        write!(f, "{sign}{units}.{cents:02}")
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 += rhs.0;
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Self::Output {
        Amount(-self.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, Add::add)
    }
}

impl FromStr for Amount {
    type Err = LedgerError;

    /// Parses user supplied decimal text with at most two fraction digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = DecimalText::split(s)
            .ok_or_else(|| LedgerError::InvalidTransaction(format!("invalid amount: {s:?}")))?;
        if text.fraction.len() > 2 {
            return Err(LedgerError::InvalidTransaction(format!(
                "too many decimals in amount {s:?}"
            )));
        }
        text.rounded()
            .ok_or_else(|| LedgerError::InvalidTransaction("amount too large".to_string()))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
