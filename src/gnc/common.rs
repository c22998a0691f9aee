//! Primitive entries shared by the GnuCash element types.
//!
//! Each primitive keeps what was parsed together with the parse error, if
//! any. Nothing is reported while parsing: the owning entry decides at
//! close time whether a missing or malformed primitive drops it.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{ToPrimitive, Zero};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::notice::NoticeCode;

/// Commodity namespace GnuCash uses for ISO 4217 currencies
pub const CURRENCY_SPACE: &str = "ISO4217";

/// Legacy currency namespace written by GnuCash 1.x
pub const LEGACY_CURRENCY_SPACE: &str = "CURRENCY";

/// Namespace of scheduled-transaction template commodities
pub const TEMPLATE_SPACE: &str = "template";

/// A recoverable validation failure found while finalizing an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalid {
    pub code: NoticeCode,
    /// Dedup key: the same structural problem collapses to one notice
    pub key: String,
    pub message: String,
}

impl Invalid {
    pub fn new(code: NoticeCode, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            key: key.into(),
            message: message.into(),
        }
    }

    /// A required child element was never seen
    pub fn missing(element: &str, owner: &str) -> Self {
        Self::new(
            NoticeCode::MissingElement,
            format!("{}:{}", NoticeCode::MissingElement.as_str(), element),
            format!("{} is missing the required element <{}>", owner, element),
        )
    }
}

/// Result of an entry's close-time validation
pub type Validation = Result<(), Invalid>;

// =============================================================================
// Identifier
// =============================================================================

/// Identifier element (`<act:id type="guid">...</act:id>`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdEntry {
    pub id: Option<String>,
    /// Value of the `type` attribute, normally `guid`
    pub id_type: Option<String>,
}

impl IdEntry {
    pub fn parse(text: &str, id_type: Option<String>) -> Self {
        let trimmed = text.trim();
        Self {
            id: (!trimmed.is_empty()).then(|| trimmed.to_string()),
            id_type,
        }
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// True if the id is a 32 digit hexadecimal GUID
    pub fn is_guid(&self) -> bool {
        self.id
            .as_deref()
            .map(|id| id.len() == 32 && uuid::Uuid::try_parse(id).is_ok())
            .unwrap_or(false)
    }

    /// Require a well-formed GUID, returning it
    pub fn require_guid(&self, element: &str, owner: &str) -> Result<&str, Invalid> {
        let Some(id) = self.id.as_deref() else {
            return Err(Invalid::missing(element, owner));
        };
        if !self.is_guid() {
            return Err(Invalid::new(
                NoticeCode::InvalidGuid,
                format!("{}:{}", NoticeCode::InvalidGuid.as_str(), element),
                format!("<{}> of {} is not a valid GUID: '{}'", element, owner, id),
            ));
        }
        Ok(id)
    }
}

// =============================================================================
// Integer
// =============================================================================

/// Integer element (`<act:commodity-scu>100</act:commodity-scu>`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntEntry {
    pub value: Option<i64>,
    pub error: Option<String>,
}

impl IntEntry {
    pub fn parse(text: &str) -> Self {
        match text.trim().parse::<i64>() {
            Ok(value) => Self {
                value: Some(value),
                error: None,
            },
            Err(e) => Self {
                value: None,
                error: Some(format!("'{}': {}", text.trim(), e)),
            },
        }
    }

    /// An absent integer is fine; a malformed one is not
    pub fn check(&self, element: &str) -> Validation {
        match &self.error {
            Some(error) => Err(Invalid::new(
                NoticeCode::InvalidInt,
                format!("{}:{}", NoticeCode::InvalidInt.as_str(), element),
                format!("<{}> is not a valid integer: {}", element, error),
            )),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Rational numeric
// =============================================================================

/// Why a numeric string was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumericError {
    Empty,
    NotAnInteger(String),
    ZeroDenominator,
}

impl fmt::Display for NumericError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty value"),
            Self::NotAnInteger(part) => write!(f, "'{}' is not an integer", part),
            Self::ZeroDenominator => write!(f, "denominator is zero"),
        }
    }
}

/// Parse a GnuCash numeric `N/D`. A bare integer `N` means `N/1`.
pub fn parse_rational(text: &str) -> Result<BigRational, NumericError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(NumericError::Empty);
    }
    let (num, den) = text.split_once('/').unwrap_or((text, "1"));
    let num = parse_bigint(num)?;
    let den = parse_bigint(den)?;
    if den.is_zero() {
        return Err(NumericError::ZeroDenominator);
    }
    Ok(BigRational::new(num, den))
}

fn parse_bigint(part: &str) -> Result<BigInt, NumericError> {
    let part = part.trim();
    // BigInt accepts a leading '+', GnuCash never writes one
    if part.starts_with('+') {
        return Err(NumericError::NotAnInteger(part.to_string()));
    }
    BigInt::from_str(part).map_err(|_| NumericError::NotAnInteger(part.to_string()))
}

/// Format a rational the way GnuCash writes it
pub fn format_rational(value: &BigRational) -> String {
    format!("{}/{}", value.numer(), value.denom())
}

/// Convert an exact rational to a decimal.
///
/// Denominators that are powers of ten convert exactly; anything else is
/// divided with `Decimal` precision. `None` when out of `Decimal` range.
pub fn rational_to_decimal(value: &BigRational) -> Option<Decimal> {
    let numer = value.numer().to_i128()?;
    let denom = value.denom().to_i128()?;
    if let Some(scale) = power_of_ten(denom) {
        if scale <= 28 {
            return Decimal::try_from_i128_with_scale(numer, scale).ok();
        }
    }
    let numer = Decimal::try_from_i128_with_scale(numer, 0).ok()?;
    let denom = Decimal::try_from_i128_with_scale(denom, 0).ok()?;
    numer.checked_div(denom)
}

fn power_of_ten(mut n: i128) -> Option<u32> {
    let mut scale = 0;
    while n > 1 && n % 10 == 0 {
        n /= 10;
        scale += 1;
    }
    (n == 1).then_some(scale)
}

/// Rational numeric element (`<split:value>10000/100</split:value>`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NumericEntry {
    pub value: Option<BigRational>,
    pub error: Option<NumericError>,
}

impl NumericEntry {
    pub fn parse(text: &str) -> Self {
        match parse_rational(text) {
            Ok(value) => Self {
                value: Some(value),
                error: None,
            },
            Err(error) => Self {
                value: None,
                error: Some(error),
            },
        }
    }

    pub fn from_parts(numer: i64, denom: i64) -> Self {
        Self {
            value: Some(BigRational::new(BigInt::from(numer), BigInt::from(denom))),
            error: None,
        }
    }

    /// Require a parsed value
    pub fn require(&self, element: &str, owner: &str) -> Result<&BigRational, Invalid> {
        if let Some(error) = &self.error {
            return Err(Invalid::new(
                NoticeCode::InvalidNumeric,
                format!("{}:{}", NoticeCode::InvalidNumeric.as_str(), element),
                format!("<{}> of {} is not a valid numeric: {}", element, owner, error),
            ));
        }
        self.value
            .as_ref()
            .ok_or_else(|| Invalid::missing(element, owner))
    }

    pub fn to_decimal(&self) -> Option<Decimal> {
        self.value.as_ref().and_then(rational_to_decimal)
    }
}

impl fmt::Display for NumericEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}", format_rational(value)),
            None => write!(f, "<invalid>"),
        }
    }
}

// =============================================================================
// Timestamp
// =============================================================================

/// Parse a GnuCash timestamp.
///
/// Supported formats:
/// - "YYYY-MM-DD HH:MM:SS +ZZZZ" (ts:date, all GnuCash versions)
/// - "YYYY-MM-DD HH:MM:SS" (taken as UTC)
/// - "YYYY-MM-DD" (gdate)
pub fn parse_timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| Utc.from_utc_datetime(&dt).fixed_offset())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| Utc.from_utc_datetime(&dt).fixed_offset())
        })
}

/// Timestamp element (`<price:time><ts:date>...</ts:date></price:time>`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub raw: Option<String>,
    pub value: Option<DateTime<FixedOffset>>,
}

impl TimeEntry {
    pub fn parse(text: &str) -> Self {
        let raw = text.trim().to_string();
        Self {
            value: parse_timestamp(&raw),
            raw: Some(raw),
        }
    }

    pub fn is_present(&self) -> bool {
        self.raw.is_some()
    }

    /// Calendar date in the timestamp's own offset
    pub fn date(&self) -> Option<NaiveDate> {
        self.value.map(|v| v.date_naive())
    }

    pub fn require(&self, element: &str, owner: &str) -> Result<NaiveDate, Invalid> {
        match (&self.raw, self.date()) {
            (_, Some(date)) => Ok(date),
            (None, None) => Err(Invalid::missing(element, owner)),
            (Some(raw), None) => Err(Invalid::new(
                NoticeCode::InvalidTime,
                format!("{}:{}", NoticeCode::InvalidTime.as_str(), element),
                format!("<{}> of {} is not a valid timestamp: '{}'", element, owner, raw),
            )),
        }
    }

    /// An absent timestamp is fine; a malformed one is not
    pub fn check(&self, element: &str, owner: &str) -> Validation {
        if self.is_present() {
            self.require(element, owner)?;
        }
        Ok(())
    }
}

// =============================================================================
// Commodity reference
// =============================================================================

/// Reference to a commodity by namespace and id
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommodityRef {
    pub space: Option<String>,
    pub id: Option<String>,
}

impl CommodityRef {
    pub fn new(space: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            space: Some(space.into()),
            id: Some(id.into()),
        }
    }

    pub fn is_present(&self) -> bool {
        self.space.is_some() || self.id.is_some()
    }

    pub fn is_currency(&self) -> bool {
        matches!(
            self.space.as_deref(),
            Some(CURRENCY_SPACE) | Some(LEGACY_CURRENCY_SPACE)
        )
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn require(&self, element: &str, owner: &str) -> Validation {
        if !self.is_present() {
            return Err(Invalid::missing(element, owner));
        }
        self.check(element, owner)
    }

    /// An absent reference is fine; a half-filled one is not
    pub fn check(&self, element: &str, owner: &str) -> Validation {
        if self.is_present() && (self.space.is_none() || self.id.is_none()) {
            return Err(Invalid::new(
                NoticeCode::InvalidCommodityRef,
                format!("{}:{}", NoticeCode::InvalidCommodityRef.as_str(), element),
                format!(
                    "<{}> of {} needs both <cmdty:space> and <cmdty:id>",
                    element, owner
                ),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for CommodityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.space.as_deref().unwrap_or("?"),
            self.id.as_deref().unwrap_or("?")
        )
    }
}

// =============================================================================
// Slots
// =============================================================================

/// Key/value metadata attached to accounts, transactions and splits
pub type Slots = BTreeMap<String, SlotValue>;

/// Value of a single slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SlotValue {
    /// Any scalar slot; `kind` is the `type` attribute (string, integer, gdate, ...)
    Scalar { kind: String, value: String },
    /// Nested frame of slots
    Frame { slots: Slots },
}

impl SlotValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar { value, .. } => Some(value.as_str()),
            Self::Frame { .. } => None,
        }
    }
}

/// String value of a slot, following `/` separated frame paths
pub fn slot_str<'a>(slots: &'a Slots, path: &str) -> Option<&'a str> {
    let (head, rest) = match path.split_once('/') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    match (slots.get(head)?, rest) {
        (value, None) => value.as_str(),
        (SlotValue::Frame { slots }, Some(rest)) => slot_str(slots, rest),
        (SlotValue::Scalar { .. }, Some(_)) => None,
    }
}

/// True if the slot holds the string "true"
pub fn slot_flag(slots: &Slots, path: &str) -> bool {
    slot_str(slots, path).map(|v| v.trim() == "true").unwrap_or(false)
}
