//! Instruments and the instrument registry.
//!
//! An instrument is anything an account can hold: a currency (fractional,
//! decimal quantities) or a stock (whole units). The quantity kind is fixed when
//! the instrument is registered; raw user input is converted through
//! [`Instrument::convert`] before it reaches the ledger or a book.

use std::collections::HashMap;
use std::fmt;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ConversionError, Error, Result};
use crate::types::Quantity;

/// Default number of decimal places for currencies.
pub const DEFAULT_CURRENCY_SCALE: u32 = 8;

/// Largest scale `Decimal` can carry.
pub const MAX_SCALE: u32 = 28;

/// Dense instrument index, assigned in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstrumentId(pub u32);

/// Instrument category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentType {
    Currency,
    Stock,
}

impl InstrumentType {
    /// Quantity representation used unless the configuration overrides it.
    pub fn default_quantity(self) -> QuantityKind {
        match self {
            InstrumentType::Currency => QuantityKind::Decimal {
                scale: DEFAULT_CURRENCY_SCALE,
            },
            InstrumentType::Stock => QuantityKind::Integer,
        }
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentType::Currency => f.write_str("currency"),
            InstrumentType::Stock => f.write_str("stock"),
        }
    }
}

/// How quantities of an instrument are represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantityKind {
    /// Fixed-point with `scale` decimal places.
    Decimal { scale: u32 },
    /// Whole units only.
    Integer,
}

impl QuantityKind {
    #[inline]
    pub fn scale(self) -> u32 {
        match self {
            QuantityKind::Decimal { scale } => scale,
            QuantityKind::Integer => 0,
        }
    }
}

/// Unconverted user input for a quantity.
#[derive(Debug, Clone, PartialEq)]
pub enum RawQuantity {
    Text(String),
    Integer(i64),
    Float(f64),
    Decimal(Decimal),
}

impl RawQuantity {
    fn to_decimal(&self) -> std::result::Result<Decimal, ConversionError> {
        match self {
            RawQuantity::Text(s) => Quantity::parse(s)
                .map(|q| q.as_decimal())
                .ok_or_else(|| ConversionError::Malformed(s.clone())),
            RawQuantity::Integer(i) => Ok(Decimal::from(*i)),
            RawQuantity::Float(f) => {
                if !f.is_finite() {
                    return Err(ConversionError::NonFinite(f.to_string()));
                }
                Decimal::from_f64(*f).ok_or_else(|| ConversionError::OutOfRange(f.to_string()))
            }
            RawQuantity::Decimal(d) => Ok(*d),
        }
    }
}

impl From<&str> for RawQuantity {
    fn from(value: &str) -> Self {
        RawQuantity::Text(value.to_string())
    }
}

impl From<String> for RawQuantity {
    fn from(value: String) -> Self {
        RawQuantity::Text(value)
    }
}

impl From<i64> for RawQuantity {
    fn from(value: i64) -> Self {
        RawQuantity::Integer(value)
    }
}

impl From<i32> for RawQuantity {
    fn from(value: i32) -> Self {
        RawQuantity::Integer(i64::from(value))
    }
}

impl From<u64> for RawQuantity {
    fn from(value: u64) -> Self {
        RawQuantity::Decimal(Decimal::from(value))
    }
}

impl From<f64> for RawQuantity {
    fn from(value: f64) -> Self {
        RawQuantity::Float(value)
    }
}

impl From<Decimal> for RawQuantity {
    fn from(value: Decimal) -> Self {
        RawQuantity::Decimal(value)
    }
}

impl From<Quantity> for RawQuantity {
    fn from(value: Quantity) -> Self {
        RawQuantity::Decimal(value.as_decimal())
    }
}

/// Immutable instrument descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instrument {
    pub id: InstrumentId,
    pub symbol: String,
    pub instrument_type: InstrumentType,
    pub quantity: QuantityKind,
}

impl Instrument {
    /// Convert raw input to a quantity of this instrument.
    ///
    /// Values are truncated toward zero to the instrument's scale. The sign is
    /// kept; callers decide whether zero or negative amounts are acceptable.
    ///
    /// ```
    /// use exchange_core::types::{InstrumentRegistry, InstrumentType, Quantity};
    ///
    /// let mut registry = InstrumentRegistry::new();
    /// registry.register("ACME", InstrumentType::Stock, None).unwrap();
    /// let acme = registry.for_type("ACME").unwrap();
    /// assert_eq!(acme.convert("12.9").unwrap(), Quantity::from(12u64));
    /// assert!(acme.convert("twelve").is_err());
    /// ```
    pub fn convert(
        &self,
        raw: impl Into<RawQuantity>,
    ) -> std::result::Result<Quantity, ConversionError> {
        let value = raw.into().to_decimal()?;
        Ok(Quantity::new(value).truncate(self.quantity.scale()))
    }
}

/// Symbol to instrument lookup. Built once at engine configuration time.
#[derive(Debug, Clone, Default)]
pub struct InstrumentRegistry {
    instruments: Vec<Instrument>,
    by_symbol: HashMap<String, InstrumentId>,
}

impl InstrumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instrument. `scale` overrides the default for currencies.
    pub fn register(
        &mut self,
        symbol: &str,
        instrument_type: InstrumentType,
        scale: Option<u32>,
    ) -> Result<InstrumentId> {
        if symbol.is_empty() || symbol.contains('/') || symbol.contains(char::is_whitespace) {
            return Err(Error::Config(format!("invalid instrument symbol {symbol:?}")));
        }
        if self.by_symbol.contains_key(symbol) {
            return Err(Error::Config(format!("duplicate instrument {symbol}")));
        }

        let quantity = match (instrument_type, scale) {
            (InstrumentType::Currency, Some(scale)) if scale > MAX_SCALE => {
                return Err(Error::Config(format!(
                    "scale {scale} for {symbol} exceeds {MAX_SCALE}"
                )));
            }
            (InstrumentType::Currency, Some(scale)) => QuantityKind::Decimal { scale },
            (InstrumentType::Stock, Some(_)) => {
                return Err(Error::Config(format!(
                    "stock {symbol} cannot have a decimal scale"
                )));
            }
            (kind, None) => kind.default_quantity(),
        };

        let id = InstrumentId(self.instruments.len() as u32);
        self.instruments.push(Instrument {
            id,
            symbol: symbol.to_string(),
            instrument_type,
            quantity,
        });
        self.by_symbol.insert(symbol.to_string(), id);
        Ok(id)
    }

    /// Resolve a symbol to its descriptor.
    pub fn for_type(&self, symbol: &str) -> Result<&Instrument> {
        self.by_symbol
            .get(symbol)
            .map(|id| &self.instruments[id.0 as usize])
            .ok_or_else(|| Error::UnknownInstrument(symbol.to_string()))
    }

    #[inline]
    pub fn get(&self, id: InstrumentId) -> Option<&Instrument> {
        self.instruments.get(id.0 as usize)
    }

    /// Symbol for an id, or `"?"` for ids this registry never issued.
    pub fn symbol(&self, id: InstrumentId) -> &str {
        self.get(id).map(|i| i.symbol.as_str()).unwrap_or("?")
    }

    /// Instruments in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> InstrumentRegistry {
        let mut r = InstrumentRegistry::new();
        r.register("BTC", InstrumentType::Currency, None).unwrap();
        r.register("USD", InstrumentType::Currency, Some(2)).unwrap();
        r.register("ACME", InstrumentType::Stock, None).unwrap();
        r
    }

    #[test]
    fn test_register_assigns_dense_ids() {
        let r = registry();
        assert_eq!(r.len(), 3);
        assert_eq!(r.for_type("BTC").unwrap().id, InstrumentId(0));
        assert_eq!(r.for_type("ACME").unwrap().id, InstrumentId(2));
        assert_eq!(r.symbol(InstrumentId(1)), "USD");
        assert_eq!(r.symbol(InstrumentId(9)), "?");
    }

    #[test]
    fn test_quantity_kinds() {
        let r = registry();
        assert_eq!(
            r.for_type("BTC").unwrap().quantity,
            QuantityKind::Decimal { scale: 8 }
        );
        assert_eq!(
            r.for_type("USD").unwrap().quantity,
            QuantityKind::Decimal { scale: 2 }
        );
        assert_eq!(r.for_type("ACME").unwrap().quantity, QuantityKind::Integer);
    }

    #[test]
    fn test_register_rejects_bad_input() {
        let mut r = registry();
        assert!(matches!(
            r.register("BTC", InstrumentType::Currency, None),
            Err(Error::Config(_))
        ));
        assert!(r.register("A/B", InstrumentType::Currency, None).is_err());
        assert!(r.register("", InstrumentType::Currency, None).is_err());
        assert!(r.register("EUR", InstrumentType::Currency, Some(29)).is_err());
        assert!(r.register("XYZ", InstrumentType::Stock, Some(2)).is_err());
    }

    #[test]
    fn test_unknown_symbol() {
        let r = registry();
        assert_eq!(
            r.for_type("DOGE").unwrap_err(),
            Error::UnknownInstrument("DOGE".into())
        );
    }

    #[test]
    fn test_convert_decimal_truncates_to_scale() {
        let r = registry();
        let usd = r.for_type("USD").unwrap();
        assert_eq!(usd.convert("10.129").unwrap(), Quantity::parse("10.12").unwrap());
        assert_eq!(usd.convert(3i64).unwrap(), Quantity::from(3u64));
        assert_eq!(usd.convert(0.5f64).unwrap(), Quantity::parse("0.5").unwrap());
        // sign is preserved, positivity is the caller's business
        assert_eq!(usd.convert("-1").unwrap(), Quantity::from(-1i64));
    }

    #[test]
    fn test_convert_integer_truncates() {
        let r = registry();
        let acme = r.for_type("ACME").unwrap();
        assert_eq!(acme.convert("41.99").unwrap(), Quantity::from(41u64));
        assert_eq!(acme.convert(2.7f64).unwrap(), Quantity::from(2u64));
    }

    #[test]
    fn test_convert_malformed() {
        let r = registry();
        let btc = r.for_type("BTC").unwrap();
        assert!(matches!(btc.convert("1.2.3"), Err(ConversionError::Malformed(_))));
        assert!(matches!(btc.convert(f64::NAN), Err(ConversionError::NonFinite(_))));
        assert!(matches!(
            btc.convert(f64::INFINITY),
            Err(ConversionError::NonFinite(_))
        ));
        assert!(matches!(btc.convert(1e40f64), Err(ConversionError::OutOfRange(_))));
    }
}
