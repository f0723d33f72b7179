//! Engine and demo configuration, loaded from TOML.
//!
//! ```toml
//! markets = ["BTC/USD", "ACME/USD"]
//!
//! [[instruments]]
//! symbol = "BTC"
//! kind = "currency"
//!
//! [[instruments]]
//! symbol = "USD"
//! kind = "currency"
//! scale = 2
//!
//! [[instruments]]
//! symbol = "ACME"
//! kind = "stock"
//! ```
//!
//! Leaving `markets` out derives them: every stock quoted in every currency,
//! and each currency quoted in every currency declared after it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::InstrumentType;

/// One instrument to register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub symbol: String,
    pub kind: InstrumentType,
    /// Decimal places; currencies only, default 8
    #[serde(default)]
    pub scale: Option<u32>,
}

impl InstrumentConfig {
    pub fn currency(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind: InstrumentType::Currency,
            scale: None,
        }
    }

    pub fn stock(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind: InstrumentType::Stock,
            scale: None,
        }
    }
}

/// Instruments and markets an engine is built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub instruments: Vec<InstrumentConfig>,
    /// Pair symbols such as `"BTC/USD"`; derived when empty
    #[serde(default)]
    pub markets: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instruments: vec![
                InstrumentConfig::currency("BTC"),
                InstrumentConfig::currency("USD"),
            ],
            markets: vec!["BTC/USD".to_string()],
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Markets to open: the configured list, or the derived one.
    pub fn market_symbols(&self) -> Vec<String> {
        if !self.markets.is_empty() {
            return self.markets.clone();
        }

        let currencies: Vec<&str> = self
            .instruments
            .iter()
            .filter(|i| i.kind == InstrumentType::Currency)
            .map(|i| i.symbol.as_str())
            .collect();

        let mut markets = Vec::new();
        for stock in self
            .instruments
            .iter()
            .filter(|i| i.kind == InstrumentType::Stock)
        {
            for currency in &currencies {
                markets.push(format!("{}/{currency}", stock.symbol));
            }
        }
        for (idx, base) in currencies.iter().enumerate() {
            for quote in &currencies[idx + 1..] {
                markets.push(format!("{base}/{quote}"));
            }
        }
        markets
    }
}

/// Parameters of the demo workload run by the binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub engine: EngineConfig,
    /// Accounts to open
    pub accounts: usize,
    /// Random commands to issue after funding
    pub operations: usize,
    /// Worker threads issuing commands
    pub workers: usize,
    pub seed: u64,
    /// Lowest limit price, in whole quote units
    pub min_price: u64,
    /// Highest limit price, in whole quote units
    pub max_price: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            accounts: 10_001,
            operations: 100_000,
            workers: 8,
            seed: 42,
            min_price: 700,
            max_price: 900,
        }
    }
}

impl DemoConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let config: Self = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.min_price == 0 || self.min_price > self.max_price {
            return Err(Error::Config(format!(
                "price band {}..={} is empty or not positive",
                self.min_price, self.max_price
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_btc_usd() {
        let config = EngineConfig::default();
        assert_eq!(config.market_symbols(), vec!["BTC/USD".to_string()]);
    }

    #[test]
    fn test_parse_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            markets = ["ACME/USD"]

            [[instruments]]
            symbol = "USD"
            kind = "currency"
            scale = 2

            [[instruments]]
            symbol = "ACME"
            kind = "stock"
            "#,
        )
        .unwrap();

        assert_eq!(config.instruments.len(), 2);
        assert_eq!(config.instruments[0].scale, Some(2));
        assert_eq!(config.instruments[1].kind, InstrumentType::Stock);
        assert_eq!(config.market_symbols(), vec!["ACME/USD".to_string()]);
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        let err = EngineConfig::from_toml_str(
            r#"
            [[instruments]]
            symbol = "X"
            kind = "bond"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_derived_markets() {
        let config = EngineConfig {
            instruments: vec![
                InstrumentConfig::currency("BTC"),
                InstrumentConfig::stock("ACME"),
                InstrumentConfig::currency("USD"),
                InstrumentConfig::currency("EUR"),
            ],
            markets: Vec::new(),
        };
        assert_eq!(
            config.market_symbols(),
            vec!["ACME/BTC", "ACME/USD", "ACME/EUR", "BTC/USD", "BTC/EUR", "USD/EUR"]
        );
    }

    #[test]
    fn test_demo_defaults() {
        let demo = DemoConfig::default();
        assert_eq!(demo.accounts, 10_001);
        assert_eq!(demo.operations, 100_000);
        assert!(demo.validate().is_ok());

        let bad = DemoConfig {
            min_price: 10,
            max_price: 5,
            ..DemoConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
