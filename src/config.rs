//! Engine configuration.
//!
//! Everything has a sensible default so an engine can be built with
//! `EngineConfig::default()`; a JSON file can override any subset of fields.

use crate::domain::deal::SwapClientType;
use crate::error::{Result, SwapError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Per-currency settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyConfig {
    /// Number of smallest indivisible units per display unit.
    pub units_per_currency: u64,
    pub decimal_places: u32,
    /// Token contract address for token-network currencies.
    #[serde(default)]
    pub token_address: Option<String>,
    pub swap_client: SwapClientType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a taker waits for the maker to accept a swap request.
    pub swap_accept_timeout_ms: u64,
    /// How long either side waits for a swap to settle.
    pub swap_complete_timeout_ms: u64,
    /// How long a sanity swap initiator waits for the acknowledgement.
    pub sanity_swap_init_timeout_ms: u64,
    /// How long a sanity swap may stay unresolved.
    pub sanity_swap_complete_timeout_ms: u64,
    /// Poisson quantile used for the first-leg lock buffer.
    pub lock_buffer_quantile: f64,
    /// Blocks of lock expiration we tolerate losing between the taker's
    /// payment and its validation by the maker.
    pub lock_expiration_slippage: u64,
    /// Poll period of the recovery tracker.
    pub recovery_interval_ms: u64,
    pub currencies: BTreeMap<String, CurrencyConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut currencies = BTreeMap::new();
        for ticker in ["BTC", "LTC"] {
            currencies.insert(
                ticker.to_string(),
                CurrencyConfig {
                    units_per_currency: 1,
                    decimal_places: 8,
                    token_address: None,
                    swap_client: SwapClientType::Lnd,
                },
            );
        }
        for (ticker, token_address) in [
            ("WETH", "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
            ("DAI", "0x6B175474E89094C44Da98b954EedeAC495271d0F"),
        ] {
            currencies.insert(
                ticker.to_string(),
                CurrencyConfig {
                    units_per_currency: 10_u64.pow(10),
                    decimal_places: 18,
                    token_address: Some(token_address.to_string()),
                    swap_client: SwapClientType::Raiden,
                },
            );
        }

        Self {
            swap_accept_timeout_ms: 10_000,
            swap_complete_timeout_ms: 30_000,
            sanity_swap_init_timeout_ms: 3_000,
            sanity_swap_complete_timeout_ms: 10_000,
            lock_buffer_quantile: 0.9999,
            lock_expiration_slippage: 3,
            recovery_interval_ms: 300_000,
            currencies,
        }
    }
}

impl EngineConfig {
    /// Loads a configuration from a JSON file, filling missing fields with defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let config: EngineConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.lock_buffer_quantile > 0.0 && self.lock_buffer_quantile < 1.0) {
            return Err(SwapError::Config(format!(
                "lock_buffer_quantile must be in (0, 1), got {}",
                self.lock_buffer_quantile
            )));
        }
        if let Some((ticker, _)) = self
            .currencies
            .iter()
            .find(|(_, currency)| currency.units_per_currency == 0)
        {
            return Err(SwapError::Config(format!(
                "units_per_currency for {ticker} must be positive"
            )));
        }
        // Token-network resolve requests are checked against this address.
        if let Some((ticker, _)) = self.currencies.iter().find(|(_, currency)| {
            currency.swap_client == SwapClientType::Raiden && currency.token_address.is_none()
        }) {
            return Err(SwapError::Config(format!(
                "token_address for {ticker} is required"
            )));
        }
        Ok(())
    }

    pub fn currency(&self, ticker: &str) -> Option<&CurrencyConfig> {
        self.currencies.get(ticker)
    }

    pub fn units_per_currency(&self, ticker: &str) -> Option<u64> {
        self.currency(ticker).map(|c| c.units_per_currency)
    }

    pub fn token_address(&self, ticker: &str) -> Option<&str> {
        self.currency(ticker).and_then(|c| c.token_address.as_deref())
    }

    pub fn swap_accept_timeout(&self) -> Duration {
        Duration::from_millis(self.swap_accept_timeout_ms)
    }

    pub fn swap_complete_timeout(&self) -> Duration {
        Duration::from_millis(self.swap_complete_timeout_ms)
    }

    pub fn sanity_swap_init_timeout(&self) -> Duration {
        Duration::from_millis(self.sanity_swap_init_timeout_ms)
    }

    pub fn sanity_swap_complete_timeout(&self) -> Duration {
        Duration::from_millis(self.sanity_swap_complete_timeout_ms)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_interval_ms)
    }
}
