use crate::config::EngineConfig;
use crate::error::{Result, SwapError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

/// Currencies and amounts from the point of view of one side of a swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundOutboundAmounts {
    pub inbound_currency: String,
    pub inbound_amount: u64,
    pub inbound_units: u128,
    pub outbound_currency: String,
    pub outbound_amount: u64,
    pub outbound_units: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MakerTakerAmounts {
    pub maker_currency: String,
    pub maker_amount: u64,
    pub maker_units: u128,
    pub taker_currency: String,
    pub taker_amount: u64,
    pub taker_units: u128,
}

/// A price of zero or less, or `Decimal::MAX`, means the order takes any price.
pub fn is_market_price(price: Decimal) -> bool {
    price <= Decimal::ZERO || price == Decimal::MAX
}

/// Splits a `BASE/QUOTE` pair id.
pub fn split_pair_id(pair_id: &str) -> Result<(&str, &str)> {
    match pair_id.split_once('/') {
        Some((base, quote)) if !base.is_empty() && !quote.is_empty() && !quote.contains('/') => {
            Ok((base, quote))
        }
        _ => Err(SwapError::InvalidPairId(pair_id.to_string())),
    }
}

fn amount_to_units(config: &EngineConfig, currency: &str, amount: u64) -> Result<u128> {
    let units = config
        .units_per_currency(currency)
        .ok_or_else(|| SwapError::UnsupportedCurrency(currency.to_string()))?;
    Ok(u128::from(amount) * u128::from(units))
}

fn quote_amount(quantity: u64, price: Decimal, pair_id: &str) -> Result<u64> {
    if is_market_price(price) {
        return Ok(0);
    }
    Decimal::from(quantity)
        .checked_mul(price)
        .map(|total| total.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|total| total.to_u64())
        .ok_or_else(|| SwapError::AmountOverflow(pair_id.to_string()))
}

/// Calculates what the side holding an order with `is_buy` receives and pays
/// when `quantity` of the pair's base currency is traded at `price`.
///
/// The quote amount of a market order is unknown and reported as zero.
pub fn calculate_inbound_outbound_amounts(
    config: &EngineConfig,
    quantity: u64,
    price: Decimal,
    is_buy: bool,
    pair_id: &str,
) -> Result<InboundOutboundAmounts> {
    let (base_currency, quote_currency) = split_pair_id(pair_id)?;
    let base_amount = quantity;
    let quote_amount = quote_amount(quantity, price, pair_id)?;
    let base_units = amount_to_units(config, base_currency, base_amount)?;
    let quote_units = amount_to_units(config, quote_currency, quote_amount)?;

    let (inbound, outbound) = if is_buy {
        (
            (base_currency, base_amount, base_units),
            (quote_currency, quote_amount, quote_units),
        )
    } else {
        (
            (quote_currency, quote_amount, quote_units),
            (base_currency, base_amount, base_units),
        )
    };

    Ok(InboundOutboundAmounts {
        inbound_currency: inbound.0.to_string(),
        inbound_amount: inbound.1,
        inbound_units: inbound.2,
        outbound_currency: outbound.0.to_string(),
        outbound_amount: outbound.1,
        outbound_units: outbound.2,
    })
}

/// Same as [`calculate_inbound_outbound_amounts`] for the maker's order: the
/// maker receives the inbound side.
pub fn calculate_maker_taker_amounts(
    config: &EngineConfig,
    quantity: u64,
    price: Decimal,
    is_buy: bool,
    pair_id: &str,
) -> Result<MakerTakerAmounts> {
    let amounts = calculate_inbound_outbound_amounts(config, quantity, price, is_buy, pair_id)?;
    Ok(MakerTakerAmounts {
        maker_currency: amounts.inbound_currency,
        maker_amount: amounts.inbound_amount,
        maker_units: amounts.inbound_units,
        taker_currency: amounts.outbound_currency,
        taker_amount: amounts.outbound_amount,
        taker_units: amounts.outbound_units,
    })
}
