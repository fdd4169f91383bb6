// ===============================
// src/pricing.rs
// ===============================
use crate::domain::{LevelId, ProcessedMarketData};
use crate::error::{ControllerError, Result};
use crate::grid::GridConfig;

/// Limit price and base-asset amount for one level.
///
/// Pure: reads the config and a copied market snapshot only.
///   price       = reference * (1 + sign(side) * spread * multiplier)
///   base_amount = fraction * total_quote / price
pub fn resolve(level_id: LevelId, config: &GridConfig, market: &ProcessedMarketData) -> Result<(f64, f64)> {
    let level = config.level(level_id)?;
    let quote_amount = level.amount_fraction * config.total_quote_amount();
    let effective_spread = level.spread_fraction * market.spread_multiplier;
    let price = market.reference_price * (1.0 + level_id.side.sign() * effective_spread);

    if price.is_nan() || price <= 0.0 {
        return Err(ControllerError::Domain { level_id: level_id.to_string(), price });
    }
    Ok((price, quote_amount / price))
}
