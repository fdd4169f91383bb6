// ===============================
// src/grid.rs
// ===============================
//
// Ladder definition per side (buy/sell):
// - spreads  : jarak tiap level dari reference price (fraction, 0.01 = 1%)
// - amounts  : bobot alokasi quote per level, dinormalisasi jadi fraction
//
// Raw input boleh berupa string "0.01, 0.02" atau list angka. Semua parsing
// dan normalisasi terjadi di sini; engine hanya membaca hasilnya.
//
use serde::{Deserialize, Serialize};

use crate::domain::{LevelId, PositionMode, Side};
use crate::error::{ControllerError, Result};

/// Raw user input for a spread or amount list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawLevels {
    Text(String),
    Values(Vec<f64>),
}

impl From<&str> for RawLevels {
    fn from(s: &str) -> Self { RawLevels::Text(s.to_string()) }
}

impl From<String> for RawLevels {
    fn from(s: String) -> Self { RawLevels::Text(s) }
}

impl From<Vec<f64>> for RawLevels {
    fn from(v: Vec<f64>) -> Self { RawLevels::Values(v) }
}

/// Two-entry container keyed by [`Side`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerSide<T> { pub buy: T, pub sell: T }

impl<T> PerSide<T> {
    pub fn get(&self, side: Side) -> &T {
        match side { Side::Buy => &self.buy, Side::Sell => &self.sell }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut T {
        match side { Side::Buy => &mut self.buy, Side::Sell => &mut self.sell }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelSpec {
    pub side: Side,
    pub index: usize,
    pub spread_fraction: f64,
    pub amount_fraction: f64,
}

impl LevelSpec {
    pub fn id(&self) -> LevelId { LevelId::new(self.side, self.index) }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
struct SideLadder {
    spreads: Vec<f64>,
    amount_fractions: Vec<f64>,
}

/// Parse a spread list. String form is comma separated floats.
pub fn parse_spreads(raw: &RawLevels) -> Result<Vec<f64>> {
    match raw {
        RawLevels::Values(v) => Ok(v.clone()),
        RawLevels::Text(s) => s
            .split(',')
            .map(|tok| {
                let tok = tok.trim();
                tok.parse::<f64>()
                    .map_err(|_| ControllerError::Parse(format!("spread '{tok}' is not a number")))
            })
            .collect(),
    }
}

/// Parse amount weights for one side. `None` means equal weighting.
/// String form is comma separated integers (percentages).
pub fn parse_amounts(raw: Option<&RawLevels>, spreads: &[f64], side: Side) -> Result<Vec<f64>> {
    let amounts = match raw {
        None => return Ok(vec![1.0; spreads.len()]),
        Some(RawLevels::Values(v)) => v.clone(),
        Some(RawLevels::Text(s)) => s
            .split(',')
            .map(|tok| {
                let tok = tok.trim();
                tok.parse::<i64>()
                    .map(|n| n as f64)
                    .map_err(|_| ControllerError::Parse(format!("amount '{tok}' is not an integer")))
            })
            .collect::<Result<Vec<_>>>()?,
    };
    if amounts.len() != spreads.len() {
        return Err(ControllerError::Validation(format!(
            "the number of {side}_amounts_pct ({}) must match the number of {side}_spreads ({})",
            amounts.len(),
            spreads.len()
        )));
    }
    Ok(amounts)
}

fn normalize_side(side: Side, weights: &[f64]) -> Result<Vec<f64>> {
    if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(ControllerError::Validation(format!("{side} amount weight {bad} must be finite and >= 0")));
    }
    if weights.is_empty() {
        return Ok(Vec::new());
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(ControllerError::Validation(format!("{side} amount weights sum to zero")));
    }
    if !total.is_finite() {
        return Err(ControllerError::Validation(format!("{side} amount weights overflow when summed")));
    }
    Ok(weights.iter().map(|w| w / total).collect())
}

/// Divide each side's weights by that side's total.
pub fn normalize(buy_amounts: &[f64], sell_amounts: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
    Ok((normalize_side(Side::Buy, buy_amounts)?, normalize_side(Side::Sell, sell_amounts)?))
}

fn validate_spreads(side: Side, spreads: &[f64]) -> Result<()> {
    match spreads.iter().find(|s| !s.is_finite() || **s < 0.0) {
        Some(bad) => Err(ControllerError::Validation(format!("{side} spread {bad} must be finite and >= 0"))),
        None => Ok(()),
    }
}

fn build_side(side: Side, spreads: &RawLevels, amounts: Option<&RawLevels>) -> Result<(Vec<f64>, Vec<f64>)> {
    let spreads = parse_spreads(spreads)?;
    validate_spreads(side, &spreads)?;
    let weights = parse_amounts(amounts, &spreads, side)?;
    Ok((spreads, weights))
}

/// Raw controller input, as read from env / user config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfigInput {
    pub controller_id: String,
    pub connector_name: String,
    pub trading_pair: String,
    pub total_quote_amount: f64,
    pub buy_spreads: RawLevels,
    pub buy_amounts_pct: Option<RawLevels>,
    pub sell_spreads: RawLevels,
    pub sell_amounts_pct: Option<RawLevels>,
    pub executor_refresh_seconds: u64,
    pub cooldown_seconds: u64,
    pub closed_executor_buffer_size: usize,
    pub leverage: u32,
    pub position_mode: String,
}

impl Default for GridConfigInput {
    fn default() -> Self {
        Self {
            controller_id: "grid_mm".into(),
            connector_name: "binance_perpetual".into(),
            trading_pair: "WLD-USDT".into(),
            total_quote_amount: 100.0,
            buy_spreads: "0.01, 0.02".into(),
            buy_amounts_pct: None,
            sell_spreads: "0.01,0.02".into(),
            sell_amounts_pct: None,
            executor_refresh_seconds: 60 * 5,
            cooldown_seconds: 15,
            closed_executor_buffer_size: 10,
            leverage: 20,
            position_mode: "HEDGE".into(),
        }
    }
}

/// Validated ladder plus controller scalars.
///
/// The ladder only changes through [`GridConfig::update_side`]; the
/// reconciliation engine reads it and never writes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridConfig {
    controller_id: String,
    connector_name: String,
    trading_pair: String,
    total_quote_amount: f64,
    executor_refresh_seconds: u64,
    cooldown_seconds: u64,
    /// Reserved for the executor storage layer; the engine's buffer uses its own constant.
    closed_executor_buffer_size: usize,
    leverage: u32,
    position_mode: PositionMode,
    ladders: PerSide<SideLadder>,
}

impl GridConfig {
    pub fn build(input: GridConfigInput) -> Result<Self> {
        if !input.total_quote_amount.is_finite() || input.total_quote_amount < 0.0 {
            return Err(ControllerError::Validation(format!(
                "total_quote_amount {} must be finite and >= 0",
                input.total_quote_amount
            )));
        }
        if input.closed_executor_buffer_size == 0 {
            return Err(ControllerError::Validation("closed_executor_buffer_size must be > 0".into()));
        }
        let position_mode = input.position_mode.parse::<PositionMode>()?;

        let (buy_spreads, buy_weights) = build_side(Side::Buy, &input.buy_spreads, input.buy_amounts_pct.as_ref())?;
        let (sell_spreads, sell_weights) =
            build_side(Side::Sell, &input.sell_spreads, input.sell_amounts_pct.as_ref())?;
        let (buy_fractions, sell_fractions) = normalize(&buy_weights, &sell_weights)?;

        Ok(Self {
            controller_id: input.controller_id,
            connector_name: input.connector_name,
            trading_pair: input.trading_pair,
            total_quote_amount: input.total_quote_amount,
            executor_refresh_seconds: input.executor_refresh_seconds,
            cooldown_seconds: input.cooldown_seconds,
            closed_executor_buffer_size: input.closed_executor_buffer_size,
            leverage: input.leverage,
            position_mode,
            ladders: PerSide {
                buy: SideLadder { spreads: buy_spreads, amount_fractions: buy_fractions },
                sell: SideLadder { spreads: sell_spreads, amount_fractions: sell_fractions },
            },
        })
    }

    /// Re-parse and re-normalize one side. On error nothing changes.
    pub fn update_side(&mut self, side: Side, new_spreads: RawLevels, new_amounts: Option<RawLevels>) -> Result<()> {
        let (spreads, weights) = build_side(side, &new_spreads, new_amounts.as_ref())?;
        let amount_fractions = normalize_side(side, &weights)?;
        *self.ladders.get_mut(side) = SideLadder { spreads, amount_fractions };
        Ok(())
    }

    pub fn controller_id(&self) -> &str { &self.controller_id }
    pub fn connector_name(&self) -> &str { &self.connector_name }
    pub fn trading_pair(&self) -> &str { &self.trading_pair }
    pub fn total_quote_amount(&self) -> f64 { self.total_quote_amount }
    pub fn executor_refresh_seconds(&self) -> u64 { self.executor_refresh_seconds }
    pub fn cooldown_seconds(&self) -> u64 { self.cooldown_seconds }
    pub fn closed_executor_buffer_size(&self) -> usize { self.closed_executor_buffer_size }
    pub fn leverage(&self) -> u32 { self.leverage }
    pub fn position_mode(&self) -> PositionMode { self.position_mode }

    pub fn spreads(&self, side: Side) -> &[f64] { &self.ladders.get(side).spreads }

    pub fn amount_fractions(&self, side: Side) -> &[f64] { &self.ladders.get(side).amount_fractions }

    pub fn level_count(&self, side: Side) -> usize { self.ladders.get(side).spreads.len() }

    /// Spreads and per-level quote amounts for one side.
    pub fn spreads_and_amounts_in_quote(&self, side: Side) -> (Vec<f64>, Vec<f64>) {
        let ladder = self.ladders.get(side);
        let amounts = ladder.amount_fractions.iter().map(|f| f * self.total_quote_amount).collect();
        (ladder.spreads.clone(), amounts)
    }

    pub fn level(&self, id: LevelId) -> Result<LevelSpec> {
        let ladder = self.ladders.get(id.side);
        match (ladder.spreads.get(id.index), ladder.amount_fractions.get(id.index)) {
            (Some(&spread_fraction), Some(&amount_fraction)) => Ok(LevelSpec {
                side: id.side,
                index: id.index,
                spread_fraction,
                amount_fraction,
            }),
            _ => Err(ControllerError::Index { side: id.side, index: id.index, len: ladder.spreads.len() }),
        }
    }

    pub fn levels(&self, side: Side) -> Vec<LevelSpec> {
        let ladder = self.ladders.get(side);
        ladder
            .spreads
            .iter()
            .zip(&ladder.amount_fractions)
            .enumerate()
            .map(|(index, (&spread_fraction, &amount_fraction))| LevelSpec {
                side,
                index,
                spread_fraction,
                amount_fraction,
            })
            .collect()
    }

    pub fn level_ids(&self, side: Side) -> Vec<LevelId> {
        (0..self.level_count(side)).map(|i| LevelId::new(side, i)).collect()
    }

    /// Buy levels first, then sell levels, each in index order.
    pub fn all_level_ids(&self) -> Vec<LevelId> {
        Side::ALL.iter().flat_map(|&side| self.level_ids(side)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    fn cfg(buy: &str, buy_amt: Option<&str>, sell: &str, sell_amt: Option<&str>) -> Result<GridConfig> {
        GridConfig::build(GridConfigInput {
            buy_spreads: buy.into(),
            buy_amounts_pct: buy_amt.map(Into::into),
            sell_spreads: sell.into(),
            sell_amounts_pct: sell_amt.map(Into::into),
            ..Default::default()
        })
    }

    #[test]
    fn parse_spreads_accepts_text_and_lists() {
        assert_eq!(parse_spreads(&"0.01, 0.02 ,0.5".into()).unwrap(), vec![0.01, 0.02, 0.5]);
        assert_eq!(parse_spreads(&vec![0.1, 0.2].into()).unwrap(), vec![0.1, 0.2]);
    }

    #[test]
    fn parse_spreads_rejects_non_numeric_tokens() {
        let err = parse_spreads(&"0.01, abc".into()).unwrap_err();
        assert!(matches!(err, ControllerError::Parse(_)));
    }

    #[test]
    fn parse_amounts_defaults_to_equal_weights() {
        assert_eq!(parse_amounts(None, &[0.01, 0.02, 0.03], Side::Buy).unwrap(), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn parse_amounts_requires_integers_in_text_form() {
        let err = parse_amounts(Some(&"50, 50.5".into()), &[0.01, 0.02], Side::Sell).unwrap_err();
        assert!(matches!(err, ControllerError::Parse(_)));
    }

    #[test]
    fn parse_amounts_length_must_match_spreads() {
        let err = parse_amounts(Some(&"50, 30, 20".into()), &[0.01, 0.02], Side::Buy).unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
    }

    #[test]
    fn normalize_makes_each_side_sum_to_one() {
        let (buy, sell) = normalize(&[50.0, 30.0, 20.0], &[1.0, 3.0]).unwrap();
        assert!((buy.iter().sum::<f64>() - 1.0).abs() < EPS);
        assert!((sell.iter().sum::<f64>() - 1.0).abs() < EPS);
        assert!((sell[1] - 0.75).abs() < EPS);
    }

    #[test]
    fn normalize_rejects_zero_sum() {
        let err = normalize(&[0.0, 0.0], &[1.0]).unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
    }

    #[test]
    fn normalize_rejects_weights_whose_sum_overflows() {
        let err = normalize(&[1.0], &[1e308, 1e308]).unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
    }

    #[test]
    fn empty_side_has_no_levels() {
        let c = GridConfig::build(GridConfigInput { sell_spreads: RawLevels::Values(Vec::new()), ..Default::default() }).unwrap();
        assert_eq!(c.level_count(Side::Sell), 0);
        assert_eq!(c.all_level_ids().len(), 2);
    }

    #[test]
    fn build_uses_equal_fractions_when_amounts_unset() {
        let c = cfg("0.01,0.02,0.03,0.04", None, "0.01", None).unwrap();
        for f in c.amount_fractions(Side::Buy) {
            assert!((f - 0.25).abs() < EPS);
        }
        assert_eq!(c.amount_fractions(Side::Sell), &[1.0]);
    }

    #[test]
    fn build_rejects_negative_spread_and_empty_buffer() {
        assert!(matches!(cfg("-0.01", None, "0.01", None), Err(ControllerError::Validation(_))));
        let err = GridConfig::build(GridConfigInput { closed_executor_buffer_size: 0, ..Default::default() });
        assert!(matches!(err, Err(ControllerError::Validation(_))));
    }

    #[test]
    fn quote_amounts_scale_with_total() {
        let c = cfg("0.01,0.02", Some("75,25"), "0.01", None).unwrap();
        let (spreads, amounts) = c.spreads_and_amounts_in_quote(Side::Buy);
        assert_eq!(spreads, vec![0.01, 0.02]);
        assert!((amounts[0] - 75.0).abs() < EPS);
        assert!((amounts[1] - 25.0).abs() < EPS);
    }

    #[test]
    fn update_side_touches_only_that_side() {
        let mut c = cfg("0.01,0.02", None, "0.01,0.02", Some("80,20")).unwrap();
        let sell_before = c.amount_fractions(Side::Sell).to_vec();

        c.update_side(Side::Buy, "0.005,0.01,0.015".into(), Some("1,1,2".into())).unwrap();

        assert_eq!(c.spreads(Side::Buy), &[0.005, 0.01, 0.015]);
        assert!((c.amount_fractions(Side::Buy)[2] - 0.5).abs() < EPS);
        assert_eq!(c.amount_fractions(Side::Sell), sell_before.as_slice());
        assert_eq!(c.executor_refresh_seconds(), 300);
    }

    #[test]
    fn update_side_without_amounts_resets_to_equal_weights() {
        let mut c = cfg("0.01,0.02", Some("90,10"), "0.01", None).unwrap();
        c.update_side(Side::Buy, vec![0.01, 0.02].into(), None).unwrap();
        assert_eq!(c.amount_fractions(Side::Buy), &[0.5, 0.5]);
    }

    #[test]
    fn failed_update_side_leaves_config_untouched() {
        let mut c = cfg("0.01,0.02", None, "0.01,0.02", None).unwrap();
        let before = c.clone();

        assert!(c.update_side(Side::Buy, "0.01,0.02,0.03".into(), Some("50,50".into())).is_err());
        assert!(c.update_side(Side::Sell, "0.01, abc".into(), None).is_err());
        assert!(c.update_side(Side::Sell, "0.01".into(), Some("0".into())).is_err());

        assert_eq!(c, before);
    }

    #[test]
    fn level_lookup_reports_out_of_range_index() {
        let c = cfg("0.01,0.02", None, "0.01", None).unwrap();
        let level = c.level(LevelId::new(Side::Buy, 1)).unwrap();
        assert_eq!(level.spread_fraction, 0.02);
        let err = c.level(LevelId::new(Side::Sell, 1)).unwrap_err();
        assert!(matches!(err, ControllerError::Index { len: 1, .. }));
    }
}
