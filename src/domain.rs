// ===============================
// src/domain.rs
// ===============================
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::ControllerError;

/// Wall clock in unix milliseconds. Dibaca sekali per cycle oleh caller.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Config seconds to milliseconds, clamped to `i64::MAX` instead of wrapping.
pub fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs).ok().and_then(|s| s.checked_mul(1_000)).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side { Buy, Sell }

impl Side {
    pub const ALL: [Side; 2] = [Side::Buy, Side::Sell];

    /// Buy levels sit below the reference price, sell levels above.
    pub fn sign(&self) -> f64 { match self { Side::Buy => -1.0, Side::Sell => 1.0 } }

    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "buy", Side::Sell => "sell" } }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Side {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(ControllerError::Parse(format!("unknown side '{other}'"))),
        }
    }
}

/// One rung of the ladder, serialized as `"{side}_{index}"` (e.g. `buy_0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct LevelId { pub side: Side, pub index: usize }

impl LevelId {
    pub fn new(side: Side, index: usize) -> Self { Self { side, index } }
}

impl fmt::Display for LevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.side, self.index)
    }
}

impl FromStr for LevelId {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (side, index) = s
            .split_once('_')
            .ok_or_else(|| ControllerError::Parse(format!("malformed level id '{s}'")))?;
        let side = side.parse::<Side>()?;
        let index = index
            .parse::<usize>()
            .map_err(|_| ControllerError::Parse(format!("malformed level index in '{s}'")))?;
        Ok(Self { side, index })
    }
}

impl From<LevelId> for String {
    fn from(id: LevelId) -> Self { id.to_string() }
}

impl TryFrom<String> for LevelId {
    type Error = ControllerError;
    fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionMode { Hedge, Oneway }

impl FromStr for PositionMode {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HEDGE" => Ok(PositionMode::Hedge),
            "ONEWAY" => Ok(PositionMode::Oneway),
            other => Err(ControllerError::Validation(format!(
                "invalid position mode: {other}. Valid options are: HEDGE, ONEWAY"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceType { MidPrice, BestBid, BestAsk }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorStatus { NotStarted, Active, Trading, ShuttingDown, Terminated }

/// Read-only snapshot of one executor, owned by the executor registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub id: String,
    /// `None` for executors without a direction (never bound to a ladder side).
    pub side: Option<Side>,
    pub status: ExecutorStatus,
    pub is_active: bool,
    pub is_trading: bool,
    pub created_at_ms: i64,
    pub closed_at_ms: Option<i64>,
    #[serde(default)]
    pub custom_info: BTreeMap<String, serde_json::Value>,
}

impl ExecutorInfo {
    /// Level the executor is bound to, read from `custom_info["level_id"]`.
    pub fn level_id(&self) -> Option<LevelId> {
        self.custom_info
            .get("level_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }

    pub fn is_terminated(&self) -> bool { self.status == ExecutorStatus::Terminated }

    pub fn age_ms(&self, now_ms: i64) -> i64 { now_ms.saturating_sub(self.created_at_ms) }
}

/// Exit barriers attached to a position-style executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TripleBarrier {
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub time_limit_secs: Option<u64>,
}

/// What an executor should do for one level; built by the strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub timestamp_ms: i64,
    pub level_id: LevelId,
    pub connector_name: String,
    pub trading_pair: String,
    pub side: Side,
    pub entry_price: f64,
    pub amount: f64,
    pub leverage: u32,
    pub position_mode: PositionMode,
    pub triple_barrier: TripleBarrier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    CreateExecutor { controller_id: String, executor_config: ExecutorConfig },
    StopExecutor { executor_id: String },
}

impl Action {
    pub fn stop(executor_id: impl Into<String>) -> Self {
        Action::StopExecutor { executor_id: executor_id.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::CreateExecutor { .. } => "create",
            Action::StopExecutor { .. } => "stop",
        }
    }
}

/// Per-cycle market snapshot; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessedMarketData { pub reference_price: f64, pub spread_multiplier: f64 }

// Recorder events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Market { ts_ms: i64, data: ProcessedMarketData },
    Action { ts_ms: i64, action: Action },
    Stored(ExecutorInfo),
    Note(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_id_round_trips_through_its_string_form() {
        let id = LevelId::new(Side::Sell, 3);
        assert_eq!(id.to_string(), "sell_3");
        assert_eq!("sell_3".parse::<LevelId>().unwrap(), id);
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"sell_3\"");
    }

    #[test]
    fn malformed_level_ids_are_parse_errors() {
        for bad in ["buy", "hold_1", "buy_x", "buy_-1", ""] {
            assert!(
                matches!(bad.parse::<LevelId>(), Err(ControllerError::Parse(_))),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn side_sign_puts_buys_below_reference() {
        assert_eq!(Side::Buy.sign(), -1.0);
        assert_eq!(Side::Sell.sign(), 1.0);
    }

    #[test]
    fn position_mode_is_case_insensitive() {
        assert_eq!("hedge".parse::<PositionMode>().unwrap(), PositionMode::Hedge);
        assert_eq!(" OneWay ".parse::<PositionMode>().unwrap(), PositionMode::Oneway);
        assert!(matches!("cross".parse::<PositionMode>(), Err(ControllerError::Validation(_))));
    }

    #[test]
    fn executor_level_id_comes_from_custom_info() {
        let mut info = ExecutorInfo {
            id: "ex-1".into(),
            side: Some(Side::Buy),
            status: ExecutorStatus::Active,
            is_active: true,
            is_trading: false,
            created_at_ms: 1_000,
            closed_at_ms: None,
            custom_info: BTreeMap::new(),
        };
        assert_eq!(info.level_id(), None);
        info.custom_info.insert("level_id".into(), serde_json::json!("buy_1"));
        assert_eq!(info.level_id(), Some(LevelId::new(Side::Buy, 1)));
        assert_eq!(info.age_ms(4_000), 3_000);

        // snapshot timestamps are external input
        info.created_at_ms = i64::MIN;
        assert_eq!(info.age_ms(1), i64::MAX);
    }

    #[test]
    fn seconds_beyond_i64_clamp_instead_of_wrapping() {
        assert_eq!(secs_to_ms(300), 300_000);
        assert_eq!(secs_to_ms(u64::MAX), i64::MAX);
        assert_eq!(secs_to_ms(i64::MAX as u64), i64::MAX);
    }
}
