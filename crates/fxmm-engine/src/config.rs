//! Engine configuration.
//!
//! Every per-band numeric parameter is configurable per instrument.
//! Loaded from TOML by the binary; `validate()` runs once at startup.

use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fxmm_core::{InstrKey, Pair, Qty, Tenor, MAX_BANDS};

use crate::error::{EngineError, EngineResult};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cover the whole position instead of only the excess over the limit.
    #[serde(default)]
    pub cover_whole_pos: bool,
    /// Apply inventory skew to both sides, not only the reducing side.
    #[serde(default)]
    pub skew_both_sides: bool,
    /// Force a band missing on one side to be missing on the other.
    #[serde(default)]
    pub symmetric_bands: bool,
    /// Prefer pegged covering orders over market orders.
    #[serde(default)]
    pub use_pegging: bool,
    /// Minimum interval between New quote submissions per slot.
    #[serde(default = "default_min_inter_quote_ms")]
    pub min_inter_quote_ms: i64,
    /// A slot empty longer than this since its last quote is re-quoted
    /// by the periodic timer.
    #[serde(default = "default_max_inter_quote_ms")]
    pub max_inter_quote_ms: i64,
    /// Quote-fill rounds before quoting winds down.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Soft request-rate limit; above it, price moves toward the inside
    /// keep the old price.
    #[serde(default = "default_max_reqs_per_sec")]
    pub max_reqs_per_sec: u32,
    /// VWAP manipulation-reduction coefficient in (0, 1].
    #[serde(default = "default_manip_red_coeff")]
    pub manip_red_coeff: Decimal,
    /// Apply the reduction to the top level only.
    #[serde(default = "default_manip_red_only_l1")]
    pub manip_red_only_l1: bool,
    /// Log intended orders without submitting them.
    #[serde(default)]
    pub dry_run: bool,
    /// Per-instrument settings.
    #[serde(default)]
    pub instruments: Vec<InstrConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cover_whole_pos: false,
            skew_both_sides: false,
            symmetric_bands: false,
            use_pegging: false,
            min_inter_quote_ms: default_min_inter_quote_ms(),
            max_inter_quote_ms: default_max_inter_quote_ms(),
            max_rounds: default_max_rounds(),
            max_reqs_per_sec: default_max_reqs_per_sec(),
            manip_red_coeff: default_manip_red_coeff(),
            manip_red_only_l1: default_manip_red_only_l1(),
            dry_run: false,
            instruments: Vec::new(),
        }
    }
}

/// Per-instrument quoting parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrConfig {
    pub tenor: Tenor,
    pub pair: Pair,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Number of quote bands per side.
    pub n_bands: usize,
    /// Target quantity per band (cumulative VWAP ladder).
    pub band_qtys: Vec<Qty>,
    /// Per-band markup subtracted from the bid / added to the ask.
    pub markups: Vec<Decimal>,
    /// Per-band hysteresis threshold; within it the old price is kept.
    pub resistances: Vec<Decimal>,
    /// Inventory-skew exponent (1 = linear).
    #[serde(default = "default_beta")]
    pub beta: Decimal,
    /// Maximum improvement over the own-side best price.
    pub max_improvement: Decimal,
    /// Position limit driving skew saturation and covering.
    pub pos_limit: Qty,
    /// Source-price sanity range.
    pub px_min: Decimal,
    pub px_max: Decimal,
    /// Price increment.
    pub px_step: Decimal,
    /// Hedge venue lot size for covering orders.
    pub hedge_lot: Qty,
    /// Optional UTC cutoff ("HH:MM:SS") after which the instrument is
    /// disabled and its orders cancelled.
    #[serde(default)]
    pub quote_until: Option<String>,
}

impl InstrConfig {
    #[inline]
    pub fn key(&self) -> InstrKey {
        InstrKey::new(self.tenor, self.pair)
    }

    /// Parsed `quote_until` cutoff.
    pub fn quote_until_time(&self) -> Option<NaiveTime> {
        self.quote_until
            .as_deref()
            .and_then(|s| NaiveTime::parse_from_str(s, "%H:%M:%S").ok())
    }

    fn validate(&self) -> EngineResult<()> {
        let key = self.key();
        if self.enabled && (self.n_bands == 0 || self.n_bands > MAX_BANDS) {
            return Err(EngineError::InvalidConfig(format!(
                "{key}: n_bands must be in 1..={MAX_BANDS}, got {}",
                self.n_bands
            )));
        }
        for (name, len) in [
            ("band_qtys", self.band_qtys.len()),
            ("markups", self.markups.len()),
            ("resistances", self.resistances.len()),
        ] {
            if len != self.n_bands {
                return Err(EngineError::InvalidConfig(format!(
                    "{key}: {name} has {len} entries, expected {}",
                    self.n_bands
                )));
            }
        }
        if self.px_step <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(format!(
                "{key}: px_step must be positive"
            )));
        }
        if self.px_min >= self.px_max {
            return Err(EngineError::InvalidConfig(format!(
                "{key}: px_min must be below px_max"
            )));
        }
        if !self.pos_limit.is_positive() {
            return Err(EngineError::InvalidConfig(format!(
                "{key}: pos_limit must be positive"
            )));
        }
        if self.quote_until.is_some() && self.quote_until_time().is_none() {
            return Err(EngineError::InvalidConfig(format!(
                "{key}: quote_until must be HH:MM:SS"
            )));
        }
        Ok(())
    }
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.min_inter_quote_ms < 0 || self.min_inter_quote_ms >= self.max_inter_quote_ms {
            return Err(EngineError::InvalidConfig(format!(
                "require 0 <= min_inter_quote_ms < max_inter_quote_ms, got {} / {}",
                self.min_inter_quote_ms, self.max_inter_quote_ms
            )));
        }
        if self.manip_red_coeff <= Decimal::ZERO || self.manip_red_coeff > Decimal::ONE {
            return Err(EngineError::InvalidConfig(format!(
                "manip_red_coeff must be in (0, 1], got {}",
                self.manip_red_coeff
            )));
        }
        let mut seen: Vec<InstrKey> = Vec::new();
        for instr in &self.instruments {
            let key = instr.key();
            if seen.contains(&key) {
                return Err(EngineError::InvalidConfig(format!(
                    "duplicate instrument {key}"
                )));
            }
            seen.push(key);
            instr.validate()?;
        }
        Ok(())
    }

    pub fn instrument(&self, key: InstrKey) -> Option<&InstrConfig> {
        self.instruments.iter().find(|i| i.key() == key)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_min_inter_quote_ms() -> i64 {
    100
}

fn default_max_inter_quote_ms() -> i64 {
    5_000
}

fn default_max_rounds() -> u32 {
    u32::MAX
}

fn default_max_reqs_per_sec() -> u32 {
    50
}

fn default_beta() -> Decimal {
    Decimal::ONE
}

fn default_manip_red_coeff() -> Decimal {
    Decimal::ONE
}

fn default_manip_red_only_l1() -> bool {
    true
}
