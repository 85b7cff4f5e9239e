//! Application configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fxmm_engine::EngineConfig;

use crate::error::{AppError, AppResult};

/// Top-level application configuration, loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub main: MainConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub valuation: ValuationConfig,
}

/// Event-loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainConfig {
    /// Periodic timer interval driving stale-quote refresh and the stop
    /// timeline.
    #[serde(default = "default_timer_interval_ms")]
    pub timer_interval_ms: u64,
    /// Bound of the event channel.
    #[serde(default = "default_event_queue_depth")]
    pub event_queue_depth: usize,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            timer_interval_ms: default_timer_interval_ms(),
            event_queue_depth: default_event_queue_depth(),
        }
    }
}

/// Valuation of secondary-pair exposure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValuationConfig {
    /// Fixed cross rate used when no live cross book is available at
    /// gate activation. With neither, activation fails fatally.
    #[serde(default)]
    pub fallback_rate: Option<Decimal>,
}

impl AppConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read {path}: {e}")))?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.main.timer_interval_ms == 0 {
            return Err(AppError::Config(
                "main.timer_interval_ms must be positive".to_string(),
            ));
        }
        if self.main.event_queue_depth == 0 {
            return Err(AppError::Config(
                "main.event_queue_depth must be positive".to_string(),
            ));
        }
        self.engine.validate()?;
        Ok(())
    }
}

fn default_timer_interval_ms() -> u64 {
    250
}

fn default_event_queue_depth() -> usize {
    1_024
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.main.timer_interval_ms, 250);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.main.timer_interval_ms, 250);
        assert_eq!(cfg.main.event_queue_depth, 1_024);
        assert!(cfg.valuation.fallback_rate.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_sections() {
        let text = r#"
            [main]
            timer_interval_ms = 100

            [engine]
            use_pegging = true

            [valuation]
            fallback_rate = "1.25"
        "#;
        let cfg: AppConfig = toml::from_str(text).unwrap();
        assert_eq!(cfg.main.timer_interval_ms, 100);
        assert!(cfg.engine.use_pegging);
        assert_eq!(cfg.valuation.fallback_rate, Some(dec!(1.25)));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_timer() {
        let cfg: AppConfig = toml::from_str("[main]\ntimer_interval_ms = 0\n").unwrap();
        assert!(cfg.validate().is_err());
    }
}
