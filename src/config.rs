use anyhow::{Context, bail};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::money::{MINOR_UNITS, deserialize_amount};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL for the ledger store
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub limits: LimitConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Transfer ceilings, in account currency units
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LimitConfig {
    #[serde(deserialize_with = "deserialize_amount")]
    pub per_transaction_max: Decimal,
    #[serde(deserialize_with = "deserialize_amount")]
    pub daily_max: Decimal,
    #[serde(deserialize_with = "deserialize_amount")]
    pub monthly_max: Decimal,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            per_transaction_max: Decimal::from(10_000),
            daily_max: Decimal::from(20_000),
            monthly_max: Decimal::from(100_000),
        }
    }
}

/// Transfer coordinator tuning
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TransferConfig {
    /// Extra attempts after a store conflict
    pub max_conflict_retries: u32,
    /// Backoff step; attempt `n` waits `n * retry_backoff_ms`
    pub retry_backoff_ms: u64,
    /// Upper bound on one audit write
    pub audit_timeout_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            retry_backoff_ms: 10,
            audit_timeout_ms: 500,
        }
    }
}

impl TransferConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(attempt as u64))
    }

    pub fn audit_timeout(&self) -> Duration {
        Duration::from_millis(self.audit_timeout_ms)
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid config file: {}", config_path))
    }

    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(content).context("Failed to parse config yaml")?;
        config.validate()?;
        Ok(config)
    }

    /// Limits must be positive and nested: per-transaction ≤ daily ≤ monthly
    pub fn validate(&self) -> anyhow::Result<()> {
        let l = &self.limits;
        if l.per_transaction_max <= Decimal::ZERO
            || l.daily_max <= Decimal::ZERO
            || l.monthly_max <= Decimal::ZERO
        {
            bail!("limits must be positive: {:?}", l);
        }
        if l.per_transaction_max > l.daily_max {
            bail!(
                "per_transaction_max {} exceeds daily_max {}",
                l.per_transaction_max,
                l.daily_max
            );
        }
        if l.daily_max > l.monthly_max {
            bail!(
                "daily_max {} exceeds monthly_max {}",
                l.daily_max,
                l.monthly_max
            );
        }
        for (name, value) in [
            ("per_transaction_max", l.per_transaction_max),
            ("daily_max", l.daily_max),
            ("monthly_max", l.monthly_max),
        ] {
            if value.normalize().scale() > MINOR_UNITS {
                bail!("{} {} has more than {} decimal places", name, value, MINOR_UNITS);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const BASE: &str = r#"
log_level: info
log_dir: ./logs
log_file: ledger.log
use_json: false
rotation: daily
"#;

    fn limits_yaml(per_transaction: &str, daily: &str, monthly: &str) -> String {
        format!(
            "{}limits:\n  per_transaction_max: '{}'\n  daily_max: '{}'\n  monthly_max: '{}'\n",
            BASE, per_transaction, daily, monthly
        )
    }

    #[test]
    fn test_defaults_apply() {
        let config = AppConfig::from_yaml_str(BASE).unwrap();
        assert_eq!(config.limits, LimitConfig::default());
        assert_eq!(config.transfer.max_conflict_retries, 3);
        assert!(config.postgres_url.is_none());
        assert_eq!(config.transfer.backoff(3), Duration::from_millis(30));
    }

    #[test]
    fn test_limits_from_strings() {
        let yaml = limits_yaml("500.00", "1000", "3000.50");
        let config = AppConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.limits.per_transaction_max, dec!(500.00));
        assert_eq!(config.limits.monthly_max, dec!(3000.50));
    }

    #[test]
    fn test_unordered_limits_rejected() {
        let yaml = limits_yaml("5000", "1000", "3000");
        assert!(AppConfig::from_yaml_str(&yaml).is_err());

        let yaml = limits_yaml("0", "1000", "3000");
        assert!(AppConfig::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn test_sub_cent_ceilings_rejected() {
        for field in ["per_transaction_max", "daily_max", "monthly_max"] {
            let limits = [
                ("per_transaction_max", "500"),
                ("daily_max", "1000"),
                ("monthly_max", "3000"),
            ]
            .iter()
            .map(|(name, value)| {
                let value = if *name == field { "999.005" } else { *value };
                format!("  {}: \"{}\"\n", name, value)
            })
            .collect::<String>();
            let yaml = format!("{}limits:\n{}", BASE, limits);
            assert!(AppConfig::from_yaml_str(&yaml).is_err(), "{} accepted 999.005", field);
        }
    }

    #[test]
    fn test_validate_checks_every_ceiling_scale() {
        let mut config = AppConfig::from_yaml_str(BASE).unwrap();
        config.limits.monthly_max = dec!(100000.001);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("monthly_max"), "{}", err);

        config.limits.monthly_max = dec!(100000.000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_limit_string_rejected() {
        let yaml = limits_yaml("5e2", "1000", "3000");
        assert!(AppConfig::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(AppConfig::load("does-not-exist").is_err());
    }
}
