//! Runtime configuration from the environment (and `.env`).

use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::policy::StorePolicy;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub max_connections: u32,
    pub nats_url: Option<String>,
    pub admin_token: String,
    pub policy: StorePolicy,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value:?}")]
    Invalid { key: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| get(key).filter(|v| !v.trim().is_empty()).ok_or(ConfigError::Missing(key));
        let defaults = StorePolicy::default();
        let policy = StorePolicy {
            currency: get("STORE_CURRENCY").unwrap_or(defaults.currency),
            tax_rate: parse_or(&get, "TAX_RATE_PERCENT", defaults.tax_rate)?,
            shipping_charge: Money::new(parse_or(&get, "SHIPPING_CHARGE", defaults.shipping_charge.amount())?),
            free_shipping_above: Money::new(parse_or(&get, "FREE_SHIPPING_ABOVE", defaults.free_shipping_above.amount())?),
            free_shipping_states: match get("FREE_SHIPPING_STATES") {
                Some(list) => list.split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()).collect(),
                None => defaults.free_shipping_states,
            },
            cod_limit: Money::new(parse_or(&get, "COD_LIMIT", defaults.cod_limit.amount())?),
            max_qty_per_line: defaults.max_qty_per_line,
        };
        if policy.tax_rate < Decimal::ZERO || policy.tax_rate > Decimal::ONE_HUNDRED {
            return Err(ConfigError::Invalid { key: "TAX_RATE_PERCENT", value: policy.tax_rate.to_string() });
        }
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            port: parse_or(&get, "PORT", 8083)?,
            max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            nats_url: get("NATS_URL").filter(|v| !v.trim().is_empty()),
            admin_token: required("ADMIN_TOKEN")?,
            policy,
        })
    }
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/store"), ("ADMIN_TOKEN", "secret")])).unwrap();
        assert_eq!(config.port, 8083);
        assert_eq!(config.max_connections, 10);
        assert!(config.nats_url.is_none());
        assert_eq!(config.policy.tax_rate, Decimal::from(18));
        assert_eq!(config.policy.free_shipping_states, vec!["kerala".to_string()]);
    }

    #[test]
    fn test_overrides_and_errors() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/store"), ("ADMIN_TOKEN", "t"), ("PORT", "9000"),
            ("FREE_SHIPPING_STATES", "Kerala, Goa"), ("COD_LIMIT", "2500"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.policy.free_shipping_states, vec!["kerala".to_string(), "goa".to_string()]);
        assert_eq!(config.policy.cod_limit, Money::whole(2500));

        assert_eq!(Config::from_lookup(lookup(&[("ADMIN_TOKEN", "t")])).unwrap_err(), ConfigError::Missing("DATABASE_URL"));
        let err = Config::from_lookup(lookup(&[("DATABASE_URL", "x"), ("ADMIN_TOKEN", "t"), ("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }
}
