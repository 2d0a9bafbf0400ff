use anyhow::Context;
use serde::Serialize;

use crate::access::Role;
use crate::usage::services::BYTES_PER_MB;

/// Credit prices. One table for the whole service.
#[derive(Debug, Clone, Serialize)]
pub struct Pricing {
    pub per_query: f64,
    pub per_mb: f64,
    pub premium_upgrade: f64,
    pub researcher_upgrade: f64,
    pub topup_min: f64,
    pub topup_max: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            per_query: 0.01,
            per_mb: 0.1,
            premium_upgrade: 100.0,
            researcher_upgrade: 25.0,
            topup_min: 1.0,
            topup_max: 10_000.0,
        }
    }
}

/// A negative price would turn a debit into a credit.
fn price(key: &str, value: f64) -> anyhow::Result<f64> {
    if !value.is_finite() || value < 0.0 {
        anyhow::bail!("{key} must be a finite, non-negative number (got {value})");
    }
    Ok(value)
}

fn env_f64(key: &str, default: f64) -> anyhow::Result<f64> {
    let value = match std::env::var(key) {
        Ok(v) => v.trim().parse().with_context(|| format!("parse {key}"))?,
        Err(_) => default,
    };
    price(key, value)
}

impl Pricing {
    pub fn from_env() -> anyhow::Result<Self> {
        let d = Self::default();
        let pricing = Self {
            per_query: env_f64("PRICE_PER_QUERY", d.per_query)?,
            per_mb: env_f64("PRICE_PER_MB", d.per_mb)?,
            premium_upgrade: env_f64("PRICE_PREMIUM_UPGRADE", d.premium_upgrade)?,
            researcher_upgrade: env_f64("PRICE_RESEARCHER_UPGRADE", d.researcher_upgrade)?,
            topup_min: env_f64("TOPUP_MIN", d.topup_min)?,
            topup_max: env_f64("TOPUP_MAX", d.topup_max)?,
        };
        if pricing.topup_min > pricing.topup_max {
            anyhow::bail!("TOPUP_MIN must not exceed TOPUP_MAX");
        }
        Ok(pricing)
    }

    /// Fee for one query returning `bytes`.
    pub fn query_cost(&self, bytes: i64) -> f64 {
        self.per_query + (bytes.max(0) as f64 / BYTES_PER_MB) * self.per_mb
    }

    /// What `role` pays for the query; `None` for exempt roles.
    pub fn quote(&self, role: Role, bytes: i64) -> Option<f64> {
        (!role.is_billing_exempt()).then(|| self.query_cost(bytes))
    }

    /// Price of moving up to `target`, if that tier can be bought.
    pub fn upgrade_price(&self, target: Role) -> Option<f64> {
        match target {
            Role::Researcher => Some(self.researcher_upgrade),
            Role::Premium => Some(self.premium_upgrade),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_grows_with_size() {
        let p = Pricing::default();
        assert!((p.query_cost(0) - 0.01).abs() < 1e-12);
        assert!((p.query_cost(1024 * 1024) - 0.11).abs() < 1e-12);
        assert!((p.query_cost(10 * 1024 * 1024) - 1.01).abs() < 1e-12);
    }

    #[test]
    fn exempt_roles_get_no_quote() {
        let p = Pricing::default();
        assert!(p.quote(Role::Public, 100).is_some());
        assert!(p.quote(Role::Researcher, 100).is_some());
        assert_eq!(p.quote(Role::Premium, 1 << 30), None);
        assert_eq!(p.quote(Role::DataAdmin, 1 << 30), None);
    }

    #[test]
    fn prices_must_be_finite_and_non_negative() {
        assert_eq!(price("PRICE_PER_QUERY", 0.0).unwrap(), 0.0);
        assert_eq!(price("PRICE_PER_MB", 0.25).unwrap(), 0.25);
        for bad in [-0.01, f64::NAN, f64::INFINITY] {
            let err = price("PRICE_PER_MB", bad).unwrap_err();
            assert!(err.to_string().contains("PRICE_PER_MB"), "{err}");
        }
    }

    #[test]
    fn malformed_price_names_its_key() {
        std::env::set_var("DATAPORTAL_TEST_PRICE", "-3");
        let err = env_f64("DATAPORTAL_TEST_PRICE", 1.0).unwrap_err();
        assert!(err.to_string().contains("DATAPORTAL_TEST_PRICE"), "{err}");
        std::env::remove_var("DATAPORTAL_TEST_PRICE");
        assert_eq!(env_f64("DATAPORTAL_TEST_PRICE", 1.0).unwrap(), 1.0);
    }

    #[test]
    fn only_paid_tiers_have_upgrade_prices() {
        let p = Pricing::default();
        assert_eq!(p.upgrade_price(Role::Premium), Some(100.0));
        assert_eq!(p.upgrade_price(Role::Researcher), Some(25.0));
        assert_eq!(p.upgrade_price(Role::Admin), None);
    }
}
