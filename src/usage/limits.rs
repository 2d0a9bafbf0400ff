use anyhow::{bail, Context};

use crate::access::Role;

/// Daily ceilings for one role. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoleLimits {
    pub requests_per_day: Option<i64>,
    pub volume_mb_per_day: Option<f64>,
}

impl RoleLimits {
    pub const UNLIMITED: RoleLimits = RoleLimits {
        requests_per_day: None,
        volume_mb_per_day: None,
    };
}

/// Per-role usage ceilings. Admin roles are always unlimited.
#[derive(Debug, Clone)]
pub struct UsageLimits {
    pub public: RoleLimits,
    pub researcher: RoleLimits,
    pub premium: RoleLimits,
}

impl Default for UsageLimits {
    fn default() -> Self {
        Self {
            public: RoleLimits {
                requests_per_day: Some(100),
                volume_mb_per_day: Some(10.0),
            },
            researcher: RoleLimits {
                requests_per_day: Some(1_000),
                volume_mb_per_day: Some(100.0),
            },
            premium: RoleLimits {
                requests_per_day: Some(10_000),
                volume_mb_per_day: Some(1_000.0),
            },
        }
    }
}

impl UsageLimits {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let tier = |name: &str, fallback: RoleLimits| -> anyhow::Result<RoleLimits> {
            let rate_key = format!("RATE_LIMIT_{name}");
            let volume_key = format!("VOLUME_LIMIT_{name}_MB");
            let requests_per_day = match std::env::var(&rate_key) {
                Ok(v) => Some(parse_per_day(&v).with_context(|| format!("parse {rate_key}"))?),
                Err(_) => fallback.requests_per_day,
            };
            let volume_mb_per_day = match std::env::var(&volume_key) {
                Ok(v) => Some(
                    v.trim()
                        .parse::<f64>()
                        .with_context(|| format!("parse {volume_key}"))?,
                ),
                Err(_) => fallback.volume_mb_per_day,
            };
            Ok(RoleLimits {
                requests_per_day,
                volume_mb_per_day,
            })
        };

        Ok(Self {
            public: tier("PUBLIC", defaults.public)?,
            researcher: tier("RESEARCHER", defaults.researcher)?,
            premium: tier("PREMIUM", defaults.premium)?,
        })
    }

    pub fn for_role(&self, role: Role) -> RoleLimits {
        match role {
            Role::Public => self.public,
            Role::Researcher => self.researcher,
            Role::Premium => self.premium,
            _ => RoleLimits::UNLIMITED,
        }
    }
}

/// Parses `"<n>/day"`; a bare number is accepted too.
pub fn parse_per_day(raw: &str) -> anyhow::Result<i64> {
    let raw = raw.trim();
    let count = match raw.split_once('/') {
        Some((n, "day")) => n.trim(),
        Some((_, unit)) => bail!("unsupported rate unit '{unit}'"),
        None => raw,
    };
    let n: i64 = count.parse().with_context(|| format!("invalid count '{count}'"))?;
    if n < 0 {
        bail!("rate limit must not be negative");
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_day_format() {
        assert_eq!(parse_per_day("100/day").unwrap(), 100);
        assert_eq!(parse_per_day(" 250 ").unwrap(), 250);
        assert!(parse_per_day("10/hour").is_err());
        assert!(parse_per_day("many/day").is_err());
    }

    #[test]
    fn admins_are_unlimited() {
        let limits = UsageLimits::default();
        assert_eq!(limits.for_role(Role::Public).requests_per_day, Some(100));
        assert_eq!(limits.for_role(Role::Premium).volume_mb_per_day, Some(1_000.0));
        for role in [Role::Admin, Role::SuperAdmin, Role::SupportAdmin] {
            assert_eq!(limits.for_role(role), RoleLimits::UNLIMITED);
        }
    }
}
