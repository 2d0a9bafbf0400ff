use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Account role. `Admin` is the legacy name for `SuperAdmin` and carries the same rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Public,
    Researcher,
    Premium,
    SupportAdmin,
    UserAdmin,
    DataAdmin,
    SuperAdmin,
    Admin,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Public,
        Role::Researcher,
        Role::Premium,
        Role::SupportAdmin,
        Role::UserAdmin,
        Role::DataAdmin,
        Role::SuperAdmin,
        Role::Admin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Public => "public",
            Role::Researcher => "researcher",
            Role::Premium => "premium",
            Role::SupportAdmin => "support_admin",
            Role::UserAdmin => "user_admin",
            Role::DataAdmin => "data_admin",
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(
            self,
            Role::SupportAdmin | Role::UserAdmin | Role::DataAdmin | Role::SuperAdmin | Role::Admin
        )
    }

    /// Position in the role hierarchy; every admin role sits on the top level.
    pub fn level(self) -> u8 {
        match self {
            Role::Public => 0,
            Role::Researcher => 1,
            Role::Premium => 2,
            _ => 3,
        }
    }

    /// Roles that query without being charged.
    pub fn is_billing_exempt(self) -> bool {
        self == Role::Premium || self.is_admin()
    }

    /// Credits granted when an account is created with this role.
    pub fn initial_credits(self) -> f64 {
        match self {
            Role::Public => 10.0,
            Role::Researcher => 100.0,
            Role::Premium => 500.0,
            _ => 999_999.0,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Role::Public => "Public",
            Role::Researcher => "Researcher",
            Role::Premium => "Premium",
            Role::SupportAdmin => "Support Staff",
            Role::UserAdmin => "User Manager",
            Role::DataAdmin => "Data Manager",
            Role::SuperAdmin => "Super Administrator",
            Role::Admin => "Administrator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown role '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_role_name() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert_eq!(" Premium ".parse::<Role>().unwrap(), Role::Premium);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&Role::SuperAdmin).unwrap();
        assert_eq!(json, "\"super_admin\"");
        let back: Role = serde_json::from_str("\"data_admin\"").unwrap();
        assert_eq!(back, Role::DataAdmin);
    }

    #[test]
    fn hierarchy_and_exemptions() {
        assert!(Role::Public.level() < Role::Researcher.level());
        assert!(Role::Researcher.level() < Role::Premium.level());
        assert_eq!(Role::SupportAdmin.level(), Role::Admin.level());
        assert!(Role::Premium.is_billing_exempt());
        assert!(Role::DataAdmin.is_billing_exempt());
        assert!(!Role::Researcher.is_billing_exempt());
        assert!(!Role::Premium.is_admin());
    }
}
