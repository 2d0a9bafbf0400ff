use serde::{Deserialize, Serialize};

use crate::access::Role;

/// Partial admin edit of an account. `credits` sets the balance outright.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AdminUserUpdate {
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub credits: Option<f64>,
}

impl AdminUserUpdate {
    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.is_active.is_none() && self.credits.is_none()
    }
}
