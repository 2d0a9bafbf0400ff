use serde::{Deserialize, Serialize};

use super::pricing::Pricing;
use super::repo_types::Transaction;
use crate::access::Role;

#[derive(Debug, Deserialize)]
pub struct TopupRequest {
    pub amount: f64,
}

#[derive(Debug, Deserialize)]
pub struct UpgradeRequest {
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct BillingResponse {
    pub transaction: Transaction,
    pub role: Role,
    pub credits: f64,
}

#[derive(Debug, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_page_limit")]
    pub limit: i64,
}

fn default_page_limit() -> i64 {
    50
}

impl Page {
    pub fn clamped(&self) -> (i64, i64) {
        (self.skip.max(0), self.limit.clamp(1, 500))
    }
}

#[derive(Debug, Serialize)]
pub struct PricingInfo {
    pub pricing: Pricing,
    pub currency: &'static str,
    pub description: &'static str,
}
