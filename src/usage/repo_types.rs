use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UsageLog {
    pub id: i64,
    pub user_id: i64,
    pub endpoint: String,
    pub method: String,
    pub dataset_name: Option<String>,
    pub query_params: Option<String>,
    pub response_size: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// A usage row about to be appended. The caller stamps the time so the
/// metering window and the log agree on "now".
#[derive(Debug, Clone)]
pub struct NewUsageLog {
    pub user_id: i64,
    pub endpoint: String,
    pub method: String,
    pub dataset_name: Option<String>,
    pub query_params: Option<String>,
    pub response_size: i64,
    pub timestamp: OffsetDateTime,
}

/// Request count and byte volume inside one metering window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageWindow {
    pub requests: i64,
    pub bytes: i64,
}

/// All-time aggregates for one account.
#[derive(Debug, Clone, Default)]
pub struct UsageTotals {
    pub requests: i64,
    pub bytes: i64,
    pub last_request: Option<OffsetDateTime>,
    /// Sum of query charges, as a positive number.
    pub credits_used: f64,
}
