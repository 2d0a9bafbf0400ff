use serde::Serialize;
use time::OffsetDateTime;

/// Limit fields are `null` for unlimited roles.
#[derive(Debug, Serialize)]
pub struct RateLimitInfo {
    pub daily_limit: Option<i64>,
    pub requests_today: i64,
    pub requests_remaining: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub reset_at: OffsetDateTime,
    pub rate_limit_exceeded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStatus {
    Active,
    Warning,
    Exceeded,
}

#[derive(Debug, Serialize)]
pub struct UsageStats {
    pub user_id: i64,
    pub total_requests: i64,
    pub requests_today: i64,
    pub total_data_transferred_mb: f64,
    pub data_today_mb: f64,
    pub credits_used: f64,
    pub credits_remaining: f64,
    pub rate_limit_status: RateLimitStatus,
    pub daily_limit: Option<i64>,
    pub requests_remaining_today: Option<i64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_request: Option<OffsetDateTime>,
    pub volume_limit_mb: Option<f64>,
}
