use time::{Duration, OffsetDateTime, Time};
use tracing::{instrument, warn};

use super::dto::{RateLimitInfo, RateLimitStatus, UsageStats};
use super::limits::UsageLimits;
use super::repo_types::NewUsageLog;
use crate::access::Role;
use crate::error::{ApiError, ApiResult};
use crate::ledger::AccountStore;

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// `[UTC midnight, next UTC midnight)` containing `now`.
pub fn day_window(now: OffsetDateTime) -> (OffsetDateTime, OffsetDateTime) {
    let start = now.to_offset(time::UtcOffset::UTC).replace_time(Time::MIDNIGHT);
    (start, start + Duration::days(1))
}

pub fn to_mb(bytes: i64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Per-user request and volume accounting over the current UTC day.
pub struct UsageMeter<'a> {
    store: &'a dyn AccountStore,
    limits: &'a UsageLimits,
}

impl<'a> UsageMeter<'a> {
    pub fn new(store: &'a dyn AccountStore, limits: &'a UsageLimits) -> Self {
        Self { store, limits }
    }

    /// Fails once today's request count has reached the role ceiling.
    #[instrument(skip(self))]
    pub async fn check_rate_limit(
        &self,
        user_id: i64,
        role: Role,
        now: OffsetDateTime,
    ) -> ApiResult<()> {
        let Some(limit) = self.limits.for_role(role).requests_per_day else {
            return Ok(());
        };
        let (start, _) = day_window(now);
        let today = self.store.usage_window(user_id, start, now).await?;
        if today.requests >= limit {
            warn!(user_id, requests = today.requests, limit, "rate limit exceeded");
            return Err(ApiError::RateLimitExceeded { limit });
        }
        Ok(())
    }

    /// Fails once today's volume plus `additional_bytes` reaches the role ceiling.
    #[instrument(skip(self))]
    pub async fn check_volume_limit(
        &self,
        user_id: i64,
        role: Role,
        additional_bytes: i64,
        now: OffsetDateTime,
    ) -> ApiResult<()> {
        let Some(limit_mb) = self.limits.for_role(role).volume_mb_per_day else {
            return Ok(());
        };
        let (start, _) = day_window(now);
        let today = self.store.usage_window(user_id, start, now).await?;
        let total_mb = to_mb(today.bytes + additional_bytes);
        if total_mb >= limit_mb {
            warn!(user_id, total_mb, limit_mb, "volume limit exceeded");
            return Err(ApiError::VolumeLimitExceeded { limit_mb });
        }
        Ok(())
    }

    /// Appends one usage row without charging.
    pub async fn log_usage(&self, usage: NewUsageLog) -> ApiResult<()> {
        self.store.record_query(usage, None).await?;
        Ok(())
    }

    pub async fn rate_limit_info(
        &self,
        user_id: i64,
        role: Role,
        now: OffsetDateTime,
    ) -> ApiResult<RateLimitInfo> {
        let (start, reset_at) = day_window(now);
        let today = self.store.usage_window(user_id, start, now).await?;
        let daily_limit = self.limits.for_role(role).requests_per_day;
        Ok(RateLimitInfo {
            daily_limit,
            requests_today: today.requests,
            requests_remaining: daily_limit.map(|l| (l - today.requests).max(0)),
            reset_at,
            rate_limit_exceeded: daily_limit.is_some_and(|l| today.requests >= l),
        })
    }

    pub async fn usage_stats(
        &self,
        user_id: i64,
        role: Role,
        credits: f64,
        now: OffsetDateTime,
    ) -> ApiResult<UsageStats> {
        let (start, _) = day_window(now);
        let today = self.store.usage_window(user_id, start, now).await?;
        let totals = self.store.usage_totals(user_id).await?;
        let limits = self.limits.for_role(role);

        Ok(UsageStats {
            user_id,
            total_requests: totals.requests,
            requests_today: today.requests,
            total_data_transferred_mb: round2(to_mb(totals.bytes)),
            data_today_mb: round2(to_mb(today.bytes)),
            credits_used: totals.credits_used,
            credits_remaining: credits,
            rate_limit_status: status_for(today.requests, limits.requests_per_day),
            daily_limit: limits.requests_per_day,
            requests_remaining_today: limits.requests_per_day.map(|l| (l - today.requests).max(0)),
            last_request: totals.last_request,
            volume_limit_mb: limits.volume_mb_per_day,
        })
    }
}

pub fn status_for(requests_today: i64, limit: Option<i64>) -> RateLimitStatus {
    match limit {
        Some(l) if requests_today >= l => RateLimitStatus::Exceeded,
        Some(l) if requests_today as f64 >= l as f64 * 0.8 => RateLimitStatus::Warning,
        _ => RateLimitStatus::Active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryAccountStore;
    use time::macros::datetime;

    fn usage(user_id: i64, bytes: i64, at: OffsetDateTime) -> NewUsageLog {
        NewUsageLog {
            user_id,
            endpoint: "/api/v1/query".into(),
            method: "GET".into(),
            dataset_name: Some("PLFS Household".into()),
            query_params: None,
            response_size: bytes,
            timestamp: at,
        }
    }

    #[test]
    fn window_starts_at_utc_midnight() {
        let (start, end) = day_window(datetime!(2024-03-05 17:45:10 +05:30));
        assert_eq!(start, datetime!(2024-03-05 00:00 UTC));
        assert_eq!(end, datetime!(2024-03-06 00:00 UTC));
    }

    #[tokio::test]
    async fn rate_limit_blocks_the_101st_request_and_resets_at_midnight() {
        let store = MemoryAccountStore::new();
        store.open_account(1, Role::Public, 10.0).unwrap();
        let limits = UsageLimits::default();
        let meter = UsageMeter::new(&store, &limits);

        let day = datetime!(2024-06-01 08:00 UTC);
        for i in 0..100 {
            let at = day + Duration::minutes(i);
            meter.check_rate_limit(1, Role::Public, at).await.unwrap();
            meter.log_usage(usage(1, 10, at)).await.unwrap();
        }

        let later = day + Duration::hours(6);
        let err = meter.check_rate_limit(1, Role::Public, later).await.unwrap_err();
        assert!(matches!(err, ApiError::RateLimitExceeded { limit: 100 }));
        let info = meter.rate_limit_info(1, Role::Public, later).await.unwrap();
        assert!(info.rate_limit_exceeded);
        assert_eq!(info.requests_remaining, Some(0));

        let next_day = datetime!(2024-06-02 00:00:01 UTC);
        meter.check_rate_limit(1, Role::Public, next_day).await.unwrap();
    }

    #[tokio::test]
    async fn admins_skip_metering() {
        let store = MemoryAccountStore::new();
        store.open_account(1, Role::Admin, 0.0).unwrap();
        let limits = UsageLimits::default();
        let meter = UsageMeter::new(&store, &limits);
        let now = datetime!(2024-06-01 12:00 UTC);
        for _ in 0..150 {
            meter.log_usage(usage(1, 1 << 20, now - Duration::hours(1))).await.unwrap();
        }
        meter.check_rate_limit(1, Role::Admin, now).await.unwrap();
        meter.check_volume_limit(1, Role::Admin, 0, now).await.unwrap();
    }

    #[tokio::test]
    async fn volume_limit_counts_prior_bytes() {
        let store = MemoryAccountStore::new();
        store.open_account(1, Role::Public, 10.0).unwrap();
        let limits = UsageLimits::default();
        let meter = UsageMeter::new(&store, &limits);
        let now = datetime!(2024-06-01 12:00 UTC);

        meter
            .log_usage(usage(1, 9 * (1 << 20), now - Duration::hours(2)))
            .await
            .unwrap();
        meter.check_volume_limit(1, Role::Public, 0, now).await.unwrap();

        meter
            .log_usage(usage(1, 1 << 20, now - Duration::hours(1)))
            .await
            .unwrap();
        let err = meter.check_volume_limit(1, Role::Public, 0, now).await.unwrap_err();
        assert_eq!(err.kind(), "volume_limit_exceeded");
    }

    #[tokio::test]
    async fn stats_report_warning_from_eighty_percent() {
        let store = MemoryAccountStore::new();
        store.open_account(1, Role::Public, 10.0).unwrap();
        let limits = UsageLimits::default();
        let meter = UsageMeter::new(&store, &limits);
        let now = datetime!(2024-06-01 12:00 UTC);
        for _ in 0..80 {
            meter.log_usage(usage(1, 512, now - Duration::minutes(5))).await.unwrap();
        }
        let stats = meter.usage_stats(1, Role::Public, 10.0, now).await.unwrap();
        assert_eq!(stats.rate_limit_status, RateLimitStatus::Warning);
        assert_eq!(stats.requests_today, 80);
        assert_eq!(stats.total_requests, 80);
        assert_eq!(stats.requests_remaining_today, Some(20));
        assert!(stats.last_request.is_some());
    }

    #[test]
    fn status_thresholds() {
        assert_eq!(status_for(79, Some(100)), RateLimitStatus::Active);
        assert_eq!(status_for(80, Some(100)), RateLimitStatus::Warning);
        assert_eq!(status_for(100, Some(100)), RateLimitStatus::Exceeded);
        assert_eq!(status_for(5_000, None), RateLimitStatus::Active);
    }
}
