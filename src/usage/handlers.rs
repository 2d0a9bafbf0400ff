use axum::{extract::State, routing::get, Json, Router};
use time::OffsetDateTime;
use tracing::instrument;

use super::dto::{RateLimitInfo, UsageStats};
use super::services::UsageMeter;
use crate::{auth::CurrentUser, error::ApiResult, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users/me/usage", get(my_usage))
        .route("/users/me/rate-limit", get(my_rate_limit))
}

#[instrument(skip_all)]
pub async fn my_usage(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<UsageStats>> {
    let meter = UsageMeter::new(state.accounts.as_ref(), &state.config.limits);
    let stats = meter
        .usage_stats(user.id, user.role, user.credits, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(stats))
}

#[instrument(skip_all)]
pub async fn my_rate_limit(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<RateLimitInfo>> {
    let meter = UsageMeter::new(state.accounts.as_ref(), &state.config.limits);
    let info = meter
        .rate_limit_info(user.id, user.role, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(info))
}
