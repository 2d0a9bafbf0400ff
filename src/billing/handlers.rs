use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use super::dto::{BillingResponse, Page, PricingInfo, TopupRequest, UpgradeRequest};
use super::repo_types::Transaction;
use super::services;
use crate::{
    access::Role,
    auth::{CurrentUser, User},
    error::ApiResult,
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users/pricing", get(pricing))
        .route("/users/me/topup", post(topup))
        .route("/users/me/upgrade", post(upgrade))
        .route("/users/me/upgrade-premium", post(upgrade_premium))
        .route("/users/me/transactions", get(my_transactions))
}

pub async fn pricing(State(state): State<AppState>) -> Json<PricingInfo> {
    Json(PricingInfo {
        pricing: state.config.pricing.clone(),
        currency: "credits",
        description: "Pay-per-use pricing model for data access",
    })
}

async fn respond(
    state: &AppState,
    user: &User,
    transaction: Transaction,
    role: Role,
) -> ApiResult<Json<BillingResponse>> {
    let credits = state.accounts.balance(user.id).await?;
    Ok(Json(BillingResponse {
        transaction,
        role,
        credits,
    }))
}

#[instrument(skip_all)]
pub async fn topup(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<TopupRequest>,
) -> ApiResult<Json<BillingResponse>> {
    let t = services::topup_credits(
        state.accounts.as_ref(),
        &state.config.pricing,
        user.id,
        payload.amount,
    )
    .await?;
    respond(&state, &user, t, user.role).await
}

#[instrument(skip_all)]
pub async fn upgrade(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<UpgradeRequest>,
) -> ApiResult<Json<BillingResponse>> {
    let t = services::upgrade_role(
        state.accounts.as_ref(),
        &state.config.pricing,
        user.id,
        user.role,
        payload.role,
    )
    .await?;
    respond(&state, &user, t, payload.role).await
}

#[instrument(skip_all)]
pub async fn upgrade_premium(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<BillingResponse>> {
    let t = services::upgrade_role(
        state.accounts.as_ref(),
        &state.config.pricing,
        user.id,
        user.role,
        Role::Premium,
    )
    .await?;
    respond(&state, &user, t, Role::Premium).await
}

#[instrument(skip_all)]
pub async fn my_transactions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<Transaction>>> {
    let (skip, limit) = page.clamped();
    let rows = state.accounts.list_transactions(user.id, skip, limit).await?;
    Ok(Json(rows))
}
