use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use tracing::instrument;

use super::dto::AdminUserUpdate;
use super::repo_types::AuditLog;
use super::services;
use crate::{
    auth::{dto::PublicUser, CurrentUser},
    billing::dto::Page,
    error::ApiResult,
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/users/:id", patch(update_user).delete(delete_user))
        .route("/admin/audit-logs", get(audit_logs))
}

#[instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<PublicUser>>> {
    let (skip, limit) = page.clamped();
    let users = services::list_users(&state.db, &admin, skip, limit).await?;
    Ok(Json(users.into_iter().map(PublicUser::from).collect()))
}

#[instrument(skip_all)]
pub async fn update_user(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(id): Path<i64>,
    Json(changes): Json<AdminUserUpdate>,
) -> ApiResult<Json<PublicUser>> {
    let user =
        services::update_user(&state.db, state.accounts.as_ref(), &admin, id, changes).await?;
    Ok(Json(user.into()))
}

#[instrument(skip_all)]
pub async fn delete_user(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    services::delete_user(&state.db, &admin, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all)]
pub async fn audit_logs(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<AuditLog>>> {
    let (skip, limit) = page.clamped();
    Ok(Json(services::audit_logs(&state.db, &admin, skip, limit).await?))
}
