use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use super::dto::{
    AppendRecordsRequest, AppendRecordsResponse, CreateDatasetRequest, DatasetSchema, TableListing,
};
use super::registry;
use super::repo_types::{Dataset, DatasetChanges, DatasetRef};
use super::services;
use crate::{
    auth::CurrentUser,
    billing::dto::Page,
    error::ApiResult,
    state::AppState,
};

pub fn public_routes() -> Router<AppState> {
    Router::new().route("/datasets/tables", get(list_tables))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/datasets", get(list_datasets).post(create_dataset))
        .route(
            "/datasets/:id",
            get(get_dataset).put(update_dataset).delete(delete_dataset),
        )
        .route("/datasets/:id/schema", get(dataset_schema))
        .route("/datasets/:id/records", post(append_records))
}

#[instrument(skip_all)]
pub async fn list_tables(State(state): State<AppState>) -> ApiResult<Json<TableListing>> {
    Ok(Json(services::list_tables(&state.db).await?))
}

#[instrument(skip_all)]
pub async fn list_datasets(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<Dataset>>> {
    let (skip, limit) = page.clamped();
    Ok(Json(Dataset::list(&state.db, skip, limit).await?))
}

#[instrument(skip_all)]
pub async fn get_dataset(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Dataset>> {
    Ok(Json(registry::lookup(&state.db, &DatasetRef::Id(id)).await?))
}

#[instrument(skip_all)]
pub async fn dataset_schema(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<DatasetSchema>> {
    Ok(Json(services::dataset_schema(&state.db, id).await?))
}

#[instrument(skip_all)]
pub async fn create_dataset(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<CreateDatasetRequest>,
) -> ApiResult<(StatusCode, Json<Dataset>)> {
    let dataset = services::create_dataset(&state.db, &user, payload.into()).await?;
    Ok((StatusCode::CREATED, Json(dataset)))
}

#[instrument(skip_all)]
pub async fn update_dataset(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(changes): Json<DatasetChanges>,
) -> ApiResult<Json<Dataset>> {
    Ok(Json(services::update_dataset(&state.db, &user, id, changes).await?))
}

#[instrument(skip_all)]
pub async fn delete_dataset(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    services::delete_dataset(&state.db, &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all)]
pub async fn append_records(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<AppendRecordsRequest>,
) -> ApiResult<(StatusCode, Json<AppendRecordsResponse>)> {
    let res = services::append_records(&state.db, &user, id, payload.records).await?;
    Ok((StatusCode::CREATED, Json(res)))
}
