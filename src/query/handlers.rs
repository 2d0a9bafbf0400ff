use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use tracing::instrument;

use super::dto::{split_fields, DatasetQueryParams, QueryBody, RecordsQueryParams, TableQueryParams};
use super::executor::SortDirection;
use super::export::OutputFormat;
use super::filter::FilterExpr;
use super::services::{self, QueryCall, Target};
use crate::{
    auth::CurrentUser,
    datasets::repo_types::DatasetRef,
    error::{ApiError, ApiResult},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/query", get(query_dataset).post(query_dataset_body))
        .route("/query/:table", get(query_table))
        .route("/query/dataset/:id/records", get(query_records))
        .route("/export/csv", get(export_csv))
        .route("/export/table", get(export_table))
}

fn json_body(body: Bytes) -> Response {
    ([(header::CONTENT_TYPE, OutputFormat::Json.content_type())], body).into_response()
}

/// `PLFS Household` -> `PLFS_Household_export.csv`.
fn export_filename(dataset: &str) -> String {
    let stem: String = dataset
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}_export.csv", if stem.is_empty() { "dataset" } else { &stem })
}

fn csv_attachment(dataset: &str, body: Bytes) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", export_filename(dataset));
    (
        [
            (header::CONTENT_TYPE, OutputFormat::Csv.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

fn parse_filters(raw: Option<&str>) -> ApiResult<FilterExpr> {
    Ok(FilterExpr::parse(raw.unwrap_or_default())?)
}

fn dataset_call(endpoint: &str, params: DatasetQueryParams) -> ApiResult<QueryCall> {
    let reference: DatasetRef = params.dataset.parse().map_err(ApiError::BadRequest)?;
    let mut call = QueryCall::new(endpoint, "GET", Target::Dataset(reference));
    call.aliases = params.aliases();
    call.filters = parse_filters(params.filters.as_deref())?;
    call.fields = split_fields(params.fields.as_deref());
    call.limit = params.limit;
    call.offset = params.offset;
    call.order_by = params.order_by;
    call.direction = SortDirection::parse(params.order_direction.as_deref())?;
    Ok(call)
}

#[instrument(skip_all)]
pub async fn query_dataset(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<DatasetQueryParams>,
) -> ApiResult<Response> {
    let call = dataset_call("/api/v1/query", params)?;
    let body = services::run(&state, &user, call).await?;
    Ok(json_body(body))
}

#[instrument(skip_all)]
pub async fn export_csv(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<DatasetQueryParams>,
) -> ApiResult<Response> {
    let dataset = params.dataset.clone();
    let mut call = dataset_call("/api/v1/export/csv", params)?;
    call.format = OutputFormat::Csv;
    let body = services::run(&state, &user, call).await?;
    Ok(csv_attachment(&dataset, body))
}

#[instrument(skip_all)]
pub async fn export_table(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<DatasetQueryParams>,
) -> ApiResult<Response> {
    let mut call = dataset_call("/api/v1/export/table", params)?;
    call.format = OutputFormat::Table;
    let body = services::run(&state, &user, call).await?;
    Ok(json_body(body))
}

#[instrument(skip_all)]
pub async fn query_dataset_body(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<QueryBody>,
) -> ApiResult<Response> {
    let mut call = QueryCall::new("/api/v1/query", "POST", Target::Dataset(payload.dataset_ref()?));
    if let Some(filters) = &payload.filters {
        call.filters = FilterExpr::from_value(filters)?;
    }
    call.fields = payload.fields.filter(|f| !f.is_empty());
    call.limit = payload.limit;
    call.offset = payload.offset;
    call.order_by = payload.order_by;
    call.direction = SortDirection::parse(payload.order_direction.as_deref())?;

    let body = services::run(&state, &user, call).await?;
    Ok(json_body(body))
}

#[instrument(skip_all)]
pub async fn query_table(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(table): Path<String>,
    Query(params): Query<TableQueryParams>,
) -> ApiResult<Response> {
    let mut call = QueryCall::new(
        format!("/api/v1/query/{table}"),
        "GET",
        Target::Table(table),
    );
    call.filters = parse_filters(params.filters.as_deref())?;
    call.fields = split_fields(params.fields.as_deref());
    call.limit = params.limit;
    call.offset = params.offset;
    call.order_by = params.order_by;
    call.direction = SortDirection::parse(params.order_direction.as_deref())?;

    let body = services::run(&state, &user, call).await?;
    Ok(json_body(body))
}

#[instrument(skip_all)]
pub async fn query_records(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Query(params): Query<RecordsQueryParams>,
) -> ApiResult<Response> {
    let mut call = QueryCall::new(
        format!("/api/v1/query/dataset/{id}/records"),
        "GET",
        Target::Dataset(DatasetRef::Id(id)),
    );
    call.filters = parse_filters(params.filters.as_deref())?;
    call.limit = params.limit;
    call.offset = params.offset;

    let body = services::run(&state, &user, call).await?;
    Ok(json_body(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_filenames_are_header_safe() {
        assert_eq!(export_filename("PLFS Household"), "PLFS_Household_export.csv");
        assert_eq!(export_filename("a\"b;c"), "a_b_c_export.csv");
        assert_eq!(export_filename("  "), "dataset_export.csv");
    }

    #[test]
    fn csv_attachment_headers() {
        let resp = csv_attachment("District Codes", Bytes::from_static(b"state\nKERALA\n"));
        let headers = resp.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/csv; charset=utf-8");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"District_Codes_export.csv\""
        );
    }
}
