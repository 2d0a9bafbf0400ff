//! The metered query pipeline shared by every query endpoint.
//!
//! authorize -> rate/volume check -> resolve -> build filter -> execute ->
//! serialize -> charge and log usage (one atomic ledger step).

use anyhow::Context;
use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use super::aliases::AliasParams;
use super::dto::QueryResponse;
use super::executor::{self, QueryOutcome, QueryRequest, SortDirection};
use super::export::{self, OutputFormat};
use super::filter::FilterExpr;
use crate::access::{authorize, Capability};
use crate::auth::User;
use crate::billing::services::query_charge;
use crate::config::QueryConfig;
use crate::datasets::{registry, repo_types::DatasetRef};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::usage::{repo_types::NewUsageLog, UsageMeter};

#[derive(Debug, Clone)]
pub enum Target {
    Dataset(DatasetRef),
    /// A physical table addressed directly.
    Table(String),
}

/// One inbound query, already parsed from its endpoint's parameters.
#[derive(Debug, Clone)]
pub struct QueryCall {
    pub endpoint: String,
    pub method: &'static str,
    pub target: Target,
    pub aliases: AliasParams,
    pub filters: FilterExpr,
    pub fields: Option<Vec<String>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub order_by: Option<String>,
    pub direction: SortDirection,
    pub format: OutputFormat,
}

impl QueryCall {
    pub fn new(endpoint: impl Into<String>, method: &'static str, target: Target) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            target,
            aliases: AliasParams::default(),
            filters: FilterExpr::default(),
            fields: None,
            limit: None,
            offset: None,
            order_by: None,
            direction: SortDirection::Asc,
            format: OutputFormat::Json,
        }
    }
}

pub fn page_bounds(
    config: &QueryConfig,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<(i64, i64)> {
    let limit = limit.unwrap_or(config.default_limit);
    if !(1..=config.max_limit).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            config.max_limit
        )));
    }
    let offset = offset.unwrap_or(0);
    if offset < 0 {
        return Err(ApiError::BadRequest("offset must be >= 0".into()));
    }
    Ok((limit, offset))
}

fn render(
    format: OutputFormat,
    dataset: &str,
    fields: Option<&[String]>,
    outcome: QueryOutcome,
) -> ApiResult<Bytes> {
    let body = match format {
        OutputFormat::Json => {
            let response = QueryResponse {
                dataset: dataset.to_string(),
                total_records: outcome.total,
                returned_records: outcome.rows.len(),
                data: outcome.rows,
                query_time_ms: outcome.elapsed_ms,
            };
            serde_json::to_vec(&response).context("serialize query response")?
        }
        OutputFormat::Csv => export::to_csv(&outcome.rows, fields)?,
        OutputFormat::Table => {
            let view = export::to_table(dataset, outcome.total, &outcome.rows, fields);
            serde_json::to_vec(&view).context("serialize table view")?
        }
    };
    Ok(Bytes::from(body))
}

/// Runs `call` for `user` and returns the response body in the requested
/// format. The usage row and the credit charge are written only after the
/// body size is known, and only together.
#[instrument(skip_all, fields(user_id = user.id, endpoint = %call.endpoint))]
pub async fn run(state: &AppState, user: &User, call: QueryCall) -> ApiResult<Bytes> {
    authorize(user.role, Capability::QueryDatasets)?;
    let (limit, offset) = page_bounds(&state.config.query, call.limit, call.offset)?;

    let now = OffsetDateTime::now_utc();
    let meter = UsageMeter::new(state.accounts.as_ref(), &state.config.limits);
    meter.check_rate_limit(user.id, user.role, now).await?;
    meter.check_volume_limit(user.id, user.role, 0, now).await?;

    let descriptor = match &call.target {
        Target::Dataset(reference) => registry::resolve(&state.db, reference).await?,
        Target::Table(table) => registry::resolve_table(&state.db, table).await?,
    };

    let filter = call
        .aliases
        .translate(descriptor.storage_mode)?
        .merge(call.filters);
    let req = QueryRequest {
        filter,
        fields: call.fields,
        limit,
        offset,
        order_by: call.order_by,
        direction: call.direction,
    };

    let outcome = executor::execute(&state.db, &descriptor, &req).await?;
    let total = outcome.total;
    let body = render(call.format, &descriptor.name, req.fields.as_deref(), outcome)?;
    let bytes = body.len() as i64;

    let charge = query_charge(&state.config.pricing, user.role, bytes);
    let usage = NewUsageLog {
        user_id: user.id,
        endpoint: call.endpoint,
        method: call.method.to_string(),
        dataset_name: Some(descriptor.name.clone()),
        query_params: Some(req.filter.to_json().to_string()),
        response_size: bytes,
        timestamp: now,
    };
    match state.accounts.record_query(usage, charge).await? {
        Some(t) => info!(
            user_id = user.id,
            dataset = %descriptor.name,
            bytes,
            cost = t.amount.abs(),
            "query charged"
        ),
        None => debug!(user_id = user.id, dataset = %descriptor.name, bytes, "query served"),
    }
    debug!(total, bytes, format = ?call.format, "query complete");
    Ok(body)
}
