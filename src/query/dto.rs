use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::aliases::AliasParams;
use crate::datasets::repo_types::DatasetRef;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub dataset: String,
    pub total_records: i64,
    pub returned_records: usize,
    pub data: Vec<Value>,
    pub query_time_ms: f64,
}

/// `GET /query` parameters. `filters` is URL-encoded JSON and `fields` a
/// comma-separated list.
#[derive(Debug, Default, Deserialize)]
pub struct DatasetQueryParams {
    pub dataset: String,
    pub state: Option<String>,
    pub district: Option<String>,
    pub gender: Option<String>,
    pub age_group: Option<String>,
    pub year: Option<i64>,
    pub filters: Option<String>,
    pub fields: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub order_by: Option<String>,
    pub order_direction: Option<String>,
}

impl DatasetQueryParams {
    pub fn aliases(&self) -> AliasParams {
        AliasParams {
            state: self.state.clone(),
            district: self.district.clone(),
            gender: self.gender.clone(),
            age_group: self.age_group.clone(),
            year: self.year,
        }
    }
}

/// `GET /query/{table}` parameters.
#[derive(Debug, Default, Deserialize)]
pub struct TableQueryParams {
    pub filters: Option<String>,
    pub fields: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub order_by: Option<String>,
    pub order_direction: Option<String>,
}

/// `GET /query/dataset/{id}/records` parameters.
#[derive(Debug, Default, Deserialize)]
pub struct RecordsQueryParams {
    pub filters: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    /// Dataset id (number or numeric string) or name.
    pub dataset: Value,
    #[serde(default)]
    pub filters: Option<Value>,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub order_by: Option<String>,
    pub order_direction: Option<String>,
}

impl QueryBody {
    pub fn dataset_ref(&self) -> ApiResult<DatasetRef> {
        match &self.dataset {
            Value::Number(n) => n
                .as_i64()
                .map(DatasetRef::Id)
                .ok_or_else(|| ApiError::BadRequest("dataset id must be an integer".into())),
            Value::String(s) => s.parse().map_err(ApiError::BadRequest),
            _ => Err(ApiError::BadRequest(
                "dataset must be an id or a name".into(),
            )),
        }
    }
}

/// Splits `a, b,,c` into `["a", "b", "c"]`; blank input means all fields.
pub fn split_fields(raw: Option<&str>) -> Option<Vec<String>> {
    let fields: Vec<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(String::from)
        .collect();
    (!fields.is_empty()).then_some(fields)
}
