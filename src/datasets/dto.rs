use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::repo_types::{NewDataset, StorageMode};
use crate::db::ColumnInfo;

#[derive(Debug, Deserialize)]
pub struct CreateDatasetRequest {
    pub name: String,
    pub description: Option<String>,
    pub table_name: String,
    pub config: Option<Value>,
}

impl From<CreateDatasetRequest> for NewDataset {
    fn from(r: CreateDatasetRequest) -> Self {
        NewDataset {
            name: r.name.trim().to_string(),
            description: r.description,
            table_name: r.table_name.trim().to_string(),
            config: r.config,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DatasetSchema {
    pub dataset_id: i64,
    pub dataset_name: String,
    pub table_name: String,
    pub description: Option<String>,
    pub storage_mode: StorageMode,
    /// Declared columns of the dedicated table; empty for generic datasets.
    pub columns: Vec<ColumnInfo>,
    pub primary_key: Option<String>,
    pub config_schema: Value,
    /// Table rows, or stored records for generic datasets.
    pub row_count: i64,
}

#[derive(Debug, Serialize)]
pub struct TableSummary {
    pub table_name: String,
    pub display_name: String,
    pub row_count: i64,
    pub column_count: usize,
    pub sample_columns: Vec<String>,
    pub registered: bool,
    pub dataset_id: Option<i64>,
    pub query_endpoint: String,
    pub schema_endpoint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TableListing {
    pub total_tables: usize,
    pub tables: Vec<TableSummary>,
}

#[derive(Debug, Deserialize)]
pub struct AppendRecordsRequest {
    pub records: Vec<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
pub struct AppendRecordsResponse {
    pub dataset_id: i64,
    pub inserted: u64,
    pub total_records: i64,
}
