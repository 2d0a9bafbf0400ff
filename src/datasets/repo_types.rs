use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use time::OffsetDateTime;

/// Catalogue entry for one logical dataset.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Dataset {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub table_name: String,
    pub config: Option<Value>, // schema/source metadata, shape is up to the ingester
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl Dataset {
    /// The `schema` entry of `config`, or an empty list.
    pub fn config_schema(&self) -> Value {
        self.config
            .as_ref()
            .and_then(|c| c.get("schema"))
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Rows live in their own typed table named by `physical_name`.
    DedicatedTable,
    /// Rows live as JSON objects in `data_records`, keyed by dataset id.
    GenericRecords,
}

/// Where and how a dataset's rows are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetDescriptor {
    pub dataset_id: Option<i64>,
    pub name: String,
    pub storage_mode: StorageMode,
    pub physical_name: String,
}

/// A dataset named by id or by (possibly partial) name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetRef {
    Id(i64),
    Name(String),
}

impl FromStr for DatasetRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("dataset identifier is empty".into());
        }
        Ok(match s.parse::<i64>() {
            Ok(id) => DatasetRef::Id(id),
            Err(_) => DatasetRef::Name(s.to_string()),
        })
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetRef::Id(id) => write!(f, "{id}"),
            DatasetRef::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewDataset {
    pub name: String,
    pub description: Option<String>,
    pub table_name: String,
    pub config: Option<Value>,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub table_name: Option<String>,
    pub config: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_ref_parsing() {
        assert_eq!("4".parse::<DatasetRef>().unwrap(), DatasetRef::Id(4));
        assert_eq!(
            " PLFS ".parse::<DatasetRef>().unwrap(),
            DatasetRef::Name("PLFS".into())
        );
        assert!("  ".parse::<DatasetRef>().is_err());
    }
}
