use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use super::dto::{AppendRecordsResponse, DatasetSchema, TableListing, TableSummary};
use super::registry;
use super::repo_types::{Dataset, DatasetChanges, DatasetRef, NewDataset, StorageMode};
use crate::access::{authorize, Capability};
use crate::admin::repo_types::{AuditAction, AuditLog, AuditTarget, NewAuditLog};
use crate::auth::User;
use crate::db;
use crate::error::{ApiError, ApiResult};

lazy_static! {
    static ref TABLE_NAME_RE: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("table name regex compiles");
}

/// `household_survey` -> `Household Survey`.
pub(crate) fn display_name(table: &str) -> String {
    table
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn validate_name(name: &str) -> ApiResult<()> {
    if name.trim().is_empty() {
        return Err(ApiError::BadRequest("Dataset name must not be empty".into()));
    }
    Ok(())
}

fn validate_table_name(table: &str) -> ApiResult<()> {
    if !TABLE_NAME_RE.is_match(table) {
        return Err(ApiError::BadRequest(format!(
            "Invalid table name '{table}': use letters, digits and underscores"
        )));
    }
    if registry::is_internal_table(table) {
        return Err(ApiError::BadRequest(format!(
            "Table name '{table}' is reserved"
        )));
    }
    Ok(())
}

async fn ensure_unique(
    db: &PgPool,
    name: Option<&str>,
    table_name: Option<&str>,
    except_id: Option<i64>,
) -> ApiResult<()> {
    if Dataset::name_taken(db, name, table_name, except_id).await? {
        return Err(ApiError::Conflict(
            "Dataset with this name or table already exists".into(),
        ));
    }
    Ok(())
}

#[instrument(skip(db, actor, new), fields(admin_id = actor.id, name = %new.name))]
pub async fn create_dataset(db: &PgPool, actor: &User, new: NewDataset) -> ApiResult<Dataset> {
    authorize(actor.role, Capability::ManageDatasets)?;
    validate_name(&new.name)?;
    validate_table_name(&new.table_name)?;
    ensure_unique(db, Some(new.name.as_str()), Some(new.table_name.as_str()), None).await?;

    let dataset = Dataset::create(db, &new).await?;
    AuditLog::insert(
        db,
        &NewAuditLog::new(
            actor.id,
            AuditAction::CreateDataset,
            AuditTarget::Dataset,
            dataset.id,
            format!("Created dataset '{}'", dataset.name),
        )
        .with_details(json!({"table_name": dataset.table_name})),
    )
    .await?;
    info!(dataset_id = dataset.id, "dataset created");
    Ok(dataset)
}

#[instrument(skip(db, actor, changes), fields(admin_id = actor.id))]
pub async fn update_dataset(
    db: &PgPool,
    actor: &User,
    id: i64,
    mut changes: DatasetChanges,
) -> ApiResult<Dataset> {
    authorize(actor.role, Capability::ManageDatasets)?;
    if let Some(name) = changes.name.as_mut() {
        *name = name.trim().to_string();
        validate_name(name)?;
    }
    if let Some(table) = changes.table_name.as_mut() {
        *table = table.trim().to_string();
        validate_table_name(table)?;
    }
    if changes.name.is_some() || changes.table_name.is_some() {
        ensure_unique(db, changes.name.as_deref(), changes.table_name.as_deref(), Some(id)).await?;
    }

    let dataset = Dataset::update(db, id, &changes)
        .await?
        .ok_or_else(|| ApiError::not_found("dataset", id))?;
    AuditLog::insert(
        db,
        &NewAuditLog::new(
            actor.id,
            AuditAction::UpdateDataset,
            AuditTarget::Dataset,
            id,
            format!("Updated dataset '{}'", dataset.name),
        ),
    )
    .await?;
    Ok(dataset)
}

#[instrument(skip(db, actor), fields(admin_id = actor.id))]
pub async fn delete_dataset(db: &PgPool, actor: &User, id: i64) -> ApiResult<()> {
    authorize(actor.role, Capability::ManageDatasets)?;
    let dataset = Dataset::find_by_id(db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("dataset", id))?;
    if !Dataset::delete(db, id).await? {
        return Err(ApiError::not_found("dataset", id));
    }
    AuditLog::insert(
        db,
        &NewAuditLog::new(
            actor.id,
            AuditAction::DeleteDataset,
            AuditTarget::Dataset,
            id,
            format!("Deleted dataset '{}'", dataset.name),
        ),
    )
    .await?;
    warn!(dataset_id = id, name = %dataset.name, "dataset deleted");
    Ok(())
}

pub async fn dataset_schema(db: &PgPool, id: i64) -> ApiResult<DatasetSchema> {
    let dataset = registry::lookup(db, &DatasetRef::Id(id)).await?;
    let has_table = db::table_exists(db, &dataset.table_name).await?;
    let descriptor = registry::describe(&dataset, has_table);

    let (columns, primary_key, row_count) = match descriptor.storage_mode {
        StorageMode::DedicatedTable => (
            db::table_columns(db, &dataset.table_name).await?,
            db::primary_key(db, &dataset.table_name).await?,
            db::row_count(db, &dataset.table_name).await?,
        ),
        StorageMode::GenericRecords => (Vec::new(), None, Dataset::record_count(db, id).await?),
    };

    Ok(DatasetSchema {
        dataset_id: dataset.id,
        config_schema: dataset.config_schema(),
        dataset_name: dataset.name,
        table_name: dataset.table_name,
        description: dataset.description,
        storage_mode: descriptor.storage_mode,
        columns,
        primary_key,
        row_count,
    })
}

/// Every physical survey table with its size, a column sample and its
/// catalogue registration. Tables that fail to introspect are skipped.
#[instrument(skip(db))]
pub async fn list_tables(db: &PgPool) -> ApiResult<TableListing> {
    let registered = Dataset::by_table_name(db).await?;
    let mut tables = Vec::new();

    for table in db::list_tables(db).await? {
        if !registry::is_survey_table(&table) {
            continue;
        }
        let summary = async {
            let row_count = db::row_count(db, &table).await?;
            let columns = db::table_columns(db, &table).await?;
            anyhow::Ok((row_count, columns))
        }
        .await;
        let (row_count, columns) = match summary {
            Ok(v) => v,
            Err(e) => {
                warn!(table = %table, error = ?e, "skipping table");
                continue;
            }
        };

        let dataset = registered.get(&table);
        tables.push(TableSummary {
            display_name: dataset
                .map(|d| d.name.clone())
                .unwrap_or_else(|| display_name(&table)),
            row_count,
            column_count: columns.len(),
            sample_columns: columns.iter().take(5).map(|c| c.name.clone()).collect(),
            registered: dataset.is_some(),
            dataset_id: dataset.map(|d| d.id),
            query_endpoint: format!("/api/v1/query/{table}"),
            schema_endpoint: dataset.map(|d| format!("/api/v1/datasets/{}/schema", d.id)),
            table_name: table,
        });
    }

    Ok(TableListing {
        total_tables: tables.len(),
        tables,
    })
}

/// Appends JSON records to a generic dataset.
#[instrument(skip(db, actor, records), fields(admin_id = actor.id, count = records.len()))]
pub async fn append_records(
    db: &PgPool,
    actor: &User,
    id: i64,
    records: Vec<Map<String, Value>>,
) -> ApiResult<AppendRecordsResponse> {
    authorize(actor.role, Capability::UploadDatasets)?;
    if records.is_empty() {
        return Err(ApiError::BadRequest("records must not be empty".into()));
    }
    let descriptor = registry::resolve(db, &DatasetRef::Id(id)).await?;
    if descriptor.storage_mode == StorageMode::DedicatedTable {
        return Err(ApiError::BadRequest(format!(
            "Dataset '{}' is stored in its own table; records cannot be appended",
            descriptor.name
        )));
    }

    let inserted = Dataset::append_records(db, id, &records).await?;
    let total_records = Dataset::record_count(db, id).await?;
    AuditLog::insert(
        db,
        &NewAuditLog::new(
            actor.id,
            AuditAction::UploadRecords,
            AuditTarget::Dataset,
            id,
            format!("Appended {inserted} records to '{}'", descriptor.name),
        ),
    )
    .await?;
    info!(dataset_id = id, inserted, total_records, "records appended");
    Ok(AppendRecordsResponse {
        dataset_id: id,
        inserted,
        total_records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names() {
        assert_eq!(display_name("household_survey"), "Household Survey");
        assert_eq!(display_name("PLFS__person"), "Plfs Person");
    }

    #[test]
    fn table_names_are_identifiers() {
        assert!(validate_table_name("person_survey_2023").is_ok());
        assert!(validate_table_name("2023_survey").is_err());
        assert!(validate_table_name("drop table; --").is_err());
        assert!(validate_table_name("").is_err());
    }

    #[test]
    fn reserved_table_names_are_rejected() {
        for t in ["users", "transactions", "_sqlx_migrations", "DATA_RECORDS"] {
            let err = validate_table_name(t).unwrap_err();
            assert_eq!(err.kind(), "bad_request", "{t}");
        }
    }
}
