use std::collections::HashMap;

use anyhow::Context;
use serde_json::{Map, Value};
use sqlx::PgPool;

use super::repo_types::{Dataset, DatasetChanges, NewDataset};

const DATASET_COLUMNS: &str =
    "id, name, description, table_name, config, created_at, updated_at";

/// `LIKE` pattern matching names that start with `prefix`.
pub fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl Dataset {
    pub async fn list(db: &PgPool, skip: i64, limit: i64) -> anyhow::Result<Vec<Dataset>> {
        let rows = sqlx::query_as::<_, Dataset>(&format!(
            "SELECT {DATASET_COLUMNS} FROM datasets ORDER BY id OFFSET $1 LIMIT $2"
        ))
        .bind(skip)
        .bind(limit)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn find_by_id(db: &PgPool, id: i64) -> anyhow::Result<Option<Dataset>> {
        let row = sqlx::query_as::<_, Dataset>(&format!(
            "SELECT {DATASET_COLUMNS} FROM datasets WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    /// Case-insensitive exact name match.
    pub async fn find_by_name(db: &PgPool, name: &str) -> anyhow::Result<Option<Dataset>> {
        let row = sqlx::query_as::<_, Dataset>(&format!(
            "SELECT {DATASET_COLUMNS} FROM datasets WHERE lower(name) = lower($1) \
             ORDER BY id LIMIT 1"
        ))
        .bind(name)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    /// Lowest-id dataset whose name starts with `prefix`, ignoring case.
    pub async fn find_by_name_prefix(db: &PgPool, prefix: &str) -> anyhow::Result<Option<Dataset>> {
        let row = sqlx::query_as::<_, Dataset>(&format!(
            "SELECT {DATASET_COLUMNS} FROM datasets WHERE name ILIKE $1 ESCAPE '\\' \
             ORDER BY id LIMIT 1"
        ))
        .bind(like_prefix(prefix))
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    /// Registered datasets keyed by physical table name.
    pub async fn by_table_name(db: &PgPool) -> anyhow::Result<HashMap<String, Dataset>> {
        let rows = sqlx::query_as::<_, Dataset>(&format!(
            "SELECT {DATASET_COLUMNS} FROM datasets"
        ))
        .fetch_all(db)
        .await?;
        Ok(rows.into_iter().map(|d| (d.table_name.clone(), d)).collect())
    }

    /// Whether another dataset already uses `name` or `table_name`.
    pub async fn name_taken(
        db: &PgPool,
        name: Option<&str>,
        table_name: Option<&str>,
        except_id: Option<i64>,
    ) -> anyhow::Result<bool> {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM datasets \
             WHERE (name = $1 OR table_name = $2) AND id IS DISTINCT FROM $3)",
        )
        .bind(name)
        .bind(table_name)
        .bind(except_id)
        .fetch_one(db)
        .await?;
        Ok(taken)
    }

    pub async fn create(db: &PgPool, new: &NewDataset) -> anyhow::Result<Dataset> {
        let row = sqlx::query_as::<_, Dataset>(&format!(
            "INSERT INTO datasets (name, description, table_name, config) \
             VALUES ($1, $2, $3, $4) RETURNING {DATASET_COLUMNS}"
        ))
        .bind(&new.name)
        .bind(new.description.as_deref())
        .bind(&new.table_name)
        .bind(new.config.as_ref())
        .fetch_one(db)
        .await
        .context("insert dataset")?;
        Ok(row)
    }

    pub async fn update(
        db: &PgPool,
        id: i64,
        changes: &DatasetChanges,
    ) -> anyhow::Result<Option<Dataset>> {
        let row = sqlx::query_as::<_, Dataset>(&format!(
            "UPDATE datasets SET \
                 name = COALESCE($2, name), \
                 description = COALESCE($3, description), \
                 table_name = COALESCE($4, table_name), \
                 config = COALESCE($5, config), \
                 updated_at = now() \
             WHERE id = $1 RETURNING {DATASET_COLUMNS}"
        ))
        .bind(id)
        .bind(changes.name.as_deref())
        .bind(changes.description.as_deref())
        .bind(changes.table_name.as_deref())
        .bind(changes.config.as_ref())
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    /// Records cascade with the dataset.
    pub async fn delete(db: &PgPool, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM datasets WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn record_count(db: &PgPool, id: i64) -> anyhow::Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM data_records WHERE dataset_id = $1")
            .bind(id)
            .fetch_one(db)
            .await?;
        Ok(n)
    }

    /// Appends generic records in one transaction. Returns how many were written.
    pub async fn append_records(
        db: &PgPool,
        id: i64,
        records: &[Map<String, Value>],
    ) -> anyhow::Result<u64> {
        let mut tx = db.begin().await.context("begin tx")?;
        let mut written = 0;
        for record in records {
            sqlx::query("INSERT INTO data_records (dataset_id, data) VALUES ($1, $2)")
                .bind(id)
                .bind(Value::Object(record.clone()))
                .execute(&mut *tx)
                .await?;
            written += 1;
        }
        tx.commit().await.context("commit tx")?;
        Ok(written)
    }
}
