//! Pool setup and catalogue introspection for dedicated survey tables.

use anyhow::Context;
use serde::Serialize;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

use crate::config::AppConfig;

pub async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("connect to database")
}

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ColumnInfo {
    #[sqlx(rename = "column_name")]
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    #[sqlx(rename = "column_default")]
    pub default: Option<String>,
}

pub async fn table_exists(db: &PgPool, table: &str) -> anyhow::Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = $1)",
    )
    .bind(table)
    .fetch_one(db)
    .await?;
    Ok(exists)
}

/// Base tables in the current schema, by name.
pub async fn list_tables(db: &PgPool) -> anyhow::Result<Vec<String>> {
    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT table_name::TEXT FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
         ORDER BY table_name",
    )
    .fetch_all(db)
    .await?;
    Ok(tables)
}

/// Columns in declaration order.
pub async fn table_columns(db: &PgPool, table: &str) -> anyhow::Result<Vec<ColumnInfo>> {
    let cols = sqlx::query_as::<_, ColumnInfo>(
        "SELECT column_name::TEXT, data_type::TEXT, (is_nullable = 'YES') AS is_nullable, \
                column_default::TEXT \
         FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = $1 \
         ORDER BY ordinal_position",
    )
    .bind(table)
    .fetch_all(db)
    .await?;
    Ok(cols)
}

/// First primary-key column, if the table has one.
pub async fn primary_key(db: &PgPool, table: &str) -> anyhow::Result<Option<String>> {
    let pk: Option<String> = sqlx::query_scalar(
        "SELECT kcu.column_name::TEXT \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
           ON tc.constraint_name = kcu.constraint_name \
          AND tc.table_schema = kcu.table_schema \
          AND tc.table_name = kcu.table_name \
         WHERE tc.table_schema = current_schema() AND tc.table_name = $1 \
           AND tc.constraint_type = 'PRIMARY KEY' \
         ORDER BY kcu.ordinal_position LIMIT 1",
    )
    .bind(table)
    .fetch_optional(db)
    .await?;
    Ok(pk)
}

pub async fn row_count(db: &PgPool, table: &str) -> anyhow::Result<i64> {
    let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
        .fetch_one(db)
        .await?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("household_survey"), "\"household_survey\"");
        assert_eq!(quote_ident("State_UT_Code"), "\"State_UT_Code\"");
        assert_eq!(quote_ident("a\"; DROP TABLE users; --"), "\"a\"\"; DROP TABLE users; --\"");
    }
}
