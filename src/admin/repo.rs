use anyhow::Context;
use sqlx::PgPool;
use tracing::info;

use super::repo_types::{AuditLog, NewAuditLog};

const AUDIT_COLUMNS: &str =
    r#"id, admin_id, action_type, target_type, target_id, description, details, "timestamp""#;

impl AuditLog {
    pub async fn insert(db: &PgPool, entry: &NewAuditLog) -> anyhow::Result<AuditLog> {
        let row = sqlx::query_as::<_, AuditLog>(&format!(
            "INSERT INTO admin_audit_logs \
                 (admin_id, action_type, target_type, target_id, description, details) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {AUDIT_COLUMNS}"
        ))
        .bind(entry.admin_id)
        .bind(entry.action)
        .bind(entry.target)
        .bind(entry.target_id)
        .bind(&entry.description)
        .bind(entry.details.as_ref())
        .fetch_one(db)
        .await
        .context("insert audit log")?;
        info!(
            admin_id = entry.admin_id,
            action = ?entry.action,
            target_id = entry.target_id,
            "admin action recorded"
        );
        Ok(row)
    }

    /// Newest first.
    pub async fn list(db: &PgPool, skip: i64, limit: i64) -> anyhow::Result<Vec<AuditLog>> {
        let rows = sqlx::query_as::<_, AuditLog>(&format!(
            r#"SELECT {AUDIT_COLUMNS} FROM admin_audit_logs
               ORDER BY "timestamp" DESC, id DESC OFFSET $1 LIMIT $2"#
        ))
        .bind(skip)
        .bind(limit)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }
}
