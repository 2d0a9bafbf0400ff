use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    UpdateUser,
    DeleteUser,
    CreateDataset,
    UpdateDataset,
    DeleteDataset,
    UploadRecords,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditTarget {
    User,
    Dataset,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditLog {
    pub id: i64,
    pub admin_id: i64,
    pub action_type: AuditAction,
    pub target_type: Option<AuditTarget>,
    pub target_id: Option<i64>,
    pub description: Option<String>,
    pub details: Option<Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub admin_id: i64,
    pub action: AuditAction,
    pub target: AuditTarget,
    pub target_id: i64,
    pub description: String,
    pub details: Option<Value>,
}

impl NewAuditLog {
    pub fn new(
        admin_id: i64,
        action: AuditAction,
        target: AuditTarget,
        target_id: i64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            admin_id,
            action,
            target,
            target_id,
            description: description.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}
