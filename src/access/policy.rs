use std::fmt;

use serde::Serialize;

use super::roles::Role;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    QueryDatasets,
    ManageUsers,
    ManageAdmins,
    ManageDatasets,
    ViewAuditLogs,
    SystemConfig,
    ViewAllData,
    DeleteUsers,
    UploadDatasets,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::QueryDatasets => "query_datasets",
            Capability::ManageUsers => "manage_users",
            Capability::ManageAdmins => "manage_admins",
            Capability::ManageDatasets => "manage_datasets",
            Capability::ViewAuditLogs => "view_audit_logs",
            Capability::SystemConfig => "system_config",
            Capability::ViewAllData => "view_all_data",
            Capability::DeleteUsers => "delete_users",
            Capability::UploadDatasets => "upload_datasets",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static role -> capability table.
pub fn capabilities(role: Role) -> &'static [Capability] {
    use Capability::*;
    match role {
        Role::Public | Role::Researcher | Role::Premium => &[QueryDatasets],
        Role::SuperAdmin | Role::Admin => &[
            QueryDatasets,
            ManageUsers,
            ManageAdmins,
            ManageDatasets,
            ViewAuditLogs,
            SystemConfig,
            ViewAllData,
            DeleteUsers,
            UploadDatasets,
        ],
        Role::DataAdmin => &[QueryDatasets, ManageDatasets, ViewAllData, UploadDatasets],
        Role::UserAdmin => &[QueryDatasets, ManageUsers, ViewAuditLogs, DeleteUsers],
        Role::SupportAdmin => &[QueryDatasets, ViewAllData],
    }
}

pub fn has_capability(role: Role, capability: Capability) -> bool {
    capabilities(role).contains(&capability)
}

pub fn authorize(role: Role, capability: Capability) -> ApiResult<()> {
    if has_capability(role, capability) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(capability.to_string()))
    }
}

/// Hierarchy check: the role must sit at or above `minimum`.
pub fn require_role(role: Role, minimum: Role) -> ApiResult<()> {
    if role.level() >= minimum.level() {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!("role {minimum} or higher")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_role_may_query() {
        for role in Role::ALL {
            assert!(authorize(role, Capability::QueryDatasets).is_ok(), "{role}");
        }
    }

    #[test]
    fn admin_matrix() {
        assert!(has_capability(Role::Admin, Capability::ManageAdmins));
        assert!(has_capability(Role::SuperAdmin, Capability::SystemConfig));
        assert!(has_capability(Role::DataAdmin, Capability::ManageDatasets));
        assert!(!has_capability(Role::DataAdmin, Capability::ManageUsers));
        assert!(has_capability(Role::UserAdmin, Capability::DeleteUsers));
        assert!(!has_capability(Role::UserAdmin, Capability::ManageAdmins));
        assert!(!has_capability(Role::SupportAdmin, Capability::ViewAuditLogs));
        assert!(!has_capability(Role::Premium, Capability::ManageDatasets));
    }

    #[test]
    fn authorize_reports_missing_capability() {
        let err = authorize(Role::Researcher, Capability::ManageDatasets).unwrap_err();
        assert_eq!(err.kind(), "forbidden");
        assert!(err.to_string().contains("manage_datasets"));
    }

    #[test]
    fn require_role_follows_hierarchy() {
        assert!(require_role(Role::Premium, Role::Researcher).is_ok());
        assert!(require_role(Role::SupportAdmin, Role::Admin).is_ok());
        assert!(require_role(Role::Public, Role::Researcher).is_err());
    }
}
