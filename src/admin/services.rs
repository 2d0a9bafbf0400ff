use serde_json::json;
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use super::dto::AdminUserUpdate;
use super::repo_types::{AuditAction, AuditLog, AuditTarget, NewAuditLog};
use crate::access::{authorize, Capability, Role};
use crate::auth::User;
use crate::error::{ApiError, ApiResult};
use crate::ledger::AccountStore;

/// Granting or revoking an admin role takes `manage_admins` on top of `manage_users`.
pub(crate) fn check_role_change(actor: Role, current: Role, requested: Role) -> ApiResult<()> {
    if current != requested && (current.is_admin() || requested.is_admin()) {
        authorize(actor, Capability::ManageAdmins)?;
    }
    Ok(())
}

pub(crate) fn check_delete(actor: &User, target: &User) -> ApiResult<()> {
    authorize(actor.role, Capability::DeleteUsers)?;
    if actor.id == target.id {
        return Err(ApiError::BadRequest("You cannot delete your own account".into()));
    }
    if target.role.is_admin() {
        authorize(actor.role, Capability::ManageAdmins)?;
    }
    Ok(())
}

pub async fn list_users(db: &PgPool, actor: &User, skip: i64, limit: i64) -> ApiResult<Vec<User>> {
    authorize(actor.role, Capability::ManageUsers)?;
    Ok(User::list(db, skip, limit).await?)
}

#[instrument(skip(db, accounts, actor, changes), fields(admin_id = actor.id))]
pub async fn update_user(
    db: &PgPool,
    accounts: &dyn AccountStore,
    actor: &User,
    id: i64,
    changes: AdminUserUpdate,
) -> ApiResult<User> {
    authorize(actor.role, Capability::ManageUsers)?;
    if changes.is_empty() {
        return Err(ApiError::BadRequest("Nothing to update".into()));
    }
    let target = User::find_by_id(db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("user", id))?;

    if let Some(role) = changes.role {
        check_role_change(actor.role, target.role, role)?;
    }
    if changes.is_active.is_some() && target.role.is_admin() {
        authorize(actor.role, Capability::ManageAdmins)?;
    }
    if let Some(credits) = changes.credits {
        if !credits.is_finite() {
            return Err(ApiError::BadRequest("credits must be a finite number".into()));
        }
    }

    if let Some(role) = changes.role.filter(|r| *r != target.role) {
        User::set_role(db, id, role).await?;
    }
    if let Some(active) = changes.is_active.filter(|a| *a != target.is_active) {
        User::set_active(db, id, active).await?;
    }
    if let Some(credits) = changes.credits {
        let description = format!("Balance override by {}", actor.username);
        if let Some(t) = accounts.override_balance(id, credits, description).await? {
            warn!(user_id = id, delta = t.amount, new_balance = credits, "credit balance overridden");
        }
    }

    AuditLog::insert(
        db,
        &NewAuditLog::new(
            actor.id,
            AuditAction::UpdateUser,
            AuditTarget::User,
            id,
            format!("Updated user '{}'", target.username),
        )
        .with_details(json!({
            "changes": &changes,
            "previous": {
                "role": target.role,
                "is_active": target.is_active,
                "credits": target.credits,
            },
        })),
    )
    .await?;

    User::find_by_id(db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("user", id))
}

#[instrument(skip(db, actor), fields(admin_id = actor.id))]
pub async fn delete_user(db: &PgPool, actor: &User, id: i64) -> ApiResult<()> {
    let target = User::find_by_id(db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("user", id))?;
    check_delete(actor, &target)?;

    if !User::delete(db, id).await? {
        return Err(ApiError::not_found("user", id));
    }
    AuditLog::insert(
        db,
        &NewAuditLog::new(
            actor.id,
            AuditAction::DeleteUser,
            AuditTarget::User,
            id,
            format!("Deleted user '{}'", target.username),
        )
        .with_details(json!({"email": target.email, "role": target.role})),
    )
    .await?;
    info!(user_id = id, "user deleted");
    Ok(())
}

pub async fn audit_logs(db: &PgPool, actor: &User, skip: i64, limit: i64) -> ApiResult<Vec<AuditLog>> {
    authorize(actor.role, Capability::ViewAuditLogs)?;
    Ok(AuditLog::list(db, skip, limit).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn user(id: i64, role: Role) -> User {
        User {
            id,
            email: format!("u{id}@example.org"),
            username: format!("user{id}"),
            hashed_password: String::new(),
            full_name: None,
            role,
            is_active: true,
            credits: 0.0,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: None,
        }
    }

    #[test]
    fn user_admin_cannot_touch_admin_roles() {
        assert!(check_role_change(Role::UserAdmin, Role::Public, Role::Researcher).is_ok());
        assert!(check_role_change(Role::UserAdmin, Role::Public, Role::DataAdmin).is_err());
        assert!(check_role_change(Role::UserAdmin, Role::DataAdmin, Role::Public).is_err());
        assert!(check_role_change(Role::SuperAdmin, Role::Public, Role::DataAdmin).is_ok());
        // Unchanged admin role needs nothing extra.
        assert!(check_role_change(Role::UserAdmin, Role::DataAdmin, Role::DataAdmin).is_ok());
    }

    #[test]
    fn delete_rules() {
        let super_admin = user(1, Role::SuperAdmin);
        let user_admin = user(2, Role::UserAdmin);
        let data_admin = user(3, Role::DataAdmin);
        let public = user(4, Role::Public);

        assert!(check_delete(&super_admin, &public).is_ok());
        assert!(check_delete(&super_admin, &user_admin).is_ok());
        assert_eq!(
            check_delete(&super_admin, &super_admin).unwrap_err().kind(),
            "bad_request"
        );
        assert!(check_delete(&user_admin, &public).is_ok());
        assert_eq!(
            check_delete(&user_admin, &data_admin).unwrap_err().kind(),
            "forbidden"
        );
        assert_eq!(check_delete(&data_admin, &public).unwrap_err().kind(), "forbidden");
    }

    #[test]
    fn empty_update_detected() {
        assert!(AdminUserUpdate::default().is_empty());
        let u = AdminUserUpdate {
            credits: Some(-5.0),
            ..Default::default()
        };
        assert!(!u.is_empty());
    }
}
