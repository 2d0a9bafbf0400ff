use lazy_static::lazy_static;
use regex::Regex;
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::access::Role;
use crate::auth::dto::{AuthResponse, RegisterRequest};
use crate::auth::jwt::JwtKeys;
use crate::auth::password;
use crate::auth::repo_types::{NewUser, User};
use crate::error::{ApiError, ApiResult};

lazy_static! {
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex compiles");
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Normalizes and validates a registration payload in place.
pub(crate) fn validate_registration(req: &mut RegisterRequest) -> ApiResult<Role> {
    req.email = req.email.trim().to_lowercase();
    req.username = req.username.trim().to_string();

    if !is_valid_email(&req.email) {
        return Err(ApiError::BadRequest("Invalid email".into()));
    }
    let len = req.username.chars().count();
    if !(3..=100).contains(&len) {
        return Err(ApiError::BadRequest(
            "Username must be between 3 and 100 characters".into(),
        ));
    }
    password::check_policy(&req.password)?;

    let role = req.role.unwrap_or(Role::Public);
    if !matches!(role, Role::Public | Role::Researcher) {
        return Err(ApiError::Forbidden(format!(
            "role '{role}' cannot be self-assigned"
        )));
    }
    Ok(role)
}

pub(crate) fn issue_tokens(keys: &JwtKeys, user: &User) -> ApiResult<AuthResponse> {
    Ok(AuthResponse {
        access_token: keys.sign_access(user.id)?,
        refresh_token: keys.sign_refresh(user.id)?,
        token_type: "bearer",
        role: user.role,
        username: user.username.clone(),
    })
}

#[instrument(skip(db, req), fields(username = %req.username))]
pub async fn register(db: &PgPool, mut req: RegisterRequest) -> ApiResult<User> {
    let role = validate_registration(&mut req)?;

    if User::email_or_username_taken(db, &req.email, &req.username).await? {
        warn!(email = %req.email, "email or username already registered");
        return Err(ApiError::Conflict(
            "Email or username already registered".into(),
        ));
    }

    let hash = password::hash(&req.password)?;
    let user = User::create_with_grant(
        db,
        NewUser {
            email: &req.email,
            username: &req.username,
            hashed_password: &hash,
            full_name: req.full_name.as_deref(),
            role,
        },
    )
    .await?;

    info!(user_id = user.id, role = %user.role, credits = user.credits, "user registered");
    Ok(user)
}

#[instrument(skip(db, plain))]
pub async fn authenticate(db: &PgPool, login: &str, plain: &str) -> ApiResult<User> {
    let login = login.trim();
    let user = match User::find_by_login(db, login).await? {
        Some(u) => u,
        None => {
            warn!(login, "login unknown user");
            return Err(ApiError::Unauthorized("Incorrect username or password".into()));
        }
    };

    if !password::verify(plain, &user.hashed_password)? {
        warn!(user_id = user.id, "login invalid password");
        return Err(ApiError::Unauthorized("Incorrect username or password".into()));
    }
    if !user.is_active {
        return Err(ApiError::Forbidden("Inactive account".into()));
    }

    info!(user_id = user.id, "user logged in");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(email: &str, username: &str, password: &str, role: Option<Role>) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            username: username.into(),
            password: password.into(),
            full_name: None,
            role,
        }
    }

    #[test]
    fn email_pattern() {
        assert!(is_valid_email("a@b.io"));
        assert!(!is_valid_email("no-at-sign.io"));
        assert!(!is_valid_email("a b@c.io"));
    }

    #[test]
    fn registration_normalizes_email() {
        let mut req = request("  Ana@Example.ORG ", "ana", "longenough", None);
        let role = validate_registration(&mut req).expect("valid");
        assert_eq!(role, Role::Public);
        assert_eq!(req.email, "ana@example.org");
    }

    #[test]
    fn registration_rejects_short_fields() {
        let mut req = request("a@b.io", "ab", "longenough", None);
        assert_eq!(validate_registration(&mut req).unwrap_err().kind(), "bad_request");
        let mut req = request("a@b.io", "abc", "short", None);
        assert_eq!(validate_registration(&mut req).unwrap_err().kind(), "bad_request");
    }

    #[test]
    fn self_registration_limited_to_public_and_researcher() {
        let mut req = request("a@b.io", "abc", "longenough", Some(Role::Researcher));
        assert_eq!(validate_registration(&mut req).unwrap(), Role::Researcher);
        for role in [Role::Premium, Role::Admin, Role::DataAdmin] {
            let mut req = request("a@b.io", "abc", "longenough", Some(role));
            assert_eq!(validate_registration(&mut req).unwrap_err().kind(), "forbidden");
        }
    }
}
