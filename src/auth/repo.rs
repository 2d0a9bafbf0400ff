use anyhow::Context;
use sqlx::PgPool;

use crate::access::Role;
use crate::auth::repo_types::{NewUser, User};

const USER_COLUMNS: &str = "id, email, username, hashed_password, full_name, role, is_active, \
                            credits, created_at, updated_at";

impl User {
    pub async fn find_by_id(db: &PgPool, id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Find a user by username, falling back to email.
    pub async fn find_by_login(db: &PgPool, login: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR email = lower($1) \
             ORDER BY (username = $1) DESC LIMIT 1"
        ))
        .bind(login)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn email_or_username_taken(
        db: &PgPool,
        email: &str,
        username: &str,
    ) -> anyhow::Result<bool> {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE email = $1 OR username = $2)",
        )
        .bind(email)
        .bind(username)
        .fetch_one(db)
        .await?;
        Ok(taken)
    }

    /// Create a user together with the role's initial credit grant.
    ///
    /// The grant is written to the ledger in the same transaction so the
    /// balance always equals the sum of the user's transactions.
    pub async fn create_with_grant(db: &PgPool, new: NewUser<'_>) -> anyhow::Result<User> {
        let grant = new.role.initial_credits();
        let mut tx = db.begin().await.context("begin tx")?;

        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, username, hashed_password, full_name, role, credits) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLUMNS}"
        ))
        .bind(new.email)
        .bind(new.username)
        .bind(new.hashed_password)
        .bind(new.full_name)
        .bind(new.role)
        .bind(grant)
        .fetch_one(&mut *tx)
        .await
        .context("insert user")?;

        sqlx::query(
            r#"
            INSERT INTO transactions (user_id, amount, transaction_type, description, status)
            VALUES ($1, $2, 'topup', $3, 'completed')
            "#,
        )
        .bind(user.id)
        .bind(grant)
        .bind(format!("Initial {} credit grant", new.role))
        .execute(&mut *tx)
        .await
        .context("insert initial grant")?;

        tx.commit().await.context("commit tx")?;
        Ok(user)
    }

    pub async fn list(db: &PgPool, skip: i64, limit: i64) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(skip)
        .fetch_all(db)
        .await?;
        Ok(users)
    }

    pub async fn set_role(db: &PgPool, id: i64, role: Role) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET role = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(role)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn set_active(db: &PgPool, id: i64, is_active: bool) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET is_active = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(is_active)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Hard delete; usage logs and transactions cascade.
    pub async fn delete(db: &PgPool, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
