use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use tracing::debug;

use super::{override_entry, AccountStore, Entry, LedgerError};
use crate::access::Role;
use crate::billing::repo_types::Transaction;
use crate::usage::repo_types::{NewUsageLog, UsageTotals, UsageWindow};

const TX_COLUMNS: &str =
    "id, user_id, amount, transaction_type, description, status, payment_gateway_ref, created_at";

#[derive(Clone)]
pub struct PgAccountStore {
    db: PgPool,
}

impl PgAccountStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn insert_transaction(
        conn: &mut PgConnection,
        user_id: i64,
        amount: f64,
        entry: &Entry,
    ) -> Result<Transaction, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(&format!(
            "INSERT INTO transactions \
                 (user_id, amount, transaction_type, description, status, payment_gateway_ref) \
             VALUES ($1, $2, $3, $4, 'completed', $5) \
             RETURNING {TX_COLUMNS}"
        ))
        .bind(user_id)
        .bind(amount)
        .bind(entry.kind)
        .bind(&entry.description)
        .bind(entry.payment_ref.as_deref())
        .fetch_one(conn)
        .await
    }

    async fn insert_usage(conn: &mut PgConnection, usage: &NewUsageLog) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO usage_logs
                (user_id, endpoint, method, dataset_name, query_params, response_size, "timestamp")
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(usage.user_id)
        .bind(&usage.endpoint)
        .bind(&usage.method)
        .bind(usage.dataset_name.as_deref())
        .bind(usage.query_params.as_deref())
        .bind(usage.response_size)
        .bind(usage.timestamp)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Single-statement check-and-decrement. Returns the remaining balance.
    async fn conditional_debit(
        conn: &mut PgConnection,
        user_id: i64,
        amount: f64,
        new_role: Option<Role>,
    ) -> Result<f64, LedgerError> {
        let remaining: Option<f64> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET credits = credits - $2, role = COALESCE($3, role), updated_at = now()
            WHERE id = $1 AND credits >= $2
            RETURNING credits
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(new_role)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(remaining) = remaining {
            return Ok(remaining);
        }

        let available: Option<f64> = sqlx::query_scalar("SELECT credits FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;
        match available {
            None => Err(LedgerError::UnknownAccount(user_id)),
            Some(available) => Err(LedgerError::InsufficientCredits {
                required: amount,
                available,
            }),
        }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn balance(&self, user_id: i64) -> Result<f64, LedgerError> {
        let credits: Option<f64> = sqlx::query_scalar("SELECT credits FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;
        credits.ok_or(LedgerError::UnknownAccount(user_id))
    }

    async fn usage_window(
        &self,
        user_id: i64,
        since: OffsetDateTime,
        until: OffsetDateTime,
    ) -> Result<UsageWindow, LedgerError> {
        let (requests, bytes): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*)::BIGINT, COALESCE(SUM(response_size), 0)::BIGINT
            FROM usage_logs
            WHERE user_id = $1 AND "timestamp" >= $2 AND "timestamp" < $3
            "#,
        )
        .bind(user_id)
        .bind(since)
        .bind(until)
        .fetch_one(&self.db)
        .await?;
        Ok(UsageWindow { requests, bytes })
    }

    async fn usage_totals(&self, user_id: i64) -> Result<UsageTotals, LedgerError> {
        let (requests, bytes, last_request): (i64, i64, Option<OffsetDateTime>) = sqlx::query_as(
            r#"
            SELECT COUNT(*)::BIGINT, COALESCE(SUM(response_size), 0)::BIGINT, MAX("timestamp")
            FROM usage_logs
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        let credits_used: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(-amount), 0) FROM transactions \
             WHERE user_id = $1 AND transaction_type = 'charge'",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        Ok(UsageTotals {
            requests,
            bytes,
            last_request,
            credits_used,
        })
    }

    async fn record_query(
        &self,
        usage: NewUsageLog,
        charge: Option<Entry>,
    ) -> Result<Option<Transaction>, LedgerError> {
        let mut tx = self.db.begin().await?;

        let transaction = match charge {
            Some(entry) => {
                let remaining =
                    Self::conditional_debit(&mut tx, usage.user_id, entry.amount, None).await?;
                let t = Self::insert_transaction(&mut tx, usage.user_id, -entry.amount, &entry)
                    .await?;
                debug!(user_id = usage.user_id, cost = entry.amount, remaining, "query charged");
                Some(t)
            }
            None => None,
        };
        Self::insert_usage(&mut tx, &usage).await?;

        tx.commit().await?;
        Ok(transaction)
    }

    async fn credit(&self, user_id: i64, entry: Entry) -> Result<Transaction, LedgerError> {
        let mut tx = self.db.begin().await?;

        let updated = sqlx::query(
            "UPDATE users SET credits = credits + $2, updated_at = now() WHERE id = $1",
        )
        .bind(user_id)
        .bind(entry.amount)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::UnknownAccount(user_id));
        }
        let t = Self::insert_transaction(&mut tx, user_id, entry.amount, &entry).await?;

        tx.commit().await?;
        Ok(t)
    }

    async fn debit(
        &self,
        user_id: i64,
        entry: Entry,
        new_role: Option<Role>,
    ) -> Result<Transaction, LedgerError> {
        let mut tx = self.db.begin().await?;

        Self::conditional_debit(&mut tx, user_id, entry.amount, new_role).await?;
        let t = Self::insert_transaction(&mut tx, user_id, -entry.amount, &entry).await?;

        tx.commit().await?;
        Ok(t)
    }

    async fn override_balance(
        &self,
        user_id: i64,
        new_balance: f64,
        description: String,
    ) -> Result<Option<Transaction>, LedgerError> {
        let mut tx = self.db.begin().await?;

        let current: Option<f64> =
            sqlx::query_scalar("SELECT credits FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let current = current.ok_or(LedgerError::UnknownAccount(user_id))?;

        let Some(entry) = override_entry(current, new_balance, description) else {
            return Ok(None);
        };

        sqlx::query("UPDATE users SET credits = $2, updated_at = now() WHERE id = $1")
            .bind(user_id)
            .bind(new_balance)
            .execute(&mut *tx)
            .await?;
        let t = Self::insert_transaction(&mut tx, user_id, new_balance - current, &entry).await?;

        tx.commit().await?;
        Ok(Some(t))
    }

    async fn list_transactions(
        &self,
        user_id: i64,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let rows = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC OFFSET $2 LIMIT $3"
        ))
        .bind(user_id)
        .bind(skip)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}
