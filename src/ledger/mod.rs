//! Account balances, the transaction history and usage rows.
//!
//! Every balance change goes through an [`AccountStore`] so the balance
//! check, the balance update and the history rows commit together.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::access::Role;
use crate::billing::repo_types::{Transaction, TransactionType};
use crate::usage::repo_types::{NewUsageLog, UsageTotals, UsageWindow};

pub mod memory;
pub mod postgres;

pub use memory::MemoryAccountStore;
pub use postgres::PgAccountStore;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient credits: required {required:.2}, available {available:.2}")]
    InsufficientCredits { required: f64, available: f64 },

    #[error("unknown account {0}")]
    UnknownAccount(i64),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Other(e.into())
    }
}

/// One balance movement. `amount` is the magnitude; the direction comes
/// from the store method it is passed to.
#[derive(Debug, Clone)]
pub struct Entry {
    pub amount: f64,
    pub kind: TransactionType,
    pub description: String,
    pub payment_ref: Option<String>,
}

impl Entry {
    pub fn new(amount: f64, kind: TransactionType, description: impl Into<String>) -> Self {
        Self {
            amount,
            kind,
            description: description.into(),
            payment_ref: None,
        }
    }

    pub fn with_payment_ref(mut self, payment_ref: impl Into<String>) -> Self {
        self.payment_ref = Some(payment_ref.into());
        self
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn balance(&self, user_id: i64) -> Result<f64, LedgerError>;

    /// Usage rows with `since <= timestamp < until`.
    async fn usage_window(
        &self,
        user_id: i64,
        since: OffsetDateTime,
        until: OffsetDateTime,
    ) -> Result<UsageWindow, LedgerError>;

    async fn usage_totals(&self, user_id: i64) -> Result<UsageTotals, LedgerError>;

    /// Debits `charge` (when present, only if the balance covers it) and
    /// appends the usage row in one atomic step. Nothing is written when the
    /// debit is refused.
    async fn record_query(
        &self,
        usage: NewUsageLog,
        charge: Option<Entry>,
    ) -> Result<Option<Transaction>, LedgerError>;

    async fn credit(&self, user_id: i64, entry: Entry) -> Result<Transaction, LedgerError>;

    /// Conditional debit, optionally switching the account role in the same step.
    async fn debit(
        &self,
        user_id: i64,
        entry: Entry,
        new_role: Option<Role>,
    ) -> Result<Transaction, LedgerError>;

    /// Administrative balance override. Records the delta as a topup or
    /// deduct entry; the result may be negative. Returns `None` when the
    /// balance already equals `new_balance`.
    async fn override_balance(
        &self,
        user_id: i64,
        new_balance: f64,
        description: String,
    ) -> Result<Option<Transaction>, LedgerError>;

    /// Newest first.
    async fn list_transactions(
        &self,
        user_id: i64,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Transaction>, LedgerError>;
}

pub(crate) fn override_entry(current: f64, new_balance: f64, description: String) -> Option<Entry> {
    let delta = new_balance - current;
    if delta == 0.0 {
        return None;
    }
    let kind = if delta > 0.0 {
        TransactionType::Topup
    } else {
        TransactionType::Deduct
    };
    Some(Entry::new(delta.abs(), kind, description))
}
