use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;

use super::{override_entry, AccountStore, Entry, LedgerError};
use crate::access::Role;
use crate::billing::repo_types::{Transaction, TransactionStatus, TransactionType};
use crate::usage::repo_types::{NewUsageLog, UsageLog, UsageTotals, UsageWindow};

#[derive(Debug, Clone, Copy)]
struct Account {
    role: Role,
    credits: f64,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<i64, Account>,
    transactions: Vec<Transaction>,
    usage: Vec<UsageLog>,
}

impl Inner {
    fn account_mut(&mut self, user_id: i64) -> Result<&mut Account, LedgerError> {
        self.accounts
            .get_mut(&user_id)
            .ok_or(LedgerError::UnknownAccount(user_id))
    }

    fn debit(&mut self, user_id: i64, amount: f64, new_role: Option<Role>) -> Result<(), LedgerError> {
        let account = self.account_mut(user_id)?;
        if account.credits < amount {
            return Err(LedgerError::InsufficientCredits {
                required: amount,
                available: account.credits,
            });
        }
        account.credits -= amount;
        if let Some(role) = new_role {
            account.role = role;
        }
        Ok(())
    }

    fn push_transaction(&mut self, user_id: i64, amount: f64, entry: Entry) -> Transaction {
        let t = Transaction {
            id: self.transactions.len() as i64 + 1,
            user_id,
            amount,
            transaction_type: entry.kind,
            description: Some(entry.description),
            status: TransactionStatus::Completed,
            payment_gateway_ref: entry.payment_ref,
            created_at: OffsetDateTime::now_utc(),
        };
        self.transactions.push(t.clone());
        t
    }

    fn push_usage(&mut self, usage: NewUsageLog) {
        let id = self.usage.len() as i64 + 1;
        self.usage.push(UsageLog {
            id,
            user_id: usage.user_id,
            endpoint: usage.endpoint,
            method: usage.method,
            dataset_name: usage.dataset_name,
            query_params: usage.query_params,
            response_size: usage.response_size,
            timestamp: usage.timestamp,
        });
    }
}

/// Process-local account store. Every operation runs under one lock, which
/// gives the same all-or-nothing behaviour as a database transaction.
#[derive(Default)]
pub struct MemoryAccountStore {
    inner: Mutex<Inner>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, LedgerError> {
        self.inner
            .lock()
            .map_err(|_| LedgerError::Other(anyhow::anyhow!("account store lock poisoned")))
    }

    /// Registers an account with an opening balance. The opening balance is
    /// recorded as a topup so the history sums to the balance.
    pub fn open_account(&self, user_id: i64, role: Role, credits: f64) -> Result<(), LedgerError> {
        let mut inner = self.lock()?;
        inner.accounts.insert(user_id, Account { role, credits });
        inner.push_transaction(
            user_id,
            credits,
            Entry::new(credits, TransactionType::Topup, format!("Initial {role} credit grant")),
        );
        Ok(())
    }

    pub fn role(&self, user_id: i64) -> Result<Role, LedgerError> {
        Ok(self.lock()?.account_mut(user_id)?.role)
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn balance(&self, user_id: i64) -> Result<f64, LedgerError> {
        Ok(self.lock()?.account_mut(user_id)?.credits)
    }

    async fn usage_window(
        &self,
        user_id: i64,
        since: OffsetDateTime,
        until: OffsetDateTime,
    ) -> Result<UsageWindow, LedgerError> {
        let inner = self.lock()?;
        let window = inner
            .usage
            .iter()
            .filter(|u| u.user_id == user_id && u.timestamp >= since && u.timestamp < until)
            .fold(UsageWindow::default(), |acc, u| UsageWindow {
                requests: acc.requests + 1,
                bytes: acc.bytes + u.response_size,
            });
        Ok(window)
    }

    async fn usage_totals(&self, user_id: i64) -> Result<UsageTotals, LedgerError> {
        let inner = self.lock()?;
        let mut totals = UsageTotals::default();
        for u in inner.usage.iter().filter(|u| u.user_id == user_id) {
            totals.requests += 1;
            totals.bytes += u.response_size;
            totals.last_request = totals.last_request.max(Some(u.timestamp));
        }
        totals.credits_used = inner
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id && t.transaction_type == TransactionType::Charge)
            .map(|t| -t.amount)
            .sum();
        Ok(totals)
    }

    async fn record_query(
        &self,
        usage: NewUsageLog,
        charge: Option<Entry>,
    ) -> Result<Option<Transaction>, LedgerError> {
        let mut inner = self.lock()?;
        let user_id = usage.user_id;
        inner.account_mut(user_id)?;

        let transaction = match charge {
            Some(entry) => {
                inner.debit(user_id, entry.amount, None)?;
                let amount = -entry.amount;
                Some(inner.push_transaction(user_id, amount, entry))
            }
            None => None,
        };
        inner.push_usage(usage);
        Ok(transaction)
    }

    async fn credit(&self, user_id: i64, entry: Entry) -> Result<Transaction, LedgerError> {
        let mut inner = self.lock()?;
        inner.account_mut(user_id)?.credits += entry.amount;
        let amount = entry.amount;
        Ok(inner.push_transaction(user_id, amount, entry))
    }

    async fn debit(
        &self,
        user_id: i64,
        entry: Entry,
        new_role: Option<Role>,
    ) -> Result<Transaction, LedgerError> {
        let mut inner = self.lock()?;
        inner.debit(user_id, entry.amount, new_role)?;
        let amount = -entry.amount;
        Ok(inner.push_transaction(user_id, amount, entry))
    }

    async fn override_balance(
        &self,
        user_id: i64,
        new_balance: f64,
        description: String,
    ) -> Result<Option<Transaction>, LedgerError> {
        let mut inner = self.lock()?;
        let account = inner.account_mut(user_id)?;
        let current = account.credits;
        let Some(entry) = override_entry(current, new_balance, description) else {
            return Ok(None);
        };
        account.credits = new_balance;
        Ok(Some(inner.push_transaction(user_id, new_balance - current, entry)))
    }

    async fn list_transactions(
        &self,
        user_id: i64,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let inner = self.lock()?;
        Ok(inner
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_sum(store: &MemoryAccountStore, user_id: i64) -> f64 {
        store
            .lock()
            .unwrap()
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| t.amount)
            .sum()
    }

    #[tokio::test]
    async fn history_tracks_balance() {
        let store = MemoryAccountStore::new();
        store.open_account(1, Role::Public, 10.0).unwrap();
        store
            .credit(1, Entry::new(5.0, TransactionType::Topup, "topup"))
            .await
            .unwrap();
        store
            .debit(1, Entry::new(3.0, TransactionType::Charge, "query"), None)
            .await
            .unwrap();
        store.override_balance(1, -4.0, "admin".into()).await.unwrap();

        let balance = store.balance(1).await.unwrap();
        assert!((balance + 4.0).abs() < 1e-9);
        assert!((history_sum(&store, 1) - balance).abs() < 1e-9);
    }

    #[tokio::test]
    async fn debit_can_switch_role() {
        let store = MemoryAccountStore::new();
        store.open_account(2, Role::Researcher, 150.0).unwrap();
        store
            .debit(
                2,
                Entry::new(100.0, TransactionType::Subscription, "premium"),
                Some(Role::Premium),
            )
            .await
            .unwrap();
        assert_eq!(store.role(2).unwrap(), Role::Premium);
    }

    #[tokio::test]
    async fn unknown_account() {
        let store = MemoryAccountStore::new();
        assert!(matches!(
            store.balance(99).await,
            Err(LedgerError::UnknownAccount(99))
        ));
    }

    #[tokio::test]
    async fn override_to_same_balance_is_a_no_op() {
        let store = MemoryAccountStore::new();
        store.open_account(3, Role::Public, 10.0).unwrap();
        assert!(store.override_balance(3, 10.0, "noop".into()).await.unwrap().is_none());
        assert_eq!(store.list_transactions(3, 0, 10).await.unwrap().len(), 1);
    }
}
