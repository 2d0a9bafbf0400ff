use tracing::{info, instrument};
use uuid::Uuid;

use super::pricing::Pricing;
use super::repo_types::{Transaction, TransactionType};
use crate::access::Role;
use crate::error::{ApiError, ApiResult};
use crate::ledger::{AccountStore, Entry};

/// Ledger entry for a query of `bytes`, or `None` when the role is exempt.
pub fn query_charge(pricing: &Pricing, role: Role, bytes: i64) -> Option<Entry> {
    let cost = pricing.quote(role, bytes)?;
    let data_cost = cost - pricing.per_query;
    Some(Entry::new(
        cost,
        TransactionType::Charge,
        format!("Query charge: {:.4} + data: {:.4}", pricing.per_query, data_cost),
    ))
}

/// Charges one query. Exempt roles are neither charged nor recorded.
#[instrument(skip(store, pricing))]
pub async fn charge_for_query(
    store: &dyn AccountStore,
    pricing: &Pricing,
    user_id: i64,
    role: Role,
    bytes: i64,
) -> ApiResult<Option<Transaction>> {
    let Some(entry) = query_charge(pricing, role, bytes) else {
        return Ok(None);
    };
    let cost = entry.amount;
    let t = store.debit(user_id, entry, None).await?;
    info!(user_id, bytes, cost, "query charged");
    Ok(Some(t))
}

fn payment_reference() -> String {
    let hex = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("PAY-{}", &hex[..12])
}

#[instrument(skip(store, pricing))]
pub async fn topup_credits(
    store: &dyn AccountStore,
    pricing: &Pricing,
    user_id: i64,
    amount: f64,
) -> ApiResult<Transaction> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ApiError::BadRequest("Amount must be positive".into()));
    }
    if amount < pricing.topup_min || amount > pricing.topup_max {
        return Err(ApiError::BadRequest(format!(
            "Amount must be between {} and {}",
            pricing.topup_min, pricing.topup_max
        )));
    }

    let entry = Entry::new(
        amount,
        TransactionType::Topup,
        format!("Credit topup of {amount} credits"),
    )
    .with_payment_ref(payment_reference());
    let t = store.credit(user_id, entry).await?;
    info!(user_id, amount, payment_ref = ?t.payment_gateway_ref, "credits topped up");
    Ok(t)
}

/// Buys a role tier. The debit and the role change commit together.
#[instrument(skip(store, pricing))]
pub async fn upgrade_role(
    store: &dyn AccountStore,
    pricing: &Pricing,
    user_id: i64,
    current: Role,
    target: Role,
) -> ApiResult<Transaction> {
    let price = pricing
        .upgrade_price(target)
        .ok_or_else(|| ApiError::BadRequest(format!("Role '{target}' cannot be purchased")))?;
    if current.level() >= target.level() {
        return Err(ApiError::BadRequest(format!(
            "Account is already at or above {}",
            target.display_name()
        )));
    }

    let (kind, description) = match target {
        Role::Premium => (TransactionType::Subscription, "Premium subscription upgrade"),
        _ => (TransactionType::Upgrade, "Researcher tier upgrade"),
    };
    let t = store
        .debit(user_id, Entry::new(price, kind, description), Some(target))
        .await?;
    info!(user_id, from = %current, to = %target, price, "role upgraded");
    Ok(t)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ledger::MemoryAccountStore;

    const MB: i64 = 1024 * 1024;

    #[tokio::test]
    async fn balance_is_conserved_and_never_negative() {
        let store = MemoryAccountStore::new();
        let pricing = Pricing::default();
        store.open_account(1, Role::Public, 10.0).unwrap();

        let mut expected = 10.0;
        for amount in [5.0, 1.5, 20.0] {
            topup_credits(&store, &pricing, 1, amount).await.unwrap();
            expected += amount;
        }
        for bytes in [0, MB, 5 * MB, 40 * MB] {
            let t = charge_for_query(&store, &pricing, 1, Role::Public, bytes)
                .await
                .unwrap()
                .expect("public users are charged");
            expected += t.amount;
            assert!(t.amount < 0.0);
        }
        let balance = store.balance(1).await.unwrap();
        assert!((balance - expected).abs() < 1e-9);

        // 400 MB costs 40.01, more than what is left.
        let err = charge_for_query(&store, &pricing, 1, Role::Public, 400 * MB)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "insufficient_credits");
        assert!((store.balance(1).await.unwrap() - balance).abs() < 1e-12);
        assert!(store.balance(1).await.unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn exempt_roles_are_not_charged() {
        let store = MemoryAccountStore::new();
        let pricing = Pricing::default();
        for (id, role) in [(1, Role::Premium), (2, Role::Admin), (3, Role::SuperAdmin)] {
            store.open_account(id, role, 3.0).unwrap();
            let before = store.list_transactions(id, 0, 100).await.unwrap().len();
            let res = charge_for_query(&store, &pricing, id, role, 500 * MB).await.unwrap();
            assert!(res.is_none());
            assert_eq!(store.balance(id).await.unwrap(), 3.0);
            assert_eq!(store.list_transactions(id, 0, 100).await.unwrap().len(), before);
        }
    }

    #[tokio::test]
    async fn concurrent_charges_allow_exactly_one() {
        let store = Arc::new(MemoryAccountStore::new());
        store.open_account(7, Role::Public, 5.0).unwrap();
        // per_query alone is 4.0 so every query costs exactly 4.0 at zero bytes.
        let pricing = Arc::new(Pricing {
            per_query: 4.0,
            ..Pricing::default()
        });

        let spawn = || {
            let store = store.clone();
            let pricing = pricing.clone();
            tokio::spawn(async move {
                charge_for_query(store.as_ref(), &pricing, 7, Role::Public, 0).await
            })
        };
        let (a, b) = (spawn(), spawn());
        let results = [a.await.unwrap(), b.await.unwrap()];

        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ApiError::InsufficientCredits { .. }))));
        assert!((store.balance(7).await.unwrap() - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn topup_bounds_and_reference() {
        let store = MemoryAccountStore::new();
        let pricing = Pricing::default();
        store.open_account(1, Role::Public, 0.0).unwrap();

        for bad in [0.0, -5.0, 0.5, 20_000.0, f64::NAN] {
            let err = topup_credits(&store, &pricing, 1, bad).await.unwrap_err();
            assert_eq!(err.kind(), "bad_request", "{bad}");
        }
        let t = topup_credits(&store, &pricing, 1, 50.0).await.unwrap();
        let reference = t.payment_gateway_ref.expect("reference");
        assert!(reference.starts_with("PAY-"));
        assert_eq!(reference.len(), 16);
        assert_eq!(reference, reference.to_uppercase());
    }

    #[tokio::test]
    async fn upgrade_moves_role_and_debits() {
        let store = MemoryAccountStore::new();
        let pricing = Pricing::default();
        store.open_account(1, Role::Researcher, 150.0).unwrap();

        let t = upgrade_role(&store, &pricing, 1, Role::Researcher, Role::Premium)
            .await
            .unwrap();
        assert_eq!(t.transaction_type, TransactionType::Subscription);
        assert_eq!(t.amount, -100.0);
        assert_eq!(store.role(1).unwrap(), Role::Premium);
        assert_eq!(store.balance(1).await.unwrap(), 50.0);

        let err = upgrade_role(&store, &pricing, 1, Role::Premium, Role::Researcher)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "bad_request");
    }

    #[tokio::test]
    async fn upgrade_without_funds_keeps_role() {
        let store = MemoryAccountStore::new();
        let pricing = Pricing::default();
        store.open_account(1, Role::Public, 10.0).unwrap();
        let err = upgrade_role(&store, &pricing, 1, Role::Public, Role::Premium)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "insufficient_credits");
        assert_eq!(store.role(1).unwrap(), Role::Public);
    }
}
