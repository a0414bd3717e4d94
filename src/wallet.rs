use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use uuid::Uuid;

use crate::engine::fare;
use crate::error::DispatchError;

/// Payment/ledger collaborator. `settle` is the single settlement
/// primitive: the wallet path and the mobile-money webhook path both end up
/// here.
pub trait PaymentLedger: Send + Sync {
    fn has_sufficient_balance(&self, user_id: Uuid, amount: i64) -> Result<bool, DispatchError>;

    fn settle(
        &self,
        request_id: Uuid,
        payer_id: Uuid,
        amount: i64,
        payee_id: Uuid,
        commission_rate: f64,
    ) -> Result<(), DispatchError>;
}

/// In-memory wallet ledger: one balance per user plus a platform commission
/// account. The debit happens under the payer's entry guard so concurrent
/// settlements cannot overdraw.
#[derive(Default)]
pub struct InMemoryLedger {
    balances: DashMap<Uuid, i64>,
    commission: AtomicI64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&self, user_id: Uuid, amount: i64) {
        *self.balances.entry(user_id).or_insert(0) += amount;
    }

    pub fn balance(&self, user_id: Uuid) -> i64 {
        self.balances.get(&user_id).map(|b| *b).unwrap_or(0)
    }

    pub fn commission_collected(&self) -> i64 {
        self.commission.load(Ordering::Relaxed)
    }
}

impl PaymentLedger for InMemoryLedger {
    fn has_sufficient_balance(&self, user_id: Uuid, amount: i64) -> Result<bool, DispatchError> {
        Ok(self.balance(user_id) >= amount)
    }

    fn settle(
        &self,
        _request_id: Uuid,
        payer_id: Uuid,
        amount: i64,
        payee_id: Uuid,
        commission_rate: f64,
    ) -> Result<(), DispatchError> {
        {
            let mut payer = self.balances.entry(payer_id).or_insert(0);
            if *payer < amount {
                return Err(DispatchError::InsufficientBalance);
            }
            *payer -= amount;
        }

        let (commission, worker_share) = fare::commission_split(amount, commission_rate);
        *self.balances.entry(payee_id).or_insert(0) += worker_share;
        self.commission.fetch_add(commission, Ordering::Relaxed);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{InMemoryLedger, PaymentLedger};
    use crate::error::DispatchError;

    #[test]
    fn settle_splits_commission_and_worker_share() {
        let ledger = InMemoryLedger::new();
        let payer = Uuid::new_v4();
        let payee = Uuid::new_v4();
        ledger.deposit(payer, 5000);

        ledger
            .settle(Uuid::new_v4(), payer, 2500, payee, 20.0)
            .unwrap();

        assert_eq!(ledger.balance(payer), 2500);
        assert_eq!(ledger.balance(payee), 2000);
        assert_eq!(ledger.commission_collected(), 500);
    }

    #[test]
    fn settle_rejects_overdraw() {
        let ledger = InMemoryLedger::new();
        let payer = Uuid::new_v4();
        let payee = Uuid::new_v4();
        ledger.deposit(payer, 100);

        let err = ledger
            .settle(Uuid::new_v4(), payer, 2500, payee, 20.0)
            .unwrap_err();

        assert!(matches!(err, DispatchError::InsufficientBalance));
        assert_eq!(ledger.balance(payer), 100);
        assert_eq!(ledger.balance(payee), 0);
    }
}
