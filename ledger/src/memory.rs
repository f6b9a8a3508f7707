//! In-memory ledger store for service-level tests.
//!
//! Mirrors the PostgreSQL implementation's guarantees: settlements are
//! recorded atomically with the debit, and everything runs under one lock so
//! concurrent settles serialize exactly like row-locked transactions.

#![allow(clippy::missing_panics_doc)] // Lock poisoning cannot happen with tokio Mutex

use crate::error::Result;
use crate::store::{
    DEFAULT_STARTING_BALANCE, LedgerAccount, LedgerStore, ProvisionOutcome, Settlement,
    SettlementRequest, SettleOutcome,
};
use chrono::Utc;
use fundflow_core::{DomainError, PaymentStatus, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    accounts: HashMap<i64, LedgerAccount>,
    settlements: HashMap<String, Settlement>,
}

/// In-memory [`LedgerStore`] double.
///
/// Cloning shares the underlying state, so a test can hand the store to a
/// service and still inspect balances afterwards.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryLedgerStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account with an explicit balance, bypassing provisioning.
    pub async fn seed_account(&self, user_id: UserId, balance: rust_decimal::Decimal) {
        let now = Utc::now();
        self.state.lock().await.accounts.insert(
            user_id.0,
            LedgerAccount {
                user_id,
                username: format!("user-{user_id}"),
                balance,
                created_at: now,
                updated_at: now,
            },
        );
    }

    /// Number of settlement records, for asserting exactly-once effects.
    pub async fn settlement_count(&self) -> usize {
        self.state.lock().await.settlements.len()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    async fn provision_account(&self, user_id: UserId, username: &str) -> Result<ProvisionOutcome> {
        let mut state = self.state.lock().await;
        if state.accounts.contains_key(&user_id.0) {
            return Ok(ProvisionOutcome::AlreadyExists);
        }
        let now = Utc::now();
        state.accounts.insert(
            user_id.0,
            LedgerAccount {
                user_id,
                username: username.to_string(),
                balance: DEFAULT_STARTING_BALANCE,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(ProvisionOutcome::Created)
    }

    async fn settle(&self, request: &SettlementRequest) -> Result<SettleOutcome> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.settlements.get(request.donation_id.as_str()) {
            return Ok(SettleOutcome::Replayed(existing.clone()));
        }

        let settlement = match state.accounts.get_mut(&request.user_id.0) {
            None => Settlement {
                donation_id: request.donation_id.clone(),
                user_id: request.user_id,
                amount: request.amount,
                status: PaymentStatus::Failed,
                reason: Some(
                    DomainError::AccountNotProvisioned {
                        user_id: request.user_id.0,
                    }
                    .reason_code()
                    .to_string(),
                ),
                new_balance: None,
                settled_at: Utc::now(),
            },
            Some(account) if account.balance < request.amount => Settlement {
                donation_id: request.donation_id.clone(),
                user_id: request.user_id,
                amount: request.amount,
                status: PaymentStatus::Failed,
                reason: Some(
                    DomainError::InsufficientBalance {
                        requested: request.amount,
                        available: account.balance,
                    }
                    .reason_code()
                    .to_string(),
                ),
                new_balance: None,
                settled_at: Utc::now(),
            },
            Some(account) => {
                account.balance -= request.amount;
                account.updated_at = Utc::now();
                Settlement {
                    donation_id: request.donation_id.clone(),
                    user_id: request.user_id,
                    amount: request.amount,
                    status: PaymentStatus::Success,
                    reason: None,
                    new_balance: Some(account.balance),
                    settled_at: Utc::now(),
                }
            },
        };

        state
            .settlements
            .insert(request.donation_id.to_string(), settlement.clone());
        Ok(SettleOutcome::Applied(settlement))
    }

    async fn get_account(&self, user_id: UserId) -> Result<Option<LedgerAccount>> {
        Ok(self.state.lock().await.accounts.get(&user_id.0).cloned())
    }
}
