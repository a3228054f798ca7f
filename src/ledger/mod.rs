// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Credit ledger: wallet balances plus the append-only transaction log
//!
//! Generation is paid up front with `reserve` and compensated with `refund`
//! when the work fails after admission.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::errors::{GenerationError, StoreError};
use crate::store::{DebitOutcome, NewTransaction, WalletStore};
use crate::types::{CreditTransaction, JobId, TransactionKind, UserId};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("insufficient credits: {shortfall} more required")]
    InsufficientFunds { shortfall: i64 },

    #[error("credit amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("top-ups must be a purchase or a gift")]
    InvalidGrantKind,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<LedgerError> for GenerationError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds { shortfall } => {
                GenerationError::InsufficientFunds { shortfall }
            }
            LedgerError::InvalidAmount(_) | LedgerError::InvalidGrantKind => {
                GenerationError::Validation(err.to_string())
            }
            LedgerError::Store(e) => GenerationError::Persistence(e),
        }
    }
}

/// Credits taken for a job, kept so the caller can compensate later
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub user_id: UserId,
    pub amount: i64,
    pub job_id: Option<JobId>,
    pub transaction: CreditTransaction,
}

pub struct CreditLedger {
    store: Arc<dyn WalletStore>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn WalletStore>) -> Self {
        Self { store }
    }

    /// Atomically take `amount` credits and record a `spend` entry
    pub async fn reserve(
        &self,
        user_id: UserId,
        amount: i64,
        note: &str,
        job_id: Option<JobId>,
    ) -> Result<Reservation, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let outcome = self
            .store
            .debit(NewTransaction {
                user_id,
                amount,
                kind: TransactionKind::Spend,
                note: note.to_string(),
                job_id,
            })
            .await?;

        match outcome {
            DebitOutcome::Applied(transaction) => {
                debug!(
                    "Reserved {} credits for user {} (balance now {})",
                    amount, user_id, transaction.balance_after
                );
                Ok(Reservation {
                    user_id,
                    amount,
                    job_id,
                    transaction,
                })
            }
            DebitOutcome::Insufficient { balance } => {
                let shortfall = amount - balance;
                info!(
                    "Reservation of {} credits refused for user {}: short by {}",
                    amount, user_id, shortfall
                );
                Err(LedgerError::InsufficientFunds { shortfall })
            }
        }
    }

    /// Return credits with a `refund` entry. Refunds for the same job are applied once.
    pub async fn refund(
        &self,
        user_id: UserId,
        amount: i64,
        note: &str,
        job_id: Option<JobId>,
    ) -> Result<CreditTransaction, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let tx = self
            .store
            .credit(NewTransaction {
                user_id,
                amount,
                kind: TransactionKind::Refund,
                note: note.to_string(),
                job_id,
            })
            .await?;
        info!(
            "Refunded {} credits to user {} (job {:?})",
            amount, user_id, job_id
        );
        Ok(tx)
    }

    /// Undo a reservation in full
    pub async fn release(
        &self,
        reservation: &Reservation,
        note: &str,
    ) -> Result<CreditTransaction, LedgerError> {
        self.refund(
            reservation.user_id,
            reservation.amount,
            note,
            reservation.job_id,
        )
        .await
    }

    /// Top up a wallet with a purchase or gift
    pub async fn grant(
        &self,
        user_id: UserId,
        amount: i64,
        kind: TransactionKind,
        note: &str,
    ) -> Result<CreditTransaction, LedgerError> {
        if !matches!(kind, TransactionKind::Purchase | TransactionKind::Gift) {
            return Err(LedgerError::InvalidGrantKind);
        }
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        Ok(self
            .store
            .credit(NewTransaction {
                user_id,
                amount,
                kind,
                note: note.to_string(),
                job_id: None,
            })
            .await?)
    }

    pub async fn balance(&self, user_id: UserId) -> Result<i64, LedgerError> {
        Ok(self.store.balance(user_id).await?)
    }

    pub async fn transactions(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CreditTransaction>, LedgerError> {
        Ok(self.store.transactions(user_id).await?)
    }

    /// True when the sum of all deltas equals the stored balance
    pub async fn reconcile(&self, user_id: UserId) -> Result<bool, LedgerError> {
        let balance = self.store.balance(user_id).await?;
        let sum: i64 = self
            .store
            .transactions(user_id)
            .await?
            .iter()
            .map(|tx| tx.delta)
            .sum();
        if sum != balance {
            warn!(
                "Ledger mismatch for user {}: balance {} but entries sum to {}",
                user_id, balance, sum
            );
        }
        Ok(sum == balance)
    }

    /// Total refunded for a job
    pub async fn refunded_for_job(
        &self,
        user_id: UserId,
        job_id: JobId,
    ) -> Result<i64, LedgerError> {
        Ok(self
            .store
            .transactions(user_id)
            .await?
            .iter()
            .filter(|tx| tx.kind == TransactionKind::Refund && tx.job_id == Some(job_id))
            .map(|tx| tx.delta)
            .sum())
    }
}
