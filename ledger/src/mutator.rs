//! Balance Mutator: the sole path by which a wallet balance changes
//!
//! Wraps "append PENDING transaction" + "commit or fail" as one logical
//! operation. Commits retry with bounded exponential backoff on transient
//! storage errors; retries that exhaust leave the transaction PENDING and
//! surface an explicit pending signal, never a silent success or failure.

use crate::{
    config::RetryConfig,
    error::{Error, Result},
    storage::Store,
    types::{Currency, Transaction, TransactionKind, TransactionMetadata},
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::time::Duration;
use uuid::Uuid;

/// A balance mutation request
#[derive(Debug, Clone)]
pub struct MutationRequest {
    /// Target wallet
    pub wallet_id: Uuid,
    /// Transaction kind (determines the delta's sign)
    pub kind: TransactionKind,
    /// Positive amount
    pub amount: Decimal,
    /// Currency (must match the wallet)
    pub currency: Currency,
    /// Human-readable description
    pub description: String,
    /// Provider metadata
    pub metadata: TransactionMetadata,
}

/// Outcome of a mutation
#[derive(Debug, Clone)]
pub enum Applied {
    /// Delta applied, transaction COMPLETED
    Completed(Transaction),

    /// The transaction was appended but the commit could not be confirmed
    /// within the retry budget. It stays PENDING for the reconciliation
    /// sweep; callers surface "pending, check back" to the user.
    Pending(Transaction),
}

impl Applied {
    /// The transaction record, whatever the outcome
    pub fn transaction(&self) -> &Transaction {
        match self {
            Applied::Completed(txn) | Applied::Pending(txn) => txn,
        }
    }

    /// Whether the delta was confirmed applied
    pub fn is_completed(&self) -> bool {
        matches!(self, Applied::Completed(_))
    }
}

/// The atomic operation pairing a transaction-log entry with a balance delta
pub struct BalanceMutator {
    store: Arc<dyn Store>,
    retry: RetryConfig,
}

impl BalanceMutator {
    /// Create new mutator over a storage handle
    pub fn new(store: Arc<dyn Store>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Apply a balance delta: exactly one transaction row per call, at most
    /// one balance mutation.
    ///
    /// - `InsufficientFunds` marks the transaction FAILED and returns the
    ///   error; the record persists as an audit trail of the rejected attempt.
    /// - Transient storage errors during commit leave the transaction
    ///   PENDING; after the retry budget the outcome is `Applied::Pending`.
    pub async fn apply(&self, request: MutationRequest) -> Result<Applied> {
        let amount = request.currency.round(request.amount);
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidEvent(format!(
                "amount must be positive, got {}",
                request.amount
            )));
        }

        let txn = self.store.append_transaction(
            request.wallet_id,
            request.kind,
            amount,
            request.currency,
            &request.description,
            request.metadata,
        )?;

        self.drive_commit(txn).await
    }

    /// Re-drive the commit of a stale PENDING transaction (reconciliation
    /// sweep entry point).
    pub async fn retry_commit(&self, transaction_id: Uuid) -> Result<Applied> {
        let txn = self.store.get_transaction(transaction_id)?;
        match txn.status {
            crate::types::TransactionStatus::Pending => self.drive_commit(txn).await,
            crate::types::TransactionStatus::Completed => Ok(Applied::Completed(txn)),
            crate::types::TransactionStatus::Failed => Err(Error::AlreadyTerminal(transaction_id)),
        }
    }

    async fn drive_commit(&self, txn: Transaction) -> Result<Applied> {
        let delta = txn.signed_delta();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.store.commit(txn.id, delta) {
                Ok(_) => {
                    let committed = self.store.get_transaction(txn.id)?;
                    return Ok(Applied::Completed(committed));
                }
                Err(err @ Error::InsufficientFunds { .. }) => {
                    // The rejected attempt stays on the ledger as a FAILED
                    // audit record.
                    self.store.fail(txn.id, &err.to_string())?;
                    return Err(err);
                }
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.base_delay_ms << (attempt - 1);
                    tracing::warn!(
                        transaction_id = %txn.id,
                        attempt,
                        delay_ms = delay,
                        error = %err,
                        "Commit failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(err) if err.is_retryable() => {
                    tracing::error!(
                        transaction_id = %txn.id,
                        error = %err,
                        "Commit retries exhausted, transaction left pending for reconciliation"
                    );
                    let pending = self.store.get_transaction(txn.id)?;
                    return Ok(Applied::Pending(pending));
                }
                Err(err) => return Err(err),
            }
        }
    }
}
