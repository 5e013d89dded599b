//! Deposit Orchestrator: turns verified payment-provider events into
//! wallet credits
//!
//! Deposits are idempotent on the provider payment id: a replayed event
//! resolves to the transaction recorded for the first delivery and credits
//! nothing. Events whose reference resolves to no registered owner are
//! parked for operator review instead of being dropped.

use crate::{
    error::{Error, Result},
    mutator::{Applied, BalanceMutator, MutationRequest},
    providers::OwnerDirectory,
    storage::Store,
    types::{PaymentEvent, Transaction, TransactionKind, TransactionMetadata},
};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Outcome of handling a deposit event
#[derive(Debug, Clone)]
pub enum DepositOutcome {
    /// The wallet was credited
    Applied(Transaction),

    /// The event was seen before; the transaction recorded for the first
    /// delivery is returned and no balance changed.
    Duplicate(Transaction),

    /// The credit was recorded but could not be confirmed within the retry
    /// budget; the reconciliation sweep will complete it.
    Pending(Transaction),
}

impl DepositOutcome {
    /// The transaction record, whatever the outcome
    pub fn transaction(&self) -> &Transaction {
        match self {
            DepositOutcome::Applied(txn)
            | DepositOutcome::Duplicate(txn)
            | DepositOutcome::Pending(txn) => txn,
        }
    }
}

/// Applies verified payment events to owner wallets
pub struct DepositOrchestrator {
    store: Arc<dyn Store>,
    mutator: Arc<BalanceMutator>,
    directory: Arc<dyn OwnerDirectory>,
}

impl DepositOrchestrator {
    /// Create new orchestrator
    pub fn new(
        store: Arc<dyn Store>,
        mutator: Arc<BalanceMutator>,
        directory: Arc<dyn OwnerDirectory>,
    ) -> Self {
        Self {
            store,
            mutator,
            directory,
        }
    }

    /// Handle a verified payment event. Safe to call with the same event any
    /// number of times.
    pub async fn handle_deposit(&self, event: PaymentEvent) -> Result<DepositOutcome> {
        if event.provider_id.is_empty() {
            return Err(Error::InvalidEvent("missing provider payment id".to_string()));
        }
        if event.amount <= Decimal::ZERO {
            return Err(Error::InvalidEvent(format!(
                "deposit amount must be positive, got {}",
                event.amount
            )));
        }

        // Idempotence: the provider id index is checked before any mutation
        if let Some(existing) = self.store.find_by_provider_id(&event.provider_id)? {
            tracing::info!(
                provider_id = %event.provider_id,
                transaction_id = %existing.id,
                "Duplicate deposit event, returning prior result"
            );
            return Ok(DepositOutcome::Duplicate(existing));
        }

        let owner = match self.directory.resolve(&event.reference).await? {
            Some(owner) => owner,
            None => {
                tracing::warn!(
                    provider_id = %event.provider_id,
                    reference = %event.reference,
                    "Deposit reference resolved to no owner, parking event"
                );
                self.store
                    .park_event(&event, "no owner matches reference")?;
                return Err(Error::UnresolvedRecipient(event.reference));
            }
        };

        let wallet = self.store.wallet_for_owner(&owner, event.currency)?;

        let applied = match self
            .mutator
            .apply(MutationRequest {
                wallet_id: wallet.id,
                kind: TransactionKind::Deposit,
                amount: event.amount,
                currency: event.currency,
                description: format!("{} deposit", event.currency),
                metadata: TransactionMetadata::for_provider(&event.provider_id),
            })
            .await
        {
            Ok(applied) => applied,
            // A concurrent delivery of the same event won the append race
            // between our index check and ours; resolve to its result.
            Err(Error::DuplicateEvent(_)) => {
                if let Some(existing) = self.store.find_by_provider_id(&event.provider_id)? {
                    tracing::info!(
                        provider_id = %event.provider_id,
                        transaction_id = %existing.id,
                        "Deposit raced a concurrent delivery, returning its result"
                    );
                    return Ok(DepositOutcome::Duplicate(existing));
                }
                return Err(Error::DuplicateEvent(event.provider_id));
            }
            Err(err) => return Err(err),
        };

        tracing::info!(
            provider_id = %event.provider_id,
            owner = %owner,
            wallet_id = %wallet.id,
            amount = %event.amount,
            currency = %event.currency,
            completed = applied.is_completed(),
            "Deposit processed"
        );

        Ok(match applied {
            Applied::Completed(txn) => DepositOutcome::Applied(txn),
            Applied::Pending(txn) => DepositOutcome::Pending(txn),
        })
    }
}
