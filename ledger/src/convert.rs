//! Conversion Engine: two-legged currency exchange
//!
//! Moves value between a user's two currency wallets at an externally
//! supplied rate. The debit leg runs first; a failed credit leg triggers a
//! compensating credit back to the source wallet so the two legs are never
//! left half-applied. Naive independent read-modify-write updates of both
//! wallets lose funds under concurrency and crashes; the compensation
//! discipline here is mandatory.

use crate::{
    error::{Error, Result},
    mutator::{Applied, BalanceMutator, MutationRequest},
    storage::Store,
    types::{Currency, OwnerId, Transaction, TransactionKind, TransactionMetadata, TransactionStatus},
};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// A completed (or partially pending) conversion
#[derive(Debug, Clone)]
pub struct Conversion {
    /// Correlation id shared by both legs
    pub correlation_id: Uuid,
    /// Debit leg on the source wallet (COMPLETED)
    pub debit: Transaction,
    /// Credit leg on the destination wallet (COMPLETED, or PENDING awaiting
    /// the reconciliation sweep after transient storage trouble)
    pub credit: Transaction,
    /// Rate applied (units of destination currency per source unit)
    pub rate: Decimal,
    /// Amount debited from the source wallet
    pub from_amount: Decimal,
    /// Amount credited to the destination wallet
    pub to_amount: Decimal,
}

/// Computes and executes two-legged conversions
pub struct ConversionEngine {
    store: Arc<dyn Store>,
    mutator: Arc<BalanceMutator>,
    minimum_amount: Decimal,
}

impl ConversionEngine {
    /// Create new engine
    pub fn new(store: Arc<dyn Store>, mutator: Arc<BalanceMutator>, minimum_amount: Decimal) -> Self {
        Self {
            store,
            mutator,
            minimum_amount,
        }
    }

    /// Convert `from_amount` of the owner's `from`-currency wallet into the
    /// same owner's `to`-currency wallet at `rate` (units of `to` per unit
    /// of `from`). The destination wallet is lazily created if absent.
    pub async fn convert(
        &self,
        owner: &OwnerId,
        from: Currency,
        to: Currency,
        from_amount: Decimal,
        rate: Decimal,
    ) -> Result<Conversion> {
        if from == to {
            return Err(Error::InvalidEvent(format!(
                "cannot convert {} to itself",
                from
            )));
        }
        if rate <= Decimal::ZERO {
            return Err(Error::InvalidEvent(format!("rate must be positive, got {}", rate)));
        }

        let from_amount = from.round(from_amount);
        if from_amount <= Decimal::ZERO {
            return Err(Error::InvalidEvent(format!(
                "amount must be positive, got {}",
                from_amount
            )));
        }
        // Minimum enforced before any mutation
        if from_amount < self.minimum_amount {
            return Err(Error::BelowMinimum {
                minimum: self.minimum_amount,
                amount: from_amount,
            });
        }

        // Half-away-from-zero at the destination's minor unit: rounding may
        // lose value across a round trip, never create it.
        let to_amount = to.round(from_amount * rate);

        let source = self.store.wallet_for_owner(owner, from)?;
        let destination = self.store.wallet_for_owner(owner, to)?;

        let correlation_id = Uuid::now_v7();

        // Debit leg first. InsufficientFunds propagates with no credit
        // attempted.
        let debit = match self
            .mutator
            .apply(MutationRequest {
                wallet_id: source.id,
                kind: TransactionKind::ConversionDebit,
                amount: from_amount,
                currency: from,
                description: format!("{} to {} conversion", from, to),
                metadata: TransactionMetadata::for_conversion(correlation_id, rate),
            })
            .await?
        {
            Applied::Completed(txn) => txn,
            Applied::Pending(txn) => {
                // The debit is in doubt; nothing more can safely happen until
                // the reconciliation sweep resolves it.
                tracing::error!(
                    correlation_id = %correlation_id,
                    transaction_id = %txn.id,
                    "Conversion debit left pending, aborting before credit leg"
                );
                return Err(Error::StorageUnavailable(format!(
                    "conversion debit {} pending reconciliation",
                    txn.id
                )));
            }
        };

        // Credit leg. Any failure here must not strand the debited funds.
        let credit_result = self
            .mutator
            .apply(MutationRequest {
                wallet_id: destination.id,
                kind: TransactionKind::ConversionCredit,
                amount: to_amount,
                currency: to,
                description: format!("{} to {} conversion", from, to),
                metadata: TransactionMetadata::for_conversion(correlation_id, rate),
            })
            .await;

        let credit = match credit_result {
            Ok(applied) => {
                if let Applied::Pending(ref txn) = applied {
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        transaction_id = %txn.id,
                        "Conversion credit pending, reconciliation sweep will complete it"
                    );
                }
                applied.transaction().clone()
            }
            Err(err) => {
                self.compensate(&source.id, &destination.id, correlation_id, from_amount, from, rate, &debit)
                    .await?;
                return Err(err);
            }
        };

        tracing::info!(
            correlation_id = %correlation_id,
            owner = %owner,
            from = %from,
            to = %to,
            from_amount = %from_amount,
            to_amount = %to_amount,
            rate = %rate,
            "Conversion executed"
        );

        Ok(Conversion {
            correlation_id,
            debit,
            credit,
            rate,
            from_amount,
            to_amount,
        })
    }

    /// Undo a conversion whose credit leg failed: fail any stranded PENDING
    /// credit records, then return the debited amount to the source wallet.
    #[allow(clippy::too_many_arguments)]
    async fn compensate(
        &self,
        source_id: &Uuid,
        destination_id: &Uuid,
        correlation_id: Uuid,
        from_amount: Decimal,
        from: Currency,
        rate: Decimal,
        debit: &Transaction,
    ) -> Result<()> {
        tracing::warn!(
            correlation_id = %correlation_id,
            debit_id = %debit.id,
            "Conversion credit leg failed, issuing reversal"
        );

        // Fail any PENDING credit record the aborted leg left behind so the
        // sweep cannot apply it after the reversal.
        let stranded = self.store.list_transactions(&crate::types::TransactionFilter {
            wallet_id: Some(*destination_id),
            status: Some(TransactionStatus::Pending),
            ..Default::default()
        })?;
        for txn in stranded {
            if txn.metadata.correlation_id == Some(correlation_id) {
                self.store.fail(txn.id, "conversion reversed")?;
            }
        }

        let reversal = self
            .mutator
            .apply(MutationRequest {
                wallet_id: *source_id,
                kind: TransactionKind::ConversionCredit,
                amount: from_amount,
                currency: from,
                description: "conversion reversal".to_string(),
                metadata: TransactionMetadata {
                    correlation_id: Some(correlation_id),
                    rate: Some(rate),
                    reversal_of: Some(debit.id),
                    ..Default::default()
                },
            })
            .await?;

        if !reversal.is_completed() {
            // Reversal itself is pending; the sweep will finish it. The
            // correlation id and reversal_of link make the state auditable.
            tracing::error!(
                correlation_id = %correlation_id,
                reversal_id = %reversal.transaction().id,
                "Conversion reversal left pending"
            );
        }

        Ok(())
    }
}
