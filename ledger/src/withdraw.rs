//! Withdrawal Orchestrator: debits funds and hands payout instructions to
//! the external rail
//!
//! Funds are reserved by debiting the wallet before the rail sees the
//! instruction, so a slow rail can never let the balance go negative. The
//! rail reports its outcome asynchronously through `confirm_payout`; a
//! failed payout is made whole with a compensating credit rather than by
//! mutating the terminal WITHDRAWAL record.

use crate::{
    error::{Error, Result},
    mutator::{Applied, BalanceMutator, MutationRequest},
    providers::{PayoutInstruction, PayoutRail, PayoutResult},
    storage::Store,
    types::{
        PayoutDetails, PayoutMethod, Transaction, TransactionFilter, TransactionKind,
        TransactionMetadata, TransactionStatus,
    },
};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of a withdrawal request
#[derive(Debug, Clone)]
pub enum WithdrawalOutcome {
    /// Funds debited and the instruction accepted by the payout rail
    Submitted(Transaction),

    /// The debit could not be confirmed within the retry budget; nothing was
    /// submitted to the rail. The reconciliation sweep resolves the record.
    Pending(Transaction),
}

impl WithdrawalOutcome {
    /// The WITHDRAWAL transaction record
    pub fn transaction(&self) -> &Transaction {
        match self {
            WithdrawalOutcome::Submitted(txn) | WithdrawalOutcome::Pending(txn) => txn,
        }
    }
}

/// Validates, debits and submits withdrawals
pub struct WithdrawalOrchestrator {
    store: Arc<dyn Store>,
    mutator: Arc<BalanceMutator>,
    rail: Arc<dyn PayoutRail>,
}

impl WithdrawalOrchestrator {
    /// Create new orchestrator
    pub fn new(store: Arc<dyn Store>, mutator: Arc<BalanceMutator>, rail: Arc<dyn PayoutRail>) -> Self {
        Self { store, mutator, rail }
    }

    /// Withdraw `amount` from the wallet via `method`. Validation runs in
    /// full before any mutation: method availability for the wallet's
    /// currency, the per-method minimum, required destination fields, and a
    /// balance pre-check.
    pub async fn handle_withdrawal(
        &self,
        wallet_id: Uuid,
        amount: Decimal,
        method: PayoutMethod,
        details: PayoutDetails,
    ) -> Result<WithdrawalOutcome> {
        let wallet = self.store.get_wallet(wallet_id)?;
        let amount = wallet.currency.round(amount);

        if !PayoutMethod::available_for(wallet.currency).contains(&method) {
            return Err(Error::MethodUnavailable {
                method,
                currency: wallet.currency,
            });
        }
        if amount < method.minimum_amount() {
            return Err(Error::BelowMinimum {
                minimum: method.minimum_amount(),
                amount,
            });
        }
        for field in method.required_fields() {
            if details.field(*field).is_none() {
                return Err(Error::InvalidEvent(format!(
                    "{} withdrawal requires {}",
                    method, field
                )));
            }
        }
        // Fast-path rejection; the commit re-checks under the wallet lock
        if wallet.balance < amount {
            return Err(Error::InsufficientFunds {
                available: wallet.balance,
                requested: amount,
            });
        }

        let applied = self
            .mutator
            .apply(MutationRequest {
                wallet_id,
                kind: TransactionKind::Withdrawal,
                amount,
                currency: wallet.currency,
                description: format!("{} withdrawal via {}", wallet.currency, method),
                metadata: TransactionMetadata {
                    payout_method: Some(method),
                    ..Default::default()
                },
            })
            .await?;

        let txn = match applied {
            Applied::Completed(txn) => txn,
            Applied::Pending(txn) => {
                // Funds not confirmed debited; the rail must not see the
                // instruction until reconciliation resolves the record.
                tracing::warn!(
                    transaction_id = %txn.id,
                    "Withdrawal debit pending, payout not submitted"
                );
                return Ok(WithdrawalOutcome::Pending(txn));
            }
        };

        let instruction = PayoutInstruction {
            transaction_id: txn.id,
            amount,
            currency: wallet.currency,
            method,
            details,
        };

        if let Err(err) = self.rail.submit(instruction).await {
            // The rail never accepted the instruction, so the reserved funds
            // go straight back.
            tracing::error!(
                transaction_id = %txn.id,
                error = %err,
                "Payout submission failed, reversing withdrawal"
            );
            self.credit_back(&txn, "payout submission failed").await?;
            return Err(err);
        }

        tracing::info!(
            transaction_id = %txn.id,
            wallet_id = %wallet_id,
            amount = %amount,
            method = %method,
            "Withdrawal submitted to payout rail"
        );

        Ok(WithdrawalOutcome::Submitted(txn))
    }

    /// Apply the rail's asynchronous outcome for a submitted withdrawal.
    ///
    /// Confirmation is a no-op: the debit already settled. A failure issues
    /// a compensating credit linked via `reversal_of`; the WITHDRAWAL record
    /// itself stays COMPLETED. Replay-safe: a second failure report for the
    /// same transaction finds the existing reversal and credits nothing.
    pub async fn confirm_payout(
        &self,
        transaction_id: Uuid,
        result: PayoutResult,
    ) -> Result<Transaction> {
        let txn = self.store.get_transaction(transaction_id)?;
        if txn.kind != TransactionKind::Withdrawal {
            return Err(Error::InvalidEvent(format!(
                "transaction {} is not a withdrawal",
                transaction_id
            )));
        }
        // Only a COMPLETED withdrawal ever reserved funds. A FAILED record
        // (e.g. an insufficient-funds audit entry) or a still-PENDING debit
        // must never be credited back.
        if txn.status != TransactionStatus::Completed {
            return Err(Error::InvalidEvent(format!(
                "withdrawal {} never completed, no payout to confirm",
                transaction_id
            )));
        }

        match result {
            PayoutResult::Confirmed => {
                tracing::info!(transaction_id = %txn.id, "Payout confirmed");
                Ok(txn)
            }
            PayoutResult::Failed { reason } => {
                if let Some(existing) = self.find_reversal(&txn)? {
                    tracing::info!(
                        transaction_id = %txn.id,
                        reversal_id = %existing.id,
                        "Payout failure already compensated"
                    );
                    return Ok(existing);
                }

                tracing::warn!(
                    transaction_id = %txn.id,
                    reason = %reason,
                    "Payout failed, crediting funds back"
                );
                self.credit_back(&txn, &reason).await
            }
        }
    }

    fn find_reversal(&self, txn: &Transaction) -> Result<Option<Transaction>> {
        let candidates = self.store.list_transactions(&TransactionFilter {
            wallet_id: Some(txn.wallet_id),
            kind: Some(TransactionKind::Deposit),
            ..Default::default()
        })?;
        Ok(candidates
            .into_iter()
            .find(|t| t.metadata.reversal_of == Some(txn.id)))
    }

    async fn credit_back(&self, txn: &Transaction, reason: &str) -> Result<Transaction> {
        let applied = self
            .mutator
            .apply(MutationRequest {
                wallet_id: txn.wallet_id,
                kind: TransactionKind::Deposit,
                amount: txn.amount,
                currency: txn.currency,
                description: format!("withdrawal reversal: {}", reason),
                metadata: TransactionMetadata {
                    reversal_of: Some(txn.id),
                    ..Default::default()
                },
            })
            .await?;

        if !applied.is_completed() {
            tracing::error!(
                transaction_id = %txn.id,
                reversal_id = %applied.transaction().id,
                "Withdrawal reversal left pending"
            );
        }
        Ok(applied.transaction().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RocksStore;
    use crate::types::{Currency, OwnerId, TransactionStatus};
    use crate::Config;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    /// Rail double that records instructions and optionally rejects them
    struct RecordingRail {
        submitted: Mutex<Vec<PayoutInstruction>>,
        reject: bool,
    }

    impl RecordingRail {
        fn accepting() -> Self {
            Self {
                submitted: Mutex::new(Vec::new()),
                reject: false,
            }
        }

        fn rejecting() -> Self {
            Self {
                submitted: Mutex::new(Vec::new()),
                reject: true,
            }
        }
    }

    #[async_trait]
    impl PayoutRail for RecordingRail {
        async fn submit(&self, instruction: PayoutInstruction) -> Result<()> {
            if self.reject {
                return Err(Error::StorageUnavailable("rail offline".to_string()));
            }
            self.submitted.lock().push(instruction);
            Ok(())
        }
    }

    fn setup(rail: Arc<RecordingRail>) -> (WithdrawalOrchestrator, Arc<RocksStore>, Arc<BalanceMutator>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.retry.base_delay_ms = 1;
        let store = Arc::new(RocksStore::open(&config).unwrap());
        let mutator = Arc::new(BalanceMutator::new(store.clone(), config.retry.clone()));
        let orchestrator = WithdrawalOrchestrator::new(store.clone(), mutator.clone(), rail);
        (orchestrator, store, mutator, temp_dir)
    }

    async fn funded_usd_wallet(store: &Arc<RocksStore>, mutator: &BalanceMutator, cents: i64) -> Uuid {
        let wallet = store
            .wallet_for_owner(&OwnerId::new("user-1"), Currency::USD)
            .unwrap();
        mutator
            .apply(MutationRequest {
                wallet_id: wallet.id,
                kind: TransactionKind::Deposit,
                amount: Decimal::new(cents, 2),
                currency: Currency::USD,
                description: "funding".to_string(),
                metadata: TransactionMetadata::default(),
            })
            .await
            .unwrap();
        wallet.id
    }

    fn ach_details() -> PayoutDetails {
        PayoutDetails {
            account_name: Some("Jane Doe".to_string()),
            account_number: Some("000123456789".to_string()),
            bank_name: Some("First National".to_string()),
            routing_number: Some("110000000".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_withdrawal_reserves_funds_and_submits() {
        let rail = Arc::new(RecordingRail::accepting());
        let (orchestrator, store, mutator, _temp) = setup(rail.clone());
        let wallet_id = funded_usd_wallet(&store, &mutator, 10000).await;

        let outcome = orchestrator
            .handle_withdrawal(wallet_id, Decimal::new(4000, 2), PayoutMethod::Ach, ach_details())
            .await
            .unwrap();
        let txn = match outcome {
            WithdrawalOutcome::Submitted(txn) => txn,
            other => panic!("expected Submitted, got {:?}", other),
        };
        assert_eq!(txn.status, TransactionStatus::Completed);
        assert_eq!(txn.metadata.payout_method, Some(PayoutMethod::Ach));

        // Funds reserved before the rail reports anything
        let wallet = store.get_wallet(wallet_id).unwrap();
        assert_eq!(wallet.balance, Decimal::new(6000, 2));

        let submitted = rail.submitted.lock();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].transaction_id, txn.id);
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_audit_record() {
        let rail = Arc::new(RecordingRail::accepting());
        let (orchestrator, store, mutator, _temp) = setup(rail.clone());
        // $50 balance, $75 requested
        let wallet_id = funded_usd_wallet(&store, &mutator, 5000).await;

        let err = orchestrator
            .handle_withdrawal(wallet_id, Decimal::new(7500, 2), PayoutMethod::Ach, ach_details())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientFunds { available, requested }
                if available == Decimal::new(5000, 2) && requested == Decimal::new(7500, 2)
        ));

        let wallet = store.get_wallet(wallet_id).unwrap();
        assert_eq!(wallet.balance, Decimal::new(5000, 2));
        assert!(rail.submitted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_method_unavailable_for_currency() {
        let rail = Arc::new(RecordingRail::accepting());
        let (orchestrator, store, mutator, _temp) = setup(rail);
        let wallet_id = funded_usd_wallet(&store, &mutator, 10000).await;

        // Interac is a CAD rail
        let err = orchestrator
            .handle_withdrawal(
                wallet_id,
                Decimal::new(5000, 2),
                PayoutMethod::Interac,
                PayoutDetails {
                    email: Some("user@example.com".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MethodUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_below_method_minimum() {
        let rail = Arc::new(RecordingRail::accepting());
        let (orchestrator, store, mutator, _temp) = setup(rail);
        let wallet_id = funded_usd_wallet(&store, &mutator, 10000).await;

        // WIRE minimum is $100
        let err = orchestrator
            .handle_withdrawal(wallet_id, Decimal::new(9900, 2), PayoutMethod::Wire, ach_details())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::BelowMinimum { minimum, .. } if minimum == Decimal::new(100, 0)
        ));
    }

    #[tokio::test]
    async fn test_missing_required_fields() {
        let rail = Arc::new(RecordingRail::accepting());
        let (orchestrator, store, mutator, _temp) = setup(rail);
        let wallet_id = funded_usd_wallet(&store, &mutator, 10000).await;

        // ACH without a bank name
        let err = orchestrator
            .handle_withdrawal(
                wallet_id,
                Decimal::new(5000, 2),
                PayoutMethod::Ach,
                PayoutDetails {
                    account_name: Some("Jane Doe".to_string()),
                    account_number: Some("000123456789".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEvent(_)));
    }

    #[tokio::test]
    async fn test_rejected_submission_reverses_debit() {
        let rail = Arc::new(RecordingRail::rejecting());
        let (orchestrator, store, mutator, _temp) = setup(rail);
        let wallet_id = funded_usd_wallet(&store, &mutator, 10000).await;

        let err = orchestrator
            .handle_withdrawal(wallet_id, Decimal::new(4000, 2), PayoutMethod::Ach, ach_details())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));

        // Funds returned; the withdrawal and its reversal both on the ledger
        let wallet = store.get_wallet(wallet_id).unwrap();
        assert_eq!(wallet.balance, Decimal::new(10000, 2));

        let txns = store
            .list_transactions(&TransactionFilter::for_wallet(wallet_id))
            .unwrap();
        let withdrawal = txns
            .iter()
            .find(|t| t.kind == TransactionKind::Withdrawal)
            .expect("withdrawal recorded");
        assert!(txns
            .iter()
            .any(|t| t.metadata.reversal_of == Some(withdrawal.id)));
    }

    #[tokio::test]
    async fn test_failed_payout_credits_back_once() {
        let rail = Arc::new(RecordingRail::accepting());
        let (orchestrator, store, mutator, _temp) = setup(rail);
        let wallet_id = funded_usd_wallet(&store, &mutator, 10000).await;

        let outcome = orchestrator
            .handle_withdrawal(wallet_id, Decimal::new(4000, 2), PayoutMethod::Ach, ach_details())
            .await
            .unwrap();
        let txn_id = outcome.transaction().id;

        let reversal = orchestrator
            .confirm_payout(
                txn_id,
                PayoutResult::Failed {
                    reason: "account closed".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(reversal.metadata.reversal_of, Some(txn_id));

        // Original WITHDRAWAL stays COMPLETED; the credit makes it whole
        let original = store.get_transaction(txn_id).unwrap();
        assert_eq!(original.status, TransactionStatus::Completed);
        let wallet = store.get_wallet(wallet_id).unwrap();
        assert_eq!(wallet.balance, Decimal::new(10000, 2));

        // Replayed failure report finds the existing reversal
        let again = orchestrator
            .confirm_payout(
                txn_id,
                PayoutResult::Failed {
                    reason: "account closed".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(again.id, reversal.id);
        let wallet = store.get_wallet(wallet_id).unwrap();
        assert_eq!(wallet.balance, Decimal::new(10000, 2));
    }

    #[tokio::test]
    async fn test_failure_report_against_failed_withdrawal_credits_nothing() {
        let rail = Arc::new(RecordingRail::accepting());
        let (orchestrator, store, mutator, _temp) = setup(rail);
        // $50 balance
        let wallet_id = funded_usd_wallet(&store, &mutator, 5000).await;

        // A $75 withdrawal rejected at commit time leaves a FAILED audit
        // record that never debited the wallet
        let err = mutator
            .apply(MutationRequest {
                wallet_id,
                kind: TransactionKind::Withdrawal,
                amount: Decimal::new(7500, 2),
                currency: Currency::USD,
                description: "USD withdrawal via ACH".to_string(),
                metadata: TransactionMetadata {
                    payout_method: Some(PayoutMethod::Ach),
                    ..Default::default()
                },
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { .. }));

        let failed = store
            .list_transactions(&TransactionFilter {
                wallet_id: Some(wallet_id),
                status: Some(TransactionStatus::Failed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(failed.len(), 1);

        // A misrouted failure report against that record must be rejected
        let err = orchestrator
            .confirm_payout(
                failed[0].id,
                PayoutResult::Failed {
                    reason: "account closed".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEvent(_)));

        // No funds conjured
        let wallet = store.get_wallet(wallet_id).unwrap();
        assert_eq!(wallet.balance, Decimal::new(5000, 2));
    }

    #[tokio::test]
    async fn test_failure_report_against_pending_withdrawal_rejected() {
        let rail = Arc::new(RecordingRail::accepting());
        let (orchestrator, store, mutator, _temp) = setup(rail);
        let wallet_id = funded_usd_wallet(&store, &mutator, 10000).await;

        // A withdrawal stranded PENDING, as after an interrupted commit
        let txn = store
            .append_transaction(
                wallet_id,
                TransactionKind::Withdrawal,
                Decimal::new(4000, 2),
                Currency::USD,
                "USD withdrawal via ACH",
                TransactionMetadata::default(),
            )
            .unwrap();

        let err = orchestrator
            .confirm_payout(
                txn.id,
                PayoutResult::Failed {
                    reason: "timeout".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEvent(_)));

        let wallet = store.get_wallet(wallet_id).unwrap();
        assert_eq!(wallet.balance, Decimal::new(10000, 2));
    }

    #[tokio::test]
    async fn test_confirmed_payout_is_noop() {
        let rail = Arc::new(RecordingRail::accepting());
        let (orchestrator, store, mutator, _temp) = setup(rail);
        let wallet_id = funded_usd_wallet(&store, &mutator, 10000).await;

        let outcome = orchestrator
            .handle_withdrawal(wallet_id, Decimal::new(4000, 2), PayoutMethod::Ach, ach_details())
            .await
            .unwrap();
        let txn_id = outcome.transaction().id;

        orchestrator
            .confirm_payout(txn_id, PayoutResult::Confirmed)
            .await
            .unwrap();

        let wallet = store.get_wallet(wallet_id).unwrap();
        assert_eq!(wallet.balance, Decimal::new(6000, 2));
    }
}
