//! Main ledger orchestration layer
//!
//! Ties together storage, the balance mutator, the conversion engine and the
//! deposit/withdrawal orchestrators into a high-level API. Collaborators
//! (owner directory, rate provider, payout rail) are injected as trait
//! objects at construction; the core never talks to external services
//! directly.

use crate::{
    config::Config,
    convert::{Conversion, ConversionEngine},
    deposit::{DepositOrchestrator, DepositOutcome},
    error::{Error, Result},
    metrics::Metrics,
    mutator::{Applied, BalanceMutator},
    providers::{OwnerDirectory, PayoutRail, PayoutResult, RateProvider},
    storage::{RocksStore, Store},
    types::{
        Currency, OwnerId, ParkedEvent, PaymentEvent, PayoutDetails, PayoutMethod, Transaction,
        TransactionFilter, Wallet,
    },
    webhook::WebhookDecoder,
    withdraw::{WithdrawalOrchestrator, WithdrawalOutcome},
};
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Main ledger interface
pub struct Ledger {
    /// Storage handle (shared with the components below)
    store: Arc<dyn Store>,

    /// The single balance-mutation path
    mutator: Arc<BalanceMutator>,

    /// Two-legged conversion engine
    conversions: ConversionEngine,

    /// Deposit orchestrator
    deposits: DepositOrchestrator,

    /// Withdrawal orchestrator
    withdrawals: WithdrawalOrchestrator,

    /// Rate source, consulted at call time
    rates: Arc<dyn RateProvider>,

    /// Webhook decoder (present when a shared secret is configured)
    decoder: Option<WebhookDecoder>,

    /// Metrics collector
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open the ledger over RocksDB with the given collaborators
    pub fn open(
        config: Config,
        directory: Arc<dyn OwnerDirectory>,
        rates: Arc<dyn RateProvider>,
        rail: Arc<dyn PayoutRail>,
    ) -> Result<Self> {
        let store: Arc<dyn Store> = Arc::new(RocksStore::open(&config)?);
        Self::with_store(config, store, directory, rates, rail)
    }

    /// Build the ledger over an externally constructed store
    pub fn with_store(
        config: Config,
        store: Arc<dyn Store>,
        directory: Arc<dyn OwnerDirectory>,
        rates: Arc<dyn RateProvider>,
        rail: Arc<dyn PayoutRail>,
    ) -> Result<Self> {
        let mutator = Arc::new(BalanceMutator::new(store.clone(), config.retry.clone()));
        let conversions = ConversionEngine::new(
            store.clone(),
            mutator.clone(),
            config.conversion.minimum_amount,
        );
        let deposits = DepositOrchestrator::new(store.clone(), mutator.clone(), directory);
        let withdrawals = WithdrawalOrchestrator::new(store.clone(), mutator.clone(), rail);
        let decoder = config
            .webhook
            .shared_secret
            .as_deref()
            .map(WebhookDecoder::new);
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to create metrics: {}", e)))?;

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            data_dir = %config.data_dir.display(),
            "Ledger opened"
        );

        Ok(Self {
            store,
            mutator,
            conversions,
            deposits,
            withdrawals,
            rates,
            decoder,
            metrics,
            config,
        })
    }

    /// Current balance of the owner's wallet in `currency`, provisioning the
    /// wallet if it does not exist yet
    pub fn balance(&self, owner: &OwnerId, currency: Currency) -> Result<Decimal> {
        Ok(self.store.wallet_for_owner(owner, currency)?.balance)
    }

    /// All wallets belonging to an owner
    pub fn wallets(&self, owner: &OwnerId) -> Result<Vec<Wallet>> {
        self.store.wallets_for_owner(owner)
    }

    /// Transaction history matching the filter, oldest first
    pub fn history(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
        self.store.list_transactions(filter)
    }

    /// Look up a transaction by id
    pub fn transaction(&self, transaction_id: Uuid) -> Result<Transaction> {
        self.store.get_transaction(transaction_id)
    }

    /// Verify a raw webhook delivery and apply it as a deposit
    pub async fn ingest_webhook(&self, body: &[u8], signature: &str) -> Result<DepositOutcome> {
        let decoder = self.decoder.as_ref().ok_or_else(|| {
            Error::Config("webhook shared secret not configured".to_string())
        })?;
        let event = decoder.decode(body, signature)?;
        self.ingest_deposit(event).await
    }

    /// Apply an already-verified payment event as a deposit
    pub async fn ingest_deposit(&self, event: PaymentEvent) -> Result<DepositOutcome> {
        let start = Instant::now();
        let outcome = self.deposits.handle_deposit(event).await;
        self.metrics
            .record_commit_duration(start.elapsed().as_secs_f64());

        match &outcome {
            Ok(DepositOutcome::Applied(_)) | Ok(DepositOutcome::Pending(_)) => {
                self.metrics.record_deposit();
            }
            Ok(DepositOutcome::Duplicate(_)) => self.metrics.record_duplicate_event(),
            Err(_) => {}
        }
        outcome
    }

    /// Withdraw from a wallet via a payout rail method
    pub async fn withdraw(
        &self,
        wallet_id: Uuid,
        amount: Decimal,
        method: PayoutMethod,
        details: PayoutDetails,
    ) -> Result<WithdrawalOutcome> {
        let start = Instant::now();
        let outcome = self
            .withdrawals
            .handle_withdrawal(wallet_id, amount, method, details)
            .await;
        self.metrics
            .record_commit_duration(start.elapsed().as_secs_f64());

        match &outcome {
            Ok(_) => self.metrics.record_withdrawal(),
            Err(Error::InsufficientFunds { .. }) => self.metrics.record_insufficient_funds(),
            Err(_) => {}
        }
        outcome
    }

    /// Apply the payout rail's asynchronous outcome for a withdrawal
    pub async fn confirm_payout(
        &self,
        transaction_id: Uuid,
        result: PayoutResult,
    ) -> Result<Transaction> {
        self.withdrawals.confirm_payout(transaction_id, result).await
    }

    /// Convert between the owner's two currency wallets at the current rate
    pub async fn convert(
        &self,
        owner: &OwnerId,
        from: Currency,
        to: Currency,
        amount: Decimal,
    ) -> Result<Conversion> {
        let rate = self.rates.rate(from, to).await?;
        let outcome = self.conversions.convert(owner, from, to, amount, rate).await;

        match &outcome {
            Ok(_) => self.metrics.record_conversion(),
            Err(Error::InsufficientFunds { .. }) => self.metrics.record_insufficient_funds(),
            Err(_) => {}
        }
        outcome
    }

    /// PENDING transactions older than the configured reconciliation timeout
    pub fn stale_pending(&self) -> Result<Vec<Transaction>> {
        let cutoff = Utc::now()
            - ChronoDuration::seconds(self.config.reconciliation.pending_timeout_secs as i64);
        let pending = self.store.list_pending(cutoff)?;
        self.metrics.update_pending_transactions(pending.len() as i64);
        Ok(pending)
    }

    /// Re-drive the commit of a stale PENDING transaction
    pub async fn retry_pending(&self, transaction_id: Uuid) -> Result<Applied> {
        self.mutator.retry_commit(transaction_id).await
    }

    /// Events parked for operator review
    pub fn parked_events(&self) -> Result<Vec<ParkedEvent>> {
        let parked = self.store.list_parked()?;
        self.metrics.update_parked_events(parked.len() as i64);
        Ok(parked)
    }

    /// Metrics collector (for exposition)
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration the ledger was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use tempfile::TempDir;

    struct SingleUserDirectory;

    #[async_trait]
    impl OwnerDirectory for SingleUserDirectory {
        async fn resolve(&self, reference: &str) -> Result<Option<OwnerId>> {
            Ok((reference == "user@example.com").then(|| OwnerId::new("user-1")))
        }
    }

    struct FixedRates;

    #[async_trait]
    impl RateProvider for FixedRates {
        async fn rate(&self, from: Currency, to: Currency) -> Result<Decimal> {
            Ok(match (from, to) {
                (Currency::USD, Currency::CAD) => Decimal::new(135, 2),
                (Currency::CAD, Currency::USD) => {
                    Decimal::ONE / Decimal::new(135, 2)
                }
                _ => Decimal::ONE,
            })
        }
    }

    struct AcceptAllRail;

    #[async_trait]
    impl PayoutRail for AcceptAllRail {
        async fn submit(&self, _instruction: crate::providers::PayoutInstruction) -> Result<()> {
            Ok(())
        }
    }

    fn test_ledger(secret: Option<&str>) -> (Ledger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.retry.base_delay_ms = 1;
        config.webhook.shared_secret = secret.map(String::from);
        let ledger = Ledger::open(
            config,
            Arc::new(SingleUserDirectory),
            Arc::new(FixedRates),
            Arc::new(AcceptAllRail),
        )
        .unwrap();
        (ledger, temp_dir)
    }

    fn deposit_event(provider_id: &str, cents: i64) -> PaymentEvent {
        PaymentEvent {
            provider_id: provider_id.to_string(),
            amount: Decimal::new(cents, 2),
            currency: Currency::USD,
            reference: "user@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_deposit_then_balance() {
        let (ledger, _temp) = test_ledger(None);
        let owner = OwnerId::new("user-1");

        ledger.ingest_deposit(deposit_event("pp_1", 10000)).await.unwrap();
        assert_eq!(
            ledger.balance(&owner, Currency::USD).unwrap(),
            Decimal::new(10000, 2)
        );
        assert_eq!(ledger.metrics().deposits_total.get(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_deposit_counted() {
        let (ledger, _temp) = test_ledger(None);

        ledger.ingest_deposit(deposit_event("pp_1", 10000)).await.unwrap();
        ledger.ingest_deposit(deposit_event("pp_1", 10000)).await.unwrap();

        assert_eq!(ledger.metrics().deposits_total.get(), 1);
        assert_eq!(ledger.metrics().duplicate_events_total.get(), 1);
    }

    #[tokio::test]
    async fn test_webhook_ingestion() {
        let (ledger, _temp) = test_ledger(Some("secret-key"));
        let body =
            br#"{"id":"pp_9","amount":"42.00","currency":"USD","reference":"user@example.com"}"#;
        let mut mac = Hmac::<Sha256>::new_from_slice(b"secret-key").unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        let outcome = ledger.ingest_webhook(body, &signature).await.unwrap();
        assert!(matches!(outcome, DepositOutcome::Applied(_)));

        let owner = OwnerId::new("user-1");
        assert_eq!(
            ledger.balance(&owner, Currency::USD).unwrap(),
            Decimal::new(4200, 2)
        );
    }

    #[tokio::test]
    async fn test_webhook_requires_configured_secret() {
        let (ledger, _temp) = test_ledger(None);
        let err = ledger.ingest_webhook(b"{}", "00").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_round_trip_conversion_never_creates_value() {
        let (ledger, _temp) = test_ledger(None);
        let owner = OwnerId::new("user-1");

        ledger.ingest_deposit(deposit_event("pp_1", 10000)).await.unwrap();

        // $100 -> CAD and all the way back
        let out = ledger
            .convert(&owner, Currency::USD, Currency::CAD, Decimal::new(10000, 2))
            .await
            .unwrap();
        let back = ledger
            .convert(&owner, Currency::CAD, Currency::USD, out.to_amount)
            .await
            .unwrap();

        assert!(back.to_amount <= Decimal::new(10000, 2));
        assert_eq!(ledger.balance(&owner, Currency::CAD).unwrap(), Decimal::ZERO);
        assert_eq!(ledger.metrics().conversions_total.get(), 2);
    }

    #[tokio::test]
    async fn test_withdraw_and_confirm() {
        let (ledger, _temp) = test_ledger(None);
        let owner = OwnerId::new("user-1");

        ledger.ingest_deposit(deposit_event("pp_1", 10000)).await.unwrap();
        let wallet = &ledger.wallets(&owner).unwrap()[0];

        let outcome = ledger
            .withdraw(
                wallet.id,
                Decimal::new(4000, 2),
                PayoutMethod::Ach,
                PayoutDetails {
                    account_name: Some("Jane Doe".to_string()),
                    account_number: Some("000123456789".to_string()),
                    bank_name: Some("First National".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        ledger
            .confirm_payout(outcome.transaction().id, PayoutResult::Confirmed)
            .await
            .unwrap();

        assert_eq!(
            ledger.balance(&owner, Currency::USD).unwrap(),
            Decimal::new(6000, 2)
        );
        assert_eq!(ledger.metrics().withdrawals_total.get(), 1);
    }

    #[tokio::test]
    async fn test_no_stale_pending_after_clean_operations() {
        let (ledger, _temp) = test_ledger(None);
        ledger.ingest_deposit(deposit_event("pp_1", 10000)).await.unwrap();
        assert!(ledger.stale_pending().unwrap().is_empty());
        assert!(ledger.parked_events().unwrap().is_empty());
    }
}
