//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `wallets` - Wallet records (key: wallet_id)
//! - `transactions` - Transaction records (key: transaction_id)
//! - `indices` - Secondary indices for fast lookups
//! - `parked` - Deposit events held for manual reconciliation
//!
//! # Index keys
//!
//! - `o|<owner>|<currency>` -> wallet_id (one wallet per owner per currency)
//! - `w|<wallet_id><transaction_id>` -> empty (wallet history scan)
//! - `p|<provider_payment_id>` -> transaction_id (idempotency lookup)
//! - `s|<created_at_nanos_be><transaction_id>` -> empty (PENDING only,
//!   removed when the transaction goes terminal)
//!
//! # Concurrency
//!
//! `commit` and `fail` serialize per wallet through a lock registry: the
//! wallet's mutex is held across the re-read/validate/WriteBatch cycle, so
//! two commits on the same wallet never interleave partially. The lock is
//! never held across an await point (all storage calls here are synchronous).

use crate::{
    error::{Error, Result},
    types::{
        Currency, OwnerId, ParkedEvent, PaymentEvent, Transaction, TransactionFilter,
        TransactionKind, TransactionMetadata, TransactionStatus, Wallet,
    },
    Config,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode,
    Options, WriteBatch, DB,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_WALLETS: &str = "wallets";
const CF_TRANSACTIONS: &str = "transactions";
const CF_INDICES: &str = "indices";
const CF_PARKED: &str = "parked";

/// Durable, queryable storage of Wallet and Transaction records.
///
/// This trait is the dependency-injection seam for the whole crate: every
/// component takes an `Arc<dyn Store>` rather than reaching for a shared
/// client singleton, so tests can substitute doubles.
pub trait Store: Send + Sync {
    /// Get the owner's wallet for a currency, lazily creating a zero-balance
    /// wallet on first access.
    fn wallet_for_owner(&self, owner: &OwnerId, currency: Currency) -> Result<Wallet>;

    /// Get wallet by id
    fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet>;

    /// All wallets belonging to an owner
    fn wallets_for_owner(&self, owner: &OwnerId) -> Result<Vec<Wallet>>;

    /// Append a PENDING transaction. Rejects a provider payment id that was
    /// already indexed with `DuplicateEvent`.
    fn append_transaction(
        &self,
        wallet_id: Uuid,
        kind: TransactionKind,
        amount: Decimal,
        currency: Currency,
        description: &str,
        metadata: TransactionMetadata,
    ) -> Result<Transaction>;

    /// Atomically re-read the balance, reject if the delta would drive it
    /// negative, apply the delta, and mark the transaction COMPLETED.
    /// Serialized per wallet.
    fn commit(&self, transaction_id: Uuid, delta: Decimal) -> Result<Wallet>;

    /// Mark a PENDING transaction FAILED. Idempotent when already FAILED;
    /// `AlreadyTerminal` when COMPLETED.
    fn fail(&self, transaction_id: Uuid, reason: &str) -> Result<Transaction>;

    /// Get transaction by id
    fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction>;

    /// Look up a transaction by provider payment id (idempotency check)
    fn find_by_provider_id(&self, provider_id: &str) -> Result<Option<Transaction>>;

    /// Transaction history, filterable by wallet, kind, status, time range
    fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>>;

    /// PENDING transactions created before the cutoff, oldest first.
    /// Input for the reconciliation sweep.
    fn list_pending(&self, older_than: DateTime<Utc>) -> Result<Vec<Transaction>>;

    /// Hold an unresolvable deposit event for manual reconciliation
    fn park_event(&self, event: &PaymentEvent, reason: &str) -> Result<()>;

    /// Parked events awaiting manual review
    fn list_parked(&self) -> Result<Vec<ParkedEvent>>;
}

/// RocksDB-backed implementation of [`Store`]
pub struct RocksStore {
    db: Arc<DB>,

    /// Per-wallet commit locks
    wallet_locks: DashMap<Uuid, Arc<Mutex<()>>>,

    /// Per-provider-id append locks, held across the idempotency check and
    /// the index write so concurrent deliveries of one event cannot both pass
    provider_locks: DashMap<String, Arc<Mutex<()>>>,

    /// Serializes lazy wallet provisioning (rare path)
    provision_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for write-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_wallets()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_transactions()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_PARKED, Self::cf_options_parked()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = %path.display(), "Opened RocksDB ledger store");

        Ok(Self {
            db: Arc::new(db),
            wallet_locks: DashMap::new(),
            provider_locks: DashMap::new(),
            provision_lock: Mutex::new(()),
        })
    }

    // Column family options

    fn cf_options_wallets() -> Options {
        let mut opts = Options::default();
        // Wallets are frequently read, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_transactions() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Indices benefit from bloom filters
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_parked() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    // Helper: get column family handle

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::StorageUnavailable(format!("Column family {} not found", name)))
    }

    fn wallet_lock(&self, wallet_id: Uuid) -> Arc<Mutex<()>> {
        self.wallet_locks
            .entry(wallet_id)
            .or_default()
            .clone()
    }

    // Index key helpers

    fn index_key_owner_wallet(owner: &OwnerId, currency: Currency) -> Vec<u8> {
        let mut key = b"o|".to_vec();
        key.extend_from_slice(owner.as_str().as_bytes());
        key.push(b'|');
        key.extend_from_slice(currency.code().as_bytes());
        key
    }

    fn index_key_wallet_txn(wallet_id: Uuid, transaction_id: Uuid) -> Vec<u8> {
        let mut key = b"w|".to_vec();
        key.extend_from_slice(wallet_id.as_bytes());
        key.extend_from_slice(transaction_id.as_bytes());
        key
    }

    fn index_key_provider(provider_id: &str) -> Vec<u8> {
        let mut key = b"p|".to_vec();
        key.extend_from_slice(provider_id.as_bytes());
        key
    }

    fn index_key_pending(created_at: DateTime<Utc>, transaction_id: Uuid) -> Vec<u8> {
        let mut key = b"s|".to_vec();
        let nanos = created_at.timestamp_nanos_opt().unwrap_or(0);
        key.extend_from_slice(&nanos.to_be_bytes());
        key.extend_from_slice(transaction_id.as_bytes());
        key
    }

    // Record read/write helpers

    fn read_wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        let cf = self.cf(CF_WALLETS)?;
        let value = self
            .db
            .get_cf(&cf, wallet_id.as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("wallet {}", wallet_id)))?;
        let wallet: Wallet = bincode::deserialize(&value)?;
        Ok(wallet)
    }

    fn read_transaction(&self, transaction_id: Uuid) -> Result<Transaction> {
        let cf = self.cf(CF_TRANSACTIONS)?;
        let value = self
            .db
            .get_cf(&cf, transaction_id.as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", transaction_id)))?;
        let txn: Transaction = bincode::deserialize(&value)?;
        Ok(txn)
    }

    /// Scan an index prefix, returning raw (key, value) pairs
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut items = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            items.push((key, value));
        }
        Ok(items)
    }
}

impl Store for RocksStore {
    fn wallet_for_owner(&self, owner: &OwnerId, currency: Currency) -> Result<Wallet> {
        let cf_indices = self.cf(CF_INDICES)?;
        let index_key = Self::index_key_owner_wallet(owner, currency);

        if let Some(value) = self.db.get_cf(&cf_indices, &index_key)? {
            let wallet_id = uuid_from_slice(&value)?;
            return self.read_wallet(wallet_id);
        }

        // First access: provision a zero-balance wallet. The provisioning
        // lock keeps two concurrent first accesses from creating two wallets
        // for the same owner+currency pair.
        let _guard = self.provision_lock.lock();

        if let Some(value) = self.db.get_cf(&cf_indices, &index_key)? {
            let wallet_id = uuid_from_slice(&value)?;
            return self.read_wallet(wallet_id);
        }

        let now = Utc::now();
        let wallet = Wallet {
            id: Uuid::new_v4(),
            owner: owner.clone(),
            currency,
            balance: Decimal::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let cf_wallets = self.cf(CF_WALLETS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_wallets, wallet.id.as_bytes(), bincode::serialize(&wallet)?);
        batch.put_cf(&cf_indices, &index_key, wallet.id.as_bytes());
        self.db.write(batch)?;

        tracing::info!(
            wallet_id = %wallet.id,
            owner = %owner,
            currency = %currency,
            "Provisioned wallet"
        );

        Ok(wallet)
    }

    fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        self.read_wallet(wallet_id)
    }

    fn wallets_for_owner(&self, owner: &OwnerId) -> Result<Vec<Wallet>> {
        let mut prefix = b"o|".to_vec();
        prefix.extend_from_slice(owner.as_str().as_bytes());
        prefix.push(b'|');

        let mut wallets = Vec::new();
        for (_, value) in self.scan_prefix(CF_INDICES, &prefix)? {
            let wallet_id = uuid_from_slice(&value)?;
            wallets.push(self.read_wallet(wallet_id)?);
        }
        Ok(wallets)
    }

    fn append_transaction(
        &self,
        wallet_id: Uuid,
        kind: TransactionKind,
        amount: Decimal,
        currency: Currency,
        description: &str,
        metadata: TransactionMetadata,
    ) -> Result<Transaction> {
        let wallet = self.read_wallet(wallet_id)?;
        if wallet.currency != currency {
            return Err(Error::InvalidEvent(format!(
                "currency {} does not match wallet currency {}",
                currency, wallet.currency
            )));
        }

        let cf_indices = self.cf(CF_INDICES)?;

        // Idempotency guard: a provider payment id maps to exactly one
        // transaction, ever. The lock stays held through the batch write
        // below, so two concurrent appends for the same id serialize and
        // the loser sees the winner's index entry.
        let provider_lock = metadata.provider_payment_id.as_deref().map(|provider_id| {
            self.provider_locks
                .entry(provider_id.to_string())
                .or_default()
                .clone()
        });
        let _provider_guard = provider_lock.as_ref().map(|lock| lock.lock());

        if let Some(provider_id) = metadata.provider_payment_id.as_deref() {
            let provider_key = Self::index_key_provider(provider_id);
            if self.db.get_cf(&cf_indices, &provider_key)?.is_some() {
                return Err(Error::DuplicateEvent(provider_id.to_string()));
            }
        }

        let now = Utc::now();
        let txn = Transaction {
            id: Uuid::now_v7(),
            wallet_id,
            kind,
            amount,
            currency,
            status: TransactionStatus::Pending,
            description: description.to_string(),
            metadata,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        let cf_txns = self.cf(CF_TRANSACTIONS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_txns, txn.id.as_bytes(), bincode::serialize(&txn)?);
        batch.put_cf(&cf_indices, Self::index_key_wallet_txn(wallet_id, txn.id), b"");
        batch.put_cf(&cf_indices, Self::index_key_pending(txn.created_at, txn.id), b"");
        if let Some(provider_id) = txn.metadata.provider_payment_id.as_deref() {
            batch.put_cf(&cf_indices, Self::index_key_provider(provider_id), txn.id.as_bytes());
        }
        self.db.write(batch)?;

        tracing::debug!(
            transaction_id = %txn.id,
            wallet_id = %wallet_id,
            kind = %kind,
            amount = %amount,
            "Transaction appended"
        );

        Ok(txn)
    }

    fn commit(&self, transaction_id: Uuid, delta: Decimal) -> Result<Wallet> {
        let txn = self.read_transaction(transaction_id)?;
        let lock = self.wallet_lock(txn.wallet_id);
        let _guard = lock.lock();

        // Re-read under the wallet lock: the status or balance may have
        // moved since the unlocked read.
        let mut txn = self.read_transaction(transaction_id)?;
        if txn.status.is_terminal() {
            return Err(Error::AlreadyTerminal(transaction_id));
        }

        let mut wallet = self.read_wallet(txn.wallet_id)?;
        let new_balance = wallet.balance + delta;
        if new_balance < Decimal::ZERO {
            return Err(Error::InsufficientFunds {
                available: wallet.balance,
                requested: -delta,
            });
        }

        let now = Utc::now();
        wallet.balance = new_balance;
        wallet.version += 1;
        wallet.updated_at = now;
        txn.status = TransactionStatus::Completed;
        txn.updated_at = now;

        let cf_wallets = self.cf(CF_WALLETS)?;
        let cf_txns = self.cf(CF_TRANSACTIONS)?;
        let cf_indices = self.cf(CF_INDICES)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_wallets, wallet.id.as_bytes(), bincode::serialize(&wallet)?);
        batch.put_cf(&cf_txns, txn.id.as_bytes(), bincode::serialize(&txn)?);
        batch.delete_cf(&cf_indices, Self::index_key_pending(txn.created_at, txn.id));
        self.db.write(batch)?;

        tracing::debug!(
            transaction_id = %transaction_id,
            wallet_id = %wallet.id,
            delta = %delta,
            balance = %wallet.balance,
            version = wallet.version,
            "Commit applied"
        );

        Ok(wallet)
    }

    fn fail(&self, transaction_id: Uuid, reason: &str) -> Result<Transaction> {
        let txn = self.read_transaction(transaction_id)?;
        let lock = self.wallet_lock(txn.wallet_id);
        let _guard = lock.lock();

        let mut txn = self.read_transaction(transaction_id)?;
        match txn.status {
            // Idempotent: failing a failed transaction is a no-op
            TransactionStatus::Failed => return Ok(txn),
            TransactionStatus::Completed => return Err(Error::AlreadyTerminal(transaction_id)),
            TransactionStatus::Pending => {}
        }

        txn.status = TransactionStatus::Failed;
        txn.failure_reason = Some(reason.to_string());
        txn.updated_at = Utc::now();

        let cf_txns = self.cf(CF_TRANSACTIONS)?;
        let cf_indices = self.cf(CF_INDICES)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_txns, txn.id.as_bytes(), bincode::serialize(&txn)?);
        batch.delete_cf(&cf_indices, Self::index_key_pending(txn.created_at, txn.id));
        self.db.write(batch)?;

        tracing::warn!(
            transaction_id = %transaction_id,
            reason = reason,
            "Transaction failed"
        );

        Ok(txn)
    }

    fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction> {
        self.read_transaction(transaction_id)
    }

    fn find_by_provider_id(&self, provider_id: &str) -> Result<Option<Transaction>> {
        let cf_indices = self.cf(CF_INDICES)?;
        let key = Self::index_key_provider(provider_id);

        match self.db.get_cf(&cf_indices, &key)? {
            Some(value) => {
                let transaction_id = uuid_from_slice(&value)?;
                Ok(Some(self.read_transaction(transaction_id)?))
            }
            None => Ok(None),
        }
    }

    fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
        let mut transactions = Vec::new();

        if let Some(wallet_id) = filter.wallet_id {
            // Scan the wallet index: w|<wallet_id><transaction_id>
            let mut prefix = b"w|".to_vec();
            prefix.extend_from_slice(wallet_id.as_bytes());

            for (key, _) in self.scan_prefix(CF_INDICES, &prefix)? {
                if key.len() < prefix.len() + 16 {
                    continue;
                }
                let txn_id = uuid_from_slice(&key[prefix.len()..prefix.len() + 16])?;
                let txn = self.read_transaction(txn_id)?;
                if filter.matches(&txn) {
                    transactions.push(txn);
                }
            }
        } else {
            let cf = self.cf(CF_TRANSACTIONS)?;
            for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
                let (_, value) = item?;
                let txn: Transaction = bincode::deserialize(&value)?;
                if filter.matches(&txn) {
                    transactions.push(txn);
                }
            }
        }

        transactions.sort_by_key(|t| t.created_at);
        Ok(transactions)
    }

    fn list_pending(&self, older_than: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let cutoff_nanos = older_than.timestamp_nanos_opt().unwrap_or(i64::MAX);
        let mut pending = Vec::new();

        // Keys are time-ordered (big-endian nanos), so the scan stops at the
        // first entry at or past the cutoff.
        for (key, _) in self.scan_prefix(CF_INDICES, b"s|")? {
            if key.len() < 2 + 8 + 16 {
                continue;
            }
            let nanos = match key[2..10].try_into() {
                Ok(bytes) => i64::from_be_bytes(bytes),
                Err(_) => continue,
            };
            if nanos >= cutoff_nanos {
                break;
            }
            let txn_id = uuid_from_slice(&key[10..26])?;
            let txn = self.read_transaction(txn_id)?;
            // The index only holds PENDING entries, but re-check in case a
            // terminal write raced the scan.
            if txn.status == TransactionStatus::Pending {
                pending.push(txn);
            }
        }

        Ok(pending)
    }

    fn park_event(&self, event: &PaymentEvent, reason: &str) -> Result<()> {
        let parked = ParkedEvent {
            event: event.clone(),
            reason: reason.to_string(),
            parked_at: Utc::now(),
        };

        let cf = self.cf(CF_PARKED)?;
        self.db
            .put_cf(&cf, event.provider_id.as_bytes(), bincode::serialize(&parked)?)?;

        tracing::warn!(
            provider_id = %event.provider_id,
            reference = %event.reference,
            reason = reason,
            "Deposit event parked for manual reconciliation"
        );

        Ok(())
    }

    fn list_parked(&self) -> Result<Vec<ParkedEvent>> {
        let cf = self.cf(CF_PARKED)?;
        let mut parked = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            let event: ParkedEvent = bincode::deserialize(&value)?;
            parked.push(event);
        }
        Ok(parked)
    }
}

fn uuid_from_slice(bytes: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(bytes)
        .map_err(|e| Error::StorageUnavailable(format!("corrupt index value: {}", e)))
}
