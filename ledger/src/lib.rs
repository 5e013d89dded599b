//! NorthSend Ledger
//!
//! Wallet and transaction core for a cross-border money transfer service.
//!
//! # Architecture
//!
//! - **Single mutation path**: every balance change goes through the
//!   [`BalanceMutator`], which pairs a transaction-log entry with an atomic
//!   balance delta
//! - **Per-wallet serialization**: commits against one wallet run under a
//!   wallet-scoped lock, so concurrent mutations never lose updates
//! - **Compensation over rollback**: failed conversion and payout legs are
//!   made whole with linked reversal transactions, never by editing
//!   terminal records
//!
//! # Invariants
//!
//! - Balances never go below zero
//! - Terminal transactions (COMPLETED/FAILED) are immutable
//! - A provider payment event credits a wallet at most once
//! - Conversion rounding may lose value, never create it

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod convert;
pub mod deposit;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod mutator;
pub mod providers;
pub mod storage;
pub mod types;
pub mod webhook;
pub mod withdraw;

// Re-exports
pub use config::Config;
pub use convert::{Conversion, ConversionEngine};
pub use deposit::{DepositOrchestrator, DepositOutcome};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use metrics::Metrics;
pub use mutator::{Applied, BalanceMutator, MutationRequest};
pub use providers::{
    OwnerDirectory, PayoutInstruction, PayoutRail, PayoutResult, RateProvider,
};
pub use storage::{RocksStore, Store};
pub use types::{
    Currency, OwnerId, ParkedEvent, PaymentEvent, PayoutDetails, PayoutField, PayoutMethod,
    Transaction, TransactionFilter, TransactionKind, TransactionMetadata, TransactionStatus,
    Wallet,
};
pub use webhook::WebhookDecoder;
pub use withdraw::{WithdrawalOrchestrator, WithdrawalOutcome};
