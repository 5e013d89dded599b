//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (Decimal for money)

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Wallet owner identifier (resolved user id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    /// Create new owner ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// US Dollar
    USD,
    /// Canadian Dollar
    CAD,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::CAD => "CAD",
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "USD" => Some(Currency::USD),
            "CAD" => Some(Currency::CAD),
            _ => None,
        }
    }

    /// Minor-unit precision (cents for both USD and CAD)
    pub fn minor_units(&self) -> u32 {
        2
    }

    /// Round to the currency's minor unit, half-away-from-zero.
    /// Rounding may only ever lose value across a conversion round trip,
    /// never create it.
    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.minor_units(), RoundingStrategy::MidpointAwayFromZero)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A per-owner, per-currency balance record
///
/// Balance is mutated only through `Store::commit`; no other code path
/// writes it. One wallet per owner per currency, lazily provisioned at zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// Unique wallet ID
    pub id: Uuid,

    /// Owning user
    pub owner: OwnerId,

    /// Wallet currency
    pub currency: Currency,

    /// Current balance (exact decimal, never negative after a commit)
    pub balance: Decimal,

    /// Monotonic version, bumped on every committed delta
    pub version: u64,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

/// Transaction kind; the sign of the balance delta is implied by the kind,
/// the stored amount is always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionKind {
    /// External funds credited to a wallet
    Deposit = 1,
    /// Funds debited for an external payout
    Withdrawal = 2,
    /// Debit leg of a currency conversion
    ConversionDebit = 3,
    /// Credit leg of a currency conversion (also used for reversals)
    ConversionCredit = 4,
}

impl TransactionKind {
    /// Whether this kind credits the wallet
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            TransactionKind::Deposit | TransactionKind::ConversionCredit
        )
    }

    /// Signed balance delta for a positive amount of this kind
    pub fn signed_delta(&self, amount: Decimal) -> Decimal {
        if self.is_credit() {
            amount
        } else {
            -amount
        }
    }

    /// Human-readable label for descriptions and logs
    pub fn label(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::ConversionDebit => "conversion debit",
            TransactionKind::ConversionCredit => "conversion credit",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Transaction status lifecycle: PENDING → COMPLETED | FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Created, balance delta not yet applied
    Pending = 1,
    /// Balance delta applied exactly once (terminal)
    Completed = 2,
    /// No balance delta applied (terminal)
    Failed = 3,
}

impl TransactionStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }
}

/// Opaque provider metadata attached to a transaction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionMetadata {
    /// External payment event id (idempotency key)
    #[serde(default)]
    pub provider_payment_id: Option<String>,

    /// Payout rail method for withdrawals
    #[serde(default)]
    pub payout_method: Option<PayoutMethod>,

    /// Exchange rate used for a conversion leg
    #[serde(default)]
    pub rate: Option<Decimal>,

    /// Correlation id shared by the two legs of a conversion
    #[serde(default)]
    pub correlation_id: Option<Uuid>,

    /// Transaction this record compensates, if any
    #[serde(default)]
    pub reversal_of: Option<Uuid>,

    /// Additional free-form metadata
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl TransactionMetadata {
    /// Metadata carrying just a provider payment id
    pub fn for_provider(provider_payment_id: impl Into<String>) -> Self {
        Self {
            provider_payment_id: Some(provider_payment_id.into()),
            ..Default::default()
        }
    }

    /// Metadata for one leg of a conversion
    pub fn for_conversion(correlation_id: Uuid, rate: Decimal) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            rate: Some(rate),
            ..Default::default()
        }
    }
}

/// An immutable-once-terminal audit record of a single balance-affecting event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Owning wallet (exclusive ownership)
    pub wallet_id: Uuid,

    /// Transaction kind
    pub kind: TransactionKind,

    /// Positive amount; sign is implied by kind
    pub amount: Decimal,

    /// Currency (matches the wallet's)
    pub currency: Currency,

    /// Status lifecycle
    pub status: TransactionStatus,

    /// Human-readable description
    pub description: String,

    /// Provider metadata
    #[serde(default)]
    pub metadata: TransactionMetadata,

    /// Reason recorded when the transaction failed
    #[serde(default)]
    pub failure_reason: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Signed balance delta this transaction applies when committed
    pub fn signed_delta(&self) -> Decimal {
        self.kind.signed_delta(self.amount)
    }
}

/// A validated external payment event supplied by the webhook verifier.
/// Still untrusted input for the ledger: owner lookup, amount sanity and
/// idempotency checks happen before any mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Provider payment id (idempotency key)
    pub provider_id: String,

    /// Amount reported by the provider
    pub amount: Decimal,

    /// Currency reported by the provider
    pub currency: Currency,

    /// Reference string used to resolve the target owner
    pub reference: String,
}

/// An unresolvable deposit event held for manual reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParkedEvent {
    /// The original payment event
    pub event: PaymentEvent,

    /// Why it could not be applied
    pub reason: String,

    /// When it was parked
    pub parked_at: DateTime<Utc>,
}

/// External payout rail method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayoutMethod {
    /// ACH bank transfer (US)
    Ach,
    /// Wire transfer
    Wire,
    /// Interac e-Transfer (Canada)
    Interac,
    /// Direct bank transfer
    BankTransfer,
    /// Cash App
    CashApp,
    /// Venmo
    Venmo,
    /// PayPal
    PayPal,
    /// Zelle
    Zelle,
}

impl PayoutMethod {
    /// Minimum payout amount for this method
    pub fn minimum_amount(&self) -> Decimal {
        match self {
            PayoutMethod::Ach => Decimal::new(10, 0),
            PayoutMethod::Wire => Decimal::new(100, 0),
            PayoutMethod::Interac => Decimal::new(20, 0),
            PayoutMethod::BankTransfer => Decimal::new(50, 0),
            PayoutMethod::CashApp
            | PayoutMethod::Venmo
            | PayoutMethod::PayPal
            | PayoutMethod::Zelle => Decimal::new(5, 0),
        }
    }

    /// Methods offered for a currency
    pub fn available_for(currency: Currency) -> &'static [PayoutMethod] {
        match currency {
            Currency::USD => &[
                PayoutMethod::Ach,
                PayoutMethod::Wire,
                PayoutMethod::CashApp,
                PayoutMethod::Venmo,
                PayoutMethod::PayPal,
                PayoutMethod::Zelle,
            ],
            Currency::CAD => &[PayoutMethod::Interac, PayoutMethod::BankTransfer],
        }
    }

    /// Payout detail fields the method requires
    pub fn required_fields(&self) -> &'static [PayoutField] {
        match self {
            PayoutMethod::CashApp | PayoutMethod::Venmo => &[PayoutField::Username],
            PayoutMethod::PayPal => &[PayoutField::Email],
            PayoutMethod::Zelle => &[PayoutField::Email, PayoutField::Phone],
            PayoutMethod::Interac => &[PayoutField::Email],
            PayoutMethod::BankTransfer | PayoutMethod::Wire | PayoutMethod::Ach => &[
                PayoutField::AccountName,
                PayoutField::AccountNumber,
                PayoutField::BankName,
            ],
        }
    }
}

impl fmt::Display for PayoutMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayoutMethod::Ach => "ACH",
            PayoutMethod::Wire => "WIRE",
            PayoutMethod::Interac => "INTERAC",
            PayoutMethod::BankTransfer => "BANK_TRANSFER",
            PayoutMethod::CashApp => "CASHAPP",
            PayoutMethod::Venmo => "VENMO",
            PayoutMethod::PayPal => "PAYPAL",
            PayoutMethod::Zelle => "ZELLE",
        };
        write!(f, "{}", name)
    }
}

/// Payout detail field names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutField {
    /// Account holder name
    AccountName,
    /// Account number
    AccountNumber,
    /// Bank name
    BankName,
    /// Email address
    Email,
    /// Phone number
    Phone,
    /// Service username
    Username,
}

impl fmt::Display for PayoutField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayoutField::AccountName => "account_name",
            PayoutField::AccountNumber => "account_number",
            PayoutField::BankName => "bank_name",
            PayoutField::Email => "email",
            PayoutField::Phone => "phone",
            PayoutField::Username => "username",
        };
        write!(f, "{}", name)
    }
}

/// Payout destination details supplied by the user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayoutDetails {
    /// Account holder name
    #[serde(default)]
    pub account_name: Option<String>,
    /// Account number
    #[serde(default)]
    pub account_number: Option<String>,
    /// Bank name
    #[serde(default)]
    pub bank_name: Option<String>,
    /// Routing number (optional for all methods)
    #[serde(default)]
    pub routing_number: Option<String>,
    /// Email address
    #[serde(default)]
    pub email: Option<String>,
    /// Phone number
    #[serde(default)]
    pub phone: Option<String>,
    /// Service username
    #[serde(default)]
    pub username: Option<String>,
}

impl PayoutDetails {
    /// Get a field by name
    pub fn field(&self, field: PayoutField) -> Option<&str> {
        let value = match field {
            PayoutField::AccountName => &self.account_name,
            PayoutField::AccountNumber => &self.account_number,
            PayoutField::BankName => &self.bank_name,
            PayoutField::Email => &self.email,
            PayoutField::Phone => &self.phone,
            PayoutField::Username => &self.username,
        };
        value.as_deref().filter(|s| !s.is_empty())
    }
}

/// Filter for transaction history queries
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    /// Restrict to one wallet
    pub wallet_id: Option<Uuid>,
    /// Restrict to one kind
    pub kind: Option<TransactionKind>,
    /// Restrict to one status
    pub status: Option<TransactionStatus>,
    /// Created at or after
    pub from: Option<DateTime<Utc>>,
    /// Created before
    pub to: Option<DateTime<Utc>>,
}

impl TransactionFilter {
    /// Filter for a single wallet
    pub fn for_wallet(wallet_id: Uuid) -> Self {
        Self {
            wallet_id: Some(wallet_id),
            ..Default::default()
        }
    }

    /// Whether the transaction matches this filter
    pub fn matches(&self, txn: &Transaction) -> bool {
        if let Some(wallet_id) = self.wallet_id {
            if txn.wallet_id != wallet_id {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if txn.kind != kind {
                return false;
            }
        }
        if let Some(status) = self.status {
            if txn.status != status {
                return false;
            }
        }
        if let Some(from) = self.from {
            if txn.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if txn.created_at >= to {
                return false;
            }
        }
        true
    }
}
