//! External collaborator interfaces
//!
//! The ledger core consumes these as trait objects and never reaches into
//! provider internals: identity resolution, rate lookup and payout execution
//! all live behind these seams, injected at construction.

use crate::error::Result;
use crate::types::{Currency, OwnerId, PayoutDetails, PayoutMethod};
use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Resolves deposit-event reference strings to registered owners
#[async_trait]
pub trait OwnerDirectory: Send + Sync {
    /// Resolve a reference (e.g. the recipient email a payer attached to a
    /// payment) to an owner id, or `None` when nobody matches.
    async fn resolve(&self, reference: &str) -> Result<Option<OwnerId>>;
}

/// Supplies an exchange rate for a currency pair at call time.
/// The core does not cache or average rates.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Units of `to` per one unit of `from`
    async fn rate(&self, from: Currency, to: Currency) -> Result<Decimal>;
}

/// A withdrawal instruction handed to the external payout rail
#[derive(Debug, Clone)]
pub struct PayoutInstruction {
    /// The WITHDRAWAL transaction funding this payout
    pub transaction_id: Uuid,
    /// Amount to pay out
    pub amount: Decimal,
    /// Currency
    pub currency: Currency,
    /// Payout rail method
    pub method: PayoutMethod,
    /// Destination details
    pub details: PayoutDetails,
}

/// Result reported asynchronously by the payout rail
#[derive(Debug, Clone)]
pub enum PayoutResult {
    /// The rail confirmed the payout
    Confirmed,
    /// The rail could not complete the payout
    Failed {
        /// Rail-supplied reason
        reason: String,
    },
}

/// Accepts withdrawal instructions and later reports success or failure
/// through the orchestrator's `confirm_payout`.
#[async_trait]
pub trait PayoutRail: Send + Sync {
    /// Submit an instruction. `Ok(())` means accepted for processing, not
    /// completed; the rail confirms asynchronously.
    async fn submit(&self, instruction: PayoutInstruction) -> Result<()>;
}
