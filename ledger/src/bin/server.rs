//! Ledger service binary
//!
//! Opens the ledger from environment configuration, wires in the default
//! collaborators and runs the reconciliation sweep until shutdown. Transport
//! wiring (HTTP/gRPC) is added by the deployment that embeds this crate.

use async_trait::async_trait;
use northsend_ledger::{
    Config, Currency, Error, Ledger, OwnerDirectory, OwnerId, PayoutInstruction, PayoutRail,
    RateProvider, Result,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::time::Duration;

/// Directory stub: treats the event reference as the owner id.
/// Deployments replace this with a lookup against the user service.
struct PassthroughDirectory;

#[async_trait]
impl OwnerDirectory for PassthroughDirectory {
    async fn resolve(&self, reference: &str) -> Result<Option<OwnerId>> {
        Ok((!reference.is_empty()).then(|| OwnerId::new(reference)))
    }
}

/// Fixed USD/CAD rate source for standalone operation
struct FixedRates;

#[async_trait]
impl RateProvider for FixedRates {
    async fn rate(&self, from: Currency, to: Currency) -> Result<Decimal> {
        match (from, to) {
            (Currency::USD, Currency::CAD) => Ok(Decimal::new(135, 2)),
            (Currency::CAD, Currency::USD) => Ok(Decimal::ONE / Decimal::new(135, 2)),
            _ => Err(Error::InvalidEvent(format!(
                "no rate for {} to {}",
                from, to
            ))),
        }
    }
}

/// Rail stub that accepts every instruction and logs it
struct LoggingRail;

#[async_trait]
impl PayoutRail for LoggingRail {
    async fn submit(&self, instruction: PayoutInstruction) -> Result<()> {
        tracing::info!(
            transaction_id = %instruction.transaction_id,
            amount = %instruction.amount,
            method = %instruction.method,
            "Payout instruction accepted"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting NorthSend Ledger");

    let config = Config::from_env()?;
    let sweep_interval = Duration::from_secs(config.reconciliation.pending_timeout_secs);

    let ledger = Arc::new(Ledger::open(
        config,
        Arc::new(PassthroughDirectory),
        Arc::new(FixedRates),
        Arc::new(LoggingRail),
    )?);
    tracing::info!("Ledger opened successfully");

    // Periodic reconciliation sweep for transactions stranded PENDING
    let sweeper = ledger.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            let stale = match sweeper.stale_pending() {
                Ok(stale) => stale,
                Err(err) => {
                    tracing::error!(error = %err, "Reconciliation scan failed");
                    continue;
                }
            };
            for txn in stale {
                match sweeper.retry_pending(txn.id).await {
                    Ok(applied) if applied.is_completed() => {
                        tracing::info!(transaction_id = %txn.id, "Reconciled pending transaction");
                    }
                    Ok(_) => {
                        tracing::warn!(transaction_id = %txn.id, "Transaction still pending");
                    }
                    Err(err) => {
                        tracing::error!(
                            transaction_id = %txn.id,
                            error = %err,
                            "Reconciliation retry failed"
                        );
                    }
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down ledger");
    Ok(())
}
