//! Append-only bid ledger
//!
//! One partition per auction, ordered by sequence number. The ledger
//! is the source of truth for history and audit, and what an actor
//! replays to rebuild its state after a restart. The per-auction actor
//! is the sole writer to its partition; ownership comes from the
//! registry's single-construction guarantee, not from storage locking,
//! but the backends still verify sequence continuity so a violated
//! assumption surfaces as an error instead of silent corruption.

pub mod in_memory;
pub mod postgres;

pub use self::in_memory::InMemoryLedger;
pub use self::postgres::PostgresLedger;

use crate::auction::{AuctionIdRef, Bid};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::sync::Arc;

#[async_trait]
pub trait BidLedger: Send + Sync {
    /// Appends entries atomically. All entries must belong to the same
    /// auction and carry consecutive sequence numbers continuing the
    /// partition. Appending an entry with `is_winning` set clears the
    /// flag on the partition's previous winning entry; that flag flip
    /// is the only mutation of existing records ever performed.
    ///
    /// Failure is infrastructure-level (retryable), never a business
    /// rejection; on failure nothing is appended.
    async fn append(&self, entries: Vec<Bid>) -> Result<()>;

    /// Full history of one auction in sequence order.
    async fn history(&self, auction: AuctionIdRef<'_>) -> Result<BoxStream<'static, Result<Bid>>>;

    /// The entry currently flagged winning, if any.
    async fn current_winner(&self, auction: AuctionIdRef<'_>) -> Result<Option<Bid>>;

    /// Durably marks the auction closed. Written by the actor before
    /// it freezes its book, so a closed auction can never rehydrate as
    /// open. Idempotent.
    async fn record_close(&self, auction: AuctionIdRef<'_>, closed_at: DateTime<Utc>)
        -> Result<()>;

    /// When the auction was closed, if it was.
    async fn close_record(&self, auction: AuctionIdRef<'_>) -> Result<Option<DateTime<Utc>>>;
}

pub type SharedBidLedger = Arc<dyn BidLedger>;
