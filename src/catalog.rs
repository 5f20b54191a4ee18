//! Listing-service contract
//!
//! The item/listing service owns auction lifecycle; the engine only
//! needs the pricing parameters and end time when it first hydrates an
//! actor, plus an enumeration of open auctions so the close scheduler
//! can recover after a restart. Bidder identity is assumed already
//! authenticated by the caller.

use crate::auction::{Amount, AuctionId, AuctionIdRef, BidderId};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListingInfo {
    pub seller: BidderId,
    pub starting_price: Amount,
    /// Floor below which the auction closes without a winner.
    pub reserve_price: Option<Amount>,
    pub end_time: DateTime<Utc>,
}

#[async_trait]
pub trait AuctionCatalog: Send + Sync {
    async fn listing(&self, auction: AuctionIdRef<'_>) -> Result<Option<ListingInfo>>;

    /// Every auction the listing service still considers live. Closing
    /// an already-closed one is a no-op, so over-reporting is fine.
    async fn open_auctions(&self) -> Result<Vec<(AuctionId, DateTime<Utc>)>>;

    /// The listing service announcing that an item entered auction
    /// sale mode.
    async fn publish(&self, auction: AuctionId, info: ListingInfo) -> Result<()>;
}

pub type SharedCatalog = Arc<dyn AuctionCatalog>;

/// In-memory catalog, for tests and for running the engine standalone.
#[derive(Default)]
pub struct InMemoryCatalog {
    listings: Mutex<HashMap<AuctionId, ListingInfo>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuctionCatalog for InMemoryCatalog {
    async fn listing(&self, auction: AuctionIdRef<'_>) -> Result<Option<ListingInfo>> {
        Ok(self.listings.lock().get(auction).cloned())
    }

    async fn open_auctions(&self) -> Result<Vec<(AuctionId, DateTime<Utc>)>> {
        Ok(self
            .listings
            .lock()
            .iter()
            .map(|(id, info)| (id.clone(), info.end_time))
            .collect())
    }

    async fn publish(&self, auction: AuctionId, info: ListingInfo) -> Result<()> {
        self.listings.lock().insert(auction, info);
        Ok(())
    }
}
