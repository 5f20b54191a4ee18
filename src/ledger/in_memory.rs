//! Fake in-memory ledger.
//!
//! Useful for unit tests and for running the engine without a
//! database.

use super::BidLedger;
use crate::auction::{AuctionId, AuctionIdRef, Bid};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
pub struct InMemoryLedger {
    partitions: Mutex<HashMap<AuctionId, Vec<Bid>>>,
    closes: Mutex<HashMap<AuctionId, DateTime<Utc>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BidLedger for InMemoryLedger {
    async fn append(&self, entries: Vec<Bid>) -> Result<()> {
        let Some(first) = entries.first() else {
            return Ok(());
        };
        let auction = first.auction.clone();

        let mut partitions = self.partitions.lock();
        let partition = partitions.entry(auction.clone()).or_default();

        // validate the whole batch before touching the partition, so a
        // failed append appends nothing
        let mut expected = partition.len() as u64 + 1;
        for bid in &entries {
            if bid.auction != auction {
                bail!("mixed auctions in one append");
            }
            if bid.seq != expected {
                bail!(
                    "sequence gap on auction {}: got {}, expected {}",
                    auction,
                    bid.seq,
                    expected
                );
            }
            expected += 1;
        }

        for bid in entries {
            if bid.is_winning {
                if let Some(previous) = partition.iter_mut().rev().find(|b| b.is_winning) {
                    previous.is_winning = false;
                }
            }
            partition.push(bid);
        }
        Ok(())
    }

    async fn history(&self, auction: AuctionIdRef<'_>) -> Result<BoxStream<'static, Result<Bid>>> {
        let bids = self
            .partitions
            .lock()
            .get(auction)
            .cloned()
            .unwrap_or_default();
        Ok(stream::iter(bids.into_iter().map(Ok)).boxed())
    }

    async fn current_winner(&self, auction: AuctionIdRef<'_>) -> Result<Option<Bid>> {
        Ok(self
            .partitions
            .lock()
            .get(auction)
            .and_then(|partition| partition.iter().rev().find(|b| b.is_winning).cloned()))
    }

    async fn record_close(
        &self,
        auction: AuctionIdRef<'_>,
        closed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.closes
            .lock()
            .entry(auction.to_owned())
            .or_insert(closed_at);
        Ok(())
    }

    async fn close_record(&self, auction: AuctionIdRef<'_>) -> Result<Option<DateTime<Utc>>> {
        Ok(self.closes.lock().get(auction).copied())
    }
}
