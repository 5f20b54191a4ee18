//! Close scheduler
//!
//! Fires a close event for every auction at or after its stored end
//! time, even when no bid ever arrives. Firing precision does not
//! matter for correctness: the close lands in the owning actor's FIFO
//! queue, and queue order is the only tie-break against in-flight
//! bids. Closing an already-closed auction is a no-op, which makes
//! firing idempotent across restarts.

use crate::auction::{AuctionId, BidError, CloseReason, Rejection};
use crate::catalog::AuctionCatalog;
use crate::registry::AuctionRegistry;
use anyhow::Result;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

pub struct CloseScheduler {
    registry: Arc<AuctionRegistry>,
    queue: Mutex<BTreeSet<(DateTime<Utc>, AuctionId)>>,
    bell: Notify,
}

impl CloseScheduler {
    pub fn new(registry: Arc<AuctionRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            queue: Mutex::new(BTreeSet::new()),
            bell: Notify::new(),
        })
    }

    pub fn schedule(&self, auction: AuctionId, end_time: DateTime<Utc>) {
        self.queue.lock().insert((end_time, auction));
        self.bell.notify_one();
    }

    /// Re-derives the schedule from the catalog on startup. Auctions
    /// whose end time already passed get their close event on the
    /// first loop iteration.
    pub async fn recover(&self, catalog: &dyn AuctionCatalog) -> Result<()> {
        let open = catalog.open_auctions().await?;
        info!(auctions = open.len(), "recovered close schedule");
        for (auction, end_time) in open {
            self.schedule(auction, end_time);
        }
        Ok(())
    }

    pub async fn run(self: Arc<Self>) {
        loop {
            let next = self.queue.lock().iter().next().cloned();
            let Some((end_time, auction)) = next else {
                self.bell.notified().await;
                continue;
            };

            let now = Utc::now();
            if end_time > now {
                let wait = (end_time - now)
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    // a new earliest entry may have been scheduled
                    _ = self.bell.notified() => {}
                }
                continue;
            }

            self.queue.lock().remove(&(end_time, auction.clone()));
            match self
                .registry
                .force_close(&auction, CloseReason::Expired)
                .await
            {
                Ok(view) => {
                    debug!(%auction, final_price = view.current_price, "close event delivered");
                }
                Err(BidError::Rejected(Rejection::AuctionNotFound(_))) => {
                    debug!(%auction, "scheduled auction no longer listed");
                }
                Err(err) => {
                    warn!(%auction, %err, "close failed, rescheduling");
                    self.schedule(auction, Utc::now() + TimeDelta::seconds(5));
                }
            }
        }
    }
}
