//! Auction registry
//!
//! Routes every request for auction X to the one actor that owns X,
//! constructing actors lazily from the catalog and the ledger. The
//! id-to-handle map is the only state shared across auctions; the
//! mutex around it guards lookups and inserts only, never hydration or
//! resolver work.

use crate::actor::{ActorConfig, ActorHandle, AuctionActor, Command, Hydrated};
use crate::auction::{
    Amount, AuctionId, AuctionIdRef, AuctionStatus, AuctionView, Bid, BidError, BidKind,
    BidReceipt, BidderId, BidderIdRef, CloseReason, Rejection,
};
use crate::catalog::{ListingInfo, SharedCatalog};
use crate::ledger::SharedBidLedger;
use crate::notify::SharedNotifier;
use crate::resolver::{BookSnapshot, ProxyCeiling, Winner};
use anyhow::anyhow;
use chrono::Utc;
use futures::TryStreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::{mpsc::error::TrySendError, oneshot};

pub struct AuctionRegistry {
    actors: Mutex<HashMap<AuctionId, ActorHandle>>,
    ledger: SharedBidLedger,
    catalog: SharedCatalog,
    notifier: SharedNotifier,
    config: ActorConfig,
}

impl AuctionRegistry {
    pub fn new(
        ledger: SharedBidLedger,
        catalog: SharedCatalog,
        notifier: SharedNotifier,
        config: ActorConfig,
    ) -> Self {
        Self {
            actors: Mutex::new(HashMap::new()),
            ledger,
            catalog,
            notifier,
            config,
        }
    }

    pub async fn place_bid(
        &self,
        auction: AuctionIdRef<'_>,
        bidder: BidderIdRef<'_>,
        kind: BidKind,
        amount: Amount,
    ) -> Result<BidReceipt, BidError> {
        self.send_command(auction, |reply| Command::PlaceBid {
            bidder: bidder.to_owned(),
            kind,
            amount,
            reply,
        })
        .await?
    }

    pub async fn current_state(&self, auction: AuctionIdRef<'_>) -> Result<AuctionView, BidError> {
        Ok(self.dispatch(auction).await?.view())
    }

    pub async fn force_close(
        &self,
        auction: AuctionIdRef<'_>,
        reason: CloseReason,
    ) -> Result<AuctionView, BidError> {
        self.send_command(auction, |reply| Command::Close { reason, reply })
            .await?
    }

    /// Drops handles of retired actors; their state lives on in the
    /// ledger and rehydrates on the next dispatch.
    pub fn sweep(&self) {
        self.actors.lock().retain(|_, handle| handle.is_alive());
    }

    #[cfg(test)]
    pub fn actor_count(&self) -> usize {
        self.actors.lock().len()
    }

    async fn send_command<R>(
        &self,
        auction: AuctionIdRef<'_>,
        make: impl Fn(oneshot::Sender<R>) -> Command,
    ) -> Result<R, BidError> {
        // one retry, for the window where an actor retires between the
        // map lookup and the send
        for _ in 0..2 {
            let handle = self.dispatch(auction).await?;
            let (reply, rx) = oneshot::channel();
            match handle.try_send(make(reply)) {
                Ok(()) => {
                    return Ok(rx
                        .await
                        .map_err(|_| anyhow!("auction worker dropped the request"))?)
                }
                Err(TrySendError::Full(_)) => return Err(Rejection::Busy.into()),
                Err(TrySendError::Closed(_)) => {
                    self.actors.lock().remove(auction);
                }
            }
        }
        Err(anyhow!("auction worker for {} keeps going away", auction).into())
    }

    /// Looks up or constructs the actor for `auction`. Concurrent
    /// callers may race through hydration, but exactly one handle wins
    /// the insert and becomes the auction's writer; the losers' work
    /// was read-only.
    async fn dispatch(&self, auction: AuctionIdRef<'_>) -> Result<ActorHandle, BidError> {
        if let Some(handle) = self.actors.lock().get(auction) {
            if handle.is_alive() {
                return Ok(handle.clone());
            }
        }

        let listing = self
            .catalog
            .listing(auction)
            .await?
            .ok_or_else(|| Rejection::AuctionNotFound(auction.to_owned()))?;
        let hydrated = self.hydrate(auction, &listing).await?;
        let overdue = hydrated.status == AuctionStatus::Open && listing.end_time <= Utc::now();

        let mut actors = self.actors.lock();
        match actors.get(auction) {
            Some(handle) if handle.is_alive() => Ok(handle.clone()),
            _ => {
                let handle = AuctionActor::spawn(
                    auction.to_owned(),
                    listing,
                    hydrated,
                    self.ledger.clone(),
                    self.notifier.clone(),
                    self.config,
                );
                if overdue {
                    // the end time passed while no actor was running;
                    // the close event goes first in the fresh queue so
                    // no bid can get ahead of it
                    let (reply, _) = oneshot::channel();
                    let _ = handle.try_send(Command::Close {
                        reason: CloseReason::Expired,
                        reply,
                    });
                }
                actors.insert(auction.to_owned(), handle.clone());
                Ok(handle)
            }
        }
    }

    /// Rebuilds the book from the ledger tail. Only the winner can
    /// hold a live ceiling (losing ceilings are consumed at resolution
    /// time), so their last proxy submission is all that needs
    /// recovering.
    async fn hydrate(
        &self,
        auction: AuctionIdRef<'_>,
        listing: &ListingInfo,
    ) -> Result<Hydrated, BidError> {
        let mut book = BookSnapshot::new(listing.starting_price);
        let mut last_seq = 0;
        let mut winning: Option<Bid> = None;
        let mut last_proxy: HashMap<BidderId, ProxyCeiling> = HashMap::new();

        let mut history = self.ledger.history(auction).await?;
        while let Some(bid) = history.try_next().await? {
            last_seq = bid.seq;
            if bid.kind == BidKind::Proxy {
                last_proxy.insert(
                    bid.bidder.clone(),
                    ProxyCeiling {
                        ceiling: bid.submitted_amount,
                        seq: bid.seq,
                    },
                );
            }
            if bid.is_winning {
                winning = Some(bid);
            }
        }

        if let Some(winner) = winning {
            book.current_price = winner.effective_amount;
            if let Some(proxy) = last_proxy.get(&winner.bidder) {
                if proxy.ceiling > book.current_price {
                    book.proxies.insert(winner.bidder.clone(), *proxy);
                }
            }
            book.winner = Some(Winner {
                bidder: winner.bidder,
                seq: winner.seq,
            });
        }

        let status = if self.ledger.close_record(auction).await?.is_some() {
            AuctionStatus::Closed
        } else {
            AuctionStatus::Open
        };

        Ok(Hydrated {
            book,
            status,
            next_seq: last_seq + 1,
        })
    }
}
