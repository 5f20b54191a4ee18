//! Auction actor
//!
//! One tokio task per open auction owns that auction's book and is the
//! sole writer to its ledger partition. Commands are processed one at
//! a time in arrival order; that FIFO queue is the only tie-break
//! between bids and the close event, which makes the resolver's
//! read-then-write sequence safe without any per-call locking. Bids on
//! different auctions run fully in parallel.

use crate::auction::{
    Amount, AuctionId, AuctionStatus, AuctionView, Bid, BidError, BidKind, BidReceipt, BidderId,
    CloseReason, Rejection, SeqNo,
};
use crate::catalog::ListingInfo;
use crate::ledger::SharedBidLedger;
use crate::notify::{Notification, SharedNotifier};
use crate::resolver::{self, BookSnapshot};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

pub enum Command {
    PlaceBid {
        bidder: BidderId,
        kind: BidKind,
        amount: Amount,
        reply: oneshot::Sender<Result<BidReceipt, BidError>>,
    },
    Close {
        reason: CloseReason,
        reply: oneshot::Sender<Result<AuctionView, BidError>>,
    },
}

#[derive(Copy, Clone, Debug)]
pub struct ActorConfig {
    /// Bound on queued commands per auction; once full, callers get a
    /// `Busy` rejection instead of queuing unboundedly.
    pub queue_depth: usize,
    /// How long a closed actor lingers for reads before retiring.
    pub retire_after: Duration,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            queue_depth: 256,
            retire_after: Duration::from_secs(300),
        }
    }
}

/// State rebuilt from the catalog and the ledger before spawning.
pub struct Hydrated {
    pub book: BookSnapshot,
    pub status: AuctionStatus,
    pub next_seq: SeqNo,
}

#[derive(Clone)]
pub struct ActorHandle {
    tx: mpsc::Sender<Command>,
    view: watch::Receiver<AuctionView>,
}

impl ActorHandle {
    pub fn try_send(&self, command: Command) -> Result<(), mpsc::error::TrySendError<Command>> {
        self.tx.try_send(command)
    }

    /// Last committed snapshot; does not enter the command queue.
    pub fn view(&self) -> AuctionView {
        self.view.borrow().clone()
    }

    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

pub struct AuctionActor {
    auction: AuctionId,
    listing: ListingInfo,
    book: BookSnapshot,
    status: AuctionStatus,
    next_seq: SeqNo,
    ledger: SharedBidLedger,
    notifier: SharedNotifier,
    view_tx: watch::Sender<AuctionView>,
    rx: mpsc::Receiver<Command>,
    retire_after: Duration,
}

impl AuctionActor {
    pub fn spawn(
        auction: AuctionId,
        listing: ListingInfo,
        hydrated: Hydrated,
        ledger: SharedBidLedger,
        notifier: SharedNotifier,
        config: ActorConfig,
    ) -> ActorHandle {
        let (tx, rx) = mpsc::channel(config.queue_depth);
        let initial = snapshot_view(&auction, &listing, &hydrated.book, hydrated.status);
        let (view_tx, view_rx) = watch::channel(initial);
        let actor = AuctionActor {
            auction,
            listing,
            book: hydrated.book,
            status: hydrated.status,
            next_seq: hydrated.next_seq,
            ledger,
            notifier,
            view_tx,
            rx,
            retire_after: config.retire_after,
        };
        tokio::spawn(actor.run());
        ActorHandle { tx, view: view_rx }
    }

    async fn run(mut self) {
        loop {
            // the close marker is durable, so a retired auction
            // rehydrates as closed and the actor can go away
            let command = if self.status == AuctionStatus::Closed {
                match tokio::time::timeout(self.retire_after, self.rx.recv()).await {
                    Err(_) | Ok(None) => break,
                    Ok(Some(command)) => command,
                }
            } else {
                match self.rx.recv().await {
                    None => break,
                    Some(command) => command,
                }
            };

            match command {
                Command::PlaceBid {
                    bidder,
                    kind,
                    amount,
                    reply,
                } => {
                    let result = self.place_bid(bidder, kind, amount).await;
                    // the caller may have timed out and dropped the
                    // receiver; the bid still counts either way
                    let _ = reply.send(result);
                }
                Command::Close { reason, reply } => {
                    let _ = reply.send(self.close(reason).await);
                }
            }
        }
        debug!(auction = %self.auction, "auction worker retired");
    }

    async fn place_bid(
        &mut self,
        bidder: BidderId,
        kind: BidKind,
        amount: Amount,
    ) -> Result<BidReceipt, BidError> {
        if self.status == AuctionStatus::Closed {
            return Err(Rejection::AuctionClosed.into());
        }

        let resolution = resolver::resolve(&self.book, &bidder, kind, amount, self.next_seq)
            .map_err(BidError::from)?;

        let now = Utc::now();
        let entries: Vec<Bid> = resolution
            .entries
            .iter()
            .map(|draft| Bid {
                auction: self.auction.clone(),
                seq: draft.seq,
                bidder: draft.bidder.clone(),
                kind: draft.kind,
                submitted_amount: draft.submitted_amount,
                effective_amount: draft.effective_amount,
                is_winning: draft.is_winning,
                created_at: now,
            })
            .collect();

        // the in-memory book only advances once the append is durable;
        // on failure the caller sees a retryable error and the book is
        // exactly as before
        self.ledger.append(entries).await?;

        self.next_seq += resolution.entries.len() as u64;
        self.book = resolution.book;
        self.publish();

        let view = self.view();
        debug!(
            auction = %self.auction,
            %bidder,
            kind = kind.as_str(),
            amount,
            new_price = view.current_price,
            "bid accepted"
        );
        self.notifier.notify(Notification::BidAccepted {
            auction: self.auction.clone(),
            bidder: bidder.clone(),
            new_price: view.current_price,
        });
        if let Some(previous_winner) = resolution.outbid {
            self.notifier.notify(Notification::Outbid {
                auction: self.auction.clone(),
                previous_winner,
            });
        }

        Ok(BidReceipt {
            seq: resolution.entries[0].seq,
            winning: self
                .book
                .winner
                .as_ref()
                .map_or(false, |winner| winner.bidder == bidder),
            view,
        })
    }

    /// Idempotent: closing a closed auction just returns the frozen
    /// view.
    async fn close(&mut self, reason: CloseReason) -> Result<AuctionView, BidError> {
        if self.status == AuctionStatus::Open {
            // the marker goes down before the book freezes; if it
            // fails the auction stays open and the scheduler retries
            self.ledger.record_close(&self.auction, Utc::now()).await?;
            self.status = AuctionStatus::Closed;
            self.publish();
            let view = self.view();
            let winner = if view.reserve_met {
                view.winning_bidder.clone()
            } else {
                None
            };
            info!(
                auction = %self.auction,
                ?reason,
                final_price = view.current_price,
                winner = ?winner,
                "auction closed"
            );
            self.notifier.notify(Notification::AuctionClosed {
                auction: self.auction.clone(),
                winner,
                final_price: view.current_price,
            });
        }
        Ok(self.view())
    }

    fn view(&self) -> AuctionView {
        snapshot_view(&self.auction, &self.listing, &self.book, self.status)
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view());
    }
}

fn snapshot_view(
    auction: &str,
    listing: &ListingInfo,
    book: &BookSnapshot,
    status: AuctionStatus,
) -> AuctionView {
    let has_winner = book.winner.is_some();
    AuctionView {
        auction: auction.to_owned(),
        current_price: book.current_price,
        is_open: status == AuctionStatus::Open,
        winning_bidder: book.winner.as_ref().map(|winner| winner.bidder.clone()),
        end_time: listing.end_time,
        minimum_next_bid: book.minimum_next_bid(),
        reserve_met: has_winner
            && listing
                .reserve_price
                .map_or(true, |reserve| book.current_price >= reserve),
    }
}
