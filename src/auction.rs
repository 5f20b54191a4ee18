//! Core auction domain types shared by every module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type AuctionId = String;
pub type AuctionIdRef<'a> = &'a str;
pub type BidderId = String;
pub type BidderIdRef<'a> = &'a str;

/// Currency minor unit (cents).
pub type Amount = u64;

/// Highest accepted bid or ceiling. Keeps price arithmetic far from
/// the integer ceiling and bounces fat-fingered amounts.
pub const MAX_AMOUNT: Amount = 1_000_000_000_000;

/// Per-auction ledger sequence number, starting at 1. Strictly
/// monotonic; never derived from wall-clock time.
pub type SeqNo = u64;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidKind {
    /// An exact amount the bidder pays right now.
    #[default]
    Manual,
    /// A private ceiling; the engine raises it only as far as needed.
    Proxy,
}

impl BidKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BidKind::Manual => "manual",
            BidKind::Proxy => "proxy",
        }
    }
}

/// A single ledger record. Immutable once written, except for
/// `is_winning`, which flips to `false` when the bid is outbid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bid {
    pub auction: AuctionId,
    pub seq: SeqNo,
    pub bidder: BidderId,
    pub kind: BidKind,
    /// What the bidder typed: the exact amount for a manual bid, the
    /// ceiling for a proxy bid.
    pub submitted_amount: Amount,
    /// This bid's contribution to the current price. Less than
    /// `submitted_amount` for a proxy that only needed a partial raise.
    pub effective_amount: Amount,
    pub is_winning: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AuctionStatus {
    Open,
    Closed,
}

/// Public snapshot of one auction, served off the actor's committed
/// state without entering its command queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuctionView {
    pub auction: AuctionId,
    pub current_price: Amount,
    pub is_open: bool,
    pub winning_bidder: Option<BidderId>,
    pub end_time: DateTime<Utc>,
    /// What the next manual bid has to reach to be accepted.
    pub minimum_next_bid: Amount,
    pub reserve_met: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    Expired,
    Seller,
}

/// Business-level rejections. Expected outcomes, never logged as
/// errors and never retried automatically.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    #[error("unknown auction: {0}")]
    AuctionNotFound(AuctionId),
    #[error("auction already closed")]
    AuctionClosed,
    #[error("bid is too low, minimum is {minimum}")]
    BidTooLow { minimum: Amount },
    #[error("bid exceeds the maximum of {maximum}")]
    BidTooHigh { maximum: Amount },
    #[error("bidder already holds the winning bid")]
    SelfOutbid,
    #[error("bid queue is full, retry later")]
    Busy,
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::AuctionNotFound(_) => "AUCTION_NOT_FOUND",
            Rejection::AuctionClosed => "AUCTION_CLOSED",
            Rejection::BidTooLow { .. } => "BID_TOO_LOW",
            Rejection::BidTooHigh { .. } => "BID_TOO_HIGH",
            Rejection::SelfOutbid => "SELF_OUTBID",
            Rejection::Busy => "BUSY",
        }
    }
}

/// What a `place_bid` caller gets back on failure.
#[derive(Error, Debug)]
pub enum BidError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    /// Infrastructure failure; the bid was not applied and the caller
    /// may retry.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BidError {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            BidError::Rejected(r) => Some(r),
            BidError::Internal(_) => None,
        }
    }
}

/// Outcome of an accepted bid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BidReceipt {
    /// Sequence number of the submitted bid's ledger entry.
    pub seq: SeqNo,
    /// Whether the submitted bid holds the lead after resolution. A
    /// bid can be accepted and immediately beaten by a standing proxy.
    pub winning: bool,
    pub view: AuctionView,
}
