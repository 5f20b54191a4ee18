//! Proxy bid resolution
//!
//! Pure functions over a snapshot of one auction's book. The actor is
//! the only caller and the only component that applies the result, so
//! nothing here touches storage or fails on anything but a business
//! rejection.
//!
//! A note on the shape of the book: once resolution settles, every
//! proxy ceiling that lost is fully consumed and dropped. The active
//! proxy set therefore only ever holds the current winner's ceiling,
//! but the map form keeps replacement semantics (one ceiling per
//! bidder, new submission overwrites) explicit.

use crate::auction::{Amount, BidKind, BidderId, BidderIdRef, Rejection, SeqNo, MAX_AMOUNT};
use crate::increment::next_valid_amount;
use std::collections::BTreeMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProxyCeiling {
    pub ceiling: Amount,
    /// Sequence number of the ledger entry that registered this
    /// ceiling; the tie-break for equal ceilings.
    pub seq: SeqNo,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Winner {
    pub bidder: BidderId,
    /// Sequence number of the winning ledger entry.
    pub seq: SeqNo,
}

/// The mutable book of one auction, owned by its actor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookSnapshot {
    pub starting_price: Amount,
    pub current_price: Amount,
    pub winner: Option<Winner>,
    pub proxies: BTreeMap<BidderId, ProxyCeiling>,
}

impl BookSnapshot {
    pub fn new(starting_price: Amount) -> Self {
        Self {
            starting_price,
            current_price: starting_price,
            winner: None,
            proxies: BTreeMap::new(),
        }
    }

    /// The floor an incoming bid has to clear. The very first bid only
    /// has to meet the starting price; after that the increment tiers
    /// apply.
    pub fn minimum_next_bid(&self) -> Amount {
        if self.winner.is_none() {
            // a zero starting price still requires bidding something
            self.starting_price.max(1)
        } else {
            next_valid_amount(self.current_price)
        }
    }

    /// Best standing proxy from anyone but `challenger`: highest
    /// ceiling, earliest registration on equal ceilings.
    fn best_defender(&self, challenger: BidderIdRef) -> Option<(&BidderId, ProxyCeiling)> {
        self.proxies
            .iter()
            .filter(|(bidder, _)| bidder.as_str() != challenger)
            .max_by(|(_, a), (_, b)| a.ceiling.cmp(&b.ceiling).then(b.seq.cmp(&a.seq)))
            .map(|(bidder, proxy)| (bidder, *proxy))
    }

    /// Drops ceilings that can no longer defend the lead.
    fn prune_consumed(&mut self) {
        let price = self.current_price;
        self.proxies.retain(|_, proxy| proxy.ceiling > price);
    }

    fn holds_lead(&self, bidder: BidderIdRef) -> bool {
        self.winner
            .as_ref()
            .map_or(false, |winner| winner.bidder == bidder)
    }
}

/// A ledger entry to be written, before the actor stamps the auction
/// id and timestamp on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BidDraft {
    pub seq: SeqNo,
    pub bidder: BidderId,
    pub kind: BidKind,
    pub submitted_amount: Amount,
    pub effective_amount: Amount,
    pub is_winning: bool,
}

/// Result of resolving one incoming bid against the book.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// Entries to append, in order. At most one is flagged winning.
    pub entries: Vec<BidDraft>,
    /// The book after the entries are durably appended.
    pub book: BookSnapshot,
    /// Previous winner who just lost the lead, for notification.
    pub outbid: Option<BidderId>,
}

/// Resolves an incoming bid. `next_seq` is the next free sequence
/// number of the auction's ledger partition, known to the actor as the
/// partition's sole writer.
pub fn resolve(
    book: &BookSnapshot,
    bidder: BidderIdRef,
    kind: BidKind,
    amount: Amount,
    next_seq: SeqNo,
) -> Result<Resolution, Rejection> {
    if amount > MAX_AMOUNT {
        return Err(Rejection::BidTooHigh {
            maximum: MAX_AMOUNT,
        });
    }
    match kind {
        BidKind::Manual => {
            if book.holds_lead(bidder) {
                // a repeated bid from the current winner never raises
                // the price against themselves
                return Err(Rejection::SelfOutbid);
            }
            let floor = book.minimum_next_bid();
            if amount < floor {
                return Err(Rejection::BidTooLow { minimum: floor });
            }
            Ok(resolve_manual(book, bidder, amount, next_seq))
        }
        BidKind::Proxy => {
            if book.holds_lead(bidder) {
                return resolve_ceiling_raise(book, bidder, amount, next_seq);
            }
            let floor = book.minimum_next_bid();
            if amount < floor {
                return Err(Rejection::BidTooLow { minimum: floor });
            }
            Ok(resolve_proxy(book, bidder, amount, next_seq))
        }
    }
}

fn resolve_manual(
    book: &BookSnapshot,
    bidder: BidderIdRef,
    amount: Amount,
    next_seq: SeqNo,
) -> Resolution {
    let mut next = book.clone();

    if let Some((defender, proxy)) = book.best_defender(bidder) {
        if proxy.ceiling >= amount {
            // the standing ceiling covers the manual bid: it
            // auto-raises just far enough and keeps the lead
            let defender = defender.clone();
            let raised = proxy.ceiling.min(next_valid_amount(amount));
            let entries = vec![
                BidDraft {
                    seq: next_seq,
                    bidder: bidder.to_owned(),
                    kind: BidKind::Manual,
                    submitted_amount: amount,
                    effective_amount: amount,
                    is_winning: false,
                },
                BidDraft {
                    seq: next_seq + 1,
                    bidder: defender.clone(),
                    kind: BidKind::Proxy,
                    submitted_amount: proxy.ceiling,
                    effective_amount: raised,
                    is_winning: true,
                },
            ];
            next.current_price = raised;
            next.winner = Some(Winner {
                bidder: defender,
                seq: next_seq + 1,
            });
            next.prune_consumed();
            return Resolution {
                entries,
                book: next,
                outbid: None,
            };
        }
    }

    // the manual bid takes the lead at its full amount
    let outbid = book.winner.as_ref().map(|winner| winner.bidder.clone());
    let entries = vec![BidDraft {
        seq: next_seq,
        bidder: bidder.to_owned(),
        kind: BidKind::Manual,
        submitted_amount: amount,
        effective_amount: amount,
        is_winning: true,
    }];
    next.current_price = amount;
    next.winner = Some(Winner {
        bidder: bidder.to_owned(),
        seq: next_seq,
    });
    next.prune_consumed();
    Resolution {
        entries,
        book: next,
        outbid,
    }
}

fn resolve_proxy(
    book: &BookSnapshot,
    bidder: BidderIdRef,
    ceiling: Amount,
    next_seq: SeqNo,
) -> Resolution {
    let mut next = book.clone();

    if let Some((defender, standing)) = book.best_defender(bidder) {
        // equal ceilings: the earlier-registered one keeps the lead
        if standing.ceiling >= ceiling {
            let defender = defender.clone();
            let raised = standing.ceiling.min(next_valid_amount(ceiling));
            let entries = vec![
                BidDraft {
                    seq: next_seq,
                    bidder: bidder.to_owned(),
                    kind: BidKind::Proxy,
                    submitted_amount: ceiling,
                    effective_amount: ceiling,
                    is_winning: false,
                },
                BidDraft {
                    seq: next_seq + 1,
                    bidder: defender.clone(),
                    kind: BidKind::Proxy,
                    submitted_amount: standing.ceiling,
                    effective_amount: raised,
                    is_winning: true,
                },
            ];
            next.current_price = raised;
            next.winner = Some(Winner {
                bidder: defender,
                seq: next_seq + 1,
            });
            // the incoming ceiling was consumed outright
            next.prune_consumed();
            return Resolution {
                entries,
                book: next,
                outbid: None,
            };
        }
    }

    // the new ceiling takes the lead, raised only as far as needed:
    // past the beaten ceiling if there was one, one increment past the
    // price otherwise, and just the starting price for an opening bid
    let effective = match (&book.winner, book.best_defender(bidder)) {
        (Some(_), Some((_, beaten))) => ceiling.min(next_valid_amount(beaten.ceiling)),
        _ => book.minimum_next_bid(),
    };
    let outbid = book.winner.as_ref().map(|winner| winner.bidder.clone());
    let entries = vec![BidDraft {
        seq: next_seq,
        bidder: bidder.to_owned(),
        kind: BidKind::Proxy,
        submitted_amount: ceiling,
        effective_amount: effective,
        is_winning: true,
    }];
    next.current_price = effective;
    next.winner = Some(Winner {
        bidder: bidder.to_owned(),
        seq: next_seq,
    });
    next.proxies
        .insert(bidder.to_owned(), ProxyCeiling { ceiling, seq: next_seq });
    next.prune_consumed();
    Resolution {
        entries,
        book: next,
        outbid,
    }
}

/// The current winner replacing their own ceiling. Never stacks, never
/// moves the price; the winning flag stays on their standing entry.
fn resolve_ceiling_raise(
    book: &BookSnapshot,
    bidder: BidderIdRef,
    ceiling: Amount,
    next_seq: SeqNo,
) -> Result<Resolution, Rejection> {
    if let Some(previous) = book.proxies.get(bidder) {
        if ceiling <= previous.ceiling {
            return Err(Rejection::SelfOutbid);
        }
    }
    let floor = book.minimum_next_bid();
    if ceiling < floor {
        return Err(Rejection::BidTooLow { minimum: floor });
    }

    let mut next = book.clone();
    next.proxies
        .insert(bidder.to_owned(), ProxyCeiling { ceiling, seq: next_seq });
    Ok(Resolution {
        entries: vec![BidDraft {
            seq: next_seq,
            bidder: bidder.to_owned(),
            kind: BidKind::Proxy,
            submitted_amount: ceiling,
            effective_amount: ceiling,
            is_winning: false,
        }],
        book: next,
        outbid: None,
    })
}
