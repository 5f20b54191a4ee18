//! Outbound notifications
//!
//! Fire-and-forget events for downstream delivery (email, in-app).
//! Delivery problems must never affect bidding correctness, so the
//! trait is infallible and implementations swallow their own failures.

use crate::auction::{Amount, AuctionId, BidderId};
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    BidAccepted {
        auction: AuctionId,
        bidder: BidderId,
        new_price: Amount,
    },
    Outbid {
        auction: AuctionId,
        previous_winner: BidderId,
    },
    AuctionClosed {
        auction: AuctionId,
        /// Absent when there were no bids or the reserve was not met.
        winner: Option<BidderId>,
        final_price: Amount,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// Logs notifications instead of delivering them anywhere.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        info!(?notification, "notification");
    }
}

/// Collects notifications for assertions in tests.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingNotifier(parking_lot::Mutex<Vec<Notification>>);

#[cfg(test)]
impl RecordingNotifier {
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut self.0.lock())
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.0.lock().push(notification);
    }
}
