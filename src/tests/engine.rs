use super::{fixture, fixture_with, publish, FlakyLedger, GatedLedger};
use crate::actor::{ActorConfig, AuctionActor, Command, Hydrated};
use crate::auction::{
    AuctionStatus, Bid, BidError, BidKind, CloseReason, Rejection, MAX_AMOUNT,
};
use crate::catalog::ListingInfo;
use crate::ledger::{InMemoryLedger, SharedBidLedger};
use crate::notify::{Notification, RecordingNotifier};
use crate::resolver::BookSnapshot;
use chrono::{Duration as TimeDelta, Utc};
use futures::TryStreamExt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

fn rejection(err: BidError) -> Rejection {
    match err {
        BidError::Rejected(rejection) => rejection,
        BidError::Internal(err) => panic!("expected a rejection, got: {:?}", err),
    }
}

#[tokio::test]
async fn a_full_auction_round() {
    let f = fixture();
    publish(&f, "item-1", 100, Some(300), TimeDelta::hours(1)).await;

    // alice opens
    let receipt = f
        .registry
        .place_bid("item-1", "alice", BidKind::Manual, 150)
        .await
        .unwrap();
    assert!(receipt.winning);
    assert_eq!(receipt.view.current_price, 150);
    assert_eq!(receipt.view.minimum_next_bid, 200);
    assert!(!receipt.view.reserve_met);

    // bob undercuts the increment
    let err = f
        .registry
        .place_bid("item-1", "bob", BidKind::Manual, 140)
        .await
        .unwrap_err();
    assert_eq!(rejection(err), Rejection::BidTooLow { minimum: 200 });

    // carol's ceiling takes the lead at the minimum raise
    let receipt = f
        .registry
        .place_bid("item-1", "carol", BidKind::Proxy, 400)
        .await
        .unwrap();
    assert!(receipt.winning);
    assert_eq!(receipt.view.current_price, 200);

    // alice is accepted but immediately beaten by the ceiling
    let receipt = f
        .registry
        .place_bid("item-1", "alice", BidKind::Manual, 250)
        .await
        .unwrap();
    assert!(!receipt.winning);
    assert_eq!(receipt.view.current_price, 300);
    assert_eq!(receipt.view.winning_bidder.as_deref(), Some("carol"));
    assert!(receipt.view.reserve_met);

    // alice goes past the ceiling
    let receipt = f
        .registry
        .place_bid("item-1", "alice", BidKind::Manual, 450)
        .await
        .unwrap();
    assert!(receipt.winning);
    assert_eq!(receipt.view.current_price, 450);

    let view = f
        .registry
        .force_close("item-1", CloseReason::Expired)
        .await
        .unwrap();
    assert!(!view.is_open);

    let notifications = f.notifier.take();
    assert!(notifications.contains(&Notification::Outbid {
        auction: "item-1".to_owned(),
        previous_winner: "carol".to_owned(),
    }));
    assert_eq!(
        notifications.last(),
        Some(&Notification::AuctionClosed {
            auction: "item-1".to_owned(),
            winner: Some("alice".to_owned()),
            final_price: 450,
        })
    );
}

#[tokio::test]
async fn reserve_not_met_closes_without_a_winner() {
    let f = fixture();
    publish(&f, "item-1", 100, Some(1000), TimeDelta::hours(1)).await;
    f.registry
        .place_bid("item-1", "alice", BidKind::Manual, 150)
        .await
        .unwrap();

    let view = f
        .registry
        .force_close("item-1", CloseReason::Expired)
        .await
        .unwrap();
    assert!(!view.reserve_met);
    assert_eq!(
        f.notifier.take().last(),
        Some(&Notification::AuctionClosed {
            auction: "item-1".to_owned(),
            winner: None,
            final_price: 150,
        })
    );
}

#[tokio::test]
async fn closing_twice_is_a_no_op() {
    let f = fixture();
    publish(&f, "item-1", 100, None, TimeDelta::hours(1)).await;
    f.registry
        .place_bid("item-1", "alice", BidKind::Manual, 150)
        .await
        .unwrap();

    let first = f
        .registry
        .force_close("item-1", CloseReason::Seller)
        .await
        .unwrap();
    let second = f
        .registry
        .force_close("item-1", CloseReason::Seller)
        .await
        .unwrap();
    assert_eq!(first, second);

    // one close notification, not two
    let closes = f
        .notifier
        .take()
        .into_iter()
        .filter(|n| matches!(n, Notification::AuctionClosed { .. }))
        .count();
    assert_eq!(closes, 1);

    let err = f
        .registry
        .place_bid("item-1", "bob", BidKind::Manual, 500)
        .await
        .unwrap_err();
    assert_eq!(rejection(err), Rejection::AuctionClosed);
}

#[tokio::test]
async fn an_astronomical_bid_cannot_kill_the_auction() {
    let f = fixture();
    publish(&f, "item-1", 100, None, TimeDelta::hours(1)).await;

    let err = f
        .registry
        .place_bid("item-1", "alice", BidKind::Manual, u64::MAX)
        .await
        .unwrap_err();
    assert_eq!(
        rejection(err),
        Rejection::BidTooHigh {
            maximum: MAX_AMOUNT
        }
    );

    // the worker survives and keeps serving the auction
    let receipt = f
        .registry
        .place_bid("item-1", "alice", BidKind::Manual, 150)
        .await
        .unwrap();
    assert!(receipt.winning);
    assert_eq!(receipt.view.minimum_next_bid, 200);
}

#[tokio::test]
async fn unknown_auction_is_rejected() {
    let f = fixture();
    let err = f
        .registry
        .place_bid("nope", "alice", BidKind::Manual, 150)
        .await
        .unwrap_err();
    assert_eq!(
        rejection(err),
        Rejection::AuctionNotFound("nope".to_owned())
    );
}

#[tokio::test]
async fn queue_order_decides_the_close_race() {
    let ledger: SharedBidLedger = Arc::new(InMemoryLedger::new());
    let notifier = RecordingNotifier::new_shared();
    let listing = ListingInfo {
        seller: "seller-1".to_owned(),
        starting_price: 100,
        reserve_price: None,
        end_time: Utc::now() + TimeDelta::hours(1),
    };
    let handle = AuctionActor::spawn(
        "item-1".to_owned(),
        listing,
        Hydrated {
            book: BookSnapshot::new(100),
            status: AuctionStatus::Open,
            next_seq: 1,
        },
        ledger,
        notifier,
        ActorConfig::default(),
    );

    // admitted in this order: bid, close, bid. The last bid loses even
    // though it arrived well before the auction's end time.
    let (tx1, rx1) = oneshot::channel();
    assert!(handle
        .try_send(Command::PlaceBid {
            bidder: "alice".to_owned(),
            kind: BidKind::Manual,
            amount: 150,
            reply: tx1,
        })
        .is_ok());
    let (tx2, rx2) = oneshot::channel();
    assert!(handle
        .try_send(Command::Close {
            reason: CloseReason::Expired,
            reply: tx2,
        })
        .is_ok());
    let (tx3, rx3) = oneshot::channel();
    assert!(handle
        .try_send(Command::PlaceBid {
            bidder: "bob".to_owned(),
            kind: BidKind::Manual,
            amount: 250,
            reply: tx3,
        })
        .is_ok());

    assert!(rx1.await.unwrap().is_ok());
    assert!(!rx2.await.unwrap().unwrap().is_open);
    assert_eq!(
        rejection(rx3.await.unwrap().unwrap_err()),
        Rejection::AuctionClosed
    );
}

#[tokio::test]
async fn failed_append_leaves_the_book_untouched() {
    let ledger = Arc::new(FlakyLedger::new());
    let f = fixture_with(ledger.clone(), ActorConfig::default());
    publish(&f, "item-1", 100, None, TimeDelta::hours(1)).await;

    f.registry
        .place_bid("item-1", "alice", BidKind::Manual, 150)
        .await
        .unwrap();

    ledger.fail_appends.store(true, Ordering::SeqCst);
    let err = f
        .registry
        .place_bid("item-1", "bob", BidKind::Manual, 300)
        .await
        .unwrap_err();
    assert!(matches!(err, BidError::Internal(_)));

    // neither the snapshot nor the ledger moved
    let view = f.registry.current_state("item-1").await.unwrap();
    assert_eq!(view.current_price, 150);
    assert_eq!(view.winning_bidder.as_deref(), Some("alice"));

    // the same bid goes through once storage is back
    ledger.fail_appends.store(false, Ordering::SeqCst);
    let receipt = f
        .registry
        .place_bid("item-1", "bob", BidKind::Manual, 300)
        .await
        .unwrap();
    assert_eq!(receipt.seq, 2);
    assert_eq!(receipt.view.current_price, 300);
}

#[tokio::test]
async fn concurrent_manual_bids_serialize_cleanly() {
    let f = fixture();
    publish(&f, "item-1", 100, None, TimeDelta::hours(1)).await;

    let mut tasks = Vec::new();
    for i in 0..20u64 {
        let registry = f.registry.clone();
        tasks.push(tokio::spawn(async move {
            let bidder = format!("bidder-{}", i);
            registry
                .place_bid("item-1", &bidder, BidKind::Manual, 100 + i * 75)
                .await
        }));
    }
    for task in tasks {
        // rejections are fine, infrastructure errors are not
        if let Err(err) = task.await.unwrap() {
            assert!(matches!(err, BidError::Rejected(_)));
        }
    }

    // one actor, one writer
    assert_eq!(f.registry.actor_count(), 1);

    // whatever the admission order was, the ledger reads like a
    // sequential run: strictly increasing prices, a single winner
    let history: Vec<Bid> = f
        .ledger
        .history("item-1")
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert!(!history.is_empty());
    for pair in history.windows(2) {
        assert!(pair[1].effective_amount > pair[0].effective_amount);
        assert_eq!(pair[1].seq, pair[0].seq + 1);
    }
    assert_eq!(history.iter().filter(|bid| bid.is_winning).count(), 1);

    let view = f.registry.current_state("item-1").await.unwrap();
    assert_eq!(
        view.current_price,
        history.last().unwrap().effective_amount
    );
}

#[tokio::test]
async fn full_queue_pushes_back_with_busy() {
    let ledger = Arc::new(GatedLedger::new());
    let f = fixture_with(
        ledger.clone(),
        ActorConfig {
            queue_depth: 1,
            ..ActorConfig::default()
        },
    );
    publish(&f, "item-1", 100, None, TimeDelta::hours(1)).await;

    // first bid gets pulled off the queue and parks in the append
    let first = tokio::spawn({
        let registry = f.registry.clone();
        async move {
            registry
                .place_bid("item-1", "alice", BidKind::Manual, 150)
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // second bid fills the queue slot
    let second = tokio::spawn({
        let registry = f.registry.clone();
        async move {
            registry
                .place_bid("item-1", "bob", BidKind::Manual, 250)
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // third one gets backpressure instead of queuing unboundedly
    let err = f
        .registry
        .place_bid("item-1", "carol", BidKind::Manual, 350)
        .await
        .unwrap_err();
    assert_eq!(rejection(err), Rejection::Busy);

    // storage comes back, the queued bids complete in order
    ledger.gate.add_permits(10);
    assert!(first.await.unwrap().unwrap().winning);
    assert!(second.await.unwrap().unwrap().winning);
    let view = f.registry.current_state("item-1").await.unwrap();
    assert_eq!(view.current_price, 250);
}

#[tokio::test]
async fn abandoned_caller_does_not_lose_the_bid() {
    let ledger = Arc::new(GatedLedger::new());
    let f = fixture_with(ledger.clone(), ActorConfig::default());
    publish(&f, "item-1", 100, None, TimeDelta::hours(1)).await;

    // the caller gives up while the append is still parked
    let waiting = tokio::spawn({
        let registry = f.registry.clone();
        async move {
            registry
                .place_bid("item-1", "alice", BidKind::Manual, 150)
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    waiting.abort();
    let _ = waiting.await;

    // the admitted bid still completes and is ledgered
    ledger.gate.add_permits(10);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let view = f.registry.current_state("item-1").await.unwrap();
    assert_eq!(view.current_price, 150);
    assert_eq!(view.winning_bidder.as_deref(), Some("alice"));
}

#[tokio::test]
async fn closed_auction_retires_and_rehydrates_closed() {
    let f = fixture_with(
        Arc::new(InMemoryLedger::new()),
        ActorConfig {
            retire_after: Duration::from_millis(50),
            ..ActorConfig::default()
        },
    );
    // the end time is already in the past
    publish(&f, "item-1", 100, None, TimeDelta::hours(-1)).await;

    // first touch closes it before any bid can land
    let err = f
        .registry
        .place_bid("item-1", "alice", BidKind::Manual, 150)
        .await
        .unwrap_err();
    assert_eq!(rejection(err), Rejection::AuctionClosed);

    // the idle actor retires after the grace period
    tokio::time::sleep(Duration::from_millis(200)).await;
    f.registry.sweep();
    assert_eq!(f.registry.actor_count(), 0);

    // a later read rehydrates it, still closed
    let view = f.registry.current_state("item-1").await.unwrap();
    assert!(!view.is_open);
    let err = f
        .registry
        .place_bid("item-1", "bob", BidKind::Manual, 150)
        .await
        .unwrap_err();
    assert_eq!(rejection(err), Rejection::AuctionClosed);
}

#[tokio::test]
async fn state_survives_a_restart_via_ledger_replay() {
    let ledger: SharedBidLedger = Arc::new(InMemoryLedger::new());
    let f = fixture_with(ledger.clone(), ActorConfig::default());
    publish(&f, "item-1", 100, None, TimeDelta::hours(1)).await;
    f.registry
        .place_bid("item-1", "alice", BidKind::Manual, 150)
        .await
        .unwrap();
    f.registry
        .place_bid("item-1", "carol", BidKind::Proxy, 400)
        .await
        .unwrap();

    // a fresh registry over the same ledger stands in for a restart
    let restarted = fixture_with(ledger, ActorConfig::default());
    publish(&restarted, "item-1", 100, None, TimeDelta::hours(1)).await;

    let view = restarted.registry.current_state("item-1").await.unwrap();
    assert_eq!(view.current_price, 200);
    assert_eq!(view.winning_bidder.as_deref(), Some("carol"));

    // the replayed ceiling still defends
    let receipt = restarted
        .registry
        .place_bid("item-1", "alice", BidKind::Manual, 250)
        .await
        .unwrap();
    assert!(!receipt.winning);
    assert_eq!(receipt.view.current_price, 300);
    assert_eq!(receipt.view.winning_bidder.as_deref(), Some("carol"));
    assert_eq!(receipt.seq, 3);
}
