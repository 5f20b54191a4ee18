//! Postgres-backed ledger.
//!
//! Blocking `postgres` calls behind an r2d2 pool, pushed onto the
//! blocking thread pool so actor tasks are never stalled on I/O.

use super::BidLedger;
use crate::auction::{AuctionIdRef, Bid, BidKind};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use r2d2_postgres::PostgresConnectionManager;

type Pool = r2d2::Pool<PostgresConnectionManager<postgres::NoTls>>;

#[derive(Clone)]
pub struct PostgresLedger {
    pool: Pool,
}

impl PostgresLedger {
    pub fn connect(url: &str) -> Result<Self> {
        let manager = PostgresConnectionManager::new(
            url.parse().context("invalid postgres url")?,
            postgres::NoTls,
        );
        let pool = r2d2::Pool::new(manager)?;
        let ledger = Self { pool };
        ledger.init_schema()?;
        Ok(ledger)
    }

    fn init_schema(&self) -> Result<()> {
        self.pool.get()?.batch_execute(
            "CREATE TABLE IF NOT EXISTS bids (
                auction_id TEXT NOT NULL,
                seq BIGINT NOT NULL,
                bidder_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                submitted_amount BIGINT NOT NULL,
                effective_amount BIGINT NOT NULL,
                is_winning BOOL NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (auction_id, seq)
            );
            CREATE TABLE IF NOT EXISTS auction_closes (
                auction_id TEXT PRIMARY KEY,
                closed_at TIMESTAMPTZ NOT NULL
            )",
        )?;
        Ok(())
    }
}

fn row_to_bid(row: &postgres::Row) -> Result<Bid> {
    let kind = match row.get::<_, &str>("kind") {
        "manual" => BidKind::Manual,
        "proxy" => BidKind::Proxy,
        other => bail!("unknown bid kind in ledger: {}", other),
    };
    Ok(Bid {
        auction: row.get("auction_id"),
        seq: u64::try_from(row.get::<_, i64>("seq"))?,
        bidder: row.get("bidder_id"),
        kind,
        submitted_amount: u64::try_from(row.get::<_, i64>("submitted_amount"))?,
        effective_amount: u64::try_from(row.get::<_, i64>("effective_amount"))?,
        is_winning: row.get("is_winning"),
        created_at: row.get::<_, DateTime<Utc>>("created_at"),
    })
}

#[async_trait]
impl BidLedger for PostgresLedger {
    async fn append(&self, entries: Vec<Bid>) -> Result<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut client = pool.get()?;
            let mut tx = client.transaction()?;
            for bid in &entries {
                let expected: i64 = tx
                    .query_one(
                        "SELECT COALESCE(MAX(seq), 0) + 1 FROM bids WHERE auction_id = $1",
                        &[&bid.auction],
                    )?
                    .get(0);
                if i64::try_from(bid.seq)? != expected {
                    bail!(
                        "sequence gap on auction {}: got {}, expected {}",
                        bid.auction,
                        bid.seq,
                        expected
                    );
                }
                if bid.is_winning {
                    tx.execute(
                        "UPDATE bids SET is_winning = FALSE
                         WHERE auction_id = $1 AND is_winning",
                        &[&bid.auction],
                    )?;
                }
                tx.execute(
                    "INSERT INTO bids (auction_id, seq, bidder_id, kind,
                        submitted_amount, effective_amount, is_winning, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                    &[
                        &bid.auction,
                        &i64::try_from(bid.seq)?,
                        &bid.bidder,
                        &bid.kind.as_str(),
                        &i64::try_from(bid.submitted_amount)?,
                        &i64::try_from(bid.effective_amount)?,
                        &bid.is_winning,
                        &bid.created_at,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    async fn history(&self, auction: AuctionIdRef<'_>) -> Result<BoxStream<'static, Result<Bid>>> {
        let pool = self.pool.clone();
        let auction = auction.to_owned();
        let bids = tokio::task::spawn_blocking(move || -> Result<Vec<Bid>> {
            let mut client = pool.get()?;
            let rows = client.query(
                "SELECT * FROM bids WHERE auction_id = $1 ORDER BY seq",
                &[&auction],
            )?;
            rows.iter().map(row_to_bid).collect()
        })
        .await??;
        Ok(stream::iter(bids.into_iter().map(Ok)).boxed())
    }

    async fn current_winner(&self, auction: AuctionIdRef<'_>) -> Result<Option<Bid>> {
        let pool = self.pool.clone();
        let auction = auction.to_owned();
        tokio::task::spawn_blocking(move || {
            let mut client = pool.get()?;
            client
                .query_opt(
                    "SELECT * FROM bids
                     WHERE auction_id = $1 AND is_winning
                     ORDER BY seq DESC LIMIT 1",
                    &[&auction],
                )?
                .as_ref()
                .map(row_to_bid)
                .transpose()
        })
        .await?
    }

    async fn record_close(
        &self,
        auction: AuctionIdRef<'_>,
        closed_at: DateTime<Utc>,
    ) -> Result<()> {
        let pool = self.pool.clone();
        let auction = auction.to_owned();
        tokio::task::spawn_blocking(move || {
            let mut client = pool.get()?;
            client.execute(
                "INSERT INTO auction_closes (auction_id, closed_at) VALUES ($1, $2)
                 ON CONFLICT (auction_id) DO NOTHING",
                &[&auction, &closed_at],
            )?;
            Ok(())
        })
        .await?
    }

    async fn close_record(&self, auction: AuctionIdRef<'_>) -> Result<Option<DateTime<Utc>>> {
        let pool = self.pool.clone();
        let auction = auction.to_owned();
        tokio::task::spawn_blocking(move || {
            let mut client = pool.get()?;
            Ok(client
                .query_opt(
                    "SELECT closed_at FROM auction_closes WHERE auction_id = $1",
                    &[&auction],
                )?
                .map(|row| row.get(0)))
        })
        .await?
    }
}
