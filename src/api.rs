//! HTTP surface
//!
//! Thin mapping between the engine's contract and HTTP. Business
//! rejections become 4xx/503 responses with a machine-readable code;
//! only infrastructure failures turn into 500s and error logs.

use crate::auction::{
    Amount, AuctionId, AuctionView, BidError, BidKind, BidReceipt, BidderId, CloseReason,
    Rejection, SeqNo,
};
use crate::catalog::{ListingInfo, SharedCatalog};
use crate::registry::AuctionRegistry;
use crate::scheduler::CloseScheduler;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AuctionRegistry>,
    pub catalog: SharedCatalog,
    pub scheduler: Arc<CloseScheduler>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/auctions", post(publish_auction))
        .route("/auctions/:id", get(get_auction))
        .route("/auctions/:id/bids", post(place_bid))
        .route("/auctions/:id/close", post(close_auction))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct PlaceBidRequest {
    pub bidder: BidderId,
    pub amount: Amount,
    #[serde(default)]
    pub kind: BidKind,
}

#[derive(Debug, Serialize)]
pub struct BidPlaced {
    pub seq: SeqNo,
    pub winning: bool,
    pub auction: AuctionView,
}

#[derive(Debug, Deserialize)]
pub struct PublishAuctionRequest {
    pub auction: AuctionId,
    pub seller: BidderId,
    pub starting_price: Amount,
    #[serde(default)]
    pub reserve_price: Option<Amount>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<Amount>,
}

#[derive(Debug)]
pub struct ApiError(BidError);

impl From<BidError> for ApiError {
    fn from(err: BidError) -> Self {
        Self(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(BidError::Internal(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self.0 {
            BidError::Rejected(rejection) => {
                debug!(%rejection, "request rejected");
                let status = match rejection {
                    Rejection::AuctionNotFound(_) => StatusCode::NOT_FOUND,
                    Rejection::Busy => StatusCode::SERVICE_UNAVAILABLE,
                    Rejection::AuctionClosed
                    | Rejection::BidTooLow { .. }
                    | Rejection::BidTooHigh { .. }
                    | Rejection::SelfOutbid => StatusCode::CONFLICT,
                };
                let minimum = match rejection {
                    Rejection::BidTooLow { minimum } => Some(minimum),
                    _ => None,
                };
                (
                    status,
                    ErrorBody {
                        error: rejection.code(),
                        message: rejection.to_string(),
                        minimum,
                    },
                )
            }
            BidError::Internal(err) => {
                error!(?err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "INTERNAL",
                        message: "internal error, retry later".to_owned(),
                        minimum: None,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

pub async fn place_bid(
    State(state): State<AppState>,
    Path(auction): Path<String>,
    Json(request): Json<PlaceBidRequest>,
) -> Result<(StatusCode, Json<BidPlaced>), ApiError> {
    let BidReceipt { seq, winning, view } = state
        .registry
        .place_bid(&auction, &request.bidder, request.kind, request.amount)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(BidPlaced {
            seq,
            winning,
            auction: view,
        }),
    ))
}

pub async fn get_auction(
    State(state): State<AppState>,
    Path(auction): Path<String>,
) -> Result<Json<AuctionView>, ApiError> {
    Ok(Json(state.registry.current_state(&auction).await?))
}

pub async fn close_auction(
    State(state): State<AppState>,
    Path(auction): Path<String>,
) -> Result<Json<AuctionView>, ApiError> {
    Ok(Json(
        state
            .registry
            .force_close(&auction, CloseReason::Seller)
            .await?,
    ))
}

pub async fn publish_auction(
    State(state): State<AppState>,
    Json(request): Json<PublishAuctionRequest>,
) -> Result<StatusCode, ApiError> {
    let info = ListingInfo {
        seller: request.seller,
        starting_price: request.starting_price,
        reserve_price: request.reserve_price,
        end_time: request.end_time,
    };
    state
        .catalog
        .publish(request.auction.clone(), info)
        .await?;
    state.scheduler.schedule(request.auction, request.end_time);
    Ok(StatusCode::CREATED)
}
