mod cancel_order;
mod create_order;
mod get_order_by_id;
mod get_orderbook;
mod get_orders;
mod get_stats;
mod get_trades;
mod health;
mod websocket;

use crate::{events::EventHub, orderbook::Orderbook};
use anyhow::Error as anyhowError;
use hex::{FromHex, FromHexError};
use model::h160_hexadecimal;
use primitive_types::H160;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, future::Future, str::FromStr, sync::Arc, time::Duration};
use warp::{
    hyper::StatusCode,
    reply::{json, with_status, Json, WithStatus},
    Filter, Rejection, Reply,
};

/// Handler deadlines from the server configuration: queries are bounded by the read timeout,
/// mutating requests by the write timeout.
#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    pub read: Duration,
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(10),
            write: Duration::from_secs(10),
        }
    }
}

pub fn handle_all_routes(
    orderbook: Arc<Orderbook>,
    hub: Arc<EventHub>,
    timeouts: Timeouts,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let create_order = create_order::create_order(orderbook.clone(), timeouts.write);
    let cancel_order = cancel_order::cancel_order(orderbook.clone(), timeouts.write);
    let get_order = get_order_by_id::get_order_by_id(orderbook.clone(), timeouts.read);
    let get_orders = get_orders::get_orders(orderbook.clone(), timeouts.read);
    let get_orderbook = get_orderbook::get_orderbook(orderbook.clone(), timeouts.read);
    let get_trades = get_trades::get_trades(orderbook.clone(), timeouts.read);
    let get_stats = get_stats::get_stats(orderbook, timeouts.read);
    let health = health::health();
    let api = warp::path!("api" / "v1" / ..).and(
        health
            .or(create_order)
            .or(cancel_order)
            .or(get_order)
            .or(get_orders)
            .or(get_orderbook)
            .or(get_trades)
            .or(get_stats),
    );
    let websocket = websocket::websocket(hub);
    let metrics = crate::metrics::metrics_endpoint();
    api.or(websocket).or(metrics).recover(handle_rejection)
}

// We turn Rejection into Reply to workaround warp not setting CORS headers on rejections, and to
// keep the error body shape uniform across handler and routing failures.
async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (error_type, description, status) = if err.is_not_found() {
        ("NotFound", "no such route".to_string(), StatusCode::NOT_FOUND)
    } else if let Some(err) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (
            "MalformedRequest",
            err.to_string(),
            StatusCode::BAD_REQUEST,
        )
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (
            "InvalidParameter",
            "query parameters could not be parsed".to_string(),
            StatusCode::BAD_REQUEST,
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            "MethodNotAllowed",
            "method not allowed on this route".to_string(),
            StatusCode::METHOD_NOT_ALLOWED,
        )
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            "PayloadTooLarge",
            "request body exceeds the size limit".to_string(),
            StatusCode::PAYLOAD_TOO_LARGE,
        )
    } else {
        tracing::warn!(?err, "unhandled rejection");
        (
            "InternalServerError",
            String::new(),
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    };
    Ok(with_status(error(error_type, description), status))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Error<'a> {
    error_type: &'a str,
    description: &'a str,
}

fn error(error_type: &str, description: impl AsRef<str>) -> Json {
    json(&Error {
        error_type,
        description: description.as_ref(),
    })
}

fn internal_error() -> Json {
    json(&Error {
        error_type: "InternalServerError",
        description: "",
    })
}

pub trait IntoWarpReply {
    fn into_warp_reply(self) -> WithStatus<Json>;
}

pub fn convert_response<T>(result: anyhow::Result<T>) -> WithStatus<Json>
where
    T: IntoWarpReply,
{
    match result {
        Ok(response) => response.into_warp_reply(),
        Err(err) => {
            tracing::error!(?err, "internal server error");
            with_status(internal_error(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub fn convert_error_to_reply(err: anyhowError) -> WithStatus<Json> {
    tracing::error!(?err, "internal server error");
    with_status(internal_error(), StatusCode::INTERNAL_SERVER_ERROR)
}

fn timeout_reply() -> WithStatus<Json> {
    with_status(
        error("Timeout", "request did not complete in time"),
        StatusCode::SERVICE_UNAVAILABLE,
    )
}

/// Bounds a query handler by the configured read deadline; the dropped future only ever reads.
pub(crate) async fn bounded(
    deadline: Duration,
    future: impl Future<Output = WithStatus<Json>>,
) -> WithStatus<Json> {
    match tokio::time::timeout(deadline, future).await {
        Ok(reply) => reply,
        Err(_) => timeout_reply(),
    }
}

/// Bounds a mutating handler by the configured write deadline. The work runs in its own task so
/// giving up on the response never abandons an admission half way; once admitted, an order
/// stands even if the caller stopped waiting.
pub(crate) async fn bounded_mutation<T: Send + 'static>(
    deadline: Duration,
    future: impl Future<Output = anyhow::Result<T>> + Send + 'static,
) -> Result<anyhow::Result<T>, WithStatus<Json>> {
    let task = tokio::task::spawn(future);
    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(convert_error_to_reply(err.into())),
        Err(_) => Err(timeout_reply()),
    }
}

/// Wraps H160 with FromStr and Deserialize that can handle a `0x` prefix.
#[derive(Deserialize)]
#[serde(transparent)]
pub struct H160Wrapper(#[serde(with = "h160_hexadecimal")] pub H160);
impl FromStr for H160Wrapper {
    type Err = FromHexError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        Ok(H160Wrapper(H160(FromHex::from_hex(s)?)))
    }
}

#[cfg(test)]
async fn response_body(response: warp::hyper::Response<warp::hyper::Body>) -> Vec<u8> {
    let mut body = response.into_body();
    let mut result = Vec::new();
    while let Some(bytes) = futures::StreamExt::next(&mut body).await {
        result.extend_from_slice(bytes.unwrap().as_ref());
    }
    result
}

const MAX_JSON_BODY_PAYLOAD: u64 = 1024 * 16;

fn extract_payload<T: DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    // (rejecting huge payloads)...
    warp::body::content_length_limit(MAX_JSON_BODY_PAYLOAD).and(warp::body::json())
}

#[cfg(test)]
pub mod test_util {
    use super::*;
    use crate::{
        account_balances::BalanceBook,
        database::Database,
        matching::{EngineSettings, MatchingEngine},
        risk::{RiskChecker, RiskConfig},
    };
    use model::DomainSeparator;
    use settlement::SettlementQueue;

    pub fn empty_orderbook() -> Arc<Orderbook> {
        let domain = DomainSeparator::new(1, H160::from_low_u64_be(0x42));
        Arc::new(Orderbook::new(
            domain,
            Arc::new(Database::new()),
            Arc::new(BalanceBook::new()),
            RiskChecker::new(RiskConfig::default()),
            Arc::new(MatchingEngine::new(EngineSettings::default())),
            Arc::new(EventHub::new()),
            Arc::new(SettlementQueue::new()),
            false,
        ))
    }

    pub fn timeouts() -> Timeouts {
        Timeouts::default()
    }
}
