use crate::{
    api::{convert_response, extract_payload, IntoWarpReply},
    orderbook::{AddOrderResult, Orderbook},
    risk::RiskError,
};
use anyhow::Result;
use model::{
    order::{OrderCreation, OrderId, OrderStatus},
    trade::Fill,
};
use serde::Serialize;
use std::{convert::Infallible, sync::Arc};
use warp::{
    hyper::StatusCode,
    reply::{with_status, Json, WithStatus},
    Filter, Rejection, Reply,
};

#[derive(Serialize)]
struct PlaceOrderResponse {
    order_id: OrderId,
    status: OrderStatus,
    fills: Vec<Fill>,
}

pub fn create_order_request(
) -> impl Filter<Extract = (OrderCreation,), Error = Rejection> + Clone {
    warp::path!("orders").and(warp::post()).and(extract_payload())
}

impl IntoWarpReply for AddOrderResult {
    fn into_warp_reply(self) -> WithStatus<Json> {
        match self {
            AddOrderResult::Added { order, fills } => with_status(
                warp::reply::json(&PlaceOrderResponse {
                    order_id: order.metadata.id,
                    status: order.metadata.status,
                    fills,
                }),
                StatusCode::CREATED,
            ),
            AddOrderResult::InvalidParameter(reason) => with_status(
                super::error("InvalidParameter", reason),
                StatusCode::BAD_REQUEST,
            ),
            AddOrderResult::MalformedSignature => with_status(
                super::error(
                    "MalformedSignature",
                    "signature bytes are not a recoverable signature",
                ),
                StatusCode::BAD_REQUEST,
            ),
            AddOrderResult::InvalidSignature(signer) => with_status(
                super::error(
                    "InvalidSignature",
                    format!("signature recovers to {:?}, not the order owner", signer),
                ),
                StatusCode::BAD_REQUEST,
            ),
            AddOrderResult::Expired => with_status(
                super::error("Expired", "order is already expired"),
                StatusCode::BAD_REQUEST,
            ),
            AddOrderResult::DuplicatedOrder(id) => with_status(
                super::error(
                    "DuplicatedOrder",
                    format!("order already exists with id {}", id),
                ),
                StatusCode::CONFLICT,
            ),
            AddOrderResult::NonceTooLow { highest } => with_status(
                super::error(
                    "NonceTooLow",
                    format!("nonce must exceed the highest admitted nonce {}", highest),
                ),
                StatusCode::BAD_REQUEST,
            ),
            AddOrderResult::Risk(err) => risk_reply(err),
            AddOrderResult::InsufficientBalance {
                required,
                available,
            } => with_status(
                super::error(
                    "InsufficientBalance",
                    format!("required {}, available {}", required, available),
                ),
                StatusCode::BAD_REQUEST,
            ),
        }
    }
}

fn risk_reply(err: RiskError) -> WithStatus<Json> {
    let (error_type, status) = match &err {
        RiskError::OrderTooSmall => ("OrderTooSmall", StatusCode::BAD_REQUEST),
        RiskError::OrderTooLarge => ("OrderTooLarge", StatusCode::BAD_REQUEST),
        RiskError::PriceDeviationTooLarge => {
            ("PriceDeviationTooLarge", StatusCode::BAD_REQUEST)
        }
        RiskError::RateLimited => ("RateLimited", StatusCode::TOO_MANY_REQUESTS),
        RiskError::TooManyOpenOrders => ("TooManyOpenOrders", StatusCode::BAD_REQUEST),
        RiskError::Blacklisted => ("Blacklisted", StatusCode::FORBIDDEN),
    };
    with_status(super::error(error_type, err.to_string()), status)
}

pub fn create_order(
    orderbook: Arc<Orderbook>,
    timeout: std::time::Duration,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    create_order_request().and_then(move |creation: OrderCreation| {
        let orderbook = orderbook.clone();
        async move {
            let result = crate::api::bounded_mutation(timeout, async move {
                let result = shared::measure_time(orderbook.add_order(creation), |duration| {
                    tracing::debug!(?duration, "order admission")
                })
                .await;
                let metrics = crate::metrics::get_metrics();
                match &result {
                    Ok(AddOrderResult::Added { fills, .. }) => {
                        metrics.order_observed("added");
                        metrics.fills_observed(fills.len());
                    }
                    Ok(_) => metrics.order_observed("rejected"),
                    Err(err) => {
                        tracing::error!(?err, "add_order error");
                        metrics.order_observed("error");
                    }
                }
                result
            })
            .await;
            Result::<_, Infallible>::Ok(match result {
                Ok(result) => convert_response(result),
                Err(reply) => reply,
            })
        }
    })
}
