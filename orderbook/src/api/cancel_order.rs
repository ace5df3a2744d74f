use crate::{
    api::{convert_response, H160Wrapper, IntoWarpReply},
    orderbook::{OrderCancellationResult, Orderbook},
};
use anyhow::Result;
use model::order::{OrderId, OrderStatus};
use primitive_types::H160;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{
    hyper::StatusCode,
    reply::{with_status, Json, WithStatus},
    Filter, Rejection, Reply,
};

#[derive(Deserialize)]
struct Query {
    user_address: H160Wrapper,
}

#[derive(Serialize)]
struct CancelOrderResponse {
    order_id: OrderId,
    status: OrderStatus,
}

pub fn cancel_order_request(
) -> impl Filter<Extract = ((OrderId, H160),), Error = Rejection> + Clone {
    warp::path!("orders" / OrderId)
        .and(warp::delete())
        .and(warp::query::<Query>())
        .map(|order_id, query: Query| (order_id, query.user_address.0))
}

impl IntoWarpReply for OrderCancellationResult {
    fn into_warp_reply(self) -> WithStatus<Json> {
        match self {
            Self::Cancelled(order) => with_status(
                warp::reply::json(&CancelOrderResponse {
                    order_id: order.metadata.id,
                    status: order.metadata.status,
                }),
                StatusCode::OK,
            ),
            Self::OrderNotFound => with_status(
                super::error("OrderNotFound", "order is not known to the engine"),
                StatusCode::NOT_FOUND,
            ),
            Self::NotOrderOwner => with_status(
                super::error("NotOrderOwner", "only the order owner may cancel"),
                StatusCode::UNAUTHORIZED,
            ),
            Self::OrderNotCancellable(status) => with_status(
                super::error(
                    "OrderNotCancellable",
                    format!("order is terminal with status {:?}", status),
                ),
                StatusCode::BAD_REQUEST,
            ),
            Self::RateLimited => with_status(
                super::error("RateLimited", "too many cancellations, slow down"),
                StatusCode::TOO_MANY_REQUESTS,
            ),
        }
    }
}

pub fn cancel_order(
    orderbook: Arc<Orderbook>,
    timeout: std::time::Duration,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    cancel_order_request().and_then(move |(order_id, user): (OrderId, H160)| {
        let orderbook = orderbook.clone();
        async move {
            let result = crate::api::bounded_mutation(timeout, async move {
                let result = orderbook.cancel_order(order_id, user).await;
                if let Err(err) = &result {
                    tracing::error!(?err, %order_id, "cancel_order error");
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
