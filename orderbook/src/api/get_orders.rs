use crate::{
    api::{convert_error_to_reply, H160Wrapper},
    database::OrderFilter,
    orderbook::Orderbook,
};
use anyhow::Result;
use model::{
    order::{Order, OrderStatus},
    TradingPair,
};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{
    hyper::StatusCode,
    reply::{self, Json, WithStatus},
    Filter, Rejection, Reply,
};

/// Page size when the query does not specify one.
const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;

#[derive(Deserialize)]
struct Query {
    user_address: Option<H160Wrapper>,
    trading_pair: Option<TradingPair>,
    status: Option<OrderStatus>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl Query {
    fn order_filter(self) -> OrderFilter {
        OrderFilter {
            user_address: self.user_address.map(|wrapper| wrapper.0),
            trading_pair: self.trading_pair,
            status: self.status,
            limit: Some(self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)),
            offset: self.offset.unwrap_or(0),
        }
    }
}

#[derive(Serialize)]
struct OrdersResponse {
    orders: Vec<Order>,
    total: usize,
}

pub fn get_orders_request() -> impl Filter<Extract = (OrderFilter,), Error = Rejection> + Clone {
    warp::path!("orders")
        .and(warp::get())
        .and(warp::query::<Query>())
        .map(Query::order_filter)
}

pub fn get_orders_response(result: Result<(Vec<Order>, usize)>) -> WithStatus<Json> {
    match result {
        Ok((orders, total)) => reply::with_status(
            reply::json(&OrdersResponse { orders, total }),
            StatusCode::OK,
        ),
        Err(err) => convert_error_to_reply(err),
    }
}

pub fn get_orders(
    orderbook: Arc<Orderbook>,
    timeout: std::time::Duration,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    get_orders_request().and_then(move |filter: OrderFilter| {
        let orderbook = orderbook.clone();
        async move {
            let reply = crate::api::bounded(timeout, async move {
                get_orders_response(orderbook.get_orders(&filter).await)
            })
            .await;
            Result::<_, Infallible>::Ok(reply)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::H160;
    use warp::test::request;

    #[tokio::test]
    async fn parses_all_query_parameters() {
        let filter = get_orders_request();
        let path = "/orders?user_address=0x0000000000000000000000000000000000000001\
                    &trading_pair=WETH-USDC&status=open&limit=10&offset=5";
        let result = request().path(path).filter(&filter).await.unwrap();
        assert_eq!(result.user_address, Some(H160::from_low_u64_be(1)));
        assert_eq!(result.trading_pair, Some("WETH-USDC".parse().unwrap()));
        assert_eq!(result.status, Some(OrderStatus::Open));
        assert_eq!(result.limit, Some(10));
        assert_eq!(result.offset, 5);
    }

    #[tokio::test]
    async fn defaults_and_caps_limit() {
        let filter = get_orders_request();
        let result = request().path("/orders").filter(&filter).await.unwrap();
        assert_eq!(result.limit, Some(DEFAULT_LIMIT));
        let result = request()
            .path("/orders?limit=100000")
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(result.limit, Some(MAX_LIMIT));
    }

    #[tokio::test]
    async fn empty_store_yields_empty_page() {
        let orderbook = crate::api::test_util::empty_orderbook();
        let filter = get_orders(orderbook, crate::api::test_util::timeouts().read);
        let response = request().path("/orders").reply(&filter).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["total"], 0);
        assert_eq!(body["orders"].as_array().unwrap().len(), 0);
    }
}
