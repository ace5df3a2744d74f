use crate::orderbook::Orderbook;
use model::TradingPair;
use serde::Deserialize;
use std::{convert::Infallible, sync::Arc};
use warp::{hyper::StatusCode, reply, Filter, Rejection, Reply};

const DEFAULT_DEPTH: usize = 20;
const MAX_DEPTH: usize = 500;

#[derive(Deserialize)]
struct Query {
    depth: Option<usize>,
}

pub fn get_orderbook_request(
) -> impl Filter<Extract = ((TradingPair, usize),), Error = Rejection> + Clone {
    warp::path!("orderbook" / TradingPair)
        .and(warp::get())
        .and(warp::query::<Query>())
        .map(|pair, query: Query| (pair, query.depth.unwrap_or(DEFAULT_DEPTH).min(MAX_DEPTH)))
}

pub fn get_orderbook(
    orderbook: Arc<Orderbook>,
    timeout: std::time::Duration,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    get_orderbook_request().and_then(move |(pair, depth): (TradingPair, usize)| {
        let orderbook = orderbook.clone();
        async move {
            let reply = crate::api::bounded(timeout, async move {
                match orderbook.get_order_book(&pair, depth) {
                    Some(snapshot) => reply::with_status(reply::json(&snapshot), StatusCode::OK),
                    None => reply::with_status(
                        super::error("UnknownPair", format!("no order book for {}", pair)),
                        StatusCode::NOT_FOUND,
                    ),
                }
            })
            .await;
            Result::<_, Infallible>::Ok(reply)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::test::request;

    #[tokio::test]
    async fn parses_pair_and_depth() {
        let filter = get_orderbook_request();
        let (pair, depth) = request()
            .path("/orderbook/WETH-USDC?depth=5")
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(pair, "WETH-USDC".parse().unwrap());
        assert_eq!(depth, 5);

        let (_, depth) = request()
            .path("/orderbook/WETH-USDC")
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(depth, DEFAULT_DEPTH);
    }

    #[tokio::test]
    async fn malformed_pair_is_rejected() {
        let filter = get_orderbook_request();
        assert!(request()
            .path("/orderbook/WETHUSDC")
            .filter(&filter)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unknown_pair_is_not_found() {
        let orderbook = crate::api::test_util::empty_orderbook();
        let filter = get_orderbook(orderbook, crate::api::test_util::timeouts().read);
        let response = request().path("/orderbook/WETH-USDC").reply(&filter).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["errorType"], "UnknownPair");
    }
}
