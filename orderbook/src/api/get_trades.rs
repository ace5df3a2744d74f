use crate::{api::convert_error_to_reply, database::TradeFilter, orderbook::Orderbook};
use anyhow::Result;
use model::{trade::Fill, TradingPair};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{
    hyper::StatusCode,
    reply::{self, Json, WithStatus},
    Filter, Rejection, Reply,
};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;

#[derive(Deserialize)]
struct Query {
    trading_pair: Option<TradingPair>,
    limit: Option<usize>,
}

impl Query {
    fn trade_filter(self) -> TradeFilter {
        TradeFilter {
            trading_pair: self.trading_pair,
            limit: Some(self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)),
        }
    }
}

#[derive(Serialize)]
struct TradesResponse {
    trades: Vec<Fill>,
    total: usize,
}

pub fn get_trades_request() -> impl Filter<Extract = (TradeFilter,), Error = Rejection> + Clone {
    warp::path!("trades")
        .and(warp::get())
        .and(warp::query::<Query>())
        .map(Query::trade_filter)
}

pub fn get_trades_response(result: Result<(Vec<Fill>, usize)>) -> WithStatus<Json> {
    match result {
        Ok((trades, total)) => reply::with_status(
            reply::json(&TradesResponse { trades, total }),
            StatusCode::OK,
        ),
        Err(err) => convert_error_to_reply(err),
    }
}

pub fn get_trades(
    orderbook: Arc<Orderbook>,
    timeout: std::time::Duration,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    get_trades_request().and_then(move |filter: TradeFilter| {
        let orderbook = orderbook.clone();
        async move {
            let reply = crate::api::bounded(timeout, async move {
                get_trades_response(orderbook.get_trades(&filter).await)
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
    async fn parses_query() {
        let filter = get_trades_request();
        let result = request()
            .path("/trades?trading_pair=WETH-USDC&limit=10")
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(result.trading_pair, Some("WETH-USDC".parse().unwrap()));
        assert_eq!(result.limit, Some(10));

        let result = request().path("/trades").filter(&filter).await.unwrap();
        assert_eq!(result.trading_pair, None);
        assert_eq!(result.limit, Some(DEFAULT_LIMIT));
    }

    #[tokio::test]
    async fn empty_store_yields_empty_page() {
        let orderbook = crate::api::test_util::empty_orderbook();
        let filter = get_trades(orderbook, crate::api::test_util::timeouts().read);
        let response = request().path("/trades").reply(&filter).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["total"], 0);
    }
}
