use crate::{api::convert_error_to_reply, orderbook::Orderbook};
use model::TradingPair;
use std::{convert::Infallible, sync::Arc};
use warp::{hyper::StatusCode, reply, Filter, Rejection, Reply};

pub fn get_stats_request() -> impl Filter<Extract = (TradingPair,), Error = Rejection> + Clone {
    warp::path!("stats" / TradingPair).and(warp::get())
}

pub fn get_stats(
    orderbook: Arc<Orderbook>,
    timeout: std::time::Duration,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    get_stats_request().and_then(move |pair: TradingPair| {
        let orderbook = orderbook.clone();
        async move {
            let reply = crate::api::bounded(timeout, async move {
                match orderbook.get_stats(&pair).await {
                    Ok(Some(stats)) => reply::with_status(reply::json(&stats), StatusCode::OK),
                    Ok(None) => reply::with_status(
                        super::error("UnknownPair", format!("no order book for {}", pair)),
                        StatusCode::NOT_FOUND,
                    ),
                    Err(err) => convert_error_to_reply(err),
                }
            })
            .await;
            Result::<_, Infallible>::Ok(reply)
        }
    })
}
