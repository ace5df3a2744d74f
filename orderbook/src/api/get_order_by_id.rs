use crate::{
    api::{convert_response, IntoWarpReply},
    orderbook::Orderbook,
};
use anyhow::Result;
use model::order::{Order, OrderId};
use std::{convert::Infallible, sync::Arc};
use warp::{
    hyper::StatusCode,
    reply::{with_status, Json, WithStatus},
    Filter, Rejection, Reply,
};

pub fn get_order_by_id_request() -> impl Filter<Extract = (OrderId,), Error = Rejection> + Clone {
    warp::path!("orders" / OrderId).and(warp::get())
}

struct OrderReply(Option<Order>);

impl IntoWarpReply for OrderReply {
    fn into_warp_reply(self) -> WithStatus<Json> {
        match self.0 {
            Some(order) => with_status(warp::reply::json(&order), StatusCode::OK),
            None => with_status(
                super::error("OrderNotFound", "order was not found"),
                StatusCode::NOT_FOUND,
            ),
        }
    }
}

pub fn get_order_by_id(
    orderbook: Arc<Orderbook>,
    timeout: std::time::Duration,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    get_order_by_id_request().and_then(move |order_id: OrderId| {
        let orderbook = orderbook.clone();
        async move {
            let reply = crate::api::bounded(timeout, async move {
                let result = orderbook.get_order(order_id).await.map(OrderReply);
                if let Err(err) = &result {
                    tracing::error!(?err, %order_id, "get_order error");
                }
                convert_response(result)
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
    async fn parses_order_id() {
        let filter = get_order_by_id_request();
        let id = request().path("/orders/17").filter(&filter).await.unwrap();
        assert_eq!(id, OrderId(17));
        assert!(request().path("/orders/abc").filter(&filter).await.is_err());
    }

    #[tokio::test]
    async fn missing_order_is_not_found() {
        let response = OrderReply(None).into_warp_reply().into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_order_returns_404_end_to_end() {
        let orderbook = crate::api::test_util::empty_orderbook();
        let filter = get_order_by_id(orderbook, crate::api::test_util::timeouts().read);
        let response = request().path("/orders/1").reply(&filter).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
