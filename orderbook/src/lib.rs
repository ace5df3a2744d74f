pub mod account_balances;
pub mod api;
pub mod book;
pub mod database;
pub mod events;
pub mod matching;
pub mod metrics;
pub mod orderbook;
pub mod risk;

use crate::{events::EventHub, orderbook::Orderbook};
use std::{net::SocketAddr, sync::Arc};
use tokio::{task, task::JoinHandle};
use warp::Filter;

pub fn serve_task(
    orderbook: Arc<Orderbook>,
    hub: Arc<EventHub>,
    address: SocketAddr,
    timeouts: api::Timeouts,
) -> JoinHandle<()> {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "DELETE", "OPTIONS", "PUT", "PATCH"])
        .allow_headers(vec!["Origin", "Content-Type", "X-Auth-Token", "X-AppId"]);
    let filter = api::handle_all_routes(orderbook, hub, timeouts)
        .with(cors)
        .with(metrics::handle_metrics())
        .with(warp::log::custom(|info| {
            tracing::info!(
                "{} \"{}\" {} {:?}",
                info.method(),
                info.path(),
                info.status().as_str(),
                info.elapsed(),
            );
        }));
    tracing::info!(%address, "serving order book");
    task::spawn(warp::serve(filter).bind(address))
}
