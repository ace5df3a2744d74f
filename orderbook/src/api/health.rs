use chrono::{DateTime, Utc};
use serde::Serialize;
use warp::{Filter, Rejection, Reply};

#[derive(Serialize)]
struct Health {
    status: &'static str,
    timestamp: DateTime<Utc>,
    version: &'static str,
}

pub fn health() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("health").and(warp::get()).map(|| {
        warp::reply::json(&Health {
            status: "ok",
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION"),
        })
    })
}
