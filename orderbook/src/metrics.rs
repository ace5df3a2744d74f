//! Prometheus metrics for the api and the matching pipeline, exposed on `/metrics`.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::convert::Infallible;
use warp::{Filter, Rejection, Reply};

pub struct Metrics {
    /// API request durations labelled by method and response status code.
    api_requests: HistogramVec,
    /// Admitted and rejected orders labelled by outcome.
    orders: IntCounterVec,
    fills: IntCounter,
}

impl Metrics {
    fn new(registry: &Registry) -> prometheus::Result<Self> {
        let opts = HistogramOpts::new(
            "dex_api_requests",
            "API request durations labelled by method and response status code",
        );
        let api_requests = HistogramVec::new(opts, &["method", "status"])?;
        registry.register(Box::new(api_requests.clone()))?;

        let orders = IntCounterVec::new(
            Opts::new("dex_orders", "Admitted and rejected orders by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(orders.clone()))?;

        let fills = IntCounter::new("dex_fills", "Number of fills produced by the engine")?;
        registry.register(Box::new(fills.clone()))?;

        Ok(Self {
            api_requests,
            orders,
            fills,
        })
    }

    pub fn order_observed(&self, outcome: &str) {
        self.orders.with_label_values(&[outcome]).inc();
    }

    pub fn fills_observed(&self, count: usize) {
        self.fills.inc_by(count as u64);
    }
}

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    static ref METRICS: Metrics = Metrics::new(&REGISTRY).unwrap();
}

pub fn get_metrics() -> &'static Metrics {
    &METRICS
}

/// Wraps the top level filter so every request is measured, including unmatched ones.
pub fn handle_metrics() -> warp::log::Log<impl Fn(warp::log::Info) + Clone> {
    warp::log::custom(|info: warp::log::Info| {
        get_metrics()
            .api_requests
            .with_label_values(&[info.method().as_str(), info.status().as_str()])
            .observe(info.elapsed().as_secs_f64());
    })
}

pub fn metrics_endpoint() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("metrics").and(warp::get()).and_then(|| async {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(err) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
            tracing::error!(?err, "failed to encode metrics");
        }
        let body = String::from_utf8(buffer).unwrap_or_default();
        Result::<_, Infallible>::Ok(warp::reply::with_header(
            body,
            "Content-Type",
            encoder.format_type().to_string(),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::test::request;

    #[tokio::test]
    async fn metrics_endpoint_serves_prometheus_text() {
        get_metrics().order_observed("added");
        get_metrics().fills_observed(2);
        let response = request().path("/metrics").reply(&metrics_endpoint()).await;
        assert_eq!(response.status(), 200);
        let body = String::from_utf8(response.body().to_vec()).unwrap();
        assert!(body.contains("dex_orders"));
        assert!(body.contains("dex_fills"));
    }
}
