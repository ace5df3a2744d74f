pub mod arguments;
pub mod maintenance;
pub mod time;
pub mod tracing;

use std::{
    future::Future,
    time::{Duration, Instant},
};

/// Run a future and callback with the time the future took. The call back can for example log the
/// time.
pub async fn measure_time<T>(future: impl Future<Output = T>, timer: impl FnOnce(Duration)) -> T {
    let start = Instant::now();
    let result = future.await;
    timer(start.elapsed());
    result
}
