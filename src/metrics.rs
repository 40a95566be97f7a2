use std::{sync::Arc, time::Instant};

use axum::{
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;
use serde::Serialize;

pub const PROCESS_TIME_HEADER: &str = "x-process-time";

#[derive(Debug, Default)]
struct Totals {
    request_count: u64,
    total_latency: f64,
}

/// Request counter and cumulative latency, shared by every handler.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    totals: Mutex<Totals>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub request_count: u64,
    pub average_latency: f64,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, latency_secs: f64) {
        let mut totals = self.totals.lock();
        totals.request_count += 1;
        totals.total_latency += latency_secs;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let totals = self.totals.lock();
        let average_latency = if totals.request_count > 0 {
            totals.total_latency / totals.request_count as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            request_count: totals.request_count,
            average_latency,
        }
    }
}

pub async fn track_requests<B>(
    State(metrics): State<Arc<RequestMetrics>>,
    request: Request<B>,
    next: Next<B>,
) -> Response {
    let start = Instant::now();
    let path = request.uri().path().to_owned();
    let method = request.method().clone();

    let mut response = next.run(request).await;
    let process_time = start.elapsed().as_secs_f64();

    metrics.record(process_time);

    tracing::info!(
        path = %path,
        method = %method,
        status = response.status().as_u16(),
        "Latency: {:.4}s",
        process_time
    );

    if let Ok(value) = HeaderValue::from_str(&process_time.to_string()) {
        response.headers_mut().insert(PROCESS_TIME_HEADER, value);
    }

    response
}
