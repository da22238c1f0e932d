use query::Answer;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,
    no_results: AtomicUsize,

    // Degradation
    degraded_retrievals: AtomicUsize,
    graph_expansions: AtomicUsize,
    degraded_expansions: AtomicUsize,

    // Timing (in microseconds)
    total_query_time_us: AtomicU64,
    total_retrieval_time_us: AtomicU64,
    total_generation_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            no_results: AtomicUsize::new(0),
            degraded_retrievals: AtomicUsize::new(0),
            graph_expansions: AtomicUsize::new(0),
            degraded_expansions: AtomicUsize::new(0),
            total_query_time_us: AtomicU64::new(0),
            total_retrieval_time_us: AtomicU64::new(0),
            total_generation_time_us: AtomicU64::new(0),
        })
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_no_results(&self) {
        self.no_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self, duration: Duration) {
        self.total_query_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Pull per-stage timings and degradation flags out of an answer trace.
    pub fn record_answer(&self, answer: &Answer) {
        let trace = &answer.trace;
        if !trace.degraded_sources.is_empty() {
            self.degraded_retrievals.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(context) = &answer.graph_context {
            self.graph_expansions.fetch_add(1, Ordering::Relaxed);
            if context.degraded {
                self.degraded_expansions.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.total_retrieval_time_us.fetch_add(trace.retrieval_ms * 1000, Ordering::Relaxed);
        self.total_generation_time_us.fetch_add(trace.generation_ms * 1000, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let successes = &self.successful_requests;
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: successes.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            no_results: self.no_results.load(Ordering::Relaxed),
            degraded_retrievals: self.degraded_retrievals.load(Ordering::Relaxed),
            graph_expansions: self.graph_expansions.load(Ordering::Relaxed),
            degraded_expansions: self.degraded_expansions.load(Ordering::Relaxed),
            avg_query_time_ms: self.avg_time_ms(&self.total_query_time_us, &self.total_requests),
            avg_retrieval_time_ms: self.avg_time_ms(&self.total_retrieval_time_us, successes),
            avg_generation_time_ms: self.avg_time_ms(&self.total_generation_time_us, successes),
        }
    }

    fn avg_time_ms(&self, total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
        let total = total_us.load(Ordering::Relaxed) as f64;
        let cnt = count.load(Ordering::Relaxed) as f64;
        if cnt > 0.0 {
            total / cnt / 1000.0 // Convert to ms
        } else {
            0.0
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub no_results: usize,
    pub degraded_retrievals: usize,
    pub graph_expansions: usize,
    pub degraded_expansions: usize,
    pub avg_query_time_ms: f64,
    pub avg_retrieval_time_ms: f64,
    pub avg_generation_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_over_recorded_requests() {
        let metrics = Metrics::new();
        metrics.record_request(true);
        metrics.record_query(Duration::from_millis(30));
        metrics.record_request(false);
        metrics.record_query(Duration::from_millis(10));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.failed_requests, 1);
        assert!((snapshot.avg_query_time_ms - 20.0).abs() < 1e-9);
        assert_eq!(snapshot.avg_generation_time_ms, 0.0);
    }
}
