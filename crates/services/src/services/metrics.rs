use std::{fmt::Write, time::Duration};

use dashmap::DashMap;

pub const REQUESTS_TOTAL: &str = "http_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

const DURATION_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct RequestKey {
    method: String,
    endpoint: String,
    status_code: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct EndpointKey {
    method: String,
    endpoint: String,
}

#[derive(Debug, Clone, Default)]
struct Histogram {
    /// Cumulative counts, one per entry in `DURATION_BUCKETS`.
    buckets: [u64; DURATION_BUCKETS.len()],
    count: u64,
    sum: f64,
}

impl Histogram {
    fn observe(&mut self, seconds: f64) {
        for (bound, bucket) in DURATION_BUCKETS.iter().zip(self.buckets.iter_mut()) {
            if seconds <= *bound {
                *bucket += 1;
            }
        }
        self.count += 1;
        self.sum += seconds;
    }
}

/// In-process request counters and latency histograms, rendered in the
/// Prometheus text format.
#[derive(Debug, Default)]
pub struct Metrics {
    requests: DashMap<RequestKey, u64>,
    durations: DashMap<EndpointKey, Histogram>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_counter(&self, method: &str, endpoint: &str, status_code: u16) {
        let key = RequestKey {
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            status_code,
        };
        *self.requests.entry(key).or_insert(0) += 1;
    }

    pub fn observe_duration(&self, method: &str, endpoint: &str, elapsed: Duration) {
        let key = EndpointKey {
            method: method.to_string(),
            endpoint: endpoint.to_string(),
        };
        self.durations
            .entry(key)
            .or_default()
            .observe(elapsed.as_secs_f64());
    }

    pub fn request_count(&self, method: &str, endpoint: &str, status_code: u16) -> u64 {
        let key = RequestKey {
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            status_code,
        };
        self.requests.get(&key).map(|count| *count).unwrap_or(0)
    }

    pub fn total_requests(&self) -> u64 {
        self.requests.iter().map(|entry| *entry.value()).sum()
    }

    pub fn duration_count(&self, method: &str, endpoint: &str) -> u64 {
        let key = EndpointKey {
            method: method.to_string(),
            endpoint: endpoint.to_string(),
        };
        self.durations
            .get(&key)
            .map(|histogram| histogram.count)
            .unwrap_or(0)
    }

    pub fn render(&self) -> String {
        let mut requests: Vec<(RequestKey, u64)> = self
            .requests
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        requests.sort();

        let mut durations: Vec<(EndpointKey, Histogram)> = self
            .durations
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        durations.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = String::new();
        let _ = writeln!(out, "# HELP {REQUESTS_TOTAL} Total number of HTTP requests");
        let _ = writeln!(out, "# TYPE {REQUESTS_TOTAL} counter");
        for (key, count) in &requests {
            let _ = writeln!(
                out,
                "{REQUESTS_TOTAL}{{method=\"{}\",endpoint=\"{}\",status_code=\"{}\"}} {count}",
                escape_label(&key.method),
                escape_label(&key.endpoint),
                key.status_code,
            );
        }

        let _ = writeln!(
            out,
            "# HELP {REQUEST_DURATION_SECONDS} Histogram of HTTP request duration"
        );
        let _ = writeln!(out, "# TYPE {REQUEST_DURATION_SECONDS} histogram");
        for (key, histogram) in &durations {
            let labels = format!(
                "method=\"{}\",endpoint=\"{}\"",
                escape_label(&key.method),
                escape_label(&key.endpoint)
            );
            for (bound, bucket) in DURATION_BUCKETS.iter().zip(histogram.buckets.iter()) {
                let _ = writeln!(
                    out,
                    "{REQUEST_DURATION_SECONDS}_bucket{{{labels},le=\"{bound}\"}} {bucket}"
                );
            }
            let _ = writeln!(
                out,
                "{REQUEST_DURATION_SECONDS}_bucket{{{labels},le=\"+Inf\"}} {}",
                histogram.count
            );
            let _ = writeln!(
                out,
                "{REQUEST_DURATION_SECONDS}_sum{{{labels}}} {}",
                histogram.sum
            );
            let _ = writeln!(
                out,
                "{REQUEST_DURATION_SECONDS}_count{{{labels}}} {}",
                histogram.count
            );
        }
        out
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
