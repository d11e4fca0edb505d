//! Feature extraction: one fixed-layout numeric vector per log record.
//!
//! Besides the record's own fields, every vector carries batch-level context:
//! per-user and per-endpoint volume, mean latency and error rate, plus the
//! request volume and error rate over the hour leading up to the record.
//! Training and detection must use this same layout.

use std::collections::HashMap;

use chrono::{Datelike, Timelike};

use crate::errors::AppError;
use crate::models::log::{validate_batch, LogRecord};

pub const FEATURE_COUNT: usize = 14;

/// Column names in vector order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "hour",
    "day_of_week",
    "status_code",
    "response_time",
    "request_size",
    "response_size",
    "user_request_frequency",
    "user_avg_response_time",
    "user_error_rate",
    "endpoint_frequency",
    "endpoint_avg_response_time",
    "endpoint_error_rate",
    "recent_requests",
    "recent_error_rate",
];

pub type FeatureVector = [f64; FEATURE_COUNT];

const RECENT_WINDOW_MS: i64 = 3_600_000;

#[derive(Default)]
struct GroupStats {
    count: usize,
    total_response_time: f64,
    errors: usize,
}

impl GroupStats {
    fn add(&mut self, log: &LogRecord) {
        self.count += 1;
        self.total_response_time += log.response_time;
        if log.is_error() {
            self.errors += 1;
        }
    }

    fn mean_response_time(&self) -> f64 {
        self.total_response_time / self.count as f64
    }

    fn error_rate(&self) -> f64 {
        self.errors as f64 / self.count as f64
    }
}

/// Sorted event times with a running error count, for window queries.
struct Timeline {
    times: Vec<i64>,
    /// `errors_before[i]` = errors among `times[..i]`.
    errors_before: Vec<usize>,
}

impl Timeline {
    fn build(logs: &[LogRecord]) -> Self {
        let mut events: Vec<(i64, bool)> = logs
            .iter()
            .map(|l| (l.timestamp.timestamp_millis(), l.is_error()))
            .collect();
        events.sort_unstable();

        let mut errors_before = Vec::with_capacity(events.len() + 1);
        errors_before.push(0);
        let mut running = 0;
        for &(_, is_error) in &events {
            if is_error {
                running += 1;
            }
            errors_before.push(running);
        }

        Self {
            times: events.into_iter().map(|(t, _)| t).collect(),
            errors_before,
        }
    }

    /// (count, errors) for events in `(at - RECENT_WINDOW_MS, at]`.
    fn window_ending_at(&self, at: i64) -> (usize, usize) {
        let hi = self.times.partition_point(|&t| t <= at);
        let lo = self.times.partition_point(|&t| t <= at - RECENT_WINDOW_MS);
        (hi - lo, self.errors_before[hi] - self.errors_before[lo])
    }
}

/// Extract features for a batch. The output is index-aligned with `logs`.
///
/// Fails with `AppError::Validation` if any record is invalid; nothing is
/// extracted in that case.
pub fn extract(logs: &[LogRecord]) -> Result<Vec<FeatureVector>, AppError> {
    validate_batch(logs).map_err(AppError::Validation)?;

    let mut by_user: HashMap<&str, GroupStats> = HashMap::new();
    let mut by_endpoint: HashMap<&str, GroupStats> = HashMap::new();
    for log in logs {
        by_user.entry(log.user_id.as_str()).or_default().add(log);
        by_endpoint.entry(log.endpoint.as_str()).or_default().add(log);
    }
    let timeline = Timeline::build(logs);

    let vectors = logs
        .iter()
        .map(|log| {
            let user = &by_user[log.user_id.as_str()];
            let endpoint = &by_endpoint[log.endpoint.as_str()];
            let (recent, recent_errors) =
                timeline.window_ending_at(log.timestamp.timestamp_millis());

            [
                log.timestamp.hour() as f64,
                log.timestamp.weekday().num_days_from_monday() as f64,
                log.status_code as f64,
                log.response_time,
                log.request_size.unwrap_or(0) as f64,
                log.response_size.unwrap_or(0) as f64,
                user.count as f64,
                user.mean_response_time(),
                user.error_rate(),
                endpoint.count as f64,
                endpoint.mean_response_time(),
                endpoint.error_rate(),
                recent as f64,
                // the record itself is always inside its own window
                recent_errors as f64 / recent as f64,
            ]
        })
        .collect();

    Ok(vectors)
}
