use chrono::{DateTime, Utc};

/// Roughly how many axis labels a generated series carries, regardless
/// of point density.
const LABEL_BUDGET: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: i64,
    pub value: f64,
    /// Rendered time label; only every Kth point carries one so the
    /// axis stays readable at any density.
    pub label: Option<String>,
}

fn time_label(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%H:%M").to_string())
        .unwrap_or_default()
}

/// Value at `timestamp` linearly interpolated between the nearest stored
/// sample at-or-before and the nearest strictly after. With samples on
/// one side only, clamps to that side; no extrapolation past the data's
/// edges. `samples` must be sorted ascending by timestamp.
fn interpolate_at(samples: &[(i64, f64)], timestamp: i64) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let before = samples.iter().rev().find(|(ts, _)| *ts <= timestamp);
    let after = samples.iter().find(|(ts, _)| *ts > timestamp);

    match (before, after) {
        (Some((t0, v0)), Some((t1, v1))) => {
            let span = (t1 - t0) as f64;
            if span <= 0.0 {
                return Some(*v1);
            }
            let fraction = (timestamp - t0) as f64 / span;
            Some(v0 + (v1 - v0) * fraction)
        }
        (Some((_, v0)), None) => Some(*v0),
        (None, Some((_, v1))) => Some(*v1),
        (None, None) => None,
    }
}

/// Turns sparse, irregular samples into an evenly spaced display series
/// covering `window_secs` up to `now`. The final point always equals the
/// live `current_value` so the chart never lags behind the freshest
/// number; with no history at all the series is that single live point.
pub fn build_series(
    samples: &[(i64, f64)],
    current_value: f64,
    window_secs: i64,
    interval_secs: i64,
    now: i64,
) -> Vec<SeriesPoint> {
    if samples.is_empty() || interval_secs <= 0 || window_secs <= 0 {
        return vec![SeriesPoint {
            timestamp: now,
            value: current_value,
            label: Some(time_label(now)),
        }];
    }

    let start = now - window_secs;
    let mut points = Vec::new();
    let mut timestamp = start;
    while timestamp <= now {
        // interpolate_at is Some here: samples is non-empty.
        if let Some(value) = interpolate_at(samples, timestamp) {
            points.push(SeriesPoint {
                timestamp,
                value,
                label: None,
            });
        }
        timestamp += interval_secs;
    }

    match points.last_mut() {
        Some(last) if last.timestamp == now => last.value = current_value,
        _ => points.push(SeriesPoint {
            timestamp: now,
            value: current_value,
            label: None,
        }),
    }

    let every = (points.len() / LABEL_BUDGET).max(1);
    for (index, point) in points.iter_mut().enumerate() {
        if index % every == 0 {
            point.label = Some(time_label(point.timestamp));
        }
    }
    points
}
