//! Gateway metrics in Prometheus text exposition format.
//!
//! Hand-rolled registry: counters and gauges live in atomics, duration
//! series keep a bounded sample window for quantile rendering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex, MutexGuard};

use clamgate_core::{classify, ScanError, ScanOutcome};

/// Samples retained per duration series.
const MAX_SAMPLES: usize = 10_000;

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::default);

#[derive(Default)]
struct Registry {
    scan_requests: Mutex<HashMap<(&'static str, &'static str), u64>>,
    scan_durations: Mutex<HashMap<&'static str, DurationSeries>>,
    scans_in_progress: AtomicI64,
    http_requests: Mutex<HashMap<(String, String, u16), u64>>,
    http_durations: Mutex<HashMap<(String, String), DurationSeries>>,
    health: AtomicU64,
}

#[derive(Debug, Default, Clone)]
struct DurationSeries {
    count: u64,
    sum: f64,
    samples: Vec<f64>,
}

impl DurationSeries {
    fn observe(&mut self, secs: f64) {
        self.count += 1;
        self.sum += secs;
        if self.samples.len() >= MAX_SAMPLES {
            self.samples.remove(0);
        }
        self.samples.push(secs);
    }

    fn quantile(&self, q: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        let idx = (q * (sorted.len() - 1) as f64).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// RAII guard backing the in-progress gauge.
pub struct InFlightGuard(());

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        REGISTRY.scans_in_progress.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Mark one scan in progress until the guard drops.
#[must_use]
pub fn in_flight() -> InFlightGuard {
    REGISTRY.scans_in_progress.fetch_add(1, Ordering::Relaxed);
    InFlightGuard(())
}

/// Record one finished scan attempt under its transport method label.
///
/// A duration is observed only when the attempt actually round-tripped
/// the daemon: successful verdicts, and engine errors that carry an
/// elapsed time. Timeouts and connection failures leave the series
/// untouched.
pub fn record_scan(method: &'static str, outcome: &Result<ScanOutcome, ScanError>) {
    let status = classify(outcome).as_str();
    *lock(&REGISTRY.scan_requests)
        .entry((method, status))
        .or_default() += 1;

    let elapsed = match outcome {
        Ok(result) => Some(result.elapsed_secs),
        Err(ScanError::Engine { elapsed_secs, .. }) if *elapsed_secs > 0.0 => Some(*elapsed_secs),
        Err(_) => None,
    };
    if let Some(secs) = elapsed {
        lock(&REGISTRY.scan_durations)
            .entry(method)
            .or_default()
            .observe(secs);
    }
}

/// Record one HTTP request for the middleware counter.
pub fn record_http_request(method: &str, path: &str, status: u16, elapsed_secs: f64) {
    *lock(&REGISTRY.http_requests)
        .entry((method.to_string(), path.to_string(), status))
        .or_default() += 1;
    lock(&REGISTRY.http_durations)
        .entry((method.to_string(), path.to_string()))
        .or_default()
        .observe(elapsed_secs);
}

/// Flip the daemon health gauge.
pub fn set_health(healthy: bool) {
    REGISTRY.health.store(u64::from(healthy), Ordering::Relaxed);
}

/// Render the whole registry as Prometheus text exposition.
#[must_use]
pub fn render() -> String {
    let mut lines = Vec::new();

    lines.push(
        "# HELP clamgate_scan_requests_total Total scan requests by method and result status"
            .to_string(),
    );
    lines.push("# TYPE clamgate_scan_requests_total counter".to_string());
    let mut rows: Vec<_> = lock(&REGISTRY.scan_requests)
        .iter()
        .map(|(key, value)| (*key, *value))
        .collect();
    rows.sort_unstable();
    for ((method, status), count) in rows {
        lines.push(format!(
            "clamgate_scan_requests_total{{method=\"{method}\",status=\"{status}\"}} {count}"
        ));
    }

    lines.push(
        "# HELP clamgate_scan_duration_seconds Duration of scan operations in seconds".to_string(),
    );
    lines.push("# TYPE clamgate_scan_duration_seconds summary".to_string());
    let mut rows: Vec<_> = lock(&REGISTRY.scan_durations)
        .iter()
        .map(|(key, series)| (*key, series.clone()))
        .collect();
    rows.sort_unstable_by_key(|(method, _)| *method);
    for (method, series) in rows {
        push_summary(
            &mut lines,
            "clamgate_scan_duration_seconds",
            &format!("method=\"{method}\""),
            &series,
        );
    }

    lines.push("# HELP clamgate_scans_in_progress Number of scans currently in progress".to_string());
    lines.push("# TYPE clamgate_scans_in_progress gauge".to_string());
    lines.push(format!(
        "clamgate_scans_in_progress {}",
        REGISTRY.scans_in_progress.load(Ordering::Relaxed)
    ));

    lines.push(
        "# HELP clamgate_http_requests_total Total HTTP requests by path and status code"
            .to_string(),
    );
    lines.push("# TYPE clamgate_http_requests_total counter".to_string());
    let mut rows: Vec<_> = lock(&REGISTRY.http_requests)
        .iter()
        .map(|(key, value)| (key.clone(), *value))
        .collect();
    rows.sort_unstable();
    for ((method, path, status), count) in rows {
        lines.push(format!(
            "clamgate_http_requests_total{{method=\"{method}\",path=\"{path}\",status_code=\"{status}\"}} {count}"
        ));
    }

    lines.push(
        "# HELP clamgate_http_request_duration_seconds Duration of HTTP requests in seconds"
            .to_string(),
    );
    lines.push("# TYPE clamgate_http_request_duration_seconds summary".to_string());
    let mut rows: Vec<_> = lock(&REGISTRY.http_durations)
        .iter()
        .map(|(key, series)| (key.clone(), series.clone()))
        .collect();
    rows.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
    for ((method, path), series) in rows {
        push_summary(
            &mut lines,
            "clamgate_http_request_duration_seconds",
            &format!("method=\"{method}\",path=\"{path}\""),
            &series,
        );
    }

    lines.push(
        "# HELP clamgate_health_check_healthy Whether clamd is healthy (1) or unhealthy (0)"
            .to_string(),
    );
    lines.push("# TYPE clamgate_health_check_healthy gauge".to_string());
    lines.push(format!(
        "clamgate_health_check_healthy {}",
        REGISTRY.health.load(Ordering::Relaxed)
    ));

    lines.join("\n") + "\n"
}

fn push_summary(lines: &mut Vec<String>, name: &str, labels: &str, series: &DurationSeries) {
    for (q, label) in [(0.5, "0.5"), (0.95, "0.95"), (0.99, "0.99")] {
        lines.push(format!(
            "{name}{{{labels},quantile=\"{label}\"}} {}",
            series.quantile(q)
        ));
    }
    lines.push(format!("{name}_sum{{{labels}}} {}", series.sum));
    lines.push(format!("{name}_count{{{labels}}} {}", series.count));
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clamgate_core::ScanVerdict;

    use super::*;

    fn clean_outcome(elapsed_secs: f64) -> Result<ScanOutcome, ScanError> {
        Ok(ScanOutcome {
            verdict: ScanVerdict::Clean,
            description: String::new(),
            elapsed_secs,
        })
    }

    /// Single test; the registry is process-global.
    #[test]
    fn registry_records_and_renders() {
        record_scan("unit_scan", &clean_outcome(0.25));
        record_scan(
            "unit_scan",
            &Err(ScanError::Timeout {
                configured: Duration::from_secs(5),
            }),
        );
        record_scan(
            "unit_scan",
            &Err(ScanError::Engine {
                description: "broken".to_string(),
                elapsed_secs: 0.5,
            }),
        );
        record_scan("unit_scan", &Err(ScanError::Unavailable("gone".to_string())));

        let guard = in_flight();
        let text = render();
        assert!(text.contains("clamgate_scan_requests_total{method=\"unit_scan\",status=\"ok\"} 1"));
        assert!(
            text.contains("clamgate_scan_requests_total{method=\"unit_scan\",status=\"timeout\"} 1")
        );
        assert!(text.contains(
            "clamgate_scan_requests_total{method=\"unit_scan\",status=\"engine_error\"} 1"
        ));
        assert!(
            text.contains("clamgate_scan_requests_total{method=\"unit_scan\",status=\"error\"} 1")
        );
        // Only the verdict and the engine error observed a duration.
        assert!(text.contains("clamgate_scan_duration_seconds_count{method=\"unit_scan\"} 2"));
        assert!(text.contains("clamgate_scans_in_progress 1"));

        drop(guard);
        assert!(render().contains("clamgate_scans_in_progress 0"));

        record_http_request("POST", "/api/scan", 200, 0.012);
        let text = render();
        assert!(text.contains(
            "clamgate_http_requests_total{method=\"POST\",path=\"/api/scan\",status_code=\"200\"} 1"
        ));
        assert!(text.contains(
            "clamgate_http_request_duration_seconds_count{method=\"POST\",path=\"/api/scan\"} 1"
        ));

        set_health(true);
        assert!(render().contains("clamgate_health_check_healthy 1"));
        set_health(false);
        assert!(render().contains("clamgate_health_check_healthy 0"));
    }

    #[test]
    fn quantiles_over_sample_window() {
        let mut series = DurationSeries::default();
        for i in 1..=100 {
            series.observe(f64::from(i) / 100.0);
        }
        assert_eq!(series.count, 100);
        assert!((series.quantile(0.5) - 0.5).abs() < 0.02);
        assert!((series.quantile(0.95) - 0.95).abs() < 0.02);
        assert!((series.quantile(0.99) - 0.99).abs() < 0.02);
    }
}
