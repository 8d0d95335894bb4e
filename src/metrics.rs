//! Request metrics for dummypage
//!
//! Series are created on first observation and live for the rest of the
//! process. A series is identified by its composed name
//! `{namespace}_{subsystem}_{base}{label=value,...}`, where the label names
//! for each base come from [`LABEL_SCHEMA`].
//!
//! Three bases are recorded per request:
//! - `requests_in_progress_total`: gauge by method and path
//! - `requests_total`: counter by status code, method and path
//! - `request_duration_seconds`: histogram by status code, method and path
//!
//! Each series is registered with the Prometheus registry as its own
//! collector with constant labels; `gather()` merges series sharing a name
//! into one family, so the text exposition is standard.

use dashmap::DashMap;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

pub const IN_FLIGHT: &str = "requests_in_progress_total";
pub const REQUESTS_TOTAL: &str = "requests_total";
pub const REQUEST_DURATION: &str = "request_duration_seconds";

/// Label names per metric base
///
/// A closed set known at compile time; bases not listed here carry no labels.
pub static LABEL_SCHEMA: &[(&str, &[&str])] = &[
    (IN_FLIGHT, &["method", "path"]),
    (REQUESTS_TOTAL, &["statusCode", "method", "path"]),
    (REQUEST_DURATION, &["statusCode", "method", "path"]),
];

/// Label names for `base`, empty when the base has no schema
pub fn label_names(base: &str) -> &'static [&'static str] {
    LABEL_SCHEMA
        .iter()
        .find(|(name, _)| *name == base)
        .map(|(_, labels)| *labels)
        .unwrap_or(&[])
}

fn help_for(base: &str) -> String {
    match base {
        IN_FLIGHT => "Requests currently being served".to_string(),
        REQUESTS_TOTAL => "Total number of completed HTTP requests".to_string(),
        REQUEST_DURATION => "HTTP request latency in seconds".to_string(),
        other => format!("{} observations", other),
    }
}

/// Kind of a series; one base is always the same kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    Counter,
    Gauge,
    Histogram,
}

impl SeriesKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesKind::Counter => "counter",
            SeriesKind::Gauge => "gauge",
            SeriesKind::Histogram => "histogram",
        }
    }
}

#[derive(Clone)]
enum Series {
    Counter(IntCounter),
    Gauge(IntGauge),
    Histogram(Histogram),
}

impl Series {
    fn kind(&self) -> SeriesKind {
        match self {
            Series::Counter(_) => SeriesKind::Counter,
            Series::Gauge(_) => SeriesKind::Gauge,
            Series::Histogram(_) => SeriesKind::Histogram,
        }
    }
}

/// Concurrent store of dynamically named series
pub struct MetricsRegistry {
    registry: Registry,
    namespace: String,
    subsystem: String,
    series: DashMap<String, Series>,
}

impl MetricsRegistry {
    pub fn new(namespace: impl Into<String>, subsystem: impl Into<String>) -> Self {
        Self {
            registry: Registry::new(),
            namespace: namespace.into(),
            subsystem: subsystem.into(),
            series: DashMap::new(),
        }
    }

    /// Fully qualified name without labels
    pub fn metric_name(&self, base: &str) -> String {
        format!("{}_{}_{}", self.namespace, self.subsystem, base)
    }

    /// Pair label values with the schema names for `base`
    ///
    /// Values beyond the schema are dropped; missing values become empty
    /// strings so every series of a base has the same label set.
    pub fn labels(base: &str, values: &[&str]) -> Vec<(&'static str, String)> {
        let names = label_names(base);
        if values.len() > names.len() && !names.is_empty() {
            tracing::trace!(
                base,
                expected = names.len(),
                got = values.len(),
                "Dropping extra label values"
            );
        }
        names
            .iter()
            .enumerate()
            .map(|(i, name)| (*name, values.get(i).copied().unwrap_or_default().to_string()))
            .collect()
    }

    /// Series identifier: `{ns}_{sub}_{base}{label1=value1,label2=value2}`
    ///
    /// Bases without a schema have no brace suffix.
    pub fn series_name(&self, base: &str, values: &[&str]) -> String {
        let mut name = self.metric_name(base);
        let labels = Self::labels(base, values);
        if !labels.is_empty() {
            name.push('{');
            for (i, (label, value)) in labels.iter().enumerate() {
                if i > 0 {
                    name.push(',');
                }
                name.push_str(label);
                name.push('=');
                name.push_str(value);
            }
            name.push('}');
        }
        name
    }

    fn get_or_create(
        &self,
        base: &str,
        values: &[&str],
        kind: SeriesKind,
    ) -> Result<Series, prometheus::Error> {
        let key = self.series_name(base, values);

        if let Some(existing) = self.series.get(&key) {
            return Ok(existing.value().clone());
        }

        // entry() holds the shard write lock, so two racing requests cannot
        // both register the same series.
        let entry = self.series.entry(key).or_try_insert_with(|| {
            let series = self.build(base, values, kind)?;
            match &series {
                Series::Counter(c) => self.registry.register(Box::new(c.clone()))?,
                Series::Gauge(g) => self.registry.register(Box::new(g.clone()))?,
                Series::Histogram(h) => self.registry.register(Box::new(h.clone()))?,
            }
            Ok::<_, prometheus::Error>(series)
        })?;
        Ok(entry.value().clone())
    }

    fn mismatch(&self, base: &str, found: SeriesKind, wanted: SeriesKind) -> prometheus::Error {
        prometheus::Error::Msg(format!(
            "metric {} is a {}, not a {}",
            self.metric_name(base),
            found.as_str(),
            wanted.as_str()
        ))
    }

    fn build(
        &self,
        base: &str,
        values: &[&str],
        kind: SeriesKind,
    ) -> Result<Series, prometheus::Error> {
        let const_labels: HashMap<String, String> = Self::labels(base, values)
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        let help = help_for(base);

        let series = match kind {
            SeriesKind::Counter => Series::Counter(IntCounter::with_opts(
                Opts::new(base, help)
                    .namespace(self.namespace.as_str())
                    .subsystem(self.subsystem.as_str())
                    .const_labels(const_labels),
            )?),
            SeriesKind::Gauge => Series::Gauge(IntGauge::with_opts(
                Opts::new(base, help)
                    .namespace(self.namespace.as_str())
                    .subsystem(self.subsystem.as_str())
                    .const_labels(const_labels),
            )?),
            SeriesKind::Histogram => Series::Histogram(Histogram::with_opts(
                HistogramOpts::new(base, help)
                    .namespace(self.namespace.as_str())
                    .subsystem(self.subsystem.as_str())
                    .const_labels(const_labels),
            )?),
        };
        Ok(series)
    }

    /// Count one occurrence of `(base, values)`
    pub fn observe(&self, base: &str, values: &[&str]) -> Result<(), prometheus::Error> {
        match self.get_or_create(base, values, SeriesKind::Counter)? {
            Series::Counter(counter) => {
                counter.inc();
                Ok(())
            }
            other => Err(self.mismatch(base, other.kind(), SeriesKind::Counter)),
        }
    }

    /// Move a gauge up or down
    pub fn add_gauge(&self, base: &str, values: &[&str], delta: i64) -> Result<(), prometheus::Error> {
        match self.get_or_create(base, values, SeriesKind::Gauge)? {
            Series::Gauge(gauge) => {
                gauge.add(delta);
                Ok(())
            }
            other => Err(self.mismatch(base, other.kind(), SeriesKind::Gauge)),
        }
    }

    /// Record one histogram sample
    pub fn observe_value(
        &self,
        base: &str,
        values: &[&str],
        sample: f64,
    ) -> Result<(), prometheus::Error> {
        match self.get_or_create(base, values, SeriesKind::Histogram)? {
            Series::Histogram(histogram) => {
                histogram.observe(sample);
                Ok(())
            }
            other => Err(self.mismatch(base, other.kind(), SeriesKind::Histogram)),
        }
    }

    /// Current value of a counter series, if it exists
    pub fn counter_value(&self, base: &str, values: &[&str]) -> Option<u64> {
        match self.series.get(&self.series_name(base, values))?.value() {
            Series::Counter(counter) => Some(counter.get()),
            _ => None,
        }
    }

    /// Current value of a gauge series, if it exists
    pub fn gauge_value(&self, base: &str, values: &[&str]) -> Option<i64> {
        match self.series.get(&self.series_name(base, values))?.value() {
            Series::Gauge(gauge) => Some(gauge.get()),
            _ => None,
        }
    }

    /// Number of samples in a histogram series, if it exists
    pub fn histogram_count(&self, base: &str, values: &[&str]) -> Option<u64> {
        match self.series.get(&self.series_name(base, values))?.value() {
            Series::Histogram(histogram) => Some(histogram.get_sample_count()),
            _ => None,
        }
    }

    /// Number of distinct series created so far
    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Start tracking one request
    ///
    /// The in-flight gauge goes up now and comes down when the returned guard
    /// is finished or dropped.
    pub fn track(self: &Arc<Self>, method: &str, path: &str) -> InFlight {
        if let Err(e) = self.add_gauge(IN_FLIGHT, &[method, path], 1) {
            tracing::warn!(error = %e, "Failed to record in-flight request");
        }
        InFlight {
            registry: Arc::clone(self),
            method: method.to_string(),
            path: path.to_string(),
            started: Instant::now(),
            done: false,
        }
    }

    /// Record a completed request
    pub fn record_request(&self, status: u16, method: &str, path: &str, seconds: f64) {
        let status = status.to_string();
        let values = [status.as_str(), method, path];

        if let Err(e) = self.observe(REQUESTS_TOTAL, &values) {
            tracing::warn!(error = %e, metric = REQUESTS_TOTAL, "Failed to record metric");
        }
        if let Err(e) = self.observe_value(REQUEST_DURATION, &values, seconds) {
            tracing::warn!(error = %e, metric = REQUEST_DURATION, "Failed to record metric");
        }
    }

    /// Encode all series in Prometheus text format
    pub fn export_text(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();

        tracing::debug!(
            metric_family_count = metric_families.len(),
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| {
                tracing::error!(error = %e, "Prometheus text encoder failed");
                e
            })?;

        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!("Metrics output is not valid UTF-8: {}", e))
        })
    }
}

/// Guard for one in-flight request
///
/// Dropping the guard without [`InFlight::finish`] still decrements the gauge
/// and records the request: as 500 when unwinding from a panic, otherwise as
/// 499 (the client went away and the handler future was cancelled).
pub struct InFlight {
    registry: Arc<MetricsRegistry>,
    method: String,
    path: String,
    started: Instant,
    done: bool,
}

impl InFlight {
    pub fn finish(mut self, status: u16) {
        self.complete(status);
    }

    fn complete(&mut self, status: u16) {
        if self.done {
            return;
        }
        self.done = true;

        if let Err(e) = self
            .registry
            .add_gauge(IN_FLIGHT, &[&self.method, &self.path], -1)
        {
            tracing::warn!(error = %e, "Failed to record in-flight request");
        }
        self.registry.record_request(
            status,
            &self.method,
            &self.path,
            self.started.elapsed().as_secs_f64(),
        );
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let status = if std::thread::panicking() { 500 } else { 499 };
        self.complete(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<MetricsRegistry> {
        Arc::new(MetricsRegistry::new("http", "service"))
    }

    #[test]
    fn test_schema_lookup() {
        assert_eq!(label_names(IN_FLIGHT), &["method", "path"]);
        assert_eq!(label_names(REQUESTS_TOTAL), &["statusCode", "method", "path"]);
        assert!(label_names("unknown").is_empty());
    }

    #[test]
    fn test_series_name_format() {
        let registry = registry();
        assert_eq!(
            registry.series_name(REQUESTS_TOTAL, &["200", "GET", "/"]),
            "http_service_requests_total{statusCode=200,method=GET,path=/}"
        );
        assert_eq!(
            registry.series_name(IN_FLIGHT, &["GET", "/", "extra"]),
            "http_service_requests_in_progress_total{method=GET,path=/}"
        );
        assert_eq!(registry.series_name("uptime", &["x"]), "http_service_uptime");
    }

    #[test]
    fn test_missing_values_are_padded() {
        let labels = MetricsRegistry::labels(REQUESTS_TOTAL, &["200"]);
        assert_eq!(
            labels,
            vec![
                ("statusCode", "200".to_string()),
                ("method", String::new()),
                ("path", String::new()),
            ]
        );
    }

    #[test]
    fn test_observe_n_times_counts_n() {
        let registry = registry();
        for _ in 0..25 {
            registry.observe(REQUESTS_TOTAL, &["200", "GET", "/"]).unwrap();
        }
        assert_eq!(registry.counter_value(REQUESTS_TOTAL, &["200", "GET", "/"]), Some(25));
        assert_eq!(registry.series_count(), 1);
    }

    #[test]
    fn test_distinct_label_values_create_distinct_series() {
        let registry = registry();
        registry.observe(REQUESTS_TOTAL, &["200", "GET", "/"]).unwrap();
        registry.observe(REQUESTS_TOTAL, &["404", "GET", "/"]).unwrap();
        assert_eq!(registry.series_count(), 2);

        let text = registry.export_text().unwrap();
        assert!(text.contains("# TYPE http_service_requests_total counter"));
        assert!(text.contains(
            "http_service_requests_total{method=\"GET\",path=\"/\",statusCode=\"404\"} 1"
        ));
    }

    #[test]
    fn test_kind_mismatch_is_an_error() {
        let registry = registry();
        registry.observe("events", &[]).unwrap();
        assert!(registry.add_gauge("events", &[], 1).is_err());
    }

    #[test]
    fn test_guard_records_on_finish() {
        let registry = registry();
        let guard = registry.track("GET", "/version");
        assert_eq!(registry.gauge_value(IN_FLIGHT, &["GET", "/version"]), Some(1));

        guard.finish(200);
        assert_eq!(registry.gauge_value(IN_FLIGHT, &["GET", "/version"]), Some(0));
        assert_eq!(
            registry.counter_value(REQUESTS_TOTAL, &["200", "GET", "/version"]),
            Some(1)
        );
        assert_eq!(
            registry.histogram_count(REQUEST_DURATION, &["200", "GET", "/version"]),
            Some(1)
        );
    }

    #[test]
    fn test_guard_records_on_panic() {
        let registry = registry();
        let inner = Arc::clone(&registry);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = inner.track("GET", "/");
            panic!("handler blew up");
        }));
        assert!(result.is_err());

        assert_eq!(registry.gauge_value(IN_FLIGHT, &["GET", "/"]), Some(0));
        assert_eq!(registry.counter_value(REQUESTS_TOTAL, &["500", "GET", "/"]), Some(1));
    }

    #[test]
    fn test_concurrent_observations_are_not_lost() {
        let registry = registry();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        registry.observe(REQUESTS_TOTAL, &["200", "GET", "/"]).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(
            registry.counter_value(REQUESTS_TOTAL, &["200", "GET", "/"]),
            Some(4000)
        );
        assert_eq!(registry.series_count(), 1);
    }

    #[test]
    fn test_empty_registry_exports() {
        let registry = registry();
        assert_eq!(registry.export_text().unwrap(), "");
    }
}
