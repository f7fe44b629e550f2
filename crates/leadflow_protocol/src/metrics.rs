//! Labeled pipeline metrics with Prometheus exposition.
//!
//! The registry is an explicit handle (`Arc<PipelineMetrics>`) passed through
//! the worker and orchestrator; unit tests construct their own inert
//! instance. Metric names below are normative.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;

// Counters
pub const LEADS_PROCESSED_TOTAL: &str = "leads_processed_total";
pub const MCP_ACTIONS_TOTAL: &str = "mcp_actions_total";
pub const MCP_GROUNDING_DECISIONS_TOTAL: &str = "mcp_grounding_decisions_total";
pub const MCP_RATE_LIMIT_VIOLATIONS_TOTAL: &str = "mcp_rate_limit_violations_total";
pub const MCP_SAFETY_BLOCKS_TOTAL: &str = "mcp_safety_blocks_total";

// Gauges
pub const MCP_CIRCUIT_BREAKER_STATE: &str = "mcp_circuit_breaker_state";

// Histograms
pub const AI_ANALYSIS_DURATION_SECONDS: &str = "ai_analysis_duration_seconds";
pub const MCP_ACTION_DURATION_SECONDS: &str = "mcp_action_duration_seconds";
pub const MCP_CRM_API_DURATION_SECONDS: &str = "mcp_crm_api_duration_seconds";

const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// (metric name, sorted label pairs) - one time series.
type SeriesKey = (String, BTreeMap<String, String>);

#[derive(Debug, Default, Clone)]
struct HistogramSeries {
    bucket_counts: Vec<u64>,
    sum: f64,
    count: u64,
}

#[derive(Debug, Default)]
struct Inner {
    counters: HashMap<SeriesKey, u64>,
    gauges: HashMap<SeriesKey, i64>,
    histograms: HashMap<SeriesKey, HistogramSeries>,
}

/// In-process metrics registry.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    inner: Mutex<Inner>,
}

fn series_key(name: &str, labels: &[(&str, &str)]) -> SeriesKey {
    let labels = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    (name.to_string(), labels)
}

fn render_labels(labels: &BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let body = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{}}}", body)
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_counter(&self, name: &str, labels: &[(&str, &str)]) {
        self.add_counter(name, labels, 1);
    }

    pub fn add_counter(&self, name: &str, labels: &[(&str, &str)], delta: u64) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        *inner.counters.entry(series_key(name, labels)).or_default() += delta;
    }

    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: i64) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.gauges.insert(series_key(name, labels), value);
    }

    pub fn observe_seconds(&self, name: &str, labels: &[(&str, &str)], seconds: f64) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        let series = inner
            .histograms
            .entry(series_key(name, labels))
            .or_insert_with(|| HistogramSeries {
                bucket_counts: vec![0; LATENCY_BUCKETS.len()],
                sum: 0.0,
                count: 0,
            });
        for (i, bound) in LATENCY_BUCKETS.iter().enumerate() {
            if seconds <= *bound {
                series.bucket_counts[i] += 1;
            }
        }
        series.sum += seconds;
        series.count += 1;
    }

    /// Read back one counter series. Intended for tests and diagnostics.
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        inner
            .counters
            .get(&series_key(name, labels))
            .copied()
            .unwrap_or(0)
    }

    pub fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<i64> {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        inner.gauges.get(&series_key(name, labels)).copied()
    }

    pub fn histogram_count(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        inner
            .histograms
            .get(&series_key(name, labels))
            .map(|s| s.count)
            .unwrap_or(0)
    }

    /// Render every series in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        let mut out = String::new();

        let mut counters: Vec<_> = inner.counters.iter().collect();
        counters.sort_by(|a, b| a.0.cmp(b.0));
        for ((name, labels), value) in counters {
            let _ = writeln!(out, "{}{} {}", name, render_labels(labels), value);
        }

        let mut gauges: Vec<_> = inner.gauges.iter().collect();
        gauges.sort_by(|a, b| a.0.cmp(b.0));
        for ((name, labels), value) in gauges {
            let _ = writeln!(out, "{}{} {}", name, render_labels(labels), value);
        }

        let mut histograms: Vec<_> = inner.histograms.iter().collect();
        histograms.sort_by(|a, b| a.0.cmp(b.0));
        for ((name, labels), series) in histograms {
            for (i, bound) in LATENCY_BUCKETS.iter().enumerate() {
                let mut with_le = labels.clone();
                with_le.insert("le".to_string(), bound.to_string());
                let _ = writeln!(
                    out,
                    "{}_bucket{} {}",
                    name,
                    render_labels(&with_le),
                    series.bucket_counts[i]
                );
            }
            let mut with_inf = labels.clone();
            with_inf.insert("le".to_string(), "+Inf".to_string());
            let _ = writeln!(
                out,
                "{}_bucket{} {}",
                name,
                render_labels(&with_inf),
                series.count
            );
            let _ = writeln!(out, "{}_sum{} {}", name, render_labels(labels), series.sum);
            let _ = writeln!(out, "{}_count{} {}", name, render_labels(labels), series.count);
        }

        out
    }
}
