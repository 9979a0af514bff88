//! Telemetry fragments and the identity rules used to group them

use opentelemetry_proto::tonic::common::v1::{AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::logs::v1::LogsData;
use opentelemetry_proto::tonic::metrics::v1::{
    AggregationTemporality, Metric, MetricsData, metric::Data,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::TracesData;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The three OTLP signal kinds the forwarder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Traces,
    Metrics,
    Logs,
}

impl SignalKind {
    pub const ALL: [SignalKind; 3] = [SignalKind::Traces, SignalKind::Metrics, SignalKind::Logs];

    /// What a rejected-count in a partial success response counts.
    pub fn record_noun(&self) -> &'static str {
        match self {
            SignalKind::Traces => "spans",
            SignalKind::Metrics => "data points",
            SignalKind::Logs => "log records",
        }
    }

    /// Parse a comma separated signal list, ignoring entries that name no signal.
    pub fn parse_list(list: &str) -> Vec<SignalKind> {
        let mut kinds = Vec::new();
        for kind in list.split(',').filter_map(|s| s.parse::<SignalKind>().ok()) {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        kinds
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Traces => write!(f, "traces"),
            SignalKind::Metrics => write!(f, "metrics"),
            SignalKind::Logs => write!(f, "logs"),
        }
    }
}

impl FromStr for SignalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" | "traces" => Ok(SignalKind::Traces),
            "metric" | "metrics" => Ok(SignalKind::Metrics),
            "log" | "logs" => Ok(SignalKind::Logs),
            other => Err(format!("unknown signal: {other}")),
        }
    }
}

/// One decoded unit of telemetry of a single kind.
#[derive(Clone, Debug, PartialEq)]
pub enum Fragment {
    Traces(TracesData),
    Metrics(MetricsData),
    Logs(LogsData),
}

impl Fragment {
    pub fn kind(&self) -> SignalKind {
        match self {
            Fragment::Traces(_) => SignalKind::Traces,
            Fragment::Metrics(_) => SignalKind::Metrics,
            Fragment::Logs(_) => SignalKind::Logs,
        }
    }

    /// Number of resource groups carried by the fragment.
    pub fn resource_count(&self) -> usize {
        match self {
            Fragment::Traces(data) => data.resource_spans.len(),
            Fragment::Metrics(data) => data.resource_metrics.len(),
            Fragment::Logs(data) => data.resource_logs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.resource_count() == 0
    }
}

/// Resources are equal when dropped counts and attribute mappings match.
pub fn equal_resource(a: Option<&Resource>, b: Option<&Resource>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.dropped_attributes_count == b.dropped_attributes_count
                && equal_attributes(&a.attributes, &b.attributes)
        }
        _ => false,
    }
}

pub fn equal_scope(a: Option<&InstrumentationScope>, b: Option<&InstrumentationScope>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.dropped_attributes_count == b.dropped_attributes_count
                && a.name == b.name
                && a.version == b.version
                && equal_attributes(&a.attributes, &b.attributes)
        }
        _ => false,
    }
}

/// Order-insensitive comparison of two attribute lists.
///
/// Lists of different length never compare equal, so a duplicated key on one
/// side is enough to break equality.
pub fn equal_attributes(a: &[KeyValue], b: &[KeyValue]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    attributes_map(a) == attributes_map(b)
}

fn attributes_map(attrs: &[KeyValue]) -> HashMap<&str, Option<&AnyValue>> {
    attrs
        .iter()
        .map(|kv| (kv.key.as_str(), kv.value.as_ref()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Temporality {
    Unspecified,
    Delta,
    Cumulative,
}

impl From<i32> for Temporality {
    fn from(raw: i32) -> Self {
        match AggregationTemporality::try_from(raw) {
            Ok(AggregationTemporality::Delta) => Temporality::Delta,
            Ok(AggregationTemporality::Cumulative) => Temporality::Cumulative,
            _ => Temporality::Unspecified,
        }
    }
}

/// Data kind of a metric plus the flags that make its points incompatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricSignature {
    Gauge,
    Summary,
    Sum { monotonic: bool, temporality: Temporality },
    Histogram { temporality: Temporality },
    ExponentialHistogram { temporality: Temporality },
    Unknown,
}

impl MetricSignature {
    pub fn of(metric: &Metric) -> Self {
        match &metric.data {
            Some(Data::Gauge(_)) => MetricSignature::Gauge,
            Some(Data::Summary(_)) => MetricSignature::Summary,
            Some(Data::Sum(sum)) => MetricSignature::Sum {
                monotonic: sum.is_monotonic,
                temporality: sum.aggregation_temporality.into(),
            },
            Some(Data::Histogram(histogram)) => MetricSignature::Histogram {
                temporality: histogram.aggregation_temporality.into(),
            },
            Some(Data::ExponentialHistogram(histogram)) => MetricSignature::ExponentialHistogram {
                temporality: histogram.aggregation_temporality.into(),
            },
            None => MetricSignature::Unknown,
        }
    }
}

impl fmt::Display for MetricSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let temporality = |t: &Temporality| match t {
            Temporality::Unspecified => "",
            Temporality::Delta => "Delta",
            Temporality::Cumulative => "Cumulative",
        };
        match self {
            MetricSignature::Gauge => write!(f, "Gauge"),
            MetricSignature::Summary => write!(f, "Summary"),
            MetricSignature::Sum { monotonic, temporality: t } => {
                let prefix = if *monotonic { "Monotonic" } else { "" };
                write!(f, "{prefix}{}Sum", temporality(t))
            }
            MetricSignature::Histogram { temporality: t } => {
                write!(f, "{}Histogram", temporality(t))
            }
            MetricSignature::ExponentialHistogram { temporality: t } => {
                write!(f, "{}ExponentialHistogram", temporality(t))
            }
            MetricSignature::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Metrics are mergeable when name, description, unit and signature match.
pub fn equal_metric(a: &Metric, b: &Metric) -> bool {
    a.name == b.name
        && a.description == b.description
        && a.unit == b.unit
        && MetricSignature::of(a) == MetricSignature::of(b)
}
