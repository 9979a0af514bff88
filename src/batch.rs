//! Folding of telemetry fragments into canonical batches
//!
//! Resource groups are matched by resource identity and scope groups by scope
//! identity; records are concatenated, never deduplicated. Lookups are linear
//! scans over the accumulator, which stays small in practice.

use crate::telemetry::{Fragment, equal_metric, equal_resource, equal_scope};
use opentelemetry_proto::tonic::common::v1::InstrumentationScope;
use opentelemetry_proto::tonic::logs::v1::{LogsData, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::metrics::v1::{
    Metric, MetricsData, ResourceMetrics, ScopeMetrics, metric::Data,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, TracesData};

/// A resource plus the scope groups recorded under it.
pub trait ResourceGroup {
    type Scope: ScopeGroup;

    fn resource(&self) -> Option<&Resource>;
    fn scopes_mut(&mut self) -> &mut Vec<Self::Scope>;
    fn into_scopes(self) -> Vec<Self::Scope>;
}

/// An instrumentation scope plus its records.
pub trait ScopeGroup {
    fn scope(&self) -> Option<&InstrumentationScope>;

    /// Append the records of `other`, which has an equal scope.
    fn absorb(&mut self, other: Self);
}

impl ResourceGroup for ResourceSpans {
    type Scope = ScopeSpans;

    fn resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    fn scopes_mut(&mut self) -> &mut Vec<ScopeSpans> {
        &mut self.scope_spans
    }

    fn into_scopes(self) -> Vec<ScopeSpans> {
        self.scope_spans
    }
}

impl ScopeGroup for ScopeSpans {
    fn scope(&self) -> Option<&InstrumentationScope> {
        self.scope.as_ref()
    }

    fn absorb(&mut self, other: Self) {
        self.spans.extend(other.spans);
    }
}

impl ResourceGroup for ResourceMetrics {
    type Scope = ScopeMetrics;

    fn resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    fn scopes_mut(&mut self) -> &mut Vec<ScopeMetrics> {
        &mut self.scope_metrics
    }

    fn into_scopes(self) -> Vec<ScopeMetrics> {
        self.scope_metrics
    }
}

impl ScopeGroup for ScopeMetrics {
    fn scope(&self) -> Option<&InstrumentationScope> {
        self.scope.as_ref()
    }

    fn absorb(&mut self, other: Self) {
        merge_metrics(&mut self.metrics, other.metrics);
    }
}

impl ResourceGroup for ResourceLogs {
    type Scope = ScopeLogs;

    fn resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    fn scopes_mut(&mut self) -> &mut Vec<ScopeLogs> {
        &mut self.scope_logs
    }

    fn into_scopes(self) -> Vec<ScopeLogs> {
        self.scope_logs
    }
}

impl ScopeGroup for ScopeLogs {
    fn scope(&self) -> Option<&InstrumentationScope> {
        self.scope.as_ref()
    }

    fn absorb(&mut self, other: Self) {
        self.log_records.extend(other.log_records);
    }
}

/// Fold `incoming` resource groups into `dst`, keeping first-seen positions.
pub fn merge_resource_groups<R, I>(dst: &mut Vec<R>, incoming: I)
where
    R: ResourceGroup,
    I: IntoIterator<Item = R>,
{
    for group in incoming {
        let target = dst
            .iter()
            .position(|existing| equal_resource(existing.resource(), group.resource()));
        match target {
            Some(index) => merge_scope_groups(dst[index].scopes_mut(), group.into_scopes()),
            None => dst.push(group),
        }
    }
}

pub fn merge_scope_groups<S, I>(dst: &mut Vec<S>, incoming: I)
where
    S: ScopeGroup,
    I: IntoIterator<Item = S>,
{
    for group in incoming {
        let target = dst
            .iter()
            .position(|existing| equal_scope(existing.scope(), group.scope()));
        match target {
            Some(index) => dst[index].absorb(group),
            None => dst.push(group),
        }
    }
}

/// Merge metrics by name, description, unit and type signature.
pub fn merge_metrics<I>(dst: &mut Vec<Metric>, incoming: I)
where
    I: IntoIterator<Item = Metric>,
{
    for metric in incoming {
        match dst.iter_mut().find(|existing| equal_metric(existing, &metric)) {
            Some(existing) => append_data_points(existing, metric),
            None => dst.push(metric),
        }
    }
}

fn append_data_points(dst: &mut Metric, src: Metric) {
    match (&mut dst.data, src.data) {
        (Some(Data::Gauge(d)), Some(Data::Gauge(s))) => d.data_points.extend(s.data_points),
        (Some(Data::Sum(d)), Some(Data::Sum(s))) => d.data_points.extend(s.data_points),
        (Some(Data::Summary(d)), Some(Data::Summary(s))) => d.data_points.extend(s.data_points),
        (Some(Data::Histogram(d)), Some(Data::Histogram(s))) => d.data_points.extend(s.data_points),
        (Some(Data::ExponentialHistogram(d)), Some(Data::ExponentialHistogram(s))) => {
            d.data_points.extend(s.data_points)
        }
        // equal signatures imply equal data kinds; metrics without data carry nothing
        _ => {}
    }
}

/// Per-kind batches; a kind is present only when some fragment carried it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    pub traces: Option<TracesData>,
    pub metrics: Option<MetricsData>,
    pub logs: Option<LogsData>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge fragments in encounter order.
    pub fn merge<I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = Fragment>,
    {
        let mut batch = Self::new();
        for fragment in fragments {
            batch.add(fragment);
        }
        batch
    }

    /// Fold one fragment into the batch.
    pub fn add(&mut self, fragment: Fragment) {
        match fragment {
            Fragment::Traces(data) => {
                let traces = self.traces.get_or_insert_with(TracesData::default);
                merge_resource_groups(&mut traces.resource_spans, data.resource_spans);
            }
            Fragment::Metrics(data) => {
                let metrics = self.metrics.get_or_insert_with(MetricsData::default);
                merge_resource_groups(&mut metrics.resource_metrics, data.resource_metrics);
            }
            Fragment::Logs(data) => {
                let logs = self.logs.get_or_insert_with(LogsData::default);
                merge_resource_groups(&mut logs.resource_logs, data.resource_logs);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_none() && self.metrics.is_none() && self.logs.is_none()
    }

    /// Split back into at most one fragment per kind: traces, metrics, logs.
    pub fn into_fragments(self) -> Vec<Fragment> {
        let mut fragments = Vec::with_capacity(3);
        if let Some(traces) = self.traces {
            fragments.push(Fragment::Traces(traces));
        }
        if let Some(metrics) = self.metrics {
            fragments.push(Fragment::Metrics(metrics));
        }
        if let Some(logs) = self.logs {
            fragments.push(Fragment::Logs(logs));
        }
        fragments
    }

    pub fn stats(&self) -> BatchStats {
        let mut stats = BatchStats::default();
        if let Some(traces) = &self.traces {
            stats.resource_groups += traces.resource_spans.len();
            stats.spans = traces
                .resource_spans
                .iter()
                .flat_map(|rs| &rs.scope_spans)
                .map(|ss| ss.spans.len())
                .sum();
        }
        if let Some(metrics) = &self.metrics {
            stats.resource_groups += metrics.resource_metrics.len();
            stats.data_points = metrics
                .resource_metrics
                .iter()
                .flat_map(|rm| &rm.scope_metrics)
                .flat_map(|sm| &sm.metrics)
                .map(data_point_count)
                .sum();
        }
        if let Some(logs) = &self.logs {
            stats.resource_groups += logs.resource_logs.len();
            stats.log_records = logs
                .resource_logs
                .iter()
                .flat_map(|rl| &rl.scope_logs)
                .map(|sl| sl.log_records.len())
                .sum();
        }
        stats
    }
}

fn data_point_count(metric: &Metric) -> usize {
    match &metric.data {
        Some(Data::Gauge(g)) => g.data_points.len(),
        Some(Data::Sum(s)) => s.data_points.len(),
        Some(Data::Summary(s)) => s.data_points.len(),
        Some(Data::Histogram(h)) => h.data_points.len(),
        Some(Data::ExponentialHistogram(h)) => h.data_points.len(),
        None => 0,
    }
}

/// Record counts of a batch, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub resource_groups: usize,
    pub spans: usize,
    pub data_points: usize,
    pub log_records: usize,
}
