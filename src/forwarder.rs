//! Forwarder orchestrating parsing, optional merging and export

use crate::batch::Batch;
use crate::client::ExportClient;
use crate::config::Config;
use crate::errors::Result;
use crate::parser::parse;
use crate::telemetry::{Fragment, SignalKind};
use async_trait::async_trait;
use opentelemetry_proto::tonic::logs::v1::ResourceLogs;
use opentelemetry_proto::tonic::metrics::v1::ResourceMetrics;
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Destination of decoded telemetry.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn start(&self, cancel: &CancellationToken) -> Result<()>;
    async fn upload_traces(
        &self,
        cancel: &CancellationToken,
        resource_spans: Vec<ResourceSpans>,
    ) -> Result<()>;
    async fn upload_metrics(
        &self,
        cancel: &CancellationToken,
        resource_metrics: Vec<ResourceMetrics>,
    ) -> Result<()>;
    async fn upload_logs(
        &self,
        cancel: &CancellationToken,
        resource_logs: Vec<ResourceLogs>,
    ) -> Result<()>;
    async fn stop(&self, cancel: &CancellationToken) -> Result<()>;
}

#[async_trait]
impl Exporter for ExportClient {
    async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        ExportClient::start(self, cancel).await
    }

    async fn upload_traces(
        &self,
        cancel: &CancellationToken,
        resource_spans: Vec<ResourceSpans>,
    ) -> Result<()> {
        ExportClient::upload_traces(self, cancel, resource_spans).await
    }

    async fn upload_metrics(
        &self,
        cancel: &CancellationToken,
        resource_metrics: Vec<ResourceMetrics>,
    ) -> Result<()> {
        ExportClient::upload_metrics(self, cancel, resource_metrics).await
    }

    async fn upload_logs(
        &self,
        cancel: &CancellationToken,
        resource_logs: Vec<ResourceLogs>,
    ) -> Result<()> {
        ExportClient::upload_logs(self, cancel, resource_logs).await
    }

    async fn stop(&self, cancel: &CancellationToken) -> Result<()> {
        ExportClient::stop(self, cancel).await
    }
}

/// Outcome of one successful invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeResult {
    /// The payload held no telemetry
    Skip,
    /// The client started and stopped cleanly
    Success,
}

impl InvokeResult {
    pub fn to_json(&self) -> Value {
        match self {
            InvokeResult::Skip => json!({ "skip": true }),
            InvokeResult::Success => json!({ "success": true }),
        }
    }
}

pub struct Forwarder {
    config: Config,
    enabled: Vec<SignalKind>,
}

impl Forwarder {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let enabled = config.enabled_signals();
        Ok(Self { config, enabled })
    }

    /// Forward one payload through a fresh client connection.
    #[instrument(skip_all, fields(invocation_id = %Uuid::new_v4(), payload_len = payload.len()))]
    pub async fn invoke(&self, payload: &[u8], cancel: &CancellationToken) -> Result<InvokeResult> {
        let Some(fragments) = parse(payload) else {
            debug!("payload holds no telemetry, skipping");
            return Ok(InvokeResult::Skip);
        };
        let client = ExportClient::new(&self.config)?;
        self.export(&client, fragments, cancel).await
    }

    /// Start the exporter, upload every enabled fragment and stop it again.
    ///
    /// A failed upload is logged and does not fail the invocation.
    pub async fn export(
        &self,
        exporter: &dyn Exporter,
        fragments: Vec<Fragment>,
        cancel: &CancellationToken,
    ) -> Result<InvokeResult> {
        info!(endpoint = %self.config.endpoint_url, "start otlp client");
        exporter.start(cancel).await?;

        let fragments = if self.config.batch {
            let batch = Batch::merge(fragments);
            debug!(stats = ?batch.stats(), "merged fragments");
            batch.into_fragments()
        } else {
            fragments
        };

        for fragment in fragments {
            if let Err(e) = self.export_fragment(exporter, fragment, cancel).await {
                error!(error = %e, "failed to export telemetry");
            }
        }

        info!("stop otlp client");
        exporter.stop(cancel).await?;
        Ok(InvokeResult::Success)
    }

    #[instrument(skip_all, fields(kind = %fragment.kind()))]
    async fn export_fragment(
        &self,
        exporter: &dyn Exporter,
        fragment: Fragment,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !self.enabled.contains(&fragment.kind()) {
            debug!("signal disabled, dropping fragment");
            return Ok(());
        }

        match fragment {
            Fragment::Traces(data) => {
                let resource_spans = data.resource_spans;
                info!(
                    resource_spans = resource_spans.len(),
                    trace_ids = ?distinct_trace_ids(&resource_spans),
                    "upload traces"
                );
                let count = resource_spans.len();
                exporter.upload_traces(cancel, resource_spans).await?;
                debug!(resource_spans = count, "uploaded traces");
            }
            Fragment::Metrics(data) => {
                let resource_metrics = data.resource_metrics;
                let count = resource_metrics.len();
                info!(resource_metrics = count, "upload metrics");
                exporter.upload_metrics(cancel, resource_metrics).await?;
                debug!(resource_metrics = count, "uploaded metrics");
            }
            Fragment::Logs(data) => {
                let resource_logs = data.resource_logs;
                let count = resource_logs.len();
                info!(resource_logs = count, "upload logs");
                exporter.upload_logs(cancel, resource_logs).await?;
                debug!(resource_logs = count, "uploaded logs");
            }
        }
        Ok(())
    }

    /// Invoke once per JSON line read from `reader` until EOF or cancellation.
    pub async fn run<R>(&self, reader: R, cancel: &CancellationToken) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = cancel.cancelled() => {
                    info!("input cancelled, stopping");
                    return Ok(());
                }
            };
            let Some(line) = line else {
                debug!("end of input");
                return Ok(());
            };
            if line.trim().is_empty() {
                continue;
            }
            let result = self.invoke(line.as_bytes(), cancel).await?;
            debug!(result = %result.to_json(), "invocation finished");
        }
    }
}

/// Hex trace ids found in the batch, sorted.
fn distinct_trace_ids(resource_spans: &[ResourceSpans]) -> Vec<String> {
    let mut trace_ids = BTreeSet::new();
    for span in resource_spans
        .iter()
        .flat_map(|rs| &rs.scope_spans)
        .flat_map(|ss| &ss.spans)
    {
        let trace_id = hex::encode(&span.trace_id);
        if span.trace_id.len() != 16 {
            warn!(trace_id = %trace_id, length = span.trace_id.len(), "invalid trace id length");
        }
        trace_ids.insert(trace_id);
    }
    trace_ids.into_iter().collect()
}
