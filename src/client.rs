//! OTLP/gRPC export client
//!
//! The client owns one channel to the collector. Uploads share a read lock and
//! run concurrently; `stop` takes the write lock so the channel is only closed
//! once every in-flight upload has finished or been cancelled.

use crate::config::Config;
use crate::errors::{ForwarderError, Result};
use crate::telemetry::SignalKind;
use opentelemetry_proto::tonic::collector::logs::v1::{
    ExportLogsServiceRequest, logs_service_client::LogsServiceClient,
};
use opentelemetry_proto::tonic::collector::metrics::v1::{
    ExportMetricsServiceRequest, metrics_service_client::MetricsServiceClient,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, trace_service_client::TraceServiceClient,
};
use opentelemetry_proto::tonic::logs::v1::ResourceLogs;
use opentelemetry_proto::tonic::metrics::v1::ResourceMetrics;
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tonic::codec::CompressionEncoding;
use tonic::metadata::MetadataMap;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

enum State {
    Unstarted,
    Started(Connection),
    Stopped,
}

struct Connection {
    channel: Channel,
    /// Cancelled together with the token passed to `start`.
    lifetime: CancellationToken,
}

/// Client for the three OTLP export services of one collector endpoint.
pub struct ExportClient {
    endpoint: Endpoint,
    metadata: MetadataMap,
    export_timeout: Option<Duration>,
    gzip: bool,
    state: RwLock<State>,
    stop_signal: CancellationToken,
}

impl ExportClient {
    /// Create an unstarted client. No connection is made until `start`.
    pub fn new(config: &Config) -> Result<Self> {
        let uri = config.endpoint_uri()?;
        let mut endpoint = Endpoint::from(uri)
            .user_agent(format!("jsonl-otel-forwarder/{}", env!("CARGO_PKG_VERSION")))?;
        if config.is_tls() {
            endpoint = endpoint.tls_config(ClientTlsConfig::new().with_native_roots())?;
        }
        if let Some(timeout) = config.export_timeout() {
            endpoint = endpoint.connect_timeout(timeout);
        }

        Ok(Self {
            endpoint,
            metadata: config.metadata()?,
            export_timeout: config.export_timeout(),
            gzip: config.gzip,
            state: RwLock::new(State::Unstarted),
            stop_signal: CancellationToken::new(),
        })
    }

    /// Connect to the collector. Cancelling `cancel` later aborts every upload.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let mut state = self.state.write().await;
        match *state {
            State::Unstarted => {}
            State::Started(_) => return Err(ForwarderError::AlreadyStarted),
            State::Stopped => return Err(ForwarderError::AlreadyClosed),
        }

        let channel = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ForwarderError::Cancelled),
            result = self.endpoint.connect() => result?,
        };
        info!(endpoint = %self.endpoint.uri(), gzip = self.gzip, "connected to collector");

        *state = State::Started(Connection {
            channel,
            lifetime: cancel.child_token(),
        });
        Ok(())
    }

    pub async fn upload_traces(
        &self,
        cancel: &CancellationToken,
        resource_spans: Vec<ResourceSpans>,
    ) -> Result<()> {
        let request = self.request(ExportTraceServiceRequest { resource_spans });
        let gzip = self.gzip;
        let response = self
            .call(cancel, |channel| async move {
                let mut client = TraceServiceClient::new(channel);
                if gzip {
                    client = client
                        .send_compressed(CompressionEncoding::Gzip)
                        .accept_compressed(CompressionEncoding::Gzip);
                }
                client.export(request).await
            })
            .await?;

        match response.partial_success {
            Some(partial) => check_partial_success(
                SignalKind::Traces,
                partial.rejected_spans,
                partial.error_message,
            ),
            None => Ok(()),
        }
    }

    pub async fn upload_metrics(
        &self,
        cancel: &CancellationToken,
        resource_metrics: Vec<ResourceMetrics>,
    ) -> Result<()> {
        let request = self.request(ExportMetricsServiceRequest { resource_metrics });
        let gzip = self.gzip;
        let response = self
            .call(cancel, |channel| async move {
                let mut client = MetricsServiceClient::new(channel);
                if gzip {
                    client = client
                        .send_compressed(CompressionEncoding::Gzip)
                        .accept_compressed(CompressionEncoding::Gzip);
                }
                client.export(request).await
            })
            .await?;

        match response.partial_success {
            Some(partial) => check_partial_success(
                SignalKind::Metrics,
                partial.rejected_data_points,
                partial.error_message,
            ),
            None => Ok(()),
        }
    }

    pub async fn upload_logs(
        &self,
        cancel: &CancellationToken,
        resource_logs: Vec<ResourceLogs>,
    ) -> Result<()> {
        let request = self.request(ExportLogsServiceRequest { resource_logs });
        let gzip = self.gzip;
        let response = self
            .call(cancel, |channel| async move {
                let mut client = LogsServiceClient::new(channel);
                if gzip {
                    client = client
                        .send_compressed(CompressionEncoding::Gzip)
                        .accept_compressed(CompressionEncoding::Gzip);
                }
                client.export(request).await
            })
            .await?;

        match response.partial_success {
            Some(partial) => check_partial_success(
                SignalKind::Logs,
                partial.rejected_log_records,
                partial.error_message,
            ),
            None => Ok(()),
        }
    }

    /// Close the channel once in-flight uploads are done.
    ///
    /// If `cancel` fires while waiting, in-flight uploads are aborted through
    /// the stop signal; the channel is still closed and `Cancelled` returned.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<()> {
        let mut pending = cancel.is_cancelled().then_some(ForwarderError::Cancelled);

        let mut state = tokio::select! {
            biased;
            guard = self.state.write() => guard,
            _ = cancel.cancelled() => {
                warn!("stop cancelled, aborting in-flight uploads");
                self.stop_signal.cancel();
                pending = Some(ForwarderError::Cancelled);
                self.state.write().await
            }
        };

        match std::mem::replace(&mut *state, State::Stopped) {
            State::Started(connection) => {
                connection.lifetime.cancel();
                drop(connection.channel);
                info!(endpoint = %self.endpoint.uri(), "closed connection to collector");
            }
            State::Unstarted => {
                *state = State::Unstarted;
                return Err(ForwarderError::NotStarted);
            }
            State::Stopped => return Err(ForwarderError::AlreadyClosed),
        }

        match pending {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        *request.metadata_mut() = self.metadata.clone();
        if let Some(timeout) = self.export_timeout {
            request.set_timeout(timeout);
        }
        request
    }

    /// Run one RPC under the read lock, bounded by the export timeout, the
    /// caller's token, the stop signal and the token given to `start`.
    async fn call<T, F, Fut>(&self, cancel: &CancellationToken, rpc: F) -> Result<T>
    where
        F: FnOnce(Channel) -> Fut,
        Fut: Future<Output = std::result::Result<Response<T>, Status>>,
    {
        let state = self.state.read().await;
        let connection = match &*state {
            State::Started(connection) => connection,
            State::Unstarted => return Err(ForwarderError::NotStarted),
            State::Stopped => return Err(ForwarderError::AlreadyClosed),
        };

        let timeout = self.export_timeout;
        let deadline = async move {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = rpc(connection.channel.clone()) => {
                let response = result?;
                debug!("export call completed");
                Ok(response.into_inner())
            }
            _ = deadline => Err(ForwarderError::DeadlineExceeded(timeout.unwrap_or_default())),
            _ = cancel.cancelled() => Err(ForwarderError::Cancelled),
            _ = self.stop_signal.cancelled() => Err(ForwarderError::Cancelled),
            _ = connection.lifetime.cancelled() => Err(ForwarderError::Cancelled),
        }
    }
}

/// A partial success with nothing rejected and no message is a full success.
fn check_partial_success(kind: SignalKind, rejected: i64, message: String) -> Result<()> {
    if rejected != 0 || !message.is_empty() {
        return Err(ForwarderError::PartialSuccess {
            kind,
            rejected,
            message,
        });
    }
    Ok(())
}
