//! JSON Lines OTLP Forwarder Library
//!
//! This library reads OTLP JSON documents, either as bare lines or wrapped in
//! log subscription envelopes, and exports them to an OpenTelemetry Collector
//! over gRPC.

pub mod batch;
pub mod client;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod forwarder;
pub mod parser;
pub mod telemetry;

pub use batch::{Batch, BatchStats};
pub use client::ExportClient;
pub use config::Config;
pub use errors::{ForwarderError, Result};
pub use forwarder::{Exporter, Forwarder, InvokeResult};
pub use parser::parse;
pub use telemetry::{Fragment, SignalKind};
