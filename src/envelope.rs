//! CloudWatch Logs subscription envelopes
//!
//! A subscription filter delivers `{"awslogs":{"data":"..."}}` where `data` is a
//! base64 encoded, gzip compressed JSON document listing the delivered log events.

use crate::errors::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::{info, warn};

/// Outer event as delivered by a subscription filter.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awslogs: Option<AwsLogs>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AwsLogs {
    #[serde(default)]
    pub data: String,
}

/// Decompressed body of an envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogsBatch {
    pub owner: String,
    pub log_group: String,
    pub log_stream: String,
    pub subscription_filters: Vec<String>,
    pub message_type: String,
    pub log_events: Vec<LogEvent>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogEvent {
    pub id: String,
    pub timestamp: i64,
    pub message: String,
}

impl SubscriptionEvent {
    /// Recognize an envelope. Returns `None` when the payload has no `awslogs` member.
    pub fn from_slice(payload: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<SubscriptionEvent>(payload) {
            Ok(event) if event.awslogs.is_some() => Some(event),
            _ => None,
        }
    }

    /// Inner log messages in delivery order. Any decoding failure yields an empty list.
    pub fn log_messages(&self) -> Vec<String> {
        let Some(awslogs) = &self.awslogs else {
            return Vec::new();
        };
        match decode_data(&awslogs.data) {
            Some(batch) => {
                info!(
                    owner = %batch.owner,
                    log_group = %batch.log_group,
                    log_stream = %batch.log_stream,
                    message_type = %batch.message_type,
                    subscription_filters = ?batch.subscription_filters,
                    log_events = batch.log_events.len(),
                    "parsed log events"
                );
                batch.log_events.into_iter().map(|event| event.message).collect()
            }
            None => Vec::new(),
        }
    }
}

fn decode_data(data: &str) -> Option<LogsBatch> {
    let compressed = match STANDARD.decode(data) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to decode base64");
            return None;
        }
    };
    match serde_json::from_reader(GzDecoder::new(compressed.as_slice())) {
        Ok(batch) => Some(batch),
        Err(e) => {
            // serde_json surfaces gzip stream errors as IO errors
            if e.is_io() {
                warn!(error = %e, "failed to decompress gzip data");
            } else {
                warn!(error = %e, "failed to decode json");
            }
            None
        }
    }
}

impl LogsBatch {
    /// Wrap messages the way a subscription filter delivers them.
    pub fn with_messages<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            message_type: "DATA_MESSAGE".to_string(),
            log_events: messages
                .into_iter()
                .enumerate()
                .map(|(i, message)| LogEvent {
                    id: format!("eventId-{i}"),
                    timestamp: 0,
                    message: message.into(),
                })
                .collect(),
            ..Default::default()
        }
    }

    /// Encode into a complete `{"awslogs":{"data":...}}` envelope.
    pub fn to_envelope(&self) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut encoder, self)?;
        encoder.flush()?;
        let compressed = encoder.finish()?;
        let event = SubscriptionEvent {
            awslogs: Some(AwsLogs {
                data: STANDARD.encode(compressed),
            }),
        };
        Ok(serde_json::to_vec(&event)?)
    }
}
