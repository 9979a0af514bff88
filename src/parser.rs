//! Format sniffing for JSON Lines payloads
//!
//! A payload is either a subscription envelope wrapping more lines, or an OTLP
//! JSON document of one signal kind. Anything else is reported as no match so
//! callers can skip ordinary application log lines.

use crate::envelope::SubscriptionEvent;
use crate::telemetry::{Fragment, SignalKind};
use opentelemetry_proto::tonic::logs::v1::LogsData;
use opentelemetry_proto::tonic::metrics::v1::MetricsData;
use opentelemetry_proto::tonic::trace::v1::TracesData;
use serde::de::IgnoredAny;
use tracing::debug;

/// Envelopes nested deeper than this are not unwrapped.
pub const MAX_ENVELOPE_DEPTH: usize = 8;

type Decoder = fn(&[u8]) -> Option<Fragment>;

/// Decoders in priority order; the first one producing a fragment wins.
const DECODERS: [(SignalKind, Decoder); 3] = [
    (SignalKind::Traces, decode_traces),
    (SignalKind::Metrics, decode_metrics),
    (SignalKind::Logs, decode_logs),
];

// Unknown fields are ignored while decoding, so an unrelated object decodes as
// an empty batch of every kind. Only batches with resource groups count.
fn decode_traces(payload: &[u8]) -> Option<Fragment> {
    serde_json::from_slice::<TracesData>(payload)
        .ok()
        .map(Fragment::Traces)
        .filter(|fragment| !fragment.is_empty())
}

fn decode_metrics(payload: &[u8]) -> Option<Fragment> {
    serde_json::from_slice::<MetricsData>(payload)
        .ok()
        .map(Fragment::Metrics)
        .filter(|fragment| !fragment.is_empty())
}

fn decode_logs(payload: &[u8]) -> Option<Fragment> {
    serde_json::from_slice::<LogsData>(payload)
        .ok()
        .map(Fragment::Logs)
        .filter(|fragment| !fragment.is_empty())
}

/// Classify one payload. `None` means the payload holds no telemetry.
pub fn parse(payload: &[u8]) -> Option<Vec<Fragment>> {
    parse_at_depth(payload, 0)
}

fn parse_at_depth(payload: &[u8], depth: usize) -> Option<Vec<Fragment>> {
    if serde_json::from_slice::<IgnoredAny>(payload).is_err() {
        return None;
    }

    if let Some(event) = SubscriptionEvent::from_slice(payload) {
        if depth >= MAX_ENVELOPE_DEPTH {
            debug!(depth, "envelope nesting too deep, skipping");
            return None;
        }
        return parse_envelope(&event, depth);
    }

    DECODERS.iter().find_map(|(kind, decode)| {
        decode(payload).map(|fragment| {
            debug!(%kind, resources = fragment.resource_count(), "decoded payload");
            vec![fragment]
        })
    })
}

fn parse_envelope(event: &SubscriptionEvent, depth: usize) -> Option<Vec<Fragment>> {
    let messages = event.log_messages();
    if messages.is_empty() {
        return None;
    }

    let total = messages.len();
    let fragments: Vec<Fragment> = messages
        .iter()
        .filter_map(|message| parse_at_depth(message.as_bytes(), depth + 1))
        .flatten()
        .collect();

    debug!(
        messages = total,
        fragments = fragments.len(),
        "unwrapped envelope"
    );

    if fragments.is_empty() {
        None
    } else {
        Some(fragments)
    }
}
