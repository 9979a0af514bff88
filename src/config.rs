//! Configuration management for the forwarder

use crate::errors::{ForwarderError, Result};
use crate::telemetry::SignalKind;
use clap::builder::{BoolishValueParser, TypedValueParser};
use clap::error::ErrorKind;
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use duration_string::DurationString;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::Duration;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};
use tonic::transport::Uri;
use tracing::{debug, warn};

pub const ENV_PREFIX: &str = "FORWARDER_";
pub const DEFAULT_ENDPOINT_URL: &str = "http://localhost:4317";
pub const DEFAULT_SIGNALS: &str = "traces,metrics,logs";
pub const DEFAULT_EXPORT_TIMEOUT: &str = "10s";

/// Argument ids and flag names that also read lower-case and unprefixed variables.
const ENV_ALIASED_ARGS: [(&str, &str); 7] = [
    ("endpoint_url", "export-endpoint-url"),
    ("headers", "header"),
    ("gzip", "gzip"),
    ("signals", "signals"),
    ("export_timeout", "export-timeout"),
    ("batch", "batch"),
    ("log_level", "log-level"),
];

#[derive(Debug, Clone, Parser)]
#[command(
    name = "jsonl-otel-forwarder",
    version,
    about = "Forward JSON Lines OTLP telemetry to an OpenTelemetry Collector"
)]
pub struct Config {
    /// OTLP gRPC endpoint URL, e.g. http://localhost:4317
    #[arg(
        long = "export-endpoint-url",
        env = "FORWARDER_EXPORT_ENDPOINT_URL",
        default_value = DEFAULT_ENDPOINT_URL
    )]
    pub endpoint_url: String,

    /// Metadata header sent with every export, e.g. 'api-key: secret'
    #[arg(long = "header", env = "FORWARDER_HEADER")]
    pub headers: Vec<String>,

    /// Enable gzip compression
    #[arg(long, env = "FORWARDER_GZIP")]
    pub gzip: bool,

    /// Comma separated list of signals to forward, e.g. traces,metrics,logs
    #[arg(long, env = "FORWARDER_SIGNALS", default_value = DEFAULT_SIGNALS)]
    pub signals: String,

    /// Timeout for each export request, e.g. 10s; 0 or a negative value disables it
    #[arg(
        long = "export-timeout",
        env = "FORWARDER_EXPORT_TIMEOUT",
        default_value = DEFAULT_EXPORT_TIMEOUT,
        value_parser = parse_duration,
        allow_hyphen_values = true
    )]
    pub export_timeout: Duration,

    /// Merge the fragments of one payload before exporting them
    #[arg(long, env = "FORWARDER_BATCH")]
    pub batch: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long = "log-level", env = "FORWARDER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            headers: Vec::new(),
            gzip: false,
            signals: DEFAULT_SIGNALS.to_string(),
            export_timeout: Duration::from_secs(10),
            batch: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from command line arguments and environment variables
    pub fn from_env() -> Self {
        let matches = Config::command().get_matches();
        let vars: HashMap<String, String> = std::env::vars().collect();
        Config::from_arg_matches(&matches)
            .unwrap_or_else(|e| e.exit())
            .with_env_aliases(&matches, &vars)
            .unwrap_or_else(|e| Config::command().error(ErrorKind::InvalidValue, e).exit())
            .with_env_headers(vars)
    }

    /// Fill arguments left at their default from `forwarder_*` or unprefixed
    /// variables, e.g. `forwarder_signals`, `SIGNALS` or `signals`.
    pub fn with_env_aliases(
        mut self,
        matches: &ArgMatches,
        vars: &HashMap<String, String>,
    ) -> Result<Self> {
        for (id, flag) in ENV_ALIASED_ARGS {
            if !matches!(matches.value_source(id), None | Some(ValueSource::DefaultValue)) {
                continue;
            }
            let name = flag.replace('-', "_");
            let candidates = [
                format!("{ENV_PREFIX}{name}").to_lowercase(),
                name.to_uppercase(),
                name.to_lowercase(),
            ];
            let Some((var, value)) = candidates
                .iter()
                .find_map(|var| vars.get(var).map(|value| (var, value)))
            else {
                continue;
            };
            debug!(var = %var, "configuration read from alias variable");
            self.set_arg(id, value)?;
        }
        Ok(self)
    }

    fn set_arg(&mut self, id: &str, value: &str) -> Result<()> {
        let invalid = |e: String| ForwarderError::Config(format!("invalid value for {id}: {e}"));
        match id {
            "endpoint_url" => self.endpoint_url = value.to_string(),
            "headers" => self.headers.push(value.to_string()),
            "signals" => self.signals = value.to_string(),
            "log_level" => self.log_level = value.to_string(),
            "export_timeout" => self.export_timeout = parse_duration(value).map_err(invalid)?,
            "gzip" => self.gzip = parse_bool(value).map_err(invalid)?,
            "batch" => self.batch = parse_bool(value).map_err(invalid)?,
            _ => {}
        }
        Ok(())
    }

    /// Append headers given as `FORWARDER_HEADER_*` or `HEADER_*` variables.
    pub fn with_env_headers<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let header_prefix = format!("{ENV_PREFIX}HEADER_");
        let mut extra: Vec<(String, String)> = vars
            .into_iter()
            .filter(|(key, _)| key.starts_with(&header_prefix) || key.starts_with("HEADER_"))
            .collect();
        extra.sort();
        self.headers.extend(extra.into_iter().map(|(_, value)| value));
        self
    }

    /// Export timeout, `None` when disabled.
    pub fn export_timeout(&self) -> Option<Duration> {
        Some(self.export_timeout).filter(|timeout| !timeout.is_zero())
    }

    pub fn enabled_signals(&self) -> Vec<SignalKind> {
        SignalKind::parse_list(&self.signals)
    }

    /// Build the outgoing metadata from `key: value` header strings.
    pub fn metadata(&self) -> Result<MetadataMap> {
        let mut metadata = MetadataMap::new();
        for header in &self.headers {
            let Some((key, value)) = header.split_once(':') else {
                warn!(
                    header = %header,
                    "invalid header format, must be key:value, skip this header"
                );
                continue;
            };
            let key = key.trim().to_lowercase();
            let name = AsciiMetadataKey::from_bytes(key.as_bytes()).map_err(|e| {
                ForwarderError::Config(format!("invalid header name {key:?}: {e}"))
            })?;
            let value = AsciiMetadataValue::try_from(value.trim()).map_err(|e| {
                ForwarderError::Config(format!("invalid value for header {key:?}: {e}"))
            })?;
            metadata.append(name, value);
        }
        debug!(headers = metadata.len(), "built headers");
        Ok(metadata)
    }

    /// Parsed endpoint URI; only http and https are accepted.
    pub fn endpoint_uri(&self) -> Result<Uri> {
        let uri: Uri = self.endpoint_url.parse().map_err(|e| {
            ForwarderError::Config(format!("invalid endpoint url {:?}: {e}", self.endpoint_url))
        })?;
        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            _ => {
                return Err(ForwarderError::Config(format!(
                    "endpoint url {:?} must use http or https",
                    self.endpoint_url
                )));
            }
        }
        if uri.host().is_none() {
            return Err(ForwarderError::Config(format!(
                "endpoint url {:?} has no host",
                self.endpoint_url
            )));
        }
        Ok(uri)
    }

    pub fn is_tls(&self) -> bool {
        self.endpoint_url.starts_with("https://")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.endpoint_uri()?;
        self.metadata()?;
        if self.enabled_signals().is_empty() {
            warn!(signals = %self.signals, "no known signal enabled, nothing will be forwarded");
        }
        Ok(())
    }
}

/// Parse an export timeout such as `500ms`, `10s` or `1m30s`.
///
/// `0` and negative durations disable the timeout.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let (negative, magnitude) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input.strip_prefix('+').unwrap_or(input)),
    };
    let duration: Duration = DurationString::try_from(magnitude.to_string())
        .map_err(|e| format!("invalid duration {input:?}: {e}"))?
        .into();

    if negative {
        return Ok(Duration::ZERO);
    }
    Ok(duration)
}

fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    BoolishValueParser::new()
        .parse_ref(&Config::command(), None, OsStr::new(value.trim()))
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_args(args: &[&str]) -> Config {
        let mut argv = vec!["jsonl-otel-forwarder"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.endpoint_url, "http://localhost:4317");
        assert_eq!(config.export_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.enabled_signals(), SignalKind::ALL.to_vec());
        assert!(!config.gzip);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_command_line_overrides() {
        let config = parse_args(&[
            "--export-endpoint-url",
            "https://otlp.example.com:4317",
            "--header",
            "Api-Key: dummy",
            "--header",
            "x-team:observability",
            "--gzip",
            "--signals",
            "Trace,logs",
            "--export-timeout",
            "1m30s",
        ]);
        assert!(config.is_tls());
        assert!(config.gzip);
        assert_eq!(
            config.enabled_signals(),
            vec![SignalKind::Traces, SignalKind::Logs]
        );
        assert_eq!(config.export_timeout(), Some(Duration::from_secs(90)));

        let metadata = config.metadata().unwrap();
        assert_eq!(metadata.get("api-key").unwrap(), "dummy");
        assert_eq!(metadata.get("x-team").unwrap(), "observability");
    }

    #[test]
    fn test_zero_timeout_disables_it() {
        let config = parse_args(&["--export-timeout", "0"]);
        assert_eq!(config.export_timeout(), None);
    }

    #[test]
    fn test_negative_timeout_disables_it() {
        let config = parse_args(&["--export-timeout=-1s"]);
        assert_eq!(config.export_timeout(), None);
        assert!(config.validate().is_ok());

        let config = parse_args(&["--export-timeout", "-250ms"]);
        assert_eq!(config.export_timeout(), None);
    }

    fn with_aliases(args: &[&str], vars: &[(&str, &str)]) -> Result<Config> {
        let mut argv = vec!["jsonl-otel-forwarder"];
        argv.extend_from_slice(args);
        let matches = Config::command().try_get_matches_from(argv).unwrap();
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_arg_matches(&matches)
            .unwrap()
            .with_env_aliases(&matches, &vars)
    }

    #[test]
    fn test_env_aliases_fill_defaults() {
        let config = with_aliases(
            &[],
            &[
                ("EXPORT_ENDPOINT_URL", "http://collector:4317"),
                ("forwarder_signals", "logs"),
                ("signals", "traces"),
                ("export_timeout", "3s"),
                ("GZIP", "true"),
                ("header", "api-key: dummy"),
            ],
        )
        .unwrap();

        assert_eq!(config.endpoint_url, "http://collector:4317");
        // the prefixed lower-case name is looked up first
        assert_eq!(config.enabled_signals(), vec![SignalKind::Logs]);
        assert_eq!(config.export_timeout(), Some(Duration::from_secs(3)));
        assert!(config.gzip);
        assert!(!config.batch);
        assert_eq!(config.headers, vec!["api-key: dummy".to_string()]);
    }

    #[test]
    fn test_command_line_wins_over_env_aliases() {
        let config = with_aliases(
            &["--signals", "metrics", "--batch"],
            &[("SIGNALS", "logs"), ("BATCH", "false")],
        )
        .unwrap();
        assert_eq!(config.enabled_signals(), vec![SignalKind::Metrics]);
        assert!(config.batch);
    }

    #[test]
    fn test_invalid_env_alias_is_rejected() {
        let result = with_aliases(&[], &[("EXPORT_TIMEOUT", "soon")]);
        assert!(matches!(result, Err(ForwarderError::Config(_))));

        let result = with_aliases(&[], &[("gzip", "maybe")]);
        assert!(matches!(result, Err(ForwarderError::Config(_))));
    }

    #[test]
    fn test_malformed_header_is_skipped() {
        let config = Config {
            headers: vec!["no-separator".to_string(), "Authorization: Bearer 123".to_string()],
            ..Config::default()
        };
        let metadata = config.metadata().unwrap();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata.get("authorization").unwrap(), "Bearer 123");
    }

    #[test]
    fn test_invalid_header_name_fails_validation() {
        let config = Config {
            headers: vec!["bad key: value".to_string()],
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ForwarderError::Config(_))));
    }

    #[test]
    fn test_env_headers() {
        let config = Config::default().with_env_headers(vec![
            ("HOME".to_string(), "/root".to_string()),
            ("HEADER_B".to_string(), "b: 2".to_string()),
            ("FORWARDER_HEADER_A".to_string(), "a: 1".to_string()),
        ]);
        assert_eq!(config.headers, vec!["a: 1".to_string(), "b: 2".to_string()]);
    }

    #[test]
    fn test_endpoint_validation() {
        let with_url = |url: &str| Config {
            endpoint_url: url.to_string(),
            ..Config::default()
        };
        assert!(with_url("http://collector:4317").validate().is_ok());
        assert!(with_url("ftp://collector:4317").validate().is_err());
        assert!(with_url("not a url").validate().is_err());
        assert!(with_url("/just/a/path").validate().is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("+2s"), Ok(Duration::from_secs(2)));
        assert_eq!(parse_duration("0"), Ok(Duration::ZERO));
        assert_eq!(parse_duration("-1s"), Ok(Duration::ZERO));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("ten seconds").is_err());
        assert!(parse_duration("-").is_err());
        assert!(parse_duration("").is_err());
    }
}
