//! Initializes logging and optional OpenTelemetry trace export.
use std::env;

use opentelemetry::{trace::TracerProvider, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use serde::{Deserialize, Serialize};
use tracing::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer as _};

/// Environment variable overriding the OTLP collector endpoint.
pub const OTLP_URL_ENVVAR: &str = "FEDERATOR_OTLP_URL";

/// Environment variable with a service label appended to the whoami string.
pub const SVC_LABEL_ENVVAR: &str = "FEDERATOR_SVC_LABEL";

/// Filter used when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_FILTER: &str = "info";

/// Logging section of a federator's config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directive for [`EnvFilter`], e.g. `"info,federator_coordinator=debug"`.
    ///
    /// `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub filter: Option<String>,

    /// OTLP collector endpoint. Overridden by [`OTLP_URL_ENVVAR`].
    #[serde(default)]
    pub otlp_url: Option<String>,

    /// Include source file names in log lines.
    #[serde(default)]
    pub log_file: bool,

    /// Include line numbers in log lines.
    #[serde(default)]
    pub log_line_num: bool,
}

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// The filter directive did not parse.
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    /// The OTLP exporter could not be built.
    #[error("cannot build otlp exporter: {0}")]
    Exporter(String),

    /// A global subscriber is already installed.
    #[error("cannot install subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Resolved logger settings.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Identifies this process in logs and traces.
    whoami: String,

    otel_url: Option<String>,

    filter: Option<String>,

    with_file: bool,

    with_line_number: bool,
}

impl LoggerConfig {
    /// Creates a config with the whoami string derived from `base`.
    pub fn with_base_name(base: &str) -> Self {
        Self {
            whoami: get_whoami_string(base),
            otel_url: get_otlp_url_from_env(),
            filter: None,
            with_file: false,
            with_line_number: false,
        }
    }

    /// Applies the config file's logging section. Environment variables keep precedence.
    pub fn apply(mut self, config: &LoggingConfig) -> Self {
        self.otel_url = self.otel_url.or_else(|| config.otlp_url.clone());
        self.filter = config.filter.clone();
        self.with_file = config.log_file;
        self.with_line_number = config.log_line_num;
        self
    }

    /// The whoami string.
    pub fn whoami(&self) -> &str {
        &self.whoami
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        if env::var(EnvFilter::DEFAULT_ENV).is_ok() {
            return Ok(EnvFilter::from_default_env());
        }

        let directive = self.filter.as_deref().unwrap_or(DEFAULT_FILTER);
        Ok(EnvFilter::try_new(directive)?)
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::with_base_name("federator")
    }
}

/// Installs the global subscriber.
///
/// Logs go to stdout in compact form; spans are also exported over OTLP when an endpoint is set.
pub fn init(config: LoggerConfig) -> Result<(), LoggingError> {
    let stdout_sub = tracing_subscriber::fmt::layer()
        .compact()
        .event_format(
            tracing_subscriber::fmt::format()
                .with_file(config.with_file)
                .with_line_number(config.with_line_number),
        )
        .with_filter(config.env_filter()?);

    if let Some(otel_url) = &config.otel_url {
        let resource = Resource::builder()
            .with_attribute(KeyValue::new("service.name", config.whoami.clone()))
            .build();

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(otel_url)
            .build()
            .map_err(|e| LoggingError::Exporter(e.to_string()))?;

        let tp = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_resource(resource)
            .with_batch_exporter(exporter)
            .build();

        let otel_sub = tracing_opentelemetry::layer().with_tracer(tp.tracer("federator"));

        tracing_subscriber::registry()
            .with(stdout_sub)
            .with(otel_sub)
            .try_init()?;
    } else {
        tracing_subscriber::registry().with(stdout_sub).try_init()?;
    }

    info!(whoami = %config.whoami, otlp = config.otel_url.is_some(), "logging started");

    Ok(())
}

/// Gets the OTLP URL from [`OTLP_URL_ENVVAR`].
pub fn get_otlp_url_from_env() -> Option<String> {
    env::var(OTLP_URL_ENVVAR).ok()
}

/// Gets the service label from [`SVC_LABEL_ENVVAR`].
pub fn get_service_label_from_env() -> Option<String> {
    env::var(SVC_LABEL_ENVVAR).ok()
}

/// Computes a standard whoami string, `base` or `base%label`.
pub fn get_whoami_string(base: &str) -> String {
    match get_service_label_from_env() {
        Some(label) => format!("{base}%{label}"),
        None => base.to_owned(),
    }
}
