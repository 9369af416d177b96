use std::env;

use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use tracing::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const OTLP_URL_ENVVAR: &str = "BTCOBS_OTLP_URL";
pub const SVC_LABEL_ENVVAR: &str = "BTCOBS_SVC_LABEL";

/// Tracing target that compliance violations are logged under, so they can be
/// routed to a separate sink with a filter like `compliance=warn`.
pub const COMPLIANCE_LOG_TARGET: &str = "compliance";

/// Directive used when `RUST_LOG` is not set.
const DEFAULT_DIRECTIVE: &str = "info";

pub struct LoggerConfig {
    whoami: String,
    otel_url: Option<String>,
}

impl LoggerConfig {
    /// Creates a new empty instance with whoami set.
    pub fn new(whoami: String) -> Self {
        Self {
            whoami,
            otel_url: None,
        }
    }

    pub fn with_base_name(s: &str) -> Self {
        Self::new(get_whoami_string(s))
    }

    pub fn set_otlp_url(&mut self, url: String) {
        self.otel_url = Some(url);
    }

    pub fn whoami(&self) -> &str {
        &self.whoami
    }

    pub fn otel_url(&self) -> Option<&str> {
        self.otel_url.as_deref()
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::with_base_name("(btcobs-service)")
    }
}

fn make_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Initializes the logging subsystem with the provided config.
///
/// If the OTLP exporter can't be set up we still install the stdout layer and
/// report the exporter failure through it.
pub fn init(config: LoggerConfig) {
    // Stdout logging.
    let stdout_sub = tracing_subscriber::fmt::layer()
        .compact()
        .with_filter(make_filter());

    let mut otel_err = None;

    // OpenTelemetry output.
    if let Some(otel_url) = &config.otel_url {
        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(otel_url);

        match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .install_batch(opentelemetry_sdk::runtime::Tokio)
        {
            Ok(tp) => {
                let tt = tp.tracer("btcobs-log");
                let otel_sub = tracing_opentelemetry::layer()
                    .with_tracer(tt)
                    .with_filter(make_filter());

                tracing_subscriber::registry()
                    .with(stdout_sub)
                    .with(otel_sub)
                    .init();

                info!(whoami = %config.whoami, %otel_url, "logging started");
                return;
            }
            Err(e) => otel_err = Some(e),
        }
    }

    tracing_subscriber::registry().with(stdout_sub).init();

    if let Some(e) = otel_err {
        warn!(err = %e, "failed to init opentelemetry exporter, continuing with stdout only");
    }

    info!(whoami = %config.whoami, "logging started");
}

/// Shuts down the logging subsystem, flushing the OTLP batch exporter if one
/// was installed.
pub fn finalize() {
    info!("shutting down logging");
    opentelemetry::global::shutdown_tracer_provider();
}

/// Gets the OTLP URL from the standard envvar.
pub fn get_otlp_url_from_env() -> Option<String> {
    env::var(OTLP_URL_ENVVAR).ok()
}

/// Gets the service label from the standard envvar, which should be included
/// in the whoami string.
pub fn get_service_label_from_env() -> Option<String> {
    env::var(SVC_LABEL_ENVVAR).ok()
}

/// Computes a standard whoami string.
pub fn get_whoami_string(base: &str) -> String {
    match get_service_label_from_env() {
        Some(label) => format!("{base}%{label}"),
        None => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_config_otlp_url() {
        let mut config = LoggerConfig::new("observer".to_string());
        assert_eq!(config.whoami(), "observer");
        assert!(config.otel_url().is_none());

        config.set_otlp_url("http://localhost:4317".to_string());
        assert_eq!(config.otel_url(), Some("http://localhost:4317"));
    }

    #[test]
    fn test_whoami_without_label() {
        if get_service_label_from_env().is_none() {
            assert_eq!(get_whoami_string("btcobs"), "btcobs");
        }
    }
}
