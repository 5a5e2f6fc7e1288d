//! # Logging
//!
//! Logs are written to stdout through `tracing_subscriber::fmt`, either
//! human-readable (`pretty`) or one JSON object per line (`json`). The level
//! filter comes from `RUST_LOG` and defaults to `info`.
//!
//! ## Service metadata
//!
//! The service name and version are not stored in any global. The caller
//! builds a [`Metadata`] value and enters [`Metadata::span`] around the work
//! it runs, so every event emitted inside carries both fields.
//!
//! ## Request spans
//!
//! Each connection gets a `connection` span with the peer address and each
//! request a span from `tower-http`'s trace layer (at `DEBUG`), e.g.:
//!
//! ```bash
//! RUST_LOG=info,tower_http=debug tasker-server
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Identity of the running service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub service: String,
    pub version: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            service: env!("CARGO_PKG_NAME").to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

impl Metadata {
    /// Root span carrying the service identity.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("service", service = %self.service, version = %self.version)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub format: LogFormat,
    pub metadata: Metadata,
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                    .with_file(true)
                    .pretty(),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                    .with_file(true)
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()?,
    }

    Ok(())
}
