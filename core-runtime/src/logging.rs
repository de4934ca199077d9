//! # Logging & Tracing Infrastructure
//!
//! Structured logging on top of `tracing`:
//! - JSON, pretty and compact output
//! - Per-crate filtering through `EnvFilter`
//! - Redaction helpers for tokens and paths
//! - Mirroring into a host logger via `LoggerSink`
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_traits::time::LogLevel;
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//!
//! let config = LoggingConfig::default()
//!     .with_format(LogFormat::Pretty)
//!     .with_level(LogLevel::Debug);
//! init_logging(config)?;
//!
//! tracing::info!(target: "core_playback", "Player ready");
//! ```
//!
//! ## LoggerSink integration
//!
//! When a sink is configured, every event that survives filtering is also
//! handed to the host as a [`LogEntry`](bridge_traits::time::LogEntry) with
//! the message and recorded fields. Inside a runtime the sink is called from
//! a spawned task; outside one it is driven to completion inline.

use crate::error::{Error, Result};
use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use core_async::runtime;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::format::FmtSpan,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer,
};

/// Crates whose events follow the configured level. Everything else is
/// held at `warn`.
const WORKSPACE_TARGETS: &[&str] = &[
    "audioshelf_workspace",
    "core_runtime",
    "core_library",
    "core_playback",
    "core_sync",
    "core_service",
    "provider_catalog",
    "bridge_desktop",
];

const NOISY_DEPENDENCIES: &[&str] = &["h2", "hyper", "reqwest", "sqlx"];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, multi-line
    Pretty,
    /// One JSON object per event
    Json,
    /// Single-line
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Minimum level for workspace crates.
    pub level: LogLevel,
    /// Replaces the generated per-crate filter entirely when set,
    /// e.g. `"core_sync=trace,core_playback=debug"`.
    pub filter: Option<String>,
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    /// Emit span enter/exit for `#[instrument]`ed operations.
    pub enable_spans: bool,
    pub display_target: bool,
    pub display_thread_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            logger_sink: None,
            enable_spans: true,
            display_target: true,
            display_thread_info: false,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("filter", &self.filter)
            .field("has_logger_sink", &self.logger_sink.is_some())
            .field("enable_spans", &self.enable_spans)
            .finish()
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }

    pub fn with_thread_info(mut self, display: bool) -> Self {
        self.display_thread_info = display;
        self
    }
}

/// Installs the global subscriber.
///
/// Call once at startup. A second call fails with [`Error::Config`] because
/// the global default is already set.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;
    let sink_layer = LoggerSinkLayer::new(config.logger_sink.clone());
    let registry = tracing_subscriber::registry().with(filter).with(sink_layer);

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(config.display_target)
                    .with_thread_ids(config.display_thread_info)
                    .with_thread_names(config.display_thread_info)
                    .with_span_events(span_events(&config))
                    .with_writer(io::stdout),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(config.enable_spans)
                    .with_span_list(config.enable_spans)
                    .with_target(config.display_target)
                    .with_thread_ids(config.display_thread_info)
                    .with_thread_names(config.display_thread_info)
                    .with_writer(io::stdout),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(config.display_target)
                    .with_thread_ids(config.display_thread_info)
                    .with_thread_names(config.display_thread_info)
                    .with_writer(io::stdout),
            )
            .try_init(),
    };

    result.map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

fn span_events(config: &LoggingConfig) -> FmtSpan {
    if config.enable_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    }
}

fn level_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn default_filter_string(level: LogLevel) -> String {
    let base = level_directive(level);
    let mut directives: Vec<String> = vec!["warn".to_string()];
    directives.extend(
        WORKSPACE_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, base)),
    );
    directives.extend(
        NOISY_DEPENDENCIES
            .iter()
            .map(|target| format!("{}=warn", target)),
    );
    directives.join(",")
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let filter_string = match &config.filter {
        Some(custom) => custom.clone(),
        None => default_filter_string(config.level),
    };

    EnvFilter::try_new(filter_string)
        .map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))
}

/// Forwards events to a `LoggerSink`.
struct LoggerSinkLayer {
    sink: Option<Arc<dyn LoggerSink>>,
}

impl LoggerSinkLayer {
    fn new(sink: Option<Arc<dyn LoggerSink>>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };

        let metadata = event.metadata();
        let level = tracing_level_to_log_level(*metadata.level());
        if level < sink.min_level() {
            return;
        }

        let mut visitor = SinkVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .message
            .unwrap_or_else(|| metadata.name().to_string());
        let mut entry = LogEntry::new(level, metadata.target(), message);
        for (key, value) in visitor.fields {
            let value = redact_if_sensitive(&key, &value);
            entry = entry.with_field(key, value);
        }
        if let Some(span) = ctx.lookup_current() {
            entry = entry.with_span_id(span.name());
        }

        let sink = Arc::clone(sink);
        if let Ok(handle) = runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = sink.log(entry).await {
                    eprintln!("LoggerSink error: {}", err);
                }
            });
            return;
        }

        match runtime::block_on(async move { sink.log(entry).await }) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => eprintln!("LoggerSink error: {}", err),
            Err(err) => eprintln!("LoggerSink runtime error: {}", err),
        }
    }
}

#[derive(Default)]
struct SinkVisitor {
    message: Option<String>,
    fields: HashMap<String, String>,
}

impl SinkVisitor {
    fn record_value(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for SinkVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, value.to_string());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_value(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.record_value(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_value(field, format!("{:?}", value));
    }
}

fn tracing_level_to_log_level(level: tracing::Level) -> LogLevel {
    match level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

/// Returns `[REDACTED]` for credential-like field names and the value
/// unchanged otherwise.
///
/// ```
/// use core_runtime::logging::redact_if_sensitive;
///
/// assert_eq!(redact_if_sensitive("auth_token", "abc"), "[REDACTED]");
/// assert_eq!(redact_if_sensitive("book_id", "li_1"), "li_1");
/// ```
pub fn redact_if_sensitive(field_name: &str, value: &str) -> String {
    const SENSITIVE_FIELDS: &[&str] = &[
        "token",
        "password",
        "secret",
        "api_key",
        "authorization",
        "bearer",
    ];

    let field_lower = field_name.to_lowercase();
    if SENSITIVE_FIELDS.iter().any(|f| field_lower.contains(f)) {
        "[REDACTED]".to_string()
    } else {
        value.to_string()
    }
}

/// Basename of `path`, for logging local file operations without leaking
/// the user's directory layout.
pub fn strip_path(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
