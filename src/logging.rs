//! Structured JSON logging sink.
//!
//! Every record is a single-line JSON object routed by severity:
//! - debug/info/warn go to the low-severity writer (stdout by default)
//! - error/fatal/panic go to the high-severity writer (stderr by default)
//!
//! The sink is driven by [`JsonLayer`], a `tracing_subscriber` layer, so the
//! rest of the crate logs through the ordinary `tracing` macros. Field names,
//! the minimum level and extra static fields live in a [`SinkConfig`] that is
//! swapped atomically on reconfiguration.

use arc_swap::ArcSwap;
use chrono::{DateTime, Offset, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;

/// Default name of the level field in log records.
pub const DEFAULT_LEVEL_FIELD_NAME: &str = "@level";

/// Default name of the message field in log records.
pub const DEFAULT_MESSAGE_FIELD_NAME: &str = "@message";

/// Default name of the timestamp field in log records.
pub const DEFAULT_TIMESTAMP_FIELD_NAME: &str = "@timestamp";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";
const UTC_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Severity of a log record, ordered from least to most severe.
///
/// `Disabled` is only meaningful as a threshold: no record carries it, so a
/// sink configured with it writes nothing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
    Panic,
    #[serde(rename = "none")]
    Disabled,
}

impl LogLevel {
    /// All accepted level names, in severity order.
    pub const NAMES: [&'static str; 7] =
        ["debug", "info", "warn", "error", "fatal", "panic", "none"];

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
            LogLevel::Panic => "panic",
            LogLevel::Disabled => "none",
        }
    }

    /// True for levels routed to the high-severity writer.
    pub fn is_high_severity(self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Fatal | LogLevel::Panic)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a [`LogLevel`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log level '{0}' (must be one of: debug, info, warn, error, fatal, panic or none)")]
pub struct ParseLevelError(pub String);

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            "panic" => Ok(LogLevel::Panic),
            "none" => Ok(LogLevel::Disabled),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::TRACE | Level::DEBUG => LogLevel::Debug,
            Level::INFO => LogLevel::Info,
            Level::WARN => LogLevel::Warn,
            Level::ERROR => LogLevel::Error,
        }
    }
}

/// Serialized key names of the three built-in record fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNames {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL_FIELD_NAME.to_string(),
            message: DEFAULT_MESSAGE_FIELD_NAME.to_string(),
            timestamp: DEFAULT_TIMESTAMP_FIELD_NAME.to_string(),
        }
    }
}

/// Everything that shapes the records a [`JsonSink`] writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkConfig {
    /// Records below this level are dropped.
    pub min_level: LogLevel,
    pub field_names: FieldNames,
    /// Static fields added to every record.
    pub extra_fields: BTreeMap<String, String>,
}

impl SinkConfig {
    /// Check if a record at the given level passes the threshold.
    pub fn should_log(&self, level: LogLevel) -> bool {
        level != LogLevel::Disabled && level >= self.min_level
    }
}

type BoxedWriter = Box<dyn Write + Send>;

/// Process-wide JSON record writer with severity routing.
pub struct JsonSink {
    config: ArcSwap<SinkConfig>,
    low: Mutex<BoxedWriter>,
    high: Mutex<BoxedWriter>,
}

impl JsonSink {
    /// Create a sink writing low-severity records to `low` and high-severity records to `high`.
    pub fn new(low: impl Write + Send + 'static, high: impl Write + Send + 'static) -> Self {
        Self {
            config: ArcSwap::from_pointee(SinkConfig::default()),
            low: Mutex::new(Box::new(low)),
            high: Mutex::new(Box::new(high)),
        }
    }

    /// Sink writing to the process stdout and stderr.
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }

    /// Replace the active configuration. Affects subsequent records only.
    pub fn configure(&self, config: SinkConfig) {
        self.config.store(Arc::new(config));
    }

    /// The active configuration.
    pub fn config(&self) -> Arc<SinkConfig> {
        self.config.load_full()
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        self.config.load().should_log(level)
    }

    /// Write one record. Write failures are swallowed.
    pub fn log(&self, level: LogLevel, fields: Map<String, Value>, message: &str) {
        let config = self.config.load();
        if !config.should_log(level) {
            return;
        }

        let record = render_record(&config, level, fields, message, &timestamp_now());
        let mut line = match serde_json::to_vec(&record) {
            Ok(line) => line,
            Err(_) => return,
        };
        line.push(b'\n');

        let mut writer = if level.is_high_severity() {
            lock(&self.high)
        } else {
            lock(&self.low)
        };
        let _ = writer.write_all(&line);
        let _ = writer.flush();
    }
}

fn lock(writer: &Mutex<BoxedWriter>) -> MutexGuard<'_, BoxedWriter> {
    writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn timestamp_now() -> String {
    format_timestamp(&chrono::Local::now())
}

/// Millisecond timestamp with a `Z` suffix for a zero offset.
fn format_timestamp<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    if time.offset().fix().local_minus_utc() == 0 {
        time.format(UTC_TIMESTAMP_FORMAT).to_string()
    } else {
        time.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Assemble a record: extra fields, then caller fields, then the built-in fields.
///
/// Built-in fields are inserted last so a caller field can never shadow them.
fn render_record(
    config: &SinkConfig,
    level: LogLevel,
    fields: Map<String, Value>,
    message: &str,
    timestamp: &str,
) -> Map<String, Value> {
    let mut record: Map<String, Value> = config
        .extra_fields
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    record.extend(fields);

    let names = &config.field_names;
    record.insert(names.level.clone(), Value::String(level.as_str().to_string()));
    record.insert(names.timestamp.clone(), Value::String(timestamp.to_string()));
    if !message.is_empty() {
        record.insert(names.message.clone(), Value::String(message.to_string()));
    }
    record
}

/// Span fields captured at span creation, stored in the span's extensions.
struct SpanFields(Map<String, Value>);

/// `tracing` layer that renders events through a [`JsonSink`].
///
/// Fields of enclosing spans are included outermost first, so a span works
/// as a derived logger carrying extra context.
pub struct JsonLayer {
    sink: Arc<JsonSink>,
}

impl JsonLayer {
    pub fn new(sink: Arc<JsonSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for JsonLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = JsonVisitor::default();
        attrs.record(&mut visitor);
        span.extensions_mut().insert(SpanFields(visitor.fields));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(SpanFields(fields)) = extensions.get_mut::<SpanFields>() {
            let mut visitor = JsonVisitor {
                fields: std::mem::take(fields),
                message: None,
            };
            values.record(&mut visitor);
            *fields = visitor.fields;
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let level = LogLevel::from(*event.metadata().level());
        if !self.sink.enabled(level) {
            return;
        }

        let mut fields = Map::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                let extensions = span.extensions();
                if let Some(SpanFields(span_fields)) = extensions.get::<SpanFields>() {
                    fields.extend(span_fields.clone());
                }
            }
        }

        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);
        fields.extend(visitor.fields);

        self.sink
            .log(level, fields, visitor.message.as_deref().unwrap_or_default());
    }
}

/// Fields named `json.<name>` carry JSON text and are written as structured
/// values under `<name>`. See [`JsonField`].
const JSON_FIELD_PREFIX: &str = "json.";

/// Renders a value as JSON text for a `json.`-prefixed `tracing` field.
///
/// ```
/// use json_exec::logging::JsonField;
///
/// let args = vec!["-c", "exit 3"];
/// tracing::info!(json.args = %JsonField(&args), "executing");
/// assert_eq!(JsonField(&args).to_string(), r#"["-c","exit 3"]"#);
/// ```
pub struct JsonField<T>(pub T);

impl<T: Serialize> fmt::Display for JsonField<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = serde_json::to_string(&self.0).map_err(|_| fmt::Error)?;
        f.write_str(&encoded)
    }
}

/// Collects `tracing` field values as JSON.
#[derive(Default)]
struct JsonVisitor {
    fields: Map<String, Value>,
    message: Option<String>,
}

impl JsonVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => {
                self.message = Some(match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                });
            }
            // Metadata attached by the `log` bridge.
            name if name.starts_with("log.") => {}
            name if name.starts_with(JSON_FIELD_PREFIX) => {
                let name = &name[JSON_FIELD_PREFIX.len()..];
                let value = match value {
                    Value::String(encoded) => {
                        serde_json::from_str(&encoded).unwrap_or(Value::String(encoded))
                    }
                    other => other,
                };
                self.fields.insert(name.to_string(), value);
            }
            name => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for JsonVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{:?}", value)));
    }
}

/// Failure to install the process-wide logger.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("a global tracing subscriber is already installed: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
    #[error("failed to bridge the log crate into tracing: {0}")]
    LogBridge(#[from] tracing_log::log_tracer::SetLoggerError),
}

/// Install `sink` as the global `tracing` subscriber and route `log` crate records into it.
pub fn install_global(sink: Arc<JsonSink>) -> Result<(), InstallError> {
    let subscriber = tracing_subscriber::registry().with(JsonLayer::new(sink));
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

/// Cloneable in-memory writer, for capturing records.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(|p| p.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Written records parsed as JSON, one per line.
    pub fn records(&self) -> Vec<Value> {
        self.contents()
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
