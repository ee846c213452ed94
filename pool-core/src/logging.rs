use crate::config::{LogFormat, LogOutput, LoggingConfig};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    filter::Directive,
    fmt::{
        format::Writer,
        writer::{BoxMakeWriter, MakeWriterExt},
        FmtContext, FormatEvent, FormatFields,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const SENSITIVE_KEYS: [&str; 8] = [
    "password", "passwd", "secret", "token", "credential", "private_key", "seed", "passphrase",
];

/// Structured log entry for JSON output
#[derive(Debug, Serialize)]
pub struct StructuredLogEntry {
    /// Timestamp in RFC3339 format
    pub timestamp: String,
    pub level: String,
    /// Event target, usually the module path
    pub component: String,
    pub message: String,
    /// Additional structured fields
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LogLocation>,
}

/// Source code location information
#[derive(Debug, Serialize)]
pub struct LogLocation {
    pub file: String,
    pub line: u32,
}

/// One-object-per-line JSON event formatter
pub struct JsonFormatter {
    redact_sensitive: bool,
}

impl JsonFormatter {
    pub fn new(redact_sensitive: bool) -> Self {
        Self { redact_sensitive }
    }

    /// Redact sensitive data from log fields
    fn redact_fields(&self, fields: &mut HashMap<String, serde_json::Value>) {
        if !self.redact_sensitive {
            return;
        }

        for (key, value) in fields.iter_mut() {
            if is_sensitive_key(key) {
                *value = serde_json::Value::String("[REDACTED]".to_string());
            }
        }
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|sensitive| key.contains(sensitive))
}

impl<S, N> FormatEvent<S, N> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        let mut fields = HashMap::new();
        event.record(&mut JsonFieldVisitor::new(&mut fields));
        self.redact_fields(&mut fields);

        let message = match fields.remove("message") {
            Some(serde_json::Value::String(message)) => message,
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let entry = StructuredLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: metadata.level().to_string(),
            component: metadata.target().to_string(),
            message,
            fields,
            location: metadata.file().map(|file| LogLocation {
                file: file.to_string(),
                line: metadata.line().unwrap_or(0),
            }),
        };

        let json = serde_json::to_string(&entry).map_err(|_| fmt::Error)?;
        writeln!(writer, "{}", json)
    }
}

/// Visitor for collecting event fields into a HashMap
struct JsonFieldVisitor<'a> {
    fields: &'a mut HashMap<String, serde_json::Value>,
}

impl<'a> JsonFieldVisitor<'a> {
    fn new(fields: &'a mut HashMap<String, serde_json::Value>) -> Self {
        Self { fields }
    }
}

impl<'a> tracing::field::Visit for JsonFieldVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        self.fields.insert(
            field.name().to_string(),
            serde_json::Value::String(format!("{:?}", value)),
        );
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields.insert(
            field.name().to_string(),
            serde_json::Value::String(value.to_string()),
        );
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

/// Build the environment filter from the global and per-component levels
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(&config.level)
        .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", config.level, e)))?;

    for (component, level) in &config.component_levels {
        let directive = format!("{}={}", component, level)
            .parse::<Directive>()
            .map_err(|e| Error::Config(format!("Invalid log directive for {}: {}", component, e)))?;
        filter = filter.add_directive(directive);
    }

    Ok(filter)
}

fn open_log_file(path: &std::path::Path) -> Result<std::fs::File> {
    Ok(std::fs::OpenOptions::new().create(true).append(true).open(path)?)
}

fn build_writer(output: &LogOutput) -> Result<BoxMakeWriter> {
    let writer = match output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::File(path) => BoxMakeWriter::new(Mutex::new(open_log_file(path)?)),
        LogOutput::Both(path) => {
            let file = Mutex::new(open_log_file(path)?);
            BoxMakeWriter::new(std::io::stdout.and(file))
        }
    };
    Ok(writer)
}

/// Initialize the logging system with the given configuration
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let writer = build_writer(&config.output)?;

    let layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .event_format(JsonFormatter::new(config.redact_sensitive_data))
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}
