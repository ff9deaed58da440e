//! Structured logging for ingestion runs.
//!
//! Events go to stderr so that command output on stdout stays parseable.
//! `RUST_LOG` takes precedence over the configured level.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Crates whose events pass the default filter.
const LOG_TARGETS: [&str; 3] = ["aw_core", "aw_observability", "aw_cli"];

/// Logging settings, loadable from the `logging` section of a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level for the workspace crates.
    #[serde(serialize_with = "serialize_level", deserialize_with = "deserialize_level")]
    pub level: Level,
    /// Emit one JSON object per event.
    pub json_format: bool,
    /// Log span open/close events.
    pub include_spans: bool,
    /// Include file and line.
    pub include_location: bool,
    pub include_thread_ids: bool,
    /// Include the module path of each event.
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            include_spans: false,
            include_location: false,
            include_thread_ids: false,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// Debug level with spans, locations and thread ids.
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            include_spans: true,
            include_location: true,
            include_thread_ids: true,
            ..Self::default()
        }
    }

    /// Info level, JSON lines.
    pub fn production() -> Self {
        Self {
            json_format: true,
            ..Self::default()
        }
    }

    /// Filter used when `RUST_LOG` is unset, e.g. `aw_core=info,aw_cli=info`.
    pub fn filter_directives(&self) -> String {
        let level = self.level.to_string().to_lowercase();
        LOG_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, level))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(self.span_events())
            .with_file(self.include_location)
            .with_line_number(self.include_location)
            .with_thread_ids(self.include_thread_ids)
            .with_target(self.include_target);

        if self.json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        }
    }
}

fn serialize_level<S: Serializer>(level: &Level, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&level.to_string().to_lowercase())
}

fn deserialize_level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Level, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse()
        .map_err(|_| serde::de::Error::custom(format!("invalid log level: {}", raw)))
}

/// Installs the global subscriber with [`LoggingConfig::default`].
pub fn init_logging() {
    init_logging_with_config(LoggingConfig::default());
}

/// Installs the global subscriber. Panics if one is already installed.
pub fn init_logging_with_config(config: LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    tracing_subscriber::registry()
        .with(config.fmt_layer())
        .with(env_filter)
        .init();
}

/// Opens an `ingest` span tagged with the tenant scope, plus optional fields.
#[macro_export]
macro_rules! ingest_span {
    ($scope:expr) => {
        tracing::info_span!("ingest", scope = %$scope)
    };
    ($scope:expr, $($field:tt)*) => {
        tracing::info_span!("ingest", scope = %$scope, $($field)*)
    };
}
