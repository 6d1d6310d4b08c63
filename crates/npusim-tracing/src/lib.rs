//! Shared tracing configuration for the npusim workspace.
//!
//! Binaries, integration tests and benches install their `tracing`
//! subscriber through this crate so the operator compiler logs the same way
//! everywhere. Library crates only emit events; they never install a
//! subscriber themselves.

pub mod performance;

#[macro_use]
pub mod macros;

use std::env;

#[doc(hidden)]
pub use tracing as __private_tracing;

use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// Configuration describing how the shared tracing subscriber should behave.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Optional filter directives (e.g. `npusim_core=trace,info`). When absent
    /// `RUST_LOG` is consulted, then [`TracingConfig::default_directive`].
    pub directives: Option<String>,
    /// Fallback directive when neither `directives` nor `RUST_LOG` parse.
    pub default_directive: String,
    /// Emit event targets (module paths).
    pub include_targets: bool,
    /// ANSI colouring. Forced off for JSON output.
    pub ansi: bool,
    /// Span lifecycle events to emit.
    pub span_events: FmtSpan,
    /// Output format for the formatter layer.
    pub output: TracingOutput,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Pretty, ANSI-enabled output for interactive runs.
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
        }
    }

    /// JSON output without colour, for CI logs and trace collection.
    pub fn for_ci() -> Self {
        Self {
            ansi: false,
            output: TracingOutput::Json,
            ..Self::for_local()
        }
    }

    /// Verbose compiler output with span timings enabled.
    pub fn for_performance() -> Self {
        Self {
            directives: Some("npusim_core=debug,npusim_isa=debug".to_string()),
            ansi: false,
            span_events: FmtSpan::CLOSE,
            output: TracingOutput::Json,
            ..Self::for_local()
        }
    }

    /// Build a configuration from environment hints.
    ///
    /// - `NPUSIM_TRACING_PROFILE`: `local` (default), `ci` or `performance`
    /// - `NPUSIM_TRACING_DIRECTIVES`: overrides filter directives
    /// - `NPUSIM_TRACING_FORMAT`: `pretty`, `compact` or `json`
    pub fn from_env() -> Self {
        let profile = env::var("NPUSIM_TRACING_PROFILE")
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase();

        let mut config = match profile.as_str() {
            "ci" => Self::for_ci(),
            "performance" => Self::for_performance(),
            _ => Self::for_local(),
        };

        if let Ok(directives) = env::var("NPUSIM_TRACING_DIRECTIVES") {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }

        if let Ok(format) = env::var("NPUSIM_TRACING_FORMAT") {
            if let Some(parsed) = TracingOutput::from_env_value(&format) {
                config.output = parsed;
                if config.output == TracingOutput::Json {
                    config.ansi = false;
                }
            }
        }

        config
    }

    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        match &self.directives {
            Some(directives) => {
                EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
            }
            None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))),
        }
    }
}

/// Output format choices for the formatter layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
    Json,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Errors surfaced when configuring the shared subscriber fails.
#[derive(Debug, thiserror::Error)]
pub enum TracingSetupError {
    /// The directive string could not be parsed.
    #[error("invalid tracing directive: {0}")]
    InvalidFilter(String),

    /// A global subscriber is already installed.
    #[error("failed to install global tracing subscriber: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Build a subscriber for the given configuration without installing it.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let filter = config.resolve_filter()?;
    Ok(Registry::default().with(fmt_layer(config, false)).with(filter))
}

fn fmt_layer(config: &TracingConfig, test_writer: bool) -> Box<dyn Layer<Registry> + Send + Sync> {
    let base = tracing_fmt::layer()
        .with_target(config.include_targets)
        .with_span_events(config.span_events.clone());

    match (config.output, test_writer) {
        (TracingOutput::Compact, false) => Box::new(base.compact().with_ansi(config.ansi)),
        (TracingOutput::Compact, true) => Box::new(base.compact().with_ansi(false).with_test_writer()),
        (TracingOutput::Pretty, false) => Box::new(base.pretty().with_ansi(config.ansi)),
        (TracingOutput::Pretty, true) => Box::new(base.pretty().with_ansi(false).with_test_writer()),
        (TracingOutput::Json, false) => Box::new(base.json().with_ansi(false)),
        (TracingOutput::Json, true) => Box::new(base.json().with_ansi(false).with_test_writer()),
    }
}

/// Install the configured subscriber as the process-wide default.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    build_subscriber(config)?.try_init()?;
    Ok(())
}

/// Install a compact subscriber routed through the libtest capture.
///
/// Safe to call from every test: a second installation is silently ignored.
pub fn init_for_tests() {
    let config = TracingConfig {
        default_directive: "debug".to_string(),
        output: TracingOutput::Compact,
        ..TracingConfig::for_local()
    };
    let Ok(filter) = config.resolve_filter() else {
        return;
    };
    let _ = Registry::default().with(fmt_layer(&config, true)).with(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn reset_env(keys: &[&str]) {
        for key in keys {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_rejects_invalid_directive() {
        let config = TracingConfig {
            directives: Some("=::invalid".to_string()),
            ..TracingConfig::default()
        };
        assert!(matches!(build_subscriber(&config), Err(TracingSetupError::InvalidFilter(_))));
    }

    #[test]
    fn test_builds_with_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        reset_env(&["RUST_LOG"]);
        assert!(build_subscriber(&TracingConfig::default()).is_ok());
    }

    #[test]
    fn test_from_env_respects_profile_and_format() {
        let _guard = ENV_LOCK.lock().unwrap();
        reset_env(&[
            "NPUSIM_TRACING_PROFILE",
            "NPUSIM_TRACING_FORMAT",
            "NPUSIM_TRACING_DIRECTIVES",
        ]);

        env::set_var("NPUSIM_TRACING_PROFILE", "ci");
        env::set_var("NPUSIM_TRACING_FORMAT", "compact");
        env::set_var("NPUSIM_TRACING_DIRECTIVES", "npusim_core=trace");

        let config = TracingConfig::from_env();
        assert_eq!(config.directives.as_deref(), Some("npusim_core=trace"));
        assert!(!config.ansi);
        assert_eq!(config.output, TracingOutput::Compact);

        reset_env(&[
            "NPUSIM_TRACING_PROFILE",
            "NPUSIM_TRACING_FORMAT",
            "NPUSIM_TRACING_DIRECTIVES",
        ]);
    }

    #[test]
    fn test_performance_preset_targets_compiler_crates() {
        let config = TracingConfig::for_performance();
        assert_eq!(config.span_events, FmtSpan::CLOSE);
        assert_eq!(config.output, TracingOutput::Json);
        assert!(config.directives.as_deref().unwrap().contains("npusim_core"));
    }

    #[test]
    fn test_init_for_tests_is_repeatable() {
        init_for_tests();
        init_for_tests();
    }
}
