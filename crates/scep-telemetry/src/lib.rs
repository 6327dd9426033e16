//! Console logging for the SCEP server.
//!
//! [`Tracing`] installs a `tracing-subscriber` registry that writes every
//! event to stdout, either as plain text or as one JSON object per line. The
//! filter is read from [`Tracing::CONSOLE_LOG_LEVEL`] and falls back to
//! `INFO`, or `DEBUG` with [`TelemetryOptions::log_debug`].
//!
//! ```
//! use scep_telemetry::{Error, TelemetryOptions, Tracing};
//!
//! fn main() -> Result<(), Error> {
//!     let options = TelemetryOptions {
//!         log_debug: true,
//!         log_json: false,
//!     };
//!     let _tracing_guard = Tracing::new("scepserver", options).init()?;
//!
//!     tracing::debug!("log a message");
//!     Ok(())
//! }
//! ```
use snafu::{ResultExt as _, Snafu};
use tracing::{level_filters::LevelFilter, subscriber::SetGlobalDefaultError};
use tracing_subscriber::{EnvFilter, Layer as _, layer::SubscriberExt as _};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unable to set the global default subscriber"))]
    SetGlobalDefaultSubscriber { source: SetGlobalDefaultError },
}

/// How console events are rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, with ANSI colors unless `NO_COLOR` is set.
    #[default]
    Plain,

    /// One JSON object per event, including the current span.
    Json,
}

/// Logging switches of the `scepserver` binary.
///
/// Can be flattened into a `clap` CLI when the `clap` feature is enabled.
#[cfg_attr(feature = "clap", derive(clap::Args, PartialEq, Eq))]
#[derive(Clone, Copy, Debug, Default)]
pub struct TelemetryOptions {
    /// Enable debug logging.
    #[cfg_attr(feature = "clap", arg(long = "debug", env = "SCEP_LOG_DEBUG"))]
    pub log_debug: bool,

    /// Output JSON logs.
    #[cfg_attr(feature = "clap", arg(long = "log-json", env = "SCEP_LOG_JSON"))]
    pub log_json: bool,
}

/// The console subscriber of a service.
///
/// [`Tracing::init`] returns the instance as a guard. Name the guard variable,
/// `let _ =` drops it immediately.
#[derive(Debug)]
pub struct Tracing {
    service_name: &'static str,
    environment_variable: &'static str,
    default_level: LevelFilter,
    format: LogFormat,
}

impl Tracing {
    /// The environment variable holding the filter directives. An explicitly
    /// set value always wins over `--debug`.
    pub const CONSOLE_LOG_LEVEL: &str = "CONSOLE_LOG_LEVEL";

    pub fn new(service_name: &'static str, options: TelemetryOptions) -> Self {
        let TelemetryOptions {
            log_debug,
            log_json,
        } = options;

        Self {
            service_name,
            environment_variable: Self::CONSOLE_LOG_LEVEL,
            default_level: if log_debug {
                LevelFilter::DEBUG
            } else {
                LevelFilter::INFO
            },
            format: if log_json {
                LogFormat::Json
            } else {
                LogFormat::Plain
            },
        }
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    pub fn default_level(&self) -> LevelFilter {
        self.default_level
    }

    /// Installs the subscriber as the global default.
    pub fn init(self) -> Result<Self> {
        let filter = self.env_filter();
        let layer = match self.format {
            LogFormat::Plain => tracing_subscriber::fmt::layer().with_filter(filter).boxed(),
            LogFormat::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_filter(filter)
                .boxed(),
        };

        tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layer))
            .context(SetGlobalDefaultSubscriberSnafu)?;

        tracing::debug!(
            service.name = self.service_name,
            console_log.format = ?self.format,
            "initialized tracing"
        );

        // Returned as the guard, dropping it logs the shutdown
        Ok(self)
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_env_var(self.environment_variable)
            .with_default_directive(self.default_level.into())
            .from_env_lossy()
    }
}

impl Drop for Tracing {
    fn drop(&mut self) {
        tracing::debug!(service.name = self.service_name, "shutting down tracing");
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(TelemetryOptions::default(), LevelFilter::INFO, LogFormat::Plain)]
    #[case(TelemetryOptions { log_debug: true, log_json: false }, LevelFilter::DEBUG, LogFormat::Plain)]
    #[case(TelemetryOptions { log_debug: false, log_json: true }, LevelFilter::INFO, LogFormat::Json)]
    #[case(TelemetryOptions { log_debug: true, log_json: true }, LevelFilter::DEBUG, LogFormat::Json)]
    fn from_options(
        #[case] options: TelemetryOptions,
        #[case] level: LevelFilter,
        #[case] format: LogFormat,
    ) {
        let tracing = Tracing::new("test", options);

        assert_eq!(tracing.default_level(), level);
        assert_eq!(tracing.format(), format);
        assert_eq!(tracing.environment_variable, Tracing::CONSOLE_LOG_LEVEL);
    }

    #[test]
    fn filter_falls_back_to_default_level() {
        let mut tracing = Tracing::new("test", TelemetryOptions {
            log_debug: true,
            log_json: false,
        });
        tracing.environment_variable = "SCEP_TELEMETRY_TEST_UNSET_FILTER";

        assert_eq!(tracing.env_filter().max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
