//! # Solar Common
//!
//! Error type and tracing setup shared by the offline worker crates.
//!
//! Configuration loading, CLI argument parsing and logger installation all
//! report through [`SolarError`]; the worker crates wrap it in their own
//! error enums.

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Failures outside the request path: configuration, files, parsing.
#[derive(Error, Debug)]
pub enum SolarError {
    /// Unusable configuration.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// A command-line or API argument outside its accepted values.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unexpected failure, with the backtrace of where it was wrapped.
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl SolarError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap an unexpected failure, capturing a backtrace.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Short machine-readable name, used as a log field.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Url(_) => "url",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Internal { .. } => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, SolarError>;

/// Attach a description to any foreign error.
pub trait ResultExt<T> {
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| SolarError::internal(format!("{}: {e}", message.into())))
    }
}
