use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to bring the embedded runtime up.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("runtime already running")]
    AlreadyRunning,

    #[error("could not open archive directory {}: {source}", path.display())]
    ClasspathUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("runtime initialization failed: {0}")]
    RuntimeInitFailed(String),
}

#[derive(Debug, Error)]
pub enum StopError {
    #[error("runtime is not running")]
    NotRunning,

    #[error("runtime teardown failed: {0}")]
    TeardownFailed(String),
}

/// A class or method the runtime could not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    Class(String),
    Method {
        class: String,
        name: String,
        signature: String,
    },
}

impl Symbol {
    pub fn class(name: impl Into<String>) -> Self {
        Self::Class(name.into())
    }

    pub fn method(
        class: impl Into<String>,
        name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self::Method {
            class: class.into(),
            name: name.into(),
            signature: signature.into(),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Class(name) => write!(f, "class {name}"),
            Symbol::Method {
                class,
                name,
                signature,
            } => write!(f, "method {class}.{name}{signature}"),
        }
    }
}

/// Failure of a call into the viewer.
#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("runtime is not running")]
    NotRunning,

    /// Packaging or version mismatch between this crate and the viewer jars.
    #[error("unable to locate {0}")]
    SymbolResolution(Symbol),

    #[error("failed to attach thread to runtime: {0}")]
    AttachFailed(String),

    #[error("remote call {call} failed: {reason}")]
    InvocationFailed { call: &'static str, reason: String },

    #[error("viewer could not open dataset {0}")]
    OpenFailed(String),

    #[error("invalid view options: {0}")]
    InvalidOptions(String),

    /// The calling thread holds a pinned frame; no runtime call is allowed
    /// until it is released.
    #[error("a pinned frame is outstanding on this thread")]
    CriticalSectionHeld,

    #[error("frame released on a thread other than the one that pinned it")]
    ThreadAffinityViolation,

    #[error("failed to pin frame data: {0}")]
    PinFailed(String),
}

impl ViewerError {
    pub fn invocation(call: &'static str, reason: impl fmt::Display) -> Self {
        Self::InvocationFailed {
            call,
            reason: reason.to_string(),
        }
    }

    /// True when the error points at a configuration problem (missing
    /// classes or methods) rather than a runtime condition.
    pub fn is_symbol_resolution(&self) -> bool {
        matches!(self, Self::SymbolResolution(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
