//! Error types for the convolutional network engine
//!
//! Shape, state and format errors are invariant violations: the network routes
//! them through the fatal-reporting context (see [`crate::fatal`]) before
//! returning them. I/O and configuration errors are ordinary recoverable errors.

use std::panic::Location;
use thiserror::Error;

/// Source location that raised a fatal-class error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Site {
    pub file: &'static str,
    pub line: u32,
    /// Text of the failed check, when the error came from an `ensure_*!` macro.
    pub condition: Option<&'static str>,
}

impl Site {
    pub const fn new(file: &'static str, line: u32, condition: Option<&'static str>) -> Self {
        Self {
            file,
            line,
            condition,
        }
    }

    /// Location of the caller, without a condition.
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self::new(location.file(), location.line(), None)
    }
}

/// All error conditions raised by layers, the network and its loaders.
#[derive(Debug, Error)]
pub enum CnnError {
    /// Non-positive or inconsistent dimensions, or an output dimension that computes to zero.
    #[error("shape error: {message}")]
    Shape { message: String, site: Site },

    /// Operation invoked in the wrong phase, or a cache that no longer matches the data.
    #[error("state error: {message}")]
    State { message: String, site: Site },

    /// Persisted record does not match the expected schema.
    #[error("format error: {message}")]
    Format { message: String, site: Site },

    /// Invalid training or architecture configuration.
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CnnError {
    #[track_caller]
    pub fn shape(message: impl Into<String>) -> Self {
        CnnError::Shape {
            message: message.into(),
            site: Site::caller(),
        }
    }

    #[track_caller]
    pub fn state(message: impl Into<String>) -> Self {
        CnnError::State {
            message: message.into(),
            site: Site::caller(),
        }
    }

    #[track_caller]
    pub fn format(message: impl Into<String>) -> Self {
        CnnError::Format {
            message: message.into(),
            site: Site::caller(),
        }
    }

    /// Whether this error is a programmer-error class invariant violation.
    pub fn is_fatal(&self) -> bool {
        self.site().is_some()
    }

    /// Where a fatal-class error was raised. `None` for recoverable errors.
    pub fn site(&self) -> Option<&Site> {
        match self {
            CnnError::Shape { site, .. }
            | CnnError::State { site, .. }
            | CnnError::Format { site, .. } => Some(site),
            CnnError::Config(_) | CnnError::Io(_) => None,
        }
    }

    /// Short name of the error class, used in fatal reports.
    pub fn kind(&self) -> &'static str {
        match self {
            CnnError::Shape { .. } => "ShapeError",
            CnnError::State { .. } => "StateError",
            CnnError::Format { .. } => "FormatError",
            CnnError::Config(_) => "ConfigError",
            CnnError::Io(_) => "IoError",
        }
    }
}

pub type CnnResult<T> = Result<T, CnnError>;

/// Return the `$variant` error unless `$cond` holds, recording the check's site and text.
macro_rules! ensure_variant {
    ($variant:ident, $cond:expr, $($arg:tt)+) => {
        if !($cond) {
            return Err($crate::error::CnnError::$variant {
                message: format!($($arg)+),
                site: $crate::error::Site::new(file!(), line!(), Some(stringify!($cond))),
            });
        }
    };
}

/// Return a [`CnnError::Shape`] unless `$cond` holds.
macro_rules! ensure_shape {
    ($cond:expr, $($arg:tt)+) => {
        $crate::error::ensure_variant!(Shape, $cond, $($arg)+)
    };
}

/// Return a [`CnnError::State`] unless `$cond` holds.
macro_rules! ensure_state {
    ($cond:expr, $($arg:tt)+) => {
        $crate::error::ensure_variant!(State, $cond, $($arg)+)
    };
}

/// Return a [`CnnError::Format`] unless `$cond` holds.
macro_rules! ensure_format {
    ($cond:expr, $($arg:tt)+) => {
        $crate::error::ensure_variant!(Format, $cond, $($arg)+)
    };
}

pub(crate) use ensure_format;
pub(crate) use ensure_shape;
pub(crate) use ensure_state;
pub(crate) use ensure_variant;

#[cfg(test)]
mod tests {
    use super::*;

    fn checked(value: usize) -> CnnResult<usize> {
        ensure_shape!(value > 0, "value must be positive, got {}", value);
        Ok(value)
    }

    #[test]
    fn test_fatal_classes() {
        assert!(CnnError::shape("x").is_fatal());
        assert!(CnnError::state("x").is_fatal());
        assert!(CnnError::format("x").is_fatal());
        assert!(!CnnError::Config("x".into()).is_fatal());

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(!CnnError::from(io).is_fatal());
    }

    #[test]
    fn test_ensure_macro() {
        assert_eq!(checked(3).unwrap(), 3);
        let err = checked(0).unwrap_err();
        assert_eq!(err.kind(), "ShapeError");
        assert!(err.to_string().contains("got 0"));

        let site = err.site().unwrap();
        assert!(site.file.ends_with("error.rs"));
        assert_eq!(site.condition, Some("value > 0"));
    }

    #[test]
    fn test_constructor_records_caller() {
        let line = line!() + 1;
        let err = CnnError::format("bad token");
        let site = err.site().unwrap();
        assert!(site.file.ends_with("error.rs"));
        assert_eq!(site.line, line);
        assert_eq!(site.condition, None);
        assert_eq!(err.to_string(), "format error: bad token");
    }
}
