//! Fatal-condition reporting
//!
//! Shape, state and format violations are contract breaches. Each one carries
//! the [`Site`] that raised it. Before such an error leaves the
//! [`Network`](crate::network::Network), it is logged with that location and
//! the failed condition, then handed to a [`FatalHandler`]. The default handler aborts
//! the process; embedders and tests install their own handler through a
//! [`FatalContext`] created at startup.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use rust_convnet::fatal::{CapturingHandler, FatalContext};
//! use rust_convnet::network::Network;
//!
//! let handler = Arc::new(CapturingHandler::new());
//! let network = Network::with_fatal_context(FatalContext::new(handler.clone()));
//! assert!(handler.reports().is_empty());
//! # drop(network);
//! ```

use crate::error::{CnnError, Site};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::error;

/// A single invariant violation, with the location that detected it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalReport {
    pub kind: &'static str,
    pub message: String,
    pub file: &'static str,
    pub line: u32,
    /// Source text of the check that failed, if the error came from one.
    pub condition: Option<&'static str>,
}

impl FatalReport {
    fn new(err: &CnnError, site: &Site) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            file: site.file,
            line: site.line,
            condition: site.condition,
        }
    }
}

impl fmt::Display for FatalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{}: {}", self.kind, self.file, self.line, self.message)?;
        if let Some(condition) = self.condition {
            write!(f, " (failed: {})", condition)?;
        }
        Ok(())
    }
}

/// Receives invariant violations.
///
/// Implementations may terminate the process. If `on_fatal` returns, the
/// failing operation returns its error to the caller.
pub trait FatalHandler: Send + Sync {
    fn on_fatal(&self, report: &FatalReport);
}

/// Default handler: abort. The context has already logged the report.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortHandler;

impl FatalHandler for AbortHandler {
    fn on_fatal(&self, _report: &FatalReport) {
        std::process::abort();
    }
}

/// Records every report instead of terminating. Used by tests and embedders
/// that want to surface failures as ordinary errors.
#[derive(Debug, Default)]
pub struct CapturingHandler {
    reports: Mutex<Vec<FatalReport>>,
}

impl CapturingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the reports received so far.
    pub fn reports(&self) -> Vec<FatalReport> {
        match self.reports.lock() {
            Ok(reports) => reports.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn clear(&self) {
        match self.reports.lock() {
            Ok(mut reports) => reports.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl FatalHandler for CapturingHandler {
    fn on_fatal(&self, report: &FatalReport) {
        match self.reports.lock() {
            Ok(mut reports) => reports.push(report.clone()),
            Err(poisoned) => poisoned.into_inner().push(report.clone()),
        }
    }
}

/// Process-scoped reporting context. Cheap to clone; clones share the handler.
#[derive(Clone)]
pub struct FatalContext {
    handler: Arc<dyn FatalHandler>,
}

impl FatalContext {
    pub fn new(handler: Arc<dyn FatalHandler>) -> Self {
        Self { handler }
    }

    /// Context backed by [`AbortHandler`].
    pub fn aborting() -> Self {
        Self::new(Arc::new(AbortHandler))
    }

    /// Pass `result` through, reporting it first if it carries a fatal-class error.
    pub fn check<T>(&self, result: Result<T, CnnError>) -> Result<T, CnnError> {
        if let Err(err) = &result {
            if let Some(site) = err.site() {
                self.report(FatalReport::new(err, site));
            }
        }
        result
    }

    fn report(&self, report: FatalReport) {
        error!(
            kind = report.kind,
            file = report.file,
            line = report.line,
            condition = report.condition.unwrap_or(""),
            "{}",
            report.message
        );
        self.handler.on_fatal(&report);
    }
}

impl Default for FatalContext {
    fn default() -> Self {
        Self::aborting()
    }
}

impl fmt::Debug for FatalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FatalContext").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capturing_handler_records_fatal_errors() {
        let handler = Arc::new(CapturingHandler::new());
        let context = FatalContext::new(handler.clone());

        let result: Result<(), CnnError> =
            context.check(Err(CnnError::state("backward in test phase")));
        assert!(result.is_err());

        let reports = handler.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, "StateError");
        assert!(reports[0].message.contains("backward in test phase"));
        assert!(reports[0].file.ends_with("fatal.rs"));
    }

    #[test]
    fn test_recoverable_errors_are_not_reported() {
        let handler = Arc::new(CapturingHandler::new());
        let context = FatalContext::new(handler.clone());

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let result: Result<(), CnnError> = context.check(Err(CnnError::Io(io)));
        assert!(result.is_err());
        assert!(handler.reports().is_empty());

        let ok = context.check(Ok::<_, CnnError>(7)).unwrap();
        assert_eq!(ok, 7);
        assert!(handler.reports().is_empty());
    }

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_report_logged_once_with_site() {
        let buffer = SharedBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let handler = Arc::new(CapturingHandler::new());
        let context = FatalContext::new(handler.clone());
        tracing::subscriber::with_default(subscriber, || {
            let result: Result<(), CnnError> =
                context.check(Err(CnnError::shape("kernel wider than input")));
            assert!(result.is_err());
        });

        let logged = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(logged.matches("kernel wider than input").count(), 1);
        assert!(logged.contains("fatal.rs"));
        assert_eq!(handler.reports().len(), 1);
    }

    #[test]
    fn test_report_display_includes_condition() {
        let report = FatalReport {
            kind: "StateError",
            message: "state error: stale".into(),
            file: "src/layers/pooling.rs",
            line: 12,
            condition: Some("cache.shape == out_shape"),
        };
        assert_eq!(
            report.to_string(),
            "StateError at src/layers/pooling.rs:12: state error: stale (failed: cache.shape == out_shape)"
        );
    }

    #[test]
    fn test_clear() {
        let handler = CapturingHandler::new();
        handler.on_fatal(&FatalReport {
            kind: "ShapeError",
            message: "bad".into(),
            file: "x.rs",
            line: 1,
            condition: None,
        });
        assert_eq!(handler.reports().len(), 1);
        handler.clear();
        assert!(handler.reports().is_empty());
    }
}
