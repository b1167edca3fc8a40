//! Unit tests for the Engine logging front end
//!
//! IMPORTANT: LOGGER and MIN_SEVERITY are process globals shared across all tests.
//! Every test touching them is marked #[serial].

use crate::milg::Engine;
use crate::milg::log::{Logger, LogEntry, LogSeverity};
use std::sync::{Arc, Mutex};
use serial_test::serial;

// ============================================================================
// TEST HELPERS
// ============================================================================

/// Test logger that captures log entries for verification
///
/// Only `milg::test*` sources are kept: tests running in parallel log too.
struct CaptureLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl CaptureLogger {
    fn new() -> (Self, Arc<Mutex<Vec<LogEntry>>>) {
        let entries = Arc::new(Mutex::new(Vec::new()));
        (Self { entries: entries.clone() }, entries)
    }
}

impl Logger for CaptureLogger {
    fn log(&self, entry: &LogEntry) {
        if entry.source.starts_with("milg::test") {
            self.entries.lock().unwrap().push(entry.clone());
        }
    }
}

// ============================================================================
// LOGGER TESTS
// ============================================================================

#[test]
#[serial]
fn test_set_logger_receives_entries() {
    let (logger, entries) = CaptureLogger::new();
    Engine::set_min_severity(LogSeverity::Trace);
    Engine::set_logger(logger);

    Engine::log(LogSeverity::Info, "milg::test", "hello".to_string());
    Engine::log(LogSeverity::Warn, "milg::test", "careful".to_string());

    {
        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "hello");
        assert_eq!(entries[0].source, "milg::test");
        assert!(entries[0].file.is_none());
        assert_eq!(entries[1].severity, LogSeverity::Warn);
    }

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_log_detailed_carries_location() {
    let (logger, entries) = CaptureLogger::new();
    Engine::set_min_severity(LogSeverity::Trace);
    Engine::set_logger(logger);

    Engine::log_detailed(LogSeverity::Error, "milg::test", "boom".to_string(), "pipeline.rs", 99);

    {
        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file, Some("pipeline.rs"));
        assert_eq!(entries[0].line, Some(99));
    }

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_min_severity_filters_entries() {
    let (logger, entries) = CaptureLogger::new();
    Engine::set_logger(logger);
    Engine::set_min_severity(LogSeverity::Warn);
    assert_eq!(Engine::min_severity(), LogSeverity::Warn);

    Engine::log(LogSeverity::Trace, "milg::test", "dropped".to_string());
    Engine::log(LogSeverity::Info, "milg::test", "dropped".to_string());
    Engine::log(LogSeverity::Error, "milg::test", "kept".to_string());

    {
        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "kept");
    }

    Engine::set_min_severity(LogSeverity::Trace);
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_validation_macro_logs_and_builds_error() {
    let (logger, entries) = CaptureLogger::new();
    Engine::set_min_severity(LogSeverity::Trace);
    Engine::set_logger(logger);

    let err = crate::engine_validation!("milg::test::Pipeline", "binding {} out of range", 9);
    assert!(matches!(err, crate::milg::Error::ValidationError(ref m) if m == "binding 9 out of range"));

    {
        let entries = entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].severity, LogSeverity::Error);
        assert!(entries[0].line.is_some());
    }

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_engine_err_macro_builds_backend_error() {
    let (logger, entries) = CaptureLogger::new();
    Engine::set_min_severity(LogSeverity::Trace);
    Engine::set_logger(logger);

    let err = crate::engine_err!("milg::test::vulkan", "vk call failed: {}", -4);
    assert!(matches!(err, crate::milg::Error::BackendError(ref m) if m.contains("-4")));
    assert_eq!(entries.lock().unwrap().len(), 1);

    Engine::reset_logger();
}
