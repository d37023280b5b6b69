//! Integration tests for the global logging setup.
//!
//! Only one global subscriber can be installed per process, so everything
//! that needs `init_logging` lives in a single test.

use async_trait::async_trait;
use bridge_traits::error::Result as SinkResult;
use bridge_traits::log::{LogEntry, LogLevel, LoggerSink};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CollectingSink {
    entries: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl LoggerSink for CollectingSink {
    async fn log(&self, entry: LogEntry) -> SinkResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

#[test]
fn test_global_logging_mirrors_into_sink() {
    let sink = Arc::new(CollectingSink::default());
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_filter("integration=debug,core_runtime=debug")
        .with_logger_sink(sink.clone());

    init_logging(config).expect("first initialization succeeds");

    tracing::info!(target: "integration", instance_id = "a", "instance ready");
    tracing::debug!(target: "integration", "below sink level");
    tracing::info!(target: "filtered_out", "dropped by filter");

    {
        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "instance ready");
        assert_eq!(entries[0].fields.get("instance_id"), Some(&"a".to_string()));
    }

    let second = init_logging(LoggingConfig::default());
    assert!(second.is_err(), "a second global subscriber must be rejected");
}
