use tracing_subscriber::EnvFilter;

/// Filter used when neither a level nor `RUST_LOG` is given.
const DEFAULT_FILTER: &str = "info";

/// Build the filter: an explicit level wins, then `RUST_LOG`, then `info`.
pub fn build_filter(level: Option<&str>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    }
}

/// Install the global tracing subscriber. Logs go to stderr so command
/// output on stdout stays machine-readable.
pub fn init_logging(level: Option<&str>, json: bool) {
    let filter = build_filter(level);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    // A subscriber may already be installed (tests, embedding); keep it.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Run `f` with a plain-text subscriber on this thread and return what it logged.
#[cfg(test)]
pub(crate) fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let buffer = Buffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
    (result, logs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_level_is_used() {
        let filter = build_filter(Some("debug"));
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn test_invalid_level_falls_back_to_info() {
        let filter = build_filter(Some("stagewise=notalevel"));
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init_logging(Some("warn"), false);
        init_logging(Some("warn"), true);
    }

    #[test]
    fn test_capture_logs_records_fields() {
        let (value, logs) = capture_logs(|| {
            tracing::warn!(item_id = 7, "Something odd");
            42
        });
        assert_eq!(value, 42);
        assert!(logs.contains("WARN"));
        assert!(logs.contains("item_id=7"));
        assert!(logs.contains("Something odd"));
    }
}
