//! Structured decoder logs, enabled by the `trace` feature.
//!
//! File name and default filter come from the `[trace]` settings section;
//! `RUST_LOG` overrides the filter.

use std::path::{Path, PathBuf};

use mt_core::settings::settings;

/// Where `init_tracing(log_dir)` writes.
pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(&settings().trace.file_name)
}

/// Install a JSON-lines subscriber writing to `log_file_path(log_dir)`.
/// Only the first call in a process has an effect.
#[cfg(feature = "trace")]
pub fn init_tracing(log_dir: &Path) {
    use std::sync::Once;

    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::EnvFilter;

    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let trace = &settings().trace;
        let appender = tracing_appender::rolling::never(log_dir, &trace.file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        // decoding runs for the life of the process
        std::mem::forget(guard);

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&trace.filter));
        tracing_subscriber::fmt()
            .json()
            .with_writer(writer)
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_env_filter(filter)
            .init();
        tracing::debug!(file = %log_file_path(log_dir).display(), "decoder tracing enabled");
    });
}

#[cfg(not(feature = "trace"))]
pub fn init_tracing(_log_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_lives_in_the_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_file_path(dir.path());
        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some(settings().trace.file_name.as_str())
        );
    }

    #[test]
    fn init_is_callable_twice() {
        let dir = tempfile::tempdir().unwrap();
        init_tracing(dir.path());
        init_tracing(dir.path());
    }
}
