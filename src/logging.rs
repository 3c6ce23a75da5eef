//! Logging setup and phase output writers
//!
//! Phase containers produce line-oriented output. Lines are handed to a
//! [`LineWriter`]; the default writers forward them to `tracing`.

use std::fmt;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Sink for one line of phase output
pub type LineWriter = Arc<dyn Fn(&str) + Send + Sync>;

/// Writer that emits each line as an info event
pub fn info_writer() -> LineWriter {
    Arc::new(|line: &str| tracing::info!(target: "phase", "{}", line))
}

/// Writer that emits each line as an error event
pub fn error_writer() -> LineWriter {
    Arc::new(|line: &str| tracing::error!(target: "phase", "{}", line))
}

/// Wrap a writer so every line is prefixed with `[prefix] `
pub fn with_prefix(writer: LineWriter, prefix: &str) -> LineWriter {
    let prefix = format!("[{}] ", prefix);
    Arc::new(move |line: &str| writer(&format!("{}{}", prefix, line)))
}

/// Logger capability handed to a lifecycle execution
#[derive(Clone)]
pub struct Logger {
    verbose: bool,
    info: LineWriter,
    error: LineWriter,
}

impl Logger {
    /// Logger writing phase output through `tracing`
    pub fn new(verbose: bool) -> Self {
        Self::with_writers(verbose, info_writer(), error_writer())
    }

    pub fn with_writers(verbose: bool, info: LineWriter, error: LineWriter) -> Self {
        Self {
            verbose,
            info,
            error,
        }
    }

    /// Whether phases should run with `-log-level debug`
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn info_writer(&self) -> LineWriter {
        Arc::clone(&self.info)
    }

    pub fn error_writer(&self) -> LineWriter {
        Arc::clone(&self.error)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

/// Install the global tracing subscriber.
///
/// 0 = warn, 1 = info, 2+ = debug. `format` selects `text` or `json` output.
pub fn init(verbosity: u8, format: &str) {
    let filter = match verbosity {
        0 => EnvFilter::new("pack_exec=warn,phase=info"),
        1 => EnvFilter::new("pack_exec=info,phase=info"),
        _ => EnvFilter::new("pack_exec=debug,phase=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time();

    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
