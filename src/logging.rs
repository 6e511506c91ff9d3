// 📝 Run Log Sink - tracing subscriber scoped to one reconciliation run
//
// Not installed globally: the orchestrator runs inside
// `tracing::dispatcher::with_default(sink.dispatch(), ..)`, so each run (and
// each test) gets its own log file. Dropping the sink flushes the writer.

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use tracing::Dispatch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub struct RunLogSink {
    dispatch: Dispatch,
    _guard: Option<WorkerGuard>,
}

impl RunLogSink {
    pub fn open(config: &LoggingConfig) -> Result<Self> {
        if let Some(parent) = config.file.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {:?}", parent))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(config.append)
            .truncate(!config.append)
            .open(&config.file)
            .with_context(|| format!("Failed to open log file {:?}", config.file))?;
        let (writer, guard) = tracing_appender::non_blocking(file);

        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&config.level)
                .with_context(|| format!("Invalid log level '{}'", config.level))?,
        };

        let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
        let console_layer = config
            .console
            .then(|| fmt::layer().with_writer(std::io::stderr));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(console_layer);

        Ok(RunLogSink {
            dispatch: Dispatch::new(subscriber),
            _guard: Some(guard),
        })
    }

    /// Discards everything.
    pub fn disabled() -> Self {
        RunLogSink {
            dispatch: Dispatch::none(),
            _guard: None,
        }
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }
}
