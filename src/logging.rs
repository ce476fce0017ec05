//! Log sink setup.
//!
//! Lines go through `tracing-appender`'s non-blocking writer: a bounded,
//! lossy queue drained by a background thread, so emitting a log line never
//! stalls the reactor or a worker. Keep the returned guard alive for the
//! lifetime of the process; dropping it flushes what is still queued.

use std::io;
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

use crate::config::LogConfig;

pub fn init(cfg: &LogConfig) -> Option<WorkerGuard> {
    if !cfg.enabled {
        return None;
    }

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match (&cfg.dir, cfg.queue_size) {
        (Some(dir), 0) => {
            install(tracing_appender::rolling::daily(dir, "kiln.log"), filter);
            None
        }
        (Some(dir), limit) => {
            let appender = tracing_appender::rolling::daily(dir, "kiln.log");
            let (writer, guard) = NonBlockingBuilder::default()
                .buffered_lines_limit(limit)
                .lossy(true)
                .finish(appender);
            install(writer, filter);
            Some(guard)
        }
        (None, 0) => {
            install(io::stdout, filter);
            None
        }
        (None, limit) => {
            let (writer, guard) = NonBlockingBuilder::default()
                .buffered_lines_limit(limit)
                .lossy(true)
                .finish(io::stdout());
            install(writer, filter);
            Some(guard)
        }
    }
}

fn install<W>(writer: W, filter: EnvFilter)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .with_level(true)
        .with_thread_names(true)
        .try_init();

    if result.is_err() {
        // A subscriber is already installed (tests, embedding); keep it.
        tracing::debug!("Global subscriber already set");
    }
}
