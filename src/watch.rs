//! Watch Loop - Directory Event Source
//!
//! Consumes creation events for a single directory, non-recursive,
//! filters by the configured image extension, and feeds each new file
//! to the pipeline. A failed job is isolated: the loop reports it and
//! keeps serving the next event unless `halt_on_error` is set. The
//! stop flag is checked only at job boundaries so a job always ends in
//! a well-defined terminal state.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use notify::{EventKind, RecursiveMode, Watcher};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use crate::pipeline::{JobError, PublishPipeline};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch setup failed: {0}")]
    Notify(#[from] notify::Error),

    #[error("halted on failed job {filename}: {source}")]
    Halted { filename: String, source: JobError },
}

const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Loop directive after a batch of created paths has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Run the watch loop until the stop flag is raised or, with
/// `halt_on_error`, the first job failure.
pub fn run(
    pipeline: &mut PublishPipeline,
    watch_dir: &Path,
    extension: &str,
    halt_on_error: bool,
    stop: &AtomicBool,
) -> Result<(), WatchError> {
    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx)?;
    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
    tracing::info!(dir = %watch_dir.display(), "watching for new images");

    loop {
        if stop.load(Ordering::SeqCst) {
            tracing::info!("stop requested, leaving watch loop");
            return Ok(());
        }

        let event = match rx.recv_timeout(POLL_TIMEOUT) {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "watch event error");
                continue;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        };
        if !matches!(event.kind, EventKind::Create(_)) {
            continue;
        }

        match handle_created(pipeline, &event.paths, extension, halt_on_error, stop)? {
            Flow::Continue => {}
            Flow::Stop => {
                tracing::info!("stop requested, leaving watch loop");
                return Ok(());
            }
        }
    }
}

/// Feed newly created paths through the pipeline, one job at a time.
/// A failed job is logged and skipped unless `halt_on_error` is set,
/// in which case it is fatal for the loop. The stop flag is honored
/// only between jobs so a running job always reaches a terminal state.
pub fn handle_created(
    pipeline: &mut PublishPipeline,
    paths: &[PathBuf],
    extension: &str,
    halt_on_error: bool,
    stop: &AtomicBool,
) -> Result<Flow, WatchError> {
    for path in paths {
        if path.is_dir() || !matches_extension(path, extension) {
            continue;
        }
        tracing::info!(file = %path.display(), "new file detected");

        let mut rng = StdRng::from_entropy();
        match pipeline.process_file(path, &mut rng) {
            Ok(entry) => {
                tracing::info!(content_id = %entry.content_id, "job complete");
            }
            Err(e) => {
                tracing::error!(
                    file = %path.display(),
                    error = %e,
                    "job failed, original left in watch folder for retry"
                );
                if halt_on_error {
                    let filename = path
                        .file_name()
                        .and_then(OsStr::to_str)
                        .unwrap_or("<unnamed>")
                        .to_string();
                    return Err(WatchError::Halted {
                        filename,
                        source: e,
                    });
                }
            }
        }

        // Job boundary: the only legal cancellation point.
        if stop.load(Ordering::SeqCst) {
            return Ok(Flow::Stop);
        }
    }
    Ok(Flow::Continue)
}

fn matches_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map_or(false, |ext| ext.eq_ignore_ascii_case(extension))
}
