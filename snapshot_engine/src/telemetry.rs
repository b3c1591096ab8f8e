//! Progress reporting (spec §5 "progress worker", §9 "Global mutable
//! state"). Spec §9 explicitly calls out that the source relies on
//! thread-local slots for this, and directs the target design to pass a
//! handle explicitly through constructors instead -- so `Telemetry` is a
//! plain value threaded through the orchestrator, never a process-global.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crate::{config::ProgressCallback, queue::ByteQueue};

/// Interval at which the progress worker samples queue occupancy (spec §5:
/// "wakes periodically (~2 s)").
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// A handle to the optional progress-reporting worker. Dropping/joining it
/// is the orchestrator's responsibility.
pub struct Telemetry {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Telemetry {
    /// Starts the progress worker if `enabled` and a callback is supplied;
    /// otherwise returns a no-op handle.
    pub fn spawn<T: Send + 'static>(
        enabled: bool,
        on_progress: Option<ProgressCallback>,
        queue: Arc<ByteQueue<T>>,
    ) -> Self {
        let (Some(callback), true) = (on_progress, enabled) else {
            return Self {
                stop: Arc::new(AtomicBool::new(true)),
                handle: None,
            };
        };

        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = stop.clone();
        let handle = thread::spawn(move || {
            while !worker_stop.load(Ordering::Relaxed) {
                thread::sleep(PROGRESS_INTERVAL);
                if worker_stop.load(Ordering::Relaxed) {
                    break;
                }
                callback(crate::config::ProgressUpdate {
                    queue_bytes: queue.size_bytes(),
                });
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Signals the worker to stop and joins it. Idempotent.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
