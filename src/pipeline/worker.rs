use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, bounded};

use super::{classifier::SharedClassifier, state::SessionState};
use crate::types::{Classification, OverlayStatus};

/// Upper bound on a single idle sleep while waiting for the next inference.
pub const IDLE_POLL: Duration = Duration::from_millis(50);

/// Cooperative stop flag. Sleeping through [`StopSignal::sleep`] wakes up as
/// soon as a stop is requested.
#[derive(Clone, Debug)]
pub struct StopSignal {
    stop: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            wake_tx,
            wake_rx,
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.wake_tx.try_send(());
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Sleeps up to `timeout`; returns true if a stop was requested.
    pub fn sleep(&self, timeout: Duration) -> bool {
        if self.is_stop_requested() {
            return true;
        }
        let _ = self.wake_rx.recv_timeout(timeout);
        self.is_stop_requested()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the background inference loop of one session.
#[derive(Debug)]
pub struct InferenceWorker {
    stop: StopSignal,
    handle: Option<thread::JoinHandle<()>>,
}

impl InferenceWorker {
    /// Starts the loop for the session `generation` of `state`.
    pub fn spawn(
        classifier: SharedClassifier,
        state: Arc<SessionState>,
        generation: u64,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let stop = StopSignal::new();
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("inference-worker".to_string())
            .spawn(move || run_worker_loop(classifier, state, generation, interval, stop_flag))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Asks the loop to finish; does not wait for an in-flight classifier call.
    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_stop_requested()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Requests a stop and waits for the thread to exit.
    pub fn join(mut self) {
        self.stop.request_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("inference worker panicked");
            }
        }
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        // Never block here: the classifier may be mid-call for seconds.
        self.stop.request_stop();
    }
}

fn run_worker_loop(
    classifier: SharedClassifier,
    state: Arc<SessionState>,
    generation: u64,
    interval: Duration,
    stop: StopSignal,
) {
    let mut last_completed: Option<Instant> = None;

    while !stop.is_stop_requested() {
        if let Some(last) = last_completed {
            let elapsed = last.elapsed();
            if elapsed < interval {
                stop.sleep((interval - elapsed).min(IDLE_POLL));
                continue;
            }
        }

        let Some(frame) = state.latest_frame() else {
            stop.sleep(IDLE_POLL);
            continue;
        };

        let started = Instant::now();
        let outcome = {
            let mut classifier = classifier
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            panic::catch_unwind(AssertUnwindSafe(|| classifier.analyze(&frame)))
        };
        let finished = Instant::now();
        last_completed = Some(finished);

        if stop.is_stop_requested() {
            log::debug!("inference finished after stop was requested, discarding result");
            break;
        }

        let classification = match outcome {
            Ok(Ok(classification)) => {
                log::debug!(
                    "inference took {:?}: {} ({})",
                    finished - started,
                    classification.kind().label(),
                    classification.message()
                );
                classification
            }
            Ok(Err(err)) => {
                log::warn!("posture inference failed: {err:#}");
                Classification::error(format!("{err:#}"))
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("posture classifier panicked: {reason}");
                Classification::error(format!("classifier panicked: {reason}"))
            }
        };

        let status = OverlayStatus::completed(classification, finished + interval);
        if !state.publish(generation, status) {
            log::debug!("session {generation} was superseded, discarding result");
            break;
        }
    }

    log::debug!("inference worker stopped");
}
