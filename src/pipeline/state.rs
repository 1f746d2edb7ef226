use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Instant,
};

use crate::types::{Frame, OverlayStatus};

struct Shared {
    generation: u64,
    latest_frame: Option<Arc<Frame>>,
    status: OverlayStatus,
}

/// The only state shared between the frame pump and the inference worker:
/// the most recent frame and the most recent completed status, both behind
/// one lock that is held just long enough to copy values in or out.
///
/// Every [`SessionState::reset`] starts a new generation. Results published
/// for an older generation are dropped, so a worker left over from a
/// previous session cannot overwrite the next session's status.
pub struct SessionState {
    inner: Mutex<Shared>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Shared {
                generation: 0,
                latest_frame: None,
                status: OverlayStatus::analyzing(Instant::now()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // Values are only ever replaced whole, so a poisoned lock still holds
        // a consistent snapshot.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts a new session: drops the previous frame, shows "analyzing" and
    /// returns the generation the session's worker must publish with.
    pub fn reset(&self, initial_frame: Arc<Frame>, now: Instant) -> u64 {
        let mut shared = self.lock();
        shared.generation += 1;
        shared.latest_frame = Some(initial_frame);
        shared.status = OverlayStatus::analyzing(now);
        shared.generation
    }

    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    #[cfg(test)]
    pub fn push_frame(&self, frame: Arc<Frame>) {
        self.lock().latest_frame = Some(frame);
    }

    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.lock().latest_frame.clone()
    }

    /// Stores `status` if `generation` is still current; false if it is stale.
    pub fn publish(&self, generation: u64, status: OverlayStatus) -> bool {
        let mut shared = self.lock();
        if shared.generation != generation {
            return false;
        }
        shared.status = status;
        true
    }

    pub fn status(&self) -> OverlayStatus {
        self.lock().status.clone()
    }

    /// Stores `frame` and returns the current status in one lock acquisition.
    pub fn exchange(&self, frame: Arc<Frame>) -> OverlayStatus {
        let mut shared = self.lock();
        shared.latest_frame = Some(frame);
        shared.status.clone()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a session's status for observers outside the pipeline.
#[derive(Clone)]
pub struct StatusHandle {
    state: Arc<SessionState>,
}

impl StatusHandle {
    pub fn new(state: Arc<SessionState>) -> Self {
        Self { state }
    }

    pub fn snapshot(&self) -> OverlayStatus {
        self.state.status()
    }
}
