//! The feedback session: opens the viewer, starts the inference worker and
//! pumps composited frames into the viewer until the caller stops it or the
//! window goes away.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use thiserror::Error;

use super::{
    classifier::SharedClassifier,
    compositor::{OverlayCompositor, OverlayText},
    source::FrameSource,
    state::{SessionState, StatusHandle},
    viewer::{FrameSink, LaunchError},
    worker::InferenceWorker,
};
use crate::{
    config::{CanvasSize, Settings, ViewerExitPolicy},
    types::{Frame, OverlayStatus},
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to open the feedback window")]
    Launch(#[from] LaunchError),
    #[error("failed to start the inference worker")]
    Worker(#[source] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub canvas: CanvasSize,
    pub inference_interval: Duration,
    pub pump_interval: Duration,
    pub exit_policy: ViewerExitPolicy,
}

impl SessionSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            canvas: settings.canvas_size,
            inference_interval: settings.inference_interval(),
            pump_interval: settings.pump_interval(),
            exit_policy: settings.exit_policy,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionExit {
    /// The caller's continuation predicate returned false.
    Stopped,
    /// A viewer write failed: the window was closed or the process died.
    ViewerClosed,
    /// The frame source returned an error.
    SourceFailed(String),
}

#[derive(Debug)]
pub struct SessionReport {
    pub exit: SessionExit,
    pub frames_written: usize,
    pub final_status: OverlayStatus,
    /// Already asked to stop; join it to wait for an in-flight inference.
    pub worker: InferenceWorker,
}

/// Drives one viewer sink. The sink is owned here and kept across runs, so a
/// window left open by one run is reused by the next.
pub struct FeedbackSession<S: FrameSink> {
    sink: S,
    compositor: OverlayCompositor,
    classifier: SharedClassifier,
    settings: SessionSettings,
    state: Arc<SessionState>,
}

impl<S: FrameSink> FeedbackSession<S> {
    pub fn new(
        sink: S,
        compositor: OverlayCompositor,
        classifier: SharedClassifier,
        settings: SessionSettings,
    ) -> Self {
        Self {
            sink,
            compositor,
            classifier,
            settings,
            state: Arc::new(SessionState::new()),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle::new(self.state.clone())
    }

    /// Runs until `should_continue` returns false, the viewer goes away, or
    /// the frame source fails. Only a failure to start is returned as an error.
    pub fn run<F, C>(
        &mut self,
        source: &mut F,
        initial_frame: Frame,
        mut should_continue: C,
    ) -> Result<SessionReport, SessionError>
    where
        F: FrameSource + ?Sized,
        C: FnMut() -> bool,
    {
        self.sink.open()?;

        let initial_frame = Arc::new(initial_frame);
        let generation = self.state.reset(initial_frame.clone(), Instant::now());

        // Show the window right away instead of waiting for the first result.
        let mut frames_written = 0;
        let initial_status = self.state.status();
        let mut viewer_alive = self.push(&initial_frame, &initial_status);
        if viewer_alive {
            frames_written += 1;
        }

        let worker = InferenceWorker::spawn(
            self.classifier.clone(),
            self.state.clone(),
            generation,
            self.settings.inference_interval,
        )
        .map_err(SessionError::Worker)?;

        let exit = if viewer_alive {
            self.pump(source, &mut should_continue, &mut frames_written)
        } else {
            SessionExit::ViewerClosed
        };
        viewer_alive = exit != SessionExit::ViewerClosed;

        worker.request_stop();
        log::info!("feedback session ended ({exit:?}) after {frames_written} frame(s)");

        if viewer_alive && self.settings.exit_policy == ViewerExitPolicy::Close {
            self.sink.close();
        }

        Ok(SessionReport {
            exit,
            frames_written,
            final_status: self.state.status(),
            worker,
        })
    }

    fn pump<F, C>(
        &mut self,
        source: &mut F,
        should_continue: &mut C,
        frames_written: &mut usize,
    ) -> SessionExit
    where
        F: FrameSource + ?Sized,
        C: FnMut() -> bool,
    {
        while should_continue() {
            let frame = match source.capture_frame() {
                Ok(frame) => Arc::new(frame),
                Err(err) => {
                    log::error!("frame capture failed, ending feedback session: {err:#}");
                    return SessionExit::SourceFailed(format!("{err:#}"));
                }
            };

            let status = self.state.exchange(frame.clone());
            if !self.push(&frame, &status) {
                return SessionExit::ViewerClosed;
            }
            *frames_written += 1;

            thread::sleep(self.settings.pump_interval);
        }
        SessionExit::Stopped
    }

    /// Composites and writes one frame; false once the viewer is gone.
    fn push(&mut self, frame: &Frame, status: &OverlayStatus) -> bool {
        let overlay = OverlayText {
            kind: status.kind(),
            message: status.message(),
            raw_output: status.raw_output(),
            countdown_secs: status.countdown_secs(Instant::now()),
        };
        match self.compositor.render(frame, &overlay, self.settings.canvas) {
            Ok(encoded) => self.sink.write(&encoded),
            Err(err) => {
                log::warn!("failed to render overlay frame: {err:#}");
                true
            }
        }
    }
}
