use std::{
    path::Path,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};

use crate::{
    config::Settings,
    pipeline::{
        DemoClassifier, FeedbackSession, FrameSink, FrameSource, ImageDirSource, OverlayAssets,
        OverlayCompositor, SessionExit, SessionSettings, SharedClassifier, SyntheticSource,
        ViewerChannel, ViewerCommand, compositor::OverlayText, shared, worker::InferenceWorker,
    },
    types::{Classification, Frame, PostureKind},
};

const SYNTHETIC_SIZE: (u32, u32) = (640, 480);

fn viewer_channel(settings: &Settings) -> ViewerChannel {
    ViewerChannel::new(
        ViewerCommand::ffplay(settings.viewer.program.clone(), &settings.viewer.window_title),
        settings.viewer_startup_grace(),
    )
}

fn compositor(settings: &Settings) -> OverlayCompositor {
    OverlayCompositor::new(OverlayAssets::load(&settings.assets), settings.jpeg_quality)
}

fn feedback_session(
    settings: &Settings,
    classifier: SharedClassifier,
) -> FeedbackSession<ViewerChannel> {
    FeedbackSession::new(
        viewer_channel(settings),
        compositor(settings),
        classifier,
        SessionSettings::from_settings(settings),
    )
}

#[cfg(feature = "camera-nokhwa")]
fn build_classifier(settings: &Settings) -> Result<SharedClassifier> {
    use crate::pipeline::CommandClassifier;

    if settings.classifier_command.is_empty() {
        log::warn!("no classifier_command configured, using the demo classifier");
        return Ok(shared(DemoClassifier::new()));
    }
    Ok(shared(CommandClassifier::new(&settings.classifier_command)?))
}

/// Periodic check; a bad verdict opens a feedback session that lasts until the
/// window is closed.
#[cfg(feature = "camera-nokhwa")]
pub fn monitor(settings: &Settings, once: bool) -> Result<()> {
    use crate::pipeline::CameraSource;

    let mut camera = CameraSource::open(settings.camera_index)?;
    let classifier = build_classifier(settings)?;
    let mut monitor = Monitor::new(feedback_session(settings, classifier.clone()), classifier);
    run_monitor(&mut monitor, &mut camera, settings.check_interval(), |_| !once);
    Ok(())
}

#[cfg(not(feature = "camera-nokhwa"))]
pub fn monitor(_settings: &Settings, _once: bool) -> Result<()> {
    bail!("monitor needs camera support; rebuild with the `camera-nokhwa` feature")
}

/// What one monitor check led to.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(not(feature = "camera-nokhwa"), allow(dead_code))]
enum Check {
    PostureOk,
    /// Capture or classification failed, or the classifier could not judge.
    Skipped,
    ViewerUnavailable,
    Feedback(SessionExit),
}

#[cfg_attr(not(feature = "camera-nokhwa"), allow(dead_code))]
struct Monitor<S: FrameSink> {
    session: FeedbackSession<S>,
    classifier: SharedClassifier,
    last_worker: Option<InferenceWorker>,
}

#[cfg_attr(not(feature = "camera-nokhwa"), allow(dead_code))]
impl<S: FrameSink> Monitor<S> {
    fn new(session: FeedbackSession<S>, classifier: SharedClassifier) -> Self {
        Self {
            session,
            classifier,
            last_worker: None,
        }
    }

    /// Nothing in here ends monitoring: every failure is logged and the next
    /// check runs as scheduled.
    fn check<F: FrameSource + ?Sized>(&mut self, source: &mut F) -> Check {
        if let Some(worker) = self.last_worker.take() {
            if !worker.is_finished() {
                log::debug!("previous inference still finishing in the background");
            }
        }

        let (verdict, frame) = match classify(source, &self.classifier) {
            Ok(checked) => checked,
            Err(err) => {
                log::warn!("posture check skipped: {err:#}");
                return Check::Skipped;
            }
        };
        match verdict.kind() {
            PostureKind::Good => {
                log::info!("posture ok: {}", verdict.message());
                return Check::PostureOk;
            }
            PostureKind::Error => {
                log::warn!("classifier could not judge the frame: {}", verdict.message());
                return Check::Skipped;
            }
            PostureKind::Bad => log::info!("bad posture detected, opening feedback window"),
        }

        let report = match self.session.run(source, frame, || true) {
            Ok(report) => report,
            Err(err) => {
                log::warn!("feedback window unavailable: {err:#}");
                return Check::ViewerUnavailable;
            }
        };
        log::info!(
            "feedback closed: {:?}, last verdict {} ({})",
            report.exit,
            report.final_status.kind().label(),
            report.final_status.message()
        );
        if let SessionExit::SourceFailed(reason) = &report.exit {
            log::warn!("camera stopped delivering frames during feedback: {reason}");
        }
        if self.session.sink().is_open() {
            log::debug!("feedback window left open for the next session");
        }

        self.last_worker = Some(report.worker);
        Check::Feedback(report.exit)
    }
}

#[cfg_attr(not(feature = "camera-nokhwa"), allow(dead_code))]
fn run_monitor<S, F>(
    monitor: &mut Monitor<S>,
    source: &mut F,
    check_interval: Duration,
    mut keep_going: impl FnMut(&Check) -> bool,
) where
    S: FrameSink,
    F: FrameSource + ?Sized,
{
    loop {
        let outcome = monitor.check(source);
        if !keep_going(&outcome) {
            return;
        }
        thread::sleep(check_interval);
    }
}

#[cfg_attr(not(feature = "camera-nokhwa"), allow(dead_code))]
fn classify<F: FrameSource + ?Sized>(
    source: &mut F,
    classifier: &SharedClassifier,
) -> Result<(Classification, Frame)> {
    let frame = source.capture_frame().context("failed to capture frame")?;
    let verdict = classifier
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .analyze(&frame)?;
    Ok((verdict, frame))
}

/// One feedback session over demo frames with the cycling demo classifier.
pub fn demo(settings: &Settings, images: Option<&Path>, seconds: Option<u64>) -> Result<()> {
    let mut source: Box<dyn FrameSource> = match images {
        Some(dir) => Box::new(ImageDirSource::open(dir)?),
        None => Box::new(SyntheticSource::new(SYNTHETIC_SIZE.0, SYNTHETIC_SIZE.1)),
    };
    let initial = source.capture_frame()?;

    let mut session = feedback_session(settings, shared(DemoClassifier::new()));
    let status = session.status_handle();
    let mut shown = None;
    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let report = session.run(&mut source, initial, || {
        let current = status.snapshot();
        if shown != Some(current.kind()) {
            log::info!("demo status: {} ({})", current.kind().label(), current.message());
            shown = Some(current.kind());
        }
        deadline.is_none_or(|deadline| Instant::now() < deadline)
    })?;

    log::info!(
        "demo finished: {:?}, {} frame(s) written",
        report.exit,
        report.frames_written
    );
    report.worker.join();
    session.sink_mut().close();

    if let SessionExit::SourceFailed(reason) = report.exit {
        bail!("frame source failed: {reason}");
    }
    Ok(())
}

/// Streams a fixed overlay for `seconds`, then closes the viewer.
pub fn diagnose(settings: &Settings, seconds: u64) -> Result<()> {
    let mut viewer = viewer_channel(settings);
    let compositor = compositor(settings);
    let mut source = SyntheticSource::new(SYNTHETIC_SIZE.0, SYNTHETIC_SIZE.1);

    viewer.open().context("viewer did not start")?;
    log::info!(
        "viewer started (pid {}), streaming diagnostic overlay for {seconds}s",
        viewer.pid().map_or_else(|| "?".to_string(), |pid| pid.to_string())
    );

    let started = Instant::now();
    let duration = Duration::from_secs(seconds);
    let mut frames = 0usize;
    while started.elapsed() < duration {
        let frame = source.capture_frame()?;
        let overlay = OverlayText {
            kind: PostureKind::Good,
            message: "diagnostic overlay",
            raw_output: "diagnose",
            countdown_secs: duration.saturating_sub(started.elapsed()).as_secs_f32(),
        };
        let encoded = compositor.render(&frame, &overlay, settings.canvas_size)?;
        if !viewer.write(&encoded) {
            viewer.close();
            bail!("viewer went away after {frames} frame(s)");
        }
        frames += 1;
        thread::sleep(settings.pump_interval());
    }

    viewer.close();
    log::info!("diagnose ok: {frames} frame(s) delivered");
    Ok(())
}
