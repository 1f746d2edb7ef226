//! The external viewer window: an `ffplay`-style process reading a motion
//! JPEG stream from its stdin. Its exit, or a failed pipe write, is the only
//! signal we get back from it.

use std::{
    env,
    ffi::OsString,
    io::{BufRead, BufReader, Read, Write},
    path::PathBuf,
    process::{Child, ChildStdin, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Sender, TrySendError, bounded};
use thiserror::Error;

const STARTUP_POLL_STEP: Duration = Duration::from_millis(10);
/// Frames queued for the pipe. When the viewer stops reading, newer frames
/// are dropped instead of blocking the caller.
const PENDING_FRAMES: usize = 1;
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_millis(150);

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("viewer program `{program}` was not found on PATH; install ffmpeg/ffplay")]
    ViewerNotFound {
        program: String,
        #[source]
        source: which::Error,
    },
    #[error(
        "no display available (DISPLAY/WAYLAND_DISPLAY are unset); headless mode is not supported"
    )]
    NoDisplay,
    #[error("failed to spawn viewer `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("viewer stdin could not be opened")]
    StdinUnavailable,
    #[error("viewer exited during startup ({status}):\n{stderr}")]
    ExitedDuringStartup { status: ExitStatus, stderr: String },
}

/// Where encoded overlay frames go. Implemented by [`ViewerChannel`] for the
/// real window and by in-memory sinks in tests.
pub trait FrameSink: Send {
    /// Opens the sink. A no-op if it is already open.
    fn open(&mut self) -> Result<(), LaunchError>;

    /// Pushes one encoded frame. `false` means the sink is gone and stays
    /// gone until the next [`FrameSink::open`]. Must not block on a slow
    /// reader; dropping the frame is fine.
    fn write(&mut self, encoded: &[u8]) -> bool;

    /// Best-effort shutdown; idempotent and infallible.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Program, arguments and environment used to launch the viewer.
#[derive(Clone, Debug)]
pub struct ViewerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub require_display: bool,
}

impl ViewerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            require_display: false,
        }
    }

    #[cfg(test)]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `ffplay` reading MJPEG from stdin with minimal buffering, dropping late
    /// frames, in an always-on-top window titled `title`.
    pub fn ffplay(program: impl Into<String>, title: &str) -> Self {
        let args = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-fflags",
            "nobuffer",
            "-flags",
            "low_delay",
            "-framedrop",
            "-window_title",
            title,
            "-f",
            "mjpeg",
            "-i",
            "pipe:0",
            "-alwaysontop",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        let mut envs = Vec::new();
        if env::var_os("DISPLAY").is_some() && env::var_os("SDL_VIDEODRIVER").is_none() {
            envs.push(("SDL_VIDEODRIVER".to_string(), "x11".to_string()));
        }
        for (key, value) in [("SDL_VIDEO_WINDOW_POS", "0,0"), ("SDL_VIDEO_CENTERED", "0")] {
            if env::var_os(key).is_none() {
                envs.push((key.to_string(), value.to_string()));
            }
        }

        Self {
            program: program.into(),
            args,
            envs,
            require_display: cfg!(all(unix, not(target_os = "macos"))),
        }
    }
}

/// True when a graphical session is reachable.
pub fn display_available() -> bool {
    if cfg!(all(unix, not(target_os = "macos"))) {
        let set = |key: &str| env::var_os(key).is_some_and(|v: OsString| !v.is_empty());
        set("DISPLAY") || set("WAYLAND_DISPLAY")
    } else {
        true
    }
}

struct ViewerProcess {
    child: Child,
    frames: Option<Sender<Vec<u8>>>,
}

impl ViewerProcess {
    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    fn shutdown(mut self) {
        // Closing the queue ends the writer, which lets the viewer see EOF
        // before it is killed.
        drop(self.frames.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Owns at most one live viewer process.
///
/// `write` failures and `close` latch the channel: it reports `false` without
/// touching the OS until `open` is called again, so a window the user closed
/// is never reopened behind their back.
pub struct ViewerChannel {
    command: ViewerCommand,
    startup_grace: Duration,
    process: Option<ViewerProcess>,
    latched: bool,
}

impl ViewerChannel {
    pub fn new(command: ViewerCommand, startup_grace: Duration) -> Self {
        Self {
            command,
            startup_grace,
            process: None,
            latched: false,
        }
    }

    #[cfg(test)]
    pub fn is_latched(&self) -> bool {
        self.latched
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.child.id())
    }

    fn resolve_program(&self) -> Result<PathBuf, LaunchError> {
        which::which(&self.command.program).map_err(|source| LaunchError::ViewerNotFound {
            program: self.command.program.clone(),
            source,
        })
    }

    fn spawn(&self) -> Result<ViewerProcess, LaunchError> {
        let program = self.resolve_program()?;
        if self.command.require_display && !display_available() {
            return Err(LaunchError::NoDisplay);
        }

        let mut child = Command::new(&program)
            .args(&self.command.args)
            .envs(self.command.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: self.command.program.clone(),
                source,
            })?;

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(LaunchError::StdinUnavailable);
        };

        if let Some(status) = wait_for_early_exit(&mut child, self.startup_grace) {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(LaunchError::ExitedDuringStartup {
                status,
                stderr: stderr.trim_end().to_string(),
            });
        }

        let frames = match spawn_writer(stdin) {
            Ok(frames) => frames,
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(LaunchError::Spawn {
                    program: self.command.program.clone(),
                    source,
                });
            }
        };

        if let Some(pipe) = child.stderr.take() {
            forward_stderr(pipe);
        }

        Ok(ViewerProcess {
            child,
            frames: Some(frames),
        })
    }

    fn latch_closed(&mut self) {
        self.latched = true;
        if let Some(process) = self.process.take() {
            process.shutdown();
        }
    }
}

impl FrameSink for ViewerChannel {
    fn open(&mut self) -> Result<(), LaunchError> {
        if let Some(process) = self.process.as_mut() {
            if !process.has_exited() {
                return Ok(());
            }
            log::debug!("viewer process already exited, starting a new one");
            if let Some(process) = self.process.take() {
                process.shutdown();
            }
        }

        let process = self.spawn()?;
        log::debug!("viewer started (pid={})", process.child.id());
        self.process = Some(process);
        self.latched = false;
        Ok(())
    }

    fn write(&mut self, encoded: &[u8]) -> bool {
        if self.latched {
            return false;
        }
        let Some(process) = self.process.as_mut() else {
            return false;
        };
        if process.has_exited() {
            log::info!("viewer window closed");
            self.latch_closed();
            return false;
        }
        let Some(frames) = process.frames.as_ref() else {
            self.latch_closed();
            return false;
        };

        match frames.try_send(encoded.to_vec()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::trace!("viewer is not keeping up, dropping frame");
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                self.latch_closed();
                false
            }
        }
    }

    fn close(&mut self) {
        if self.process.is_some() {
            log::debug!("closing viewer");
        }
        self.latch_closed();
    }

    fn is_open(&self) -> bool {
        !self.latched && self.process.is_some()
    }
}

impl Drop for ViewerChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn wait_for_early_exit(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + grace;
    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return Some(status);
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        thread::sleep(STARTUP_POLL_STEP.min(deadline - now));
    }
}

/// Feeds queued frames into the viewer's stdin on its own thread, so a
/// viewer that stops reading cannot stall the caller. The thread exits on
/// the first pipe error, which disconnects the queue.
fn spawn_writer(mut stdin: ChildStdin) -> std::io::Result<Sender<Vec<u8>>> {
    let (frames_tx, frames_rx) = bounded::<Vec<u8>>(PENDING_FRAMES);
    thread::Builder::new()
        .name("viewer-writer".to_string())
        .spawn(move || {
            for frame in frames_rx {
                if let Err(err) = stdin.write_all(&frame).and_then(|()| stdin.flush()) {
                    log::info!("viewer pipe closed: {err}");
                    break;
                }
            }
        })?;
    Ok(frames_tx)
}

fn forward_stderr(pipe: impl Read + Send + 'static) {
    let spawned = thread::Builder::new()
        .name("viewer-stderr".to_string())
        .spawn(move || {
            for line in BufReader::new(pipe).lines() {
                match line {
                    Ok(line) if !line.trim().is_empty() => log::debug!("viewer: {line}"),
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });
    if let Err(err) = spawned {
        log::warn!("failed to start viewer stderr reader: {err}");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> ViewerCommand {
        ViewerCommand::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn missing_viewer_is_a_launch_error() {
        let mut channel = ViewerChannel::new(
            ViewerCommand::new("slouchless-viewer-that-does-not-exist"),
            DEFAULT_STARTUP_GRACE,
        );
        let err = channel.open().unwrap_err();
        assert!(matches!(err, LaunchError::ViewerNotFound { .. }));
        assert!(!channel.is_open());
        assert!(channel.pid().is_none());
        assert!(!channel.write(b"frame"));
    }

    #[test]
    fn early_exit_reports_stderr() {
        let mut channel = ViewerChannel::new(
            shell("echo 'no video device' >&2; exit 3"),
            Duration::from_millis(500),
        );
        match channel.open() {
            Err(LaunchError::ExitedDuringStartup { status, stderr }) => {
                assert_eq!(status.code(), Some(3));
                assert!(stderr.contains("no video device"), "stderr was {stderr:?}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!channel.is_open());
    }

    #[test]
    fn display_is_checked_when_required() {
        let mut command = ViewerCommand::new("cat");
        command.require_display = true;
        let mut channel = ViewerChannel::new(command, Duration::from_millis(20));
        match channel.open() {
            Ok(()) => assert!(display_available()),
            Err(LaunchError::NoDisplay) => assert!(!display_available()),
            Err(other) => panic!("unexpected error: {other}"),
        }
        channel.close();
    }

    #[test]
    fn writes_reach_a_live_viewer_and_open_is_idempotent() {
        let mut channel = ViewerChannel::new(shell("cat >/dev/null"), Duration::from_millis(30));
        channel.open().unwrap();
        let pid = channel.pid();
        channel.open().unwrap();
        assert_eq!(channel.pid(), pid);

        for _ in 0..3 {
            assert!(channel.write(&[0xFF, 0xD8, 0xFF, 0xD9]));
        }
        channel.close();
        assert!(!channel.is_open());
    }

    #[test]
    fn failed_write_latches_until_reopened() {
        let mut channel = ViewerChannel::new(shell("sleep 0.2"), Duration::from_millis(20));
        channel.open().unwrap();
        thread::sleep(Duration::from_millis(600));

        assert!(!channel.write(b"late frame"));
        assert!(channel.is_latched());
        for _ in 0..3 {
            assert!(!channel.write(b"still closed"));
        }

        channel.open().unwrap();
        assert!(channel.is_open());
        channel.close();
    }

    #[test]
    fn stalled_viewer_never_blocks_writes() {
        // Alive but never reads stdin, so the pipe fills up.
        let mut channel = ViewerChannel::new(shell("sleep 5"), Duration::from_millis(20));
        channel.open().unwrap();

        let frame = vec![0xAB; 256 * 1024];
        let started = Instant::now();
        for _ in 0..20 {
            assert!(channel.write(&frame));
        }
        assert!(started.elapsed() < Duration::from_secs(2));

        let closing = Instant::now();
        channel.close();
        assert!(closing.elapsed() < Duration::from_secs(2));
        assert!(!channel.is_open());
    }

    #[test]
    fn broken_pipe_latches_while_process_lives() {
        // Closes its stdin but keeps running.
        let mut channel =
            ViewerChannel::new(shell("exec 0<&-; sleep 5"), Duration::from_millis(50));
        channel.open().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while channel.write(b"frame") {
            assert!(Instant::now() < deadline, "broken pipe was never reported");
            thread::sleep(Duration::from_millis(10));
        }
        assert!(channel.is_latched());
        assert!(!channel.write(b"frame"));
        channel.close();
    }

    #[test]
    fn close_twice_is_harmless() {
        let mut channel = ViewerChannel::new(shell("cat >/dev/null"), Duration::from_millis(20));
        channel.open().unwrap();
        channel.close();
        assert!(!channel.is_open());
        channel.close();
        assert!(!channel.is_open());
        assert!(!channel.write(b"after close"));

        let mut never_opened = ViewerChannel::new(shell("cat"), DEFAULT_STARTUP_GRACE);
        never_opened.close();
        never_opened.close();
        assert!(!never_opened.is_open());
    }

    #[test]
    fn ffplay_command_requests_low_latency_on_top_window() {
        let command = ViewerCommand::ffplay("ffplay", "Live feedback");
        let joined = command.args.join(" ");
        assert!(joined.contains("-fflags nobuffer"));
        assert!(joined.contains("-framedrop"));
        assert!(joined.contains("-f mjpeg -i pipe:0"));
        assert!(joined.contains("-alwaysontop"));
        let title = command.args.iter().position(|a| a == "-window_title").unwrap();
        assert_eq!(command.args[title + 1], "Live feedback");
    }
}
