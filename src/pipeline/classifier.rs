use std::{
    io::Write,
    process::{Command, Stdio},
    sync::{Arc, Mutex},
    thread,
    time::Instant,
};

use anyhow::{Context, Result, anyhow, bail};
use image::RgbaImage;

use crate::types::{Classification, Frame, PostureKind};

pub const SLOUCH_MESSAGE: &str = "You are slouching! Sit up straight!";
pub const GOOD_MESSAGE: &str = "good posture";

/// A posture classifier backend: a local model, a remote API, a script.
/// Calls may be slow and may fail; the caller turns failures into an error
/// status.
pub trait Classifier: Send + 'static {
    fn analyze(&mut self, frame: &Frame) -> Result<Classification>;
}

/// Shared so a worker from a previous session still finishing its last call
/// serializes with the next session's worker.
pub type SharedClassifier = Arc<Mutex<dyn Classifier>>;

pub fn shared<C: Classifier>(classifier: C) -> SharedClassifier {
    Arc::new(Mutex::new(classifier))
}

/// Interprets a model reply that starts with `Yes`, `No` or `Error: <reason>`.
pub fn parse_reply(reply: &str) -> Classification {
    let raw = reply.trim();
    let cleaned = raw.trim_end_matches('.').trim();
    let lowered = cleaned.to_ascii_lowercase();

    if let Some(rest) = lowered.strip_prefix("error") {
        let reason = cleaned[cleaned.len() - rest.len()..]
            .trim_start_matches(':')
            .trim();
        let reason = if reason.is_empty() {
            "model could not judge the frame"
        } else {
            reason
        };
        return Classification::new(PostureKind::Error, reason, raw);
    }
    if starts_with_word(&lowered, "yes") {
        return Classification::new(PostureKind::Bad, SLOUCH_MESSAGE, raw);
    }
    if starts_with_word(&lowered, "no") {
        return Classification::new(PostureKind::Good, GOOD_MESSAGE, raw);
    }

    let shown: String = raw.chars().take(40).collect();
    Classification::new(
        PostureKind::Error,
        format!("unrecognized model reply: {shown:?}"),
        raw,
    )
}

fn starts_with_word(text: &str, word: &str) -> bool {
    text.strip_prefix(word)
        .is_some_and(|rest| rest.chars().next().is_none_or(|c| !c.is_alphanumeric()))
}

/// Runs an external command per frame: the frame goes to its stdin as JPEG,
/// its stdout is parsed with [`parse_reply`].
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
}

impl CommandClassifier {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("classifier command is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Classifier for CommandClassifier {
    fn analyze(&mut self, frame: &Frame) -> Result<Classification> {
        let jpeg = frame_to_jpeg(frame)?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start classifier `{}`", self.program))?;

        // Feed stdin from a separate thread so a chatty child cannot deadlock us.
        let stdin = child.stdin.take();
        let feeder = thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(&jpeg);
            }
        });

        let output = child
            .wait_with_output()
            .context("failed to collect classifier output")?;
        let _ = feeder.join();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "classifier `{}` failed ({}): {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }
        let reply = String::from_utf8_lossy(&output.stdout);
        Ok(parse_reply(&reply))
    }
}

fn frame_to_jpeg(frame: &Frame) -> Result<Vec<u8>> {
    let rgba = RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;
    let rgb = image::DynamicImage::ImageRgba8(rgba).to_rgb8();
    crate::pipeline::compositor::encode_jpeg(&rgb, 90)
}

/// Cycles good, bad and error every two seconds. No model involved.
pub struct DemoClassifier {
    started: Instant,
}

impl DemoClassifier {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for DemoClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for DemoClassifier {
    fn analyze(&mut self, _frame: &Frame) -> Result<Classification> {
        let phase = (self.started.elapsed().as_secs() / 2) % 3;
        Ok(match phase {
            0 => Classification::good(GOOD_MESSAGE).with_raw_output("No"),
            1 => Classification::bad("bad posture!").with_raw_output("Yes"),
            _ => Classification::error("demo error (for overlay testing)")
                .with_raw_output("Error: demo"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yes_no_and_error_replies() {
        let bad = parse_reply(" Yes.\n");
        assert_eq!(bad.kind(), PostureKind::Bad);
        assert_eq!(bad.message(), SLOUCH_MESSAGE);
        assert_eq!(bad.raw_output(), "Yes.");

        let good = parse_reply("no");
        assert_eq!(good.kind(), PostureKind::Good);

        let err = parse_reply("Error: person not visible");
        assert_eq!(err.kind(), PostureKind::Error);
        assert_eq!(err.message(), "person not visible");

        let bare = parse_reply("ERROR");
        assert_eq!(bare.kind(), PostureKind::Error);
        assert!(!bare.message().is_empty());
    }

    #[test]
    fn unrecognized_replies_become_errors() {
        for reply in ["", "maybe", "nothing to report", "yesterday"] {
            let parsed = parse_reply(reply);
            assert_eq!(parsed.kind(), PostureKind::Error, "reply {reply:?}");
            assert!(parsed.message().starts_with("unrecognized model reply"));
        }
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandClassifier::new(&[]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn command_classifier_parses_stdout() {
        let mut classifier = CommandClassifier::new(&[
            "sh".to_string(),
            "-c".to_string(),
            "cat >/dev/null; echo Yes".to_string(),
        ])
        .unwrap();
        let result = classifier.analyze(&Frame::solid(8, 8, [1, 2, 3])).unwrap();
        assert_eq!(result.kind(), PostureKind::Bad);
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_an_error() {
        let mut classifier = CommandClassifier::new(&[
            "sh".to_string(),
            "-c".to_string(),
            "cat >/dev/null; echo boom >&2; exit 1".to_string(),
        ])
        .unwrap();
        let err = classifier.analyze(&Frame::solid(8, 8, [1, 2, 3])).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn demo_classifier_starts_good() {
        let mut demo = DemoClassifier::new();
        let result = demo.analyze(&Frame::solid(1, 1, [0, 0, 0])).unwrap();
        assert_eq!(result.kind(), PostureKind::Good);
    }
}
