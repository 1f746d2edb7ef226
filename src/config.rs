use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

use crate::pipeline::viewer::DEFAULT_STARTUP_GRACE;

const MIN_INFERENCE_INTERVAL_MS: u64 = 50;
/// Slowest accepted preview rate: one frame every ten seconds.
const MIN_PREVIEW_FPS: f32 = 0.1;
const MAX_PUMP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for CanvasSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Accepts `640x480`, `640,480` and `640 480`.
impl FromStr for CanvasSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let parts: Vec<&str> = s
            .split(|c: char| c == 'x' || c == 'X' || c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .collect();
        let [w, h] = parts.as_slice() else {
            bail!("invalid size {s:?}, expected e.g. 640x480");
        };
        let width: u32 = w
            .parse()
            .with_context(|| format!("invalid width in size {s:?}"))?;
        let height: u32 = h
            .parse()
            .with_context(|| format!("invalid height in size {s:?}"))?;
        if width == 0 || height == 0 {
            bail!("size {s:?} must be non-zero in both dimensions");
        }
        Ok(Self { width, height })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CanvasSizeRepr {
    Text(String),
    Pair([u32; 2]),
}

impl<'de> Deserialize<'de> for CanvasSize {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match CanvasSizeRepr::deserialize(deserializer)? {
            CanvasSizeRepr::Text(text) => text.parse().map_err(serde::de::Error::custom),
            CanvasSizeRepr::Pair([width, height]) if width > 0 && height > 0 => {
                Ok(CanvasSize { width, height })
            }
            CanvasSizeRepr::Pair(_) => Err(serde::de::Error::custom(
                "size must be non-zero in both dimensions",
            )),
        }
    }
}

/// What happens to the viewer window once a session's pump loop ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewerExitPolicy {
    #[default]
    LeaveOpen,
    Close,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
    pub dir: PathBuf,
    pub good_font: String,
    pub alert_font: String,
    pub good_icon: String,
    pub bad_icon: String,
    pub error_icon: String,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("assets"),
            good_font: "Honk-Regular.ttf".to_string(),
            alert_font: "RubikGlitch-Regular.ttf".to_string(),
            good_icon: "good.png".to_string(),
            bad_icon: "bad.png".to_string(),
            error_icon: "error.png".to_string(),
        }
    }
}

impl AssetSettings {
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ViewerSettings {
    pub program: String,
    pub window_title: String,
    pub startup_grace_ms: u64,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            program: "ffplay".to_string(),
            window_title: "Slouchless (live feedback)".to_string(),
            startup_grace_ms: DEFAULT_STARTUP_GRACE.as_millis() as u64,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: String,
    pub camera_index: u32,
    pub check_interval_secs: u64,
    pub canvas_size: CanvasSize,
    pub inference_interval_ms: u64,
    pub preview_fps: f32,
    pub jpeg_quality: u8,
    pub exit_policy: ViewerExitPolicy,
    pub classifier_command: Vec<String>,
    pub assets: AssetSettings,
    pub viewer: ViewerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            camera_index: 0,
            check_interval_secs: 30,
            canvas_size: CanvasSize::new(600, 600),
            inference_interval_ms: 2_000,
            preview_fps: 15.0,
            jpeg_quality: 80,
            exit_policy: ViewerExitPolicy::default(),
            classifier_command: Vec::new(),
            assets: AssetSettings::default(),
            viewer: ViewerSettings::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.preview_fps.is_finite() && self.preview_fps >= MIN_PREVIEW_FPS) {
            return Err(anyhow!(
                "preview_fps must be a number of at least {MIN_PREVIEW_FPS}, got {}",
                self.preview_fps
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!(
                "jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            ));
        }
        if self.check_interval_secs == 0 {
            return Err(anyhow!("check_interval_secs must be at least 1"));
        }
        Ok(())
    }

    pub fn inference_interval(&self) -> Duration {
        Duration::from_millis(self.inference_interval_ms.max(MIN_INFERENCE_INTERVAL_MS))
    }

    pub fn pump_interval(&self) -> Duration {
        Duration::try_from_secs_f32(1.0 / self.preview_fps)
            .map_or(MAX_PUMP_INTERVAL, |interval| interval.min(MAX_PUMP_INTERVAL))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn viewer_startup_grace(&self) -> Duration {
        Duration::from_millis(self.viewer.startup_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parses_size_strings() {
        assert_eq!("640x480".parse::<CanvasSize>().unwrap(), CanvasSize::new(640, 480));
        assert_eq!("640, 480".parse::<CanvasSize>().unwrap(), CanvasSize::new(640, 480));
        assert_eq!(" 320 240 ".parse::<CanvasSize>().unwrap(), CanvasSize::new(320, 240));
        assert!("640".parse::<CanvasSize>().is_err());
        assert!("0x480".parse::<CanvasSize>().is_err());
        assert!("axb".parse::<CanvasSize>().is_err());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
            canvas_size = "800x450"
            inference_interval_ms = 10
            exit_policy = "close"

            [viewer]
            program = "mpv"
            "#,
        )
        .unwrap();

        assert_eq!(settings.canvas_size, CanvasSize::new(800, 450));
        assert_eq!(settings.inference_interval(), Duration::from_millis(50));
        assert_eq!(settings.exit_policy, ViewerExitPolicy::Close);
        assert_eq!(settings.viewer.program, "mpv");
        assert_eq!(settings.viewer.window_title, "Slouchless (live feedback)");
        assert_eq!(settings.jpeg_quality, 80);
    }

    #[test]
    fn size_as_array() {
        let settings = Settings::from_toml("canvas_size = [320, 240]").unwrap();
        assert_eq!(settings.canvas_size, CanvasSize::new(320, 240));
        assert!(Settings::from_toml("canvas_size = [0, 240]").is_err());
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(Settings::from_toml("preview_fps = 0.0").is_err());
        assert!(Settings::from_toml("jpeg_quality = 0").is_err());
        assert!(Settings::from_toml("check_interval_secs = 0").is_err());
    }

    #[test]
    fn tiny_preview_fps_is_rejected_without_panicking() {
        assert!(Settings::from_toml("preview_fps = 1e-30").is_err());
        assert!(Settings::from_toml("preview_fps = 0.05").is_err());
        assert!(Settings::from_toml("preview_fps = 0.1").is_ok());

        // Unvalidated values still give a bounded interval.
        let slowest = Duration::from_secs(10);
        for fps in [1e-30, -5.0, f32::NAN] {
            let settings = Settings {
                preview_fps: fps,
                ..Settings::default()
            };
            assert!(settings.pump_interval() <= slowest, "fps {fps}");
        }
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "preview_fps = 8.0").unwrap();
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.pump_interval(), Duration::from_millis(125));

        assert!(Settings::load(Path::new("/nonexistent/slouchless.toml")).is_err());
    }
}
