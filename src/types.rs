use std::time::Instant;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    #[allow(dead_code)]
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    #[cfg(test)]
    pub fn solid(width: u32, height: u32, color: [u8; 3]) -> Self {
        let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            rgba.extend_from_slice(&[color[0], color[1], color[2], 255]);
        }
        Self::new(rgba, width, height)
    }

    /// True when the pixel buffer matches the declared dimensions.
    pub fn is_well_formed(&self) -> bool {
        let expected = (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(4);
        self.width > 0 && self.height > 0 && self.rgba.len() == expected
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PostureKind {
    Good,
    Bad,
    Error,
}

impl PostureKind {
    /// Anything that is not literally good or bad renders as an error.
    #[cfg(test)]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "good" => PostureKind::Good,
            "bad" => PostureKind::Bad,
            _ => PostureKind::Error,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PostureKind::Good => "good",
            PostureKind::Bad => "bad",
            PostureKind::Error => "error",
        }
    }
}

const UNKNOWN_ERROR_MESSAGE: &str = "unknown error";

/// Result of one classifier call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    kind: PostureKind,
    message: String,
    raw_output: String,
}

impl Classification {
    pub fn new(
        kind: PostureKind,
        message: impl Into<String>,
        raw_output: impl Into<String>,
    ) -> Self {
        let mut message = message.into().trim().to_string();
        if kind == PostureKind::Error && message.is_empty() {
            message = UNKNOWN_ERROR_MESSAGE.to_string();
        }
        Self {
            kind,
            message,
            raw_output: raw_output.into().trim().to_string(),
        }
    }

    pub fn good(message: impl Into<String>) -> Self {
        Self::new(PostureKind::Good, message, "")
    }

    pub fn bad(message: impl Into<String>) -> Self {
        Self::new(PostureKind::Bad, message, "")
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(PostureKind::Error, message, "")
    }

    pub fn with_raw_output(mut self, raw_output: impl Into<String>) -> Self {
        self.raw_output = raw_output.into().trim().to_string();
        self
    }

    pub fn kind(&self) -> PostureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn raw_output(&self) -> &str {
        &self.raw_output
    }
}

/// What the overlay currently shows. Always replaced as a whole.
#[derive(Clone, Debug)]
pub struct OverlayStatus {
    pub classification: Classification,
    pub next_inference_at: Instant,
}

impl OverlayStatus {
    pub fn analyzing(now: Instant) -> Self {
        Self {
            classification: Classification::new(PostureKind::Bad, "analyzing...", ""),
            next_inference_at: now,
        }
    }

    pub fn completed(classification: Classification, next_inference_at: Instant) -> Self {
        Self {
            classification,
            next_inference_at,
        }
    }

    pub fn kind(&self) -> PostureKind {
        self.classification.kind()
    }

    pub fn message(&self) -> &str {
        self.classification.message()
    }

    pub fn raw_output(&self) -> &str {
        self.classification.raw_output()
    }

    /// Seconds until the next scheduled inference, never negative.
    pub fn countdown_secs(&self, now: Instant) -> f32 {
        self.next_inference_at
            .saturating_duration_since(now)
            .as_secs_f32()
    }
}
