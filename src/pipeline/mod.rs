#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod classifier;
pub mod compositor;
pub mod session;
pub mod source;
pub mod state;
pub mod viewer;
pub mod worker;

// Re-exports for convenience
#[cfg(feature = "camera-nokhwa")]
pub use camera::CameraSource;
pub use classifier::{Classifier, CommandClassifier, DemoClassifier, SharedClassifier, shared};
pub use compositor::{OverlayAssets, OverlayCompositor};
pub use session::{FeedbackSession, SessionExit, SessionReport, SessionSettings};
pub use source::{FrameSource, ImageDirSource, SyntheticSource};
pub use viewer::{FrameSink, ViewerChannel, ViewerCommand};
