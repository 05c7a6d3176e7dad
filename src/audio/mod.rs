pub mod capture;
pub mod endpoint;
#[cfg(feature = "audio-io")]
pub mod mic;

pub use capture::{
    AudioCaptureSession, CaptureBackend, CaptureStopper, EncodedUtterance, OpenCapture, SessionId,
    StartedCapture, VolumeSample,
};
pub use endpoint::SilenceEndpointDetector;
#[cfg(feature = "audio-io")]
pub use mic::MicBackend;
