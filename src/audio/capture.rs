//! Microphone capture sessions
//!
//! At most one capture handle is open at a time. Starting a new session
//! always tears the previous one down first (best-effort) before a new
//! handle is created, so a crashed or abandoned turn can never leak a
//! device handle into the next turn.

use crate::{ParlanceError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one capture session, monotonically increasing process-wide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next session id
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A point-in-time amplitude reading from the open capture
#[derive(Debug, Clone, Copy)]
pub struct VolumeSample {
    /// Normalized amplitude/energy level (0.0 = silence)
    pub level: f32,
    /// When the sample was taken
    pub at: Instant,
}

/// The final encoded audio payload of a capture session
#[derive(Debug, Clone)]
pub struct EncodedUtterance {
    pub session_id: SessionId,
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

impl EncodedUtterance {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// An open capture returned by a backend: the live sample stream plus
/// the stopper that finalizes the encoded utterance.
pub struct OpenCapture {
    pub samples: UnboundedReceiver<VolumeSample>,
    pub stopper: Box<dyn CaptureStopper>,
}

/// Backend seam for the platform microphone
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Open the microphone. Opening implicitly requests the capture
    /// permission; a denial is reported as `PermissionDenied`, never a panic.
    async fn open(&self, session_id: SessionId) -> Result<OpenCapture>;
}

/// Finalizer for one open capture; consumes itself so the device
/// resources are released exactly once.
#[async_trait]
pub trait CaptureStopper: Send {
    async fn stop(self: Box<Self>) -> Result<EncodedUtterance>;
}

struct CaptureHandle {
    session_id: SessionId,
    stopper: Option<Box<dyn CaptureStopper>>,
}

/// The sample stream and identity of a freshly started capture
pub struct StartedCapture {
    pub session_id: SessionId,
    pub samples: UnboundedReceiver<VolumeSample>,
}

/// Owner of the single open capture handle
pub struct AudioCaptureSession {
    backend: Arc<dyn CaptureBackend>,
    current: Option<CaptureHandle>,
}

impl AudioCaptureSession {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            current: None,
        }
    }

    /// Whether a capture handle is currently open
    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Session id of the open handle, if any
    pub fn current_session(&self) -> Option<SessionId> {
        self.current.as_ref().map(|h| h.session_id)
    }

    /// Start a new capture session.
    ///
    /// Any previous handle is released first; teardown failures of the old
    /// handle are swallowed, not propagated. The returned sample stream is
    /// lazy and unbounded; it ends when the handle is stopped or released.
    pub async fn start(&mut self) -> Result<StartedCapture> {
        self.release().await;

        let session_id = SessionId::next();
        let open = self.backend.open(session_id).await?;
        debug!("Capture session {} opened", session_id.value());

        self.current = Some(CaptureHandle {
            session_id,
            stopper: Some(open.stopper),
        });

        Ok(StartedCapture {
            session_id,
            samples: open.samples,
        })
    }

    /// Stop the open capture and return the encoded utterance.
    ///
    /// Fails with `NoActiveCapture` when nothing is open (including a handle
    /// that was already stopped). Device resources are released either way.
    pub async fn stop(&mut self) -> Result<EncodedUtterance> {
        let mut handle = self.current.take().ok_or(ParlanceError::NoActiveCapture)?;
        let stopper = handle.stopper.take().ok_or(ParlanceError::NoActiveCapture)?;

        let utterance = stopper.stop().await?;
        debug!(
            "Capture session {} stopped ({} bytes)",
            handle.session_id.value(),
            utterance.len()
        );
        Ok(utterance)
    }

    /// Release the open capture without keeping the audio. Always completes;
    /// errors from the old handle's teardown are logged and swallowed.
    pub async fn release(&mut self) {
        if let Some(mut handle) = self.current.take() {
            if let Some(stopper) = handle.stopper.take() {
                if let Err(e) = stopper.stop().await {
                    warn!(
                        "Teardown of capture session {} failed: {}",
                        handle.session_id.value(),
                        e
                    );
                }
            }
        }
    }
}
