//! cpal microphone backend
//!
//! Owns the device stream on a dedicated thread (cpal streams are not
//! `Send`), mixes the input down to mono, meters RMS volume at the
//! configured cadence, and WAV-encodes the accumulated samples when the
//! session is stopped.

use crate::audio::capture::{
    CaptureBackend, CaptureStopper, EncodedUtterance, OpenCapture, SessionId, VolumeSample,
};
use crate::{ParlanceError, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

/// Microphone capture backend built on cpal
pub struct MicBackend {
    sample_interval: Duration,
}

impl MicBackend {
    pub fn new(sample_interval: Duration) -> Self {
        Self { sample_interval }
    }
}

struct MicStopper {
    session_id: SessionId,
    stop_tx: std::sync::mpsc::Sender<()>,
    result_rx: oneshot::Receiver<Result<Vec<u8>>>,
}

#[async_trait]
impl CaptureStopper for MicStopper {
    async fn stop(self: Box<Self>) -> Result<EncodedUtterance> {
        // The worker thread also finalizes if the sender is gone, so a lost
        // signal cannot leave the device open.
        let _ = self.stop_tx.send(());
        let bytes = self
            .result_rx
            .await
            .map_err(|_| ParlanceError::Channel("Capture worker exited".into()))??;

        Ok(EncodedUtterance {
            session_id: self.session_id,
            bytes,
            mime: "audio/wav",
        })
    }
}

#[async_trait]
impl CaptureBackend for MicBackend {
    async fn open(&self, session_id: SessionId) -> Result<OpenCapture> {
        let (sample_tx, sample_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (result_tx, result_rx) = oneshot::channel::<Result<Vec<u8>>>();
        let interval = self.sample_interval;

        std::thread::spawn(move || {
            run_capture_thread(session_id, interval, sample_tx, ready_tx, stop_rx, result_tx);
        });

        ready_rx
            .await
            .map_err(|_| ParlanceError::CaptureStart("Capture worker died on startup".into()))??;

        Ok(OpenCapture {
            samples: sample_rx,
            stopper: Box::new(MicStopper {
                session_id,
                stop_tx,
                result_rx,
            }),
        })
    }
}

fn run_capture_thread(
    session_id: SessionId,
    interval: Duration,
    sample_tx: mpsc::UnboundedSender<VolumeSample>,
    ready_tx: oneshot::Sender<Result<()>>,
    stop_rx: std::sync::mpsc::Receiver<()>,
    result_tx: oneshot::Sender<Result<Vec<u8>>>,
) {
    let host = cpal::default_host();

    let device = match host.default_input_device() {
        Some(d) => d,
        None => {
            let _ = ready_tx.send(Err(ParlanceError::CaptureStart(
                "No input device available".into(),
            )));
            return;
        }
    };

    info!(
        "Capture session {} using input device: {}",
        session_id.value(),
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let config: cpal::StreamConfig = match device.default_input_config() {
        Ok(c) => c.into(),
        Err(e) => {
            let _ = ready_tx.send(Err(ParlanceError::CaptureStart(format!(
                "Failed to get input config: {}",
                e
            ))));
            return;
        }
    };

    let sample_rate = config.sample_rate.0;
    let channels = config.channels as usize;
    let block = ((sample_rate as f64 * interval.as_secs_f64()) as usize).max(1);

    let recorded: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::with_capacity(
        sample_rate as usize * 30,
    )));
    let recorded_cb = Arc::clone(&recorded);
    let meter: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::with_capacity(block)));

    let err_fn = |err| {
        error!("Audio input stream error: {}", err);
    };

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // Mix down to mono as the device delivers frames
            let mono: Vec<f32> = if channels == 1 {
                data.to_vec()
            } else {
                data.chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                    .collect()
            };

            recorded_cb.lock().extend_from_slice(&mono);

            let mut pending = meter.lock();
            pending.extend_from_slice(&mono);
            while pending.len() >= block {
                let rms = (pending[..block].iter().map(|s| s * s).sum::<f32>()
                    / block as f32)
                    .sqrt();
                pending.drain(..block);
                let _ = sample_tx.send(VolumeSample {
                    level: rms,
                    at: Instant::now(),
                });
            }
        },
        err_fn,
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(map_build_error(e)));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(ParlanceError::CaptureStart(format!(
            "Failed to start input stream: {}",
            e
        ))));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // Block until the stopper signals (or is dropped); either way the
    // stream is torn down before this thread exits.
    let _ = stop_rx.recv();
    drop(stream);

    let samples = std::mem::take(&mut *recorded.lock());
    let _ = result_tx.send(encode_wav(&samples, sample_rate));
}

fn map_build_error(e: cpal::BuildStreamError) -> ParlanceError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            ParlanceError::DeviceBusy("Input device not available".into())
        }
        other => {
            // Some hosts report an OS-level permission denial as a generic
            // backend error; keep the message for diagnosis.
            let msg = other.to_string();
            if msg.to_lowercase().contains("permission") {
                ParlanceError::PermissionDenied
            } else {
                ParlanceError::CaptureStart(msg)
            }
        }
    }
}

fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut bytes = Vec::new();
    {
        let mut cursor = Cursor::new(&mut bytes);
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| ParlanceError::CaptureStart(format!("WAV encode failed: {}", e)))?;
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(v)
                .map_err(|e| ParlanceError::CaptureStart(format!("WAV encode failed: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| ParlanceError::CaptureStart(format!("WAV encode failed: {}", e)))?;
    }

    if samples.is_empty() {
        warn!("Encoded an empty utterance");
    }
    Ok(bytes)
}
