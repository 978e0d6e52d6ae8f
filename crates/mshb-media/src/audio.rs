//! Microphone acquisition and speaker output.
//!
//! Call code only sees [`MediaSource`] and [`MicrophoneStream`]. The cpal
//! backed [`AudioEngine`] is compiled with the `device-audio` feature;
//! without it a client can still join calls as a listener-only participant
//! through [`SilenceSource`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

const FRAME_QUEUE: usize = 50;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No input device available")]
    NoInputDevice,

    #[error("No output device available")]
    NoOutputDevice,

    #[error("Microphone access denied")]
    PermissionDenied,

    #[error("Audio device error: {0}")]
    DeviceError(String),

    #[error("Audio stream error: {0}")]
    StreamError(String),
}

#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_size_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            frame_size_ms: 20,
        }
    }
}

impl AudioConfig {
    pub fn frame_size_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_size_ms as usize) / 1000
    }
}

/// Captured frames plus the switches the UI flips.
///
/// While muted the source keeps producing frames, filled with silence, so
/// the remote side's jitter buffers stay primed.
pub struct MicrophoneStream {
    frames: mpsc::Receiver<Vec<f32>>,
    muted: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
}

impl MicrophoneStream {
    pub fn new(frames: mpsc::Receiver<Vec<f32>>, muted: Arc<AtomicBool>, active: Arc<AtomicBool>) -> Self {
        Self { frames, muted, active }
    }

    pub fn controls(&self) -> MicrophoneControls {
        MicrophoneControls {
            muted: self.muted.clone(),
            active: self.active.clone(),
        }
    }

    pub async fn recv(&mut self) -> Option<Vec<f32>> {
        self.frames.recv().await
    }

    /// Hand the frame queue to a consumer such as the audio pump.
    pub fn into_frames(self) -> mpsc::Receiver<Vec<f32>> {
        self.frames
    }
}

/// Mute/stop handle that outlives the frame queue.
#[derive(Debug, Clone)]
pub struct MicrophoneControls {
    muted: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
}

impl MicrophoneControls {
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        debug!(muted, "Microphone mute state changed");
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        debug!("Microphone stopped");
    }
}

/// Something that can hand out a microphone.
pub trait MediaSource: Send + Sync {
    fn acquire(&self, config: &AudioConfig) -> Result<MicrophoneStream, AudioError>;
}

/// Produces silent frames at the configured pace. Needs a tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilenceSource;

impl MediaSource for SilenceSource {
    fn acquire(&self, config: &AudioConfig) -> Result<MicrophoneStream, AudioError> {
        let (tx, rx) = mpsc::channel(FRAME_QUEUE);
        let muted = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicBool::new(true));

        let frame_size = config.frame_size_samples();
        let period = Duration::from_millis(config.frame_size_ms as u64);
        let running = active.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            while running.load(Ordering::Relaxed) {
                ticker.tick().await;
                if tx.send(vec![0.0; frame_size]).await.is_err() {
                    break;
                }
            }
        });

        Ok(MicrophoneStream::new(rx, muted, active))
    }
}

/// A source that always fails, for machines without capture hardware.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMicrophone;

impl MediaSource for NoMicrophone {
    fn acquire(&self, _config: &AudioConfig) -> Result<MicrophoneStream, AudioError> {
        Err(AudioError::NoInputDevice)
    }
}

#[cfg(feature = "device-audio")]
pub use device::AudioEngine;

#[cfg(feature = "device-audio")]
mod device {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use tracing::{error, info, warn};

    /// Default input/output devices through cpal.
    ///
    /// cpal streams are not `Send`, so each one lives on its own thread
    /// until its `active` flag drops.
    #[derive(Debug, Default, Clone)]
    pub struct AudioEngine;

    impl AudioEngine {
        pub fn new() -> Self {
            Self
        }

        /// Play mixed 48 kHz frames on the default output device.
        pub fn start_playback(
            &self,
            config: &AudioConfig,
            mut frames: mpsc::Receiver<Vec<f32>>,
        ) -> Result<MicrophoneControls, AudioError> {
            let stream_config = stream_config(config);
            let active = Arc::new(AtomicBool::new(true));

            hold_stream(active.clone(), move || {
                let device = cpal::default_host()
                    .default_output_device()
                    .ok_or(AudioError::NoOutputDevice)?;
                info!(device = ?device.name(), "Using output device");

                let mut play_buffer = std::collections::VecDeque::<f32>::new();
                device
                    .build_output_stream(
                        &stream_config,
                        move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                            while let Ok(frame) = frames.try_recv() {
                                play_buffer.extend(frame);
                            }
                            for sample in data.iter_mut() {
                                *sample = play_buffer.pop_front().unwrap_or(0.0);
                            }
                        },
                        move |err| error!("Audio output error: {err}"),
                        None,
                    )
                    .map_err(map_build_error)
            })?;

            debug!("Audio playback started");
            Ok(MicrophoneControls {
                muted: Arc::new(AtomicBool::new(false)),
                active,
            })
        }
    }

    impl MediaSource for AudioEngine {
        fn acquire(&self, config: &AudioConfig) -> Result<MicrophoneStream, AudioError> {
            let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
            let muted = Arc::new(AtomicBool::new(false));
            let active = Arc::new(AtomicBool::new(true));

            let stream_config = stream_config(config);
            let frame_size = config.frame_size_samples();
            let cb_muted = muted.clone();
            let cb_active = active.clone();

            hold_stream(active.clone(), move || {
                let device = cpal::default_host()
                    .default_input_device()
                    .ok_or(AudioError::NoInputDevice)?;
                info!(device = ?device.name(), "Using input device");

                let mut buffer = Vec::with_capacity(frame_size);
                device
                    .build_input_stream(
                        &stream_config,
                        move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                            if !cb_active.load(Ordering::Relaxed) {
                                return;
                            }
                            if cb_muted.load(Ordering::Relaxed) {
                                buffer.extend(std::iter::repeat_n(0.0f32, data.len()));
                            } else {
                                buffer.extend_from_slice(data);
                            }
                            while buffer.len() >= frame_size {
                                let frame: Vec<f32> = buffer.drain(..frame_size).collect();
                                if frame_tx.try_send(frame).is_err() {
                                    warn!("Audio frame channel full, dropping frame");
                                }
                            }
                        },
                        move |err| error!("Audio input error: {err}"),
                        None,
                    )
                    .map_err(map_build_error)
            })?;

            debug!("Audio capture started");
            Ok(MicrophoneStream::new(frame_rx, muted, active))
        }
    }

    fn stream_config(config: &AudioConfig) -> cpal::StreamConfig {
        cpal::StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    }

    fn map_build_error(e: cpal::BuildStreamError) -> AudioError {
        match e {
            cpal::BuildStreamError::DeviceNotAvailable => AudioError::NoInputDevice,
            other => {
                let message = other.to_string();
                if message.to_lowercase().contains("permission") {
                    AudioError::PermissionDenied
                } else {
                    AudioError::StreamError(message)
                }
            }
        }
    }

    /// Build and play a stream on a dedicated thread, keeping it alive
    /// while `active` is set.
    fn hold_stream<F>(active: Arc<AtomicBool>, build: F) -> Result<(), AudioError>
    where
        F: FnOnce() -> Result<cpal::Stream, AudioError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        std::thread::Builder::new()
            .name("mshb-audio".into())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                while active.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
            })
            .map_err(|e| AudioError::DeviceError(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| AudioError::StreamError("audio thread exited".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size() {
        assert_eq!(AudioConfig::default().frame_size_samples(), 960);
    }

    #[test]
    fn no_microphone_fails() {
        assert!(matches!(
            NoMicrophone.acquire(&AudioConfig::default()),
            Err(AudioError::NoInputDevice)
        ));
    }

    #[tokio::test]
    async fn silence_source_produces_frames_until_stopped() {
        let mut mic = SilenceSource.acquire(&AudioConfig::default()).unwrap();
        let controls = mic.controls();

        let frame = mic.recv().await.unwrap();
        assert_eq!(frame.len(), 960);
        assert!(frame.iter().all(|s| *s == 0.0));

        controls.set_muted(true);
        assert!(controls.is_muted());

        controls.stop();
        assert!(!controls.is_active());
        // The producer notices the flag and closes the queue.
        while mic.recv().await.is_some() {}
    }
}
