//! Microphone capture using CPAL
//!
//! Capture runs on the CPAL callback thread and forwards fixed 30 ms mono frames over a
//! bounded channel. A full channel drops frames rather than blocking the callback.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sample rates tried in order after the configured one.
pub const FALLBACK_SAMPLE_RATES: [u32; 3] = [16000, 44100, 48000];

const FAULT_POLL: Duration = Duration::from_millis(100);

/// Samples in one 30 ms frame at `sample_rate`.
pub fn frame_len(sample_rate: u32) -> usize {
    (sample_rate as usize * 30) / 1000
}

/// Audio configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Preferred sample rate in Hz (default: 16000)
    pub sample_rate: u32,

    /// Input device name; `None` for the host default
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            device: None,
        }
    }
}

/// One mono frame from the capture thread
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Samples normalized to -1.0..=1.0
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub captured_at: Instant,
}

/// Something that can open an input device and stream frames out of it.
pub trait CaptureSource: Send + 'static {
    fn describe(&self) -> String;

    /// Open the device and forward frames until the stream faults (`Err`) or `cancel`
    /// fires (`Ok`). Blocks the calling thread.
    fn run(
        &mut self,
        frames: &mpsc::Sender<AudioFrame>,
        cancel: &CancellationToken,
    ) -> VoiceResult<()>;
}

/// Capture from a CPAL input device.
pub struct CpalCapture {
    config: AudioConfig,
}

impl CpalCapture {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    fn open_device(&self) -> VoiceResult<Device> {
        let host = cpal::default_host();
        match &self.config.device {
            Some(wanted) => host
                .input_devices()?
                .find(|d| d.name().map(|n| n == *wanted).unwrap_or(false))
                .ok_or_else(|| VoiceError::Device(format!("input device `{}` not found", wanted))),
            None => host
                .default_input_device()
                .ok_or_else(|| VoiceError::Device("No input device available".to_string())),
        }
    }

    /// Pick the first of (preferred, fallbacks...) the device supports, else its default.
    fn negotiate(&self, device: &Device) -> VoiceResult<(StreamConfig, SampleFormat)> {
        let ranges: Vec<_> = device.supported_input_configs()?.collect();
        let candidates = std::iter::once(self.config.sample_rate).chain(FALLBACK_SAMPLE_RATES);

        for rate in candidates {
            let supported = ranges.iter().find(|r| {
                r.min_sample_rate().0 <= rate
                    && rate <= r.max_sample_rate().0
                    && matches!(r.sample_format(), SampleFormat::F32 | SampleFormat::I16)
            });
            if let Some(range) = supported {
                return Ok((
                    StreamConfig {
                        channels: range.channels(),
                        sample_rate: cpal::SampleRate(rate),
                        buffer_size: cpal::BufferSize::Default,
                    },
                    range.sample_format(),
                ));
            }
        }

        let default = device.default_input_config()?;
        warn!(
            "[AUDIO] no preferred sample rate supported; using device default {:?}",
            default
        );
        Ok((default.config(), default.sample_format()))
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    frames: mpsc::Sender<AudioFrame>,
    faults: std::sync::mpsc::Sender<String>,
) -> VoiceResult<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    let sample_rate = config.sample_rate.0;
    let frame_size = frame_len(sample_rate);
    let mut buffer: Vec<f32> = Vec::with_capacity(frame_size);
    let mut dropped: u64 = 0;

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for chunk in data.chunks(channels) {
                let sum: f32 = chunk.iter().map(|&s| f32::from_sample(s)).sum();
                buffer.push(sum / chunk.len() as f32);

                if buffer.len() >= frame_size {
                    let frame = AudioFrame {
                        samples: std::mem::replace(&mut buffer, Vec::with_capacity(frame_size)),
                        sample_rate,
                        captured_at: Instant::now(),
                    };
                    if let Err(mpsc::error::TrySendError::Full(_)) = frames.try_send(frame) {
                        dropped += 1;
                        if dropped % 100 == 1 {
                            debug!(dropped, "[AUDIO] frame channel full; dropping frames");
                        }
                    }
                }
            }
        },
        move |err| {
            let _ = faults.send(err.to_string());
        },
        None,
    )?;
    Ok(stream)
}

impl CaptureSource for CpalCapture {
    fn describe(&self) -> String {
        self.config
            .device
            .clone()
            .unwrap_or_else(|| "default input".to_string())
    }

    fn run(
        &mut self,
        frames: &mpsc::Sender<AudioFrame>,
        cancel: &CancellationToken,
    ) -> VoiceResult<()> {
        let device = self.open_device()?;
        let (config, format) = self.negotiate(&device)?;
        info!(
            "[AUDIO] capturing from {} ({}Hz, {} ch, {:?})",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            config.sample_rate.0,
            config.channels,
            format
        );

        let (fault_tx, fault_rx) = channel::<String>();
        let stream = match format {
            SampleFormat::I16 => build_stream::<i16>(&device, &config, frames.clone(), fault_tx)?,
            SampleFormat::F32 => build_stream::<f32>(&device, &config, frames.clone(), fault_tx)?,
            other => {
                return Err(VoiceError::Device(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        };
        stream.play()?;

        loop {
            if cancel.is_cancelled() {
                info!("[AUDIO] capture stopped");
                return Ok(());
            }
            match fault_rx.recv_timeout(FAULT_POLL) {
                Ok(message) => return Err(VoiceError::Stream(message)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(VoiceError::Stream("stream error callback dropped".to_string()))
                }
            }
            if frames.is_closed() {
                return Ok(());
            }
        }
    }
}

/// List available input devices
pub fn list_input_devices() -> VoiceResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices()?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}
