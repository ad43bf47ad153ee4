//! The always-on listener: capture → gain → speech gate → segmentation → STT →
//! `TranscriptEvent`.
//!
//! Stages are joined by bounded channels so a slow transcription backend never stalls
//! capture; when a queue is full the newest item is dropped.

use crate::audio::{AudioConfig, AudioFrame, CaptureSource};
use crate::gain::{apply_gain, GainConfig};
use crate::resilience::{BackoffPolicy, CaptureSupervisor};
use crate::segment::{SegmentConfig, Utterance, UtteranceSegmenter};
use crate::stt::SttBackend;
use crate::vad::{gate_for, SpeechGate};
use chrono::Utc;
use guard_core::{AudioSettings, TranscriptEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const FRAME_QUEUE: usize = 64;
const UTTERANCE_QUEUE: usize = 8;
/// A hole this long between frames means capture restarted; audio on either side
/// never belongs to one utterance.
const CAPTURE_GAP: Duration = Duration::from_secs(1);

/// Everything the listener needs besides the capture source and STT backend.
#[derive(Debug, Clone, Default)]
pub struct ListenerConfig {
    pub audio: AudioConfig,
    pub gain: GainConfig,
    pub vad_mode: u8,
    pub segment: SegmentConfig,
    pub backoff: BackoffPolicy,
}

impl ListenerConfig {
    pub fn from_settings(settings: &AudioSettings) -> Self {
        Self {
            audio: AudioConfig {
                sample_rate: settings.sample_rate,
                device: settings.device.clone(),
            },
            gain: GainConfig::new(settings.manual_gain, settings.target_rms_db),
            vad_mode: settings.vad_mode.min(3),
            segment: SegmentConfig {
                silence_gap: Duration::from_millis(settings.silence_gap_ms),
                phrase_limit: Duration::from_millis(settings.phrase_limit_ms),
                min_utterance: Duration::from_millis(settings.min_utterance_ms),
            },
            backoff: BackoffPolicy::new(
                Duration::from_secs(settings.reconnect_base_secs),
                Duration::from_secs(settings.reconnect_max_secs),
            ),
        }
    }
}

/// Per-frame processing: gain, gate, segmentation.
///
/// The WebRTC gate is not `Send`, so this lives on the thread that created it.
pub struct FrameProcessor {
    gain: GainConfig,
    vad_mode: u8,
    gate: Option<(u32, Box<dyn SpeechGate>)>,
    segmenter: UtteranceSegmenter,
    last_frame: Option<Instant>,
}

impl FrameProcessor {
    pub fn new(gain: GainConfig, vad_mode: u8, segment: SegmentConfig) -> Self {
        Self {
            gain,
            vad_mode,
            gate: None,
            segmenter: UtteranceSegmenter::new(segment),
            last_frame: None,
        }
    }

    pub fn process(&mut self, mut frame: AudioFrame) -> Option<Utterance> {
        if let Some(previous) = self.last_frame {
            if frame.captured_at.saturating_duration_since(previous) >= CAPTURE_GAP
                && !self.segmenter.is_idle()
            {
                debug!("[SEGMENT] capture gap; partial utterance discarded");
                self.segmenter.reset();
            }
        }
        self.last_frame = Some(frame.captured_at);

        apply_gain(&mut frame.samples, &self.gain);

        let rate = frame.sample_rate;
        if self.gate.as_ref().map(|(gate_rate, _)| *gate_rate) != Some(rate) {
            self.gate = Some((rate, gate_for(rate, self.vad_mode)));
        }
        let verdict = match self.gate.as_mut() {
            Some((_, gate)) => gate.is_speech(&frame.samples),
            None => Ok(false),
        };
        let is_speech = match verdict {
            Ok(speech) => speech,
            Err(e) => {
                debug!(error = %e, "[VAD] frame rejected");
                false
            }
        };
        self.segmenter.push(&frame, is_speech)
    }

    pub fn flush(&mut self) -> Option<Utterance> {
        self.segmenter.flush()
    }
}

/// Handles for the running listener stages.
pub struct ListenerHandle {
    pub supervisor: JoinHandle<()>,
    pub transcriber: JoinHandle<()>,
    pub segmenter: std::thread::JoinHandle<()>,
}

impl ListenerHandle {
    /// Wait for every stage to wind down after cancellation.
    pub async fn join(self) {
        if let Err(e) = self.supervisor.await {
            error!(error = %e, "[AUDIO] capture supervisor ended abnormally");
        }
        if let Err(e) = self.transcriber.await {
            error!(error = %e, "[TRANSCRIPT] transcriber ended abnormally");
        }
        let segmenter = self.segmenter;
        match tokio::task::spawn_blocking(move || segmenter.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => error!("[SEGMENT] segmentation thread panicked"),
            Err(e) => error!(error = %e, "[SEGMENT] could not join segmentation thread"),
        }
    }
}

/// Keeps capture alive across device faults and turns speech into transcript events.
pub struct AudioResilienceLayer {
    config: ListenerConfig,
    stt: Arc<dyn SttBackend>,
}

impl AudioResilienceLayer {
    pub fn new(config: ListenerConfig, stt: Arc<dyn SttBackend>) -> Self {
        Self { config, stt }
    }

    pub fn audio_config(&self) -> &AudioConfig {
        &self.config.audio
    }

    /// Start all stages. Must be called inside a tokio runtime.
    pub fn spawn<S: CaptureSource>(
        self,
        source: S,
        transcripts: mpsc::Sender<TranscriptEvent>,
        cancel: CancellationToken,
    ) -> std::io::Result<ListenerHandle> {
        let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(FRAME_QUEUE);
        let (utterance_tx, utterance_rx) = mpsc::channel::<Utterance>(UTTERANCE_QUEUE);

        let supervisor = CaptureSupervisor::new(self.config.backoff.clone(), frame_tx, cancel.clone());
        let supervisor = tokio::spawn(async move {
            if let Err(e) = supervisor.run(source).await {
                error!(error = %e, "[AUDIO] listener capture ended");
            }
        });

        let ListenerConfig {
            gain,
            vad_mode,
            segment,
            ..
        } = self.config;
        let segmenter = std::thread::Builder::new()
            .name("guard-segment".to_string())
            .spawn(move || segment_loop(frame_rx, utterance_tx, gain, vad_mode, segment))?;

        let transcriber = tokio::spawn(transcribe_loop(self.stt, utterance_rx, transcripts, cancel));

        info!("[AUDIO] listener started");
        Ok(ListenerHandle {
            supervisor,
            transcriber,
            segmenter,
        })
    }
}

fn segment_loop(
    mut frames: mpsc::Receiver<AudioFrame>,
    utterances: mpsc::Sender<Utterance>,
    gain: GainConfig,
    vad_mode: u8,
    segment: SegmentConfig,
) {
    let mut processor = FrameProcessor::new(gain, vad_mode, segment);
    let forward = |utterance: Utterance| match utterances.try_send(utterance) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("[AUDIO] transcription backlog full; dropping utterance");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    };

    while let Some(frame) = frames.blocking_recv() {
        if let Some(utterance) = processor.process(frame) {
            debug!(duration = ?utterance.duration, "[AUDIO] utterance ready");
            if !forward(utterance) {
                return;
            }
        }
    }
    if let Some(utterance) = processor.flush() {
        forward(utterance);
    }
    debug!("[AUDIO] segmentation stopped");
}

async fn transcribe_loop(
    stt: Arc<dyn SttBackend>,
    mut utterances: mpsc::Receiver<Utterance>,
    transcripts: mpsc::Sender<TranscriptEvent>,
    cancel: CancellationToken,
) {
    loop {
        let utterance = tokio::select! {
            _ = cancel.cancelled() => break,
            next = utterances.recv() => match next {
                Some(u) => u,
                None => break,
            },
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = stt.transcribe(&utterance) => result,
        };

        match result {
            Ok(text) if text.trim().is_empty() => debug!("[TRANSCRIPT] empty result"),
            Ok(text) => {
                let event = TranscriptEvent::new(text.trim(), Utc::now());
                if transcripts.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "[TRANSCRIPT] transcription failed; utterance dropped"),
        }
    }
    debug!("[TRANSCRIPT] transcriber stopped");
}
