//! # Guard Voice
//!
//! The audio side of the speech guard: keeps a microphone open through device faults,
//! normalizes level, gates speech, cuts utterances and hands them to a transcription
//! backend. The only output is a stream of `guard_core::TranscriptEvent`s; an audio
//! outage can never produce a violation.
//!
//! ## Architecture
//!
//! ```text
//! cpal callback ──AudioFrame──▶ segmentation thread ──Utterance──▶ STT (blocking pool)
//!       ▲                        (gain, SpeechGate,                      │
//!       │                         UtteranceSegmenter)                    ▼
//! CaptureSupervisor                                              TranscriptEvent
//! (reconnect + backoff)
//! ```

pub mod audio;
pub mod error;
pub mod gain;
pub mod listener;
pub mod resilience;
pub mod segment;
pub mod stt;
pub mod vad;

pub use audio::{list_input_devices, AudioConfig, AudioFrame, CaptureSource, CpalCapture};
pub use error::{VoiceError, VoiceResult};
pub use gain::{apply_gain, rms, GainConfig};
pub use listener::{AudioResilienceLayer, FrameProcessor, ListenerConfig, ListenerHandle};
pub use resilience::{BackoffPolicy, CaptureSupervisor};
pub use segment::{SegmentConfig, Utterance, UtteranceSegmenter};
pub use stt::{encode_wav, HttpStt, ScriptedStt, SttBackend};
pub use vad::{gate_for, EnergyGate, SpeechGate, WebRtcGate};
