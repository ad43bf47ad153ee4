//! Utterance segmentation
//!
//! Gap logic: an utterance ends after 800 ms of trailing silence, or is cut at the
//! phrase limit. Timing is derived from sample counts so results do not depend on how
//! quickly frames arrive.

use crate::audio::AudioFrame;
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for utterance detection
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// Silence duration that ends an utterance (default: 800ms)
    pub silence_gap: Duration,

    /// Hard cap on one utterance (default: 5s)
    pub phrase_limit: Duration,

    /// Utterances with less speech than this are discarded (default: 200ms)
    pub min_utterance: Duration,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            silence_gap: Duration::from_millis(800),
            phrase_limit: Duration::from_secs(5),
            min_utterance: Duration::from_millis(200),
        }
    }
}

/// A finished chunk of speech ready for transcription
#[derive(Debug, Clone)]
pub struct Utterance {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub duration: Duration,
    pub captured_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentState {
    Idle,
    Speaking,
    Trailing,
}

/// Turns a stream of gated frames into utterances.
pub struct UtteranceSegmenter {
    config: SegmentConfig,
    state: SegmentState,
    sample_rate: u32,
    buffer: Vec<f32>,
    speech_samples: usize,
    silence_samples: usize,
    started_at: Option<Instant>,
}

fn samples_for(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_millis() as usize * sample_rate as usize) / 1000
}

impl UtteranceSegmenter {
    pub fn new(config: SegmentConfig) -> Self {
        Self {
            config,
            state: SegmentState::Idle,
            sample_rate: 0,
            buffer: Vec::new(),
            speech_samples: 0,
            silence_samples: 0,
            started_at: None,
        }
    }

    /// Feed one frame with its gate decision. Returns an utterance when one completes.
    pub fn push(&mut self, frame: &AudioFrame, is_speech: bool) -> Option<Utterance> {
        if frame.sample_rate != self.sample_rate {
            if self.state != SegmentState::Idle {
                debug!(
                    "[SEGMENT] sample rate changed {} -> {}; dropping partial utterance",
                    self.sample_rate, frame.sample_rate
                );
            }
            self.reset();
            self.sample_rate = frame.sample_rate;
        }

        match (self.state, is_speech) {
            (SegmentState::Idle, false) => return None,
            (SegmentState::Idle, true) => {
                self.state = SegmentState::Speaking;
                self.started_at = Some(frame.captured_at);
                self.buffer.extend_from_slice(&frame.samples);
                self.speech_samples = frame.samples.len();
            }
            (_, true) => {
                self.state = SegmentState::Speaking;
                self.buffer.extend_from_slice(&frame.samples);
                self.speech_samples += frame.samples.len();
                self.silence_samples = 0;
            }
            (_, false) => {
                self.state = SegmentState::Trailing;
                self.buffer.extend_from_slice(&frame.samples);
                self.silence_samples += frame.samples.len();
                if self.silence_samples >= samples_for(self.config.silence_gap, self.sample_rate) {
                    return self.finish();
                }
            }
        }

        if self.buffer.len() >= samples_for(self.config.phrase_limit, self.sample_rate) {
            debug!("[SEGMENT] phrase limit reached");
            return self.finish();
        }
        None
    }

    /// Close out whatever is buffered, e.g. when capture stops.
    pub fn flush(&mut self) -> Option<Utterance> {
        if self.state == SegmentState::Idle {
            return None;
        }
        self.finish()
    }

    pub fn is_idle(&self) -> bool {
        self.state == SegmentState::Idle
    }

    fn finish(&mut self) -> Option<Utterance> {
        let enough = self.speech_samples >= samples_for(self.config.min_utterance, self.sample_rate);
        let utterance = match (enough, self.started_at) {
            (true, Some(captured_at)) => {
                let samples = std::mem::take(&mut self.buffer);
                let duration = Duration::from_secs_f64(samples.len() as f64 / self.sample_rate as f64);
                Some(Utterance {
                    samples,
                    sample_rate: self.sample_rate,
                    duration,
                    captured_at,
                })
            }
            _ => {
                debug!("[SEGMENT] speech too short, ignoring");
                None
            }
        };
        self.reset();
        utterance
    }

    /// Drop any partial utterance.
    pub fn reset(&mut self) {
        self.state = SegmentState::Idle;
        self.buffer.clear();
        self.speech_samples = 0;
        self.silence_samples = 0;
        self.started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(rate: u32) -> AudioFrame {
        AudioFrame {
            samples: vec![0.1; crate::audio::frame_len(rate)],
            sample_rate: rate,
            captured_at: Instant::now(),
        }
    }

    fn feed(seg: &mut UtteranceSegmenter, speech: bool, frames: usize) -> Vec<Utterance> {
        (0..frames)
            .filter_map(|_| seg.push(&frame(16000), speech))
            .collect()
    }

    #[test]
    fn gap_ends_utterance() {
        let mut seg = UtteranceSegmenter::new(SegmentConfig::default());
        assert!(feed(&mut seg, true, 20).is_empty());
        // 26 silent frames = 780ms, not yet a gap
        assert!(feed(&mut seg, false, 26).is_empty());
        let out = feed(&mut seg, false, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].samples.len(), 47 * 480);
        assert!(seg.is_idle());
    }

    #[test]
    fn short_blips_are_dropped() {
        let mut seg = UtteranceSegmenter::new(SegmentConfig::default());
        feed(&mut seg, true, 3);
        assert!(feed(&mut seg, false, 30).is_empty());
        assert!(seg.is_idle());
    }

    #[test]
    fn phrase_limit_cuts_long_speech() {
        let mut seg = UtteranceSegmenter::new(SegmentConfig::default());
        let out = feed(&mut seg, true, 200);
        // 5s at 30ms frames: cut every 167 frames
        assert_eq!(out.len(), 1);
        assert!(out[0].duration >= Duration::from_secs(5));
        assert!(!seg.is_idle());
    }

    #[test]
    fn resumed_speech_extends_utterance() {
        let mut seg = UtteranceSegmenter::new(SegmentConfig::default());
        feed(&mut seg, true, 10);
        feed(&mut seg, false, 10);
        feed(&mut seg, true, 10);
        let out = feed(&mut seg, false, 27);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].samples.len(), 57 * 480);
    }

    #[test]
    fn flush_and_rate_change() {
        let mut seg = UtteranceSegmenter::new(SegmentConfig::default());
        feed(&mut seg, true, 10);
        assert!(seg.flush().is_some());
        assert!(seg.flush().is_none());

        feed(&mut seg, true, 10);
        assert!(seg.push(&frame(48000), false).is_none());
        assert!(seg.is_idle());
    }
}
