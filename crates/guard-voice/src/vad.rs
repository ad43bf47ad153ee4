//! Voice Activity Detection
//!
//! `WebRtcGate` wraps the WebRTC VAD for the rates it supports. Devices that only open
//! at other rates (44.1 kHz is common) fall back to `EnergyGate`.

use crate::error::{VoiceError, VoiceResult};
use tracing::{debug, info};
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Decides whether a single frame contains speech.
pub trait SpeechGate {
    fn is_speech(&mut self, frame: &[f32]) -> VoiceResult<bool>;
}

/// Build the best gate for `sample_rate`.
pub fn gate_for(sample_rate: u32, mode: u8) -> Box<dyn SpeechGate> {
    match WebRtcGate::new(sample_rate, mode) {
        Ok(gate) => Box::new(gate),
        Err(e) => {
            info!(
                "[VAD] {}; using energy gate at {}Hz",
                e, sample_rate
            );
            Box::new(EnergyGate::default())
        }
    }
}

/// Speech gate backed by WebRTC VAD
pub struct WebRtcGate {
    vad: Vad,
    chunk_size: usize,
}

impl WebRtcGate {
    /// `mode` runs 0-3, where 3 is most aggressive.
    pub fn new(sample_rate: u32, mode: u8) -> VoiceResult<Self> {
        let rate = match sample_rate {
            8000 => SampleRate::Rate8kHz,
            16000 => SampleRate::Rate16kHz,
            32000 => SampleRate::Rate32kHz,
            48000 => SampleRate::Rate48kHz,
            other => {
                return Err(VoiceError::Config(format!(
                    "WebRTC VAD only supports 8000, 16000, 32000, or 48000 Hz, got {}",
                    other
                )))
            }
        };
        let vad_mode = match mode {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            3 => VadMode::VeryAggressive,
            other => {
                return Err(VoiceError::Config(format!(
                    "VAD mode must be 0-3, got {}",
                    other
                )))
            }
        };

        let mut vad = Vad::new();
        vad.set_mode(vad_mode);
        vad.set_sample_rate(rate);

        // 30 ms windows
        let chunk_size = (sample_rate as usize * 30) / 1000;
        debug!("[VAD] WebRTC VAD ready ({}Hz, mode {}, chunk {})", sample_rate, mode, chunk_size);
        Ok(Self { vad, chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl SpeechGate for WebRtcGate {
    fn is_speech(&mut self, frame: &[f32]) -> VoiceResult<bool> {
        if frame.len() != self.chunk_size {
            return Err(VoiceError::Vad(format!(
                "Expected {} samples, got {}",
                self.chunk_size,
                frame.len()
            )));
        }

        let audio_i16: Vec<i16> = frame
            .iter()
            .map(|&sample| (sample.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();

        self.vad
            .is_voice_segment(&audio_i16)
            .map_err(|e| VoiceError::Vad(format!("VAD processing failed: {:?}", e)))
    }
}

/// RMS threshold gate for rates WebRTC VAD does not accept.
#[derive(Debug, Clone)]
pub struct EnergyGate {
    pub threshold: f32,
}

impl Default for EnergyGate {
    fn default() -> Self {
        Self { threshold: 0.02 }
    }
}

impl SpeechGate for EnergyGate {
    fn is_speech(&mut self, frame: &[f32]) -> VoiceResult<bool> {
        Ok(crate::gain::rms(frame) >= self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webrtc_rejects_unsupported_rates_and_modes() {
        assert!(WebRtcGate::new(44100, 2).is_err());
        assert!(WebRtcGate::new(16000, 4).is_err());
        assert_eq!(WebRtcGate::new(16000, 2).unwrap().chunk_size(), 480);
    }

    #[test]
    fn webrtc_silence_and_wrong_size() {
        let mut gate = WebRtcGate::new(16000, 3).unwrap();
        assert!(!gate.is_speech(&[0.0; 480]).unwrap());
        assert!(gate.is_speech(&[0.0; 100]).is_err());
    }

    #[test]
    fn energy_gate_threshold() {
        let mut gate = EnergyGate::default();
        assert!(!gate.is_speech(&[0.001; 1323]).unwrap());
        assert!(gate.is_speech(&[0.3; 1323]).unwrap());
    }

    #[test]
    fn gate_for_falls_back_at_44k() {
        let mut gate = gate_for(44100, 2);
        assert!(gate.is_speech(&[0.5; 1323]).unwrap());
    }
}
