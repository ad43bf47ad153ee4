use guard_voice::{
    AudioFrame, AudioResilienceLayer, CaptureSource, ListenerConfig, ScriptedStt, VoiceError,
    VoiceResult,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const RATE: u32 = 44100;
const FRAME: usize = 1323;

/// Plays a fixed script of loud/quiet frames, faulting once before the first attempt.
struct ScriptedMic {
    utterances: usize,
    faulted: bool,
}

impl CaptureSource for ScriptedMic {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    fn run(
        &mut self,
        frames: &mpsc::Sender<AudioFrame>,
        _cancel: &CancellationToken,
    ) -> VoiceResult<()> {
        if !self.faulted {
            self.faulted = true;
            return Err(VoiceError::Device("not ready".to_string()));
        }
        for _ in 0..self.utterances {
            for level in std::iter::repeat(0.3).take(20).chain(std::iter::repeat(0.0).take(30)) {
                frames
                    .blocking_send(AudioFrame {
                        samples: vec![level; FRAME],
                        sample_rate: RATE,
                        captured_at: Instant::now(),
                    })
                    .map_err(|e| VoiceError::ChannelClosed(e.to_string()))?;
            }
        }
        Ok(())
    }
}

#[tokio::test]
async fn failed_transcriptions_are_dropped_and_speech_reaches_the_channel() {
    let stt = Arc::new(ScriptedStt::new(Vec::<String>::new()));
    stt.push_err("gateway timeout");
    stt.push_ok("  dasar anjeng  ");
    stt.push_ok("");

    let mut config = ListenerConfig::default();
    config.backoff.base = Duration::from_millis(10);
    config.backoff.max = Duration::from_millis(10);

    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let handle = AudioResilienceLayer::new(config, stt)
        .spawn(
            ScriptedMic {
                utterances: 3,
                faulted: false,
            },
            tx,
            cancel.clone(),
        )
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.text, "dasar anjeng");
    assert!(!event.toxic);

    // The source finished; the remaining stages drain and close the channel.
    let rest = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .unwrap();
    assert!(rest.is_none());

    cancel.cancel();
    handle.join().await;
}
