//! Reconnect supervisor for the capture source
//!
//! A device, stream or I/O fault stops frame forwarding; the supervisor waits out an
//! exponential backoff and reopens the device. Shutdown interrupts the wait. Only a
//! configuration error (nothing to retry with) stops capture for good.

use crate::audio::{AudioFrame, CaptureSource};
use crate::error::{VoiceError, VoiceResult};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A capture session that ran this long resets the backoff.
const STABLE_AFTER: Duration = Duration::from_secs(60);

/// Bounded exponential backoff
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            factor: 2,
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            ..Self::default()
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.factor.max(1).saturating_pow(attempt.min(16));
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Keeps a `CaptureSource` running across device faults.
pub struct CaptureSupervisor {
    policy: BackoffPolicy,
    frames: mpsc::Sender<AudioFrame>,
    cancel: CancellationToken,
}

impl CaptureSupervisor {
    pub fn new(
        policy: BackoffPolicy,
        frames: mpsc::Sender<AudioFrame>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            policy,
            frames,
            cancel,
        }
    }

    /// Run until cancelled, the frame receiver goes away, or a configuration error occurs.
    pub async fn run<S: CaptureSource>(self, mut source: S) -> VoiceResult<()> {
        let mut attempt: u32 = 0;
        let name = source.describe();

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let frames = self.frames.clone();
            let cancel = self.cancel.clone();
            let started = Instant::now();
            let (returned, result) = tokio::task::spawn_blocking(move || {
                let result = source.run(&frames, &cancel);
                (source, result)
            })
            .await
            .map_err(|e| VoiceError::Stream(format!("capture thread panicked: {}", e)))?;
            source = returned;

            match result {
                Ok(()) => {
                    info!("[AUDIO] capture from {} finished", name);
                    return Ok(());
                }
                Err(VoiceError::ChannelClosed(_)) => {
                    info!("[AUDIO] frame consumer gone; capture from {} stopped", name);
                    return Ok(());
                }
                Err(e) if e.is_recoverable() => {
                    if started.elapsed() >= STABLE_AFTER {
                        attempt = 0;
                    }
                    let delay = self.policy.delay(attempt);
                    attempt = attempt.saturating_add(1);
                    warn!(
                        error = %e,
                        attempt,
                        "[AUDIO] capture fault on {}; reconnecting in {:?}",
                        name,
                        delay
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            info!("[AUDIO] reconnect cancelled");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "[AUDIO] capture stopped");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(5));
        assert_eq!(policy.delay(1), Duration::from_secs(10));
        assert_eq!(policy.delay(2), Duration::from_secs(20));
        assert_eq!(policy.delay(3), Duration::from_secs(30));
        assert_eq!(policy.delay(40), Duration::from_secs(30));
    }

    /// Fails `faults` times, then sends one frame and stops.
    struct FlakySource {
        faults: usize,
        opens: Arc<AtomicUsize>,
    }

    impl CaptureSource for FlakySource {
        fn describe(&self) -> String {
            "flaky".to_string()
        }

        fn run(
            &mut self,
            frames: &mpsc::Sender<AudioFrame>,
            _cancel: &CancellationToken,
        ) -> VoiceResult<()> {
            let opened = self.opens.fetch_add(1, Ordering::SeqCst);
            if opened < self.faults {
                return Err(VoiceError::Device("unplugged".to_string()));
            }
            frames
                .blocking_send(AudioFrame {
                    samples: vec![0.0; 480],
                    sample_rate: 16000,
                    captured_at: Instant::now(),
                })
                .map_err(|e| VoiceError::ChannelClosed(e.to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_faults() {
        let (tx, mut rx) = mpsc::channel(4);
        let opens = Arc::new(AtomicUsize::new(0));
        let supervisor = CaptureSupervisor::new(
            BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(40)),
            tx,
            CancellationToken::new(),
        );
        let source = FlakySource {
            faults: 2,
            opens: Arc::clone(&opens),
        };

        supervisor.run(source).await.unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 3);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_backoff() {
        let (tx, _rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let opens = Arc::new(AtomicUsize::new(0));
        let supervisor = CaptureSupervisor::new(BackoffPolicy::default(), tx, cancel.clone());
        let handle = tokio::spawn(supervisor.run(FlakySource {
            faults: usize::MAX,
            opens: Arc::clone(&opens),
        }));

        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(opens.load(Ordering::SeqCst) >= 1);
    }

    /// Fails with an I/O error on the first open, then delivers one frame.
    struct IoGlitchSource {
        opens: Arc<AtomicUsize>,
    }

    impl CaptureSource for IoGlitchSource {
        fn describe(&self) -> String {
            "io-glitch".to_string()
        }

        fn run(
            &mut self,
            frames: &mpsc::Sender<AudioFrame>,
            _cancel: &CancellationToken,
        ) -> VoiceResult<()> {
            if self.opens.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(VoiceError::Io(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    "driver reset",
                )));
            }
            frames
                .blocking_send(AudioFrame {
                    samples: vec![0.0; 480],
                    sample_rate: 16000,
                    captured_at: Instant::now(),
                })
                .map_err(|e| VoiceError::ChannelClosed(e.to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn io_faults_back_off_and_recover() {
        let (tx, mut rx) = mpsc::channel(4);
        let opens = Arc::new(AtomicUsize::new(0));
        let supervisor = CaptureSupervisor::new(BackoffPolicy::default(), tx, CancellationToken::new());
        let started = tokio::time::Instant::now();

        supervisor
            .run(IoGlitchSource {
                opens: Arc::clone(&opens),
            })
            .await
            .unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn config_errors_are_not_retried() {
        struct Broken;
        impl CaptureSource for Broken {
            fn describe(&self) -> String {
                "broken".to_string()
            }
            fn run(
                &mut self,
                _frames: &mpsc::Sender<AudioFrame>,
                _cancel: &CancellationToken,
            ) -> VoiceResult<()> {
                Err(VoiceError::Config("bad rate".to_string()))
            }
        }

        let (tx, _rx) = mpsc::channel(1);
        let supervisor =
            CaptureSupervisor::new(BackoffPolicy::default(), tx, CancellationToken::new());
        assert!(matches!(supervisor.run(Broken).await, Err(VoiceError::Config(_))));
    }
}
