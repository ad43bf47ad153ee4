//! Transcript worker: live monitor, detector, penalty manager, in arrival order.

use crate::detector::Detector;
use crate::error::GuardResult;
use crate::live::{LiveMonitor, TranscriptEvent};
use crate::penalty::{PenaltyManager, ViolationOutcome};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct TranscriptWorker {
    machine_id: String,
    detector: Detector,
    penalties: Arc<PenaltyManager>,
    live: Arc<LiveMonitor>,
}

impl TranscriptWorker {
    pub fn new(
        machine_id: impl Into<String>,
        detector: Detector,
        penalties: Arc<PenaltyManager>,
        live: Arc<LiveMonitor>,
    ) -> Self {
        Self {
            machine_id: machine_id.into(),
            detector,
            penalties,
            live,
        }
    }

    /// Evaluate one transcript and report a positive verdict.
    pub async fn handle(&self, mut event: TranscriptEvent) -> GuardResult<ViolationOutcome> {
        let verdict = self.detector.evaluate(&event.text);
        event.toxic = verdict.is_toxic;
        let text = event.text.clone();
        self.live.record(event);

        if !verdict.is_toxic {
            debug!(text = %text, "[TRANSCRIPT] clean");
            return Ok(ViolationOutcome::Clean);
        }

        warn!(
            text = %text,
            matched = verdict.matched_canonical.as_deref().unwrap_or_default(),
            "[TRANSCRIPT] disallowed word detected"
        );
        self.penalties.report(&self.machine_id, &text, verdict).await
    }

    /// Consume transcripts until the channel closes or `cancel` fires.
    pub async fn run(self, mut transcripts: mpsc::Receiver<TranscriptEvent>, cancel: CancellationToken) {
        info!(machine_id = %self.machine_id, "[TRANSCRIPT] worker started");
        loop {
            tokio::select! {
                maybe = transcripts.recv() => {
                    let Some(event) = maybe else { break };
                    if let Err(e) = self.handle(event).await {
                        warn!(error = %e, "[TRANSCRIPT] failed to apply verdict");
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
        info!("[TRANSCRIPT] worker stopped");
    }
}
