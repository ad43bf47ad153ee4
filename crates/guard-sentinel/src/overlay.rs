//! Lock screen controller
//!
//! The controller task owns the overlay surface and the intercept pump. The lock
//! deadline is a timer raced against incoming commands; it never blocks a thread.

use crate::error::{SentinelError, SentinelResult};
use crate::intercept::{InterceptMode, InterceptPump};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Whatever actually draws the lock screen and warning dialog.
pub trait OverlaySurface: Send + 'static {
    /// Full-screen lock with the sanction message, a countdown and the hidden
    /// admin password entry.
    fn show_lock(&mut self, message: &str, until: DateTime<Utc>);
    fn update_countdown(&mut self, remaining: Duration);
    /// Warning dialog; the acknowledge control stays disabled for `acknowledge_after`.
    fn show_warning(&mut self, message: &str, acknowledge_after: Duration);
    fn hide(&mut self);
}

/// Surface that only logs; used when no display is attached.
#[derive(Debug, Default)]
pub struct ConsoleSurface;

impl OverlaySurface for ConsoleSurface {
    fn show_lock(&mut self, message: &str, until: DateTime<Utc>) {
        warn!(until = %until, "[OVERLAY] LOCKED: {}", message);
    }

    fn update_countdown(&mut self, remaining: Duration) {
        if remaining.as_secs() % 10 == 0 {
            info!("[OVERLAY] {}s remaining", remaining.as_secs());
        }
    }

    fn show_warning(&mut self, message: &str, acknowledge_after: Duration) {
        warn!(delay_secs = acknowledge_after.as_secs(), "[OVERLAY] WARNING: {}", message);
    }

    fn hide(&mut self) {
        info!("[OVERLAY] lock screen hidden");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    Lock { message: String, until: DateTime<Utc> },
    Countdown { remaining_secs: u64 },
    Warning { message: String, delay_secs: u64 },
    Hidden,
}

/// Records every call; clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    events: Arc<Mutex<Vec<SurfaceEvent>>>,
}

impl RecordingSurface {
    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, event: SurfaceEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl OverlaySurface for RecordingSurface {
    fn show_lock(&mut self, message: &str, until: DateTime<Utc>) {
        self.push(SurfaceEvent::Lock {
            message: message.to_string(),
            until,
        });
    }

    fn update_countdown(&mut self, remaining: Duration) {
        self.push(SurfaceEvent::Countdown {
            remaining_secs: remaining.as_secs(),
        });
    }

    fn show_warning(&mut self, message: &str, acknowledge_after: Duration) {
        self.push(SurfaceEvent::Warning {
            message: message.to_string(),
            delay_secs: acknowledge_after.as_secs(),
        });
    }

    fn hide(&mut self) {
        self.push(SurfaceEvent::Hidden);
    }
}

#[derive(Debug)]
enum OverlayCommand {
    Lock { message: String, until: DateTime<Utc> },
    Warn { message: String, delay: Duration },
    Unlock,
}

/// Observable overlay state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverlayStatus {
    pub locked_until: Option<DateTime<Utc>>,
    pub intercept: InterceptMode,
}

/// Handle to the lock screen controller task.
#[derive(Clone)]
pub struct LockdownOverlay {
    commands: mpsc::UnboundedSender<OverlayCommand>,
    status: watch::Receiver<OverlayStatus>,
}

impl LockdownOverlay {
    pub fn spawn<S: OverlaySurface>(
        surface: S,
        pump: InterceptPump,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(OverlayStatus {
            locked_until: None,
            intercept: pump.mode(),
        });
        let controller = Controller {
            surface,
            pump,
            status: status_tx,
            deadline: None,
        };
        let handle = tokio::spawn(controller.run(rx, cancel));
        (Self { commands, status }, handle)
    }

    /// Show the lock screen until `until`. An earlier deadline never shortens an
    /// active lock.
    pub fn lock(&self, message: impl Into<String>, until: DateTime<Utc>) -> SentinelResult<()> {
        self.send(OverlayCommand::Lock {
            message: message.into(),
            until,
        })
    }

    pub fn warn(&self, message: impl Into<String>, acknowledge_after: Duration) -> SentinelResult<()> {
        self.send(OverlayCommand::Warn {
            message: message.into(),
            delay: acknowledge_after,
        })
    }

    pub fn unlock(&self) -> SentinelResult<()> {
        self.send(OverlayCommand::Unlock)
    }

    pub fn status(&self) -> OverlayStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OverlayStatus> {
        self.status.clone()
    }

    fn send(&self, command: OverlayCommand) -> SentinelResult<()> {
        self.commands.send(command).map_err(|_| SentinelError::PumpGone)
    }
}

struct Controller<S> {
    surface: S,
    pump: InterceptPump,
    status: watch::Sender<OverlayStatus>,
    deadline: Option<(Instant, DateTime<Utc>)>,
}

impl<S: OverlaySurface> Controller<S> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<OverlayCommand>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(COUNTDOWN_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let wake_at = self.deadline.map(|(at, _)| at);
            let expiry = async move {
                match wake_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.end_lock("shutdown");
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => {
                        self.end_lock("controller dropped");
                        break;
                    }
                },
                _ = expiry => self.end_lock("expired"),
                _ = ticker.tick(), if self.deadline.is_some() => {
                    if let Some((at, _)) = self.deadline {
                        self.surface.update_countdown(at.saturating_duration_since(Instant::now()));
                    }
                }
            }
        }
    }

    fn apply(&mut self, command: OverlayCommand) {
        match command {
            OverlayCommand::Lock { message, until } => {
                let remaining = (until - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                let at = Instant::now() + remaining;
                let extends = self.deadline.map_or(true, |(current, _)| at > current);
                if extends {
                    self.deadline = Some((at, until));
                }
                let shown_until = self.deadline.map_or(until, |(_, u)| u);
                self.surface.show_lock(&message, shown_until);
                if let Err(e) = self.pump.engage() {
                    warn!(error = %e, "[OVERLAY] could not engage key intercept");
                }
                info!(until = %shown_until, "[OVERLAY] lock screen up");
                self.publish();
            }
            OverlayCommand::Warn { message, delay } => {
                self.surface.show_warning(&message, delay);
            }
            OverlayCommand::Unlock => self.end_lock("unlocked"),
        }
    }

    fn end_lock(&mut self, reason: &str) {
        if self.deadline.take().is_none() {
            return;
        }
        if let Err(e) = self.pump.release() {
            warn!(error = %e, "[OVERLAY] could not release key intercept");
        }
        self.surface.hide();
        info!("[OVERLAY] lock screen down ({})", reason);
        self.publish();
    }

    fn publish(&self) {
        let status = OverlayStatus {
            locked_until: self.deadline.map(|(_, until)| until),
            intercept: self.pump.mode(),
        };
        self.status.send_replace(status);
    }
}
