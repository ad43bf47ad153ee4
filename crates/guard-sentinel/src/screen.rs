//! Lock screen model shared between the overlay controller and the display thread
//!
//! The controller writes scenes through [`ScreenSurface`]; the window on the display
//! thread reads them every frame from the [`SceneBoard`]. Passwords typed into the lock
//! screen travel the other way as [`UnlockAttempt`]s and are checked by
//! [`serve_unlock_prompts`] against the admin gate.

use crate::overlay::OverlaySurface;
use chrono::{DateTime, Utc};
use guard_core::{AdminSurface, AuthError, GuardError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const UNLOCK_QUEUE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scene {
    Idle,
    Lock {
        message: String,
        until: DateTime<Utc>,
        remaining_secs: u64,
    },
    Warning {
        message: String,
        acknowledge_at: Instant,
    },
}

impl Scene {
    pub fn is_idle(&self) -> bool {
        matches!(self, Scene::Idle)
    }
}

/// Countdown text for the lock screen.
pub fn format_countdown(remaining_secs: u64) -> String {
    format!("{:02}:{:02}", remaining_secs / 60, remaining_secs % 60)
}

#[derive(Debug)]
struct BoardState {
    scene: Scene,
    notice: Option<String>,
    closed: bool,
}

/// Current scene plus the status line under the password box. Clones share state.
#[derive(Debug, Clone)]
pub struct SceneBoard {
    inner: Arc<(Mutex<BoardState>, Condvar)>,
}

impl Default for SceneBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneBoard {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(BoardState {
                    scene: Scene::Idle,
                    notice: None,
                    closed: false,
                }),
                Condvar::new(),
            )),
        }
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut BoardState)) {
        f(&mut self.state());
        self.inner.1.notify_all();
    }

    pub fn scene(&self) -> Scene {
        self.state().scene.clone()
    }

    pub fn notice(&self) -> Option<String> {
        self.state().notice.clone()
    }

    pub fn set_notice(&self, notice: impl Into<String>) {
        let notice = notice.into();
        self.update(|s| s.notice = Some(notice));
    }

    fn set_scene(&self, scene: Scene) {
        self.update(|s| {
            s.scene = scene;
            s.notice = None;
        });
    }

    /// Dismiss a warning once its acknowledge delay has passed.
    pub fn acknowledge_warning(&self) -> bool {
        let mut acknowledged = false;
        self.update(|s| {
            if let Scene::Warning { acknowledge_at, .. } = &s.scene {
                if Instant::now() >= *acknowledge_at {
                    s.scene = Scene::Idle;
                    acknowledged = true;
                }
            }
        });
        acknowledged
    }

    /// Wake the display thread for good.
    pub fn close(&self) {
        self.update(|s| s.closed = true);
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Block until something needs to be on screen. `None` once closed.
    pub fn wait_for_scene(&self) -> Option<Scene> {
        let (lock, ready) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let guard = ready
            .wait_while(guard, |s| s.scene.is_idle() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        if guard.closed {
            None
        } else {
            Some(guard.scene.clone())
        }
    }
}

/// Overlay surface that publishes scenes for a window on the display thread.
#[derive(Debug, Clone)]
pub struct ScreenSurface {
    board: SceneBoard,
}

impl ScreenSurface {
    pub fn new(board: SceneBoard) -> Self {
        Self { board }
    }
}

impl OverlaySurface for ScreenSurface {
    fn show_lock(&mut self, message: &str, until: DateTime<Utc>) {
        let remaining_secs = (until - Utc::now()).num_seconds().max(0) as u64;
        warn!(until = %until, "[OVERLAY] LOCKED: {}", message);
        self.board.set_scene(Scene::Lock {
            message: message.to_string(),
            until,
            remaining_secs,
        });
    }

    fn update_countdown(&mut self, remaining: Duration) {
        self.board.update(|s| {
            if let Scene::Lock { remaining_secs, .. } = &mut s.scene {
                *remaining_secs = remaining.as_secs();
            }
        });
    }

    fn show_warning(&mut self, message: &str, acknowledge_after: Duration) {
        if matches!(self.board.scene(), Scene::Lock { .. }) {
            debug!("[OVERLAY] warning not shown over the lock screen");
            return;
        }
        warn!(delay_secs = acknowledge_after.as_secs(), "[OVERLAY] WARNING: {}", message);
        self.board.set_scene(Scene::Warning {
            message: message.to_string(),
            acknowledge_at: Instant::now() + acknowledge_after,
        });
    }

    fn hide(&mut self) {
        info!("[OVERLAY] lock screen hidden");
        self.board.set_scene(Scene::Idle);
    }
}

/// Password typed into the lock screen's hidden entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockAttempt {
    pub password: String,
}

pub fn unlock_channel() -> (mpsc::Sender<UnlockAttempt>, mpsc::Receiver<UnlockAttempt>) {
    mpsc::channel(UNLOCK_QUEUE)
}

/// Check lock screen passwords against the admin gate until cancelled. A correct
/// password overrides the lockdown; the unlock itself arrives as a directive.
pub async fn serve_unlock_prompts(
    mut attempts: mpsc::Receiver<UnlockAttempt>,
    admin: Arc<AdminSurface>,
    board: SceneBoard,
    cancel: CancellationToken,
) {
    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = attempts.recv() => match attempt {
                Some(attempt) => attempt,
                None => break,
            },
        };
        let notice = match admin.try_override_lockdown(&attempt.password).await {
            Ok(_) => {
                info!("[OVERLAY] lockdown overridden from the lock screen");
                "Password accepted.".to_string()
            }
            Err(GuardError::Auth(AuthError::InvalidCredential)) => {
                match admin.remaining_attempts() {
                    0 => "Wrong password. Too many attempts.".to_string(),
                    left => format!("Wrong password. {} attempt(s) left.", left),
                }
            }
            Err(GuardError::Auth(AuthError::LockedOut { remaining_secs })) => {
                format!("Too many attempts. Wait {}s.", remaining_secs)
            }
            Err(e) => {
                warn!(error = %e, "[OVERLAY] unlock attempt failed");
                "Unlock failed. Ask an administrator.".to_string()
            }
        };
        board.set_notice(notice);
    }
    debug!("[OVERLAY] unlock prompt server stopped");
}
