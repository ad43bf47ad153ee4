//! Directive dispatcher: routes penalty directives and desktop reprimands to the
//! enforcement mechanisms.

use crate::desktop_guard::{DesktopGuard, Reprimand};
use crate::overlay::{LockdownOverlay, OverlayStatus};
use crate::settings_lock::{Access, SettingsLock};
use guard_core::Directive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct EnforcementSurface {
    overlay: LockdownOverlay,
    desktop: Option<DesktopGuard>,
    settings: Option<Arc<SettingsLock>>,
    maintenance: bool,
}

impl EnforcementSurface {
    pub fn new(
        overlay: LockdownOverlay,
        desktop: Option<DesktopGuard>,
        settings: Option<Arc<SettingsLock>>,
    ) -> Self {
        Self {
            overlay,
            desktop,
            settings,
            maintenance: false,
        }
    }

    /// Turn on guard mode: desktop guard and settings lock.
    pub fn arm(&mut self) {
        if let Some(desktop) = self.desktop.as_mut() {
            if let Err(e) = desktop.enable() {
                warn!(error = %e, "[SENTINEL] desktop guard unavailable");
            }
        }
        if let Some(settings) = &self.settings {
            settings.engage();
        }
    }

    async fn disarm(&mut self) {
        if let Some(desktop) = self.desktop.as_mut() {
            desktop.stop().await;
        }
        if let Some(settings) = &self.settings {
            settings.release();
        }
    }

    pub fn maintenance_active(&self) -> bool {
        self.maintenance
    }

    pub fn overlay_status(&self) -> OverlayStatus {
        self.overlay.status()
    }

    pub fn desktop_guard_enabled(&self) -> bool {
        self.desktop.as_ref().is_some_and(DesktopGuard::is_enabled)
    }

    pub fn settings_access(&self, target: &str) -> Access {
        self.settings
            .as_ref()
            .map_or(Access::Allowed, |lock| lock.check(target))
    }

    pub async fn apply(&mut self, directive: Directive) {
        let result = match directive {
            Directive::Warn {
                machine_id,
                count,
                message,
                warning_delay_secs,
            } => {
                info!(machine_id = %machine_id, count, "[SENTINEL] warning");
                self.overlay
                    .warn(message, Duration::from_secs(warning_delay_secs))
            }
            Directive::Lock {
                machine_id,
                count,
                message,
                until,
                duration_secs,
            } => {
                warn!(machine_id = %machine_id, count, duration_secs, "[SENTINEL] lockdown");
                self.overlay.lock(message, until)
            }
            Directive::Unlock { machine_id, reason } => {
                info!(machine_id = %machine_id, reason = ?reason, "[SENTINEL] unlock");
                self.overlay.unlock()
            }
            Directive::Maintenance { enabled } => {
                self.maintenance = enabled;
                if enabled {
                    self.disarm().await;
                    info!("[SENTINEL] maintenance mode on; guards suspended");
                } else {
                    self.arm();
                    info!("[SENTINEL] maintenance mode off; guards armed");
                }
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "[SENTINEL] directive not applied");
        }
    }

    pub fn reprimand(&self, reprimand: Reprimand) {
        if let Err(e) = self.overlay.warn(reprimand.message, Duration::ZERO) {
            warn!(error = %e, "[SENTINEL] reprimand not shown");
        }
    }

    /// Consume directives and reprimands until cancelled or the directive channel closes.
    pub async fn run(
        mut self,
        mut directives: mpsc::UnboundedReceiver<Directive>,
        mut reprimands: mpsc::UnboundedReceiver<Reprimand>,
        cancel: CancellationToken,
    ) {
        self.arm();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                directive = directives.recv() => match directive {
                    Some(directive) => self.apply(directive).await,
                    None => break,
                },
                Some(reprimand) = reprimands.recv() => self.reprimand(reprimand),
            }
        }
        self.disarm().await;
        info!("[SENTINEL] enforcement surface stopped");
    }
}
