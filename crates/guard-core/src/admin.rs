//! AdminSurface: the operations exposed to the external admin dashboard.
//!
//! Every privileged action goes through the single authentication gate, so failed
//! attempts from any entry point count toward the same lockout.

use crate::auth::{AuthGate, Credential, FACTORY_DEFAULT_PASSWORD};
use crate::error::{AuthError, GuardError, GuardResult};
use crate::incident::{IncidentSink, ToxicIncident};
use crate::live::{LiveMonitor, TranscriptEvent};
use crate::penalty::{Directive, PenaltyManager, ViolationState};
use crate::sanction::SanctionConfig;
use crate::swap::SwapCell;
use crate::wordlist::WordlistStore;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything the admin surface operates on.
pub struct AdminSurface {
    machine_id: String,
    wordlist: Arc<WordlistStore>,
    sanctions: Arc<SwapCell<SanctionConfig>>,
    penalties: Arc<PenaltyManager>,
    live: Arc<LiveMonitor>,
    incidents: Arc<dyn IncidentSink>,
    gate: AuthGate,
    /// Used only while no credential is configured.
    factory_credential: Credential,
    wordlist_path: Option<PathBuf>,
    sanction_path: Option<PathBuf>,
    maintenance: AtomicBool,
}

pub struct AdminSurfaceBuilder {
    surface: AdminSurface,
}

impl AdminSurfaceBuilder {
    /// Persist accepted wordlist reloads to this path.
    pub fn wordlist_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.surface.wordlist_path = Some(path.into());
        self
    }

    /// Persist accepted sanction reloads and password changes to this path.
    pub fn sanction_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.surface.sanction_path = Some(path.into());
        self
    }

    pub fn build(self) -> AdminSurface {
        if self.surface.sanctions.load().admin_credential.is_none() {
            warn!("[ADMIN] no admin credential configured; the factory default password is active. Change it.");
        }
        self.surface
    }
}

impl AdminSurface {
    pub fn builder(
        machine_id: impl Into<String>,
        wordlist: Arc<WordlistStore>,
        sanctions: Arc<SwapCell<SanctionConfig>>,
        penalties: Arc<PenaltyManager>,
        live: Arc<LiveMonitor>,
        incidents: Arc<dyn IncidentSink>,
        gate: AuthGate,
    ) -> AdminSurfaceBuilder {
        AdminSurfaceBuilder {
            surface: Self {
                machine_id: machine_id.into(),
                wordlist,
                sanctions,
                penalties,
                live,
                incidents,
                gate,
                factory_credential: Credential::derive(FACTORY_DEFAULT_PASSWORD),
                wordlist_path: None,
                sanction_path: None,
                maintenance: AtomicBool::new(false),
            },
        }
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    fn active_credential(&self, config: &SanctionConfig) -> Credential {
        match config.admin_credential.as_deref().map(Credential::parse) {
            Some(Ok(credential)) => credential,
            Some(Err(e)) => {
                // Unreachable for validated configs; fall back rather than lock the admin out.
                error!(error = %e, "[ADMIN] stored credential unreadable; using factory default");
                self.factory_credential.clone()
            }
            None => self.factory_credential.clone(),
        }
    }

    /// Check a password against the active credential, counting failures.
    pub fn try_authenticate(&self, password: &str) -> Result<(), AuthError> {
        let config = self.sanctions.load();
        let credential = self.active_credential(&config);
        self.gate.check(&credential, &config.auth_policy(), password)
    }

    pub fn authenticate(&self, password: &str) -> bool {
        self.try_authenticate(password).is_ok()
    }

    /// Failed attempts left before authentication locks.
    pub fn remaining_attempts(&self) -> u32 {
        let policy = self.sanctions.load().auth_policy();
        policy
            .max_attempts
            .saturating_sub(self.gate.session().failed_attempts)
    }

    /// Validate and swap in a new wordlist. The previous table stays active on error.
    pub fn reload_wordlist(&self, raw: &str) -> GuardResult<usize> {
        let terms = self.wordlist.reload(raw)?;
        if let Some(path) = &self.wordlist_path {
            if let Err(e) = write_document(path, raw) {
                warn!(error = %e, "[ADMIN] wordlist reloaded but could not be saved to {:?}", path);
            }
        }
        Ok(terms)
    }

    /// Validate and swap in a new sanction document. A document without a credential
    /// keeps the current one.
    pub fn reload_sanction_config(&self, raw: &str) -> GuardResult<()> {
        let mut next = SanctionConfig::parse(raw)?;
        if next.admin_credential.is_none() {
            next.admin_credential = self.sanctions.load().admin_credential.clone();
        }
        self.persist_sanctions(&next);
        self.sanctions.store(next);
        info!("[ADMIN] sanction config reloaded");
        Ok(())
    }

    pub fn live_transcript(&self) -> Vec<TranscriptEvent> {
        self.live.snapshot()
    }

    /// End the active lockdown on this machine. Count is unchanged. Returns whether a
    /// lockdown was active.
    pub async fn try_override_lockdown(&self, password: &str) -> GuardResult<bool> {
        self.try_authenticate(password)?;
        self.penalties.override_lockdown(&self.machine_id).await
    }

    pub async fn override_lockdown(&self, password: &str) -> bool {
        match self.try_override_lockdown(password).await {
            Ok(_) => true,
            Err(GuardError::Auth(_)) => false,
            Err(e) => {
                error!(error = %e, "[ADMIN] override failed");
                false
            }
        }
    }

    /// Reset the violation count for `machine_id`, returning the previous count.
    /// Machines this agent has never seen are rejected.
    pub async fn try_whiten_violations(&self, machine_id: &str, password: &str) -> GuardResult<u32> {
        self.try_authenticate(password)?;
        self.penalties.whiten(machine_id).await
    }

    pub async fn whiten_violations(&self, machine_id: &str, password: &str) -> bool {
        match self.try_whiten_violations(machine_id, password).await {
            Ok(_) => true,
            Err(GuardError::Auth(_)) => false,
            Err(e) => {
                error!(error = %e, "[ADMIN] whiten failed");
                false
            }
        }
    }

    /// Suspend (`on = true`) or restore the desktop guard and settings lock.
    pub fn set_maintenance(&self, password: &str, on: bool) -> bool {
        if !self.authenticate(password) {
            return false;
        }
        self.maintenance.store(on, Ordering::SeqCst);
        if self
            .penalties
            .directive_sender()
            .send(Directive::Maintenance { enabled: on })
            .is_err()
        {
            warn!("[ADMIN] enforcement channel closed; maintenance toggle not delivered");
        }
        info!(enabled = on, "[ADMIN] maintenance mode");
        true
    }

    pub fn maintenance_active(&self) -> bool {
        self.maintenance.load(Ordering::SeqCst)
    }

    /// Replace the admin password. The new credential gets a fresh salt.
    pub fn change_password(&self, current: &str, new_password: &str) -> GuardResult<()> {
        self.try_authenticate(current)?;
        if new_password.trim().is_empty() {
            return Err(GuardError::config("new password must not be empty"));
        }
        let mut next = (*self.sanctions.load()).clone();
        next.admin_credential = Some(Credential::derive(new_password).encode());
        self.persist_sanctions(&next);
        self.sanctions.store(next);
        info!("[ADMIN] admin password changed");
        Ok(())
    }

    pub async fn violation_state(&self, machine_id: &str) -> GuardResult<ViolationState> {
        self.penalties.snapshot(machine_id).await
    }

    pub fn recent_incidents(&self, limit: usize) -> GuardResult<Vec<ToxicIncident>> {
        self.incidents.recent(limit)
    }

    fn persist_sanctions(&self, config: &SanctionConfig) {
        if let Some(path) = &self.sanction_path {
            if let Err(e) = config.save(path) {
                warn!(error = %e, "[ADMIN] sanction config could not be saved to {:?}", path);
            }
        }
    }
}

fn write_document(path: &std::path::Path, raw: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, raw)
}
