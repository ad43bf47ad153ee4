//! SettingsLock: keeps OS configuration surfaces closed while guard mode is on

use crate::error::{SentinelError, SentinelResult};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Launch targets that open system configuration.
pub const DENIED_TARGETS: [&str; 16] = [
    "control",
    "control.exe",
    "regedit",
    "regedit.exe",
    "regedt32.exe",
    "taskmgr",
    "taskmgr.exe",
    "gpedit.msc",
    "secpol.msc",
    "services.msc",
    "compmgmt.msc",
    "devmgmt.msc",
    "mmc.exe",
    "msconfig",
    "msconfig.exe",
    "systempropertiesadvanced.exe",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Allowed,
    Denied,
}

/// True if `target` (a URI, command line or path) opens a configuration surface.
pub fn is_config_surface(target: &str) -> bool {
    let target = target.trim().trim_matches('"').to_ascii_lowercase();
    if target.starts_with("ms-settings:") {
        return true;
    }
    let program = target.split_whitespace().next().unwrap_or("");
    let name = program.rsplit(|c| c == '\\' || c == '/').next().unwrap_or(program);
    name.ends_with(".cpl") || DENIED_TARGETS.contains(&name)
}

#[derive(Debug, Default)]
pub struct SettingsLock {
    engaged: AtomicBool,
    /// Windows only: also set the per-user policy values.
    apply_policy: bool,
}

impl SettingsLock {
    pub fn new(apply_policy: bool) -> Self {
        Self {
            engaged: AtomicBool::new(false),
            apply_policy,
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }

    pub fn engage(&self) {
        if self.engaged.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.apply_policy {
            if let Err(e) = policy::set(true) {
                warn!(error = %e, "[SENTINEL] settings policy not applied");
            }
        }
        info!("[SENTINEL] settings lock engaged");
    }

    pub fn release(&self) {
        if !self.engaged.swap(false, Ordering::SeqCst) {
            return;
        }
        if self.apply_policy {
            if let Err(e) = policy::set(false) {
                warn!(error = %e, "[SENTINEL] settings policy not removed");
            }
        }
        info!("[SENTINEL] settings lock released");
    }

    pub fn check(&self, target: &str) -> Access {
        if self.is_engaged() && is_config_surface(target) {
            Access::Denied
        } else {
            Access::Allowed
        }
    }

    pub fn ensure_allowed(&self, target: &str) -> SentinelResult<()> {
        match self.check(target) {
            Access::Allowed => Ok(()),
            Access::Denied => {
                warn!(surface = target, "[SENTINEL] blocked configuration surface");
                Err(SentinelError::Denied(format!("{} is locked", target)))
            }
        }
    }
}

#[cfg(windows)]
mod policy {
    use crate::error::{SentinelError, SentinelResult};
    use std::process::Command;

    const EXPLORER: &str = r"HKCU\Software\Microsoft\Windows\CurrentVersion\Policies\Explorer";
    const SYSTEM: &str = r"HKCU\Software\Microsoft\Windows\CurrentVersion\Policies\System";

    fn reg_dword(key: &str, value: &str, on: bool) -> SentinelResult<()> {
        let data = if on { "1" } else { "0" };
        let status = Command::new("reg")
            .args(["add", key, "/v", value, "/t", "REG_DWORD", "/d", data, "/f"])
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(SentinelError::Denied(format!("reg add {} exited with {}", value, status)))
        }
    }

    pub fn set(on: bool) -> SentinelResult<()> {
        reg_dword(EXPLORER, "NoControlPanel", on)?;
        reg_dword(SYSTEM, "DisableTaskMgr", on)?;
        reg_dword(SYSTEM, "DisableRegistryTools", on)
    }
}

#[cfg(not(windows))]
mod policy {
    use crate::error::SentinelResult;

    pub fn set(_on: bool) -> SentinelResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_configuration_surfaces() {
        for target in [
            "ms-settings:network",
            "MS-SETTINGS:",
            r"C:\Windows\System32\Taskmgr.exe",
            "\"regedit.exe\"",
            "control.exe desk.cpl",
            "ncpa.cpl",
            "/usr/bin/gpedit.msc",
        ] {
            assert!(is_config_surface(target), "{}", target);
        }
        for target in ["notepad.exe", "https://example.org", "controller.exe"] {
            assert!(!is_config_surface(target), "{}", target);
        }
    }

    #[test]
    fn only_denies_while_engaged() {
        let lock = SettingsLock::new(false);
        assert_eq!(lock.check("ms-settings:"), Access::Allowed);
        lock.engage();
        assert_eq!(lock.check("ms-settings:"), Access::Denied);
        assert!(lock.ensure_allowed("taskmgr").is_err());
        assert!(lock.ensure_allowed("notepad").is_ok());
        lock.release();
        assert!(!lock.is_engaged());
        assert_eq!(lock.check("taskmgr"), Access::Allowed);
    }
}
