//! DesktopGuard: keeps the kiosk desktop free of new files and folders
//!
//! A notify watcher thread collects create/modify events under the watched
//! directories, waits a short settle delay (so the writer has closed the file), then
//! deletes the entry and raises a rate-limited reprimand.

use crate::error::{SentinelError, SentinelResult};
use chrono::{DateTime, Utc};
use guard_core::GuardSettings;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const POLL: Duration = Duration::from_millis(100);

pub const REPRIMAND_MESSAGE: &str =
    "Saving files to the desktop is not allowed on this computer. The item was removed.";

/// Names written by the shell itself when it refreshes the desktop.
const IGNORED_NAMES: [&str; 2] = ["desktop.ini", "thumbs.db"];
const IGNORED_EXTENSIONS: [&str; 2] = ["lnk", "tmp"];

#[derive(Debug, Clone)]
pub struct DesktopGuardConfig {
    pub watch_dirs: Vec<PathBuf>,
    pub settle_delay: Duration,
    pub reprimand_cooldown: Duration,
    /// Windows only: deny create on the watched directories while enabled.
    pub apply_acl: bool,
}

impl Default for DesktopGuardConfig {
    fn default() -> Self {
        Self {
            watch_dirs: default_desktop_dirs(),
            settle_delay: Duration::from_millis(500),
            reprimand_cooldown: Duration::from_secs(2),
            apply_acl: false,
        }
    }
}

impl DesktopGuardConfig {
    pub fn from_settings(settings: &GuardSettings) -> Self {
        let watch_dirs = if settings.watch_dirs.is_empty() {
            default_desktop_dirs()
        } else {
            settings.watch_dirs.clone()
        };
        Self {
            watch_dirs,
            settle_delay: Duration::from_millis(settings.settle_delay_ms),
            reprimand_cooldown: Duration::from_millis(settings.reprimand_cooldown_ms),
            apply_acl: settings.apply_acl,
        }
    }
}

/// The current user's desktop and the shared public desktop, where they exist.
pub fn default_desktop_dirs() -> Vec<PathBuf> {
    ["USERPROFILE", "HOME", "PUBLIC"]
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .map(|root| PathBuf::from(root).join("Desktop"))
        .filter(|dir| dir.is_dir())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reprimand {
    pub path: PathBuf,
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Entries the guard must leave alone.
pub fn is_ignored(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    let lower = name.to_ascii_lowercase();
    if IGNORED_NAMES.contains(&lower.as_str()) || lower.starts_with("~$") {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| IGNORED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Remove a file or directory. `Ok(false)` if it was already gone.
pub fn purge(path: &Path) -> SentinelResult<bool> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let removed = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match removed {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Watched roots as configured and as the OS reports them.
fn watch_roots(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut roots = Vec::with_capacity(dirs.len() * 2);
    for dir in dirs {
        roots.push(dir.clone());
        if let Ok(canonical) = std::fs::canonicalize(dir) {
            if !roots.contains(&canonical) {
                roots.push(canonical);
            }
        }
    }
    roots
}

/// Only entries directly inside a watched root are fair game; the roots never are.
fn is_desktop_item(roots: &[PathBuf], path: &Path) -> bool {
    if roots.iter().any(|root| root == path) {
        return false;
    }
    path.parent()
        .is_some_and(|parent| roots.iter().any(|root| root == parent))
}

fn wants(event: &Event) -> bool {
    match event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

struct Running {
    stop: std_mpsc::SyncSender<()>,
    thread: JoinHandle<()>,
}

impl Running {
    /// Blocks until the watcher thread exits.
    fn shutdown(self, config: &DesktopGuardConfig) {
        let _ = self.stop.try_send(());
        if self.thread.join().is_err() {
            error!("[SENTINEL] desktop guard thread panicked");
        }
        if config.apply_acl {
            for dir in &config.watch_dirs {
                if let Err(e) = acl::allow_create(dir) {
                    warn!(error = %e, dir = %dir.display(), "[SENTINEL] ACL rule not removed");
                }
            }
        }
        info!("[SENTINEL] desktop guard disabled");
    }
}

pub struct DesktopGuard {
    config: DesktopGuardConfig,
    reprimands: mpsc::UnboundedSender<Reprimand>,
    running: Option<Running>,
}

impl DesktopGuard {
    pub fn new(config: DesktopGuardConfig, reprimands: mpsc::UnboundedSender<Reprimand>) -> Self {
        Self {
            config,
            reprimands,
            running: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.running.is_some()
    }

    /// Start watching. A no-op when already enabled.
    pub fn enable(&mut self) -> SentinelResult<()> {
        if self.running.is_some() {
            return Ok(());
        }
        if self.config.watch_dirs.is_empty() {
            return Err(SentinelError::Denied("no desktop directories to watch".to_string()));
        }

        let (raw_tx, raw_rx) = std_mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(raw_tx, notify::Config::default())?;
        for dir in &self.config.watch_dirs {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
            if self.config.apply_acl {
                if let Err(e) = acl::deny_create(dir) {
                    warn!(error = %e, dir = %dir.display(), "[SENTINEL] ACL rule not applied");
                }
            }
        }

        let (stop, stop_rx) = std_mpsc::sync_channel::<()>(1);
        let worker = Worker {
            roots: watch_roots(&self.config.watch_dirs),
            config: self.config.clone(),
            reprimands: self.reprimands.clone(),
            pending: HashMap::new(),
            last_reprimand: None,
        };
        let thread = std::thread::Builder::new()
            .name("guard-desktop".to_string())
            .spawn(move || worker.run(watcher, raw_rx, stop_rx))?;

        info!(dirs = ?self.config.watch_dirs, "[SENTINEL] desktop guard enabled");
        self.running = Some(Running { stop, thread });
        Ok(())
    }

    /// Stop watching and join the watcher thread. Blocks; async callers use
    /// [`DesktopGuard::stop`].
    pub fn disable(&mut self) {
        if let Some(running) = self.running.take() {
            running.shutdown(&self.config);
        }
    }

    /// Stop watching from async code: the join and ACL cleanup run on the blocking pool
    /// and are awaited, so a following `enable` cannot interleave with them.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let config = self.config.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || running.shutdown(&config)).await {
            error!(error = %e, "[SENTINEL] desktop guard shutdown task failed");
        }
    }
}

impl Drop for DesktopGuard {
    fn drop(&mut self) {
        self.disable();
    }
}

struct Worker {
    roots: Vec<PathBuf>,
    config: DesktopGuardConfig,
    reprimands: mpsc::UnboundedSender<Reprimand>,
    pending: HashMap<PathBuf, Instant>,
    last_reprimand: Option<Instant>,
}

impl Worker {
    fn run(
        mut self,
        // Dropping the watcher ends the event stream, so it lives on this thread.
        _watcher: RecommendedWatcher,
        events: std_mpsc::Receiver<notify::Result<Event>>,
        stop: std_mpsc::Receiver<()>,
    ) {
        loop {
            if stop.try_recv().is_ok() {
                break;
            }
            match events.recv_timeout(POLL) {
                Ok(Ok(event)) if wants(&event) => {
                    let due = Instant::now() + self.config.settle_delay;
                    for path in event.paths {
                        if !is_desktop_item(&self.roots, &path) {
                            debug!(path = %path.display(), "[SENTINEL] ignoring event outside the desktop");
                            continue;
                        }
                        if is_ignored(&path) {
                            debug!(path = %path.display(), "[SENTINEL] ignoring shell file");
                            continue;
                        }
                        self.pending.entry(path).or_insert(due);
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "[SENTINEL] watch error"),
                Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            }
            self.sweep();
        }
        debug!("[SENTINEL] desktop guard thread stopped");
    }

    fn sweep(&mut self) {
        let now = Instant::now();
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(path, _)| path.clone())
            .collect();

        for path in due {
            self.pending.remove(&path);
            if !is_desktop_item(&self.roots, &path) {
                warn!(path = %path.display(), "[SENTINEL] refusing to remove a watched root or foreign path");
                continue;
            }
            match purge(&path) {
                Ok(true) => {
                    info!(path = %path.display(), "[SENTINEL] removed desktop item");
                    self.reprimand(path, now);
                }
                Ok(false) => {}
                Err(e) => warn!(error = %e, path = %path.display(), "[SENTINEL] could not remove desktop item"),
            }
        }
    }

    fn reprimand(&mut self, path: PathBuf, now: Instant) {
        let cooled = self
            .last_reprimand
            .map_or(true, |last| now.duration_since(last) >= self.config.reprimand_cooldown);
        if !cooled {
            return;
        }
        self.last_reprimand = Some(now);
        let _ = self.reprimands.send(Reprimand {
            path,
            at: Utc::now(),
            message: REPRIMAND_MESSAGE.to_string(),
        });
    }
}

/// Everyone, by well-known SID.
#[cfg_attr(not(windows), allow(dead_code))]
const EVERYONE: &str = "*S-1-1-0";
/// Inherit-only deny of delete and delete-child on everything under the root.
#[cfg_attr(not(windows), allow(dead_code))]
const DENY_RULE: &str = "(OI)(CI)(IO)(D,DC)";

/// The `icacls /deny` grant applied while the guard is enabled.
#[cfg_attr(not(windows), allow(dead_code))]
fn deny_rule_arg() -> String {
    format!("{}:{}", EVERYONE, DENY_RULE)
}

#[cfg(windows)]
mod acl {
    use crate::error::{SentinelError, SentinelResult};
    use std::path::Path;
    use std::process::Command;

    use super::{deny_rule_arg, EVERYONE};

    fn icacls(dir: &Path, args: &[&str]) -> SentinelResult<()> {
        let status = Command::new("icacls").arg(dir).args(args).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(SentinelError::Denied(format!("icacls exited with {}", status)))
        }
    }

    pub fn deny_create(dir: &Path) -> SentinelResult<()> {
        icacls(dir, &["/deny", &deny_rule_arg(), "/C", "/Q"])
    }

    pub fn allow_create(dir: &Path) -> SentinelResult<()> {
        icacls(dir, &["/remove:d", EVERYONE, "/T", "/C", "/Q"])
    }
}

#[cfg(not(windows))]
mod acl {
    use crate::error::SentinelResult;
    use std::path::Path;

    pub fn deny_create(_dir: &Path) -> SentinelResult<()> {
        Ok(())
    }

    pub fn allow_create(_dir: &Path) -> SentinelResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_files_are_ignored() {
        for name in ["desktop.ini", "Thumbs.db", "Browser.lnk", "x.TMP", "~$report.docx"] {
            assert!(is_ignored(Path::new(name)), "{}", name);
        }
        for name in ["homework.exe", "notes.txt", "New folder"] {
            assert!(!is_ignored(Path::new(name)), "{}", name);
        }
    }

    #[test]
    fn purge_removes_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("game.exe");
        std::fs::write(&file, b"MZ").unwrap();
        let folder = dir.path().join("New folder");
        std::fs::create_dir_all(folder.join("nested")).unwrap();

        assert!(purge(&file).unwrap());
        assert!(purge(&folder).unwrap());
        assert!(!purge(&file).unwrap());
        assert!(!folder.exists());
    }

    fn worker(root: &Path) -> (Worker, mpsc::UnboundedReceiver<Reprimand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = DesktopGuardConfig {
            watch_dirs: vec![root.to_path_buf()],
            settle_delay: Duration::ZERO,
            reprimand_cooldown: Duration::from_secs(2),
            apply_acl: false,
        };
        let worker = Worker {
            roots: watch_roots(&config.watch_dirs),
            config,
            reprimands: tx,
            pending: HashMap::new(),
            last_reprimand: None,
        };
        (worker, rx)
    }

    #[test]
    fn sweep_never_removes_the_watched_root() {
        let desktop = tempfile::tempdir().unwrap();
        let game = desktop.path().join("game.exe");
        std::fs::write(&game, b"MZ").unwrap();
        let nested = desktop.path().join("Projects");
        std::fs::create_dir(&nested).unwrap();
        let deep = nested.join("keep.txt");
        std::fs::write(&deep, b"keep").unwrap();

        let (mut worker, mut reprimands) = worker(desktop.path());
        let now = Instant::now();
        worker.pending.insert(desktop.path().to_path_buf(), now);
        worker.pending.insert(deep.clone(), now);
        worker.pending.insert(game.clone(), now);
        worker.sweep();

        assert!(desktop.path().is_dir());
        assert!(deep.exists());
        assert!(!game.exists());
        assert!(worker.pending.is_empty());
        assert_eq!(reprimands.try_recv().unwrap().path, game);
        assert!(reprimands.try_recv().is_err());
    }

    #[test]
    fn only_direct_children_of_a_root_are_desktop_items() {
        let roots = vec![PathBuf::from("/home/kiosk/Desktop")];
        assert!(is_desktop_item(&roots, Path::new("/home/kiosk/Desktop/game.exe")));
        assert!(!is_desktop_item(&roots, Path::new("/home/kiosk/Desktop")));
        assert!(!is_desktop_item(&roots, Path::new("/home/kiosk/Desktop/a/b.txt")));
        assert!(!is_desktop_item(&roots, Path::new("/home/kiosk")));
        assert!(!is_desktop_item(&roots, Path::new("/")));
    }

    #[test]
    fn acl_rule_denies_delete_on_inherited_children() {
        assert_eq!(deny_rule_arg(), "*S-1-1-0:(OI)(CI)(IO)(D,DC)");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_joins_the_watcher_from_async_code() {
        let desktop = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut guard = DesktopGuard::new(
            DesktopGuardConfig {
                watch_dirs: vec![desktop.path().to_path_buf()],
                ..DesktopGuardConfig::default()
            },
            tx,
        );
        guard.enable().unwrap();
        guard.stop().await;
        assert!(!guard.is_enabled());
        guard.stop().await;
    }

    #[test]
    fn enable_requires_directories_and_disable_is_idempotent() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut guard = DesktopGuard::new(
            DesktopGuardConfig {
                watch_dirs: Vec::new(),
                ..DesktopGuardConfig::default()
            },
            tx,
        );
        assert!(guard.enable().is_err());
        guard.disable();
        assert!(!guard.is_enabled());
    }
}
