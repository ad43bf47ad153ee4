use chrono::Utc;
use guard_core::{Directive, UnlockReason};
use guard_sentinel::{
    Access, DesktopGuard, DesktopGuardConfig, EnforcementSurface, InterceptPump, LockdownOverlay,
    RecordingSurface, SettingsLock, SurfaceEvent,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn directives_reach_overlay_and_maintenance_toggles_guards() {
    let surface = RecordingSurface::default();
    let (overlay, _task) =
        LockdownOverlay::spawn(surface.clone(), InterceptPump::disabled(), CancellationToken::new());
    let mut status = overlay.subscribe();
    let settings = Arc::new(SettingsLock::new(false));
    let mut enforcement = EnforcementSurface::new(overlay, None, Some(Arc::clone(&settings)));
    enforcement.arm();
    assert_eq!(enforcement.settings_access("ms-settings:"), Access::Denied);

    enforcement.apply(Directive::Warn {
        machine_id: "kiosk-01".into(),
        count: 1,
        message: "Please mind your language.".into(),
        warning_delay_secs: 5,
    })
    .await;
    let until = Utc::now() + chrono::Duration::seconds(60);
    enforcement.apply(Directive::Lock {
        machine_id: "kiosk-01".into(),
        count: 3,
        message: "Locked for 60 seconds.".into(),
        until,
        duration_secs: 60,
    })
    .await;
    status.changed().await.unwrap();
    assert_eq!(status.borrow_and_update().locked_until, Some(until));

    enforcement.apply(Directive::Unlock {
        machine_id: "kiosk-01".into(),
        reason: UnlockReason::Override,
    })
    .await;
    status.changed().await.unwrap();
    assert!(status.borrow_and_update().locked_until.is_none());

    let events = surface.events();
    assert_eq!(
        events[0],
        SurfaceEvent::Warning {
            message: "Please mind your language.".into(),
            delay_secs: 5
        }
    );
    assert!(matches!(events[1], SurfaceEvent::Lock { .. }));
    assert_eq!(events.last(), Some(&SurfaceEvent::Hidden));

    enforcement.apply(Directive::Maintenance { enabled: true }).await;
    assert!(enforcement.maintenance_active());
    assert_eq!(enforcement.settings_access("ms-settings:"), Access::Allowed);
    enforcement.apply(Directive::Maintenance { enabled: false }).await;
    assert!(settings.is_engaged());
}

#[test]
fn desktop_guard_removes_new_items_and_rate_limits_reprimands() {
    let desktop = tempfile::tempdir().unwrap();
    let (tx, mut reprimands) = mpsc::unbounded_channel();
    let mut guard = DesktopGuard::new(
        DesktopGuardConfig {
            watch_dirs: vec![desktop.path().to_path_buf()],
            settle_delay: Duration::from_millis(50),
            reprimand_cooldown: Duration::from_secs(30),
            apply_acl: false,
        },
        tx,
    );
    guard.enable().unwrap();
    assert!(guard.is_enabled());

    let game = desktop.path().join("game.exe");
    let folder = desktop.path().join("New folder");
    let shell = desktop.path().join("desktop.ini");
    std::fs::write(&game, b"MZ").unwrap();
    std::fs::create_dir(&folder).unwrap();
    std::fs::write(&shell, b"[.ShellClassInfo]").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while (game.exists() || folder.exists()) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(!game.exists());
    assert!(!folder.exists());
    assert!(shell.exists());

    guard.disable();
    assert!(!guard.is_enabled());

    let first = reprimands.try_recv().unwrap();
    let name = first.path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name == "game.exe" || name == "New folder", "{}", name);
    assert!(reprimands.try_recv().is_err());

    // Nothing is removed once the guard is off.
    std::fs::write(&game, b"MZ").unwrap();
    std::thread::sleep(Duration::from_millis(300));
    assert!(game.exists());
}

#[tokio::test]
async fn maintenance_stops_the_desktop_guard_without_blocking_the_runtime() {
    let desktop = tempfile::tempdir().unwrap();
    let (tx, _reprimands) = mpsc::unbounded_channel();
    let guard = DesktopGuard::new(
        DesktopGuardConfig {
            watch_dirs: vec![desktop.path().to_path_buf()],
            ..DesktopGuardConfig::default()
        },
        tx,
    );
    let (overlay, _task) = LockdownOverlay::spawn(
        RecordingSurface::default(),
        InterceptPump::disabled(),
        CancellationToken::new(),
    );
    let mut enforcement = EnforcementSurface::new(overlay, Some(guard), None);
    enforcement.arm();
    assert!(enforcement.desktop_guard_enabled());

    enforcement.apply(Directive::Maintenance { enabled: true }).await;
    assert!(!enforcement.desktop_guard_enabled());
    enforcement.apply(Directive::Maintenance { enabled: false }).await;
    assert!(enforcement.desktop_guard_enabled());
    enforcement.apply(Directive::Maintenance { enabled: true }).await;
    assert!(!enforcement.desktop_guard_enabled());
}
