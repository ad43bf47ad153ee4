//! # Guard Sentinel
//!
//! The enforcement surface of the speech guard. It turns `guard_core::Directive`s into
//! things the user sees and cannot easily get around: a warning dialog, a full-screen
//! lock with a countdown and the keyboard shell shortcuts swallowed, a desktop that
//! refuses new files, and closed configuration panels.
//!
//! Every mechanism degrades instead of failing: no keyboard hook means overlay-only,
//! no watchable desktop means warnings only.

pub mod desktop_guard;
pub mod dispatcher;
pub mod error;
pub mod intercept;
pub mod overlay;
pub mod screen;
pub mod settings_lock;

pub use desktop_guard::{DesktopGuard, DesktopGuardConfig, Reprimand};
pub use dispatcher::EnforcementSurface;
pub use error::{SentinelError, SentinelResult};
pub use intercept::{
    platform_grabber, InputGrabber, InterceptMode, InterceptPump, Key, KeyPolicy, KeyStroke,
    ScriptedGrabber,
};
pub use overlay::{
    ConsoleSurface, LockdownOverlay, OverlayStatus, OverlaySurface, RecordingSurface, SurfaceEvent,
};
pub use screen::{
    format_countdown, serve_unlock_prompts, unlock_channel, Scene, SceneBoard, ScreenSurface,
    UnlockAttempt,
};
pub use settings_lock::{Access, SettingsLock};
