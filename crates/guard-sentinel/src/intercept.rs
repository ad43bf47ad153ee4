//! Global key intercept
//!
//! A dedicated OS thread owns the keyboard grab for the life of the process. Other
//! workers never touch the hook; they post `Engage`/`Release` on a channel that the
//! hook callback drains on its own thread before judging each stroke.

use crate::error::{SentinelError, SentinelResult};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long a grabber gets to fail before it is considered installed.
const INSTALL_GRACE: Duration = Duration::from_millis(500);

/// Keys the policy cares about; everything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Tab,
    Escape,
    F4,
    Meta,
    Alt,
    Control,
    Shift,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub key: Key,
    pub pressed: bool,
}

impl KeyStroke {
    pub fn press(key: Key) -> Self {
        Self { key, pressed: true }
    }

    pub fn release(key: Key) -> Self {
        Self {
            key,
            pressed: false,
        }
    }
}

/// Decides which strokes are swallowed while the lock screen is up.
///
/// Swallowed: Alt+Tab, Alt+Esc, Alt+F4, either OS key, Ctrl+Esc, Ctrl+Shift+Esc.
#[derive(Debug, Default)]
pub struct KeyPolicy {
    engaged: bool,
    alt: bool,
    ctrl: bool,
}

impl KeyPolicy {
    pub fn set_engaged(&mut self, engaged: bool) {
        self.engaged = engaged;
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    /// Returns `true` if the stroke must be swallowed. Modifier state is tracked
    /// whether or not the policy is engaged.
    pub fn filter(&mut self, stroke: KeyStroke) -> bool {
        match stroke.key {
            Key::Alt => self.alt = stroke.pressed,
            Key::Control => self.ctrl = stroke.pressed,
            _ => {}
        }
        if !self.engaged {
            return false;
        }
        match stroke.key {
            Key::Meta => true,
            Key::Tab | Key::F4 => self.alt,
            // Ctrl+Shift+Esc is covered by the ctrl check
            Key::Escape => self.alt || self.ctrl,
            _ => false,
        }
    }
}

/// Per-stroke callback handed to a grabber; `true` swallows the stroke.
pub type StrokeFilter = Box<dyn FnMut(KeyStroke) -> bool + Send>;

/// Installs a global keyboard hook on the current thread.
pub trait InputGrabber: Send + 'static {
    /// Block delivering strokes to `filter`. Returns `Err` if the hook cannot be installed.
    fn run(self: Box<Self>, filter: StrokeFilter) -> SentinelResult<()>;
}

/// Whether the lock screen can actually hold the keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterceptMode {
    Full,
    OverlayOnly,
}

enum PumpCommand {
    Engage,
    Release,
}

/// Handle to the intercept thread.
pub struct InterceptPump {
    commands: Option<Sender<PumpCommand>>,
    engaged: Arc<AtomicBool>,
    mode: InterceptMode,
}

impl InterceptPump {
    /// Spawn the pump thread. Install failure degrades to overlay-only mode.
    pub fn spawn(grabber: Box<dyn InputGrabber>) -> Self {
        let (command_tx, command_rx) = channel::<PumpCommand>();
        let (status_tx, status_rx) = channel::<SentinelError>();
        let engaged = Arc::new(AtomicBool::new(false));

        let spawned = std::thread::Builder::new()
            .name("guard-intercept".to_string())
            .spawn(move || {
                let filter = pump_filter(command_rx);
                if let Err(e) = grabber.run(filter) {
                    error!(error = %e, "[SENTINEL] key intercept stopped");
                    let _ = status_tx.send(e);
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "[SENTINEL] could not start intercept thread; overlay-only mode");
            return Self::disabled();
        }

        match status_rx.recv_timeout(INSTALL_GRACE) {
            Ok(e) => {
                warn!(error = %e, "[SENTINEL] key intercept unavailable; overlay-only mode");
                Self::disabled()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                info!("[SENTINEL] key intercept installed");
                Self {
                    commands: Some(command_tx),
                    engaged,
                    mode: InterceptMode::Full,
                }
            }
        }
    }

    /// A pump with no hook at all.
    pub fn disabled() -> Self {
        Self {
            commands: None,
            engaged: Arc::new(AtomicBool::new(false)),
            mode: InterceptMode::OverlayOnly,
        }
    }

    pub fn mode(&self) -> InterceptMode {
        self.mode
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }

    pub fn engage(&self) -> SentinelResult<()> {
        self.post(PumpCommand::Engage, true)
    }

    pub fn release(&self) -> SentinelResult<()> {
        self.post(PumpCommand::Release, false)
    }

    fn post(&self, command: PumpCommand, engaged: bool) -> SentinelResult<()> {
        let Some(commands) = &self.commands else {
            debug!("[SENTINEL] intercept not installed; ignoring request");
            return Ok(());
        };
        commands.send(command).map_err(|_| SentinelError::PumpGone)?;
        self.engaged.store(engaged, Ordering::SeqCst);
        Ok(())
    }
}

fn pump_filter(commands: Receiver<PumpCommand>) -> StrokeFilter {
    let mut policy = KeyPolicy::default();
    Box::new(move |stroke| {
        while let Ok(command) = commands.try_recv() {
            policy.set_engaged(matches!(command, PumpCommand::Engage));
        }
        let swallow = policy.filter(stroke);
        if swallow {
            debug!(key = ?stroke.key, "[SENTINEL] swallowed key");
        }
        swallow
    })
}

/// Grabber for platforms without a supported hook.
pub struct UnsupportedGrabber;

impl InputGrabber for UnsupportedGrabber {
    fn run(self: Box<Self>, _filter: StrokeFilter) -> SentinelResult<()> {
        Err(SentinelError::HookInstall(format!(
            "global key grab is not supported on {}",
            std::env::consts::OS
        )))
    }
}

#[cfg(any(target_os = "windows", target_os = "macos"))]
mod rdev_grab {
    use super::*;
    use std::cell::RefCell;

    /// Global grab through rdev.
    pub struct RdevGrabber;

    fn map_key(key: &rdev::Key) -> Key {
        match key {
            rdev::Key::Tab => Key::Tab,
            rdev::Key::Escape => Key::Escape,
            rdev::Key::F4 => Key::F4,
            rdev::Key::MetaLeft | rdev::Key::MetaRight => Key::Meta,
            rdev::Key::Alt | rdev::Key::AltGr => Key::Alt,
            rdev::Key::ControlLeft | rdev::Key::ControlRight => Key::Control,
            rdev::Key::ShiftLeft | rdev::Key::ShiftRight => Key::Shift,
            _ => Key::Other,
        }
    }

    impl InputGrabber for RdevGrabber {
        fn run(self: Box<Self>, filter: StrokeFilter) -> SentinelResult<()> {
            let filter = RefCell::new(filter);
            rdev::grab(move |event| {
                let stroke = match &event.event_type {
                    rdev::EventType::KeyPress(key) => KeyStroke::press(map_key(key)),
                    rdev::EventType::KeyRelease(key) => KeyStroke::release(map_key(key)),
                    _ => return Some(event),
                };
                if (filter.borrow_mut())(stroke) {
                    None
                } else {
                    Some(event)
                }
            })
            .map_err(|e| SentinelError::HookInstall(format!("{:?}", e)))
        }
    }
}

#[cfg(any(target_os = "windows", target_os = "macos"))]
pub use rdev_grab::RdevGrabber;

/// The grabber for the current platform.
pub fn platform_grabber() -> Box<dyn InputGrabber> {
    #[cfg(any(target_os = "windows", target_os = "macos"))]
    {
        Box::new(RdevGrabber)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        Box::new(UnsupportedGrabber)
    }
}

/// Test grabber fed from a channel; reports each verdict back.
pub struct ScriptedGrabber {
    strokes: Receiver<KeyStroke>,
    verdicts: Sender<(KeyStroke, bool)>,
}

impl ScriptedGrabber {
    pub fn new() -> (Self, Sender<KeyStroke>, Receiver<(KeyStroke, bool)>) {
        let (stroke_tx, strokes) = channel();
        let (verdicts, verdict_rx) = channel();
        (Self { strokes, verdicts }, stroke_tx, verdict_rx)
    }
}

impl InputGrabber for ScriptedGrabber {
    fn run(self: Box<Self>, mut filter: StrokeFilter) -> SentinelResult<()> {
        while let Ok(stroke) = self.strokes.recv() {
            let swallowed = filter(stroke);
            if self.verdicts.send((stroke, swallowed)).is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swallowed(policy: &mut KeyPolicy, strokes: &[KeyStroke]) -> Vec<bool> {
        strokes.iter().map(|s| policy.filter(*s)).collect()
    }

    #[test]
    fn policy_swallows_shell_shortcuts_only_when_engaged() {
        let mut policy = KeyPolicy::default();
        let alt_tab = [KeyStroke::press(Key::Alt), KeyStroke::press(Key::Tab)];
        assert_eq!(swallowed(&mut policy, &alt_tab), vec![false, false]);

        policy.set_engaged(true);
        assert_eq!(swallowed(&mut policy, &[KeyStroke::press(Key::Tab)]), vec![true]);
        assert!(policy.filter(KeyStroke::press(Key::F4)));
        assert!(policy.filter(KeyStroke::press(Key::Escape)));
        policy.filter(KeyStroke::release(Key::Alt));
        assert!(!policy.filter(KeyStroke::press(Key::Tab)));
        assert!(!policy.filter(KeyStroke::press(Key::Other)));
    }

    #[test]
    fn policy_blocks_meta_and_ctrl_escape() {
        let mut policy = KeyPolicy::default();
        policy.set_engaged(true);
        assert!(policy.filter(KeyStroke::press(Key::Meta)));
        assert!(!policy.filter(KeyStroke::press(Key::Escape)));

        let ctrl_shift_esc = [
            KeyStroke::press(Key::Control),
            KeyStroke::press(Key::Shift),
            KeyStroke::press(Key::Escape),
        ];
        assert_eq!(swallowed(&mut policy, &ctrl_shift_esc), vec![false, false, true]);
    }

    #[test]
    fn unsupported_grabber_falls_back_to_overlay_only() {
        let pump = InterceptPump::spawn(Box::new(UnsupportedGrabber));
        assert_eq!(pump.mode(), InterceptMode::OverlayOnly);
        pump.engage().unwrap();
        assert!(!pump.is_engaged());
    }

    #[test]
    fn pump_applies_engage_and_release_on_its_own_thread() {
        let (grabber, strokes, verdicts) = ScriptedGrabber::new();
        let pump = InterceptPump::spawn(Box::new(grabber));
        assert_eq!(pump.mode(), InterceptMode::Full);

        let send = |stroke| {
            strokes.send(stroke).unwrap();
            verdicts.recv_timeout(Duration::from_secs(2)).unwrap().1
        };

        assert!(!send(KeyStroke::press(Key::Meta)));
        pump.engage().unwrap();
        assert!(pump.is_engaged());
        assert!(send(KeyStroke::press(Key::Meta)));
        pump.release().unwrap();
        assert!(!send(KeyStroke::press(Key::Meta)));
    }
}
