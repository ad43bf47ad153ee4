//! Lock screen window (egui/eframe) on the main thread.
//!
//! One native window per scene: full-screen and always on top for a lockdown, a small
//! always-on-top dialog for a warning. The window closes itself when the scene ends and
//! refuses every other close request.

use eframe::egui::{self, Color32, RichText};
use guard_sentinel::{format_countdown, Scene, SceneBoard, UnlockAttempt};
use std::mem::{discriminant, Discriminant};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

const APP_NAME: &str = "Speech Guard";
const REFRESH: Duration = Duration::from_millis(250);
const LOCK_BACKGROUND: Color32 = Color32::from_rgb(24, 4, 4);
const ALERT: Color32 = Color32::from_rgb(255, 90, 80);
const NOTICE: Color32 = Color32::from_rgb(255, 200, 60);

/// True when a native window can be opened on this machine.
pub fn display_available() -> bool {
    if cfg!(any(target_os = "windows", target_os = "macos")) {
        return true;
    }
    std::env::var_os("DISPLAY").is_some() || std::env::var_os("WAYLAND_DISPLAY").is_some()
}

/// Open a window whenever the board has a scene, until the board is closed.
/// Returns early if the window system refuses to start; the scenes are still logged.
pub fn run_display_loop(board: SceneBoard, attempts: mpsc::Sender<UnlockAttempt>) {
    while let Some(scene) = board.wait_for_scene() {
        let kind = if matches!(scene, Scene::Lock { .. }) { "lock" } else { "warning" };
        debug!(kind, "[OVERLAY] opening window");
        let app = LockScreenApp::new(board.clone(), attempts.clone(), &scene);
        if let Err(e) = eframe::run_native(
            APP_NAME,
            native_options(&scene),
            Box::new(move |_cc| Ok(Box::new(app))),
        ) {
            error!(error = %e, "[OVERLAY] lock window unavailable; console only");
            return;
        }
    }
    info!("[OVERLAY] display loop stopped");
}

fn native_options(scene: &Scene) -> eframe::NativeOptions {
    let viewport = egui::ViewportBuilder::default()
        .with_title(APP_NAME)
        .with_window_level(egui::WindowLevel::AlwaysOnTop)
        .with_close_button(false)
        .with_minimize_button(false);
    let viewport = match scene {
        Scene::Lock { .. } => viewport.with_fullscreen(true).with_decorations(false),
        _ => viewport.with_inner_size([520.0, 240.0]).with_resizable(false),
    };
    eframe::NativeOptions {
        viewport,
        run_and_return: true,
        centered: true,
        ..Default::default()
    }
}

struct LockScreenApp {
    board: SceneBoard,
    attempts: mpsc::Sender<UnlockAttempt>,
    opened_as: Discriminant<Scene>,
    password: String,
    closing: bool,
}

impl LockScreenApp {
    fn new(board: SceneBoard, attempts: mpsc::Sender<UnlockAttempt>, scene: &Scene) -> Self {
        Self {
            board,
            attempts,
            opened_as: discriminant(scene),
            password: String::new(),
            closing: false,
        }
    }

    fn submit(&mut self) {
        let password = std::mem::take(&mut self.password);
        if password.is_empty() {
            return;
        }
        if self.attempts.try_send(UnlockAttempt { password }).is_err() {
            self.board.set_notice("Busy, try again.");
        }
    }

    fn lock_ui(&mut self, ctx: &egui::Context, message: &str, remaining_secs: u64) {
        egui::CentralPanel::default()
            .frame(egui::Frame::default().fill(LOCK_BACKGROUND))
            .show(ctx, |ui| {
                ui.vertical_centered(|ui| {
                    ui.add_space(ui.available_height() * 0.25);
                    ui.label(RichText::new("COMPUTER LOCKED").size(48.0).strong().color(ALERT));
                    ui.add_space(16.0);
                    ui.label(RichText::new(message).size(22.0).color(Color32::WHITE));
                    ui.add_space(24.0);
                    ui.label(
                        RichText::new(format_countdown(remaining_secs))
                            .size(72.0)
                            .monospace()
                            .color(Color32::WHITE),
                    );
                    ui.add_space(64.0);

                    // Administrator entry: masked, frameless and dim so it reads as empty space.
                    let entry = ui.add(
                        egui::TextEdit::singleline(&mut self.password)
                            .password(true)
                            .frame(false)
                            .desired_width(180.0)
                            .text_color(Color32::from_gray(70)),
                    );
                    if entry.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                        self.submit();
                    }
                    entry.request_focus();

                    if let Some(notice) = self.board.notice() {
                        ui.add_space(8.0);
                        ui.label(RichText::new(notice).color(NOTICE));
                    }
                });
            });
    }

    fn warning_ui(&mut self, ctx: &egui::Context, message: &str, acknowledge_at: Instant) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.add_space(12.0);
                ui.label(RichText::new("WARNING").size(28.0).strong().color(NOTICE));
                ui.add_space(12.0);
                ui.label(RichText::new(message).size(16.0));
                ui.add_space(20.0);

                let wait = acknowledge_at.saturating_duration_since(Instant::now());
                let label = if wait.is_zero() {
                    "I understand".to_string()
                } else {
                    format!("I understand ({}s)", wait.as_secs() + u64::from(wait.subsec_nanos() > 0))
                };
                if ui
                    .add_enabled(wait.is_zero(), egui::Button::new(label))
                    .clicked()
                {
                    self.board.acknowledge_warning();
                }
            });
        });
    }
}

impl eframe::App for LockScreenApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let scene = self.board.scene();
        let finished = self.board.is_closed() || discriminant(&scene) != self.opened_as;

        if ctx.input(|i| i.viewport().close_requested()) && !self.closing {
            debug!("[OVERLAY] close attempt ignored");
            ctx.send_viewport_cmd(egui::ViewportCommand::CancelClose);
        }
        if finished {
            self.closing = true;
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            return;
        }

        match scene {
            Scene::Lock {
                message,
                remaining_secs,
                ..
            } => self.lock_ui(ctx, &message, remaining_secs),
            Scene::Warning {
                message,
                acknowledge_at,
            } => self.warning_ui(ctx, &message, acknowledge_at),
            Scene::Idle => {}
        }
        ctx.request_repaint_after(REFRESH);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guard_sentinel::unlock_channel;

    fn lock_scene() -> Scene {
        Scene::Lock {
            message: "Locked.".to_string(),
            until: chrono::Utc::now() + chrono::Duration::seconds(60),
            remaining_secs: 60,
        }
    }

    #[test]
    fn lockdown_opens_full_screen_and_on_top() {
        let lock = native_options(&lock_scene());
        assert_eq!(lock.viewport.fullscreen, Some(true));
        assert_eq!(lock.viewport.decorations, Some(false));
        assert_eq!(lock.viewport.window_level, Some(egui::WindowLevel::AlwaysOnTop));
        assert!(lock.run_and_return);

        let warning = native_options(&Scene::Warning {
            message: "Mind your language.".to_string(),
            acknowledge_at: Instant::now(),
        });
        assert_eq!(warning.viewport.fullscreen, None);
        assert_eq!(warning.viewport.window_level, Some(egui::WindowLevel::AlwaysOnTop));
    }

    #[test]
    fn entered_password_is_sent_once_and_cleared() {
        let (tx, mut rx) = unlock_channel();
        let board = SceneBoard::new();
        let mut app = LockScreenApp::new(board.clone(), tx, &lock_scene());

        app.submit();
        assert!(rx.try_recv().is_err());

        app.password = "kiosk-admin".to_string();
        app.submit();
        assert_eq!(
            rx.try_recv().unwrap(),
            UnlockAttempt {
                password: "kiosk-admin".to_string()
            }
        );
        assert!(app.password.is_empty());
    }

    #[test]
    fn full_queue_asks_to_retry() {
        let (tx, _rx) = mpsc::channel(1);
        let board = SceneBoard::new();
        let mut app = LockScreenApp::new(board.clone(), tx, &lock_scene());
        for _ in 0..2 {
            app.password = "guess".to_string();
            app.submit();
        }
        assert_eq!(board.notice().as_deref(), Some("Busy, try again."));
    }
}
