//! Guard daemon: the long-running kiosk agent.
//!
//! Wires the core decision pipeline to the microphone on one side and the enforcement
//! surface on the other, then serves the loopback admin API until Ctrl-C. With a display
//! attached the main thread belongs to the lock screen window and the agent runs on its
//! own runtime thread.

mod admin_api;
mod lock_screen;

use guard_core::{AgentConfig, CoreServices, SystemClock};
use guard_sentinel::{
    platform_grabber, serve_unlock_prompts, unlock_channel, ConsoleSurface, DesktopGuard,
    DesktopGuardConfig, EnforcementSurface, InterceptPump, LockdownOverlay, SceneBoard,
    ScreenSurface, SettingsLock, UnlockAttempt,
};
use guard_voice::{AudioResilienceLayer, CpalCapture, HttpStt, ListenerConfig, ListenerHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const TRANSCRIPT_QUEUE: usize = 32;
const LIVE_PURGE_SECS: u64 = 5;

/// Lock screen wiring handed to the agent when a window is shown.
struct Screen {
    board: SceneBoard,
    attempts: mpsc::Receiver<UnlockAttempt>,
}

/// Closes the board when the agent thread ends, however it ends.
struct CloseOnDrop(SceneBoard);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[guard-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Some(config) = load_config() else {
        return;
    };
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("guard-worker")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "[CORE] could not start the async runtime; exiting");
            return;
        }
    };

    if !config.guard.lock_screen || !lock_screen::display_available() {
        tracing::info!("[OVERLAY] no lock screen window; overlay logs to the console");
        runtime.block_on(run_agent(config, None));
        return;
    }

    let board = SceneBoard::new();
    let (unlock_tx, unlock_rx) = unlock_channel();
    let screen = Screen {
        board: board.clone(),
        attempts: unlock_rx,
    };
    let closer = CloseOnDrop(board.clone());
    let agent = std::thread::Builder::new()
        .name("guard-agent".to_string())
        .spawn(move || {
            let _closer = closer;
            runtime.block_on(run_agent(config, Some(screen)));
        });
    let agent = match agent {
        Ok(agent) => agent,
        Err(e) => {
            tracing::error!(error = %e, "[CORE] could not start the agent thread; exiting");
            return;
        }
    };

    lock_screen::run_display_loop(board, unlock_tx);
    if agent.join().is_err() {
        tracing::error!("[CORE] agent thread panicked");
    }
}

fn load_config() -> Option<AgentConfig> {
    match AgentConfig::load() {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(error = %e, "[CORE] config file rejected; using built-in defaults");
            match AgentConfig::load_from(None) {
                Ok(config) => Some(config),
                Err(e) => {
                    tracing::error!(error = %e, "[CORE] no usable configuration; exiting");
                    None
                }
            }
        }
    }
}

async fn run_agent(config: AgentConfig, screen: Option<Screen>) {
    let (services, directives) = match CoreServices::from_config(&config, Arc::new(SystemClock)) {
        Ok(built) => built,
        Err(e) => {
            tracing::error!(error = %e, "[CORE] could not start core services; exiting");
            return;
        }
    };
    services.penalties.ensure(&services.machine_id);
    tracing::info!(
        machine_id = %services.machine_id,
        admin_bind = %config.admin_bind,
        persist_violations = config.persist_violations,
        "[CORE] speech guard starting"
    );

    let cancel = CancellationToken::new();

    // Decision pipeline.
    let (transcript_tx, transcript_rx) = mpsc::channel(TRANSCRIPT_QUEUE);
    let worker = tokio::spawn(services.transcript_worker().run(transcript_rx, cancel.clone()));
    let forgive = Arc::clone(&services.penalties)
        .spawn_forgive_ticker(config.forgive_check_interval(), cancel.clone());
    let purge = Arc::clone(&services.live)
        .spawn_purge(Duration::from_secs(LIVE_PURGE_SECS), cancel.clone());

    // Enforcement.
    let pump = if config.guard.intercept_keys {
        InterceptPump::spawn(platform_grabber())
    } else {
        InterceptPump::disabled()
    };
    let (overlay, overlay_task, prompts) = match screen {
        Some(Screen { board, attempts }) => {
            let (overlay, task) =
                LockdownOverlay::spawn(ScreenSurface::new(board.clone()), pump, cancel.clone());
            let prompts = tokio::spawn(serve_unlock_prompts(
                attempts,
                Arc::clone(&services.admin),
                board,
                cancel.clone(),
            ));
            (overlay, task, Some(prompts))
        }
        None => {
            let (overlay, task) = LockdownOverlay::spawn(ConsoleSurface, pump, cancel.clone());
            (overlay, task, None)
        }
    };
    let (reprimand_tx, reprimand_rx) = mpsc::unbounded_channel();
    let desktop = config.guard.desktop_guard.then(|| {
        DesktopGuard::new(DesktopGuardConfig::from_settings(&config.guard), reprimand_tx)
    });
    let settings = config
        .guard
        .settings_lock
        .then(|| Arc::new(SettingsLock::new(cfg!(windows))));
    let enforcement = EnforcementSurface::new(overlay.clone(), desktop, settings.clone());
    let dispatcher = tokio::spawn(enforcement.run(directives, reprimand_rx, cancel.clone()));

    // Microphone.
    let listener = start_listener(&config, transcript_tx, cancel.clone());

    // Admin API.
    let api_state = admin_api::ApiState::new(Arc::clone(&services.admin), overlay.subscribe())
        .with_settings_lock(settings);
    let api = tokio::spawn(admin_api::serve(
        config.admin_bind.clone(),
        api_state,
        cancel.clone(),
    ));

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "[CORE] could not listen for Ctrl-C; shutting down");
    }
    tracing::info!("[CORE] shutdown requested");
    cancel.cancel();

    if let Some(listener) = listener {
        listener.join().await;
    }
    let mut tasks = vec![
        ("transcript worker", worker),
        ("forgive ticker", forgive),
        ("live purge", purge),
        ("overlay", overlay_task),
        ("dispatcher", dispatcher),
        ("admin api", api),
    ];
    if let Some(prompts) = prompts {
        tasks.push(("unlock prompts", prompts));
    }
    for (name, task) in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, task = name, "[CORE] task ended abnormally");
        }
    }
    tracing::info!("[CORE] speech guard stopped");
}

/// Start capture and transcription. Without a transcription endpoint the agent still
/// enforces admin actions; it just never hears anything.
fn start_listener(
    config: &AgentConfig,
    transcripts: mpsc::Sender<guard_core::TranscriptEvent>,
    cancel: CancellationToken,
) -> Option<ListenerHandle> {
    let stt = match HttpStt::from_env() {
        Ok(stt) => stt.with_language(config.audio.language.clone()),
        Err(e) => {
            tracing::warn!(error = %e, "[AUDIO] transcription not configured; listening disabled");
            return None;
        }
    };
    let layer = AudioResilienceLayer::new(ListenerConfig::from_settings(&config.audio), Arc::new(stt));
    let source = CpalCapture::new(layer.audio_config().clone());
    match layer.spawn(source, transcripts, cancel) {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!(error = %e, "[AUDIO] could not start listener");
            None
        }
    }
}
