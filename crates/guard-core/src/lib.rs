//! # Guard Core
//!
//! Decision logic for the kiosk speech guard. Transcripts come in from the audio
//! layer, are checked against the disallowed-word list, and positive verdicts drive a
//! per-machine penalty state machine whose directives go out to the enforcement surface.
//!
//! ```text
//! TranscriptEvent ─▶ LiveMonitor
//!        │
//!        ▼
//!    Detector ──(alias correction, whole-word match)──▶ MatchResult
//!        │
//!        ▼
//!  PenaltyManager ──SanctionLadder──▶ Directive (Warn / Lock / Unlock)
//!        │
//!        └──▶ IncidentSink (append-only)
//! ```
//!
//! Platform concerns (microphone, keyboard hooks, file watching) live in
//! `guard-voice` and `guard-sentinel`; this crate never touches them.

pub mod admin;
pub mod auth;
pub mod clock;
pub mod config;
pub mod detector;
pub mod error;
pub mod incident;
pub mod live;
pub mod penalty;
pub mod pipeline;
pub mod sanction;
pub mod services;
pub mod store;
pub mod swap;
pub mod wordlist;

pub use admin::AdminSurface;
pub use auth::{authenticate, AdminSession, AuthGate, AuthPolicy, Credential};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AgentConfig, AudioSettings, GuardSettings};
pub use detector::{Detector, MatchResult};
pub use error::{AuthError, GuardError, GuardResult};
pub use incident::{IncidentSink, JsonlIncidentLog, MemoryIncidentSink, Severity, ToxicIncident};
pub use live::{LiveMonitor, TranscriptEvent};
pub use penalty::{
    Directive, PenaltyManager, PenaltyPhase, UnlockReason, ViolationOutcome, ViolationState,
};
pub use pipeline::TranscriptWorker;
pub use sanction::{SanctionAction, SanctionConfig, SanctionLadder, SanctionTier, Trigger};
pub use services::CoreServices;
pub use store::{MemoryViolationStore, SledViolationStore, ViolationStore};
pub use swap::SwapCell;
pub use wordlist::{WordTerm, WordlistStore, WordlistTable};
