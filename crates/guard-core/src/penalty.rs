//! PenaltyManager: the per-machine violation state machine.
//!
//! ```text
//! CLEAN ──violation──▶ WARNED ──ladder says lockdown──▶ LOCKED
//!   ▲                    │                                │
//!   └── auto-forgive ────┘          override / expiry ◀───┘
//! ```
//!
//! Each machine's [`ViolationState`] is owned by a single actor task. Violations,
//! forgive checks and admin commands for that machine go through its mailbox and are
//! applied one at a time, so there is no global lock and no state shared between
//! machines. Actors never perform network I/O.

use crate::clock::Clock;
use crate::detector::MatchResult;
use crate::error::{GuardError, GuardResult};
use crate::incident::{IncidentSink, ToxicIncident};
use crate::sanction::{SanctionAction, SanctionConfig, SanctionTier};
use crate::store::ViolationStore;
use crate::swap::SwapCell;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MAILBOX_CAPACITY: usize = 64;

/// Violation bookkeeping for one machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationState {
    pub count: u32,
    pub last_violation_at: Option<DateTime<Utc>>,
    pub lockdown_active_until: Option<DateTime<Utc>>,
    /// Positive verdicts before this instant are dropped without counting.
    pub suppressed_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyPhase {
    Clean,
    Warned,
    Locked,
}

impl ViolationState {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lockdown_active_until.is_some_and(|until| now < until)
    }

    pub fn is_suppressed(&self, now: DateTime<Utc>) -> bool {
        self.suppressed_until.is_some_and(|until| now < until)
    }

    pub fn phase(&self, now: DateTime<Utc>) -> PenaltyPhase {
        if self.is_locked(now) {
            PenaltyPhase::Locked
        } else if self.count > 0 {
            PenaltyPhase::Warned
        } else {
            PenaltyPhase::Clean
        }
    }

    /// Drop lockdown and suppression deadlines that have passed.
    fn clear_expired(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        if self.lockdown_active_until.is_some_and(|until| until <= now) {
            self.lockdown_active_until = None;
            changed = true;
        }
        if self.suppressed_until.is_some_and(|until| until <= now) {
            self.suppressed_until = None;
            changed = true;
        }
        changed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockReason {
    Override,
    Whiten,
    Expired,
}

/// Instructions for the enforcement surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Directive {
    Warn {
        machine_id: String,
        count: u32,
        message: String,
        warning_delay_secs: u64,
    },
    Lock {
        machine_id: String,
        count: u32,
        message: String,
        until: DateTime<Utc>,
        duration_secs: u64,
    },
    Unlock {
        machine_id: String,
        reason: UnlockReason,
    },
    /// `enabled = true` suspends the desktop guard and settings lock.
    Maintenance { enabled: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationOutcome {
    /// Verdict was not toxic; nothing recorded.
    Clean,
    /// Inside an active overlap window; not counted, not logged.
    Suppressed { until: DateTime<Utc> },
    Warned { count: u32, tier: SanctionTier },
    Locked {
        count: u32,
        until: DateTime<Utc>,
        tier: SanctionTier,
    },
}

enum Command {
    Violation {
        sentence: String,
        verdict: MatchResult,
        reply: oneshot::Sender<ViolationOutcome>,
    },
    ForgiveCheck {
        reply: Option<oneshot::Sender<bool>>,
    },
    Override {
        reply: oneshot::Sender<bool>,
    },
    Whiten {
        reply: oneshot::Sender<u32>,
    },
    Snapshot {
        reply: oneshot::Sender<ViolationState>,
    },
}

struct PenaltyContext {
    sanctions: Arc<SwapCell<SanctionConfig>>,
    incidents: Arc<dyn IncidentSink>,
    store: Arc<dyn ViolationStore>,
    directives: mpsc::UnboundedSender<Directive>,
    clock: Arc<dyn Clock>,
}

impl PenaltyContext {
    fn emit(&self, directive: Directive) {
        if self.directives.send(directive).is_err() {
            warn!("[PENALTY] enforcement channel closed; directive dropped");
        }
    }
}

struct PenaltyActor {
    machine_id: String,
    state: ViolationState,
    ctx: Arc<PenaltyContext>,
}

impl PenaltyActor {
    async fn run(mut self, mut mailbox: mpsc::Receiver<Command>) {
        while let Some(command) = mailbox.recv().await {
            match command {
                Command::Violation {
                    sentence,
                    verdict,
                    reply,
                } => {
                    let outcome = self.on_violation(&sentence, &verdict);
                    let _ = reply.send(outcome);
                }
                Command::ForgiveCheck { reply } => {
                    let forgiven = self.on_forgive_check();
                    if let Some(reply) = reply {
                        let _ = reply.send(forgiven);
                    }
                }
                Command::Override { reply } => {
                    let _ = reply.send(self.on_override());
                }
                Command::Whiten { reply } => {
                    let _ = reply.send(self.on_whiten());
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.state.clone());
                }
            }
        }
        debug!(machine_id = %self.machine_id, "[PENALTY] actor stopped");
    }

    fn persist(&self) {
        if let Err(e) = self.ctx.store.save(&self.machine_id, &self.state) {
            warn!(machine_id = %self.machine_id, error = %e, "[PENALTY] failed to persist violation state");
        }
    }

    fn on_violation(&mut self, sentence: &str, verdict: &MatchResult) -> ViolationOutcome {
        if !verdict.is_toxic {
            return ViolationOutcome::Clean;
        }

        let now = self.ctx.clock.now();
        if let Some(until) = self.state.suppressed_until.filter(|until| now < *until) {
            debug!(machine_id = %self.machine_id, "[PENALTY] violation inside lockdown window; suppressed");
            return ViolationOutcome::Suppressed { until };
        }
        self.state.clear_expired(now);

        self.state.count = self.state.count.saturating_add(1);
        self.state.last_violation_at = Some(now);
        let count = self.state.count;

        let incident = ToxicIncident::from_match(&self.machine_id, sentence, verdict, now);
        if let Err(e) = self.ctx.incidents.append(&incident) {
            warn!(machine_id = %self.machine_id, error = %e, "[PENALTY] failed to record incident");
        }

        let tier = self.ctx.sanctions.load().ladder.resolve(count);
        let outcome = match tier.action {
            SanctionAction::Warning => {
                warn!(
                    machine_id = %self.machine_id,
                    count,
                    matched = %incident.matched_canonical,
                    "[PENALTY] violation: warning"
                );
                self.ctx.emit(Directive::Warn {
                    machine_id: self.machine_id.clone(),
                    count,
                    message: tier.message.clone(),
                    warning_delay_secs: tier.warning_delay_secs,
                });
                ViolationOutcome::Warned { count, tier }
            }
            SanctionAction::Lockdown => {
                let until = now + tier.lockdown_duration();
                self.state.lockdown_active_until = Some(until);
                self.state.suppressed_until = Some(until);
                warn!(
                    machine_id = %self.machine_id,
                    count,
                    matched = %incident.matched_canonical,
                    duration_secs = tier.lockdown_duration_secs,
                    "[PENALTY] violation: lockdown"
                );
                self.ctx.emit(Directive::Lock {
                    machine_id: self.machine_id.clone(),
                    count,
                    message: tier.message.clone(),
                    until,
                    duration_secs: tier.lockdown_duration_secs,
                });
                ViolationOutcome::Locked { count, until, tier }
            }
        };

        self.persist();
        outcome
    }

    fn on_forgive_check(&mut self) -> bool {
        let now = self.ctx.clock.now();
        let mut dirty = self.state.clear_expired(now);

        let forgiven = if self.state.count == 0 || self.state.is_locked(now) {
            false
        } else {
            let window = self.ctx.sanctions.load().forgive_window();
            self.state
                .last_violation_at
                .map_or(true, |last| now - last >= window)
        };

        if forgiven {
            info!(
                machine_id = %self.machine_id,
                count = self.state.count,
                "[PENALTY] auto-forgive: violation count reset"
            );
            self.state.count = 0;
            dirty = true;
        }
        if dirty {
            self.persist();
        }
        forgiven
    }

    fn on_override(&mut self) -> bool {
        let now = self.ctx.clock.now();
        let was_locked = self.state.is_locked(now);
        self.state.lockdown_active_until = Some(now);
        self.state.suppressed_until = Some(now);
        info!(
            machine_id = %self.machine_id,
            was_locked,
            count = self.state.count,
            "[PENALTY] admin override"
        );
        self.ctx.emit(Directive::Unlock {
            machine_id: self.machine_id.clone(),
            reason: UnlockReason::Override,
        });
        self.persist();
        was_locked
    }

    fn on_whiten(&mut self) -> u32 {
        let now = self.ctx.clock.now();
        let previous = self.state.count;
        let was_locked = self.state.is_locked(now);
        self.state = ViolationState::default();
        info!(machine_id = %self.machine_id, previous, "[PENALTY] violations whitened");
        if was_locked {
            self.ctx.emit(Directive::Unlock {
                machine_id: self.machine_id.clone(),
                reason: UnlockReason::Whiten,
            });
        }
        self.persist();
        previous
    }
}

/// Routes commands to per-machine actors, spawning them on first use.
pub struct PenaltyManager {
    actors: DashMap<String, mpsc::Sender<Command>>,
    ctx: Arc<PenaltyContext>,
}

impl PenaltyManager {
    /// Create a manager and the receiving end of its directive channel.
    pub fn new(
        sanctions: Arc<SwapCell<SanctionConfig>>,
        incidents: Arc<dyn IncidentSink>,
        store: Arc<dyn ViolationStore>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<Directive>) {
        let (directives, directive_rx) = mpsc::unbounded_channel();
        let manager = Self {
            actors: DashMap::new(),
            ctx: Arc::new(PenaltyContext {
                sanctions,
                incidents,
                store,
                directives,
                clock,
            }),
        };
        (manager, directive_rx)
    }

    /// Sender for directives that originate outside the state machine (maintenance mode).
    pub fn directive_sender(&self) -> mpsc::UnboundedSender<Directive> {
        self.ctx.directives.clone()
    }

    /// Spawn the actor for `machine_id` now, loading any persisted state.
    pub fn ensure(&self, machine_id: &str) {
        let _ = self.mailbox(machine_id);
    }

    pub fn machines(&self) -> Vec<String> {
        self.actors.iter().map(|entry| entry.key().clone()).collect()
    }

    fn mailbox(&self, machine_id: &str) -> mpsc::Sender<Command> {
        let mut entry = self
            .actors
            .entry(machine_id.to_string())
            .or_insert_with(|| self.spawn_actor(machine_id));
        if entry.is_closed() {
            *entry = self.spawn_actor(machine_id);
        }
        entry.clone()
    }

    fn spawn_actor(&self, machine_id: &str) -> mpsc::Sender<Command> {
        let state = match self.ctx.store.load(machine_id) {
            Ok(Some(state)) => {
                info!(machine_id, count = state.count, "[PENALTY] restored violation state");
                state
            }
            Ok(None) => ViolationState::default(),
            Err(e) => {
                warn!(machine_id, error = %e, "[PENALTY] could not load violation state; starting clean");
                ViolationState::default()
            }
        };
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let actor = PenaltyActor {
            machine_id: machine_id.to_string(),
            state,
            ctx: Arc::clone(&self.ctx),
        };
        tokio::spawn(actor.run(rx));
        tx
    }

    /// Mailbox of a machine this manager already tracks or has persisted state for.
    /// Never creates state for an id nobody has reported.
    fn known_mailbox(&self, machine_id: &str) -> GuardResult<mpsc::Sender<Command>> {
        if self.actors.contains_key(machine_id) {
            return Ok(self.mailbox(machine_id));
        }
        match self.ctx.store.load(machine_id) {
            Ok(Some(_)) => Ok(self.mailbox(machine_id)),
            Ok(None) => Err(GuardError::UnknownMachine(machine_id.to_string())),
            Err(e) => {
                warn!(machine_id, error = %e, "[PENALTY] store lookup failed");
                Err(GuardError::UnknownMachine(machine_id.to_string()))
            }
        }
    }

    async fn request<R>(
        &self,
        mailbox: mpsc::Sender<Command>,
        machine_id: &str,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> GuardResult<R> {
        let (tx, rx) = oneshot::channel();
        mailbox
            .send(make(tx))
            .await
            .map_err(|_| GuardError::ChannelClosed(format!("penalty actor for {}", machine_id)))?;
        rx.await
            .map_err(|_| GuardError::ChannelClosed(format!("penalty actor for {}", machine_id)))
    }

    /// Report a detector verdict for `machine_id`.
    pub async fn report(
        &self,
        machine_id: &str,
        sentence: &str,
        verdict: MatchResult,
    ) -> GuardResult<ViolationOutcome> {
        let sentence = sentence.to_string();
        self.request(self.mailbox(machine_id), machine_id, |reply| Command::Violation {
            sentence,
            verdict,
            reply,
        })
        .await
    }

    pub async fn forgive_check(&self, machine_id: &str) -> GuardResult<bool> {
        let mailbox = self.known_mailbox(machine_id)?;
        self.request(mailbox, machine_id, |reply| Command::ForgiveCheck {
            reply: Some(reply),
        })
        .await
    }

    /// End any active lockdown. Count is unchanged. Returns whether a lockdown was active.
    pub async fn override_lockdown(&self, machine_id: &str) -> GuardResult<bool> {
        let mailbox = self.known_mailbox(machine_id)?;
        self.request(mailbox, machine_id, |reply| Command::Override { reply })
            .await
    }

    /// Zero the count (and clear any lockdown). Returns the previous count.
    /// Unknown machines are rejected with [`GuardError::UnknownMachine`].
    pub async fn whiten(&self, machine_id: &str) -> GuardResult<u32> {
        let mailbox = self.known_mailbox(machine_id)?;
        self.request(mailbox, machine_id, |reply| Command::Whiten { reply })
            .await
    }

    pub async fn snapshot(&self, machine_id: &str) -> GuardResult<ViolationState> {
        let mailbox = self.known_mailbox(machine_id)?;
        self.request(mailbox, machine_id, |reply| Command::Snapshot { reply })
            .await
    }

    /// Queue a forgive check on every known machine, every `every`, until cancelled.
    pub fn spawn_forgive_ticker(
        self: Arc<Self>,
        every: std::time::Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        for entry in self.actors.iter() {
                            if entry.value().try_send(Command::ForgiveCheck { reply: None }).is_err() {
                                debug!(machine_id = %entry.key(), "[PENALTY] mailbox busy; forgive check deferred");
                            }
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::incident::MemoryIncidentSink;
    use crate::sanction::{BeyondLadder, SanctionLadder, Trigger, DEFAULT_WARNING_MESSAGE};
    use crate::store::MemoryViolationStore;
    use chrono::Duration;

    const MACHINE: &str = "kiosk-01";

    struct Harness {
        manager: PenaltyManager,
        directives: mpsc::UnboundedReceiver<Directive>,
        clock: Arc<ManualClock>,
        incidents: Arc<MemoryIncidentSink>,
        store: Arc<MemoryViolationStore>,
    }

    fn harness_with(config: SanctionConfig) -> Harness {
        let clock = Arc::new(ManualClock::new());
        let incidents = Arc::new(MemoryIncidentSink::new());
        let store = Arc::new(MemoryViolationStore::new());
        let (manager, directives) = PenaltyManager::new(
            Arc::new(SwapCell::new(config)),
            incidents.clone(),
            store.clone(),
            clock.clone(),
        );
        Harness {
            manager,
            directives,
            clock,
            incidents,
            store,
        }
    }

    fn harness() -> Harness {
        harness_with(SanctionConfig::default())
    }

    fn toxic() -> MatchResult {
        MatchResult {
            is_toxic: true,
            matched_canonical: Some("anjing".to_string()),
            span: Some((0, 6)),
            corrected_sentence: "anjing".to_string(),
            matches: vec!["anjing".to_string()],
        }
    }

    #[tokio::test]
    async fn warn_warn_lock_then_suppress() {
        let mut h = harness();

        for expected in 1..=2 {
            let outcome = h.manager.report(MACHINE, "anjing", toxic()).await.unwrap();
            assert!(matches!(outcome, ViolationOutcome::Warned { count, .. } if count == expected));
        }
        let locked = h.manager.report(MACHINE, "anjing", toxic()).await.unwrap();
        let ViolationOutcome::Locked { count, until, .. } = locked else {
            panic!("expected lockdown");
        };
        assert_eq!(count, 3);
        assert_eq!(until, h.clock.now() + Duration::seconds(60));

        h.clock.advance(Duration::seconds(10));
        let fourth = h.manager.report(MACHINE, "anjing", toxic()).await.unwrap();
        assert!(matches!(fourth, ViolationOutcome::Suppressed { .. }));

        let state = h.manager.snapshot(MACHINE).await.unwrap();
        assert_eq!(state.count, 3);
        assert_eq!(state.phase(h.clock.now()), PenaltyPhase::Locked);
        assert_eq!(h.incidents.len(), 3);

        assert!(matches!(h.directives.recv().await, Some(Directive::Warn { count: 1, .. })));
        assert!(matches!(h.directives.recv().await, Some(Directive::Warn { count: 2, .. })));
        assert!(matches!(
            h.directives.recv().await,
            Some(Directive::Lock { count: 3, duration_secs: 60, .. })
        ));
        assert!(h.directives.try_recv().is_err());
    }

    #[tokio::test]
    async fn counting_resumes_after_lockdown_expires() {
        let h = harness();
        for _ in 0..3 {
            h.manager.report(MACHINE, "anjing", toxic()).await.unwrap();
        }
        h.clock.advance(Duration::seconds(61));
        let outcome = h.manager.report(MACHINE, "anjing", toxic()).await.unwrap();
        let ViolationOutcome::Warned { count, tier } = outcome else {
            panic!("expected warning");
        };
        assert_eq!(count, 4);
        assert_eq!(tier.message, DEFAULT_WARNING_MESSAGE);
    }

    #[tokio::test]
    async fn clean_verdict_records_nothing() {
        let h = harness();
        let outcome = h
            .manager
            .report(MACHINE, "halo", MatchResult::default())
            .await
            .unwrap();
        assert_eq!(outcome, ViolationOutcome::Clean);
        assert_eq!(h.manager.snapshot(MACHINE).await.unwrap().count, 0);
        assert!(h.incidents.is_empty());
    }

    #[tokio::test]
    async fn forgive_after_window_only() {
        let h = harness();
        h.manager.report(MACHINE, "anjing", toxic()).await.unwrap();

        h.clock.advance(Duration::minutes(30));
        assert!(!h.manager.forgive_check(MACHINE).await.unwrap());
        assert_eq!(h.manager.snapshot(MACHINE).await.unwrap().count, 1);

        h.clock.advance(Duration::minutes(31));
        assert!(h.manager.forgive_check(MACHINE).await.unwrap());
        let state = h.manager.snapshot(MACHINE).await.unwrap();
        assert_eq!(state.count, 0);
        assert_eq!(state.phase(h.clock.now()), PenaltyPhase::Clean);
    }

    #[tokio::test]
    async fn forgive_waits_for_lockdown_to_end() {
        let ladder = SanctionLadder::new(
            vec![SanctionTier::lockdown(Trigger::At(1), "locked", 600)],
            DEFAULT_WARNING_MESSAGE,
            BeyondLadder::Warning,
        )
        .unwrap();
        let h = harness_with(SanctionConfig {
            ladder,
            forgive_window_minutes: 1,
            ..SanctionConfig::default()
        });

        h.manager.report(MACHINE, "anjing", toxic()).await.unwrap();
        h.clock.advance(Duration::minutes(2));
        assert!(!h.manager.forgive_check(MACHINE).await.unwrap());

        h.clock.advance(Duration::minutes(9));
        assert!(h.manager.forgive_check(MACHINE).await.unwrap());
    }

    #[tokio::test]
    async fn override_keeps_count_and_whiten_zeroes_it() {
        let mut h = harness();
        for _ in 0..3 {
            h.manager.report(MACHINE, "anjing", toxic()).await.unwrap();
        }
        assert!(h.manager.override_lockdown(MACHINE).await.unwrap());

        let state = h.manager.snapshot(MACHINE).await.unwrap();
        assert_eq!(state.count, 3);
        assert!(!state.is_locked(h.clock.now()));

        // Next verdict is counted again, not suppressed.
        let outcome = h.manager.report(MACHINE, "anjing", toxic()).await.unwrap();
        assert!(matches!(outcome, ViolationOutcome::Warned { count: 4, .. }));

        assert_eq!(h.manager.whiten(MACHINE).await.unwrap(), 4);
        assert_eq!(h.manager.snapshot(MACHINE).await.unwrap().count, 0);
        let outcome = h.manager.report(MACHINE, "anjing", toxic()).await.unwrap();
        assert!(matches!(outcome, ViolationOutcome::Warned { count: 1, .. }));

        let mut saw_unlock = false;
        while let Ok(directive) = h.directives.try_recv() {
            if let Directive::Unlock { reason, .. } = directive {
                assert_eq!(reason, UnlockReason::Override);
                saw_unlock = true;
            }
        }
        assert!(saw_unlock);
    }

    #[tokio::test]
    async fn whiten_during_lockdown_unlocks() {
        let mut h = harness();
        for _ in 0..3 {
            h.manager.report(MACHINE, "anjing", toxic()).await.unwrap();
        }
        assert_eq!(h.manager.whiten(MACHINE).await.unwrap(), 3);
        let state = h.manager.snapshot(MACHINE).await.unwrap();
        assert_eq!(state, ViolationState::default());

        let mut last = None;
        while let Ok(directive) = h.directives.try_recv() {
            last = Some(directive);
        }
        assert!(matches!(
            last,
            Some(Directive::Unlock { reason: UnlockReason::Whiten, .. })
        ));
    }

    #[tokio::test]
    async fn machines_are_independent_and_state_is_persisted() {
        let h = harness();
        h.manager.report("a", "anjing", toxic()).await.unwrap();
        h.manager.report("a", "anjing", toxic()).await.unwrap();
        h.manager.report("b", "anjing", toxic()).await.unwrap();

        assert_eq!(h.manager.snapshot("a").await.unwrap().count, 2);
        assert_eq!(h.manager.snapshot("b").await.unwrap().count, 1);
        assert_eq!(h.store.load("a").unwrap().map(|s| s.count), Some(2));

        // A fresh manager over the same store picks the count back up.
        let (restarted, _rx) = PenaltyManager::new(
            Arc::new(SwapCell::new(SanctionConfig::default())),
            h.incidents.clone(),
            h.store.clone(),
            h.clock.clone(),
        );
        assert_eq!(restarted.snapshot("a").await.unwrap().count, 2);
        let mut machines = h.manager.machines();
        machines.sort();
        assert_eq!(machines, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn admin_operations_do_not_create_unknown_machines() {
        let h = harness();
        h.manager.ensure(MACHINE);

        assert!(matches!(
            h.manager.snapshot("ghost").await,
            Err(GuardError::UnknownMachine(id)) if id == "ghost"
        ));
        assert!(matches!(
            h.manager.whiten("ghost").await,
            Err(GuardError::UnknownMachine(_))
        ));
        assert!(matches!(
            h.manager.override_lockdown("ghost").await,
            Err(GuardError::UnknownMachine(_))
        ));
        assert!(matches!(
            h.manager.forgive_check("ghost").await,
            Err(GuardError::UnknownMachine(_))
        ));
        assert_eq!(h.manager.machines(), vec![MACHINE.to_string()]);
        assert_eq!(h.store.load("ghost").unwrap(), None);

        // Ensured machines answer even before their first verdict.
        assert_eq!(h.manager.snapshot(MACHINE).await.unwrap().count, 0);
        assert_eq!(h.manager.whiten(MACHINE).await.unwrap(), 0);
    }
}
