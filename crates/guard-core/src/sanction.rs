//! SanctionLadder: maps a violation count to a sanction tier.
//!
//! Exact-count tiers win over "every Nth" tiers. When nothing matches, the fallback
//! is a plain warning (or, with `beyond_ladder = "repeat_last"`, the last tier once the
//! count runs past the final exact trigger).
//!
//! The sanction document also carries the forgive window and the admin credential,
//! so it is reloaded and validated as one unit.

use crate::auth::{AuthPolicy, Credential};
use crate::error::{GuardError, GuardResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_WARNING_MESSAGE: &str =
    "Inappropriate language detected. Please mind your words.";
pub const DEFAULT_FORGIVE_WINDOW_MINUTES: u64 = 60;

/// Upper bound applied when converting configured spans to clock durations (~100 years).
const MAX_SPAN_SECS: u64 = 100 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SanctionAction {
    #[serde(rename = "WARNING", alias = "warning", alias = "Warning")]
    Warning,
    #[serde(rename = "LOCKDOWN", alias = "lockdown", alias = "Lockdown")]
    Lockdown,
}

/// When a tier fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Exactly on the n-th violation.
    At(u32),
    /// On every multiple of n.
    Every(u32),
}

impl Trigger {
    fn key(&self) -> u32 {
        match *self {
            Trigger::At(n) | Trigger::Every(n) => n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanctionTier {
    pub trigger: Trigger,
    #[serde(rename = "type")]
    pub action: SanctionAction,
    pub message: String,
    /// Lockdown length in seconds; always 0 for warnings.
    #[serde(rename = "duration")]
    pub lockdown_duration_secs: u64,
    /// Seconds the acknowledge control stays disabled on a warning.
    #[serde(rename = "warning_delay")]
    pub warning_delay_secs: u64,
}

impl SanctionTier {
    pub fn warning(trigger: Trigger, message: impl Into<String>, warning_delay_secs: u64) -> Self {
        Self {
            trigger,
            action: SanctionAction::Warning,
            message: message.into(),
            lockdown_duration_secs: 0,
            warning_delay_secs,
        }
    }

    pub fn lockdown(trigger: Trigger, message: impl Into<String>, duration_secs: u64) -> Self {
        Self {
            trigger,
            action: SanctionAction::Lockdown,
            message: message.into(),
            lockdown_duration_secs: duration_secs,
            warning_delay_secs: 0,
        }
    }

    pub fn is_lockdown(&self) -> bool {
        self.action == SanctionAction::Lockdown
    }

    pub fn lockdown_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lockdown_duration_secs.min(MAX_SPAN_SECS) as i64)
    }
}

/// What happens once the count runs past the last exact trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeyondLadder {
    #[default]
    Warning,
    RepeatLast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanctionLadder {
    tiers: Vec<SanctionTier>,
    default_warning_message: String,
    beyond_ladder: BeyondLadder,
}

impl Default for SanctionLadder {
    /// 1 -> warning, 2 -> warning, every 3rd -> 60 s lockdown.
    fn default() -> Self {
        Self {
            tiers: vec![
                SanctionTier::warning(Trigger::At(1), "First warning: mind your language.", 5),
                SanctionTier::warning(
                    Trigger::At(2),
                    "Second warning: the next violation locks this machine.",
                    15,
                ),
                SanctionTier::lockdown(
                    Trigger::Every(3),
                    "This machine is locked for breaking the language rules.",
                    60,
                ),
            ],
            default_warning_message: DEFAULT_WARNING_MESSAGE.to_string(),
            beyond_ladder: BeyondLadder::Warning,
        }
    }
}

impl SanctionLadder {
    pub fn new(
        tiers: Vec<SanctionTier>,
        default_warning_message: impl Into<String>,
        beyond_ladder: BeyondLadder,
    ) -> GuardResult<Self> {
        validate_tiers(&tiers)?;
        Ok(Self {
            tiers,
            default_warning_message: default_warning_message.into(),
            beyond_ladder,
        })
    }

    pub fn tiers(&self) -> &[SanctionTier] {
        &self.tiers
    }

    /// Tier for the given (1-based) violation count.
    pub fn resolve(&self, count: u32) -> SanctionTier {
        if count == 0 {
            return self.fallback(count);
        }

        if let Some(tier) = self
            .tiers
            .iter()
            .find(|t| matches!(t.trigger, Trigger::At(n) if n == count))
        {
            return tier.clone();
        }

        if let Some(tier) = self
            .tiers
            .iter()
            .filter(|t| matches!(t.trigger, Trigger::Every(n) if count % n == 0))
            .max_by_key(|t| t.trigger.key())
        {
            return tier.clone();
        }

        if self.beyond_ladder == BeyondLadder::RepeatLast {
            let last_exact = self
                .tiers
                .iter()
                .filter_map(|t| match t.trigger {
                    Trigger::At(n) => Some(n),
                    Trigger::Every(_) => None,
                })
                .max()
                .unwrap_or(0);
            if count > last_exact {
                if let Some(last) = self.tiers.last() {
                    return last.clone();
                }
            }
        }

        self.fallback(count)
    }

    fn fallback(&self, count: u32) -> SanctionTier {
        SanctionTier::warning(Trigger::At(count), self.default_warning_message.clone(), 0)
    }
}

fn validate_tiers(tiers: &[SanctionTier]) -> GuardResult<()> {
    if tiers.is_empty() {
        return Err(GuardError::config("sanction ladder has no tiers"));
    }

    let mut previous: Option<u32> = None;
    for (idx, tier) in tiers.iter().enumerate() {
        let key = tier.trigger.key();
        if key == 0 {
            return Err(GuardError::config(format!(
                "tier {}: trigger must be at least 1",
                idx + 1
            )));
        }
        if let Some(prev) = previous {
            if key <= prev {
                return Err(GuardError::config(format!(
                    "tier {}: trigger {} is not greater than the previous trigger {}",
                    idx + 1,
                    key,
                    prev
                )));
            }
        }
        previous = Some(key);

        match tier.action {
            SanctionAction::Warning if tier.lockdown_duration_secs != 0 => {
                return Err(GuardError::config(format!(
                    "tier {}: a warning cannot carry a lockdown duration",
                    idx + 1
                )));
            }
            SanctionAction::Lockdown if tier.lockdown_duration_secs == 0 => {
                return Err(GuardError::config(format!(
                    "tier {}: a lockdown needs a positive duration",
                    idx + 1
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RawTier {
    #[serde(rename = "type")]
    action: SanctionAction,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    duration: i64,
    #[serde(default)]
    warning_delay: i64,
    #[serde(default)]
    trigger: Option<Trigger>,
}

#[derive(Debug, Deserialize)]
struct RawSanctionConfig {
    #[serde(default, alias = "sanction_list")]
    tiers: Option<Vec<RawTier>>,
    #[serde(default, alias = "PenaltyResetMinutes")]
    forgive_window_minutes: Option<i64>,
    #[serde(default)]
    admin_credential: Option<String>,
    #[serde(default)]
    password_hash: Option<String>,
    #[serde(default)]
    password_salt: Option<String>,
    #[serde(default)]
    default_warning_message: Option<String>,
    #[serde(default)]
    beyond_ladder: Option<BeyondLadder>,
    #[serde(default)]
    max_auth_attempts: Option<u32>,
    #[serde(default)]
    auth_lockout_minutes: Option<i64>,
}

fn non_negative(value: i64, what: &str) -> GuardResult<u64> {
    u64::try_from(value).map_err(|_| GuardError::config(format!("{} must not be negative", what)))
}

/// Validated sanction document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanctionConfig {
    #[serde(flatten)]
    pub ladder: SanctionLadder,
    pub forgive_window_minutes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_credential: Option<String>,
    pub max_auth_attempts: u32,
    pub auth_lockout_minutes: u64,
}

impl Default for SanctionConfig {
    fn default() -> Self {
        let policy = AuthPolicy::default();
        Self {
            ladder: SanctionLadder::default(),
            forgive_window_minutes: DEFAULT_FORGIVE_WINDOW_MINUTES,
            admin_credential: None,
            max_auth_attempts: policy.max_attempts,
            auth_lockout_minutes: policy.lockout_minutes(),
        }
    }
}

impl SanctionConfig {
    /// Parse and validate a raw sanction document.
    pub fn parse(raw: &str) -> GuardResult<Self> {
        let doc: RawSanctionConfig = serde_json::from_str(raw)
            .map_err(|e| GuardError::config(format!("malformed sanction config: {}", e)))?;
        let defaults = Self::default();

        let ladder = match doc.tiers {
            None => SanctionLadder {
                default_warning_message: doc
                    .default_warning_message
                    .unwrap_or_else(|| DEFAULT_WARNING_MESSAGE.to_string()),
                beyond_ladder: doc.beyond_ladder.unwrap_or_default(),
                ..defaults.ladder
            },
            Some(raw_tiers) => {
                let mut tiers = Vec::with_capacity(raw_tiers.len());
                for (idx, raw) in raw_tiers.into_iter().enumerate() {
                    let position = u32::try_from(idx + 1)
                        .map_err(|_| GuardError::config("too many sanction tiers"))?;
                    let mut duration =
                        non_negative(raw.duration, &format!("tier {} duration", position))?;
                    if raw.action == SanctionAction::Warning && duration != 0 {
                        // Older schedules carried the lock length on warning tiers too.
                        warn!(
                            tier = position,
                            duration, "[SANCTION] ignoring duration on a warning tier"
                        );
                        duration = 0;
                    }
                    tiers.push(SanctionTier {
                        trigger: raw.trigger.unwrap_or(Trigger::At(position)),
                        action: raw.action,
                        message: raw
                            .message
                            .unwrap_or_else(|| DEFAULT_WARNING_MESSAGE.to_string()),
                        lockdown_duration_secs: duration,
                        warning_delay_secs: non_negative(
                            raw.warning_delay,
                            &format!("tier {} warning_delay", position),
                        )?,
                    });
                }
                SanctionLadder::new(
                    tiers,
                    doc.default_warning_message
                        .unwrap_or_else(|| DEFAULT_WARNING_MESSAGE.to_string()),
                    doc.beyond_ladder.unwrap_or_default(),
                )?
            }
        };

        let forgive_window_minutes = match doc.forgive_window_minutes {
            Some(m) => non_negative(m, "forgive_window_minutes")?,
            None => DEFAULT_FORGIVE_WINDOW_MINUTES,
        };
        if forgive_window_minutes == 0 {
            return Err(GuardError::config("forgive_window_minutes must be positive"));
        }

        let admin_credential = match (doc.admin_credential, doc.password_hash, doc.password_salt) {
            (Some(encoded), _, _) => {
                Credential::parse(&encoded).map_err(|e| GuardError::config(e.to_string()))?;
                Some(encoded)
            }
            (None, Some(hash), Some(salt)) => {
                let credential = Credential::from_parts(&salt, &hash)
                    .map_err(|e| GuardError::config(e.to_string()))?;
                Some(credential.encode())
            }
            (None, Some(_), None) | (None, None, Some(_)) => {
                return Err(GuardError::config(
                    "password_hash and password_salt must be given together",
                ));
            }
            (None, None, None) => None,
        };

        let max_auth_attempts = doc.max_auth_attempts.unwrap_or(defaults.max_auth_attempts);
        if max_auth_attempts == 0 {
            return Err(GuardError::config("max_auth_attempts must be at least 1"));
        }
        let auth_lockout_minutes = match doc.auth_lockout_minutes {
            Some(m) => non_negative(m, "auth_lockout_minutes")?,
            None => defaults.auth_lockout_minutes,
        };

        Ok(Self {
            ladder,
            forgive_window_minutes,
            admin_credential,
            max_auth_attempts,
            auth_lockout_minutes,
        })
    }

    /// Load from disk. A missing file yields the default ladder.
    pub fn open(path: &Path) -> GuardResult<Self> {
        if !path.exists() {
            warn!("[SANCTION] {:?} not found; using the default ladder", path);
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config = Self::parse(&raw)?;
        info!(
            tiers = config.ladder.tiers().len(),
            forgive_window_minutes = config.forgive_window_minutes,
            "[SANCTION] loaded {:?}",
            path
        );
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> GuardResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn forgive_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.forgive_window_minutes.min(MAX_SPAN_SECS / 60) as i64)
    }

    pub fn auth_policy(&self) -> AuthPolicy {
        AuthPolicy::new(self.max_auth_attempts, self.auth_lockout_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ladder_warns_twice_then_locks_every_third() {
        let ladder = SanctionLadder::default();
        assert_eq!(ladder.resolve(1).action, SanctionAction::Warning);
        assert_eq!(ladder.resolve(2).action, SanctionAction::Warning);
        let third = ladder.resolve(3);
        assert!(third.is_lockdown());
        assert_eq!(third.lockdown_duration_secs, 60);
        assert_eq!(ladder.resolve(4).message, DEFAULT_WARNING_MESSAGE);
        assert!(ladder.resolve(6).is_lockdown());
    }

    #[test]
    fn exact_tier_beats_modulo_tier() {
        let ladder = SanctionLadder::new(
            vec![
                SanctionTier::lockdown(Trigger::Every(2), "every second", 30),
                SanctionTier::warning(Trigger::At(4), "exact four", 0),
            ],
            "fallback",
            BeyondLadder::Warning,
        )
        .unwrap();
        assert!(ladder.resolve(2).is_lockdown());
        assert_eq!(ladder.resolve(4).message, "exact four");
        assert_eq!(ladder.resolve(5).message, "fallback");
    }

    #[test]
    fn positional_tiers_from_legacy_list() {
        let raw = r#"{
            "sanction_list": [
                { "type": "WARNING", "message": "w1", "duration": 0, "warning_delay": 5 },
                { "type": "WARNING", "message": "w2", "duration": 0, "warning_delay": 15 },
                { "type": "LOCKDOWN", "message": "l3", "duration": 60, "warning_delay": 0 },
                { "type": "LOCKDOWN", "message": "l4", "duration": 300, "warning_delay": 0 }
            ],
            "PenaltyResetMinutes": 30,
            "beyond_ladder": "repeat_last"
        }"#;
        let config = SanctionConfig::parse(raw).unwrap();
        assert_eq!(config.forgive_window_minutes, 30);
        let ladder = &config.ladder;
        assert_eq!(ladder.resolve(2).warning_delay_secs, 15);
        assert_eq!(ladder.resolve(3).lockdown_duration_secs, 60);
        assert_eq!(ladder.resolve(9).message, "l4");
    }

    #[test]
    fn rejects_malformed_schedules() {
        let cases = [
            r#"{ "tiers": [] }"#,
            r#"{ "tiers": [ { "type": "WARNING", "trigger": { "at": 2 } }, { "type": "WARNING", "trigger": { "at": 2 } } ] }"#,
            r#"{ "tiers": [ { "type": "LOCKDOWN", "duration": 60, "trigger": { "every": 0 } } ] }"#,
            r#"{ "tiers": [ { "type": "LOCKDOWN", "duration": 0 } ] }"#,
            r#"{ "tiers": [ { "type": "LOCKDOWN", "duration": -5 } ] }"#,
            r#"{ "tiers": [ { "type": "BANHAMMER" } ] }"#,
            r#"{ "forgive_window_minutes": -1 }"#,
            r#"{ "admin_credential": "plaintext" }"#,
            r#"{ "password_hash": "abcd" }"#,
            "not json",
        ];
        for raw in cases {
            let err = SanctionConfig::parse(raw).unwrap_err();
            assert!(err.is_config(), "expected config error for {}", raw);
        }
    }

    #[test]
    fn legacy_warning_duration_is_ignored() {
        let config = SanctionConfig::parse(
            r#"{ "tiers": [
                { "type": "WARNING", "message": "w1", "duration": 60 },
                { "type": "LOCKDOWN", "message": "l2", "duration": 60 }
            ] }"#,
        )
        .unwrap();
        let first = config.ladder.resolve(1);
        assert_eq!(first.action, SanctionAction::Warning);
        assert_eq!(first.lockdown_duration_secs, 0);
        assert_eq!(config.ladder.resolve(2).lockdown_duration_secs, 60);

        assert!(SanctionConfig::parse(r#"{ "tiers": [ { "type": "WARNING", "duration": -1 } ] }"#)
            .unwrap_err()
            .is_config());
    }

    #[test]
    fn missing_tiers_use_default_ladder() {
        let config = SanctionConfig::parse(r#"{ "forgive_window_minutes": 90 }"#).unwrap();
        assert_eq!(config.ladder, SanctionLadder::default());
        assert_eq!(config.forgive_window(), chrono::Duration::minutes(90));
    }

    #[test]
    fn saved_config_parses_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sanctions.json");
        let mut config = SanctionConfig::default();
        config.admin_credential = Some(Credential::derive("hunter2").encode());
        config.save(&path).unwrap();
        assert_eq!(SanctionConfig::open(&path).unwrap(), config);
    }
}
