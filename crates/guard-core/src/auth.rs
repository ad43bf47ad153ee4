//! Admin authentication gate.
//!
//! Credentials are stored as `sha256$<salt-hex>$<digest-hex>` where the digest is
//! SHA-256 over the salt string followed by the password. Verification compares in
//! constant time. Failed attempts accumulate in an [`AdminSession`]; once the policy
//! limit is reached every call is rejected until the lockout expires, without the
//! password being looked at.

use crate::clock::Clock;
use crate::error::AuthError;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, PoisonError};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

pub const CREDENTIAL_SCHEME: &str = "sha256";

/// Factory password used when no credential has been configured yet.
pub const FACTORY_DEFAULT_PASSWORD: &str = "admin123";

const SALT_BYTES: usize = 16;

/// Salted SHA-256 admin credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    salt: String,
    digest: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential").field("salt", &self.salt).finish_non_exhaustive()
    }
}

impl Credential {
    /// Hash `password` under a fresh random salt.
    pub fn derive(password: &str) -> Self {
        let mut salt = [0u8; SALT_BYTES];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::with_salt(&hex::encode(salt), password)
    }

    pub fn with_salt(salt: &str, password: &str) -> Self {
        Self {
            salt: salt.to_string(),
            digest: digest(salt, password),
        }
    }

    /// Build from a separately stored salt and hex digest.
    pub fn from_parts(salt: &str, digest_hex: &str) -> Result<Self, AuthError> {
        let salt = salt.trim();
        let digest_hex = digest_hex.trim().to_ascii_lowercase();
        if salt.is_empty() || salt.contains('$') {
            return Err(AuthError::MalformedCredential("invalid salt".to_string()));
        }
        match hex::decode(&digest_hex) {
            Ok(bytes) if bytes.len() == 32 => Ok(Self {
                salt: salt.to_string(),
                digest: digest_hex,
            }),
            _ => Err(AuthError::MalformedCredential(
                "digest must be 64 hex characters".to_string(),
            )),
        }
    }

    /// Parse the `sha256$salt$digest` form.
    pub fn parse(encoded: &str) -> Result<Self, AuthError> {
        let mut parts = encoded.trim().split('$');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(CREDENTIAL_SCHEME), Some(salt), Some(digest_hex), None) => {
                Self::from_parts(salt, digest_hex)
            }
            _ => Err(AuthError::MalformedCredential(format!(
                "expected `{}$<salt>$<digest>`",
                CREDENTIAL_SCHEME
            ))),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}${}${}", CREDENTIAL_SCHEME, self.salt, self.digest)
    }

    pub fn verify(&self, password: &str) -> bool {
        let candidate = digest(&self.salt, password);
        candidate.as_bytes().ct_eq(self.digest.as_bytes()).into()
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPolicy {
    pub max_attempts: u32,
    pub lockout: Duration,
}

impl AuthPolicy {
    pub fn new(max_attempts: u32, lockout_minutes: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            lockout: Duration::minutes(lockout_minutes.min(i64::MAX as u64 / 60_000) as i64),
        }
    }

    pub fn lockout_minutes(&self) -> u64 {
        self.lockout.num_minutes().max(0) as u64
    }
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self::new(3, 30)
    }
}

/// Failed-attempt bookkeeping. Lives for the process lifetime; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminSession {
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl AdminSession {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }
}

/// Single decision point for every admin action.
pub fn authenticate(
    credential: &Credential,
    session: &mut AdminSession,
    password: &str,
    now: DateTime<Utc>,
    policy: &AuthPolicy,
) -> Result<(), AuthError> {
    if let Some(until) = session.locked_until {
        if now < until {
            let remaining_ms = (until - now).num_milliseconds().max(0) as u64;
            return Err(AuthError::LockedOut {
                remaining_secs: remaining_ms.div_ceil(1000),
            });
        }
        session.locked_until = None;
        session.failed_attempts = 0;
    }

    if credential.verify(password) {
        session.failed_attempts = 0;
        return Ok(());
    }

    session.failed_attempts += 1;
    if session.failed_attempts >= policy.max_attempts {
        session.locked_until = Some(now + policy.lockout);
        warn!(
            attempts = session.failed_attempts,
            lockout_minutes = policy.lockout_minutes(),
            "[AUTH] too many failed admin attempts; locking authentication"
        );
    } else {
        warn!(
            attempts = session.failed_attempts,
            max = policy.max_attempts,
            "[AUTH] invalid admin password"
        );
    }
    Err(AuthError::InvalidCredential)
}

/// Owns the process-wide [`AdminSession`] and applies [`authenticate`] under a lock.
pub struct AuthGate {
    session: Mutex<AdminSession>,
    clock: Arc<dyn Clock>,
}

impl AuthGate {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            session: Mutex::new(AdminSession::default()),
            clock,
        }
    }

    pub fn check(
        &self,
        credential: &Credential,
        policy: &AuthPolicy,
        password: &str,
    ) -> Result<(), AuthError> {
        let now = self.clock.now();
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let result = authenticate(credential, &mut session, password, now, policy);
        if result.is_ok() {
            info!("[AUTH] admin authenticated");
        }
        result
    }

    pub fn session(&self) -> AdminSession {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn known_digest_matches_salt_then_password() {
        let credential = Credential::with_salt("abc", "admin123");
        let expected = hex::encode(Sha256::digest(b"abcadmin123"));
        assert_eq!(credential.encode(), format!("sha256$abc${}", expected));
        assert!(credential.verify("admin123"));
        assert!(!credential.verify("admin124"));
    }

    #[test]
    fn encode_parse_and_fresh_salts() {
        let a = Credential::derive("secret");
        let b = Credential::derive("secret");
        assert_ne!(a.encode(), b.encode());
        let parsed = Credential::parse(&a.encode()).unwrap();
        assert!(parsed.verify("secret"));
        assert!(Credential::parse("md5$x$y").is_err());
        assert!(Credential::parse("sha256$salt$nothex").is_err());
    }

    #[test]
    fn lockout_after_max_attempts_then_recovers() {
        let credential = Credential::derive("right");
        let policy = AuthPolicy::default();
        let mut session = AdminSession::default();
        let t0 = Utc::now();

        for _ in 0..3 {
            assert_eq!(
                authenticate(&credential, &mut session, "wrong", t0, &policy),
                Err(AuthError::InvalidCredential)
            );
        }

        // Correct password is refused while locked.
        let locked = authenticate(&credential, &mut session, "right", t0 + Duration::minutes(29), &policy);
        assert_eq!(locked, Err(AuthError::LockedOut { remaining_secs: 60 }));

        let after = t0 + Duration::minutes(30);
        assert!(authenticate(&credential, &mut session, "right", after, &policy).is_ok());
        assert_eq!(session, AdminSession::default());
    }

    #[test]
    fn success_resets_failure_counter() {
        let credential = Credential::derive("right");
        let policy = AuthPolicy::default();
        let mut session = AdminSession::default();
        let now = Utc::now();
        let _ = authenticate(&credential, &mut session, "wrong", now, &policy);
        let _ = authenticate(&credential, &mut session, "wrong", now, &policy);
        assert!(authenticate(&credential, &mut session, "right", now, &policy).is_ok());
        assert_eq!(session.failed_attempts, 0);
        let _ = authenticate(&credential, &mut session, "wrong", now, &policy);
        assert!(!session.is_locked(now));
    }

    #[test]
    fn gate_uses_clock() {
        let clock = Arc::new(ManualClock::new());
        let gate = AuthGate::new(clock.clone());
        let credential = Credential::derive("pw");
        let policy = AuthPolicy::new(2, 1);
        assert!(gate.check(&credential, &policy, "x").is_err());
        assert!(gate.check(&credential, &policy, "x").is_err());
        assert!(matches!(
            gate.check(&credential, &policy, "pw"),
            Err(AuthError::LockedOut { .. })
        ));
        clock.advance(Duration::minutes(1));
        assert!(gate.check(&credential, &policy, "pw").is_ok());
    }
}
