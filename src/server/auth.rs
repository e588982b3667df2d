//! Password gate with per-IP failure counting
//!
//! Failed attempts are counted per client IP inside a window that starts at
//! the first failure. Once `max_attempts` failures are recorded the IP is
//! locked out until the window expires. A successful verification clears
//! the IP's counter.
//!
//! Attempt bookkeeping lives in SQLite. When that storage fails the gate
//! fails open: the attempt is judged on the password alone and the error is
//! logged.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, SubsecRound, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::error::SyncError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS auth_attempts (
    ip TEXT PRIMARY KEY,
    failures INTEGER NOT NULL,
    window_started_at INTEGER NOT NULL
);";

/// Outcome of a password check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected {
        attempts_left: u32,
        locked: bool,
        reset_time: Option<DateTime<Utc>>,
    },
    /// The IP is already locked out; the password was not checked.
    Locked { reset_time: DateTime<Utc> },
}

/// `POST /auth/verify` success body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_left: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    /// Unix millis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<i64>,
}

/// `POST /auth/verify` 429 body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedResponse {
    pub reset_time: i64,
}

struct AttemptWindow {
    failures: u32,
    started_at: DateTime<Utc>,
}

pub struct AuthGate {
    password: Option<String>,
    max_attempts: u32,
    window: Duration,
    db: Mutex<Connection>,
}

impl AuthGate {
    pub fn open(path: &Path, config: &AuthConfig) -> Result<Self, SyncError> {
        let db = Connection::open(path)?;
        db.execute_batch(SCHEMA)?;
        Ok(Self::with_connection(db, config))
    }

    pub fn open_in_memory(config: &AuthConfig) -> Result<Self, SyncError> {
        let db = Connection::open_in_memory()?;
        db.execute_batch(SCHEMA)?;
        Ok(Self::with_connection(db, config))
    }

    fn with_connection(db: Connection, config: &AuthConfig) -> Self {
        if config.password.is_none() {
            warn!("No auth password configured, every verification will be rejected");
        }
        Self {
            password: config.password.clone(),
            max_attempts: config.max_attempts.max(1),
            window: Duration::seconds(config.window_secs as i64),
            db: Mutex::new(db),
        }
    }

    /// Check `password` on behalf of `ip` at time `now`.
    pub fn verify(&self, ip: &str, password: &str, now: DateTime<Utc>) -> Verdict {
        let window = match self.load_window(ip, now) {
            Ok(window) => window,
            Err(e) => {
                warn!(ip, error = %e, "Attempt lookup failed, failing open");
                None
            }
        };

        if let Some(w) = &window {
            if w.failures >= self.max_attempts {
                return Verdict::Locked {
                    reset_time: w.started_at + self.window,
                };
            }
        }

        let valid = self.password.as_deref().is_some_and(|expected| expected == password);
        if valid {
            if let Err(e) = self.clear(ip) {
                warn!(ip, error = %e, "Failed to clear attempt counter");
            }
            info!(ip, "Password accepted");
            return Verdict::Accepted;
        }

        let failures = window.as_ref().map(|w| w.failures).unwrap_or(0) + 1;
        // Stored as Unix millis, so a new window starts on a whole millisecond.
        let started_at = window
            .as_ref()
            .map(|w| w.started_at)
            .unwrap_or_else(|| now.trunc_subsecs(3));
        if let Err(e) = self.record_failure(ip, failures, started_at) {
            warn!(ip, error = %e, "Failed to record attempt, failing open");
        }

        let locked = failures >= self.max_attempts;
        if locked {
            warn!(ip, failures, "IP locked out");
        }
        Verdict::Rejected {
            attempts_left: self.max_attempts.saturating_sub(failures),
            locked,
            reset_time: locked.then(|| started_at + self.window),
        }
    }

    /// Current window for `ip`; expired windows are dropped.
    fn load_window(&self, ip: &str, now: DateTime<Utc>) -> Result<Option<AttemptWindow>, SyncError> {
        let db = self.db.lock().map_err(|_| SyncError::Transport("attempt store poisoned".into()))?;
        let row: Option<(u32, i64)> = db
            .query_row(
                "SELECT failures, window_started_at FROM auth_attempts WHERE ip = ?1",
                [ip],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((failures, started_ms)) = row else {
            return Ok(None);
        };
        let started_at = Utc
            .timestamp_millis_opt(started_ms)
            .single()
            .unwrap_or(now);

        if started_at + self.window <= now {
            db.execute("DELETE FROM auth_attempts WHERE ip = ?1", [ip])?;
            return Ok(None);
        }
        Ok(Some(AttemptWindow {
            failures,
            started_at,
        }))
    }

    fn record_failure(&self, ip: &str, failures: u32, started_at: DateTime<Utc>) -> Result<(), SyncError> {
        let db = self.db.lock().map_err(|_| SyncError::Transport("attempt store poisoned".into()))?;
        db.execute(
            "INSERT INTO auth_attempts (ip, failures, window_started_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(ip) DO UPDATE SET failures = ?2, window_started_at = ?3",
            params![ip, failures, started_at.timestamp_millis()],
        )?;
        Ok(())
    }

    fn clear(&self, ip: &str) -> Result<(), SyncError> {
        let db = self.db.lock().map_err(|_| SyncError::Transport("attempt store poisoned".into()))?;
        db.execute("DELETE FROM auth_attempts WHERE ip = ?1", [ip])?;
        Ok(())
    }
}

impl Verdict {
    /// Split into the HTTP body the gate answers with.
    pub fn into_response_body(self) -> Result<VerifyResponse, LockedResponse> {
        match self {
            Verdict::Accepted => Ok(VerifyResponse {
                valid: true,
                attempts_left: None,
                locked: None,
                reset_time: None,
            }),
            Verdict::Rejected {
                attempts_left,
                locked,
                reset_time,
            } => Ok(VerifyResponse {
                valid: false,
                attempts_left: Some(attempts_left),
                locked: Some(locked),
                reset_time: reset_time.map(|t| t.timestamp_millis()),
            }),
            Verdict::Locked { reset_time } => Err(LockedResponse {
                reset_time: reset_time.timestamp_millis(),
            }),
        }
    }
}
