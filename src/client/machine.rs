//! Sync phase state machine with round-trip ownership
//!
//! ```text
//!            local edit               debounce / manual
//!   Idle ───────────────▶ Pending ───────────────────────▶ Syncing(push)
//!    │  ▲                   ▲                                  │
//!    │  │  owner done,      │  owner done, queue non-empty     │
//!    │  └─ queue empty ─────┴──────────────────────────────────┘
//!    │ poll tick (visible)
//!    └──────────────▶ Syncing(Poll) ──owner done──▶ Idle
//! ```
//!
//! Only one round trip owns the in-flight slot. Every round trip gets an
//! [`OwnerToken`]; when it completes, only the current owner may move the
//! phase on. A pull-only poll may be superseded by a push, a push is never
//! superseded.

use serde::Serialize;
use tracing::debug;

/// What started a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTrigger {
    Debounce,
    Manual,
    /// Pull-only, from the periodic timer or a return to visibility.
    Poll,
}

impl SyncTrigger {
    pub fn pushes(&self) -> bool {
        !matches!(self, SyncTrigger::Poll)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "trigger")]
pub enum SyncPhase {
    Idle,
    Pending,
    Syncing(SyncTrigger),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerToken(u64);

#[derive(Debug)]
pub struct SyncMachine {
    phase: SyncPhase,
    owner: Option<(OwnerToken, SyncTrigger)>,
    next_token: u64,
}

impl Default for SyncMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMachine {
    pub fn new() -> Self {
        Self {
            phase: SyncPhase::Idle,
            owner: None,
            next_token: 0,
        }
    }

    /// Start in `Pending` when changes were reloaded from disk.
    pub fn with_pending(has_pending: bool) -> Self {
        let mut machine = Self::new();
        if has_pending {
            machine.phase = SyncPhase::Pending;
        }
        machine
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn in_flight(&self) -> Option<SyncTrigger> {
        self.owner.map(|(_, trigger)| trigger)
    }

    pub fn is_owner(&self, token: OwnerToken) -> bool {
        self.owner.is_some_and(|(owner, _)| owner == token)
    }

    /// A local change was queued.
    pub fn on_local_change(&mut self) {
        match self.phase {
            SyncPhase::Idle | SyncPhase::Pending => self.phase = SyncPhase::Pending,
            // The round trip in flight decides where to land once it is done.
            SyncPhase::Syncing(_) => {}
        }
    }

    /// Claim the in-flight slot for `trigger`.
    ///
    /// Returns `None` when the request is a no-op: a poll while anything
    /// else is in flight or changes are pending, or a push while another
    /// push is in flight. A push supersedes an in-flight poll.
    pub fn try_begin(&mut self, trigger: SyncTrigger) -> Option<OwnerToken> {
        match (trigger, self.owner) {
            (SyncTrigger::Poll, Some(_)) => return None,
            (SyncTrigger::Poll, None) if self.phase != SyncPhase::Idle => return None,
            (_, Some((_, current))) if current.pushes() => return None,
            _ => {}
        }

        if let Some((stale, _)) = self.owner {
            debug!(?stale, ?trigger, "Superseding in-flight poll");
        }

        self.next_token += 1;
        let token = OwnerToken(self.next_token);
        self.owner = Some((token, trigger));
        self.phase = SyncPhase::Syncing(trigger);
        debug!(?token, ?trigger, "Sync started");
        Some(token)
    }

    /// A round trip finished. Returns false for a stale token, which leaves
    /// the phase untouched.
    pub fn finish(&mut self, token: OwnerToken, has_pending: bool) -> bool {
        if !self.is_owner(token) {
            debug!(?token, "Ignoring stale completion");
            return false;
        }
        self.owner = None;
        self.phase = if has_pending {
            SyncPhase::Pending
        } else {
            SyncPhase::Idle
        };
        debug!(?token, phase = ?self.phase, "Sync finished");
        true
    }
}
