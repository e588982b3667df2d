//! Sync scheduler - decides when to push and pull
//!
//! Runs as a single task. Everything that touches the item cache or the
//! pending queue happens on that task; network round trips are spawned and
//! report back over a channel, tagged with the [`OwnerToken`] they were
//! started under.
//!
//! Sources of work:
//! - commands from a [`SyncHandle`] (local edits, sync now, visibility)
//! - the debounce deadline, re-armed on every local edit
//! - the periodic poll timer, acted on only while idle and visible
//! - round-trip completions
//!
//! There is no backoff. A transient push failure re-arms the debounce and a
//! failed pull waits for the next poll tick. A rejected push stays queued
//! until the next edit or manual sync.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::handle::{ClientCommand, LocalMutation, SyncHandle};
use super::machine::{OwnerToken, SyncMachine, SyncPhase, SyncTrigger};
use super::queue::PendingChange;
use super::state_store::{ClientState, ClientStateStore};
use super::transport::SyncTransport;
use crate::config::ClientConfig;
use crate::error::SyncError;
use crate::model::{ChangesPage, Item, NewChange};

/// Shortest poll period the timer accepts.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Quiet period after the last local edit before pushing
    pub debounce: Duration,
    /// Background pull interval while idle and visible
    pub poll_interval: Duration,
}

impl From<&ClientConfig> for SchedulerConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            debounce: config.debounce(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Point-in-time view of the scheduler, for UIs and tests.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    pub phase: SyncPhase,
    pub cursor: u64,
    /// Visible items only
    pub items: Vec<Item>,
    pub pending: Vec<NewChange>,
    pub debounce_armed: bool,
    pub visible: bool,
}

enum RoundTripOutcome {
    PushFailed(SyncError),
    Done {
        /// Sequence number returned by a successful push
        acknowledged_through: Option<u64>,
        pull: Result<ChangesPage, SyncError>,
    },
}

struct Completion {
    token: OwnerToken,
    trigger: SyncTrigger,
    pushed: Vec<PendingChange>,
    outcome: RoundTripOutcome,
}

/// Push `changes` (if any), then pull from the resulting cursor.
async fn execute(transport: &dyn SyncTransport, changes: &[NewChange], cursor: u64) -> RoundTripOutcome {
    let mut pull_from = cursor;
    let mut acknowledged_through = None;

    if !changes.is_empty() {
        match transport.push(changes).await {
            Ok(sequence_number) => {
                acknowledged_through = Some(sequence_number);
                pull_from = cursor.max(sequence_number);
            }
            Err(e) => return RoundTripOutcome::PushFailed(e),
        }
    }

    let pull = transport.changes_since(pull_from).await;
    RoundTripOutcome::Done {
        acknowledged_through,
        pull,
    }
}

pub struct SyncScheduler {
    config: SchedulerConfig,
    transport: Arc<dyn SyncTransport>,
    state: ClientState,
    machine: SyncMachine,
    store: Option<ClientStateStore>,
    debounce_deadline: Option<Instant>,
    visible: bool,
    completions_tx: mpsc::Sender<Completion>,
    completions_rx: mpsc::Receiver<Completion>,
}

impl SyncScheduler {
    pub fn new(config: SchedulerConfig, transport: Arc<dyn SyncTransport>, state: ClientState) -> Self {
        let (completions_tx, completions_rx) = mpsc::channel(16);
        Self {
            config,
            transport,
            machine: SyncMachine::with_pending(!state.queue.is_empty()),
            state,
            store: None,
            debounce_deadline: None,
            visible: true,
            completions_tx,
            completions_rx,
        }
    }

    /// Load state from `store` and save back to it after every change.
    pub fn with_state_store(
        config: SchedulerConfig,
        transport: Arc<dyn SyncTransport>,
        store: ClientStateStore,
    ) -> Result<Self, SyncError> {
        let state = store.load()?;
        let mut scheduler = Self::new(config, transport, state);
        scheduler.store = Some(store);
        Ok(scheduler)
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn phase(&self) -> SyncPhase {
        self.machine.phase()
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            phase: self.machine.phase(),
            cursor: self.state.cursor,
            items: self.state.items.visible(),
            pending: self.state.queue.changes(),
            debounce_armed: self.debounce_deadline.is_some(),
            visible: self.visible,
        }
    }

    /// Run on a new task and return a handle to it.
    pub fn spawn(self) -> (SyncHandle, JoinHandle<ClientState>) {
        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(self.run(rx));
        (SyncHandle::new(tx), task)
    }

    /// Run the scheduler event loop until shutdown or until every handle is
    /// dropped. Returns the final state.
    pub async fn run(mut self, mut commands: mpsc::Receiver<ClientCommand>) -> ClientState {
        if self.config.poll_interval < MIN_POLL_INTERVAL {
            warn!(poll_interval = ?self.config.poll_interval, "Poll interval too short, using {:?}", MIN_POLL_INTERVAL);
        }
        let mut poll_timer = tokio::time::interval(self.config.poll_interval.max(MIN_POLL_INTERVAL));
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if !self.state.queue.is_empty() {
            info!(pending = self.state.queue.len(), "Reloaded pending changes, arming debounce");
            self.arm_debounce();
        }

        loop {
            let debounce = self.debounce_deadline;
            tokio::select! {
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    match cmd {
                        ClientCommand::Mutate { mutation, reply } => {
                            let _ = reply.send(self.mutate(mutation));
                        }
                        ClientCommand::SyncNow => self.request_manual_sync(),
                        ClientCommand::SetVisible(visible) => {
                            if self.set_visible(visible) {
                                poll_timer.reset();
                            }
                        }
                        ClientCommand::Snapshot(reply) => {
                            let _ = reply.send(self.snapshot());
                        }
                        ClientCommand::Shutdown => break,
                    }
                }
                _ = tokio::time::sleep_until(debounce.unwrap_or_else(Instant::now)), if debounce.is_some() => {
                    self.on_debounce_elapsed();
                }
                _ = poll_timer.tick() => {
                    self.on_poll_tick();
                }
                Some(done) = self.completions_rx.recv() => {
                    let _ = self.on_completion(done);
                }
            }
        }

        // Let an in-flight round trip land so an acknowledged push is not
        // pushed again on the next start.
        while self.machine.in_flight().is_some() {
            match self.completions_rx.recv().await {
                Some(done) => {
                    let _ = self.on_completion(done);
                }
                None => break,
            }
        }

        info!(cursor = self.state.cursor, pending = self.state.queue.len(), "Scheduler stopped");
        self.state
    }

    /// Apply a local edit, queue its change and (re)arm the debounce.
    /// Returns the id of the affected item.
    pub fn mutate(&mut self, mutation: LocalMutation) -> Result<String, SyncError> {
        let change = match mutation {
            LocalMutation::Add { name } => self.state.items.create(name),
            LocalMutation::Toggle { id } => self.state.items.toggle(&id)?,
            LocalMutation::Rename { id, name } => self.state.items.rename(&id, name)?,
            LocalMutation::Delete { id } => self.state.items.delete(&id, Utc::now())?,
        };
        let id = change.id.clone();
        debug!(id = %id, kind = %change.change, "Local change queued");

        self.state.queue.record_change(change);
        self.machine.on_local_change();
        self.arm_debounce();
        self.persist();
        Ok(id)
    }

    /// One manual round trip, awaited inline.
    ///
    /// For callers without a running event loop, such as one-shot CLI
    /// commands.
    pub async fn sync_once(&mut self) -> Result<(), SyncError> {
        let token = self
            .machine
            .try_begin(SyncTrigger::Manual)
            .ok_or_else(|| SyncError::Transport("a sync is already in flight".to_string()))?;
        self.debounce_deadline = None;

        let pushed = self.state.queue.drain();
        let changes: Vec<NewChange> = pushed.iter().map(|p| p.change.clone()).collect();
        let outcome = execute(self.transport.as_ref(), &changes, self.state.cursor).await;

        self.on_completion(Completion {
            token,
            trigger: SyncTrigger::Manual,
            pushed,
            outcome,
        })
    }

    fn arm_debounce(&mut self) {
        self.debounce_deadline = Some(Instant::now() + self.config.debounce);
    }

    /// Claim the in-flight slot and spawn the round trip. Returns false if
    /// the machine refused the trigger.
    fn begin(&mut self, trigger: SyncTrigger) -> bool {
        let Some(token) = self.machine.try_begin(trigger) else {
            return false;
        };

        let pushed = if trigger.pushes() {
            self.debounce_deadline = None;
            self.state.queue.drain()
        } else {
            Vec::new()
        };
        let cursor = self.state.cursor;
        let transport = Arc::clone(&self.transport);
        let tx = self.completions_tx.clone();

        debug!(?trigger, pushing = pushed.len(), cursor, "Starting round trip");
        tokio::spawn(async move {
            let changes: Vec<NewChange> = pushed.iter().map(|p| p.change.clone()).collect();
            let outcome = execute(transport.as_ref(), &changes, cursor).await;
            let _ = tx
                .send(Completion {
                    token,
                    trigger,
                    pushed,
                    outcome,
                })
                .await;
        });
        true
    }

    fn request_manual_sync(&mut self) {
        if !self.begin(SyncTrigger::Manual) {
            debug!("Manual sync ignored, a push is already in flight");
        }
    }

    fn on_debounce_elapsed(&mut self) {
        self.debounce_deadline = None;
        if self.state.queue.is_empty() {
            return;
        }
        if !self.begin(SyncTrigger::Debounce) {
            // A push is still in flight; try again after another quiet period.
            self.arm_debounce();
        }
    }

    fn on_poll_tick(&mut self) {
        if !self.visible {
            return;
        }
        self.begin(SyncTrigger::Poll);
    }

    /// Returns true when the poll timer should restart.
    fn set_visible(&mut self, visible: bool) -> bool {
        let was_visible = std::mem::replace(&mut self.visible, visible);
        match (was_visible, visible) {
            (false, true) => {
                info!("Visible again, resuming background polling");
                if self.state.queue.is_empty() {
                    self.begin(SyncTrigger::Poll);
                }
                true
            }
            (true, false) => {
                // An armed debounce keeps running so recent edits still go out.
                info!(debounce_armed = self.debounce_deadline.is_some(), "Hidden, background polling suspended");
                false
            }
            _ => false,
        }
    }

    fn on_completion(&mut self, done: Completion) -> Result<(), SyncError> {
        let is_owner = self.machine.is_owner(done.token);
        let mut result = Ok(());
        let mut rejected = false;

        match done.outcome {
            RoundTripOutcome::PushFailed(e) => {
                if e.is_transient() {
                    warn!(error = %e, pending = self.state.queue.len(), "Push failed, retrying after the next debounce");
                } else {
                    rejected = true;
                    error!(error = %e, pending = self.state.queue.len(), "Push rejected, keeping changes until the next edit or manual sync");
                }
                result = Err(e);
            }
            RoundTripOutcome::Done {
                acknowledged_through,
                pull,
            } => {
                // An acknowledged push is a server fact, whoever owns the slot now.
                if let Some(sequence_number) = acknowledged_through {
                    let cleared = self.state.queue.acknowledge(&done.pushed);
                    self.state.cursor = self.state.cursor.max(sequence_number);
                    let purged = self.state.items.purge_deleted(
                        done.pushed
                            .iter()
                            .filter(|p| p.change.deleted_at.is_some())
                            .map(|p| p.change.id.as_str()),
                    );
                    info!(
                        sequence_number,
                        cleared,
                        purged,
                        still_pending = self.state.queue.len(),
                        "Push acknowledged"
                    );
                }

                match pull {
                    Ok(page) if is_owner => self.fold(page),
                    Ok(_) => debug!(trigger = ?done.trigger, "Discarding pull from superseded round trip"),
                    Err(e) => {
                        warn!(error = %e, cursor = self.state.cursor, "Pull failed, retrying on the next cycle");
                        result = Err(e);
                    }
                }
            }
        }

        if self.machine.finish(done.token, !self.state.queue.is_empty())
            && self.machine.phase() == SyncPhase::Pending
            && self.debounce_deadline.is_none()
            && !rejected
        {
            self.arm_debounce();
        }
        self.persist();
        result
    }

    fn fold(&mut self, page: ChangesPage) {
        let count = page.changes.len();
        self.state.items.apply_remote_batch(&page.changes);
        self.state.cursor = self.state.cursor.max(page.max_sequence);
        if count == 0 {
            return;
        }

        // Queued edits have not reached the server yet; keep them visible.
        let reapplied = self.state.items.reapply_pending(&self.state.queue.changes());
        info!(count, reapplied, cursor = self.state.cursor, "Applied remote changes");
    }

    fn persist(&mut self) {
        if let Some(store) = self.store.as_mut() {
            if let Err(e) = store.save(&self.state) {
                error!(error = %e, "Failed to persist client state");
            }
        }
    }
}
