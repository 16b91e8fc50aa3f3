//! Persistence Coordinator for TabGrid.
//!
//! Each tracked tab gets its own worker task that turns a stream of dirty
//! snapshots into a bounded number of saves:
//!
//! - the first dirty notification while `Clean` opens a debounce window;
//!   later notifications only replace the pending snapshot and never push
//!   the deadline back, so sustained dragging still gets persisted;
//! - when the window closes the worker saves whatever snapshot is latest
//!   at that moment, retrying with exponential backoff;
//! - if a newer snapshot arrived while the save was in flight, a fresh
//!   window opens immediately after it.
//!
//! A tab's saves are issued one at a time, in order. Tabs are independent.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::services::persistence_service::PersistenceService;
use crate::services::retry::with_backoff;
use crate::types::errors::PersistenceError;
use crate::types::grid::GridSnapshot;
use crate::types::persistence::{FlushOutcome, PersistenceEvent, SaveState};
use crate::types::settings::PersistenceSettings;

type FlushReply = oneshot::Sender<Result<FlushOutcome, PersistenceError>>;

enum Command {
    Flush(FlushReply),
    Shutdown(oneshot::Sender<()>),
}

struct WorkerHandle {
    snapshots: watch::Sender<GridSnapshot>,
    state: watch::Receiver<SaveState>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Debounces and serializes saves for every open tab.
pub struct PersistenceCoordinator {
    store: Arc<dyn PersistenceService>,
    settings: PersistenceSettings,
    workers: HashMap<String, WorkerHandle>,
    events_tx: mpsc::UnboundedSender<PersistenceEvent>,
    events_rx: mpsc::UnboundedReceiver<PersistenceEvent>,
}

impl PersistenceCoordinator {
    pub fn new(store: Arc<dyn PersistenceService>, settings: PersistenceSettings) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            store,
            settings,
            workers: HashMap::new(),
            events_tx,
            events_rx,
        }
    }

    /// Starts a worker for the snapshot's tab. A clean snapshot counts as
    /// already persisted at its version. Must be called inside a tokio runtime.
    pub fn track(&mut self, snapshot: &GridSnapshot) {
        if self.workers.contains_key(&snapshot.tab_id) {
            return;
        }
        let (snapshots_tx, snapshots_rx) = watch::channel(snapshot.clone());
        let (state_tx, state_rx) = watch::channel(SaveState::Clean);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let worker = TabWorker {
            tab_id: snapshot.tab_id.clone(),
            store: self.store.clone(),
            settings: self.settings.clone(),
            snapshots: snapshots_rx,
            state: state_tx,
            commands: commands_rx,
            events: self.events_tx.clone(),
            last_saved: if snapshot.dirty { 0 } else { snapshot.version },
        };
        let task = tokio::spawn(worker.run());

        self.workers.insert(
            snapshot.tab_id.clone(),
            WorkerHandle {
                snapshots: snapshots_tx,
                state: state_rx,
                commands: commands_tx,
                task,
            },
        );
    }

    pub fn is_tracking(&self, tab_id: &str) -> bool {
        self.workers.contains_key(tab_id)
    }

    /// Hands the latest snapshot to the tab's worker. Never blocks; clean
    /// snapshots are ignored.
    pub fn notify(&self, snapshot: &GridSnapshot) {
        if !snapshot.dirty {
            return;
        }
        match self.workers.get(&snapshot.tab_id) {
            Some(worker) => {
                worker.snapshots.send_replace(snapshot.clone());
            }
            None => warn!("dirty snapshot for untracked tab {}", snapshot.tab_id),
        }
    }

    /// Current pipeline phase for a tab.
    pub fn save_state(&self, tab_id: &str) -> Option<SaveState> {
        self.workers.get(tab_id).map(|w| *w.state.borrow())
    }

    /// Saves the latest snapshot now, skipping the debounce window, and
    /// waits for the outcome.
    pub async fn flush_now(&self, tab_id: &str) -> Result<FlushOutcome, PersistenceError> {
        let worker = self
            .workers
            .get(tab_id)
            .ok_or_else(|| PersistenceError::WorkerGone(tab_id.to_string()))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        worker
            .commands
            .send(Command::Flush(reply_tx))
            .map_err(|_| PersistenceError::WorkerGone(tab_id.to_string()))?;
        reply_rx
            .await
            .map_err(|_| PersistenceError::WorkerGone(tab_id.to_string()))?
    }

    /// Stops the tab's worker, dropping any pending debounce window.
    /// Callers flush first if the pending data should survive.
    pub async fn release(&mut self, tab_id: &str) {
        let Some(worker) = self.workers.remove(tab_id) else {
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if worker.commands.send(Command::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        if let Err(e) = worker.task.await {
            warn!("persistence worker for tab {} ended abnormally: {}", tab_id, e);
        }
        debug!("released persistence worker for tab {}", tab_id);
    }

    /// Outcomes reported by workers since the last call.
    pub fn drain_events(&mut self) -> Vec<PersistenceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Clean,
    Pending(Instant),
}

struct TabWorker {
    tab_id: String,
    store: Arc<dyn PersistenceService>,
    settings: PersistenceSettings,
    snapshots: watch::Receiver<GridSnapshot>,
    state: watch::Sender<SaveState>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<PersistenceEvent>,
    last_saved: u64,
}

impl TabWorker {
    async fn run(mut self) {
        let mut phase = Phase::Clean;
        loop {
            self.publish(match phase {
                Phase::Clean => SaveState::Clean,
                Phase::Pending(_) => SaveState::PendingSave,
            });
            let deadline = match phase {
                Phase::Clean => None,
                Phase::Pending(at) => Some(at),
            };

            tokio::select! {
                changed = self.snapshots.changed(), if deadline.is_none() => {
                    if changed.is_err() {
                        break;
                    }
                    phase = Phase::Pending(Instant::now() + self.settings.debounce());
                    debug!("tab {}: debounce window opened", self.tab_id);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    phase = self.save_latest().await;
                }
                command = self.commands.recv() => match command {
                    Some(Command::Flush(reply)) => {
                        let result = self.flush().await;
                        let _ = reply.send(result);
                        phase = self.phase_after_flush(phase);
                    }
                    Some(Command::Shutdown(ack)) => {
                        let _ = ack.send(());
                        break;
                    }
                    None => break,
                },
            }
        }
        debug!("tab {}: persistence worker stopped", self.tab_id);
    }

    fn publish(&self, state: SaveState) {
        self.state.send_replace(state);
    }

    fn has_newer(&self) -> bool {
        self.snapshots.has_changed().unwrap_or(false)
    }

    /// Saves whatever is latest when the debounce window closes.
    async fn save_latest(&mut self) -> Phase {
        let snapshot = self.snapshots.borrow_and_update().clone();
        if snapshot.version > self.last_saved {
            let _ = self.save(&snapshot).await;
        }
        if self.has_newer() {
            Phase::Pending(Instant::now() + self.settings.debounce())
        } else {
            Phase::Clean
        }
    }

    async fn flush(&mut self) -> Result<FlushOutcome, PersistenceError> {
        let snapshot = self.snapshots.borrow_and_update().clone();
        if snapshot.version <= self.last_saved {
            return Ok(FlushOutcome::AlreadyClean(self.last_saved));
        }
        self.save(&snapshot).await?;
        Ok(FlushOutcome::Saved(snapshot.version))
    }

    fn phase_after_flush(&self, before: Phase) -> Phase {
        if self.has_newer() {
            return match before {
                Phase::Pending(at) => Phase::Pending(at),
                Phase::Clean => Phase::Pending(Instant::now() + self.settings.debounce()),
            };
        }
        if self.snapshots.borrow().version <= self.last_saved {
            Phase::Clean
        } else {
            before
        }
    }

    async fn save(&mut self, snapshot: &GridSnapshot) -> Result<(), PersistenceError> {
        self.publish(SaveState::Saving);
        let store = self.store.as_ref();
        let tab_id = self.tab_id.as_str();
        let label = format!("save of tab {} v{}", tab_id, snapshot.version);
        let result = with_backoff(&self.settings.retry, &label, move || store.save(tab_id, snapshot)).await;

        match &result {
            Ok(()) => {
                self.last_saved = snapshot.version;
                info!("tab {}: saved v{}", self.tab_id, snapshot.version);
                let _ = self.events.send(PersistenceEvent::Saved {
                    tab_id: self.tab_id.clone(),
                    version: snapshot.version,
                });
            }
            Err(PersistenceError::VersionConflict { attempted, stored, .. }) => {
                warn!(
                    "tab {}: store holds v{}, write of v{} rejected",
                    self.tab_id, stored, attempted
                );
                let _ = self.events.send(PersistenceEvent::Conflict {
                    tab_id: self.tab_id.clone(),
                    attempted: *attempted,
                    stored: *stored,
                });
            }
            Err(e) => {
                warn!(
                    "tab {}: persistence degraded at v{}: {}",
                    self.tab_id, snapshot.version, e
                );
                let _ = self.events.send(PersistenceEvent::Degraded {
                    tab_id: self.tab_id.clone(),
                    version: snapshot.version,
                    reason: e.to_string(),
                });
            }
        }
        result
    }
}
