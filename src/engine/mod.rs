mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{calendar, derive_nightly, remaining_capacity, reserved_profile};
pub use error::EngineError;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{error, warn};

use crate::lifecycle::{self, LedgerEffect};
use crate::model::*;
use crate::sequence::SequenceAllocator;
use crate::wal::Wal;

pub type SharedLedger = Arc<RwLock<ResourceLedger>>;

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the journal and commits appends in groups: every append queued while
/// a flush is pending rides the next fsync.
struct WalWriter {
    wal: Wal,
    rx: mpsc::Receiver<WalCommand>,
}

type Waiter = oneshot::Sender<io::Result<()>>;

impl WalWriter {
    async fn run(mut self) {
        while let Some(first) = self.rx.recv().await {
            let mut next = Some(first);
            while let Some(cmd) = next.take() {
                next = match cmd {
                    WalCommand::Append { event, response } => self.commit_group(event, response),
                    other => {
                        self.handle(other);
                        None
                    }
                };
            }
        }
    }

    /// Commit `event` plus every append already queued behind it with one
    /// fsync. Returns the first queued non-append command, if one cut the
    /// group short.
    fn commit_group(&mut self, event: Event, response: Waiter) -> Option<WalCommand> {
        let mut group = vec![(event, response)];
        let mut cut = None;
        while let Ok(cmd) = self.rx.try_recv() {
            match cmd {
                WalCommand::Append { event, response } => group.push((event, response)),
                other => {
                    cut = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(group.len() as f64);
        let started = std::time::Instant::now();
        let outcome = self.write_group(&group);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        for (_, waiter) in group {
            let reply = match &outcome {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = waiter.send(reply);
        }
        cut
    }

    fn write_group(&mut self, group: &[(Event, Waiter)]) -> io::Result<()> {
        let written = group
            .iter()
            .try_for_each(|(event, _)| self.wal.append_buffered(event))
            .and_then(|()| self.wal.flush_sync());
        if let Err(e) = &written {
            // Every waiter sees the failure, so none of the group may survive on disk
            warn!("WAL group of {} failed: {e}; discarding it", group.len());
            if let Err(e) = self.wal.discard_uncommitted() {
                error!("WAL could not discard a failed group: {e}");
            }
        }
        written
    }

    fn handle(&mut self, cmd: WalCommand) {
        match cmd {
            WalCommand::Compact { events, response } => {
                let result = Wal::write_compact_file(self.wal.path(), &events)
                    .and_then(|()| self.wal.swap_compact_file());
                let _ = response.send(result);
            }
            WalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(self.wal.appends_since_compact());
            }
            WalCommand::Append { event, response } => {
                if let Some(cut) = self.commit_group(event, response) {
                    self.handle(cut);
                }
            }
        }
    }
}

/// Durable booking set: one ledger per resource, every change journaled to the
/// WAL before it becomes visible.
pub struct Engine {
    pub(super) ledgers: DashMap<String, SharedLedger>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup and unique constraint: booking id → resource id
    pub(super) booking_to_resource: DashMap<String, String>,
    /// Highest identifier recorded per kind.
    pub(super) issued: SequenceAllocator,
    /// Mutations hold it shared for their whole journal-and-apply step;
    /// compaction holds it exclusively so no append races the snapshot.
    pub(super) commit_gate: RwLock<()>,
}

/// Apply an event directly to a ledger. Caller holds the lock.
fn apply_to_ledger(ledger: &mut ResourceLedger, event: &Event, index: &DashMap<String, String>) {
    match event {
        Event::ResourceSynced { kind, total_quantity, .. } => {
            ledger.kind = *kind;
            ledger.total_quantity = *total_quantity;
        }
        Event::BookingInserted { booking } => {
            let effect = lifecycle::insert_effect(booking.status);
            apply_effect(ledger, effect, &booking.window, booking.quantity);
            index.insert(booking.id.clone(), booking.resource_id.clone());
            ledger.insert_booking(booking.clone());
        }
        Event::StatusChanged { id, status, reason, .. } => {
            let Some(booking) = ledger.booking_mut(id) else {
                warn!("status change for unknown booking {id}");
                return;
            };
            let effect = lifecycle::transition(booking.status, *status).unwrap_or(LedgerEffect::Keep);
            let (window, quantity) = (booking.window, booking.quantity);
            booking.status = *status;
            if reason.is_some() {
                booking.status_reason = reason.clone();
            }
            apply_effect(ledger, effect, &window, quantity);
        }
        Event::ReasonAnnotated { id, reason, .. } => {
            if let Some(booking) = ledger.booking_mut(id) {
                booking.status_reason = Some(reason.clone());
            }
        }
    }
}

fn apply_effect(ledger: &mut ResourceLedger, effect: LedgerEffect, window: &Window, quantity: u32) {
    match effect {
        LedgerEffect::Consume => ledger.consume(window, quantity),
        LedgerEffect::Release => ledger.release(window, quantity),
        LedgerEffect::Keep => {}
    }
}

impl Engine {
    /// Replay the WAL at `wal_path`, cut off any torn tail, then start its
    /// group-commit writer. Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        let dropped = Wal::cut_torn_tail(&wal_path, replay.intact_len)?;
        if dropped > 0 {
            warn!("WAL: cut {dropped} bytes of torn tail from {}", wal_path.display());
        }
        let events = replay.events;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(WalWriter { wal, rx: wal_rx }.run());

        let booking_to_resource = DashMap::new();
        let issued = SequenceAllocator::new();

        // Replay into plain ledgers first; they are wrapped in locks once complete.
        let mut ledgers: HashMap<String, ResourceLedger> = HashMap::new();
        for event in &events {
            match event {
                Event::ResourceSynced { id, kind, total_quantity } => {
                    ledgers
                        .entry(id.clone())
                        .or_insert_with(|| ResourceLedger::new(id.clone(), *kind, *total_quantity));
                }
                Event::BookingInserted { booking } => issued.observe(&booking.id),
                _ => {}
            }
            match ledgers.get_mut(event_resource_id(event)) {
                Some(ledger) => apply_to_ledger(ledger, event, &booking_to_resource),
                None => warn!("replay: event for unknown resource {}", event_resource_id(event)),
            }
        }

        let engine = Self {
            ledgers: DashMap::new(),
            wal_tx,
            booking_to_resource,
            issued,
            commit_gate: RwLock::new(()),
        };
        for (id, ledger) in ledgers {
            engine.ledgers.insert(id, Arc::new(RwLock::new(ledger)));
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Transient("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Transient("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Transient(format!("WAL error: {e}")))
    }

    pub fn get_ledger(&self, resource_id: &str) -> Option<SharedLedger> {
        self.ledgers.get(resource_id).map(|e| e.value().clone())
    }

    pub fn get_resource_for_booking(&self, booking_id: &str) -> Option<String> {
        self.booking_to_resource.get(booking_id).map(|e| e.value().clone())
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        ledger: &mut ResourceLedger,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_ledger(ledger, event, &self.booking_to_resource);
        Ok(())
    }

    /// Lookup booking → resource, get ledger, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &str,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ResourceLedger>, EngineError> {
        let resource_id = self
            .get_resource_for_booking(booking_id)
            .ok_or_else(|| EngineError::NotFound(booking_id.to_string()))?;
        let ledger = self
            .get_ledger(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        Ok(ledger.write_owned().await)
    }
}

/// The resource an event belongs to.
fn event_resource_id(event: &Event) -> &str {
    match event {
        Event::ResourceSynced { id, .. } => id,
        Event::BookingInserted { booking } => &booking.resource_id,
        Event::StatusChanged { resource_id, .. } | Event::ReasonAnnotated { resource_id, .. } => {
            resource_id
        }
    }
}
