mod availability;
mod conflict;
mod entities;
mod error;
mod lifecycle;
mod pricing;
mod queries;
mod store;
mod validate;

pub use availability::{first_conflict, free_ranges, is_available, merge_overlapping, subtract_ranges};
pub use error::{ConflictReason, EngineError};
pub use pricing::{compute_total, resolve_total};
pub use queries::BookingFilter;
pub use store::{SharedRoomState, Store};

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{
    mpsc, oneshot, Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::wal::Wal;

use store::event_rooms;

// ── Group-commit WAL channel ─────────────────────────────

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

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then fsyncs once for the whole batch before answering every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(cmd) = deferred {
                    handle_non_append(&mut wal, cmd);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed: {e}");
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

// ── Engine ───────────────────────────────────────────────

/// Tunables for lock waits and contention retries.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Upper bound on waiting for any single room or guest lock.
    pub lock_timeout: Duration,
    /// Retries of a write that lost a race before it is reported as a conflict.
    pub max_retries: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(2000),
            max_retries: 3,
        }
    }
}

pub struct Engine {
    pub(crate) store: Store,
    wal_tx: mpsc::Sender<WalCommand>,
    options: EngineOptions,
    /// Held shared by every mutation from lock acquisition to apply; compaction
    /// takes it exclusively so its snapshot and the WAL swap see no in-flight writes.
    commit_gate: RwLock<()>,
    /// Serializes service read-modify-write.
    services_write: Mutex<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        Self::with_options(wal_path, EngineOptions::default())
    }

    pub fn with_options(wal_path: PathBuf, options: EngineOptions) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: Store::new(),
            wal_tx,
            options,
            commit_gate: RwLock::new(()),
            services_write: Mutex::new(()),
        };

        // Sole owner of every Arc during replay, so try_write always succeeds.
        // Never blocking_write here: this runs inside the runtime.
        for event in &events {
            let handles: Vec<SharedRoomState> = event_rooms(event)
                .iter()
                .filter_map(|id| engine.store.get_room(id))
                .collect();
            let mut guards: Vec<OwnedRwLockWriteGuard<RoomState>> = handles
                .into_iter()
                .map(|h| h.try_write_owned().expect("replay: uncontended write"))
                .collect();
            let mut rooms: Vec<&mut RoomState> = guards.iter_mut().map(|g| &mut **g).collect();
            engine.store.apply(event, &mut rooms);
        }

        tracing::info!(
            events = events.len(),
            rooms = engine.store.room_count(),
            guests = engine.store.guest_count(),
            services = engine.store.service_count(),
            "engine state restored"
        );
        Ok(engine)
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
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
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Durable append, then in-memory apply. Nothing is applied if the append fails.
    pub(super) async fn commit(
        &self,
        event: &Event,
        rooms: &mut [&mut RoomState],
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply(event, rooms);
        Ok(())
    }

    // ── Locking ──────────────────────────────────────────

    async fn within_timeout<G>(
        &self,
        contended: Ulid,
        acquire: impl Future<Output = G>,
    ) -> Result<G, EngineError> {
        tokio::time::timeout(self.options.lock_timeout, acquire)
            .await
            .map_err(|_| EngineError::StorageConflict(contended))
    }

    /// Exclusive room guard. `StorageConflict` if the room was deleted (or
    /// replaced) while waiting.
    pub(super) async fn lock_room(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let handle = self
            .store
            .get_room(&id)
            .ok_or(EngineError::not_found("room", id))?;
        let guard = self.within_timeout(id, handle.clone().write_owned()).await?;
        match self.store.get_room(&id) {
            Some(current) if Arc::ptr_eq(&current, &handle) => Ok(guard),
            _ => Err(EngineError::StorageConflict(id)),
        }
    }

    /// Exclusive guards on `ids`, which must be sorted and deduplicated.
    pub(super) async fn lock_rooms(
        &self,
        ids: &[Ulid],
    ) -> Result<Vec<OwnedRwLockWriteGuard<RoomState>>, EngineError> {
        debug_assert!(ids.windows(2).all(|w| w[0] < w[1]), "room lock order");
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.lock_room(*id).await?);
        }
        Ok(guards)
    }

    /// Shared guest guards, in id order. Contention is reported against `room_id`.
    pub(super) async fn lock_guests_shared(
        &self,
        ids: &[Ulid],
        room_id: Ulid,
    ) -> Result<Vec<OwnedRwLockReadGuard<()>>, EngineError> {
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let lock = self
                .store
                .guest_lock(id)
                .ok_or(EngineError::not_found("guest", *id))?;
            let guard = self.within_timeout(room_id, lock.read_owned()).await?;
            if !self.store.contains_guest(id) {
                return Err(EngineError::StorageConflict(room_id));
            }
            guards.push(guard);
        }
        Ok(guards)
    }

    pub(super) async fn lock_guest_exclusive(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<()>, EngineError> {
        let lock = self
            .store
            .guest_lock(&id)
            .ok_or(EngineError::not_found("guest", id))?;
        let guard = self.within_timeout(id, lock.write_owned()).await?;
        if !self.store.contains_guest(&id) {
            return Err(EngineError::StorageConflict(id));
        }
        Ok(guard)
    }

    /// Lookup booking → room, then lock that room. `StorageConflict` if the
    /// booking moved or vanished while waiting for the lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let room_id = self
            .store
            .room_for_booking(&booking_id)
            .ok_or(EngineError::not_found("booking", booking_id))?;
        let guard = self.lock_room(room_id).await.map_err(|e| match e {
            EngineError::NotFound { .. } => EngineError::StorageConflict(room_id),
            other => other,
        })?;
        if guard.booking(&booking_id).is_none() {
            return Err(EngineError::StorageConflict(room_id));
        }
        Ok(guard)
    }

    /// Run `attempt` until it stops losing races, at most `max_retries` extra times.
    pub(super) async fn with_retry<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut retries = 0u32;
        loop {
            match attempt().await {
                Err(EngineError::StorageConflict(id)) => {
                    if retries >= self.options.max_retries {
                        warn!(op, %id, retries, "storage conflict retries exhausted");
                        return Err(EngineError::Conflict {
                            room_id: id,
                            reason: ConflictReason::Contention,
                        });
                    }
                    retries += 1;
                    metrics::counter!(observability::TX_RETRIES_TOTAL, "op" => op).increment(1);
                    debug!(op, %id, retries, "storage conflict, retrying");
                    tokio::task::yield_now().await;
                }
                other => return other,
            }
        }
    }

    // ── Compaction ───────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut rooms = Vec::new();
        let mut bookings = Vec::new();
        for handle in self.store.room_handles() {
            let rs = handle.read().await;
            rooms.push(Event::RoomCreated { room: rs.room.clone() });
            bookings.extend(
                rs.bookings
                    .iter()
                    .map(|b| Event::BookingCreated { booking: b.clone() }),
            );
        }

        let mut events = rooms;
        events.extend(
            self.store
                .guests()
                .into_iter()
                .map(|guest| Event::GuestCreated { guest }),
        );
        events.extend(
            self.store
                .services()
                .into_iter()
                .map(|service| Event::ServiceCreated { service }),
        );
        events.extend(bookings);
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        Ok(count)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
