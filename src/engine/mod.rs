mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::subtract_intervals;
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::{error, info, warn};
use ulid::{Generator, Ulid};

use crate::hours::OperatingHours;
use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Every append that is already queued when the first one
/// arrives joins the same batch and shares a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
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
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// All or nothing: on failure every caller gets the error and the log is
/// rolled back to the previous batch, so nothing refused becomes durable.
fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        error!("WAL flush of {} events failed: {e}", batch.len());
        if let Err(e) = wal.discard_uncommitted() {
            error!("WAL rollback failed, refusing further appends: {e}");
        }
    }
    result
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
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Room registry and booking ledger over one WAL-backed store.
///
/// Each room's state (including its bookings) sits behind its own `RwLock`;
/// booking writes hold that lock across check, WAL append and apply.
/// Registry writes are additionally serialized by `registry`.
pub struct Engine {
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    /// Room name → room id.
    pub(super) names: DashMap<String, Ulid>,
    /// Booking id → room id.
    pub(super) booking_to_room: DashMap<Ulid, Ulid>,
    pub(super) registry: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) hours: OperatingHours,
    pub(super) compact_threshold: u64,
    /// Monotonic within a millisecond, so id order is creation order.
    ids: std::sync::Mutex<Generator>,
}

/// Apply a booking event to its room (caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingCreated {
            id,
            room_id,
            user_name,
            span,
            created_at,
        } => {
            rs.insert_booking(Booking {
                id: *id,
                room_id: *room_id,
                user_name: user_name.clone(),
                span: *span,
                created_at: *created_at,
            });
            index.insert(*id, *room_id);
        }
        Event::BookingCancelled { id, .. } => {
            rs.remove_booking(*id);
            index.remove(id);
        }
        // Registry events touch the maps, not a single room.
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } => {}
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        hours: OperatingHours,
        compact_threshold: u64,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            names: DashMap::new(),
            booking_to_room: DashMap::new(),
            registry: Mutex::new(()),
            wal_tx,
            hours,
            compact_threshold,
            ids: std::sync::Mutex::new(Generator::new()),
        };

        // Nobody else holds these Arcs yet, so try_write never contends.
        // blocking_write would panic inside the runtime.
        for event in &events {
            engine.replay_event(event);
        }
        info!(
            "replayed {} WAL events: {} rooms, {} bookings",
            events.len(),
            engine.rooms.len(),
            engine.booking_to_room.len()
        );

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::RoomCreated {
                id,
                name,
                created_at,
            } => {
                let rs = RoomState::new(*id, name.clone(), *created_at);
                self.rooms.insert(*id, Arc::new(RwLock::new(rs)));
                self.names.insert(name.clone(), *id);
            }
            Event::RoomDeleted { id } => {
                let Some((_, rs)) = self.rooms.remove(id) else { return };
                if let Ok(guard) = rs.try_read() {
                    self.names.remove(&guard.name);
                    for booking in &guard.bookings {
                        self.booking_to_room.remove(&booking.id);
                    }
                }
            }
            Event::BookingCreated { id, room_id, span, .. } => {
                let Some(rs) = self.get_room(room_id) else { return };
                let Ok(mut guard) = rs.try_write() else { return };
                if let Some(existing) = guard.overlapping(span).next().map(|b| b.id) {
                    warn!("replay: booking {id} overlaps {existing} in room {room_id}, skipped");
                    return;
                }
                apply_to_room(&mut guard, event, &self.booking_to_room);
            }
            Event::BookingCancelled { room_id, .. } => {
                let Some(rs) = self.get_room(room_id) else { return };
                if let Ok(mut guard) = rs.try_write() {
                    apply_to_room(&mut guard, event, &self.booking_to_room);
                }
            }
        }
    }

    /// A fresh id and its creation time, taken from the id's timestamp.
    pub(super) fn next_id(&self) -> (Ulid, Ms) {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        let id = ids.generate().unwrap_or_else(|_| Ulid::new());
        (id, id.timestamp_ms() as Ms)
    }

    pub fn hours(&self) -> OperatingHours {
        self.hours
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append then apply, under the caller's room lock.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.booking_to_room);
        Ok(())
    }

    /// Lookup booking → room, acquire the room's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let not_found = EngineError::NotFound("booking", *booking_id);
        let room_id = self.room_for_booking(booking_id).ok_or(not_found)?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound("booking", *booking_id))?;
        let guard = rs.write_owned().await;
        if guard.deleted || !guard.bookings.iter().any(|b| b.id == *booking_id) {
            return Err(EngineError::NotFound("booking", *booking_id));
        }
        Ok((room_id, guard))
    }
}
