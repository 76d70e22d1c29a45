use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, error, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::BOOKINGS_REJECTED_TOTAL;

use super::conflict::{check_no_conflict, validate_booking_span, validate_user_name};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Register a room. Names are trimmed and must be unique.
    pub async fn create_room(&self, name: &str) -> Result<Ulid, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::DuplicateName(String::new()));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("room name too long"));
        }

        let id = {
            let _registry = self.registry.lock().await;
            if self.rooms.len() >= MAX_ROOMS {
                return Err(EngineError::LimitExceeded("too many rooms"));
            }
            if self.names.contains_key(name) {
                return Err(EngineError::DuplicateName(name.to_string()));
            }

            let (id, created_at) = self.next_id();
            let event = Event::RoomCreated { id, name: name.to_string(), created_at };
            self.wal_append(&event).await?;
            let rs = RoomState::new(id, name.to_string(), created_at);
            self.rooms.insert(id, Arc::new(RwLock::new(rs)));
            self.names.insert(name.to_string(), id);
            id
        };

        info!("room {id} created: {name:?}");
        self.maybe_compact().await;
        Ok(id)
    }

    /// Remove a room and, with it, every booking it holds.
    /// Returns how many bookings went with it.
    pub async fn delete_room(&self, id: Ulid) -> Result<usize, EngineError> {
        let cascaded = {
            let _registry = self.registry.lock().await;
            let rs = self
                .get_room(&id)
                .ok_or(EngineError::NotFound("room", id))?;
            let mut guard = rs.write().await;

            self.wal_append(&Event::RoomDeleted { id }).await?;
            guard.deleted = true;
            let bookings = std::mem::take(&mut guard.bookings);
            for booking in &bookings {
                self.booking_to_room.remove(&booking.id);
            }
            self.names.remove(&guard.name);
            self.rooms.remove(&id);
            bookings.len()
        };

        info!("room {id} deleted with {cascaded} bookings");
        self.maybe_compact().await;
        Ok(cascaded)
    }

    /// Book `[start, end)` in a room.
    ///
    /// Checks, in order: the room exists, the request is well-formed and
    /// within operating hours, and no existing booking of the room overlaps.
    /// The overlap check and the insert happen under the room's write lock.
    pub async fn create_booking(
        &self,
        room_id: Ulid,
        user_name: &str,
        start: Ms,
        end: Ms,
    ) -> Result<Booking, EngineError> {
        let result = self.try_create_booking(room_id, user_name, start, end).await;
        match &result {
            Ok(booking) => {
                info!("booking {} confirmed on room {room_id}", booking.id);
                self.maybe_compact().await;
            }
            Err(e) => {
                debug!("booking on room {room_id} rejected: {e}");
                let reason = match e {
                    EngineError::Conflict(_) => "conflict",
                    EngineError::NotFound(..) => "not_found",
                    EngineError::WalError(_) => "storage",
                    _ => "validation",
                };
                metrics::counter!(BOOKINGS_REJECTED_TOTAL, "reason" => reason).increment(1);
            }
        }
        result
    }

    async fn try_create_booking(
        &self,
        room_id: Ulid,
        user_name: &str,
        start: Ms,
        end: Ms,
    ) -> Result<Booking, EngineError> {
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound("room", room_id))?;
        let user_name = validate_user_name(user_name)?;
        let span = validate_booking_span(&self.hours, start, end)?;

        let mut guard = rs.write().await;
        if guard.deleted {
            return Err(EngineError::NotFound("room", room_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }
        check_no_conflict(&guard, &span)?;

        let (id, created_at) = self.next_id();
        let booking = Booking {
            id,
            room_id,
            user_name: user_name.to_string(),
            span,
            created_at,
        };
        let event = Event::BookingCreated {
            id: booking.id,
            room_id,
            user_name: booking.user_name.clone(),
            span,
            created_at: booking.created_at,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(booking)
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let booking = {
            let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
            let booking = guard
                .bookings
                .iter()
                .find(|b| b.id == id)
                .cloned()
                .ok_or(EngineError::NotFound("booking", id))?;
            let event = Event::BookingCancelled { id, room_id };
            self.persist_and_apply(&mut guard, &event).await?;
            booking
        };

        info!("booking {id} cancelled");
        self.maybe_compact().await;
        Ok(booking)
    }

    /// Compact once enough appends have piled up. Failures are logged; the
    /// mutation that triggered this is already durable.
    async fn maybe_compact(&self) {
        if self.compact_threshold == 0
            || self.wal_appends_since_compact().await < self.compact_threshold
        {
            return;
        }
        match self.compact_wal().await {
            Ok(()) => info!("WAL compacted"),
            Err(e) => error!("WAL compaction failed: {e}"),
        }
    }

    /// Rewrite the WAL with only the events needed to rebuild current state.
    ///
    /// Holds the registry lock and every room's read lock until the writer
    /// has swapped files, so no append can land in the old log unseen.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry.lock().await;

        let mut rooms: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(rooms.len());
        for rs in rooms.drain(..) {
            guards.push(rs.read_owned().await);
        }
        guards.sort_by_key(|g| (g.created_at, g.id));

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::RoomCreated {
                id: guard.id,
                name: guard.name.clone(),
                created_at: guard.created_at,
            });
            events.extend(guard.bookings.iter().map(|b| Event::BookingCreated {
                id: b.id,
                room_id: b.room_id,
                user_name: b.user_name.clone(),
                span: b.span,
                created_at: b.created_at,
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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
