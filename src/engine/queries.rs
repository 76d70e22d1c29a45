use chrono::NaiveDate;
use ulid::Ulid;

use crate::clock::now_ms;
use crate::model::*;

use super::availability::subtract_intervals;
use super::{Engine, EngineError, SharedRoomState};

impl Engine {
    fn room_handles(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        self.list_rooms_at(now_ms()).await
    }

    /// All rooms in creation order; `is_booked` is evaluated at `now`.
    pub async fn list_rooms_at(&self, now: Ms) -> Vec<RoomInfo> {
        let mut rooms = Vec::new();
        for rs in self.room_handles() {
            let guard = rs.read().await;
            if guard.deleted {
                continue;
            }
            rooms.push(room_info(&guard, now));
        }
        rooms.sort_by_key(|r| (r.created_at, r.id));
        rooms
    }

    pub async fn get_room_info(&self, id: Ulid, now: Ms) -> Result<RoomInfo, EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound("room", id))?;
        let guard = rs.read().await;
        if guard.deleted {
            return Err(EngineError::NotFound("room", id));
        }
        Ok(room_info(&guard, now))
    }

    /// Bookings joined with their room's name, newest first.
    /// With `room_id`, only that room's bookings (none if the room is unknown).
    pub async fn list_bookings(&self, room_id: Option<Ulid>) -> Vec<BookingInfo> {
        let handles: Vec<SharedRoomState> = match room_id {
            Some(id) => self.get_room(&id).into_iter().collect(),
            None => self.room_handles(),
        };

        let mut bookings = Vec::new();
        for rs in handles {
            let guard = rs.read().await;
            if guard.deleted {
                continue;
            }
            bookings.extend(guard.bookings.iter().map(|b| BookingInfo {
                id: b.id,
                room_id: guard.id,
                room_name: guard.name.clone(),
                user_name: b.user_name.clone(),
                start: b.span.start,
                end: b.span.end,
                created_at: b.created_at,
            }));
        }
        bookings.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        bookings
    }

    /// Free spans of a room on `date`: the operating-hours window minus its bookings.
    pub async fn room_availability(
        &self,
        room_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Span>, EngineError> {
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound("room", room_id))?;
        let guard = rs.read().await;
        if guard.deleted {
            return Err(EngineError::NotFound("room", room_id));
        }

        let window = self.hours.window_on(date);
        let taken: Vec<Span> = guard
            .overlapping(&window)
            .map(|b| Span::new(b.span.start.max(window.start), b.span.end.min(window.end)))
            .collect();
        Ok(subtract_intervals(&[window], &taken))
    }
}

fn room_info(rs: &RoomState, now: Ms) -> RoomInfo {
    RoomInfo {
        id: rs.id,
        name: rs.name.clone(),
        created_at: rs.created_at,
        is_booked: rs.is_booked_at(now),
    }
}
