use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

impl Engine {
    /// confirmed → checked_in; the room becomes occupied in the same write.
    /// Refused while another guest is still checked in to the room.
    pub async fn check_in(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (room_id, mut room) = self.resolve_reservation_write(&id).await?;
        let current = room
            .reservation(&id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        let refused = EngineError::InvalidTransition {
            id,
            from: current.status,
            to: ReservationStatus::CheckedIn,
        };
        if current.status != ReservationStatus::Confirmed {
            return Err(refused);
        }
        if room.checked_in().is_some() {
            return Err(refused);
        }

        self.persist_and_apply(&mut room, &Event::CheckedIn { id, room_id })
            .await?;
        metrics::counter!(observability::TRANSITIONS_TOTAL, "transition" => "check_in").increment(1);
        info!(reservation = %id, room = %room.room.room_number, "guest checked in");
        room.reservation(&id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))
    }

    /// checked_in → checked_out; the room goes back to vacant. The returned
    /// reservation carries the final amount.
    pub async fn check_out(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (room_id, mut room) = self.resolve_reservation_write(&id).await?;
        let current = room
            .reservation(&id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        if current.status != ReservationStatus::CheckedIn {
            return Err(EngineError::InvalidTransition {
                id,
                from: current.status,
                to: ReservationStatus::CheckedOut,
            });
        }

        self.persist_and_apply(&mut room, &Event::CheckedOut { id, room_id })
            .await?;
        metrics::counter!(observability::TRANSITIONS_TOTAL, "transition" => "check_out").increment(1);
        info!(reservation = %id, room = %room.room.room_number, "guest checked out");
        room.reservation(&id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))
    }

    /// Housekeeping override of a room's status. `occupied` must match the
    /// presence of a checked-in guest in both directions.
    pub async fn set_room_status(&self, room_id: Ulid, status: RoomStatus) -> Result<Room, EngineError> {
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let mut room = rs.write().await;

        let has_guest = room.checked_in().is_some();
        if (status == RoomStatus::Occupied) != has_guest {
            return Err(EngineError::InvalidStatusOverride { room_id, status });
        }
        if room.room.status == status {
            return Ok(room.room.clone());
        }

        self.persist_and_apply(&mut room, &Event::RoomStatusChanged { id: room_id, status })
            .await?;
        info!(room = %room.room.room_number, %status, "room status changed");
        Ok(room.room.clone())
    }
}
