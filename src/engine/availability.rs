use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_STAY_NIGHTS;
use crate::model::*;

use super::inventory::sort_rooms;
use super::{Engine, EngineError};

// ── Availability ──────────────────────────────────────────────────

/// Reject inverted or empty ranges before any overlap check runs.
pub fn validate_stay(check_in: NaiveDate, check_out: NaiveDate) -> Result<Stay, EngineError> {
    if check_out <= check_in {
        return Err(EngineError::InvalidDateRange { check_in, check_out });
    }
    let stay = Stay::new(check_in, check_out);
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(stay)
}

/// The first active reservation on `room` that shares a night with `stay`.
/// Checked-out reservations never block, even on the same dates.
pub fn first_conflict(room: &RoomState, stay: &Stay) -> Option<Ulid> {
    room.overlapping(stay)
        .find(|r| r.status.is_active())
        .map(|r| r.id)
}

pub fn is_available(room: &RoomState, stay: &Stay) -> bool {
    first_conflict(room, stay).is_none()
}

impl Engine {
    /// Whether `room_id` can take a new booking for `[check_in, check_out)`.
    pub async fn is_room_available(
        &self,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<bool, EngineError> {
        let stay = validate_stay(check_in, check_out)?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        Ok(is_available(&guard, &stay))
    }

    /// Every room free for the whole range, ordered by floor then room number.
    /// Room status is not consulted: a room in cleaning today can still be sold for next week.
    pub async fn available_rooms(
        &self,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<Vec<RoomInfo>, EngineError> {
        let stay = validate_stay(check_in, check_out)?;
        let mut free = Vec::new();
        for rs in self.room_handles() {
            let guard = rs.read().await;
            if is_available(&guard, &stay) {
                free.push(self.room_info(&guard));
            }
        }
        sort_rooms(&mut free);
        Ok(free)
    }
}
