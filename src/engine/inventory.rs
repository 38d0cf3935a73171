use rust_decimal::Decimal;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

pub(super) fn sort_rooms(rooms: &mut [RoomInfo]) {
    rooms.sort_by(|a, b| (a.floor, &a.room_number).cmp(&(b.floor, &b.room_number)));
}

impl Engine {
    /// Add a room to the inventory. It starts vacant.
    pub async fn provision_room(
        &self,
        id: Ulid,
        room_number: &str,
        room_type: RoomType,
        floor: i32,
        rate: Decimal,
    ) -> Result<Room, EngineError> {
        let room_number = room_number.trim();
        if room_number.is_empty() {
            return Err(EngineError::InvalidInput("room number is required"));
        }
        if room_number.len() > MAX_ROOM_NUMBER_LEN {
            return Err(EngineError::LimitExceeded("room number too long"));
        }
        if rate <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount(rate));
        }

        let _provisioning = self.provisioning.lock().await;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(format!("room {id}")));
        }
        if self.room_numbers.contains_key(room_number) {
            return Err(EngineError::AlreadyExists(format!("room number {room_number}")));
        }

        let room = Room {
            id,
            room_number: room_number.to_string(),
            room_type,
            floor,
            rate,
            status: RoomStatus::Vacant,
        };
        self.wal_append(&Event::RoomProvisioned { room: room.clone() })
            .await?;
        self.insert_room(room.clone());
        info!(room = %room.room_number, %id, "room provisioned");
        Ok(room)
    }

    /// Caller holds `rs`; the guest directory is lock-free.
    pub(super) fn room_info(&self, rs: &RoomState) -> RoomInfo {
        // Whoever is in the room now, otherwise the next confirmed arrival.
        let current = rs.checked_in().or_else(|| {
            rs.reservations
                .iter()
                .find(|r| r.status == ReservationStatus::Confirmed)
        });
        RoomInfo {
            id: rs.room.id,
            room_number: rs.room.room_number.clone(),
            room_type: rs.room.room_type,
            floor: rs.room.floor,
            rate: rs.room.rate,
            status: rs.room.status,
            current_guest: current
                .and_then(|r| self.directory.get(&r.guest_id))
                .map(|g| g.full_name),
        }
    }

    fn reservation_info(&self, rs: &RoomState, r: &Reservation) -> ReservationInfo {
        let guest = self.directory.get(&r.guest_id);
        ReservationInfo {
            id: r.id,
            confirmation_number: r.confirmation_number.clone(),
            room_id: rs.room.id,
            room_number: rs.room.room_number.clone(),
            guest_id: r.guest_id,
            guest_name: guest.as_ref().map(|g| g.full_name.clone()).unwrap_or_default(),
            guest_email: guest.map(|g| g.email).unwrap_or_default(),
            check_in: r.stay.check_in,
            check_out: r.stay.check_out,
            nights: r.stay.nights(),
            total_amount: r.total_amount,
            status: r.status,
        }
    }

    pub async fn get_room_info(&self, id: Ulid) -> Result<RoomInfo, EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::RoomNotFound(id))?;
        let guard = rs.read().await;
        Ok(self.room_info(&guard))
    }

    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let mut rooms = Vec::with_capacity(self.rooms.len());
        for rs in self.room_handles() {
            let guard = rs.read().await;
            rooms.push(self.room_info(&guard));
        }
        sort_rooms(&mut rooms);
        rooms
    }

    /// All reservations ever made, oldest first.
    pub async fn list_reservations(&self) -> Vec<ReservationInfo> {
        let mut all = Vec::new();
        for rs in self.room_handles() {
            let guard = rs.read().await;
            for r in &guard.reservations {
                all.push((r.seq, self.reservation_info(&guard, r)));
            }
        }
        all.sort_by_key(|(seq, _)| *seq);
        all.into_iter().map(|(_, info)| info).collect()
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<ReservationInfo, EngineError> {
        let room_id = self
            .room_for_reservation(&id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        let r = guard
            .reservation(&id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        Ok(self.reservation_info(&guard, r))
    }

    pub(super) async fn find_reservation(&self, id: &Ulid) -> Option<Reservation> {
        let rs = self.get_room(&self.room_for_reservation(id)?)?;
        let guard = rs.read().await;
        guard.reservation(id).cloned()
    }
}
