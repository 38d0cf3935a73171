use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::{first_conflict, validate_stay};
use super::directory::email_key;
use super::{Engine, EngineError};

/// `HTL` + unix seconds + four digits of ULID entropy.
pub(super) fn candidate_confirmation() -> String {
    let secs = chrono::Utc::now().timestamp();
    let salt = Ulid::new().random() % 10_000;
    format!("{CONFIRMATION_PREFIX}{secs}{salt:04}")
}

fn validate_amount(amount: Decimal) -> Result<(), EngineError> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount(amount));
    }
    Ok(())
}

fn validate_guest(info: &GuestInfo) -> Result<(), EngineError> {
    let email = info.email.trim();
    if email.is_empty() {
        return Err(EngineError::InvalidInput("guest email is required"));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("guest email too long"));
    }
    if info.full_name.trim().len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("guest name too long"));
    }
    if info.phone.as_ref().is_some_and(|p| p.len() > MAX_PHONE_LEN) {
        return Err(EngineError::LimitExceeded("guest phone too long"));
    }
    if info.id_number.as_ref().is_some_and(|n| n.len() > MAX_ID_NUMBER_LEN) {
        return Err(EngineError::LimitExceeded("guest id number too long"));
    }
    Ok(())
}

fn outcome_label(result: &Result<Reservation, EngineError>) -> &'static str {
    match result {
        Ok(_) => "confirmed",
        Err(EngineError::RoomUnavailable { .. }) => "unavailable",
        Err(EngineError::Conflict(_)) => "conflict",
        Err(EngineError::StorageFailure(_)) => "storage_failure",
        Err(_) => "rejected",
    }
}

impl Engine {
    /// Admit a booking. Validation, the overlap re-check, guest resolution and
    /// the insert all happen while the room's write lock is held, so two
    /// overlapping requests for the same room can never both succeed.
    /// On any error nothing is written.
    pub async fn create_reservation(
        &self,
        request: NewReservation,
    ) -> Result<Reservation, EngineError> {
        let result = self.admit(request).await;
        metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => outcome_label(&result))
            .increment(1);
        result
    }

    async fn admit(&self, request: NewReservation) -> Result<Reservation, EngineError> {
        let NewReservation {
            room_id,
            check_in,
            check_out,
            guest,
            total_amount,
        } = request;

        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let stay = validate_stay(check_in, check_out)?;
        validate_amount(total_amount)?;
        validate_guest(&guest)?;

        let mut room = rs.write().await;
        if room.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }
        if let Some(conflicting) = first_conflict(&room, &stay) {
            debug!(room = %room.room.room_number, %conflicting, "booking rejected: overlap");
            return Err(EngineError::RoomUnavailable { room_id, conflicting });
        }

        // Lock order is always room, then email.
        let key = email_key(&guest.email);
        let _email_guard = self.directory.lock_email(&key).await;

        let (guest_id, new_guest) = match self.directory.find_by_email(&key) {
            Some(id) => (id, None),
            None => {
                let created = Guest {
                    id: Ulid::new(),
                    full_name: guest.full_name.trim().to_string(),
                    email: guest.email.trim().to_string(),
                    phone: guest.phone,
                    id_number: guest.id_number,
                    seq: self.next_seq(),
                };
                (created.id, Some(created))
            }
        };

        let id = Ulid::new();
        let confirmation_number = self.reserve_confirmation(id, candidate_confirmation)?;
        let reservation = Reservation {
            id,
            confirmation_number: confirmation_number.clone(),
            room_id,
            guest_id,
            stay,
            total_amount,
            status: ReservationStatus::Confirmed,
            seq: self.next_seq(),
        };

        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
            new_guest,
        };
        if let Err(e) = self.persist_and_apply(&mut room, &event).await {
            self.confirmations.remove(&confirmation_number);
            return Err(e);
        }

        info!(
            confirmation = %confirmation_number,
            room = %room.room.room_number,
            check_in = %stay.check_in,
            check_out = %stay.check_out,
            "reservation confirmed"
        );
        Ok(reservation)
    }

    /// Claim a confirmation number for `reservation_id`, drawing candidates from
    /// `next` until one is unused. Gives up with `Conflict` after a bounded number of tries.
    pub(super) fn reserve_confirmation(
        &self,
        reservation_id: Ulid,
        mut next: impl FnMut() -> String,
    ) -> Result<String, EngineError> {
        for _ in 0..CONFIRMATION_MAX_ATTEMPTS {
            let candidate = next();
            if let Entry::Vacant(slot) = self.confirmations.entry(candidate.clone()) {
                slot.insert(reservation_id);
                return Ok(candidate);
            }
            debug!(%candidate, "confirmation number collision, retrying");
        }
        Err(EngineError::Conflict("could not allocate a unique confirmation number"))
    }
}
