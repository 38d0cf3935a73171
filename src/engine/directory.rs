use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Dedup key for guests: trimmed, ASCII-lowercased email.
pub fn email_key(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// `HTL` in any case followed by one or more digits.
pub fn is_confirmation_number(query: &str) -> bool {
    let Some(prefix) = query.get(..CONFIRMATION_PREFIX.len()) else {
        return false;
    };
    let digits = &query[CONFIRMATION_PREFIX.len()..];
    prefix.eq_ignore_ascii_case(CONFIRMATION_PREFIX)
        && !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Guests by id and email, plus each guest's reservations in creation order.
pub struct GuestDirectory {
    guests: DashMap<Ulid, Guest>,
    by_email: DashMap<String, Ulid>,
    /// guest id → (seq, reservation id)
    reservations: DashMap<Ulid, Vec<(Seq, Ulid)>>,
    /// Async mutex per email key with a booking in flight; held while it decides whether the guest is new.
    email_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Default for GuestDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestDirectory {
    pub fn new() -> Self {
        Self {
            guests: DashMap::new(),
            by_email: DashMap::new(),
            reservations: DashMap::new(),
            email_locks: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.guests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guests.is_empty()
    }

    pub fn get(&self, id: &Ulid) -> Option<Guest> {
        self.guests.get(id).map(|e| e.value().clone())
    }

    pub fn find_by_email(&self, email: &str) -> Option<Ulid> {
        self.by_email.get(&email_key(email)).map(|e| *e.value())
    }

    /// Lock an email key for the span of one booking's guest resolution.
    pub(super) async fn lock_email(&self, key: &str) -> EmailGuard<'_> {
        let lock = self
            .email_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        EmailGuard {
            locks: &self.email_locks,
            key: key.to_string(),
            _guard: lock.lock_owned().await,
        }
    }

    #[cfg(test)]
    pub(super) fn held_email_locks(&self) -> usize {
        self.email_locks.len()
    }

    /// First registration for an email wins; a later one with the same email is ignored.
    pub fn register(&self, guest: Guest) {
        let key = email_key(&guest.email);
        if self.by_email.contains_key(&key) {
            return;
        }
        self.by_email.insert(key, guest.id);
        self.guests.insert(guest.id, guest);
    }

    pub fn link_reservation(&self, guest_id: Ulid, seq: Seq, reservation_id: Ulid) {
        self.reservations
            .entry(guest_id)
            .or_default()
            .push((seq, reservation_id));
    }

    /// The guest's most recently created reservation.
    pub fn latest_reservation(&self, guest_id: &Ulid) -> Option<Ulid> {
        self.reservations
            .get(guest_id)
            .and_then(|list| list.iter().max_by_key(|(seq, _)| *seq).map(|(_, id)| *id))
    }

    pub fn all_guests(&self) -> Vec<Guest> {
        let mut all: Vec<Guest> = self.guests.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|g| g.seq);
        all
    }

    /// Case-insensitive substring match on name or email, in registration order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<Guest> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<Guest> = self
            .guests
            .iter()
            .filter(|e| {
                let g = e.value();
                g.full_name.to_lowercase().contains(&needle)
                    || g.email.to_lowercase().contains(&needle)
            })
            .map(|e| e.value().clone())
            .collect();
        hits.sort_by_key(|g| g.seq);
        hits.truncate(limit);
        hits
    }
}

/// Holds one email's mutex. The map entry goes away with the last holder.
pub(super) struct EmailGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for EmailGuard<'_> {
    fn drop(&mut self) {
        // Two references means only the map and this guard: nobody is waiting.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 2);
    }
}

fn check_query(query: &str) -> Result<&str, EngineError> {
    let q = query.trim();
    if q.len() > MAX_QUERY_LEN {
        return Err(EngineError::LimitExceeded("search query too long"));
    }
    Ok(q)
}

impl Engine {
    pub fn guest_count(&self) -> usize {
        self.directory.len()
    }

    pub fn get_guest(&self, id: &Ulid) -> Option<Guest> {
        self.directory.get(id)
    }

    pub fn search_guests(&self, query: &str) -> Result<Vec<Guest>, EngineError> {
        let q = check_query(query)?;
        Ok(self.directory.search(q, MAX_GUEST_SEARCH_RESULTS))
    }

    /// Front-desk lookup: an exact confirmation-number hit first, then guests
    /// whose name or email contains the query, each with their latest reservation.
    pub async fn search_directory(&self, query: &str) -> Result<Vec<DirectoryHit>, EngineError> {
        let q = check_query(query)?;
        if q.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();

        if is_confirmation_number(q) {
            let key = q.to_ascii_uppercase();
            let found = self.confirmations.get(&key).map(|e| *e.value());
            // A number can be reserved by an in-flight booking that has no record yet.
            if let Some(reservation) = match found {
                Some(id) => self.find_reservation(&id).await,
                None => None,
            } && let Some(guest) = self.directory.get(&reservation.guest_id)
            {
                hits.push(DirectoryHit::Reservation {
                    confirmation_number: reservation.confirmation_number,
                    guest_name: guest.full_name,
                    email: guest.email,
                    check_in: reservation.stay.check_in,
                    check_out: reservation.stay.check_out,
                    status: reservation.status,
                });
            }
        }

        for guest in self.directory.search(q, DIRECTORY_GUEST_LIMIT) {
            let latest = match self.directory.latest_reservation(&guest.id) {
                Some(id) => self.find_reservation(&id).await,
                None => None,
            };
            hits.push(DirectoryHit::Guest {
                guest_name: guest.full_name,
                email: guest.email,
                phone: guest.phone,
                last_reservation: latest.as_ref().map(|r| r.confirmation_number.clone()),
                last_stay: latest.as_ref().map(|r| r.stay.check_in),
                status: latest.as_ref().map(|r| r.status),
            });
        }

        Ok(hits)
    }
}
