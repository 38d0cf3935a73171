mod availability;
mod booking;
mod directory;
mod error;
mod inventory;
mod lifecycle;
mod stats;

pub use availability::{first_conflict, is_available, validate_stay};
pub use directory::{email_key, is_confirmation_number, GuestDirectory};
pub use error::{EngineError, ErrorKind};
pub use stats::stats_from;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::observability;
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

/// Owns the WAL. Whatever appends are queued when the first one arrives are
/// written together and made durable with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    // A failed batch is rolled back whole, so every caller in it sees the error
    // and none of its frames survive a restart.
    let result = wal.append_batch(batch.iter().map(|(event, _)| event));
    if let Err(e) = &result {
        warn!(error = %e, events = batch.len(), "WAL batch failed");
    }

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
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
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// The hotel core: inventory store, reservation ledger and guest directory.
///
/// Each room and its reservations sit behind one `RwLock`, so bookings for
/// different rooms never contend and a room's status can never be observed out
/// of step with its reservations.
pub struct Engine {
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) room_numbers: DashMap<String, Ulid>,
    /// Reverse lookup: reservation id → room id.
    pub(super) reservation_to_room: DashMap<Ulid, Ulid>,
    /// Confirmation number → reservation id. Numbers are reserved here before
    /// the reservation is committed.
    pub(super) confirmations: DashMap<String, Ulid>,
    pub(super) directory: GuestDirectory,
    /// Serializes provisioning against compaction.
    pub(super) provisioning: Mutex<()>,
    next_seq: AtomicU64,
    wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply an event to one room (caller holds its write lock).
fn apply_to_room(rs: &mut RoomState, event: &Event) {
    match event {
        Event::RoomStatusChanged { status, .. } => rs.room.status = *status,
        Event::ReservationCreated { reservation, .. } => {
            rs.insert_reservation(reservation.clone());
        }
        Event::CheckedIn { id, .. } => {
            if let Some(r) = rs.reservation_mut(id) {
                r.status = ReservationStatus::CheckedIn;
            }
            rs.room.status = RoomStatus::Occupied;
        }
        Event::CheckedOut { id, .. } => {
            if let Some(r) = rs.reservation_mut(id) {
                r.status = ReservationStatus::CheckedOut;
            }
            rs.room.status = RoomStatus::Vacant;
        }
        // Handled at the map level.
        Event::RoomProvisioned { .. } | Event::GuestRegistered { .. } => {}
    }
}

/// Room an event touches, for events applied under a room lock.
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RoomStatusChanged { id, .. } => Some(*id),
        Event::ReservationCreated { reservation, .. } => Some(reservation.room_id),
        Event::CheckedIn { room_id, .. } | Event::CheckedOut { room_id, .. } => Some(*room_id),
        Event::RoomProvisioned { .. } | Event::GuestRegistered { .. } => None,
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    /// Must be called inside a Tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            room_numbers: DashMap::new(),
            reservation_to_room: DashMap::new(),
            confirmations: DashMap::new(),
            directory: GuestDirectory::new(),
            provisioning: Mutex::new(()),
            next_seq: AtomicU64::new(1),
            wal_tx,
        };

        // We own every Arc during replay, so try_write never contends.
        for event in &events {
            match event {
                Event::RoomProvisioned { room } => engine.insert_room(room.clone()),
                Event::GuestRegistered { guest } => {
                    engine.bump_seq(guest.seq);
                    engine.directory.register(guest.clone());
                }
                other => {
                    let Some(room) = event_room_id(other).and_then(|id| engine.get_room(&id)) else {
                        continue;
                    };
                    let Ok(mut guard) = room.try_write() else {
                        continue;
                    };
                    apply_to_room(&mut guard, other);
                    engine.index_event(other);
                }
            }
        }

        Ok(engine)
    }

    pub(super) fn next_seq(&self) -> Seq {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn bump_seq(&self, seen: Seq) {
        self.next_seq.fetch_max(seen + 1, Ordering::Relaxed);
    }

    pub(super) fn insert_room(&self, room: Room) {
        self.room_numbers.insert(room.room_number.clone(), room.id);
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room))));
    }

    /// Side indexes for an event already applied to its room.
    fn index_event(&self, event: &Event) {
        if let Event::ReservationCreated { reservation, new_guest } = event {
            if let Some(guest) = new_guest {
                self.bump_seq(guest.seq);
                self.directory.register(guest.clone());
            }
            self.bump_seq(reservation.seq);
            self.reservation_to_room
                .insert(reservation.id, reservation.room_id);
            self.confirmations
                .insert(reservation.confirmation_number.clone(), reservation.id);
            self.directory
                .link_reservation(reservation.guest_id, reservation.seq, reservation.id);
        }
    }

    /// Write an event through the group-commit writer and wait for durability.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::StorageFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageFailure(e.to_string()))
    }

    /// WAL-append, then apply to the locked room and its indexes. Nothing is
    /// applied when the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event);
        self.index_event(event);
        Ok(())
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_room
            .get(reservation_id)
            .map(|e| *e.value())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Reservation → room, then take that room's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .room_for_reservation(reservation_id)
            .ok_or(EngineError::ReservationNotFound(*reservation_id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        Ok((room_id, rs.write_owned().await))
    }

    /// Shared handles to every room, in room-id order.
    pub(super) fn room_handles(&self) -> Vec<SharedRoomState> {
        let mut handles: Vec<(Ulid, SharedRoomState)> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        handles.sort_by_key(|(id, _)| *id);
        handles.into_iter().map(|(_, rs)| rs).collect()
    }

    /// Read-lock every room at once. Locks are taken in room-id order and
    /// writers never hold more than one room, so this cannot deadlock.
    pub async fn snapshot(&self) -> Vec<OwnedRwLockReadGuard<RoomState>> {
        let mut guards = Vec::with_capacity(self.rooms.len());
        for rs in self.room_handles() {
            guards.push(rs.read_owned().await);
        }
        guards
    }

    /// Rewrite the WAL with just the events needed to rebuild current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _provisioning = self.provisioning.lock().await;
        // Held until the swap completes: no room can change under the rewrite.
        let snapshot = self.snapshot().await;

        let mut events: Vec<Event> = snapshot
            .iter()
            .map(|rs| Event::RoomProvisioned { room: rs.room.clone() })
            .collect();
        events.extend(
            self.directory
                .all_guests()
                .into_iter()
                .map(|guest| Event::GuestRegistered { guest }),
        );
        let mut reservations: Vec<&Reservation> =
            snapshot.iter().flat_map(|rs| rs.reservations.iter()).collect();
        reservations.sort_by_key(|r| r.seq);
        events.extend(reservations.into_iter().map(|r| Event::ReservationCreated {
            reservation: r.clone(),
            new_guest: None,
        }));

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StorageFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageFailure(e.to_string()))
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
