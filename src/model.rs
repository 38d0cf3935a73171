use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Monotonic creation order for guests and reservations.
pub type Seq = u64;

/// Half-open stay `[check_in, check_out)` in calendar nights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Stay {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        debug_assert!(check_in < check_out, "Stay check_in must be before check_out");
        Self { check_in, check_out }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    /// Same-day turnover (one stay's check-out equal to the other's check-in) is not an overlap.
    pub fn overlaps(&self, other: &Stay) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    pub fn contains_night(&self, night: NaiveDate) -> bool {
        self.check_in <= night && night < self.check_out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomType {
    Standard,
    Deluxe,
    Suite,
    Presidential,
}

impl RoomType {
    pub const ALL: [RoomType; 4] = [
        RoomType::Standard,
        RoomType::Deluxe,
        RoomType::Suite,
        RoomType::Presidential,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::Standard => "standard",
            RoomType::Deluxe => "deluxe",
            RoomType::Suite => "suite",
            RoomType::Presidential => "presidential",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomStatus {
    Vacant,
    Occupied,
    Maintenance,
    Cleaning,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Vacant => "vacant",
            RoomStatus::Occupied => "occupied",
            RoomStatus::Maintenance => "maintenance",
            RoomStatus::Cleaning => "cleaning",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Confirmed,
    CheckedIn,
    CheckedOut,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::CheckedIn => "checked_in",
            ReservationStatus::CheckedOut => "checked_out",
        }
    }

    /// Confirmed and checked-in reservations hold their nights; checked-out ones don't.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Confirmed | ReservationStatus::CheckedIn)
    }
}

macro_rules! display_and_parse {
    ($ty:ident, $what:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_ascii_lowercase();
                $ty::variants()
                    .into_iter()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| format!("unknown {}: {s}", $what))
            }
        }
    };
}

impl RoomType {
    fn variants() -> [RoomType; 4] {
        RoomType::ALL
    }
}

impl RoomStatus {
    fn variants() -> [RoomStatus; 4] {
        [
            RoomStatus::Vacant,
            RoomStatus::Occupied,
            RoomStatus::Maintenance,
            RoomStatus::Cleaning,
        ]
    }
}

impl ReservationStatus {
    fn variants() -> [ReservationStatus; 3] {
        [
            ReservationStatus::Confirmed,
            ReservationStatus::CheckedIn,
            ReservationStatus::CheckedOut,
        ]
    }
}

display_and_parse!(RoomType, "room type");
display_and_parse!(RoomStatus, "room status");
display_and_parse!(ReservationStatus, "reservation status");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub room_number: String,
    pub room_type: RoomType,
    pub floor: i32,
    /// Nightly rate.
    pub rate: Decimal,
    pub status: RoomStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub id: Ulid,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub id_number: Option<String>,
    pub seq: Seq,
}

/// Guest details as they arrive with a booking request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestInfo {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub id_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub confirmation_number: String,
    pub room_id: Ulid,
    pub guest_id: Ulid,
    pub stay: Stay,
    pub total_amount: Decimal,
    pub status: ReservationStatus,
    pub seq: Seq,
}

/// Booking request accepted by `Engine::create_reservation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub room_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guest: GuestInfo,
    pub total_amount: Decimal,
}

/// A room plus its reservation ledger. Everything here is guarded by one lock,
/// so room status and reservation status always change together.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// All reservations ever made on this room, sorted by `stay.check_in`.
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by check-in date.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.stay.check_in <= reservation.stay.check_in);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn reservation_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Reservations whose stay overlaps `query`, any status.
    /// Everything at or past the partition point checks in on or after `query.check_out`.
    pub fn overlapping(&self, query: &Stay) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.stay.check_in < query.check_out);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.stay.check_out > query.check_in)
    }

    pub fn active(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().filter(|r| r.status.is_active())
    }

    pub fn checked_in(&self) -> Option<&Reservation> {
        self.reservations
            .iter()
            .find(|r| r.status == ReservationStatus::CheckedIn)
    }
}

/// WAL record format. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomProvisioned {
        room: Room,
    },
    RoomStatusChanged {
        id: Ulid,
        status: RoomStatus,
    },
    /// Only written by compaction; live bookings carry new guests inline.
    GuestRegistered {
        guest: Guest,
    },
    ReservationCreated {
        reservation: Reservation,
        new_guest: Option<Guest>,
    },
    CheckedIn {
        id: Ulid,
        room_id: Ulid,
    },
    CheckedOut {
        id: Ulid,
        room_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub room_number: String,
    pub room_type: RoomType,
    pub floor: i32,
    pub rate: Decimal,
    pub status: RoomStatus,
    pub current_guest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub confirmation_number: String,
    pub room_id: Ulid,
    pub room_number: String,
    pub guest_id: Ulid,
    pub guest_name: String,
    pub guest_email: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub nights: i64,
    pub total_amount: Decimal,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Stats {
    pub total_rooms: u64,
    pub vacant_rooms: u64,
    pub occupied_rooms: u64,
    pub maintenance_rooms: u64,
    pub cleaning_rooms: u64,
    /// Reservations in confirmed or checked_in.
    pub reserved_rooms: u64,
    pub confirmed_reservations: u64,
    pub checked_in_reservations: u64,
    /// Vacant and not referenced by any active reservation.
    pub truly_available_rooms: u64,
    /// Percentage, two decimal places.
    pub occupancy_rate: Decimal,
    pub today_arrivals: u64,
    pub today_departures: u64,
    pub revenue_today: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryHit {
    Reservation {
        confirmation_number: String,
        guest_name: String,
        email: String,
        check_in: NaiveDate,
        check_out: NaiveDate,
        status: ReservationStatus,
    },
    Guest {
        guest_name: String,
        email: String,
        phone: Option<String>,
        last_reservation: Option<String>,
        last_stay: Option<NaiveDate>,
        status: Option<ReservationStatus>,
    },
}

impl DirectoryHit {
    pub fn kind(&self) -> &'static str {
        match self {
            DirectoryHit::Reservation { .. } => "reservation",
            DirectoryHit::Guest { .. } => "guest",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn reservation(check_in: &str, check_out: &str, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            confirmation_number: format!("HTL{}", Ulid::new().random() % 10_000),
            room_id: Ulid::nil(),
            guest_id: Ulid::nil(),
            stay: Stay::new(d(check_in), d(check_out)),
            total_amount: dec!(100),
            status,
            seq: 0,
        }
    }

    fn room_state() -> RoomState {
        RoomState::new(Room {
            id: Ulid::new(),
            room_number: "101".into(),
            room_type: RoomType::Standard,
            floor: 1,
            rate: dec!(120),
            status: RoomStatus::Vacant,
        })
    }

    #[test]
    fn stay_basics() {
        let s = Stay::new(d("2024-01-10"), d("2024-01-15"));
        assert_eq!(s.nights(), 5);
        assert!(s.contains_night(d("2024-01-10")));
        assert!(s.contains_night(d("2024-01-14")));
        assert!(!s.contains_night(d("2024-01-15"))); // departure morning
    }

    #[test]
    fn stay_overlap() {
        let a = Stay::new(d("2024-01-10"), d("2024-01-15"));
        let b = Stay::new(d("2024-01-12"), d("2024-01-20"));
        let c = Stay::new(d("2024-01-15"), d("2024-01-18"));
        let inside = Stay::new(d("2024-01-11"), d("2024-01-12"));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // turnover
        assert!(!c.overlaps(&a));
        assert!(a.overlaps(&inside));
    }

    #[test]
    fn reservations_stay_sorted() {
        let mut rs = room_state();
        rs.insert_reservation(reservation("2024-03-01", "2024-03-04", ReservationStatus::Confirmed));
        rs.insert_reservation(reservation("2024-01-01", "2024-01-04", ReservationStatus::CheckedOut));
        rs.insert_reservation(reservation("2024-02-01", "2024-02-04", ReservationStatus::Confirmed));
        let starts: Vec<_> = rs.reservations.iter().map(|r| r.stay.check_in).collect();
        assert_eq!(starts, vec![d("2024-01-01"), d("2024-02-01"), d("2024-03-01")]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = room_state();
        rs.insert_reservation(reservation("2024-01-01", "2024-01-05", ReservationStatus::Confirmed));
        rs.insert_reservation(reservation("2024-01-08", "2024-01-12", ReservationStatus::Confirmed));
        rs.insert_reservation(reservation("2024-01-20", "2024-01-22", ReservationStatus::Confirmed));

        let query = Stay::new(d("2024-01-10"), d("2024-01-15"));
        let hits: Vec<_> = rs.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].stay.check_in, d("2024-01-08"));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut rs = room_state();
        rs.insert_reservation(reservation("2024-01-10", "2024-01-15", ReservationStatus::Confirmed));
        let before = Stay::new(d("2024-01-05"), d("2024-01-10"));
        let after = Stay::new(d("2024-01-15"), d("2024-01-16"));
        assert_eq!(rs.overlapping(&before).count(), 0);
        assert_eq!(rs.overlapping(&after).count(), 0);
    }

    #[test]
    fn active_and_checked_in_views() {
        let mut rs = room_state();
        rs.insert_reservation(reservation("2024-01-01", "2024-01-03", ReservationStatus::CheckedOut));
        rs.insert_reservation(reservation("2024-01-03", "2024-01-05", ReservationStatus::CheckedIn));
        rs.insert_reservation(reservation("2024-01-05", "2024-01-07", ReservationStatus::Confirmed));
        assert_eq!(rs.active().count(), 2);
        assert_eq!(rs.checked_in().unwrap().stay.check_in, d("2024-01-03"));
    }

    #[test]
    fn status_strings_parse_case_insensitively() {
        assert_eq!("Suite".parse::<RoomType>().unwrap(), RoomType::Suite);
        assert_eq!(" MAINTENANCE ".parse::<RoomStatus>().unwrap(), RoomStatus::Maintenance);
        assert_eq!(
            "checked_in".parse::<ReservationStatus>().unwrap(),
            ReservationStatus::CheckedIn
        );
        assert!("penthouse".parse::<RoomType>().is_err());
        assert_eq!(ReservationStatus::CheckedOut.to_string(), "checked_out");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCreated {
            reservation: reservation("2024-01-10", "2024-01-15", ReservationStatus::Confirmed),
            new_guest: Some(Guest {
                id: Ulid::new(),
                full_name: "Ada Lovelace".into(),
                email: "ada@example.com".into(),
                phone: None,
                id_number: Some("X1".into()),
                seq: 3,
            }),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
