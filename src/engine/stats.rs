use std::collections::HashSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::*;

use super::Engine;

/// Dashboard statistics over a set of rooms that were read together.
pub fn stats_from<'a>(rooms: impl IntoIterator<Item = &'a RoomState>, as_of: NaiveDate) -> Stats {
    let mut stats = Stats::default();
    let mut rooms_with_guest: HashSet<Ulid> = HashSet::new();

    for rs in rooms {
        stats.total_rooms += 1;
        match rs.room.status {
            RoomStatus::Vacant => stats.vacant_rooms += 1,
            RoomStatus::Occupied => stats.occupied_rooms += 1,
            RoomStatus::Maintenance => stats.maintenance_rooms += 1,
            RoomStatus::Cleaning => stats.cleaning_rooms += 1,
        }

        let mut referenced = false;
        for r in &rs.reservations {
            match r.status {
                ReservationStatus::Confirmed => {
                    stats.confirmed_reservations += 1;
                    if r.stay.check_in == as_of {
                        stats.today_arrivals += 1;
                    }
                }
                ReservationStatus::CheckedIn => {
                    stats.checked_in_reservations += 1;
                    rooms_with_guest.insert(rs.room.id);
                    if r.stay.check_out == as_of {
                        stats.today_departures += 1;
                    }
                }
                ReservationStatus::CheckedOut => {}
            }
            referenced |= r.status.is_active();
            if r.stay.check_in == as_of {
                stats.revenue_today += r.total_amount;
            }
        }
        if rs.room.status == RoomStatus::Vacant && !referenced {
            stats.truly_available_rooms += 1;
        }
    }

    stats.reserved_rooms = stats.confirmed_reservations + stats.checked_in_reservations;
    stats.occupancy_rate = occupancy_rate(rooms_with_guest.len() as u64, stats.total_rooms);
    stats
}

/// Percentage of rooms with a checked-in guest, two decimal places; 0 for an empty hotel.
fn occupancy_rate(occupied: u64, total: u64) -> Decimal {
    if total == 0 {
        return Decimal::ZERO;
    }
    let mut rate = (Decimal::from(occupied) * Decimal::ONE_HUNDRED / Decimal::from(total)).round_dp(2);
    rate.rescale(2);
    rate
}

impl Engine {
    /// Statistics from one consistent snapshot of every room.
    pub async fn compute_stats(&self, as_of: NaiveDate) -> Stats {
        let snapshot = self.snapshot().await;
        stats_from(snapshot.iter().map(|guard| &**guard), as_of)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn room(status: RoomStatus) -> RoomState {
        RoomState::new(Room {
            id: Ulid::new(),
            room_number: "0".into(),
            room_type: RoomType::Standard,
            floor: 1,
            rate: dec!(100),
            status,
        })
    }

    fn with(mut rs: RoomState, check_in: &str, check_out: &str, status: ReservationStatus, amount: Decimal) -> RoomState {
        rs.insert_reservation(Reservation {
            id: Ulid::new(),
            confirmation_number: format!("HTL{}", Ulid::new().random() % 1_000_000),
            room_id: rs.room.id,
            guest_id: Ulid::new(),
            stay: Stay::new(d(check_in), d(check_out)),
            total_amount: amount,
            status,
            seq: 0,
        });
        rs
    }

    #[test]
    fn occupancy_thirty_percent() {
        let mut rooms: Vec<RoomState> = (0..7).map(|_| room(RoomStatus::Vacant)).collect();
        for _ in 0..3 {
            rooms.push(with(
                room(RoomStatus::Occupied),
                "2024-01-09",
                "2024-01-12",
                ReservationStatus::CheckedIn,
                dec!(300),
            ));
        }
        let stats = stats_from(&rooms, d("2024-01-10"));
        assert_eq!(stats.total_rooms, 10);
        assert_eq!(stats.occupancy_rate, dec!(30.00));
        assert_eq!(stats.occupied_rooms, 3);
        assert_eq!(stats.checked_in_reservations, 3);
    }

    #[test]
    fn occupancy_empty_hotel_is_zero() {
        let stats = stats_from(&Vec::<RoomState>::new(), d("2024-01-10"));
        assert_eq!(stats.total_rooms, 0);
        assert_eq!(stats.occupancy_rate, Decimal::ZERO);
    }

    #[test]
    fn occupancy_rounds_to_two_places() {
        let mut rooms: Vec<RoomState> = (0..2).map(|_| room(RoomStatus::Vacant)).collect();
        rooms.push(with(
            room(RoomStatus::Occupied),
            "2024-01-01",
            "2024-01-05",
            ReservationStatus::CheckedIn,
            dec!(10),
        ));
        assert_eq!(stats_from(&rooms, d("2024-01-02")).occupancy_rate, dec!(33.33));
    }

    #[test]
    fn daily_figures_and_truly_available() {
        let today = d("2024-05-01");
        let rooms = vec![
            // arriving today
            with(room(RoomStatus::Vacant), "2024-05-01", "2024-05-03", ReservationStatus::Confirmed, dec!(250)),
            // leaving today
            with(room(RoomStatus::Occupied), "2024-04-28", "2024-05-01", ReservationStatus::CheckedIn, dec!(600)),
            // arrived today and already in
            with(room(RoomStatus::Occupied), "2024-05-01", "2024-05-02", ReservationStatus::CheckedIn, dec!(120.50)),
            // checked out history does not hold the room
            with(room(RoomStatus::Vacant), "2024-04-01", "2024-04-02", ReservationStatus::CheckedOut, dec!(99)),
            room(RoomStatus::Maintenance),
            room(RoomStatus::Cleaning),
        ];
        let stats = stats_from(&rooms, today);
        assert_eq!(stats.vacant_rooms, 2);
        assert_eq!(stats.maintenance_rooms, 1);
        assert_eq!(stats.cleaning_rooms, 1);
        assert_eq!(stats.confirmed_reservations, 1);
        assert_eq!(stats.reserved_rooms, 3);
        assert_eq!(stats.today_arrivals, 1);
        assert_eq!(stats.today_departures, 1);
        assert_eq!(stats.revenue_today, dec!(370.50));
        // the vacant room with a confirmed arrival is not truly available
        assert_eq!(stats.truly_available_rooms, 1);
    }
}
