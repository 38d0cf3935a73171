use rust_decimal::Decimal;
use tracing::info;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::RoomType;

pub const FLOORS: i32 = 4;
pub const ROOMS_PER_FLOOR: i32 = 10;

/// Rack rate for a room type.
pub fn default_rate(room_type: RoomType) -> Decimal {
    match room_type {
        RoomType::Standard => Decimal::new(125, 0),
        RoomType::Deluxe => Decimal::new(199, 0),
        RoomType::Suite => Decimal::new(325, 0),
        RoomType::Presidential => Decimal::new(650, 0),
    }
}

/// Room numbers run `101`..`110` on floor 1 up to `410` on floor 4; types cycle
/// through the fixed set.
pub fn default_layout() -> Vec<(String, RoomType, i32)> {
    (1..=FLOORS)
        .flat_map(|floor| {
            (1..=ROOMS_PER_FLOOR).map(move |n| {
                let room_type = RoomType::ALL[((n - 1) as usize) % RoomType::ALL.len()];
                (format!("{floor}{n:02}"), room_type, floor)
            })
        })
        .collect()
}

/// Provision the default layout into an empty inventory. Returns rooms created.
pub async fn seed_default_rooms(engine: &Engine) -> Result<usize, EngineError> {
    if engine.room_count() > 0 {
        return Ok(0);
    }
    let layout = default_layout();
    for (number, room_type, floor) in &layout {
        engine
            .provision_room(Ulid::new(), number, *room_type, *floor, default_rate(*room_type))
            .await?;
    }
    info!(rooms = layout.len(), "seeded default room inventory");
    Ok(layout.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_covers_four_floors_of_ten() {
        let layout = default_layout();
        assert_eq!(layout.len(), 40);
        assert_eq!(layout[0], ("101".to_string(), RoomType::Standard, 1));
        assert_eq!(layout[9].0, "110");
        assert_eq!(layout[39], ("410".to_string(), RoomType::Deluxe, 4));
    }

    #[tokio::test]
    async fn seeding_is_skipped_once_rooms_exist() {
        let dir = std::env::temp_dir().join("roomledger_test_seed");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("seed.wal");
        let _ = std::fs::remove_file(&path);

        let engine = Engine::new(path).unwrap();
        assert_eq!(seed_default_rooms(&engine).await.unwrap(), 40);
        assert_eq!(seed_default_rooms(&engine).await.unwrap(), 0);
        assert_eq!(engine.room_count(), 40);
    }
}
