// Hard input limits. Requests beyond these are rejected with `LimitExceeded`.

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_ROOM_NUMBER_LEN: usize = 16;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_ID_NUMBER_LEN: usize = 64;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;
pub const MAX_STAY_NIGHTS: i64 = 365;
pub const MAX_QUERY_LEN: usize = 256;

/// Guest matches returned by a plain guest search.
pub const MAX_GUEST_SEARCH_RESULTS: usize = 100;
/// Guest matches attached to a directory (front-desk) search.
pub const DIRECTORY_GUEST_LIMIT: usize = 10;

pub const CONFIRMATION_PREFIX: &str = "HTL";
pub const CONFIRMATION_MAX_ATTEMPTS: usize = 16;
