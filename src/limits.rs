// Hard limits on record sizes and counts. Exceeding one is a client error.

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_GUESTS: usize = 1_000_000;
pub const MAX_SERVICES: usize = 1_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 50_000;

pub const MAX_ROOM_NUMBER_LEN: usize = 10;
pub const MAX_ROOM_TYPE_LEN: usize = 50;
pub const MAX_FULL_NAME_LEN: usize = 120;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PHONE_LEN: usize = 30;
pub const MAX_SERVICE_NAME_LEN: usize = 100;
pub const MAX_TEXT_LEN: usize = 10_000;

/// Longest stay accepted in one booking.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Room and service prices: 8 digits, 2 of them after the point.
pub const MAX_RATE_DIGITS: u32 = 8;
/// Booking totals: 10 digits, 2 of them after the point.
pub const MAX_TOTAL_DIGITS: u32 = 10;
pub const PRICE_SCALE: u32 = 2;
