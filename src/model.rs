use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, for record timestamps only. Stay dates are `NaiveDate`.
pub type Ms = i64;

/// Half-open date range `[start, end)`. The end date itself is not occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateRange start must be before end");
        Self { start, end }
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Status enums ─────────────────────────────────────────────────

/// Operational flag on a room. Set explicitly, never derived from bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoomStatus {
    #[default]
    Available,
    Occupied,
    Maintenance,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Available => "available",
            RoomStatus::Occupied => "occupied",
            RoomStatus::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "available" => Some(RoomStatus::Available),
            "occupied" => Some(RoomStatus::Occupied),
            "maintenance" => Some(RoomStatus::Maintenance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BookingStatus {
    #[default]
    Reserved,
    CheckedIn,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Reserved and checked-in bookings occupy the room for overlap purposes.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Reserved | BookingStatus::CheckedIn)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Reserved => "reserved",
            BookingStatus::CheckedIn => "checked_in",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "reserved" => Some(BookingStatus::Reserved),
            "checked_in" => Some(BookingStatus::CheckedIn),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    /// Next status for `action`, or `None` if the action is illegal from here.
    pub fn apply(self, action: BookingAction) -> Option<BookingStatus> {
        match (self, action) {
            (BookingStatus::Reserved, BookingAction::CheckIn) => Some(BookingStatus::CheckedIn),
            (BookingStatus::CheckedIn, BookingAction::Complete) => Some(BookingStatus::Completed),
            (BookingStatus::Reserved | BookingStatus::CheckedIn, BookingAction::Cancel) => {
                Some(BookingStatus::Cancelled)
            }
            _ => None,
        }
    }
}

/// A status transition requested on a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingAction {
    CheckIn,
    Complete,
    Cancel,
}

impl BookingAction {
    pub fn label(&self) -> &'static str {
        match self {
            BookingAction::CheckIn => "check_in",
            BookingAction::Complete => "complete",
            BookingAction::Cancel => "cancel",
        }
    }

    /// The room status written together with the booking status, if any.
    pub fn room_effect(&self) -> Option<RoomStatus> {
        match self {
            BookingAction::CheckIn => Some(RoomStatus::Occupied),
            BookingAction::Complete => Some(RoomStatus::Available),
            BookingAction::Cancel => None,
        }
    }

    /// The action that leads to `status`, used to map `SET status = ...`.
    pub fn for_target(status: BookingStatus) -> Option<BookingAction> {
        match status {
            BookingStatus::CheckedIn => Some(BookingAction::CheckIn),
            BookingStatus::Completed => Some(BookingAction::Complete),
            BookingStatus::Cancelled => Some(BookingAction::Cancel),
            BookingStatus::Reserved => None,
        }
    }
}

// ── Records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub number: String,
    pub room_type: String,
    pub capacity: u32,
    /// Nightly rate.
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub status: RoomStatus,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub id: Ulid,
    pub full_name: String,
    pub email: String,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub guest_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub status: BookingStatus,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_price: Decimal,
    pub notes: String,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[cfg(test)]
impl Booking {
    pub fn range(&self) -> DateRange {
        DateRange::new(self.check_in, self.check_out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub description: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub is_active: bool,
}

/// A room together with its bookings, sorted by `check_in`.
/// This is the unit of locking: every booking write holds the room's write guard.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.room.id
    }

    /// Insert booking maintaining sort order by check_in.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.check_in, |b| b.check_in)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Bookings whose range overlaps the query window, any status.
    /// Uses binary search to skip bookings checking in at or after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.check_in < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.check_out > query.start)
    }
}

// ── Inputs ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NewRoom {
    pub id: Ulid,
    pub number: String,
    pub room_type: String,
    pub capacity: u32,
    pub price: Decimal,
    pub status: RoomStatus,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomPatch {
    pub number: Option<String>,
    pub room_type: Option<String>,
    pub capacity: Option<u32>,
    pub price: Option<Decimal>,
    pub status: Option<RoomStatus>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewGuest {
    pub id: Ulid,
    pub full_name: String,
    pub email: String,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuestPatch {
    pub full_name: Option<String>,
    pub email: Option<String>,
    /// `Some(None)` clears the phone number.
    pub phone_number: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub guest_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub notes: Option<String>,
    /// Hint only: used when non-zero, otherwise derived from the room rate.
    pub total_price: Option<Decimal>,
}

/// Mutable booking fields. Status, price and timestamps are not patchable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingPatch {
    pub room_id: Option<Ulid>,
    pub guest_id: Option<Ulid>,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl BookingPatch {
    pub fn is_empty(&self) -> bool {
        self == &BookingPatch::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewService {
    pub id: Ulid,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServicePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub is_active: Option<bool>,
}

/// Flat event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        room: Room,
    },
    /// Cascades to every booking on the room.
    RoomDeleted {
        id: Ulid,
    },
    GuestCreated {
        guest: Guest,
    },
    GuestUpdated {
        guest: Guest,
    },
    /// Cascades to the listed `(booking_id, room_id)` pairs.
    GuestDeleted {
        id: Ulid,
        bookings: Vec<(Ulid, Ulid)>,
    },
    ServiceCreated {
        service: Service,
    },
    ServiceUpdated {
        service: Service,
    },
    ServiceDeleted {
        id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    /// Full replacement. The `previous_*` ids differ from the booking's on a move.
    BookingUpdated {
        booking: Booking,
        previous_room_id: Ulid,
        previous_guest_id: Ulid,
    },
    BookingDeleted {
        id: Ulid,
        room_id: Ulid,
        guest_id: Ulid,
    },
    /// Booking status and (for check-in/complete) room status in one record.
    BookingStatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: BookingStatus,
        room_status: Option<RoomStatus>,
        at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

/// A booking with its room and guest attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDetail {
    pub booking: Booking,
    pub room: Room,
    pub guest: Guest,
}
