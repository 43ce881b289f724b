use std::cmp::Reverse;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::{free_ranges, is_available};
use super::{Engine, EngineError};

/// Restricts a booking listing to one room and/or one guest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub room_id: Option<Ulid>,
    pub guest_id: Option<Ulid>,
}

fn window(start: NaiveDate, end: NaiveDate) -> Result<DateRange, EngineError> {
    if end <= start {
        return Err(EngineError::Validation(
            "end date must be after start date".into(),
        ));
    }
    Ok(DateRange::new(start, end))
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────

    pub async fn get_room(&self, id: Ulid) -> Result<Room, EngineError> {
        let handle = self
            .store
            .get_room(&id)
            .ok_or(EngineError::not_found("room", id))?;
        let rs = handle.read().await;
        Ok(rs.room.clone())
    }

    /// All rooms, optionally by status, ordered by room number.
    pub async fn list_rooms(&self, status: Option<RoomStatus>) -> Vec<Room> {
        let mut rooms = Vec::new();
        for handle in self.store.room_handles() {
            let rs = handle.read().await;
            if status.is_none_or(|s| rs.room.status == s) {
                rooms.push(rs.room.clone());
            }
        }
        rooms.sort_by(|a, b| a.number.cmp(&b.number));
        rooms
    }

    /// Rooms with no active booking overlapping `[start, end)`.
    ///
    /// Room status does not take part: a room under maintenance is listed
    /// unless `status` filters it out.
    pub async fn available_rooms(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        status: Option<RoomStatus>,
    ) -> Result<Vec<Room>, EngineError> {
        let range = window(start, end)?;
        let mut rooms = Vec::new();
        for handle in self.store.room_handles() {
            let rs = handle.read().await;
            if status.is_none_or(|s| rs.room.status == s) && is_available(&rs, &range, None) {
                rooms.push(rs.room.clone());
            }
        }
        rooms.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(rooms)
    }

    /// Free sub-ranges of `[start, end)` on one room.
    pub async fn room_availability(
        &self,
        room_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DateRange>, EngineError> {
        let query = window(start, end)?;
        let handle = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::not_found("room", room_id))?;
        let rs = handle.read().await;
        Ok(free_ranges(&rs, &query))
    }

    // ── Guests ───────────────────────────────────────────

    pub fn get_guest(&self, id: Ulid) -> Result<Guest, EngineError> {
        self.store
            .get_guest(&id)
            .ok_or(EngineError::not_found("guest", id))
    }

    pub fn list_guests(&self) -> Vec<Guest> {
        let mut guests = self.store.guests();
        guests.sort_by(|a, b| a.full_name.cmp(&b.full_name).then(a.id.cmp(&b.id)));
        guests
    }

    // ── Bookings ─────────────────────────────────────────

    pub async fn get_booking(&self, id: Ulid) -> Result<BookingDetail, EngineError> {
        let missing = || EngineError::not_found("booking", id);
        let room_id = self.store.room_for_booking(&id).ok_or_else(missing)?;
        let handle = self.store.get_room(&room_id).ok_or_else(missing)?;
        let (booking, room) = {
            let rs = handle.read().await;
            let booking = rs.booking(&id).cloned().ok_or_else(missing)?;
            (booking, rs.room.clone())
        };
        let guest = self.store.get_guest(&booking.guest_id).ok_or_else(missing)?;
        Ok(BookingDetail {
            booking,
            room,
            guest,
        })
    }

    /// Bookings with room and guest attached, newest stay first.
    pub async fn list_bookings(&self, filter: BookingFilter) -> Vec<BookingDetail> {
        let handles = match filter.room_id {
            Some(room_id) => self.store.get_room(&room_id).into_iter().collect(),
            None => self.store.room_handles(),
        };

        let mut rows: Vec<(Booking, Room)> = Vec::new();
        for handle in handles {
            let rs = handle.read().await;
            rows.extend(
                rs.bookings
                    .iter()
                    .filter(|b| filter.guest_id.is_none_or(|g| b.guest_id == g))
                    .map(|b| (b.clone(), rs.room.clone())),
            );
        }

        let mut details: Vec<BookingDetail> = rows
            .into_iter()
            .filter_map(|(booking, room)| {
                let guest = self.store.get_guest(&booking.guest_id)?;
                Some(BookingDetail {
                    booking,
                    room,
                    guest,
                })
            })
            .collect();
        details.sort_by_key(|d| {
            (
                Reverse(d.booking.check_in),
                Reverse(d.booking.created_at),
                d.booking.id,
            )
        });
        details
    }

    // ── Services ─────────────────────────────────────────

    pub fn get_service(&self, id: Ulid) -> Result<Service, EngineError> {
        self.store
            .get_service(&id)
            .ok_or(EngineError::not_found("service", id))
    }

    pub fn list_services(&self, is_active: Option<bool>) -> Vec<Service> {
        let mut services: Vec<Service> = self
            .store
            .services()
            .into_iter()
            .filter(|s| is_active.is_none_or(|a| s.is_active == a))
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        services
    }
}
