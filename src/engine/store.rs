use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::{DashMap, DashSet};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// Coordination lock for a guest: booking writes hold it shared,
/// guest update/delete hold it exclusive.
pub type GuestLock = Arc<RwLock<()>>;

/// In-memory records plus the secondary indexes that enforce uniqueness and
/// cascades. Callers hold the relevant room guards when applying an event.
pub struct Store {
    rooms: DashMap<Ulid, SharedRoomState>,
    guests: DashMap<Ulid, Guest>,
    guest_locks: DashMap<Ulid, GuestLock>,
    services: DashMap<Ulid, Service>,
    room_numbers: DashMap<String, Ulid>,
    guest_emails: DashMap<String, Ulid>,
    booking_to_room: DashMap<Ulid, Ulid>,
    guest_bookings: DashMap<Ulid, Vec<Ulid>>,
    /// Ids of records being created but not yet durable.
    pending_ids: DashSet<Ulid>,
    pending_rooms: AtomicUsize,
    pending_guests: AtomicUsize,
    pending_services: AtomicUsize,
}

/// Record kinds with a global count cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counted {
    Room,
    Guest,
    Service,
}

/// One reserved create under a count cap. Dropping it returns the slot;
/// drop only after the record is applied, or the create failed.
pub struct Slot<'a> {
    pending: &'a AtomicUsize,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            guests: DashMap::new(),
            guest_locks: DashMap::new(),
            services: DashMap::new(),
            room_numbers: DashMap::new(),
            guest_emails: DashMap::new(),
            booking_to_room: DashMap::new(),
            guest_bookings: DashMap::new(),
            pending_ids: DashSet::new(),
            pending_rooms: AtomicUsize::new(0),
            pending_guests: AtomicUsize::new(0),
            pending_services: AtomicUsize::new(0),
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[cfg(test)]
    pub fn contains_room(&self, id: &Ulid) -> bool {
        self.rooms.contains_key(id)
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_handles(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    // ── Guests ───────────────────────────────────────────────

    pub fn guest_count(&self) -> usize {
        self.guests.len()
    }

    pub fn get_guest(&self, id: &Ulid) -> Option<Guest> {
        self.guests.get(id).map(|e| e.value().clone())
    }

    pub fn contains_guest(&self, id: &Ulid) -> bool {
        self.guests.contains_key(id)
    }

    pub fn guests(&self) -> Vec<Guest> {
        self.guests.iter().map(|e| e.value().clone()).collect()
    }

    pub fn guest_lock(&self, id: &Ulid) -> Option<GuestLock> {
        self.guest_locks.get(id).map(|e| e.value().clone())
    }

    pub fn guest_booking_ids(&self, guest_id: &Ulid) -> Vec<Ulid> {
        self.guest_bookings
            .get(guest_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    // ── Services ─────────────────────────────────────────────

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn get_service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn services(&self) -> Vec<Service> {
        self.services.iter().map(|e| e.value().clone()).collect()
    }

    // ── Booking index ────────────────────────────────────────

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    fn index_booking(&self, booking: &Booking) {
        self.booking_to_room.insert(booking.id, booking.room_id);
        let mut ids = self.guest_bookings.entry(booking.guest_id).or_default();
        if !ids.contains(&booking.id) {
            ids.push(booking.id);
        }
    }

    fn unindex_booking(&self, booking_id: &Ulid, guest_id: &Ulid) {
        self.booking_to_room.remove(booking_id);
        if let Some(mut ids) = self.guest_bookings.get_mut(guest_id) {
            ids.retain(|b| b != booking_id);
        }
    }

    // ── Claims ───────────────────────────────────────────────
    //
    // A claim reserves a key before the WAL append so two concurrent writers
    // cannot both pass the uniqueness check. Applying the event makes the
    // claim permanent; a failed append releases it.

    /// Reserve a record id for creation. False if it exists or is being created.
    pub fn claim_id(&self, id: Ulid) -> bool {
        if !self.pending_ids.insert(id) {
            return false;
        }
        let taken = self.rooms.contains_key(&id)
            || self.guests.contains_key(&id)
            || self.services.contains_key(&id)
            || self.booking_to_room.contains_key(&id);
        if taken {
            self.pending_ids.remove(&id);
            return false;
        }
        true
    }

    pub fn release_id(&self, id: &Ulid) {
        self.pending_ids.remove(id);
    }

    /// Reserve room under `cap` for one more record of `kind`, counting
    /// creates still in flight. `None` once the cap is reached.
    pub fn reserve_slot(&self, kind: Counted, cap: usize) -> Option<Slot<'_>> {
        let pending = match kind {
            Counted::Room => &self.pending_rooms,
            Counted::Guest => &self.pending_guests,
            Counted::Service => &self.pending_services,
        };
        let ahead = pending.fetch_add(1, Ordering::SeqCst);
        let slot = Slot { pending };
        // Read after the increment: a create that is done has either been
        // applied (counted here) or still holds its slot (counted in `ahead`).
        let committed = match kind {
            Counted::Room => self.rooms.len(),
            Counted::Guest => self.guests.len(),
            Counted::Service => self.services.len(),
        };
        (committed + ahead < cap).then_some(slot)
    }

    pub fn claim_room_number(&self, number: &str, room_id: Ulid) -> bool {
        claim_key(&self.room_numbers, number, room_id)
    }

    pub fn release_room_number(&self, number: &str, room_id: Ulid) {
        release_key(&self.room_numbers, number, room_id);
    }

    pub fn claim_email(&self, email: &str, guest_id: Ulid) -> bool {
        claim_key(&self.guest_emails, email, guest_id)
    }

    pub fn release_email(&self, email: &str, guest_id: Ulid) {
        release_key(&self.guest_emails, email, guest_id);
    }

    // ── Event application ────────────────────────────────────

    /// Apply a durable event. `rooms` must contain every room the event
    /// touches (see [`event_rooms`]), already locked by the caller.
    pub fn apply(&self, event: &Event, rooms: &mut [&mut RoomState]) {
        match event {
            Event::RoomCreated { room } => {
                self.room_numbers.insert(room.number.clone(), room.id);
                self.rooms
                    .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                self.pending_ids.remove(&room.id);
            }
            Event::RoomUpdated { room } => {
                if let Some(rs) = find_room(rooms, room.id) {
                    if rs.room.number != room.number {
                        release_key(&self.room_numbers, &rs.room.number, room.id);
                        self.room_numbers.insert(room.number.clone(), room.id);
                    }
                    rs.room = room.clone();
                }
            }
            Event::RoomDeleted { id } => {
                if let Some(rs) = find_room(rooms, *id) {
                    for booking in rs.bookings.drain(..) {
                        self.unindex_booking(&booking.id, &booking.guest_id);
                    }
                    release_key(&self.room_numbers, &rs.room.number, *id);
                }
                self.rooms.remove(id);
            }
            Event::GuestCreated { guest } => {
                self.guest_emails.insert(guest.email.clone(), guest.id);
                self.guest_locks.entry(guest.id).or_default();
                self.guests.insert(guest.id, guest.clone());
                self.pending_ids.remove(&guest.id);
            }
            Event::GuestUpdated { guest } => {
                let old_email = self.guests.get(&guest.id).map(|g| g.email.clone());
                if let Some(old) = old_email
                    && old != guest.email
                {
                    release_key(&self.guest_emails, &old, guest.id);
                    self.guest_emails.insert(guest.email.clone(), guest.id);
                }
                self.guests.insert(guest.id, guest.clone());
            }
            Event::GuestDeleted { id, bookings } => {
                for (booking_id, room_id) in bookings {
                    if let Some(rs) = find_room(rooms, *room_id) {
                        rs.remove_booking(*booking_id);
                    }
                    self.booking_to_room.remove(booking_id);
                }
                self.guest_bookings.remove(id);
                if let Some((_, guest)) = self.guests.remove(id) {
                    release_key(&self.guest_emails, &guest.email, *id);
                }
                self.guest_locks.remove(id);
            }
            Event::ServiceCreated { service } | Event::ServiceUpdated { service } => {
                self.services.insert(service.id, service.clone());
                self.pending_ids.remove(&service.id);
            }
            Event::ServiceDeleted { id } => {
                self.services.remove(id);
            }
            Event::BookingCreated { booking } => {
                if let Some(rs) = find_room(rooms, booking.room_id) {
                    rs.insert_booking(booking.clone());
                    self.index_booking(booking);
                }
                self.pending_ids.remove(&booking.id);
            }
            Event::BookingUpdated {
                booking,
                previous_room_id,
                previous_guest_id,
            } => {
                if let Some(rs) = find_room(rooms, *previous_room_id) {
                    rs.remove_booking(booking.id);
                }
                if let Some(rs) = find_room(rooms, booking.room_id) {
                    rs.insert_booking(booking.clone());
                }
                if *previous_guest_id != booking.guest_id {
                    self.unindex_booking(&booking.id, previous_guest_id);
                }
                self.index_booking(booking);
            }
            Event::BookingDeleted { id, room_id, guest_id } => {
                if let Some(rs) = find_room(rooms, *room_id) {
                    rs.remove_booking(*id);
                }
                self.unindex_booking(id, guest_id);
            }
            Event::BookingStatusChanged {
                id,
                room_id,
                status,
                room_status,
                at,
            } => {
                if let Some(rs) = find_room(rooms, *room_id) {
                    if let Some(booking) = rs.booking_mut(id) {
                        booking.status = *status;
                        booking.updated_at = *at;
                    }
                    if let Some(room_status) = room_status {
                        rs.room.status = *room_status;
                    }
                }
            }
        }
    }
}

/// Rooms an event touches, sorted and deduplicated (the lock order).
pub fn event_rooms(event: &Event) -> Vec<Ulid> {
    let mut ids = match event {
        Event::RoomUpdated { room } => vec![room.id],
        Event::RoomDeleted { id } => vec![*id],
        Event::GuestDeleted { bookings, .. } => bookings.iter().map(|(_, r)| *r).collect(),
        Event::BookingCreated { booking } => vec![booking.room_id],
        Event::BookingUpdated {
            booking,
            previous_room_id,
            ..
        } => vec![*previous_room_id, booking.room_id],
        Event::BookingDeleted { room_id, .. } | Event::BookingStatusChanged { room_id, .. } => {
            vec![*room_id]
        }
        Event::RoomCreated { .. }
        | Event::GuestCreated { .. }
        | Event::GuestUpdated { .. }
        | Event::ServiceCreated { .. }
        | Event::ServiceUpdated { .. }
        | Event::ServiceDeleted { .. } => Vec::new(),
    };
    ids.sort();
    ids.dedup();
    ids
}

fn find_room<'a>(rooms: &'a mut [&mut RoomState], id: Ulid) -> Option<&'a mut RoomState> {
    rooms.iter_mut().find(|rs| rs.id() == id).map(|rs| &mut **rs)
}

fn claim_key(index: &DashMap<String, Ulid>, key: &str, owner: Ulid) -> bool {
    match index.entry(key.to_string()) {
        dashmap::mapref::entry::Entry::Occupied(e) => *e.get() == owner,
        dashmap::mapref::entry::Entry::Vacant(e) => {
            e.insert(owner);
            true
        }
    }
}

fn release_key(index: &DashMap<String, Ulid>, key: &str, owner: Ulid) {
    index.remove_if(key, |_, v| *v == owner);
}
