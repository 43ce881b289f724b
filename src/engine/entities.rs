use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::store::Counted;
use super::validate::{self, money, optional_text, required_text};
use super::{Engine, EngineError};

fn duplicate(field: &'static str, value: impl ToString) -> EngineError {
    EngineError::Duplicate {
        field,
        value: value.to_string(),
    }
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────

    pub async fn create_room(&self, input: NewRoom) -> Result<Room, EngineError> {
        let room = Room {
            id: input.id,
            number: required_text("number", &input.number, MAX_ROOM_NUMBER_LEN)?,
            room_type: required_text("room_type", &input.room_type, MAX_ROOM_TYPE_LEN)?,
            capacity: validate::capacity(input.capacity)?,
            price: validate::rate(input.price)?,
            status: input.status,
            description: optional_text("description", &input.description, MAX_TEXT_LEN)?,
        };
        let _gate = self.commit_gate.read().await;
        let _slot = self
            .store
            .reserve_slot(Counted::Room, MAX_ROOMS)
            .ok_or(EngineError::LimitExceeded("too many rooms"))?;
        if !self.store.claim_id(room.id) {
            return Err(duplicate("id", room.id));
        }
        if !self.store.claim_room_number(&room.number, room.id) {
            self.store.release_id(&room.id);
            return Err(duplicate("number", &room.number));
        }
        let event = Event::RoomCreated { room: room.clone() };
        if let Err(e) = self.commit(&event, &mut []).await {
            self.store.release_room_number(&room.number, room.id);
            self.store.release_id(&room.id);
            return Err(e);
        }
        info!(room_id = %room.id, number = %room.number, "room created");
        Ok(room)
    }

    /// Patch a room. `status` is set as given; bookings are left alone.
    pub async fn update_room(&self, id: Ulid, patch: RoomPatch) -> Result<Room, EngineError> {
        let patch = RoomPatch {
            number: patch
                .number
                .map(|n| required_text("number", &n, MAX_ROOM_NUMBER_LEN))
                .transpose()?,
            room_type: patch
                .room_type
                .map(|t| required_text("room_type", &t, MAX_ROOM_TYPE_LEN))
                .transpose()?,
            capacity: patch.capacity.map(validate::capacity).transpose()?,
            price: patch.price.map(validate::rate).transpose()?,
            status: patch.status,
            description: patch
                .description
                .map(|d| optional_text("description", &d, MAX_TEXT_LEN))
                .transpose()?,
        };
        let patch = &patch;
        self.with_retry("update_room", move || self.try_update_room(id, patch))
            .await
    }

    async fn try_update_room(&self, id: Ulid, patch: &RoomPatch) -> Result<Room, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut rs = self.lock_room(id).await?;
        let current = rs.room.clone();

        let mut room = current.clone();
        if let Some(number) = &patch.number {
            room.number = number.clone();
        }
        if let Some(room_type) = &patch.room_type {
            room.room_type = room_type.clone();
        }
        if let Some(capacity) = patch.capacity {
            room.capacity = capacity;
        }
        if let Some(price) = patch.price {
            room.price = price;
        }
        if let Some(status) = patch.status {
            room.status = status;
        }
        if let Some(description) = &patch.description {
            room.description = description.clone();
        }
        if room == current {
            return Ok(current);
        }

        let renumbered = room.number != current.number;
        if renumbered && !self.store.claim_room_number(&room.number, id) {
            return Err(duplicate("number", &room.number));
        }
        let event = Event::RoomUpdated { room: room.clone() };
        if let Err(e) = self.commit(&event, &mut [&mut *rs]).await {
            if renumbered {
                self.store.release_room_number(&room.number, id);
            }
            return Err(e);
        }
        info!(room_id = %id, status = room.status.as_str(), "room updated");
        Ok(room)
    }

    /// Delete a room and every booking on it.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        self.with_retry("delete_room", move || self.try_delete_room(id))
            .await
    }

    async fn try_delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut rs = self.lock_room(id).await?;
        let cascaded = rs.bookings.len();
        let event = Event::RoomDeleted { id };
        self.commit(&event, &mut [&mut *rs]).await?;
        info!(room_id = %id, bookings = cascaded, "room deleted");
        Ok(())
    }

    // ── Guests ───────────────────────────────────────────

    pub async fn create_guest(&self, input: NewGuest) -> Result<Guest, EngineError> {
        let guest = Guest {
            id: input.id,
            full_name: required_text("full_name", &input.full_name, MAX_FULL_NAME_LEN)?,
            email: validate::email(&input.email)?,
            phone_number: validate::phone(input.phone_number)?,
        };
        let _gate = self.commit_gate.read().await;
        let _slot = self
            .store
            .reserve_slot(Counted::Guest, MAX_GUESTS)
            .ok_or(EngineError::LimitExceeded("too many guests"))?;
        if !self.store.claim_id(guest.id) {
            return Err(duplicate("id", guest.id));
        }
        if !self.store.claim_email(&guest.email, guest.id) {
            self.store.release_id(&guest.id);
            return Err(duplicate("email", &guest.email));
        }
        let event = Event::GuestCreated { guest: guest.clone() };
        if let Err(e) = self.commit(&event, &mut []).await {
            self.store.release_email(&guest.email, guest.id);
            self.store.release_id(&guest.id);
            return Err(e);
        }
        info!(guest_id = %guest.id, "guest created");
        Ok(guest)
    }

    pub async fn update_guest(&self, id: Ulid, patch: GuestPatch) -> Result<Guest, EngineError> {
        let patch = GuestPatch {
            full_name: patch
                .full_name
                .map(|n| required_text("full_name", &n, MAX_FULL_NAME_LEN))
                .transpose()?,
            email: patch.email.map(|e| validate::email(&e)).transpose()?,
            phone_number: patch.phone_number.map(validate::phone).transpose()?,
        };
        let patch = &patch;
        self.with_retry("update_guest", move || self.try_update_guest(id, patch))
            .await
    }

    async fn try_update_guest(&self, id: Ulid, patch: &GuestPatch) -> Result<Guest, EngineError> {
        let _gate = self.commit_gate.read().await;
        let _lock = self.lock_guest_exclusive(id).await?;
        let current = self
            .store
            .get_guest(&id)
            .ok_or(EngineError::StorageConflict(id))?;

        let mut guest = current.clone();
        if let Some(full_name) = &patch.full_name {
            guest.full_name = full_name.clone();
        }
        if let Some(email) = &patch.email {
            guest.email = email.clone();
        }
        if let Some(phone) = &patch.phone_number {
            guest.phone_number = phone.clone();
        }
        if guest == current {
            return Ok(current);
        }

        let new_email = guest.email != current.email;
        if new_email && !self.store.claim_email(&guest.email, id) {
            return Err(duplicate("email", &guest.email));
        }
        let event = Event::GuestUpdated { guest: guest.clone() };
        if let Err(e) = self.commit(&event, &mut []).await {
            if new_email {
                self.store.release_email(&guest.email, id);
            }
            return Err(e);
        }
        info!(guest_id = %id, "guest updated");
        Ok(guest)
    }

    /// Delete a guest and every booking they hold.
    pub async fn delete_guest(&self, id: Ulid) -> Result<(), EngineError> {
        self.with_retry("delete_guest", move || self.try_delete_guest(id))
            .await
    }

    async fn try_delete_guest(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        // Exclusive: no booking for this guest can be created or moved meanwhile.
        let _lock = self.lock_guest_exclusive(id).await?;

        let candidates: Vec<(Ulid, Ulid)> = self
            .store
            .guest_booking_ids(&id)
            .into_iter()
            .filter_map(|b| self.store.room_for_booking(&b).map(|r| (b, r)))
            .collect();
        let mut room_ids: Vec<Ulid> = candidates.iter().map(|(_, r)| *r).collect();
        room_ids.sort();
        room_ids.dedup();
        let mut guards = self.lock_rooms(&room_ids).await.map_err(|e| match e {
            EngineError::NotFound { id: rid, .. } => EngineError::StorageConflict(rid),
            other => other,
        })?;

        let bookings: Vec<(Ulid, Ulid)> = candidates
            .into_iter()
            .filter(|(b, r)| {
                guards
                    .iter()
                    .find(|g| g.id() == *r)
                    .and_then(|g| g.booking(b))
                    .is_some_and(|booking| booking.guest_id == id)
            })
            .collect();
        let cascaded = bookings.len();

        let event = Event::GuestDeleted { id, bookings };
        let mut rooms: Vec<&mut RoomState> = guards.iter_mut().map(|g| &mut **g).collect();
        self.commit(&event, &mut rooms).await?;
        info!(guest_id = %id, bookings = cascaded, "guest deleted");
        Ok(())
    }

    // ── Services ─────────────────────────────────────────

    pub async fn create_service(&self, input: NewService) -> Result<Service, EngineError> {
        let service = Service {
            id: input.id,
            name: required_text("name", &input.name, MAX_SERVICE_NAME_LEN)?,
            description: optional_text("description", &input.description, MAX_TEXT_LEN)?,
            price: money("price", input.price, MAX_RATE_DIGITS)?,
            is_active: input.is_active,
        };
        let _gate = self.commit_gate.read().await;
        let _slot = self
            .store
            .reserve_slot(Counted::Service, MAX_SERVICES)
            .ok_or(EngineError::LimitExceeded("too many services"))?;
        if !self.store.claim_id(service.id) {
            return Err(duplicate("id", service.id));
        }
        let event = Event::ServiceCreated {
            service: service.clone(),
        };
        if let Err(e) = self.commit(&event, &mut []).await {
            self.store.release_id(&service.id);
            return Err(e);
        }
        info!(service_id = %service.id, name = %service.name, "service created");
        Ok(service)
    }

    pub async fn update_service(&self, id: Ulid, patch: ServicePatch) -> Result<Service, EngineError> {
        let name = patch
            .name
            .map(|n| required_text("name", &n, MAX_SERVICE_NAME_LEN))
            .transpose()?;
        let description = patch
            .description
            .map(|d| optional_text("description", &d, MAX_TEXT_LEN))
            .transpose()?;
        let price = patch
            .price
            .map(|p| money("price", p, MAX_RATE_DIGITS))
            .transpose()?;

        let _gate = self.commit_gate.read().await;
        let _write = self.services_write.lock().await;
        let current = self
            .store
            .get_service(&id)
            .ok_or(EngineError::not_found("service", id))?;
        let service = Service {
            id,
            name: name.unwrap_or_else(|| current.name.clone()),
            description: description.unwrap_or_else(|| current.description.clone()),
            price: price.unwrap_or(current.price),
            is_active: patch.is_active.unwrap_or(current.is_active),
        };
        if service == current {
            return Ok(current);
        }
        let event = Event::ServiceUpdated {
            service: service.clone(),
        };
        self.commit(&event, &mut []).await?;
        info!(service_id = %id, "service updated");
        Ok(service)
    }

    pub async fn delete_service(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let _write = self.services_write.lock().await;
        if self.store.get_service(&id).is_none() {
            return Err(EngineError::not_found("service", id));
        }
        self.commit(&Event::ServiceDeleted { id }, &mut []).await?;
        info!(service_id = %id, "service deleted");
        Ok(())
    }
}
