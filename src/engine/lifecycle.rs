use rust_decimal::Decimal;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, now_ms, validate_range};
use super::pricing::resolve_total;
use super::validate::{money, optional_text};
use super::{Engine, EngineError};

impl Engine {
    /// Reserve a room for `[check_in, check_out)`.
    ///
    /// The overlap check, price derivation and WAL append all run under the
    /// room's write guard, so two creates for the same room cannot interleave.
    pub async fn create_booking(&self, input: NewBooking) -> Result<Booking, EngineError> {
        let range = validate_range(input.check_in, input.check_out)?;
        let notes = optional_text("notes", input.notes.as_deref().unwrap_or(""), MAX_TEXT_LEN)?;
        let hint = input
            .total_price
            .map(|p| money("total_price", p, MAX_TOTAL_DIGITS))
            .transpose()?;

        let input = &input;
        let notes = notes.as_str();
        self.with_retry("create_booking", move || {
            self.try_create_booking(input, range, notes, hint)
        })
        .await
    }

    async fn try_create_booking(
        &self,
        input: &NewBooking,
        range: DateRange,
        notes: &str,
        hint: Option<Decimal>,
    ) -> Result<Booking, EngineError> {
        let _gate = self.commit_gate.read().await;
        let _guest = self
            .lock_guests_shared(&[input.guest_id], input.room_id)
            .await?;
        let mut rs = self.lock_room(input.room_id).await?;

        if rs.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }
        if let Err(e) = check_no_conflict(&rs, &range, None) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }
        let total_price = money(
            "total_price",
            resolve_total(hint, &rs.room, &range),
            MAX_TOTAL_DIGITS,
        )?;

        if !self.store.claim_id(input.id) {
            return Err(EngineError::Duplicate {
                field: "id",
                value: input.id.to_string(),
            });
        }
        let now = now_ms();
        let booking = Booking {
            id: input.id,
            room_id: input.room_id,
            guest_id: input.guest_id,
            check_in: range.start,
            check_out: range.end,
            status: BookingStatus::Reserved,
            total_price,
            notes: notes.to_string(),
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        if let Err(e) = self.commit(&event, &mut [&mut *rs]).await {
            self.store.release_id(&booking.id);
            return Err(e);
        }

        info!(
            booking_id = %booking.id,
            room_id = %booking.room_id,
            nights = range.nights(),
            total_price = %booking.total_price,
            "booking created"
        );
        Ok(booking)
    }

    /// Change room, guest, dates or notes. The total price stays as created.
    pub async fn update_booking(&self, id: Ulid, patch: BookingPatch) -> Result<Booking, EngineError> {
        if let Some(notes) = &patch.notes {
            optional_text("notes", notes, MAX_TEXT_LEN)?;
        }
        let patch = &patch;
        self.with_retry("update_booking", move || self.try_update_booking(id, patch))
            .await
    }

    async fn try_update_booking(&self, id: Ulid, patch: &BookingPatch) -> Result<Booking, EngineError> {
        let _gate = self.commit_gate.read().await;
        let current = self.snapshot_booking(id).await?;
        if patch.is_empty() {
            return Ok(current);
        }

        let room_id = patch.room_id.unwrap_or(current.room_id);
        let guest_id = patch.guest_id.unwrap_or(current.guest_id);

        let mut guest_ids = vec![current.guest_id, guest_id];
        guest_ids.sort();
        guest_ids.dedup();
        let _guests = self
            .lock_guests_shared(&guest_ids, current.room_id)
            .await
            .map_err(|e| match e {
                // The booking's own guest vanished: the booking is going with it.
                EngineError::NotFound { id: gid, .. } if gid == current.guest_id => {
                    EngineError::StorageConflict(current.room_id)
                }
                other => other,
            })?;

        let mut room_ids = vec![current.room_id, room_id];
        room_ids.sort();
        room_ids.dedup();
        let mut guards = self.lock_rooms(&room_ids).await.map_err(|e| match e {
            EngineError::NotFound { id: rid, .. } if rid == current.room_id => {
                EngineError::StorageConflict(rid)
            }
            other => other,
        })?;

        let existing = guards
            .iter()
            .find(|g| g.id() == current.room_id)
            .and_then(|g| g.booking(&id))
            .cloned()
            .ok_or(EngineError::StorageConflict(current.room_id))?;
        if existing.guest_id != current.guest_id {
            return Err(EngineError::StorageConflict(current.room_id));
        }

        let mut updated = existing.clone();
        updated.room_id = room_id;
        updated.guest_id = guest_id;
        updated.check_in = patch.check_in.unwrap_or(existing.check_in);
        updated.check_out = patch.check_out.unwrap_or(existing.check_out);
        if let Some(notes) = &patch.notes {
            updated.notes = notes.clone();
        }

        let moved = room_id != existing.room_id
            || updated.check_in != existing.check_in
            || updated.check_out != existing.check_out;
        if moved {
            let range = validate_range(updated.check_in, updated.check_out)?;
            let target = guards
                .iter()
                .find(|g| g.id() == room_id)
                .ok_or(EngineError::StorageConflict(room_id))?;
            if room_id != existing.room_id && target.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
                return Err(EngineError::LimitExceeded("too many bookings on room"));
            }
            if existing.status.is_active()
                && let Err(e) = check_no_conflict(target, &range, Some(id))
            {
                metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                return Err(e);
            }
        }

        if updated == existing {
            return Ok(existing);
        }
        updated.updated_at = now_ms();

        let event = Event::BookingUpdated {
            booking: updated.clone(),
            previous_room_id: existing.room_id,
            previous_guest_id: existing.guest_id,
        };
        let mut rooms: Vec<&mut RoomState> = guards.iter_mut().map(|g| &mut **g).collect();
        self.commit(&event, &mut rooms).await?;

        info!(booking_id = %id, room_id = %room_id, "booking updated");
        Ok(updated)
    }

    /// Copy of the booking as it currently stands, read under its room's lock.
    async fn snapshot_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let room_id = self
            .store
            .room_for_booking(&id)
            .ok_or(EngineError::not_found("booking", id))?;
        let handle = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::StorageConflict(room_id))?;
        let rs = self.within_timeout(room_id, handle.read_owned()).await?;
        rs.booking(&id)
            .cloned()
            .ok_or(EngineError::StorageConflict(room_id))
    }

    pub async fn delete_booking(&self, id: Ulid) -> Result<(), EngineError> {
        self.with_retry("delete_booking", move || self.try_delete_booking(id))
            .await
    }

    async fn try_delete_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut rs = self.resolve_booking_write(id).await?;
        let guest_id = rs
            .booking(&id)
            .map(|b| b.guest_id)
            .ok_or(EngineError::StorageConflict(rs.id()))?;
        let event = Event::BookingDeleted {
            id,
            room_id: rs.id(),
            guest_id,
        };
        self.commit(&event, &mut [&mut *rs]).await?;
        info!(booking_id = %id, "booking deleted");
        Ok(())
    }

    // ── Status transitions ───────────────────────────────

    pub async fn cancel(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition(id, BookingAction::Cancel).await
    }

    /// Booking becomes checked-in and its room occupied, in one event.
    pub async fn check_in(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition(id, BookingAction::CheckIn).await
    }

    /// Booking becomes completed and its room available, in one event.
    pub async fn complete(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition(id, BookingAction::Complete).await
    }

    /// Move a booking to `status` via the action that leads there.
    pub async fn transition_to(&self, id: Ulid, status: BookingStatus) -> Result<Booking, EngineError> {
        let action = BookingAction::for_target(status).ok_or_else(|| {
            EngineError::Validation(format!("status cannot be set to {}", status.as_str()))
        })?;
        self.transition(id, action).await
    }

    pub async fn transition(&self, id: Ulid, action: BookingAction) -> Result<Booking, EngineError> {
        self.with_retry(action.label(), move || self.try_transition(id, action))
            .await
    }

    async fn try_transition(&self, id: Ulid, action: BookingAction) -> Result<Booking, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut rs = self.resolve_booking_write(id).await?;
        let mut booking = rs
            .booking(&id)
            .cloned()
            .ok_or(EngineError::StorageConflict(rs.id()))?;

        let from = booking.status;
        let status = from
            .apply(action)
            .ok_or(EngineError::InvalidTransition { id, from, action })?;

        let at = now_ms();
        let room_status = action.room_effect();
        let event = Event::BookingStatusChanged {
            id,
            room_id: rs.id(),
            status,
            room_status,
            at,
        };
        self.commit(&event, &mut [&mut *rs]).await?;

        metrics::counter!(observability::TRANSITIONS_TOTAL, "action" => action.label()).increment(1);
        info!(
            booking_id = %id,
            room_id = %booking.room_id,
            from = from.as_str(),
            to = status.as_str(),
            room_status = room_status.map(|s| s.as_str()),
            "booking transition"
        );

        booking.status = status;
        booking.updated_at = at;
        Ok(booking)
    }
}
