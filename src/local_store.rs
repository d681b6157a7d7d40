use crate::{
    backend::BookingBackend,
    error::StoreError,
    types::{
        AvailabilitySlot, Booking, BookingQuery, BookingStatus, NewBooking, NewSlot, SlotState,
    },
};
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use uuid::Uuid;

/// Slot row as stored, keeping both state columns.
#[derive(Debug, Clone)]
struct StoredSlot {
    id: Uuid,
    provider_code: String,
    start_utc: DateTime<Utc>,
    end_utc: DateTime<Utc>,
    status: Option<String>,
    is_booked: Option<bool>,
    created_at: DateTime<Utc>,
}

impl StoredSlot {
    fn state(&self) -> SlotState {
        SlotState::from_columns(self.status.as_deref(), self.is_booked)
    }

    fn set_state(&mut self, state: SlotState) {
        let (status, is_booked) = state.as_columns();
        self.status = Some(status.into());
        self.is_booked = Some(is_booked);
    }

    fn to_slot(&self) -> AvailabilitySlot {
        AvailabilitySlot {
            id: self.id,
            provider_code: self.provider_code.clone(),
            start_utc: self.start_utc,
            end_utc: self.end_utc,
            is_reserved: self.state().is_reserved(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    slots: HashMap<Uuid, StoredSlot>,
    bookings: HashMap<Uuid, Booking>,
}

impl Tables {
    fn confirmed_at(&self, provider_code: &str, start_utc: DateTime<Utc>) -> Option<&Booking> {
        self.bookings.values().find(|booking| {
            booking.is_confirmed()
                && booking.provider_code == provider_code
                && booking.start_utc == start_utc
        })
    }

    fn insert_booking(&mut self, new_booking: &NewBooking) -> Result<Booking, StoreError> {
        if self
            .confirmed_at(&new_booking.provider_code, new_booking.start_utc)
            .is_some()
        {
            return Err(StoreError::Duplicate);
        }

        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4(),
            provider_code: new_booking.provider_code.clone(),
            client_id: new_booking.client_id.clone(),
            start_utc: new_booking.start_utc,
            duration_mins: new_booking.duration_mins,
            status: BookingStatus::Confirmed,
            slot_id: new_booking.slot_id,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }
}

/// In-process store used when no database is configured.
///
/// Each operation holds the table lock for its whole duration, which gives the
/// same per-row atomicity the database provides for conditional updates.
#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    tables: Arc<Mutex<Tables>>,
}

impl LocalStore {
    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }

    /// Inserts a slot with raw state columns, as rows written by older clients look.
    #[cfg(test)]
    pub fn insert_raw_slot(
        &self,
        provider_code: &str,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
        status: Option<&str>,
        is_booked: Option<bool>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.tables.lock().unwrap().slots.insert(
            id,
            StoredSlot {
                id,
                provider_code: provider_code.into(),
                start_utc,
                end_utc,
                status: status.map(String::from),
                is_booked,
                created_at: Utc::now(),
            },
        );
        id
    }

    #[cfg(test)]
    pub fn booking_count(&self) -> usize {
        self.tables.lock().unwrap().bookings.len()
    }
}

impl BookingBackend for LocalStore {
    fn supports_atomic_reservation(&self) -> bool {
        true
    }

    fn slot(&self, id: Uuid) -> Result<Option<AvailabilitySlot>, StoreError> {
        Ok(self.tables()?.slots.get(&id).map(StoredSlot::to_slot))
    }

    fn open_slot_at(
        &self,
        provider_code: &str,
        start_utc: DateTime<Utc>,
    ) -> Result<Option<AvailabilitySlot>, StoreError> {
        Ok(self
            .tables()?
            .slots
            .values()
            .filter(|slot| slot.provider_code == provider_code && slot.start_utc == start_utc)
            .find(|slot| !slot.state().is_reserved())
            .map(StoredSlot::to_slot))
    }

    fn open_slots(
        &self,
        provider_code: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AvailabilitySlot>, StoreError> {
        let mut slots: Vec<AvailabilitySlot> = self
            .tables()?
            .slots
            .values()
            .filter(|slot| {
                slot.provider_code == provider_code
                    && !slot.state().is_reserved()
                    && slot.start_utc >= window_start
                    && slot.start_utc <= window_end
            })
            .map(StoredSlot::to_slot)
            .collect();
        slots.sort_unstable_by(|a, b| a.start_utc.cmp(&b.start_utc));
        slots.truncate(limit);
        Ok(slots)
    }

    fn overlapping_slots(
        &self,
        provider_code: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AvailabilitySlot>, StoreError> {
        Ok(self
            .tables()?
            .slots
            .values()
            .filter(|slot| slot.provider_code == provider_code)
            .map(StoredSlot::to_slot)
            .filter(|slot| slot.overlaps(start, end))
            .collect())
    }

    fn insert_slots(&self, new_slots: &[NewSlot]) -> Result<Vec<AvailabilitySlot>, StoreError> {
        let mut tables = self.tables()?;
        let now = Utc::now();

        let mut inserted = Vec::with_capacity(new_slots.len());
        for new_slot in new_slots {
            let mut stored = StoredSlot {
                id: Uuid::new_v4(),
                provider_code: new_slot.provider_code.clone(),
                start_utc: new_slot.start_utc,
                end_utc: new_slot.end_utc,
                status: None,
                is_booked: None,
                created_at: now,
            };
            stored.set_state(SlotState::Open);
            inserted.push(stored.to_slot());
            tables.slots.insert(stored.id, stored);
        }
        Ok(inserted)
    }

    fn delete_open_slot(&self, id: Uuid) -> Result<usize, StoreError> {
        let mut tables = self.tables()?;
        let is_open = tables
            .slots
            .get(&id)
            .is_some_and(|slot| !slot.state().is_reserved());
        if !is_open {
            return Ok(0);
        }
        tables.slots.remove(&id);
        Ok(1)
    }

    fn mark_slot_booked(&self, id: Uuid, provider_code: &str) -> Result<usize, StoreError> {
        let mut tables = self.tables()?;
        match tables.slots.get_mut(&id) {
            Some(slot) if slot.provider_code == provider_code && !slot.state().is_reserved() => {
                slot.set_state(SlotState::Booked);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn reopen_slot(&self, id: Uuid) -> Result<usize, StoreError> {
        let mut tables = self.tables()?;
        match tables.slots.get_mut(&id) {
            Some(slot) => {
                slot.set_state(SlotState::Open);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn reserve_atomic(
        &self,
        slot_id: Uuid,
        provider_code: &str,
        client_id: &str,
        duration_mins: i32,
    ) -> Result<Option<Booking>, StoreError> {
        let mut tables = self.tables()?;

        let Some(slot) = tables
            .slots
            .get(&slot_id)
            .filter(|slot| slot.provider_code == provider_code)
            .cloned()
        else {
            return Ok(None);
        };

        if let Some(existing) = tables.confirmed_at(provider_code, slot.start_utc) {
            return Ok((existing.client_id == client_id).then(|| existing.clone()));
        }
        if slot.state().is_reserved() {
            return Ok(None);
        }

        let booking = tables.insert_booking(&NewBooking {
            provider_code: provider_code.into(),
            client_id: client_id.into(),
            start_utc: slot.start_utc,
            duration_mins,
            slot_id: Some(slot_id),
        })?;
        if let Some(stored) = tables.slots.get_mut(&slot_id) {
            stored.set_state(SlotState::Booked);
        }
        Ok(Some(booking))
    }

    fn confirmed_booking(
        &self,
        client_id: &str,
        provider_code: &str,
        start_utc: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError> {
        Ok(self
            .tables()?
            .confirmed_at(provider_code, start_utc)
            .filter(|booking| booking.client_id == client_id)
            .cloned())
    }

    fn confirmed_booking_at(
        &self,
        provider_code: &str,
        start_utc: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError> {
        Ok(self.tables()?.confirmed_at(provider_code, start_utc).cloned())
    }

    fn insert_booking(&self, booking: &NewBooking) -> Result<Booking, StoreError> {
        self.tables()?.insert_booking(booking)
    }

    fn booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.tables()?.bookings.get(&id).cloned())
    }

    fn bookings(&self, query: &BookingQuery) -> Result<Vec<Booking>, StoreError> {
        let mut bookings: Vec<Booking> = self
            .tables()?
            .bookings
            .values()
            .filter(|booking| query.matches(booking))
            .cloned()
            .collect();
        bookings.sort_unstable_by(|a, b| a.start_utc.cmp(&b.start_utc));
        Ok(bookings)
    }

    fn cancel_booking(&self, id: Uuid, reason: Option<&str>) -> Result<Option<Booking>, StoreError> {
        let mut tables = self.tables()?;
        match tables.bookings.get_mut(&id) {
            Some(booking) if booking.is_confirmed() => {
                booking.status = BookingStatus::Canceled;
                booking.cancel_reason = reason.map(String::from);
                booking.updated_at = Utc::now();
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }

    fn move_booking(&self, id: Uuid, slot: &AvailabilitySlot) -> Result<Option<Booking>, StoreError> {
        let mut tables = self.tables()?;
        let taken = tables
            .confirmed_at(&slot.provider_code, slot.start_utc)
            .is_some_and(|other| other.id != id);
        if taken {
            return Err(StoreError::Duplicate);
        }

        match tables.bookings.get_mut(&id) {
            Some(booking) if booking.is_confirmed() => {
                booking.start_utc = slot.start_utc;
                booking.duration_mins = slot.duration_mins();
                booking.slot_id = Some(slot.id);
                booking.updated_at = Utc::now();
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }

    fn has_booked_since(&self, client_id: &str, since: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self.tables()?.bookings.values().any(|booking| {
            booking.is_confirmed() && booking.client_id == client_id && booking.created_at >= since
        }))
    }
}
