use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    backend::BookingBackend,
    error::StoreError,
    local_store::LocalStore,
    types::{AvailabilitySlot, Booking, BookingQuery, NewBooking, NewSlot},
};

pub struct MockBookingBackendInner {
    pub store: LocalStore,
    pub supports_atomic: AtomicBool,
    pub fail_mark_slot_booked: AtomicBool,
    pub fail_insert_booking: AtomicBool,
    pub fail_reopen_slot: AtomicBool,
    pub fail_move_booking: AtomicBool,
    pub cancel_before_move: AtomicBool,
    pub fail_reads: AtomicBool,
    pub calls_to_mark_slot_booked: AtomicU64,
    pub calls_to_reopen_slot: AtomicU64,
    pub calls_to_insert_booking: AtomicU64,
    pub calls_to_insert_slots: AtomicU64,
    pub calls_to_cancel_booking: AtomicU64,
}

/// Backend over a [`LocalStore`] with switchable failures and call counters.
#[derive(Clone)]
pub struct MockBookingBackend(pub Arc<MockBookingBackendInner>);

impl MockBookingBackendInner {
    fn new() -> Self {
        Self {
            store: LocalStore::default(),
            supports_atomic: AtomicBool::new(false),
            fail_mark_slot_booked: AtomicBool::default(),
            fail_insert_booking: AtomicBool::default(),
            fail_reopen_slot: AtomicBool::default(),
            fail_move_booking: AtomicBool::default(),
            cancel_before_move: AtomicBool::default(),
            fail_reads: AtomicBool::default(),
            calls_to_mark_slot_booked: AtomicU64::default(),
            calls_to_reopen_slot: AtomicU64::default(),
            calls_to_insert_booking: AtomicU64::default(),
            calls_to_insert_slots: AtomicU64::default(),
            calls_to_cancel_booking: AtomicU64::default(),
        }
    }
}

impl MockBookingBackend {
    pub fn new() -> Self {
        Self(Arc::new(MockBookingBackendInner::new()))
    }

    fn result(flag: &AtomicBool) -> Result<(), StoreError> {
        match flag.load(Ordering::SeqCst) {
            true => Err(StoreError::Unavailable("Supposed to fail".into())),
            false => Ok(()),
        }
    }

    fn read(&self) -> Result<(), StoreError> {
        Self::result(&self.0.fail_reads)
    }
}

impl BookingBackend for MockBookingBackend {
    fn supports_atomic_reservation(&self) -> bool {
        self.0.supports_atomic.load(Ordering::SeqCst)
    }

    fn slot(&self, id: Uuid) -> Result<Option<AvailabilitySlot>, StoreError> {
        self.read()?;
        self.0.store.slot(id)
    }

    fn open_slot_at(
        &self,
        provider_code: &str,
        start_utc: DateTime<Utc>,
    ) -> Result<Option<AvailabilitySlot>, StoreError> {
        self.read()?;
        self.0.store.open_slot_at(provider_code, start_utc)
    }

    fn open_slots(
        &self,
        provider_code: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AvailabilitySlot>, StoreError> {
        self.read()?;
        self.0
            .store
            .open_slots(provider_code, window_start, window_end, limit)
    }

    fn overlapping_slots(
        &self,
        provider_code: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AvailabilitySlot>, StoreError> {
        self.read()?;
        self.0.store.overlapping_slots(provider_code, start, end)
    }

    fn insert_slots(&self, slots: &[NewSlot]) -> Result<Vec<AvailabilitySlot>, StoreError> {
        self.0.calls_to_insert_slots.fetch_add(1, Ordering::SeqCst);
        self.0.store.insert_slots(slots)
    }

    fn delete_open_slot(&self, id: Uuid) -> Result<usize, StoreError> {
        self.0.store.delete_open_slot(id)
    }

    fn mark_slot_booked(&self, id: Uuid, provider_code: &str) -> Result<usize, StoreError> {
        self.0
            .calls_to_mark_slot_booked
            .fetch_add(1, Ordering::SeqCst);
        Self::result(&self.0.fail_mark_slot_booked)?;
        self.0.store.mark_slot_booked(id, provider_code)
    }

    fn reopen_slot(&self, id: Uuid) -> Result<usize, StoreError> {
        self.0.calls_to_reopen_slot.fetch_add(1, Ordering::SeqCst);
        Self::result(&self.0.fail_reopen_slot)?;
        self.0.store.reopen_slot(id)
    }

    fn reserve_atomic(
        &self,
        slot_id: Uuid,
        provider_code: &str,
        client_id: &str,
        duration_mins: i32,
    ) -> Result<Option<Booking>, StoreError> {
        self.0
            .store
            .reserve_atomic(slot_id, provider_code, client_id, duration_mins)
    }

    fn confirmed_booking(
        &self,
        client_id: &str,
        provider_code: &str,
        start_utc: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError> {
        self.read()?;
        self.0
            .store
            .confirmed_booking(client_id, provider_code, start_utc)
    }

    fn confirmed_booking_at(
        &self,
        provider_code: &str,
        start_utc: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError> {
        self.read()?;
        self.0.store.confirmed_booking_at(provider_code, start_utc)
    }

    fn insert_booking(&self, booking: &NewBooking) -> Result<Booking, StoreError> {
        self.0.calls_to_insert_booking.fetch_add(1, Ordering::SeqCst);
        Self::result(&self.0.fail_insert_booking)?;
        self.0.store.insert_booking(booking)
    }

    fn booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        self.read()?;
        self.0.store.booking(id)
    }

    fn bookings(&self, query: &BookingQuery) -> Result<Vec<Booking>, StoreError> {
        self.read()?;
        self.0.store.bookings(query)
    }

    fn cancel_booking(&self, id: Uuid, reason: Option<&str>) -> Result<Option<Booking>, StoreError> {
        self.0.calls_to_cancel_booking.fetch_add(1, Ordering::SeqCst);
        self.0.store.cancel_booking(id, reason)
    }

    fn move_booking(&self, id: Uuid, slot: &AvailabilitySlot) -> Result<Option<Booking>, StoreError> {
        Self::result(&self.0.fail_move_booking)?;
        if self.0.cancel_before_move.load(Ordering::SeqCst) {
            // a concurrent cancel lands between the claim and the move
            self.0.store.cancel_booking(id, None)?;
        }
        self.0.store.move_booking(id, slot)
    }

    fn has_booked_since(&self, client_id: &str, since: DateTime<Utc>) -> Result<bool, StoreError> {
        self.read()?;
        self.0.store.has_booked_since(client_id, since)
    }
}
