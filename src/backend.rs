use crate::error::{BookingError, StoreError};
use crate::types::{AvailabilitySlot, Booking, BookingQuery, NewBooking, NewSlot};
use chrono::{DateTime, Utc};
use tracing::error;
use uuid::Uuid;

/// Persistence operations over the availability and booking tables.
///
/// Every method is a single round-trip against the store. Methods documented as
/// conditional must mutate a row only when it still matches the stated
/// predicate and report how many rows changed, atomically with respect to
/// concurrent callers.
pub trait BookingBackend: Clone + Send + Sync + 'static {
    /// Whether the store offers a server-side routine performing a whole
    /// reservation as one indivisible operation.
    fn supports_atomic_reservation(&self) -> bool;

    fn slot(&self, id: Uuid) -> Result<Option<AvailabilitySlot>, StoreError>;

    /// The provider's open slot starting exactly at `start_utc`.
    fn open_slot_at(
        &self,
        provider_code: &str,
        start_utc: DateTime<Utc>,
    ) -> Result<Option<AvailabilitySlot>, StoreError>;

    /// Open slots with `window_start <= start <= window_end`, ascending by start.
    fn open_slots(
        &self,
        provider_code: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AvailabilitySlot>, StoreError>;

    /// Slots of the provider intersecting `[start, end)`.
    fn overlapping_slots(
        &self,
        provider_code: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AvailabilitySlot>, StoreError>;

    fn insert_slots(&self, slots: &[NewSlot]) -> Result<Vec<AvailabilitySlot>, StoreError>;

    /// Conditional delete: removes the slot only while it is open.
    fn delete_open_slot(&self, id: Uuid) -> Result<usize, StoreError>;

    /// Conditional update open -> booked, guarded by id, provider and the open predicate.
    fn mark_slot_booked(&self, id: Uuid, provider_code: &str) -> Result<usize, StoreError>;

    /// Sets the slot back to open regardless of its current state.
    fn reopen_slot(&self, id: Uuid) -> Result<usize, StoreError>;

    /// Runs the complete reservation inside the store. Returns `None` when the
    /// slot cannot be reserved by this client.
    fn reserve_atomic(
        &self,
        slot_id: Uuid,
        provider_code: &str,
        client_id: &str,
        duration_mins: i32,
    ) -> Result<Option<Booking>, StoreError>;

    /// Confirmed booking of this client with this provider at `start_utc`.
    fn confirmed_booking(
        &self,
        client_id: &str,
        provider_code: &str,
        start_utc: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError>;

    /// Confirmed booking of any client with this provider at `start_utc`.
    fn confirmed_booking_at(
        &self,
        provider_code: &str,
        start_utc: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] when a confirmed booking already
    /// holds the provider at that start time.
    fn insert_booking(&self, booking: &NewBooking) -> Result<Booking, StoreError>;

    fn booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;

    fn bookings(&self, query: &BookingQuery) -> Result<Vec<Booking>, StoreError>;

    /// Conditional update confirmed -> canceled. `None` when the booking was not confirmed.
    fn cancel_booking(&self, id: Uuid, reason: Option<&str>) -> Result<Option<Booking>, StoreError>;

    /// Moves a confirmed booking onto `slot`. `None` when the booking was not confirmed.
    fn move_booking(&self, id: Uuid, slot: &AvailabilitySlot) -> Result<Option<Booking>, StoreError>;

    /// Whether the client created a confirmed booking at or after `since`.
    fn has_booked_since(&self, client_id: &str, since: DateTime<Utc>) -> Result<bool, StoreError>;
}

/// Runs blocking store work off the async executor.
pub async fn blocking<T, F>(work: F) -> Result<T, BookingError>
where
    F: FnOnce() -> Result<T, BookingError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        error!(?err, "Blocking store task failed");
        BookingError::Internal(err.to_string())
    })?
}
