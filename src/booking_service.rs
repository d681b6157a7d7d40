use crate::{
    backend::BookingBackend,
    configuration::StrategyPreference,
    error::{BookingError, StoreError},
    reservation::{ReservationRequest, ReservationStrategy, SlotReservation},
    timezone::{local_to_utc, parse_timezone},
    types::{AvailabilitySlot, Booking, BookingQuery, NewSlot},
};
use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const DEFAULT_SLOT_LIMIT: usize = 20;
pub const MAX_SLOT_LIMIT: usize = 200;
const NEXT_AVAILABLE_HORIZON_DAYS: i64 = 90;

/// Local wall-clock range as entered by a provider.
#[derive(Debug, Clone)]
pub struct LocalRange {
    pub start_local: String,
    pub end_local: String,
    pub tz: String,
}

/// Booking operations over a store. Holds no state besides the reservation
/// strategy chosen at construction.
#[derive(Debug, Clone)]
pub struct BookingService<B: BookingBackend> {
    backend: B,
    reservation: SlotReservation<B>,
}

impl<B: BookingBackend> BookingService<B> {
    pub fn new(backend: B, preference: StrategyPreference) -> Self {
        let reservation = SlotReservation::new(backend.clone(), preference);
        Self {
            backend,
            reservation,
        }
    }

    pub fn with_strategy(backend: B, strategy: ReservationStrategy) -> Self {
        let reservation = SlotReservation::with_strategy(backend.clone(), strategy);
        Self {
            backend,
            reservation,
        }
    }

    pub fn strategy(&self) -> ReservationStrategy {
        self.reservation.strategy()
    }

    pub fn create(&self, request: &ReservationRequest) -> Result<Booking, BookingError> {
        match self.reservation.reserve(request) {
            Err(BookingError::SlotUnavailable { .. }) => Err(BookingError::SlotUnavailable {
                next_available: self.next_available(request.provider_code.trim()).map(Box::new),
            }),
            result => result,
        }
    }

    /// Earliest open slot of the provider from now on, if the store can tell.
    pub fn next_available(&self, provider_code: &str) -> Option<AvailabilitySlot> {
        let now = Utc::now();
        match self.backend.open_slots(
            provider_code,
            now,
            now + Duration::days(NEXT_AVAILABLE_HORIZON_DAYS),
            1,
        ) {
            Ok(mut slots) => slots.pop(),
            Err(err) => {
                warn!(?err, provider_code, "Failed to look up next available slot");
                None
            }
        }
    }

    pub fn list(&self, query: &BookingQuery) -> Result<Vec<Booking>, BookingError> {
        if query.provider_code.is_none() && query.client_id.is_none() {
            return Err(BookingError::Validation(
                "either providerCode or clientId is required".into(),
            ));
        }
        check_window(query.window_start, query.window_end)?;
        Ok(self.backend.bookings(query)?)
    }

    /// Cancels a booking and reopens its slot. Canceling twice is a no-op.
    pub fn cancel(&self, booking_id: Uuid, reason: Option<&str>) -> Result<Booking, BookingError> {
        let booking = self
            .backend
            .booking(booking_id)?
            .ok_or_else(|| BookingError::NotFound(format!("booking {booking_id}")))?;
        if !booking.is_confirmed() {
            return Ok(booking);
        }

        let Some(canceled) = self.backend.cancel_booking(booking_id, reason)? else {
            // a concurrent cancel got there first
            return self
                .backend
                .booking(booking_id)?
                .ok_or_else(|| BookingError::NotFound(format!("booking {booking_id}")));
        };
        info!(booking_id = %booking_id, "Booking canceled");

        if let Some(slot_id) = canceled.slot_id {
            match self.backend.reopen_slot(slot_id) {
                Ok(_) => info!(slot_id = %slot_id, "Slot reopened after cancellation"),
                Err(err) => error!(
                    ?err,
                    slot_id = %slot_id,
                    booking_id = %booking_id,
                    "Failed to reopen slot of canceled booking, manual reconciliation required"
                ),
            }
        }
        Ok(canceled)
    }

    /// Moves a confirmed booking to another open slot of the same provider.
    ///
    /// The previously held slot stays booked.
    pub fn reschedule(&self, booking_id: Uuid, new_availability_id: Uuid) -> Result<Booking, BookingError> {
        let booking = self
            .backend
            .booking(booking_id)?
            .ok_or_else(|| BookingError::NotFound(format!("booking {booking_id}")))?;
        if !booking.is_confirmed() {
            return Err(BookingError::Validation(
                "only confirmed bookings can be rescheduled".into(),
            ));
        }

        let slot = self
            .backend
            .slot(new_availability_id)?
            .ok_or_else(BookingError::slot_unavailable)?;
        if slot.provider_code != booking.provider_code {
            return Err(BookingError::ProviderMismatch);
        }
        if booking.slot_id == Some(slot.id) {
            return Ok(booking);
        }

        self.reservation.claim_slot(&slot)?;
        match self.backend.move_booking(booking_id, &slot) {
            Ok(Some(moved)) => {
                warn!(
                    booking_id = %booking_id,
                    old_slot_id = ?booking.slot_id,
                    new_slot_id = %slot.id,
                    "Booking rescheduled, previous slot is left booked"
                );
                Ok(moved)
            }
            Ok(None) => {
                self.reservation.release_slot(&slot);
                Err(BookingError::Validation(
                    "booking was canceled while rescheduling".into(),
                ))
            }
            Err(StoreError::Duplicate) => {
                self.reservation.release_slot(&slot);
                Err(BookingError::slot_unavailable())
            }
            Err(err) => {
                self.reservation.release_slot(&slot);
                Err(err.into())
            }
        }
    }

    /// Adds provider availability. Nothing is inserted when any range is
    /// invalid or overlaps another range or an existing slot.
    pub fn add_availability(
        &self,
        provider_code: &str,
        ranges: &[LocalRange],
    ) -> Result<Vec<AvailabilitySlot>, BookingError> {
        let provider_code = provider_code.trim();
        if provider_code.is_empty() {
            return Err(BookingError::Validation("providerCode must not be empty".into()));
        }
        if ranges.is_empty() {
            return Err(BookingError::Validation("at least one range is required".into()));
        }

        let mut new_slots: Vec<NewSlot> = Vec::with_capacity(ranges.len());
        for range in ranges {
            let tz = parse_timezone(&range.tz)?;
            let start_utc = local_to_utc(&range.start_local, tz)?;
            let end_utc = local_to_utc(&range.end_local, tz)?;
            if start_utc >= end_utc {
                return Err(BookingError::Validation(format!(
                    "range {} - {} ends before it starts",
                    range.start_local, range.end_local
                )));
            }

            let overlaps_request = new_slots
                .iter()
                .any(|other| other.start_utc < end_utc && other.end_utc > start_utc);
            if overlaps_request
                || !self
                    .backend
                    .overlapping_slots(provider_code, start_utc, end_utc)?
                    .is_empty()
            {
                warn!(provider_code, %start_utc, %end_utc, "Rejected overlapping availability");
                return Err(BookingError::SlotOverlap);
            }

            new_slots.push(NewSlot {
                provider_code: provider_code.into(),
                start_utc,
                end_utc,
            });
        }

        let slots = self.backend.insert_slots(&new_slots)?;
        info!(provider_code, count = slots.len(), "Availability added");
        Ok(slots)
    }

    /// Open slots of a provider inside the window. Slots that already began
    /// are never listed, whatever the requested window.
    pub fn list_open_slots(
        &self,
        provider_code: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<AvailabilitySlot>, BookingError> {
        if provider_code.trim().is_empty() {
            return Err(BookingError::Validation("providerCode must not be empty".into()));
        }
        check_window(window_start, window_end)?;
        let limit = limit.unwrap_or(DEFAULT_SLOT_LIMIT).clamp(1, MAX_SLOT_LIMIT);
        let now = Utc::now();
        let mut slots = self
            .backend
            .open_slots(provider_code.trim(), window_start.max(now), window_end, limit)?;
        slots.retain(|slot| slot.start_utc > now);
        Ok(slots)
    }

    /// Provider removes one of their open slots.
    pub fn remove_slot(&self, provider_code: &str, slot_id: Uuid) -> Result<(), BookingError> {
        let slot = self
            .backend
            .slot(slot_id)?
            .filter(|slot| slot.provider_code == provider_code.trim())
            .ok_or_else(|| BookingError::NotFound(format!("availability {slot_id}")))?;
        if slot.is_reserved || self.backend.delete_open_slot(slot.id)? == 0 {
            return Err(BookingError::slot_unavailable());
        }
        info!(slot_id = %slot_id, provider_code, "Availability removed");
        Ok(())
    }
}

fn check_window(window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Result<(), BookingError> {
    if window_start > window_end {
        return Err(BookingError::Validation(
            "windowStart must not be after windowEnd".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        local_store::LocalStore,
        testutils::MockBookingBackend,
        types::{BookingStatus, NewBooking},
    };
    use chrono::TimeZone;
    use std::sync::atomic::Ordering;
    use test_case::test_case;

    fn service(store: &LocalStore) -> BookingService<LocalStore> {
        BookingService::with_strategy(store.clone(), ReservationStrategy::ConditionalUpdate)
    }

    fn utc_range(start: &str, end: &str) -> LocalRange {
        LocalRange {
            start_local: start.into(),
            end_local: end.into(),
            tz: "UTC".into(),
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, hour, minute, 0).unwrap()
    }

    fn whole_day() -> (DateTime<Utc>, DateTime<Utc>) {
        (at(0, 0), at(23, 59))
    }

    fn by_slot(slot: &AvailabilitySlot, client_id: &str) -> ReservationRequest {
        ReservationRequest {
            availability_id: Some(slot.id),
            provider_code: slot.provider_code.clone(),
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_overlapping_availability_is_rejected() {
        let store = LocalStore::default();
        let service = service(&store);

        service
            .add_availability("P1", &[utc_range("2025-01-01T09:00", "2025-01-01T10:00")])
            .unwrap();
        let err = service
            .add_availability("P1", &[utc_range("2025-01-01T09:30", "2025-01-01T10:30")])
            .unwrap_err();
        assert!(matches!(err, BookingError::SlotOverlap));

        let (start, end) = whole_day();
        let slots = store.open_slots("P1", start, end, 10).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].start_utc, at(9, 0));
        assert_eq!(slots[0].end_utc, at(10, 0));

        // adjacent windows and other providers do not overlap
        service
            .add_availability("P1", &[utc_range("2025-01-01T10:00", "2025-01-01T11:00")])
            .unwrap();
        service
            .add_availability("P2", &[utc_range("2025-01-01T09:30", "2025-01-01T10:30")])
            .unwrap();
    }

    #[test]
    fn test_overlap_within_one_request_inserts_nothing() {
        let backend = MockBookingBackend::new();
        let service = BookingService::with_strategy(backend.clone(), ReservationStrategy::ConditionalUpdate);

        let err = service
            .add_availability(
                "P1",
                &[
                    utc_range("2025-01-01T09:00", "2025-01-01T10:00"),
                    utc_range("2025-01-01T09:45", "2025-01-01T10:45"),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, BookingError::SlotOverlap));
        assert_eq!(backend.0.calls_to_insert_slots.load(Ordering::SeqCst), 0);
    }

    #[test_case("2025-01-01T10:00", "2025-01-01T09:00", "UTC" ; "end before start")]
    #[test_case("2025-01-01T09:00", "2025-01-01T09:00", "UTC" ; "empty range")]
    #[test_case("2025-01-01T09:00", "2025-01-01T10:00", "Nowhere/City" ; "unknown timezone")]
    #[test_case("09:00", "10:00", "UTC" ; "missing date")]
    fn test_invalid_availability(start: &str, end: &str, tz: &str) {
        let store = LocalStore::default();
        let err = service(&store)
            .add_availability(
                "P1",
                &[LocalRange {
                    start_local: start.into(),
                    end_local: end.into(),
                    tz: tz.into(),
                }],
            )
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[test]
    fn test_availability_is_stored_in_utc() {
        let store = LocalStore::default();
        let slots = service(&store)
            .add_availability(
                "P1",
                &[LocalRange {
                    start_local: "2025-01-01T09:00".into(),
                    end_local: "2025-01-01T10:00".into(),
                    tz: "Europe/Berlin".into(),
                }],
            )
            .unwrap();
        assert_eq!(slots[0].start_utc, at(8, 0));
        assert_eq!(slots[0].end_utc, at(9, 0));
    }

    #[test]
    fn test_cancel_reopens_slot_for_other_client() {
        let store = LocalStore::default();
        let service = service(&store);
        let slot = service
            .add_availability("P1", &[utc_range("2025-01-01T09:00", "2025-01-01T10:00")])
            .unwrap()
            .remove(0);

        let booking = service.create(&by_slot(&slot, "A")).unwrap();
        assert!(store.slot(slot.id).unwrap().unwrap().is_reserved);

        let canceled = service.cancel(booking.id, Some("feeling better")).unwrap();
        assert_eq!(canceled.status, BookingStatus::Canceled);
        assert_eq!(canceled.cancel_reason.as_deref(), Some("feeling better"));
        assert!(!store.slot(slot.id).unwrap().unwrap().is_reserved);

        let rebooked = service.create(&by_slot(&slot, "B")).unwrap();
        assert_eq!(rebooked.client_id, "B");
        assert_ne!(rebooked.id, booking.id);
    }

    #[test]
    fn test_cancel_twice_touches_slot_once() {
        let backend = MockBookingBackend::new();
        let service = BookingService::with_strategy(backend.clone(), ReservationStrategy::ConditionalUpdate);
        let slot = service
            .add_availability("P1", &[utc_range("2025-01-01T09:00", "2025-01-01T10:00")])
            .unwrap()
            .remove(0);
        let booking = service.create(&by_slot(&slot, "A")).unwrap();

        service.cancel(booking.id, None).unwrap();
        let again = service.cancel(booking.id, Some("again")).unwrap();
        assert_eq!(again.status, BookingStatus::Canceled);
        assert_eq!(again.cancel_reason, None);
        assert_eq!(backend.0.calls_to_reopen_slot.load(Ordering::SeqCst), 1);
        assert_eq!(backend.0.calls_to_cancel_booking.load(Ordering::SeqCst), 1);

        // the reopened slot was booked by someone else meanwhile
        service.create(&by_slot(&slot, "B")).unwrap();
        service.cancel(booking.id, None).unwrap();
        assert!(backend.slot(slot.id).unwrap().unwrap().is_reserved);
    }

    #[test]
    fn test_cancel_unknown_booking() {
        let store = LocalStore::default();
        assert!(matches!(
            service(&store).cancel(Uuid::new_v4(), None),
            Err(BookingError::NotFound(_))
        ));
    }

    #[test]
    fn test_reschedule_moves_booking_and_keeps_old_slot_booked() {
        let store = LocalStore::default();
        let service = service(&store);
        let slots = service
            .add_availability(
                "P1",
                &[
                    utc_range("2025-01-01T09:00", "2025-01-01T10:00"),
                    utc_range("2025-01-01T11:00", "2025-01-01T11:45"),
                ],
            )
            .unwrap();
        let booking = service.create(&by_slot(&slots[0], "A")).unwrap();

        let moved = service.reschedule(booking.id, slots[1].id).unwrap();
        assert_eq!(moved.id, booking.id);
        assert_eq!(moved.start_utc, at(11, 0));
        assert_eq!(moved.duration_mins, 45);
        assert_eq!(moved.slot_id, Some(slots[1].id));

        assert!(store.slot(slots[1].id).unwrap().unwrap().is_reserved);
        assert!(store.slot(slots[0].id).unwrap().unwrap().is_reserved);
    }

    #[test]
    fn test_reschedule_failures() {
        let store = LocalStore::default();
        let service = service(&store);
        let own = service
            .add_availability(
                "P1",
                &[
                    utc_range("2025-01-01T09:00", "2025-01-01T10:00"),
                    utc_range("2025-01-01T12:00", "2025-01-01T13:00"),
                ],
            )
            .unwrap();
        let foreign = service
            .add_availability("P2", &[utc_range("2025-01-01T11:00", "2025-01-01T12:00")])
            .unwrap()
            .remove(0);
        let booking = service.create(&by_slot(&own[0], "A")).unwrap();
        service.create(&by_slot(&own[1], "B")).unwrap();

        assert!(matches!(
            service.reschedule(booking.id, foreign.id),
            Err(BookingError::ProviderMismatch)
        ));
        assert!(matches!(
            service.reschedule(booking.id, own[1].id),
            Err(BookingError::SlotUnavailable { .. })
        ));
        assert!(matches!(
            service.reschedule(Uuid::new_v4(), own[1].id),
            Err(BookingError::NotFound(_))
        ));

        service.cancel(booking.id, None).unwrap();
        assert!(matches!(
            service.reschedule(booking.id, own[0].id),
            Err(BookingError::Validation(_))
        ));
    }

    #[test]
    fn test_slot_unavailable_offers_next_slot() {
        let store = LocalStore::default();
        let service = service(&store);
        let tomorrow = Utc::now() + Duration::days(1);
        let day_after = tomorrow + Duration::days(1);
        let slots = store
            .insert_slots(&[
                NewSlot {
                    provider_code: "P1".into(),
                    start_utc: tomorrow,
                    end_utc: tomorrow + Duration::hours(1),
                },
                NewSlot {
                    provider_code: "P1".into(),
                    start_utc: day_after,
                    end_utc: day_after + Duration::hours(1),
                },
            ])
            .unwrap();
        service.create(&by_slot(&slots[0], "A")).unwrap();

        match service.create(&by_slot(&slots[0], "B")) {
            Err(BookingError::SlotUnavailable {
                next_available: Some(next),
            }) => assert_eq!(next.id, slots[1].id),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_list_bookings_by_client_and_provider() {
        let store = LocalStore::default();
        let service = service(&store);
        let slots = service
            .add_availability(
                "P1",
                &[
                    utc_range("2025-01-01T14:00", "2025-01-01T15:00"),
                    utc_range("2025-01-01T09:00", "2025-01-01T10:00"),
                    utc_range("2025-01-02T09:00", "2025-01-02T10:00"),
                ],
            )
            .unwrap();
        for slot in &slots {
            service.create(&by_slot(slot, "A")).unwrap();
        }

        let (start, end) = whole_day();
        let query = BookingQuery {
            provider_code: None,
            client_id: Some("A".into()),
            window_start: start,
            window_end: end,
            status: None,
        };
        let bookings = service.list(&query).unwrap();
        let starts: Vec<_> = bookings.iter().map(|booking| booking.start_utc).collect();
        assert_eq!(starts, vec![at(9, 0), at(14, 0)]);

        let query = BookingQuery {
            provider_code: Some("P1".into()),
            client_id: None,
            ..query
        };
        assert_eq!(service.list(&query).unwrap().len(), 2);
    }

    #[test]
    fn test_list_requires_filter_and_ordered_window() {
        let store = LocalStore::default();
        let service = service(&store);
        let (start, end) = whole_day();

        let query = BookingQuery {
            provider_code: None,
            client_id: None,
            window_start: start,
            window_end: end,
            status: None,
        };
        assert!(matches!(service.list(&query), Err(BookingError::Validation(_))));

        let query = BookingQuery {
            client_id: Some("A".into()),
            window_start: end,
            window_end: start,
            ..query
        };
        assert!(matches!(service.list(&query), Err(BookingError::Validation(_))));
        assert!(matches!(
            service.list_open_slots("P1", end, start, None),
            Err(BookingError::Validation(_))
        ));
    }

    #[test]
    fn test_remove_slot() {
        let store = LocalStore::default();
        let service = service(&store);
        let slots = service
            .add_availability(
                "P1",
                &[
                    utc_range("2025-01-01T09:00", "2025-01-01T10:00"),
                    utc_range("2025-01-01T10:00", "2025-01-01T11:00"),
                ],
            )
            .unwrap();
        service.create(&by_slot(&slots[1], "A")).unwrap();

        assert!(matches!(
            service.remove_slot("P2", slots[0].id),
            Err(BookingError::NotFound(_))
        ));
        assert!(matches!(
            service.remove_slot("P1", slots[1].id),
            Err(BookingError::SlotUnavailable { .. })
        ));
        service.remove_slot("P1", slots[0].id).unwrap();
        assert!(store.slot(slots[0].id).unwrap().is_none());
    }

    #[test]
    fn test_past_slots_are_not_listed() {
        let store = LocalStore::default();
        let service = service(&store);
        let now = Utc::now();
        let slots = store
            .insert_slots(&[
                NewSlot {
                    provider_code: "P1".into(),
                    start_utc: now - Duration::hours(5),
                    end_utc: now - Duration::hours(4),
                },
                NewSlot {
                    provider_code: "P1".into(),
                    start_utc: now + Duration::hours(5),
                    end_utc: now + Duration::hours(6),
                },
            ])
            .unwrap();

        let listed = service
            .list_open_slots("P1", now - Duration::days(1), now + Duration::days(1), None)
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, slots[1].id);
        assert!(listed.iter().all(|slot| slot.start_utc > now));

        // a window lying entirely in the past lists nothing
        let listed = service
            .list_open_slots("P1", now - Duration::days(1), now - Duration::hours(1), None)
            .unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn test_reschedule_store_failure_releases_new_slot() {
        let backend = MockBookingBackend::new();
        let service = BookingService::with_strategy(backend.clone(), ReservationStrategy::ConditionalUpdate);
        let slots = service
            .add_availability(
                "P1",
                &[
                    utc_range("2025-01-01T09:00", "2025-01-01T10:00"),
                    utc_range("2025-01-01T11:00", "2025-01-01T12:00"),
                ],
            )
            .unwrap();
        let booking = service.create(&by_slot(&slots[0], "A")).unwrap();
        backend.0.fail_move_booking.store(true, Ordering::SeqCst);

        assert!(matches!(
            service.reschedule(booking.id, slots[1].id),
            Err(BookingError::Internal(_))
        ));
        assert!(!backend.slot(slots[1].id).unwrap().unwrap().is_reserved);
        assert_eq!(backend.0.calls_to_reopen_slot.load(Ordering::SeqCst), 1);

        let unchanged = backend.booking(booking.id).unwrap().unwrap();
        assert_eq!(unchanged.slot_id, Some(slots[0].id));
        assert_eq!(unchanged.start_utc, at(9, 0));
    }

    #[test]
    fn test_reschedule_of_concurrently_canceled_booking_releases_new_slot() {
        let backend = MockBookingBackend::new();
        let service = BookingService::with_strategy(backend.clone(), ReservationStrategy::ConditionalUpdate);
        let slots = service
            .add_availability(
                "P1",
                &[
                    utc_range("2025-01-01T09:00", "2025-01-01T10:00"),
                    utc_range("2025-01-01T11:00", "2025-01-01T12:00"),
                ],
            )
            .unwrap();
        let booking = service.create(&by_slot(&slots[0], "A")).unwrap();
        backend.0.cancel_before_move.store(true, Ordering::SeqCst);

        assert!(matches!(
            service.reschedule(booking.id, slots[1].id),
            Err(BookingError::Validation(_))
        ));
        assert!(!backend.slot(slots[1].id).unwrap().unwrap().is_reserved);
        assert_eq!(backend.0.calls_to_reopen_slot.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reschedule_onto_start_held_by_slotless_booking() {
        let store = LocalStore::default();
        let service = service(&store);
        let slots = service
            .add_availability(
                "P1",
                &[
                    utc_range("2025-01-01T09:00", "2025-01-01T10:00"),
                    utc_range("2025-01-01T11:00", "2025-01-01T12:00"),
                ],
            )
            .unwrap();
        let booking = service.create(&by_slot(&slots[0], "A")).unwrap();
        // booked by start time only, the slot itself was never marked
        store
            .insert_booking(&NewBooking {
                slot_id: None,
                provider_code: "P1".into(),
                client_id: "B".into(),
                start_utc: at(11, 0),
                duration_mins: 60,
            })
            .unwrap();

        assert!(matches!(
            service.reschedule(booking.id, slots[1].id),
            Err(BookingError::SlotUnavailable { .. })
        ));
        assert!(!store.slot(slots[1].id).unwrap().unwrap().is_reserved);
        assert_eq!(
            store.booking(booking.id).unwrap().unwrap().slot_id,
            Some(slots[0].id)
        );
    }

    #[test]
    fn test_cancel_succeeds_when_slot_cannot_be_reopened() {
        let backend = MockBookingBackend::new();
        let service = BookingService::with_strategy(backend.clone(), ReservationStrategy::ConditionalUpdate);
        let slot = service
            .add_availability("P1", &[utc_range("2025-01-01T09:00", "2025-01-01T10:00")])
            .unwrap()
            .remove(0);
        let booking = service.create(&by_slot(&slot, "A")).unwrap();
        backend.0.fail_reopen_slot.store(true, Ordering::SeqCst);

        let canceled = service.cancel(booking.id, Some("moved away")).unwrap();
        assert_eq!(canceled.status, BookingStatus::Canceled);
        assert_eq!(backend.0.calls_to_reopen_slot.load(Ordering::SeqCst), 1);
        assert!(backend.slot(slot.id).unwrap().unwrap().is_reserved);
    }

    #[test]
    fn test_store_failure_surfaces_as_internal() {
        let backend = MockBookingBackend::new();
        let service = BookingService::with_strategy(backend.clone(), ReservationStrategy::ConditionalUpdate);
        backend.0.fail_reads.store(true, Ordering::SeqCst);

        let (start, end) = whole_day();
        assert!(matches!(
            service.list_open_slots("P1", start, end, Some(5)),
            Err(BookingError::Internal(_))
        ));
        assert!(matches!(
            service.cancel(Uuid::new_v4(), None),
            Err(BookingError::Internal(_))
        ));
    }
}
