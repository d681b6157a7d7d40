//! Slot reservation: turns one open availability slot into exactly one
//! confirmed booking.
//!
//! Two strategies exist. The store's atomic routine is preferred. Stores
//! without one fall back to a conditional update of the slot followed by the
//! booking insert, with a compensating release of the slot when the insert
//! fails. The strategy is picked once, when the service is built.

use crate::{
    backend::BookingBackend,
    configuration::StrategyPreference,
    error::{BookingError, StoreError},
    types::{AvailabilitySlot, Booking, NewBooking},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStrategy {
    AtomicRoutine,
    ConditionalUpdate,
}

impl ReservationStrategy {
    /// Asks the backend once and honours an explicit preference where possible.
    pub fn select<B: BookingBackend>(backend: &B, preference: StrategyPreference) -> Self {
        let atomic_available = backend.supports_atomic_reservation();
        let strategy = match preference {
            StrategyPreference::Conditional => ReservationStrategy::ConditionalUpdate,
            StrategyPreference::Auto | StrategyPreference::Atomic if atomic_available => {
                ReservationStrategy::AtomicRoutine
            }
            StrategyPreference::Atomic => {
                warn!("Atomic reservation routine requested but not available, using conditional updates");
                ReservationStrategy::ConditionalUpdate
            }
            StrategyPreference::Auto => ReservationStrategy::ConditionalUpdate,
        };
        info!(?strategy, atomic_available, "Selected reservation strategy");
        strategy
    }
}

/// A reservation attempt. Either `availability_id` or both `start_utc` and
/// `duration_mins` identify the slot.
#[derive(Debug, Clone, Default)]
pub struct ReservationRequest {
    pub availability_id: Option<Uuid>,
    pub provider_code: String,
    pub client_id: String,
    pub start_utc: Option<DateTime<Utc>>,
    pub duration_mins: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct SlotReservation<B: BookingBackend> {
    backend: B,
    strategy: ReservationStrategy,
}

impl<B: BookingBackend> SlotReservation<B> {
    pub fn new(backend: B, preference: StrategyPreference) -> Self {
        let strategy = ReservationStrategy::select(&backend, preference);
        Self { backend, strategy }
    }

    pub fn with_strategy(backend: B, strategy: ReservationStrategy) -> Self {
        Self { backend, strategy }
    }

    pub fn strategy(&self) -> ReservationStrategy {
        self.strategy
    }

    pub fn reserve(&self, request: &ReservationRequest) -> Result<Booking, BookingError> {
        let provider_code = request.provider_code.trim();
        let client_id = request.client_id.trim();
        if provider_code.is_empty() || client_id.is_empty() {
            return Err(BookingError::Validation(
                "providerCode and clientId must not be empty".into(),
            ));
        }

        let (slot, duration_mins) = match request.availability_id {
            Some(availability_id) => {
                let slot = self
                    .backend
                    .slot(availability_id)?
                    .filter(|slot| slot.provider_code == provider_code)
                    .ok_or_else(BookingError::slot_unavailable)?;
                if let Some(existing) = self.existing_booking(client_id, provider_code, slot.start_utc)? {
                    return Ok(existing);
                }
                let duration_mins = slot.duration_mins();
                (slot, duration_mins)
            }
            None => {
                let (Some(start_utc), Some(duration_mins)) = (request.start_utc, request.duration_mins)
                else {
                    return Err(BookingError::Validation(
                        "either availabilityId or both startUTC and durationMins are required".into(),
                    ));
                };
                if duration_mins <= 0 {
                    return Err(BookingError::Validation("durationMins must be positive".into()));
                }
                if let Some(existing) = self.existing_booking(client_id, provider_code, start_utc)? {
                    return Ok(existing);
                }
                let slot = self
                    .backend
                    .open_slot_at(provider_code, start_utc)?
                    .ok_or_else(BookingError::slot_unavailable)?;
                (slot, duration_mins)
            }
        };

        match self.strategy {
            ReservationStrategy::AtomicRoutine => {
                self.reserve_atomically(&slot, client_id, duration_mins)
            }
            ReservationStrategy::ConditionalUpdate => {
                self.reserve_conditionally(&slot, client_id, duration_mins)
            }
        }
    }

    fn existing_booking(
        &self,
        client_id: &str,
        provider_code: &str,
        start_utc: DateTime<Utc>,
    ) -> Result<Option<Booking>, BookingError> {
        let existing = self
            .backend
            .confirmed_booking(client_id, provider_code, start_utc)?;
        if let Some(booking) = &existing {
            info!(booking_id = %booking.id, client_id, "Returning existing booking for repeated request");
        }
        Ok(existing)
    }

    fn reserve_atomically(
        &self,
        slot: &AvailabilitySlot,
        client_id: &str,
        duration_mins: i32,
    ) -> Result<Booking, BookingError> {
        match self
            .backend
            .reserve_atomic(slot.id, &slot.provider_code, client_id, duration_mins)?
        {
            Some(booking) => {
                info!(booking_id = %booking.id, slot_id = %slot.id, "Slot reserved");
                Ok(booking)
            }
            None => Err(BookingError::slot_unavailable()),
        }
    }

    fn reserve_conditionally(
        &self,
        slot: &AvailabilitySlot,
        client_id: &str,
        duration_mins: i32,
    ) -> Result<Booking, BookingError> {
        self.claim_slot(slot)?;

        let existing = match self
            .backend
            .confirmed_booking(client_id, &slot.provider_code, slot.start_utc)
        {
            Ok(existing) => existing,
            Err(err) => {
                self.release_slot(slot);
                return Err(err.into());
            }
        };
        if let Some(existing) = existing {
            if existing.slot_id != Some(slot.id) {
                self.release_slot(slot);
            }
            return Ok(existing);
        }

        let new_booking = NewBooking {
            provider_code: slot.provider_code.clone(),
            client_id: client_id.into(),
            start_utc: slot.start_utc,
            duration_mins,
            slot_id: Some(slot.id),
        };
        match self.backend.insert_booking(&new_booking) {
            Ok(booking) => {
                info!(booking_id = %booking.id, slot_id = %slot.id, "Slot reserved");
                Ok(booking)
            }
            Err(StoreError::Duplicate) => self.resolve_duplicate(slot, client_id),
            Err(err) => {
                error!(?err, slot_id = %slot.id, "Booking insert failed, releasing slot");
                self.release_slot(slot);
                Err(BookingError::Internal(err.to_string()))
            }
        }
    }

    /// Another confirmed booking already holds the provider at this start time.
    fn resolve_duplicate(
        &self,
        slot: &AvailabilitySlot,
        client_id: &str,
    ) -> Result<Booking, BookingError> {
        let winner = match self
            .backend
            .confirmed_booking_at(&slot.provider_code, slot.start_utc)
        {
            Ok(winner) => winner,
            Err(err) => {
                self.release_slot(slot);
                return Err(err.into());
            }
        };

        let holds_slot = winner
            .as_ref()
            .is_some_and(|winner| winner.slot_id == Some(slot.id));
        if !holds_slot {
            self.release_slot(slot);
        }

        match winner {
            Some(winner) if winner.client_id == client_id => Ok(winner),
            _ => Err(BookingError::slot_unavailable()),
        }
    }

    /// Conditional open -> booked transition. The only admission gate.
    ///
    /// Zero affected rows, more than one, or an error from the store all mean
    /// the slot cannot be handed out now.
    pub fn claim_slot(&self, slot: &AvailabilitySlot) -> Result<(), BookingError> {
        match self.backend.mark_slot_booked(slot.id, &slot.provider_code) {
            Ok(1) => Ok(()),
            Ok(0) => Err(BookingError::slot_unavailable()),
            Ok(rows) => {
                error!(rows, slot_id = %slot.id, "Conditional slot update touched more than one row");
                Err(BookingError::slot_unavailable())
            }
            Err(err) => {
                warn!(?err, slot_id = %slot.id, "Conditional slot update failed with unknown outcome");
                Err(BookingError::slot_unavailable())
            }
        }
    }

    /// Compensating action: puts a claimed slot back to open.
    pub fn release_slot(&self, slot: &AvailabilitySlot) {
        match self.backend.reopen_slot(slot.id) {
            Ok(1) => warn!(slot_id = %slot.id, "Released slot after failed reservation"),
            Ok(rows) => error!(
                rows,
                slot_id = %slot.id,
                provider_code = %slot.provider_code,
                "Slot release touched no row. Slot may be orphaned, manual reconciliation required"
            ),
            Err(err) => error!(
                ?err,
                slot_id = %slot.id,
                provider_code = %slot.provider_code,
                "Failed to release slot. Slot is booked without a booking, manual reconciliation required"
            ),
        }
    }
}
