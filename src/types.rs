use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

pub const STATUS_OPEN: &str = "open";
pub const STATUS_BOOKED: &str = "booked";

/// Reservation state of an availability slot.
///
/// Rows carry the state in two historical shapes: a text `status` column and a
/// boolean `is_booked` flag. `from_columns` is the only place where they are
/// folded into one value; a missing value in either column counts as open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Open,
    Booked,
}

impl SlotState {
    pub fn from_columns(status: Option<&str>, is_booked: Option<bool>) -> Self {
        let booked_by_status = status.is_some_and(|status| status.eq_ignore_ascii_case(STATUS_BOOKED));
        if booked_by_status || is_booked == Some(true) {
            SlotState::Booked
        } else {
            SlotState::Open
        }
    }

    /// Both column values written for this state.
    pub fn as_columns(self) -> (&'static str, bool) {
        match self {
            SlotState::Open => (STATUS_OPEN, false),
            SlotState::Booked => (STATUS_BOOKED, true),
        }
    }

    pub fn is_reserved(self) -> bool {
        self == SlotState::Booked
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilitySlot {
    pub id: Uuid,
    pub provider_code: String,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub is_reserved: bool,
    pub created_at: DateTime<Utc>,
}

impl AvailabilitySlot {
    pub fn duration_mins(&self) -> i32 {
        i32::try_from((self.end_utc - self.start_utc).num_minutes()).unwrap_or(i32::MAX)
    }

    /// Half-open intersection test used for overlap rejection.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_utc < end && self.end_utc > start
    }
}

#[derive(Debug, Clone)]
pub struct NewSlot {
    pub provider_code: String,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Canceled,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Canceled => "canceled",
        }
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "confirmed" => Ok(BookingStatus::Confirmed),
            // older rows were written with the British spelling
            "canceled" | "cancelled" => Ok(BookingStatus::Canceled),
            other => Err(format!("unknown booking status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Booking {
    pub id: Uuid,
    pub provider_code: String,
    pub client_id: String,
    pub start_utc: DateTime<Utc>,
    pub duration_mins: i32,
    pub status: BookingStatus,
    pub slot_id: Option<Uuid>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub provider_code: String,
    pub client_id: String,
    pub start_utc: DateTime<Utc>,
    pub duration_mins: i32,
    pub slot_id: Option<Uuid>,
}

/// Filter for booking listings. `start_utc` must fall inside the inclusive window.
#[derive(Debug, Clone)]
pub struct BookingQuery {
    pub provider_code: Option<String>,
    pub client_id: Option<String>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub status: Option<BookingStatus>,
}

impl BookingQuery {
    pub fn matches(&self, booking: &Booking) -> bool {
        self.provider_code
            .as_ref()
            .map_or(true, |provider| &booking.provider_code == provider)
            && self
                .client_id
                .as_ref()
                .map_or(true, |client| &booking.client_id == client)
            && self.status.map_or(true, |status| booking.status == status)
            && booking.start_utc >= self.window_start
            && booking.start_utc <= self.window_end
    }
}
