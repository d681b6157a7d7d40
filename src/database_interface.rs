use crate::schema::{availability_slots, bookings};
use crate::{
    backend::BookingBackend,
    error::StoreError,
    types::{
        AvailabilitySlot, Booking, BookingQuery, BookingStatus, NewBooking, NewSlot, SlotState,
    },
};
use chrono::{DateTime, Utc};
use diesel::{
    prelude::*,
    r2d2::{ConnectionManager, Pool, PooledConnection},
    sql_types::{BigInt, Bool, Int4, Text, Timestamptz, Uuid as SqlUuid},
};
use tracing::warn;
use uuid::Uuid;

/// SQL form of [`SlotState::from_columns`] == open.
const OPEN_SLOT: &str =
    "COALESCE(is_booked, FALSE) = FALSE AND COALESCE(status, 'open') <> 'booked'";

#[derive(Debug, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = availability_slots)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct SlotRow {
    id: Uuid,
    provider_code: String,
    start_utc: DateTime<Utc>,
    end_utc: DateTime<Utc>,
    status: Option<String>,
    is_booked: Option<bool>,
    created_at: DateTime<Utc>,
}

impl From<SlotRow> for AvailabilitySlot {
    fn from(row: SlotRow) -> Self {
        let state = SlotState::from_columns(row.status.as_deref(), row.is_booked);
        AvailabilitySlot {
            id: row.id,
            provider_code: row.provider_code,
            start_utc: row.start_utc,
            end_utc: row.end_utc,
            is_reserved: state.is_reserved(),
            created_at: row.created_at,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = availability_slots)]
struct NewSlotRow<'a> {
    provider_code: &'a str,
    start_utc: DateTime<Utc>,
    end_utc: DateTime<Utc>,
    status: Option<&'a str>,
    is_booked: Option<bool>,
}

#[derive(Debug, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = bookings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct BookingRow {
    id: Uuid,
    provider_code: String,
    client_id: String,
    start_utc: DateTime<Utc>,
    duration_mins: i32,
    status: String,
    slot_id: Option<Uuid>,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<BookingStatus>()
            .map_err(|err| StoreError::Corrupt(format!("booking {}: {err}", row.id)))?;
        Ok(Booking {
            id: row.id,
            provider_code: row.provider_code,
            client_id: row.client_id,
            start_utc: row.start_utc,
            duration_mins: row.duration_mins,
            status,
            slot_id: row.slot_id,
            cancel_reason: row.cancel_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = bookings)]
struct NewBookingRow<'a> {
    provider_code: &'a str,
    client_id: &'a str,
    start_utc: DateTime<Utc>,
    duration_mins: i32,
    status: &'a str,
    slot_id: Option<Uuid>,
}

#[derive(QueryableByName)]
struct RoutinePresence {
    #[diesel(sql_type = Bool)]
    present: bool,
}

fn to_bookings(rows: Vec<BookingRow>) -> Result<Vec<Booking>, StoreError> {
    rows.into_iter().map(Booking::try_from).collect()
}

fn to_booking(row: Option<BookingRow>) -> Result<Option<Booking>, StoreError> {
    row.map(Booking::try_from).transpose()
}

type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Postgres backed store. Connections come from an r2d2 pool, so the value is
/// cheap to clone and safe to share between request handlers.
#[derive(Clone)]
pub struct DatabaseInterface {
    pool: PgPool,
}

impl DatabaseInterface {
    pub fn new(database_url: &str, pool_size: u32) -> Result<Self, StoreError> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder().max_size(pool_size).build(manager)?;
        Ok(Self { pool })
    }

    fn connection(&self) -> Result<PooledConnection<ConnectionManager<PgConnection>>, StoreError> {
        Ok(self.pool.get()?)
    }

    #[cfg(test)]
    fn remove_all(&self) {
        let mut connection = self.connection().unwrap();
        diesel::delete(bookings::table)
            .execute(&mut connection)
            .unwrap();
        diesel::delete(availability_slots::table)
            .execute(&mut connection)
            .unwrap();
    }
}

impl BookingBackend for DatabaseInterface {
    fn supports_atomic_reservation(&self) -> bool {
        let lookup = self.connection().and_then(|mut connection| {
            diesel::sql_query(
                "SELECT EXISTS (SELECT 1 FROM pg_proc WHERE proname = 'reserve_slot') AS present",
            )
            .get_result::<RoutinePresence>(&mut connection)
            .map_err(StoreError::from)
        });

        match lookup {
            Ok(row) => row.present,
            Err(err) => {
                warn!(?err, "Failed to look up reserve_slot routine");
                false
            }
        }
    }

    fn slot(&self, id: Uuid) -> Result<Option<AvailabilitySlot>, StoreError> {
        let mut connection = self.connection()?;
        let row = availability_slots::table
            .find(id)
            .select(SlotRow::as_select())
            .first(&mut connection)
            .optional()?;
        Ok(row.map(AvailabilitySlot::from))
    }

    fn open_slot_at(
        &self,
        provider_code: &str,
        start_utc: DateTime<Utc>,
    ) -> Result<Option<AvailabilitySlot>, StoreError> {
        let mut connection = self.connection()?;
        let row = diesel::sql_query(format!(
            "SELECT * FROM availability_slots \
             WHERE provider_code = $1 AND start_utc = $2 AND {OPEN_SLOT} \
             ORDER BY created_at LIMIT 1"
        ))
        .bind::<Text, _>(provider_code)
        .bind::<Timestamptz, _>(start_utc)
        .get_result::<SlotRow>(&mut connection)
        .optional()?;
        Ok(row.map(AvailabilitySlot::from))
    }

    fn open_slots(
        &self,
        provider_code: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AvailabilitySlot>, StoreError> {
        let mut connection = self.connection()?;
        let rows = diesel::sql_query(format!(
            "SELECT * FROM availability_slots \
             WHERE provider_code = $1 AND start_utc >= $2 AND start_utc <= $3 AND {OPEN_SLOT} \
             ORDER BY start_utc ASC LIMIT $4"
        ))
        .bind::<Text, _>(provider_code)
        .bind::<Timestamptz, _>(window_start)
        .bind::<Timestamptz, _>(window_end)
        .bind::<BigInt, _>(i64::try_from(limit).unwrap_or(i64::MAX))
        .load::<SlotRow>(&mut connection)?;
        Ok(rows.into_iter().map(AvailabilitySlot::from).collect())
    }

    fn overlapping_slots(
        &self,
        provider_code: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AvailabilitySlot>, StoreError> {
        let mut connection = self.connection()?;
        let rows = availability_slots::table
            .filter(availability_slots::provider_code.eq(provider_code))
            .filter(availability_slots::start_utc.lt(end))
            .filter(availability_slots::end_utc.gt(start))
            .select(SlotRow::as_select())
            .load(&mut connection)?;
        Ok(rows.into_iter().map(AvailabilitySlot::from).collect())
    }

    fn insert_slots(&self, slots: &[NewSlot]) -> Result<Vec<AvailabilitySlot>, StoreError> {
        let (status, is_booked) = SlotState::Open.as_columns();
        let rows: Vec<NewSlotRow> = slots
            .iter()
            .map(|slot| NewSlotRow {
                provider_code: &slot.provider_code,
                start_utc: slot.start_utc,
                end_utc: slot.end_utc,
                status: Some(status),
                is_booked: Some(is_booked),
            })
            .collect();

        let mut connection = self.connection()?;
        let inserted = diesel::insert_into(availability_slots::table)
            .values(&rows)
            .returning(SlotRow::as_returning())
            .get_results(&mut connection)?;
        Ok(inserted.into_iter().map(AvailabilitySlot::from).collect())
    }

    fn delete_open_slot(&self, id: Uuid) -> Result<usize, StoreError> {
        let mut connection = self.connection()?;
        Ok(diesel::sql_query(format!(
            "DELETE FROM availability_slots WHERE id = $1 AND {OPEN_SLOT}"
        ))
        .bind::<SqlUuid, _>(id)
        .execute(&mut connection)?)
    }

    fn mark_slot_booked(&self, id: Uuid, provider_code: &str) -> Result<usize, StoreError> {
        let (status, is_booked) = SlotState::Booked.as_columns();
        let mut connection = self.connection()?;
        Ok(diesel::sql_query(format!(
            "UPDATE availability_slots SET status = $1, is_booked = $2 \
             WHERE id = $3 AND provider_code = $4 AND {OPEN_SLOT}"
        ))
        .bind::<Text, _>(status)
        .bind::<Bool, _>(is_booked)
        .bind::<SqlUuid, _>(id)
        .bind::<Text, _>(provider_code)
        .execute(&mut connection)?)
    }

    fn reopen_slot(&self, id: Uuid) -> Result<usize, StoreError> {
        let (status, is_booked) = SlotState::Open.as_columns();
        let mut connection = self.connection()?;
        Ok(diesel::update(availability_slots::table.find(id))
            .set((
                availability_slots::status.eq(Some(status)),
                availability_slots::is_booked.eq(Some(is_booked)),
            ))
            .execute(&mut connection)?)
    }

    fn reserve_atomic(
        &self,
        slot_id: Uuid,
        provider_code: &str,
        client_id: &str,
        duration_mins: i32,
    ) -> Result<Option<Booking>, StoreError> {
        let mut connection = self.connection()?;
        let rows = diesel::sql_query("SELECT * FROM reserve_slot($1, $2, $3, $4)")
            .bind::<SqlUuid, _>(slot_id)
            .bind::<Text, _>(provider_code)
            .bind::<Text, _>(client_id)
            .bind::<Int4, _>(duration_mins)
            .load::<BookingRow>(&mut connection)?;
        to_booking(rows.into_iter().next())
    }

    fn confirmed_booking(
        &self,
        client_id: &str,
        provider_code: &str,
        start_utc: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError> {
        let mut connection = self.connection()?;
        let row = bookings::table
            .filter(bookings::client_id.eq(client_id))
            .filter(bookings::provider_code.eq(provider_code))
            .filter(bookings::start_utc.eq(start_utc))
            .filter(bookings::status.eq(BookingStatus::Confirmed.as_str()))
            .select(BookingRow::as_select())
            .first(&mut connection)
            .optional()?;
        to_booking(row)
    }

    fn confirmed_booking_at(
        &self,
        provider_code: &str,
        start_utc: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError> {
        let mut connection = self.connection()?;
        let row = bookings::table
            .filter(bookings::provider_code.eq(provider_code))
            .filter(bookings::start_utc.eq(start_utc))
            .filter(bookings::status.eq(BookingStatus::Confirmed.as_str()))
            .select(BookingRow::as_select())
            .first(&mut connection)
            .optional()?;
        to_booking(row)
    }

    fn insert_booking(&self, booking: &NewBooking) -> Result<Booking, StoreError> {
        let row = NewBookingRow {
            provider_code: &booking.provider_code,
            client_id: &booking.client_id,
            start_utc: booking.start_utc,
            duration_mins: booking.duration_mins,
            status: BookingStatus::Confirmed.as_str(),
            slot_id: booking.slot_id,
        };

        let mut connection = self.connection()?;
        diesel::insert_into(bookings::table)
            .values(&row)
            .returning(BookingRow::as_returning())
            .get_result(&mut connection)?
            .try_into()
    }

    fn booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let mut connection = self.connection()?;
        let row = bookings::table
            .find(id)
            .select(BookingRow::as_select())
            .first(&mut connection)
            .optional()?;
        to_booking(row)
    }

    fn bookings(&self, query: &BookingQuery) -> Result<Vec<Booking>, StoreError> {
        let mut statement = bookings::table
            .select(BookingRow::as_select())
            .filter(bookings::start_utc.ge(query.window_start))
            .filter(bookings::start_utc.le(query.window_end))
            .order(bookings::start_utc.asc())
            .into_boxed();
        if let Some(provider_code) = &query.provider_code {
            statement = statement.filter(bookings::provider_code.eq(provider_code));
        }
        if let Some(client_id) = &query.client_id {
            statement = statement.filter(bookings::client_id.eq(client_id));
        }
        if let Some(status) = query.status {
            statement = statement.filter(bookings::status.eq(status.as_str()));
        }

        let mut connection = self.connection()?;
        to_bookings(statement.load(&mut connection)?)
    }

    fn cancel_booking(&self, id: Uuid, reason: Option<&str>) -> Result<Option<Booking>, StoreError> {
        let mut connection = self.connection()?;
        let row = diesel::update(
            bookings::table
                .find(id)
                .filter(bookings::status.eq(BookingStatus::Confirmed.as_str())),
        )
        .set((
            bookings::status.eq(BookingStatus::Canceled.as_str()),
            bookings::cancel_reason.eq(reason),
            bookings::updated_at.eq(Utc::now()),
        ))
        .returning(BookingRow::as_returning())
        .get_result(&mut connection)
        .optional()?;
        to_booking(row)
    }

    fn move_booking(&self, id: Uuid, slot: &AvailabilitySlot) -> Result<Option<Booking>, StoreError> {
        let mut connection = self.connection()?;
        let row = diesel::update(
            bookings::table
                .find(id)
                .filter(bookings::status.eq(BookingStatus::Confirmed.as_str())),
        )
        .set((
            bookings::start_utc.eq(slot.start_utc),
            bookings::duration_mins.eq(slot.duration_mins()),
            bookings::slot_id.eq(Some(slot.id)),
            bookings::updated_at.eq(Utc::now()),
        ))
        .returning(BookingRow::as_returning())
        .get_result(&mut connection)
        .optional()?;
        to_booking(row)
    }

    fn has_booked_since(&self, client_id: &str, since: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut connection = self.connection()?;
        Ok(diesel::select(diesel::dsl::exists(
            bookings::table
                .filter(bookings::client_id.eq(client_id))
                .filter(bookings::status.eq(BookingStatus::Confirmed.as_str()))
                .filter(bookings::created_at.ge(since)),
        ))
        .get_result::<bool>(&mut connection)?)
    }
}
