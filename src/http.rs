use crate::assistant::{ChatReply, ChatRequest};
use crate::backend::{blocking, BookingBackend};
use crate::booking_service::LocalRange;
use crate::error::BookingError;
use crate::reservation::{ReservationRequest, ReservationStrategy};
use crate::timezone::{display_in, parse_timezone};
use crate::types::{AvailabilitySlot, Booking, BookingQuery, BookingStatus};
use crate::AppState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, Request, State};
use axum::handler::Handler;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;
use validator::Validate;

const ADMIN_PASSWORD_HEADER: &str = "x-admin-password";

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateBookingRequest {
    #[validate(length(min = 1, max = 64))]
    provider_code: String,
    #[validate(length(min = 1, max = 128))]
    client_id: String,
    availability_id: Option<Uuid>,
    #[serde(rename = "startUTC", alias = "startUtc")]
    start_utc: Option<DateTime<Utc>>,
    #[validate(range(min = 1, max = 1440))]
    duration_mins: Option<i32>,
}

impl From<CreateBookingRequest> for ReservationRequest {
    fn from(request: CreateBookingRequest) -> Self {
        ReservationRequest {
            availability_id: request.availability_id,
            provider_code: request.provider_code,
            client_id: request.client_id,
            start_utc: request.start_utc,
            duration_mins: request.duration_mins,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct ListBookingsRequest {
    #[validate(length(min = 1, max = 64))]
    provider_code: Option<String>,
    #[validate(length(min = 1, max = 128))]
    client_id: Option<String>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    status: Option<BookingStatus>,
    tz: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CancelBookingRequest {
    booking_id: Uuid,
    #[validate(length(max = 500))]
    reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RescheduleBookingRequest {
    booking_id: Uuid,
    new_availability_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalRangeRequest {
    start_local: String,
    end_local: String,
    tz: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct AddAvailabilityRequest {
    #[validate(length(min = 1, max = 64))]
    provider_code: String,
    #[validate(length(min = 1, max = 100))]
    ranges: Vec<LocalRangeRequest>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct ListSlotsRequest {
    #[validate(length(min = 1, max = 64))]
    provider_code: String,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    #[validate(range(min = 1, max = 200))]
    limit: Option<usize>,
    tz: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct RemoveSlotRequest {
    #[validate(length(min = 1, max = 64))]
    provider_code: String,
    availability_id: Uuid,
}

#[derive(Debug, Serialize)]
struct DataResponse<T> {
    data: Vec<T>,
}

#[derive(Debug, Serialize)]
struct BookingView {
    #[serde(flatten)]
    booking: Booking,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_start: Option<String>,
}

#[derive(Debug, Serialize)]
struct SlotView {
    #[serde(flatten)]
    slot: AvailabilitySlot,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_start: Option<String>,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    booking_id: Uuid,
    status: BookingStatus,
}

#[derive(Debug, Serialize)]
struct RemoveSlotResponse {
    availability_id: Uuid,
    removed: bool,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    strategy: ReservationStrategy,
}

pub fn create_app<B: BookingBackend>(state: AppState<B>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let admin = middleware::from_fn_with_state(state.admin_password.clone(), admin_auth);

    Router::new()
        .route("/health", get(health::<B>))
        .route(
            "/bookings",
            get(list_bookings_query::<B>).post(create_booking::<B>),
        )
        .route("/bookings/list", post(list_bookings::<B>))
        .route("/bookings/cancel", post(cancel_booking::<B>))
        .route("/bookings/reschedule", post(reschedule_booking::<B>))
        .route(
            "/availability",
            get(list_slots_query::<B>).post(add_availability::<B>.layer(admin.clone())),
        )
        .route("/availability/list", post(list_slots::<B>))
        .route("/availability/remove", post(remove_slot::<B>.layer(admin)))
        .route("/chat", post(chat::<B>))
        .with_state(state)
        .layer(cors)
}

/// Guards provider schedule changes when an admin password is configured.
async fn admin_auth(
    State(admin_password): State<Option<String>>,
    request: Request,
    next: Next,
) -> Result<Response, BookingError> {
    if let Some(admin_password) = admin_password {
        let provided = request
            .headers()
            .get(ADMIN_PASSWORD_HEADER)
            .and_then(|value| value.to_str().ok());
        if provided != Some(admin_password.as_str()) {
            return Err(BookingError::Unauthorized);
        }
    }
    Ok(next.run(request).await)
}

async fn health<B: BookingBackend>(State(state): State<AppState<B>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        strategy: state.bookings.strategy(),
    })
}

async fn create_booking<B: BookingBackend>(
    State(state): State<AppState<B>>,
    payload: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> Result<Json<Booking>, BookingError> {
    let Json(request) = payload?;
    request.validate()?;

    let service = state.bookings.clone();
    let booking = blocking(move || service.create(&request.into())).await?;
    Ok(Json(booking))
}

async fn list_bookings<B: BookingBackend>(
    State(state): State<AppState<B>>,
    payload: Result<Json<ListBookingsRequest>, JsonRejection>,
) -> Result<Json<DataResponse<BookingView>>, BookingError> {
    let Json(request) = payload?;
    find_bookings(state, request).await
}

async fn list_bookings_query<B: BookingBackend>(
    State(state): State<AppState<B>>,
    payload: Result<Query<ListBookingsRequest>, QueryRejection>,
) -> Result<Json<DataResponse<BookingView>>, BookingError> {
    let Query(request) = payload?;
    find_bookings(state, request).await
}

async fn find_bookings<B: BookingBackend>(
    state: AppState<B>,
    request: ListBookingsRequest,
) -> Result<Json<DataResponse<BookingView>>, BookingError> {
    request.validate()?;
    let tz = display_timezone(request.tz.as_deref())?;
    let query = BookingQuery {
        provider_code: non_blank(request.provider_code),
        client_id: non_blank(request.client_id),
        window_start: request.window_start,
        window_end: request.window_end,
        status: request.status,
    };

    let service = state.bookings.clone();
    let bookings = blocking(move || service.list(&query)).await?;
    Ok(Json(DataResponse {
        data: bookings
            .into_iter()
            .map(|booking| BookingView {
                display_start: tz.map(|tz| display_in(booking.start_utc, tz)),
                booking,
            })
            .collect(),
    }))
}

async fn cancel_booking<B: BookingBackend>(
    State(state): State<AppState<B>>,
    payload: Result<Json<CancelBookingRequest>, JsonRejection>,
) -> Result<Json<CancelResponse>, BookingError> {
    let Json(request) = payload?;
    request.validate()?;

    let service = state.bookings.clone();
    let booking = blocking(move || {
        service.cancel(request.booking_id, non_blank(request.reason).as_deref())
    })
    .await?;
    Ok(Json(CancelResponse {
        booking_id: booking.id,
        status: booking.status,
    }))
}

async fn reschedule_booking<B: BookingBackend>(
    State(state): State<AppState<B>>,
    payload: Result<Json<RescheduleBookingRequest>, JsonRejection>,
) -> Result<Json<Booking>, BookingError> {
    let Json(request) = payload?;

    let service = state.bookings.clone();
    let booking =
        blocking(move || service.reschedule(request.booking_id, request.new_availability_id))
            .await?;
    Ok(Json(booking))
}

async fn add_availability<B: BookingBackend>(
    State(state): State<AppState<B>>,
    payload: Result<Json<AddAvailabilityRequest>, JsonRejection>,
) -> Result<Json<DataResponse<AvailabilitySlot>>, BookingError> {
    let Json(request) = payload?;
    request.validate()?;
    let ranges: Vec<LocalRange> = request
        .ranges
        .into_iter()
        .map(|range| LocalRange {
            start_local: range.start_local,
            end_local: range.end_local,
            tz: range.tz,
        })
        .collect();

    let service = state.bookings.clone();
    let provider_code = request.provider_code;
    let slots = blocking(move || service.add_availability(&provider_code, &ranges)).await?;
    Ok(Json(DataResponse { data: slots }))
}

async fn list_slots<B: BookingBackend>(
    State(state): State<AppState<B>>,
    payload: Result<Json<ListSlotsRequest>, JsonRejection>,
) -> Result<Json<DataResponse<SlotView>>, BookingError> {
    let Json(request) = payload?;
    find_slots(state, request).await
}

async fn list_slots_query<B: BookingBackend>(
    State(state): State<AppState<B>>,
    payload: Result<Query<ListSlotsRequest>, QueryRejection>,
) -> Result<Json<DataResponse<SlotView>>, BookingError> {
    let Query(request) = payload?;
    find_slots(state, request).await
}

async fn find_slots<B: BookingBackend>(
    state: AppState<B>,
    request: ListSlotsRequest,
) -> Result<Json<DataResponse<SlotView>>, BookingError> {
    request.validate()?;
    let tz = display_timezone(request.tz.as_deref())?;

    let service = state.bookings.clone();
    let slots = blocking(move || {
        service.list_open_slots(
            &request.provider_code,
            request.window_start,
            request.window_end,
            request.limit,
        )
    })
    .await?;
    Ok(Json(DataResponse {
        data: slots
            .into_iter()
            .map(|slot| SlotView {
                display_start: tz.map(|tz| display_in(slot.start_utc, tz)),
                slot,
            })
            .collect(),
    }))
}

async fn remove_slot<B: BookingBackend>(
    State(state): State<AppState<B>>,
    payload: Result<Json<RemoveSlotRequest>, JsonRejection>,
) -> Result<Json<RemoveSlotResponse>, BookingError> {
    let Json(request) = payload?;
    request.validate()?;

    let service = state.bookings.clone();
    let availability_id = request.availability_id;
    blocking(move || service.remove_slot(&request.provider_code, availability_id)).await?;
    Ok(Json(RemoveSlotResponse {
        availability_id,
        removed: true,
    }))
}

async fn chat<B: BookingBackend>(
    State(state): State<AppState<B>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, BookingError> {
    let Json(request) = payload?;
    Ok(Json(state.assistant.reply(&request).await?))
}

fn display_timezone(tz: Option<&str>) -> Result<Option<Tz>, BookingError> {
    tz.filter(|tz| !tz.trim().is_empty())
        .map(parse_timezone)
        .transpose()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
