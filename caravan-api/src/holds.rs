use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use caravan_core::{Actor, DomainError};
use caravan_inventory::{AcquireRequest, ContextKey, HoldGrant, HoldToken, OwnerRef, UnitView};
use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::{actor_from_headers, require_auth},
    state::AppState,
    stream::inventory_stream,
};

// Bus journeys are keyed by travel date, hotel stays by check-in/check-out.

#[derive(Debug, Deserialize)]
struct JourneyQuery {
    date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct StayQuery {
    check_in: NaiveDate,
    check_out: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct ProvisionSeatsRequest {
    date: NaiveDate,
    seat_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProvisionRoomsRequest {
    check_in: NaiveDate,
    check_out: NaiveDate,
    room_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SeatHoldRequest {
    date: NaiveDate,
    seat_ids: Vec<String>,
    hold_token: Option<HoldToken>,
    ttl_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RoomHoldRequest {
    check_in: NaiveDate,
    check_out: NaiveDate,
    room_ids: Vec<String>,
    hold_token: Option<HoldToken>,
    ttl_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct SeatSelection {
    seat_ids: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RoomSelection {
    room_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ConfirmSeatsRequest {
    hold_token: HoldToken,
    seat_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ConfirmRoomsRequest {
    hold_token: HoldToken,
    room_ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct AvailabilityResponse {
    resource_id: Uuid,
    context: ContextKey,
    units: Vec<UnitView>,
}

pub fn routes(state: AppState) -> Router<AppState> {
    let auth = from_fn_with_state(state, require_auth);

    Router::new()
        .route(
            "/v1/buses/{bus_id}/seats",
            get(bus_seat_map).merge(post(provision_seats).route_layer(auth.clone())),
        )
        .route(
            "/v1/buses/{bus_id}/hold",
            post(hold_seats).route_layer(auth.clone()),
        )
        .route(
            "/v1/buses/{bus_id}/hold/{token}",
            delete(release_seats).route_layer(auth.clone()),
        )
        .route(
            "/v1/buses/{bus_id}/confirm",
            post(confirm_seats).route_layer(auth.clone()),
        )
        .route("/v1/buses/{bus_id}/stream", get(inventory_stream))
        .route(
            "/v1/hotels/{hotel_id}/rooms",
            get(hotel_rooms).merge(post(provision_rooms).route_layer(auth.clone())),
        )
        .route(
            "/v1/hotels/{hotel_id}/hold",
            post(hold_rooms).route_layer(auth.clone()),
        )
        .route(
            "/v1/hotels/{hotel_id}/hold/{token}",
            delete(release_rooms).route_layer(auth.clone()),
        )
        .route(
            "/v1/hotels/{hotel_id}/confirm",
            post(confirm_rooms).route_layer(auth),
        )
        .route("/v1/hotels/{hotel_id}/stream", get(inventory_stream))
}

/// DELETE bodies are optional; an empty body releases the whole hold.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| DomainError::Validation(format!("invalid request body: {}", e)).into())
}

fn stay(check_in: NaiveDate, check_out: NaiveDate) -> Result<ContextKey, AppError> {
    Ok(ContextKey::stay(check_in, check_out)?)
}

fn require_admin(actor: &Actor) -> Result<(), AppError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(DomainError::Forbidden("inventory provisioning requires an admin".into()).into())
    }
}

async fn availability(
    state: &AppState,
    headers: &HeaderMap,
    resource_id: Uuid,
    context: ContextKey,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let viewer = actor_from_headers(&state.auth, headers)?.map(|a| OwnerRef::new(a.user_id));
    let units = state
        .holds
        .seat_map(resource_id, context, viewer.as_ref())
        .await?;
    Ok(Json(AvailabilityResponse {
        resource_id,
        context,
        units,
    }))
}

async fn provision(
    state: &AppState,
    actor: &Actor,
    resource_id: Uuid,
    context: ContextKey,
    unit_ids: Vec<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_admin(actor)?;
    let created = state.holds.provision(resource_id, context, unit_ids).await?;
    Ok(Json(json!({ "created": created })))
}

async fn acquire(state: &AppState, req: AcquireRequest) -> Result<Json<HoldGrant>, AppError> {
    match state.holds.acquire(req).await {
        Ok(grant) => {
            state.metrics.holds_acquired.inc();
            Ok(Json(grant))
        }
        Err(e) => {
            if let DomainError::Conflict(_) = e {
                state.metrics.hold_conflicts.inc();
            }
            Err(e.into())
        }
    }
}

async fn release(
    state: &AppState,
    resource_id: Uuid,
    token: String,
    unit_ids: Option<Vec<String>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let released = state
        .holds
        .release(resource_id, &HoldToken::from(token), unit_ids)
        .await?;
    Ok(Json(json!({ "released": released })))
}

async fn confirm(
    state: &AppState,
    resource_id: Uuid,
    token: HoldToken,
    unit_ids: Option<Vec<String>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let booked = state.holds.confirm(resource_id, &token, unit_ids).await?;
    state.metrics.holds_confirmed.inc();
    Ok(Json(json!({ "booked": booked })))
}

/// GET /v1/buses/{bus_id}/seats?date=
async fn bus_seat_map(
    State(state): State<AppState>,
    Path(bus_id): Path<Uuid>,
    Query(query): Query<JourneyQuery>,
    headers: HeaderMap,
) -> Result<Json<AvailabilityResponse>, AppError> {
    availability(&state, &headers, bus_id, ContextKey::journey(query.date)).await
}

/// POST /v1/buses/{bus_id}/seats
async fn provision_seats(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(bus_id): Path<Uuid>,
    Json(req): Json<ProvisionSeatsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    provision(&state, &actor, bus_id, ContextKey::journey(req.date), req.seat_ids).await
}

/// POST /v1/buses/{bus_id}/hold
async fn hold_seats(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(bus_id): Path<Uuid>,
    Json(req): Json<SeatHoldRequest>,
) -> Result<Json<HoldGrant>, AppError> {
    acquire(
        &state,
        AcquireRequest {
            resource_id: bus_id,
            context: ContextKey::journey(req.date),
            unit_ids: req.seat_ids,
            owner: OwnerRef::new(actor.user_id),
            ttl_seconds: req.ttl_seconds,
            existing_token: req.hold_token,
        },
    )
    .await
}

/// DELETE /v1/buses/{bus_id}/hold/{token}
async fn release_seats(
    State(state): State<AppState>,
    Path((bus_id, token)): Path<(Uuid, String)>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let selection: SeatSelection = optional_body(&body)?;
    release(&state, bus_id, token, selection.seat_ids).await
}

/// POST /v1/buses/{bus_id}/confirm
async fn confirm_seats(
    State(state): State<AppState>,
    Path(bus_id): Path<Uuid>,
    Json(req): Json<ConfirmSeatsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    confirm(&state, bus_id, req.hold_token, req.seat_ids).await
}

/// GET /v1/hotels/{hotel_id}/rooms?check_in=&check_out=
async fn hotel_rooms(
    State(state): State<AppState>,
    Path(hotel_id): Path<Uuid>,
    Query(query): Query<StayQuery>,
    headers: HeaderMap,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let context = stay(query.check_in, query.check_out)?;
    availability(&state, &headers, hotel_id, context).await
}

/// POST /v1/hotels/{hotel_id}/rooms
async fn provision_rooms(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(hotel_id): Path<Uuid>,
    Json(req): Json<ProvisionRoomsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let context = stay(req.check_in, req.check_out)?;
    provision(&state, &actor, hotel_id, context, req.room_ids).await
}

/// POST /v1/hotels/{hotel_id}/hold
async fn hold_rooms(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(hotel_id): Path<Uuid>,
    Json(req): Json<RoomHoldRequest>,
) -> Result<Json<HoldGrant>, AppError> {
    acquire(
        &state,
        AcquireRequest {
            resource_id: hotel_id,
            context: stay(req.check_in, req.check_out)?,
            unit_ids: req.room_ids,
            owner: OwnerRef::new(actor.user_id),
            ttl_seconds: req.ttl_seconds,
            existing_token: req.hold_token,
        },
    )
    .await
}

/// DELETE /v1/hotels/{hotel_id}/hold/{token}
async fn release_rooms(
    State(state): State<AppState>,
    Path((hotel_id, token)): Path<(Uuid, String)>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let selection: RoomSelection = optional_body(&body)?;
    release(&state, hotel_id, token, selection.room_ids).await
}

/// POST /v1/hotels/{hotel_id}/confirm
async fn confirm_rooms(
    State(state): State<AppState>,
    Path(hotel_id): Path<Uuid>,
    Json(req): Json<ConfirmRoomsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    confirm(&state, hotel_id, req.hold_token, req.room_ids).await
}
